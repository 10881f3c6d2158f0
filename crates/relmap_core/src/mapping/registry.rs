//! In-process registry of data source maps and record factories.

use crate::mapping::descriptor::DataSourceMap;
use crate::mapping::{MappingError, MappingResult};
use crate::model::record::Record;
use log::{debug, info};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt::{Debug, Formatter};
use std::path::Path;
use std::sync::Arc;

/// Constructor for blank records of one mapped type.
///
/// Resolved once at registration; materialization calls it per row.
pub type RecordFactory = Arc<dyn Fn() -> Record + Send + Sync>;

struct RegisteredType {
    map: Arc<DataSourceMap>,
    factory: RecordFactory,
}

/// Type-name keyed registry of mappings.
#[derive(Default)]
pub struct MappingRegistry {
    types: BTreeMap<String, RegisteredType>,
}

impl Debug for MappingRegistry {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MappingRegistry")
            .field("types", &self.types.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl MappingRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a map whose records start with no field values.
    pub fn register(&mut self, map: DataSourceMap) -> MappingResult<()> {
        let type_name = map.type_name.clone();
        let factory: RecordFactory = Arc::new(move || Record::new(type_name.as_str()));
        self.register_with_factory(map, factory)
    }

    /// Registers a map together with the constructor for its records.
    pub fn register_with_factory(
        &mut self,
        map: DataSourceMap,
        factory: RecordFactory,
    ) -> MappingResult<()> {
        map.validate()?;
        if self.types.contains_key(map.type_name.as_str()) {
            return Err(MappingError::Duplicate(map.type_name));
        }

        debug!(
            "event=mapping_register module=mapping status=ok type={} relationships={} select_for={}",
            map.type_name,
            map.relationships.len(),
            map.select_for.len()
        );
        self.types.insert(
            map.type_name.clone(),
            RegisteredType {
                map: Arc::new(map),
                factory,
            },
        );
        Ok(())
    }

    /// Registers every map of a JSON document (an array of maps).
    ///
    /// Returns the number of registered maps. Registration is all-or-nothing.
    pub fn load_json(&mut self, document: &str) -> MappingResult<usize> {
        let maps: Vec<DataSourceMap> = serde_json::from_str(document)?;
        let mut seen = BTreeSet::new();
        for map in &maps {
            map.validate()?;
            if self.types.contains_key(map.type_name.as_str())
                || !seen.insert(map.type_name.as_str())
            {
                return Err(MappingError::Duplicate(map.type_name.clone()));
            }
        }

        let count = maps.len();
        for map in maps {
            self.register(map)?;
        }
        info!("event=mapping_load module=mapping status=ok maps={count}");
        Ok(count)
    }

    /// Reads and registers a JSON mapping document from disk.
    pub fn load_json_file(&mut self, path: impl AsRef<Path>) -> MappingResult<usize> {
        let path = path.as_ref();
        let document = std::fs::read_to_string(path).map_err(|err| MappingError::Invalid {
            type_name: "*".to_string(),
            message: format!("cannot read `{}`: {err}", path.display()),
        })?;
        self.load_json(&document)
    }

    /// Resolves the data source map of one type.
    pub fn get_map(&self, type_name: &str) -> MappingResult<Arc<DataSourceMap>> {
        self.types
            .get(type_name)
            .map(|entry| Arc::clone(&entry.map))
            .ok_or_else(|| MappingError::NotFound(type_name.to_string()))
    }

    /// Creates a blank record through the type's registered factory.
    pub fn instantiate(&self, type_name: &str) -> MappingResult<Record> {
        let entry = self
            .types
            .get(type_name)
            .ok_or_else(|| MappingError::NotFound(type_name.to_string()))?;
        let record = (entry.factory)();
        if record.type_name() != type_name {
            return Err(MappingError::FactoryMismatch {
                expected: type_name.to_string(),
                found: record.type_name().to_string(),
            });
        }
        Ok(record)
    }

    /// Checks that every relationship and its load command resolve.
    pub fn verify_relationships(&self) -> MappingResult<()> {
        for entry in self.types.values() {
            for relationship in &entry.map.relationships {
                let child = self.get_map(&relationship.child_type)?;
                if let Some(command) = &relationship.load_command {
                    if child.select_for(command).is_none() {
                        return Err(MappingError::UnknownCriteria {
                            type_name: child.type_name.clone(),
                            criteria: command.clone(),
                        });
                    }
                }
            }
        }
        Ok(())
    }

    pub fn contains(&self, type_name: &str) -> bool {
        self.types.contains_key(type_name)
    }

    /// Returns registered type names in sorted order.
    pub fn type_names(&self) -> Vec<String> {
        self.types.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }
}
