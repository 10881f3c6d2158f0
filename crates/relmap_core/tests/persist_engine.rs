mod support;

use relmap_core::{
    BindError, Criteria, Engine, EngineConfig, EngineError, ErrorClass, Lifecycle, MappingError,
    MappingRegistry, ObjectGraph, ObjectState, Operation, Record, RecordId, SqliteExecutor,
};
use support::{
    count_rows, new_line, new_order, open_orders_store, orders_registry, seed_line, seed_order,
};

#[test]
fn insert_order_with_lines_propagates_generated_key() {
    let mut conn = open_orders_store();
    let registry = orders_registry();
    let mut graph = ObjectGraph::new();
    let order = graph.insert(new_order("ada", 19.5));
    let first = graph.insert_child(order, "lines", new_line("pen", 2)).unwrap();
    let second = graph.insert_child(order, "lines", new_line("ink", 1)).unwrap();

    let tx = conn.transaction().unwrap();
    {
        let executor = SqliteExecutor::new(&tx);
        let engine = Engine::new(&registry, &executor);
        assert_eq!(engine.persist(&mut graph, order).unwrap(), Operation::Insert);
    }
    tx.commit().unwrap();

    let order_id = graph.get(order).unwrap().get_i64("id").unwrap();
    assert_eq!(graph.get(order).unwrap().get_i64("version"), Some(1));
    for line in [first, second] {
        let record = graph.get(line).unwrap();
        assert_eq!(record.get_i64("order_id"), Some(order_id));
        assert!(record.get_i64("id").is_some());
        assert_eq!(record.lifecycle(), Lifecycle::loaded());
    }
    assert_eq!(graph.get(order).unwrap().lifecycle(), Lifecycle::loaded());
    assert_eq!(count_rows(&conn, "orders"), 1);
    assert_eq!(count_rows(&conn, "order_lines"), 2);
}

#[test]
fn records_without_pending_work_are_left_alone() {
    let conn = open_orders_store();
    let registry = orders_registry();
    let executor = SqliteExecutor::new(&conn);
    let engine = Engine::new(&registry, &executor);

    let mut graph = ObjectGraph::new();
    let fresh = graph.insert(Record::new("order"));
    let loaded = graph.insert(Record::loaded("order"));
    let mut discarded = new_order("ada", 1.0);
    discarded.mark_removed();
    let discarded = graph.insert(discarded);

    for id in [fresh, loaded, discarded] {
        let before = graph.get(id).unwrap().lifecycle();
        assert_eq!(engine.persist(&mut graph, id).unwrap(), Operation::None);
        assert_eq!(graph.get(id).unwrap().lifecycle(), before);
    }
    assert_eq!(count_rows(&conn, "orders"), 0);
}

#[test]
fn update_bumps_version_and_cascades_to_new_lines() {
    let mut conn = open_orders_store();
    let order_id = seed_order(&conn, "ada", 10.0);
    let registry = orders_registry();

    let mut graph = ObjectGraph::new();
    let mut order = Record::loaded("order")
        .with("id", order_id)
        .with("customer", "grace".to_string())
        .with("total", 12.25)
        .with("version", 1_i64);
    order.mark_modified();
    let order = graph.insert(order);
    let line = graph.insert_child(order, "lines", new_line("pad", 4)).unwrap();

    let tx = conn.transaction().unwrap();
    {
        let executor = SqliteExecutor::new(&tx);
        let engine = Engine::new(&registry, &executor);
        assert_eq!(engine.persist(&mut graph, order).unwrap(), Operation::Update);
    }
    tx.commit().unwrap();

    let stored = graph.get(order).unwrap();
    assert_eq!(stored.get_i64("version"), Some(2));
    assert_eq!(stored.state(), ObjectState::Consistent);
    assert!(!stored.is_new());
    assert_eq!(graph.get(line).unwrap().get_i64("order_id"), Some(order_id));

    let customer: String = conn
        .query_row("SELECT customer FROM orders WHERE id = ?1", [order_id], |row| {
            row.get(0)
        })
        .unwrap();
    assert_eq!(customer, "grace");
    assert_eq!(count_rows(&conn, "order_lines"), 1);
}

#[test]
fn stale_version_reports_change_conflict_and_keeps_flags() {
    let conn = open_orders_store();
    let order_id = seed_order(&conn, "ada", 10.0);
    conn.execute("UPDATE orders SET version = 5 WHERE id = ?1", [order_id])
        .unwrap();
    let registry = orders_registry();
    let executor = SqliteExecutor::new(&conn);
    let engine = Engine::new(&registry, &executor);

    let mut graph = ObjectGraph::new();
    let mut order = Record::loaded("order")
        .with("id", order_id)
        .with("customer", "grace".to_string())
        .with("total", 1.0)
        .with("version", 1_i64);
    order.mark_modified();
    let order = graph.insert(order);

    assert_eq!(
        engine.persist(&mut graph, order).unwrap(),
        Operation::ChangeConflict
    );
    let record = graph.get(order).unwrap();
    assert_eq!(record.state(), ObjectState::Modified);
    assert!(!record.is_new());
    assert_eq!(record.get_i64("version"), Some(1));
}

#[test]
fn delete_removes_lines_before_their_order() {
    let conn = open_orders_store();
    let order_id = seed_order(&conn, "ada", 10.0);
    seed_line(&conn, order_id, "pen", 1);
    seed_line(&conn, order_id, "ink", 3);
    let registry = orders_registry();
    let executor = SqliteExecutor::new(&conn);
    let engine = Engine::new(&registry, &executor);

    let mut graph = ObjectGraph::new();
    let identity = Record::new("order").with("id", order_id);
    let order = engine
        .restore_graph(&mut graph, "order", &identity, &["lines"])
        .unwrap()
        .unwrap();
    let lines = graph.children(order, "lines");
    assert_eq!(lines.len(), 2);

    graph.get_mut(order).unwrap().mark_removed();
    assert_eq!(engine.persist(&mut graph, order).unwrap(), Operation::Delete);

    assert_eq!(count_rows(&conn, "orders"), 0);
    assert_eq!(count_rows(&conn, "order_lines"), 0);
    for id in lines.into_iter().chain([order]) {
        let record = graph.get(id).unwrap();
        assert_eq!(record.state(), ObjectState::Obsoleted);
        assert!(record.is_new());
    }
}

#[test]
fn identity_fetch_outside_transaction_fails_before_writing() {
    let conn = open_orders_store();
    let registry = orders_registry();
    let executor = SqliteExecutor::new(&conn);
    let engine = Engine::new(&registry, &executor);

    let mut graph = ObjectGraph::new();
    let order = graph.insert(new_order("ada", 3.0));

    let err = engine.persist(&mut graph, order).unwrap_err();
    assert!(matches!(err, EngineError::NoAmbientTransaction { ref type_name } if type_name == "order"));
    assert_eq!(err.class(), ErrorClass::Configuration);
    assert_eq!(count_rows(&conn, "orders"), 0);
    assert_eq!(graph.get(order).unwrap().state(), ObjectState::Modified);
}

#[test]
fn returning_clause_supplies_keys_without_transaction() {
    let conn = open_orders_store();
    let order_id = seed_order(&conn, "ada", 3.0);
    let registry = orders_registry();
    let executor = SqliteExecutor::new(&conn);
    let engine = Engine::new(&registry, &executor);

    let mut graph = ObjectGraph::new();
    let line = graph.insert(new_line("pen", 1).with("order_id", order_id));
    assert_eq!(engine.persist(&mut graph, line).unwrap(), Operation::Insert);
    assert!(graph.get(line).unwrap().get_i64("id").is_some());
    assert_eq!(count_rows(&conn, "order_lines"), 1);
}

#[test]
fn faulty_record_is_a_state_error() {
    let conn = open_orders_store();
    let registry = orders_registry();
    let executor = SqliteExecutor::new(&conn);
    let engine = Engine::new(&registry, &executor);

    let mut graph = ObjectGraph::new();
    let order = graph.insert(Record::new("order").with_lifecycle(Lifecycle {
        is_new: false,
        state: ObjectState::Faulty,
    }));

    let err = engine.persist(&mut graph, order).unwrap_err();
    assert!(matches!(
        err,
        EngineError::StateError {
            state: ObjectState::Faulty,
            ..
        }
    ));
    assert_eq!(err.class(), ErrorClass::Integrity);
}

#[test]
fn unmapped_type_and_missing_command_are_configuration_errors() {
    let conn = open_orders_store();
    let registry = orders_registry();
    let executor = SqliteExecutor::new(&conn);
    let engine = Engine::new(&registry, &executor);

    let mut graph = ObjectGraph::new();
    let mut invoice = Record::new("invoice");
    invoice.mark_modified();
    let invoice = graph.insert(invoice);
    let err = engine.persist(&mut graph, invoice).unwrap_err();
    assert!(matches!(err, EngineError::Mapping(MappingError::NotFound(ref name)) if name == "invoice"));

    let mut lookup = Record::new("customer_order").with("customer", "ada".to_string());
    lookup.mark_modified();
    let lookup = graph.insert(lookup);
    let err = engine.persist(&mut graph, lookup).unwrap_err();
    assert!(matches!(
        err,
        EngineError::Mapping(MappingError::Incomplete {
            operation: Operation::Insert,
            ..
        })
    ));
    assert_eq!(err.class(), ErrorClass::Configuration);
}

#[test]
fn child_of_wrong_type_is_rejected() {
    let mut conn = open_orders_store();
    let registry = orders_registry();
    let mut graph = ObjectGraph::new();
    let order = graph.insert(new_order("ada", 1.0));
    graph
        .insert_child(order, "lines", new_order("nested", 2.0))
        .unwrap();

    let tx = conn.transaction().unwrap();
    let executor = SqliteExecutor::new(&tx);
    let engine = Engine::new(&registry, &executor);
    let err = engine.persist(&mut graph, order).unwrap_err();
    assert!(matches!(
        err,
        EngineError::ChildTypeMismatch { ref expected, ref found, .. }
            if expected == "order_line" && found == "order"
    ));
}

#[test]
fn removed_child_under_updated_parent_is_a_cascade_violation() {
    let conn = open_orders_store();
    let order_id = seed_order(&conn, "ada", 1.0);
    let line_id = seed_line(&conn, order_id, "pen", 1);
    let registry = orders_registry();
    let executor = SqliteExecutor::new(&conn);
    let engine = Engine::new(&registry, &executor);

    let mut graph = ObjectGraph::new();
    let mut order = Record::loaded("order")
        .with("id", order_id)
        .with("customer", "ada".to_string())
        .with("total", 1.0)
        .with("version", 1_i64);
    order.mark_modified();
    let order = graph.insert(order);
    let mut line = Record::loaded("order_line")
        .with("id", line_id)
        .with("order_id", order_id)
        .with("product", "pen".to_string())
        .with("quantity", 1_i64);
    line.mark_removed();
    graph.insert_child(order, "lines", line).unwrap();

    let err = engine.persist(&mut graph, order).unwrap_err();
    assert!(matches!(
        err,
        EngineError::CascadeViolation {
            parent_operation: Operation::Update,
            child_operation: Operation::Delete,
            ..
        }
    ));
}

const NODE_MAPPING: &str = r#"[{
    "type_name": "node",
    "update": {
        "text": "UPDATE nodes SET label = :label WHERE id = :id",
        "parameters": [
            { "name": "label", "data_type": "text", "field": "label" },
            { "name": "id", "data_type": "integer", "field": "id" }
        ],
        "fields": []
    },
    "relationships": [
        { "kind": "one_to_many", "property": "children", "child_type": "node", "foreign_key": "parent_id" }
    ]
}]"#;

fn node_store() -> (rusqlite::Connection, MappingRegistry) {
    let conn = open_orders_store();
    conn.execute_batch(
        "CREATE TABLE nodes (id INTEGER PRIMARY KEY, parent_id INTEGER, label TEXT);
         INSERT INTO nodes (id, label) VALUES (1, 'a'), (2, 'b'), (3, 'c');",
    )
    .unwrap();
    let mut registry = MappingRegistry::new();
    registry.load_json(NODE_MAPPING).unwrap();
    (conn, registry)
}

fn modified_node(graph: &mut ObjectGraph, id: i64) -> RecordId {
    let mut node = Record::loaded("node")
        .with("id", id)
        .with("label", format!("node-{id}"));
    node.mark_modified();
    graph.insert(node)
}

#[test]
fn cyclic_graph_is_reported() {
    let (conn, registry) = node_store();
    let executor = SqliteExecutor::new(&conn);
    let engine = Engine::new(&registry, &executor);

    let mut graph = ObjectGraph::new();
    let first = modified_node(&mut graph, 1);
    let second = modified_node(&mut graph, 2);
    graph.attach(first, "children", second).unwrap();
    graph.attach(second, "children", first).unwrap();

    let err = engine.persist(&mut graph, first).unwrap_err();
    assert!(matches!(err, EngineError::CascadeCycle { record } if record == first));
}

#[test]
fn cascade_deeper_than_configured_limit_fails() {
    let (conn, registry) = node_store();
    let executor = SqliteExecutor::new(&conn);
    let config = EngineConfig {
        max_cascade_depth: 1,
        ..EngineConfig::default()
    };
    let engine = Engine::with_config(&registry, &executor, config);

    let mut graph = ObjectGraph::new();
    let root = modified_node(&mut graph, 1);
    let middle = modified_node(&mut graph, 2);
    let leaf = modified_node(&mut graph, 3);
    graph.attach(root, "children", middle).unwrap();
    graph.attach(middle, "children", leaf).unwrap();

    let err = engine.persist(&mut graph, root).unwrap_err();
    assert!(matches!(err, EngineError::CascadeTooDeep { max_depth: 1 }));
    assert_eq!(graph.get(root).unwrap().state(), ObjectState::Modified);
}

#[test]
fn persisted_rows_are_visible_to_queries() {
    let mut conn = open_orders_store();
    let registry = orders_registry();
    let mut graph = ObjectGraph::new();
    let order = graph.insert(new_order("ada", 5.0));

    let tx = conn.transaction().unwrap();
    {
        let executor = SqliteExecutor::new(&tx);
        let engine = Engine::new(&registry, &executor);
        engine.persist(&mut graph, order).unwrap();

        let found = engine
            .query("order", Some(&Criteria::new("by_customer").with("customer", "ada".to_string())))
            .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].get("id"), graph.get(order).unwrap().get("id"));
    }
    tx.rollback().unwrap();
    assert_eq!(count_rows(&conn, "orders"), 0);
}

fn orders_registry_with(document: &str) -> MappingRegistry {
    let mut registry = orders_registry();
    registry.load_json(document).unwrap();
    registry
}

fn loaded_order(order_id: i64, version: i64) -> Record {
    Record::loaded("order")
        .with("id", order_id)
        .with("customer", "ada".to_string())
        .with("total", 1.0)
        .with("version", version)
}

#[test]
fn conflicting_delete_restores_line_flags_and_can_be_retried() {
    let mut conn = open_orders_store();
    let order_id = seed_order(&conn, "ada", 10.0);
    seed_line(&conn, order_id, "pen", 1);
    seed_line(&conn, order_id, "ink", 3);
    let registry = orders_registry();

    let mut graph = ObjectGraph::new();
    let identity = Record::new("order").with("id", order_id);
    let order = {
        let executor = SqliteExecutor::new(&conn);
        let engine = Engine::new(&registry, &executor);
        engine
            .restore_graph(&mut graph, "order", &identity, &["lines"])
            .unwrap()
            .unwrap()
    };
    let lines = graph.children(order, "lines");
    graph.get_mut(order).unwrap().set("version", 7_i64);
    graph.get_mut(order).unwrap().mark_removed();

    let tx = conn.transaction().unwrap();
    {
        let executor = SqliteExecutor::new(&tx);
        let engine = Engine::new(&registry, &executor);
        assert_eq!(
            engine.persist(&mut graph, order).unwrap(),
            Operation::ChangeConflict
        );
    }
    tx.rollback().unwrap();

    for line in &lines {
        assert_eq!(graph.get(*line).unwrap().lifecycle(), Lifecycle::loaded());
    }
    let record = graph.get(order).unwrap();
    assert_eq!(record.state(), ObjectState::Removed);
    assert!(!record.is_new());
    assert_eq!(count_rows(&conn, "order_lines"), 2);

    graph.get_mut(order).unwrap().set("version", 1_i64);
    let tx = conn.transaction().unwrap();
    {
        let executor = SqliteExecutor::new(&tx);
        let engine = Engine::new(&registry, &executor);
        assert_eq!(engine.persist(&mut graph, order).unwrap(), Operation::Delete);
    }
    tx.commit().unwrap();
    assert_eq!(count_rows(&conn, "orders"), 0);
    assert_eq!(count_rows(&conn, "order_lines"), 0);
}

#[test]
fn stale_delete_reports_change_conflict() {
    let conn = open_orders_store();
    let order_id = seed_order(&conn, "ada", 10.0);
    let registry = orders_registry();
    let executor = SqliteExecutor::new(&conn);
    let engine = Engine::new(&registry, &executor);

    let mut graph = ObjectGraph::new();
    let mut order = loaded_order(order_id, 3);
    order.mark_removed();
    let order = graph.insert(order);

    assert_eq!(
        engine.persist(&mut graph, order).unwrap(),
        Operation::ChangeConflict
    );
    let record = graph.get(order).unwrap();
    assert_eq!(record.state(), ObjectState::Removed);
    assert!(!record.is_new());
    assert_eq!(count_rows(&conn, "orders"), 1);
}

#[test]
fn write_returning_several_rows_is_rejected() {
    let conn = open_orders_store();
    seed_order(&conn, "ada", 1.0);
    seed_order(&conn, "grace", 2.0);
    let registry = orders_registry_with(
        r#"[{
            "type_name": "order_totals",
            "update": {
                "text": "UPDATE orders SET total = :total RETURNING id",
                "parameters": [{ "name": "total", "data_type": "real", "field": "total" }],
                "fields": []
            }
        }]"#,
    );
    let executor = SqliteExecutor::new(&conn);
    let engine = Engine::new(&registry, &executor);

    let mut graph = ObjectGraph::new();
    let mut totals = Record::loaded("order_totals").with("total", 9.0);
    totals.mark_modified();
    let totals = graph.insert(totals);

    let err = engine.persist(&mut graph, totals).unwrap_err();
    assert!(matches!(
        err,
        EngineError::MultipleRowsReturned {
            operation: Operation::Update,
            ..
        }
    ));
    assert_eq!(err.class(), ErrorClass::Integrity);
    assert_eq!(graph.get(totals).unwrap().state(), ObjectState::Modified);
}

#[test]
fn identity_statement_without_row_is_reported() {
    let mut conn = open_orders_store();
    let registry = orders_registry_with(
        r#"[{
            "type_name": "draft_order",
            "insert": {
                "text": "INSERT INTO orders (customer, total, version) VALUES (:customer, 0, 1)",
                "parameters": [{ "name": "customer", "data_type": "text", "field": "customer" }],
                "fields": [{ "column": "id", "field": "id" }],
                "identity": "SELECT id FROM orders WHERE id < 0"
            }
        }]"#,
    );

    let mut graph = ObjectGraph::new();
    let mut draft = Record::new("draft_order").with("customer", "ada".to_string());
    draft.mark_modified();
    let draft = graph.insert(draft);

    let tx = conn.transaction().unwrap();
    let executor = SqliteExecutor::new(&tx);
    let engine = Engine::new(&registry, &executor);
    let err = engine.persist(&mut graph, draft).unwrap_err();
    assert!(matches!(err, EngineError::IdentityNotFound { ref type_name } if type_name == "draft_order"));
    let record = graph.get(draft).unwrap();
    assert!(record.is_new());
    assert_eq!(record.get("id"), None);
}

#[test]
fn inserted_order_rejects_updated_line() {
    let mut conn = open_orders_store();
    let other_order = seed_order(&conn, "grace", 1.0);
    let line_id = seed_line(&conn, other_order, "pen", 1);
    let registry = orders_registry();

    let mut graph = ObjectGraph::new();
    let order = graph.insert(new_order("ada", 2.0));
    let mut line = Record::loaded("order_line")
        .with("id", line_id)
        .with("order_id", other_order)
        .with("product", "pen".to_string())
        .with("quantity", 5_i64);
    line.mark_modified();
    graph.insert_child(order, "lines", line).unwrap();

    let tx = conn.transaction().unwrap();
    let executor = SqliteExecutor::new(&tx);
    let engine = Engine::new(&registry, &executor);
    let err = engine.persist(&mut graph, order).unwrap_err();
    assert!(matches!(
        err,
        EngineError::CascadeViolation {
            parent_operation: Operation::Insert,
            child_operation: Operation::Update,
            ..
        }
    ));
}

#[test]
fn deleted_order_rejects_line_that_was_never_stored() {
    let conn = open_orders_store();
    let order_id = seed_order(&conn, "ada", 1.0);
    let registry = orders_registry();
    let executor = SqliteExecutor::new(&conn);
    let engine = Engine::new(&registry, &executor);

    let mut graph = ObjectGraph::new();
    let mut order = loaded_order(order_id, 1);
    order.mark_removed();
    let order = graph.insert(order);
    graph
        .insert_child(order, "lines", new_line("pen", 1))
        .unwrap();

    let err = engine.persist(&mut graph, order).unwrap_err();
    assert!(matches!(
        err,
        EngineError::CascadeViolation {
            parent_operation: Operation::Delete,
            child_operation: Operation::None,
            ..
        }
    ));
    assert_eq!(count_rows(&conn, "orders"), 1);
}

#[test]
fn missing_output_leaves_record_fields_untouched() {
    let conn = open_orders_store();
    let order_id = seed_order(&conn, "ada", 1.0);
    let line_id = seed_line(&conn, order_id, "pen", 1);
    let registry = orders_registry_with(
        r#"[{
            "type_name": "stamped_line",
            "update": {
                "text": "UPDATE order_lines SET quantity = :quantity WHERE id = :id RETURNING quantity * 10 AS quantity",
                "parameters": [
                    { "name": "quantity", "data_type": "integer", "field": "quantity" },
                    { "name": "id", "data_type": "integer", "field": "id" },
                    { "name": "stamp", "direction": "out", "data_type": "text", "field": "stamp" }
                ],
                "fields": [{ "column": "quantity", "field": "quantity" }]
            }
        }]"#,
    );
    let executor = SqliteExecutor::new(&conn);
    let engine = Engine::new(&registry, &executor);

    let mut graph = ObjectGraph::new();
    let mut line = Record::loaded("stamped_line")
        .with("id", line_id)
        .with("quantity", 4_i64);
    line.mark_modified();
    let line = graph.insert(line);

    let err = engine.persist(&mut graph, line).unwrap_err();
    assert!(matches!(err, EngineError::Bind(BindError::MissingOutput { .. })));
    let record = graph.get(line).unwrap();
    assert_eq!(record.get_i64("quantity"), Some(4));
    assert_eq!(record.get("stamp"), None);
    assert_eq!(record.state(), ObjectState::Modified);
}

const FOLDER_MAPPING: &str = r#"[{
    "type_name": "folder",
    "update": {
        "text": "UPDATE nodes SET label = :label WHERE id = :id",
        "parameters": [
            { "name": "label", "data_type": "text", "field": "label" },
            { "name": "id", "data_type": "integer", "field": "id" }
        ],
        "fields": []
    },
    "relationships": [
        {
            "kind": "one_to_many",
            "property": "items",
            "child_type": "node",
            "foreign_key": "parent_id",
            "principal_key": "code"
        }
    ]
}]"#;

#[test]
fn parent_key_is_needed_only_for_pending_children() {
    let (conn, mut registry) = node_store();
    registry.load_json(FOLDER_MAPPING).unwrap();
    let executor = SqliteExecutor::new(&conn);
    let engine = Engine::new(&registry, &executor);

    let mut graph = ObjectGraph::new();
    let mut folder = Record::loaded("folder")
        .with("id", 1_i64)
        .with("label", "root".to_string());
    folder.mark_modified();
    let folder = graph.insert(folder);
    let settled = graph
        .insert_child(folder, "items", Record::loaded("node").with("id", 2_i64))
        .unwrap();

    assert_eq!(engine.persist(&mut graph, folder).unwrap(), Operation::Update);
    assert_eq!(graph.get(settled).unwrap().get("parent_id"), None);

    graph.get_mut(folder).unwrap().mark_modified();
    let pending = modified_node(&mut graph, 3);
    graph.attach(folder, "items", pending).unwrap();
    let err = engine.persist(&mut graph, folder).unwrap_err();
    assert!(matches!(
        err,
        EngineError::Bind(BindError::MissingField { ref field, .. }) if field == "code"
    ));
}
