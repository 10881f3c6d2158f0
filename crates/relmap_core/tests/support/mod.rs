#![allow(dead_code)]

use relmap_core::{open_store_in_memory, MappingRegistry, Record};
use rusqlite::Connection;

pub const ORDERS_MAPPING: &str = include_str!("../fixtures/orders.json");

const SCHEMA: &str = "
CREATE TABLE orders (
    id INTEGER PRIMARY KEY,
    customer TEXT NOT NULL,
    total REAL NOT NULL,
    version INTEGER NOT NULL
);
CREATE TABLE order_lines (
    id INTEGER PRIMARY KEY,
    order_id INTEGER NOT NULL REFERENCES orders(id),
    product TEXT NOT NULL,
    quantity INTEGER NOT NULL
);
";

pub fn open_orders_store() -> Connection {
    let conn = open_store_in_memory().unwrap();
    conn.execute_batch(SCHEMA).unwrap();
    conn
}

pub fn orders_registry() -> MappingRegistry {
    let mut registry = MappingRegistry::new();
    registry.load_json(ORDERS_MAPPING).unwrap();
    registry
}

/// A never-stored order marked for insert.
pub fn new_order(customer: &str, total: f64) -> Record {
    let mut order = Record::new("order")
        .with("customer", customer.to_string())
        .with("total", total);
    order.mark_modified();
    order
}

/// A never-stored line marked for insert; `order_id` is filled by the cascade.
pub fn new_line(product: &str, quantity: i64) -> Record {
    let mut line = Record::new("order_line")
        .with("product", product.to_string())
        .with("quantity", quantity);
    line.mark_modified();
    line
}

pub fn count_rows(conn: &Connection, table: &str) -> i64 {
    conn.query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| {
        row.get(0)
    })
    .unwrap()
}

pub fn seed_order(conn: &Connection, customer: &str, total: f64) -> i64 {
    conn.execute(
        "INSERT INTO orders (customer, total, version) VALUES (?1, ?2, 1)",
        rusqlite::params![customer, total],
    )
    .unwrap();
    conn.last_insert_rowid()
}

pub fn seed_line(conn: &Connection, order_id: i64, product: &str, quantity: i64) -> i64 {
    conn.execute(
        "INSERT INTO order_lines (order_id, product, quantity) VALUES (?1, ?2, ?3)",
        rusqlite::params![order_id, product, quantity],
    )
    .unwrap();
    conn.last_insert_rowid()
}
