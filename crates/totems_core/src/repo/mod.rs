//! Repository layer contracts and SQLite implementations.
//!
//! # Responsibility
//! - Express registry and queue mutations as atomic store operations.
//! - Isolate SQL details from the service layer.
//!
//! # Invariants
//! - Every queue mutation runs in one `BEGIN IMMEDIATE` transaction, so a
//!   membership check and the write it guards are never split across
//!   store calls.
//! - Ranks are derived from the entry order at read time and never stored.

pub mod requester_repo;
pub mod totem_repo;

use rusqlite::Connection;

pub(crate) fn table_exists(conn: &Connection, table: &str) -> rusqlite::Result<bool> {
    let exists: i64 = conn.query_row(
        "SELECT EXISTS(
            SELECT 1
            FROM sqlite_master
            WHERE type = 'table' AND name = ?1
        );",
        [table],
        |row| row.get(0),
    )?;
    Ok(exists == 1)
}
