//! Requester identity directory.
//!
//! # Responsibility
//! - Resolve display names to durable requester ids and back.
//! - Register new requesters for the CLI front end.
//!
//! # Invariants
//! - Display names are unique case-insensitively.
//! - Registration is idempotent per display name and never changes an
//!   existing id.

use super::table_exists;
use super::totem_repo::{RepoError, RepoResult};
use crate::model::requester::RequesterId;
use rusqlite::{params, Connection, OptionalExtension};

/// Identity resolution used by the command layer.
pub trait RequesterDirectory {
    fn find_by_name(&self, display_name: &str) -> RepoResult<Option<RequesterId>>;
    fn display_name(&self, requester_id: &RequesterId) -> RepoResult<Option<String>>;
}

/// One registered requester.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequesterRecord {
    pub id: RequesterId,
    pub display_name: String,
}

/// SQLite-backed requester directory.
pub struct SqliteRequesterDirectory<'conn> {
    conn: &'conn Connection,
}

impl<'conn> SqliteRequesterDirectory<'conn> {
    pub fn try_new(conn: &'conn Connection) -> RepoResult<Self> {
        if !table_exists(conn, "requesters")? {
            return Err(RepoError::MissingRequiredTable("requesters"));
        }
        Ok(Self { conn })
    }

    /// Registers `display_name`, or returns the existing id for it.
    pub fn register(&self, display_name: &str, now_ms: i64) -> RepoResult<RequesterId> {
        let trimmed = display_name.trim();
        if trimmed.is_empty() || trimmed.contains(char::is_whitespace) {
            return Err(RepoError::InvalidData(format!(
                "invalid requester display name `{trimmed}`"
            )));
        }

        self.conn.execute(
            "INSERT OR IGNORE INTO requesters (id, display_name, created_at)
             VALUES (?1, ?2, ?3);",
            params![RequesterId::generate().as_str(), trimmed, now_ms],
        )?;

        self.find_by_name(trimmed)?.ok_or_else(|| {
            RepoError::InvalidData(format!("requester `{trimmed}` vanished after insert"))
        })
    }

    /// All requesters ordered by display name.
    pub fn list(&self) -> RepoResult<Vec<RequesterRecord>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, display_name
             FROM requesters
             ORDER BY display_name COLLATE NOCASE ASC;",
        )?;
        let mut rows = stmt.query([])?;
        let mut records = Vec::new();
        while let Some(row) = rows.next()? {
            let id: String = row.get("id")?;
            records.push(RequesterRecord {
                id: RequesterId::new(id),
                display_name: row.get("display_name")?,
            });
        }
        Ok(records)
    }
}

impl RequesterDirectory for SqliteRequesterDirectory<'_> {
    fn find_by_name(&self, display_name: &str) -> RepoResult<Option<RequesterId>> {
        let id = self
            .conn
            .query_row(
                "SELECT id FROM requesters WHERE display_name = ?1;",
                [display_name.trim()],
                |row| row.get::<_, String>(0),
            )
            .optional()?;
        Ok(id.map(RequesterId::new))
    }

    fn display_name(&self, requester_id: &RequesterId) -> RepoResult<Option<String>> {
        let name = self
            .conn
            .query_row(
                "SELECT display_name FROM requesters WHERE id = ?1;",
                [requester_id.as_str()],
                |row| row.get::<_, String>(0),
            )
            .optional()?;
        Ok(name)
    }
}
