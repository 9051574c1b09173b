//! Totem registry and waiting-line persistence.
//!
//! # Responsibility
//! - Track which totem names exist.
//! - Maintain each totem's ordered waiting line and the holder transition.
//!
//! # Invariants
//! - A requester has at most one entry per totem (`UNIQUE` constraint, used
//!   through `INSERT OR IGNORE` as the membership test).
//! - Rank follows arrival order (`seq` ascending); rank 1 is the holder.
//! - `joined_at` is refreshed only when an entry is promoted to holder
//!   because the previous holder left. Refreshing never reorders entries.
//! - Destroying a totem removes its registry row and its entries in the
//!   same transaction.

use super::table_exists;
use crate::db::DbError;
use crate::model::queue_entry::QueueEntry;
use crate::model::requester::RequesterId;
use crate::model::totem::{Totem, TotemName};
use rusqlite::{params, Connection, OptionalExtension, Transaction, TransactionBehavior};
use std::error::Error;
use std::fmt::{Display, Formatter};

pub type RepoResult<T> = Result<T, RepoError>;

/// Repository error for registry and queue operations.
#[derive(Debug)]
pub enum RepoError {
    Db(DbError),
    /// Totem is not in the registry at operation time.
    TotemNotFound(TotemName),
    /// Eviction requested on a totem with no entries.
    EmptyQueue(TotemName),
    /// Eviction target has no entry in the waiting line.
    NotQueued {
        totem: TotemName,
        requester_id: RequesterId,
    },
    InvalidData(String),
    MissingRequiredTable(&'static str),
}

impl Display for RepoError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Db(err) => write!(f, "{err}"),
            Self::TotemNotFound(name) => write!(f, "totem not found: {name}"),
            Self::EmptyQueue(name) => write!(f, "queue for {name} is empty"),
            Self::NotQueued {
                totem,
                requester_id,
            } => write!(f, "requester {requester_id} is not queued for {totem}"),
            Self::InvalidData(message) => write!(f, "invalid persisted totem data: {message}"),
            Self::MissingRequiredTable(table) => write!(f, "missing required table: {table}"),
        }
    }
}

impl Error for RepoError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Db(err) => Some(err),
            _ => None,
        }
    }
}

impl From<DbError> for RepoError {
    fn from(value: DbError) -> Self {
        Self::Db(value)
    }
}

impl From<rusqlite::Error> for RepoError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Db(DbError::Sqlite(value))
    }
}

/// Result of adding a requester to a waiting line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JoinOutcome {
    /// Requester already had an entry; nothing changed.
    AlreadyQueued,
    /// Queue was empty; requester now holds the totem.
    Holder,
    /// Requester is waiting behind at least one entry.
    Waiting { rank: u32 },
}

/// Result of a voluntary release.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReleaseOutcome {
    /// Requester had no entry; nothing changed.
    NotQueued,
    /// Entry removed. `new_holder` is set only when the holder released and
    /// somebody else was waiting.
    Released { new_holder: Option<RequesterId> },
}

/// Result of a successful eviction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Eviction {
    pub removed: RequesterId,
    pub new_holder: Option<RequesterId>,
}

/// Registry and waiting-line contract.
pub trait TotemRepository {
    fn totem_exists(&self, name: &TotemName) -> RepoResult<bool>;
    /// Returns `false` when the name was already registered.
    fn create_totem(&self, name: &TotemName, now_ms: i64) -> RepoResult<bool>;
    /// Returns `false` when the name was not registered.
    fn destroy_totem(&self, name: &TotemName) -> RepoResult<bool>;
    fn list_totems(&self) -> RepoResult<Vec<Totem>>;
    fn join(
        &self,
        name: &TotemName,
        requester_id: &RequesterId,
        now_ms: i64,
    ) -> RepoResult<JoinOutcome>;
    fn release(
        &self,
        name: &TotemName,
        requester_id: &RequesterId,
        now_ms: i64,
    ) -> RepoResult<ReleaseOutcome>;
    /// Removes `target`, or the holder when `target` is `None`.
    fn evict(
        &self,
        name: &TotemName,
        target: Option<&RequesterId>,
        now_ms: i64,
    ) -> RepoResult<Eviction>;
    fn holder(&self, name: &TotemName) -> RepoResult<Option<RequesterId>>;
    /// All entries in rank order, holder first.
    fn snapshot(&self, name: &TotemName) -> RepoResult<Vec<QueueEntry>>;
}

/// SQLite-backed totem repository.
///
/// Holds a shared borrow so one connection can also serve the requester
/// directory; write transactions are opened explicitly per operation.
pub struct SqliteTotemRepository<'conn> {
    conn: &'conn Connection,
}

impl<'conn> SqliteTotemRepository<'conn> {
    /// Constructs a repository from a migrated connection.
    pub fn try_new(conn: &'conn Connection) -> RepoResult<Self> {
        for table in ["totems", "totem_entries"] {
            if !table_exists(conn, table)? {
                return Err(RepoError::MissingRequiredTable(table));
            }
        }
        Ok(Self { conn })
    }
}

impl TotemRepository for SqliteTotemRepository<'_> {
    fn totem_exists(&self, name: &TotemName) -> RepoResult<bool> {
        totem_exists_in(self.conn, name)
    }

    fn create_totem(&self, name: &TotemName, now_ms: i64) -> RepoResult<bool> {
        let changed = self.conn.execute(
            "INSERT OR IGNORE INTO totems (name, created_at) VALUES (?1, ?2);",
            params![name.as_str(), now_ms],
        )?;
        Ok(changed == 1)
    }

    fn destroy_totem(&self, name: &TotemName) -> RepoResult<bool> {
        let tx = begin_immediate(self.conn)?;
        // Cascade covers this too, but only on connections with foreign keys on.
        tx.execute(
            "DELETE FROM totem_entries WHERE totem_name = ?1;",
            [name.as_str()],
        )?;
        let changed = tx.execute("DELETE FROM totems WHERE name = ?1;", [name.as_str()])?;
        tx.commit()?;
        Ok(changed == 1)
    }

    fn list_totems(&self) -> RepoResult<Vec<Totem>> {
        let mut stmt = self
            .conn
            .prepare("SELECT name FROM totems ORDER BY id ASC;")?;
        let mut rows = stmt.query([])?;
        let mut totems = Vec::new();
        while let Some(row) = rows.next()? {
            let value: String = row.get(0)?;
            totems.push(Totem {
                name: parse_totem_name(&value)?,
                exists: true,
            });
        }
        Ok(totems)
    }

    fn join(
        &self,
        name: &TotemName,
        requester_id: &RequesterId,
        now_ms: i64,
    ) -> RepoResult<JoinOutcome> {
        let tx = begin_immediate(self.conn)?;
        ensure_totem_exists(&tx, name)?;

        let inserted = tx.execute(
            "INSERT OR IGNORE INTO totem_entries (totem_name, requester_id, joined_at)
             VALUES (?1, ?2, ?3);",
            params![name.as_str(), requester_id.as_str(), now_ms],
        )?;
        if inserted == 0 {
            return Ok(JoinOutcome::AlreadyQueued);
        }

        let seq = tx.last_insert_rowid();
        let rank: u32 = tx.query_row(
            "SELECT COUNT(*) FROM totem_entries WHERE totem_name = ?1 AND seq <= ?2;",
            params![name.as_str(), seq],
            |row| row.get(0),
        )?;
        tx.commit()?;

        if rank == 1 {
            Ok(JoinOutcome::Holder)
        } else {
            Ok(JoinOutcome::Waiting { rank })
        }
    }

    fn release(
        &self,
        name: &TotemName,
        requester_id: &RequesterId,
        now_ms: i64,
    ) -> RepoResult<ReleaseOutcome> {
        let tx = begin_immediate(self.conn)?;
        ensure_totem_exists(&tx, name)?;

        let previous_holder = load_holder(&tx, name)?;
        if !delete_entry(&tx, name, requester_id)? {
            return Ok(ReleaseOutcome::NotQueued);
        }

        let new_holder = if previous_holder.as_ref() == Some(requester_id) {
            promote_holder(&tx, name, now_ms)?
        } else {
            None
        };
        tx.commit()?;

        Ok(ReleaseOutcome::Released { new_holder })
    }

    fn evict(
        &self,
        name: &TotemName,
        target: Option<&RequesterId>,
        now_ms: i64,
    ) -> RepoResult<Eviction> {
        let tx = begin_immediate(self.conn)?;
        ensure_totem_exists(&tx, name)?;

        let previous_holder =
            load_holder(&tx, name)?.ok_or_else(|| RepoError::EmptyQueue(name.clone()))?;
        let removed = target.cloned().unwrap_or_else(|| previous_holder.clone());

        if !delete_entry(&tx, name, &removed)? {
            return Err(RepoError::NotQueued {
                totem: name.clone(),
                requester_id: removed,
            });
        }

        let new_holder = if removed == previous_holder {
            promote_holder(&tx, name, now_ms)?
        } else {
            None
        };
        tx.commit()?;

        Ok(Eviction {
            removed,
            new_holder,
        })
    }

    fn holder(&self, name: &TotemName) -> RepoResult<Option<RequesterId>> {
        load_holder(self.conn, name)
    }

    fn snapshot(&self, name: &TotemName) -> RepoResult<Vec<QueueEntry>> {
        let mut stmt = self.conn.prepare(
            "SELECT requester_id, joined_at
             FROM totem_entries
             WHERE totem_name = ?1
             ORDER BY seq ASC;",
        )?;
        let mut rows = stmt.query([name.as_str()])?;
        let mut entries = Vec::new();
        let mut rank = 0_u32;
        while let Some(row) = rows.next()? {
            rank += 1;
            let requester_id: String = row.get("requester_id")?;
            entries.push(QueueEntry {
                requester_id: RequesterId::new(requester_id),
                joined_at: row.get("joined_at")?,
                rank,
            });
        }
        Ok(entries)
    }
}

/// Takes the store's write lock up front so concurrent writers (from this
/// or another process) serialize instead of failing on lock upgrade.
fn begin_immediate(conn: &Connection) -> RepoResult<Transaction<'_>> {
    Ok(Transaction::new_unchecked(
        conn,
        TransactionBehavior::Immediate,
    )?)
}

fn totem_exists_in(conn: &Connection, name: &TotemName) -> RepoResult<bool> {
    let exists: i64 = conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM totems WHERE name = ?1);",
        [name.as_str()],
        |row| row.get(0),
    )?;
    Ok(exists == 1)
}

fn ensure_totem_exists(conn: &Connection, name: &TotemName) -> RepoResult<()> {
    if totem_exists_in(conn, name)? {
        Ok(())
    } else {
        Err(RepoError::TotemNotFound(name.clone()))
    }
}

fn load_holder(conn: &Connection, name: &TotemName) -> RepoResult<Option<RequesterId>> {
    let holder = conn
        .query_row(
            "SELECT requester_id
             FROM totem_entries
             WHERE totem_name = ?1
             ORDER BY seq ASC
             LIMIT 1;",
            [name.as_str()],
            |row| row.get::<_, String>(0),
        )
        .optional()?;
    Ok(holder.map(RequesterId::new))
}

/// Deletes one entry; the change count doubles as the membership check.
fn delete_entry(
    conn: &Connection,
    name: &TotemName,
    requester_id: &RequesterId,
) -> RepoResult<bool> {
    let changed = conn.execute(
        "DELETE FROM totem_entries WHERE totem_name = ?1 AND requester_id = ?2;",
        params![name.as_str(), requester_id.as_str()],
    )?;
    Ok(changed == 1)
}

/// Restarts the "held for" clock of whoever is now first in line.
fn promote_holder(
    conn: &Connection,
    name: &TotemName,
    now_ms: i64,
) -> RepoResult<Option<RequesterId>> {
    let Some(new_holder) = load_holder(conn, name)? else {
        return Ok(None);
    };
    conn.execute(
        "UPDATE totem_entries
         SET joined_at = ?1
         WHERE totem_name = ?2 AND requester_id = ?3;",
        params![now_ms, name.as_str(), new_holder.as_str()],
    )?;
    Ok(Some(new_holder))
}

fn parse_totem_name(value: &str) -> RepoResult<TotemName> {
    TotemName::parse(value)
        .map_err(|_| RepoError::InvalidData(format!("invalid totem name `{value}` in totems.name")))
}
