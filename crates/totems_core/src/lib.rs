//! Totem engine: named, mutually-exclusive resources with FIFO waiting lines.
//!
//! The SQLite store is the system of record. Every operation re-reads it, so
//! several processes can share one store file.

pub mod db;
pub mod logging;
pub mod model;
pub mod repo;
pub mod service;

pub use logging::{default_log_level, init_logging, logging_status, LogLevel, LoggingError};
pub use model::queue_entry::{current_epoch_ms, QueueEntry};
pub use model::requester::RequesterId;
pub use model::totem::{Totem, TotemName, TotemNameError, RESERVED_NAMES};
pub use repo::requester_repo::{RequesterDirectory, RequesterRecord, SqliteRequesterDirectory};
pub use repo::totem_repo::{
    Eviction, JoinOutcome, ReleaseOutcome, RepoError, RepoResult, SqliteTotemRepository,
    TotemRepository,
};
pub use service::command::{
    route, Command, CommandError, CommandHandler, Invocation, Notification, Notifier,
    RecordingNotifier, Route,
};
pub use service::totem_service::{
    CreateOutcome, DestroyOutcome, TotemQueue, TotemService, TotemServiceError,
    TotemServiceResult,
};

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
