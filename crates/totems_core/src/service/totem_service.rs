//! Totem registry and queue use-case service.
//!
//! # Responsibility
//! - Validate and normalize totem names above the repository layer.
//! - Map repository outcomes to the engine's result and error taxonomy.
//! - Emit one structured log event per mutating operation.
//!
//! # Invariants
//! - Expected outcomes (already queued, not queued, already existed) are
//!   returned as values; only preconditions and store failures are errors.
//! - Nothing is cached between calls; every query re-reads the store.

use crate::model::queue_entry::{current_epoch_ms, QueueEntry};
use crate::model::requester::RequesterId;
use crate::model::totem::{Totem, TotemName, TotemNameError};
use crate::repo::totem_repo::{
    Eviction, JoinOutcome, ReleaseOutcome, RepoError, TotemRepository,
};
use log::{info, warn};
use std::error::Error;
use std::fmt::{Display, Formatter};

/// Errors from totem service operations.
#[derive(Debug)]
pub enum TotemServiceError {
    /// Name is blank after trimming.
    InvalidName,
    /// Name collides with a command keyword (create only).
    ReservedName(TotemName),
    /// Totem is not registered.
    TotemNotFound(TotemName),
    /// Eviction on a totem with no entries.
    EmptyQueue(TotemName),
    /// Eviction target has no entry.
    NotQueued {
        totem: TotemName,
        requester_id: RequesterId,
    },
    /// Store failure; fatal for the current operation.
    Repo(RepoError),
}

impl Display for TotemServiceError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidName => write!(f, "totem name must not be blank"),
            Self::ReservedName(name) => write!(f, "totem name {name} is reserved"),
            Self::TotemNotFound(name) => write!(f, "there is no totem named {name}"),
            Self::EmptyQueue(name) => write!(f, "{name} is already empty"),
            Self::NotQueued {
                totem,
                requester_id,
            } => write!(f, "requester {requester_id} is not queued for {totem}"),
            Self::Repo(err) => write!(f, "{err}"),
        }
    }
}

impl Error for TotemServiceError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Repo(err) => Some(err),
            _ => None,
        }
    }
}

impl From<RepoError> for TotemServiceError {
    fn from(value: RepoError) -> Self {
        match value {
            RepoError::TotemNotFound(name) => Self::TotemNotFound(name),
            RepoError::EmptyQueue(name) => Self::EmptyQueue(name),
            RepoError::NotQueued {
                totem,
                requester_id,
            } => Self::NotQueued {
                totem,
                requester_id,
            },
            other => Self::Repo(other),
        }
    }
}

impl From<TotemNameError> for TotemServiceError {
    fn from(value: TotemNameError) -> Self {
        match value {
            TotemNameError::Empty => Self::InvalidName,
            TotemNameError::Reserved(name) => match TotemName::parse(&name) {
                Ok(name) => Self::ReservedName(name),
                Err(_) => Self::InvalidName,
            },
        }
    }
}

pub type TotemServiceResult<T> = Result<T, TotemServiceError>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CreateOutcome {
    Created(TotemName),
    AlreadyExisted(TotemName),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DestroyOutcome {
    Destroyed(TotemName),
    /// Nothing was registered under the name; no-op.
    NotFound(TotemName),
}

/// One totem with its waiting line, for listings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TotemQueue {
    pub totem: Totem,
    pub entries: Vec<QueueEntry>,
}

/// Use-case facade over the totem registry and queues.
pub struct TotemService<R: TotemRepository> {
    repo: R,
    clock: fn() -> i64,
}

impl<R: TotemRepository> TotemService<R> {
    /// Creates a service using the wall clock.
    pub fn new(repo: R) -> Self {
        Self::with_clock(repo, current_epoch_ms)
    }

    /// Creates a service with an explicit epoch-millisecond clock.
    pub fn with_clock(repo: R, clock: fn() -> i64) -> Self {
        Self { repo, clock }
    }

    pub fn now_ms(&self) -> i64 {
        (self.clock)()
    }

    /// Registry membership. Blank names simply do not exist.
    pub fn exists(&self, raw_name: &str) -> TotemServiceResult<bool> {
        match TotemName::parse(raw_name) {
            Ok(name) => Ok(self.repo.totem_exists(&name)?),
            Err(_) => Ok(false),
        }
    }

    /// Registers a totem. Idempotent: an existing name is not an error.
    pub fn create(&self, raw_name: &str) -> TotemServiceResult<CreateOutcome> {
        let name = TotemName::parse(raw_name)?;
        name.ensure_not_reserved()?;

        if self.repo.create_totem(&name, self.now_ms())? {
            info!("event=totem_create module=service status=ok totem={}", name.as_str());
            Ok(CreateOutcome::Created(name))
        } else {
            info!(
                "event=totem_create module=service status=noop totem={}",
                name.as_str()
            );
            Ok(CreateOutcome::AlreadyExisted(name))
        }
    }

    /// Removes a totem together with its waiting line.
    pub fn destroy(&self, raw_name: &str) -> TotemServiceResult<DestroyOutcome> {
        let name = TotemName::parse(raw_name)?;
        if self.repo.destroy_totem(&name)? {
            info!("event=totem_destroy module=service status=ok totem={}", name.as_str());
            Ok(DestroyOutcome::Destroyed(name))
        } else {
            Ok(DestroyOutcome::NotFound(name))
        }
    }

    /// Registered totems in creation order.
    pub fn list(&self) -> TotemServiceResult<Vec<Totem>> {
        Ok(self.repo.list_totems()?)
    }

    pub fn join(
        &self,
        raw_name: &str,
        requester_id: &RequesterId,
    ) -> TotemServiceResult<JoinOutcome> {
        let name = TotemName::parse(raw_name)?;
        let outcome = self
            .repo
            .join(&name, requester_id, self.now_ms())
            .inspect_err(|err| log_failure("queue_join", &name, err))?;

        info!(
            "event=queue_join module=service status=ok totem={} requester={} outcome={}",
            name.as_str(),
            requester_id,
            match outcome {
                JoinOutcome::AlreadyQueued => "already_queued",
                JoinOutcome::Holder => "holder",
                JoinOutcome::Waiting { .. } => "waiting",
            }
        );
        Ok(outcome)
    }

    pub fn release(
        &self,
        raw_name: &str,
        requester_id: &RequesterId,
    ) -> TotemServiceResult<ReleaseOutcome> {
        let name = TotemName::parse(raw_name)?;
        let outcome = self
            .repo
            .release(&name, requester_id, self.now_ms())
            .inspect_err(|err| log_failure("queue_release", &name, err))?;

        match &outcome {
            ReleaseOutcome::NotQueued => info!(
                "event=queue_release module=service status=noop totem={} requester={}",
                name.as_str(),
                requester_id
            ),
            ReleaseOutcome::Released { new_holder } => info!(
                "event=queue_release module=service status=ok totem={} requester={} new_holder={}",
                name.as_str(),
                requester_id,
                new_holder.as_ref().map_or("none", RequesterId::as_str)
            ),
        }
        Ok(outcome)
    }

    /// Forcibly removes `target`, or the current holder when `None`.
    pub fn evict(
        &self,
        raw_name: &str,
        target: Option<&RequesterId>,
    ) -> TotemServiceResult<Eviction> {
        let name = TotemName::parse(raw_name)?;
        let eviction = self
            .repo
            .evict(&name, target, self.now_ms())
            .inspect_err(|err| log_failure("queue_evict", &name, err))?;

        info!(
            "event=queue_evict module=service status=ok totem={} removed={} new_holder={}",
            name.as_str(),
            eviction.removed,
            eviction
                .new_holder
                .as_ref()
                .map_or("none", RequesterId::as_str)
        );
        Ok(eviction)
    }

    /// Current holder, or `None` for an empty or unknown totem.
    pub fn holder(&self, raw_name: &str) -> TotemServiceResult<Option<RequesterId>> {
        let name = TotemName::parse(raw_name)?;
        Ok(self.repo.holder(&name)?)
    }

    pub fn snapshot(&self, raw_name: &str) -> TotemServiceResult<Vec<QueueEntry>> {
        let name = TotemName::parse(raw_name)?;
        Ok(self.repo.snapshot(&name)?)
    }

    pub fn is_empty(&self, raw_name: &str) -> TotemServiceResult<bool> {
        Ok(self.holder(raw_name)?.is_none())
    }

    /// Queues to show for a listing request.
    ///
    /// A registered `filter` narrows the result to that totem; a missing or
    /// unknown filter lists every totem.
    pub fn queues(&self, filter: Option<&str>) -> TotemServiceResult<Vec<TotemQueue>> {
        let totems = self.repo.list_totems()?;
        let wanted = filter.and_then(|raw| TotemName::parse(raw).ok());
        let selected: Vec<Totem> = match wanted {
            Some(name) if totems.iter().any(|totem| totem.name == name) => totems
                .into_iter()
                .filter(|totem| totem.name == name)
                .collect(),
            _ => totems,
        };

        selected
            .into_iter()
            .map(|totem| -> TotemServiceResult<TotemQueue> {
                let entries = self.repo.snapshot(&totem.name)?;
                Ok(TotemQueue { totem, entries })
            })
            .collect()
    }
}

fn log_failure(event: &str, name: &TotemName, err: &RepoError) {
    match err {
        RepoError::Db(_) | RepoError::InvalidData(_) | RepoError::MissingRequiredTable(_) => {
            warn!(
                "event={event} module=service status=error totem={} error={err}",
                name.as_str()
            )
        }
        _ => info!(
            "event={event} module=service status=rejected totem={} reason={err}",
            name.as_str()
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::{CreateOutcome, TotemService, TotemServiceError};
    use crate::db::open_db_in_memory;
    use crate::repo::totem_repo::SqliteTotemRepository;

    fn fixed_clock() -> i64 {
        1_700_000_000_000
    }

    #[test]
    fn create_rejects_blank_and_reserved_names() {
        let conn = open_db_in_memory().unwrap();
        let service =
            TotemService::with_clock(SqliteTotemRepository::try_new(&conn).unwrap(), fixed_clock);

        assert!(matches!(
            service.create("   "),
            Err(TotemServiceError::InvalidName)
        ));
        assert!(matches!(
            service.create("Yield"),
            Err(TotemServiceError::ReservedName(name)) if name.as_str() == "yield"
        ));
        assert!(service.list().unwrap().is_empty());
    }

    #[test]
    fn create_normalizes_and_is_idempotent() {
        let conn = open_db_in_memory().unwrap();
        let service =
            TotemService::with_clock(SqliteTotemRepository::try_new(&conn).unwrap(), fixed_clock);

        let first = service.create(" Foo ").unwrap();
        assert!(matches!(first, CreateOutcome::Created(ref name) if name.as_str() == "foo"));
        let second = service.create("FOO").unwrap();
        assert!(matches!(second, CreateOutcome::AlreadyExisted(_)));
        assert!(service.exists("foo").unwrap());
        assert!(!service.exists("").unwrap());
    }

    #[test]
    fn queue_operations_on_unknown_totem_fail_with_not_found() {
        let conn = open_db_in_memory().unwrap();
        let service =
            TotemService::with_clock(SqliteTotemRepository::try_new(&conn).unwrap(), fixed_clock);
        let requester = "u1".into();

        assert!(matches!(
            service.join("ghost", &requester),
            Err(TotemServiceError::TotemNotFound(_))
        ));
        assert!(matches!(
            service.release("ghost", &requester),
            Err(TotemServiceError::TotemNotFound(_))
        ));
        assert!(matches!(
            service.evict("ghost", None),
            Err(TotemServiceError::TotemNotFound(_))
        ));
        assert_eq!(service.holder("ghost").unwrap(), None);
    }
}
