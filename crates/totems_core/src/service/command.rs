//! Chat command routing and reply rendering.
//!
//! # Responsibility
//! - Route `totems ...` message text to one engine operation.
//! - Turn engine outcomes into user-facing replies and holder-transition
//!   notifications.
//!
//! # Invariants
//! - Invocation context (who, privileges, text) is passed per call; the
//!   handler keeps no per-request state.
//! - Validation and precondition failures become reply text. Only store
//!   failures surface as `CommandError`.
//! - Notifications are sent only after the mutation has committed.

use crate::model::requester::RequesterId;
use crate::model::totem::TotemName;
use crate::repo::requester_repo::RequesterDirectory;
use crate::repo::totem_repo::{JoinOutcome, ReleaseOutcome, RepoError, TotemRepository};
use crate::service::totem_service::{
    CreateOutcome, DestroyOutcome, TotemService, TotemServiceError,
};
use log::info;
use once_cell::sync::Lazy;
use regex::Regex;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::sync::{Mutex, PoisonError};

static ADD_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^totems\s+(?:add|join)\b").expect("valid add regex"));
static YIELD_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^totems\s+(?:yield|release)\b").expect("valid yield regex"));
static KICK_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^totems\s+(?:kick|evict)\b").expect("valid kick regex"));
static CREATE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^totems\s+create\b").expect("valid create regex"));
static DESTROY_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^totems\s+destroy\b").expect("valid destroy regex"));
static LIST_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^totems(?:\s|$)").expect("valid list regex"));

/// Delivers a message to one requester outside the reply channel.
///
/// Fire-and-forget: delivery failures are the transport's problem.
pub trait Notifier {
    fn notify(&self, requester_id: &RequesterId, message: &str);
}

/// One delivered notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub requester_id: RequesterId,
    pub message: String,
}

/// Notifier that keeps everything it was asked to send.
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<Notification>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drains recorded notifications in send order.
    pub fn take(&self) -> Vec<Notification> {
        let mut sent = self.sent.lock().unwrap_or_else(PoisonError::into_inner);
        std::mem::take(&mut *sent)
    }
}

impl Notifier for RecordingNotifier {
    fn notify(&self, requester_id: &RequesterId, message: &str) {
        self.sent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Notification {
                requester_id: requester_id.clone(),
                message: message.to_string(),
            });
    }
}

/// Subcommand selected by routing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Add,
    Yield,
    Kick,
    Create,
    Destroy,
    List,
}

impl Command {
    fn verb(self) -> &'static str {
        match self {
            Self::Add => "add",
            Self::Yield => "yield",
            Self::Kick => "kick",
            Self::Create => "create",
            Self::Destroy => "destroy",
            Self::List => "list",
        }
    }

    fn usage(self) -> &'static str {
        match self {
            Self::Kick => "Format: totems kick TOTEM_NAME [USER]",
            Self::Add => "Format: totems add TOTEM_NAME",
            Self::Yield => "Format: totems yield TOTEM_NAME",
            Self::Create => "Format: totems create TOTEM_NAME",
            Self::Destroy => "Format: totems destroy TOTEM_NAME",
            Self::List => "Format: totems [TOTEM_NAME]",
        }
    }
}

/// A routed command and its positional arguments (verb excluded).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Route {
    pub command: Command,
    pub args: Vec<String>,
}

/// Maps message text to a command. Returns `None` for non-totem messages.
pub fn route(text: &str) -> Option<Route> {
    let text = text.trim();
    let tokens: Vec<String> = text.split_whitespace().map(str::to_string).collect();

    let command = if ADD_RE.is_match(text) {
        Command::Add
    } else if YIELD_RE.is_match(text) {
        Command::Yield
    } else if KICK_RE.is_match(text) {
        Command::Kick
    } else if CREATE_RE.is_match(text) {
        Command::Create
    } else if DESTROY_RE.is_match(text) {
        Command::Destroy
    } else if LIST_RE.is_match(text) {
        return Some(Route {
            command: Command::List,
            args: tokens.into_iter().skip(1).collect(),
        });
    } else {
        return None;
    };

    Some(Route {
        command,
        args: tokens.into_iter().skip(2).collect(),
    })
}

/// Per-call context supplied by the chat front end.
#[derive(Debug, Clone, Copy)]
pub struct Invocation<'a> {
    pub requester_id: &'a RequesterId,
    pub display_name: &'a str,
    /// Membership in the totem admin group, checked by the caller.
    pub is_admin: bool,
    pub text: &'a str,
}

/// Store failure while handling a command.
#[derive(Debug)]
pub enum CommandError {
    Service(TotemServiceError),
    Directory(RepoError),
}

impl Display for CommandError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Service(err) => write!(f, "{err}"),
            Self::Directory(err) => write!(f, "requester lookup failed: {err}"),
        }
    }
}

impl Error for CommandError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Service(err) => Some(err),
            Self::Directory(err) => Some(err),
        }
    }
}

impl From<TotemServiceError> for CommandError {
    fn from(value: TotemServiceError) -> Self {
        Self::Service(value)
    }
}

impl From<RepoError> for CommandError {
    fn from(value: RepoError) -> Self {
        Self::Directory(value)
    }
}

pub type CommandResult<T> = Result<T, CommandError>;

/// Executes routed commands against the engine.
pub struct CommandHandler<'a, R, D, N>
where
    R: TotemRepository,
    D: RequesterDirectory,
    N: Notifier,
{
    service: &'a TotemService<R>,
    directory: &'a D,
    notifier: &'a N,
}

impl<'a, R, D, N> CommandHandler<'a, R, D, N>
where
    R: TotemRepository,
    D: RequesterDirectory,
    N: Notifier,
{
    pub fn new(service: &'a TotemService<R>, directory: &'a D, notifier: &'a N) -> Self {
        Self {
            service,
            directory,
            notifier,
        }
    }

    /// Handles one message. `Ok(None)` means the text is not a totem command.
    pub fn handle(&self, invocation: &Invocation<'_>) -> CommandResult<Option<String>> {
        let Some(route) = route(invocation.text) else {
            return Ok(None);
        };
        info!(
            "event=command_dispatch module=command status=start command={} requester={}",
            route.command.verb(),
            invocation.requester_id
        );

        let reply = match route.command {
            Command::List => self.list(route.args.first().map(String::as_str))?,
            command => {
                let Some(raw_name) = route.args.first() else {
                    return Ok(Some(command.usage().to_string()));
                };
                let target = route.args.get(1).map(String::as_str);
                self.dispatch(command, raw_name, target, invocation)?
            }
        };
        Ok(Some(reply))
    }

    fn dispatch(
        &self,
        command: Command,
        raw_name: &str,
        target: Option<&str>,
        invocation: &Invocation<'_>,
    ) -> CommandResult<String> {
        if matches!(command, Command::Create | Command::Destroy) && !invocation.is_admin {
            return Ok("Only totem admins can do that.".to_string());
        }

        let result = match command {
            Command::Add => self.add(raw_name, invocation),
            Command::Yield => self.yield_totem(raw_name, invocation),
            Command::Kick => self.kick(raw_name, target),
            Command::Create => self.create(raw_name),
            Command::Destroy => self.destroy(raw_name),
            Command::List => self.list(Some(raw_name)),
        };

        match result {
            Ok(reply) => Ok(reply),
            Err(CommandError::Service(err)) => precondition_reply(command, err),
            Err(err) => Err(err),
        }
    }

    fn add(&self, raw_name: &str, invocation: &Invocation<'_>) -> CommandResult<String> {
        let name = TotemName::parse(raw_name).map_err(TotemServiceError::from)?;
        let who = invocation.display_name;
        let reply = match self.service.join(raw_name, invocation.requester_id)? {
            JoinOutcome::Holder => format!("{who} is now in possession of {name}."),
            JoinOutcome::Waiting { .. } => {
                format!("{who} has been added to the queue for {name}.")
            }
            JoinOutcome::AlreadyQueued => format!("{who} is already queued for {name}."),
        };
        Ok(reply)
    }

    fn yield_totem(&self, raw_name: &str, invocation: &Invocation<'_>) -> CommandResult<String> {
        let name = TotemName::parse(raw_name).map_err(TotemServiceError::from)?;
        let who = invocation.display_name;
        let reply = match self.service.release(raw_name, invocation.requester_id)? {
            ReleaseOutcome::NotQueued => format!("{who} is not queued for {name}."),
            ReleaseOutcome::Released { new_holder } => {
                if let Some(new_holder) = new_holder {
                    self.notify_new_holder(&new_holder, &name);
                }
                format!("{who} has yielded {name}.")
            }
        };
        Ok(reply)
    }

    fn kick(&self, raw_name: &str, target: Option<&str>) -> CommandResult<String> {
        let name = TotemName::parse(raw_name).map_err(TotemServiceError::from)?;
        let target_id = match target {
            Some(target_name) => match self.directory.find_by_name(target_name)? {
                Some(id) => Some(id),
                None => {
                    // Unknown users cannot be queued, but an unknown totem
                    // or an empty queue still takes precedence in the reply.
                    if !self.service.exists(raw_name)? {
                        return Err(TotemServiceError::TotemNotFound(name).into());
                    }
                    if self.service.is_empty(raw_name)? {
                        return Err(TotemServiceError::EmptyQueue(name).into());
                    }
                    return Ok(format!("{target_name} is not queued for {name}."));
                }
            },
            None => None,
        };

        let eviction = match self.service.evict(raw_name, target_id.as_ref()) {
            Ok(eviction) => eviction,
            Err(TotemServiceError::NotQueued { totem, .. }) => {
                let target_name = target.unwrap_or_default();
                return Ok(format!("{target_name} is not queued for {totem}."));
            }
            Err(err) => return Err(err.into()),
        };
        self.notifier.notify(
            &eviction.removed,
            &format!("You have been kicked from {name}."),
        );
        if let Some(new_holder) = &eviction.new_holder {
            self.notify_new_holder(new_holder, &name);
        }

        let removed_name = self.display_name_or_id(&eviction.removed)?;
        Ok(format!("{removed_name} was kicked from {name}."))
    }

    fn create(&self, raw_name: &str) -> CommandResult<String> {
        let reply = match self.service.create(raw_name)? {
            CreateOutcome::Created(name) => format!("Created totem {name}."),
            CreateOutcome::AlreadyExisted(name) => format!("Totem {name} already exists."),
        };
        Ok(reply)
    }

    fn destroy(&self, raw_name: &str) -> CommandResult<String> {
        let reply = match self.service.destroy(raw_name)? {
            DestroyOutcome::Destroyed(name) => format!("Destroyed totem {name}."),
            DestroyOutcome::NotFound(name) => format!("There is no totem named {name}."),
        };
        Ok(reply)
    }

    fn list(&self, filter: Option<&str>) -> CommandResult<String> {
        let queues = self.service.queues(filter)?;
        if queues.is_empty() {
            return Ok("There are no totems yet.".to_string());
        }

        let now_ms = self.service.now_ms();
        let mut lines = Vec::new();
        for queue in queues {
            lines.push(format!("*** {} ***", queue.totem.name));
            if queue.entries.is_empty() {
                lines.push("(empty)".to_string());
                continue;
            }
            for entry in &queue.entries {
                lines.push(format!(
                    "{}. {} ({})",
                    entry.rank,
                    self.display_name_or_id(&entry.requester_id)?,
                    entry.display_duration(now_ms)
                ));
            }
        }
        Ok(lines.join("\n"))
    }

    fn notify_new_holder(&self, new_holder: &RequesterId, name: &TotemName) {
        self.notifier
            .notify(new_holder, &format!("You are now in possession of {name}."));
    }

    fn display_name_or_id(&self, requester_id: &RequesterId) -> CommandResult<String> {
        Ok(self
            .directory
            .display_name(requester_id)?
            .unwrap_or_else(|| requester_id.to_string()))
    }
}

/// Renders validation and precondition failures; store failures pass through.
fn precondition_reply(command: Command, err: TotemServiceError) -> CommandResult<String> {
    let reply = match err {
        TotemServiceError::InvalidName => command.usage().to_string(),
        TotemServiceError::ReservedName(name) => {
            format!("{name} is a reserved word and cannot be a totem name.")
        }
        TotemServiceError::TotemNotFound(name) => format!("There is no totem named {name}."),
        TotemServiceError::EmptyQueue(name) => format!("{name} is already empty."),
        TotemServiceError::NotQueued {
            totem,
            requester_id,
        } => format!("{requester_id} is not queued for {totem}."),
        TotemServiceError::Repo(err) => {
            return Err(CommandError::Service(TotemServiceError::Repo(err)))
        }
    };
    Ok(reply)
}
