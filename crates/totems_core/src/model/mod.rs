//! Transient domain projections of persisted totem state.
//!
//! # Responsibility
//! - Define the value types exchanged between store, service and callers.
//! - Own name normalization and display rendering rules.
//!
//! # Invariants
//! - Nothing here has an independent lifetime: the store is the system of
//!   record and every operation re-derives these values before acting.

pub mod queue_entry;
pub mod requester;
pub mod totem;
