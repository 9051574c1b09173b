//! Engine use-case services and the chat command front.
//!
//! # Responsibility
//! - `totem_service`: registry and queue operations with validation.
//! - `command`: text routing, reply rendering and notifications.

pub mod command;
pub mod totem_service;
