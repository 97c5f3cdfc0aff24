//! Core types and traits for outflow
//!
//! This crate contains the domain model shared across all other crates:
//! outbox jobs, canonical messages and their event log, contacts and
//! conversations, rate-limit snapshots, webhook dead letters, the injectable
//! clock, and engine configuration.

mod channel;
mod clock;
mod config;
mod constants;
mod contact;
mod dead_letter;
mod env_config;
mod message;
mod outbox;
mod rate_limit;
mod template;

pub use channel::*;
pub use clock::*;
pub use config::*;
pub use constants::*;
pub use contact::*;
pub use dead_letter::*;
pub use env_config::*;
pub use message::*;
pub use outbox::*;
pub use rate_limit::*;
pub use template::*;
