//! Versioned shared-state collaborator with optimistic concurrency.
//!
//! One logical document holds the bot's small shared state. Writers go
//! through a transaction function that is retried against the latest remote
//! version on conflict, bounded by a fixed attempt limit.

mod store;
mod types;

pub use store::{FileBackend, StateBackend, StateStore, StateStoreError};
pub use types::{BotState, BzStats};
