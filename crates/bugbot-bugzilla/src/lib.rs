//! Bugzilla JSON-RPC collaborator with transparent session re-auth.
//!
//! All calls read the current session token under a shared lock; an
//! unauthorized response triggers exactly one re-login (under the exclusive
//! lock) followed by a retry of the original call.

mod client;
mod jsonrpc;

pub use client::{BugzillaClient, BugzillaOptions};
pub use jsonrpc::BugzillaError;
