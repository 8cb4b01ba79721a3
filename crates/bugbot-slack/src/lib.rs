//! Slack transport collaborator: events-API webhook intake and Web API
//! posting.
//!
//! Inbound push payloads are resolved once at this boundary into a closed
//! event set; the dispatch engine only ever sees normalized message records.

pub mod api_client;
pub mod events;
pub mod server;

pub use api_client::{SlackApiClient, SlackPostedMessage};
pub use events::{
    parse_push_event, ProcessedEventWindow, PushMessage, PushParseError, SlackPushEvent,
};
pub use server::{run_event_server, SlackOptions};
