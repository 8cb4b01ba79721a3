//! Read-only per-message view handed to command handlers.

use crate::matcher::Parameters;

/// Normalized inbound message record delivered by the transport.
///
/// The transport resolves its own event polymorphism (challenges, mentions,
/// bot echoes) before this point; the dispatch engine only ever sees one of
/// these per verified, non-self-authored message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageEvent {
    pub channel: String,
    pub user: String,
    pub text: String,
    pub ts: String,
    pub thread_ts: Option<String>,
}

/// Read-only view combining the inbound event with bound parameters.
///
/// Created per dispatch and discarded after the handler returns.
#[derive(Debug, Clone)]
pub struct Request {
    event: MessageEvent,
    parameters: Parameters,
}

impl Request {
    pub fn new(event: MessageEvent, parameters: Parameters) -> Self {
        Self { event, parameters }
    }

    pub fn event(&self) -> &MessageEvent {
        &self.event
    }

    pub fn channel(&self) -> &str {
        &self.event.channel
    }

    pub fn user(&self) -> &str {
        &self.event.user
    }

    pub fn text(&self) -> &str {
        &self.event.text
    }

    /// Returns the bound value for `name`, or `default` when the matched
    /// pattern carried no parameter with that name.
    pub fn string_param(&self, name: &str, default: &str) -> String {
        self.parameters
            .get(name)
            .cloned()
            .unwrap_or_else(|| default.to_string())
    }
}
