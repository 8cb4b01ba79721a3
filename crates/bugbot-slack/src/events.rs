//! Events-API payload parsing and the inbound dedup window.

use std::collections::{HashSet, VecDeque};

use serde::Deserialize;
use thiserror::Error;

use bugbot_commands::MessageEvent;

/// Raised when an inbound push body cannot be accepted.
#[derive(Debug, Error)]
pub enum PushParseError {
    #[error("failed to parse slack events envelope: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("slack events envelope carried an invalid verification token")]
    InvalidToken,
}

const SLACKBOT_USER: &str = "USLACKBOT";

#[derive(Debug, Deserialize)]
struct EventsEnvelope {
    #[serde(rename = "type")]
    envelope_type: String,
    #[serde(default)]
    token: Option<String>,
    #[serde(default)]
    challenge: Option<String>,
    #[serde(default)]
    event_id: Option<String>,
    #[serde(default)]
    event: Option<InnerEvent>,
}

#[derive(Debug, Deserialize)]
struct InnerEvent {
    #[serde(rename = "type")]
    event_type: String,
    #[serde(default)]
    subtype: Option<String>,
    #[serde(default)]
    bot_id: Option<String>,
    #[serde(default)]
    user: Option<String>,
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    channel: Option<String>,
    #[serde(default)]
    ts: Option<String>,
    #[serde(default)]
    thread_ts: Option<String>,
}

/// A verified inbound message plus the event id used for deduplication.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PushMessage {
    pub event_id: String,
    pub message: MessageEvent,
}

/// Closed set of inbound push payload shapes, resolved once at the
/// transport boundary. Mentions are normalized into plain message records;
/// anything self-authored or unrecognized lands in `Other` and never
/// reaches the dispatcher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SlackPushEvent {
    Challenge { challenge: String },
    Mention(PushMessage),
    Message(PushMessage),
    Other,
}

/// Parses an events-API push body, verifying the envelope token.
pub fn parse_push_event(
    body: &str,
    verification_token: &str,
) -> Result<SlackPushEvent, PushParseError> {
    let envelope = serde_json::from_str::<EventsEnvelope>(body)?;

    if envelope.token.as_deref() != Some(verification_token) {
        return Err(PushParseError::InvalidToken);
    }

    match envelope.envelope_type.as_str() {
        "url_verification" => Ok(SlackPushEvent::Challenge {
            challenge: envelope.challenge.unwrap_or_default(),
        }),
        "event_callback" => {
            let Some(event) = envelope.event else {
                return Ok(SlackPushEvent::Other);
            };
            let event_id = envelope.event_id.unwrap_or_default();
            normalize_callback_event(event, event_id)
        }
        _ => Ok(SlackPushEvent::Other),
    }
}

fn normalize_callback_event(
    event: InnerEvent,
    event_id: String,
) -> Result<SlackPushEvent, PushParseError> {
    if event.bot_id.is_some() || event.subtype.as_deref() == Some("bot_message") {
        return Ok(SlackPushEvent::Other);
    }
    let user = match event.user {
        Some(user) if !user.trim().is_empty() && user != SLACKBOT_USER => user,
        _ => return Ok(SlackPushEvent::Other),
    };
    let channel = match event.channel {
        Some(channel) if !channel.trim().is_empty() => channel,
        _ => return Ok(SlackPushEvent::Other),
    };
    let ts = match event.ts {
        Some(ts) if !ts.trim().is_empty() => ts,
        _ => return Ok(SlackPushEvent::Other),
    };

    let message = PushMessage {
        event_id,
        message: MessageEvent {
            channel,
            user,
            text: event.text.unwrap_or_default(),
            ts,
            thread_ts: event.thread_ts,
        },
    };

    match event.event_type.as_str() {
        "app_mention" => Ok(SlackPushEvent::Mention(message)),
        "message" => Ok(SlackPushEvent::Message(message)),
        _ => Ok(SlackPushEvent::Other),
    }
}

/// Capped first-in-first-out window of processed event ids.
///
/// Slack redelivers events it believes were not acknowledged in time; the
/// window keeps redeliveries from reaching the dispatcher twice without
/// growing without bound.
#[derive(Debug)]
pub struct ProcessedEventWindow {
    seen: HashSet<String>,
    order: VecDeque<String>,
    cap: usize,
}

impl ProcessedEventWindow {
    pub fn new(cap: usize) -> Self {
        let cap = cap.max(1);
        Self {
            seen: HashSet::with_capacity(cap),
            order: VecDeque::with_capacity(cap),
            cap,
        }
    }

    /// Records `event_id`; returns false when it was already present.
    pub fn insert(&mut self, event_id: &str) -> bool {
        if self.seen.contains(event_id) {
            return false;
        }
        if self.order.len() == self.cap {
            if let Some(evicted) = self.order.pop_front() {
                self.seen.remove(&evicted);
            }
        }
        self.seen.insert(event_id.to_string());
        self.order.push_back(event_id.to_string());
        true
    }
}
