//! Per-message reply capability wrapping the outbound chat seam.

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;

use crate::request::MessageEvent;

const ERROR_FORMAT_PREFIX: &str = "*Error:* _";
const ERROR_FORMAT_SUFFIX: &str = "_";

/// Outbound chat operations the dispatch engine depends on.
///
/// Implemented by the transport collaborator; retries on transport failure
/// are that collaborator's concern, not the caller's.
#[async_trait]
pub trait ChatApi: Send + Sync {
    async fn post_message(
        &self,
        channel: &str,
        text: &str,
        as_user: bool,
        thread_ts: Option<&str>,
    ) -> Result<()>;
}

/// Options recognized by [`ResponseWriter::reply`] and
/// [`ResponseWriter::report_error`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReplyOptions {
    /// Reply in the same thread as the triggering message.
    pub thread_response: bool,
}

/// Per-message capability to send replies or a formatted error back to the
/// originating channel. Not retained by handlers beyond the call.
pub struct ResponseWriter {
    event: MessageEvent,
    chat: Arc<dyn ChatApi>,
}

impl ResponseWriter {
    pub fn new(event: MessageEvent, chat: Arc<dyn ChatApi>) -> Self {
        Self { event, chat }
    }

    /// Sends one message back to the originating channel.
    pub async fn reply(&self, text: &str, options: ReplyOptions) -> Result<()> {
        self.chat
            .post_message(&self.event.channel, text, true, self.reply_thread_ts(options))
            .await
    }

    /// Sends one distinctly formatted error message back to the originating
    /// channel.
    pub async fn report_error(&self, error: &anyhow::Error, options: ReplyOptions) -> Result<()> {
        let text = format!("{ERROR_FORMAT_PREFIX}{error}{ERROR_FORMAT_SUFFIX}");
        self.chat
            .post_message(&self.event.channel, &text, true, self.reply_thread_ts(options))
            .await
    }

    /// Returns the underlying chat seam for handlers that need raw access.
    pub fn chat(&self) -> Arc<dyn ChatApi> {
        self.chat.clone()
    }

    fn reply_thread_ts(&self, options: ReplyOptions) -> Option<&str> {
        if !options.thread_response {
            return None;
        }
        self.event
            .thread_ts
            .as_deref()
            .or(Some(self.event.ts.as_str()))
    }
}
