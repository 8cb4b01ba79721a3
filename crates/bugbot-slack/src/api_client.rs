//! Slack Web API client used for outbound replies.

use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};

use bugbot_commands::ChatApi;

#[derive(Debug, Clone, Deserialize)]
struct SlackChatMessageResponse {
    ok: bool,
    ts: Option<String>,
    channel: Option<String>,
    error: Option<String>,
}

#[derive(Debug, Clone)]
pub struct SlackPostedMessage {
    pub channel: String,
    pub ts: String,
}

/// Thin `chat.postMessage` client with bearer bot-token auth.
#[derive(Clone)]
pub struct SlackApiClient {
    http: reqwest::Client,
    api_base: String,
    bot_token: String,
}

impl SlackApiClient {
    pub fn new(api_base: String, bot_token: String, request_timeout_ms: u64) -> Result<Self> {
        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert(
            reqwest::header::USER_AGENT,
            reqwest::header::HeaderValue::from_static("bugbot"),
        );
        headers.insert(
            reqwest::header::ACCEPT,
            reqwest::header::HeaderValue::from_static("application/json"),
        );
        let http = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_millis(request_timeout_ms.max(1)))
            .build()
            .context("failed to create slack api client")?;

        Ok(Self {
            http,
            api_base: api_base.trim_end_matches('/').to_string(),
            bot_token: bot_token.trim().to_string(),
        })
    }

    pub async fn post_chat_message(
        &self,
        channel: &str,
        text: &str,
        as_user: bool,
        thread_ts: Option<&str>,
    ) -> Result<SlackPostedMessage> {
        let mut payload = json!({
            "channel": channel,
            "text": text,
            "as_user": as_user,
            "unfurl_links": false,
            "unfurl_media": false,
        });
        if let Some(thread_ts) = thread_ts {
            payload["thread_ts"] = Value::String(thread_ts.to_string());
        }

        let response = self
            .http
            .post(format!("{}/chat.postMessage", self.api_base))
            .bearer_auth(&self.bot_token)
            .json(&payload)
            .send()
            .await
            .context("slack chat.postMessage request failed")?;

        let status = response.status();
        if !status.is_success() {
            bail!(
                "slack chat.postMessage failed with status {}",
                status.as_u16()
            );
        }

        let decoded = response
            .json::<SlackChatMessageResponse>()
            .await
            .context("failed to decode slack chat.postMessage response")?;
        if !decoded.ok {
            bail!(
                "slack chat.postMessage failed: {}",
                decoded.error.unwrap_or_else(|| "unknown error".to_string())
            );
        }

        Ok(SlackPostedMessage {
            channel: decoded.channel.unwrap_or_else(|| channel.to_string()),
            ts: decoded
                .ts
                .ok_or_else(|| anyhow!("slack chat.postMessage response missing ts"))?,
        })
    }
}

#[async_trait]
impl ChatApi for SlackApiClient {
    async fn post_message(
        &self,
        channel: &str,
        text: &str,
        as_user: bool,
        thread_ts: Option<&str>,
    ) -> Result<()> {
        self.post_chat_message(channel, text, as_user, thread_ts)
            .await
            .map(|_| ())
    }
}
