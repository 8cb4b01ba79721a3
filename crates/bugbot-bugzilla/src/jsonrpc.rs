//! Low-level JSON-RPC plumbing against `jsonrpc.cgi`.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use thiserror::Error;
use tokio::sync::RwLock;

#[derive(Debug, Error)]
pub enum BugzillaError {
    #[error("bugzilla rejected the session")]
    Unauthorized,
    #[error("bugzilla rpc error {code}: {message}")]
    Rpc { code: u64, message: String },
    #[error("bugzilla transport failure: {0}")]
    Http(#[from] reqwest::Error),
    #[error("{0}")]
    Protocol(String),
}

#[derive(Debug, Serialize)]
struct ClientRequest<'a> {
    method: &'a str,
    params: [Value; 1],
    id: u64,
}

#[derive(Debug, Deserialize)]
struct RpcError {
    #[serde(default)]
    code: u64,
    message: String,
}

#[derive(Debug, Deserialize)]
struct ClientResponse {
    #[allow(dead_code)]
    id: Option<u64>,
    result: Option<Value>,
    error: Option<RpcError>,
}

/// Session token state machine. Transitions to `Authenticated` happen only
/// inside the exclusive critical section of [`JsonRpcClient::login`].
enum SessionState {
    Unauthenticated,
    Authenticated { token: String },
}

pub(crate) struct JsonRpcClient {
    http: reqwest::Client,
    rpc_url: String,
    login: String,
    password: String,
    seq: AtomicU64,
    session: RwLock<SessionState>,
}

impl JsonRpcClient {
    pub(crate) fn new(
        base_url: &str,
        login: &str,
        password: &str,
        request_timeout_ms: u64,
    ) -> Result<Self, BugzillaError> {
        // The cookie jar keeps the Bugzilla session alive across calls the
        // same way the server expects from browser clients.
        let http = reqwest::Client::builder()
            .cookie_store(true)
            .timeout(Duration::from_millis(request_timeout_ms.max(1)))
            .build()?;

        Ok(Self {
            http,
            rpc_url: format!("{}/jsonrpc.cgi", base_url.trim_end_matches('/')),
            login: login.to_string(),
            password: password.to_string(),
            seq: AtomicU64::new(0),
            session: RwLock::new(SessionState::Unauthenticated),
        })
    }

    pub(crate) async fn current_token(&self) -> Option<String> {
        match &*self.session.read().await {
            SessionState::Unauthenticated => None,
            SessionState::Authenticated { token } => Some(token.clone()),
        }
    }

    /// Logs in and stores the session token, holding the exclusive lock for
    /// the whole transition.
    pub(crate) async fn login(&self) -> Result<(), BugzillaError> {
        let mut session = self.session.write().await;
        tracing::info!("authenticating to bugzilla via json-rpc");

        let args = json!({
            "login": self.login,
            "password": self.password,
            "remember": true,
        });
        let result = self.call_raw("User.login", args).await?;
        let token = result
            .get("token")
            .and_then(Value::as_str)
            .filter(|token| !token.is_empty())
            .ok_or_else(|| {
                BugzillaError::Protocol("bugzilla login did not return a token".to_string())
            })?;

        *session = SessionState::Authenticated {
            token: token.to_string(),
        };
        Ok(())
    }

    /// Performs one RPC call with the current token attached, retrying once
    /// through the login path on an unauthorized response.
    pub(crate) async fn call_with_session(
        &self,
        method: &str,
        args: Map<String, Value>,
    ) -> Result<Value, BugzillaError> {
        let result = self.call_tokenized(method, args.clone()).await;
        match result {
            Err(BugzillaError::Unauthorized) => {
                self.login().await?;
                self.call_tokenized(method, args).await
            }
            other => other,
        }
    }

    async fn call_tokenized(
        &self,
        method: &str,
        mut args: Map<String, Value>,
    ) -> Result<Value, BugzillaError> {
        if let Some(token) = self.current_token().await {
            args.insert("token".to_string(), Value::String(token));
        }
        self.call_raw(method, Value::Object(args)).await
    }

    /// Performs one JSON-RPC call without touching the session state.
    pub(crate) async fn call_raw(
        &self,
        method: &str,
        args: Value,
    ) -> Result<Value, BugzillaError> {
        let id = self.seq.fetch_add(1, Ordering::SeqCst);
        let request = ClientRequest {
            method,
            params: [args],
            id,
        };

        let response = self
            .http
            .post(&self.rpc_url)
            .header(reqwest::header::CONTENT_TYPE, "application/json-rpc")
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED {
            return Err(BugzillaError::Unauthorized);
        }
        if !status.is_success() {
            return Err(BugzillaError::Protocol(format!(
                "bugzilla responded with status {}",
                status.as_u16()
            )));
        }

        let decoded = response.json::<ClientResponse>().await?;
        if let Some(error) = decoded.error {
            return Err(BugzillaError::Rpc {
                code: error.code,
                message: error.message,
            });
        }
        decoded.result.ok_or_else(|| {
            BugzillaError::Protocol(format!("bugzilla {method} response carried no result"))
        })
    }
}
