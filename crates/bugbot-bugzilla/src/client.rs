//! Public Bugzilla method surface.

use serde_json::{Map, Value};

use crate::jsonrpc::{BugzillaError, JsonRpcClient};

/// Connection settings, usually taken from `--bugzilla-*` flags or the
/// `BUGZILLA_URL` / `BUGZILLA_LOGIN` / `BUGZILLA_PASSWORD` environment.
#[derive(Debug, Clone)]
pub struct BugzillaOptions {
    pub url: String,
    pub login: String,
    pub password: String,
    pub request_timeout_ms: u64,
}

/// Bugzilla JSON-RPC client. Cheap to share behind an `Arc`; all session
/// bookkeeping lives behind internal locks.
pub struct BugzillaClient {
    rpc: JsonRpcClient,
}

impl BugzillaClient {
    pub fn new(options: &BugzillaOptions) -> Result<Self, BugzillaError> {
        Ok(Self {
            rpc: JsonRpcClient::new(
                &options.url,
                &options.login,
                &options.password,
                options.request_timeout_ms,
            )?,
        })
    }

    /// Returns the remote Bugzilla version. Does not require a session.
    pub async fn version(&self) -> Result<String, BugzillaError> {
        let result = self
            .rpc
            .call_raw("Bugzilla.version", Value::Object(Map::new()))
            .await?;
        result
            .get("version")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| {
                BugzillaError::Protocol("bugzilla version response had no version".to_string())
            })
    }

    /// Fetches information about the selected bugs (`Bug.get`).
    pub async fn bugs_info(&self, ids: &[u64]) -> Result<Value, BugzillaError> {
        let mut args = Map::new();
        args.insert("ids".to_string(), ids_value(ids));
        self.rpc.call_with_session("Bug.get", args).await
    }

    /// Fetches the history of the selected bugs (`Bug.history`).
    pub async fn bugs_history(&self, ids: &[u64]) -> Result<Value, BugzillaError> {
        let mut args = Map::new();
        args.insert("ids".to_string(), ids_value(ids));
        self.rpc.call_with_session("Bug.history", args).await
    }

    /// Adds a comment to one bug (`Bug.add_comment`).
    pub async fn add_comment(&self, id: u64, comment: &str) -> Result<Value, BugzillaError> {
        let mut args = Map::new();
        args.insert("id".to_string(), Value::from(id));
        args.insert("comment".to_string(), Value::String(comment.to_string()));
        self.rpc.call_with_session("Bug.add_comment", args).await
    }
}

fn ids_value(ids: &[u64]) -> Value {
    Value::Array(ids.iter().copied().map(Value::from).collect())
}
