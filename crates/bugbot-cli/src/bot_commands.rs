//! Command handlers wired into the dispatch registry.

use std::collections::HashSet;
use std::sync::Arc;

use anyhow::anyhow;
use async_trait::async_trait;
use serde_json::Value;

use bugbot_bugzilla::BugzillaClient;
use bugbot_commands::{
    CommandDefinition, CommandHandler, PatternError, Registry, RegistryBuilder, ReplyOptions,
    Request, ResponseWriter,
};
use bugbot_state::{BzStats, StateStore};

const UNKNOWN_COMMAND_REPLY: &str = "Unknown command";
const DEFAULT_STATS_SCOPE: &str = "all";

/// Everything the command handlers need besides the per-message request.
pub(crate) struct CommandDeps {
    pub bugzilla: Arc<BugzillaClient>,
    pub state: Arc<StateStore>,
    pub authorized_users: HashSet<String>,
}

/// Builds the full command registry. A malformed usage pattern surfaces here
/// and must stop startup before the transport begins listening.
pub(crate) fn build_registry(deps: &CommandDeps) -> Result<Registry, PatternError> {
    let authorized_users = Arc::new(deps.authorized_users.clone());
    let authorizer = Arc::new(move |request: &Request| -> bool {
        authorized_users.contains(request.user())
    });

    let mut builder = RegistryBuilder::new();
    builder
        .command(
            "version",
            CommandDefinition::new("Report the version of the bot.", Arc::new(VersionCommand))
                .with_example("version"),
        )?
        .command(
            "say <message>",
            CommandDefinition::new("Repeat a message back.", Arc::new(SayCommand))
                .with_example("say hello there"),
        )?
        .command(
            "bz-stats",
            CommandDefinition::new(
                "Show how many Bugzilla requests were served.",
                Arc::new(BzStatsCommand {
                    state: deps.state.clone(),
                }),
            )
            .with_example("bz-stats"),
        )?
        .command(
            "bz-stats <scope>",
            CommandDefinition::new(
                "Show how many Bugzilla requests were served for a scope.",
                Arc::new(BzStatsCommand {
                    state: deps.state.clone(),
                }),
            )
            .with_example("bz-stats bugs"),
        )?
        .command(
            "bz bugs <ids>",
            CommandDefinition::new(
                "Show status and summary of the given bugs.",
                Arc::new(BzBugsCommand {
                    bugzilla: deps.bugzilla.clone(),
                    state: deps.state.clone(),
                }),
            )
            .with_example("bz bugs 173651,173652"),
        )?
        .command(
            "bz history <ids>",
            CommandDefinition::new(
                "Show the change history of the given bugs.",
                Arc::new(BzHistoryCommand {
                    bugzilla: deps.bugzilla.clone(),
                    state: deps.state.clone(),
                }),
            )
            .with_example("bz history 173651"),
        )?
        .command(
            "bz comment <id> <comment>",
            CommandDefinition::new(
                "Add a comment to a bug.",
                Arc::new(BzCommentCommand {
                    bugzilla: deps.bugzilla.clone(),
                }),
            )
            .with_example("bz comment 173651 fixed by the latest build")
            .with_authorizer(authorizer),
        )?
        .default_command(Arc::new(UnknownCommand));
    builder.build()
}

struct VersionCommand;

#[async_trait]
impl CommandHandler for VersionCommand {
    async fn handle(&self, _request: &Request, response: &ResponseWriter) {
        let text = format!("bugbot `{}`", env!("CARGO_PKG_VERSION"));
        if let Err(error) = response.reply(&text, ReplyOptions::default()).await {
            tracing::warn!("failed to send version reply: {error:#}");
        }
    }
}

struct SayCommand;

#[async_trait]
impl CommandHandler for SayCommand {
    async fn handle(&self, request: &Request, response: &ResponseWriter) {
        let message = request.string_param("message", "");
        if let Err(error) = response.reply(&message, ReplyOptions::default()).await {
            tracing::warn!("failed to send say reply: {error:#}");
        }
    }
}

struct BzStatsCommand {
    state: Arc<StateStore>,
}

#[async_trait]
impl CommandHandler for BzStatsCommand {
    async fn handle(&self, request: &Request, response: &ResponseWriter) {
        let scope = request.string_param("scope", DEFAULT_STATS_SCOPE);
        let count = self.state.read_state(|state| {
            state
                .bz_stats
                .as_ref()
                .map(|stats| stats.count_for(&scope))
                .unwrap_or(0)
        });
        let text = format!("`{scope}`: {count} Bugzilla requests served");
        if let Err(error) = response.reply(&text, ReplyOptions::default()).await {
            tracing::warn!("failed to send bz-stats reply: {error:#}");
        }
    }
}

struct BzBugsCommand {
    bugzilla: Arc<BugzillaClient>,
    state: Arc<StateStore>,
}

#[async_trait]
impl CommandHandler for BzBugsCommand {
    async fn handle(&self, request: &Request, response: &ResponseWriter) {
        let ids = match parse_bug_ids(&request.string_param("ids", "")) {
            Ok(ids) => ids,
            Err(error) => {
                report(response, &error).await;
                return;
            }
        };

        match self.bugzilla.bugs_info(&ids).await {
            Ok(result) => {
                record_bugzilla_request(&self.state, "bugs");
                let text = render_bug_info(&result);
                if let Err(error) = response.reply(&text, ReplyOptions::default()).await {
                    tracing::warn!("failed to send bz bugs reply: {error:#}");
                }
            }
            Err(error) => report(response, &anyhow!(error)).await,
        }
    }
}

struct BzHistoryCommand {
    bugzilla: Arc<BugzillaClient>,
    state: Arc<StateStore>,
}

#[async_trait]
impl CommandHandler for BzHistoryCommand {
    async fn handle(&self, request: &Request, response: &ResponseWriter) {
        let ids = match parse_bug_ids(&request.string_param("ids", "")) {
            Ok(ids) => ids,
            Err(error) => {
                report(response, &error).await;
                return;
            }
        };

        match self.bugzilla.bugs_history(&ids).await {
            Ok(result) => {
                record_bugzilla_request(&self.state, "history");
                let text = render_bug_history(&result);
                if let Err(error) = response.reply(&text, ReplyOptions::default()).await {
                    tracing::warn!("failed to send bz history reply: {error:#}");
                }
            }
            Err(error) => report(response, &anyhow!(error)).await,
        }
    }
}

struct BzCommentCommand {
    bugzilla: Arc<BugzillaClient>,
}

#[async_trait]
impl CommandHandler for BzCommentCommand {
    async fn handle(&self, request: &Request, response: &ResponseWriter) {
        let id = match request.string_param("id", "").trim_start_matches('#').parse::<u64>() {
            Ok(id) => id,
            Err(_) => {
                report(response, &anyhow!("bug id must be a number")).await;
                return;
            }
        };
        let comment = request.string_param("comment", "");
        if comment.trim().is_empty() {
            report(response, &anyhow!("comment must not be empty")).await;
            return;
        }

        match self.bugzilla.add_comment(id, &comment).await {
            Ok(_) => {
                let text = format!("Added comment to bug #{id}");
                if let Err(error) = response.reply(&text, ReplyOptions::default()).await {
                    tracing::warn!("failed to send bz comment reply: {error:#}");
                }
            }
            Err(error) => report(response, &anyhow!(error)).await,
        }
    }
}

struct UnknownCommand;

#[async_trait]
impl CommandHandler for UnknownCommand {
    async fn handle(&self, _request: &Request, response: &ResponseWriter) {
        if let Err(error) = response
            .reply(UNKNOWN_COMMAND_REPLY, ReplyOptions::default())
            .await
        {
            tracing::warn!("failed to send fallback reply: {error:#}");
        }
    }
}

async fn report(response: &ResponseWriter, error: &anyhow::Error) {
    if let Err(report_error) = response.report_error(error, ReplyOptions::default()).await {
        tracing::warn!("failed to report command error: {report_error:#}");
    }
}

fn record_bugzilla_request(state: &StateStore, scope: &str) {
    let result = state.update_state(|current| {
        let mut next = current.clone();
        let stats = next.bz_stats.get_or_insert_with(BzStats::default);
        stats.record_request(DEFAULT_STATS_SCOPE);
        stats.record_request(scope);
        Ok(next)
    });
    // Stats are best-effort bookkeeping; the bug lookup already succeeded.
    if let Err(error) = result {
        tracing::warn!("failed to record bugzilla request stats: {error}");
    }
}

/// Parses a `bz bugs` / `bz history` id list. Ids may be separated by commas
/// or whitespace and may carry a leading `#`.
fn parse_bug_ids(text: &str) -> Result<Vec<u64>, anyhow::Error> {
    let mut ids = Vec::new();
    for word in text.split([',', ' ']) {
        let word = word.trim().trim_start_matches('#');
        if word.is_empty() {
            continue;
        }
        let id = word
            .parse::<u64>()
            .map_err(|_| anyhow!("invalid bug id {word:?}"))?;
        ids.push(id);
    }
    if ids.is_empty() {
        return Err(anyhow!("no bug ids given"));
    }
    Ok(ids)
}

fn render_bug_info(result: &Value) -> String {
    let Some(bugs) = result.get("bugs").and_then(Value::as_array) else {
        return "No bugs found".to_string();
    };
    if bugs.is_empty() {
        return "No bugs found".to_string();
    }

    let mut lines = Vec::with_capacity(bugs.len());
    for bug in bugs {
        let id = bug.get("id").and_then(Value::as_u64).unwrap_or(0);
        let status = bug.get("status").and_then(Value::as_str).unwrap_or("UNKNOWN");
        let summary = bug.get("summary").and_then(Value::as_str).unwrap_or("");
        lines.push(format!("#{id} *{status}* {summary}"));
    }
    lines.join("\n")
}

fn render_bug_history(result: &Value) -> String {
    let Some(bugs) = result.get("bugs").and_then(Value::as_array) else {
        return "No bugs found".to_string();
    };
    if bugs.is_empty() {
        return "No bugs found".to_string();
    }

    let mut lines = Vec::with_capacity(bugs.len());
    for bug in bugs {
        let id = bug.get("id").and_then(Value::as_u64).unwrap_or(0);
        let changes = bug
            .get("history")
            .and_then(Value::as_array)
            .map(Vec::len)
            .unwrap_or(0);
        lines.push(format!("#{id}: {changes} changes"));
    }
    lines.join("\n")
}
