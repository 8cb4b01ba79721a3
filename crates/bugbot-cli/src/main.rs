//! bugbot binary: flag parsing, collaborator wiring, and the listen loop.

mod bot_commands;

use std::collections::HashSet;
use std::io::ErrorKind;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::EnvFilter;

use bugbot_bugzilla::{BugzillaClient, BugzillaOptions};
use bugbot_commands::Dispatcher;
use bugbot_slack::{run_event_server, SlackApiClient, SlackOptions};
use bugbot_state::{FileBackend, StateStore};

use crate::bot_commands::{build_registry, CommandDeps};

const LISTEN_RETRY_PAUSE: Duration = Duration::from_secs(5);

#[derive(Debug, Parser)]
#[command(name = "bugbot", version, about = "Slack bot bridging channels to Bugzilla")]
struct Cli {
    /// Address and port the events webhook listens on.
    #[arg(long = "slack-listen", default_value = "0.0.0.0:3000")]
    slack_listen: String,

    /// Slack Web API base URL.
    #[arg(long = "slack-api-base", default_value = "https://slack.com/api")]
    slack_api_base: String,

    /// Bot token used for outbound replies.
    #[arg(long = "slack-bot-token", env = "SLACK_BOT_TOKEN", hide_env_values = true)]
    slack_bot_token: String,

    /// Token inbound push payloads must carry.
    #[arg(
        long = "slack-verification-token",
        env = "SLACK_VERIFICATION_TOKEN",
        hide_env_values = true
    )]
    slack_verification_token: String,

    /// Bugzilla instance base URL.
    #[arg(
        long = "bugzilla-url",
        env = "BUGZILLA_URL",
        default_value = "https://bugzilla.redhat.com"
    )]
    bugzilla_url: String,

    /// Bugzilla account used for authenticated calls.
    #[arg(long = "bugzilla-login", env = "BUGZILLA_LOGIN", default_value = "")]
    bugzilla_login: String,

    #[arg(
        long = "bugzilla-password",
        env = "BUGZILLA_PASSWORD",
        hide_env_values = true,
        default_value = ""
    )]
    bugzilla_password: String,

    /// Path of the versioned state document.
    #[arg(long = "state-path", default_value = "bugbot-state.json")]
    state_path: PathBuf,

    /// Slack user ids allowed to run authorized-only commands.
    #[arg(long = "authorized-users", env = "BUGBOT_AUTHORIZED_USERS", value_delimiter = ',')]
    authorized_users: Vec<String>,

    /// Timeout applied to outbound Slack and Bugzilla requests.
    #[arg(long = "request-timeout-ms", default_value_t = 10_000)]
    request_timeout_ms: u64,
}

fn init_tracing() {
    let env_filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::WARN.into())
        .from_env_lossy();

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .compact()
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    run(cli).await
}

async fn run(cli: Cli) -> Result<()> {
    let bugzilla = Arc::new(
        BugzillaClient::new(&BugzillaOptions {
            url: cli.bugzilla_url.clone(),
            login: cli.bugzilla_login.clone(),
            password: cli.bugzilla_password.clone(),
            request_timeout_ms: cli.request_timeout_ms,
        })
        .context("failed to create bugzilla client")?,
    );

    let state = Arc::new(
        StateStore::open(Box::new(FileBackend::new(cli.state_path.clone())))
            .context("failed to open state store")?,
    );

    let authorized_users = cli
        .authorized_users
        .iter()
        .map(|user| user.trim().to_string())
        .filter(|user| !user.is_empty())
        .collect::<HashSet<_>>();

    let registry = build_registry(&CommandDeps {
        bugzilla,
        state,
        authorized_users,
    })
    .context("invalid command usage pattern")?;

    let chat = Arc::new(
        SlackApiClient::new(
            cli.slack_api_base.clone(),
            cli.slack_bot_token.clone(),
            cli.request_timeout_ms,
        )
        .context("failed to create slack api client")?,
    );
    let dispatcher = Arc::new(Dispatcher::new(Arc::new(registry), chat));

    let options = SlackOptions {
        verification_token: cli.slack_verification_token,
        listen_address: cli.slack_listen,
    };

    loop {
        match run_event_server(&options, dispatcher.clone()).await {
            Ok(()) => return Ok(()),
            Err(error) if is_retriable(&error) => {
                tracing::warn!("slack listen failed, retrying: {error:#}");
                tokio::time::sleep(LISTEN_RETRY_PAUSE).await;
            }
            Err(error) => return Err(error),
        }
    }
}

/// Transient listener failures worth retrying; configuration errors such as
/// an unbindable address are not.
fn is_retriable(error: &anyhow::Error) -> bool {
    error.chain().any(|cause| {
        cause
            .downcast_ref::<std::io::Error>()
            .is_some_and(|io_error| {
                matches!(
                    io_error.kind(),
                    ErrorKind::ConnectionReset
                        | ErrorKind::ConnectionAborted
                        | ErrorKind::BrokenPipe
                        | ErrorKind::UnexpectedEof
                )
            })
    })
}
