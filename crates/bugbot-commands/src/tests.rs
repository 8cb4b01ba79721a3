//! Tests for registry ordering, dispatch behavior, and reply plumbing.

use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc, Mutex,
};

use anyhow::{bail, Result};
use async_trait::async_trait;

use super::{
    ChatApi, CommandDefinition, CommandHandler, Dispatcher, MessageEvent, PatternError,
    RegistryBuilder, ReplyOptions, Request, ResponseWriter,
};

#[derive(Debug, Clone, PartialEq, Eq)]
struct PostedMessage {
    channel: String,
    text: String,
    as_user: bool,
    thread_ts: Option<String>,
}

#[derive(Default)]
struct RecordingChat {
    posted: Mutex<Vec<PostedMessage>>,
    fail: bool,
}

impl RecordingChat {
    fn failing() -> Self {
        Self {
            posted: Mutex::new(Vec::new()),
            fail: true,
        }
    }

    fn posted(&self) -> Vec<PostedMessage> {
        self.posted.lock().expect("posted lock").clone()
    }
}

#[async_trait]
impl ChatApi for RecordingChat {
    async fn post_message(
        &self,
        channel: &str,
        text: &str,
        as_user: bool,
        thread_ts: Option<&str>,
    ) -> Result<()> {
        if self.fail {
            bail!("transport unavailable");
        }
        self.posted.lock().expect("posted lock").push(PostedMessage {
            channel: channel.to_string(),
            text: text.to_string(),
            as_user,
            thread_ts: thread_ts.map(str::to_string),
        });
        Ok(())
    }
}

struct EchoHandler {
    parameter: &'static str,
    invocations: Arc<AtomicUsize>,
}

#[async_trait]
impl CommandHandler for EchoHandler {
    async fn handle(&self, request: &Request, response: &ResponseWriter) {
        self.invocations.fetch_add(1, Ordering::SeqCst);
        let value = request.string_param(self.parameter, "<unset>");
        let _ = response.reply(&value, ReplyOptions::default()).await;
    }
}

struct StaticHandler {
    reply: &'static str,
    invocations: Arc<AtomicUsize>,
}

#[async_trait]
impl CommandHandler for StaticHandler {
    async fn handle(&self, _request: &Request, response: &ResponseWriter) {
        self.invocations.fetch_add(1, Ordering::SeqCst);
        let _ = response.reply(self.reply, ReplyOptions::default()).await;
    }
}

fn counter() -> Arc<AtomicUsize> {
    Arc::new(AtomicUsize::new(0))
}

fn static_definition(
    description: &str,
    reply: &'static str,
    invocations: Arc<AtomicUsize>,
) -> CommandDefinition {
    CommandDefinition::new(
        description,
        Arc::new(StaticHandler {
            reply,
            invocations,
        }),
    )
}

fn message(text: &str) -> MessageEvent {
    MessageEvent {
        channel: "C1".to_string(),
        user: "U1".to_string(),
        text: text.to_string(),
        ts: "100.1".to_string(),
        thread_ts: None,
    }
}

#[tokio::test]
async fn trailing_parameter_is_handed_to_the_handler() {
    let chat = Arc::new(RecordingChat::default());
    let invocations = counter();

    let mut builder = RegistryBuilder::new();
    builder
        .command(
            "say <message>",
            CommandDefinition::new(
                "Say something.",
                Arc::new(EchoHandler {
                    parameter: "message",
                    invocations: invocations.clone(),
                }),
            ),
        )
        .expect("register say");
    let registry = Arc::new(builder.build().expect("build"));

    let dispatcher = Dispatcher::new(registry, chat.clone());
    dispatcher.dispatch(message("say hello world")).await;

    assert_eq!(invocations.load(Ordering::SeqCst), 1);
    let posted = chat.posted();
    assert_eq!(posted.len(), 1);
    assert_eq!(posted[0].text, "hello world");
    assert_eq!(posted[0].channel, "C1");
}

#[tokio::test]
async fn earlier_registration_shadows_later_matches() {
    let chat = Arc::new(RecordingChat::default());
    let bare = counter();
    let scoped = counter();

    let mut builder = RegistryBuilder::new();
    builder
        .command("bz-stats", static_definition("Totals.", "totals", bare.clone()))
        .expect("register bare");
    builder
        .command(
            "bz-stats <scope>",
            CommandDefinition::new(
                "Scoped totals.",
                Arc::new(EchoHandler {
                    parameter: "scope",
                    invocations: scoped.clone(),
                }),
            ),
        )
        .expect("register scoped");
    let registry = Arc::new(builder.build().expect("build"));
    let dispatcher = Dispatcher::new(registry, chat.clone());

    dispatcher.dispatch(message("bz-stats")).await;
    assert_eq!(bare.load(Ordering::SeqCst), 1);
    assert_eq!(scoped.load(Ordering::SeqCst), 0);

    dispatcher.dispatch(message("bz-stats networking")).await;
    assert_eq!(bare.load(Ordering::SeqCst), 1);
    assert_eq!(scoped.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn duplicate_usage_keeps_first_registration() {
    let chat = Arc::new(RecordingChat::default());
    let first = counter();
    let second = counter();

    let mut builder = RegistryBuilder::new();
    builder
        .command("version", static_definition("First.", "first", first.clone()))
        .expect("register first");
    builder
        .command("version", static_definition("Second.", "second", second.clone()))
        .expect("register second");
    let registry = Arc::new(builder.build().expect("build"));

    Dispatcher::new(registry, chat.clone())
        .dispatch(message("version"))
        .await;
    assert_eq!(first.load(Ordering::SeqCst), 1);
    assert_eq!(second.load(Ordering::SeqCst), 0);
    assert_eq!(chat.posted()[0].text, "first");
}

#[tokio::test]
async fn authorization_denial_short_circuits() {
    let chat = Arc::new(RecordingChat::default());
    let handler_runs = counter();
    let default_runs = counter();

    let mut builder = RegistryBuilder::new();
    builder
        .command(
            "bz comment <id> <comment>",
            static_definition("Comment.", "commented", handler_runs.clone())
                .with_authorizer(Arc::new(|request: &Request| request.user() == "UADMIN")),
        )
        .expect("register comment");
    builder.default_command(Arc::new(StaticHandler {
        reply: "Unknown command",
        invocations: default_runs.clone(),
    }));
    let registry = Arc::new(builder.build().expect("build"));

    Dispatcher::new(registry, chat.clone())
        .dispatch(message("bz comment 42 looks fixed"))
        .await;

    assert_eq!(handler_runs.load(Ordering::SeqCst), 0);
    assert_eq!(default_runs.load(Ordering::SeqCst), 0);
    let posted = chat.posted();
    assert_eq!(posted.len(), 1);
    assert_eq!(
        posted[0].text,
        "*Error:* _You are not authorized to execute this command_"
    );
}

#[tokio::test]
async fn authorized_user_reaches_the_handler() {
    let chat = Arc::new(RecordingChat::default());
    let handler_runs = counter();

    let mut builder = RegistryBuilder::new();
    builder
        .command(
            "bz comment <id> <comment>",
            static_definition("Comment.", "commented", handler_runs.clone())
                .with_authorizer(Arc::new(|request: &Request| request.user() == "U1")),
        )
        .expect("register comment");
    let registry = Arc::new(builder.build().expect("build"));

    Dispatcher::new(registry, chat.clone())
        .dispatch(message("bz comment 42 looks fixed"))
        .await;
    assert_eq!(handler_runs.load(Ordering::SeqCst), 1);
    assert_eq!(chat.posted()[0].text, "commented");
}

#[tokio::test]
async fn unmatched_message_falls_back_to_the_default_handler() {
    let chat = Arc::new(RecordingChat::default());
    let default_runs = counter();

    let mut builder = RegistryBuilder::new();
    builder
        .command("version", static_definition("Version.", "v", counter()))
        .expect("register version");
    builder.default_command(Arc::new(StaticHandler {
        reply: "Unknown command",
        invocations: default_runs.clone(),
    }));
    let registry = Arc::new(builder.build().expect("build"));

    Dispatcher::new(registry, chat.clone())
        .dispatch(message("xyzzy"))
        .await;
    assert_eq!(default_runs.load(Ordering::SeqCst), 1);
    assert_eq!(chat.posted()[0].text, "Unknown command");
}

#[tokio::test]
async fn unmatched_message_without_default_is_silently_dropped() {
    let chat = Arc::new(RecordingChat::default());

    let mut builder = RegistryBuilder::new();
    builder
        .command("version", static_definition("Version.", "v", counter()))
        .expect("register version");
    let registry = Arc::new(builder.build().expect("build"));

    Dispatcher::new(registry, chat.clone())
        .dispatch(message("xyzzy"))
        .await;
    assert!(chat.posted().is_empty());
}

#[tokio::test]
async fn reply_failure_does_not_panic_the_dispatch() {
    let chat = Arc::new(RecordingChat::failing());
    let handler_runs = counter();

    let mut builder = RegistryBuilder::new();
    builder
        .command(
            "version",
            static_definition("Version.", "v", handler_runs.clone()),
        )
        .expect("register version");
    let registry = Arc::new(builder.build().expect("build"));

    Dispatcher::new(registry, chat.clone())
        .dispatch(message("version"))
        .await;
    assert_eq!(handler_runs.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn help_entry_is_prepended_and_rendered_from_the_registry() {
    let chat = Arc::new(RecordingChat::default());

    let mut builder = RegistryBuilder::new();
    builder
        .command(
            "say <message>",
            static_definition("Say something.", "said", counter()).with_example("say hello"),
        )
        .expect("register say");
    builder
        .command(
            "bz comment <id> <comment>",
            static_definition("Comment on a bug.", "commented", counter())
                .with_authorizer(Arc::new(|_: &Request| false)),
        )
        .expect("register comment");
    let registry = Arc::new(builder.build().expect("build"));

    assert_eq!(registry.commands()[0].usage(), "help");

    Dispatcher::new(registry, chat.clone())
        .dispatch(message("help"))
        .await;
    let posted = chat.posted();
    assert_eq!(posted.len(), 1);
    let help = &posted[0].text;
    assert!(help.contains("*help*"));
    assert!(help.contains("*say* `message`"));
    assert!(help.contains("- _Say something._"));
    assert!(help.contains(">_*Example:* say hello_"));
    assert!(help.contains("*bz* *comment* `id` `comment`"));
    assert!(help.contains(" `*`"));
    assert!(help.contains("`* Authorized users only`"));
}

#[tokio::test]
async fn explicit_help_definition_replaces_the_synthesized_one() {
    let chat = Arc::new(RecordingChat::default());
    let help_runs = counter();

    let mut builder = RegistryBuilder::new();
    builder.help(static_definition("", "custom help", help_runs.clone()));
    builder
        .command("version", static_definition("Version.", "v", counter()))
        .expect("register version");
    let registry = Arc::new(builder.build().expect("build"));

    assert_eq!(registry.commands()[0].usage(), "help");
    assert_eq!(registry.commands()[0].definition().description, "help");

    Dispatcher::new(registry, chat.clone())
        .dispatch(message("help"))
        .await;
    assert_eq!(help_runs.load(Ordering::SeqCst), 1);
    assert_eq!(chat.posted()[0].text, "custom help");
}

#[tokio::test]
async fn threaded_reply_targets_the_triggering_message() {
    let chat = Arc::new(RecordingChat::default());
    let event = MessageEvent {
        channel: "C1".to_string(),
        user: "U1".to_string(),
        text: "ignored".to_string(),
        ts: "100.1".to_string(),
        thread_ts: None,
    };
    let response = ResponseWriter::new(event, chat.clone());
    response
        .reply("in thread", ReplyOptions { thread_response: true })
        .await
        .expect("reply");
    assert_eq!(chat.posted()[0].thread_ts.as_deref(), Some("100.1"));

    let threaded = MessageEvent {
        thread_ts: Some("99.5".to_string()),
        ..message("ignored")
    };
    let response = ResponseWriter::new(threaded, chat.clone());
    response
        .reply("still in thread", ReplyOptions { thread_response: true })
        .await
        .expect("reply");
    assert_eq!(chat.posted()[1].thread_ts.as_deref(), Some("99.5"));
}

#[test]
fn malformed_pattern_is_a_registration_error() {
    let mut builder = RegistryBuilder::new();
    let error = builder
        .command(
            "say <message",
            static_definition("Broken.", "never", counter()),
        )
        .unwrap_err();
    assert!(matches!(error, PatternError::UnbalancedDelimiters { .. }));
}
