//! Events-API webhook server feeding the dispatch engine.

use std::future::Future;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::json;
use tokio::net::TcpListener;
use tokio::sync::Mutex;
use tokio::task::JoinSet;

use bugbot_commands::Dispatcher;

use crate::events::{parse_push_event, ProcessedEventWindow, PushParseError, SlackPushEvent};

const PROCESSED_EVENT_CAP: usize = 1_024;

/// Transport configuration for the listening session.
///
/// The verification token comes from the `SLACK_VERIFICATION_TOKEN`
/// environment; the listen address from the `--slack-listen` flag.
#[derive(Debug, Clone)]
pub struct SlackOptions {
    pub verification_token: String,
    pub listen_address: String,
}

struct EventServerState {
    verification_token: String,
    dispatcher: Arc<Dispatcher>,
    window: Mutex<ProcessedEventWindow>,
    dispatches: Mutex<JoinSet<()>>,
}

/// Binds the webhook listener and serves until ctrl-c.
///
/// Each accepted message is dispatched on its own task; shutdown stops
/// accepting new events while in-flight dispatches run to completion.
pub async fn run_event_server(options: &SlackOptions, dispatcher: Arc<Dispatcher>) -> Result<()> {
    let state = Arc::new(EventServerState {
        verification_token: options.verification_token.clone(),
        dispatcher,
        window: Mutex::new(ProcessedEventWindow::new(PROCESSED_EVENT_CAP)),
        dispatches: Mutex::new(JoinSet::new()),
    });

    let listener = TcpListener::bind(options.listen_address.as_str())
        .await
        .with_context(|| format!("failed to bind {}", options.listen_address))?;
    let local_addr = listener
        .local_addr()
        .context("failed to resolve bound listen address")?;
    tracing::info!("bugbot up and listening to slack on {local_addr}");

    serve_events(listener, state, async {
        let _ = tokio::signal::ctrl_c().await;
        tracing::info!("shutting down");
    })
    .await
}

/// Serves until `shutdown` resolves, then drains still-running dispatch
/// tasks so no handler is interrupted mid-reply.
async fn serve_events(
    listener: TcpListener,
    state: Arc<EventServerState>,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> Result<()> {
    let app = build_event_router(state.clone());
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
        .context("slack event server exited unexpectedly")?;

    // The listener is closed; nothing spawns into the set past this point.
    let mut dispatches = state.dispatches.lock().await;
    while dispatches.join_next().await.is_some() {}
    Ok(())
}

fn build_event_router(state: Arc<EventServerState>) -> Router {
    Router::new()
        .route("/events", post(handle_push_event))
        .route("/healthz", get(handle_health))
        .with_state(state)
}

async fn handle_health() -> impl IntoResponse {
    (StatusCode::OK, Json(json!({"status":"ok"})))
}

async fn handle_push_event(
    State(state): State<Arc<EventServerState>>,
    body: String,
) -> Response {
    let event = match parse_push_event(&body, &state.verification_token) {
        Ok(event) => event,
        Err(PushParseError::InvalidToken) => {
            return (
                StatusCode::UNAUTHORIZED,
                Json(json!({"error":{"code":"invalid_token","message":"invalid verification token"}})),
            )
                .into_response();
        }
        Err(error) => {
            return (
                StatusCode::BAD_REQUEST,
                Json(json!({"error":{"code":"parse_failed","message":error.to_string()}})),
            )
                .into_response();
        }
    };

    match event {
        SlackPushEvent::Challenge { challenge } => (StatusCode::OK, challenge).into_response(),
        SlackPushEvent::Mention(push) | SlackPushEvent::Message(push) => {
            if !push.event_id.is_empty() {
                let fresh = state.window.lock().await.insert(&push.event_id);
                if !fresh {
                    return (StatusCode::OK, Json(json!({"status":"duplicate"}))).into_response();
                }
            }
            let dispatcher = state.dispatcher.clone();
            let mut dispatches = state.dispatches.lock().await;
            // Reap finished tasks so the set only ever holds live dispatches.
            while dispatches.try_join_next().is_some() {}
            dispatches.spawn(async move {
                dispatcher.dispatch(push.message).await;
            });
            (StatusCode::OK, Json(json!({"status":"accepted"}))).into_response()
        }
        SlackPushEvent::Other => (StatusCode::OK, Json(json!({"status":"ignored"}))).into_response(),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex as StdMutex;
    use std::time::Duration;

    use anyhow::Result;
    use async_trait::async_trait;
    use serde_json::json;

    use bugbot_commands::{
        ChatApi, CommandDefinition, CommandHandler, Dispatcher, RegistryBuilder, ReplyOptions,
        Request, ResponseWriter,
    };

    use super::*;

    #[derive(Default)]
    struct RecordingChat {
        posted: StdMutex<Vec<(String, String)>>,
    }

    impl RecordingChat {
        fn posted(&self) -> Vec<(String, String)> {
            self.posted.lock().expect("posted lock").clone()
        }
    }

    #[async_trait]
    impl ChatApi for RecordingChat {
        async fn post_message(
            &self,
            channel: &str,
            text: &str,
            _as_user: bool,
            _thread_ts: Option<&str>,
        ) -> Result<()> {
            self.posted
                .lock()
                .expect("posted lock")
                .push((channel.to_string(), text.to_string()));
            Ok(())
        }
    }

    struct VersionHandler;

    #[async_trait]
    impl CommandHandler for VersionHandler {
        async fn handle(&self, _request: &Request, response: &ResponseWriter) {
            let _ = response.reply("0.1.0", ReplyOptions::default()).await;
        }
    }

    async fn spawn_server(chat: Arc<RecordingChat>) -> String {
        let mut builder = RegistryBuilder::new();
        builder
            .command(
                "version",
                CommandDefinition::new("Report the version.", Arc::new(VersionHandler)),
            )
            .expect("register version");
        let registry = Arc::new(builder.build().expect("build"));
        let dispatcher = Arc::new(Dispatcher::new(registry, chat));

        let state = Arc::new(EventServerState {
            verification_token: "verify-me".to_string(),
            dispatcher,
            window: Mutex::new(ProcessedEventWindow::new(8)),
            dispatches: Mutex::new(JoinSet::new()),
        });
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("local addr");
        let app = build_event_router(state);
        tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });
        format!("http://{addr}")
    }

    fn message_payload(event_id: &str, text: &str) -> serde_json::Value {
        json!({
            "token": "verify-me",
            "type": "event_callback",
            "event_id": event_id,
            "event": {
                "type": "message",
                "user": "U1",
                "text": text,
                "channel": "C1",
                "ts": "100.1",
            },
        })
    }

    #[tokio::test]
    async fn challenge_round_trip_returns_plain_text() {
        let base = spawn_server(Arc::new(RecordingChat::default())).await;
        let response = reqwest::Client::new()
            .post(format!("{base}/events"))
            .body(
                json!({"token": "verify-me", "type": "url_verification", "challenge": "c123"})
                    .to_string(),
            )
            .send()
            .await
            .expect("post");
        assert_eq!(response.status().as_u16(), 200);
        assert_eq!(response.text().await.expect("body"), "c123");
    }

    #[tokio::test]
    async fn invalid_token_is_rejected_with_401() {
        let base = spawn_server(Arc::new(RecordingChat::default())).await;
        let response = reqwest::Client::new()
            .post(format!("{base}/events"))
            .body(json!({"token": "wrong", "type": "url_verification"}).to_string())
            .send()
            .await
            .expect("post");
        assert_eq!(response.status().as_u16(), 401);
    }

    #[tokio::test]
    async fn accepted_message_is_dispatched_once() {
        let chat = Arc::new(RecordingChat::default());
        let base = spawn_server(chat.clone()).await;
        let client = reqwest::Client::new();

        for _ in 0..2 {
            let response = client
                .post(format!("{base}/events"))
                .body(message_payload("Ev1", "version").to_string())
                .send()
                .await
                .expect("post");
            assert_eq!(response.status().as_u16(), 200);
        }

        // The dispatch runs on its own task; give it a moment to land.
        tokio::time::sleep(Duration::from_millis(100)).await;
        let posted = chat.posted();
        assert_eq!(posted.len(), 1);
        assert_eq!(posted[0], ("C1".to_string(), "0.1.0".to_string()));
    }

    struct SlowHandler;

    #[async_trait]
    impl CommandHandler for SlowHandler {
        async fn handle(&self, _request: &Request, response: &ResponseWriter) {
            tokio::time::sleep(Duration::from_millis(300)).await;
            let _ = response.reply("done", ReplyOptions::default()).await;
        }
    }

    #[tokio::test]
    async fn shutdown_waits_for_in_flight_dispatches() {
        let chat = Arc::new(RecordingChat::default());

        let mut builder = RegistryBuilder::new();
        builder
            .command(
                "slow",
                CommandDefinition::new("Reply after a pause.", Arc::new(SlowHandler)),
            )
            .expect("register slow");
        let registry = Arc::new(builder.build().expect("build"));
        let dispatcher = Arc::new(Dispatcher::new(registry, chat.clone()));

        let state = Arc::new(EventServerState {
            verification_token: "verify-me".to_string(),
            dispatcher,
            window: Mutex::new(ProcessedEventWindow::new(8)),
            dispatches: Mutex::new(JoinSet::new()),
        });
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("local addr");

        let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();
        let server = tokio::spawn(serve_events(listener, state, async move {
            let _ = shutdown_rx.await;
        }));

        let response = reqwest::Client::new()
            .post(format!("http://{addr}/events"))
            .body(message_payload("Ev-slow", "slow").to_string())
            .send()
            .await
            .expect("post");
        assert_eq!(response.status().as_u16(), 200);

        // Begin shutdown while the handler is still sleeping.
        tokio::time::sleep(Duration::from_millis(50)).await;
        shutdown_tx.send(()).expect("signal shutdown");
        server.await.expect("join server").expect("serve");

        // The server must not return until the handler's reply has landed.
        let posted = chat.posted();
        assert_eq!(posted.len(), 1);
        assert_eq!(posted[0], ("C1".to_string(), "done".to_string()));
    }

    #[tokio::test]
    async fn malformed_body_is_rejected_with_400() {
        let base = spawn_server(Arc::new(RecordingChat::default())).await;
        let response = reqwest::Client::new()
            .post(format!("{base}/events"))
            .body("not json")
            .send()
            .await
            .expect("post");
        assert_eq!(response.status().as_u16(), 400);
    }
}
