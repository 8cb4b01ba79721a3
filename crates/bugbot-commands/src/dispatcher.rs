//! Routes one inbound message to exactly one handler.

use std::sync::Arc;

use anyhow::anyhow;

use crate::matcher::Parameters;
use crate::registry::Registry;
use crate::request::{MessageEvent, Request};
use crate::response::{ChatApi, ReplyOptions, ResponseWriter};

const NOT_AUTHORIZED: &str = "You are not authorized to execute this command";

/// Owns the frozen registry and the outbound chat seam.
///
/// The transport spawns one task per inbound message; dispatches for
/// different messages run concurrently and share the registry read-only.
/// Within a single dispatch, patterns are tried strictly in registration
/// order.
pub struct Dispatcher {
    registry: Arc<Registry>,
    chat: Arc<dyn ChatApi>,
}

impl Dispatcher {
    pub fn new(registry: Arc<Registry>, chat: Arc<dyn ChatApi>) -> Self {
        Self { registry, chat }
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Dispatches one verified, de-duplicated, non-self-authored message.
    ///
    /// The first matching entry wins. A failing authorization predicate
    /// produces a single formatted denial and stops the scan; the default
    /// handler only runs when no entry matched at all. A message matching
    /// nothing with no default registered is silently dropped.
    pub async fn dispatch(&self, message: MessageEvent) {
        let response = ResponseWriter::new(message.clone(), self.chat.clone());

        for command in self.registry.commands() {
            let Some(parameters) = command.matches(&message.text) else {
                continue;
            };

            let request = Request::new(message.clone(), parameters);
            let definition = command.definition();
            if let Some(authorizer) = definition.authorizer.as_ref() {
                if !authorizer(&request) {
                    if let Err(error) = response
                        .report_error(&anyhow!(NOT_AUTHORIZED), ReplyOptions::default())
                        .await
                    {
                        tracing::warn!(
                            channel = request.channel(),
                            "failed to report authorization denial: {error:#}"
                        );
                    }
                    return;
                }
            }

            definition.handler.handle(&request, &response).await;
            return;
        }

        if let Some(default_handler) = self.registry.default_handler() {
            let request = Request::new(message, Parameters::new());
            default_handler.handle(&request, &response).await;
        }
    }
}
