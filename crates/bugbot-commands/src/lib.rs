//! Command dispatch engine: pattern tokenization, matching, an ordered
//! registry with a synthesized help entry, and per-message dispatch.
//!
//! The engine never talks to a chat backend directly; outbound replies go
//! through the [`ChatApi`] seam so transports stay swappable.

pub mod dispatcher;
pub mod matcher;
pub mod registry;
pub mod request;
pub mod response;
pub mod tokenizer;

pub use dispatcher::Dispatcher;
pub use matcher::{match_text, Parameters};
pub use registry::{
    Authorizer, BotCommand, CommandDefinition, CommandHandler, Registry, RegistryBuilder,
};
pub use request::{MessageEvent, Request};
pub use response::{ChatApi, ReplyOptions, ResponseWriter};
pub use tokenizer::{tokenize, PatternError, Token};

#[cfg(test)]
mod tests;
