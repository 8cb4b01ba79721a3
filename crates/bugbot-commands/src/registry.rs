//! Ordered command registry with a synthesized help entry.

use std::sync::Arc;

use async_trait::async_trait;

use crate::matcher::{match_text, Parameters};
use crate::request::Request;
use crate::response::{ReplyOptions, ResponseWriter};
use crate::tokenizer::{tokenize, PatternError, Token};

const HELP_USAGE: &str = "help";
const AUTHORIZED_ONLY_NOTE: &str = "Authorized users only";

/// Predicate deciding whether the requesting user may run a command.
pub type Authorizer = dyn Fn(&Request) -> bool + Send + Sync;

/// Handles one matched command invocation.
#[async_trait]
pub trait CommandHandler: Send + Sync {
    async fn handle(&self, request: &Request, response: &ResponseWriter);
}

/// Everything a registered command carries besides its usage pattern.
/// Immutable after registration.
#[derive(Clone)]
pub struct CommandDefinition {
    pub description: String,
    pub example: String,
    pub authorizer: Option<Arc<Authorizer>>,
    pub handler: Arc<dyn CommandHandler>,
}

impl CommandDefinition {
    pub fn new(description: &str, handler: Arc<dyn CommandHandler>) -> Self {
        Self {
            description: description.to_string(),
            example: String::new(),
            authorizer: None,
            handler,
        }
    }

    pub fn with_example(mut self, example: &str) -> Self {
        self.example = example.to_string();
        self
    }

    pub fn with_authorizer(mut self, authorizer: Arc<Authorizer>) -> Self {
        self.authorizer = Some(authorizer);
        self
    }
}

/// A command definition plus its pre-tokenized usage pattern.
///
/// Created once at registration, never mutated, read on every dispatch for
/// the lifetime of the listening session.
pub struct BotCommand {
    usage: String,
    tokens: Vec<Token>,
    definition: CommandDefinition,
}

impl BotCommand {
    pub fn new(usage: &str, definition: CommandDefinition) -> Result<Self, PatternError> {
        Ok(Self {
            usage: usage.to_string(),
            tokens: tokenize(usage)?,
            definition,
        })
    }

    pub fn usage(&self) -> &str {
        &self.usage
    }

    pub fn tokens(&self) -> &[Token] {
        &self.tokens
    }

    pub fn definition(&self) -> &CommandDefinition {
        &self.definition
    }

    /// Runs the matcher against this command's pattern.
    pub fn matches(&self, text: &str) -> Option<Parameters> {
        match_text(&self.tokens, text)
    }
}

/// Collects registrations before the transport starts delivering events.
///
/// Registration order is match-priority order. Registering the same usage
/// twice is legal; the earlier entry silently shadows the later one.
#[derive(Default)]
pub struct RegistryBuilder {
    commands: Vec<BotCommand>,
    default_handler: Option<Arc<dyn CommandHandler>>,
    help: Option<CommandDefinition>,
}

impl std::fmt::Debug for RegistryBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegistryBuilder")
            .field("commands", &self.commands.len())
            .field("default_handler", &self.default_handler.is_some())
            .field("help", &self.help.is_some())
            .finish()
    }
}

impl RegistryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a command. A malformed usage pattern is a configuration
    /// error and must prevent the process from beginning to listen.
    pub fn command(
        &mut self,
        usage: &str,
        definition: CommandDefinition,
    ) -> Result<&mut Self, PatternError> {
        self.commands.push(BotCommand::new(usage, definition)?);
        Ok(self)
    }

    /// Sets the fallback handler invoked when no pattern matches.
    pub fn default_command(&mut self, handler: Arc<dyn CommandHandler>) -> &mut Self {
        self.default_handler = Some(handler);
        self
    }

    /// Overrides the synthesized help entry.
    pub fn help(&mut self, definition: CommandDefinition) -> &mut Self {
        self.help = Some(definition);
        self
    }

    /// Freezes the registry, prepending the help entry.
    pub fn build(mut self) -> Result<Registry, PatternError> {
        let help_definition = match self.help.take() {
            Some(mut definition) => {
                if definition.description.is_empty() {
                    definition.description = HELP_USAGE.to_string();
                }
                definition
            }
            None => {
                // The synthesized handler needs the final command list, help
                // entry included, so render against a placeholder first.
                let placeholder = CommandDefinition::new(
                    HELP_USAGE,
                    Arc::new(RenderedHelp {
                        text: String::new(),
                    }),
                );
                let help_entry = BotCommand::new(HELP_USAGE, placeholder)?;
                self.commands.insert(0, help_entry);
                let text = render_help(&self.commands);
                self.commands[0].definition.handler = Arc::new(RenderedHelp { text });
                return Ok(Registry {
                    commands: self.commands,
                    default_handler: self.default_handler,
                });
            }
        };

        self.commands
            .insert(0, BotCommand::new(HELP_USAGE, help_definition)?);
        Ok(Registry {
            commands: self.commands,
            default_handler: self.default_handler,
        })
    }
}

/// Immutable, ordered command collection shared by concurrent dispatches
/// without synchronization.
pub struct Registry {
    commands: Vec<BotCommand>,
    default_handler: Option<Arc<dyn CommandHandler>>,
}

impl Registry {
    pub fn commands(&self) -> &[BotCommand] {
        &self.commands
    }

    pub fn default_handler(&self) -> Option<&Arc<dyn CommandHandler>> {
        self.default_handler.as_ref()
    }
}

struct RenderedHelp {
    text: String,
}

#[async_trait]
impl CommandHandler for RenderedHelp {
    async fn handle(&self, _request: &Request, response: &ResponseWriter) {
        if let Err(error) = response.reply(&self.text, ReplyOptions::default()).await {
            tracing::warn!("failed to send help reply: {error:#}");
        }
    }
}

/// Renders one line per command: literal tokens bold, parameter tokens as
/// code, the description in italics, and a `*` marker on commands that carry
/// an authorization predicate.
fn render_help(commands: &[BotCommand]) -> String {
    let mut authorized_command_present = false;
    let mut help = String::new();
    for command in commands {
        for token in command.tokens() {
            if token.is_parameter {
                help.push_str(&format!("`{}` ", token.word));
            } else {
                help.push_str(&format!("*{}* ", token.word));
            }
        }

        let definition = command.definition();
        if !definition.description.is_empty() {
            help.push_str(&format!("- _{}_", definition.description));
        }
        if definition.authorizer.is_some() {
            authorized_command_present = true;
            help.push_str(" `*`");
        }
        help.push('\n');

        if !definition.example.is_empty() {
            help.push_str(&format!(">_*Example:* {}_\n", definition.example));
        }
    }

    if authorized_command_present {
        help.push_str(&format!("`* {AUTHORIZED_ONLY_NOTE}`\n"));
    }
    help
}
