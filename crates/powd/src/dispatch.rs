//! Routes incoming custom commands to the handler registered for their tag.

use std::collections::HashMap;
use std::sync::Arc;

use powd_core::CustomCommand;
use powd_services::CommandHandler;

/// Maps command tags to handlers.
pub struct CommandRouter {
    handlers: HashMap<&'static str, Arc<dyn CommandHandler>>,
}

impl CommandRouter {
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    /// Register a handler under its own command tag. A later registration
    /// for the same tag replaces the earlier one.
    pub fn register(&mut self, handler: Arc<dyn CommandHandler>) {
        self.handlers.insert(handler.command(), handler);
    }

    pub fn tags(&self) -> Vec<&'static str> {
        let mut tags: Vec<_> = self.handlers.keys().copied().collect();
        tags.sort_unstable();
        tags
    }

    /// Hand `command` to its handler. `None` for unrecognised tags or when
    /// the handler has nothing to send back.
    pub fn route(&self, command: &CustomCommand) -> Option<CustomCommand> {
        match self.handlers.get(command.command.as_str()) {
            Some(handler) => handler.handle(command),
            None => {
                tracing::debug!(command = %command.command, "no handler for command");
                None
            }
        }
    }
}
