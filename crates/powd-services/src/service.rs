//! Handler trait for custom commands.
//!
//! The network layer hands every inbound custom command to the daemon's
//! router, which picks a handler by command tag. This trait is the
//! contract between the router and the handler logic.

use powd_core::CustomCommand;

/// A service answering one custom-command tag.
///
/// Intentionally minimal: one command in, at most one command out.
pub trait CommandHandler: Send + Sync {
    /// The command tag this handler is registered under.
    fn command(&self) -> &'static str;

    /// Handle an inbound command.
    ///
    /// Returns the reply to send back to the originator, or `None` when the
    /// command was not handled or there is nothing to send. Must not panic
    /// and must not block on anything but short store operations.
    fn handle(&self, request: &CustomCommand) -> Option<CustomCommand>;
}
