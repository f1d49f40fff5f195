//! Task Chat client.
//!
//! Keeps one conversation view per session in sync with three sources:
//! persisted history (REST), live pushes (WebSocket), and the user's own
//! optimistic sends. See [`controller::SessionController`] for the state
//! machine that ties them together.

pub mod api;
pub mod channel;
pub mod cli;
pub mod config;
pub mod controller;
pub mod history;

#[cfg(test)]
mod test_helpers;

pub use api::{ApiError, Backend, HttpBackend, SessionSummary};
pub use channel::{ChannelError, ChannelHandle, ChannelManager, Subscription};
pub use config::{ClientConfig, FileConfig, RuntimeOverrides};
pub use controller::{
    Applied, ControllerOptions, Event, SessionController, SessionState, Ticket, ValidationError,
};
pub use history::HistoryLoader;
