//! # Task Conversations
//!
//! Canonical conversation model for Task Chat, independent of any transport.
//!
//! ## Overview
//!
//! Messages reach the client from three places: persisted history rows,
//! push events on the duplex channel, and drafts the local user is sending.
//! Each uses its own shape. This library provides:
//! - The canonical [`Message`] / [`Session`] types
//! - [`normalize`], which reduces any accepted wire shape to a [`Message`]
//! - [`ConversationStore`], the ordered per-session message list plus its
//!   loading, typing, and error flags
//!
//! ## Quick Start
//!
//! ```rust
//! use serde_json::json;
//! use task_convo::{ConversationStore, NormalizeContext, Role, SessionId, normalize_all};
//!
//! let session = SessionId::from("s1");
//! let ctx = NormalizeContext::default().for_session(&session);
//!
//! let rows = vec![
//!     json!({ "message": { "type": "human", "content": "hi" } }),
//!     json!("hello!"),
//!     json!({ "message": "" }),
//! ];
//! let history = normalize_all(&rows, &ctx);
//! assert_eq!(history.len(), 2);
//! assert_eq!(history[0].role, Role::User);
//!
//! let mut store = ConversationStore::new();
//! store.reset(Some(session.clone()));
//! store.begin_load();
//! assert!(store.seed(&session, history));
//! assert_eq!(store.len(), 2);
//! ```

pub mod error;
pub mod normalize;
pub mod store;
pub mod types;

pub use error::Rejection;
pub use normalize::{DEFAULT_DISPLAY_NAME, NormalizeContext, normalize, normalize_all};
pub use store::ConversationStore;
pub use types::{Message, OutgoingEnvelope, Role, Session, SessionId};
