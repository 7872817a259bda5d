/// Inbox core - conversation building for a DIDComm messaging client
///
/// Turns the daemon's flat message list into per-peer conversations and
/// pending call invitations, and keeps a cached view that mutations invalidate.

pub mod error;
pub mod config;
pub mod message;
pub mod conversation;
pub mod message_store;
pub mod inbox;
pub mod cli_app;

pub use error::{InboxError, Result};
pub use config::Config;
pub use conversation::{Builder, Conversation, InboxView};
pub use inbox::{Inbox, MessageSource};
pub use message::{Identity, Message};
