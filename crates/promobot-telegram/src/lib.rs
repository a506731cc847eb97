//! Telegram adapter for promobot.
//!
//! This crate owns everything between the Telegram Bot API and the
//! domain: the HTTP client, the wire types for updates, the long-poll
//! ingestion loop, and the per-update handlers. The domain side is
//! reached only through ports ([`Messenger`], [`Generator`]), so the
//! handlers are testable without any network.

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod api;
pub mod handlers;
pub mod poller;
pub mod ports;
pub mod update;

pub use api::{BotApi, TransportError};
pub use handlers::Router;
pub use poller::{BackoffPolicy, Poller, PollerState, UpdateHandler, UpdateSource};
pub use ports::{
    GenerationOutput, GenerationRequest, Generator, GeneratorError, InlineButton, Messenger,
};
pub use update::{CallbackQuery, Chat, Message, PhotoSize, TgUser, Update};
