//! Ports between the Telegram handlers and the outside world.
//!
//! The handlers never touch `reqwest` directly: outbound messages go
//! through [`Messenger`] and AI calls through [`Generator`], so the whole
//! routing layer runs in tests against recording fakes.

use async_trait::async_trait;

use promobot_core::GenerationKind;

use crate::api::{BotApi, TransportError};

/// One inline keyboard button.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InlineButton {
    /// Visible label.
    pub label: String,
    /// Opaque payload returned in the callback query.
    pub callback_data: String,
}

impl InlineButton {
    /// Convenience constructor.
    #[must_use]
    pub fn new(label: impl Into<String>, callback_data: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            callback_data: callback_data.into(),
        }
    }
}

/// Outbound messaging port.
#[async_trait]
pub trait Messenger: Send + Sync {
    /// Send a plain text message to a chat.
    async fn send_text(&self, chat_id: i64, text: &str) -> Result<(), TransportError>;

    /// Send a message with an inline keyboard.
    async fn send_keyboard(
        &self,
        chat_id: i64,
        text: &str,
        buttons: Vec<Vec<InlineButton>>,
    ) -> Result<(), TransportError>;

    /// Acknowledge a callback query.
    async fn answer_callback(
        &self,
        callback_id: &str,
        text: Option<&str>,
    ) -> Result<(), TransportError>;
}

#[async_trait]
impl Messenger for BotApi {
    async fn send_text(&self, chat_id: i64, text: &str) -> Result<(), TransportError> {
        self.send_message(chat_id, text).await
    }

    async fn send_keyboard(
        &self,
        chat_id: i64,
        text: &str,
        buttons: Vec<Vec<InlineButton>>,
    ) -> Result<(), TransportError> {
        let rows: Vec<Vec<(String, String)>> = buttons
            .into_iter()
            .map(|row| {
                row.into_iter()
                    .map(|b| (b.label, b.callback_data))
                    .collect()
            })
            .collect();
        BotApi::send_keyboard(self, chat_id, text, &rows).await
    }

    async fn answer_callback(
        &self,
        callback_id: &str,
        text: Option<&str>,
    ) -> Result<(), TransportError> {
        self.answer_callback_query(callback_id, text).await
    }
}

/// A generation request handed to the AI backend.
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    /// Text or photo generation.
    pub kind: GenerationKind,
    /// Product category the copy is written for.
    pub category: String,
    /// User-supplied product details.
    pub prompt: String,
}

/// The AI backend's answer.
#[derive(Debug, Clone)]
pub struct GenerationOutput {
    /// Generated content (text, or a file reference for photos).
    pub content: String,
    /// Tokens consumed upstream.
    pub tokens_used: i64,
}

/// Error from the AI backend. Opaque to users; handlers log it and show
/// a generic failure message.
#[derive(Debug, thiserror::Error)]
#[error("generation failed: {0}")]
pub struct GeneratorError(pub String);

/// Port to the remote AI generation backend.
///
/// The backend enforces its own timeout; the ingestion loop places no
/// bound on a handler's generation call.
#[async_trait]
pub trait Generator: Send + Sync {
    /// Run one generation.
    async fn generate(&self, request: GenerationRequest)
        -> Result<GenerationOutput, GeneratorError>;
}
