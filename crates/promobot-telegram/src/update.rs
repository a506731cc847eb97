//! Wire types for inbound Telegram updates.
//!
//! Only the fields the handlers consume are modeled; unknown fields are
//! ignored on deserialization.

use serde::{Deserialize, Serialize};

/// One inbound update from the Bot API.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Update {
    /// Monotonically increasing update id; the poll cursor is derived
    /// from the highest id in a completed batch.
    pub update_id: i64,

    /// Present for message updates.
    pub message: Option<Message>,

    /// Present for inline keyboard button presses.
    pub callback_query: Option<CallbackQuery>,
}

/// An inbound message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    /// Message id within the chat.
    pub message_id: i64,

    /// The sender, absent for channel posts.
    pub from: Option<TgUser>,

    /// The chat the message arrived in.
    pub chat: Chat,

    /// Text content, if any.
    pub text: Option<String>,

    /// Photo sizes, present for photo messages.
    pub photo: Option<Vec<PhotoSize>>,

    /// Caption accompanying a photo.
    pub caption: Option<String>,
}

/// A chat reference.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chat {
    /// Chat id. Equals the user id for private chats.
    pub id: i64,
}

/// A Telegram user.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TgUser {
    /// Numeric user id.
    pub id: i64,

    /// Username, if the user has one.
    pub username: Option<String>,
}

/// One photo resolution entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhotoSize {
    /// File id usable with the Bot API file methods.
    pub file_id: String,

    /// Width in pixels.
    pub width: i64,

    /// Height in pixels.
    pub height: i64,
}

/// An inline keyboard button press.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallbackQuery {
    /// Callback query id, required for the acknowledgement call.
    pub id: String,

    /// The pressing user.
    pub from: TgUser,

    /// The message the keyboard was attached to.
    pub message: Option<Message>,

    /// Opaque payload set when the keyboard was sent.
    pub data: Option<String>,
}

impl Update {
    /// The external user id responsible for this update, if resolvable.
    #[must_use]
    pub fn user_id(&self) -> Option<i64> {
        if let Some(msg) = &self.message {
            return msg.from.as_ref().map(|u| u.id).or(Some(msg.chat.id));
        }
        self.callback_query.as_ref().map(|q| q.from.id)
    }
}
