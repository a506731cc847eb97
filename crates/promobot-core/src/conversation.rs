//! Per-user conversation state.
//!
//! Exactly one optional state is stored per user, indicating which flow
//! owns that user's next free-text message. Setting a new state overwrites
//! any prior one; there is no stack and no expiry, so an abandoned flow
//! leaves its state behind until the next overwrite or clear.

use serde::{Deserialize, Serialize};

use crate::generation::GenerationId;

/// The flow waiting on a user's next message, if any.
///
/// Stored structurally (JSON) in the user row. Absence of a row value, or
/// a value that fails to decode, both mean "no active state" — decoding is
/// deliberately infallible so a stale or foreign tag can never wedge a
/// user's message handling.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ConversationState {
    /// Waiting for the user to type a custom product category.
    AwaitingCustomCategory,

    /// Waiting for improvement instructions bound to an earlier generation.
    AwaitingImprovement {
        /// The generation to improve.
        generation_id: GenerationId,
    },

    /// Waiting for a 1-5 feedback rating.
    AwaitingFeedbackRating,

    /// Waiting for a free-text feedback comment bound to a rating.
    AwaitingFeedbackComment {
        /// The rating the comment belongs to.
        rating: u8,
    },
}

impl ConversationState {
    /// Serialize for storage in the user row.
    #[must_use]
    pub fn encode(&self) -> String {
        // Infallible: the enum contains only JSON-representable data.
        serde_json::to_string(self).unwrap_or_default()
    }

    /// Decode a stored tag. Anything unreadable is no active state.
    #[must_use]
    pub fn decode(stored: Option<&str>) -> Option<Self> {
        stored.and_then(|s| serde_json::from_str(s).ok())
    }
}
