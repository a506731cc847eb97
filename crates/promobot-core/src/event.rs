//! Payment event types.
//!
//! Inbound payment notifications are normalized into a source-agnostic
//! [`NormalizedEvent`] before any processing. The normalized id is the
//! idempotency key: a redelivery of the same logical purchase must map to
//! the same id, and two distinct purchases must never collide.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::user::UserId;

/// A source-agnostic payment notification.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NormalizedEvent {
    /// Idempotency key. Either the provider's native event id or a
    /// deterministically derived one (see [`NormalizedEvent::derived_id`]).
    pub id: String,

    /// Provider event name, kept for the audit trail.
    pub event_type: String,

    /// The purchasing user's external id.
    pub subject_user_id: UserId,

    /// The provider product id, when present.
    pub product_id: Option<i64>,

    /// Paid amount in minor currency units, when present.
    pub amount: Option<i64>,

    /// ISO currency code, when present.
    pub currency: Option<String>,
}

impl NormalizedEvent {
    /// Derive a deterministic event id for providers that send none.
    ///
    /// Built from the purchase's identifying triple so every redelivery of
    /// one logical purchase maps to the same id. A user cannot complete
    /// two purchases of the same product within the same second, so the
    /// triple never collides across distinct purchases.
    #[must_use]
    pub fn derived_id(
        product_id: Option<i64>,
        subject_user_id: UserId,
        created_at: DateTime<Utc>,
    ) -> String {
        format!(
            "dp_{}_{}_{}",
            product_id.unwrap_or(0),
            subject_user_id,
            created_at.timestamp()
        )
    }
}

/// A processed payment event, recorded for idempotency.
///
/// Created at most once per event id; the unique constraint on the id is
/// the authoritative duplicate signal, independent of any prior lookup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessedEvent {
    /// The idempotency key.
    pub event_id: String,

    /// Provider event name.
    pub event_type: String,

    /// When the event was processed.
    pub processed_at: DateTime<Utc>,

    /// The credited user, when the event mapped to one.
    pub subject_user_id: Option<UserId>,

    /// Paid amount in minor currency units, when known.
    pub amount: Option<i64>,
}
