//! User account types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::plan::LegacyLimits;

/// Upper bound applied when a rollback returns a credit to the pool.
///
/// The compensating update is `credits = min(credits + 1, CREDIT_CAP)`,
/// which keeps the statement total even if rollbacks are ever replayed.
/// The cap is far above any balance a real account can reach.
pub const CREDIT_CAP: i64 = 1_000_000;

/// A user identifier: the external (Telegram) numeric user id.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(pub i64);

impl UserId {
    /// Return the raw id.
    #[must_use]
    pub const fn as_i64(self) -> i64 {
        self.0
    }
}

impl fmt::Debug for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "UserId({})", self.0)
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for UserId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.parse().map(Self)
    }
}

impl From<i64> for UserId {
    fn from(id: i64) -> Self {
        Self(id)
    }
}

/// The kind of generation a credit pays for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GenerationKind {
    /// Text description generation.
    Text,
    /// Photo generation.
    Photo,
}

impl GenerationKind {
    /// Stable lowercase name, used in logs and stored records.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Photo => "photo",
        }
    }
}

impl fmt::Display for GenerationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A user row as held by the persistent store.
///
/// The store owns these rows exclusively; this struct is a snapshot for
/// display and availability checks, never a write-back vehicle. All
/// mutation goes through the ledger's atomic operations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    /// External (Telegram) user id, unique.
    pub external_id: UserId,

    /// Prepaid text generation credits. Never negative.
    pub text_credits: i64,

    /// Prepaid photo generation credits. Never negative.
    pub photo_credits: i64,

    /// Text generations consumed under the legacy plan-limit model.
    pub legacy_text_used: i64,

    /// Photo generations consumed under the legacy plan-limit model.
    pub legacy_photo_used: i64,

    /// Serialized conversation state tag, if a flow is in progress.
    pub conversation_state: Option<String>,

    /// When the user row was created.
    pub created_at: DateTime<Utc>,

    /// When the user row was last updated.
    pub updated_at: DateTime<Utc>,
}

impl User {
    /// Create a fresh user snapshot with empty balances.
    #[must_use]
    pub fn new(external_id: UserId) -> Self {
        let now = Utc::now();
        Self {
            external_id,
            text_credits: 0,
            photo_credits: 0,
            legacy_text_used: 0,
            legacy_photo_used: 0,
            conversation_state: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Pool balance for a generation kind.
    #[must_use]
    pub const fn credits(&self, kind: GenerationKind) -> i64 {
        match kind {
            GenerationKind::Text => self.text_credits,
            GenerationKind::Photo => self.photo_credits,
        }
    }

    /// Legacy usage counter for a generation kind.
    #[must_use]
    pub const fn legacy_used(&self, kind: GenerationKind) -> i64 {
        match kind {
            GenerationKind::Text => self.legacy_text_used,
            GenerationKind::Photo => self.legacy_photo_used,
        }
    }

    /// Whether a generation of `kind` can be paid for right now.
    ///
    /// True when the pool holds at least one credit, or the legacy counter
    /// is still under the plan limit. Callers must check this before
    /// reserving: `reserve` itself never refuses an existing user.
    #[must_use]
    pub fn has_available(&self, kind: GenerationKind, limits: &LegacyLimits) -> bool {
        self.credits(kind) > 0 || self.legacy_used(kind) < limits.limit(kind)
    }
}
