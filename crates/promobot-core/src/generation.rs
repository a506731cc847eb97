//! Generation records.
//!
//! Every completed generation is appended to the `generations` log. Rows
//! are never mutated; later "improve" flows read them back by id.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use ulid::Ulid;

use crate::user::{GenerationKind, UserId};

/// A generation record identifier, time-ordered (ULID).
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GenerationId(Ulid);

impl GenerationId {
    /// Generate a new id for the current instant.
    #[must_use]
    pub fn generate() -> Self {
        Self(Ulid::new())
    }
}

impl FromStr for GenerationId {
    type Err = ulid::DecodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ulid::from_string(s).map(Self)
    }
}

impl fmt::Debug for GenerationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "GenerationId({})", self.0)
    }
}

impl fmt::Display for GenerationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// An append-only log entry for one completed generation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationRecord {
    /// Record id.
    pub id: GenerationId,

    /// The user the generation belongs to.
    pub external_user_id: UserId,

    /// Generation kind (text or photo).
    pub kind: GenerationKind,

    /// Product category the generation was made for.
    pub category: String,

    /// The user-supplied input.
    pub input: String,

    /// The generated output (text, or a file reference for photos).
    pub output: String,

    /// Tokens consumed by the upstream model.
    pub tokens_used: i64,

    /// Wall-clock processing time in milliseconds.
    pub processing_ms: i64,

    /// When the record was created.
    pub created_at: DateTime<Utc>,
}

impl GenerationRecord {
    /// Create a record for a generation that just finished.
    #[must_use]
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        external_user_id: UserId,
        kind: GenerationKind,
        category: String,
        input: String,
        output: String,
        tokens_used: i64,
        processing_ms: i64,
    ) -> Self {
        Self {
            id: GenerationId::generate(),
            external_user_id,
            kind,
            category,
            input,
            output,
            tokens_used,
            processing_ms,
            created_at: Utc::now(),
        }
    }
}
