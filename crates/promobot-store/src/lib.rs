//! Storage layer for promobot.
//!
//! This crate provides the persistent store behind the credit ledger, the
//! webhook idempotency gate, and the conversation state store. The
//! production backend is PostgreSQL; an in-memory backend with the same
//! atomicity contract backs the test suites.
//!
//! # Concurrency contract
//!
//! Every mutating operation is a single atomic step against the storage
//! engine (one conditional `UPDATE`, or one transaction for the grant +
//! idempotency insert). No operation reads a row and writes it back, so
//! all operations are safe to call concurrently for the same user from
//! any number of processes.

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod error;
pub mod ledger;
pub mod memory;
pub mod postgres;
pub mod schema;

pub use error::{Result, StoreError};
pub use ledger::CreditLedger;
pub use memory::MemoryStore;
pub use postgres::PgStore;

use async_trait::async_trait;

use promobot_core::{
    ConversationState, GenerationId, GenerationKind, GenerationRecord, ProcessedEvent, User,
    UserId,
};

/// Which counter absorbed a credit reservation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReserveSource {
    /// A prepaid pool credit was consumed.
    Pool,
    /// The legacy usage counter was incremented.
    Counter,
}

/// The storage trait defining all database operations.
///
/// This trait abstracts the storage layer, allowing for different
/// implementations (PostgreSQL in production, in-memory for testing).
#[async_trait]
pub trait Store: Send + Sync {
    // =========================================================================
    // User Operations
    // =========================================================================

    /// Get a user by external id.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn get_user(&self, user_id: UserId) -> Result<Option<User>>;

    /// Insert a user row if absent and return the current row either way.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn ensure_user(&self, user_id: UserId) -> Result<User>;

    // =========================================================================
    // Ledger Operations
    // =========================================================================

    /// Reserve one credit of `kind`: conditionally decrement the pool,
    /// falling back to an unconditional increment of the legacy counter.
    ///
    /// Always succeeds for an existing user; callers pre-check
    /// availability. Single round trip, no read-then-write.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::NotFound` if the user row does not exist.
    async fn reserve_credit(&self, user_id: UserId, kind: GenerationKind)
        -> Result<ReserveSource>;

    /// Compensate a reservation: return one credit to the pool (capped)
    /// and decrement the legacy counter (floored at zero), as one
    /// unconditional statement.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails. Callers on
    /// cleanup paths go through [`CreditLedger::rollback`], which logs
    /// and swallows.
    async fn rollback_credit(&self, user_id: UserId, kind: GenerationKind) -> Result<()>;

    /// Grant credits and record the processed event in one transaction.
    ///
    /// The unique constraint on the event id is the authoritative
    /// duplicate signal: a violation aborts the transaction without
    /// re-applying the grant.
    ///
    /// # Errors
    ///
    /// - `StoreError::DuplicateEvent` if the event id was already recorded.
    /// - `StoreError::NotFound` if the user row does not exist.
    async fn grant_credits(
        &self,
        user_id: UserId,
        text_amount: i64,
        photo_amount: i64,
        event: &ProcessedEvent,
    ) -> Result<()>;

    // =========================================================================
    // Processed Event Operations (idempotency)
    // =========================================================================

    /// Look up a processed event by id.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn find_processed_event(&self, event_id: &str) -> Result<Option<ProcessedEvent>>;

    /// Record an event as processed without any credit mutation.
    ///
    /// Used for purchases that resolve to no plan: recording them stops
    /// the sender from redelivering forever.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::DuplicateEvent` if the event id was already
    /// recorded.
    async fn record_event(&self, event: &ProcessedEvent) -> Result<()>;

    // =========================================================================
    // Conversation State
    // =========================================================================

    /// Overwrite the user's conversation state (`None` clears it).
    ///
    /// # Errors
    ///
    /// Returns `StoreError::NotFound` if the user row does not exist.
    async fn set_conversation_state(
        &self,
        user_id: UserId,
        state: Option<&ConversationState>,
    ) -> Result<()>;

    // =========================================================================
    // Generations
    // =========================================================================

    /// Append a generation record. Records are never updated.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn insert_generation(&self, record: &GenerationRecord) -> Result<()>;

    /// Get a generation record by id.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn get_generation(&self, id: GenerationId) -> Result<Option<GenerationRecord>>;
}
