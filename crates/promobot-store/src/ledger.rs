//! The credit ledger.
//!
//! A thin facade over [`Store`] that owns the ledger's error posture:
//! `reserve` and `grant` surface storage errors to their callers, while
//! `rollback` is strictly best-effort. Rollback runs on failure-cleanup
//! paths where a second failure must not mask the first, so its errors
//! are logged and swallowed here, never propagated.

use std::sync::Arc;

use promobot_core::{GenerationKind, ProcessedEvent, UserId};

use crate::error::Result;
use crate::{ReserveSource, Store};

/// Authoritative balance mutator for user credits.
#[derive(Clone)]
pub struct CreditLedger {
    store: Arc<dyn Store>,
}

impl CreditLedger {
    /// Create a ledger over a store.
    #[must_use]
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// Reserve one credit of `kind` for a user.
    ///
    /// Decides which counter absorbs the charge; it does not enforce "no
    /// credits left". Callers pre-check availability via
    /// [`promobot_core::User::has_available`].
    ///
    /// # Errors
    ///
    /// Returns `StoreError::NotFound` if the user row does not exist, or
    /// a database error.
    pub async fn reserve(&self, user_id: UserId, kind: GenerationKind) -> Result<ReserveSource> {
        let source = self.store.reserve_credit(user_id, kind).await?;
        tracing::debug!(user_id = %user_id, kind = %kind, source = ?source, "credit reserved");
        Ok(source)
    }

    /// Compensate a reservation. Best-effort: never fails past this call.
    pub async fn rollback(&self, user_id: UserId, kind: GenerationKind) {
        if let Err(e) = self.store.rollback_credit(user_id, kind).await {
            // A stale balance is preferable to crashing a cleanup path.
            tracing::warn!(
                user_id = %user_id,
                kind = %kind,
                error = %e,
                "credit rollback failed"
            );
        }
    }

    /// Grant purchased credits, atomically with the idempotency record.
    ///
    /// # Errors
    ///
    /// - `StoreError::DuplicateEvent` if the event was already processed.
    /// - `StoreError::NotFound` if the user row does not exist.
    pub async fn grant(
        &self,
        user_id: UserId,
        text_amount: i64,
        photo_amount: i64,
        event: &ProcessedEvent,
    ) -> Result<()> {
        self.store
            .grant_credits(user_id, text_amount, photo_amount, event)
            .await?;
        tracing::info!(
            user_id = %user_id,
            text_amount,
            photo_amount,
            event_id = %event.event_id,
            "credits granted"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MemoryStore;
    use chrono::Utc;

    fn ledger() -> (CreditLedger, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        (CreditLedger::new(Arc::clone(&store) as Arc<dyn Store>), store)
    }

    #[tokio::test]
    async fn rollback_on_missing_user_is_swallowed() {
        let (ledger, _) = ledger();
        // Must not panic or surface an error.
        ledger.rollback(UserId(404), GenerationKind::Text).await;
    }

    #[tokio::test]
    async fn reserve_reports_the_absorbing_counter() {
        let (ledger, store) = ledger();
        store.ensure_user(UserId(5)).await.unwrap();

        let event = ProcessedEvent {
            event_id: "e1".into(),
            event_type: "payment.succeeded".into(),
            processed_at: Utc::now(),
            subject_user_id: Some(UserId(5)),
            amount: None,
        };
        ledger.grant(UserId(5), 1, 0, &event).await.unwrap();

        assert_eq!(
            ledger.reserve(UserId(5), GenerationKind::Text).await.unwrap(),
            ReserveSource::Pool
        );
        assert_eq!(
            ledger.reserve(UserId(5), GenerationKind::Text).await.unwrap(),
            ReserveSource::Counter
        );
    }
}
