//! In-memory storage implementation.
//!
//! Backs the test suites and local development. One mutex guards all
//! tables; each trait method takes it exactly once for the whole
//! operation, which reproduces the atomicity the PostgreSQL backend gets
//! from single statements and transactions.

use std::collections::HashMap;
use std::sync::Mutex;

use chrono::Utc;

use promobot_core::{
    ConversationState, GenerationId, GenerationKind, GenerationRecord, ProcessedEvent, User,
    UserId, CREDIT_CAP,
};

use crate::error::{Result, StoreError};
use crate::{ReserveSource, Store};

#[derive(Default)]
struct Inner {
    users: HashMap<i64, User>,
    events: HashMap<String, ProcessedEvent>,
    generations: HashMap<String, GenerationRecord>,
}

/// In-memory storage implementation.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        // A poisoned lock means a panicked test thread; propagating the
        // panic is the right outcome there.
        self.inner.lock().expect("memory store lock poisoned")
    }
}

fn credits_mut(user: &mut User, kind: GenerationKind) -> &mut i64 {
    match kind {
        GenerationKind::Text => &mut user.text_credits,
        GenerationKind::Photo => &mut user.photo_credits,
    }
}

fn legacy_mut(user: &mut User, kind: GenerationKind) -> &mut i64 {
    match kind {
        GenerationKind::Text => &mut user.legacy_text_used,
        GenerationKind::Photo => &mut user.legacy_photo_used,
    }
}

#[async_trait::async_trait]
impl Store for MemoryStore {
    async fn get_user(&self, user_id: UserId) -> Result<Option<User>> {
        Ok(self.lock().users.get(&user_id.as_i64()).cloned())
    }

    async fn ensure_user(&self, user_id: UserId) -> Result<User> {
        let mut inner = self.lock();
        let user = inner
            .users
            .entry(user_id.as_i64())
            .or_insert_with(|| User::new(user_id));
        Ok(user.clone())
    }

    async fn reserve_credit(
        &self,
        user_id: UserId,
        kind: GenerationKind,
    ) -> Result<ReserveSource> {
        let mut inner = self.lock();
        let user = inner
            .users
            .get_mut(&user_id.as_i64())
            .ok_or_else(|| StoreError::user_not_found(user_id))?;

        let pool = credits_mut(user, kind);
        if *pool > 0 {
            *pool -= 1;
            user.updated_at = Utc::now();
            return Ok(ReserveSource::Pool);
        }

        *legacy_mut(user, kind) += 1;
        user.updated_at = Utc::now();
        Ok(ReserveSource::Counter)
    }

    async fn rollback_credit(&self, user_id: UserId, kind: GenerationKind) -> Result<()> {
        let mut inner = self.lock();
        if let Some(user) = inner.users.get_mut(&user_id.as_i64()) {
            let pool = credits_mut(user, kind);
            *pool = (*pool + 1).min(CREDIT_CAP);
            let legacy = legacy_mut(user, kind);
            *legacy = (*legacy - 1).max(0);
            user.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn grant_credits(
        &self,
        user_id: UserId,
        text_amount: i64,
        photo_amount: i64,
        event: &ProcessedEvent,
    ) -> Result<()> {
        let mut inner = self.lock();

        if inner.events.contains_key(&event.event_id) {
            return Err(StoreError::DuplicateEvent {
                event_id: event.event_id.clone(),
            });
        }

        let user = inner
            .users
            .get_mut(&user_id.as_i64())
            .ok_or_else(|| StoreError::user_not_found(user_id))?;
        user.text_credits += text_amount;
        user.photo_credits += photo_amount;
        user.updated_at = Utc::now();

        inner.events.insert(event.event_id.clone(), event.clone());
        Ok(())
    }

    async fn find_processed_event(&self, event_id: &str) -> Result<Option<ProcessedEvent>> {
        Ok(self.lock().events.get(event_id).cloned())
    }

    async fn record_event(&self, event: &ProcessedEvent) -> Result<()> {
        let mut inner = self.lock();
        if inner.events.contains_key(&event.event_id) {
            return Err(StoreError::DuplicateEvent {
                event_id: event.event_id.clone(),
            });
        }
        inner.events.insert(event.event_id.clone(), event.clone());
        Ok(())
    }

    async fn set_conversation_state(
        &self,
        user_id: UserId,
        state: Option<&ConversationState>,
    ) -> Result<()> {
        let mut inner = self.lock();
        let user = inner
            .users
            .get_mut(&user_id.as_i64())
            .ok_or_else(|| StoreError::user_not_found(user_id))?;
        user.conversation_state = state.map(ConversationState::encode);
        user.updated_at = Utc::now();
        Ok(())
    }

    async fn insert_generation(&self, record: &GenerationRecord) -> Result<()> {
        self.lock()
            .generations
            .insert(record.id.to_string(), record.clone());
        Ok(())
    }

    async fn get_generation(&self, id: GenerationId) -> Result<Option<GenerationRecord>> {
        Ok(self.lock().generations.get(&id.to_string()).cloned())
    }
}
