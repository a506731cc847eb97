//! PostgreSQL storage implementation.
//!
//! Every ledger operation maps to one SQL statement (or one transaction
//! for the grant + idempotency insert). The conditional `WHERE` clauses
//! are what keep the credit pools non-negative under concurrency; there is
//! no application-side locking anywhere in this module.

use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::Row;

use promobot_core::{
    ConversationState, GenerationId, GenerationKind, GenerationRecord, ProcessedEvent, User,
    UserId, CREDIT_CAP,
};

use crate::error::{Result, StoreError};
use crate::schema::MIGRATIONS;
use crate::{ReserveSource, Store};

/// PostgreSQL-backed storage implementation.
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    /// Connect to PostgreSQL and apply schema migrations.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection or a migration statement fails.
    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(database_url)
            .await?;

        for statement in MIGRATIONS {
            sqlx::query(statement).execute(&pool).await?;
        }

        Ok(Self { pool })
    }

    /// Wrap an existing pool (used when the caller manages migrations).
    #[must_use]
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    fn row_to_user(row: &PgRow) -> Result<User> {
        Ok(User {
            external_id: UserId(row.try_get("external_id")?),
            text_credits: row.try_get("text_credits")?,
            photo_credits: row.try_get("photo_credits")?,
            legacy_text_used: row.try_get("legacy_text_used")?,
            legacy_photo_used: row.try_get("legacy_photo_used")?,
            conversation_state: row.try_get("conversation_state")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }

    fn row_to_event(row: &PgRow) -> Result<ProcessedEvent> {
        let subject: Option<i64> = row.try_get("subject_user_id")?;
        Ok(ProcessedEvent {
            event_id: row.try_get("event_id")?,
            event_type: row.try_get("event_type")?,
            processed_at: row.try_get("processed_at")?,
            subject_user_id: subject.map(UserId),
            amount: row.try_get("amount")?,
        })
    }

    fn row_to_generation(row: &PgRow) -> Result<GenerationRecord> {
        let id: String = row.try_get("id")?;
        let kind: String = row.try_get("kind")?;
        Ok(GenerationRecord {
            id: id
                .parse()
                .map_err(|e| StoreError::Serialization(format!("generation id: {e}")))?,
            external_user_id: UserId(row.try_get("external_user_id")?),
            kind: match kind.as_str() {
                "photo" => GenerationKind::Photo,
                _ => GenerationKind::Text,
            },
            category: row.try_get("category")?,
            input: row.try_get("input")?,
            output: row.try_get("output")?,
            tokens_used: row.try_get("tokens_used")?,
            processing_ms: row.try_get("processing_ms")?,
            created_at: row.try_get("created_at")?,
        })
    }

    /// Map a sqlx error, surfacing unique violations on the idempotency
    /// insert as the duplicate signal.
    fn map_insert_err(err: sqlx::Error, event_id: &str) -> StoreError {
        if let sqlx::Error::Database(db) = &err {
            if db.is_unique_violation() {
                return StoreError::DuplicateEvent {
                    event_id: event_id.to_string(),
                };
            }
        }
        err.into()
    }
}

// Per-kind SQL. The kind selects a column, so the statements are fixed
// strings rather than anything built at runtime.

const RESERVE_POOL_TEXT: &str = "UPDATE users \
     SET text_credits = text_credits - 1, updated_at = NOW() \
     WHERE external_id = $1 AND text_credits > 0";

const RESERVE_POOL_PHOTO: &str = "UPDATE users \
     SET photo_credits = photo_credits - 1, updated_at = NOW() \
     WHERE external_id = $1 AND photo_credits > 0";

const RESERVE_COUNTER_TEXT: &str = "UPDATE users \
     SET legacy_text_used = legacy_text_used + 1, updated_at = NOW() \
     WHERE external_id = $1";

const RESERVE_COUNTER_PHOTO: &str = "UPDATE users \
     SET legacy_photo_used = legacy_photo_used + 1, updated_at = NOW() \
     WHERE external_id = $1";

const ROLLBACK_TEXT: &str = "UPDATE users \
     SET text_credits = LEAST(text_credits + 1, $2), \
         legacy_text_used = GREATEST(legacy_text_used - 1, 0), \
         updated_at = NOW() \
     WHERE external_id = $1";

const ROLLBACK_PHOTO: &str = "UPDATE users \
     SET photo_credits = LEAST(photo_credits + 1, $2), \
         legacy_photo_used = GREATEST(legacy_photo_used - 1, 0), \
         updated_at = NOW() \
     WHERE external_id = $1";

const fn reserve_pool_sql(kind: GenerationKind) -> &'static str {
    match kind {
        GenerationKind::Text => RESERVE_POOL_TEXT,
        GenerationKind::Photo => RESERVE_POOL_PHOTO,
    }
}

const fn reserve_counter_sql(kind: GenerationKind) -> &'static str {
    match kind {
        GenerationKind::Text => RESERVE_COUNTER_TEXT,
        GenerationKind::Photo => RESERVE_COUNTER_PHOTO,
    }
}

const fn rollback_sql(kind: GenerationKind) -> &'static str {
    match kind {
        GenerationKind::Text => ROLLBACK_TEXT,
        GenerationKind::Photo => ROLLBACK_PHOTO,
    }
}

#[async_trait::async_trait]
impl Store for PgStore {
    async fn get_user(&self, user_id: UserId) -> Result<Option<User>> {
        sqlx::query("SELECT * FROM users WHERE external_id = $1")
            .bind(user_id.as_i64())
            .fetch_optional(&self.pool)
            .await?
            .as_ref()
            .map(Self::row_to_user)
            .transpose()
    }

    async fn ensure_user(&self, user_id: UserId) -> Result<User> {
        sqlx::query("INSERT INTO users (external_id) VALUES ($1) ON CONFLICT (external_id) DO NOTHING")
            .bind(user_id.as_i64())
            .execute(&self.pool)
            .await?;

        self.get_user(user_id)
            .await?
            .ok_or_else(|| StoreError::user_not_found(user_id))
    }

    async fn reserve_credit(
        &self,
        user_id: UserId,
        kind: GenerationKind,
    ) -> Result<ReserveSource> {
        let from_pool = sqlx::query(reserve_pool_sql(kind))
            .bind(user_id.as_i64())
            .execute(&self.pool)
            .await?;

        if from_pool.rows_affected() > 0 {
            return Ok(ReserveSource::Pool);
        }

        // Empty pool: charge the legacy counter unconditionally. The
        // availability pre-check is the caller's responsibility.
        let from_counter = sqlx::query(reserve_counter_sql(kind))
            .bind(user_id.as_i64())
            .execute(&self.pool)
            .await?;

        if from_counter.rows_affected() == 0 {
            return Err(StoreError::user_not_found(user_id));
        }

        Ok(ReserveSource::Counter)
    }

    async fn rollback_credit(&self, user_id: UserId, kind: GenerationKind) -> Result<()> {
        sqlx::query(rollback_sql(kind))
            .bind(user_id.as_i64())
            .bind(CREDIT_CAP)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn grant_credits(
        &self,
        user_id: UserId,
        text_amount: i64,
        photo_amount: i64,
        event: &ProcessedEvent,
    ) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        // The idempotency insert goes first: a unique violation aborts the
        // transaction before any credit moves.
        sqlx::query(
            "INSERT INTO processed_events \
                 (event_id, event_type, processed_at, subject_user_id, amount) \
             VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(&event.event_id)
        .bind(&event.event_type)
        .bind(event.processed_at)
        .bind(event.subject_user_id.map(UserId::as_i64))
        .bind(event.amount)
        .execute(&mut *tx)
        .await
        .map_err(|e| Self::map_insert_err(e, &event.event_id))?;

        let granted = sqlx::query(
            "UPDATE users \
             SET text_credits = text_credits + $2, \
                 photo_credits = photo_credits + $3, \
                 updated_at = NOW() \
             WHERE external_id = $1",
        )
        .bind(user_id.as_i64())
        .bind(text_amount)
        .bind(photo_amount)
        .execute(&mut *tx)
        .await?;

        if granted.rows_affected() == 0 {
            return Err(StoreError::user_not_found(user_id));
        }

        tx.commit().await?;
        Ok(())
    }

    async fn find_processed_event(&self, event_id: &str) -> Result<Option<ProcessedEvent>> {
        sqlx::query("SELECT * FROM processed_events WHERE event_id = $1")
            .bind(event_id)
            .fetch_optional(&self.pool)
            .await?
            .as_ref()
            .map(Self::row_to_event)
            .transpose()
    }

    async fn record_event(&self, event: &ProcessedEvent) -> Result<()> {
        sqlx::query(
            "INSERT INTO processed_events \
                 (event_id, event_type, processed_at, subject_user_id, amount) \
             VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(&event.event_id)
        .bind(&event.event_type)
        .bind(event.processed_at)
        .bind(event.subject_user_id.map(UserId::as_i64))
        .bind(event.amount)
        .execute(&self.pool)
        .await
        .map_err(|e| Self::map_insert_err(e, &event.event_id))?;
        Ok(())
    }

    async fn set_conversation_state(
        &self,
        user_id: UserId,
        state: Option<&ConversationState>,
    ) -> Result<()> {
        let updated = sqlx::query(
            "UPDATE users SET conversation_state = $2, updated_at = NOW() \
             WHERE external_id = $1",
        )
        .bind(user_id.as_i64())
        .bind(state.map(ConversationState::encode))
        .execute(&self.pool)
        .await?;

        if updated.rows_affected() == 0 {
            return Err(StoreError::user_not_found(user_id));
        }
        Ok(())
    }

    async fn insert_generation(&self, record: &GenerationRecord) -> Result<()> {
        sqlx::query(
            "INSERT INTO generations \
                 (id, external_user_id, kind, category, input, output, \
                  tokens_used, processing_ms, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)",
        )
        .bind(record.id.to_string())
        .bind(record.external_user_id.as_i64())
        .bind(record.kind.as_str())
        .bind(&record.category)
        .bind(&record.input)
        .bind(&record.output)
        .bind(record.tokens_used)
        .bind(record.processing_ms)
        .bind(record.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_generation(&self, id: GenerationId) -> Result<Option<GenerationRecord>> {
        sqlx::query("SELECT * FROM generations WHERE id = $1")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?
            .as_ref()
            .map(Self::row_to_generation)
            .transpose()
    }
}
