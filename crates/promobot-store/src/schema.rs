//! Database schema definitions.
//!
//! Plain SQL, applied at startup. Three tables:
//!
//! - `users`: one row per external user id, holding the credit pools, the
//!   legacy usage counters, and the conversation state tag.
//! - `processed_events`: idempotency log, unique on `event_id`. The unique
//!   constraint is the correctness backstop for webhook redelivery.
//! - `generations`: append-only generation log.

/// DDL statements in application order.
pub const MIGRATIONS: &[&str] = &[
    r"
    CREATE TABLE IF NOT EXISTS users (
        external_id      BIGINT PRIMARY KEY,
        text_credits     BIGINT NOT NULL DEFAULT 0,
        photo_credits    BIGINT NOT NULL DEFAULT 0,
        legacy_text_used  BIGINT NOT NULL DEFAULT 0,
        legacy_photo_used BIGINT NOT NULL DEFAULT 0,
        conversation_state TEXT,
        created_at       TIMESTAMPTZ NOT NULL DEFAULT NOW(),
        updated_at       TIMESTAMPTZ NOT NULL DEFAULT NOW()
    )
    ",
    r"
    CREATE TABLE IF NOT EXISTS processed_events (
        event_id        TEXT PRIMARY KEY,
        event_type      TEXT NOT NULL,
        processed_at    TIMESTAMPTZ NOT NULL DEFAULT NOW(),
        subject_user_id BIGINT,
        amount          BIGINT
    )
    ",
    r"
    CREATE TABLE IF NOT EXISTS generations (
        id              TEXT PRIMARY KEY,
        external_user_id BIGINT NOT NULL,
        kind            TEXT NOT NULL,
        category        TEXT NOT NULL,
        input           TEXT NOT NULL,
        output          TEXT NOT NULL,
        tokens_used     BIGINT NOT NULL DEFAULT 0,
        processing_ms   BIGINT NOT NULL DEFAULT 0,
        created_at      TIMESTAMPTZ NOT NULL DEFAULT NOW()
    )
    ",
    r"
    CREATE INDEX IF NOT EXISTS generations_by_user
        ON generations (external_user_id, created_at)
    ",
];
