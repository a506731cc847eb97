//! Core types for the promobot credit system.
//!
//! This crate provides the foundational types shared by the storage layer,
//! the Telegram adapter, and the service binary:
//!
//! - **Users**: [`User`], [`UserId`], [`GenerationKind`]
//! - **Plans**: [`Plan`], [`PlanCatalog`], [`LegacyLimits`]
//! - **Payments**: [`NormalizedEvent`], [`ProcessedEvent`]
//! - **Generations**: [`GenerationRecord`], [`GenerationId`]
//! - **Conversation**: [`ConversationState`]
//!
//! # Credit model
//!
//! Each user carries two pooled, prepaid balances (`text_credits`,
//! `photo_credits`) plus a pair of legacy usage counters from the
//! plan-limit era. A reservation always drains the pool first and only
//! then falls back to the counter; both balances must never go negative,
//! which the storage layer enforces with conditional updates.

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod conversation;
pub mod event;
pub mod generation;
pub mod plan;
pub mod user;

pub use conversation::ConversationState;
pub use event::{NormalizedEvent, ProcessedEvent};
pub use generation::{GenerationId, GenerationRecord};
pub use plan::{LegacyLimits, Plan, PlanCatalog};
pub use user::{GenerationKind, User, UserId, CREDIT_CAP};
