//! Payment webhook endpoint and its idempotency gate.
//!
//! Every inbound notification is normalized, deduplicated by event id,
//! matched against the plan catalog, and only then credited. The grant
//! and the processed-event record commit in one transaction; the unique
//! constraint on the event id is the authoritative duplicate signal, not
//! the preceding lookup. Duplicates and unmappable purchases are both
//! successful outcomes here: a `400` is reserved for structurally invalid
//! bodies, so the sender is never driven into a retry storm.

use std::sync::Arc;

use axum::extract::State;
use axum::Json;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use promobot_core::{NormalizedEvent, Plan, ProcessedEvent, UserId};
use promobot_store::StoreError;
use promobot_telegram::Messenger;

use crate::error::ApiError;
use crate::state::AppState;

/// Raw payment notification body.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentWebhook {
    /// Provider event name.
    pub event_name: String,

    /// Provider event id, absent for providers that send none.
    #[serde(default)]
    pub event_id: Option<String>,

    /// When the purchase happened.
    pub created_at: DateTime<Utc>,

    /// When the notification was sent, if reported.
    #[serde(default)]
    pub sent_at: Option<DateTime<Utc>>,

    /// Purchase details.
    pub payload: PaymentPayload,
}

/// Purchase details within a payment notification.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentPayload {
    /// Provider product id, when present.
    #[serde(default)]
    pub product_id: Option<i64>,

    /// Paid amount in minor currency units, when present.
    #[serde(default)]
    pub amount: Option<i64>,

    /// ISO currency code, when present.
    #[serde(default)]
    pub currency: Option<String>,

    /// Provider-internal user id, unused for crediting.
    #[serde(default)]
    pub user_id: Option<i64>,

    /// The purchasing user's external (Telegram) id.
    pub external_user_id: i64,
}

/// How the gate disposed of a notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WebhookOutcome {
    /// Credits were granted for this event.
    Processed,
    /// The event id was seen before; nothing changed.
    Duplicate,
    /// No plan matched; the event was recorded without a grant.
    PlanNotIdentified,
}

/// Webhook response body.
#[derive(Debug, Serialize)]
pub struct WebhookResponse {
    /// Disposition of the event.
    pub status: WebhookOutcome,
}

/// Handle a payment notification.
///
/// The body is taken as a raw string so a malformed payload maps to a
/// `400` regardless of content type quirks.
///
/// # Errors
///
/// `ApiError::BadRequest` for unparseable bodies, `ApiError::Internal`
/// for storage failures.
pub async fn payment_webhook(
    State(state): State<Arc<AppState>>,
    body: String,
) -> Result<Json<WebhookResponse>, ApiError> {
    let webhook: PaymentWebhook =
        serde_json::from_str(&body).map_err(|e| ApiError::BadRequest(e.to_string()))?;

    let event = normalize(&webhook);
    tracing::info!(
        event_id = %event.id,
        event_type = %event.event_type,
        user_id = %event.subject_user_id,
        product_id = ?event.product_id,
        amount = ?event.amount,
        "Received payment webhook"
    );

    let outcome = process(&state, &event).await?;
    Ok(Json(WebhookResponse { status: outcome }))
}

/// Normalize a raw notification into the source-agnostic event shape.
#[must_use]
pub fn normalize(webhook: &PaymentWebhook) -> NormalizedEvent {
    let subject = UserId(webhook.payload.external_user_id);
    let id = webhook.event_id.clone().unwrap_or_else(|| {
        NormalizedEvent::derived_id(webhook.payload.product_id, subject, webhook.created_at)
    });
    NormalizedEvent {
        id,
        event_type: webhook.event_name.clone(),
        subject_user_id: subject,
        product_id: webhook.payload.product_id,
        amount: webhook.payload.amount,
        currency: webhook.payload.currency.clone(),
    }
}

/// Run a normalized event through the idempotency gate.
///
/// # Errors
///
/// Returns `ApiError::Internal` when storage fails mid-gate.
pub async fn process(state: &AppState, event: &NormalizedEvent) -> Result<WebhookOutcome, ApiError> {
    // Fast-path dedupe. Not authoritative: two concurrent deliveries can
    // both pass this lookup, and the insert below settles it.
    if state.store.find_processed_event(&event.id).await?.is_some() {
        tracing::info!(event_id = %event.id, "duplicate payment event, skipping");
        return Ok(WebhookOutcome::Duplicate);
    }

    let Some(plan) = state.catalog.resolve(event.product_id, event.amount) else {
        return record_unidentified(state, event).await;
    };
    let plan = plan.clone();

    // The gate credits whoever the provider names, even a user the bot
    // has never spoken to.
    state.store.ensure_user(event.subject_user_id).await?;

    let record = ProcessedEvent {
        event_id: event.id.clone(),
        event_type: event.event_type.clone(),
        processed_at: Utc::now(),
        subject_user_id: Some(event.subject_user_id),
        amount: event.amount,
    };

    match state
        .ledger
        .grant(
            event.subject_user_id,
            plan.text_credit_grant,
            plan.photo_credit_grant,
            &record,
        )
        .await
    {
        Ok(()) => {
            notify_purchase(state, event.subject_user_id, &plan);
            Ok(WebhookOutcome::Processed)
        }
        Err(StoreError::DuplicateEvent { event_id }) => {
            tracing::info!(event_id = %event_id, "lost the insert race, treating as duplicate");
            Ok(WebhookOutcome::Duplicate)
        }
        Err(e) => Err(e.into()),
    }
}

/// Record a purchase that matched no plan.
///
/// Recording it as processed stops the sender from redelivering forever;
/// the missing grant stays visible in the audit trail.
async fn record_unidentified(
    state: &AppState,
    event: &NormalizedEvent,
) -> Result<WebhookOutcome, ApiError> {
    tracing::warn!(
        event_id = %event.id,
        user_id = %event.subject_user_id,
        product_id = ?event.product_id,
        amount = ?event.amount,
        "purchase matched no plan, recording without a grant"
    );
    let record = ProcessedEvent {
        event_id: event.id.clone(),
        event_type: event.event_type.clone(),
        processed_at: Utc::now(),
        subject_user_id: Some(event.subject_user_id),
        amount: event.amount,
    };
    match state.store.record_event(&record).await {
        Ok(()) => Ok(WebhookOutcome::PlanNotIdentified),
        Err(StoreError::DuplicateEvent { .. }) => Ok(WebhookOutcome::Duplicate),
        Err(e) => Err(e.into()),
    }
}

/// Tell the user their credits arrived. Fire-and-forget after commit:
/// a delivery failure never touches the grant.
fn notify_purchase(state: &AppState, user_id: UserId, plan: &Plan) {
    let messenger = Arc::clone(&state.messenger);
    let text = format!(
        "Payment received! {} text and {} photo credits were added to your balance.",
        plan.text_credit_grant, plan.photo_credit_grant
    );
    tokio::spawn(async move {
        if let Err(e) = messenger.send_text(user_id.as_i64(), &text).await {
            tracing::warn!(user_id = %user_id, error = %e, "purchase notification failed");
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn webhook_json(body: serde_json::Value) -> PaymentWebhook {
        serde_json::from_value(body).unwrap()
    }

    #[test]
    fn normalize_prefers_the_native_event_id() {
        let webhook = webhook_json(serde_json::json!({
            "eventName": "payment.succeeded",
            "eventId": "evt_42",
            "createdAt": "2024-01-01T00:00:00Z",
            "payload": {"productId": 101, "amount": 14_900, "externalUserId": 555}
        }));

        let event = normalize(&webhook);
        assert_eq!(event.id, "evt_42");
        assert_eq!(event.subject_user_id, UserId(555));
    }

    #[test]
    fn normalize_derives_an_id_when_none_is_sent() {
        let created = Utc.timestamp_opt(83_187, 0).unwrap();
        let webhook = webhook_json(serde_json::json!({
            "eventName": "payment.succeeded",
            "createdAt": created.to_rfc3339(),
            "payload": {"productId": 123, "externalUserId": 555}
        }));

        let event = normalize(&webhook);
        assert_eq!(event.id, "dp_123_555_83187");
    }

    #[test]
    fn minimal_payload_parses() {
        let webhook = webhook_json(serde_json::json!({
            "eventName": "payment.succeeded",
            "createdAt": "2024-01-01T00:00:00Z",
            "payload": {"externalUserId": 7}
        }));

        assert!(webhook.payload.product_id.is_none());
        assert!(webhook.payload.amount.is_none());
        assert!(webhook.sent_at.is_none());
    }
}
