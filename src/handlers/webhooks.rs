//! Payment processor webhook receiver.
//!
//! `POST /api/v1/webhooks/stripe` is public; authenticity comes from the
//! `Stripe-Signature` header, checked against the raw request body before
//! anything is parsed.

use axum::{
    Json,
    body::Bytes,
    extract::State,
    http::HeaderMap,
};
use chrono::Utc;
use serde::Serialize;

use crate::{
    app::AppState,
    error::AppError,
    services::{
        payments::webhook::{StripeEvent, verify_signature},
        webhook_service::{self, EventOutcome},
    },
};

pub const SIGNATURE_HEADER: &str = "stripe-signature";

#[derive(Debug, Serialize)]
pub struct WebhookAck {
    pub received: bool,
    pub outcome: EventOutcome,
}

/// Receive a processor event.
///
/// # Response
///
/// - **200 OK**: `{"received": true, "outcome": "applied" | "deferred" | "no_match" | "ignored"}`
/// - **400**: missing or invalid signature, or unreadable payload
pub async fn stripe_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<WebhookAck>, AppError> {
    let Some(secret) = state.config.stripe_webhook_secret.as_deref().filter(|s| !s.is_empty())
    else {
        tracing::error!("webhook received but STRIPE_WEBHOOK_SECRET is not set");
        return Err(AppError::invalid("Webhooks are not configured"));
    };

    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|h| h.to_str().ok())
        .ok_or_else(|| AppError::invalid("Missing Stripe-Signature header"))?;

    verify_signature(&body, signature, secret, Utc::now().timestamp()).map_err(|e| {
        tracing::warn!("webhook rejected: {e}");
        AppError::invalid(e.to_string())
    })?;

    let event: StripeEvent = serde_json::from_slice(&body)
        .map_err(|e| AppError::invalid(format!("Invalid webhook payload: {e}")))?;

    let outcome = webhook_service::handle_event(&state.pool, &event).await?;
    Ok(Json(WebhookAck {
        received: true,
        outcome,
    }))
}
