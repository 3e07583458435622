//! Subscription platform webhook receiver.
//!
//! Status codes drive the platform's redelivery: 2xx acknowledges, 5xx asks for a
//! retry, 4xx reports a payload that will fail the same way every time.

use axum::{
    Json, Router,
    body::Bytes,
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::post,
};
use serde_json::json;
use tracing::{error, info};

use crate::{
    adapters::http::app_state::AppState,
    app_error::{AppError, AppResult},
    application::use_cases::reconciler::ApplyOutcome,
    domain::entities::subscription_event::WebhookEnvelope,
};

/// Logs a failure the platform will redeliver, with enough context to find the
/// event in the log.
fn log_retryable_failure(error: &AppError, event_type: &str, event_id: &str) {
    error!(
        error = %error,
        event_type,
        event_id,
        retryable = true,
        "Webhook processing failed, returning 5xx for platform retry"
    );
}

/// POST /api/webhooks/revenuecat
async fn handle_revenuecat_webhook(
    State(app_state): State<AppState>,
    body: Bytes,
) -> AppResult<impl IntoResponse> {
    let envelope = WebhookEnvelope::parse(&body)
        .map_err(|e| AppError::InvalidInput(format!("Invalid webhook payload: {}", e)))?;

    match app_state.reconciler.apply(&envelope).await {
        Ok(outcome) => {
            let outcome_label = match outcome {
                ApplyOutcome::Applied(kind) => kind.as_str(),
                ApplyOutcome::Duplicate => "duplicate",
                ApplyOutcome::Ignored => "ignored",
            };
            info!(
                event_id = envelope.resolve_event_id(),
                outcome = outcome_label,
                "Webhook acknowledged"
            );
            Ok((
                StatusCode::OK,
                Json(json!({
                    "status": "success",
                    "message": "Webhook processed successfully",
                })),
            ))
        }
        Err(err) => {
            if err.is_retryable() {
                log_retryable_failure(
                    &err,
                    &envelope.event.event_type,
                    envelope.resolve_event_id(),
                );
            }
            Err(err)
        }
    }
}

pub fn router() -> Router<AppState> {
    Router::new().route("/revenuecat", post(handle_revenuecat_webhook))
}
