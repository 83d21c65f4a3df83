//! Webhook API Handler
//!
//! Receives push deliveries from source-control providers.

use axum::{
    Json,
    body::Bytes,
    extract::{Path, State},
    http::HeaderMap,
};
use ferry_core::dto::webhook::WebhookReceipt;

use crate::api::error::ApiResult;
use crate::service::ControlPlane;

/// POST /webhook/{provider}
/// Verify, decode and dispatch a provider delivery
pub async fn receive(
    State(control): State<ControlPlane>,
    Path(provider): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<Json<WebhookReceipt>> {
    tracing::debug!("Webhook delivery from {} ({} bytes)", provider, body.len());

    let receipt = control.handle_webhook(&provider, &headers, &body).await?;
    Ok(Json(receipt))
}
