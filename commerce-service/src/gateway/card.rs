use reqwest::{RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use std::sync::Arc;

use super::{to_minor_units, CardProcessor, Intent, IntentRequest, PaymentStatus, RefundCall, RefundResult};
use crate::errors::{CommerceError, CommerceResult};
use crate::models::Gateway;

/// Card/UPI adapter over one processor API.
#[derive(Clone)]
pub struct CardGateway {
    processor: Arc<dyn CardProcessor>,
}

impl CardGateway {
    pub fn new(processor: Arc<dyn CardProcessor>) -> Self {
        Self { processor }
    }

    pub fn gateway(&self) -> Gateway {
        self.processor.gateway()
    }

    pub async fn create_intent(&self, request: &IntentRequest<'_>) -> CommerceResult<Intent> {
        let amount_minor = to_minor_units(request.amount)?;
        let intent = self.processor.create_order(request, amount_minor).await?;
        tracing::info!(
            gateway = %self.gateway(),
            transaction_id = %request.transaction_id,
            gateway_order_id = ?intent.gateway_order_id,
            amount_minor,
            "Gateway order created"
        );
        Ok(intent)
    }

    pub async fn refund(&self, call: &RefundCall<'_>) -> CommerceResult<RefundResult> {
        if call.gateway_transaction_id.is_none() && call.gateway_order_id.is_none() {
            return Err(CommerceError::Gateway {
                gateway: self.gateway(),
                message: "No gateway reference to refund against".to_string(),
                retryable: false,
            });
        }
        let amount_minor = to_minor_units(call.amount)?;
        self.processor.refund(call, amount_minor).await
    }

    pub async fn fetch_status(&self, gateway_order_id: &str) -> CommerceResult<PaymentStatus> {
        self.processor.fetch_status(gateway_order_id).await
    }

    pub fn verify_signature(&self, payload: &[u8], signature: &str) -> bool {
        self.processor.verify_signature(payload, signature)
    }
}

/// Builds the HTTP client shared by processor APIs.
pub fn http_client(gateway: Gateway) -> CommerceResult<reqwest::Client> {
    reqwest::Client::builder()
        .user_agent(concat!("commerce-service/", env!("CARGO_PKG_VERSION")))
        .build()
        .map_err(|e| CommerceError::Internal(format!("Failed to build {} HTTP client: {}", gateway, e)))
}

/// Sends a processor request and decodes the JSON body.
///
/// Transport failures, 429 and 5xx are retryable; other non-2xx answers are
/// not.
pub async fn send_json<T: DeserializeOwned>(gateway: Gateway, request: RequestBuilder) -> CommerceResult<T> {
    let response = request.send().await.map_err(|e| CommerceError::Gateway {
        gateway,
        message: format!("Request failed: {}", e),
        retryable: true,
    })?;

    let status = response.status();
    let body = response.text().await.map_err(|e| CommerceError::Gateway {
        gateway,
        message: format!("Failed to read response: {}", e),
        retryable: true,
    })?;

    if !status.is_success() {
        tracing::warn!(gateway = %gateway, status = %status, body = %body, "Gateway rejected request");
        return Err(CommerceError::Gateway {
            gateway,
            message: format!("HTTP {}: {}", status, body),
            retryable: status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS,
        });
    }

    serde_json::from_str(&body).map_err(|e| CommerceError::Gateway {
        gateway,
        message: format!("Invalid response body: {}", e),
        retryable: false,
    })
}
