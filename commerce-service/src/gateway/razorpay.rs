use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};

use super::card::{http_client, send_json};
use super::signature::verify_razorpay;
use super::{CardProcessor, Intent, IntentRequest, PaymentStatus, RefundCall, RefundResult};
use crate::config::RazorpayConfig;
use crate::errors::{CommerceError, CommerceResult};
use crate::models::Gateway;

pub struct RazorpayClient {
    config: RazorpayConfig,
    http: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct RazorpayOrder {
    id: String,
    status: String,
}

#[derive(Debug, Deserialize)]
struct RazorpayRefund {
    id: String,
    status: String,
}

#[derive(Debug, Deserialize)]
struct RazorpayPayment {
    id: String,
    status: String,
    error_description: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RazorpayCollection<T> {
    items: Vec<T>,
}

impl RazorpayClient {
    pub fn new(config: RazorpayConfig) -> CommerceResult<Self> {
        Ok(Self {
            http: http_client(Gateway::Razorpay)?,
            config,
        })
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url.trim_end_matches('/'), path)
    }

    fn post(&self, path: &str) -> reqwest::RequestBuilder {
        self.http
            .post(self.endpoint(path))
            .basic_auth(&self.config.key_id, Some(&self.config.key_secret))
    }
}

#[async_trait]
impl CardProcessor for RazorpayClient {
    fn gateway(&self) -> Gateway {
        Gateway::Razorpay
    }

    async fn create_order(&self, request: &IntentRequest<'_>, amount_minor: i64) -> CommerceResult<Intent> {
        let mut notes = match request.metadata {
            Value::Object(map) => map.clone(),
            _ => serde_json::Map::new(),
        };
        notes.insert("transaction_id".into(), json!(request.transaction_id));
        notes.insert("user_id".into(), json!(request.user_id));

        let body = json!({
            "amount": amount_minor,
            "currency": request.currency,
            "receipt": request.order_id,
            "notes": notes,
        });
        let order: RazorpayOrder = send_json(Gateway::Razorpay, self.post("/v1/orders").json(&body)).await?;

        Ok(Intent {
            details: json!({ "razorpayOrderId": order.id, "status": order.status, "keyId": self.config.key_id }),
            gateway_order_id: Some(order.id),
        })
    }

    async fn refund(&self, call: &RefundCall<'_>, amount_minor: i64) -> CommerceResult<RefundResult> {
        let payment_id = call.gateway_transaction_id.ok_or_else(|| CommerceError::Gateway {
            gateway: Gateway::Razorpay,
            message: "Refund requires the payment id".to_string(),
            retryable: false,
        })?;

        let body = json!({
            "amount": amount_minor,
            "receipt": call.idempotency_key,
            "notes": { "idempotency_key": call.idempotency_key },
        });
        let refund: RazorpayRefund = send_json(
            Gateway::Razorpay,
            self.post(&format!("/v1/payments/{}/refund", payment_id)).json(&body),
        )
        .await?;

        tracing::info!(refund_id = %refund.id, payment_id = %payment_id, "Razorpay refund created");
        Ok(RefundResult {
            details: json!({ "refundId": refund.id, "status": refund.status }),
            refund_id: Some(refund.id),
        })
    }

    async fn fetch_status(&self, gateway_order_id: &str) -> CommerceResult<PaymentStatus> {
        let request = self
            .http
            .get(self.endpoint(&format!("/v1/orders/{}/payments", gateway_order_id)))
            .basic_auth(&self.config.key_id, Some(&self.config.key_secret));
        let payments: RazorpayCollection<RazorpayPayment> = send_json(Gateway::Razorpay, request).await?;

        if let Some(paid) = payments
            .items
            .iter()
            .find(|p| p.status == "captured" || p.status == "authorized")
        {
            return Ok(PaymentStatus::Paid {
                gateway_transaction_id: paid.id.clone(),
            });
        }
        match payments.items.last() {
            Some(last) if last.status == "failed" => Ok(PaymentStatus::Failed {
                reason: last
                    .error_description
                    .clone()
                    .unwrap_or_else(|| "Payment failed".to_string()),
            }),
            _ => Ok(PaymentStatus::Pending),
        }
    }

    fn verify_signature(&self, payload: &[u8], signature: &str) -> bool {
        verify_razorpay(&self.config.webhook_secret, payload, signature)
    }
}
