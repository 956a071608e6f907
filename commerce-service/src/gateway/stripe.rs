use async_trait::async_trait;
use chrono::Utc;
use serde::Deserialize;
use serde_json::{json, Value};

use super::card::{http_client, send_json};
use super::signature::verify_stripe;
use super::{CardProcessor, Intent, IntentRequest, PaymentStatus, RefundCall, RefundResult};
use crate::config::StripeConfig;
use crate::errors::{CommerceError, CommerceResult};
use crate::models::Gateway;

pub struct StripeClient {
    config: StripeConfig,
    http: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct PaymentIntent {
    id: String,
    status: String,
    client_secret: Option<String>,
    latest_charge: Option<String>,
    last_payment_error: Option<PaymentError>,
}

#[derive(Debug, Deserialize)]
struct PaymentError {
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Refund {
    id: String,
    status: Option<String>,
}

impl StripeClient {
    pub fn new(config: StripeConfig) -> CommerceResult<Self> {
        Ok(Self {
            http: http_client(Gateway::Stripe)?,
            config,
        })
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url.trim_end_matches('/'), path)
    }
}

#[async_trait]
impl CardProcessor for StripeClient {
    fn gateway(&self) -> Gateway {
        Gateway::Stripe
    }

    async fn create_order(&self, request: &IntentRequest<'_>, amount_minor: i64) -> CommerceResult<Intent> {
        let mut form: Vec<(String, String)> = vec![
            ("amount".into(), amount_minor.to_string()),
            ("currency".into(), request.currency.to_lowercase()),
            ("automatic_payment_methods[enabled]".into(), "true".into()),
            ("metadata[order_id]".into(), request.order_id.to_string()),
            ("metadata[transaction_id]".into(), request.transaction_id.to_string()),
            ("metadata[user_id]".into(), request.user_id.to_string()),
        ];
        if let Value::Object(map) = request.metadata {
            for (key, value) in map {
                let value = match value {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                form.push((format!("metadata[{}]", key), value));
            }
        }

        let builder = self
            .http
            .post(self.endpoint("/v1/payment_intents"))
            .bearer_auth(&self.config.secret_key)
            .header("Idempotency-Key", format!("txn:{}:intent", request.transaction_id))
            .form(&form);
        let intent: PaymentIntent = send_json(Gateway::Stripe, builder).await?;

        Ok(Intent {
            details: json!({
                "paymentIntentId": intent.id,
                "status": intent.status,
                "clientSecret": intent.client_secret,
            }),
            gateway_order_id: Some(intent.id),
        })
    }

    async fn refund(&self, call: &RefundCall<'_>, amount_minor: i64) -> CommerceResult<RefundResult> {
        let payment_intent = call
            .gateway_order_id
            .or(call.gateway_transaction_id)
            .ok_or_else(|| CommerceError::Gateway {
                gateway: Gateway::Stripe,
                message: "Refund requires the payment intent id".to_string(),
                retryable: false,
            })?;

        let form = [
            ("payment_intent", payment_intent.to_string()),
            ("amount", amount_minor.to_string()),
        ];
        let builder = self
            .http
            .post(self.endpoint("/v1/refunds"))
            .bearer_auth(&self.config.secret_key)
            .header("Idempotency-Key", call.idempotency_key)
            .form(&form);
        let refund: Refund = send_json(Gateway::Stripe, builder).await?;

        tracing::info!(refund_id = %refund.id, payment_intent = %payment_intent, "Stripe refund created");
        Ok(RefundResult {
            details: json!({ "refundId": refund.id, "status": refund.status }),
            refund_id: Some(refund.id),
        })
    }

    async fn fetch_status(&self, gateway_order_id: &str) -> CommerceResult<PaymentStatus> {
        let builder = self
            .http
            .get(self.endpoint(&format!("/v1/payment_intents/{}", gateway_order_id)))
            .bearer_auth(&self.config.secret_key);
        let intent: PaymentIntent = send_json(Gateway::Stripe, builder).await?;

        Ok(match intent.status.as_str() {
            "succeeded" => PaymentStatus::Paid {
                gateway_transaction_id: intent.latest_charge.unwrap_or(intent.id),
            },
            "canceled" => PaymentStatus::Failed {
                reason: "Payment intent canceled".to_string(),
            },
            "requires_payment_method" if intent.last_payment_error.is_some() => PaymentStatus::Failed {
                reason: intent
                    .last_payment_error
                    .and_then(|e| e.message)
                    .unwrap_or_else(|| "Payment failed".to_string()),
            },
            _ => PaymentStatus::Pending,
        })
    }

    fn verify_signature(&self, payload: &[u8], signature: &str) -> bool {
        verify_stripe(
            &self.config.webhook_secret,
            payload,
            signature,
            self.config.signature_tolerance.as_secs() as i64,
            Utc::now().timestamp(),
        )
    }
}
