use serde::Serialize;
use serde_json::Value;
use uuid::Uuid;

use crate::errors::{CommerceError, CommerceResult};
use crate::models::{Gateway, Outcome, Transaction, TransactionStatus};
use crate::orchestrator::TransactionOrchestrator;
use crate::orders::OrderService;

pub const RAZORPAY_SIGNATURE_HEADER: &str = "X-Razorpay-Signature";
pub const STRIPE_SIGNATURE_HEADER: &str = "Stripe-Signature";

/// Gateway-agnostic view of an inbound event.
#[derive(Debug, Clone, PartialEq)]
pub struct GatewayEvent {
    pub name: String,
    pub gateway_order_id: Option<String>,
    pub gateway_transaction_id: Option<String>,
    /// Our transaction id, echoed back in notes/metadata.
    pub transaction_hint: Option<Uuid>,
    pub failure_reason: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventAction {
    Confirm,
    Fail,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum WebhookOutcome {
    Processed {
        transaction_id: Uuid,
        status: TransactionStatus,
    },
    AlreadyProcessed {
        transaction_id: Uuid,
    },
    Ignored {
        event: String,
        reason: String,
    },
}

fn text(value: &Value) -> Option<String> {
    value.as_str().filter(|s| !s.is_empty()).map(str::to_string)
}

fn hint(notes: &Value) -> Option<Uuid> {
    notes
        .get("transaction_id")
        .and_then(Value::as_str)
        .and_then(|s| Uuid::parse_str(s).ok())
}

/// Reads the fields we need out of a gateway's native payload.
pub fn parse_event(gateway: Gateway, payload: &Value) -> CommerceResult<GatewayEvent> {
    match gateway {
        Gateway::Razorpay => {
            let name = text(&payload["event"])
                .ok_or_else(|| CommerceError::Validation("Webhook missing event".to_string()))?;
            let payment = &payload["payload"]["payment"]["entity"];
            let order = &payload["payload"]["order"]["entity"];
            Ok(GatewayEvent {
                name,
                gateway_order_id: text(&payment["order_id"]).or_else(|| text(&order["id"])),
                gateway_transaction_id: text(&payment["id"]),
                transaction_hint: hint(&payment["notes"]).or_else(|| hint(&order["notes"])),
                failure_reason: text(&payment["error_description"]),
            })
        }
        Gateway::Stripe => {
            let name = text(&payload["type"])
                .ok_or_else(|| CommerceError::Validation("Webhook missing type".to_string()))?;
            let object = &payload["data"]["object"];
            let (gateway_order_id, gateway_transaction_id) = if object["object"] == "charge" {
                (text(&object["payment_intent"]), text(&object["id"]))
            } else {
                (
                    text(&object["id"]),
                    text(&object["latest_charge"]).or_else(|| text(&object["id"])),
                )
            };
            Ok(GatewayEvent {
                name,
                gateway_order_id,
                gateway_transaction_id,
                transaction_hint: hint(&object["metadata"]),
                failure_reason: text(&object["last_payment_error"]["message"]),
            })
        }
        Gateway::Wallet | Gateway::Cod => Err(CommerceError::GatewayNotConfigured(gateway)),
    }
}

/// Maps a native event name to a transition. `None` for events we do not act on.
pub fn action_for(gateway: Gateway, event: &str) -> Option<EventAction> {
    match (gateway, event) {
        (Gateway::Razorpay, "payment.authorized" | "payment.captured" | "order.paid") => Some(EventAction::Confirm),
        (Gateway::Razorpay, "payment.failed") => Some(EventAction::Fail),
        (Gateway::Stripe, "payment_intent.succeeded") => Some(EventAction::Confirm),
        (Gateway::Stripe, "payment_intent.payment_failed" | "payment_intent.canceled") => Some(EventAction::Fail),
        _ => None,
    }
}

/// Applies signed gateway notifications to transactions.
///
/// Never creates a transaction. Duplicate deliveries land on the
/// orchestrator's idempotent confirm and come back as `AlreadyProcessed`.
#[derive(Clone)]
pub struct WebhookReconciler {
    orders: OrderService,
    payments: TransactionOrchestrator,
}

impl WebhookReconciler {
    pub fn new(orders: OrderService, payments: TransactionOrchestrator) -> Self {
        Self { orders, payments }
    }

    pub async fn handle(&self, gateway: Gateway, signature: Option<&str>, body: &[u8]) -> CommerceResult<WebhookOutcome> {
        let adapter = self.payments.gateways().adapter(gateway)?;
        let verified = signature
            .map(|s| adapter.verify_signature(body, s))
            .unwrap_or(false);
        if !verified {
            tracing::error!(gateway = %gateway, has_signature = signature.is_some(), "Webhook signature rejected");
            return Err(CommerceError::SignatureInvalid(gateway));
        }

        let payload: Value = serde_json::from_slice(body)
            .map_err(|e| CommerceError::Validation(format!("Malformed webhook body: {}", e)))?;
        let event = parse_event(gateway, &payload)?;

        let transaction = self.locate(gateway, &event).await?;

        let Some(action) = action_for(gateway, &event.name) else {
            tracing::info!(gateway = %gateway, event = %event.name, transaction_id = %transaction.id, "Ignoring unhandled webhook event");
            return Ok(WebhookOutcome::Ignored {
                event: event.name,
                reason: "unhandled event type".to_string(),
            });
        };

        tracing::info!(
            gateway = %gateway,
            event = %event.name,
            transaction_id = %transaction.id,
            status = %transaction.status,
            "Applying webhook event"
        );

        let result = match action {
            EventAction::Confirm => {
                let Some(gateway_transaction_id) = event.gateway_transaction_id.as_deref() else {
                    return Err(CommerceError::Validation(
                        "Webhook missing payment id".to_string(),
                    ));
                };
                self.orders
                    .confirm_payment(transaction.id, gateway_transaction_id, payload.clone())
                    .await
            }
            EventAction::Fail => {
                let reason = event
                    .failure_reason
                    .clone()
                    .unwrap_or_else(|| format!("Gateway reported {}", event.name));
                self.orders.fail_payment(transaction.id, &reason).await
            }
        };

        match result {
            Ok(Outcome::Applied(updated)) => Ok(WebhookOutcome::Processed {
                transaction_id: updated.id,
                status: updated.status,
            }),
            Ok(Outcome::AlreadyProcessed(existing)) => Ok(WebhookOutcome::AlreadyProcessed {
                transaction_id: existing.id,
            }),
            Err(e @ CommerceError::InvalidTransition { .. }) => {
                tracing::warn!(transaction_id = %transaction.id, event = %event.name, error = %e, "Webhook event does not apply to transaction state");
                Ok(WebhookOutcome::Ignored {
                    event: event.name,
                    reason: e.to_string(),
                })
            }
            Err(e) => Err(e),
        }
    }

    async fn locate(&self, gateway: Gateway, event: &GatewayEvent) -> CommerceResult<Transaction> {
        let found = self
            .payments
            .find_by_gateway_reference(event.gateway_order_id.as_deref(), event.gateway_transaction_id.as_deref())
            .await?;
        let found = match (found, event.transaction_hint) {
            (Some(transaction), _) => Some(transaction),
            (None, Some(id)) => match self.payments.get(id).await {
                Ok(transaction) => Some(transaction),
                Err(CommerceError::TransactionNotFound(_)) => None,
                Err(e) => return Err(e),
            },
            (None, None) => None,
        };

        found.filter(|t| t.gateway == gateway).ok_or_else(|| {
            let reference = event
                .gateway_order_id
                .clone()
                .or_else(|| event.gateway_transaction_id.clone())
                .unwrap_or_else(|| "unknown".to_string());
            tracing::warn!(gateway = %gateway, reference = %reference, "Webhook references unknown transaction");
            CommerceError::TransactionNotFound(reference)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn razorpay_payment_events_parse() {
        let payload = json!({
            "event": "payment.captured",
            "payload": { "payment": { "entity": {
                "id": "pay_1",
                "order_id": "order_1",
                "notes": { "transaction_id": "9d7c3f84-3e0b-4f5e-9f6b-0b1a8f5b2c11" }
            }}}
        });
        let event = parse_event(Gateway::Razorpay, &payload).unwrap();
        assert_eq!(event.gateway_order_id.as_deref(), Some("order_1"));
        assert_eq!(event.gateway_transaction_id.as_deref(), Some("pay_1"));
        assert!(event.transaction_hint.is_some());
        assert_eq!(action_for(Gateway::Razorpay, &event.name), Some(EventAction::Confirm));
    }

    #[test]
    fn stripe_charge_events_point_at_the_intent() {
        let payload = json!({
            "type": "charge.refunded",
            "data": { "object": { "object": "charge", "id": "ch_1", "payment_intent": "pi_1" } }
        });
        let event = parse_event(Gateway::Stripe, &payload).unwrap();
        assert_eq!(event.gateway_order_id.as_deref(), Some("pi_1"));
        assert_eq!(event.gateway_transaction_id.as_deref(), Some("ch_1"));
        assert_eq!(action_for(Gateway::Stripe, &event.name), None);
    }

    #[test]
    fn stripe_failures_carry_reason() {
        let payload = json!({
            "type": "payment_intent.payment_failed",
            "data": { "object": { "id": "pi_2", "last_payment_error": { "message": "Card declined" } } }
        });
        let event = parse_event(Gateway::Stripe, &payload).unwrap();
        assert_eq!(event.failure_reason.as_deref(), Some("Card declined"));
        assert_eq!(action_for(Gateway::Stripe, &event.name), Some(EventAction::Fail));
    }

    #[test]
    fn payload_without_event_name_is_rejected() {
        assert!(parse_event(Gateway::Razorpay, &json!({})).is_err());
    }
}
