use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use rust_decimal::Decimal;
use serde_json::json;
use thiserror::Error;
use uuid::Uuid;

use crate::models::{Gateway, OrderStatus, TransactionStatus};

/// Errors raised by the commerce core.
///
/// Business-rule rejections carry enough context to explain themselves to a
/// caller. Infrastructure failures are logged in full and surfaced as a
/// generic message.
#[derive(Debug, Error)]
pub enum CommerceError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Insufficient stock for {variant_id} at {location_id}. Requested: {requested}, Available: {available}")]
    InsufficientStock {
        variant_id: String,
        location_id: String,
        requested: i64,
        available: i64,
    },

    #[error("Quantity not reserved for {variant_id} at {location_id}. Requested: {requested}, Reserved: {reserved}")]
    NotReserved {
        variant_id: String,
        location_id: String,
        requested: i64,
        reserved: i64,
    },

    #[error("Stock record not found: {variant_id} at {location_id}")]
    StockNotFound {
        variant_id: String,
        location_id: String,
    },

    #[error("Insufficient funds. Required: {required}, Available: {available}")]
    InsufficientFunds { required: Decimal, available: Decimal },

    #[error("Insufficient wallet balance for transaction {transaction_id}. Required: {required}, Available: {available}")]
    InsufficientWalletBalance {
        transaction_id: Uuid,
        required: Decimal,
        available: Decimal,
    },

    #[error("Wallet not found for user: {0}")]
    WalletNotFound(String),

    #[error("Transaction not found: {0}")]
    TransactionNotFound(String),

    #[error("Order not found: {0}")]
    OrderNotFound(String),

    #[error("Gateway error ({gateway}): {message}")]
    Gateway {
        gateway: Gateway,
        message: String,
        retryable: bool,
    },

    #[error("Gateway {gateway} timed out during {operation}")]
    GatewayTimeout {
        gateway: Gateway,
        operation: &'static str,
    },

    #[error("Gateway {0} is not configured")]
    GatewayNotConfigured(Gateway),

    #[error("Invalid webhook signature for {0}")]
    SignatureInvalid(Gateway),

    #[error("Invalid transaction transition from {from} to {to}")]
    InvalidTransition {
        from: TransactionStatus,
        to: TransactionStatus,
    },

    #[error("Invalid order transition from {from} to {to}")]
    InvalidOrderTransition { from: OrderStatus, to: OrderStatus },

    #[error("Cannot retry a successful payment")]
    CannotRetrySuccessful,

    #[error("Retry limit of {max} reached")]
    RetryLimitExceeded { max: u32 },

    #[error("Transaction {0} is not the latest payment attempt for its order")]
    AttemptSuperseded(Uuid),

    #[error("Refund amount exceeds available amount. Requested: {requested}, Available: {available}")]
    RefundExceedsAvailable { requested: Decimal, available: Decimal },

    #[error("Order cannot be cancelled in status {0}")]
    OrderNotCancellable(OrderStatus),

    #[error("Transaction {0} is not a cash-on-delivery payment")]
    NotCashOnDelivery(Uuid),

    #[error("No fulfillment location can serve this order")]
    NoFulfillableLocation,

    #[error("Concurrent update detected. Please retry.")]
    ConcurrentUpdate,

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Event publish error: {0}")]
    EventPublish(String),

    #[error("Internal server error: {0}")]
    Internal(String),
}

impl CommerceError {
    /// Whether the same call may succeed if repeated later.
    pub fn is_retryable(&self) -> bool {
        match self {
            CommerceError::Gateway { retryable, .. } => *retryable,
            CommerceError::GatewayTimeout { .. } | CommerceError::ConcurrentUpdate => true,
            _ => false,
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            CommerceError::Validation(_)
            | CommerceError::InsufficientStock { .. }
            | CommerceError::NotReserved { .. }
            | CommerceError::NoFulfillableLocation
            | CommerceError::NotCashOnDelivery(_)
            | CommerceError::RefundExceedsAvailable { .. }
            | CommerceError::SignatureInvalid(_)
            | CommerceError::GatewayNotConfigured(_) => StatusCode::BAD_REQUEST,

            CommerceError::InsufficientFunds { .. }
            | CommerceError::InsufficientWalletBalance { .. } => StatusCode::PAYMENT_REQUIRED,

            CommerceError::StockNotFound { .. }
            | CommerceError::WalletNotFound(_)
            | CommerceError::TransactionNotFound(_)
            | CommerceError::OrderNotFound(_) => StatusCode::NOT_FOUND,

            CommerceError::InvalidTransition { .. }
            | CommerceError::InvalidOrderTransition { .. }
            | CommerceError::CannotRetrySuccessful
            | CommerceError::RetryLimitExceeded { .. }
            | CommerceError::AttemptSuperseded(_)
            | CommerceError::OrderNotCancellable(_)
            | CommerceError::ConcurrentUpdate => StatusCode::CONFLICT,

            CommerceError::Gateway { .. } => StatusCode::BAD_GATEWAY,
            CommerceError::GatewayTimeout { .. } => StatusCode::GATEWAY_TIMEOUT,

            CommerceError::Database(_)
            | CommerceError::EventPublish(_)
            | CommerceError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for CommerceError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let error_message = match self {
            CommerceError::Database(ref e) => {
                tracing::error!("Database error: {:?}", e);
                "Database operation failed".to_string()
            }

            CommerceError::EventPublish(ref e) => {
                tracing::error!("Event publish error: {}", e);
                "Event publishing failed".to_string()
            }

            CommerceError::Internal(ref e) => {
                tracing::error!("Internal error: {}", e);
                "An unexpected error occurred".to_string()
            }

            CommerceError::SignatureInvalid(gateway) => {
                tracing::error!(gateway = %gateway, "Webhook signature rejected");
                "Invalid signature".to_string()
            }

            ref other => other.to_string(),
        };

        let body = Json(json!({
            "success": false,
            "error": error_message,
        }));

        (status, body).into_response()
    }
}

pub type CommerceResult<T> = Result<T, CommerceError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gateway_failures_are_retryable_guard_violations_are_not() {
        let timeout = CommerceError::GatewayTimeout {
            gateway: Gateway::Razorpay,
            operation: "create_intent",
        };
        assert!(timeout.is_retryable());
        assert!(!CommerceError::CannotRetrySuccessful.is_retryable());
        assert!(!CommerceError::SignatureInvalid(Gateway::Stripe).is_retryable());
    }

    #[test]
    fn webhook_rejections_map_to_client_errors() {
        assert_eq!(
            CommerceError::SignatureInvalid(Gateway::Razorpay).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            CommerceError::TransactionNotFound("order_x".into()).status_code(),
            StatusCode::NOT_FOUND
        );
    }
}
