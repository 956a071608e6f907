use serde_json::json;

use super::{Intent, IntentRequest, RefundCall, RefundResult};
use crate::errors::{CommerceError, CommerceResult};
use crate::wallet::WalletLedger;

/// Pays from the customer's wallet. Opening an intent only checks the
/// balance; the debit happens when the transaction is confirmed.
#[derive(Clone)]
pub struct WalletGateway {
    wallet: WalletLedger,
}

impl WalletGateway {
    pub fn new(wallet: WalletLedger) -> Self {
        Self { wallet }
    }

    pub async fn create_intent(&self, request: &IntentRequest<'_>) -> CommerceResult<Intent> {
        let available = match self.wallet.balance(request.user_id).await {
            Ok(balance) => balance,
            Err(CommerceError::WalletNotFound(_)) => rust_decimal::Decimal::ZERO,
            Err(e) => return Err(e),
        };
        if available < request.amount {
            return Err(CommerceError::InsufficientFunds {
                required: request.amount,
                available,
            });
        }
        Ok(Intent {
            gateway_order_id: None,
            details: json!({ "walletBalance": available.to_string() }),
        })
    }
}

/// Cash collected at the door. Nothing happens until the courier verifies.
#[derive(Debug, Clone, Copy)]
pub struct CodGateway;

impl CodGateway {
    pub fn create_intent(&self, _request: &IntentRequest<'_>) -> Intent {
        Intent {
            gateway_order_id: None,
            details: json!({ "codVerification": "PENDING" }),
        }
    }
}

/// Wallet and COD refunds never leave the service; the wallet credit is the refund.
pub(crate) fn local_refund(call: &RefundCall<'_>) -> RefundResult {
    RefundResult {
        refund_id: None,
        details: json!({ "mode": "WALLET_CREDIT", "amount": call.amount.to_string() }),
    }
}
