use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    Json,
};
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::errors::{CommerceError, CommerceResult};
use crate::inventory::InventoryLedger;
use crate::models::*;
use crate::orchestrator::TransactionOrchestrator;
use crate::orders::{OrderService, PlaceOrder};
use crate::wallet::WalletLedger;
use crate::webhook::{WebhookOutcome, WebhookReconciler, RAZORPAY_SIGNATURE_HEADER, STRIPE_SIGNATURE_HEADER};

/// Services shared by every handler. All of them are cheap to clone.
#[derive(Clone)]
pub struct AppState {
    pub inventory: InventoryLedger,
    pub wallet: WalletLedger,
    pub payments: TransactionOrchestrator,
    pub orders: OrderService,
    pub webhooks: WebhookReconciler,
}

type ApiResult<T> = CommerceResult<Json<ApiResponse<T>>>;

fn parse_transaction_id(raw: &str) -> CommerceResult<Uuid> {
    Uuid::parse_str(raw).map_err(|_| CommerceError::TransactionNotFound(raw.to_string()))
}

fn outcome_message<T>(outcome: &Outcome<T>) -> &'static str {
    if outcome.was_applied() {
        "Applied"
    } else {
        "Already processed"
    }
}

// === Inventory ===

pub async fn assign_stock(
    State(state): State<AppState>,
    Json(payload): Json<AssignStockRequest>,
) -> ApiResult<StockResponse> {
    tracing::info!(
        variant_id = %payload.variant_id,
        location_id = %payload.location_id,
        on_hand = payload.on_hand,
        "Assigning stock"
    );
    let key = StockKey::new(payload.variant_id, payload.location_id);
    let stock = state.inventory.assign(&key, payload.on_hand, payload.thresholds).await?;
    Ok(Json(ApiResponse::success(StockResponse::from(stock))))
}

pub async fn get_stock(
    State(state): State<AppState>,
    Path((variant_id, location_id)): Path<(String, String)>,
) -> ApiResult<StockResponse> {
    let stock = state.inventory.get(&StockKey::new(variant_id, location_id)).await?;
    Ok(Json(ApiResponse::success(StockResponse::from(stock))))
}

pub async fn restock(
    State(state): State<AppState>,
    Path((variant_id, location_id)): Path<(String, String)>,
    Json(payload): Json<QuantityRequest>,
) -> ApiResult<StockResponse> {
    let stock = state
        .inventory
        .restock(&StockKey::new(variant_id, location_id), payload.quantity)
        .await?;
    Ok(Json(ApiResponse::success(StockResponse::from(stock))))
}

pub async fn update_thresholds(
    State(state): State<AppState>,
    Path((variant_id, location_id)): Path<(String, String)>,
    Json(thresholds): Json<StockThresholds>,
) -> ApiResult<StockResponse> {
    let stock = state
        .inventory
        .update_thresholds(&StockKey::new(variant_id, location_id), thresholds)
        .await?;
    Ok(Json(ApiResponse::success(StockResponse::from(stock))))
}

pub async fn list_stock(
    State(state): State<AppState>,
    Query(query): Query<StockListQuery>,
) -> ApiResult<Page<StockResponse>> {
    let page = state
        .inventory
        .list_location(&query.location_id, query.filter, query.limit, query.offset)
        .await?;
    Ok(Json(ApiResponse::success(Page {
        items: page.items.into_iter().map(StockResponse::from).collect(),
        total: page.total,
        has_more: page.has_more,
    })))
}

pub async fn check_availability(
    State(state): State<AppState>,
    Path((variant_id, location_id)): Path<(String, String)>,
    Query(query): Query<AvailabilityQuery>,
) -> ApiResult<Availability> {
    let availability = state
        .inventory
        .check_availability(&StockKey::new(variant_id, location_id), query.quantity.unwrap_or(1))
        .await?;
    Ok(Json(ApiResponse::success(availability)))
}

pub async fn reserve_stock(
    State(state): State<AppState>,
    Json(payload): Json<BatchStockRequest>,
) -> ApiResult<Vec<LineResult>> {
    let report = state.inventory.reserve_all(&payload.items).await;
    Ok(Json(ApiResponse::success(report.into_line_results())))
}

pub async fn release_stock(
    State(state): State<AppState>,
    Json(payload): Json<BatchStockRequest>,
) -> ApiResult<Vec<LineResult>> {
    let report = state.inventory.release_all(&payload.items).await;
    Ok(Json(ApiResponse::success(report.into_line_results())))
}

pub async fn fulfill_stock(
    State(state): State<AppState>,
    Json(payload): Json<BatchStockRequest>,
) -> ApiResult<Vec<LineResult>> {
    let report = state.inventory.fulfill_all(&payload.items).await;
    Ok(Json(ApiResponse::success(report.into_line_results())))
}

pub async fn low_stock(
    State(state): State<AppState>,
    Query(query): Query<LocationQuery>,
) -> ApiResult<Vec<StockResponse>> {
    let records = state.inventory.low_stock(query.location_id.as_deref()).await?;
    Ok(Json(ApiResponse::success(
        records.into_iter().map(StockResponse::from).collect(),
    )))
}

pub async fn reorder_suggestions(
    State(state): State<AppState>,
    Query(query): Query<LocationQuery>,
) -> ApiResult<Vec<ReorderSuggestion>> {
    let suggestions = state
        .inventory
        .reorder_suggestions(query.location_id.as_deref())
        .await?;
    Ok(Json(ApiResponse::success(suggestions)))
}

// === Wallet ===

pub async fn create_wallet(
    State(state): State<AppState>,
    Json(payload): Json<CreateWalletRequest>,
) -> ApiResult<WalletAccount> {
    let wallet = state.wallet.create_wallet(&payload.user_id).await?;
    Ok(Json(ApiResponse::success(wallet)))
}

pub async fn get_wallet(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> ApiResult<WalletAccount> {
    let wallet = state.wallet.get_wallet(&user_id).await?;
    Ok(Json(ApiResponse::success(wallet)))
}

pub async fn top_up_wallet(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
    Json(payload): Json<TopUpRequest>,
) -> ApiResult<WalletLedgerEntry> {
    tracing::info!(user_id = %user_id, amount = %payload.amount, "Wallet top-up");
    let outcome = state
        .wallet
        .top_up(
            &user_id,
            payload.amount,
            payload.description.as_deref(),
            &payload.reference_id,
        )
        .await?;
    let message = outcome_message(&outcome);
    Ok(Json(ApiResponse::with_message(outcome.into_inner(), message)))
}

pub async fn wallet_history(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
    Query(query): Query<PageQuery>,
) -> ApiResult<Page<WalletLedgerEntry>> {
    let page = state.wallet.history(&user_id, query.limit, query.offset).await?;
    Ok(Json(ApiResponse::success(page)))
}

// === Transactions ===

pub async fn get_transaction(
    State(state): State<AppState>,
    Path(transaction_id): Path<String>,
) -> ApiResult<Transaction> {
    let transaction = state.payments.get(parse_transaction_id(&transaction_id)?).await?;
    Ok(Json(ApiResponse::success(transaction)))
}

pub async fn transaction_history(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
    Query(query): Query<PageQuery>,
) -> ApiResult<Page<Transaction>> {
    let page = state
        .payments
        .history(&user_id, query.status, query.limit, query.offset)
        .await?;
    Ok(Json(ApiResponse::success(page)))
}

pub async fn confirm_transaction(
    State(state): State<AppState>,
    Path(transaction_id): Path<String>,
    Json(payload): Json<ConfirmRequest>,
) -> ApiResult<Transaction> {
    let id = parse_transaction_id(&transaction_id)?;
    tracing::info!(transaction_id = %id, "Confirming payment");
    let outcome = state
        .orders
        .confirm_payment(id, &payload.gateway_transaction_id, payload.gateway_data)
        .await?;
    let message = outcome_message(&outcome);
    Ok(Json(ApiResponse::with_message(outcome.into_inner(), message)))
}

pub async fn fail_transaction(
    State(state): State<AppState>,
    Path(transaction_id): Path<String>,
    Json(payload): Json<FailRequest>,
) -> ApiResult<Transaction> {
    let id = parse_transaction_id(&transaction_id)?;
    let outcome = state.orders.fail_payment(id, &payload.reason).await?;
    let message = outcome_message(&outcome);
    Ok(Json(ApiResponse::with_message(outcome.into_inner(), message)))
}

pub async fn retry_transaction(
    State(state): State<AppState>,
    Path(transaction_id): Path<String>,
) -> ApiResult<Transaction> {
    let id = parse_transaction_id(&transaction_id)?;
    let transaction = state.orders.retry_payment(id).await?;
    Ok(Json(ApiResponse::success(transaction)))
}

pub async fn refund_transaction(
    State(state): State<AppState>,
    Path(transaction_id): Path<String>,
    Json(payload): Json<RefundRequest>,
) -> ApiResult<Transaction> {
    let id = parse_transaction_id(&transaction_id)?;
    tracing::info!(transaction_id = %id, amount = ?payload.amount, "Refund requested");
    let transaction = state.payments.refund(id, payload.amount).await?;
    Ok(Json(ApiResponse::success(transaction)))
}

pub async fn verify_cod(
    State(state): State<AppState>,
    Path(transaction_id): Path<String>,
    Json(payload): Json<VerifyCodRequest>,
) -> ApiResult<Transaction> {
    let id = parse_transaction_id(&transaction_id)?;
    let outcome = state.orders.verify_cod(id, payload.verification_status).await?;
    let message = outcome_message(&outcome);
    Ok(Json(ApiResponse::with_message(outcome.into_inner(), message)))
}

pub async fn reconcile_transaction(
    State(state): State<AppState>,
    Path(transaction_id): Path<String>,
) -> ApiResult<Transaction> {
    let id = parse_transaction_id(&transaction_id)?;
    let transaction = state.orders.reconcile_payment(id).await?;
    Ok(Json(ApiResponse::success(transaction)))
}

// === Orders ===

pub async fn place_order(
    State(state): State<AppState>,
    Json(payload): Json<PlaceOrderRequest>,
) -> CommerceResult<(StatusCode, Json<ApiResponse<PlacedOrderResponse>>)> {
    tracing::info!(user_id = %payload.user_id, items = payload.items.len(), gateway = %payload.gateway, "Placing order");
    let request = PlaceOrder {
        user_id: payload.user_id,
        items: payload
            .items
            .into_iter()
            .map(|item| OrderItem {
                product_id: item.product_id,
                variant_id: item.variant_id,
                name: item.name,
                price: item.price,
                quantity: item.quantity,
            })
            .collect(),
        coordinates: payload.coordinates,
        payment_method: payload.payment_method,
        gateway: payload.gateway,
        discount: payload.discount.unwrap_or(Decimal::ZERO),
        cashback: payload.cashback.unwrap_or(Decimal::ZERO),
        metadata: payload.metadata,
    };
    let placed = state.orders.place_order(request).await?;
    Ok((
        StatusCode::CREATED,
        Json(ApiResponse::success(PlacedOrderResponse {
            order: placed.order,
            transaction: placed.transaction,
        })),
    ))
}

pub async fn get_order(
    State(state): State<AppState>,
    Path(order_id): Path<String>,
) -> ApiResult<Order> {
    let order = state.orders.get_order(&order_id).await?;
    Ok(Json(ApiResponse::success(order)))
}

pub async fn list_orders(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
    Query(query): Query<PageQuery>,
) -> ApiResult<Page<Order>> {
    let page = state.orders.list_orders(&user_id, query.limit, query.offset).await?;
    Ok(Json(ApiResponse::success(page)))
}

pub async fn update_order_status(
    State(state): State<AppState>,
    Path(order_id): Path<String>,
    Json(payload): Json<UpdateOrderStatusRequest>,
) -> ApiResult<Order> {
    let order = state
        .orders
        .update_status(&order_id, payload.status, payload.note)
        .await?;
    Ok(Json(ApiResponse::success(order)))
}

pub async fn cancel_order(
    State(state): State<AppState>,
    Path(order_id): Path<String>,
    Json(payload): Json<CancelOrderRequest>,
) -> ApiResult<Order> {
    let order = state.orders.cancel_order(&order_id, payload.reason).await?;
    Ok(Json(ApiResponse::success(order)))
}

// === Webhooks ===

async fn webhook(
    state: &AppState,
    gateway: Gateway,
    header: &str,
    headers: &HeaderMap,
    body: &[u8],
) -> CommerceResult<Json<ApiResponse<WebhookOutcome>>> {
    let signature = headers.get(header).and_then(|v| v.to_str().ok());
    let outcome = state.webhooks.handle(gateway, signature, body).await?;
    Ok(Json(ApiResponse::success(outcome)))
}

pub async fn razorpay_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> CommerceResult<Json<ApiResponse<WebhookOutcome>>> {
    webhook(&state, Gateway::Razorpay, RAZORPAY_SIGNATURE_HEADER, &headers, &body).await
}

pub async fn stripe_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> CommerceResult<Json<ApiResponse<WebhookOutcome>>> {
    webhook(&state, Gateway::Stripe, STRIPE_SIGNATURE_HEADER, &headers, &body).await
}

pub async fn health_check() -> (StatusCode, &'static str) {
    (StatusCode::OK, "OK")
}
