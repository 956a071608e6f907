use std::sync::Arc;

use commerce_service::config::{Config, StorageBackend};
use commerce_service::events::{EventPublisher, Notifier};
use commerce_service::gateway::razorpay::RazorpayClient;
use commerce_service::gateway::stripe::StripeClient;
use commerce_service::gateway::Gateways;
use commerce_service::handlers::AppState;
use commerce_service::inventory::InventoryLedger;
use commerce_service::location::{FixedLocationResolver, LocationResolver, NearestLocationResolver};
use commerce_service::memory::MemoryStore;
use commerce_service::orchestrator::TransactionOrchestrator;
use commerce_service::orders::OrderService;
use commerce_service::repository::PgStore;
use commerce_service::store::CommerceStore;
use commerce_service::wallet::WalletLedger;
use commerce_service::webhook::WebhookReconciler;
use sqlx::postgres::PgPoolOptions;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Location used when no fulfillment locations are configured.
const DEFAULT_LOCATION: &str = "default";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "commerce_service=debug,tower_http=debug".into());
    let json_logs = std::env::var("LOG_FORMAT").map(|v| v == "json").unwrap_or(false);
    if json_logs {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }

    let config = Config::from_env()?;

    tracing::info!("Starting Commerce Service");
    tracing::info!(storage = ?config.storage, currency = %config.payments.currency, "Configuration loaded");

    let notifier = Notifier::new(publisher(&config)?);

    let state = match config.storage {
        StorageBackend::Postgres => {
            tracing::info!("Connecting to database...");
            // One pool shared by every service
            // - wallet postings hold a row lock for the whole db transaction,
            //   so max_connections also caps concurrent wallet writes
            let pool = PgPoolOptions::new()
                .max_connections(config.database.max_connections)
                .connect(&config.database.url)
                .await?;

            tracing::info!("Running database migrations...");
            sqlx::migrate!("./migrations").run(&pool).await?;
            tracing::info!("Migrations completed successfully");

            build_state(Arc::new(PgStore::new(pool)), &config, notifier)?
        }
        StorageBackend::Memory => {
            tracing::warn!("Using in-memory storage; state is lost on restart");
            build_state(Arc::new(MemoryStore::new()), &config, notifier)?
        }
    };

    let app = commerce_service::router(state).layer(
        ServiceBuilder::new()
            .layer(TraceLayer::new_for_http())
            .layer(CorsLayer::permissive()),
    );

    let addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Commerce Service listening on {}", addr);

    axum::serve(listener, app).await?;

    Ok(())
}

/// Wires every service over one store.
fn build_state<S: CommerceStore + 'static>(
    store: Arc<S>,
    config: &Config,
    notifier: Notifier,
) -> anyhow::Result<AppState> {
    let inventory = InventoryLedger::new(store.clone(), notifier.clone());
    let wallet = WalletLedger::new(
        store.clone(),
        notifier.clone(),
        config.payments.currency.clone(),
        config.wallet.clone(),
    );

    let mut gateways = Gateways::new(wallet.clone());
    if let Some(razorpay) = config.razorpay.clone() {
        tracing::info!("Razorpay enabled");
        gateways = gateways.with_card(Arc::new(RazorpayClient::new(razorpay)?));
    }
    if let Some(stripe) = config.stripe.clone() {
        tracing::info!("Stripe enabled");
        gateways = gateways.with_card(Arc::new(StripeClient::new(stripe)?));
    }

    let payments = TransactionOrchestrator::new(
        store.clone(),
        wallet.clone(),
        gateways,
        notifier.clone(),
        config.payments.clone(),
    );

    let resolver: Arc<dyn LocationResolver> = if config.locations.is_empty() {
        tracing::warn!(location_id = DEFAULT_LOCATION, "No fulfillment locations configured");
        Arc::new(FixedLocationResolver::new(DEFAULT_LOCATION))
    } else {
        tracing::info!(
            locations = config.locations.len(),
            radius_km = config.fulfillment_radius_km,
            "Fulfillment locations loaded"
        );
        Arc::new(NearestLocationResolver::new(
            config.locations.clone(),
            config.fulfillment_radius_km,
            inventory.clone(),
        ))
    };

    let orders = OrderService::new(
        store,
        inventory.clone(),
        payments.clone(),
        resolver,
        notifier,
        config.pricing.clone(),
    );
    let webhooks = WebhookReconciler::new(orders.clone(), payments.clone());

    Ok(AppState {
        inventory,
        wallet,
        payments,
        orders,
        webhooks,
    })
}

#[cfg(feature = "kafka")]
fn publisher(config: &Config) -> anyhow::Result<Arc<dyn EventPublisher>> {
    use commerce_service::kafka::KafkaPublisher;

    tracing::info!(brokers = %config.kafka.brokers, topic = %config.kafka.topic, "Initializing Kafka publisher");
    Ok(Arc::new(KafkaPublisher::new(
        &config.kafka.brokers,
        config.kafka.topic.clone(),
    )?))
}

#[cfg(not(feature = "kafka"))]
fn publisher(_config: &Config) -> anyhow::Result<Arc<dyn EventPublisher>> {
    use commerce_service::events::LogPublisher;

    tracing::info!("Kafka disabled; events go to the log");
    Ok(Arc::new(LogPublisher))
}
