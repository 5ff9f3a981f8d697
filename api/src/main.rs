mod composer;
mod config;
mod handler;
mod resolver;
mod service;

use composer::PairComposer;
use config::ApiConfig;
use connectors::binance::{BinanceP2pConfig, BinanceP2pConnector};
use handler::AppState;
use resolver::ExchangeResolver;
use service::ConverterService;
use std::net::SocketAddr;
use std::sync::Arc;
use store::{CurrencyRegistry, PairStore, PgStore, TransactionScope};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    info!("Starting P2P converter API");

    // Load configuration from environment
    let api_config = ApiConfig::from_env();
    let store_config = store::StoreConfig::from_env()
        .map_err(|e| format!("Failed to load store configuration: {}", e))?;
    let binance_config = BinanceP2pConfig::from_env()
        .map_err(|e| format!("Failed to load Binance P2P configuration: {}", e))?;

    // Connect to PostgreSQL and apply migrations
    let pg_store = PgStore::connect(&store_config)
        .await
        .map_err(|e| format!("Failed to create converter store: {}", e))?;
    let transactions = TransactionScope::new(Arc::new(pg_store));
    let pairs = PairStore::new(transactions.clone());
    let currencies = CurrencyRegistry::new(transactions);

    // Create market data connector
    let reference_amount = binance_config.reference_amount;
    let binance = Arc::new(BinanceP2pConnector::new(binance_config));

    let service = Arc::new(ConverterService::new(
        PairComposer::default(),
        pairs,
        currencies,
        ExchangeResolver::new(binance, reference_amount),
    ));

    // Create CORS middleware
    let cors = CorsLayer::new()
        .allow_methods(Any)
        .allow_origin(Any)
        .allow_headers(Any);

    let app = handler::router(AppState {
        service,
        request_timeout: api_config.request_timeout,
    })
    .layer(TraceLayer::new_for_http())
    .layer(cors);

    // Start server
    let addr: SocketAddr = api_config
        .bind_address()
        .parse()
        .map_err(|e| format!("Invalid bind address {}: {}", api_config.bind_address(), e))?;
    info!("Listening on {}", addr);

    axum::Server::bind(&addr)
        .serve(app.into_make_service())
        .await?;

    Ok(())
}
