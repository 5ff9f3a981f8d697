use crate::{MarketDataProvider, Quote, QuoteRequest};
use async_trait::async_trait;
use chrono::Utc;
use common::{Error, Result};
use serde::{Deserialize, Serialize};
use std::env;
use tracing::{debug, error};

const BINANCE_P2P_URL: &str = "https://p2p.binance.com/bapi/c2c/v2/friendly/c2c/adv/search";
const DEFAULT_REFERENCE_AMOUNT: f64 = 10000.0;
const DEFAULT_ROWS: u32 = 10;

/// Configuration for the Binance P2P connector
#[derive(Debug, Clone)]
pub struct BinanceP2pConfig {
    /// Advertisement search endpoint
    pub url: String,
    /// Fiat notional used to filter advertisements by their trade limits
    pub reference_amount: f64,
    /// Advertisements requested per search
    pub rows: u32,
}

impl Default for BinanceP2pConfig {
    fn default() -> Self {
        Self {
            url: BINANCE_P2P_URL.to_string(),
            reference_amount: DEFAULT_REFERENCE_AMOUNT,
            rows: DEFAULT_ROWS,
        }
    }
}

impl BinanceP2pConfig {
    /// Create a new connector configuration from environment variables
    pub fn from_env() -> std::result::Result<Self, String> {
        let defaults = Self::default();

        let url = env::var("BINANCE_P2P_URL").unwrap_or(defaults.url);

        let reference_amount = match env::var("BINANCE_P2P_REFERENCE_AMOUNT") {
            Ok(raw) => raw
                .parse::<f64>()
                .ok()
                .filter(|amount| amount.is_finite() && *amount > 0.0)
                .ok_or_else(|| format!("Invalid BINANCE_P2P_REFERENCE_AMOUNT: {}", raw))?,
            Err(_) => defaults.reference_amount,
        };

        let rows = match env::var("BINANCE_P2P_ROWS") {
            Ok(raw) => raw
                .parse::<u32>()
                .ok()
                .filter(|rows| *rows > 0)
                .ok_or_else(|| format!("Invalid BINANCE_P2P_ROWS: {}", raw))?,
            Err(_) => defaults.rows,
        };

        Ok(Self {
            url,
            reference_amount,
            rows,
        })
    }
}

pub struct BinanceP2pConnector {
    client: reqwest::Client,
    config: BinanceP2pConfig,
}

impl BinanceP2pConnector {
    pub fn new(config: BinanceP2pConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            config,
        }
    }

    pub fn config(&self) -> &BinanceP2pConfig {
        &self.config
    }

    fn search_body<'a>(&self, request: &'a QuoteRequest) -> SearchRequest<'a> {
        SearchRequest {
            asset: &request.crypto_asset,
            fiat: &request.fiat_asset,
            pay_types: &request.payment_methods,
            trade_type: request.direction.as_str(),
            trans_amount: request.reference_amount,
            page: 1,
            rows: self.config.rows,
            merchant_check: false,
            publisher_type: None,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SearchRequest<'a> {
    asset: &'a str,
    fiat: &'a str,
    pay_types: &'a [String],
    trade_type: &'static str,
    trans_amount: f64,
    page: u32,
    rows: u32,
    merchant_check: bool,
    publisher_type: Option<&'a str>,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    data: Option<Vec<Advertisement>>,
    #[serde(default)]
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Advertisement {
    adv: AdvertisementTerms,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AdvertisementTerms {
    price: String,
    #[serde(default)]
    min_single_trans_amount: Option<String>,
    #[serde(default)]
    max_single_trans_amount: Option<String>,
}

/// The first advertisement is the best offer; its price is the rate.
fn best_quote(response: SearchResponse) -> Result<Quote> {
    let best = response
        .data
        .unwrap_or_default()
        .into_iter()
        .next()
        .ok_or_else(|| {
            Error::ExternalProvider(format!(
                "Binance P2P returned no advertisements{}",
                response
                    .message
                    .map(|m| format!(": {}", m))
                    .unwrap_or_default()
            ))
        })?;

    let rate = best.adv.price.parse::<f64>().map_err(|e| {
        Error::ExternalProvider(format!("Failed to parse price {:?}: {}", best.adv.price, e))
    })?;
    if !rate.is_finite() || rate <= 0.0 {
        return Err(Error::ExternalProvider(format!(
            "Binance P2P returned non-positive price {}",
            rate
        )));
    }

    let amount = |raw: Option<String>| raw.and_then(|value| value.parse::<f64>().ok());

    Ok(Quote {
        rate,
        min_amount: amount(best.adv.min_single_trans_amount),
        max_amount: amount(best.adv.max_single_trans_amount),
        timestamp: Utc::now(),
    })
}

#[async_trait]
impl MarketDataProvider for BinanceP2pConnector {
    fn name(&self) -> &'static str {
        "binance-p2p"
    }

    async fn quote(&self, request: &QuoteRequest) -> Result<Quote> {
        let body = self.search_body(request);

        debug!(
            asset = %request.crypto_asset,
            fiat = %request.fiat_asset,
            pay_types = ?request.payment_methods,
            trade_type = %request.direction,
            trans_amount = request.reference_amount,
            "Searching Binance P2P advertisements"
        );

        let response = self
            .client
            .post(&self.config.url)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                error!(error = %e, "Binance P2P request failed");
                Error::ExternalProvider(format!("Binance P2P request failed: {}", e))
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            error!("Binance P2P API error: {} - {}", status, error_text);
            return Err(Error::ExternalProvider(format!(
                "Binance P2P API error: {} - {}",
                status, error_text
            )));
        }

        let search: SearchResponse = response.json().await.map_err(|e| {
            Error::ExternalProvider(format!("Failed to parse Binance P2P response: {}", e))
        })?;

        best_quote(search).map_err(|e| {
            error!(
                asset = %request.crypto_asset,
                fiat = %request.fiat_asset,
                trade_type = %request.direction,
                error = %e,
                "Error getting exchange"
            );
            e
        })
    }
}
