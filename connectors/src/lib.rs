pub mod binance;

#[cfg(any(test, feature = "test-utils"))]
pub mod mock;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::Result;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Side of the trade, seen from the advertiser's counterparty.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TradeDirection {
    Buy,
    Sell,
}

impl TradeDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            TradeDirection::Buy => "BUY",
            TradeDirection::Sell => "SELL",
        }
    }
}

impl fmt::Display for TradeDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A P2P quote request: one crypto asset traded against one fiat currency
/// through the given payment methods.
#[derive(Debug, Clone, PartialEq)]
pub struct QuoteRequest {
    pub crypto_asset: String,
    pub fiat_asset: String,
    pub payment_methods: Vec<String>,
    pub direction: TradeDirection,
    pub reference_amount: f64,
}

/// Best available offer for a [`QuoteRequest`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Quote {
    /// Fiat units per crypto unit
    pub rate: f64,
    pub min_amount: Option<f64>,
    pub max_amount: Option<f64>,
    pub timestamp: DateTime<Utc>,
}

/// Source of current P2P market prices.
#[async_trait]
pub trait MarketDataProvider: Send + Sync {
    /// Short provider name, used in logs
    fn name(&self) -> &'static str;

    /// Best current offer matching the request
    async fn quote(&self, request: &QuoteRequest) -> Result<Quote>;
}
