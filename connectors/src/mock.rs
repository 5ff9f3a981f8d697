//! Scriptable [`MarketDataProvider`] for tests.

use crate::{MarketDataProvider, Quote, QuoteRequest, TradeDirection};
use async_trait::async_trait;
use chrono::Utc;
use common::{Error, Result};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

type QuoteKey = (String, String, TradeDirection);

#[derive(Default)]
struct State {
    rates: HashMap<QuoteKey, f64>,
    failures: HashMap<QuoteKey, String>,
    requests: Vec<QuoteRequest>,
    latency: Option<Duration>,
}

/// Returns configured rates per (crypto, fiat, direction); unknown keys fail
/// with `ExternalProvider`. Records every request and the peak number of
/// quotes in flight at once.
#[derive(Clone, Default)]
pub struct MockMarketDataProvider {
    state: Arc<Mutex<State>>,
    in_flight: Arc<AtomicUsize>,
    max_in_flight: Arc<AtomicUsize>,
}

impl MockMarketDataProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_rate(self, crypto: &str, fiat: &str, direction: TradeDirection, rate: f64) -> Self {
        self.state
            .lock()
            .rates
            .insert((crypto.to_string(), fiat.to_string(), direction), rate);
        self
    }

    pub fn with_failure(
        self,
        crypto: &str,
        fiat: &str,
        direction: TradeDirection,
        message: &str,
    ) -> Self {
        self.state.lock().failures.insert(
            (crypto.to_string(), fiat.to_string(), direction),
            message.to_string(),
        );
        self
    }

    /// Delay every quote, so overlapping calls become observable.
    pub fn with_latency(self, latency: Duration) -> Self {
        self.state.lock().latency = Some(latency);
        self
    }

    pub fn requests(&self) -> Vec<QuoteRequest> {
        self.state.lock().requests.clone()
    }

    pub fn call_count(&self) -> usize {
        self.state.lock().requests.len()
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MarketDataProvider for MockMarketDataProvider {
    fn name(&self) -> &'static str {
        "mock"
    }

    async fn quote(&self, request: &QuoteRequest) -> Result<Quote> {
        let latency = {
            let mut state = self.state.lock();
            state.requests.push(request.clone());
            state.latency
        };

        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(current, Ordering::SeqCst);
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        let key = (
            request.crypto_asset.clone(),
            request.fiat_asset.clone(),
            request.direction,
        );
        let state = self.state.lock();
        if let Some(message) = state.failures.get(&key) {
            return Err(Error::ExternalProvider(message.clone()));
        }
        let rate = state.rates.get(&key).copied().ok_or_else(|| {
            Error::ExternalProvider(format!(
                "no mock rate for {} {}/{}",
                key.2, key.0, key.1
            ))
        })?;

        Ok(Quote {
            rate,
            min_amount: None,
            max_amount: None,
            timestamp: Utc::now(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(direction: TradeDirection) -> QuoteRequest {
        QuoteRequest {
            crypto_asset: "USDT".to_string(),
            fiat_asset: "RUB".to_string(),
            payment_methods: vec!["TinkoffNew".to_string()],
            direction,
            reference_amount: 10000.0,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn overlapping_quotes_are_counted() {
        let provider = MockMarketDataProvider::new()
            .with_rate("USDT", "RUB", TradeDirection::Buy, 91.0)
            .with_latency(Duration::from_millis(50));

        let buy = request(TradeDirection::Buy);
        let (first, second) = tokio::join!(provider.quote(&buy), provider.quote(&buy));

        assert_eq!(first.unwrap().rate, 91.0);
        assert_eq!(second.unwrap().rate, 91.0);
        assert_eq!(provider.call_count(), 2);
        assert_eq!(provider.max_in_flight(), 2);
    }

    #[tokio::test]
    async fn unscripted_quote_fails_and_is_recorded() {
        let provider = MockMarketDataProvider::new();
        let sell = request(TradeDirection::Sell);

        let result = provider.quote(&sell).await;

        assert!(matches!(result, Err(Error::ExternalProvider(_))));
        assert_eq!(provider.requests(), vec![sell]);
    }
}
