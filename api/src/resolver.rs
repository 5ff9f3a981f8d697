use common::{
    models::{ConverterPair, Currency, Exchange},
    Error, Result,
};
use connectors::{MarketDataProvider, QuoteRequest, TradeDirection};
use std::sync::Arc;
use store::RequestScope;
use tracing::{debug, error};

/// Prices converter pairs against a P2P market.
#[derive(Clone)]
pub struct ExchangeResolver {
    provider: Arc<dyn MarketDataProvider>,
    reference_amount: f64,
}

impl ExchangeResolver {
    pub fn new(provider: Arc<dyn MarketDataProvider>, reference_amount: f64) -> Self {
        Self {
            provider,
            reference_amount,
        }
    }

    /// Current rate of the chain. A transitive chain is priced as the ratio
    /// of its two legs, both quoted concurrently.
    pub async fn resolve(&self, scope: &RequestScope, pair: &ConverterPair) -> Result<Exchange> {
        let exchange = match pair.currencies() {
            [from, to] => self.resolve_direct(scope, from, to).await,
            [from, via, to] => {
                let (first, second) = tokio::try_join!(
                    self.resolve_direct(scope, from, via),
                    self.resolve_direct(scope, via, to),
                )?;
                first.cross(second)
            }
            other => Err(Error::InvalidConverterPair(format!(
                "cannot price a chain of {} currencies",
                other.len()
            ))),
        };

        exchange.map_err(|e| {
            error!(pair = %pair, error = %e, "Error getting exchange");
            e
        })
    }

    async fn resolve_direct(
        &self,
        scope: &RequestScope,
        from: &Currency,
        to: &Currency,
    ) -> Result<Exchange> {
        let request = self.quote_request(from, to)?;
        let quote = scope.guard(self.provider.quote(&request)).await?;

        debug!(
            provider = self.provider.name(),
            from = %from,
            to = %to,
            rate = quote.rate,
            "Quoted direct pair"
        );
        Exchange::new(quote.rate)
    }

    /// Exactly one side must be crypto. Selling crypto when it is the
    /// source, buying it when it is the target; the classic side's bank is
    /// the payment method.
    pub fn quote_request(&self, from: &Currency, to: &Currency) -> Result<QuoteRequest> {
        let (crypto, classic, direction) = match (from.is_crypto(), to.is_crypto()) {
            (true, false) => (from, to, TradeDirection::Sell),
            (false, true) => (to, from, TradeDirection::Buy),
            _ => {
                return Err(Error::InvalidConverterPair(format!(
                    "{}->{} must pair one crypto with one classic currency",
                    from, to
                )))
            }
        };

        Ok(QuoteRequest {
            crypto_asset: crypto.code().to_string(),
            fiat_asset: classic.code().to_string(),
            payment_methods: vec![classic.bank_code().to_string()],
            direction,
            reference_amount: self.reference_amount,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::models::seed;
    use connectors::mock::MockMarketDataProvider;
    use std::time::Duration;

    fn resolver(provider: &MockMarketDataProvider) -> ExchangeResolver {
        ExchangeResolver::new(Arc::new(provider.clone()), 10000.0)
    }

    fn rub_usdt_kzt() -> ConverterPair {
        ConverterPair::new(vec![seed::rub_tinkoff(), seed::usdt(), seed::kzt_kaspi()]).unwrap()
    }

    #[test]
    fn crypto_source_sells_and_crypto_target_buys() {
        let provider = MockMarketDataProvider::new();
        let resolver = resolver(&provider);

        let buy = resolver
            .quote_request(&seed::rub_tinkoff(), &seed::usdt())
            .unwrap();
        assert_eq!(
            buy,
            QuoteRequest {
                crypto_asset: "USDT".to_string(),
                fiat_asset: "RUB".to_string(),
                payment_methods: vec!["TinkoffNew".to_string()],
                direction: TradeDirection::Buy,
                reference_amount: 10000.0,
            }
        );

        let sell = resolver
            .quote_request(&seed::usdt(), &seed::kzt_kaspi())
            .unwrap();
        assert_eq!(sell.direction, TradeDirection::Sell);
        assert_eq!(sell.fiat_asset, "KZT");
        assert_eq!(sell.payment_methods, vec!["KaspiBank".to_string()]);
    }

    #[test]
    fn same_kind_currencies_are_rejected() {
        let resolver = resolver(&MockMarketDataProvider::new());

        assert!(matches!(
            resolver.quote_request(&seed::usdt(), &Currency::crypto("BTC").unwrap()),
            Err(Error::InvalidConverterPair(_))
        ));
        assert!(matches!(
            resolver.quote_request(&seed::rub_tinkoff(), &seed::kzt_kaspi()),
            Err(Error::InvalidConverterPair(_))
        ));
    }

    #[tokio::test]
    async fn direct_pair_makes_one_call() {
        let provider =
            MockMarketDataProvider::new().with_rate("USDT", "RUB", TradeDirection::Buy, 92.5);

        let exchange = resolver(&provider)
            .resolve(&RequestScope::new(), &seed::default_seed_pairs()[0])
            .await
            .unwrap();

        assert_eq!(exchange.value(), 92.5);
        assert_eq!(provider.call_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn transitive_pair_divides_concurrent_legs() {
        let provider = MockMarketDataProvider::new()
            .with_rate("USDT", "RUB", TradeDirection::Buy, 90.0)
            .with_rate("USDT", "KZT", TradeDirection::Sell, 450.0)
            .with_latency(Duration::from_millis(100));

        let exchange = resolver(&provider)
            .resolve(&RequestScope::new(), &rub_usdt_kzt())
            .await
            .unwrap();

        assert!((exchange.value() - 0.2).abs() < 1e-12);
        assert_eq!(provider.call_count(), 2);
        assert_eq!(provider.max_in_flight(), 2);
    }

    #[tokio::test]
    async fn failing_leg_fails_the_chain() {
        let provider = MockMarketDataProvider::new()
            .with_rate("USDT", "RUB", TradeDirection::Buy, 90.0)
            .with_failure("USDT", "KZT", TradeDirection::Sell, "no advertisements");

        let result = resolver(&provider)
            .resolve(&RequestScope::new(), &rub_usdt_kzt())
            .await;

        assert_eq!(
            result,
            Err(Error::ExternalProvider("no advertisements".to_string()))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn slow_provider_hits_request_deadline() {
        let provider = MockMarketDataProvider::new()
            .with_rate("USDT", "RUB", TradeDirection::Buy, 90.0)
            .with_latency(Duration::from_secs(30));
        let scope = RequestScope::new().with_timeout(Duration::from_secs(1));

        let result = resolver(&provider)
            .resolve(&scope, &seed::default_seed_pairs()[0])
            .await;

        assert_eq!(result, Err(Error::DeadlineExceeded));
    }
}
