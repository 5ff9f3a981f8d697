use crate::composer::PairComposer;
use crate::resolver::ExchangeResolver;
use common::{
    models::{ConverterPair, Currency, CurrencyType, Exchange, ThresholdConvertPair},
    Result,
};
use store::{CurrencyRegistry, PairStore, RequestScope};
use tracing::{error, info};

/// Converter operations exposed to transports. User-scoped operations take
/// the caller's identity from the request scope.
#[derive(Clone)]
pub struct ConverterService {
    composer: PairComposer,
    pairs: PairStore,
    currencies: CurrencyRegistry,
    resolver: ExchangeResolver,
}

impl ConverterService {
    pub fn new(
        composer: PairComposer,
        pairs: PairStore,
        currencies: CurrencyRegistry,
        resolver: ExchangeResolver,
    ) -> Self {
        Self {
            composer,
            pairs,
            currencies,
            resolver,
        }
    }

    /// Chains users may subscribe to
    pub fn available_pairs(&self) -> Vec<ConverterPair> {
        self.composer.available_pairs()
    }

    /// Chains persisted so far by any user
    pub async fn stored_pairs(&self, scope: &RequestScope) -> Result<Vec<ConverterPair>> {
        self.pairs.list_all_pairs(scope).await.map_err(|e| {
            error!(error = %e, "Error getting converter pairs from database");
            e
        })
    }

    pub async fn subscribe(&self, scope: &RequestScope, pair: &ConverterPair) -> Result<i64> {
        let user_id = scope.require_user()?;
        let subscription_id = self.pairs.subscribe(scope, user_id, pair).await?;
        info!(user_id, pair = %pair, "Converter pair added to user");
        Ok(subscription_id)
    }

    pub async fn my_pairs(&self, scope: &RequestScope) -> Result<Vec<ConverterPair>> {
        let user_id = scope.require_user()?;
        self.pairs.list_user_pairs(scope, user_id).await
    }

    pub async fn add_currency(&self, scope: &RequestScope, currency: &Currency) -> Result<i64> {
        let user_id = scope.require_user()?;
        self.currencies
            .add_user_currency(scope, user_id, currency)
            .await
    }

    /// The caller's currencies, optionally only those of one type
    pub async fn my_currencies(
        &self,
        scope: &RequestScope,
        currency_type: Option<CurrencyType>,
    ) -> Result<Vec<Currency>> {
        let user_id = scope.require_user()?;
        self.currencies
            .list_user_currencies(scope, user_id, currency_type)
            .await
            .map_err(|e| {
                error!(user_id, error = %e, "Error getting user currencies");
                e
            })
    }

    pub async fn delete_currency(&self, scope: &RequestScope, currency: &Currency) -> Result<()> {
        let user_id = scope.require_user()?;
        self.currencies
            .delete_user_currency(scope, user_id, currency)
            .await
    }

    pub async fn current_exchange(
        &self,
        scope: &RequestScope,
        pair: &ConverterPair,
    ) -> Result<Exchange> {
        self.resolver.resolve(scope, pair).await
    }

    pub async fn set_threshold(
        &self,
        scope: &RequestScope,
        threshold: &ThresholdConvertPair,
    ) -> Result<()> {
        let user_id = scope.require_user()?;
        self.pairs.set_threshold(scope, user_id, threshold).await
    }

    pub async fn my_thresholds(&self, scope: &RequestScope) -> Result<Vec<ThresholdConvertPair>> {
        let user_id = scope.require_user()?;
        self.pairs.get_thresholds(scope, user_id).await
    }
}
