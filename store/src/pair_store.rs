use crate::backend::{PairRecord, StoreExecutor};
use crate::currency_registry::{lookup_or_create_with, lookup_with};
use crate::scope::RequestScope;
use crate::transaction::TransactionScope;
use common::{
    models::{ConverterPair, Currency, ThresholdConvertPair},
    Error, Result,
};
use std::collections::HashMap;
use tracing::{debug, info};

/// Persistence of converter pairs and of user subscriptions to them.
#[derive(Clone)]
pub struct PairStore {
    transactions: TransactionScope,
}

impl PairStore {
    pub fn new(transactions: TransactionScope) -> Self {
        Self { transactions }
    }

    pub fn transactions(&self) -> &TransactionScope {
        &self.transactions
    }

    /// Id of a persisted pair. A pair naming an unknown currency cannot be
    /// persisted and is rejected as invalid.
    pub async fn check_pair(&self, scope: &RequestScope, pair: &ConverterPair) -> Result<i64> {
        let mut conn = self.transactions.executor(scope).await?;
        check_pair_with(scope, conn.get()?, pair)
            .await
            .map_err(|e| match e {
                Error::CurrencyNotFound(msg) => Error::InvalidConverterPair(format!(
                    "pair {} references unknown currency {}",
                    pair, msg
                )),
                other => other,
            })
    }

    pub async fn add_pair(&self, scope: &RequestScope, pair: &ConverterPair) -> Result<i64> {
        let mut conn = self.transactions.executor(scope).await?;
        add_pair_with(scope, conn.get()?, pair).await
    }

    pub async fn add_pair_if_absent(&self, scope: &RequestScope, pair: &ConverterPair) -> Result<i64> {
        let mut conn = self.transactions.executor(scope).await?;
        add_pair_if_absent_with(scope, conn.get()?, pair).await
    }

    pub async fn list_all_pairs(&self, scope: &RequestScope) -> Result<Vec<ConverterPair>> {
        let mut conn = self.transactions.executor(scope).await?;
        let conn = conn.get()?;
        let records = scope.guard(conn.list_pairs()).await?;
        resolve_records(scope, conn, records).await
    }

    pub async fn list_user_pairs(
        &self,
        scope: &RequestScope,
        user_id: i64,
    ) -> Result<Vec<ConverterPair>> {
        let mut conn = self.transactions.executor(scope).await?;
        let conn = conn.get()?;
        let records = scope.guard(conn.list_user_pairs(user_id)).await?;
        resolve_records(scope, conn, records).await
    }

    /// Persist the pair if needed and link it to the user, atomically.
    ///
    /// Joins the scope's transaction when it carries one, leaving commit and
    /// rollback to its owner; otherwise runs in a transaction of its own.
    pub async fn subscribe(
        &self,
        scope: &RequestScope,
        user_id: i64,
        pair: &ConverterPair,
    ) -> Result<i64> {
        let subscription_id = if scope.has_transaction() {
            self.subscribe_in(scope, user_id, pair).await?
        } else {
            self.transactions
                .in_transaction(scope, |tx_scope| async move {
                    self.subscribe_in(&tx_scope, user_id, pair).await
                })
                .await?
        };

        info!(user_id, pair = %pair, subscription_id, "User subscribed to converter pair");
        Ok(subscription_id)
    }

    async fn subscribe_in(
        &self,
        scope: &RequestScope,
        user_id: i64,
        pair: &ConverterPair,
    ) -> Result<i64> {
        let mut conn = self.transactions.executor(scope).await?;
        let conn = conn.get()?;

        let pair_id = add_pair_if_absent_with(scope, conn, pair).await?;
        scope.guard(conn.insert_user_pair(user_id, pair_id)).await
    }

    pub async fn set_threshold(
        &self,
        _scope: &RequestScope,
        _user_id: i64,
        _threshold: &ThresholdConvertPair,
    ) -> Result<()> {
        Err(Error::NotImplemented("threshold persistence"))
    }

    pub async fn get_thresholds(
        &self,
        _scope: &RequestScope,
        _user_id: i64,
    ) -> Result<Vec<ThresholdConvertPair>> {
        Err(Error::NotImplemented("threshold persistence"))
    }
}

/// Pair lookup by ordered currency ids. Unknown currencies surface as
/// `CurrencyNotFound`.
async fn check_pair_with(
    scope: &RequestScope,
    conn: &mut dyn StoreExecutor,
    pair: &ConverterPair,
) -> Result<i64> {
    let mut ids = Vec::with_capacity(pair.level());
    for currency in pair.currencies() {
        ids.push(lookup_with(scope, conn, currency).await?);
    }
    scope.guard(conn.find_pair(&ids)).await
}

async fn add_pair_with(
    scope: &RequestScope,
    conn: &mut dyn StoreExecutor,
    pair: &ConverterPair,
) -> Result<i64> {
    let mut ids = Vec::with_capacity(pair.level());
    for currency in pair.currencies() {
        ids.push(lookup_or_create_with(scope, conn, currency).await?);
    }

    let id = scope.guard(conn.insert_pair(&ids)).await?;
    debug!(pair = %pair, id, "Converter pair created");
    Ok(id)
}

async fn add_pair_if_absent_with(
    scope: &RequestScope,
    conn: &mut dyn StoreExecutor,
    pair: &ConverterPair,
) -> Result<i64> {
    match check_pair_with(scope, conn, pair).await {
        Err(Error::CurrencyNotFound(_)) | Err(Error::ConverterPairNotFound(_)) => {}
        other => return other,
    }

    match add_pair_with(scope, conn, pair).await {
        Err(Error::ConverterPairAlreadyExists(_)) => check_pair_with(scope, conn, pair).await,
        other => other,
    }
}

async fn resolve_records(
    scope: &RequestScope,
    conn: &mut dyn StoreExecutor,
    records: Vec<PairRecord>,
) -> Result<Vec<ConverterPair>> {
    let mut currencies: HashMap<i64, Currency> = HashMap::new();
    let mut pairs = Vec::with_capacity(records.len());

    for record in records {
        let mut chain = Vec::with_capacity(record.currency_ids.len());
        for id in &record.currency_ids {
            let currency = match currencies.get(id) {
                Some(currency) => currency.clone(),
                None => {
                    let currency = scope.guard(conn.currency_by_id(*id)).await?;
                    currencies.insert(*id, currency.clone());
                    currency
                }
            };
            chain.push(currency);
        }

        let pair = ConverterPair::new(chain).map_err(|e| {
            Error::Database(format!("stored pair {} is malformed: {}", record.id, e))
        })?;
        pairs.push(pair);
    }

    Ok(pairs)
}
