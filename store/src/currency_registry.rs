use crate::backend::StoreExecutor;
use crate::scope::RequestScope;
use crate::transaction::TransactionScope;
use common::{
    models::{Currency, CurrencyType},
    Error, Result,
};
use tracing::{debug, info};

/// Identifies currencies by their (type, code, bank) triple and creates
/// missing ones on demand.
#[derive(Clone)]
pub struct CurrencyRegistry {
    transactions: TransactionScope,
}

impl CurrencyRegistry {
    pub fn new(transactions: TransactionScope) -> Self {
        Self { transactions }
    }

    pub async fn lookup(&self, scope: &RequestScope, currency: &Currency) -> Result<i64> {
        let mut conn = self.transactions.executor(scope).await?;
        lookup_with(scope, conn.get()?, currency).await
    }

    pub async fn create(&self, scope: &RequestScope, currency: &Currency) -> Result<i64> {
        let mut conn = self.transactions.executor(scope).await?;
        create_with(scope, conn.get()?, currency).await
    }

    pub async fn lookup_or_create(&self, scope: &RequestScope, currency: &Currency) -> Result<i64> {
        let mut conn = self.transactions.executor(scope).await?;
        lookup_or_create_with(scope, conn.get()?, currency).await
    }

    /// Register the currency if needed and link it to the user, atomically.
    /// Joins the scope's transaction when it carries one.
    pub async fn add_user_currency(
        &self,
        scope: &RequestScope,
        user_id: i64,
        currency: &Currency,
    ) -> Result<i64> {
        let link_id = if scope.has_transaction() {
            self.add_user_currency_in(scope, user_id, currency).await?
        } else {
            self.transactions
                .in_transaction(scope, |tx_scope| async move {
                    self.add_user_currency_in(&tx_scope, user_id, currency).await
                })
                .await?
        };

        info!(user_id, currency = %currency, link_id, "User currency added");
        Ok(link_id)
    }

    async fn add_user_currency_in(
        &self,
        scope: &RequestScope,
        user_id: i64,
        currency: &Currency,
    ) -> Result<i64> {
        let mut conn = self.transactions.executor(scope).await?;
        let conn = conn.get()?;

        let currency_id = lookup_or_create_with(scope, conn, currency).await?;
        scope.guard(conn.insert_user_currency(user_id, currency_id)).await
    }

    pub async fn list_user_currencies(
        &self,
        scope: &RequestScope,
        user_id: i64,
        currency_type: Option<CurrencyType>,
    ) -> Result<Vec<Currency>> {
        let mut conn = self.transactions.executor(scope).await?;
        scope
            .guard(conn.get()?.list_user_currencies(user_id, currency_type))
            .await
    }

    pub async fn delete_user_currency(
        &self,
        _scope: &RequestScope,
        _user_id: i64,
        _currency: &Currency,
    ) -> Result<()> {
        Err(Error::NotImplemented("user currency removal"))
    }
}

pub(crate) async fn lookup_with(
    scope: &RequestScope,
    conn: &mut dyn StoreExecutor,
    currency: &Currency,
) -> Result<i64> {
    scope.guard(conn.find_currency(currency)).await
}

pub(crate) async fn create_with(
    scope: &RequestScope,
    conn: &mut dyn StoreExecutor,
    currency: &Currency,
) -> Result<i64> {
    let id = scope.guard(conn.insert_currency(currency)).await?;
    debug!(currency = %currency, id, "Currency created");
    Ok(id)
}

/// A concurrent creator may win between the lookup and the insert; the
/// loser re-reads the winner's row.
pub(crate) async fn lookup_or_create_with(
    scope: &RequestScope,
    conn: &mut dyn StoreExecutor,
    currency: &Currency,
) -> Result<i64> {
    match lookup_with(scope, conn, currency).await {
        Err(Error::CurrencyNotFound(_)) => {}
        other => return other,
    }

    match create_with(scope, conn, currency).await {
        Err(Error::CurrencyAlreadyExists(_)) => lookup_with(scope, conn, currency).await,
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryStore;
    use std::sync::Arc;

    fn setup() -> (MemoryStore, CurrencyRegistry) {
        let store = MemoryStore::new();
        let registry = CurrencyRegistry::new(TransactionScope::new(Arc::new(store.clone())));
        (store, registry)
    }

    #[tokio::test]
    async fn lookup_missing_currency_is_not_found() {
        let (_, registry) = setup();
        let result = registry
            .lookup(&RequestScope::new(), &Currency::crypto("USDT").unwrap())
            .await;
        assert!(matches!(result, Err(Error::CurrencyNotFound(_))));
    }

    #[tokio::test]
    async fn create_then_lookup_returns_same_id() {
        let (_, registry) = setup();
        let scope = RequestScope::new();
        let rub = Currency::classic("RUB", "TinkoffNew").unwrap();

        let id = registry.create(&scope, &rub).await.unwrap();
        assert_eq!(registry.lookup(&scope, &rub).await.unwrap(), id);
        assert!(matches!(
            registry.create(&scope, &rub).await,
            Err(Error::CurrencyAlreadyExists(_))
        ));
    }

    #[tokio::test]
    async fn bank_is_part_of_identity() {
        let (store, registry) = setup();
        let scope = RequestScope::new();

        let tinkoff = registry
            .lookup_or_create(&scope, &Currency::classic("RUB", "TinkoffNew").unwrap())
            .await
            .unwrap();
        let sber = registry
            .lookup_or_create(&scope, &Currency::classic("RUB", "Sber").unwrap())
            .await
            .unwrap();

        assert_ne!(tinkoff, sber);
        assert_eq!(store.currency_count(), 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_lookup_or_create_yields_one_row() {
        let (store, registry) = setup();
        let kzt = Currency::classic("KZT", "KaspiBank").unwrap();

        let tasks: Vec<_> = (0..8)
            .map(|_| {
                let registry = registry.clone();
                let kzt = kzt.clone();
                tokio::spawn(async move {
                    registry.lookup_or_create(&RequestScope::new(), &kzt).await
                })
            })
            .collect();

        let ids: Vec<i64> = futures::future::join_all(tasks)
            .await
            .into_iter()
            .map(|joined| joined.unwrap().unwrap())
            .collect();

        assert!(ids.windows(2).all(|w| w[0] == w[1]));
        assert_eq!(store.currency_count(), 1);
    }

    #[tokio::test]
    async fn user_currency_is_linked_once() {
        let (store, registry) = setup();
        let scope = RequestScope::new().with_user(5);
        let rub = Currency::classic("RUB", "TinkoffNew").unwrap();

        registry.add_user_currency(&scope, 5, &rub).await.unwrap();
        assert!(matches!(
            registry.add_user_currency(&scope, 5, &rub).await,
            Err(Error::CurrencyAlreadyExists(_))
        ));
        registry.add_user_currency(&scope, 6, &rub).await.unwrap();

        assert_eq!(store.currency_count(), 1);
        assert_eq!(store.user_currency_count(), 2);
        assert_eq!(store.commits(), 2);
        assert_eq!(store.rollbacks(), 1);
    }

    #[tokio::test]
    async fn user_currencies_filter_by_type() {
        let (_, registry) = setup();
        let scope = RequestScope::new();
        let usdt = Currency::crypto("USDT").unwrap();
        let rub = Currency::classic("RUB", "TinkoffNew").unwrap();
        let kzt = Currency::classic("KZT", "KaspiBank").unwrap();

        for currency in [&usdt, &rub, &kzt] {
            registry.add_user_currency(&scope, 9, currency).await.unwrap();
        }
        registry.add_user_currency(&scope, 10, &usdt).await.unwrap();

        assert_eq!(
            registry.list_user_currencies(&scope, 9, None).await.unwrap(),
            vec![usdt.clone(), rub.clone(), kzt.clone()]
        );
        assert_eq!(
            registry
                .list_user_currencies(&scope, 9, Some(CurrencyType::Classic))
                .await
                .unwrap(),
            vec![rub, kzt]
        );
        assert_eq!(
            registry
                .list_user_currencies(&scope, 10, Some(CurrencyType::Crypto))
                .await
                .unwrap(),
            vec![usdt]
        );
        assert!(registry
            .list_user_currencies(&scope, 11, None)
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn user_currency_joins_caller_transaction() {
        let (store, registry) = setup();
        let scope = RequestScope::new();
        let usdt = Currency::crypto("USDT").unwrap();
        registry.add_user_currency(&scope, 1, &usdt).await.unwrap();

        let btc = Currency::crypto("BTC").unwrap();
        let tx_scope = registry.transactions.begin(&scope).await.unwrap();
        registry.add_user_currency(&tx_scope, 1, &btc).await.unwrap();
        assert_eq!(store.currency_count(), 2);
        registry.transactions.rollback(&tx_scope).await.unwrap();

        assert_eq!(store.currency_count(), 1);
        assert_eq!(
            registry.list_user_currencies(&scope, 1, None).await.unwrap(),
            vec![usdt]
        );
    }

    #[tokio::test]
    async fn deleting_user_currency_is_not_implemented() {
        let (_, registry) = setup();
        let result = registry
            .delete_user_currency(&RequestScope::new(), 1, &Currency::crypto("USDT").unwrap())
            .await;
        assert_eq!(result, Err(Error::NotImplemented("user currency removal")));
    }
}
