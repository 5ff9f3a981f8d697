use crate::backend::{RelationalStore, StoreExecutor, StoreTransaction};
use crate::scope::{RequestScope, TransactionSlot};
use common::{Error, Result};
use std::future::Future;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, error, warn};

/// Opens, hands out and releases the transaction carried by a [`RequestScope`].
#[derive(Clone)]
pub struct TransactionScope {
    store: Arc<dyn RelationalStore>,
}

impl TransactionScope {
    pub fn new(store: Arc<dyn RelationalStore>) -> Self {
        Self { store }
    }

    /// Open a transaction and return a scope carrying it.
    pub async fn begin(&self, scope: &RequestScope) -> Result<RequestScope> {
        if scope.has_transaction() {
            return Err(Error::Internal(
                "request scope already carries a transaction".to_string(),
            ));
        }

        let tx = scope.guard(self.store.begin()).await?;
        debug!(user_id = ?scope.user_id(), "Transaction started");

        Ok(scope.with_transaction(Arc::new(Mutex::new(Some(tx)))))
    }

    pub fn extract(&self, scope: &RequestScope) -> Option<TransactionSlot> {
        scope.transaction().cloned()
    }

    pub async fn commit(&self, scope: &RequestScope) -> Result<()> {
        let tx = self.take(scope).await.map_err(|e| {
            error!("Commit requested without an active transaction");
            e
        })?;

        tx.commit().await.map_err(|e| {
            error!(error = %e, "Error committing transaction");
            e
        })?;

        debug!("Transaction committed");
        Ok(())
    }

    /// Roll back the scope's transaction. Failures of the rollback itself are
    /// logged and swallowed.
    pub async fn rollback(&self, scope: &RequestScope) -> Result<()> {
        let tx = self.take(scope).await?;

        if let Err(e) = tx.rollback().await {
            warn!(error = %e, "Error rolling back transaction");
        } else {
            debug!("Transaction rolled back");
        }
        Ok(())
    }

    /// Rollback for exit paths; a transaction that was already released is fine.
    pub async fn rollback_on_exit(&self, scope: &RequestScope) {
        let _ = self.rollback(scope).await;
    }

    /// Run `operation` inside a fresh transaction: commit when it succeeds,
    /// roll back on any failure, cancellation included.
    pub async fn in_transaction<T, F, Fut>(&self, scope: &RequestScope, operation: F) -> Result<T>
    where
        F: FnOnce(RequestScope) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let tx_scope = self.begin(scope).await?;

        let value = match operation(tx_scope.clone()).await {
            Ok(value) => value,
            Err(e) => {
                debug!(error = %e, "Rolling back after failed operation");
                self.rollback_on_exit(&tx_scope).await;
                return Err(e);
            }
        };

        if tx_scope.is_cancelled() {
            self.rollback_on_exit(&tx_scope).await;
            return Err(Error::Cancelled);
        }

        if let Err(e) = self.commit(&tx_scope).await {
            self.rollback_on_exit(&tx_scope).await;
            return Err(e);
        }

        Ok(value)
    }

    /// The connection a store operation should use: the scope's transaction
    /// when present, a fresh autocommit connection otherwise.
    pub(crate) async fn executor(&self, scope: &RequestScope) -> Result<ScopedExecutor> {
        match self.extract(scope) {
            Some(slot) => {
                let guard = scope.guard(async { Ok(slot.lock_owned().await) }).await?;
                if guard.is_none() {
                    return Err(Error::TransactionNotFound);
                }
                Ok(ScopedExecutor::Transaction(guard))
            }
            None => {
                let executor = scope.guard(self.store.executor()).await?;
                Ok(ScopedExecutor::Implicit(executor))
            }
        }
    }

    async fn take(&self, scope: &RequestScope) -> Result<Box<dyn StoreTransaction>> {
        let slot = self.extract(scope).ok_or(Error::TransactionNotFound)?;
        let tx = slot.lock().await.take();
        tx.ok_or(Error::TransactionNotFound)
    }
}

/// A connection borrowed for the duration of one store operation.
pub(crate) enum ScopedExecutor {
    Transaction(OwnedMutexGuard<Option<Box<dyn StoreTransaction>>>),
    Implicit(Box<dyn StoreExecutor>),
}

impl ScopedExecutor {
    pub(crate) fn get(&mut self) -> Result<&mut dyn StoreExecutor> {
        match self {
            ScopedExecutor::Transaction(guard) => match (**guard).as_mut() {
                Some(tx) => Ok(tx.executor()),
                None => Err(Error::TransactionNotFound),
            },
            ScopedExecutor::Implicit(executor) => Ok(&mut **executor),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryStore;
    use common::models::Currency;

    fn setup() -> (MemoryStore, TransactionScope) {
        let store = MemoryStore::new();
        let transactions = TransactionScope::new(Arc::new(store.clone()));
        (store, transactions)
    }

    #[tokio::test]
    async fn commit_without_begin_is_transaction_not_found() {
        let (_, transactions) = setup();
        let scope = RequestScope::new();

        assert_eq!(
            transactions.commit(&scope).await,
            Err(Error::TransactionNotFound)
        );
        assert_eq!(
            transactions.rollback(&scope).await,
            Err(Error::TransactionNotFound)
        );
        assert!(transactions.extract(&scope).is_none());
    }

    #[tokio::test]
    async fn handle_is_released_exactly_once() {
        let (store, transactions) = setup();
        let scope = transactions.begin(&RequestScope::new()).await.unwrap();
        assert!(transactions.extract(&scope).is_some());

        transactions.commit(&scope).await.unwrap();
        assert_eq!(
            transactions.commit(&scope).await,
            Err(Error::TransactionNotFound)
        );
        assert_eq!(
            transactions.rollback(&scope).await,
            Err(Error::TransactionNotFound)
        );
        assert_eq!(store.commits(), 1);
        assert_eq!(store.rollbacks(), 0);
    }

    #[tokio::test]
    async fn begin_twice_on_same_scope_is_rejected() {
        let (_, transactions) = setup();
        let scope = transactions.begin(&RequestScope::new()).await.unwrap();

        assert!(matches!(
            transactions.begin(&scope).await,
            Err(Error::Internal(_))
        ));
        transactions.rollback_on_exit(&scope).await;
    }

    #[tokio::test]
    async fn begin_failure_is_internal_error() {
        let (store, transactions) = setup();
        store.fail_begin(true);

        assert!(matches!(
            transactions.begin(&RequestScope::new()).await,
            Err(Error::Internal(_))
        ));
    }

    #[tokio::test]
    async fn in_transaction_rolls_back_failed_operation() {
        let (store, transactions) = setup();
        let usdt = Currency::crypto("USDT").unwrap();

        let result: Result<()> = transactions
            .in_transaction(&RequestScope::new(), |scope| {
                let transactions = transactions.clone();
                let usdt = usdt.clone();
                async move {
                    let mut conn = transactions.executor(&scope).await?;
                    conn.get()?.insert_currency(&usdt).await?;
                    Err(Error::Internal("later step failed".to_string()))
                }
            })
            .await;

        assert!(matches!(result, Err(Error::Internal(_))));
        assert_eq!(store.currency_count(), 0);
        assert_eq!(store.rollbacks(), 1);
    }

    #[tokio::test]
    async fn in_transaction_commits_successful_operation() {
        let (store, transactions) = setup();
        let usdt = Currency::crypto("USDT").unwrap();

        let id = transactions
            .in_transaction(&RequestScope::new(), |scope| {
                let transactions = transactions.clone();
                let usdt = usdt.clone();
                async move {
                    let mut conn = transactions.executor(&scope).await?;
                    let id = conn.get()?.insert_currency(&usdt).await?;
                    Ok(id)
                }
            })
            .await
            .unwrap();

        assert!(id > 0);
        assert_eq!(store.currency_count(), 1);
        assert_eq!(store.commits(), 1);
    }

    #[tokio::test]
    async fn cancelled_scope_rolls_back_instead_of_committing() {
        let (store, transactions) = setup();
        let token = tokio_util::sync::CancellationToken::new();
        let scope = RequestScope::new().with_cancellation(token.clone());

        let result = transactions
            .in_transaction(&scope, |tx_scope| {
                let transactions = transactions.clone();
                let token = token.clone();
                async move {
                    let mut conn = transactions.executor(&tx_scope).await?;
                    conn.get()?.insert_currency(&Currency::crypto("BTC").unwrap()).await?;
                    token.cancel();
                    Ok(())
                }
            })
            .await;

        assert_eq!(result, Err(Error::Cancelled));
        assert_eq!(store.currency_count(), 0);
        assert_eq!(store.commits(), 0);
    }
}
