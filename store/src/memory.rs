//! In-memory [`RelationalStore`] used by tests across the workspace.
//!
//! Uncommitted rows are visible to other connections (no isolation), but
//! rollback removes exactly the rows the transaction inserted.

use crate::backend::{PairRecord, RelationalStore, StoreExecutor, StoreTransaction};
use async_trait::async_trait;
use common::{
    models::{Currency, CurrencyType},
    Error, Result,
};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

#[derive(Default)]
struct Tables {
    next_id: i64,
    currencies: BTreeMap<i64, Currency>,
    pairs: BTreeMap<i64, Vec<i64>>,
    user_pairs: BTreeMap<i64, (i64, i64)>,
    user_currencies: BTreeMap<i64, (i64, i64)>,
}

impl Tables {
    fn next_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }
}

#[derive(Debug, Clone, Copy)]
enum Undo {
    Currency(i64),
    Pair(i64),
    UserPair(i64),
    UserCurrency(i64),
}

#[derive(Default)]
struct Inner {
    tables: Mutex<Tables>,
    fail_begin: AtomicBool,
    fail_user_pair_insert: AtomicBool,
    commits: AtomicUsize,
    rollbacks: AtomicUsize,
}

#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent `begin` fail.
    pub fn fail_begin(&self, fail: bool) {
        self.inner.fail_begin.store(fail, Ordering::SeqCst);
    }

    /// Make every subsequent user-pair insert fail with a database error.
    pub fn fail_user_pair_insert(&self, fail: bool) {
        self.inner.fail_user_pair_insert.store(fail, Ordering::SeqCst);
    }

    pub fn currency_count(&self) -> usize {
        self.inner.tables.lock().currencies.len()
    }

    pub fn pair_count(&self) -> usize {
        self.inner.tables.lock().pairs.len()
    }

    pub fn user_pair_count(&self) -> usize {
        self.inner.tables.lock().user_pairs.len()
    }

    pub fn user_currency_count(&self) -> usize {
        self.inner.tables.lock().user_currencies.len()
    }

    pub fn commits(&self) -> usize {
        self.inner.commits.load(Ordering::SeqCst)
    }

    pub fn rollbacks(&self) -> usize {
        self.inner.rollbacks.load(Ordering::SeqCst)
    }

    fn undo(&self, log: &[Undo]) {
        let mut tables = self.inner.tables.lock();
        for entry in log.iter().rev() {
            match *entry {
                Undo::Currency(id) => {
                    tables.currencies.remove(&id);
                }
                Undo::Pair(id) => {
                    tables.pairs.remove(&id);
                }
                Undo::UserPair(id) => {
                    tables.user_pairs.remove(&id);
                }
                Undo::UserCurrency(id) => {
                    tables.user_currencies.remove(&id);
                }
            }
        }
    }
}

#[async_trait]
impl RelationalStore for MemoryStore {
    async fn executor(&self) -> Result<Box<dyn StoreExecutor>> {
        Ok(Box::new(MemoryConnection {
            store: self.clone(),
            undo: None,
        }))
    }

    async fn begin(&self) -> Result<Box<dyn StoreTransaction>> {
        if self.inner.fail_begin.load(Ordering::SeqCst) {
            return Err(Error::Internal("cannot open transaction".to_string()));
        }
        Ok(Box::new(MemoryConnection {
            store: self.clone(),
            undo: Some(Vec::new()),
        }))
    }
}

/// A connection; `undo` is `Some` while it carries an open transaction.
struct MemoryConnection {
    store: MemoryStore,
    undo: Option<Vec<Undo>>,
}

impl MemoryConnection {
    fn record(&mut self, entry: Undo) {
        if let Some(log) = self.undo.as_mut() {
            log.push(entry);
        }
    }
}

#[async_trait]
impl StoreExecutor for MemoryConnection {
    async fn find_currency(&mut self, currency: &Currency) -> Result<i64> {
        tokio::task::yield_now().await;

        let tables = self.store.inner.tables.lock();
        tables
            .currencies
            .iter()
            .find(|(_, stored)| *stored == currency)
            .map(|(id, _)| *id)
            .ok_or_else(|| Error::CurrencyNotFound(currency.to_string()))
    }

    async fn insert_currency(&mut self, currency: &Currency) -> Result<i64> {
        let id = {
            let mut tables = self.store.inner.tables.lock();
            if tables.currencies.values().any(|stored| stored == currency) {
                return Err(Error::CurrencyAlreadyExists(currency.to_string()));
            }
            let id = tables.next_id();
            tables.currencies.insert(id, currency.clone());
            id
        };
        self.record(Undo::Currency(id));
        Ok(id)
    }

    async fn currency_by_id(&mut self, id: i64) -> Result<Currency> {
        let tables = self.store.inner.tables.lock();
        tables
            .currencies
            .get(&id)
            .cloned()
            .ok_or_else(|| Error::CurrencyNotFound(format!("id {}", id)))
    }

    async fn find_pair(&mut self, currency_ids: &[i64]) -> Result<i64> {
        tokio::task::yield_now().await;

        let tables = self.store.inner.tables.lock();
        tables
            .pairs
            .iter()
            .find(|(_, stored)| stored.as_slice() == currency_ids)
            .map(|(id, _)| *id)
            .ok_or_else(|| Error::ConverterPairNotFound(format!("currency ids {:?}", currency_ids)))
    }

    async fn insert_pair(&mut self, currency_ids: &[i64]) -> Result<i64> {
        if !(2..=3).contains(&currency_ids.len()) {
            return Err(Error::InvalidConverterPair(format!(
                "expected 2 or 3 currencies, got {}",
                currency_ids.len()
            )));
        }

        let id = {
            let mut tables = self.store.inner.tables.lock();
            if let Some(missing) = currency_ids
                .iter()
                .find(|id| !tables.currencies.contains_key(*id))
            {
                return Err(Error::Database(format!(
                    "foreign key violation: currency {} does not exist",
                    missing
                )));
            }
            if tables
                .pairs
                .values()
                .any(|stored| stored.as_slice() == currency_ids)
            {
                return Err(Error::ConverterPairAlreadyExists(format!(
                    "currency ids {:?}",
                    currency_ids
                )));
            }
            let id = tables.next_id();
            tables.pairs.insert(id, currency_ids.to_vec());
            id
        };
        self.record(Undo::Pair(id));
        Ok(id)
    }

    async fn list_pairs(&mut self) -> Result<Vec<PairRecord>> {
        let tables = self.store.inner.tables.lock();
        Ok(tables
            .pairs
            .iter()
            .map(|(id, currency_ids)| PairRecord {
                id: *id,
                currency_ids: currency_ids.clone(),
            })
            .collect())
    }

    async fn list_user_pairs(&mut self, user_id: i64) -> Result<Vec<PairRecord>> {
        let tables = self.store.inner.tables.lock();
        let mut records: Vec<PairRecord> = tables
            .user_pairs
            .values()
            .filter(|(user, _)| *user == user_id)
            .filter_map(|(_, pair_id)| {
                tables.pairs.get(pair_id).map(|currency_ids| PairRecord {
                    id: *pair_id,
                    currency_ids: currency_ids.clone(),
                })
            })
            .collect();
        records.sort_by_key(|record| record.id);
        Ok(records)
    }

    async fn insert_user_pair(&mut self, user_id: i64, pair_id: i64) -> Result<i64> {
        if self.store.inner.fail_user_pair_insert.load(Ordering::SeqCst) {
            return Err(Error::Database("user pair insert failed".to_string()));
        }

        let id = {
            let mut tables = self.store.inner.tables.lock();
            if !tables.pairs.contains_key(&pair_id) {
                return Err(Error::Database(format!(
                    "foreign key violation: pair {} does not exist",
                    pair_id
                )));
            }
            if tables
                .user_pairs
                .values()
                .any(|link| *link == (user_id, pair_id))
            {
                return Err(Error::ConverterPairAlreadyExists(format!(
                    "user {} is already subscribed to pair {}",
                    user_id, pair_id
                )));
            }
            let id = tables.next_id();
            tables.user_pairs.insert(id, (user_id, pair_id));
            id
        };
        self.record(Undo::UserPair(id));
        Ok(id)
    }

    async fn list_user_currencies(
        &mut self,
        user_id: i64,
        currency_type: Option<CurrencyType>,
    ) -> Result<Vec<Currency>> {
        let tables = self.store.inner.tables.lock();
        let mut linked: Vec<(i64, Currency)> = tables
            .user_currencies
            .values()
            .filter(|(user, _)| *user == user_id)
            .filter_map(|(_, currency_id)| {
                tables
                    .currencies
                    .get(currency_id)
                    .map(|currency| (*currency_id, currency.clone()))
            })
            .filter(|(_, currency)| {
                currency_type.map_or(true, |wanted| currency.currency_type() == wanted)
            })
            .collect();
        linked.sort_by_key(|(id, _)| *id);
        Ok(linked.into_iter().map(|(_, currency)| currency).collect())
    }

    async fn insert_user_currency(&mut self, user_id: i64, currency_id: i64) -> Result<i64> {
        tokio::task::yield_now().await;

        let id = {
            let mut tables = self.store.inner.tables.lock();
            if !tables.currencies.contains_key(&currency_id) {
                return Err(Error::Database(format!(
                    "foreign key violation: currency {} does not exist",
                    currency_id
                )));
            }
            if tables
                .user_currencies
                .values()
                .any(|link| *link == (user_id, currency_id))
            {
                return Err(Error::CurrencyAlreadyExists(format!(
                    "user {} already has currency {}",
                    user_id, currency_id
                )));
            }
            let id = tables.next_id();
            tables.user_currencies.insert(id, (user_id, currency_id));
            id
        };
        self.record(Undo::UserCurrency(id));
        Ok(id)
    }
}

#[async_trait]
impl StoreTransaction for MemoryConnection {
    fn executor(&mut self) -> &mut dyn StoreExecutor {
        self
    }

    async fn commit(mut self: Box<Self>) -> Result<()> {
        self.undo = None;
        self.store.inner.commits.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn rollback(mut self: Box<Self>) -> Result<()> {
        if let Some(log) = self.undo.take() {
            self.store.undo(&log);
        }
        self.store.inner.rollbacks.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

impl Drop for MemoryConnection {
    fn drop(&mut self) {
        if let Some(log) = self.undo.take() {
            self.store.undo(&log);
        }
    }
}
