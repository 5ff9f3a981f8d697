//! Capability traits over the relational schema.
//!
//! Adapters classify their driver errors into [`common::Error`] here, so
//! everything above this boundary only sees domain error kinds.

use async_trait::async_trait;
use common::{
    models::{Currency, CurrencyType},
    Result,
};

/// A persisted converter pair as stored: its id and the ordered ids of its
/// currencies (two or three).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PairRecord {
    pub id: i64,
    pub currency_ids: Vec<i64>,
}

/// Row-level operations, available both on an implicit (autocommit)
/// connection and inside a transaction.
#[async_trait]
pub trait StoreExecutor: Send {
    /// Id of the currency with exactly this (type, code, bank); `CurrencyNotFound` otherwise.
    async fn find_currency(&mut self, currency: &Currency) -> Result<i64>;

    /// Insert a currency; `CurrencyAlreadyExists` if the triple is taken.
    async fn insert_currency(&mut self, currency: &Currency) -> Result<i64>;

    /// Currency by id; `CurrencyNotFound` otherwise.
    async fn currency_by_id(&mut self, id: i64) -> Result<Currency>;

    /// Id of the pair with this level and ordered currency ids; `ConverterPairNotFound` otherwise.
    async fn find_pair(&mut self, currency_ids: &[i64]) -> Result<i64>;

    /// Insert a pair; `ConverterPairAlreadyExists` if the sequence is taken.
    async fn insert_pair(&mut self, currency_ids: &[i64]) -> Result<i64>;

    /// All persisted pairs, ordered by id.
    async fn list_pairs(&mut self) -> Result<Vec<PairRecord>>;

    /// Pairs linked to the user, ordered by pair id.
    async fn list_user_pairs(&mut self, user_id: i64) -> Result<Vec<PairRecord>>;

    /// Link a user to a pair; `ConverterPairAlreadyExists` if already linked.
    async fn insert_user_pair(&mut self, user_id: i64, pair_id: i64) -> Result<i64>;

    /// Currencies linked to the user, ordered by currency id, optionally of one type.
    async fn list_user_currencies(
        &mut self,
        user_id: i64,
        currency_type: Option<CurrencyType>,
    ) -> Result<Vec<Currency>>;

    /// Link a user to a currency; `CurrencyAlreadyExists` if already linked.
    async fn insert_user_currency(&mut self, user_id: i64, currency_id: i64) -> Result<i64>;
}

/// An open transaction. Dropping it without commit rolls it back.
#[async_trait]
pub trait StoreTransaction: StoreExecutor {
    fn executor(&mut self) -> &mut dyn StoreExecutor;

    async fn commit(self: Box<Self>) -> Result<()>;

    async fn rollback(self: Box<Self>) -> Result<()>;
}

/// A relational backing store: a source of connections and transactions.
#[async_trait]
pub trait RelationalStore: Send + Sync {
    /// A connection outside any transaction; each statement commits on its own.
    async fn executor(&self) -> Result<Box<dyn StoreExecutor>>;

    async fn begin(&self) -> Result<Box<dyn StoreTransaction>>;
}
