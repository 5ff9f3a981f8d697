mod backend;
mod config;
mod currency_registry;
mod error;
mod pair_store;
mod postgres;
mod scope;
mod transaction;

#[cfg(any(test, feature = "test-utils"))]
pub mod memory;

pub use backend::{PairRecord, RelationalStore, StoreExecutor, StoreTransaction};
pub use config::StoreConfig;
pub use currency_registry::CurrencyRegistry;
pub use error::StoreError;
pub use pair_store::PairStore;
pub use postgres::PgStore;
pub use scope::{RequestScope, TransactionSlot};
pub use transaction::TransactionScope;
