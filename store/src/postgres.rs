use crate::backend::{PairRecord, RelationalStore, StoreExecutor, StoreTransaction};
use crate::error::{classify_insert, classify_read};
use crate::{StoreConfig, StoreError};
use async_trait::async_trait;
use common::{
    models::{Currency, CurrencyType, TRANSITIVE_LEVEL},
    Error, Result,
};
use sqlx::{
    postgres::{PgConnection, PgPoolOptions},
    PgPool, Postgres, Transaction,
};
use std::ops::DerefMut;
use tracing::{debug, error, info, warn};

type PairRow = (i64, i16, i64, i64, Option<i64>);
type CurrencyRow = (i64, String, String, String);

/// PostgreSQL-backed [`RelationalStore`].
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    /// Connect (retrying per `config`) and apply pending migrations.
    pub async fn connect(config: &StoreConfig) -> std::result::Result<Self, StoreError> {
        let attempts = config.connect_attempts.max(1);
        let mut attempt = 0;

        let pool = loop {
            attempt += 1;
            let connecting = PgPoolOptions::new()
                .max_connections(config.max_connections)
                .acquire_timeout(config.connect_timeout)
                .connect(&config.database_url);

            let outcome = match tokio::time::timeout(config.connect_timeout, connecting).await {
                Ok(result) => result.map_err(StoreError::from),
                Err(_) => Err(StoreError::ConfigError(format!(
                    "connection attempt timed out after {:?}",
                    config.connect_timeout
                ))),
            };

            match outcome {
                Ok(pool) => break pool,
                Err(e) if attempt < attempts => {
                    warn!(
                        attempt,
                        attempts,
                        error = %e,
                        "Failed to connect to PostgreSQL, retrying"
                    );
                    tokio::time::sleep(config.connect_retry_interval).await;
                }
                Err(e) => {
                    error!(attempts, error = %e, "Giving up connecting to PostgreSQL");
                    return Err(e);
                }
            }
        };

        sqlx::migrate!("./migrations").run(&pool).await?;
        info!("PostgreSQL store initialized");

        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl RelationalStore for PgStore {
    async fn executor(&self) -> Result<Box<dyn StoreExecutor>> {
        let conn = self
            .pool
            .acquire()
            .await
            .map_err(|e| Error::from(StoreError::from(e)))?;
        Ok(Box::new(PgExecutor { conn }))
    }

    async fn begin(&self) -> Result<Box<dyn StoreTransaction>> {
        let tx = self.pool.begin().await.map_err(|e| {
            error!(error = %e, "Error starting transaction");
            Error::Internal(format!("cannot open transaction: {}", e))
        })?;
        Ok(Box::new(PgExecutor { conn: tx }))
    }
}

/// Runs statements on anything that derefs to a live connection: a pooled
/// connection or an open transaction.
pub struct PgExecutor<C> {
    conn: C,
}

/// Splits ordered currency ids into (level, first, second, third).
fn chain_columns(currency_ids: &[i64]) -> Result<(i16, i64, i64, Option<i64>)> {
    match currency_ids {
        [first, second] => Ok((2, *first, *second, None)),
        [first, second, third] => Ok((3, *first, *second, Some(*third))),
        other => Err(Error::InvalidConverterPair(format!(
            "expected 2 or 3 currencies, got {}",
            other.len()
        ))),
    }
}

fn pair_record((id, level, first, second, third): PairRow) -> Result<PairRecord> {
    let mut currency_ids = vec![first, second];
    if level as usize == TRANSITIVE_LEVEL {
        let third = third.ok_or_else(|| {
            Error::from(StoreError::ConversionError(format!(
                "pair {} has level 3 but no third currency",
                id
            )))
        })?;
        currency_ids.push(third);
    }
    Ok(PairRecord { id, currency_ids })
}

fn currency_from_row((id, currency_type, code, bank): CurrencyRow) -> Result<Currency> {
    let conversion =
        |e: Error| Error::from(StoreError::ConversionError(format!("currency {}: {}", id, e)));

    let currency_type = currency_type.parse().map_err(conversion)?;
    Currency::new(currency_type, code, Some(bank)).map_err(conversion)
}

#[async_trait]
impl<C> StoreExecutor for PgExecutor<C>
where
    C: DerefMut<Target = PgConnection> + Send,
{
    async fn find_currency(&mut self, currency: &Currency) -> Result<i64> {
        sqlx::query_scalar::<_, i64>(
            "SELECT id FROM currencies WHERE type = $1 AND code = $2 AND bank = $3",
        )
        .bind(currency.currency_type().as_str())
        .bind(currency.code())
        .bind(currency.bank_code())
        .fetch_one(&mut *self.conn)
        .await
        .map_err(|e| classify_read(e, || Error::CurrencyNotFound(currency.to_string())))
    }

    async fn insert_currency(&mut self, currency: &Currency) -> Result<i64> {
        debug!(currency = %currency, "Inserting currency");

        // DO NOTHING keeps a surrounding transaction usable after a lost race.
        let id = sqlx::query_scalar::<_, i64>(
            "INSERT INTO currencies (type, code, bank) VALUES ($1, $2, $3) \
             ON CONFLICT (type, code, bank) DO NOTHING RETURNING id",
        )
        .bind(currency.currency_type().as_str())
        .bind(currency.code())
        .bind(currency.bank_code())
        .fetch_optional(&mut *self.conn)
        .await
        .map_err(|e| classify_insert(e, || Error::CurrencyAlreadyExists(currency.to_string())))?;

        id.ok_or_else(|| Error::CurrencyAlreadyExists(currency.to_string()))
    }

    async fn currency_by_id(&mut self, id: i64) -> Result<Currency> {
        let row = sqlx::query_as::<_, CurrencyRow>(
            "SELECT id, type, code, bank FROM currencies WHERE id = $1",
        )
        .bind(id)
        .fetch_one(&mut *self.conn)
        .await
        .map_err(|e| classify_read(e, || Error::CurrencyNotFound(format!("id {}", id))))?;

        currency_from_row(row)
    }

    async fn find_pair(&mut self, currency_ids: &[i64]) -> Result<i64> {
        let (level, first, second, third) = chain_columns(currency_ids)?;

        sqlx::query_scalar::<_, i64>(
            "SELECT id FROM converter_pairs \
             WHERE level = $1 AND first_currency_id = $2 AND second_currency_id = $3 \
             AND third_currency_id IS NOT DISTINCT FROM $4",
        )
        .bind(level)
        .bind(first)
        .bind(second)
        .bind(third)
        .fetch_one(&mut *self.conn)
        .await
        .map_err(|e| {
            classify_read(e, || {
                Error::ConverterPairNotFound(format!("currency ids {:?}", currency_ids))
            })
        })
    }

    async fn insert_pair(&mut self, currency_ids: &[i64]) -> Result<i64> {
        let (level, first, second, third) = chain_columns(currency_ids)?;
        let already_exists =
            || Error::ConverterPairAlreadyExists(format!("currency ids {:?}", currency_ids));

        let id = sqlx::query_scalar::<_, i64>(
            "INSERT INTO converter_pairs \
             (level, first_currency_id, second_currency_id, third_currency_id) \
             VALUES ($1, $2, $3, $4) \
             ON CONFLICT (level, first_currency_id, second_currency_id, (COALESCE(third_currency_id, 0))) \
             DO NOTHING RETURNING id",
        )
        .bind(level)
        .bind(first)
        .bind(second)
        .bind(third)
        .fetch_optional(&mut *self.conn)
        .await
        .map_err(|e| classify_insert(e, already_exists))?;

        id.ok_or_else(already_exists)
    }

    async fn list_pairs(&mut self) -> Result<Vec<PairRecord>> {
        let rows = sqlx::query_as::<_, PairRow>(
            "SELECT id, level, first_currency_id, second_currency_id, third_currency_id \
             FROM converter_pairs ORDER BY id",
        )
        .fetch_all(&mut *self.conn)
        .await
        .map_err(|e| Error::from(StoreError::from(e)))?;

        rows.into_iter().map(pair_record).collect()
    }

    async fn list_user_pairs(&mut self, user_id: i64) -> Result<Vec<PairRecord>> {
        let rows = sqlx::query_as::<_, PairRow>(
            "SELECT p.id, p.level, p.first_currency_id, p.second_currency_id, p.third_currency_id \
             FROM converter_pairs p \
             JOIN user_converter_pairs u ON u.converter_pair_id = p.id \
             WHERE u.user_id = $1 ORDER BY p.id",
        )
        .bind(user_id)
        .fetch_all(&mut *self.conn)
        .await
        .map_err(|e| Error::from(StoreError::from(e)))?;

        rows.into_iter().map(pair_record).collect()
    }

    async fn insert_user_pair(&mut self, user_id: i64, pair_id: i64) -> Result<i64> {
        let already_exists = || {
            Error::ConverterPairAlreadyExists(format!(
                "user {} is already subscribed to pair {}",
                user_id, pair_id
            ))
        };

        let id = sqlx::query_scalar::<_, i64>(
            "INSERT INTO user_converter_pairs (user_id, converter_pair_id) VALUES ($1, $2) \
             ON CONFLICT (user_id, converter_pair_id) DO NOTHING RETURNING id",
        )
        .bind(user_id)
        .bind(pair_id)
        .fetch_optional(&mut *self.conn)
        .await
        .map_err(|e| classify_insert(e, already_exists))?;

        id.ok_or_else(already_exists)
    }

    async fn list_user_currencies(
        &mut self,
        user_id: i64,
        currency_type: Option<CurrencyType>,
    ) -> Result<Vec<Currency>> {
        let rows = sqlx::query_as::<_, CurrencyRow>(
            "SELECT c.id, c.type, c.code, c.bank \
             FROM currencies c \
             JOIN user_currencies u ON u.currency_id = c.id \
             WHERE u.user_id = $1 AND ($2::TEXT IS NULL OR c.type = $2) \
             ORDER BY c.id",
        )
        .bind(user_id)
        .bind(currency_type.map(|t| t.as_str()))
        .fetch_all(&mut *self.conn)
        .await
        .map_err(|e| Error::from(StoreError::from(e)))?;

        rows.into_iter().map(currency_from_row).collect()
    }

    async fn insert_user_currency(&mut self, user_id: i64, currency_id: i64) -> Result<i64> {
        let already_exists = || {
            Error::CurrencyAlreadyExists(format!(
                "user {} already has currency {}",
                user_id, currency_id
            ))
        };

        let id = sqlx::query_scalar::<_, i64>(
            "INSERT INTO user_currencies (user_id, currency_id) VALUES ($1, $2) \
             ON CONFLICT (user_id, currency_id) DO NOTHING RETURNING id",
        )
        .bind(user_id)
        .bind(currency_id)
        .fetch_optional(&mut *self.conn)
        .await
        .map_err(|e| classify_insert(e, already_exists))?;

        id.ok_or_else(already_exists)
    }
}

#[async_trait]
impl StoreTransaction for PgExecutor<Transaction<'static, Postgres>> {
    fn executor(&mut self) -> &mut dyn StoreExecutor {
        self
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        self.conn
            .commit()
            .await
            .map_err(|e| Error::from(StoreError::from(e)))
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        self.conn
            .rollback()
            .await
            .map_err(|e| Error::from(StoreError::from(e)))
    }
}
