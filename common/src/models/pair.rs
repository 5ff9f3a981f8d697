use crate::models::{Currency, Exchange};
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Shortest supported chain: a direct pair.
pub const DIRECT_LEVEL: usize = 2;
/// Longest supported chain: two direct pairs sharing an intermediate currency.
pub const TRANSITIVE_LEVEL: usize = 3;

/// An ordered conversion path of two or three distinct currencies.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(try_from = "Vec<Currency>", into = "Vec<Currency>")]
pub struct ConverterPair {
    currencies: Vec<Currency>,
}

impl ConverterPair {
    pub fn new(currencies: Vec<Currency>) -> Result<Self> {
        if currencies.len() != DIRECT_LEVEL && currencies.len() != TRANSITIVE_LEVEL {
            return Err(Error::InvalidConverterPair(format!(
                "expected {} or {} currencies, got {}",
                DIRECT_LEVEL,
                TRANSITIVE_LEVEL,
                currencies.len()
            )));
        }

        for (i, currency) in currencies.iter().enumerate() {
            if currencies[..i].contains(currency) {
                return Err(Error::InvalidConverterPair(format!(
                    "currency {} appears more than once",
                    currency
                )));
            }
        }

        Ok(Self { currencies })
    }

    /// Build a two-currency pair.
    pub fn direct(from: Currency, to: Currency) -> Result<Self> {
        Self::new(vec![from, to])
    }

    pub fn currencies(&self) -> &[Currency] {
        &self.currencies
    }

    /// Number of currencies in the chain (2 or 3).
    pub fn level(&self) -> usize {
        self.currencies.len()
    }

    pub fn is_direct(&self) -> bool {
        self.level() == DIRECT_LEVEL
    }

    pub fn first(&self) -> &Currency {
        &self.currencies[0]
    }

    pub fn last(&self) -> &Currency {
        &self.currencies[self.currencies.len() - 1]
    }
}

impl TryFrom<Vec<Currency>> for ConverterPair {
    type Error = Error;

    fn try_from(currencies: Vec<Currency>) -> Result<Self> {
        ConverterPair::new(currencies)
    }
}

impl From<ConverterPair> for Vec<Currency> {
    fn from(pair: ConverterPair) -> Self {
        pair.currencies
    }
}

impl fmt::Display for ConverterPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for currency in &self.currencies {
            if !first {
                f.write_str("->")?;
            }
            write!(f, "{}", currency)?;
            first = false;
        }
        Ok(())
    }
}

/// A user-defined target rate for a chain.
///
/// Only the shape exists; storing and evaluating thresholds is not supported.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ThresholdConvertPair {
    pub pair: ConverterPair,
    pub target: Exchange,
}
