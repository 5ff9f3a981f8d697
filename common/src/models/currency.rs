use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Whether a currency is traded directly or through a bank intermediary.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum CurrencyType {
    #[serde(rename = "crypto")]
    Crypto,
    #[serde(rename = "classic")]
    Classic,
}

impl CurrencyType {
    pub fn as_str(&self) -> &'static str {
        match self {
            CurrencyType::Crypto => "crypto",
            CurrencyType::Classic => "classic",
        }
    }
}

impl fmt::Display for CurrencyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CurrencyType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "crypto" => Ok(CurrencyType::Crypto),
            "classic" => Ok(CurrencyType::Classic),
            other => Err(Error::InvalidCurrency(format!(
                "unknown currency type '{}'",
                other
            ))),
        }
    }
}

/// A currency as identified by the (type, code, bank) triple.
///
/// Classic (fiat) currencies are always bound to the bank they are paid
/// through, so `RUB` via one bank and `RUB` via another are distinct
/// currencies. Crypto currencies never carry a bank.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(try_from = "RawCurrency")]
pub struct Currency {
    #[serde(rename = "type")]
    currency_type: CurrencyType,
    /// Ticker or ISO symbol (e.g., "USDT", "RUB")
    code: String,
    /// Payment intermediary for classic currencies (e.g., "TinkoffNew")
    #[serde(skip_serializing_if = "Option::is_none")]
    bank: Option<String>,
}

impl Currency {
    /// Build a currency, enforcing the bank rules of its type.
    pub fn new(
        currency_type: CurrencyType,
        code: impl Into<String>,
        bank: Option<String>,
    ) -> Result<Self> {
        let code = code.into();
        if code.trim().is_empty() {
            return Err(Error::InvalidCurrency("empty currency code".to_string()));
        }

        let bank = bank.filter(|b| !b.is_empty());
        match (currency_type, &bank) {
            (CurrencyType::Classic, None) => {
                return Err(Error::InvalidCurrency(format!(
                    "classic currency {} requires a bank",
                    code
                )))
            }
            (CurrencyType::Crypto, Some(b)) => {
                return Err(Error::InvalidCurrency(format!(
                    "crypto currency {} cannot have a bank ({})",
                    code, b
                )))
            }
            _ => {}
        }

        Ok(Self {
            currency_type,
            code,
            bank,
        })
    }

    pub fn crypto(code: impl Into<String>) -> Result<Self> {
        Self::new(CurrencyType::Crypto, code, None)
    }

    pub fn classic(code: impl Into<String>, bank: impl Into<String>) -> Result<Self> {
        Self::new(CurrencyType::Classic, code, Some(bank.into()))
    }

    /// Catalog entries known to satisfy the bank rules.
    pub(crate) fn catalog(
        currency_type: CurrencyType,
        code: &'static str,
        bank: Option<&'static str>,
    ) -> Self {
        Self {
            currency_type,
            code: code.to_string(),
            bank: bank.map(str::to_string),
        }
    }

    pub fn currency_type(&self) -> CurrencyType {
        self.currency_type
    }

    pub fn code(&self) -> &str {
        &self.code
    }

    pub fn bank(&self) -> Option<&str> {
        self.bank.as_deref()
    }

    pub fn is_crypto(&self) -> bool {
        self.currency_type == CurrencyType::Crypto
    }

    /// Bank as persisted; crypto currencies store an empty string.
    pub fn bank_code(&self) -> &str {
        self.bank.as_deref().unwrap_or("")
    }
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.bank {
            Some(bank) => write!(f, "{}@{}", self.code, bank),
            None => write!(f, "{}", self.code),
        }
    }
}

#[derive(Deserialize)]
struct RawCurrency {
    #[serde(rename = "type")]
    currency_type: CurrencyType,
    code: String,
    #[serde(default)]
    bank: Option<String>,
}

impl TryFrom<RawCurrency> for Currency {
    type Error = Error;

    fn try_from(raw: RawCurrency) -> Result<Self> {
        Currency::new(raw.currency_type, raw.code, raw.bank)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::seed;

    #[test]
    fn classic_currency_requires_bank() {
        let result = Currency::new(CurrencyType::Classic, "RUB", None);
        assert!(matches!(result, Err(Error::InvalidCurrency(_))));

        let result = Currency::new(CurrencyType::Classic, "RUB", Some(String::new()));
        assert!(matches!(result, Err(Error::InvalidCurrency(_))));
    }

    #[test]
    fn crypto_currency_normalizes_empty_bank() {
        let usdt = Currency::new(CurrencyType::Crypto, "USDT", Some(String::new())).unwrap();
        assert_eq!(usdt, Currency::crypto("USDT").unwrap());
        assert_eq!(usdt.bank_code(), "");

        let result = Currency::new(CurrencyType::Crypto, "USDT", Some("KaspiBank".to_string()));
        assert!(matches!(result, Err(Error::InvalidCurrency(_))));
    }

    #[test]
    fn shorthand_constructors_enforce_bank_rules() {
        assert!(matches!(
            Currency::classic("RUB", ""),
            Err(Error::InvalidCurrency(_))
        ));
        assert!(matches!(Currency::crypto(" "), Err(Error::InvalidCurrency(_))));

        let rub = Currency::classic("RUB", "TinkoffNew").unwrap();
        assert_eq!(rub.currency_type(), CurrencyType::Classic);
        assert_eq!(rub.code(), "RUB");
        assert_eq!(rub.bank(), Some("TinkoffNew"));
    }

    #[test]
    fn catalog_currencies_pass_validation() {
        for currency in [seed::usdt(), seed::rub_tinkoff(), seed::kzt_kaspi()] {
            let rebuilt = Currency::new(
                currency.currency_type(),
                currency.code(),
                currency.bank().map(str::to_string),
            );
            assert_eq!(rebuilt, Ok(currency));
        }
    }

    #[test]
    fn deserialize_validates() {
        let rub: Currency =
            serde_json::from_str(r#"{"type":"classic","code":"RUB","bank":"TinkoffNew"}"#)
                .unwrap();
        assert_eq!(rub, Currency::classic("RUB", "TinkoffNew").unwrap());

        let bad = serde_json::from_str::<Currency>(r#"{"type":"classic","code":"RUB"}"#);
        assert!(bad.is_err());
    }

    #[test]
    fn currency_type_round_trips_through_text() {
        assert_eq!("crypto".parse::<CurrencyType>().unwrap(), CurrencyType::Crypto);
        assert_eq!(CurrencyType::Classic.to_string(), "classic");
        assert!("fiat".parse::<CurrencyType>().is_err());
    }
}
