use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A strictly positive conversion rate along a chain.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, PartialOrd)]
#[serde(try_from = "f64", into = "f64")]
pub struct Exchange(f64);

impl Exchange {
    pub fn new(rate: f64) -> Result<Self> {
        if !rate.is_finite() || rate <= 0.0 {
            return Err(Error::ExternalProvider(format!(
                "rate must be a positive number, got {}",
                rate
            )));
        }
        Ok(Self(rate))
    }

    pub fn value(&self) -> f64 {
        self.0
    }

    /// Rate through a shared intermediate currency: `self / other`.
    pub fn cross(self, other: Exchange) -> Result<Exchange> {
        Exchange::new(self.0 / other.0)
    }
}

impl TryFrom<f64> for Exchange {
    type Error = Error;

    fn try_from(rate: f64) -> Result<Self> {
        Exchange::new(rate)
    }
}

impl From<Exchange> for f64 {
    fn from(exchange: Exchange) -> Self {
        exchange.0
    }
}

impl fmt::Display for Exchange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_non_positive_rates() {
        assert!(Exchange::new(0.0).is_err());
        assert!(Exchange::new(-1.5).is_err());
        assert!(Exchange::new(f64::NAN).is_err());
        assert!(Exchange::new(f64::INFINITY).is_err());
    }

    #[test]
    fn cross_divides() {
        let rub_usdt = Exchange::new(92.0).unwrap();
        let usdt_kzt = Exchange::new(460.0).unwrap();
        let cross = rub_usdt.cross(usdt_kzt).unwrap();
        assert!((cross.value() - 0.2).abs() < 1e-12);
    }
}
