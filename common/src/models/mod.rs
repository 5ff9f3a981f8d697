mod currency;
mod exchange;
mod pair;
pub mod seed;

pub use currency::{Currency, CurrencyType};
pub use exchange::Exchange;
pub use pair::{ConverterPair, ThresholdConvertPair, DIRECT_LEVEL, TRANSITIVE_LEVEL};
