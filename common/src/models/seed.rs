//! Built-in catalog of direct pairs offered to every user.

use crate::models::{ConverterPair, Currency, CurrencyType};

pub fn usdt() -> Currency {
    Currency::catalog(CurrencyType::Crypto, "USDT", None)
}

pub fn rub_tinkoff() -> Currency {
    Currency::catalog(CurrencyType::Classic, "RUB", Some("TinkoffNew"))
}

pub fn kzt_kaspi() -> Currency {
    Currency::catalog(CurrencyType::Classic, "KZT", Some("KaspiBank"))
}

/// RUB(TinkoffNew)->USDT and USDT->KZT(KaspiBank).
pub fn default_seed_pairs() -> Vec<ConverterPair> {
    vec![
        ConverterPair::direct(rub_tinkoff(), usdt()).expect("seed pair is valid"),
        ConverterPair::direct(usdt(), kzt_kaspi()).expect("seed pair is valid"),
    ]
}
