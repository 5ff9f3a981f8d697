use common::{
    models::{seed, ConverterPair},
    Error, Result,
};
use tracing::debug;

/// Builds the catalog of chains offered to users: the seed direct pairs plus
/// every transitive chain two of them form.
#[derive(Debug, Clone)]
pub struct PairComposer {
    seeds: Vec<ConverterPair>,
}

impl Default for PairComposer {
    fn default() -> Self {
        Self::new(seed::default_seed_pairs())
    }
}

impl PairComposer {
    pub fn new(seeds: Vec<ConverterPair>) -> Self {
        Self { seeds }
    }

    /// Seeds first, then composed chains in discovery order, without
    /// duplicate currency sequences.
    pub fn available_pairs(&self) -> Vec<ConverterPair> {
        let mut pairs: Vec<ConverterPair> = Vec::with_capacity(self.seeds.len() * 2);
        for seed in &self.seeds {
            push_unique(&mut pairs, seed.clone());
        }

        for first in &self.seeds {
            for second in &self.seeds {
                for composed in [compose(first, second), compose(second, first)] {
                    if let Ok(pair) = composed {
                        push_unique(&mut pairs, pair);
                    }
                }
            }
        }

        debug!(seeds = self.seeds.len(), available = pairs.len(), "Composed converter pairs");
        pairs
    }
}

fn push_unique(pairs: &mut Vec<ConverterPair>, pair: ConverterPair) {
    if !pairs.contains(&pair) {
        pairs.push(pair);
    }
}

/// Join `A->B` and `B->C` into `A->B->C`.
pub fn compose(first: &ConverterPair, second: &ConverterPair) -> Result<ConverterPair> {
    match (first.currencies(), second.currencies()) {
        ([a, b], [c, d]) if b == c => ConverterPair::new(vec![a.clone(), b.clone(), d.clone()]),
        ([_, _], [_, _]) => Err(Error::InvalidConverterPair(format!(
            "{} does not continue {}",
            second, first
        ))),
        _ => Err(Error::InvalidConverterPair(format!(
            "only direct pairs compose, got {} and {}",
            first, second
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::models::{Currency, CurrencyType};
    use proptest::prelude::*;

    fn direct(from: Currency, to: Currency) -> ConverterPair {
        ConverterPair::direct(from, to).unwrap()
    }

    #[test]
    fn default_catalog_adds_the_transitive_chain() {
        let pairs = PairComposer::default().available_pairs();
        let expected = vec![
            direct(seed::rub_tinkoff(), seed::usdt()),
            direct(seed::usdt(), seed::kzt_kaspi()),
            ConverterPair::new(vec![seed::rub_tinkoff(), seed::usdt(), seed::kzt_kaspi()]).unwrap(),
        ];
        assert_eq!(pairs, expected);
    }

    #[test]
    fn repeated_seeds_are_listed_once() {
        let rub_usdt = direct(seed::rub_tinkoff(), seed::usdt());
        let usdt_kzt = direct(seed::usdt(), seed::kzt_kaspi());
        let composer = PairComposer::new(vec![rub_usdt.clone(), usdt_kzt.clone(), rub_usdt]);

        let pairs = composer.available_pairs();
        assert_eq!(pairs.len(), 3);
        for (i, pair) in pairs.iter().enumerate() {
            assert!(!pairs[i + 1..].contains(pair), "duplicate {}", pair);
        }
    }

    #[test]
    fn reverse_pairs_do_not_form_a_loop() {
        let rub_usdt = direct(seed::rub_tinkoff(), seed::usdt());
        let usdt_rub = direct(seed::usdt(), seed::rub_tinkoff());

        assert!(matches!(
            compose(&rub_usdt, &usdt_rub),
            Err(Error::InvalidConverterPair(_))
        ));
        let pairs = PairComposer::new(vec![rub_usdt, usdt_rub]).available_pairs();
        assert_eq!(pairs.len(), 2);
    }

    #[test]
    fn transitive_input_is_rejected() {
        let chain =
            ConverterPair::new(vec![seed::rub_tinkoff(), seed::usdt(), seed::kzt_kaspi()]).unwrap();
        let kzt_btc = direct(seed::kzt_kaspi(), Currency::crypto("BTC").unwrap());
        assert!(matches!(
            compose(&chain, &kzt_btc),
            Err(Error::InvalidConverterPair(_))
        ));
    }

    fn currency() -> impl Strategy<Value = Currency> {
        prop_oneof![
            prop::sample::select(vec!["USDT", "BTC", "ETH"]).prop_map(|code| Currency::crypto(code).unwrap()),
            (
                prop::sample::select(vec!["RUB", "KZT", "USD"]),
                prop::sample::select(vec!["TinkoffNew", "KaspiBank"]),
            )
                .prop_map(|(code, bank)| Currency::classic(code, bank).unwrap()),
        ]
    }

    fn direct_pair() -> impl Strategy<Value = ConverterPair> {
        (currency(), currency())
            .prop_filter("distinct currencies", |(a, b)| a != b)
            .prop_map(|(a, b)| direct(a, b))
    }

    proptest! {
        #[test]
        fn compose_succeeds_iff_pairs_chain(first in direct_pair(), second in direct_pair()) {
            let joins = first.last() == second.first();
            let distinct = first.first() != second.last();

            match compose(&first, &second) {
                Ok(chain) => {
                    prop_assert!(joins && distinct);
                    prop_assert_eq!(chain.level(), 3);
                    prop_assert_eq!(&chain.currencies()[..2], first.currencies());
                    prop_assert_eq!(chain.last(), second.last());
                }
                Err(Error::InvalidConverterPair(_)) => prop_assert!(!(joins && distinct)),
                Err(other) => prop_assert!(false, "unexpected error {:?}", other),
            }
        }

        #[test]
        fn available_pairs_are_unique_and_start_with_seeds(
            seeds in prop::collection::vec(direct_pair(), 0..6)
        ) {
            let pairs = PairComposer::new(seeds.clone()).available_pairs();

            for (i, pair) in pairs.iter().enumerate() {
                prop_assert!(!pairs[i + 1..].contains(pair));
                let banked = pair
                    .currencies()
                    .iter()
                    .all(|c| c.currency_type() == CurrencyType::Crypto || c.bank().is_some());
                prop_assert!(banked);
            }
            for seed in &seeds {
                prop_assert!(pairs.contains(seed));
            }
            let direct_count = pairs.iter().take_while(|p| p.is_direct()).count();
            prop_assert!(pairs[direct_count..].iter().all(|p| p.level() == 3));
        }
    }
}
