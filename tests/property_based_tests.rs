mod common;

use common::memory_store;
use common::strategies::*;
use pricefeed_core::ingestion::price_client::parse_display_price;
use pricefeed_core::store::{MarketPricesKey, ProUsersKey, TypedKey, WriteOutcome};
use proptest::prelude::*;
use std::collections::BTreeSet;

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// Property: with both tiers healthy, get returns exactly what set wrote
    #[test]
    fn set_then_get_round_trips(currency in currency_strategy(), prices in market_prices_strategy()) {
        let rt = runtime();
        let (outcome, read) = rt.block_on(async {
            let t = memory_store();
            let key = MarketPricesKey::new(&currency);
            let outcome = t.store.set(&key, &prices).await.unwrap();
            let read = t.store.get(&key).await.unwrap();
            (outcome, read)
        });
        prop_assert_eq!(outcome, WriteOutcome::Replicated);
        prop_assert_eq!(read, Some(prices));
    }

    /// Property: a value written while healthy survives a cache outage
    #[test]
    fn durable_copy_survives_cache_outage(users in prop::collection::vec(username_strategy(), 0..10)) {
        let rt = runtime();
        let read = rt.block_on(async {
            let t = memory_store();
            t.store.set(&ProUsersKey, &users).await.unwrap();
            t.cache.set_available(false);
            t.store.get(&ProUsersKey).await.unwrap()
        });
        prop_assert_eq!(read, Some(users));
    }

    /// Property: sync accounts for every key, whichever ones fail
    #[test]
    fn sync_totals_add_up(
        currencies in prop::collection::btree_set(currency_strategy(), 1..12),
        failing in prop::collection::vec(any::<bool>(), 12),
    ) {
        let rt = runtime();
        let currencies: BTreeSet<String> =
            currencies.iter().map(|c| c.to_ascii_uppercase()).collect();
        let (result, expected_failures) = rt.block_on(async {
            let t = memory_store();
            let mut expected_failures = 0;
            for (i, currency) in currencies.iter().enumerate() {
                let key = MarketPricesKey::new(currency);
                t.durable.insert_raw(key.store_key().as_str(), "{}");
                if failing[i] {
                    t.cache.fail_writes_for(key.store_key().as_str());
                    expected_failures += 1;
                }
            }
            (t.store.sync_all().await.unwrap(), expected_failures)
        });
        prop_assert_eq!(result.total, currencies.len());
        prop_assert_eq!(result.total, result.synced + result.failed);
        prop_assert_eq!(result.failed, expected_failures);
    }

    /// Property: two-decimal prices survive display formatting in either locale
    #[test]
    fn display_prices_parse_back(cents in 0u64..1_000_000_000) {
        let whole = cents / 100;
        let fraction = cents % 100;
        let us = format!("${}.{fraction:02}", group_thousands(whole, ','));
        let eu = format!("{},{fraction:02}€", group_thousands(whole, '.'));
        let expected = cents as f64 / 100.0;
        prop_assert_eq!(parse_display_price(&us), Some(expected));
        prop_assert_eq!(parse_display_price(&eu), Some(expected));
    }
}

fn group_thousands(value: u64, separator: char) -> String {
    let digits = value.to_string();
    let mut out = String::new();
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(separator);
        }
        out.push(c);
    }
    out
}
