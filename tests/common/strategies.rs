use chrono::{TimeZone, Utc};
use pricefeed_core::store::{MarketPrices, PricePoint};
use proptest::prelude::*;

/// Strategy for market hash names, including the punctuation real listings carry
pub fn item_name_strategy() -> impl Strategy<Value = String> {
    "[A-Za-z0-9 |()★'-]{1,40}"
}

/// Strategy for usernames
pub fn username_strategy() -> impl Strategy<Value = String> {
    "[a-z][a-z0-9_]{2,15}"
}

/// Strategy for currency codes in mixed case
pub fn currency_strategy() -> impl Strategy<Value = String> {
    "[A-Za-z]{3}"
}

/// Strategy for one observed price
pub fn price_point_strategy() -> impl Strategy<Value = PricePoint> {
    (
        0.01f64..100_000.0,
        prop::option::of(0u64..1_000_000),
        0i64..4_000_000_000,
    )
        .prop_map(|(price, volume, secs)| PricePoint {
            price,
            volume,
            updated_at: Utc.timestamp_opt(secs, 0).single().unwrap_or_else(Utc::now),
        })
}

/// Strategy for a currency's price index
pub fn market_prices_strategy() -> impl Strategy<Value = MarketPrices> {
    prop::collection::btree_map(item_name_strategy(), price_point_strategy(), 0..20)
}
