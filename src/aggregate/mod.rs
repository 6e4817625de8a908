//! Folding exchange balances into an aggregate snapshot.

mod engine;
mod normalize;
mod prices;
mod rollup;

pub use engine::{aggregate_balances, aggregate_balances_with_clock, AggregationEngine};
pub use normalize::{currency_family, merge_by_family, CoinColumn, CoinRow, CoinTable, FAMILY_SUFFIXES};
pub use prices::{
    load_prices, BinancePriceSource, PriceSource, PriceTable, StaticPriceSource, STABLECOINS,
};
pub use rollup::{build_snapshot, rollup_exchange, value_records};
