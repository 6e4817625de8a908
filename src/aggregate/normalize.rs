//! Currency-family grouping and the top-N coin table.
//!
//! Family grouping is display-only. Totals in an [`AggregateSnapshot`] are
//! always computed from raw per-currency values before any grouping.

use std::collections::BTreeMap;

use rust_decimal::Decimal;
use serde::Serialize;

use crate::models::{AggregateSnapshot, Breakdown, CurrencyValue, ExchangeId};

/// Synthetic suffixes exchanges append to a base currency, longest first so
/// `_EARN_LOCKED` is tried before `_EARN`.
pub const FAMILY_SUFFIXES: [&str; 10] = [
    "_COIN_FUTURES",
    "_DEPOSIT_EARNING",
    "_SUPER_MARGIN",
    "_EARN_LOCKED",
    "_FUTURES",
    "_MARGIN",
    "_EARN",
    "_FUND",
    "_OTC",
    "_POINT",
];

/// Base currency of a possibly suffixed code: `BTC_FUTURES` -> `BTC`.
///
/// Suffixes are stripped repeatedly, and a code that is nothing but a
/// suffix is returned unchanged. Applying this twice equals applying it once.
pub fn currency_family(code: &str) -> &str {
    let mut family = code;
    'strip: loop {
        for suffix in FAMILY_SUFFIXES {
            if let Some(base) = family.strip_suffix(suffix) {
                if !base.is_empty() {
                    family = base;
                    continue 'strip;
                }
            }
        }
        return family;
    }
}

/// Collapse breakdown entries by currency family, summing amount and USD.
pub fn merge_by_family<'a, I>(entries: I) -> Breakdown
where
    I: IntoIterator<Item = (&'a String, &'a CurrencyValue)>,
{
    let mut merged = Breakdown::new();
    for (currency, value) in entries {
        let entry = merged
            .entry(currency_family(currency).to_string())
            .or_insert(CurrencyValue {
                amount: Decimal::ZERO,
                usd: Decimal::ZERO,
            });
        entry.amount = entry.amount.saturating_add(value.amount);
        entry.usd = entry.usd.saturating_add(value.usd);
    }
    merged
}

fn saturating_sum(values: impl Iterator<Item = Decimal>) -> Decimal {
    values.fold(Decimal::ZERO, Decimal::saturating_add)
}

/// One dedicated coin column.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CoinColumn {
    pub currency: String,
    pub amount: Decimal,
    pub usd: Decimal,
}

/// One exchange's line in the coin table.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CoinRow {
    pub exchange: ExchangeId,
    /// Values for the table's columns; columns the exchange does not hold are absent.
    pub coins: BTreeMap<String, CurrencyValue>,
    /// Everything not covered by a column, including sub-accounts whose
    /// breakdown was omitted.
    pub other_usd: Decimal,
    pub total_usd: Decimal,
}

/// Per-exchange holdings of the largest currency families.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CoinTable {
    pub columns: Vec<CoinColumn>,
    pub rows: Vec<CoinRow>,
    pub other_usd: Decimal,
    pub total_usd: Decimal,
}

impl CoinTable {
    /// Rank currency families by absolute USD exposure across every exchange
    /// and account, and give the largest `top_n` their own column.
    ///
    /// Ties are broken alphabetically so the table is stable.
    pub fn build(snapshot: &AggregateSnapshot, top_n: usize) -> Self {
        let per_exchange: BTreeMap<ExchangeId, Breakdown> = snapshot
            .balances
            .iter()
            .map(|(exchange, rollup)| {
                let entries = rollup.master_breakdown.iter().chain(
                    rollup
                        .subaccounts_usd
                        .values()
                        .flat_map(|sub| sub.breakdown.iter()),
                );
                (*exchange, merge_by_family(entries))
            })
            .collect();

        let mut exposure: BTreeMap<&str, (Decimal, Decimal, Decimal)> = BTreeMap::new();
        for breakdown in per_exchange.values() {
            for (family, value) in breakdown {
                let entry = exposure
                    .entry(family.as_str())
                    .or_insert((Decimal::ZERO, Decimal::ZERO, Decimal::ZERO));
                entry.0 = entry.0.saturating_add(value.usd.abs());
                entry.1 = entry.1.saturating_add(value.amount);
                entry.2 = entry.2.saturating_add(value.usd);
            }
        }

        let mut ranked: Vec<_> = exposure.into_iter().collect();
        ranked.sort_by(|(a_name, a), (b_name, b)| b.0.cmp(&a.0).then_with(|| a_name.cmp(b_name)));
        let columns: Vec<CoinColumn> = ranked
            .into_iter()
            .take(top_n)
            .map(|(currency, (_, amount, usd))| CoinColumn {
                currency: currency.to_string(),
                amount,
                usd,
            })
            .collect();

        let rows: Vec<CoinRow> = per_exchange
            .into_iter()
            .map(|(exchange, mut breakdown)| {
                let coins: BTreeMap<String, CurrencyValue> = columns
                    .iter()
                    .filter_map(|c| breakdown.remove_entry(&c.currency))
                    .collect();
                let total_usd = snapshot
                    .balances
                    .get(&exchange)
                    .map(|r| r.exchange_total_usd)
                    .unwrap_or_default();
                let column_usd = saturating_sum(coins.values().map(|v| v.usd));
                CoinRow {
                    exchange,
                    coins,
                    other_usd: total_usd.saturating_sub(column_usd),
                    total_usd,
                }
            })
            .collect();

        let column_usd = saturating_sum(columns.iter().map(|c| c.usd));
        CoinTable {
            other_usd: snapshot.grand_total_usd.saturating_sub(column_usd),
            total_usd: snapshot.grand_total_usd,
            columns,
            rows,
        }
    }

    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.currency.as_str()).collect()
    }
}
