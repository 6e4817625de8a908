use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

use super::prices::PriceTable;
use crate::exchanges::{ExchangeError, ExchangeFailure};
use crate::models::{
    AggregateSnapshot, BalanceRecord, Breakdown, CurrencyValue, ExchangeBalances, ExchangeRollup,
    SubaccountRollup,
};

fn overflow(what: impl Into<String>) -> ExchangeError {
    ExchangeError::Overflow(what.into())
}

fn checked_sum(
    values: impl IntoIterator<Item = Decimal>,
    what: &str,
) -> Result<Decimal, ExchangeError> {
    values
        .into_iter()
        .try_fold(Decimal::ZERO, |acc, v| acc.checked_add(v))
        .ok_or_else(|| overflow(what))
}

/// Value each record in USD and key the result by currency.
///
/// Exchange-reported USD values take precedence over the price table.
/// Currencies worth nothing in USD are left out of the breakdown.
pub fn value_records(
    records: &[BalanceRecord],
    prices: &PriceTable,
) -> Result<Breakdown, ExchangeError> {
    let mut breakdown = Breakdown::new();
    for record in records {
        let usd = match record.usd_value {
            Some(usd) => usd,
            None => prices
                .usd_value(&record.currency, record.amount)
                .ok_or_else(|| {
                    overflow(format!("USD value of {} {}", record.amount, record.currency))
                })?,
        };
        let entry = breakdown
            .entry(record.currency.clone())
            .or_insert(CurrencyValue {
                amount: Decimal::ZERO,
                usd: Decimal::ZERO,
            });
        entry.amount = entry
            .amount
            .checked_add(record.amount)
            .ok_or_else(|| overflow(format!("{} amount", record.currency)))?;
        entry.usd = entry
            .usd
            .checked_add(usd)
            .ok_or_else(|| overflow(format!("{} USD value", record.currency)))?;
    }
    breakdown.retain(|_, value| !value.usd.is_zero());
    Ok(breakdown)
}

fn breakdown_usd(breakdown: &Breakdown, scope: &str) -> Result<Decimal, ExchangeError> {
    checked_sum(breakdown.values().map(|v| v.usd), &format!("{scope} USD total"))
}

/// Roll one exchange's balances up into master, sub-account and exchange totals.
///
/// Sub-accounts whose absolute value is below `min_subaccount_usd` keep
/// their total but lose their breakdown.
pub fn rollup_exchange(
    balances: &ExchangeBalances,
    prices: &PriceTable,
    min_subaccount_usd: Decimal,
) -> Result<ExchangeRollup, ExchangeError> {
    let master_breakdown = value_records(&balances.master, prices)?;
    let master_usd = breakdown_usd(&master_breakdown, "master")?;

    let mut subaccounts_usd: BTreeMap<String, SubaccountRollup> = BTreeMap::new();
    for (name, records) in &balances.sub_accounts {
        let mut breakdown = value_records(records, prices)?;
        let usd = breakdown_usd(&breakdown, &format!("sub-account {name}"))?;
        if usd.abs() < min_subaccount_usd {
            breakdown.clear();
        }
        subaccounts_usd.insert(name.clone(), SubaccountRollup { usd, breakdown });
    }
    let subaccounts_total_usd = checked_sum(
        subaccounts_usd.values().map(|s| s.usd),
        "sub-account USD total",
    )?;
    let exchange_total_usd = master_usd
        .checked_add(subaccounts_total_usd)
        .ok_or_else(|| overflow("exchange USD total"))?;

    Ok(ExchangeRollup {
        master_usd,
        master_breakdown,
        subaccounts_usd,
        subaccounts_total_usd,
        exchange_total_usd,
        upnl: balances.unrealized_pnl.clone(),
    })
}

/// Fold per-exchange outcomes into a snapshot.
///
/// Results are keyed by exchange, so their order does not matter. An
/// exchange whose values overflow is recorded in `errors` like any other
/// failure.
pub fn build_snapshot(
    timestamp: DateTime<Utc>,
    results: impl IntoIterator<Item = Result<ExchangeBalances, ExchangeFailure>>,
    prices: &PriceTable,
    min_subaccount_usd: Decimal,
) -> AggregateSnapshot {
    let mut balances = BTreeMap::new();
    let mut errors = BTreeMap::new();
    let mut grand_total_usd = Decimal::ZERO;
    for result in results {
        let exchange_balances = match result {
            Ok(exchange_balances) => exchange_balances,
            Err(failure) => {
                errors.insert(failure.exchange, failure.to_string());
                continue;
            }
        };
        let exchange = exchange_balances.exchange;
        let rolled = rollup_exchange(&exchange_balances, prices, min_subaccount_usd).and_then(
            |rollup| {
                grand_total_usd
                    .checked_add(rollup.exchange_total_usd)
                    .map(|total| (rollup, total))
                    .ok_or_else(|| overflow("grand USD total"))
            },
        );
        match rolled {
            Ok((rollup, total)) => {
                grand_total_usd = total;
                balances.insert(exchange, rollup);
            }
            Err(error) => {
                tracing::warn!(exchange = %exchange, error = %error, "Exchange not aggregated");
                errors.insert(exchange, ExchangeFailure { exchange, error }.to_string());
            }
        }
    }

    AggregateSnapshot {
        timestamp,
        balances,
        grand_total_usd,
        errors,
    }
}
