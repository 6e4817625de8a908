use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDate, Utc};
use chrono_tz::Tz;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::ExchangeId;

/// Amount and USD value of one currency within a breakdown.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CurrencyValue {
    pub amount: Decimal,
    pub usd: Decimal,
}

/// Per-currency detail of an account, keyed by currency code.
pub type Breakdown = BTreeMap<String, CurrencyValue>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubaccountRollup {
    pub usd: Decimal,
    #[serde(default)]
    pub breakdown: Breakdown,
}

/// Rolled-up totals for one exchange.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExchangeRollup {
    pub master_usd: Decimal,
    #[serde(default)]
    pub master_breakdown: Breakdown,
    #[serde(default)]
    pub subaccounts_usd: BTreeMap<String, SubaccountRollup>,
    pub subaccounts_total_usd: Decimal,
    pub exchange_total_usd: Decimal,
    /// Unrealized PnL of open futures positions by currency code. Reported
    /// for information only; the totals above already include it.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub upnl: BTreeMap<String, Decimal>,
}

/// Result of one aggregation run.
///
/// Exchanges that failed are absent from `balances` and present in `errors`.
/// An exchange that succeeded with nothing held is present with a zero total.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregateSnapshot {
    pub timestamp: DateTime<Utc>,
    pub balances: BTreeMap<ExchangeId, ExchangeRollup>,
    pub grand_total_usd: Decimal,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub errors: BTreeMap<ExchangeId, String>,
}

impl AggregateSnapshot {
    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    /// Connection state of an exchange in this run: `Some(true)` when it
    /// reported balances, `Some(false)` when it failed, `None` when it was
    /// not part of the run.
    pub fn is_connected(&self, exchange: ExchangeId) -> Option<bool> {
        if self.balances.contains_key(&exchange) {
            Some(true)
        } else if self.errors.contains_key(&exchange) {
            Some(false)
        } else {
            None
        }
    }
}

/// A snapshot persisted under a calendar date.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotRecord {
    pub date: NaiveDate,
    pub snapshot: AggregateSnapshot,
}

impl SnapshotRecord {
    /// Key a snapshot by the calendar date of its timestamp in `tz`.
    pub fn dated_in(snapshot: AggregateSnapshot, tz: Tz) -> Self {
        Self {
            date: snapshot.timestamp.with_timezone(&tz).date_naive(),
            snapshot,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn snapshot_at(timestamp: DateTime<Utc>) -> AggregateSnapshot {
        AggregateSnapshot {
            timestamp,
            balances: BTreeMap::new(),
            grand_total_usd: Decimal::ZERO,
            errors: BTreeMap::new(),
        }
    }

    #[test]
    fn errors_are_omitted_when_empty() {
        let json = serde_json::to_value(snapshot_at(Utc::now())).unwrap();
        assert!(json.get("errors").is_none());
        assert!(json.get("grand_total_usd").unwrap().is_number());
    }

    #[test]
    fn record_date_uses_the_given_timezone() {
        let ts = Utc.with_ymd_and_hms(2025, 6, 30, 17, 30, 0).unwrap();
        let record = SnapshotRecord::dated_in(snapshot_at(ts), chrono_tz::Asia::Singapore);
        assert_eq!(record.date, NaiveDate::from_ymd_opt(2025, 7, 1).unwrap());
    }
}
