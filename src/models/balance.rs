use std::collections::BTreeMap;
use std::str::FromStr;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::ExchangeId;

/// A single asset holding within one account scope on one exchange.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BalanceRecord {
    pub currency: String,
    /// Sum of free, locked and staked sub-balances for this currency.
    pub amount: Decimal,
    /// USD value when the exchange reports one; backfilled during aggregation otherwise.
    pub usd_value: Option<Decimal>,
}

impl BalanceRecord {
    pub fn new(currency: impl Into<String>, amount: Decimal) -> Self {
        Self {
            currency: currency.into(),
            amount,
            usd_value: None,
        }
    }

    pub fn with_usd_value(mut self, usd_value: Decimal) -> Self {
        self.usd_value = Some(usd_value);
        self
    }
}

/// Where a balance lives within an exchange.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum AccountScope {
    Master,
    SubAccount(String),
}

/// Successful result of polling one exchange.
#[derive(Debug, Clone, PartialEq)]
pub struct ExchangeBalances {
    pub exchange: ExchangeId,
    pub master: Vec<BalanceRecord>,
    pub sub_accounts: BTreeMap<String, Vec<BalanceRecord>>,
    /// Unrealized profit and loss of futures positions, keyed by the
    /// currency code of the row it is part of. Already included in the
    /// matching balance amounts.
    pub unrealized_pnl: BTreeMap<String, Decimal>,
}

impl ExchangeBalances {
    pub fn new(exchange: ExchangeId) -> Self {
        Self {
            exchange,
            master: Vec::new(),
            sub_accounts: BTreeMap::new(),
            unrealized_pnl: BTreeMap::new(),
        }
    }

    pub fn with_master(mut self, master: Vec<BalanceRecord>) -> Self {
        self.master = master;
        self
    }

    pub fn with_sub_account(mut self, name: impl Into<String>, records: Vec<BalanceRecord>) -> Self {
        self.insert_sub_account(name, records);
        self
    }

    /// Insert a sub-account. Sub-accounts without any holdings are dropped.
    pub fn insert_sub_account(&mut self, name: impl Into<String>, records: Vec<BalanceRecord>) {
        if !records.is_empty() {
            self.sub_accounts.insert(name.into(), records);
        }
    }

    /// Record unrealized PnL for `currency`. Zero amounts are ignored.
    pub fn add_unrealized_pnl(&mut self, currency: impl Into<String>, amount: Decimal) {
        if amount.is_zero() {
            return;
        }
        let entry = self.unrealized_pnl.entry(currency.into()).or_default();
        *entry = entry.saturating_add(amount);
    }

    pub fn with_unrealized_pnl(mut self, currency: impl Into<String>, amount: Decimal) -> Self {
        self.add_unrealized_pnl(currency, amount);
        self
    }

    pub fn scopes(&self) -> impl Iterator<Item = (AccountScope, &[BalanceRecord])> {
        std::iter::once((AccountScope::Master, self.master.as_slice())).chain(
            self.sub_accounts
                .iter()
                .map(|(name, records)| (AccountScope::SubAccount(name.clone()), records.as_slice())),
        )
    }
}

/// Accumulates balances for one account scope.
///
/// Rows sharing a currency are summed, and currencies whose summed amount is
/// zero are dropped when the sheet is finished. Sums saturate at the
/// `Decimal` range; valuation reports the overflow.
#[derive(Debug, Default, Clone)]
pub struct BalanceSheet {
    entries: BTreeMap<String, (Decimal, Option<Decimal>)>,
}

impl BalanceSheet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, currency: impl Into<String>, amount: Decimal, usd_value: Option<Decimal>) {
        let entry = self
            .entries
            .entry(currency.into())
            .or_insert((Decimal::ZERO, None));
        entry.0 = entry.0.saturating_add(amount);
        entry.1 = match (entry.1, usd_value) {
            (Some(a), Some(b)) => Some(a.saturating_add(b)),
            (a, b) => a.or(b),
        };
    }

    pub fn is_empty(&self) -> bool {
        self.entries.values().all(|(amount, _)| amount.is_zero())
    }

    pub fn into_records(self) -> Vec<BalanceRecord> {
        self.entries
            .into_iter()
            .filter(|(_, (amount, _))| !amount.is_zero())
            .map(|(currency, (amount, usd_value))| BalanceRecord {
                currency,
                amount,
                usd_value,
            })
            .collect()
    }
}

/// Parse a numeric field as reported by an exchange.
///
/// Exchanges send numbers as strings, sometimes empty and sometimes in
/// scientific notation. Empty strings are treated as zero.
pub fn parse_amount(raw: &str) -> Option<Decimal> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Some(Decimal::ZERO);
    }
    Decimal::from_str(raw)
        .or_else(|_| Decimal::from_scientific(raw))
        .ok()
}
