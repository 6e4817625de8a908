mod balance;
mod exchange;
mod snapshot;

pub use balance::{parse_amount, AccountScope, BalanceRecord, BalanceSheet, ExchangeBalances};
pub use exchange::ExchangeId;
pub use snapshot::{
    AggregateSnapshot, Breakdown, CurrencyValue, ExchangeRollup, SnapshotRecord, SubaccountRollup,
};
