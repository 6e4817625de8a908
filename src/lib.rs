pub mod aggregate;
pub mod clock;
pub mod config;
pub mod credentials;
pub mod documents;
pub mod duration;
pub mod exchanges;
pub mod ledger;
pub mod models;
pub mod snapshots;
