//! SQLite storage layer: the connection pool and the spend ledger.

pub mod pool;
pub mod spend;

pub use pool::DatabasePool;
pub use spend::{ProviderSpend, SpendTotals, SqliteSpendLedger};
