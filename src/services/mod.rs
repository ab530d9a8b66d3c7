pub mod daily_reset;
pub mod run_ledger;
pub mod scheduler;
