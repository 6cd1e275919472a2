//! Storage helpers shared by the write paths

pub mod db_retry;
pub mod pool_monitor;

pub use db_retry::{retry_on_lock, LockContention};
pub use pool_monitor::{begin_monitored, MonitoredTransaction};
