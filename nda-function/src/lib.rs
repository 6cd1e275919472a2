//! nda-function library interface
//!
//! Synchronization engine for the functional-data warehouse: incremental
//! copies of upstream analysis feeds, content-hashed groups over them and
//! per-recording summaries. The `nda-function` binary is a thin CLI over
//! this crate.

pub mod aggregate;
pub mod catalog;
pub mod config;
pub mod context;
pub mod db;
pub mod error;
pub mod fill;
pub mod groups;
pub mod hash_identity;
pub mod populator;
pub mod source;
pub mod summary;
pub mod utils;
pub mod variant;

pub use crate::aggregate::{Aggregate, FillReport};
pub use crate::context::SyncContext;
pub use crate::error::{Error, Result};
pub use crate::groups::{Group, GroupAggregator, GroupKind};
pub use crate::populator::{Populator, SyncReport};
