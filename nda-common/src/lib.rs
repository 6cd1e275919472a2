//! # NDA Common Library
//!
//! Shared code for the neural data analysis warehouse crates:
//! - Error type used by the storage layer
//! - TOML bootstrap configuration and root folder resolution
//! - Warehouse schema creation and shared row models

pub mod config;
pub mod db;
pub mod error;

pub use error::{Error, Result};
