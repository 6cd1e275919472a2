//! Warehouse schema, settings and shared row models

pub mod init;
pub mod models;
pub mod settings;

pub use init::*;
pub use models::*;
