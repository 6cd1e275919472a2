//! Warehouse reads and writes used by the engine
//!
//! Writers take a `SqliteConnection` so they can run inside a monitored
//! transaction; readers take the pool unless they are part of a
//! check-then-insert sequence.

pub mod aggregates;
pub mod catalog;
pub mod groups;
pub mod readout;
pub mod summaries;
pub mod variant_rows;
