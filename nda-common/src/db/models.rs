//! Database models

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Identity of one physical recording (a two-photon scan)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, sqlx::FromRow)]
pub struct ScanKey {
    pub animal_id: i64,
    pub scan_session: i64,
    pub scan_idx: i64,
}

impl ScanKey {
    pub fn new(animal_id: i64, scan_session: i64, scan_idx: i64) -> Self {
        Self {
            animal_id,
            scan_session,
            scan_idx,
        }
    }
}

impl fmt::Display for ScanKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}-{}", self.animal_id, self.scan_session, self.scan_idx)
    }
}

/// Reference unit of a recording
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct UnitSource {
    pub animal_id: i64,
    pub scan_session: i64,
    pub scan_idx: i64,
    pub unit_id: i64,
    pub mask_type: String,
}

/// Stored copy of an upstream master row
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct VariantRowRecord {
    pub aggregate: String,
    pub variant: String,
    pub entity_key: String,
    pub animal_id: Option<i64>,
    pub scan_session: Option<i64>,
    pub scan_idx: Option<i64>,
    pub parent_hash: Option<String>,
    /// JSON object of non-key attributes
    pub attributes: String,
    pub created_at: NaiveDateTime,
}

impl VariantRowRecord {
    /// Recording identity, when the row carries one
    pub fn scan(&self) -> Option<ScanKey> {
        match (self.animal_id, self.scan_session, self.scan_idx) {
            (Some(a), Some(s), Some(i)) => Some(ScanKey::new(a, s, i)),
            _ => None,
        }
    }
}

/// Stored per-unit detail or score row
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct UnitRowRecord {
    pub aggregate: String,
    pub variant: String,
    pub entity_key: String,
    pub unit_id: i64,
    pub score: Option<f64>,
    pub attributes: String,
}

/// Aggregate master row with its discriminator
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct AggregateRowRecord {
    pub agg_hash: String,
    pub aggregate: String,
    pub variant: String,
    pub entity_key: String,
    pub created_at: NaiveDateTime,
}

/// Named group master row
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct GroupRecord {
    pub kind: String,
    pub group_hash: String,
    pub name: String,
    pub description: String,
    pub member_count: i64,
    pub attributes: String,
    /// Key of the recordings the members cover; derived kinds only
    pub scan_set_hash: Option<String>,
    pub created_at: NaiveDateTime,
}

/// Group member row
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct GroupMemberRecord {
    pub kind: String,
    pub group_hash: String,
    pub name: String,
    pub member_key: String,
    pub animal_id: Option<i64>,
    pub scan_session: Option<i64>,
    pub scan_idx: Option<i64>,
}

/// Denormalized per-recording summary row
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct SummaryRecord {
    pub kind: String,
    pub agg_hash: String,
    pub aggregate: String,
    pub stim_type_grp_hash: Option<String>,
    pub response_type: Option<String>,
    pub stimulus_length: Option<f64>,
    pub animal_id: i64,
    pub scan_session: i64,
    pub scan_idx: i64,
    pub created_at: NaiveDateTime,
}

impl SummaryRecord {
    pub fn scan(&self) -> ScanKey {
        ScanKey::new(self.animal_id, self.scan_session, self.scan_idx)
    }
}
