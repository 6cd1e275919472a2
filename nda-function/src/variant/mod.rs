//! Variants: upstream-specific implementations of an aggregate's capabilities
//!
//! Every upstream feed that contributes rows to an aggregate is one
//! [`Variant`]. The set is open: adding a feed means writing one more type
//! that implements the trait and registering it, nothing else changes.
//! Rows carry the variant name as their discriminator so the aggregate can
//! find the owning variant again without re-deriving it.

pub mod dynamic_model;
pub mod oracle;
pub mod orientation;
pub mod readout_loc;
pub mod resp_corr;
pub mod scan_copy;

pub use crate::db::variant_rows::UnitDetail;
pub use scan_copy::{ParentSpec, RelationRef, ScanCopy, UnitSpec};

use crate::context::SyncContext;
use crate::error::{Error, Result};
use crate::hash_identity::entity_hash;
use crate::source::{Relation, Row, RowKey};
use async_trait::async_trait;
use nda_common::db::{ScanKey, VariantRowRecord};
use serde::Serialize;
use std::sync::Arc;

/// Upstream module name and schema name pairs
pub type ModuleList = &'static [(&'static str, &'static str)];

/// Aggregate row another variant's rows depend on
#[derive(Debug, Clone, PartialEq)]
pub struct ParentRef {
    pub aggregate: &'static str,
    pub variant: &'static str,
    pub entity_key: RowKey,
}

impl ParentRef {
    /// Synthetic key of the parent's aggregate row
    pub fn agg_hash(&self) -> String {
        entity_hash(self.aggregate, self.variant, &self.entity_key.to_canonical())
    }
}

/// Responses of one unit ordered by stimulus direction
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TuningCurve {
    pub scan: ScanKey,
    pub unit_id: i64,
    /// Radians, ascending
    pub direction: Vec<f64>,
    pub response_mean: Vec<f64>,
    pub response_std: Vec<f64>,
}

/// One upstream feed of an aggregate
#[async_trait]
pub trait Variant: Send + Sync {
    /// Discriminator stored with every row this variant writes
    fn name(&self) -> &'static str;

    /// Aggregate the variant contributes to
    fn aggregate(&self) -> &'static str;

    /// Upstream modules the variant reads
    fn modules(&self) -> ModuleList;

    /// Attributes forming the entity key of a master row
    fn key_attributes(&self) -> &'static [&'static str];

    /// Large batches need operator confirmation
    fn requires_confirmation(&self) -> bool {
        false
    }

    /// Current upstream master rows, `session` already renamed
    async fn upstream(&self, ctx: &SyncContext) -> Result<Relation>;

    /// Detail rows of one upstream master row
    async fn units(&self, ctx: &SyncContext, master: &Row) -> Result<Vec<UnitDetail>>;

    /// Aggregate row the master row depends on, if any
    fn parent(&self, _master: &Row) -> Result<Option<ParentRef>> {
        Ok(None)
    }

    async fn stimulus_types(&self, _ctx: &SyncContext, _row: &VariantRowRecord) -> Result<Vec<String>> {
        Err(unsupported(self.name(), "stimulus_type"))
    }

    async fn response_type(&self, _ctx: &SyncContext, _row: &VariantRowRecord) -> Result<String> {
        Err(unsupported(self.name(), "response_type"))
    }

    /// Recording the row was computed from; by default the stored scan columns
    async fn scan_identity(&self, _ctx: &SyncContext, row: &VariantRowRecord) -> Result<ScanKey> {
        row.scan().ok_or_else(|| unsupported(self.name(), "scan_identity"))
    }

    async fn duration_seconds(&self, _ctx: &SyncContext, _row: &VariantRowRecord) -> Result<f64> {
        Err(unsupported(self.name(), "duration_seconds"))
    }

    async fn tuning_curve(&self, _ctx: &SyncContext, _row: &VariantRowRecord) -> Result<Vec<TuningCurve>> {
        Err(unsupported(self.name(), "tuning_curve"))
    }
}

pub fn unsupported(variant: &str, capability: &str) -> Error {
    Error::Unsupported {
        variant: variant.to_string(),
        capability: capability.to_string(),
    }
}

/// Entity key of a stored row as a restriction row
pub fn entity_row(row: &VariantRowRecord) -> Result<Row> {
    Ok(RowKey::from_canonical(&row.entity_key)?.to_row())
}

/// Variants of one aggregate, looked up by discriminator
#[derive(Clone)]
pub struct VariantRegistry {
    aggregate: &'static str,
    variants: Vec<Arc<dyn Variant>>,
}

impl VariantRegistry {
    pub fn new(aggregate: &'static str) -> Self {
        Self {
            aggregate,
            variants: Vec::new(),
        }
    }

    /// Add a variant; names are unique and must belong to this aggregate
    pub fn register(&mut self, variant: Arc<dyn Variant>) -> Result<()> {
        if variant.aggregate() != self.aggregate {
            return Err(Error::InvalidInput(format!(
                "variant '{}' belongs to '{}', not '{}'",
                variant.name(),
                variant.aggregate(),
                self.aggregate
            )));
        }
        if self.variants.iter().any(|v| v.name() == variant.name()) {
            return Err(Error::InvalidInput(format!("variant '{}' registered twice", variant.name())));
        }
        self.variants.push(variant);
        Ok(())
    }

    pub fn with(mut self, variants: impl IntoIterator<Item = Arc<dyn Variant>>) -> Result<Self> {
        for variant in variants {
            self.register(variant)?;
        }
        Ok(self)
    }

    pub fn get(&self, name: &str) -> Result<&Arc<dyn Variant>> {
        self.variants
            .iter()
            .find(|v| v.name() == name)
            .ok_or_else(|| Error::UnknownVariant(name.to_string()))
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn Variant>> {
        self.variants.iter()
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.variants.iter().map(|v| v.name()).collect()
    }

    pub fn aggregate(&self) -> &'static str {
        self.aggregate
    }

    pub fn len(&self) -> usize {
        self.variants.len()
    }

    pub fn is_empty(&self) -> bool {
        self.variants.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_lookup_by_discriminator() {
        let registry = VariantRegistry::new("oracle").with(oracle::variants()).unwrap();

        assert_eq!(registry.get("OracleDVScan3").unwrap().name(), "OracleDVScan3");
        assert!(matches!(registry.get("OracleDVScan9"), Err(Error::UnknownVariant(_))));
    }

    #[test]
    fn test_registry_rejects_foreign_and_duplicate_variants() {
        let mut registry = VariantRegistry::new("oracle").with(oracle::variants()).unwrap();

        let foreign = dynamic_model::model_variants().remove(0);
        assert!(registry.register(foreign).is_err());

        let duplicate = oracle::variants().remove(0);
        assert!(registry.register(duplicate).is_err());
    }

    #[test]
    fn test_parent_hash_matches_aggregate_key() {
        let key = RowKey::from_canonical(r#"{"animal_id":1,"readout_hash":"r","scan_idx":2,"scan_session":3}"#).unwrap();
        let parent = ParentRef {
            aggregate: "dynamic_model",
            variant: "NnsV5",
            entity_key: key.clone(),
        };

        assert_eq!(parent.agg_hash(), entity_hash("dynamic_model", "NnsV5", &key.to_canonical()));
    }
}
