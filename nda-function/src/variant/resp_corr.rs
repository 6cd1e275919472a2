//! Response correlations over dynamic model scan sets
//!
//! Aggregate `resp_corr`; discriminator column `resp_corr_type`. A row is
//! keyed by the dynamic model scan set it was computed for and carries the
//! key of that set's recordings as `scan_set_hash`.

use super::{ModuleList, UnitDetail, Variant};
use crate::context::SyncContext;
use crate::db::groups::scan_set_hashes;
use crate::error::Result;
use crate::groups::GroupKind;
use crate::source::{Relation, Restriction, Row};
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;

pub const AGGREGATE: &str = "resp_corr";
pub const DISCRIMINATOR: &str = "resp_corr_type";

/// Attribute naming the dynamic model scan set a response array belongs to
pub const SET_ATTRIBUTE: &str = "dynamic_model_scan_set_hash";

/// Response arrays of v10 models, one per recorded dynamic model scan set
///
/// Arrays published for a set that is not recorded in the warehouse are
/// not candidates.
pub struct RespArrNnsV10;

impl RespArrNnsV10 {
    const MODULES: ModuleList = &[("minnie_function", "minnie_function")];
    const KEY: &'static [&'static str] = &[SET_ATTRIBUTE];
}

/// Recorded dynamic model scan sets with the key of their recordings
async fn recorded_sets(ctx: &SyncContext) -> Result<Relation> {
    let sets = scan_set_hashes(ctx.pool(), GroupKind::DynamicModelScanSet.as_str()).await?;
    Ok(Relation::new(
        sets.into_iter()
            .map(|(group_hash, scan_set_hash)| {
                let mut row = Row::new();
                row.insert(SET_ATTRIBUTE.to_string(), Value::from(group_hash));
                row.insert("scan_set_hash".to_string(), Value::from(scan_set_hash));
                row
            })
            .collect(),
    ))
}

#[async_trait]
impl Variant for RespArrNnsV10 {
    fn name(&self) -> &'static str {
        "RespArrNnsV10"
    }

    fn aggregate(&self) -> &'static str {
        AGGREGATE
    }

    fn modules(&self) -> ModuleList {
        Self::MODULES
    }

    fn key_attributes(&self) -> &'static [&'static str] {
        Self::KEY
    }

    async fn upstream(&self, ctx: &SyncContext) -> Result<Relation> {
        let arrays = ctx
            .fetch(Self::MODULES, "minnie_function", "RespArrNnsV10", &Restriction::all())
            .await?;
        Ok(arrays.join(&recorded_sets(ctx).await?))
    }

    /// Correlations are per set; there are no unit rows
    async fn units(&self, _ctx: &SyncContext, _master: &Row) -> Result<Vec<UnitDetail>> {
        Ok(Vec::new())
    }
}

pub fn variants() -> Vec<Arc<dyn Variant>> {
    vec![Arc::new(RespArrNnsV10)]
}
