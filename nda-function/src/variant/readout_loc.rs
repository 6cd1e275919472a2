//! Readout locations of unique-unit v10 models
//!
//! Incremental per-model copy: every stored `NnsV10ScanV3Unique` model row
//! that has perspective rows upstream gets its units' readout locations,
//! each unique unit expanded to the functional units it stands for. A
//! model counts as copied once any of its locations is stored.

use super::dynamic_model::{MODEL_AGGREGATE, MODEL_KEY};
use super::{ModuleList, UnitDetail};
use crate::context::SyncContext;
use crate::db::aggregates::aggregate_rows;
use crate::db::readout::{insert_readout_locations, located_models};
use crate::error::Result;
use crate::populator::{Candidate, SyncTarget};
use crate::source::relation::{get_i64, get_str, scan_of};
use crate::source::{Relation, Restriction, Row, RowKey};
use async_trait::async_trait;
use serde_json::Value;
use sqlx::SqliteConnection;
use std::collections::HashSet;

const MODULES: ModuleList = &[
    ("dv_nns_v10_scan", "dv_nns_v10_scan"),
    ("dv_scans_v3_scan", "dv_scans_v3_scan"),
];
const MODEL_VARIANT: &str = "NnsV10ScanV3Unique";
const KEY: &[&str] = &["agg_hash"];

/// Sync target filling `readout_locations`
pub struct ReadoutLocations;

fn restriction_of(key: &RowKey) -> Restriction {
    key.to_row()
        .into_iter()
        .fold(Restriction::all(), |acc, (attr, value)| acc.eq(attr, value))
}

#[async_trait]
impl SyncTarget for ReadoutLocations {
    type Prepared = Vec<UnitDetail>;

    fn target_name(&self) -> String {
        format!("{}/{}/readout_loc", MODEL_AGGREGATE, MODEL_VARIANT)
    }

    async fn upstream(&self, ctx: &SyncContext) -> Result<Vec<Candidate>> {
        let perspective = ctx
            .fetch(MODULES, "dv_nns_v10_scan", "Perspective_Unit", &Restriction::all())
            .await?;

        let mut candidates = Vec::new();
        for record in aggregate_rows(ctx.pool(), MODEL_AGGREGATE).await? {
            if record.variant != MODEL_VARIANT {
                continue;
            }
            let model = RowKey::from_canonical(&record.entity_key)?.to_row();
            if Relation::new(vec![model.clone()]).semijoin(&perspective).is_empty() {
                continue;
            }

            let mut master = model;
            master.insert("agg_hash".to_string(), Value::from(record.agg_hash));
            candidates.push(Candidate {
                key: RowKey::from_row(&master, KEY)?,
                master,
            });
        }
        Ok(candidates)
    }

    async fn stored(&self, ctx: &SyncContext) -> Result<HashSet<String>> {
        located_models(ctx.pool())
            .await?
            .into_iter()
            .map(|agg_hash| {
                let mut row = Row::new();
                row.insert("agg_hash".to_string(), Value::from(agg_hash));
                Ok(RowKey::from_row(&row, KEY)?.to_canonical())
            })
            .collect()
    }

    async fn prepare(&self, ctx: &SyncContext, candidate: &Candidate) -> Result<Vec<UnitDetail>> {
        let model = RowKey::from_row(&candidate.master, MODEL_KEY)?;
        let scan = scan_of(&candidate.master)?;
        let by_scan = Restriction::all()
            .eq("animal_id", scan.animal_id)
            .eq("scan_session", scan.scan_session)
            .eq("scan_idx", scan.scan_idx);

        let locations = ctx
            .fetch(MODULES, "dv_nns_v10_scan", "Perspective_Unit", &restriction_of(&model))
            .await?
            .rename("unit_id", "unique_unit_id");
        let unique = ctx.fetch(MODULES, "dv_scans_v3_scan", "Unique_Unit", &by_scan).await?;

        locations
            .join(&unique)
            .rows()
            .iter()
            .map(|row| {
                let mut attributes = row.clone();
                for attr in MODEL_KEY {
                    attributes.remove(*attr);
                }
                attributes.remove("unit_id");
                Ok(UnitDetail {
                    unit_id: get_i64(row, "unit_id")?,
                    score: None,
                    attributes,
                })
            })
            .collect()
    }

    async fn commit(&self, conn: &mut SqliteConnection, candidate: &Candidate, units: &Vec<UnitDetail>) -> Result<()> {
        insert_readout_locations(conn, get_str(&candidate.master, "agg_hash")?, units).await
    }
}
