//! Reference tables: recordings, their units and stimulus types

use crate::aggregate::Aggregate;
use crate::context::{scan_row, SyncContext};
use crate::db::catalog::{insert_scan, insert_stimulus_type, insert_unit_source, stored_scans};
use crate::error::Result;
use crate::populator::{Candidate, SyncTarget};
use crate::source::relation::{get_i64, get_str, scan_of};
use crate::source::{Restriction, RowKey};
use async_trait::async_trait;
use nda_common::db::UnitSource;
use sqlx::SqliteConnection;
use std::collections::HashSet;
use tracing::info;

const MODULES: &[(&str, &str)] = &[("nda", "minnie_nda")];
const SCAN_KEY: &[&str] = &["animal_id", "scan_session", "scan_idx"];

/// Incremental copy of the upstream scan catalog with its units
pub struct ScanCatalog;

#[async_trait]
impl SyncTarget for ScanCatalog {
    type Prepared = Vec<UnitSource>;

    fn target_name(&self) -> String {
        "catalog/scan".to_string()
    }

    async fn upstream(&self, ctx: &SyncContext) -> Result<Vec<Candidate>> {
        ctx.fetch(MODULES, "nda", "Scan", &Restriction::all())
            .await?
            .project(SCAN_KEY)
            .into_rows()
            .into_iter()
            .map(|master| {
                Ok(Candidate {
                    key: RowKey::from_row(&master, SCAN_KEY)?,
                    master,
                })
            })
            .collect()
    }

    async fn stored(&self, ctx: &SyncContext) -> Result<HashSet<String>> {
        stored_scans(ctx.pool())
            .await?
            .iter()
            .map(|scan| Ok(RowKey::from_row(&scan_row(scan), SCAN_KEY)?.to_canonical()))
            .collect()
    }

    async fn prepare(&self, ctx: &SyncContext, candidate: &Candidate) -> Result<Vec<UnitSource>> {
        let scan = scan_of(&candidate.master)?;
        let restriction = Restriction::all()
            .eq("animal_id", scan.animal_id)
            .eq("scan_session", scan.scan_session)
            .eq("scan_idx", scan.scan_idx);

        ctx.fetch(MODULES, "nda", "UnitSource", &restriction)
            .await?
            .rows()
            .iter()
            .map(|row| {
                Ok(UnitSource {
                    animal_id: scan.animal_id,
                    scan_session: scan.scan_session,
                    scan_idx: scan.scan_idx,
                    unit_id: get_i64(row, "unit_id")?,
                    mask_type: get_str(row, "mask_type")?.to_string(),
                })
            })
            .collect()
    }

    async fn commit(&self, conn: &mut SqliteConnection, candidate: &Candidate, units: &Vec<UnitSource>) -> Result<()> {
        insert_scan(&mut *conn, &scan_of(&candidate.master)?).await?;
        for unit in units {
            insert_unit_source(&mut *conn, unit).await?;
        }
        Ok(())
    }
}

/// Stimulus type lookup filled from the orientation aggregate
pub struct StimTypeCatalog;

impl StimTypeCatalog {
    /// Insert every stimulus type the orientation rows report; returns how many were new
    pub async fn fill(ctx: &SyncContext) -> Result<usize> {
        let types = Aggregate::orientation()?.all_stimulus_types(ctx).await?;
        let mut added = 0;
        for stimulus_type in &types {
            if insert_stimulus_type(ctx.pool(), stimulus_type).await? {
                added += 1;
            }
        }
        info!(found = types.len(), added, "Stimulus types filled");
        Ok(added)
    }
}
