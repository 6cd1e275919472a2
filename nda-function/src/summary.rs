//! Per-recording summaries joined from aggregate accessors
//!
//! A summary denormalizes what consumers filter on: the recording, the
//! stimulus type group, the response type and the stimulus duration. The
//! summary step only looks up groupings; it never creates one.

use crate::aggregate::Aggregate;
use crate::context::SyncContext;
use crate::db::aggregates::rows_without_summary;
use crate::db::catalog::soma_units;
use crate::db::groups::hash_registered;
use crate::db::summaries::{insert_summary, load_summaries, load_summary, summaries_for_scan, NewSummary};
use crate::db::variant_rows::load_unit_rows;
use crate::error::{Error, Result};
use crate::groups::{Group, GroupKind};
use crate::hash_identity::GroupKey;
use crate::utils::{begin_monitored, retry_on_lock};
use crate::variant::{oracle, orientation, TuningCurve};
use nda_common::db::{ScanKey, SummaryRecord};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;
use tracing::{info, warn};

pub const ORIENTATION_SUMMARY: &str = "orientation_scan_info";
pub const ORACLE_SUMMARY: &str = "oracle_scan_info";

/// Which summary table to fill
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SummaryKind {
    Orientation,
    Oracle,
}

impl SummaryKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SummaryKind::Orientation => ORIENTATION_SUMMARY,
            SummaryKind::Oracle => ORACLE_SUMMARY,
        }
    }

    /// Aggregate the summaries are built from
    pub fn aggregate(&self) -> &'static str {
        match self {
            SummaryKind::Orientation => orientation::AGGREGATE,
            SummaryKind::Oracle => oracle::AGGREGATE,
        }
    }
}

impl fmt::Display for SummaryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SummaryKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "orientation" | ORIENTATION_SUMMARY => Ok(SummaryKind::Orientation),
            "oracle" | ORACLE_SUMMARY => Ok(SummaryKind::Oracle),
            other => Err(Error::InvalidInput(format!("unknown summary kind '{}'", other))),
        }
    }
}

/// Round to two decimals, the precision durations are stored at
fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Insert a summary unless another key of the same recording conflicts with it
async fn write_summary(
    ctx: &SyncContext,
    summary: &NewSummary<'_>,
    conflicts: impl Fn(&SummaryRecord, &str) -> bool,
) -> Result<()> {
    let pool = ctx.pool();
    let conflicts = &conflicts;
    retry_on_lock("summary insert", ctx.settings().max_lock_wait_ms, || async {
        let mut tx = begin_monitored(pool, "summary::write_summary").await?;
        let existing = summaries_for_scan(tx.inner_mut()?, summary.kind, &summary.scan).await?;
        if let Some((other, _)) = existing
            .iter()
            .find(|(other, variant)| other.agg_hash != summary.agg_hash && conflicts(other, variant.as_str()))
        {
            return Err(Error::DuplicateRecording {
                scan: summary.scan,
                consumer: summary.kind.to_string(),
                existing: other.agg_hash.clone(),
            });
        }
        insert_summary(tx.inner_mut()?, summary).await?;
        tx.commit().await
    })
    .await
}

async fn stored_summary(ctx: &SyncContext, kind: &str, agg_hash: &str) -> Result<SummaryRecord> {
    load_summary(ctx.pool(), kind, agg_hash)
        .await?
        .ok_or_else(|| Error::Internal(format!("{} summary for {} missing after insert", kind, agg_hash)))
}

/// Orientation row summary
pub struct OrientationScanInfo;

impl OrientationScanInfo {
    /// Summarize one orientation row; an existing summary is returned as is
    ///
    /// The row's stimulus types must already be registered as a stimulus
    /// type group. One recording may be summarized once per (stimulus
    /// group, response type).
    pub async fn make(ctx: &SyncContext, agg_hash: &str) -> Result<SummaryRecord> {
        if let Some(existing) = load_summary(ctx.pool(), ORIENTATION_SUMMARY, agg_hash).await? {
            return Ok(existing);
        }

        let aggregate = Aggregate::orientation()?;
        let stim_types = aggregate.stimulus_types(ctx, agg_hash).await?;
        let stim_key = GroupKey::of(&stim_types);
        if !hash_registered(ctx.pool(), GroupKind::StimTypeGrp.as_str(), stim_key.as_str()).await? {
            return Err(Error::UnregisteredGrouping {
                kind: GroupKind::StimTypeGrp.to_string(),
                key: stim_key,
                members: stim_types,
            });
        }

        let response_type = aggregate.response_type(ctx, agg_hash).await?;
        let scan = aggregate.scan_identity(ctx, agg_hash).await?;
        let duration = round2(aggregate.duration_seconds(ctx, agg_hash).await?);

        let summary = NewSummary {
            kind: ORIENTATION_SUMMARY,
            agg_hash,
            aggregate: aggregate.name(),
            stim_type_grp_hash: Some(stim_key.as_str()),
            response_type: Some(response_type.as_str()),
            stimulus_length: Some(duration),
            scan,
        };
        write_summary(ctx, &summary, |other, _| {
            other.stim_type_grp_hash.as_deref() == Some(stim_key.as_str())
                && other.response_type.as_deref() == Some(response_type.as_str())
        })
        .await?;

        info!(
            agg_hash,
            scan = %scan,
            stim_type_grp_hash = %stim_key,
            response_type = %response_type,
            "Orientation summary written"
        );
        stored_summary(ctx, ORIENTATION_SUMMARY, agg_hash).await
    }
}

/// Oracle row summary
pub struct OracleScanInfo;

impl OracleScanInfo {
    /// Summarize one oracle row; an existing summary is returned as is
    ///
    /// Every soma unit of the recording must have a unit row (a null score
    /// counts as present). One recording may be summarized once per
    /// oracle type.
    pub async fn make(ctx: &SyncContext, agg_hash: &str) -> Result<SummaryRecord> {
        if let Some(existing) = load_summary(ctx.pool(), ORACLE_SUMMARY, agg_hash).await? {
            return Ok(existing);
        }

        let aggregate = Aggregate::oracle()?;
        let resolved = aggregate.resolve(ctx, agg_hash).await?;
        let scan = resolved.variant.scan_identity(ctx, &resolved.row).await?;

        let scored: BTreeSet<i64> = load_unit_rows(
            ctx.pool(),
            aggregate.name(),
            &resolved.record.variant,
            &resolved.record.entity_key,
        )
        .await?
        .into_iter()
        .map(|u| u.unit_id)
        .collect();
        check_complete(scan, &soma_units(ctx.pool(), &scan).await?, &scored)?;

        let oracle_type = resolved.record.variant.clone();
        let summary = NewSummary {
            kind: ORACLE_SUMMARY,
            agg_hash,
            aggregate: aggregate.name(),
            stim_type_grp_hash: None,
            response_type: None,
            stimulus_length: None,
            scan,
        };
        write_summary(ctx, &summary, |_, variant| variant == oracle_type).await?;

        info!(agg_hash, scan = %scan, oracle_type = %oracle_type, "Oracle summary written");
        stored_summary(ctx, ORACLE_SUMMARY, agg_hash).await
    }
}

fn check_complete(scan: ScanKey, soma: &[i64], scored: &BTreeSet<i64>) -> Result<()> {
    let missing = soma.iter().filter(|u| !scored.contains(u)).count();
    if missing > 0 {
        return Err(Error::IncompleteScores { scan, missing });
    }
    Ok(())
}

/// Summarize one aggregate key
pub async fn summarize(ctx: &SyncContext, kind: SummaryKind, agg_hash: &str) -> Result<SummaryRecord> {
    match kind {
        SummaryKind::Orientation => OrientationScanInfo::make(ctx, agg_hash).await,
        SummaryKind::Oracle => OracleScanInfo::make(ctx, agg_hash).await,
    }
}

/// Key that could not be summarized
#[derive(Debug, Clone, Serialize)]
pub struct SummaryFailure {
    pub agg_hash: String,
    pub reason: String,
}

/// Outcome of summarizing every pending key
#[derive(Debug, Clone, Default, Serialize)]
pub struct SummarizeReport {
    pub summarized: Vec<String>,
    pub failed: Vec<SummaryFailure>,
}

/// Summarize every aggregate key of `kind` that has no summary yet
///
/// Keys fail independently; the report lists which.
pub async fn summarize_pending(ctx: &SyncContext, kind: SummaryKind) -> Result<SummarizeReport> {
    let mut report = SummarizeReport::default();
    for row in rows_without_summary(ctx.pool(), kind.aggregate(), kind.as_str()).await? {
        match summarize(ctx, kind, &row.agg_hash).await {
            Ok(_) => report.summarized.push(row.agg_hash),
            Err(err) => {
                warn!(kind = %kind, agg_hash = %row.agg_hash, error = %err, "Summary skipped");
                report.failed.push(SummaryFailure {
                    agg_hash: row.agg_hash,
                    reason: err.to_string(),
                });
            }
        }
    }
    info!(
        kind = %kind,
        summarized = report.summarized.len(),
        failed = report.failed.len(),
        "Pending summaries processed"
    );
    Ok(report)
}

/// Tuning curves of every member of an orientation scan set
///
/// Each recording must be summarized by exactly one member.
pub async fn set_tuning_curves(ctx: &SyncContext, group: &Group) -> Result<Vec<TuningCurve>> {
    if group.kind != GroupKind::OrientationScanSet {
        return Err(Error::InvalidInput(format!(
            "tuning curves need an {} group, got {}",
            GroupKind::OrientationScanSet,
            group.kind
        )));
    }

    let keys: Vec<String> = group.members.iter().map(|m| m.member_key.clone()).collect();
    let summaries = load_summaries(ctx.pool(), ORIENTATION_SUMMARY, &keys).await?;

    let mut by_scan: BTreeMap<ScanKey, &str> = BTreeMap::new();
    for summary in &summaries {
        if let Some(existing) = by_scan.insert(summary.scan(), &summary.agg_hash) {
            return Err(Error::DuplicateRecording {
                scan: summary.scan(),
                consumer: group.name.clone(),
                existing: existing.to_string(),
            });
        }
    }

    let aggregate = Aggregate::orientation()?;
    let mut curves = Vec::new();
    for summary in &summaries {
        curves.extend(aggregate.tuning_curve(ctx, &summary.agg_hash).await?);
    }
    Ok(curves)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_to_two_decimals() {
        assert_eq!(round2(1234.5678), 1234.57);
        assert_eq!(round2(0.004), 0.0);
    }

    #[test]
    fn test_summary_kind_names() {
        assert_eq!("orientation".parse::<SummaryKind>().unwrap(), SummaryKind::Orientation);
        assert_eq!(ORACLE_SUMMARY.parse::<SummaryKind>().unwrap(), SummaryKind::Oracle);
        assert!("tuning".parse::<SummaryKind>().is_err());
    }

    #[test]
    fn test_completeness_counts_missing_soma_units() {
        let scan = ScanKey::new(17797, 4, 7);
        let scored: BTreeSet<i64> = [1, 2].into_iter().collect();

        assert!(check_complete(scan, &[1, 2], &scored).is_ok());
        assert!(matches!(
            check_complete(scan, &[1, 2, 3, 4], &scored),
            Err(Error::IncompleteScores { missing: 2, .. })
        ));
    }
}
