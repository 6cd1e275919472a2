//! Aggregates: the union of their variants' rows, dispatched by discriminator
//!
//! An aggregate row records which variant wrote it. Every capability call
//! looks that variant up in the registry and delegates; nothing about a
//! variant is re-derived from the key itself.

use crate::context::SyncContext;
use crate::db::aggregates::{aggregate_rows, load_aggregate_row};
use crate::db::variant_rows::load_variant_row;
use crate::error::{Error, Result};
use crate::populator::{ConfirmPolicy, Populator, SyncReport, VariantTarget};
use crate::variant::{dynamic_model, oracle, orientation, resp_corr, TuningCurve, Variant, VariantRegistry};
use nda_common::db::{AggregateRowRecord, ScanKey, VariantRowRecord};
use serde::Serialize;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{error, info, warn};

/// Aggregate names accepted by [`Aggregate::by_name`], parents before dependants
pub const AGGREGATES: &[&str] = &[
    orientation::AGGREGATE,
    oracle::AGGREGATE,
    dynamic_model::MODEL_AGGREGATE,
    dynamic_model::SCORE_AGGREGATE,
    resp_corr::AGGREGATE,
];

/// Variant that could not be synchronized
#[derive(Debug, Clone, Serialize)]
pub struct VariantFailure {
    pub variant: String,
    pub reason: String,
}

/// Outcome of filling every variant of one aggregate
#[derive(Debug, Clone, Serialize)]
pub struct FillReport {
    pub aggregate: String,
    pub runs: Vec<SyncReport>,
    /// Variants whose sync aborted before committing anything
    pub aborted: Vec<VariantFailure>,
}

impl FillReport {
    pub fn added(&self) -> usize {
        self.runs.iter().map(SyncReport::added).sum()
    }

    pub fn failed_candidates(&self) -> usize {
        self.runs.iter().map(|r| r.failed.len()).sum()
    }

    /// At least one variant's batch was declined
    pub fn declined(&self) -> bool {
        self.runs.iter().any(|r| r.declined)
    }

    pub fn is_clean(&self) -> bool {
        self.aborted.is_empty() && self.failed_candidates() == 0 && !self.declined()
    }
}

/// A stored aggregate row together with the variant that owns it
pub struct Resolved {
    pub record: AggregateRowRecord,
    pub variant: Arc<dyn Variant>,
    pub row: VariantRowRecord,
}

pub struct Aggregate {
    name: &'static str,
    discriminator: &'static str,
    variants: VariantRegistry,
}

impl Aggregate {
    pub fn new(discriminator: &'static str, variants: VariantRegistry) -> Self {
        Self {
            name: variants.aggregate(),
            discriminator,
            variants,
        }
    }

    pub fn orientation() -> Result<Self> {
        let variants = VariantRegistry::new(orientation::AGGREGATE).with(orientation::variants())?;
        Ok(Self::new(orientation::DISCRIMINATOR, variants))
    }

    pub fn oracle() -> Result<Self> {
        let variants = VariantRegistry::new(oracle::AGGREGATE).with(oracle::variants())?;
        Ok(Self::new(oracle::DISCRIMINATOR, variants))
    }

    pub fn dynamic_model() -> Result<Self> {
        let variants = VariantRegistry::new(dynamic_model::MODEL_AGGREGATE).with(dynamic_model::model_variants())?;
        Ok(Self::new(dynamic_model::MODEL_DISCRIMINATOR, variants))
    }

    pub fn dynamic_model_score() -> Result<Self> {
        let variants = VariantRegistry::new(dynamic_model::SCORE_AGGREGATE).with(dynamic_model::score_variants())?;
        Ok(Self::new(dynamic_model::SCORE_DISCRIMINATOR, variants))
    }

    pub fn resp_corr() -> Result<Self> {
        let variants = VariantRegistry::new(resp_corr::AGGREGATE).with(resp_corr::variants())?;
        Ok(Self::new(resp_corr::DISCRIMINATOR, variants))
    }

    pub fn by_name(name: &str) -> Result<Self> {
        match name {
            orientation::AGGREGATE => Self::orientation(),
            oracle::AGGREGATE => Self::oracle(),
            dynamic_model::MODEL_AGGREGATE => Self::dynamic_model(),
            dynamic_model::SCORE_AGGREGATE => Self::dynamic_model_score(),
            resp_corr::AGGREGATE => Self::resp_corr(),
            other => Err(Error::InvalidInput(format!(
                "unknown aggregate '{}' (expected one of {:?})",
                other, AGGREGATES
            ))),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Column name the discriminator is reported under
    pub fn discriminator(&self) -> &'static str {
        self.discriminator
    }

    pub fn variants(&self) -> &VariantRegistry {
        &self.variants
    }

    /// Sync every registered variant
    ///
    /// Variants are independent: one that aborts (unreachable upstream,
    /// failed key projection) is recorded and the rest still run.
    pub async fn fill(&self, ctx: &SyncContext, policy: &dyn ConfirmPolicy) -> FillReport {
        let populator = Populator::new(ctx, policy);
        let mut report = FillReport {
            aggregate: self.name.to_string(),
            runs: Vec::new(),
            aborted: Vec::new(),
        };

        for variant in self.variants.iter() {
            let target = VariantTarget::new(variant.clone());
            match populator.sync(&target).await {
                Ok(run) => report.runs.push(run),
                Err(err) => {
                    error!(aggregate = self.name, variant = variant.name(), error = %err, "Variant sync aborted");
                    report.aborted.push(VariantFailure {
                        variant: variant.name().to_string(),
                        reason: err.to_string(),
                    });
                }
            }
        }

        info!(
            aggregate = self.name,
            added = report.added(),
            failed = report.failed_candidates(),
            aborted = report.aborted.len(),
            "Aggregate fill finished"
        );
        report
    }

    /// Find the variant owning `agg_hash` and its stored row
    pub async fn resolve(&self, ctx: &SyncContext, agg_hash: &str) -> Result<Resolved> {
        let record = load_aggregate_row(ctx.pool(), agg_hash)
            .await?
            .filter(|r| r.aggregate == self.name)
            .ok_or_else(|| Error::NotFound(format!("{} row {}", self.name, agg_hash)))?;

        let corrupt = |reason: String| Error::CorruptAggregate {
            aggregate: self.name.to_string(),
            agg_hash: agg_hash.to_string(),
            reason,
        };

        if record.variant.is_empty() {
            return Err(corrupt(format!("{} is empty", self.discriminator)));
        }
        let variant = match self.variants.get(&record.variant) {
            Ok(variant) => variant.clone(),
            Err(_) => return Err(corrupt(format!("{} '{}' is not registered", self.discriminator, record.variant))),
        };
        let row = load_variant_row(ctx.pool(), self.name, &record.variant, &record.entity_key)
            .await?
            .ok_or_else(|| corrupt(format!("no {} row for {}", record.variant, record.entity_key)))?;

        Ok(Resolved { record, variant, row })
    }

    pub async fn stimulus_types(&self, ctx: &SyncContext, agg_hash: &str) -> Result<Vec<String>> {
        let resolved = self.resolve(ctx, agg_hash).await?;
        resolved.variant.stimulus_types(ctx, &resolved.row).await
    }

    pub async fn response_type(&self, ctx: &SyncContext, agg_hash: &str) -> Result<String> {
        let resolved = self.resolve(ctx, agg_hash).await?;
        resolved.variant.response_type(ctx, &resolved.row).await
    }

    pub async fn scan_identity(&self, ctx: &SyncContext, agg_hash: &str) -> Result<ScanKey> {
        let resolved = self.resolve(ctx, agg_hash).await?;
        resolved.variant.scan_identity(ctx, &resolved.row).await
    }

    pub async fn duration_seconds(&self, ctx: &SyncContext, agg_hash: &str) -> Result<f64> {
        let resolved = self.resolve(ctx, agg_hash).await?;
        resolved.variant.duration_seconds(ctx, &resolved.row).await
    }

    pub async fn tuning_curve(&self, ctx: &SyncContext, agg_hash: &str) -> Result<Vec<TuningCurve>> {
        let resolved = self.resolve(ctx, agg_hash).await?;
        resolved.variant.tuning_curve(ctx, &resolved.row).await
    }

    /// Every stored aggregate key
    pub async fn keys(&self, ctx: &SyncContext) -> Result<Vec<String>> {
        Ok(aggregate_rows(ctx.pool(), self.name)
            .await?
            .into_iter()
            .map(|r| r.agg_hash)
            .collect())
    }

    /// Union of the stimulus types of every stored key, sorted
    ///
    /// Keys whose variant has no stimulus type for them are skipped.
    pub async fn all_stimulus_types(&self, ctx: &SyncContext) -> Result<Vec<String>> {
        let mut types = BTreeSet::new();
        for agg_hash in self.keys(ctx).await? {
            match self.stimulus_types(ctx, &agg_hash).await {
                Ok(found) => types.extend(found),
                Err(err @ Error::Unsupported { .. }) => {
                    warn!(aggregate = self.name, agg_hash = %agg_hash, error = %err, "Key has no stimulus type");
                }
                Err(err) => return Err(err),
            }
        }
        Ok(types.into_iter().collect())
    }
}
