//! Incremental population of warehouse tables from upstream feeds
//!
//! One sync run:
//! 1. candidates = upstream keys minus stored keys (primary key only)
//! 2. gated targets with more candidates than the threshold ask the
//!    confirmation policy; a decline ends the run with nothing written
//! 3. every candidate's detail rows are fetched before the first write, so
//!    an unreachable upstream aborts the run with nothing committed
//! 4. each candidate is committed in its own transaction (master, details,
//!    aggregate row); a failure rolls back that candidate only and is
//!    reported, the run continues with the rest
//!
//! Re-running with no upstream change finds no candidates and commits
//! nothing.

pub mod confirm;

pub use confirm::{policy_for, AutoApprove, ConfirmPolicy, ConfirmRequest, Prompt, RejectIfOverThreshold};

use crate::context::SyncContext;
use crate::db::aggregates::insert_aggregate_row;
use crate::db::variant_rows::{insert_unit_rows, insert_variant_row, stored_entity_keys, NewVariantRow, UnitDetail};
use crate::error::{Error, Result};
use crate::hash_identity::entity_hash;
use crate::source::relation::scan_of;
use crate::source::{Row, RowKey};
use crate::utils::{begin_monitored, retry_on_lock};
use crate::variant::Variant;
use async_trait::async_trait;
use serde::Serialize;
use sqlx::SqliteConnection;
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// A master row present upstream but not yet stored
#[derive(Debug, Clone)]
pub struct Candidate {
    pub key: RowKey,
    pub master: Row,
}

impl Candidate {
    pub fn entity_key(&self) -> String {
        self.key.to_canonical()
    }
}

/// Something the populator can fill incrementally
#[async_trait]
pub trait SyncTarget: Send + Sync {
    /// Detail rows fetched for one candidate before any write
    type Prepared: Send + Sync;

    /// Name used in logs, prompts and reports
    fn target_name(&self) -> String;

    fn requires_confirmation(&self) -> bool {
        false
    }

    /// Current upstream master rows with their primary keys
    async fn upstream(&self, ctx: &SyncContext) -> Result<Vec<Candidate>>;

    /// Canonical keys already stored
    async fn stored(&self, ctx: &SyncContext) -> Result<HashSet<String>>;

    /// Fetch everything the candidate's commit needs
    async fn prepare(&self, ctx: &SyncContext, candidate: &Candidate) -> Result<Self::Prepared>;

    /// Write one candidate inside an open transaction
    async fn commit(&self, conn: &mut SqliteConnection, candidate: &Candidate, prepared: &Self::Prepared) -> Result<()>;
}

/// Candidate that could not be committed
#[derive(Debug, Clone, Serialize)]
pub struct FailedCandidate {
    pub entity_key: String,
    pub reason: String,
}

/// Outcome of one sync run
#[derive(Debug, Clone, Serialize)]
pub struct SyncReport {
    pub run_id: Uuid,
    pub target: String,
    /// Entity keys committed by this run
    pub committed: Vec<String>,
    pub failed: Vec<FailedCandidate>,
    /// The confirmation policy declined; nothing was written
    pub declined: bool,
}

impl SyncReport {
    fn new(run_id: Uuid, target: String) -> Self {
        Self {
            run_id,
            target,
            committed: Vec::new(),
            failed: Vec::new(),
            declined: false,
        }
    }

    /// Newly committed rows (not the total stored)
    pub fn added(&self) -> usize {
        self.committed.len()
    }
}

/// Runs sync passes against the warehouse
pub struct Populator<'a> {
    ctx: &'a SyncContext,
    policy: &'a dyn ConfirmPolicy,
}

impl<'a> Populator<'a> {
    pub fn new(ctx: &'a SyncContext, policy: &'a dyn ConfirmPolicy) -> Self {
        Self { ctx, policy }
    }

    /// Commit every new upstream row of `target`
    ///
    /// Returns `SourceUnavailable` (nothing committed) when an upstream
    /// schema cannot be read; per-candidate failures are in the report.
    pub async fn sync<T: SyncTarget + ?Sized>(&self, target: &T) -> Result<SyncReport> {
        let run_id = Uuid::new_v4();
        let target_name = target.target_name();
        let mut report = SyncReport::new(run_id, target_name.clone());

        let candidates = self.candidates(target).await?;
        info!(%run_id, target_name = %target_name, candidates = candidates.len(), "Sync started");

        if candidates.is_empty() {
            debug!(%run_id, target_name = %target_name, "Nothing to sync");
            return Ok(report);
        }

        let threshold = self.ctx.settings().confirm_threshold;
        if target.requires_confirmation() && candidates.len() > threshold {
            let request = ConfirmRequest {
                target: target_name.clone(),
                candidates: candidates.iter().map(Candidate::entity_key).collect(),
                threshold,
            };
            if !self.policy.confirm(&request).await? {
                warn!(%run_id, target_name = %target_name, pending = candidates.len(), "Sync declined, nothing written");
                report.declined = true;
                return Ok(report);
            }
        }

        // Fetch all detail rows up front
        let mut prepared = Vec::with_capacity(candidates.len());
        for candidate in candidates {
            match target.prepare(self.ctx, &candidate).await {
                Ok(details) => prepared.push((candidate, details)),
                Err(err @ Error::SourceUnavailable { .. }) => return Err(err),
                Err(err) => {
                    warn!(%run_id, entity_key = %candidate.key, error = %err, "Candidate could not be prepared");
                    report.failed.push(FailedCandidate {
                        entity_key: candidate.entity_key(),
                        reason: err.to_string(),
                    });
                }
            }
        }

        for (candidate, details) in &prepared {
            let entity_key = candidate.entity_key();
            match self.commit_one(target, candidate, details).await {
                Ok(()) => {
                    debug!(%run_id, entity_key = %entity_key, "Candidate committed");
                    report.committed.push(entity_key);
                }
                Err(err) => {
                    let err = err.for_candidate(&format!("{} {}", target_name, entity_key));
                    warn!(%run_id, entity_key = %entity_key, error = %err, "Candidate rolled back");
                    report.failed.push(FailedCandidate {
                        entity_key,
                        reason: err.to_string(),
                    });
                }
            }
        }

        info!(
            %run_id,
            target_name = %target_name,
            committed = report.committed.len(),
            failed = report.failed.len(),
            "Sync finished"
        );
        Ok(report)
    }

    /// Upstream rows whose key is not stored, one per key
    async fn candidates<T: SyncTarget + ?Sized>(&self, target: &T) -> Result<Vec<Candidate>> {
        let upstream = target.upstream(self.ctx).await?;
        let stored = target.stored(self.ctx).await?;

        let mut pending: BTreeMap<String, Candidate> = BTreeMap::new();
        for candidate in upstream {
            let key = candidate.entity_key();
            if !stored.contains(&key) {
                pending.entry(key).or_insert(candidate);
            }
        }
        Ok(pending.into_values().collect())
    }

    async fn commit_one<T: SyncTarget + ?Sized>(
        &self,
        target: &T,
        candidate: &Candidate,
        details: &T::Prepared,
    ) -> Result<()> {
        let pool = self.ctx.pool();
        retry_on_lock("populator commit", self.ctx.settings().max_lock_wait_ms, || async {
            let mut tx = begin_monitored(pool, "populator::commit_one").await?;
            target.commit(tx.inner_mut()?, candidate, details).await?;
            tx.commit().await
        })
        .await
    }
}

/// Sync target writing one variant's rows and its aggregate rows
pub struct VariantTarget {
    variant: Arc<dyn Variant>,
}

impl VariantTarget {
    pub fn new(variant: Arc<dyn Variant>) -> Self {
        Self { variant }
    }
}

/// Detail rows and parent reference of one variant candidate
pub struct VariantDetails {
    units: Vec<UnitDetail>,
    parent_hash: Option<String>,
}

#[async_trait]
impl SyncTarget for VariantTarget {
    type Prepared = VariantDetails;

    fn target_name(&self) -> String {
        format!("{}/{}", self.variant.aggregate(), self.variant.name())
    }

    fn requires_confirmation(&self) -> bool {
        self.variant.requires_confirmation()
    }

    async fn upstream(&self, ctx: &SyncContext) -> Result<Vec<Candidate>> {
        let key = self.variant.key_attributes();
        self.variant
            .upstream(ctx)
            .await?
            .into_rows()
            .into_iter()
            .map(|master| {
                Ok(Candidate {
                    key: RowKey::from_row(&master, key)?,
                    master,
                })
            })
            .collect()
    }

    async fn stored(&self, ctx: &SyncContext) -> Result<HashSet<String>> {
        let keys = stored_entity_keys(ctx.pool(), self.variant.aggregate(), self.variant.name()).await?;
        Ok(keys.into_iter().collect())
    }

    async fn prepare(&self, ctx: &SyncContext, candidate: &Candidate) -> Result<VariantDetails> {
        Ok(VariantDetails {
            units: self.variant.units(ctx, &candidate.master).await?,
            parent_hash: self.variant.parent(&candidate.master)?.map(|p| p.agg_hash()),
        })
    }

    async fn commit(&self, conn: &mut SqliteConnection, candidate: &Candidate, prepared: &VariantDetails) -> Result<()> {
        let aggregate = self.variant.aggregate();
        let variant = self.variant.name();
        let entity_key = candidate.entity_key();

        let mut attributes = candidate.master.clone();
        for attr in self.variant.key_attributes() {
            attributes.remove(*attr);
        }

        insert_variant_row(
            &mut *conn,
            &NewVariantRow {
                aggregate,
                variant,
                entity_key: &entity_key,
                scan: scan_of(&candidate.master).ok(),
                parent_hash: prepared.parent_hash.as_deref(),
                attributes: &attributes,
            },
        )
        .await?;
        insert_unit_rows(&mut *conn, aggregate, variant, &entity_key, &prepared.units).await?;

        let agg_hash = entity_hash(aggregate, variant, &entity_key);
        insert_aggregate_row(&mut *conn, &agg_hash, aggregate, variant, &entity_key).await
    }
}
