//! One `fill` pass over several aggregates and their follow-up steps
//!
//! Aggregates are filled in the order given. After `orientation` the
//! stimulus type lookup is refreshed; after `dynamic_model` the readout
//! locations of new models are copied. A follow-up step that fails is
//! logged and recorded; the reports collected so far are always returned.

use crate::aggregate::{Aggregate, FillReport};
use crate::catalog::StimTypeCatalog;
use crate::context::SyncContext;
use crate::error::{Error, Result};
use crate::populator::{ConfirmPolicy, Populator, SyncReport};
use crate::variant::readout_loc::ReadoutLocations;
use crate::variant::{dynamic_model, orientation};
use serde::Serialize;
use tracing::error;

/// A step that failed after earlier reports were collected
#[derive(Debug, Clone, Serialize)]
pub struct StepFailure {
    pub step: String,
    pub reason: String,
}

/// Everything one fill pass did
#[derive(Debug, Clone, Default, Serialize)]
pub struct FillRun {
    pub aggregates: Vec<FillReport>,
    /// Sync runs of follow-up targets
    pub follow_ups: Vec<SyncReport>,
    /// Stimulus types newly added to the lookup
    pub stimulus_types_added: usize,
    pub errors: Vec<StepFailure>,
}

impl FillRun {
    /// Some gated batch was declined
    pub fn declined(&self) -> bool {
        self.aggregates.iter().any(FillReport::declined) || self.follow_ups.iter().any(|r| r.declined)
    }

    pub fn is_clean(&self) -> bool {
        self.errors.is_empty()
            && self.aggregates.iter().all(FillReport::is_clean)
            && self.follow_ups.iter().all(|r| r.failed.is_empty() && !r.declined)
    }

    fn record(&mut self, step: &str, err: Error) {
        error!(step, error = %err, "Fill step failed");
        self.errors.push(StepFailure {
            step: step.to_string(),
            reason: err.to_string(),
        });
    }
}

/// Fill `names` in order; fails only for an unknown aggregate name
pub async fn fill_aggregates(ctx: &SyncContext, names: &[&str], policy: &dyn ConfirmPolicy) -> Result<FillRun> {
    let aggregates = names
        .iter()
        .map(|name| Aggregate::by_name(name))
        .collect::<Result<Vec<_>>>()?;

    let mut run = FillRun::default();
    for aggregate in aggregates {
        run.aggregates.push(aggregate.fill(ctx, policy).await);

        match aggregate.name() {
            orientation::AGGREGATE => match StimTypeCatalog::fill(ctx).await {
                Ok(added) => run.stimulus_types_added += added,
                Err(err) => run.record("stimulus_type", err),
            },
            dynamic_model::MODEL_AGGREGATE => match Populator::new(ctx, policy).sync(&ReadoutLocations).await {
                Ok(report) => run.follow_ups.push(report),
                Err(err) => run.record("readout_locations", err),
            },
            _ => {}
        }
    }
    Ok(run)
}
