//! Declarative variant for feeds that are a plain per-recording copy
//!
//! Most feeds follow the same shape: a master relation (optionally joined
//! with configuration relations from other modules) restricted to the
//! recordings in the warehouse catalog, and a unit relation holding one
//! score per unit. [`ScanCopy`] captures that shape as data.

use super::{ModuleList, ParentRef, UnitDetail, Variant};
use crate::context::SyncContext;
use crate::error::Result;
use crate::source::relation::{get_i64, opt_f64, scan_of};
use crate::source::{Relation, Restriction, Row, RowKey};
use async_trait::async_trait;

/// A relation inside one upstream module
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RelationRef {
    pub module: &'static str,
    pub relation: &'static str,
}

impl RelationRef {
    pub const fn new(module: &'static str, relation: &'static str) -> Self {
        Self { module, relation }
    }
}

/// Where a variant's unit rows come from
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct UnitSpec {
    pub relation: RelationRef,
    /// Attribute holding the unit's score
    pub score: Option<&'static str>,
    /// Maps `unique_unit_id` to every functional `unit_id` of the recording
    pub unique_map: Option<RelationRef>,
    /// Every unit of the recording; units missing from `relation` get a null score
    pub roster: Option<RelationRef>,
}

/// Parent aggregate row a copied row depends on
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ParentSpec {
    pub aggregate: &'static str,
    pub variant: &'static str,
    pub key: &'static [&'static str],
}

/// Per-recording copy of an upstream feed
#[derive(Debug, Clone)]
pub struct ScanCopy {
    pub name: &'static str,
    pub aggregate: &'static str,
    pub modules: ModuleList,
    pub master: RelationRef,
    /// Relations joined into the master rows
    pub joins: &'static [RelationRef],
    /// Constant restrictions applied to master and unit fetches
    pub constants: &'static [(&'static str, i64)],
    pub key: &'static [&'static str],
    /// Master rows are the distinct keys of the unit relation
    pub master_from_units: bool,
    pub units: UnitSpec,
    pub gated: bool,
    pub parent: Option<ParentSpec>,
}

impl ScanCopy {
    fn constants(&self) -> Restriction {
        self.constants
            .iter()
            .fold(Restriction::all(), |acc, (attr, value)| acc.eq(*attr, *value))
    }

    fn key_restriction(&self, master: &Row) -> Result<Restriction> {
        let key = RowKey::from_row(master, self.key)?;
        Ok(key
            .to_row()
            .into_iter()
            .fold(self.constants(), |acc, (attr, value)| acc.eq(attr, value)))
    }

    async fn fetch(&self, ctx: &SyncContext, relation: &RelationRef, restriction: &Restriction) -> Result<Relation> {
        ctx.fetch(self.modules, relation.module, relation.relation, restriction).await
    }
}

fn scan_restriction(master: &Row) -> Result<Restriction> {
    let scan = scan_of(master)?;
    Ok(Restriction::all()
        .eq("animal_id", scan.animal_id)
        .eq("scan_session", scan.scan_session)
        .eq("scan_idx", scan.scan_idx))
}

#[async_trait]
impl Variant for ScanCopy {
    fn name(&self) -> &'static str {
        self.name
    }

    fn aggregate(&self) -> &'static str {
        self.aggregate
    }

    fn modules(&self) -> ModuleList {
        self.modules
    }

    fn key_attributes(&self) -> &'static [&'static str] {
        self.key
    }

    fn requires_confirmation(&self) -> bool {
        self.gated
    }

    async fn upstream(&self, ctx: &SyncContext) -> Result<Relation> {
        let mut master = if self.master_from_units {
            self.fetch(ctx, &self.units.relation, &self.constants())
                .await?
                .project(self.key)
        } else {
            self.fetch(ctx, &self.master, &self.constants()).await?
        };

        for join in self.joins {
            let other = self.fetch(ctx, join, &Restriction::all()).await?;
            master = master.join(&other);
        }

        Ok(master.semijoin(&ctx.catalog_scans().await?))
    }

    async fn units(&self, ctx: &SyncContext, master: &Row) -> Result<Vec<UnitDetail>> {
        let mut rows = self.fetch(ctx, &self.units.relation, &self.key_restriction(master)?).await?;

        if let Some(map) = &self.units.unique_map {
            let map = self.fetch(ctx, map, &scan_restriction(master)?).await?;
            rows = rows.rename("unit_id", "unique_unit_id").join(&map);
        }

        let mut units = rows
            .rows()
            .iter()
            .map(|row| {
                let mut attributes = row.clone();
                for attr in self.key {
                    attributes.remove(*attr);
                }
                attributes.remove("unit_id");
                Ok(UnitDetail {
                    unit_id: get_i64(row, "unit_id")?,
                    score: self.units.score.and_then(|attr| opt_f64(row, attr)),
                    attributes,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        if let Some(roster) = &self.units.roster {
            for row in self.fetch(ctx, roster, &scan_restriction(master)?).await?.rows() {
                units.push(UnitDetail {
                    unit_id: get_i64(row, "unit_id")?,
                    score: None,
                    attributes: Row::new(),
                });
            }
        }

        Ok(units)
    }

    fn parent(&self, master: &Row) -> Result<Option<ParentRef>> {
        match &self.parent {
            Some(spec) => Ok(Some(ParentRef {
                aggregate: spec.aggregate,
                variant: spec.variant,
                entity_key: RowKey::from_row(master, spec.key)?,
            })),
            None => Ok(None),
        }
    }
}
