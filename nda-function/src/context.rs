//! Shared handles passed to every engine component

use crate::config::EngineSettings;
use crate::error::{Error, Result};
use crate::source::{Relation, Restriction, Row, SourceRegistry, UpstreamSource};
use nda_common::db::ScanKey;
use serde_json::Value;
use sqlx::SqlitePool;
use std::sync::Arc;

/// Warehouse pool, upstream registry and settings for one process
#[derive(Clone)]
pub struct SyncContext {
    pool: SqlitePool,
    sources: Arc<SourceRegistry>,
    settings: EngineSettings,
}

impl SyncContext {
    pub fn new(pool: SqlitePool, sources: Arc<SourceRegistry>, settings: EngineSettings) -> Self {
        Self { pool, sources, settings }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub fn sources(&self) -> &SourceRegistry {
        &self.sources
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    pub fn with_settings(mut self, settings: EngineSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Upstream handle for `module`, whose schema is listed in `modules`
    pub async fn module(&self, modules: &[(&str, &str)], module: &str) -> Result<Arc<dyn UpstreamSource>> {
        let (_, schema) = modules
            .iter()
            .find(|(name, _)| *name == module)
            .ok_or_else(|| Error::Internal(format!("module '{}' is not declared", module)))?;
        self.sources.module(module, schema).await
    }

    /// Fetch a restricted upstream relation with `session` renamed to `scan_session`
    pub async fn fetch(
        &self,
        modules: &[(&str, &str)],
        module: &str,
        relation: &str,
        restriction: &Restriction,
    ) -> Result<Relation> {
        let source = self.module(modules, module).await?;
        Ok(source
            .fetch_where(relation, &upstream_restriction(restriction))
            .await?
            .rename("session", "scan_session"))
    }

    /// Recordings in the warehouse scan catalog
    pub async fn catalog_scans(&self) -> Result<Relation> {
        let scans: Vec<ScanKey> =
            sqlx::query_as("SELECT animal_id, scan_session, scan_idx FROM scan ORDER BY animal_id, scan_session, scan_idx")
                .fetch_all(&self.pool)
                .await?;
        Ok(scan_relation(&scans))
    }

    /// Recordings belonging to any registered scan set
    pub async fn scan_set_scans(&self) -> Result<Relation> {
        let scans: Vec<ScanKey> = sqlx::query_as(
            r#"
            SELECT DISTINCT animal_id, scan_session, scan_idx
            FROM group_members
            WHERE kind = 'scan_set' AND animal_id IS NOT NULL
            "#,
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(scan_relation(&scans))
    }
}

/// Upstream relations name the session attribute `session`
fn upstream_restriction(restriction: &Restriction) -> Restriction {
    restriction
        .predicates()
        .iter()
        .fold(Restriction::all(), |acc, (attr, value)| {
            let attr = if attr == "scan_session" { "session" } else { attr.as_str() };
            acc.eq(attr, value.clone())
        })
}

/// Scan keys as rows, for semijoins
pub fn scan_relation(scans: &[ScanKey]) -> Relation {
    Relation::new(scans.iter().map(scan_row).collect())
}

pub fn scan_row(scan: &ScanKey) -> Row {
    let mut row = Row::new();
    row.insert("animal_id".to_string(), Value::from(scan.animal_id));
    row.insert("scan_session".to_string(), Value::from(scan.scan_session));
    row.insert("scan_idx".to_string(), Value::from(scan.scan_idx));
    row
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_restriction_uses_upstream_session_name() {
        let restriction = Restriction::all().eq("animal_id", 17797).eq("scan_session", 4);
        let upstream = upstream_restriction(&restriction);

        assert_eq!(upstream.predicates()[0].0, "animal_id");
        assert_eq!(upstream.predicates()[1].0, "session");
    }
}
