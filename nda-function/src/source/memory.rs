//! In-memory upstream sources
//!
//! Used for fixtures and tests; a schema can be marked offline to exercise
//! the unavailable-source path.

use super::{registry::SourceConnector, Restriction, Row, UpstreamSource};
use crate::error::{Error, Result};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};

/// One in-memory schema
pub struct MemorySource {
    schema: String,
    relations: RwLock<HashMap<String, Vec<Row>>>,
    offline: AtomicBool,
}

impl MemorySource {
    pub fn new(schema: impl Into<String>) -> Self {
        Self {
            schema: schema.into(),
            relations: RwLock::new(HashMap::new()),
            offline: AtomicBool::new(false),
        }
    }

    /// Append rows to a relation (created if missing)
    pub fn insert(&self, relation: &str, rows: impl IntoIterator<Item = Row>) {
        let mut relations = self.relations.write().unwrap_or_else(|e| e.into_inner());
        relations.entry(relation.to_string()).or_default().extend(rows);
    }

    /// Simulate the schema going away
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }
}

#[async_trait]
impl UpstreamSource for MemorySource {
    fn schema_name(&self) -> &str {
        &self.schema
    }

    async fn query(&self, relation: &str, restriction: &Restriction) -> Result<Vec<Row>> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(Error::SourceUnavailable {
                source_name: self.schema.clone(),
                reason: "schema offline".to_string(),
            });
        }

        let relations = self.relations.read().unwrap_or_else(|e| e.into_inner());
        let rows = relations.get(relation).ok_or_else(|| Error::SourceUnavailable {
            source_name: self.schema.clone(),
            reason: format!("no relation '{}'", relation),
        })?;

        Ok(rows.iter().filter(|r| restriction.matches(r)).cloned().collect())
    }
}

/// Connector over a fixed set of in-memory schemas
#[derive(Default)]
pub struct MemoryConnector {
    sources: RwLock<HashMap<String, Arc<MemorySource>>>,
    offline: RwLock<HashSet<String>>,
    connects: AtomicUsize,
}

impl MemoryConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a schema, returning the shared handle
    pub fn insert(&self, source: MemorySource) -> Arc<MemorySource> {
        let source = Arc::new(source);
        let mut sources = self.sources.write().unwrap_or_else(|e| e.into_inner());
        sources.insert(source.schema.clone(), source.clone());
        source
    }

    /// Schema handle, registering an empty one if missing
    pub fn schema(&self, schema: &str) -> Arc<MemorySource> {
        let existing = self
            .sources
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(schema)
            .cloned();
        match existing {
            Some(source) => source,
            None => self.insert(MemorySource::new(schema)),
        }
    }

    /// Refuse connections to `schema`
    pub fn set_unreachable(&self, schema: &str) {
        self.offline
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(schema.to_string());
    }

    /// Number of successful connects so far
    pub fn connect_count(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SourceConnector for MemoryConnector {
    async fn connect(&self, schema_name: &str) -> Result<Arc<dyn UpstreamSource>> {
        let unreachable = self
            .offline
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .contains(schema_name);
        let source = self
            .sources
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(schema_name)
            .cloned();

        match source {
            Some(source) if !unreachable => {
                self.connects.fetch_add(1, Ordering::SeqCst);
                Ok(source as Arc<dyn UpstreamSource>)
            }
            _ => Err(Error::SourceUnavailable {
                source_name: schema_name.to_string(),
                reason: "schema not reachable".to_string(),
            }),
        }
    }
}
