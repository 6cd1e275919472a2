//! Upstream data sources
//!
//! Upstream schemas are opaque, named relational sources. The engine only
//! needs to fetch the rows of a relation under an equality restriction;
//! joins and renames happen client-side in [`relation`].

pub mod memory;
pub mod registry;
pub mod relation;
pub mod sqlite;

pub use memory::{MemoryConnector, MemorySource};
pub use registry::{SourceConnector, SourceRegistry};
pub use relation::{Relation, Row, RowKey};
pub use sqlite::{SqliteConnector, SqliteSource};

use crate::error::Result;
use async_trait::async_trait;
use serde_json::Value;

/// Conjunction of attribute equality predicates
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Restriction {
    predicates: Vec<(String, Value)>,
}

impl Restriction {
    /// No predicates: every row matches
    pub fn all() -> Self {
        Self::default()
    }

    /// Add `attribute = value`
    pub fn eq(mut self, attribute: impl Into<String>, value: impl Into<Value>) -> Self {
        self.predicates.push((attribute.into(), value.into()));
        self
    }

    pub fn predicates(&self) -> &[(String, Value)] {
        &self.predicates
    }

    /// True when the row satisfies every predicate
    pub fn matches(&self, row: &Row) -> bool {
        self.predicates
            .iter()
            .all(|(attr, value)| row.get(attr).map(|v| v == value).unwrap_or(false))
    }
}

/// One upstream schema
#[async_trait]
pub trait UpstreamSource: Send + Sync {
    /// Schema this handle is connected to
    fn schema_name(&self) -> &str;

    /// Fetch the rows of `relation` satisfying `restriction`
    ///
    /// Any failure to reach or read the schema is reported as
    /// [`crate::Error::SourceUnavailable`].
    async fn query(&self, relation: &str, restriction: &Restriction) -> Result<Vec<Row>>;

    /// Fetch a whole relation
    async fn fetch(&self, relation: &str) -> Result<Relation> {
        Ok(Relation::new(self.query(relation, &Restriction::all()).await?))
    }

    /// Fetch a restricted relation
    async fn fetch_where(&self, relation: &str, restriction: &Restriction) -> Result<Relation> {
        Ok(Relation::new(self.query(relation, restriction).await?))
    }
}
