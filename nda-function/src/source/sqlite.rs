//! Upstream schemas stored as SQLite files
//!
//! Each upstream schema is one database file `<folder>/<schema>.db`, opened
//! read-only. Relations are tables; part tables use `Master_Part` names.

use super::{registry::SourceConnector, Restriction, Row, UpstreamSource};
use crate::error::{Error, Result};
use async_trait::async_trait;
use serde_json::Value;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{Column, Row as _, SqlitePool, TypeInfo, ValueRef};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::debug;

/// Connector opening schema files from one folder
pub struct SqliteConnector {
    folder: PathBuf,
}

impl SqliteConnector {
    pub fn new(folder: impl Into<PathBuf>) -> Self {
        Self { folder: folder.into() }
    }

    fn schema_path(&self, schema_name: &str) -> PathBuf {
        self.folder.join(format!("{}.db", schema_name))
    }
}

#[async_trait]
impl SourceConnector for SqliteConnector {
    async fn connect(&self, schema_name: &str) -> Result<Arc<dyn UpstreamSource>> {
        let unavailable = |reason: String| Error::SourceUnavailable {
            source_name: schema_name.to_string(),
            reason,
        };

        check_identifier(schema_name).map_err(|e| unavailable(e.to_string()))?;
        let path = self.schema_path(schema_name);
        if !path.exists() {
            return Err(unavailable(format!("{} does not exist", path.display())));
        }

        let options = SqliteConnectOptions::new().filename(&path).read_only(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await
            .map_err(|e| unavailable(e.to_string()))?;

        debug!(schema = schema_name, path = %path.display(), "Opened upstream schema");
        Ok(Arc::new(SqliteSource::new(schema_name, pool)) as Arc<dyn UpstreamSource>)
    }
}

/// One upstream schema backed by a SQLite pool
pub struct SqliteSource {
    schema: String,
    pool: SqlitePool,
}

impl SqliteSource {
    pub fn new(schema: impl Into<String>, pool: SqlitePool) -> Self {
        Self {
            schema: schema.into(),
            pool,
        }
    }

    fn unavailable(&self, reason: impl ToString) -> Error {
        Error::SourceUnavailable {
            source_name: self.schema.clone(),
            reason: reason.to_string(),
        }
    }
}

#[async_trait]
impl UpstreamSource for SqliteSource {
    fn schema_name(&self) -> &str {
        &self.schema
    }

    async fn query(&self, relation: &str, restriction: &Restriction) -> Result<Vec<Row>> {
        check_identifier(relation)?;
        let mut sql = format!("SELECT * FROM \"{}\"", relation);
        let predicates = restriction.predicates();
        if !predicates.is_empty() {
            let clauses = predicates
                .iter()
                .map(|(attr, _)| check_identifier(attr).map(|_| format!("\"{}\" = ?", attr)))
                .collect::<Result<Vec<_>>>()?;
            sql.push_str(" WHERE ");
            sql.push_str(&clauses.join(" AND "));
        }

        let mut query = sqlx::query(&sql);
        for (_, value) in predicates {
            query = match value {
                Value::Number(n) if n.is_i64() => query.bind(n.as_i64()),
                Value::Number(n) => query.bind(n.as_f64()),
                Value::String(s) => query.bind(s.clone()),
                Value::Bool(b) => query.bind(*b),
                Value::Null => query.bind(Option::<i64>::None),
                other => query.bind(other.to_string()),
            };
        }

        let rows = query
            .fetch_all(&self.pool)
            .await
            .map_err(|e| self.unavailable(e))?;

        rows.iter().map(decode_row).collect()
    }
}

/// Convert a SQLite row into a JSON object using each value's storage class
fn decode_row(row: &SqliteRow) -> Result<Row> {
    let mut out = Row::new();
    for (i, column) in row.columns().iter().enumerate() {
        let raw = row.try_get_raw(i)?;
        let value = if raw.is_null() {
            Value::Null
        } else {
            match raw.type_info().name() {
                "INTEGER" | "BOOLEAN" => Value::from(row.try_get::<i64, _>(i)?),
                "REAL" => Value::from(row.try_get::<f64, _>(i)?),
                "TEXT" | "DATETIME" | "DATE" | "TIME" => Value::from(row.try_get::<String, _>(i)?),
                other => {
                    return Err(Error::MalformedRow(format!(
                        "column '{}' has unsupported type {}",
                        column.name(),
                        other
                    )))
                }
            }
        };
        out.insert(column.name().to_string(), value);
    }
    Ok(out)
}

/// Relation and attribute names are interpolated into SQL, so restrict them
fn check_identifier(name: &str) -> Result<()> {
    if !name.is_empty() && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        Ok(())
    } else {
        Err(Error::InvalidInput(format!("invalid identifier '{}'", name)))
    }
}
