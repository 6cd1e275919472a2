//! Aggregate master rows

use crate::error::Result;
use nda_common::db::AggregateRowRecord;
use sqlx::{SqliteConnection, SqlitePool};

const SELECT_AGGREGATE: &str = "SELECT agg_hash, aggregate, variant, entity_key, created_at FROM aggregate_rows";

pub async fn insert_aggregate_row(
    conn: &mut SqliteConnection,
    agg_hash: &str,
    aggregate: &str,
    variant: &str,
    entity_key: &str,
) -> Result<()> {
    sqlx::query("INSERT INTO aggregate_rows (agg_hash, aggregate, variant, entity_key) VALUES (?, ?, ?, ?)")
        .bind(agg_hash)
        .bind(aggregate)
        .bind(variant)
        .bind(entity_key)
        .execute(conn)
        .await?;
    Ok(())
}

pub async fn load_aggregate_row(pool: &SqlitePool, agg_hash: &str) -> Result<Option<AggregateRowRecord>> {
    let row = sqlx::query_as::<_, AggregateRowRecord>(&format!("{} WHERE agg_hash = ?", SELECT_AGGREGATE))
        .bind(agg_hash)
        .fetch_optional(pool)
        .await?;
    Ok(row)
}

/// Every row of one aggregate, oldest first
pub async fn aggregate_rows(pool: &SqlitePool, aggregate: &str) -> Result<Vec<AggregateRowRecord>> {
    let rows = sqlx::query_as::<_, AggregateRowRecord>(&format!(
        "{} WHERE aggregate = ? ORDER BY created_at, agg_hash",
        SELECT_AGGREGATE
    ))
    .bind(aggregate)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

/// Rows of one aggregate that have no summary of `kind` yet
pub async fn rows_without_summary(pool: &SqlitePool, aggregate: &str, kind: &str) -> Result<Vec<AggregateRowRecord>> {
    let rows = sqlx::query_as::<_, AggregateRowRecord>(
        r#"
        SELECT a.agg_hash, a.aggregate, a.variant, a.entity_key, a.created_at
        FROM aggregate_rows a
        LEFT JOIN summaries s ON s.agg_hash = a.agg_hash AND s.kind = ?
        WHERE a.aggregate = ? AND s.agg_hash IS NULL
        ORDER BY a.created_at, a.agg_hash
        "#,
    )
    .bind(kind)
    .bind(aggregate)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}
