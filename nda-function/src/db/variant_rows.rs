//! Variant master rows and their per-unit detail rows

use crate::error::Result;
use crate::source::Row;
use nda_common::db::{ScanKey, UnitRowRecord, VariantRowRecord};
use sqlx::{SqliteConnection, SqlitePool};
use std::collections::BTreeMap;

/// One unit row to store under a variant row
#[derive(Debug, Clone, PartialEq)]
pub struct UnitDetail {
    pub unit_id: i64,
    /// Missing scores are stored as NULL
    pub score: Option<f64>,
    pub attributes: Row,
}

/// Variant master row about to be written
#[derive(Debug, Clone)]
pub struct NewVariantRow<'a> {
    pub aggregate: &'a str,
    pub variant: &'a str,
    pub entity_key: &'a str,
    pub scan: Option<ScanKey>,
    pub parent_hash: Option<&'a str>,
    pub attributes: &'a Row,
}

pub async fn insert_variant_row(conn: &mut SqliteConnection, row: &NewVariantRow<'_>) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO variant_rows
            (aggregate, variant, entity_key, animal_id, scan_session, scan_idx, parent_hash, attributes)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(row.aggregate)
    .bind(row.variant)
    .bind(row.entity_key)
    .bind(row.scan.map(|s| s.animal_id))
    .bind(row.scan.map(|s| s.scan_session))
    .bind(row.scan.map(|s| s.scan_idx))
    .bind(row.parent_hash)
    .bind(serde_json::to_string(row.attributes)?)
    .execute(conn)
    .await?;

    Ok(())
}

/// Insert unit rows; duplicates of one unit are merged first
///
/// A unit reported by several upstream relations keeps the first non-null
/// score and the union of attributes. Plain `INSERT` is used so that a
/// constraint violation aborts the surrounding transaction.
pub async fn insert_unit_rows(
    conn: &mut SqliteConnection,
    aggregate: &str,
    variant: &str,
    entity_key: &str,
    units: &[UnitDetail],
) -> Result<usize> {
    let merged = merge_units(units);
    for unit in merged.values() {
        sqlx::query(
            r#"
            INSERT INTO unit_rows (aggregate, variant, entity_key, unit_id, score, attributes)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(aggregate)
        .bind(variant)
        .bind(entity_key)
        .bind(unit.unit_id)
        .bind(unit.score)
        .bind(serde_json::to_string(&unit.attributes)?)
        .execute(&mut *conn)
        .await?;
    }
    Ok(merged.len())
}

fn merge_units(units: &[UnitDetail]) -> BTreeMap<i64, UnitDetail> {
    let mut merged: BTreeMap<i64, UnitDetail> = BTreeMap::new();
    for unit in units {
        match merged.get_mut(&unit.unit_id) {
            Some(existing) => {
                if existing.score.is_none() {
                    existing.score = unit.score;
                }
                for (attr, value) in &unit.attributes {
                    existing.attributes.entry(attr.clone()).or_insert_with(|| value.clone());
                }
            }
            None => {
                merged.insert(unit.unit_id, unit.clone());
            }
        }
    }
    merged
}

/// Entity keys already stored for a variant
pub async fn stored_entity_keys(pool: &SqlitePool, aggregate: &str, variant: &str) -> Result<Vec<String>> {
    let keys = sqlx::query_scalar("SELECT entity_key FROM variant_rows WHERE aggregate = ? AND variant = ?")
        .bind(aggregate)
        .bind(variant)
        .fetch_all(pool)
        .await?;
    Ok(keys)
}

pub async fn load_variant_row(
    pool: &SqlitePool,
    aggregate: &str,
    variant: &str,
    entity_key: &str,
) -> Result<Option<VariantRowRecord>> {
    let row = sqlx::query_as::<_, VariantRowRecord>(
        r#"
        SELECT aggregate, variant, entity_key, animal_id, scan_session, scan_idx,
               parent_hash, attributes, created_at
        FROM variant_rows
        WHERE aggregate = ? AND variant = ? AND entity_key = ?
        "#,
    )
    .bind(aggregate)
    .bind(variant)
    .bind(entity_key)
    .fetch_optional(pool)
    .await?;
    Ok(row)
}

pub async fn load_unit_rows(
    pool: &SqlitePool,
    aggregate: &str,
    variant: &str,
    entity_key: &str,
) -> Result<Vec<UnitRowRecord>> {
    let rows = sqlx::query_as::<_, UnitRowRecord>(
        r#"
        SELECT aggregate, variant, entity_key, unit_id, score, attributes
        FROM unit_rows
        WHERE aggregate = ? AND variant = ? AND entity_key = ?
        ORDER BY unit_id
        "#,
    )
    .bind(aggregate)
    .bind(variant)
    .bind(entity_key)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn unit(unit_id: i64, score: Option<f64>, attrs: serde_json::Value) -> UnitDetail {
        UnitDetail {
            unit_id,
            score,
            attributes: attrs.as_object().cloned().unwrap(),
        }
    }

    #[test]
    fn test_merge_prefers_scored_duplicate() {
        let merged = merge_units(&[
            unit(1, None, json!({"source": "iv_scan"})),
            unit(1, Some(0.8), json!({"reliability": 0.8})),
            unit(2, None, json!({})),
        ]);

        assert_eq!(merged.len(), 2);
        assert_eq!(merged[&1].score, Some(0.8));
        assert_eq!(merged[&1].attributes.len(), 2);
        assert_eq!(merged[&2].score, None);
    }

    #[tokio::test]
    async fn test_negative_unit_rejected_inside_transaction() {
        let pool = nda_common::db::init_in_memory().await.unwrap();
        let attributes = Row::new();
        let mut tx = pool.begin().await.unwrap();

        insert_variant_row(
            &mut tx,
            &NewVariantRow {
                aggregate: "oracle",
                variant: "OracleDVScan1",
                entity_key: "{}",
                scan: None,
                parent_hash: None,
                attributes: &attributes,
            },
        )
        .await
        .unwrap();
        let result = insert_unit_rows(&mut tx, "oracle", "OracleDVScan1", "{}", &[unit(-1, None, json!({}))]).await;

        assert!(result.unwrap_err().is_constraint_violation());
    }
}
