//! Denormalized per-recording summaries

use crate::error::Result;
use nda_common::db::{ScanKey, SummaryRecord};
use sqlx::{SqliteConnection, SqlitePool};

const SELECT_SUMMARY: &str = r#"
    SELECT kind, agg_hash, aggregate, stim_type_grp_hash, response_type, stimulus_length,
           animal_id, scan_session, scan_idx, created_at
    FROM summaries
"#;

/// Summary row about to be written
#[derive(Debug, Clone)]
pub struct NewSummary<'a> {
    pub kind: &'a str,
    pub agg_hash: &'a str,
    pub aggregate: &'a str,
    pub stim_type_grp_hash: Option<&'a str>,
    pub response_type: Option<&'a str>,
    pub stimulus_length: Option<f64>,
    pub scan: ScanKey,
}

pub async fn insert_summary(conn: &mut SqliteConnection, summary: &NewSummary<'_>) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO summaries
            (kind, agg_hash, aggregate, stim_type_grp_hash, response_type, stimulus_length,
             animal_id, scan_session, scan_idx)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(summary.kind)
    .bind(summary.agg_hash)
    .bind(summary.aggregate)
    .bind(summary.stim_type_grp_hash)
    .bind(summary.response_type)
    .bind(summary.stimulus_length)
    .bind(summary.scan.animal_id)
    .bind(summary.scan.scan_session)
    .bind(summary.scan.scan_idx)
    .execute(conn)
    .await?;
    Ok(())
}

/// Summaries of `kind` for one recording, with the discriminator of their aggregate row
pub async fn summaries_for_scan(
    conn: &mut SqliteConnection,
    kind: &str,
    scan: &ScanKey,
) -> Result<Vec<(SummaryRecord, String)>> {
    let rows: Vec<(String, String)> = sqlx::query_as(
        r#"
        SELECT s.agg_hash, a.variant
        FROM summaries s
        JOIN aggregate_rows a ON a.agg_hash = s.agg_hash
        WHERE s.kind = ? AND s.animal_id = ? AND s.scan_session = ? AND s.scan_idx = ?
        ORDER BY s.agg_hash
        "#,
    )
    .bind(kind)
    .bind(scan.animal_id)
    .bind(scan.scan_session)
    .bind(scan.scan_idx)
    .fetch_all(&mut *conn)
    .await?;

    let mut out = Vec::with_capacity(rows.len());
    for (agg_hash, variant) in rows {
        if let Some(summary) = load_summary_in(&mut *conn, kind, &agg_hash).await? {
            out.push((summary, variant));
        }
    }
    Ok(out)
}

async fn load_summary_in(conn: &mut SqliteConnection, kind: &str, agg_hash: &str) -> Result<Option<SummaryRecord>> {
    let row = sqlx::query_as::<_, SummaryRecord>(&format!("{} WHERE kind = ? AND agg_hash = ?", SELECT_SUMMARY))
        .bind(kind)
        .bind(agg_hash)
        .fetch_optional(conn)
        .await?;
    Ok(row)
}

pub async fn load_summary(pool: &SqlitePool, kind: &str, agg_hash: &str) -> Result<Option<SummaryRecord>> {
    let row = sqlx::query_as::<_, SummaryRecord>(&format!("{} WHERE kind = ? AND agg_hash = ?", SELECT_SUMMARY))
        .bind(kind)
        .bind(agg_hash)
        .fetch_optional(pool)
        .await?;
    Ok(row)
}

/// Summaries of `kind` whose aggregate key is in `agg_hashes`
pub async fn load_summaries(pool: &SqlitePool, kind: &str, agg_hashes: &[String]) -> Result<Vec<SummaryRecord>> {
    let mut out = Vec::with_capacity(agg_hashes.len());
    for agg_hash in agg_hashes {
        if let Some(summary) = load_summary(pool, kind, agg_hash).await? {
            out.push(summary);
        }
    }
    Ok(out)
}
