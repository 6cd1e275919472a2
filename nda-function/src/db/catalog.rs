//! Reference recordings, units and stimulus types

use crate::error::Result;
use nda_common::db::{ScanKey, UnitSource};
use sqlx::{SqliteConnection, SqlitePool};

pub async fn insert_scan(conn: &mut SqliteConnection, scan: &ScanKey) -> Result<()> {
    sqlx::query("INSERT INTO scan (animal_id, scan_session, scan_idx) VALUES (?, ?, ?)")
        .bind(scan.animal_id)
        .bind(scan.scan_session)
        .bind(scan.scan_idx)
        .execute(conn)
        .await?;
    Ok(())
}

pub async fn insert_unit_source(conn: &mut SqliteConnection, unit: &UnitSource) -> Result<()> {
    sqlx::query(
        "INSERT INTO unit_source (animal_id, scan_session, scan_idx, unit_id, mask_type) VALUES (?, ?, ?, ?, ?)",
    )
    .bind(unit.animal_id)
    .bind(unit.scan_session)
    .bind(unit.scan_idx)
    .bind(unit.unit_id)
    .bind(&unit.mask_type)
    .execute(conn)
    .await?;
    Ok(())
}

pub async fn stored_scans(pool: &SqlitePool) -> Result<Vec<ScanKey>> {
    let scans = sqlx::query_as("SELECT animal_id, scan_session, scan_idx FROM scan")
        .fetch_all(pool)
        .await?;
    Ok(scans)
}

/// Soma unit ids of one recording
pub async fn soma_units(pool: &SqlitePool, scan: &ScanKey) -> Result<Vec<i64>> {
    let units = sqlx::query_scalar(
        r#"
        SELECT unit_id FROM unit_source
        WHERE animal_id = ? AND scan_session = ? AND scan_idx = ? AND mask_type = 'soma'
        ORDER BY unit_id
        "#,
    )
    .bind(scan.animal_id)
    .bind(scan.scan_session)
    .bind(scan.scan_idx)
    .fetch_all(pool)
    .await?;
    Ok(units)
}

/// Insert a stimulus type; returns false when it was already present
pub async fn insert_stimulus_type(pool: &SqlitePool, stimulus_type: &str) -> Result<bool> {
    let result = sqlx::query("INSERT OR IGNORE INTO stimulus_type (stimulus_type) VALUES (?)")
        .bind(stimulus_type)
        .execute(pool)
        .await?;
    Ok(result.rows_affected() > 0)
}

pub async fn stimulus_types(pool: &SqlitePool) -> Result<Vec<String>> {
    let types = sqlx::query_scalar("SELECT stimulus_type FROM stimulus_type ORDER BY stimulus_type")
        .fetch_all(pool)
        .await?;
    Ok(types)
}
