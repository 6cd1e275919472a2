//! Per-unit readout locations of stored model rows

use crate::db::variant_rows::UnitDetail;
use crate::error::Result;
use sqlx::{SqliteConnection, SqlitePool};

/// Insert the locations of one model; plain `INSERT` so duplicates abort the transaction
pub async fn insert_readout_locations(conn: &mut SqliteConnection, agg_hash: &str, units: &[UnitDetail]) -> Result<()> {
    for unit in units {
        sqlx::query("INSERT INTO readout_locations (agg_hash, unit_id, attributes) VALUES (?, ?, ?)")
            .bind(agg_hash)
            .bind(unit.unit_id)
            .bind(serde_json::to_string(&unit.attributes)?)
            .execute(&mut *conn)
            .await?;
    }
    Ok(())
}

/// Model rows with at least one stored location
pub async fn located_models(pool: &SqlitePool) -> Result<Vec<String>> {
    let hashes = sqlx::query_scalar("SELECT DISTINCT agg_hash FROM readout_locations")
        .fetch_all(pool)
        .await?;
    Ok(hashes)
}

/// (unit_id, attributes JSON) of one model, by unit
pub async fn load_readout_locations(pool: &SqlitePool, agg_hash: &str) -> Result<Vec<(i64, String)>> {
    let rows = sqlx::query_as("SELECT unit_id, attributes FROM readout_locations WHERE agg_hash = ? ORDER BY unit_id")
        .bind(agg_hash)
        .fetch_all(pool)
        .await?;
    Ok(rows)
}
