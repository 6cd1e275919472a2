//! Database initialization
//!
//! Creates the warehouse database on first run and brings the schema up to
//! date on every start. All `CREATE` statements are idempotent.

use crate::Result;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use tracing::info;

/// Initialize database connection and create tables if needed
pub async fn init_database(db_path: &Path) -> Result<SqlitePool> {
    let newly_created = !db_path.exists();

    // Create parent directory if it doesn't exist
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let options = SqliteConnectOptions::from_str(&format!("sqlite://{}", db_path.display()))?
        .create_if_missing(true)
        .foreign_keys(true)
        .journal_mode(SqliteJournalMode::Wal)
        .busy_timeout(Duration::from_millis(5000));

    let pool = SqlitePoolOptions::new()
        .max_connections(8)
        .min_connections(1)
        .connect_with(options)
        .await?;

    if newly_created {
        info!("Initialized new database: {}", db_path.display());
    } else {
        info!("Opened existing database: {}", db_path.display());
    }

    create_schema(&pool).await?;
    Ok(pool)
}

/// Open a private in-memory warehouse (single connection, used by tests and dry runs)
pub async fn init_in_memory() -> Result<SqlitePool> {
    let options = SqliteConnectOptions::from_str("sqlite::memory:")?.foreign_keys(true);

    // One connection: every pooled connection to :memory: is a separate database
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect_with(options)
        .await?;

    create_schema(&pool).await?;
    Ok(pool)
}

/// Create every warehouse table (idempotent)
pub async fn create_schema(pool: &SqlitePool) -> Result<()> {
    create_settings_table(pool).await?;
    create_scan_table(pool).await?;
    create_unit_source_table(pool).await?;
    create_response_type_table(pool).await?;
    create_stimulus_type_table(pool).await?;
    create_variant_rows_table(pool).await?;
    create_unit_rows_table(pool).await?;
    create_aggregate_rows_table(pool).await?;
    create_groups_table(pool).await?;
    create_group_members_table(pool).await?;
    create_summaries_table(pool).await?;
    create_readout_locations_table(pool).await?;

    init_default_settings(pool).await?;
    init_response_types(pool).await?;
    Ok(())
}

/// Create the settings table
///
/// Stores runtime configuration key-value pairs.
pub async fn create_settings_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS settings (
            key TEXT PRIMARY KEY,
            value TEXT,
            updated_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_scan_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS scan (
            animal_id INTEGER NOT NULL,
            scan_session INTEGER NOT NULL,
            scan_idx INTEGER NOT NULL,
            created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
            PRIMARY KEY (animal_id, scan_session, scan_idx)
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_unit_source_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS unit_source (
            animal_id INTEGER NOT NULL,
            scan_session INTEGER NOT NULL,
            scan_idx INTEGER NOT NULL,
            unit_id INTEGER NOT NULL,
            mask_type TEXT NOT NULL,
            PRIMARY KEY (animal_id, scan_session, scan_idx, unit_id),
            FOREIGN KEY (animal_id, scan_session, scan_idx)
                REFERENCES scan(animal_id, scan_session, scan_idx)
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_response_type_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS response_type (
            response_type TEXT PRIMARY KEY,
            description TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_stimulus_type_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS stimulus_type (
            stimulus_type TEXT PRIMARY KEY
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

/// Faithful copies of upstream master rows, one row per (aggregate, variant, entity key)
async fn create_variant_rows_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS variant_rows (
            aggregate TEXT NOT NULL,
            variant TEXT NOT NULL,
            entity_key TEXT NOT NULL,
            animal_id INTEGER,
            scan_session INTEGER,
            scan_idx INTEGER,
            parent_hash TEXT REFERENCES aggregate_rows(agg_hash),
            attributes TEXT NOT NULL DEFAULT '{}',
            created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
            PRIMARY KEY (aggregate, variant, entity_key)
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

/// Per-unit detail and score rows
async fn create_unit_rows_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS unit_rows (
            aggregate TEXT NOT NULL,
            variant TEXT NOT NULL,
            entity_key TEXT NOT NULL,
            unit_id INTEGER NOT NULL CHECK (unit_id >= 0),
            score REAL,
            attributes TEXT NOT NULL DEFAULT '{}',
            PRIMARY KEY (aggregate, variant, entity_key, unit_id),
            FOREIGN KEY (aggregate, variant, entity_key)
                REFERENCES variant_rows(aggregate, variant, entity_key)
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

/// Aggregate master rows; `variant` is the discriminator
async fn create_aggregate_rows_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS aggregate_rows (
            agg_hash TEXT PRIMARY KEY,
            aggregate TEXT NOT NULL,
            variant TEXT NOT NULL,
            entity_key TEXT NOT NULL,
            created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
            UNIQUE (aggregate, variant, entity_key),
            FOREIGN KEY (aggregate, variant, entity_key)
                REFERENCES variant_rows(aggregate, variant, entity_key)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_aggregate_rows_aggregate ON aggregate_rows(aggregate)")
        .execute(pool)
        .await?;

    Ok(())
}

async fn create_groups_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS groups (
            kind TEXT NOT NULL,
            group_hash TEXT NOT NULL,
            name TEXT NOT NULL,
            description TEXT NOT NULL DEFAULT '',
            member_count INTEGER NOT NULL,
            attributes TEXT NOT NULL DEFAULT '{}',
            scan_set_hash TEXT,
            created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
            PRIMARY KEY (kind, group_hash, name)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_groups_scan_set ON groups(kind, scan_set_hash)")
        .execute(pool)
        .await?;

    Ok(())
}

async fn create_group_members_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS group_members (
            kind TEXT NOT NULL,
            group_hash TEXT NOT NULL,
            name TEXT NOT NULL,
            member_key TEXT NOT NULL,
            animal_id INTEGER,
            scan_session INTEGER,
            scan_idx INTEGER,
            PRIMARY KEY (kind, group_hash, name, member_key),
            FOREIGN KEY (kind, group_hash, name) REFERENCES groups(kind, group_hash, name)
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_summaries_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS summaries (
            kind TEXT NOT NULL,
            agg_hash TEXT NOT NULL REFERENCES aggregate_rows(agg_hash),
            aggregate TEXT NOT NULL,
            stim_type_grp_hash TEXT,
            response_type TEXT REFERENCES response_type(response_type),
            stimulus_length REAL,
            animal_id INTEGER NOT NULL,
            scan_session INTEGER NOT NULL,
            scan_idx INTEGER NOT NULL,
            created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
            PRIMARY KEY (kind, agg_hash)
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

/// Per-unit readout locations of a stored model row
async fn create_readout_locations_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS readout_locations (
            agg_hash TEXT NOT NULL REFERENCES aggregate_rows(agg_hash),
            unit_id INTEGER NOT NULL CHECK (unit_id >= 0),
            attributes TEXT NOT NULL DEFAULT '{}',
            PRIMARY KEY (agg_hash, unit_id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

/// Seed default runtime settings
async fn init_default_settings(pool: &SqlitePool) -> Result<()> {
    crate::db::settings::ensure_setting(pool, "sync_max_lock_wait_ms", "5000").await?;
    crate::db::settings::ensure_setting(pool, "sync_confirm_threshold", "0").await?;
    Ok(())
}

/// Response type lookup contents
pub const RESPONSE_TYPES: &[(&str, &str)] = &[
    ("in_vivo", "Tuning properties extracted from in vivo responses."),
    ("in_silico", "Tuning properties extracted from in silico model responses."),
];

async fn init_response_types(pool: &SqlitePool) -> Result<()> {
    for (name, description) in RESPONSE_TYPES {
        sqlx::query("INSERT OR IGNORE INTO response_type (response_type, description) VALUES (?, ?)")
            .bind(name)
            .bind(description)
            .execute(pool)
            .await?;
    }
    Ok(())
}
