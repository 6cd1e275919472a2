//! Named groups and their members

use crate::error::Result;
use nda_common::db::{GroupMemberRecord, GroupRecord, ScanKey};
use sqlx::{SqliteConnection, SqlitePool};

/// Group master row about to be written
#[derive(Debug, Clone)]
pub struct NewGroup<'a> {
    pub kind: &'a str,
    pub group_hash: &'a str,
    pub name: &'a str,
    pub description: &'a str,
    pub attributes: &'a serde_json::Map<String, serde_json::Value>,
    pub scan_set_hash: Option<&'a str>,
}

/// Member row about to be written
#[derive(Debug, Clone)]
pub struct NewMember {
    pub member_key: String,
    pub scan: Option<ScanKey>,
}

/// Names of `kind` already recorded over the recordings keyed by `scan_set_hash`
pub async fn names_by_scan_set(conn: &mut SqliteConnection, kind: &str, scan_set_hash: &str) -> Result<Vec<String>> {
    let names = sqlx::query_scalar("SELECT DISTINCT name FROM groups WHERE kind = ? AND scan_set_hash = ? ORDER BY name")
        .bind(kind)
        .bind(scan_set_hash)
        .fetch_all(conn)
        .await?;
    Ok(names)
}

/// (group_hash, scan_set_hash) of every group of `kind` that covers recordings
pub async fn scan_set_hashes(pool: &SqlitePool, kind: &str) -> Result<Vec<(String, String)>> {
    let rows = sqlx::query_as(
        r#"
        SELECT DISTINCT group_hash, scan_set_hash
        FROM groups
        WHERE kind = ? AND scan_set_hash IS NOT NULL
        ORDER BY group_hash
        "#,
    )
    .bind(kind)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

/// Whether (kind, hash, name) is already recorded
pub async fn group_exists(conn: &mut SqliteConnection, kind: &str, group_hash: &str, name: &str) -> Result<bool> {
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM groups WHERE kind = ? AND group_hash = ? AND name = ?")
        .bind(kind)
        .bind(group_hash)
        .bind(name)
        .fetch_one(conn)
        .await?;
    Ok(count > 0)
}

/// Whether any group of `kind` carries `group_hash`
pub async fn hash_registered(pool: &SqlitePool, kind: &str, group_hash: &str) -> Result<bool> {
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM groups WHERE kind = ? AND group_hash = ?")
        .bind(kind)
        .bind(group_hash)
        .fetch_one(pool)
        .await?;
    Ok(count > 0)
}

/// Insert a master row and its members
pub async fn insert_group(conn: &mut SqliteConnection, group: &NewGroup<'_>, members: &[NewMember]) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO groups (kind, group_hash, name, description, member_count, attributes, scan_set_hash)
        VALUES (?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(group.kind)
    .bind(group.group_hash)
    .bind(group.name)
    .bind(group.description)
    .bind(members.len() as i64)
    .bind(serde_json::to_string(group.attributes)?)
    .bind(group.scan_set_hash)
    .execute(&mut *conn)
    .await?;

    for member in members {
        sqlx::query(
            r#"
            INSERT INTO group_members (kind, group_hash, name, member_key, animal_id, scan_session, scan_idx)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(group.kind)
        .bind(group.group_hash)
        .bind(group.name)
        .bind(&member.member_key)
        .bind(member.scan.map(|s| s.animal_id))
        .bind(member.scan.map(|s| s.scan_session))
        .bind(member.scan.map(|s| s.scan_idx))
        .execute(&mut *conn)
        .await?;
    }
    Ok(())
}

/// Master rows of one kind and hash (one per name)
pub async fn load_groups(pool: &SqlitePool, kind: &str, group_hash: &str) -> Result<Vec<GroupRecord>> {
    let rows = sqlx::query_as::<_, GroupRecord>(
        r#"
        SELECT kind, group_hash, name, description, member_count, attributes, scan_set_hash, created_at
        FROM groups
        WHERE kind = ? AND group_hash = ?
        ORDER BY name
        "#,
    )
    .bind(kind)
    .bind(group_hash)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

/// Master row by name
pub async fn load_group_by_name(pool: &SqlitePool, kind: &str, name: &str) -> Result<Option<GroupRecord>> {
    let row = sqlx::query_as::<_, GroupRecord>(
        r#"
        SELECT kind, group_hash, name, description, member_count, attributes, scan_set_hash, created_at
        FROM groups
        WHERE kind = ? AND name = ?
        ORDER BY created_at
        LIMIT 1
        "#,
    )
    .bind(kind)
    .bind(name)
    .fetch_optional(pool)
    .await?;
    Ok(row)
}

pub async fn load_members(pool: &SqlitePool, kind: &str, group_hash: &str, name: &str) -> Result<Vec<GroupMemberRecord>> {
    let rows = sqlx::query_as::<_, GroupMemberRecord>(
        r#"
        SELECT kind, group_hash, name, member_key, animal_id, scan_session, scan_idx
        FROM group_members
        WHERE kind = ? AND group_hash = ? AND name = ?
        ORDER BY member_key
        "#,
    )
    .bind(kind)
    .bind(group_hash)
    .bind(name)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}
