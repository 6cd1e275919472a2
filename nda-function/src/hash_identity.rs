//! Content-derived identity for groups and aggregate rows
//!
//! A [`GroupKey`] is a fixed-width digest over a *set* of members. Each
//! member is reduced to a canonical text form, digested on its own, and the
//! sorted, de-duplicated member digests are digested again. Member order and
//! repeated members therefore never change the key.
//!
//! Hashing is pure. Callers persist the key and, for unique groups, supply
//! the names already recorded under it so [`hash`] can reject a second name.

use crate::error::{Error, Result};
use nda_common::db::ScanKey;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fmt;

/// Width of a key in hex characters
pub const HASH_LEN: usize = 32;

/// Deterministic digest identifying a set of members
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GroupKey(String);

impl GroupKey {
    /// Compute the key of a member set
    pub fn of<'a, M, I>(members: I) -> Self
    where
        M: HashMember + 'a + ?Sized,
        I: IntoIterator<Item = &'a M>,
    {
        let mut digests: Vec<String> = members
            .into_iter()
            .map(|m| hex_digest(m.canonical().as_bytes()))
            .collect();
        digests.sort();
        digests.dedup();

        let mut hasher = Sha256::new();
        for digest in &digests {
            hasher.update(digest.as_bytes());
            hasher.update(b"\n");
        }
        Self::truncate(format!("{:x}", hasher.finalize()))
    }

    /// Wrap a key read back from the store
    pub fn from_stored(value: impl Into<String>) -> Result<Self> {
        let value = value.into();
        if value.len() != HASH_LEN || !value.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(Error::MalformedRow(format!("not a group key: '{}'", value)));
        }
        Ok(Self(value))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn truncate(mut hex: String) -> Self {
        hex.truncate(HASH_LEN);
        Self(hex)
    }
}

impl fmt::Display for GroupKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Anything that can be a member of a hashed set
pub trait HashMember {
    /// Canonical text form; equal members must produce equal text
    fn canonical(&self) -> String;
}

impl HashMember for ScanKey {
    fn canonical(&self) -> String {
        format!(
            "animal_id=i:{}|scan_idx=i:{}|scan_session=i:{}",
            self.animal_id, self.scan_idx, self.scan_session
        )
    }
}

impl HashMember for str {
    fn canonical(&self) -> String {
        format!("s:{}", self)
    }
}

impl HashMember for String {
    fn canonical(&self) -> String {
        self.as_str().canonical()
    }
}

impl HashMember for GroupKey {
    fn canonical(&self) -> String {
        format!("k:{}", self.0)
    }
}

impl HashMember for BTreeMap<String, Value> {
    fn canonical(&self) -> String {
        // BTreeMap iterates in key order, which makes the form attribute-sorted
        self.iter()
            .map(|(name, value)| format!("{}={}", name, canonical_value(value)))
            .collect::<Vec<_>>()
            .join("|")
    }
}

fn canonical_value(value: &Value) -> String {
    match value {
        Value::Null => "n:".to_string(),
        Value::Bool(b) => format!("b:{}", b),
        Value::Number(n) => match n.as_i64() {
            Some(i) => format!("i:{}", i),
            None => format!("f:{}", n),
        },
        Value::String(s) => format!("s:{}", s),
        other => format!("j:{}", other),
    }
}

fn hex_digest(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}

/// Hash a member set, optionally enforcing that it is not registered under another name
///
/// `recorded` receives the computed key and returns the names already
/// stored under it. With `unique = true` any recorded name other than
/// `name` fails with [`Error::DuplicateGroup`]; re-hashing under the same
/// name is allowed so that re-filling stays idempotent.
pub fn hash<'a, M, I, F>(kind: &str, members: I, unique: bool, name: &str, recorded: F) -> Result<GroupKey>
where
    M: HashMember + 'a + ?Sized,
    I: IntoIterator<Item = &'a M>,
    F: FnOnce(&GroupKey) -> Vec<String>,
{
    let key = GroupKey::of(members);
    if unique {
        if let Some(existing) = recorded(&key).into_iter().find(|n| n != name) {
            return Err(Error::DuplicateGroup {
                kind: kind.to_string(),
                key,
                existing,
                requested: name.to_string(),
            });
        }
    }
    Ok(key)
}

/// Synthetic primary key of an aggregate row
///
/// Derived from the aggregate name, the discriminator and the canonical
/// entity key, so the same upstream row always maps to the same hash.
pub fn entity_hash(aggregate: &str, variant: &str, entity_key: &str) -> String {
    let canonical = format!("aggregate=s:{}|variant=s:{}|key=s:{}", aggregate, variant, entity_key);
    let mut hex = hex_digest(canonical.as_bytes());
    hex.truncate(HASH_LEN);
    hex
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scans(ids: &[i64]) -> Vec<ScanKey> {
        ids.iter().map(|&i| ScanKey::new(17797, 4, i)).collect()
    }

    #[test]
    fn test_order_does_not_matter() {
        let forward = GroupKey::of(&scans(&[1, 2, 3]));
        let backward = GroupKey::of(&scans(&[3, 2, 1]));
        let shuffled = GroupKey::of(&scans(&[2, 3, 1]));

        assert_eq!(forward, backward);
        assert_eq!(forward, shuffled);
    }

    #[test]
    fn test_subset_differs() {
        assert_ne!(GroupKey::of(&scans(&[1, 2])), GroupKey::of(&scans(&[1, 2, 3])));
    }

    #[test]
    fn test_repeated_members_collapse() {
        assert_eq!(GroupKey::of(&scans(&[1, 2, 2])), GroupKey::of(&scans(&[1, 2])));
    }

    #[test]
    fn test_fixed_width_hex() {
        let key = GroupKey::of(&scans(&[5]));
        assert_eq!(key.as_str().len(), HASH_LEN);
        assert!(GroupKey::from_stored(key.as_str()).is_ok());
        assert!(GroupKey::from_stored("not-hex").is_err());
    }

    #[test]
    fn test_string_members() {
        let a = GroupKey::of(["stimulus.Monet2", "stimulus.Trippy"].iter().copied());
        let b = GroupKey::of(["stimulus.Trippy", "stimulus.Monet2"].iter().copied());
        assert_eq!(a, b);
    }

    #[test]
    fn test_integer_and_string_values_differ() {
        let mut numeric = BTreeMap::new();
        numeric.insert("unit_id".to_string(), Value::from(7));
        let mut text = BTreeMap::new();
        text.insert("unit_id".to_string(), Value::from("7"));

        assert_ne!(GroupKey::of([&numeric]), GroupKey::of([&text]));
    }

    #[test]
    fn test_unique_rejects_other_name() {
        let members = scans(&[1, 2]);
        let result = hash("scan_set", &members, true, "setB", |_| vec!["setA".to_string()]);

        assert!(matches!(result, Err(Error::DuplicateGroup { ref existing, .. }) if existing == "setA"));
    }

    #[test]
    fn test_unique_allows_same_name() {
        let members = scans(&[1, 2]);
        let key = hash("scan_set", &members, true, "setA", |_| vec!["setA".to_string()]).unwrap();
        assert_eq!(key, GroupKey::of(&members));
    }

    #[test]
    fn test_repeatable_ignores_recorded_names() {
        let members = scans(&[1, 2]);
        let key = hash("scan_set", &members, false, "setB", |_| vec!["setA".to_string()]).unwrap();
        assert_eq!(key, GroupKey::of(&members));
    }

    #[test]
    fn test_entity_hash_is_stable() {
        let a = entity_hash("oracle", "OracleDVScan1", r#"{"animal_id":1}"#);
        let b = entity_hash("oracle", "OracleDVScan1", r#"{"animal_id":1}"#);
        let c = entity_hash("oracle", "OracleDVScan3", r#"{"animal_id":1}"#);

        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.len(), HASH_LEN);
    }
}
