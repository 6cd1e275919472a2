//! Client-side row algebra over fetched upstream rows
//!
//! Rows are JSON objects. Natural join, semijoin and antijoin match on the
//! attributes two rows have in common; rows with no common attribute are
//! compatible, which gives a cross product for join and "non-empty other"
//! semantics for semijoin.

use crate::error::{Error, Result};
use nda_common::db::ScanKey;
use serde_json::{Map, Value};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// One upstream row
pub type Row = Map<String, Value>;

/// Canonical primary key of a row (attribute-sorted)
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RowKey(BTreeMap<String, ValueKey>);

/// Orderable wrapper so keys can live in sets
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
enum ValueKey {
    Null,
    Int(i64),
    Text(String),
    Other(String),
}

impl From<&Value> for ValueKey {
    fn from(value: &Value) -> Self {
        match value {
            Value::Null => ValueKey::Null,
            Value::Number(n) => match n.as_i64() {
                Some(i) => ValueKey::Int(i),
                None => ValueKey::Other(n.to_string()),
            },
            Value::String(s) => ValueKey::Text(s.clone()),
            other => ValueKey::Other(other.to_string()),
        }
    }
}

impl From<&ValueKey> for Value {
    fn from(key: &ValueKey) -> Self {
        match key {
            ValueKey::Null => Value::Null,
            ValueKey::Int(i) => Value::from(*i),
            ValueKey::Text(s) => Value::from(s.clone()),
            ValueKey::Other(raw) => serde_json::from_str(raw).unwrap_or_else(|_| Value::from(raw.clone())),
        }
    }
}

impl RowKey {
    /// Project `attributes` out of `row`; every attribute must be present
    pub fn from_row(row: &Row, attributes: &[&str]) -> Result<Self> {
        let mut key = BTreeMap::new();
        for attr in attributes {
            let value = row
                .get(*attr)
                .ok_or_else(|| Error::MalformedRow(format!("missing key attribute '{}'", attr)))?;
            key.insert(attr.to_string(), ValueKey::from(value));
        }
        Ok(Self(key))
    }

    /// Parse the canonical JSON form written by [`RowKey::to_canonical`]
    pub fn from_canonical(text: &str) -> Result<Self> {
        let map: Map<String, Value> = serde_json::from_str(text)?;
        Ok(Self(map.iter().map(|(k, v)| (k.clone(), ValueKey::from(v))).collect()))
    }

    /// Attribute-sorted JSON object; the stored entity key
    pub fn to_canonical(&self) -> String {
        let map: Map<String, Value> = self.0.iter().map(|(k, v)| (k.clone(), Value::from(v))).collect();
        Value::Object(map).to_string()
    }

    /// Key as a row, for restricting other relations
    pub fn to_row(&self) -> Row {
        self.0.iter().map(|(k, v)| (k.clone(), Value::from(v))).collect()
    }

    /// Key attributes as a sorted map, for hashing
    pub fn to_btree(&self) -> BTreeMap<String, Value> {
        self.0.iter().map(|(k, v)| (k.clone(), Value::from(v))).collect()
    }

    /// Recording identity carried by the key, if any
    pub fn scan(&self) -> Option<ScanKey> {
        let int = |name: &str| match self.0.get(name) {
            Some(ValueKey::Int(i)) => Some(*i),
            _ => None,
        };
        Some(ScanKey::new(int("animal_id")?, int("scan_session")?, int("scan_idx")?))
    }
}

impl fmt::Display for RowKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_canonical())
    }
}

/// Read an integer attribute
pub fn get_i64(row: &Row, attr: &str) -> Result<i64> {
    row.get(attr)
        .and_then(Value::as_i64)
        .ok_or_else(|| Error::MalformedRow(format!("attribute '{}' is not an integer", attr)))
}

/// Read a numeric attribute
pub fn get_f64(row: &Row, attr: &str) -> Result<f64> {
    row.get(attr)
        .and_then(Value::as_f64)
        .ok_or_else(|| Error::MalformedRow(format!("attribute '{}' is not a number", attr)))
}

/// Read an optional numeric attribute; absent and null both give `None`
pub fn opt_f64(row: &Row, attr: &str) -> Option<f64> {
    row.get(attr).and_then(Value::as_f64)
}

/// Read a text attribute
pub fn get_str<'a>(row: &'a Row, attr: &str) -> Result<&'a str> {
    row.get(attr)
        .and_then(Value::as_str)
        .ok_or_else(|| Error::MalformedRow(format!("attribute '{}' is not text", attr)))
}

/// Recording identity of a row
pub fn scan_of(row: &Row) -> Result<ScanKey> {
    Ok(ScanKey::new(
        get_i64(row, "animal_id")?,
        get_i64(row, "scan_session")?,
        get_i64(row, "scan_idx")?,
    ))
}

/// Rows agree on every attribute they share
fn compatible(left: &Row, right: &Row) -> bool {
    left.iter()
        .all(|(attr, value)| right.get(attr).map(|other| other == value).unwrap_or(true))
}

/// An in-memory relation
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Relation {
    rows: Vec<Row>,
}

impl Relation {
    pub fn new(rows: Vec<Row>) -> Self {
        Self { rows }
    }

    pub fn rows(&self) -> &[Row] {
        &self.rows
    }

    pub fn into_rows(self) -> Vec<Row> {
        self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Rename an attribute in every row
    pub fn rename(mut self, from: &str, to: &str) -> Self {
        for row in &mut self.rows {
            if let Some(value) = row.remove(from) {
                row.insert(to.to_string(), value);
            }
        }
        self
    }

    /// Set a constant attribute on every row
    pub fn with(mut self, attr: &str, value: impl Into<Value>) -> Self {
        let value = value.into();
        for row in &mut self.rows {
            row.insert(attr.to_string(), value.clone());
        }
        self
    }

    /// Natural join
    pub fn join(&self, other: &Relation) -> Relation {
        let mut rows = Vec::new();
        for left in &self.rows {
            for right in &other.rows {
                if compatible(left, right) {
                    let mut merged = left.clone();
                    for (attr, value) in right {
                        merged.entry(attr.clone()).or_insert_with(|| value.clone());
                    }
                    rows.push(merged);
                }
            }
        }
        Relation::new(rows)
    }

    /// Keep rows satisfying an equality restriction
    pub fn restrict(self, restriction: &super::Restriction) -> Relation {
        Relation::new(self.rows.into_iter().filter(|r| restriction.matches(r)).collect())
    }

    /// Keep rows matching at least one row of `other` on common attributes
    pub fn semijoin(self, other: &Relation) -> Relation {
        let rows = self
            .rows
            .into_iter()
            .filter(|l| other.rows.iter().any(|r| compatible(l, r)))
            .collect();
        Relation::new(rows)
    }

    /// Keep rows matching no row of `other` on common attributes
    pub fn antijoin(self, other: &Relation) -> Relation {
        let rows = self
            .rows
            .into_iter()
            .filter(|l| !other.rows.iter().any(|r| compatible(l, r)))
            .collect();
        Relation::new(rows)
    }

    /// Keep only `attributes`, dropping duplicate rows
    pub fn project(&self, attributes: &[&str]) -> Relation {
        let mut seen = BTreeSet::new();
        let mut rows = Vec::new();
        for row in &self.rows {
            let projected: Row = attributes
                .iter()
                .filter_map(|a| row.get(*a).map(|v| (a.to_string(), v.clone())))
                .collect();
            if seen.insert(Value::Object(projected.clone()).to_string()) {
                rows.push(projected);
            }
        }
        Relation::new(rows)
    }

    /// Distinct values of one attribute, in first-seen order
    pub fn distinct(&self, attr: &str) -> Vec<Value> {
        let mut seen = BTreeSet::new();
        self.rows
            .iter()
            .filter_map(|r| r.get(attr))
            .filter(|v| seen.insert(v.to_string()))
            .cloned()
            .collect()
    }

    /// Exactly one row, or an error naming `what`
    pub fn fetch1(&self, what: &str) -> Result<&Row> {
        match self.rows.as_slice() {
            [row] => Ok(row),
            [] => Err(Error::NotFound(what.to_string())),
            rows => Err(Error::MalformedRow(format!("{} matched {} rows, expected one", what, rows.len()))),
        }
    }
}

impl From<Vec<Row>> for Relation {
    fn from(rows: Vec<Row>) -> Self {
        Relation::new(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn row(value: Value) -> Row {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_join_on_common_attributes() {
        let tuning = Relation::new(vec![
            row(json!({"animal_id": 1, "session": 4, "tuning_hash": "a"})),
            row(json!({"animal_id": 2, "session": 4, "tuning_hash": "b"})),
        ])
        .rename("session", "scan_session");
        let scans = Relation::new(vec![row(json!({"animal_id": 1, "scan_session": 4, "scan_idx": 7}))]);

        let joined = tuning.join(&scans);

        assert_eq!(joined.len(), 1);
        assert_eq!(joined.rows()[0]["scan_idx"], json!(7));
        assert_eq!(joined.rows()[0]["tuning_hash"], json!("a"));
    }

    #[test]
    fn test_semijoin_and_antijoin_partition() {
        let all = Relation::new(vec![
            row(json!({"animal_id": 1, "scan_idx": 1})),
            row(json!({"animal_id": 1, "scan_idx": 2})),
            row(json!({"animal_id": 1, "scan_idx": 3})),
        ]);
        let stored = Relation::new(vec![row(json!({"animal_id": 1, "scan_idx": 2}))]);

        assert_eq!(all.clone().semijoin(&stored).len(), 1);
        assert_eq!(all.antijoin(&stored).len(), 2);
    }

    #[test]
    fn test_project_deduplicates() {
        let units = Relation::new(vec![
            row(json!({"scan_idx": 1, "unit_id": 1})),
            row(json!({"scan_idx": 1, "unit_id": 2})),
        ]);

        assert_eq!(units.project(&["scan_idx"]).len(), 1);
    }

    #[test]
    fn test_row_key_canonical_form_is_sorted() {
        let r = row(json!({"scan_idx": 3, "animal_id": 17797, "scan_session": 4, "extra": 1.5}));
        let key = RowKey::from_row(&r, &["scan_session", "animal_id", "scan_idx"]).unwrap();

        assert_eq!(key.to_canonical(), r#"{"animal_id":17797,"scan_idx":3,"scan_session":4}"#);
        assert_eq!(RowKey::from_canonical(&key.to_canonical()).unwrap(), key);
        assert_eq!(key.scan(), Some(ScanKey::new(17797, 4, 3)));
    }

    #[test]
    fn test_row_key_requires_attributes() {
        let r = row(json!({"animal_id": 1}));
        assert!(RowKey::from_row(&r, &["animal_id", "scan_idx"]).is_err());
    }
}
