//! Named, content-hashed groups
//!
//! [`GroupAggregator::fill`] resolves the requested keys to members,
//! validates them, derives the group key from the membership and writes the
//! master row and its members in one transaction. Groups are append-only;
//! re-filling the same membership under the same name returns the stored
//! group unchanged.

use crate::context::SyncContext;
use crate::db::aggregates::load_aggregate_row;
use crate::db::catalog::{stimulus_types, stored_scans};
use crate::db::groups::{
    group_exists, insert_group, load_group_by_name, load_groups, load_members, names_by_scan_set, NewGroup, NewMember,
};
use crate::db::summaries::load_summary;
use crate::db::variant_rows::load_variant_row;
use crate::error::{Error, Result};
use crate::hash_identity::{hash, GroupKey};
use crate::summary::{ORACLE_SUMMARY, ORIENTATION_SUMMARY};
use crate::utils::{begin_monitored, retry_on_lock};
use crate::variant::{dynamic_model, oracle};
use nda_common::db::{AggregateRowRecord, GroupMemberRecord, GroupRecord, ScanKey};
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::fmt;
use std::str::FromStr;
use tracing::{debug, info};

/// Kinds of group the warehouse records
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum GroupKind {
    /// Recordings from the scan catalog
    ScanSet,
    /// Stimulus types from the stimulus type lookup
    StimTypeGrp,
    /// Orientation rows with a summary; one response type and stimulus group
    OrientationScanSet,
    /// Oracle rows with a summary; one oracle type
    OracleScanSet,
    /// Dynamic model rows of one model type; their recordings registered once
    DynamicModelScanSet,
}

impl GroupKind {
    pub const ALL: [GroupKind; 5] = [
        GroupKind::ScanSet,
        GroupKind::StimTypeGrp,
        GroupKind::OrientationScanSet,
        GroupKind::OracleScanSet,
        GroupKind::DynamicModelScanSet,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            GroupKind::ScanSet => "scan_set",
            GroupKind::StimTypeGrp => "stim_type_grp",
            GroupKind::OrientationScanSet => "orientation_scan_set",
            GroupKind::OracleScanSet => "oracle_scan_set",
            GroupKind::DynamicModelScanSet => "dynamic_model_scan_set",
        }
    }

    /// The same recordings may not be registered under two names
    pub fn unique(&self) -> bool {
        matches!(self, GroupKind::DynamicModelScanSet)
    }
}

impl fmt::Display for GroupKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for GroupKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        GroupKind::ALL
            .iter()
            .copied()
            .find(|k| k.as_str() == s || k.as_str().replace('_', "-") == s)
            .ok_or_else(|| Error::InvalidInput(format!("unknown group kind '{}'", s)))
    }
}

/// One stored member
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GroupMember {
    pub member_key: String,
    pub scan: Option<ScanKey>,
}

/// A stored group with its members
#[derive(Debug, Clone, Serialize)]
pub struct Group {
    pub kind: GroupKind,
    pub key: GroupKey,
    pub name: String,
    pub description: String,
    pub member_count: usize,
    pub attributes: Map<String, Value>,
    pub members: Vec<GroupMember>,
}

impl Group {
    fn from_records(kind: GroupKind, record: GroupRecord, members: Vec<GroupMemberRecord>) -> Result<Self> {
        Ok(Self {
            kind,
            key: GroupKey::from_stored(record.group_hash)?,
            name: record.name,
            description: record.description,
            member_count: usize::try_from(record.member_count)
                .map_err(|_| Error::MalformedRow(format!("negative member count {}", record.member_count)))?,
            attributes: serde_json::from_str(&record.attributes)?,
            members: members
                .into_iter()
                .map(|m| {
                    let scan = match (m.animal_id, m.scan_session, m.scan_idx) {
                        (Some(a), Some(s), Some(i)) => Some(ScanKey::new(a, s, i)),
                        _ => None,
                    };
                    GroupMember {
                        member_key: m.member_key,
                        scan,
                    }
                })
                .collect(),
        })
    }

    /// Recordings of the members that have one
    pub fn scans(&self) -> Vec<ScanKey> {
        self.members.iter().filter_map(|m| m.scan).collect()
    }

    /// Text attribute shared by every member
    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes.get(name).and_then(Value::as_str)
    }
}

/// A requested key after resolution
#[derive(Debug, Clone)]
struct ResolvedMember {
    input: String,
    member_key: String,
    scan: Option<ScanKey>,
}

/// Membership ready to be hashed and written
struct Resolution {
    members: Vec<ResolvedMember>,
    attributes: Map<String, Value>,
}

/// Parse `animal-session-idx` or a JSON object with the three scan attributes
pub fn parse_scan_key(text: &str) -> Result<ScanKey> {
    let trimmed = text.trim();
    if trimmed.starts_with('{') {
        return Ok(serde_json::from_str(trimmed)?);
    }

    let parts: Vec<&str> = trimmed.split('-').collect();
    let ints: Vec<i64> = parts.iter().filter_map(|p| p.trim().parse().ok()).collect();
    match ints.as_slice() {
        [animal_id, scan_session, scan_idx] if parts.len() == 3 => Ok(ScanKey::new(*animal_id, *scan_session, *scan_idx)),
        _ => Err(Error::InvalidInput(format!("not a scan key: '{}'", text))),
    }
}

/// Builds and records groups
pub struct GroupAggregator<'a> {
    ctx: &'a SyncContext,
}

impl<'a> GroupAggregator<'a> {
    pub fn new(ctx: &'a SyncContext) -> Self {
        Self { ctx }
    }

    /// Resolve `keys`, validate the membership and record it as `name`
    ///
    /// Validation failures leave the store untouched. Re-filling an
    /// existing (kind, key, name) returns the stored group.
    pub async fn fill(&self, kind: GroupKind, keys: &[String], name: &str, description: &str) -> Result<Group> {
        if name.trim().is_empty() {
            return Err(Error::InvalidInput("group name is empty".to_string()));
        }
        let keys: BTreeSet<&str> = keys.iter().map(|k| k.trim()).filter(|k| !k.is_empty()).collect();
        if keys.is_empty() {
            return Err(Error::InvalidInput(format!("no members given for {} '{}'", kind, name)));
        }

        let mut resolution = match kind {
            GroupKind::ScanSet => self.resolve_scans(&keys).await?,
            GroupKind::StimTypeGrp => self.resolve_stimulus_types(&keys).await?,
            GroupKind::OrientationScanSet => self.resolve_orientation(&keys).await?,
            GroupKind::OracleScanSet => self.resolve_oracle(&keys).await?,
            GroupKind::DynamicModelScanSet => self.resolve_dynamic_models(&keys).await?,
        };
        check_scan_uniqueness(&resolution.members)?;

        let scans: Vec<ScanKey> = resolution.members.iter().filter_map(|m| m.scan).collect();
        let key = match kind {
            // Scan sets hash the recordings themselves
            GroupKind::ScanSet => GroupKey::of(&scans),
            _ => GroupKey::of(resolution.members.iter().map(|m| m.member_key.as_str())),
        };
        let scan_set = match kind {
            GroupKind::ScanSet | GroupKind::StimTypeGrp => None,
            _ => Some(GroupKey::of(&scans)),
        };
        if let Some(scan_set) = &scan_set {
            resolution
                .attributes
                .insert("scan_set_hash".to_string(), Value::from(scan_set.to_string()));
        }

        let members: Vec<NewMember> = resolution
            .members
            .iter()
            .map(|m| NewMember {
                member_key: m.member_key.clone(),
                scan: m.scan,
            })
            .collect();
        let group = NewGroup {
            kind: kind.as_str(),
            group_hash: key.as_str(),
            name,
            description,
            attributes: &resolution.attributes,
            scan_set_hash: scan_set.as_ref().map(GroupKey::as_str),
        };
        let created = self.write(kind, &group, &scans, &members).await?;

        if created {
            info!(kind = %kind, group_hash = %key, name, members = members.len(), "Group recorded");
        } else {
            debug!(kind = %kind, group_hash = %key, name, "Group already recorded");
        }
        self.load(kind, &key, name).await
    }

    /// Write the master row and its members in one transaction
    ///
    /// For unique kinds the names already recorded over the same recordings
    /// are read inside the same transaction as the insert.
    async fn write(&self, kind: GroupKind, group: &NewGroup<'_>, scans: &[ScanKey], members: &[NewMember]) -> Result<bool> {
        let pool = self.ctx.pool();

        retry_on_lock("group fill", self.ctx.settings().max_lock_wait_ms, || async {
            let mut tx = begin_monitored(pool, "groups::fill").await?;
            if group_exists(tx.inner_mut()?, group.kind, group.group_hash, group.name).await? {
                tx.rollback().await?;
                return Ok(false);
            }
            if let (true, Some(scan_set)) = (kind.unique(), group.scan_set_hash) {
                let recorded = names_by_scan_set(tx.inner_mut()?, group.kind, scan_set).await?;
                if let Err(err) = hash(group.kind, scans, true, group.name, |_| recorded) {
                    tx.rollback().await?;
                    return Err(err);
                }
            }
            insert_group(tx.inner_mut()?, group, members).await?;
            tx.commit().await?;
            Ok::<bool, Error>(true)
        })
        .await
    }

    /// One stored group
    pub async fn load(&self, kind: GroupKind, key: &GroupKey, name: &str) -> Result<Group> {
        let record = load_groups(self.ctx.pool(), kind.as_str(), key.as_str())
            .await?
            .into_iter()
            .find(|g| g.name == name)
            .ok_or_else(|| Error::NotFound(format!("{} {} '{}'", kind, key, name)))?;
        let members = load_members(self.ctx.pool(), kind.as_str(), key.as_str(), name).await?;
        Group::from_records(kind, record, members)
    }

    /// Every group of `kind` recorded under `key` (one per name)
    pub async fn load_all(&self, kind: GroupKind, key: &GroupKey) -> Result<Vec<Group>> {
        let mut groups = Vec::new();
        for record in load_groups(self.ctx.pool(), kind.as_str(), key.as_str()).await? {
            let members = load_members(self.ctx.pool(), kind.as_str(), key.as_str(), &record.name).await?;
            groups.push(Group::from_records(kind, record, members)?);
        }
        Ok(groups)
    }

    pub async fn load_by_name(&self, kind: GroupKind, name: &str) -> Result<Group> {
        let record = load_group_by_name(self.ctx.pool(), kind.as_str(), name)
            .await?
            .ok_or_else(|| Error::NotFound(format!("{} '{}'", kind, name)))?;
        let members = load_members(self.ctx.pool(), kind.as_str(), &record.group_hash, name).await?;
        Group::from_records(kind, record, members)
    }

    async fn resolve_scans(&self, keys: &BTreeSet<&str>) -> Result<Resolution> {
        let catalog: HashSet<ScanKey> = stored_scans(self.ctx.pool()).await?.into_iter().collect();
        let mut members = Vec::with_capacity(keys.len());
        for input in keys {
            let scan = parse_scan_key(input)?;
            if !catalog.contains(&scan) {
                return Err(Error::NotFound(format!("scan {} is not in the catalog", scan)));
            }
            members.push(ResolvedMember {
                input: input.to_string(),
                member_key: scan.to_string(),
                scan: Some(scan),
            });
        }
        Ok(Resolution {
            members,
            attributes: Map::new(),
        })
    }

    async fn resolve_stimulus_types(&self, keys: &BTreeSet<&str>) -> Result<Resolution> {
        let known: HashSet<String> = stimulus_types(self.ctx.pool()).await?.into_iter().collect();
        if let Some(missing) = keys.iter().find(|k| !known.contains(**k)) {
            return Err(Error::NotFound(format!("stimulus type '{}'", missing)));
        }

        let mut attributes = Map::new();
        attributes.insert(
            "stim_types".to_string(),
            Value::from(keys.iter().copied().collect::<Vec<_>>().join(", ")),
        );
        Ok(Resolution {
            members: keys
                .iter()
                .map(|k| ResolvedMember {
                    input: k.to_string(),
                    member_key: k.to_string(),
                    scan: None,
                })
                .collect(),
            attributes,
        })
    }

    async fn resolve_orientation(&self, keys: &BTreeSet<&str>) -> Result<Resolution> {
        let mut members = Vec::with_capacity(keys.len());
        let mut response_types = BTreeSet::new();
        let mut stim_groups = BTreeSet::new();

        for agg_hash in keys {
            let summary = load_summary(self.ctx.pool(), ORIENTATION_SUMMARY, agg_hash)
                .await?
                .ok_or_else(|| Error::NotFound(format!("orientation summary for {}", agg_hash)))?;
            response_types.insert(summary.response_type.clone().unwrap_or_default());
            stim_groups.insert(summary.stim_type_grp_hash.clone().unwrap_or_default());
            members.push(ResolvedMember {
                input: agg_hash.to_string(),
                member_key: agg_hash.to_string(),
                scan: Some(summary.scan()),
            });
        }

        let mut attributes = Map::new();
        attributes.insert("response_type".to_string(), Value::from(single("response_type", response_types)?));
        attributes.insert("stim_type_grp_hash".to_string(), Value::from(single("stim_type_grp_hash", stim_groups)?));
        Ok(Resolution { members, attributes })
    }

    async fn resolve_oracle(&self, keys: &BTreeSet<&str>) -> Result<Resolution> {
        let mut members = Vec::with_capacity(keys.len());
        let mut oracle_types = BTreeSet::new();

        for agg_hash in keys {
            let summary = load_summary(self.ctx.pool(), ORACLE_SUMMARY, agg_hash)
                .await?
                .ok_or_else(|| Error::NotFound(format!("oracle summary for {}", agg_hash)))?;
            oracle_types.insert(self.aggregate_row(oracle::AGGREGATE, agg_hash).await?.variant);
            members.push(ResolvedMember {
                input: agg_hash.to_string(),
                member_key: agg_hash.to_string(),
                scan: Some(summary.scan()),
            });
        }

        let mut attributes = Map::new();
        attributes.insert(
            oracle::DISCRIMINATOR.to_string(),
            Value::from(single(oracle::DISCRIMINATOR, oracle_types)?),
        );
        Ok(Resolution { members, attributes })
    }

    async fn resolve_dynamic_models(&self, keys: &BTreeSet<&str>) -> Result<Resolution> {
        let mut members = Vec::with_capacity(keys.len());
        let mut model_types = BTreeSet::new();

        for agg_hash in keys {
            let record = self.aggregate_row(dynamic_model::MODEL_AGGREGATE, agg_hash).await?;
            let scan = load_variant_row(self.ctx.pool(), &record.aggregate, &record.variant, &record.entity_key)
                .await?
                .and_then(|row| row.scan());
            model_types.insert(record.variant);
            members.push(ResolvedMember {
                input: agg_hash.to_string(),
                member_key: agg_hash.to_string(),
                scan,
            });
        }

        let mut attributes = Map::new();
        attributes.insert(
            dynamic_model::MODEL_DISCRIMINATOR.to_string(),
            Value::from(single(dynamic_model::MODEL_DISCRIMINATOR, model_types)?),
        );
        Ok(Resolution { members, attributes })
    }

    /// Stored aggregate row of `aggregate`
    async fn aggregate_row(&self, aggregate: &str, agg_hash: &str) -> Result<AggregateRowRecord> {
        load_aggregate_row(self.ctx.pool(), agg_hash)
            .await?
            .filter(|r| r.aggregate == aggregate)
            .ok_or_else(|| Error::NotFound(format!("{} row {}", aggregate, agg_hash)))
    }
}

/// The one value every member shares
fn single(attribute: &str, values: BTreeSet<String>) -> Result<String> {
    let mut iter = values.iter();
    match (iter.next(), iter.next()) {
        (Some(value), None) => Ok(value.clone()),
        _ => Err(Error::HeterogeneousGroup {
            attribute: attribute.to_string(),
            values: values.into_iter().collect(),
        }),
    }
}

/// Each recording must come from exactly one requested key
fn check_scan_uniqueness(members: &[ResolvedMember]) -> Result<()> {
    let mut by_scan: BTreeMap<ScanKey, BTreeSet<&str>> = BTreeMap::new();
    for member in members {
        if let Some(scan) = member.scan {
            by_scan.entry(scan).or_default().insert(member.input.as_str());
        }
    }
    match by_scan.into_iter().find(|(_, inputs)| inputs.len() > 1) {
        Some((scan, inputs)) => Err(Error::AmbiguousMembership {
            scan,
            members: inputs.into_iter().map(str::to_string).collect(),
        }),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_scan_key_forms() {
        assert_eq!(parse_scan_key("17797-4-7").unwrap(), ScanKey::new(17797, 4, 7));
        assert_eq!(
            parse_scan_key(r#"{"animal_id":17797,"scan_session":4,"scan_idx":7}"#).unwrap(),
            ScanKey::new(17797, 4, 7)
        );
        assert!(parse_scan_key("17797-4").is_err());
        assert!(parse_scan_key("a-b-c").is_err());
    }

    #[test]
    fn test_kind_round_trip_names() {
        for kind in GroupKind::ALL {
            assert_eq!(kind.as_str().parse::<GroupKind>().unwrap(), kind);
        }
        assert_eq!("oracle-scan-set".parse::<GroupKind>().unwrap(), GroupKind::OracleScanSet);
        assert!("scan".parse::<GroupKind>().is_err());
    }

    #[test]
    fn test_single_value_required() {
        let one: BTreeSet<String> = ["in_vivo".to_string()].into_iter().collect();
        assert_eq!(single("response_type", one).unwrap(), "in_vivo");

        let two: BTreeSet<String> = ["in_vivo".to_string(), "in_silico".to_string()].into_iter().collect();
        assert!(matches!(single("response_type", two), Err(Error::HeterogeneousGroup { .. })));
    }

    #[test]
    fn test_same_scan_from_two_inputs_is_ambiguous() {
        let scan = ScanKey::new(17797, 4, 7);
        let members = vec![
            ResolvedMember {
                input: "a".to_string(),
                member_key: "a".to_string(),
                scan: Some(scan),
            },
            ResolvedMember {
                input: "b".to_string(),
                member_key: "b".to_string(),
                scan: Some(scan),
            },
        ];
        assert!(matches!(
            check_scan_uniqueness(&members),
            Err(Error::AmbiguousMembership { .. })
        ));
    }
}
