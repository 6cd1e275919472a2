//! Predictive model feeds and their per-unit scores
//!
//! Aggregate `dynamic_model` (discriminator `dynamic_model_type`) holds
//! trained models; aggregate `dynamic_model_score` (`dynamic_score_type`)
//! holds scores, each pointing at the model row it evaluates.

use super::{ParentSpec, RelationRef, ScanCopy, UnitSpec, Variant};
use std::sync::Arc;

pub const MODEL_AGGREGATE: &str = "dynamic_model";
pub const MODEL_DISCRIMINATOR: &str = "dynamic_model_type";
pub const SCORE_AGGREGATE: &str = "dynamic_model_score";
pub const SCORE_DISCRIMINATOR: &str = "dynamic_score_type";

pub const MODEL_KEY: &[&str] = &["animal_id", "scan_session", "scan_idx", "readout_hash"];
const SCORE_KEY: &[&str] = &["animal_id", "scan_session", "scan_idx", "readout_hash", "behavior_hash"];

const V10_MODULES: &[(&str, &str)] = &[
    ("dv_nns_v10_scan", "dv_nns_v10_scan"),
    ("dv_scans_v3_scan_dataset", "dv_scans_v3_scan_dataset"),
    ("dv_scans_v3_scan", "dv_scans_v3_scan"),
    ("dv_nns_v10_model", "dv_nns_v10_model"),
];

const UNIQUE_UNITS: RelationRef = RelationRef::new("dv_scans_v3_scan", "Unique_Unit");

/// Models read from a v3 scan dataset with the unique unit config
const UNIQUE_UNIT_CONFIG: &[RelationRef] = &[
    RelationRef::new("dv_nns_v10_scan", "ScanConfig_Scan3"),
    RelationRef::new("dv_scans_v3_scan_dataset", "Dataset"),
    RelationRef::new("dv_scans_v3_scan_dataset", "UnitConfig_Unique"),
];
const ALL_UNIT_CONFIG: &[RelationRef] = &[
    RelationRef::new("dv_nns_v10_scan", "ScanConfig_Scan3"),
    RelationRef::new("dv_scans_v3_scan_dataset", "Dataset"),
    RelationRef::new("dv_scans_v3_scan_dataset", "UnitConfig_All"),
];
const V5_BEHAVIOR: &[RelationRef] = &[RelationRef::new("dv_nns_v5_model", "BehaviorConfig_Scan")];
const V10_BEHAVIOR: &[RelationRef] = &[RelationRef::new("dv_nns_v10_model", "BehaviorConfig_Scan")];

pub fn nns_v5() -> ScanCopy {
    ScanCopy {
        name: "NnsV5",
        aggregate: MODEL_AGGREGATE,
        modules: &[("dv_nns_v5_scan", "dv_nns_v5_scan")],
        master: RelationRef::new("dv_nns_v5_scan", "Readout"),
        joins: &[],
        constants: &[],
        key: MODEL_KEY,
        master_from_units: false,
        units: UnitSpec {
            relation: RelationRef::new("dv_nns_v5_scan", "Readout_Unit"),
            score: None,
            unique_map: None,
            roster: None,
        },
        gated: false,
        parent: None,
    }
}

fn nns_v10_scan_v3(name: &'static str, unit_config: &'static [RelationRef]) -> ScanCopy {
    ScanCopy {
        name,
        aggregate: MODEL_AGGREGATE,
        modules: V10_MODULES,
        master: RelationRef::new("dv_nns_v10_scan", "Readout"),
        joins: unit_config,
        constants: &[],
        key: MODEL_KEY,
        master_from_units: false,
        units: UnitSpec {
            relation: RelationRef::new("dv_nns_v10_scan", "Readout_Unit"),
            score: None,
            unique_map: Some(UNIQUE_UNITS),
            roster: None,
        },
        gated: true,
        parent: None,
    }
}

/// Models trained on unique units of scan dataset v3
pub fn nns_v10_scan_v3_unique() -> ScanCopy {
    nns_v10_scan_v3("NnsV10ScanV3Unique", UNIQUE_UNIT_CONFIG)
}

/// Models trained on every unit of scan dataset v3
pub fn nns_v10_scan_v3_all() -> ScanCopy {
    nns_v10_scan_v3("NnsV10ScanV3All", ALL_UNIT_CONFIG)
}

pub fn model_variants() -> Vec<Arc<dyn Variant>> {
    vec![
        Arc::new(nns_v5()),
        Arc::new(nns_v10_scan_v3_unique()),
        Arc::new(nns_v10_scan_v3_all()),
    ]
}

pub fn score_nns_v5() -> ScanCopy {
    ScanCopy {
        name: "NnsV5",
        aggregate: SCORE_AGGREGATE,
        modules: &[("dv_nns_v5_scan", "dv_nns_v5_scan"), ("dv_nns_v5_model", "dv_nns_v5_model")],
        master: RelationRef::new("dv_nns_v5_scan", "TrialVsModel"),
        joins: V5_BEHAVIOR,
        constants: &[],
        key: SCORE_KEY,
        master_from_units: false,
        units: UnitSpec {
            relation: RelationRef::new("dv_nns_v5_scan", "TrialVsModel_Unit"),
            score: Some("score"),
            unique_map: None,
            roster: None,
        },
        gated: true,
        parent: Some(ParentSpec {
            aggregate: MODEL_AGGREGATE,
            variant: "NnsV5",
            key: MODEL_KEY,
        }),
    }
}

fn v10_score(
    name: &'static str,
    relation: &'static str,
    unit_relation: &'static str,
    parent_variant: &'static str,
    unique: bool,
) -> ScanCopy {
    ScanCopy {
        name,
        aggregate: SCORE_AGGREGATE,
        modules: V10_MODULES,
        master: RelationRef::new("dv_nns_v10_scan", relation),
        joins: V10_BEHAVIOR,
        constants: &[],
        key: SCORE_KEY,
        master_from_units: false,
        units: UnitSpec {
            relation: RelationRef::new("dv_nns_v10_scan", unit_relation),
            score: Some("score"),
            unique_map: if unique { Some(UNIQUE_UNITS) } else { None },
            roster: None,
        },
        gated: true,
        parent: Some(ParentSpec {
            aggregate: MODEL_AGGREGATE,
            variant: parent_variant,
            key: MODEL_KEY,
        }),
    }
}

pub fn score_nns_v10_scan_v3_unique() -> ScanCopy {
    v10_score("NnsV10ScanV3Unique", "TrialVsModel", "TrialVsModel_Unit", "NnsV10ScanV3Unique", true)
}

/// Correlation to average on unique units
pub fn score_nns10_scan3_unique_cc() -> ScanCopy {
    v10_score("Nns10Scan3UniqueCc", "ModelScore", "ModelScore_Unit", "NnsV10ScanV3Unique", true)
}

/// Correlation to average on all units
pub fn score_nns10_scan3_all_cc() -> ScanCopy {
    v10_score("Nns10Scan3AllCc", "ModelScore", "ModelScore_Unit", "NnsV10ScanV3All", false)
}

pub fn score_variants() -> Vec<Arc<dyn Variant>> {
    vec![
        Arc::new(score_nns_v5()),
        Arc::new(score_nns_v10_scan_v3_unique()),
        Arc::new(score_nns10_scan3_unique_cc()),
        Arc::new(score_nns10_scan3_all_cc()),
    ]
}
