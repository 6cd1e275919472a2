//! Oracle (response reliability) feeds
//!
//! Aggregate `oracle`; discriminator column `oracle_type`.

use super::{RelationRef, ScanCopy, UnitSpec, Variant};
use std::sync::Arc;

pub const AGGREGATE: &str = "oracle";
pub const DISCRIMINATOR: &str = "oracle_type";

const SCAN_KEY: &[&str] = &["animal_id", "scan_session", "scan_idx"];
const PIPELINE_KEY: &[&str] = &["animal_id", "scan_session", "scan_idx", "segmentation_method", "spike_method"];
const PIPELINE_METHODS: &[(&str, i64)] = &[("segmentation_method", 6), ("spike_method", 5)];

pub fn oracle_dv_scan1() -> ScanCopy {
    ScanCopy {
        name: "OracleDVScan1",
        aggregate: AGGREGATE,
        modules: &[("dv_scans_v1_oracle", "dv_scans_v1_oracle")],
        master: RelationRef::new("dv_scans_v1_oracle", "TrialVsOracle"),
        joins: &[],
        constants: &[],
        key: SCAN_KEY,
        master_from_units: false,
        units: UnitSpec {
            relation: RelationRef::new("dv_scans_v1_oracle", "TrialVsOracle_Unit"),
            score: Some("trial_vs_oracle"),
            unique_map: None,
            roster: None,
        },
        gated: false,
        parent: None,
    }
}

pub fn oracle_dv_scan3() -> ScanCopy {
    ScanCopy {
        name: "OracleDVScan3",
        aggregate: AGGREGATE,
        modules: &[("dv_oracle", "dv_scans_v3_oracle")],
        master: RelationRef::new("dv_oracle", "TrialVsOracle"),
        joins: &[],
        constants: &[],
        key: SCAN_KEY,
        master_from_units: true,
        units: UnitSpec {
            relation: RelationRef::new("dv_oracle", "TrialVsOracle_Unit"),
            score: Some("trial_vs_oracle"),
            unique_map: None,
            roster: None,
        },
        gated: false,
        parent: None,
    }
}

pub fn oracle_tune_movie_oracle() -> ScanCopy {
    ScanCopy {
        name: "OracleTuneMovieOracle",
        aggregate: AGGREGATE,
        modules: &[("pipeline_tune", "pipeline_tune")],
        master: RelationRef::new("pipeline_tune", "MovieOracle"),
        joins: &[],
        constants: PIPELINE_METHODS,
        key: PIPELINE_KEY,
        master_from_units: false,
        units: UnitSpec {
            relation: RelationRef::new("pipeline_tune", "MovieOracle_Total"),
            score: Some("trials_oracle"),
            unique_map: None,
            roster: None,
        },
        gated: false,
        parent: None,
    }
}

/// Model-based reliability; units without a score are kept with a null score
pub fn nn10_scan3_rel() -> ScanCopy {
    ScanCopy {
        name: "Nn10Scan3Rel",
        aggregate: AGGREGATE,
        modules: &[("is_scan", "dv_nns_v10_scan"), ("iv_scan", "dv_scans_v3_scan")],
        master: RelationRef::new("is_scan", "Reliability"),
        joins: &[],
        constants: PIPELINE_METHODS,
        key: PIPELINE_KEY,
        master_from_units: false,
        units: UnitSpec {
            relation: RelationRef::new("is_scan", "Reliability_Unit"),
            score: Some("reliability"),
            unique_map: None,
            roster: Some(RelationRef::new("iv_scan", "Unit")),
        },
        gated: true,
        parent: None,
    }
}

pub fn variants() -> Vec<Arc<dyn Variant>> {
    vec![
        Arc::new(oracle_dv_scan1()),
        Arc::new(oracle_dv_scan3()),
        Arc::new(oracle_tune_movie_oracle()),
        Arc::new(nn10_scan3_rel()),
    ]
}
