//! Shared fixtures: an in-memory warehouse and in-memory upstream schemas

#![allow(dead_code)]

use nda_common::db::ScanKey;
use nda_function::config::EngineSettings;
use nda_function::db::aggregates::insert_aggregate_row;
use nda_function::db::variant_rows::{insert_variant_row, NewVariantRow};
use nda_function::hash_identity::entity_hash;
use nda_function::source::{MemoryConnector, MemorySource, Row, RowKey, SourceRegistry};
use nda_function::SyncContext;
use serde_json::{json, Value};
use std::sync::Arc;

pub fn row(value: Value) -> Row {
    value.as_object().cloned().expect("fixture rows are JSON objects")
}

/// Upstream scan attributes, with the upstream `session` name
pub fn upstream_scan(scan: ScanKey) -> Value {
    json!({"animal_id": scan.animal_id, "session": scan.scan_session, "scan_idx": scan.scan_idx})
}

/// Merge extra attributes into an upstream scan row
pub fn scan_row_with(scan: ScanKey, extra: Value) -> Row {
    let mut base = row(upstream_scan(scan));
    base.extend(row(extra));
    base
}

pub struct Fixture {
    pub ctx: SyncContext,
    pub upstream: Arc<MemoryConnector>,
}

impl Fixture {
    pub async fn new() -> Self {
        Self::with_settings(EngineSettings::default()).await
    }

    pub async fn with_threshold(confirm_threshold: usize) -> Self {
        Self::with_settings(EngineSettings {
            confirm_threshold,
            ..EngineSettings::default()
        })
        .await
    }

    pub async fn with_settings(settings: EngineSettings) -> Self {
        let pool = nda_common::db::init_in_memory().await.unwrap();
        let upstream = Arc::new(MemoryConnector::new());
        let sources = Arc::new(SourceRegistry::new(upstream.clone()));
        Self {
            ctx: SyncContext::new(pool, sources, settings),
            upstream,
        }
    }

    pub fn schema(&self, name: &str) -> Arc<MemorySource> {
        self.upstream.schema(name)
    }

    /// Upstream catalog with `units` soma units per recording
    pub fn upstream_catalog(&self, scans: &[ScanKey], units: i64) {
        let nda = self.schema("minnie_nda");
        nda.insert("Scan", scans.iter().map(|s| row(upstream_scan(*s))));
        nda.insert(
            "UnitSource",
            scans.iter().flat_map(|s| {
                (1..=units).map(move |unit_id| scan_row_with(*s, json!({"unit_id": unit_id, "mask_type": "soma"})))
            }),
        );
    }

    /// `dv_scans_v1_oracle` rows: one master per scan, one score per unit
    pub fn upstream_oracle_v1(&self, scan: ScanKey, units: &[(i64, f64)]) {
        let schema = self.schema("dv_scans_v1_oracle");
        schema.insert("TrialVsOracle", [row(upstream_scan(scan))]);
        schema.insert(
            "TrialVsOracle_Unit",
            units
                .iter()
                .map(|(unit_id, score)| scan_row_with(scan, json!({"unit_id": unit_id, "trial_vs_oracle": score}))),
        );
    }

    /// `dv_nns_v5_scan` model readouts
    pub fn upstream_nns_v5_model(&self, scan: ScanKey, readout_hash: &str, units: &[i64]) {
        let schema = self.schema("dv_nns_v5_scan");
        schema.insert("Readout", [scan_row_with(scan, json!({"readout_hash": readout_hash}))]);
        schema.insert(
            "Readout_Unit",
            units
                .iter()
                .map(|unit_id| scan_row_with(scan, json!({"readout_hash": readout_hash, "unit_id": unit_id}))),
        );
    }

    /// `dv_nns_v5_scan` model scores and the behavior config they join
    pub fn upstream_nns_v5_score(&self, scan: ScanKey, readout_hash: &str, behavior_hash: &str, units: &[(i64, f64)]) {
        self.schema("dv_nns_v5_model")
            .insert("BehaviorConfig_Scan", [row(json!({"behavior_hash": behavior_hash}))]);
        let schema = self.schema("dv_nns_v5_scan");
        let key = json!({"readout_hash": readout_hash, "behavior_hash": behavior_hash});
        schema.insert("TrialVsModel", [scan_row_with(scan, key.clone())]);
        schema.insert(
            "TrialVsModel_Unit",
            units.iter().map(|(unit_id, score)| {
                let mut r = scan_row_with(scan, key.clone());
                r.insert("unit_id".to_string(), json!(unit_id));
                r.insert("score".to_string(), json!(score));
                r
            }),
        );
    }

    /// `dv_tunings_v4_direction` tuning for animal 17797 with the Monet2 configuration
    ///
    /// Unique unit ids equal functional unit ids. Responses cover two
    /// directions, given in degrees, listed in descending order.
    pub fn upstream_direction_v4(&self, scan: ScanKey, direction_hash: &str, units: &[i64], monet2: bool) {
        let scan_schema = self.schema("dv_scans_v3_scan");
        scan_schema.insert(
            "Unique_Unit",
            units
                .iter()
                .map(|u| scan_row_with(scan, json!({"unique_unit_id": u, "unit_id": u}))),
        );

        let direction = self.schema("dv_tunings_v4_direction");
        let key = json!({"direction_hash": direction_hash});
        for (relation, extra) in [
            ("BiVonMises", json!({"mse": 0.1, "success": 1})),
            ("OSI", json!({"osi": 0.4})),
            ("DSI", json!({"dsi": 0.2})),
            ("Uniform", json!({"mse": 0.3})),
        ] {
            direction.insert(
                relation,
                units.iter().map(|u| {
                    let mut r = scan_row_with(scan, key.clone());
                    r.insert("unit_id".to_string(), json!(u));
                    r.extend(row(extra.clone()));
                    r
                }),
            );
        }

        direction.insert("DirectionConfig", [row(json!({"direction_hash": direction_hash, "direction_type": "Mean"}))]);
        direction.insert("DirectionConfig_Mean", [row(key.clone())]);
        direction.insert("DirectionResponseConfig_Nn10Monet2", monet2.then(|| row(key.clone())));
        direction.insert(
            "DirectionStimulusConfig_Monet2",
            [row(json!({"direction_hash": direction_hash, "duration": 15.0, "n_rng_seeds": 4}))],
        );
        direction.insert(
            "DirectionResponse_Direction",
            units.iter().flat_map(|u| {
                [(180.0, 2.0, 0.2), (90.0, 1.0, 0.1)].into_iter().map(move |(deg, mean, std)| {
                    scan_row_with(
                        scan,
                        json!({
                            "direction_hash": direction_hash,
                            "unit_id": u,
                            "direction": deg,
                            "response_mean": mean,
                            "response_std": std,
                        }),
                    )
                })
            }),
        );
    }

    /// Store a variant row and its aggregate row directly; returns the agg hash
    pub async fn store_row(&self, aggregate: &str, variant: &str, scan: ScanKey, extra: Value) -> String {
        let mut key = row(json!({
            "animal_id": scan.animal_id,
            "scan_session": scan.scan_session,
            "scan_idx": scan.scan_idx,
        }));
        key.extend(row(extra));
        let attrs: Vec<&str> = key.keys().map(String::as_str).collect();
        let entity_key = RowKey::from_row(&key, &attrs).unwrap().to_canonical();
        let agg_hash = entity_hash(aggregate, variant, &entity_key);

        let attributes = Row::new();
        let mut conn = self.ctx.pool().acquire().await.unwrap();
        insert_variant_row(
            &mut conn,
            &NewVariantRow {
                aggregate,
                variant,
                entity_key: &entity_key,
                scan: Some(scan),
                parent_hash: None,
                attributes: &attributes,
            },
        )
        .await
        .unwrap();
        insert_aggregate_row(&mut conn, &agg_hash, aggregate, variant, &entity_key)
            .await
            .unwrap();
        agg_hash
    }

    pub async fn count(&self, table: &str) -> i64 {
        sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {}", table))
            .fetch_one(self.ctx.pool())
            .await
            .unwrap()
    }
}

pub fn scans(ids: &[i64]) -> Vec<ScanKey> {
    ids.iter().map(|&i| ScanKey::new(17797, 4, i)).collect()
}
