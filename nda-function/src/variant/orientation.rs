//! Orientation and direction tuning feeds
//!
//! Aggregate `orientation`; discriminator column `orientation_type`.

use super::{entity_row, unsupported, ModuleList, TuningCurve, UnitDetail, Variant};
use crate::context::SyncContext;
use crate::error::{Error, Result};
use crate::source::relation::{get_f64, get_i64, get_str, scan_of};
use crate::source::{Relation, Restriction, Row, RowKey};
use async_trait::async_trait;
use nda_common::db::{ScanKey, VariantRowRecord};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::f64::consts::PI;
use std::sync::Arc;

pub const AGGREGATE: &str = "orientation";
pub const DISCRIMINATOR: &str = "orientation_type";

fn restriction_from(row: &Row) -> Restriction {
    row.iter()
        .fold(Restriction::all(), |acc, (attr, value)| acc.eq(attr.clone(), value.clone()))
}

fn scan_restriction(scan: &ScanKey) -> Restriction {
    Restriction::all()
        .eq("animal_id", scan.animal_id)
        .eq("scan_session", scan.scan_session)
        .eq("scan_idx", scan.scan_idx)
}

fn by_direction(key: &Row) -> Restriction {
    Restriction::all().eq("direction_hash", key.get("direction_hash").cloned().unwrap_or(Value::Null))
}

fn strip(row: &Row, attrs: &[&str]) -> Row {
    let mut out = row.clone();
    for attr in attrs {
        out.remove(*attr);
    }
    out
}

/// Bi-von-Mises direction tuning from `dv_tunings_v2_direction`
///
/// Restricted to recordings of a registered scan set and to fits that also
/// have bootstrap and permutation results. Tuning units are unique units;
/// each is expanded back to every functional unit id of the recording's
/// unique unit config.
pub struct OrientationDV11521GD;

impl OrientationDV11521GD {
    const MODULES: ModuleList = &[
        ("dv_tunings_v2_direction", "dv_tunings_v2_direction"),
        ("dv_tunings_v2_response", "dv_tunings_v2_response"),
        ("dv_scans_v1_scan", "dv_scans_v1_scan"),
        ("dv_scans_v1_scan_dataset", "dv_scans_v1_scan_dataset"),
        ("dv_nns_v5_scan", "dv_nns_v5_scan"),
        ("dv_stimuli_v1_stimulus", "dv_stimuli_v1_stimulus"),
        ("pipeline_stimulus", "pipeline_stimulus"),
    ];
    const KEY: &'static [&'static str] = &["response_hash", "tuning_hash"];

    async fn fetch(&self, ctx: &SyncContext, module: &str, relation: &str, restriction: &Restriction) -> Result<Relation> {
        ctx.fetch(Self::MODULES, module, relation, restriction).await
    }

    fn response_restriction(row: &VariantRowRecord) -> Result<Restriction> {
        let key = entity_row(row)?;
        let response_hash = key
            .get("response_hash")
            .cloned()
            .ok_or_else(|| Error::MalformedRow(format!("entity key {} has no response_hash", row.entity_key)))?;
        Ok(Restriction::all().eq("response_hash", response_hash))
    }

    /// Bootstrap and permutation fits, renamed apart so they join on the key only
    async fn resampled(&self, ctx: &SyncContext, part: &str, restriction: &Restriction) -> Result<Relation> {
        let bootstrap = self
            .fetch(ctx, "dv_tunings_v2_direction", &format!("BiVonMisesBootstrap{}", part), restriction)
            .await?
            .rename("n_samples", "bs_samples")
            .rename("seed", "bs_seed");
        let permutation = self
            .fetch(ctx, "dv_tunings_v2_direction", &format!("BiVonMisesPermutation{}", part), restriction)
            .await?
            .rename("n_samples", "permute_samples")
            .rename("seed", "permute_seed");
        Ok(bootstrap.join(&permutation))
    }

    /// Unique unit map of a recording under the unique unit config of its v5 scan dataset
    async fn unique_units(&self, ctx: &SyncContext, scan: &ScanKey) -> Result<Relation> {
        let all = Restriction::all();
        let unique_config = self
            .fetch(ctx, "dv_nns_v5_scan", "ScanInfo", &scan_restriction(scan))
            .await?
            .join(&self.fetch(ctx, "dv_nns_v5_scan", "ScanConfig", &all).await?)
            .join(&self.fetch(ctx, "dv_scans_v1_scan_dataset", "UnitConfig_Unique", &all).await?);

        Ok(self
            .fetch(ctx, "dv_scans_v1_scan", "Unique_Unit", &scan_restriction(scan))
            .await?
            .semijoin(&unique_config))
    }

    async fn slices(&self, ctx: &SyncContext, row: &VariantRowRecord) -> Result<Relation> {
        self.fetch(ctx, "dv_tunings_v2_response", "ResponseSet_Slice", &Self::response_restriction(row)?)
            .await
    }
}

#[async_trait]
impl Variant for OrientationDV11521GD {
    fn name(&self) -> &'static str {
        "OrientationDV11521GD"
    }

    fn aggregate(&self) -> &'static str {
        AGGREGATE
    }

    fn modules(&self) -> ModuleList {
        Self::MODULES
    }

    fn key_attributes(&self) -> &'static [&'static str] {
        Self::KEY
    }

    async fn upstream(&self, ctx: &SyncContext) -> Result<Relation> {
        let all = Restriction::all();
        let tuning = self
            .fetch(ctx, "dv_tunings_v2_direction", "BiVonMises", &all)
            .await?
            .join(&self.resampled(ctx, "", &all).await?)
            .join(&self.fetch(ctx, "dv_tunings_v2_direction", "Tuning", &all).await?)
            .join(
                &self
                    .fetch(ctx, "dv_tunings_v2_direction", "GlobalDiscreteTrialTuning", &all)
                    .await?
                    .rename("radians", "tuning_curve_radians"),
            );

        let scans = self
            .fetch(ctx, "dv_tunings_v2_response", "ResponseInfo_Scan", &all)
            .await?
            .semijoin(&ctx.scan_set_scans().await?);

        Ok(tuning.join(&scans))
    }

    async fn units(&self, ctx: &SyncContext, master: &Row) -> Result<Vec<UnitDetail>> {
        let scan = scan_of(master)?;
        let tuning_hash = master
            .get("tuning_hash")
            .cloned()
            .ok_or_else(|| Error::MalformedRow("tuning row has no tuning_hash".to_string()))?;

        let by_tuning = Restriction::all().eq("tuning_hash", tuning_hash);

        let tuning_units = self
            .fetch(ctx, "dv_tunings_v2_direction", "BiVonMises_Unit", &by_tuning)
            .await?
            .join(&self.resampled(ctx, "_Unit", &by_tuning).await?)
            .join(&self.fetch(ctx, "dv_tunings_v2_direction", "Tuning", &by_tuning).await?)
            .join(
                &self
                    .fetch(ctx, "dv_tunings_v2_direction", "GlobalDiscreteTrialTuning_Unit", &by_tuning)
                    .await?
                    .rename("mu", "tuning_curve_mu")
                    .rename("sigma", "tuning_curve_sigma"),
            )
            .rename("unit_id", "unique_unit_id");
        let unique = self.unique_units(ctx, &scan).await?;

        tuning_units
            .join(&unique)
            .rows()
            .iter()
            .map(|row| {
                Ok(UnitDetail {
                    unit_id: get_i64(row, "unit_id")?,
                    score: None,
                    attributes: strip(row, &["response_hash", "tuning_hash", "animal_id", "scan_session", "scan_idx", "unit_id"]),
                })
            })
            .collect()
    }

    async fn stimulus_types(&self, ctx: &SyncContext, row: &VariantRowRecord) -> Result<Vec<String>> {
        let all = Restriction::all();
        let conditions = self
            .fetch(ctx, "dv_stimuli_v1_stimulus", "StimulusCondition", &all)
            .await?
            .join(&self.fetch(ctx, "pipeline_stimulus", "Condition", &all).await?);

        let types: BTreeSet<String> = self
            .slices(ctx, row)
            .await?
            .join(&conditions)
            .distinct("stimulus_type")
            .iter()
            .filter_map(|v| v.as_str().map(str::to_string))
            .collect();
        Ok(types.into_iter().collect())
    }

    async fn response_type(&self, ctx: &SyncContext, row: &VariantRowRecord) -> Result<String> {
        let config = self
            .fetch(ctx, "dv_tunings_v2_response", "ResponseConfig", &Self::response_restriction(row)?)
            .await?;
        match get_str(config.fetch1("response config")?, "response_type")? {
            "Scan1Mean" => Ok("in_vivo".to_string()),
            "Nn5Pure" => Ok("in_silico".to_string()),
            other => Err(unsupported(self.name(), &format!("response_type {}", other))),
        }
    }

    async fn duration_seconds(&self, ctx: &SyncContext, row: &VariantRowRecord) -> Result<f64> {
        let slices = self.slices(ctx, row).await?;
        slices
            .rows()
            .iter()
            .map(|slice| Ok(get_f64(slice, "n_frames")? / get_f64(slice, "hz")?))
            .sum()
    }
}

/// Direction tuning from `dv_tunings_v4_direction`, animal 17797 only
///
/// Stimulus and response type are only defined for the mean-response,
/// Nn10/Monet2 configuration.
pub struct OrientationDV231042;

impl OrientationDV231042 {
    const MODULES: ModuleList = &[
        ("dv_scan", "dv_scans_v3_scan"),
        ("dv_direction", "dv_tunings_v4_direction"),
    ];
    const KEY: &'static [&'static str] = &["animal_id", "scan_session", "scan_idx", "direction_hash"];
    const ANIMAL_ID: i64 = 17797;

    async fn fetch(&self, ctx: &SyncContext, module: &str, relation: &str, restriction: &Restriction) -> Result<Relation> {
        ctx.fetch(Self::MODULES, module, relation, restriction).await
    }

    /// Per-unit tuning joined with the unique unit map
    async fn unit_relation(&self, ctx: &SyncContext, restriction: &Restriction) -> Result<Relation> {
        let unique = self.fetch(ctx, "dv_scan", "Unique_Unit", restriction).await?;
        let bvm = self
            .direction_units(ctx, "BiVonMises", restriction)
            .await?
            .rename("mse", "bvm_mse");
        let osi = self.direction_units(ctx, "OSI", restriction).await?;
        let dsi = self.direction_units(ctx, "DSI", restriction).await?;
        let uniform = self
            .direction_units(ctx, "Uniform", restriction)
            .await?
            .rename("mse", "uniform_mse");

        Ok(unique.join(&bvm).join(&osi).join(&dsi).join(&uniform))
    }

    /// Direction relations are keyed by unique unit
    async fn direction_units(&self, ctx: &SyncContext, relation: &str, restriction: &Restriction) -> Result<Relation> {
        Ok(self
            .fetch(ctx, "dv_direction", relation, restriction)
            .await?
            .rename("unit_id", "unique_unit_id"))
    }

    /// Whether the row was computed with the mean / Nn10Monet2 configuration
    async fn monet2_config(&self, ctx: &SyncContext, key: &Row) -> Result<bool> {
        let restriction = by_direction(key);
        let mean = self.fetch(ctx, "dv_direction", "DirectionConfig_Mean", &restriction).await?;
        let response = self
            .fetch(ctx, "dv_direction", "DirectionResponseConfig_Nn10Monet2", &restriction)
            .await?;
        Ok(!mean.is_empty() && !response.is_empty())
    }

    async fn require_monet2(&self, ctx: &SyncContext, row: &VariantRowRecord, capability: &str) -> Result<Row> {
        let key = entity_row(row)?;
        if self.monet2_config(ctx, &key).await? {
            Ok(key)
        } else {
            Err(unsupported(self.name(), capability))
        }
    }
}

#[async_trait]
impl Variant for OrientationDV231042 {
    fn name(&self) -> &'static str {
        "OrientationDV231042"
    }

    fn aggregate(&self) -> &'static str {
        AGGREGATE
    }

    fn modules(&self) -> ModuleList {
        Self::MODULES
    }

    fn key_attributes(&self) -> &'static [&'static str] {
        Self::KEY
    }

    async fn upstream(&self, ctx: &SyncContext) -> Result<Relation> {
        let units = self
            .unit_relation(ctx, &Restriction::all().eq("animal_id", Self::ANIMAL_ID))
            .await?;
        Ok(units.project(Self::KEY))
    }

    async fn units(&self, ctx: &SyncContext, master: &Row) -> Result<Vec<UnitDetail>> {
        let key = RowKey::from_row(master, Self::KEY)?;
        let scan = scan_of(master)?;
        let units = self
            .unit_relation(ctx, &scan_restriction(&scan))
            .await?
            .restrict(&restriction_from(&key.to_row()));
        let mut dropped = Self::KEY.to_vec();
        dropped.push("unit_id");

        units
            .rows()
            .iter()
            .map(|row| {
                Ok(UnitDetail {
                    unit_id: get_i64(row, "unit_id")?,
                    score: None,
                    attributes: strip(row, &dropped),
                })
            })
            .collect()
    }

    async fn stimulus_types(&self, ctx: &SyncContext, row: &VariantRowRecord) -> Result<Vec<String>> {
        self.require_monet2(ctx, row, "stimulus_type").await?;
        Ok(vec!["stimulus.Monet2".to_string()])
    }

    async fn response_type(&self, ctx: &SyncContext, row: &VariantRowRecord) -> Result<String> {
        self.require_monet2(ctx, row, "response_type").await?;
        Ok("in_silico".to_string())
    }

    async fn duration_seconds(&self, ctx: &SyncContext, row: &VariantRowRecord) -> Result<f64> {
        let key = self.require_monet2(ctx, row, "duration_seconds").await?;
        let restriction = by_direction(&key);
        let stimulus = self
            .fetch(ctx, "dv_direction", "DirectionStimulusConfig_Monet2", &restriction)
            .await?;
        let config = stimulus.fetch1("Monet2 stimulus config")?;
        Ok(get_f64(config, "duration")? * get_f64(config, "n_rng_seeds")?)
    }

    async fn tuning_curve(&self, ctx: &SyncContext, row: &VariantRowRecord) -> Result<Vec<TuningCurve>> {
        let key = entity_row(row)?;
        let scan = scan_of(&key)?;
        let by_hash = by_direction(&key);

        // The config names the part relation holding its parameters
        let config = self.fetch(ctx, "dv_direction", "DirectionConfig", &by_hash).await?;
        let direction_type = get_str(config.fetch1("direction config")?, "direction_type")?.to_string();
        let part = self
            .fetch(ctx, "dv_direction", &format!("DirectionConfig_{}", direction_type), &by_hash)
            .await?;
        if part.is_empty() {
            return Err(Error::NotFound(format!("DirectionConfig_{} for {}", direction_type, row.entity_key)));
        }

        let responses = self
            .fetch(ctx, "dv_direction", "DirectionResponse_Direction", &restriction_from(&key))
            .await?;

        let mut by_unit: BTreeMap<i64, Vec<(f64, f64, f64)>> = BTreeMap::new();
        for r in responses.rows() {
            by_unit.entry(get_i64(r, "unit_id")?).or_default().push((
                get_f64(r, "direction")?,
                get_f64(r, "response_mean")?,
                get_f64(r, "response_std")?,
            ));
        }

        Ok(by_unit
            .into_iter()
            .map(|(unit_id, mut points)| {
                points.sort_by(|a, b| a.0.total_cmp(&b.0));
                TuningCurve {
                    scan,
                    unit_id,
                    direction: points.iter().map(|p| p.0 / 180.0 * PI).collect(),
                    response_mean: points.iter().map(|p| p.1).collect(),
                    response_std: points.iter().map(|p| p.2).collect(),
                }
            })
            .collect())
    }
}

pub fn variants() -> Vec<Arc<dyn Variant>> {
    vec![Arc::new(OrientationDV11521GD), Arc::new(OrientationDV231042)]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineSettings;
    use crate::db::groups::{insert_group, NewGroup, NewMember};
    use crate::source::{MemoryConnector, SourceRegistry};
    use serde_json::json;

    fn row(value: Value) -> Row {
        value.as_object().cloned().unwrap()
    }

    async fn context(upstream: Arc<MemoryConnector>) -> SyncContext {
        let pool = nda_common::db::init_in_memory().await.unwrap();
        SyncContext::new(pool, Arc::new(SourceRegistry::new(upstream)), EngineSettings::default())
    }

    fn stored(variant: &str, entity_key: Value) -> VariantRowRecord {
        VariantRowRecord {
            aggregate: AGGREGATE.to_string(),
            variant: variant.to_string(),
            entity_key: entity_key.to_string(),
            animal_id: Some(17797),
            scan_session: Some(4),
            scan_idx: Some(7),
            parent_hash: None,
            attributes: "{}".to_string(),
            created_at: chrono::Utc::now().naive_utc(),
        }
    }

    /// Two slices of one response set, each shown under its own condition
    fn v2_response_upstream(response_type: &str) -> Arc<MemoryConnector> {
        let upstream = Arc::new(MemoryConnector::new());
        let response = upstream.schema("dv_tunings_v2_response");
        response.insert(
            "ResponseSet_Slice",
            [
                row(json!({"response_hash": "r1", "condition_hash": "c1", "n_frames": 300, "hz": 30.0})),
                row(json!({"response_hash": "r1", "condition_hash": "c2", "n_frames": 150, "hz": 15.0})),
                row(json!({"response_hash": "r2", "condition_hash": "c3", "n_frames": 10, "hz": 1.0})),
            ],
        );
        response.insert("ResponseConfig", [row(json!({"response_hash": "r1", "response_type": response_type}))]);
        upstream.schema("dv_stimuli_v1_stimulus").insert(
            "StimulusCondition",
            ["c1", "c2", "c3"].map(|c| row(json!({"condition_hash": c}))),
        );
        upstream.schema("pipeline_stimulus").insert(
            "Condition",
            [
                row(json!({"condition_hash": "c1", "stimulus_type": "stimulus.Monet2"})),
                row(json!({"condition_hash": "c2", "stimulus_type": "stimulus.Clip"})),
                row(json!({"condition_hash": "c3", "stimulus_type": "stimulus.Trippy"})),
            ],
        );
        upstream
    }

    #[tokio::test]
    async fn test_bvm_row_accessors_follow_response_set() {
        let ctx = context(v2_response_upstream("Scan1Mean")).await;
        let variant = OrientationDV11521GD;
        let record = stored(variant.name(), json!({"response_hash": "r1", "tuning_hash": "t1"}));

        assert_eq!(
            variant.stimulus_types(&ctx, &record).await.unwrap(),
            vec!["stimulus.Clip".to_string(), "stimulus.Monet2".to_string()]
        );
        assert_eq!(variant.response_type(&ctx, &record).await.unwrap(), "in_vivo");
        assert_eq!(variant.duration_seconds(&ctx, &record).await.unwrap(), 20.0);
        assert_eq!(variant.scan_identity(&ctx, &record).await.unwrap(), ScanKey::new(17797, 4, 7));
    }

    #[tokio::test]
    async fn test_unknown_response_config_is_unsupported() {
        let ctx = context(v2_response_upstream("Scan3Median")).await;
        let variant = OrientationDV11521GD;
        let record = stored(variant.name(), json!({"response_hash": "r1", "tuning_hash": "t1"}));

        assert!(matches!(
            variant.response_type(&ctx, &record).await,
            Err(Error::Unsupported { .. })
        ));
    }

    /// v2 direction fits for tuning t1 (unique units 70 and 71) and t2 (70)
    ///
    /// Only t1 has bootstrap and permutation results. Unique unit 70 maps to
    /// functional units 1 and 2 under config q1; unit 3 belongs to config q2.
    fn v2_direction_upstream() -> Arc<MemoryConnector> {
        let upstream = Arc::new(MemoryConnector::new());
        let direction = upstream.schema("dv_tunings_v2_direction");
        direction.insert(
            "BiVonMises",
            ["t1", "t2"].map(|t| row(json!({"tuning_hash": t, "response_hash": "r1", "success": 1}))),
        );
        direction.insert(
            "BiVonMises_Unit",
            [
                row(json!({"tuning_hash": "t1", "unit_id": 70, "success": 1, "mse": 0.2})),
                row(json!({"tuning_hash": "t1", "unit_id": 71, "success": 1, "mse": 0.4})),
                row(json!({"tuning_hash": "t2", "unit_id": 70, "success": 1, "mse": 0.3})),
            ],
        );
        for part in ["BiVonMisesBootstrap", "BiVonMisesPermutation"] {
            direction.insert(part, [row(json!({"tuning_hash": "t1", "n_samples": 1000, "seed": 7}))]);
            direction.insert(
                &format!("{}_Unit", part),
                [row(json!({"tuning_hash": "t1", "unit_id": 70, "p_value": 0.01}))],
            );
        }
        direction.insert("Tuning", ["t1", "t2"].map(|t| row(json!({"tuning_hash": t}))));
        direction.insert(
            "GlobalDiscreteTrialTuning",
            ["t1", "t2"].map(|t| row(json!({"tuning_hash": t, "radians": 0.5}))),
        );
        direction.insert(
            "GlobalDiscreteTrialTuning_Unit",
            [
                row(json!({"tuning_hash": "t1", "unit_id": 70, "mu": 1.5, "sigma": 0.1})),
                row(json!({"tuning_hash": "t1", "unit_id": 71, "mu": 0.5, "sigma": 0.2})),
            ],
        );
        upstream.schema("dv_tunings_v2_response").insert(
            "ResponseInfo_Scan",
            [row(json!({"response_hash": "r1", "animal_id": 17797, "session": 4, "scan_idx": 7}))],
        );

        let scan = |extra: Value| {
            let mut r = row(json!({"animal_id": 17797, "session": 4, "scan_idx": 7}));
            r.extend(row(extra));
            r
        };
        upstream
            .schema("dv_nns_v5_scan")
            .insert("ScanInfo", [scan(json!({"data_hash": "dh"}))]);
        upstream
            .schema("dv_nns_v5_scan")
            .insert("ScanConfig", [row(json!({"data_hash": "dh", "unique_hash": "q1"}))]);
        upstream
            .schema("dv_scans_v1_scan_dataset")
            .insert("UnitConfig_Unique", [row(json!({"unique_hash": "q1"}))]);
        upstream.schema("dv_scans_v1_scan").insert(
            "Unique_Unit",
            [
                scan(json!({"unique_hash": "q1", "unique_unit_id": 70, "unit_id": 1})),
                scan(json!({"unique_hash": "q1", "unique_unit_id": 70, "unit_id": 2})),
                scan(json!({"unique_hash": "q2", "unique_unit_id": 70, "unit_id": 3})),
                scan(json!({"unique_hash": "q1", "unique_unit_id": 71, "unit_id": 4})),
            ],
        );
        upstream
    }

    #[tokio::test]
    async fn test_bvm_upstream_needs_resampled_fits_and_scan_set() {
        let ctx = context(v2_direction_upstream()).await;
        let scan = ScanKey::new(17797, 4, 7);
        let mut conn = ctx.pool().acquire().await.unwrap();
        insert_group(
            &mut conn,
            &NewGroup {
                kind: "scan_set",
                group_hash: &"0".repeat(32),
                name: "tuned",
                description: "",
                attributes: &Row::new(),
                scan_set_hash: None,
            },
            &[NewMember {
                member_key: scan.to_string(),
                scan: Some(scan),
            }],
        )
        .await
        .unwrap();
        drop(conn);

        let masters = OrientationDV11521GD.upstream(&ctx).await.unwrap();

        assert_eq!(masters.len(), 1);
        let master = &masters.rows()[0];
        assert_eq!(master.get("tuning_hash"), Some(&json!("t1")));
        assert_eq!(master.get("bs_samples"), Some(&json!(1000)));
        assert_eq!(master.get("permute_seed"), Some(&json!(7)));
        assert_eq!(master.get("tuning_curve_radians"), Some(&json!(0.5)));
        assert_eq!(scan_of(master).unwrap(), scan);
    }

    #[tokio::test]
    async fn test_bvm_units_expand_unique_units_of_one_config() {
        let ctx = context(v2_direction_upstream()).await;
        let master = row(json!({
            "response_hash": "r1",
            "tuning_hash": "t1",
            "animal_id": 17797,
            "scan_session": 4,
            "scan_idx": 7,
        }));

        let mut units = OrientationDV11521GD.units(&ctx, &master).await.unwrap();
        units.sort_by_key(|u| u.unit_id);

        // Unique unit 71 has no resampled fit; unit 3 is under another config
        assert_eq!(units.iter().map(|u| u.unit_id).collect::<Vec<_>>(), vec![1, 2]);
        assert_eq!(units[0].attributes.get("unique_unit_id"), Some(&json!(70)));
        assert_eq!(units[0].attributes.get("tuning_curve_mu"), Some(&json!(1.5)));
        assert_eq!(units[0].attributes.get("p_value"), Some(&json!(0.01)));
        assert!(!units[0].attributes.contains_key("tuning_hash"));
    }

    #[tokio::test]
    async fn test_direction_v4_units_need_uniform_fit() {
        let upstream = Arc::new(MemoryConnector::new());
        let unit = |u: i64, extra: Value| {
            let mut r = row(json!({"animal_id": 17797, "session": 4, "scan_idx": 7, "direction_hash": "d1", "unit_id": u}));
            r.extend(row(extra));
            r
        };
        upstream.schema("dv_scans_v3_scan").insert(
            "Unique_Unit",
            [1, 2].map(|u| row(json!({"animal_id": 17797, "session": 4, "scan_idx": 7, "unique_unit_id": u, "unit_id": u}))),
        );
        let direction = upstream.schema("dv_tunings_v4_direction");
        direction.insert("BiVonMises", [1, 2].map(|u| unit(u, json!({"mse": 0.1}))));
        direction.insert("OSI", [1, 2].map(|u| unit(u, json!({"osi": 0.4}))));
        direction.insert("DSI", [1, 2].map(|u| unit(u, json!({"dsi": 0.2}))));
        direction.insert("Uniform", [unit(1, json!({"mse": 0.3}))]);
        let ctx = context(upstream).await;

        let masters = OrientationDV231042.upstream(&ctx).await.unwrap();
        assert_eq!(masters.len(), 1);

        let units = OrientationDV231042.units(&ctx, &masters.rows()[0]).await.unwrap();
        assert_eq!(units.len(), 1);
        assert_eq!(units[0].unit_id, 1);
        assert_eq!(units[0].attributes.get("uniform_mse"), Some(&json!(0.3)));
        assert_eq!(units[0].attributes.get("bvm_mse"), Some(&json!(0.1)));
    }

    #[tokio::test]
    async fn test_direction_v4_capabilities_need_monet2_config() {
        let upstream = Arc::new(MemoryConnector::new());
        let direction = upstream.schema("dv_tunings_v4_direction");
        direction.insert("DirectionConfig_Mean", [row(json!({"direction_hash": "d1"}))]);
        direction.insert("DirectionResponseConfig_Nn10Monet2", [row(json!({"direction_hash": "d1"}))]);
        direction.insert(
            "DirectionStimulusConfig_Monet2",
            [row(json!({"direction_hash": "d1", "duration": 12.5, "n_rng_seeds": 2}))],
        );
        let ctx = context(upstream).await;
        let variant = OrientationDV231042;
        let key = |hash: &str| json!({"animal_id": 17797, "scan_session": 4, "scan_idx": 7, "direction_hash": hash});

        let configured = stored(variant.name(), key("d1"));
        assert_eq!(variant.stimulus_types(&ctx, &configured).await.unwrap(), vec!["stimulus.Monet2"]);
        assert_eq!(variant.response_type(&ctx, &configured).await.unwrap(), "in_silico");
        assert_eq!(variant.duration_seconds(&ctx, &configured).await.unwrap(), 25.0);

        let other = stored(variant.name(), key("d9"));
        assert!(matches!(
            variant.response_type(&ctx, &other).await,
            Err(Error::Unsupported { .. })
        ));
    }
}
