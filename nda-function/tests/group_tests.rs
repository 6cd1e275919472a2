//! Group recording: content keys, uniqueness and homogeneity

mod helpers;

use helpers::{row, scans, Fixture};
use nda_function::aggregate::Aggregate;
use nda_function::catalog::ScanCatalog;
use nda_function::error::Error;
use nda_function::groups::{GroupAggregator, GroupKind};
use nda_function::hash_identity::GroupKey;
use nda_function::populator::{AutoApprove, Populator};
use nda_function::variant::dynamic_model::MODEL_AGGREGATE;
use nda_function::variant::resp_corr;
use serde_json::json;

async fn with_catalog(ids: &[i64]) -> Fixture {
    let fx = Fixture::new().await;
    fx.upstream_catalog(&scans(ids), 1);
    Populator::new(&fx.ctx, &AutoApprove).sync(&ScanCatalog).await.unwrap();
    fx
}

fn keys(ids: &[i64]) -> Vec<String> {
    scans(ids).iter().map(|s| s.to_string()).collect()
}

#[tokio::test]
async fn test_scan_set_key_ignores_order_and_repeats() {
    let fx = with_catalog(&[1, 2, 3]).await;
    let groups = GroupAggregator::new(&fx.ctx);

    let forward = groups.fill(GroupKind::ScanSet, &keys(&[1, 2, 3]), "a", "").await.unwrap();
    let shuffled = groups
        .fill(GroupKind::ScanSet, &keys(&[3, 1, 2, 1]), "b", "")
        .await
        .unwrap();

    assert_eq!(forward.key, shuffled.key);
    assert_eq!(shuffled.member_count, 3);
}

#[tokio::test]
async fn test_scan_set_allows_second_name_for_same_members() {
    let fx = with_catalog(&[1, 2]).await;
    let groups = GroupAggregator::new(&fx.ctx);

    let a = groups.fill(GroupKind::ScanSet, &keys(&[1, 2]), "a", "").await.unwrap();
    let b = groups.fill(GroupKind::ScanSet, &keys(&[1, 2]), "b", "").await.unwrap();

    assert_eq!(a.key, b.key);
    assert_eq!(groups.load_all(GroupKind::ScanSet, &a.key).await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_refill_under_same_name_is_a_no_op() {
    let fx = with_catalog(&[1, 2]).await;
    let groups = GroupAggregator::new(&fx.ctx);

    groups.fill(GroupKind::ScanSet, &keys(&[1, 2]), "a", "first").await.unwrap();
    let again = groups.fill(GroupKind::ScanSet, &keys(&[2, 1]), "a", "ignored").await.unwrap();

    assert_eq!(again.description, "first");
    assert_eq!(fx.count("groups").await, 1);
    assert_eq!(fx.count("group_members").await, 2);
}

#[tokio::test]
async fn test_scan_outside_catalog_is_not_found() {
    let fx = with_catalog(&[1]).await;

    let result = GroupAggregator::new(&fx.ctx)
        .fill(GroupKind::ScanSet, &keys(&[1, 5]), "a", "")
        .await;

    assert!(matches!(result, Err(Error::NotFound(_))));
    assert_eq!(fx.count("groups").await, 0);
}

#[tokio::test]
async fn test_empty_name_or_members_rejected() {
    let fx = with_catalog(&[1]).await;
    let groups = GroupAggregator::new(&fx.ctx);

    assert!(matches!(
        groups.fill(GroupKind::ScanSet, &keys(&[1]), " ", "").await,
        Err(Error::InvalidInput(_))
    ));
    assert!(matches!(
        groups.fill(GroupKind::ScanSet, &[], "a", "").await,
        Err(Error::InvalidInput(_))
    ));
}

#[tokio::test]
async fn test_dynamic_model_scan_set_is_unique() {
    let fx = with_catalog(&[1, 2]).await;
    let recordings = scans(&[1, 2]);
    let m1 = fx.store_row(MODEL_AGGREGATE, "NnsV5", recordings[0], json!({"readout_hash": "r1"})).await;
    let m2 = fx.store_row(MODEL_AGGREGATE, "NnsV5", recordings[1], json!({"readout_hash": "r1"})).await;
    let members = vec![m1, m2];
    let groups = GroupAggregator::new(&fx.ctx);

    let first = groups
        .fill(GroupKind::DynamicModelScanSet, &members, "models", "")
        .await
        .unwrap();
    assert_eq!(first.attribute("dynamic_model_type"), Some("NnsV5"));
    assert_eq!(
        first.attribute("scan_set_hash"),
        Some(GroupKey::of(&recordings).as_str())
    );

    // Same name again is fine, another name is not
    groups
        .fill(GroupKind::DynamicModelScanSet, &members, "models", "")
        .await
        .unwrap();
    let renamed = groups
        .fill(GroupKind::DynamicModelScanSet, &members, "other", "")
        .await;
    assert!(matches!(renamed, Err(Error::DuplicateGroup { .. })));
    assert_eq!(fx.count("groups").await, 1);
}

#[tokio::test]
async fn test_model_sets_over_same_recordings_take_one_name() {
    let fx = with_catalog(&[1, 2]).await;
    let mut first = Vec::new();
    let mut second = Vec::new();
    for scan in scans(&[1, 2]) {
        first.push(fx.store_row(MODEL_AGGREGATE, "NnsV5", scan, json!({"readout_hash": "r1"})).await);
        second.push(fx.store_row(MODEL_AGGREGATE, "NnsV5", scan, json!({"readout_hash": "r2"})).await);
    }
    let groups = GroupAggregator::new(&fx.ctx);

    let a = groups
        .fill(GroupKind::DynamicModelScanSet, &first, "setA", "")
        .await
        .unwrap();
    let b = groups.fill(GroupKind::DynamicModelScanSet, &second, "setB", "").await;

    assert!(matches!(b, Err(Error::DuplicateGroup { ref existing, .. }) if existing == "setA"));
    assert_eq!(fx.count("groups").await, 1);
    assert_eq!(fx.count("group_members").await, 2);

    // The name already recorded for these recordings may take other models
    let again = groups
        .fill(GroupKind::DynamicModelScanSet, &second, "setA", "")
        .await
        .unwrap();
    assert_ne!(again.key, a.key);
    assert_eq!(again.attribute("scan_set_hash"), a.attribute("scan_set_hash"));
}

#[tokio::test]
async fn test_response_arrays_follow_recorded_model_sets() {
    let fx = with_catalog(&[1, 2]).await;
    let mut members = Vec::new();
    for scan in scans(&[1, 2]) {
        members.push(fx.store_row(MODEL_AGGREGATE, "NnsV5", scan, json!({"readout_hash": "r1"})).await);
    }
    let set = GroupAggregator::new(&fx.ctx)
        .fill(GroupKind::DynamicModelScanSet, &members, "models", "")
        .await
        .unwrap();
    fx.schema("minnie_function").insert(
        "RespArrNnsV10",
        [
            row(json!({"dynamic_model_scan_set_hash": set.key.as_str(), "n_trials": 10})),
            row(json!({"dynamic_model_scan_set_hash": "unrecorded", "n_trials": 10})),
        ],
    );
    let aggregate = Aggregate::resp_corr().unwrap();

    let first = aggregate.fill(&fx.ctx, &AutoApprove).await;
    assert_eq!(first.added(), 1);
    assert!(first.is_clean());
    let (attributes,): (String,) = sqlx::query_as("SELECT attributes FROM variant_rows WHERE aggregate = ?")
        .bind(resp_corr::AGGREGATE)
        .fetch_one(fx.ctx.pool())
        .await
        .unwrap();
    let attributes: serde_json::Value = serde_json::from_str(&attributes).unwrap();
    assert_eq!(attributes["scan_set_hash"], json!(GroupKey::of(&scans(&[1, 2])).as_str()));

    let again = aggregate.fill(&fx.ctx, &AutoApprove).await;
    assert_eq!(again.added(), 0);
}

#[tokio::test]
async fn test_failed_member_insert_leaves_no_group_rows() {
    let fx = with_catalog(&[1, 2, 3]).await;
    // Members are written in key order, so the master and two members precede the failure
    sqlx::query(
        r#"
        CREATE TRIGGER reject_third_recording BEFORE INSERT ON group_members
        WHEN NEW.scan_idx = 3
        BEGIN
            SELECT RAISE(ABORT, 'member rejected');
        END
        "#,
    )
    .execute(fx.ctx.pool())
    .await
    .unwrap();

    let result = GroupAggregator::new(&fx.ctx)
        .fill(GroupKind::ScanSet, &keys(&[1, 2, 3]), "three", "")
        .await;

    assert!(matches!(result, Err(Error::Database(_))));
    assert_eq!(fx.count("groups").await, 0);
    assert_eq!(fx.count("group_members").await, 0);
}

#[tokio::test]
async fn test_mixed_model_types_are_rejected() {
    let fx = with_catalog(&[1, 2]).await;
    let recordings = scans(&[1, 2]);
    let v5 = fx.store_row(MODEL_AGGREGATE, "NnsV5", recordings[0], json!({"readout_hash": "r1"})).await;
    let v10 = fx
        .store_row(MODEL_AGGREGATE, "NnsV10ScanV3Unique", recordings[1], json!({"readout_hash": "r2"}))
        .await;

    let result = GroupAggregator::new(&fx.ctx)
        .fill(GroupKind::DynamicModelScanSet, &[v5, v10], "mixed", "")
        .await;

    assert!(matches!(result, Err(Error::HeterogeneousGroup { .. })));
    assert_eq!(fx.count("groups").await, 0);
    assert_eq!(fx.count("group_members").await, 0);
}

#[tokio::test]
async fn test_two_models_of_one_recording_are_ambiguous() {
    let fx = with_catalog(&[1]).await;
    let scan = scans(&[1])[0];
    let a = fx.store_row(MODEL_AGGREGATE, "NnsV5", scan, json!({"readout_hash": "r1"})).await;
    let b = fx.store_row(MODEL_AGGREGATE, "NnsV5", scan, json!({"readout_hash": "r2"})).await;

    let result = GroupAggregator::new(&fx.ctx)
        .fill(GroupKind::DynamicModelScanSet, &[a, b], "models", "")
        .await;

    assert!(matches!(result, Err(Error::AmbiguousMembership { .. })));
}

#[tokio::test]
async fn test_unknown_model_hash_is_not_found() {
    let fx = with_catalog(&[1]).await;

    let result = GroupAggregator::new(&fx.ctx)
        .fill(GroupKind::DynamicModelScanSet, &["0".repeat(32)], "models", "")
        .await;

    assert!(matches!(result, Err(Error::NotFound(_))));
}

#[tokio::test]
async fn test_load_by_name_returns_members() {
    let fx = with_catalog(&[1, 2]).await;
    let groups = GroupAggregator::new(&fx.ctx);
    groups.fill(GroupKind::ScanSet, &keys(&[2, 1]), "pair", "two scans").await.unwrap();

    let loaded = groups.load_by_name(GroupKind::ScanSet, "pair").await.unwrap();

    assert_eq!(loaded.description, "two scans");
    let mut stored = loaded.scans();
    stored.sort();
    assert_eq!(stored, scans(&[1, 2]));
}
