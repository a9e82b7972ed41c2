use chrono::{DateTime, Duration, TimeZone, Utc};
use serde_json::json;
use tempfile::tempdir;

use mirror::chores::{ErrorKind, ProposalKind};
use mirror::config::HouseConfig;
use mirror::core::storage::Storage;
use mirror::core::utils::{month_start, next_month_start};
use mirror::Mirror;

const HOUSE: &str = "H1";
const RESIDENTS: [&str; 4] = ["R1", "R2", "R3", "R4"];

fn at(month: u32, day: u32, hour: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, month, day, hour, 0, 0).unwrap()
}

fn approx(a: f64, b: f64) -> bool {
    (a - b).abs() < 1e-6
}

// Every resident shows up at the start of June
async fn setup_house() -> Mirror {
    let mirror = Mirror::in_memory(HouseConfig::default());
    for resident in RESIDENTS {
        mirror.on_resident_activity(HOUSE, resident, at(6, 1, 0)).await.unwrap();
    }
    mirror
}

#[tokio::test]
async fn test_month_of_chores() {
    let mirror = setup_house().await;
    let chores = mirror.chores();

    let dishes = chores.add_chore(HOUSE, "dishes", json!({})).await.unwrap();
    chores.add_chore(HOUSE, "sweeping", json!({})).await.unwrap();

    // One day of value spread over both chores
    let report = mirror.on_resident_activity(HOUSE, "R1", at(6, 2, 0)).await.unwrap();
    assert_eq!(report.new_values.len(), 2);
    let credited: f64 = report.new_values.iter().map(|v| v.value).sum();
    assert!(approx(credited, 400.0 * 24.0 / 720.0));

    let claim = chores.claim_chore(HOUSE, dishes.id, "R1", at(6, 2, 0)).await.unwrap();
    let expected = chores.get_chore_value(HOUSE, dishes.id, at(6, 1, 0), at(6, 2, 0)).await.unwrap();
    assert!(expected > 0.0);
    assert!(approx(claim.value, expected));

    mirror.polls().submit_vote(claim.poll_id, "R1", at(6, 2, 1), Some(true)).await.unwrap();
    mirror.polls().submit_vote(claim.poll_id, "R2", at(6, 2, 1), Some(true)).await.unwrap();

    // Nothing to settle while the poll is open
    let report = mirror.on_resident_activity(HOUSE, "R3", at(6, 3, 0)).await.unwrap();
    assert!(report.resolved_claims.is_empty());

    let report = mirror.on_resident_activity(HOUSE, "R3", at(6, 4, 1)).await.unwrap();
    assert_eq!(report.resolved_claims.len(), 1);
    let resolved = &report.resolved_claims[0];
    assert!(resolved.valid);
    assert!(approx(resolved.value, expected));

    // The claim reset the chore
    let values = chores.get_current_chore_values(HOUSE, at(6, 2, 0)).await.unwrap();
    let dishes_now = values.iter().find(|v| v.chore_id == dishes.id).unwrap();
    assert!(approx(dishes_now.value, 0.0));

    let summary = chores
        .get_points_summary(HOUSE, "R1", month_start(at(6, 15, 0)), next_month_start(at(6, 15, 0)))
        .await
        .unwrap();
    assert!(approx(summary.claimed, expected));
    assert!(approx(summary.balance, expected));
}

#[tokio::test]
async fn test_proposal_changes_chore_list() {
    let mirror = setup_house().await;
    let chores = mirror.chores();

    let proposal = chores
        .create_add_chore_proposal(HOUSE, "R2", "laundry", json!({ "description": "Wash towels" }), at(6, 2, 0))
        .await
        .unwrap();
    assert_eq!(proposal.kind(), ProposalKind::Add);

    mirror.polls().submit_vote(proposal.poll_id, "R2", at(6, 2, 1), Some(true)).await.unwrap();
    mirror.polls().submit_vote(proposal.poll_id, "R3", at(6, 2, 1), Some(true)).await.unwrap();

    let report = mirror.on_resident_activity(HOUSE, "R1", at(6, 4, 1)).await.unwrap();
    assert_eq!(report.resolved_proposals.len(), 1);
    assert!(report.resolved_proposals[0].valid);

    let list = chores.get_chores(HOUSE).await.unwrap();
    assert_eq!(list.len(), 1);
    assert_eq!(list[0].name, "laundry");
    assert_eq!(list[0].metadata["description"], "Wash towels");

    // Adding an existing name overwrites that chore
    let again = chores.add_chore(HOUSE, "laundry", json!({})).await.unwrap();
    assert_eq!(again.id, list[0].id);
    assert_eq!(chores.get_chores(HOUSE).await.unwrap().len(), 1);

    let err = chores
        .create_delete_chore_proposal(HOUSE, "R1", 999, at(6, 5, 0))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
}

#[tokio::test]
async fn test_penalty_assessed_once() {
    let mirror = setup_house().await;

    // Too early in July
    let report = mirror.on_resident_activity(HOUSE, "R4", at(7, 2, 0)).await.unwrap();
    assert!(report.penalty.is_none());

    // R4 earned nothing in June and owes the full 100 points
    let report = mirror.on_resident_activity(HOUSE, "R4", at(7, 4, 1)).await.unwrap();
    let penalty = report.penalty.unwrap();
    assert!(approx(penalty.value, -5.0));
    assert!(approx(mirror.hearts().get_hearts(HOUSE, "R4", at(7, 4, 1)).await.unwrap(), 0.0));

    let report = mirror.on_resident_activity(HOUSE, "R4", at(7, 5, 0)).await.unwrap();
    assert!(report.penalty.is_none());
    assert!(approx(mirror.hearts().get_hearts(HOUSE, "R4", at(7, 5, 0)).await.unwrap(), 0.0));

    // Others are assessed on their own activity
    assert!(approx(mirror.hearts().get_hearts(HOUSE, "R3", at(7, 5, 0)).await.unwrap(), 5.0));
}

#[tokio::test]
async fn test_concurrent_activity_credits_once() {
    let mirror = setup_house().await;
    mirror.chores().add_chore(HOUSE, "dishes", json!({})).await.unwrap();

    let now = at(6, 1, 0) + Duration::hours(10);
    let (a, b) = tokio::join!(
        mirror.on_resident_activity(HOUSE, "R1", now),
        mirror.on_resident_activity(HOUSE, "R2", now),
    );
    let written = a.unwrap().new_values.len() + b.unwrap().new_values.len();
    assert_eq!(written, 1);

    let values = mirror.chores().get_current_chore_values(HOUSE, now).await.unwrap();
    assert!(approx(values[0].value, 400.0 * 10.0 / 720.0));
}

#[tokio::test]
async fn test_sled_deployment_persists() {
    let dir = tempdir().unwrap();
    let now = at(6, 1, 0);

    {
        let mirror = Mirror::open(dir.path(), HouseConfig::default()).unwrap();
        mirror.on_resident_activity(HOUSE, "R1", now).await.unwrap();
        mirror.chores().add_chore(HOUSE, "dishes", json!({})).await.unwrap();
        mirror.storage().flush().await.unwrap();
    }

    let mirror = Mirror::open(dir.path(), HouseConfig::default()).unwrap();
    assert!(mirror.admin().get_resident(HOUSE, "R1").await.unwrap().active);
    assert_eq!(mirror.chores().get_chores(HOUSE).await.unwrap().len(), 1);
    assert!(approx(mirror.hearts().get_hearts(HOUSE, "R1", now).await.unwrap(), 5.0));
}
