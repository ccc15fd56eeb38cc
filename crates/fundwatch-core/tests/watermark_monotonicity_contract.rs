//! Contract: Watermark Monotonicity
//!
//! The donation and donation-match watermarks only ever move forward, are
//! persisted after each successful batch, and are left untouched by a poll
//! that fails before its events are emitted.

mod common;

use common::*;
use fundwatch_core::reconciler::CampaignReconciler;
use fundwatch_core::state::StatePaths;
use fundwatch_core::traits::StateStore;
use serde_json::Value;

#[tokio::test]
async fn test_donation_watermark_advances_and_is_persisted() {
    let h = Harness::new();
    let paths = StatePaths::new(CAMPAIGN_ID);

    let mut reconciler = CampaignReconciler::bootstrap_at(h.context(), CAMPAIGN_ID, settings(), at(1_000))
        .await
        .unwrap();
    assert_eq!(
        h.store.get(&paths.last_donation_date()).await.unwrap(),
        Some(serde_json::to_value(at(1_000)).unwrap())
    );

    h.service.push_donation(donation("d1", 1.0, at(1_030)));
    h.service.push_donation(donation("d2", 1.0, at(1_010)));
    reconciler.poll_at(at(1_040)).await.unwrap();

    assert_eq!(reconciler.state().last_donation_date(), Some(at(1_030)));
    assert_eq!(
        h.store.get(&paths.last_donation_date()).await.unwrap(),
        Some(serde_json::to_value(at(1_030)).unwrap())
    );
    assert_eq!(
        h.store.get(&paths.donation_ids()).await.unwrap(),
        Some(serde_json::json!(["d2", "d1"]))
    );
}

#[tokio::test]
async fn test_older_unseen_donation_does_not_move_watermark_back() {
    let h = Harness::new();
    h.service.ignore_donation_filter();

    let mut reconciler = CampaignReconciler::bootstrap_at(h.context(), CAMPAIGN_ID, settings(), at(1_000))
        .await
        .unwrap();

    h.service.push_donation(donation("d1", 1.0, at(1_030)));
    reconciler.poll_at(at(1_040)).await.unwrap();

    h.service.push_donation(donation("straggler", 1.0, at(1_020)));
    reconciler.poll_at(at(1_050)).await.unwrap();

    assert_eq!(h.sink.donation_ids(), vec!["d1", "straggler"]);
    assert_eq!(reconciler.state().last_donation_date(), Some(at(1_030)));
}

#[tokio::test]
async fn test_failed_poll_leaves_watermark_and_replays_batch() {
    let h = Harness::new();
    let mut reconciler = CampaignReconciler::bootstrap_at(h.context(), CAMPAIGN_ID, settings(), at(1_000))
        .await
        .unwrap();

    h.service.push_donation(donation("d1", 1.0, at(1_010)));

    // Donations arrive but the campaign refresh that follows fails
    h.service.fail_once(Endpoint::Campaign, 503);
    let err = reconciler.poll_at(at(1_010)).await.unwrap_err();
    assert_eq!(err.status(), Some(503));
    assert!(h.sink.events().is_empty());
    assert_eq!(reconciler.state().last_donation_date(), Some(at(1_000)));

    reconciler.poll_at(at(1_020)).await.unwrap();
    assert_eq!(h.sink.donation_ids(), vec!["d1"]);
    assert_eq!(reconciler.state().last_donation_date(), Some(at(1_010)));
}

#[tokio::test]
async fn test_stored_null_watermark_falls_back_to_bootstrap_time() {
    let h = Harness::new();
    let paths = StatePaths::new(CAMPAIGN_ID);
    h.store.set(&paths.last_donation_date(), Value::Null).await.unwrap();
    h.store
        .set(&paths.last_donation_match_update(), Value::Null)
        .await
        .unwrap();

    let reconciler = CampaignReconciler::bootstrap_at(h.context(), CAMPAIGN_ID, settings(), at(1_000))
        .await
        .unwrap();

    assert_eq!(reconciler.state().last_donation_date(), Some(at(1_000)));
    assert_eq!(reconciler.state().last_donation_match_update(), None);
}

#[tokio::test]
async fn test_match_watermark_tracks_latest_update() {
    let h = Harness::new();
    h.service.push_donation_match(active_match("m1", 50.0, at(950)));
    h.service.push_donation_match(active_match("m2", 50.0, at(900)));

    let mut reconciler = CampaignReconciler::bootstrap_at(h.context(), CAMPAIGN_ID, settings(), at(1_000))
        .await
        .unwrap();
    assert_eq!(reconciler.state().last_donation_match_update(), Some(at(950)));

    let mut ended = active_match("m2", 50.0, at(900));
    ended.active = false;
    ended.updated_at = at(1_020);
    ended.completed_at = Some(at(1_020));
    h.service.push_donation_match(ended);

    // Match sync runs once every four polling intervals
    reconciler.poll_at(at(1_030)).await.unwrap();
    assert_eq!(reconciler.state().last_donation_match_update(), Some(at(950)));

    reconciler.poll_at(at(1_040)).await.unwrap();
    assert_eq!(reconciler.state().last_donation_match_update(), Some(at(1_020)));

    let stored = h
        .store
        .get(&StatePaths::new(CAMPAIGN_ID).last_donation_match_update())
        .await
        .unwrap();
    assert_eq!(stored, Some(serde_json::to_value(at(1_020)).unwrap()));
}

#[tokio::test]
async fn test_progress_of_failed_batch_is_saved_by_next_poll() {
    let h = Harness::new();
    let paths = StatePaths::new(CAMPAIGN_ID);
    let mut reconciler = CampaignReconciler::bootstrap_at(h.context(), CAMPAIGN_ID, settings(), at(1_000))
        .await
        .unwrap();

    h.service.push_donation(donation("d1", 1.0, at(1_010)));
    h.service
        .push_donation(with_claim(donation("d2", 1.0, at(1_020)), "unknown", 1));
    h.service.fail_once(Endpoint::Rewards, 503);

    // d1 is delivered, then the reward reload for d2 fails
    let err = reconciler.poll_at(at(1_030)).await.unwrap_err();
    assert_eq!(err.status(), Some(503));
    assert_eq!(h.sink.donation_ids(), vec!["d1"]);
    assert_eq!(
        h.store.get(&paths.last_donation_date()).await.unwrap(),
        Some(serde_json::to_value(at(1_000)).unwrap())
    );

    // Nothing new on the next poll, d1 is still saved
    h.service.remove_donation("d2");
    reconciler.poll_at(at(1_040)).await.unwrap();
    assert_eq!(
        h.store.get(&paths.last_donation_date()).await.unwrap(),
        Some(serde_json::to_value(at(1_010)).unwrap())
    );
    assert_eq!(
        h.store.get(&paths.donation_ids()).await.unwrap(),
        Some(serde_json::json!(["d1"]))
    );
}
