//! Cross-cutting end-to-end scenarios (§8): role-asymmetric ICE routing,
//! ICE-candidate dedupe, transient ICE disconnects, and simultaneous hangup.
//!
//! Requires the `sim` feature.

mod common;

use famcall_engine::common::{CallState, ProfileId, Role};
use famcall_engine::row::{CallStatus, IceCandidateRecord};
use famcall_engine::rtc::{IceConnectionState, PeerConnectionState};
use famcall_engine::sim::row_store::SubscribeBehavior;

fn candidate(tag: &str) -> IceCandidateRecord {
    IceCandidateRecord {
        candidate: format!("candidate:1 1 UDP 2122260223 10.0.0.{tag} 12345 typ host"),
        sdp_mline_index: 0,
        sdp_mid: Some("0".into()),
    }
}

#[tokio::test]
async fn family_member_ice_candidates_land_on_the_shared_parent_ice_field() {
    common::test_init();
    let backend = common::shared_backend(SubscribeBehavior::ConfirmImmediately);
    let mut family_member = common::family_member(backend.clone(), "aunt-1");
    let mut child = common::child(backend.clone(), "child-1");

    family_member
        .engine
        .start_outgoing_call(
            ProfileId::from("child-1"),
            Role::Child,
            Some(ProfileId::from("parent-1")),
        )
        .await
        .unwrap();
    assert!(child.engine.run_once().await);
    let call_id = child.engine.call_id().unwrap();
    child.engine.accept_incoming_call(call_id).await.unwrap();
    child.engine.drain_events().await;
    assert!(family_member.engine.run_once().await);
    assert_eq!(family_member.engine.state(), CallState::Connecting);

    let row = backend.row(call_id).unwrap();
    assert_eq!(row.parent_id, Some(ProfileId::from("parent-1")));
    assert_eq!(row.family_member_id, Some(ProfileId::from("aunt-1")));

    family_member
        .env
        .last_connection()
        .fire_local_candidate(candidate("5"));
    family_member.engine.drain_events().await;

    let row = backend.row(call_id).unwrap();
    assert_eq!(row.parent_ice_candidates.len(), 1);
    assert!(row.child_ice_candidates.is_empty());

    assert!(child.engine.run_once().await);
    assert_eq!(child.env.last_connection().add_ice_candidate_call_count(), 1);
}

#[tokio::test]
async fn duplicate_ice_candidate_delivered_repeatedly_is_applied_exactly_once() {
    common::test_init();
    let backend = common::shared_backend(SubscribeBehavior::ConfirmImmediately);
    let mut parent = common::parent(backend.clone(), "parent-1");
    let mut child = common::child(backend.clone(), "child-1");

    parent
        .engine
        .start_outgoing_call(ProfileId::from("child-1"), Role::Child, None)
        .await
        .unwrap();
    assert!(child.engine.run_once().await);
    let call_id = child.engine.call_id().unwrap();
    child.engine.accept_incoming_call(call_id).await.unwrap();
    child.engine.drain_events().await;
    assert!(parent.engine.run_once().await);

    let c = candidate("9");
    for _ in 0..3 {
        parent.env.last_connection().fire_local_candidate(c.clone());
        parent.engine.drain_events().await;
        assert!(child.engine.run_once().await);
    }

    assert_eq!(
        backend.row(call_id).unwrap().parent_ice_candidates.len(),
        3,
        "the row itself accumulates every local append"
    );
    assert_eq!(
        child.env.last_connection().add_ice_candidate_call_count(),
        1,
        "the remote side's ICE exchange dedupes repeated deliveries of the same candidate"
    );
}

#[tokio::test]
async fn transient_ice_disconnect_does_not_end_the_call() {
    common::test_init();
    let backend = common::shared_backend(SubscribeBehavior::ConfirmImmediately);
    let mut parent = common::parent(backend.clone(), "parent-1");
    let mut child = common::child(backend.clone(), "child-1");

    parent
        .engine
        .start_outgoing_call(ProfileId::from("child-1"), Role::Child, None)
        .await
        .unwrap();
    assert!(child.engine.run_once().await);
    let call_id = child.engine.call_id().unwrap();
    child.engine.accept_incoming_call(call_id).await.unwrap();
    child.engine.drain_events().await;
    assert!(parent.engine.run_once().await);

    parent.env.last_connection().fire_connection_state(PeerConnectionState::Connected);
    assert!(parent.engine.run_once().await);
    assert_eq!(parent.engine.state(), CallState::InCall);

    parent
        .env
        .last_connection()
        .fire_ice_connection_state(IceConnectionState::Disconnected);
    assert!(parent.engine.run_once().await);
    assert_eq!(parent.engine.state(), CallState::InCall);
}

#[tokio::test]
async fn simultaneous_hangup_is_terminal_on_both_sides_with_last_writer_wins_attribution() {
    common::test_init();
    let backend = common::shared_backend(SubscribeBehavior::ConfirmImmediately);
    let mut parent = common::parent(backend.clone(), "parent-1");
    let mut child = common::child(backend.clone(), "child-1");

    parent
        .engine
        .start_outgoing_call(ProfileId::from("child-1"), Role::Child, None)
        .await
        .unwrap();
    assert!(child.engine.run_once().await);
    let call_id = child.engine.call_id().unwrap();
    child.engine.accept_incoming_call(call_id).await.unwrap();
    child.engine.drain_events().await;
    assert!(parent.engine.run_once().await);

    parent.env.last_connection().fire_connection_state(PeerConnectionState::Connected);
    assert!(parent.engine.run_once().await);
    child.env.last_connection().fire_connection_state(PeerConnectionState::Connected);
    assert!(child.engine.run_once().await);
    assert_eq!(parent.engine.state(), CallState::InCall);
    assert_eq!(child.engine.state(), CallState::InCall);

    // Neither side has observed the other's write yet: both hang up locally
    // "at the same time".
    parent.engine.end_call().await;
    child.engine.end_call().await;

    assert_eq!(parent.engine.state(), CallState::Ended);
    assert_eq!(child.engine.state(), CallState::Ended);

    let row = backend.row(call_id).unwrap();
    assert_eq!(row.status, CallStatus::Ended);
    // Last writer wins: child's update ran after parent's in this ordering.
    assert_eq!(row.ended_by, Some(Role::Child));
}

#[tokio::test]
async fn force_cleanup_on_unmount_releases_resources_without_touching_the_row() {
    common::test_init();
    let backend = common::shared_backend(SubscribeBehavior::ConfirmImmediately);
    let mut parent = common::parent(backend.clone(), "parent-1");
    let mut child = common::child(backend.clone(), "child-1");

    parent
        .engine
        .start_outgoing_call(ProfileId::from("child-1"), Role::Child, None)
        .await
        .unwrap();
    assert!(child.engine.run_once().await);
    let call_id = child.engine.call_id().unwrap();
    child.engine.accept_incoming_call(call_id).await.unwrap();
    child.engine.drain_events().await;
    assert!(parent.engine.run_once().await);
    parent.env.last_connection().fire_connection_state(PeerConnectionState::Connected);
    assert!(parent.engine.run_once().await);
    assert_eq!(parent.engine.state(), CallState::InCall);

    parent.engine.force_cleanup_on_unmount();

    assert_eq!(parent.engine.state(), CallState::InCall);
    assert_eq!(backend.row(call_id).unwrap().status, CallStatus::Active);
}
