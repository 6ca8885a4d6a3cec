//! Outgoing Call Handler tests (§4.H, §4.F "Answer polling", §4.D).
//!
//! Requires the `sim` feature.

mod common;

use std::time::Duration;

use famcall_engine::common::{CallState, ProfileId, Role};
use famcall_engine::polling::POLL_INTERVAL;
use famcall_engine::row::{CallPatch, RowStore};
use famcall_engine::sim::row_store::SubscribeBehavior;

#[tokio::test]
async fn start_outgoing_call_requires_idle_state() {
    common::test_init();
    let backend = common::shared_backend(SubscribeBehavior::ConfirmImmediately);
    let mut parent = common::parent(backend.clone(), "parent-1");

    parent
        .engine
        .start_outgoing_call(ProfileId::from("child-1"), Role::Child, None)
        .await
        .unwrap();
    assert_eq!(parent.engine.state(), CallState::Calling);

    let second = parent
        .engine
        .start_outgoing_call(ProfileId::from("child-2"), Role::Child, None)
        .await;
    assert!(second.is_err());
}

#[tokio::test]
async fn media_busy_proceeds_without_local_tracks() {
    common::test_init();
    let backend = common::shared_backend(SubscribeBehavior::ConfirmImmediately);
    let mut parent = common::parent(backend.clone(), "parent-1");
    parent.env.media_provider().set_busy(true);

    parent
        .engine
        .start_outgoing_call(ProfileId::from("child-1"), Role::Child, None)
        .await
        .unwrap();

    assert_eq!(parent.engine.state(), CallState::Calling);
    let row = backend.row(parent.engine.call_id().unwrap()).unwrap();
    assert!(row.offer.is_some());
    assert_eq!(parent.env.last_connection().add_track_call_count(), 0);
    assert!(!parent.env.last_connection().has_senders());
}

#[tokio::test]
async fn successful_media_acquisition_attaches_a_track_before_the_offer_is_created() {
    common::test_init();
    let backend = common::shared_backend(SubscribeBehavior::ConfirmImmediately);
    let mut parent = common::parent(backend.clone(), "parent-1");

    parent
        .engine
        .start_outgoing_call(ProfileId::from("child-1"), Role::Child, None)
        .await
        .unwrap();

    let pc = parent.env.last_connection();
    assert_eq!(pc.add_track_call_count(), 1);
    assert!(pc.has_senders());
}

#[tokio::test(start_paused = true)]
async fn answer_poll_recovers_when_realtime_drops_answer_column_and_reapplication_is_idempotent() {
    common::test_init();
    let backend = common::shared_backend(SubscribeBehavior::NeverConfirm);
    let mut parent = common::parent(backend.clone(), "parent-1");
    let mut child = common::child(backend.clone(), "child-1");

    parent
        .engine
        .start_outgoing_call(ProfileId::from("child-1"), Role::Child, None)
        .await
        .unwrap();

    assert!(child.engine.run_once().await);
    let call_id = child.engine.call_id().unwrap();

    // §8 scenario 3: the per-call UPDATE event that carries the answer
    // arrives with that column silently stripped.
    backend.drop_answer_from_next_broadcast(call_id);
    child.engine.accept_incoming_call(call_id).await.unwrap();
    child.engine.drain_events().await;

    tokio::time::advance(Duration::from_millis(50)).await;
    parent.engine.drain_events().await;
    // The status-only half of the payload still arrives, so the state
    // machine advances even though the SDP has not been applied yet.
    assert_eq!(parent.engine.state(), CallState::Connecting);
    assert_eq!(
        parent.env.last_connection().set_remote_description_call_count(),
        0
    );

    // The next answer-poll tick fetches the full row directly (bypassing
    // whatever realtime dropped) and recovers.
    tokio::time::advance(POLL_INTERVAL + Duration::from_millis(10)).await;
    assert!(parent.engine.run_once().await);
    assert_eq!(
        parent.env.last_connection().set_remote_description_call_count(),
        1
    );

    // A second, independent delivery of the same answer (e.g. a stale
    // realtime replay) must not re-apply it.
    let row = backend.row(call_id).unwrap();
    backend
        .update(call_id, CallPatch::answered(row.answer.clone().unwrap()))
        .await
        .unwrap();
    assert!(parent.engine.run_once().await);
    assert_eq!(
        parent.env.last_connection().set_remote_description_call_count(),
        1
    );
}

#[tokio::test]
async fn caller_observes_rejected_status_over_realtime_and_ends_the_call() {
    common::test_init();
    let backend = common::shared_backend(SubscribeBehavior::ConfirmImmediately);
    let mut parent = common::parent(backend.clone(), "parent-1");

    parent
        .engine
        .start_outgoing_call(ProfileId::from("child-1"), Role::Child, None)
        .await
        .unwrap();
    let call_id = parent.engine.call_id().unwrap();

    backend
        .update(call_id, CallPatch::status(famcall_engine::row::CallStatus::Rejected))
        .await
        .unwrap();
    assert!(parent.engine.run_once().await);
    assert_eq!(parent.engine.state(), CallState::Ended);
}
