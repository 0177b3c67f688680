mod common;

use std::time::Duration;

use common::{FakeBackend, eventually, fast_session};
use garden_core::garden_coordination::{
    ConnectivityStatus, IntentEvent, LocalIntent, Occupancy, PartyId, Rejection,
    models::now_millis,
};
use tokio::sync::broadcast;

const SETTLE: Duration = Duration::from_secs(3);

async fn next_event(
    rx: &mut broadcast::Receiver<IntentEvent>,
    want: impl Fn(&IntentEvent) -> bool,
) -> IntentEvent {
    tokio::time::timeout(SETTLE, async {
        loop {
            let event = rx.recv().await.unwrap();
            if want(&event) {
                return event;
            }
        }
    })
    .await
    .unwrap()
}

#[tokio::test]
async fn test_claim_is_confirmed_and_seen_by_others() {
    let backend = FakeBackend::start().await;
    backend.set_state("libero", "ermes-ben", now_millis() - 60_000);

    let raya = backend.context("raya", fast_session());
    let ermes = backend.context("ermes-ben", fast_session());
    raya.bootstrap().await.unwrap();
    ermes.bootstrap().await.unwrap();
    assert!(eventually(SETTLE, || raya.view().is_some_and(|v| v.can_claim)).await);

    let coordinator = raya.coordinator().unwrap();
    let mut events = coordinator.subscribe_events();
    coordinator.claim().await.unwrap();
    next_event(&mut events, |e| matches!(e, IntentEvent::Claimed { .. })).await;
    next_event(&mut events, |e| matches!(e, IntentEvent::Confirmed { .. })).await;
    assert_eq!(raya.view().unwrap().intent, LocalIntent::ClaimConfirmed);
    assert!(raya.view().unwrap().can_release);

    assert!(
        eventually(SETTLE, || {
            ermes
                .view()
                .and_then(|v| v.state)
                .is_some_and(|s| s.is_held_by(&PartyId::new("raya")))
        })
        .await
    );
    let ermes_view = ermes.view().unwrap();
    assert!(!ermes_view.can_claim);
    assert_eq!(
        ermes.coordinator().unwrap().claim().await,
        Err(Rejection::HeldByOther {
            holder: PartyId::new("raya")
        })
    );

    let writes = backend.inner.lock().writes.clone();
    assert_eq!(writes.len(), 1);
    assert_eq!(writes[0]["stato"], "occupato");
    assert_eq!(writes[0]["famiglia"], "raya");

    raya.stop().await;
    ermes.stop().await;
}

#[tokio::test]
async fn test_release_frees_the_garden() {
    let backend = FakeBackend::start().await;
    backend.set_state("occupato", "raya", now_millis() - 1_000);

    let raya = backend.context("raya", fast_session());
    raya.bootstrap().await.unwrap();
    assert!(eventually(SETTLE, || raya.view().is_some_and(|v| v.can_release)).await);

    let coordinator = raya.coordinator().unwrap();
    assert!(coordinator.release().await.unwrap());
    let stato = backend.stato().unwrap();
    assert_eq!(stato["stato"], "libero");
    assert_eq!(stato["famiglia"], "raya");

    assert!(
        eventually(SETTLE, || {
            raya.view()
                .and_then(|v| v.state)
                .is_some_and(|s| s.occupancy() == Occupancy::Free)
        })
        .await
    );
    // nothing left to release
    assert!(!coordinator.release().await.unwrap());
    assert_eq!(backend.inner.lock().writes.len(), 1);

    raya.stop().await;
}

#[tokio::test]
async fn test_lost_race_is_superseded() {
    let backend = FakeBackend::start().await;
    backend.set_state("libero", "raya", now_millis() - 60_000);

    let raya = backend.context("raya", fast_session());
    raya.bootstrap().await.unwrap();
    assert!(eventually(SETTLE, || raya.view().is_some_and(|v| v.can_claim)).await);

    let coordinator = raya.coordinator().unwrap();
    let mut events = coordinator.subscribe_events();
    coordinator.claim().await.unwrap();
    // another client's later write lands on top of ours
    backend.set_state("occupato", "ermes-ben", now_millis() + 1_000);

    let event = next_event(&mut events, |e| matches!(e, IntentEvent::Superseded { .. })).await;
    assert_eq!(
        event,
        IntentEvent::Superseded {
            holder: PartyId::new("ermes-ben")
        }
    );
    let view = raya.view().unwrap();
    assert_eq!(view.intent, LocalIntent::Idle);
    assert!(!view.processing);
    assert!(view.state.unwrap().is_held_by(&PartyId::new("ermes-ben")));

    raya.stop().await;
}

#[tokio::test]
async fn test_rejected_write_times_out() {
    let backend = FakeBackend::start().await;
    backend.set_state("libero", "ermes-ben", now_millis() - 60_000);
    backend.inner.lock().reject_writes = true;

    let raya = backend.context("raya", fast_session());
    raya.bootstrap().await.unwrap();
    assert!(eventually(SETTLE, || raya.view().is_some_and(|v| v.can_claim)).await);

    let coordinator = raya.coordinator().unwrap();
    let mut events = coordinator.subscribe_events();
    coordinator.claim().await.unwrap();
    // the failed write leaves the optimistic claim in place until the timer fires
    let view = raya.view().unwrap();
    assert_eq!(view.intent, LocalIntent::ClaimPending);
    assert!(view.processing);
    assert!(view.state.unwrap().is_held_by(&PartyId::new("raya")));
    assert_eq!(backend.inner.lock().writes.len(), 0);

    next_event(&mut events, |e| *e == IntentEvent::TimedOut).await;
    let view = raya.view().unwrap();
    assert_eq!(view.intent, LocalIntent::Idle);
    assert_eq!(view.state.unwrap().occupancy(), Occupancy::Free);
    assert!(view.can_claim);

    raya.stop().await;
}

#[tokio::test]
async fn test_malformed_payload_keeps_last_state() {
    let backend = FakeBackend::start().await;
    backend.set_state("occupato", "ermes-ben", now_millis() - 5_000);

    let raya = backend.context("raya", fast_session());
    raya.bootstrap().await.unwrap();
    assert!(
        eventually(SETTLE, || raya.view().and_then(|v| v.state).is_some()).await
    );

    backend.set_raw(serde_json::json!({ "stato": "boh", "famiglia": "raya" }));
    tokio::time::sleep(Duration::from_millis(300)).await;
    let view = raya.view().unwrap();
    assert_eq!(view.connectivity, ConnectivityStatus::Connected);
    assert!(view.state.unwrap().is_held_by(&PartyId::new("ermes-ben")));

    raya.stop().await;
}

#[tokio::test]
async fn test_bootstrap_waits_for_health() {
    let backend = FakeBackend::start().await;
    backend.set_state("libero", "raya", now_millis());
    backend.inner.lock().healthy = false;

    let raya = backend.context("raya", fast_session());
    let task = {
        let raya = raya.clone();
        tokio::spawn(async move { raya.bootstrap().await })
    };
    assert!(
        eventually(SETTLE, || raya.connectivity().get() == ConnectivityStatus::Connecting).await
    );
    assert!(!raya.is_ready());
    assert!(!raya.has_session());
    // no state reads before the store is healthy
    assert_eq!(backend.inner.lock().reads, 0);

    backend.inner.lock().healthy = true;
    let probes = tokio::time::timeout(SETTLE, task).await.unwrap().unwrap().unwrap();
    assert!(probes >= 2);
    assert!(raya.is_ready());
    assert!(raya.has_session());
    assert_eq!(raya.connectivity().get(), ConnectivityStatus::Connected);

    raya.stop().await;
}

#[tokio::test]
async fn test_empty_store_can_be_seeded() {
    let backend = FakeBackend::start().await;

    let raya = backend.context("raya", fast_session());
    raya.bootstrap().await.unwrap();
    let coordinator = raya.coordinator().unwrap();
    assert_eq!(coordinator.seed().await, Err(Rejection::SeedNotAvailable));

    assert!(eventually(SETTLE, || raya.view().is_some_and(|v| v.seed_available)).await);
    coordinator.seed().await.unwrap();
    let stato = backend.stato().unwrap();
    assert_eq!(stato["stato"], "libero");
    assert_eq!(stato["famiglia"], "raya");

    assert!(
        eventually(SETTLE, || raya.view().is_some_and(|v| v.state.is_some() && v.can_claim)).await
    );

    raya.stop().await;
}

#[tokio::test]
async fn test_observer_never_writes() {
    let backend = FakeBackend::start().await;
    backend.set_state("libero", "raya", now_millis() - 1_000);

    let observer = backend.context("Visualizzatore", fast_session());
    observer.bootstrap().await.unwrap();
    assert!(eventually(SETTLE, || observer.view().and_then(|v| v.state).is_some()).await);

    let view = observer.view().unwrap();
    assert!(view.read_only);
    assert!(!view.can_claim);
    let coordinator = observer.coordinator().unwrap();
    assert!(matches!(coordinator.claim().await, Err(Rejection::ReadOnly(_))));
    assert!(matches!(coordinator.release().await, Err(Rejection::ReadOnly(_))));
    assert!(backend.inner.lock().writes.is_empty());

    observer.stop().await;
}

#[tokio::test]
async fn test_notifications_enable_and_disable() {
    let backend = FakeBackend::start().await;
    backend.set_state("libero", "raya", now_millis());

    let raya = backend.context("raya", fast_session());
    let notifications = raya.notifications();
    assert!(notifications.enable().await.unwrap());
    assert!(raya.client_state().notifications_enabled());
    assert_eq!(
        backend.inner.lock().subscriptions,
        vec!["https://push.example/garden".to_string()]
    );

    notifications.disable().await.unwrap();
    assert!(!raya.client_state().notifications_enabled());
    assert!(backend.inner.lock().subscriptions.is_empty());
}

#[tokio::test]
async fn test_notifications_without_push_endpoint_are_denied() {
    let backend = FakeBackend::start().await;
    let raya = backend.context_with_push("raya", fast_session(), None);
    assert!(!raya.notifications().enable().await.unwrap());
    assert!(!raya.client_state().notifications_enabled());
    assert!(backend.inner.lock().subscriptions.is_empty());
}

#[tokio::test]
async fn test_stopped_context_stops_polling() {
    let backend = FakeBackend::start().await;
    backend.set_state("libero", "raya", now_millis() - 1_000);

    let raya = backend.context("raya", fast_session());
    raya.bootstrap().await.unwrap();
    assert!(eventually(SETTLE, || raya.view().and_then(|v| v.state).is_some()).await);
    raya.stop().await;
    assert!(!raya.has_session());

    // later changes are not observed by anything
    backend.set_state("occupato", "ermes-ben", now_millis());
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(raya.view().is_none());
}
