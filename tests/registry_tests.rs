//! Integration tests for the session registry and build scheduler.

use race_replay::config::Tuning;
use race_replay::session::{
    ArtifactStore, FsArtifactStore, LoadingEvent, SessionKey, SessionRegistry, SessionState,
    SessionType,
};
use race_replay::telemetry::source::StaticSource;
use race_replay::telemetry::types::{DriverLaps, LapSamples, RawSession};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

fn simple_session(seconds: usize) -> RawSession {
    let n = seconds + 1;
    let t: Vec<f64> = (0..n).map(|i| i as f64).collect();
    let distance: Vec<f64> = (0..n).map(|i| i as f64 * 55.0).collect();
    RawSession {
        drivers: vec![DriverLaps {
            code: "VER".to_string(),
            laps: vec![LapSamples {
                lap_number: 1,
                x: vec![0.0; n],
                y: vec![0.0; n],
                distance,
                speed: vec![55.0; n],
                throttle: vec![1.0; n],
                brake: vec![0.0; n],
                gear: vec![7.0; n],
                drs: vec![1.0; n],
                rpm: vec![11_500.0; n],
                tyre: vec![3.0; n],
                t,
            }],
        }],
        meta: Default::default(),
    }
}

fn registry_for(key: &SessionKey, raw: RawSession) -> Arc<SessionRegistry> {
    let source = StaticSource::new();
    source.insert(key.clone(), raw);
    SessionRegistry::new(Arc::new(source), None, Tuning::default())
}

async fn wait_ready(registry: &Arc<SessionRegistry>, key: &SessionKey) {
    let record = registry.get(key).expect("record exists");
    for _ in 0..500 {
        if record.state().is_terminal() {
            assert_eq!(record.state(), SessionState::Ready);
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("session never became ready");
}

/// Drain a subscriber until its terminal event; returns (progress values,
/// complete count, error count).
async fn drain(
    mut rx: tokio::sync::mpsc::UnboundedReceiver<LoadingEvent>,
) -> (Vec<u8>, usize, usize) {
    let mut progresses = Vec::new();
    let mut completes = 0;
    let mut errors = 0;

    while let Ok(Some(event)) =
        tokio::time::timeout(Duration::from_secs(10), rx.recv()).await
    {
        match event {
            LoadingEvent::Progress { progress, .. } => progresses.push(progress),
            LoadingEvent::Complete { .. } => completes += 1,
            LoadingEvent::Error { .. } => errors += 1,
        }
    }

    (progresses, completes, errors)
}

#[tokio::test]
async fn test_concurrent_opens_run_exactly_one_build() {
    let key = SessionKey::new(2024, 5, SessionType::Race);
    let registry = registry_for(&key, simple_session(30));

    // Two create requests race for the same key.
    let (a, b) = tokio::join!(
        {
            let registry = registry.clone();
            let key = key.clone();
            tokio::spawn(async move { registry.open(key) })
        },
        {
            let registry = registry.clone();
            let key = key.clone();
            tokio::spawn(async move { registry.open(key) })
        },
    );
    let (a, b) = (a.unwrap(), b.unwrap());
    assert!(Arc::ptr_eq(&a, &b), "both requests share one record");

    wait_ready(&registry, &key).await;
    assert_eq!(registry.builds_started(&key), 1);
}

#[tokio::test]
async fn test_both_subscribers_see_one_complete_and_no_error() {
    let key = SessionKey::new(2024, 5, SessionType::Race);
    let registry = registry_for(&key, simple_session(30));

    let record = registry.open(key.clone());
    let rx_a = record.subscribe(Uuid::new_v4());
    let rx_b = record.subscribe(Uuid::new_v4());

    let (progress_a, completes_a, errors_a) = drain(rx_a).await;
    let (progress_b, completes_b, errors_b) = drain(rx_b).await;

    for progresses in [&progress_a, &progress_b] {
        assert!(!progresses.is_empty());
        assert!(progresses.windows(2).all(|w| w[0] <= w[1]));
        assert_eq!(*progresses.last().unwrap(), 100);
    }
    assert_eq!((completes_a, errors_a), (1, 0));
    assert_eq!((completes_b, errors_b), (1, 0));
}

#[tokio::test]
async fn test_integrity_failure_broadcasts_single_error() {
    let key = SessionKey::new(2023, 10, SessionType::Race);
    let mut raw = simple_session(30);
    // Non-monotonic timestamp makes the build fatal.
    raw.drivers[0].laps[0].t[10] = 0.5;
    let registry = registry_for(&key, raw);

    let record = registry.open(key.clone());
    let rx = record.subscribe(Uuid::new_v4());

    let (_, completes, errors) = drain(rx).await;
    assert_eq!(completes, 0);
    assert_eq!(errors, 1);
    assert_eq!(record.state(), SessionState::Error);

    // A later attach immediately receives the same terminal error.
    let (progresses, completes, errors) = drain(record.subscribe(Uuid::new_v4())).await;
    assert!(progresses.is_empty());
    assert_eq!((completes, errors), (0, 1));
}

#[tokio::test]
async fn test_late_joiner_gets_synthesized_tail() {
    let key = SessionKey::new(2024, 5, SessionType::Race);
    let registry = registry_for(&key, simple_session(30));
    registry.open(key.clone());
    wait_ready(&registry, &key).await;

    let record = registry.get(&key).unwrap();
    let (progresses, completes, errors) = drain(record.subscribe(Uuid::new_v4())).await;

    // Exactly the synthetic progress(100) followed by the completion.
    assert_eq!(progresses, vec![100]);
    assert_eq!((completes, errors), (1, 0));
}

#[tokio::test]
async fn test_persisted_artifact_short_circuits_build() {
    let key = SessionKey::new(2023, 7, SessionType::Sprint);
    let dir = tempfile::tempdir().unwrap();

    // First process: build from the source and persist.
    {
        let source = StaticSource::new();
        source.insert(key.clone(), simple_session(30));
        let store: Arc<dyn ArtifactStore> = Arc::new(FsArtifactStore::new(dir.path()));
        let registry =
            SessionRegistry::new(Arc::new(source), Some(store), Tuning::default());
        registry.open(key.clone());
        wait_ready(&registry, &key).await;
    }

    // Second process: empty source, so only the store can satisfy the build.
    let store: Arc<dyn ArtifactStore> = Arc::new(FsArtifactStore::new(dir.path()));
    let registry = SessionRegistry::new(
        Arc::new(StaticSource::new()),
        Some(store),
        Tuning::default(),
    );
    let record = registry.open(key.clone());
    let rx = record.subscribe(Uuid::new_v4());

    let (progresses, completes, errors) = drain(rx).await;
    assert_eq!((completes, errors), (1, 0));

    // Even a cache hit emits progress before completion, walking the
    // milestones monotonically.
    assert!(!progresses.is_empty());
    assert!(progresses.windows(2).all(|w| w[0] <= w[1]));
    assert!(progresses.contains(&10));
    assert_eq!(*progresses.last().unwrap(), 100);

    assert_eq!(record.state(), SessionState::Ready);
    assert_eq!(record.artifact().unwrap().total_frames(), 750);
}

#[tokio::test]
async fn test_distinct_keys_build_independently() {
    let key_a = SessionKey::new(2023, 1, SessionType::Race);
    let key_b = SessionKey::new(2023, 1, SessionType::Qualifying);

    let source = StaticSource::new();
    source.insert(key_a.clone(), simple_session(20));
    source.insert(key_b.clone(), simple_session(40));
    let registry = SessionRegistry::new(Arc::new(source), None, Tuning::default());

    registry.open(key_a.clone());
    registry.open(key_b.clone());
    wait_ready(&registry, &key_a).await;
    wait_ready(&registry, &key_b).await;

    assert_eq!(registry.builds_started(&key_a), 1);
    assert_eq!(registry.builds_started(&key_b), 1);
    assert_eq!(registry.summaries().len(), 2);
}
