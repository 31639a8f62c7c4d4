//! Environment registry and lifecycle integration tests.

use std::collections::HashSet;
use std::sync::atomic::Ordering;

use chrono::{Duration, Utc};

mod common;
use common::{seed_course, test_app};

use peach::environment::{
    Actor, EnvironmentError, EnvironmentStatus, ReapReport, ReaperConfig,
};
use peach::pod::{DEFAULT_NAME_PREFIX, PodError, derive_pod_name};

fn reaper_config() -> ReaperConfig {
    ReaperConfig {
        enabled: true,
        idle_timeout_minutes: 30,
        reclaim_after_minutes: 60,
        check_interval_seconds: 60,
    }
}

#[tokio::test]
async fn test_concurrent_first_access_creates_one_environment() {
    let app = test_app().await;
    seed_course(&app.courses, "C1", "A1", false, &[("hello.py", "", b"print(1)")]).await;

    let mut handles = Vec::new();
    for _ in 0..8 {
        let service = app.service.clone();
        handles.push(tokio::spawn(async move {
            service.resolve_or_create("C1", "A1", "u1").await
        }));
    }

    let mut ids = HashSet::new();
    let mut created = 0;
    for handle in handles {
        let resolution = handle.await.unwrap().unwrap();
        if resolution.created {
            created += 1;
        }
        assert_eq!(resolution.environment.status, EnvironmentStatus::Ready);
        ids.insert(resolution.environment.environment_id);
    }

    assert_eq!(ids.len(), 1);
    assert_eq!(created, 1);
    assert_eq!(app.orchestrator.pod_creates(), 1);
}

#[tokio::test]
async fn test_address_is_derived_pod_name() {
    let app = test_app().await;
    seed_course(&app.courses, "C1", "A1", false, &[]).await;

    let resolution = app.service.resolve_or_create("C1", "A1", "u1").await.unwrap();
    let environment = resolution.environment;

    assert_eq!(
        environment.internal_address.as_deref(),
        Some(derive_pod_name(DEFAULT_NAME_PREFIX, &environment.environment_id).as_str())
    );
    assert!(environment.is_running);
}

#[tokio::test]
async fn test_group_required_is_reported() {
    let app = test_app().await;
    seed_course(&app.courses, "C2", "A2", true, &[]).await;

    let err = app
        .service
        .resolve_or_create("C2", "A2", "u1")
        .await
        .unwrap_err();
    assert!(matches!(err, EnvironmentError::GroupRequired { .. }));
}

#[tokio::test]
async fn test_reaper_idles_then_reclaims_and_resolve_restores() {
    let app = test_app().await;
    seed_course(&app.courses, "C1", "A1", false, &[("hello.py", "", b"print(1)")]).await;
    let config = reaper_config();

    let environment = app
        .service
        .resolve_or_create("C1", "A1", "u1")
        .await
        .unwrap()
        .environment;
    let id = environment.environment_id.clone();
    let pod = derive_pod_name(DEFAULT_NAME_PREFIX, &id);
    let seeded = app.data_dir.path().join(&id).join("hello.py");
    std::fs::write(&seeded, b"print('mine')").unwrap();

    // Nothing happens while the environment is fresh.
    let report = app.service.reap_idle(Utc::now(), &config).await.unwrap();
    assert_eq!(report, ReapReport::default());

    let report = app
        .service
        .reap_idle(Utc::now() + Duration::minutes(31), &config)
        .await
        .unwrap();
    assert_eq!(report.idled, 1);
    assert_eq!(app.service.get(&id).await.unwrap().status, EnvironmentStatus::Idle);
    assert!(app.orchestrator.has_pod(&pod));

    let report = app
        .service
        .reap_idle(Utc::now() + Duration::minutes(92), &config)
        .await
        .unwrap();
    assert_eq!(report.reclaimed, 1);
    let reclaimed = app.service.get(&id).await.unwrap();
    assert_eq!(reclaimed.status, EnvironmentStatus::Reclaimed);
    assert!(!reclaimed.is_running);
    assert!(!app.orchestrator.has_pod(&pod));

    // Same row, new pod, student data untouched.
    let restored = app
        .service
        .resolve_or_create("C1", "A1", "u1")
        .await
        .unwrap();
    assert!(!restored.created);
    assert_eq!(restored.environment.environment_id, id);
    assert_eq!(restored.environment.status, EnvironmentStatus::Ready);
    assert!(app.orchestrator.has_pod(&pod));
    assert_eq!(app.orchestrator.pod_creates(), 2);
    assert_eq!(std::fs::read(&seeded).unwrap(), b"print('mine')");
}

#[tokio::test]
async fn test_live_sessions_keep_environment_ready() {
    let app = test_app().await;
    seed_course(&app.courses, "C1", "A1", false, &[]).await;
    let config = reaper_config();

    let id = app
        .service
        .resolve_or_create("C1", "A1", "u1")
        .await
        .unwrap()
        .environment
        .environment_id;

    let guard = app.service.activity().begin(&id);
    let later = Utc::now() + Duration::hours(5);
    let report = app.service.reap_idle(later, &config).await.unwrap();
    assert_eq!(report.idled, 0);
    assert_eq!(app.service.get(&id).await.unwrap().status, EnvironmentStatus::Ready);

    drop(guard);
    let report = app.service.reap_idle(later, &config).await.unwrap();
    assert_eq!(report.idled, 1);
}

#[tokio::test]
async fn test_touch_wakes_idle_environment() {
    let app = test_app().await;
    seed_course(&app.courses, "C1", "A1", false, &[]).await;
    let config = reaper_config();

    let id = app
        .service
        .resolve_or_create("C1", "A1", "u1")
        .await
        .unwrap()
        .environment
        .environment_id;
    app.service
        .reap_idle(Utc::now() + Duration::minutes(45), &config)
        .await
        .unwrap();
    assert_eq!(app.service.get(&id).await.unwrap().status, EnvironmentStatus::Idle);

    let resolution = app.service.resolve_or_create("C1", "A1", "u1").await.unwrap();
    assert_eq!(resolution.environment.status, EnvironmentStatus::Ready);
    assert_eq!(app.orchestrator.pod_creates(), 1);
}

#[tokio::test]
async fn test_retry_after_failed_provisioning_keeps_edits() {
    let app = test_app().await;
    seed_course(&app.courses, "C1", "A1", false, &[("hello.py", "", b"print(1)")]).await;
    app.orchestrator
        .failing_creates
        .store(usize::MAX, Ordering::SeqCst);

    let err = app
        .service
        .resolve_or_create("C1", "A1", "u1")
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        EnvironmentError::Provisioning(PodError::Api { .. })
    ));

    let failed = app
        .environments
        .find_by_owner("A1", &Actor::User("u1".to_string()))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(failed.status, EnvironmentStatus::Failed);
    assert!(failed.internal_address.is_none());
    assert!(failed.seeded);

    // The workspace is already usable through the file API.
    let seeded = app
        .data_dir
        .path()
        .join(&failed.environment_id)
        .join("hello.py");
    assert_eq!(std::fs::read(&seeded).unwrap(), b"print(1)");
    std::fs::write(&seeded, b"print('edited before the pod came up')").unwrap();

    app.orchestrator.failing_creates.store(0, Ordering::SeqCst);
    let resolution = app.service.resolve_or_create("C1", "A1", "u1").await.unwrap();
    assert_eq!(resolution.environment.environment_id, failed.environment_id);
    assert_eq!(resolution.environment.status, EnvironmentStatus::Ready);
    assert_eq!(
        std::fs::read(&seeded).unwrap(),
        b"print('edited before the pod came up')"
    );
}

#[tokio::test]
async fn test_restore_waits_for_old_pod_to_terminate() {
    let app = test_app().await;
    seed_course(&app.courses, "C1", "A1", false, &[]).await;
    app.orchestrator.graceful_reads.store(3, Ordering::SeqCst);

    let id = app
        .service
        .resolve_or_create("C1", "A1", "u1")
        .await
        .unwrap()
        .environment
        .environment_id;
    let pod = derive_pod_name(DEFAULT_NAME_PREFIX, &id);

    let report = app
        .service
        .reap_idle(Utc::now() + Duration::hours(3), &reaper_config())
        .await
        .unwrap();
    assert_eq!(report.reclaimed, 1);
    assert!(!app.orchestrator.has_pod(&pod));

    // The old pod is still shutting down; resolving must not adopt it.
    let restored = app.service.resolve_or_create("C1", "A1", "u1").await.unwrap();
    assert_eq!(restored.environment.status, EnvironmentStatus::Ready);
    assert!(app.orchestrator.has_pod(&pod));
    assert_eq!(app.orchestrator.pod_creates(), 2);
}

#[tokio::test]
async fn test_owner_locks_are_released() {
    let app = test_app().await;
    seed_course(&app.courses, "C1", "A1", false, &[]).await;
    seed_course(&app.courses, "C2", "A2", false, &[]).await;

    for (course, assignment) in [("C1", "A1"), ("C2", "A2")] {
        app.service
            .resolve_or_create(course, assignment, "u1")
            .await
            .unwrap();
    }
    assert_eq!(app.service.lock_entries(), 0);

    let report = app
        .service
        .reap_idle(Utc::now() + Duration::hours(3), &reaper_config())
        .await
        .unwrap();
    assert_eq!(report.reclaimed, 2);
    assert_eq!(app.service.lock_entries(), 0);
}
