//! Integration tests for the in-memory job store.

use stride_api::{
    Allocation, JobRecord, JobSpec, JobState, JobStore, MemoryJobStore, RoleSpec, StoreError,
    WatchEvent, JobType,
};

fn record(name: &str) -> JobRecord {
    JobRecord::new(
        "default",
        name,
        JobSpec {
            job_type: JobType::Symmetric,
            master: RoleSpec::default(),
            replica: RoleSpec::default(),
            num_masters: 0,
            num_replicas: 4,
            volumes: Vec::new(),
        },
    )
}

#[tokio::test]
async fn test_writes_bump_version_and_broadcast() {
    let store = MemoryJobStore::new();
    let mut watch = store.subscribe();

    let created = store.create(record("a")).await.unwrap();
    let key = created.key().unwrap();
    assert_eq!(created.meta.resource_version, 1);

    let updated = store
        .update_allocation(&key, Allocation::new(0, 2))
        .await
        .unwrap();
    assert_eq!(updated.meta.resource_version, 2);
    assert_eq!(updated.scheduled(), Allocation::new(0, 2));

    let updated = store.update_state(&key, JobState::Scheduled).await.unwrap();
    assert_eq!(updated.state(), Some(JobState::Scheduled));
    assert_eq!(updated.status.history.len(), 1);

    assert!(matches!(watch.recv().await.unwrap(), WatchEvent::Added(_)));
    match watch.recv().await.unwrap() {
        WatchEvent::Modified { old, new } => {
            assert_eq!(old.scheduled(), Allocation::ZERO);
            assert_eq!(new.scheduled(), Allocation::new(0, 2));
        }
        other => panic!("unexpected event: {other:?}"),
    }

    assert_eq!(store.allocation_writes(), 1);
    assert_eq!(store.state_writes(), 1);
}

#[tokio::test]
async fn test_injected_failures() {
    let store = MemoryJobStore::new();
    let key = store.create(record("a")).await.unwrap().key().unwrap();

    store.fail_next_writes(1);
    let err = store
        .update_allocation(&key, Allocation::new(0, 1))
        .await
        .unwrap_err();
    assert!(err.is_transient());

    store
        .update_allocation(&key, Allocation::new(0, 1))
        .await
        .unwrap();
}

#[tokio::test]
async fn test_missing_record() {
    let store = MemoryJobStore::new();
    let key = "default/ghost".parse().unwrap();
    assert!(matches!(
        store.update_state(&key, JobState::Idle).await,
        Err(StoreError::NotFound(_))
    ));
}

#[tokio::test]
async fn test_duplicate_create_conflicts() {
    let store = MemoryJobStore::new();
    store.create(record("a")).await.unwrap();
    assert!(matches!(
        store.create(record("a")).await,
        Err(StoreError::Conflict(_))
    ));
}
