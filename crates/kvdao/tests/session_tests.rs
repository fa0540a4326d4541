//! Session lifecycle tests: opening, version changes, corruption recovery

use std::sync::Arc;
use std::time::Duration;

use kvdao::session::CORRUPTION_MESSAGE;
use kvdao::{DaoConfig, DaoError, SchemaPlan, StoreClient, StoreDescriptor};
use kvdao_core::{EngineError, Key, MemoryEngine, OpenProtocol};
use parking_lot::Mutex;
use pretty_assertions::assert_eq;
use serde_json::json;

fn full_plan() -> SchemaPlan {
    SchemaPlan::new()
        .store(StoreDescriptor::new("inputIndex"))
        .store(StoreDescriptor::new("notes"))
}

/// A plan that forgets the sentinel store.
fn plan_without_sentinel() -> SchemaPlan {
    SchemaPlan::new().store(StoreDescriptor::new("notes"))
}

/// Redirector that records every location it is sent to.
fn recording_redirector() -> (Arc<Mutex<Vec<String>>>, impl Fn(&str) + Send + Sync + 'static) {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    (seen, move |location: &str| sink.lock().push(location.to_string()))
}

#[tokio::test]
async fn test_first_operation_opens_session() {
    let engine = MemoryEngine::new();
    let client = StoreClient::new(engine.clone(), DaoConfig::default());
    assert!(!client.is_open());
    assert_eq!(engine.database_version("localDb"), None);

    client.create_object_stores(&full_plan()).await.unwrap();

    assert!(client.is_open());
    assert_eq!(engine.database_version("localDb"), Some(2));
}

#[tokio::test]
async fn test_plan_only_applies_during_version_change() {
    let engine = MemoryEngine::new();
    let client = StoreClient::new(engine.clone(), DaoConfig::default());
    client.create_object_stores(&full_plan()).await.unwrap();

    // Same connection: the version change was already consumed
    let extra = SchemaPlan::new().store(StoreDescriptor::new("extra"));
    client.create_object_stores(&extra).await.unwrap();

    // New connection at the same version: no version change at all
    let other = StoreClient::new(engine, DaoConfig::default());
    other.create_object_stores(&extra).await.unwrap();

    let err = other.get("extra", 1).await.unwrap_err();
    assert!(matches!(err, DaoError::Transaction(EngineError::NotFound(_))));
}

#[tokio::test]
async fn test_reopen_shares_data() {
    let engine = MemoryEngine::new();
    let client = StoreClient::new(engine.clone(), DaoConfig::default());
    client.create_object_stores(&full_plan()).await.unwrap();
    client
        .put("notes", json!({"v": 1}), Some(Key::from(1)))
        .await
        .unwrap();

    let other = StoreClient::new(engine, DaoConfig::default());
    assert_eq!(other.get("notes", 1).await.unwrap(), Some(json!({"v": 1})));
}

#[tokio::test]
async fn test_concurrent_first_callers_share_one_open() {
    let engine = MemoryEngine::new();
    let client = StoreClient::new(engine.clone(), DaoConfig::default());

    // A second open would hand out a second version change and the
    // duplicate store would fail to create
    let plan = full_plan();
    let (first, second) = tokio::join!(
        client.create_object_stores(&plan),
        client.create_object_stores(&plan)
    );
    first.unwrap();
    second.unwrap();

    assert_eq!(
        engine.database_names(),
        vec!["localDb".to_string()]
    );
    assert_eq!(client.count("notes", None, None).await.unwrap(), 0);
}

#[tokio::test]
async fn test_version_change_reaching_ordinary_operation_is_committed() {
    let engine = MemoryEngine::new();
    let client = StoreClient::new(engine.clone(), DaoConfig::default());

    // No stores exist, but the version change must not be left open
    let err = client.get("notes", 1).await.unwrap_err();
    assert!(matches!(err, DaoError::Transaction(EngineError::NotFound(_))));
    assert_eq!(engine.database_version("localDb"), Some(2));

    // The plan arrives too late to run
    client.create_object_stores(&full_plan()).await.unwrap();
    assert!(client.get("notes", 1).await.is_err());
}

#[tokio::test]
async fn test_newer_stored_version_fails_to_open() {
    let engine = MemoryEngine::new();
    let newer = StoreClient::new(engine.clone(), DaoConfig::default().version(3));
    newer.create_object_stores(&full_plan()).await.unwrap();

    let older = StoreClient::new(engine, DaoConfig::default());
    let err = older.get("notes", 1).await.unwrap_err();
    assert!(
        matches!(
            err,
            DaoError::Connection(EngineError::Version {
                requested: 2,
                stored: 3
            })
        ),
        "unexpected error: {err}"
    );
    assert!(!older.is_open());
}

#[tokio::test]
async fn test_upgrade_adds_stores_and_keeps_data() {
    let engine = MemoryEngine::new();
    let v1 = StoreClient::new(engine.clone(), DaoConfig::default().version(1));
    v1.create_object_stores(&full_plan()).await.unwrap();
    v1.put("notes", json!({"v": 1}), Some(Key::from(1)))
        .await
        .unwrap();

    let v2 = StoreClient::new(engine.clone(), DaoConfig::default());
    let additions = SchemaPlan::new().store(StoreDescriptor::new("archive"));
    v2.create_object_stores(&additions).await.unwrap();

    assert_eq!(engine.database_version("localDb"), Some(2));
    assert_eq!(v2.get("notes", 1).await.unwrap(), Some(json!({"v": 1})));
    assert_eq!(v2.count("archive", None, None).await.unwrap(), 0);
}

#[tokio::test]
async fn test_set_version_protocol() {
    let engine = MemoryEngine::with_protocol(OpenProtocol::SetVersion);
    let client = StoreClient::new(engine.clone(), DaoConfig::default());

    client.create_object_stores(&full_plan()).await.unwrap();
    client
        .put("notes", json!({"v": "legacy"}), Some(Key::from("k")))
        .await
        .unwrap();
    assert_eq!(engine.database_version("localDb"), Some(2));

    let other = StoreClient::new(engine, DaoConfig::default());
    assert_eq!(
        other.get("notes", "k").await.unwrap(),
        Some(json!({"v": "legacy"}))
    );
}

#[tokio::test(start_paused = true)]
async fn test_missing_sentinel_wipes_database_and_redirects() {
    let engine = MemoryEngine::new();
    let setup = StoreClient::new(engine.clone(), DaoConfig::default());
    setup
        .create_object_stores(&plan_without_sentinel())
        .await
        .unwrap();

    let (seen, redirector) = recording_redirector();
    let client = StoreClient::with_redirector(engine.clone(), DaoConfig::default(), redirector);

    let err = client.get("notes", 1).await.unwrap_err();
    match err {
        DaoError::SchemaCorrupted(message) => assert_eq!(message, CORRUPTION_MESSAGE),
        other => panic!("expected SchemaCorrupted, got {other:?}"),
    }
    assert!(!client.is_open());
    assert!(engine.database_names().is_empty());

    tokio::time::sleep(Duration::from_millis(4_900)).await;
    assert!(seen.lock().is_empty());

    tokio::time::sleep(Duration::from_millis(1_000)).await;
    assert_eq!(*seen.lock(), vec!["/pos/index.html".to_string()]);
}

#[tokio::test(start_paused = true)]
async fn test_redirect_uses_configured_location_and_delay() {
    let engine = MemoryEngine::new();
    let config = DaoConfig::default()
        .recovery_url("/login")
        .redirect_delay(Duration::from_millis(100));
    let setup = StoreClient::new(engine.clone(), config.clone());
    setup
        .create_object_stores(&plan_without_sentinel())
        .await
        .unwrap();

    let (seen, redirector) = recording_redirector();
    let client = StoreClient::with_redirector(engine, config, redirector);
    assert!(client.count("notes", None, None).await.is_err());

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(*seen.lock(), vec!["/login".to_string()]);
}

#[tokio::test(start_paused = true)]
async fn test_reopen_after_wipe_provisions_again() {
    let engine = MemoryEngine::new();
    let setup = StoreClient::new(engine.clone(), DaoConfig::default());
    setup
        .create_object_stores(&plan_without_sentinel())
        .await
        .unwrap();

    let (_seen, redirector) = recording_redirector();
    let client = StoreClient::with_redirector(engine.clone(), DaoConfig::default(), redirector);
    assert!(matches!(
        client.get("notes", 1).await,
        Err(DaoError::SchemaCorrupted(_))
    ));

    client.create_object_stores(&full_plan()).await.unwrap();
    assert!(client.is_open());
    assert_eq!(engine.database_version("localDb"), Some(2));
    assert_eq!(client.get("notes", 1).await.unwrap(), None);
}

#[tokio::test]
async fn test_remove_db() {
    let engine = MemoryEngine::new();
    let client = StoreClient::new(engine.clone(), DaoConfig::default());
    client.create_object_stores(&full_plan()).await.unwrap();
    client
        .put("notes", json!({"v": 1}), Some(Key::from(1)))
        .await
        .unwrap();

    client.remove_db().await.unwrap();
    assert!(!client.is_open());
    assert!(engine.database_names().is_empty());

    // The next operation starts from an empty database
    client.create_object_stores(&full_plan()).await.unwrap();
    assert_eq!(client.get("notes", 1).await.unwrap(), None);
}

#[tokio::test]
async fn test_remove_db_before_open() {
    let engine = MemoryEngine::new();
    let client = StoreClient::new(engine, DaoConfig::default());
    client.remove_db().await.unwrap();
    assert!(!client.is_open());
    assert!(client.engine().database_names().is_empty());
}

#[tokio::test]
async fn test_engine_accessor_shares_databases() {
    let client = StoreClient::new(MemoryEngine::new(), DaoConfig::default());
    client.create_object_stores(&full_plan()).await.unwrap();

    assert_eq!(client.engine().database_version("localDb"), Some(2));
}

#[tokio::test]
async fn test_custom_database_name() {
    let engine = MemoryEngine::new();
    let client = StoreClient::new(engine.clone(), DaoConfig::default().db_name("pos"));
    client.create_object_stores(&full_plan()).await.unwrap();

    assert_eq!(engine.database_names(), vec!["pos".to_string()]);
}
