#![allow(clippy::unwrap_used, clippy::expect_used, clippy::use_debug)]

//! End-to-end registration and discovery against real stores and wall-clock time.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use roster::{
    Client, DiscoveryApi, InMemoryStore, ResolvedConfig, RosterConfig, RosterError, ServiceState,
    StoreLocation,
};

fn fast_config(store_location: StoreLocation) -> ResolvedConfig {
    ResolvedConfig {
        ttl: Duration::from_secs(1),
        heartbeat_interval: Duration::from_millis(50),
        store_location,
        ..ResolvedConfig::default()
    }
}

fn memory_client() -> Client {
    Client::with_store(fast_config(StoreLocation::Memory), Arc::new(InMemoryStore::new()))
}

fn sqlite_url(dir: &tempfile::TempDir) -> String {
    format!("sqlite://{}", dir.path().join("roster.db").display())
}

#[tokio::test]
async fn registered_endpoint_is_discoverable() {
    let client = memory_client();

    let handle = client.register("svc", "http://h1", None).await.unwrap();
    let found = client.discover("svc").await.unwrap();

    assert_eq!(found.name, "svc");
    assert_eq!(found.endpoint, "http://h1");
    handle.unregister().await;
}

#[tokio::test]
async fn unknown_service_is_not_found() {
    let client = memory_client();
    client.registry().create().await.unwrap();

    let err = client.discover("nobody").await.unwrap_err();
    assert!(matches!(err, RosterError::ServiceNotFound { ref name } if name == "nobody"));
}

#[tokio::test]
async fn two_instances_share_load() {
    let client = memory_client();
    let h1 = client.register("svc", "http://h1", None).await.unwrap();
    let h2 = client.register("svc", "http://h2", None).await.unwrap();

    let mut seen: HashMap<String, u32> = HashMap::new();
    for _ in 0..1000 {
        let found = client.discover("svc").await.unwrap();
        *seen.entry(found.endpoint).or_default() += 1;
    }

    assert_eq!(seen.len(), 2, "{seen:?}");
    for (endpoint, hits) in &seen {
        assert!((400..=600).contains(hits), "{endpoint}: {hits}");
    }

    h1.unregister().await;
    h2.unregister().await;
}

#[tokio::test]
async fn unregistered_service_disappears() {
    let client = memory_client();
    let handle = client.register("svc", "http://h1", None).await.unwrap();
    assert_eq!(handle.state(), ServiceState::Running);

    handle.unregister().await;
    assert_eq!(handle.state(), ServiceState::Stopped);

    let err = client.discover("svc").await.unwrap_err();
    assert!(err.is_not_found(), "{err}");
}

#[tokio::test]
async fn subsecond_ttl_record_is_gone_after_unregister() {
    let client = memory_client();

    for attempt in 0..3 {
        let endpoint = format!("http://h{attempt}");
        let handle = client
            .register("svc", &endpoint, Some(Duration::from_millis(500)))
            .await
            .unwrap();
        assert_eq!(handle.ttl(), Duration::from_secs(1));
        assert_eq!(client.discover("svc").await.unwrap().endpoint, endpoint);

        handle.unregister().await;
        let err = client.discover("svc").await.unwrap_err();
        assert!(
            matches!(err, RosterError::ServiceNotFound { .. }),
            "attempt {attempt}: {err}"
        );
    }
}

#[tokio::test]
async fn second_unregister_is_a_no_op() {
    let client = memory_client();
    let handle = client.register("svc", "http://h1", None).await.unwrap();
    handle.unregister().await;

    let started = std::time::Instant::now();
    handle.unregister().await;
    assert!(started.elapsed() < Duration::from_millis(100));
}

#[tokio::test]
async fn expiry_never_decreases_while_running() {
    let client = memory_client();
    let handle = client.register("svc", "http://h1", None).await.unwrap();

    let mut last = handle.record().expiry;
    for _ in 0..10 {
        tokio::time::sleep(Duration::from_millis(60)).await;
        let expiry = handle.record().expiry;
        assert!(expiry >= last, "{expiry} < {last}");
        last = expiry;
    }
    assert!(handle.stats().total_successes >= 2);

    handle.unregister().await;
}

#[tokio::test]
async fn surviving_instance_keeps_serving() {
    let client = memory_client();
    let gone = client.register("svc", "http://h1", None).await.unwrap();
    let stays = client.register("svc", "http://h2", None).await.unwrap();

    gone.unregister().await;
    for _ in 0..20 {
        assert_eq!(client.discover("svc").await.unwrap().endpoint, "http://h2");
    }

    stays.unregister().await;
}

#[tokio::test]
async fn sqlite_registry_is_shared_between_clients() {
    let dir = tempfile::tempdir().unwrap();
    let url = sqlite_url(&dir);

    let owner = Client::open(fast_config(StoreLocation::Sqlite(url.clone())))
        .await
        .unwrap();
    let reader = Client::open(fast_config(StoreLocation::Sqlite(url)))
        .await
        .unwrap();

    let handle = owner
        .register("echo", "tcp://10.0.0.5:3333", None)
        .await
        .unwrap();
    let found = reader.discover("echo").await.unwrap();
    assert_eq!(found.endpoint, "tcp://10.0.0.5:3333");

    handle.unregister().await;
    assert!(reader.discover("echo").await.unwrap_err().is_not_found());
}

#[tokio::test]
async fn connect_resolves_user_config() {
    let dir = tempfile::tempdir().unwrap();
    let config = RosterConfig {
        registry_name: Some("services".to_owned()),
        store_location: Some(sqlite_url(&dir)),
        ..RosterConfig::default()
    };

    let client = Client::connect(&config).await.unwrap();
    assert_eq!(client.registry().name(), "services");
    assert!(!client.registry().exists().await.unwrap());

    client.registry().create().await.unwrap();
    assert!(client.registry().is_active().await.unwrap());
    client.registry().delete().await.unwrap();
    assert!(!client.registry().exists().await.unwrap());
}
