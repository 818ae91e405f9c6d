#![allow(clippy::unwrap_used, clippy::expect_used)]

//! Registration to lookup flow over the in-memory store
//!
//! These tests verify that:
//! - Published discovery values are found by locators
//! - Disabling discovery hides an instance but keeps its admin and metrics info
//! - Locator watches see the snapshot, later changes and close on cancel

use std::sync::Arc;
use std::time::Duration;

use discovery::provider::MemoryProvider;
use discovery::{AppRegistrationInfo, AppRegistrationParams, Registrator, ServiceLocator};
use discovery_sdk::key::{key_prefix, kv_key};
use discovery_sdk::{
    DiscoveryProvider, EndpointType, EventType, KeyFilter, Location, Locator, LocatorFilter,
    Namespace, VersionInfo,
};
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

fn bob_api(host: &str) -> AppRegistrationParams {
    AppRegistrationParams {
        service_name: "bob_api".to_owned(),
        rollout_type: "stable".to_owned(),
        host: host.to_owned(),
        http_port: 8080,
        admin_port: 9000,
        version: VersionInfo {
            app_version: "2.4.1".to_owned(),
            git_describe: "v2.4.1-3-gabc".to_owned(),
            ..VersionInfo::default()
        },
        monitoring_port: 9100,
        environment: "live".to_owned(),
        venture: "id".to_owned(),
        ..AppRegistrationParams::default()
    }
}

fn registrator(store: &MemoryProvider, host: &str) -> Registrator {
    let info = AppRegistrationInfo::new(bob_api(host)).unwrap();
    Registrator::new(Arc::new(store.clone()), Arc::new(info))
}

async fn wait_for_len(store: &MemoryProvider, len: usize) {
    timeout(Duration::from_secs(1), async {
        while store.len() != len {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("store did not reach the expected size");
}

#[tokio::test]
async fn registered_instance_is_located() {
    let store = MemoryProvider::default();
    let registrator = registrator(&store, "node1.iddc");
    registrator.register().unwrap();
    registrator.enable_discovery().unwrap();
    wait_for_len(&store, 3).await;

    let discovery = store
        .get(&KeyFilter::namespace(Namespace::Discovery))
        .await
        .unwrap();
    assert_eq!(discovery.len(), 1);
    assert_eq!(
        kv_key(&discovery[0]).unwrap(),
        "/discovery/app/bob_api/stable/shared/common/node1.iddc:8080"
    );
    assert_eq!(
        discovery[0].value,
        r#"{"endpoint_main":"http://node1-pub.iddc:8080"}"#
    );

    let locator = ServiceLocator::new(Arc::new(store.clone()));
    let locations = locator
        .get("bob_api", EndpointType::AppMain, &LocatorFilter::default())
        .await
        .unwrap();
    assert_eq!(locations.len(), 1);
    assert_eq!(
        locations[0],
        Location {
            service: discovery[0].service.clone(),
            endpoint: "http://node1-pub.iddc:8080".to_owned(),
            ..Location::default()
        }
    );

    let other = locator
        .get("alice_api", EndpointType::AppMain, &LocatorFilter::default())
        .await
        .unwrap();
    assert!(other.is_empty());

    registrator.unregister().await;
    assert!(store.is_empty());
}

#[tokio::test]
async fn disabled_instance_keeps_admin_and_metrics() {
    let store = MemoryProvider::default();
    let registrator = registrator(&store, "node1.iddc");
    registrator.register().unwrap();
    registrator.enable_discovery().unwrap();
    wait_for_len(&store, 3).await;

    registrator.disable_discovery().await;

    let all = store.get(&KeyFilter::prefix("/")).await.unwrap();
    let namespaces: Vec<Namespace> = all.iter().map(|kv| kv.namespace).collect();
    assert_eq!(namespaces, [Namespace::Admin, Namespace::Metrics]);

    let locator = ServiceLocator::new(Arc::new(store.clone()));
    let locations = locator
        .get("bob_api", EndpointType::AppMain, &LocatorFilter::default())
        .await
        .unwrap();
    assert!(locations.is_empty());

    // Discovery can be enabled again after being disabled.
    registrator.enable_discovery().unwrap();
    wait_for_len(&store, 3).await;
    registrator.unregister().await;
}

#[tokio::test]
async fn locator_watch_follows_instances() {
    let store = MemoryProvider::default();
    let first = registrator(&store, "node1.iddc");
    first.register().unwrap();
    first.enable_discovery().unwrap();
    wait_for_len(&store, 3).await;

    let locator = ServiceLocator::new(Arc::new(store.clone()));
    let cancel = CancellationToken::new();
    let mut events = locator.watch(
        cancel.clone(),
        "bob_api",
        EndpointType::AppMain,
        &LocatorFilter::default(),
    );

    let snapshot = timeout(Duration::from_secs(1), events.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(snapshot.event_type, EventType::Put);
    assert_eq!(snapshot.locations.len(), 1);
    assert_eq!(snapshot.locations[0].endpoint, "http://node1-pub.iddc:8080");

    let second = registrator(&store, "node2.sgdc");
    second.enable_discovery().unwrap();
    let added = timeout(Duration::from_secs(1), events.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(added.event_type, EventType::Put);
    assert_eq!(added.locations[0].endpoint, "http://node2-pub.sgdc:8080");

    first.disable_discovery().await;
    let removed = timeout(Duration::from_secs(1), events.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(removed.event_type, EventType::Delete);
    assert_eq!(removed.locations.len(), 1);
    assert!(removed.locations[0].endpoint.is_empty());
    assert_eq!(
        removed.locations[0]
            .service
            .as_ref()
            .map(|s| s.instance_name.as_str()),
        Some("node1.iddc:8080")
    );

    cancel.cancel();
    let closed = timeout(Duration::from_secs(1), async {
        while events.recv().await.is_some() {}
    })
    .await;
    assert!(closed.is_ok(), "watch closes after cancel");

    second.disable_discovery().await;
    first.unregister().await;
}

#[tokio::test]
async fn filters_narrow_lookups() {
    let store = MemoryProvider::default();
    let stable = registrator(&store, "node1.iddc");
    stable.enable_discovery().unwrap();

    let canary = AppRegistrationInfo::new(AppRegistrationParams {
        rollout_type: "unstable1".to_owned(),
        ..bob_api("node2.iddc")
    })
    .unwrap();
    let canary = Registrator::new(Arc::new(store.clone()), Arc::new(canary));
    canary.enable_discovery().unwrap();
    wait_for_len(&store, 2).await;

    let filter = LocatorFilter {
        rollout_type: Some("unstable1".to_owned()),
        ..LocatorFilter::default()
    };
    assert_eq!(
        key_prefix(&filter.key_filter("bob_api", EndpointType::AppMain)),
        "/discovery/app/bob_api/unstable1/"
    );

    let locator = ServiceLocator::new(Arc::new(store.clone()));
    let found = locator
        .get("bob_api", EndpointType::AppMain, &filter)
        .await
        .unwrap();
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].endpoint, "http://node2-pub.iddc:8080");

    let all = locator
        .get("bob_api", EndpointType::AppMain, &LocatorFilter::default())
        .await
        .unwrap();
    assert_eq!(all.len(), 2);

    stable.disable_discovery().await;
    canary.disable_discovery().await;
    assert!(store.is_empty());
}
