//! Integration tests for cluster creation, monitoring and server selection.

mod common;

use std::sync::{Arc, Mutex};
use std::time::Duration;

use bson::doc;
use common::{create_cluster, create_cluster_with_listeners, single_host, MockConfig, MockServer};
use mongo_client::listener::{
    ClusterClosedEvent, ClusterDescriptionChangedEvent, ClusterOpeningEvent, ServerOpeningEvent,
};
use mongo_client::{
    AnyServerSelector, Cluster, ClusterConnectionMode, ClusterDescription, ClusterListener,
    ClusterListeners, ClusterSettings, ClusterType, MongoError, PrimaryServerSelector,
    ServerAddress, ServerAddressSelector, ServerListener, ServerType,
};

#[derive(Default)]
struct RecordingListener {
    events: Mutex<Vec<String>>,
}

impl RecordingListener {
    fn events(&self) -> Vec<String> {
        self.events.lock().unwrap().clone()
    }

    fn record(&self, event: String) {
        self.events.lock().unwrap().push(event);
    }
}

impl ClusterListener for RecordingListener {
    fn cluster_opening(&self, event: &ClusterOpeningEvent) {
        self.record(format!("opening {}", event.cluster_id));
    }

    fn cluster_closed(&self, event: &ClusterClosedEvent) {
        self.record(format!("closed {}", event.cluster_id));
    }

    fn cluster_description_changed(&self, _event: &ClusterDescriptionChangedEvent) {
        self.record("changed".to_string());
    }
}

impl ServerListener for RecordingListener {
    fn server_opening(&self, event: &ServerOpeningEvent) {
        self.record(format!("server opening {}", event.address));
    }
}

async fn wait_for(cluster: &Cluster, predicate: impl Fn(&ClusterDescription) -> bool) -> ClusterDescription {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        let description = cluster.description();
        if predicate(&description) {
            return description;
        }
        assert!(tokio::time::Instant::now() < deadline, "cluster never reached state: {}", description);
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

#[tokio::test]
async fn test_cluster_ids_are_unique_and_increasing() {
    let server = MockServer::start(MockConfig::default()).await;
    let first = create_cluster(single_host(server.address()), Vec::new());
    let second = create_cluster(single_host(server.address()), Vec::new());

    let first_id: u64 = first.id().value().parse().unwrap();
    let second_id: u64 = second.id().value().parse().unwrap();
    assert!(first_id >= 1);
    assert!(second_id > first_id);

    first.close().await;
    second.close().await;
}

#[tokio::test]
async fn test_mode_selects_cluster_variant() {
    let server = MockServer::start(MockConfig::default()).await;

    let single = create_cluster(single_host(server.address()), Vec::new());
    assert!(matches!(single, Cluster::Single(_)));

    let multi = create_cluster(
        ClusterSettings::builder()
            .add_host(server.address())
            .mode(ClusterConnectionMode::Multiple)
            .build()
            .unwrap(),
        Vec::new(),
    );
    assert!(matches!(multi, Cluster::Multi(_)));

    single.close().await;
    multi.close().await;
}

#[test]
fn test_unsupported_mode_is_rejected() {
    assert!("sharded".parse::<ClusterConnectionMode>().is_err());

    let result = ClusterSettings::builder()
        .add_host(ServerAddress::new("a", 1))
        .add_host(ServerAddress::new("b", 2))
        .mode(ClusterConnectionMode::Single)
        .build();
    assert!(result.is_err());
}

#[tokio::test]
async fn test_single_cluster_selects_standalone() {
    let server = MockServer::start(MockConfig::default()).await;
    let cluster = create_cluster(single_host(server.address()), Vec::new());

    let selected = cluster.select_server(&PrimaryServerSelector).await.unwrap();
    assert_eq!(selected.address(), &server.address());
    assert_eq!(selected.description().server_type(), ServerType::Standalone);

    let description = wait_for(&cluster, |d| d.cluster_type() == ClusterType::Standalone).await;
    assert_eq!(description.servers().len(), 1);

    cluster.close().await;
}

#[tokio::test]
async fn test_selection_times_out_without_servers() {
    let unused = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let address = ServerAddress::new("127.0.0.1", unused.local_addr().unwrap().port());
    drop(unused);

    let settings = ClusterSettings::builder()
        .add_host(address)
        .server_selection_timeout(Duration::from_millis(200))
        .build()
        .unwrap();
    let cluster = create_cluster(settings, Vec::new());

    let err = cluster.select_server(&AnyServerSelector).await.unwrap_err();
    assert!(matches!(err, MongoError::Timeout(_)), "unexpected error: {:?}", err);
    assert!(err.to_string().contains("AnyServerSelector"));

    cluster.close().await;
}

#[tokio::test]
async fn test_replica_set_members_are_discovered() {
    let secondary = MockServer::start(MockConfig {
        is_master: doc! { "ismaster": false, "secondary": true, "setName": "rs0" },
        ..MockConfig::default()
    })
    .await;
    let secondary_address = secondary.address();
    let primary = MockServer::start_with(|own| MockConfig {
        is_master: doc! {
            "ismaster": true,
            "setName": "rs0",
            "hosts": [own.to_string(), secondary_address.to_string()],
        },
        ..MockConfig::default()
    })
    .await;

    let settings = ClusterSettings::builder()
        .add_host(primary.address())
        .required_replica_set_name("rs0")
        .build()
        .unwrap();
    let cluster = create_cluster(settings, Vec::new());
    assert!(matches!(cluster, Cluster::Multi(_)));

    let description = wait_for(&cluster, |d| d.connected_servers().count() == 2).await;
    assert_eq!(description.cluster_type(), ClusterType::ReplicaSet);
    assert_eq!(description.primary().unwrap().address(), &primary.address());

    let selected = cluster.select_server(&PrimaryServerSelector).await.unwrap();
    assert_eq!(selected.address(), &primary.address());
    let selected = cluster
        .select_server(&ServerAddressSelector::new(secondary.address()))
        .await
        .unwrap();
    assert_eq!(selected.description().server_type(), ServerType::ReplicaSetSecondary);

    cluster.close().await;
}

#[tokio::test]
async fn test_listeners_see_lifecycle() {
    let server = MockServer::start(MockConfig::default()).await;
    let listener = Arc::new(RecordingListener::default());
    let listeners = ClusterListeners::default()
        .with_cluster_listener(listener.clone())
        .with_server_listener(listener.clone());

    let cluster = create_cluster_with_listeners(single_host(server.address()), Vec::new(), listeners);
    let id = cluster.id().clone();
    cluster.select_server(&PrimaryServerSelector).await.unwrap();
    cluster.close().await;
    cluster.close().await;

    assert!(cluster.is_closed());
    let events = listener.events();
    assert_eq!(events.first().unwrap(), &format!("opening {}", id));
    assert!(events.contains(&format!("server opening {}", server.address())));
    assert!(events.contains(&"changed".to_string()));
    assert_eq!(events.iter().filter(|e| e.starts_with("closed")).count(), 1);
    assert_eq!(events.last().unwrap(), &format!("closed {}", id));

    assert!(cluster.select_server(&PrimaryServerSelector).await.is_err());
}
