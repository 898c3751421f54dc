//! Example: Cluster monitoring.
//!
//! Connects to one or more servers, prints every topology change and lists
//! the collections of a database.
//!
//! Run with:
//!   cargo run --example cluster_monitoring
//!   cargo run --example cluster_monitoring -- db1:27017 db2:27017
//!
//! Set `RUST_LOG=mongo_client=debug` for driver logs.

use std::sync::Arc;
use std::time::Duration;

use mongo_client::listener::{ClusterDescriptionChangedEvent, ServerDescriptionChangedEvent};
use mongo_client::{
    ClusterFactory, ClusterListener, ClusterListeners, ClusterSettings, ConnectionPoolSettings,
    DatabaseAdministration, DefaultClusterFactory, ServerAddress, ServerListener, ServerSettings,
    StreamFactory, TcpStreamFactory,
};
use tracing_subscriber::EnvFilter;

struct PrintingListener;

impl ClusterListener for PrintingListener {
    fn cluster_description_changed(&self, event: &ClusterDescriptionChangedEvent) {
        println!("cluster {}: {}", event.cluster_id, event.new);
    }
}

impl ServerListener for PrintingListener {
    fn server_description_changed(&self, event: &ServerDescriptionChangedEvent) {
        println!("server {}", event);
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let hosts = std::env::args()
        .skip(1)
        .map(|host| host.parse::<ServerAddress>())
        .collect::<Result<Vec<_>, _>>()?;

    let settings = ClusterSettings::builder()
        .hosts(hosts)
        .server_selection_timeout(Duration::from_secs(5))
        .build()?;

    let listener = Arc::new(PrintingListener);
    let listeners = ClusterListeners::default()
        .with_cluster_listener(listener.clone())
        .with_server_listener(listener);

    let streams: Arc<dyn StreamFactory> = Arc::new(TcpStreamFactory::new());
    let cluster = DefaultClusterFactory::new().create(
        settings,
        ServerSettings::default(),
        ConnectionPoolSettings::default(),
        Arc::clone(&streams),
        streams,
        Vec::new(),
        listeners,
    )?;

    let admin = DatabaseAdministration::new(cluster.clone(), "test");
    match admin.collection_names().await {
        Ok(names) => println!("collections in test: {:?}", names),
        Err(e) => println!("could not list collections: {}", e),
    }

    tokio::time::sleep(Duration::from_secs(1)).await;
    cluster.close().await;
    Ok(())
}
