//! Integration tests for database administration commands.

mod common;

use std::collections::BTreeSet;

use common::{create_cluster, single_host, MockConfig, MockServer};
use mongo_client::{CreateCollectionOptions, DatabaseAdministration};

#[tokio::test]
async fn test_collection_names_skip_system_and_index_namespaces() {
    let server = MockServer::start(
        MockConfig::default().with_namespaces(&["test.system.namespaces", "test.foo", "test.foo.$_id_"]),
    )
    .await;
    let cluster = create_cluster(single_host(server.address()), Vec::new());
    let admin = DatabaseAdministration::new(cluster.clone(), "test");

    let names = admin.collection_names().await.unwrap();
    assert_eq!(names, BTreeSet::from(["foo".to_string()]));

    cluster.close().await;
}

#[tokio::test]
async fn test_collection_names_follow_the_cursor() {
    let server = MockServer::start(MockConfig::default().with_namespaces(&[
        "test.a",
        "test.b",
        "test.c",
        "test.d",
        "test.d.$_id_",
    ]))
    .await;
    let cluster = create_cluster(single_host(server.address()), Vec::new());
    let admin = DatabaseAdministration::new(cluster.clone(), "test");

    let names = admin.collection_names().await.unwrap();
    let expected: BTreeSet<String> = ["a", "b", "c", "d"].iter().map(|s| s.to_string()).collect();
    assert_eq!(names, expected);

    cluster.close().await;
}

#[tokio::test]
async fn test_commands_are_sent_to_the_server() {
    let server = MockServer::start(MockConfig::default()).await;
    let cluster = create_cluster(single_host(server.address()), Vec::new());
    let admin = DatabaseAdministration::new(cluster.clone(), "test");

    admin
        .create_collection(CreateCollectionOptions::new("log").capped(1024))
        .await
        .unwrap();
    admin.rename_collection("log", "archive", true).await.unwrap();
    admin.drop().await.unwrap();

    let commands = server.state().commands();
    assert_eq!(commands.len(), 3);
    assert_eq!(commands[0].get_str("create").unwrap(), "log");
    assert!(commands[0].get_bool("capped").unwrap());
    assert_eq!(commands[1].get_str("renameCollection").unwrap(), "test.log");
    assert_eq!(commands[1].get_str("to").unwrap(), "test.archive");
    assert!(commands[1].get_bool("dropTarget").unwrap());
    assert!(commands[2].contains_key("dropDatabase"));

    cluster.close().await;
}

#[tokio::test]
async fn test_rename_rejects_empty_names() {
    let server = MockServer::start(MockConfig::default()).await;
    let cluster = create_cluster(single_host(server.address()), Vec::new());
    let admin = DatabaseAdministration::new(cluster.clone(), "test");

    assert!(admin.rename_collection("", "b", false).await.is_err());
    assert!(server.state().commands().is_empty());

    cluster.close().await;
}
