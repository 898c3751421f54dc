//! Administrative commands for one database.

use std::collections::BTreeSet;
use std::sync::Arc;

use bson::{doc, Document};
use mongo_core::{Decoder, DocumentCodec, Encoder, MongoError, MongoNamespace, Result};
use tracing::instrument;

use crate::cluster::{Cluster, PrimaryServerSelector};
use crate::connection::PooledConnection;
use crate::protocol::{CommandProtocol, CommandResult, GetMoreProtocol, QueryProtocol};

/// Options for [`DatabaseAdministration::create_collection`].
#[derive(Debug, Clone, PartialEq)]
pub struct CreateCollectionOptions {
    name: String,
    capped: bool,
    size_in_bytes: Option<i64>,
    max_documents: Option<i64>,
    auto_index: bool,
}

impl CreateCollectionOptions {
    /// Options for a plain collection called `name`.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            capped: false,
            size_in_bytes: None,
            max_documents: None,
            auto_index: true,
        }
    }

    /// Makes the collection capped at `size_in_bytes`.
    pub fn capped(mut self, size_in_bytes: i64) -> Self {
        self.capped = true;
        self.size_in_bytes = Some(size_in_bytes);
        self
    }

    /// Limits a capped collection to `max_documents`.
    pub fn max_documents(mut self, max_documents: i64) -> Self {
        self.max_documents = Some(max_documents);
        self
    }

    /// Controls whether the server builds the `_id` index.
    pub fn auto_index(mut self, auto_index: bool) -> Self {
        self.auto_index = auto_index;
        self
    }

    /// Returns the collection name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the `create` command for these options.
    pub fn to_command(&self) -> Document {
        let mut command = doc! {
            "create": &self.name,
            "capped": self.capped,
            "autoIndexId": self.auto_index,
        };
        if let Some(size) = self.size_in_bytes {
            command.insert("size", size);
        }
        if let Some(max) = self.max_documents {
            command.insert("max", max);
        }
        command
    }
}

/// Runs administrative commands against one database of a cluster.
///
/// Every operation runs on the primary.
#[derive(Debug, Clone)]
pub struct DatabaseAdministration {
    cluster: Cluster,
    database: String,
}

impl DatabaseAdministration {
    /// Creates an administration handle for `database`.
    pub fn new(cluster: Cluster, database: impl Into<String>) -> Self {
        Self {
            cluster,
            database: database.into(),
        }
    }

    /// Returns the database name.
    pub fn database(&self) -> &str {
        &self.database
    }

    async fn primary_connection(&self) -> Result<PooledConnection> {
        let server = self.cluster.select_server(&PrimaryServerSelector).await?;
        server.connection().await
    }

    async fn run_command(&self, database: &str, command: Document) -> Result<CommandResult> {
        let mut connection = self.primary_connection().await?;
        let result = CommandProtocol::new(database, command).execute(&mut connection).await;
        if let Err(e) = &result {
            if e.is_network_error() {
                connection.discard();
            }
        }
        result
    }

    /// Returns the names of the database's user collections.
    ///
    /// Index namespaces (names containing `$`) and `system.*` collections are
    /// left out.
    #[instrument(name = "admin.collection_names", skip(self), fields(database = %self.database))]
    pub async fn collection_names(&self) -> Result<BTreeSet<String>> {
        let encoder: Arc<dyn Encoder<Document>> = Arc::new(DocumentCodec::new());
        let decoder: Arc<dyn Decoder<Document>> = Arc::new(DocumentCodec::new());
        let namespace = MongoNamespace::new(self.database.clone(), "system.namespaces");
        let mut connection = self.primary_connection().await?;

        let mut batch = QueryProtocol::new(namespace.clone(), Document::new(), encoder, Arc::clone(&decoder))
            .execute(&mut connection)
            .await?;
        let mut documents = Vec::new();
        loop {
            let cursor = batch.cursor().cloned();
            documents.extend(batch.into_results());
            let Some(cursor) = cursor else {
                break;
            };
            batch = GetMoreProtocol::new(namespace.clone(), cursor, 0, Arc::clone(&decoder))
                .execute(&mut connection)
                .await?;
        }

        let names: Vec<String> = documents
            .iter()
            .filter_map(|document| document.get_str("name").ok().map(str::to_string))
            .collect();
        Ok(collection_names_from_namespaces(&self.database, &names))
    }

    /// Drops the database.
    #[instrument(name = "admin.drop", skip(self), fields(database = %self.database))]
    pub async fn drop(&self) -> Result<()> {
        self.run_command(&self.database, doc! { "dropDatabase": 1 }).await?;
        tracing::info!(database = %self.database, "dropped database");
        Ok(())
    }

    /// Creates a collection.
    #[instrument(name = "admin.create_collection", skip_all, fields(database = %self.database, collection = options.name()))]
    pub async fn create_collection(&self, options: CreateCollectionOptions) -> Result<()> {
        self.run_command(&self.database, options.to_command()).await?;
        Ok(())
    }

    /// Renames a collection within the database. With `drop_target`, an
    /// existing collection called `new_name` is dropped first.
    #[instrument(name = "admin.rename_collection", skip(self), fields(database = %self.database))]
    pub async fn rename_collection(&self, old_name: &str, new_name: &str, drop_target: bool) -> Result<()> {
        if old_name.is_empty() || new_name.is_empty() {
            return Err(MongoError::Configuration("collection names must not be empty".to_string()));
        }
        let command = doc! {
            "renameCollection": MongoNamespace::new(self.database.clone(), old_name).full_name(),
            "to": MongoNamespace::new(self.database.clone(), new_name).full_name(),
            "dropTarget": drop_target,
        };
        self.run_command("admin", command).await?;
        Ok(())
    }
}

/// Turns full namespace names into the collection names of `database`.
///
/// Names outside the database, index namespaces and `system.*` collections
/// are skipped.
pub fn collection_names_from_namespaces<S: AsRef<str>>(database: &str, namespaces: &[S]) -> BTreeSet<String> {
    let prefix = format!("{}.", database);
    namespaces
        .iter()
        .filter_map(|namespace| namespace.as_ref().strip_prefix(&prefix))
        .filter(|name| !name.contains('$') && !name.starts_with("system."))
        .map(str::to_string)
        .collect()
}
