//! MongoDB client and document store adapter

use bson::{doc, oid::ObjectId, Bson, DateTime, Document};
use futures::TryStreamExt;
use mongodb::{options::FindOptions, Client, Collection, IndexModel};
use tracing::{debug, info};

use crate::db::schemas::{Metadata, ResourceKind, IS_DELETED_PATH, METADATA_KEY};
use crate::db::store::{DocumentStore, Query};
use crate::types::{HealthdeskError, Result};

/// MongoDB client wrapper
#[derive(Clone)]
pub struct MongoClient {
    client: Client,
    db_name: String,
}

impl MongoClient {
    /// Connect and verify the connection with a ping
    pub async fn new(uri: &str, db_name: &str) -> Result<Self> {
        info!("Connecting to MongoDB");

        // Fail fast instead of hanging on an unreachable server
        let timeout_uri = if uri.contains('?') {
            format!("{}&serverSelectionTimeoutMS=3000&connectTimeoutMS=3000", uri)
        } else {
            format!("{}?serverSelectionTimeoutMS=3000&connectTimeoutMS=3000", uri)
        };

        let client = Client::with_uri_str(&timeout_uri)
            .await
            .map_err(|e| HealthdeskError::Database(format!("Failed to connect to MongoDB: {}", e)))?;

        client
            .database(db_name)
            .run_command(doc! { "ping": 1 })
            .await
            .map_err(|e| HealthdeskError::Database(format!("MongoDB ping failed: {}", e)))?;

        info!("Connected to MongoDB database '{}'", db_name);

        Ok(Self {
            client,
            db_name: db_name.to_string(),
        })
    }

    pub fn collection(&self, name: &str) -> Collection<Document> {
        self.client.database(&self.db_name).collection::<Document>(name)
    }

    pub fn db_name(&self) -> &str {
        &self.db_name
    }
}

/// [`DocumentStore`] backed by MongoDB
#[derive(Clone)]
pub struct MongoStore {
    mongo: MongoClient,
}

impl MongoStore {
    pub fn new(mongo: MongoClient) -> Self {
        Self { mongo }
    }

    /// Create the schema-defined indexes of every resource collection
    pub async fn apply_indexes(&self) -> Result<()> {
        for kind in ResourceKind::ALL {
            let indices: Vec<IndexModel> = kind
                .indexes()
                .into_iter()
                .map(|(keys, opts)| IndexModel::builder().keys(keys).options(opts).build())
                .collect();

            if indices.is_empty() {
                continue;
            }

            self.mongo
                .collection(kind.collection())
                .create_indexes(indices)
                .await
                .map_err(|e| {
                    HealthdeskError::Database(format!(
                        "Failed to create indexes on {}: {}",
                        kind.collection(),
                        e
                    ))
                })?;
            debug!(collection = kind.collection(), "Indexes applied");
        }
        Ok(())
    }
}

fn db_err(op: &str) -> impl Fn(mongodb::error::Error) -> HealthdeskError + '_ {
    move |e| HealthdeskError::Database(format!("{} failed: {}", op, e))
}

fn live_filter(mut filter: Document) -> Document {
    filter.insert(IS_DELETED_PATH, doc! { "$ne": true });
    filter
}

/// Translate a [`Query`] into a MongoDB filter document
pub fn query_filter(query: &Query) -> Document {
    let mut filter = query.equals.clone();

    if let Some(search) = &query.search {
        let pattern = escape_regex(&search.term);
        let clauses: Vec<Bson> = search
            .fields
            .iter()
            .map(|field| Bson::Document(doc! { *field: { "$regex": pattern.clone(), "$options": "i" } }))
            .collect();
        if !clauses.is_empty() {
            filter.insert("$or", clauses);
        }
    }

    live_filter(filter)
}

/// Escape user input for literal use inside a regular expression
pub fn escape_regex(term: &str) -> String {
    let mut out = String::with_capacity(term.len());
    for c in term.chars() {
        if "\\.+*?()|[]{}^$#&-~".contains(c) {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

#[async_trait::async_trait]
impl DocumentStore for MongoStore {
    fn backend(&self) -> &'static str {
        "mongodb"
    }

    async fn ping(&self) -> Result<()> {
        self.mongo
            .client
            .database(self.mongo.db_name())
            .run_command(doc! { "ping": 1 })
            .await
            .map(|_| ())
            .map_err(db_err("Ping"))
    }

    async fn find(&self, collection: &str, query: &Query) -> Result<Vec<Document>> {
        let mut options = FindOptions::default();
        if let Some((field, dir)) = &query.sort {
            options.sort = Some(doc! { field.as_str(): dir.as_i32() });
        }
        if query.skip > 0 {
            options.skip = Some(query.skip);
        }
        if query.limit > 0 {
            options.limit = Some(query.limit as i64);
        }

        let cursor = self
            .mongo
            .collection(collection)
            .find(query_filter(query))
            .with_options(options)
            .await
            .map_err(db_err("Find"))?;

        cursor.try_collect().await.map_err(db_err("Cursor read"))
    }

    async fn count(&self, collection: &str, query: &Query) -> Result<u64> {
        self.mongo
            .collection(collection)
            .count_documents(query_filter(query))
            .await
            .map_err(db_err("Count"))
    }

    async fn find_one(&self, collection: &str, equals: Document) -> Result<Option<Document>> {
        self.mongo
            .collection(collection)
            .find_one(live_filter(equals))
            .await
            .map_err(db_err("Find"))
    }

    async fn find_by_id(&self, collection: &str, id: &ObjectId) -> Result<Option<Document>> {
        self.find_one(collection, doc! { "_id": *id }).await
    }

    async fn insert(&self, collection: &str, mut record: Document) -> Result<ObjectId> {
        record.remove("_id");
        record.insert(METADATA_KEY, Metadata::new().to_document());

        let result = self
            .mongo
            .collection(collection)
            .insert_one(record)
            .await
            .map_err(db_err("Insert"))?;

        result
            .inserted_id
            .as_object_id()
            .ok_or_else(|| HealthdeskError::Database("Failed to get inserted ID".into()))
    }

    async fn update_by_id(&self, collection: &str, id: &ObjectId, mut set: Document) -> Result<bool> {
        set.insert("metadata.updated_at", DateTime::now());

        let result = self
            .mongo
            .collection(collection)
            .update_one(live_filter(doc! { "_id": *id }), doc! { "$set": set })
            .await
            .map_err(db_err("Update"))?;

        Ok(result.matched_count > 0)
    }

    async fn delete_by_id(&self, collection: &str, id: &ObjectId) -> Result<bool> {
        let now = DateTime::now();
        let update = doc! {
            "$set": {
                "metadata.is_deleted": true,
                "metadata.deleted_at": now,
                "metadata.updated_at": now,
            }
        };

        let result = self
            .mongo
            .collection(collection)
            .update_one(live_filter(doc! { "_id": *id }), update)
            .await
            .map_err(db_err("Soft delete"))?;

        Ok(result.matched_count > 0)
    }

    async fn aggregate(&self, collection: &str, pipeline: Vec<Document>) -> Result<Vec<Document>> {
        let mut stages = vec![doc! { "$match": { IS_DELETED_PATH: { "$ne": true } } }];
        stages.extend(pipeline);

        let cursor = self
            .mongo
            .collection(collection)
            .aggregate(stages)
            .await
            .map_err(db_err("Aggregate"))?;

        cursor.try_collect().await.map_err(db_err("Cursor read"))
    }
}
