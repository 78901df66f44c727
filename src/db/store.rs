//! Document store abstraction
//!
//! Handlers talk to this trait only, so the MongoDB adapter and the in-memory
//! adapter can be swapped (production vs. dev mode and tests). Every read
//! hides soft-deleted records.

use bson::{oid::ObjectId, Document};

use crate::types::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortDir {
    Asc,
    #[default]
    Desc,
}

impl SortDir {
    pub fn as_i32(&self) -> i32 {
        match self {
            SortDir::Asc => 1,
            SortDir::Desc => -1,
        }
    }
}

/// Case-insensitive substring match over several fields
#[derive(Debug, Clone, PartialEq)]
pub struct Search {
    pub fields: Vec<&'static str>,
    pub term: String,
}

/// Filter, ordering and paging for `find`/`count`
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Query {
    /// Top-level field equality; an array field matches when it contains the value
    pub equals: Document,
    pub search: Option<Search>,
    /// Dotted path to sort on
    pub sort: Option<(String, SortDir)>,
    pub skip: u64,
    /// Zero means no limit
    pub limit: u64,
}

impl Query {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn matching(equals: Document) -> Self {
        Self {
            equals,
            ..Self::default()
        }
    }
}

#[async_trait::async_trait]
pub trait DocumentStore: Send + Sync {
    /// Short name used in logs and the readiness probe
    fn backend(&self) -> &'static str;

    async fn ping(&self) -> Result<()>;

    async fn find(&self, collection: &str, query: &Query) -> Result<Vec<Document>>;

    /// Counts ignore `skip`, `limit` and `sort`
    async fn count(&self, collection: &str, query: &Query) -> Result<u64>;

    async fn find_one(&self, collection: &str, equals: Document) -> Result<Option<Document>>;

    async fn find_by_id(&self, collection: &str, id: &ObjectId) -> Result<Option<Document>>;

    /// Insert a record, stamping fresh metadata; returns the new id
    async fn insert(&self, collection: &str, record: Document) -> Result<ObjectId>;

    /// `$set` the given top-level fields; returns whether a live record matched
    async fn update_by_id(&self, collection: &str, id: &ObjectId, set: Document) -> Result<bool>;

    /// Soft delete; returns whether a live record matched
    async fn delete_by_id(&self, collection: &str, id: &ObjectId) -> Result<bool>;

    /// Run an aggregation pipeline over live records
    async fn aggregate(&self, collection: &str, pipeline: Vec<Document>) -> Result<Vec<Document>>;
}
