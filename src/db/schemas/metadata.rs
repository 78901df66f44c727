//! Common metadata for all records
//!
//! Tracks creation, update, and soft deletion timestamps. Stored under the
//! `metadata` key of every document.

use bson::{doc, DateTime, Document};
use serde::{Deserialize, Serialize};

/// Key under which metadata is embedded
pub const METADATA_KEY: &str = "metadata";

/// Dotted path of the soft-delete flag
pub const IS_DELETED_PATH: &str = "metadata.is_deleted";

/// Common metadata for all records
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct Metadata {
    /// Whether this record has been soft-deleted
    #[serde(default)]
    pub is_deleted: bool,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub deleted_at: Option<DateTime>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime>,
}

impl Metadata {
    /// Create new metadata stamped with the current time
    pub fn new() -> Self {
        let now = DateTime::now();
        Self {
            is_deleted: false,
            deleted_at: None,
            updated_at: Some(now),
            created_at: Some(now),
        }
    }

    pub fn to_document(&self) -> Document {
        let mut doc = doc! { "is_deleted": self.is_deleted };
        if let Some(at) = self.deleted_at {
            doc.insert("deleted_at", at);
        }
        if let Some(at) = self.updated_at {
            doc.insert("updated_at", at);
        }
        if let Some(at) = self.created_at {
            doc.insert("created_at", at);
        }
        doc
    }

    /// Read the metadata embedded in a record, defaulting when absent
    pub fn of(record: &Document) -> Self {
        record
            .get_document(METADATA_KEY)
            .ok()
            .and_then(|m| bson::from_document(m.clone()).ok())
            .unwrap_or_default()
    }
}

/// Whether a record carries the soft-delete flag
pub fn is_deleted(record: &Document) -> bool {
    record
        .get_document(METADATA_KEY)
        .ok()
        .and_then(|m| m.get_bool("is_deleted").ok())
        .unwrap_or(false)
}
