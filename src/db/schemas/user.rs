//! User document schema
//!
//! Typed view of the `users` collection used by login, refresh and seeding.
//! Generic CRUD on users goes through the field list in `resource.rs`.

use bson::{oid::ObjectId, DateTime, Document};
use serde::{Deserialize, Serialize};

use crate::auth::Role;
use crate::db::schemas::Metadata;
use crate::types::HealthdeskError;

/// Collection name for users
pub const USER_COLLECTION: &str = "users";

/// User document stored in MongoDB
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct UserDoc {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub _id: Option<ObjectId>,

    #[serde(default)]
    pub metadata: Metadata,

    /// Login identifier, unique among live users
    pub email: String,

    pub name: String,

    pub role: Role,

    /// Argon2 PHC hash
    pub password_hash: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,

    #[serde(default = "default_true")]
    pub is_active: bool,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_login_at: Option<DateTime>,
}

fn default_true() -> bool {
    true
}

impl UserDoc {
    pub fn new(email: String, name: String, role: Role, password_hash: String) -> Self {
        Self {
            _id: None,
            metadata: Metadata::new(),
            email,
            name,
            role,
            password_hash,
            phone: None,
            is_active: true,
            last_login_at: None,
        }
    }

    pub fn from_document(doc: Document) -> Result<Self, HealthdeskError> {
        bson::from_document(doc)
            .map_err(|e| HealthdeskError::Database(format!("Malformed user record: {e}")))
    }

    pub fn to_document(&self) -> Result<Document, HealthdeskError> {
        bson::to_document(self)
            .map_err(|e| HealthdeskError::Database(format!("Failed to encode user: {e}")))
    }

    /// Hex id, empty when the record has not been stored yet
    pub fn id_hex(&self) -> String {
        self._id.map(|id| id.to_hex()).unwrap_or_default()
    }
}
