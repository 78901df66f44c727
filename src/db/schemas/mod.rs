//! Database schemas for healthdesk
//!
//! Record metadata, the CRM resource field lists and the typed user document.

pub mod fields;
mod metadata;
mod resource;
mod user;

pub use fields::{
    bson_to_json, filter_value, render_record, validate_body, FieldError, FieldKind, FieldSpec,
    WriteMode,
};
pub use metadata::{is_deleted, Metadata, IS_DELETED_PATH, METADATA_KEY};
pub use resource::ResourceKind;
pub use user::{UserDoc, USER_COLLECTION};
