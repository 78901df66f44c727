//! Field specifications, request body validation and record rendering

use bson::{oid::ObjectId, Bson, Document};
use chrono::{DateTime as ChronoDateTime, NaiveDate, Utc};
use serde::Serialize;
use serde_json::{Map, Value};

use crate::auth::{Role, MIN_PASSWORD_LEN};
use crate::db::schemas::metadata::{Metadata, METADATA_KEY};
use crate::db::schemas::ResourceKind;

/// Keys the server owns; a request body may never set them
pub const SERVER_MANAGED: &[&str] = &[
    "id",
    "_id",
    "created_by",
    "created_at",
    "updated_at",
    "metadata",
    "password_hash",
    "last_login_at",
];

/// Value type of a declared field
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Text,
    Number,
    Integer,
    Bool,
    TextList,
    /// 24-hex id of another record, stored as a string
    Reference,
    /// RFC 3339 timestamp or `YYYY-MM-DD`
    Date,
    RoleName,
    /// Write-only; hashed before storage
    Password,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldSpec {
    pub name: &'static str,
    pub kind: FieldKind,
    pub required: bool,
}

/// One rejected field in a request body
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldError {
    pub field: String,
    pub message: String,
}

impl FieldError {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteMode {
    Create,
    Update,
}

/// Check a JSON body against the resource's field list and convert it.
///
/// All problems are collected so the client sees every rejected field at once.
pub fn validate_body(
    kind: ResourceKind,
    body: &Value,
    mode: WriteMode,
) -> Result<Document, Vec<FieldError>> {
    let object = match body.as_object() {
        Some(o) => o,
        None => return Err(vec![FieldError::new("body", "must be a JSON object")]),
    };

    let mut errors = Vec::new();
    let mut out = Document::new();

    for (key, value) in object {
        if SERVER_MANAGED.contains(&key.as_str()) {
            errors.push(FieldError::new(key, "is managed by the server"));
            continue;
        }
        let Some(spec) = kind.field(key) else {
            errors.push(FieldError::new(key, "unknown field"));
            continue;
        };

        if value.is_null() {
            match (mode, spec.required) {
                (WriteMode::Update, false) => {
                    out.insert(key.clone(), Bson::Null);
                }
                (WriteMode::Create, false) => {}
                (_, true) => errors.push(FieldError::new(key, "must not be null")),
            }
            continue;
        }

        match convert(spec, value) {
            Ok(bson) => {
                out.insert(key.clone(), bson);
            }
            Err(message) => errors.push(FieldError::new(key, message)),
        }
    }

    match mode {
        WriteMode::Create => {
            for spec in kind.fields().iter().filter(|f| f.required) {
                if !object.contains_key(spec.name) {
                    errors.push(FieldError::new(spec.name, "is required"));
                }
            }
        }
        WriteMode::Update => {
            if object.is_empty() {
                errors.push(FieldError::new("body", "no fields to update"));
            }
        }
    }

    if errors.is_empty() {
        Ok(out)
    } else {
        Err(errors)
    }
}

fn convert(spec: &FieldSpec, value: &Value) -> Result<Bson, String> {
    match spec.kind {
        FieldKind::Text => {
            let s = value.as_str().ok_or("must be a string")?;
            if spec.required && s.trim().is_empty() {
                return Err("must not be empty".into());
            }
            Ok(Bson::String(s.trim().to_string()))
        }
        FieldKind::Number => value
            .as_f64()
            .map(Bson::Double)
            .ok_or_else(|| "must be a number".into()),
        FieldKind::Integer => value
            .as_i64()
            .map(Bson::Int64)
            .ok_or_else(|| "must be an integer".into()),
        FieldKind::Bool => value
            .as_bool()
            .map(Bson::Boolean)
            .ok_or_else(|| "must be a boolean".into()),
        FieldKind::TextList => {
            let items = value.as_array().ok_or("must be an array of strings")?;
            items
                .iter()
                .map(|item| {
                    item.as_str()
                        .map(|s| Bson::String(s.to_string()))
                        .ok_or_else(|| "must be an array of strings".to_string())
                })
                .collect::<Result<Vec<_>, _>>()
                .map(Bson::Array)
        }
        FieldKind::Reference => {
            let s = value.as_str().ok_or("must be a record id")?;
            ObjectId::parse_str(s).map_err(|_| "must be a record id".to_string())?;
            Ok(Bson::String(s.to_string()))
        }
        FieldKind::Date => {
            let s = value.as_str().ok_or("must be a date string")?;
            parse_date(s)
                .map(|dt| Bson::DateTime(bson::DateTime::from_chrono(dt)))
                .ok_or_else(|| "must be an RFC 3339 timestamp or YYYY-MM-DD".into())
        }
        FieldKind::RoleName => {
            let s = value.as_str().ok_or("must be a role name")?;
            s.parse::<Role>()
                .map(|role| Bson::String(role.as_str().to_string()))
                .map_err(|e| e.to_string())
        }
        FieldKind::Password => {
            let s = value.as_str().ok_or("must be a string")?;
            if s.chars().count() < MIN_PASSWORD_LEN {
                return Err(format!("must be at least {MIN_PASSWORD_LEN} characters"));
            }
            Ok(Bson::String(s.to_string()))
        }
    }
}

fn parse_date(s: &str) -> Option<ChronoDateTime<Utc>> {
    if let Ok(dt) = ChronoDateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

/// Convert a query-string value into a filter value for a declared field.
///
/// Returns `None` for kinds that cannot be filtered by equality.
pub fn filter_value(spec: &FieldSpec, raw: &str) -> Option<Bson> {
    match spec.kind {
        FieldKind::Text | FieldKind::TextList | FieldKind::Reference | FieldKind::RoleName => {
            Some(Bson::String(raw.to_string()))
        }
        FieldKind::Bool => raw.parse().ok().map(Bson::Boolean),
        FieldKind::Integer => raw.parse().ok().map(Bson::Int64),
        FieldKind::Number => raw.parse().ok().map(Bson::Double),
        FieldKind::Date | FieldKind::Password => None,
    }
}

/// Render a stored record as API JSON.
///
/// `_id` becomes `id`, metadata timestamps are lifted to the top level and
/// credentials are never included.
pub fn render_record(record: &Document) -> Value {
    let mut out = Map::new();

    if let Some(id) = record.get_object_id("_id").ok() {
        out.insert("id".into(), Value::String(id.to_hex()));
    }

    for (key, value) in record {
        if matches!(key.as_str(), "_id" | "password_hash" | "password") || key == METADATA_KEY {
            continue;
        }
        out.insert(key.clone(), bson_to_json(value));
    }

    let metadata = Metadata::of(record);
    for (key, at) in [("created_at", metadata.created_at), ("updated_at", metadata.updated_at)] {
        if let Some(at) = at {
            out.insert(key.into(), bson_to_json(&Bson::DateTime(at)));
        }
    }

    Value::Object(out)
}

/// JSON view of a BSON value with readable ids and timestamps
pub fn bson_to_json(value: &Bson) -> Value {
    match value {
        Bson::ObjectId(oid) => Value::String(oid.to_hex()),
        Bson::DateTime(dt) => dt
            .try_to_rfc3339_string()
            .map(Value::String)
            .unwrap_or(Value::Null),
        Bson::Array(items) => Value::Array(items.iter().map(bson_to_json).collect()),
        Bson::Document(doc) => Value::Object(
            doc.iter()
                .map(|(k, v)| (k.clone(), bson_to_json(v)))
                .collect(),
        ),
        other => other.clone().into_relaxed_extjson(),
    }
}
