//! CRUD routes for the CRM resource collections
//!
//! - GET    /api/{resource}      - Paged list with search, sort and filters
//! - POST   /api/{resource}      - Create
//! - GET    /api/{resource}/{id} - Fetch one
//! - PUT    /api/{resource}/{id} - Partial update
//! - DELETE /api/{resource}/{id} - Soft delete
//!
//! Access has already been checked by the server; handlers here only
//! validate input and talk to the store. Users get extra rules on top of the
//! generic flow (password hashing, unique email, system admin protection).

use bson::{doc, oid::ObjectId, Bson, Document};
use bytes::Bytes;
use hyper::StatusCode;
use serde::Serialize;
use serde_json::Value;
use tracing::debug;

use crate::auth::{hash_password, Action, AuthError, Claims, Role};
use crate::db::schemas::{
    filter_value, render_record, validate_body, FieldKind, ResourceKind, WriteMode,
};
use crate::db::{Query, Search, SortDir};
use crate::logging::{AuditEvent, EventType};
use crate::routes::{json_response, ApiError, ApiResult, RequestContext};
use crate::server::AppState;
use crate::types::HealthdeskError;

pub const DEFAULT_PAGE_SIZE: u64 = 20;
pub const MAX_PAGE_SIZE: u64 = 100;

/// Parsed list parameters
#[derive(Debug, Clone, PartialEq)]
pub struct ListQuery {
    pub page: u64,
    pub limit: u64,
    pub search: Option<String>,
    pub sort_by: Option<String>,
    pub sort_dir: SortDir,
    /// Remaining parameters, treated as equality filters
    pub filters: Vec<(String, String)>,
}

impl Default for ListQuery {
    fn default() -> Self {
        Self {
            page: 1,
            limit: DEFAULT_PAGE_SIZE,
            search: None,
            sort_by: None,
            sort_dir: SortDir::Desc,
            filters: Vec::new(),
        }
    }
}

fn decode_component(raw: &str) -> Result<String, ApiError> {
    urlencoding::decode(&raw.replace('+', " "))
        .map(|s| s.into_owned())
        .map_err(|_| ApiError::bad_request("Query string is not valid UTF-8"))
}

impl ListQuery {
    /// Parse a raw query string (without the leading `?`)
    pub fn parse(raw: Option<&str>) -> Result<Self, ApiError> {
        let mut query = Self::default();

        for pair in raw.unwrap_or("").split('&').filter(|p| !p.is_empty()) {
            let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
            let key = decode_component(key)?;
            let value = decode_component(value)?;

            match key.as_str() {
                "page" => {
                    query.page = value
                        .parse()
                        .ok()
                        .filter(|p| *p >= 1)
                        .ok_or_else(|| ApiError::bad_request("page must be a positive integer"))?;
                }
                "limit" => {
                    let limit: u64 = value
                        .parse()
                        .ok()
                        .filter(|l| *l >= 1)
                        .ok_or_else(|| ApiError::bad_request("limit must be a positive integer"))?;
                    query.limit = limit.min(MAX_PAGE_SIZE);
                }
                "search" => {
                    let term = value.trim();
                    query.search = (!term.is_empty()).then(|| term.to_string());
                }
                "sortBy" => query.sort_by = Some(value),
                "sortDir" => {
                    query.sort_dir = match value.to_lowercase().as_str() {
                        "asc" => SortDir::Asc,
                        "desc" => SortDir::Desc,
                        _ => return Err(ApiError::bad_request("sortDir must be asc or desc")),
                    }
                }
                _ => query.filters.push((key, value)),
            }
        }

        Ok(query)
    }

    /// Translate into a store query for `kind`, rejecting unknown fields
    pub fn to_store_query(&self, kind: ResourceKind) -> Result<Query, ApiError> {
        let mut equals = Document::new();
        for (name, raw) in &self.filters {
            let value = if name == "created_by" {
                Bson::String(raw.clone())
            } else {
                let spec = kind
                    .field(name)
                    .ok_or_else(|| ApiError::bad_request(format!("Unknown filter field: {name}")))?;
                filter_value(spec, raw).ok_or_else(|| {
                    ApiError::bad_request(format!("Invalid filter value for {name}"))
                })?
            };
            equals.insert(name.clone(), value);
        }

        let sort_field = match self.sort_by.as_deref() {
            None | Some("created_at") => "metadata.created_at".to_string(),
            Some("updated_at") => "metadata.updated_at".to_string(),
            Some(name) => match kind.field(name) {
                Some(spec) if spec.kind != FieldKind::Password => name.to_string(),
                _ => return Err(ApiError::bad_request(format!("Cannot sort by {name}"))),
            },
        };

        let skip = (self.page - 1)
            .checked_mul(self.limit)
            .filter(|skip| i64::try_from(*skip).is_ok())
            .ok_or_else(|| ApiError::bad_request("page is out of range"))?;

        Ok(Query {
            equals,
            search: self.search.as_ref().map(|term| Search {
                fields: kind.search_fields().to_vec(),
                term: term.clone(),
            }),
            sort: Some((sort_field, self.sort_dir)),
            skip,
            limit: self.limit,
        })
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ListResponse {
    pub items: Vec<Value>,
    pub total: u64,
    pub page: u64,
    pub limit: u64,
    pub total_pages: u64,
}

fn parse_id(kind: ResourceKind, id: Option<&str>) -> Result<ObjectId, ApiError> {
    let id = id.ok_or_else(|| ApiError::bad_request("Missing record id"))?;
    ObjectId::parse_str(id).map_err(|_| ApiError::bad_request(format!("Invalid {} id", kind.label().to_lowercase())))
}

fn not_found(kind: ResourceKind) -> ApiError {
    ApiError::not_found(format!("{} not found", kind.label()))
}

fn parse_body(body: &Bytes) -> Result<Value, ApiError> {
    crate::routes::parse_json(body)
}

/// Dispatch a resource operation
pub async fn handle_resource_request(
    state: &AppState,
    ctx: &RequestContext,
    kind: ResourceKind,
    action: Action,
    id: Option<&str>,
    query: Option<&str>,
    body: &Bytes,
) -> ApiResult {
    let claims = ctx.principal()?;

    match action {
        Action::List => list(state, kind, query).await,
        Action::Get => get(state, kind, parse_id(kind, id)?).await,
        Action::Create => create(state, ctx, claims, kind, body).await,
        Action::Update => update(state, ctx, claims, kind, parse_id(kind, id)?, body).await,
        Action::Delete => delete(state, ctx, claims, kind, parse_id(kind, id)?).await,
    }
}

async fn list(state: &AppState, kind: ResourceKind, raw_query: Option<&str>) -> ApiResult {
    let params = ListQuery::parse(raw_query)?;
    let query = params.to_store_query(kind)?;

    let total = state.store.count(kind.collection(), &query).await?;
    let records = state.store.find(kind.collection(), &query).await?;
    debug!(collection = kind.collection(), total, returned = records.len(), "Listed records");

    Ok(json_response(
        StatusCode::OK,
        &ListResponse {
            items: records.iter().map(render_record).collect(),
            total,
            page: params.page,
            limit: params.limit,
            total_pages: total.div_ceil(params.limit),
        },
    ))
}

async fn get(state: &AppState, kind: ResourceKind, id: ObjectId) -> ApiResult {
    let record = state
        .store
        .find_by_id(kind.collection(), &id)
        .await?
        .ok_or_else(|| not_found(kind))?;
    Ok(json_response(StatusCode::OK, &render_record(&record)))
}

async fn create(
    state: &AppState,
    ctx: &RequestContext,
    claims: &Claims,
    kind: ResourceKind,
    body: &Bytes,
) -> ApiResult {
    let body = parse_body(body)?;
    let mut fields =
        validate_body(kind, &body, WriteMode::Create).map_err(ApiError::invalid_fields)?;

    if kind == ResourceKind::Users {
        prepare_user_write(state, claims, &mut fields, None).await?;
        if !fields.contains_key("is_active") {
            fields.insert("is_active", true);
        }
    }
    fields.insert("created_by", claims.subject_id.clone());

    let id = state
        .store
        .insert(kind.collection(), fields)
        .await
        .map_err(|e| map_write_error(kind, e))?;
    let record = state
        .store
        .find_by_id(kind.collection(), &id)
        .await?
        .ok_or_else(|| not_found(kind))?;

    audit_change(state, ctx, claims, EventType::RecordCreated, kind, Action::Create, &id).await;
    Ok(json_response(StatusCode::CREATED, &render_record(&record)))
}

async fn update(
    state: &AppState,
    ctx: &RequestContext,
    claims: &Claims,
    kind: ResourceKind,
    id: ObjectId,
    body: &Bytes,
) -> ApiResult {
    let body = parse_body(body)?;
    let mut fields =
        validate_body(kind, &body, WriteMode::Update).map_err(ApiError::invalid_fields)?;

    if kind == ResourceKind::Users {
        let existing = state
            .store
            .find_by_id(kind.collection(), &id)
            .await?
            .ok_or_else(|| not_found(kind))?;
        guard_system_admin_target(claims, &existing)?;
        prepare_user_write(state, claims, &mut fields, Some(&id)).await?;
    }

    let matched = state
        .store
        .update_by_id(kind.collection(), &id, fields)
        .await
        .map_err(|e| map_write_error(kind, e))?;
    if !matched {
        return Err(not_found(kind));
    }

    let record = state
        .store
        .find_by_id(kind.collection(), &id)
        .await?
        .ok_or_else(|| not_found(kind))?;

    audit_change(state, ctx, claims, EventType::RecordUpdated, kind, Action::Update, &id).await;
    Ok(json_response(StatusCode::OK, &render_record(&record)))
}

async fn delete(
    state: &AppState,
    ctx: &RequestContext,
    claims: &Claims,
    kind: ResourceKind,
    id: ObjectId,
) -> ApiResult {
    if kind == ResourceKind::Users {
        if claims.subject_id == id.to_hex() {
            return Err(ApiError::bad_request("You cannot delete your own account"));
        }
        if let Some(existing) = state.store.find_by_id(kind.collection(), &id).await? {
            guard_system_admin_target(claims, &existing)?;
        }
    }

    if !state.store.delete_by_id(kind.collection(), &id).await? {
        return Err(not_found(kind));
    }

    audit_change(state, ctx, claims, EventType::RecordDeleted, kind, Action::Delete, &id).await;
    Ok(json_response(
        StatusCode::OK,
        &serde_json::json!({ "id": id.to_hex(), "deleted": true }),
    ))
}

/// Only a system admin may touch a system admin account
fn guard_system_admin_target(claims: &Claims, existing: &Document) -> Result<(), ApiError> {
    let target_is_sysadmin = existing.get_str("role").ok() == Some(Role::SystemAdmin.as_str());
    if target_is_sysadmin && claims.role != Role::SystemAdmin {
        return Err(AuthError::Forbidden.into());
    }
    Ok(())
}

/// User-specific rules applied to a validated create or update body.
///
/// `current` is the id of the record being updated, `None` on create.
async fn prepare_user_write(
    state: &AppState,
    claims: &Claims,
    fields: &mut Document,
    current: Option<&ObjectId>,
) -> Result<(), ApiError> {
    if fields.get_str("role").ok() == Some(Role::SystemAdmin.as_str())
        && claims.role != Role::SystemAdmin
    {
        return Err(AuthError::Forbidden.into());
    }

    if matches!(fields.get("is_active"), Some(Bson::Null)) {
        return Err(ApiError::bad_request("is_active must not be null"));
    }

    if let Ok(email) = fields.get_str("email") {
        let email = email.to_lowercase();
        let existing = state
            .store
            .find_one(ResourceKind::Users.collection(), doc! { "email": &email })
            .await?;
        let taken_by_other = existing
            .and_then(|record| record.get_object_id("_id").ok())
            .is_some_and(|owner| Some(&owner) != current);
        if taken_by_other {
            return Err(ApiError::conflict("Email is already in use"));
        }
        fields.insert("email", email);
    }

    if let Some(password) = fields.remove("password") {
        let password = password
            .as_str()
            .ok_or_else(|| ApiError::bad_request("password must be a string"))?;
        fields.insert("password_hash", hash_password(password)?);
    }

    Ok(())
}

/// Surface unique index violations from the database as conflicts
fn map_write_error(kind: ResourceKind, e: HealthdeskError) -> ApiError {
    match &e {
        HealthdeskError::Database(message) if message.contains("E11000") => {
            ApiError::conflict(format!("{} already exists", kind.label()))
        }
        _ => e.into(),
    }
}

async fn audit_change(
    state: &AppState,
    ctx: &RequestContext,
    claims: &Claims,
    event_type: EventType,
    kind: ResourceKind,
    action: Action,
    id: &ObjectId,
) {
    let operation = crate::auth::Operation::Resource(kind, action);
    state
        .audit
        .log(
            AuditEvent::new(event_type)
                .with_request_id(ctx.request_id.clone())
                .with_principal(claims)
                .with_operation(operation.to_string())
                .with_record(id.to_hex()),
        )
        .await;
}
