//! End-to-end request tests against the in-memory store

use bson::{doc, oid::ObjectId};
use bytes::Bytes;
use clap::Parser;
use http_body_util::{BodyExt, Full};
use hyper::{HeaderMap, Method, Request, StatusCode};
use serde_json::{json, Value};
use std::sync::Arc;

use super::http::handle_request;
use super::{dispatch, AppState, REQUEST_ID_HEADER};
use crate::auth::jwt::unix_now;
use crate::auth::{hash_password, Authorizer, Role, TokenInput};
use crate::config::Args;
use crate::db::schemas::{UserDoc, USER_COLLECTION};
use crate::db::{DocumentStore, MemoryStore};
use crate::logging::AuditLogger;

const SECRET: &str = "server-test-secret";

struct Harness {
    state: AppState,
    store: Arc<MemoryStore>,
}

struct Reply {
    status: StatusCode,
    headers: HeaderMap,
    body: Value,
}

fn harness() -> Harness {
    let args = Args::try_parse_from(["healthdesk", "--jwt-secret", SECRET]).unwrap();
    let store = Arc::new(MemoryStore::new());
    let state = AppState::new(
        args,
        store.clone(),
        Authorizer::new(SECRET, 3600).unwrap(),
        AuditLogger::new(),
    );
    Harness { state, store }
}

impl Harness {
    /// Store a user directly; `password` is hashed only when given
    async fn add_user(&self, email: &str, role: Role, password: Option<&str>) -> String {
        let hash = match password {
            Some(p) => hash_password(p).unwrap(),
            None => "not-a-login-account".to_string(),
        };
        let user = UserDoc::new(email.to_string(), email.to_string(), role, hash);
        self.store
            .insert(USER_COLLECTION, user.to_document().unwrap())
            .await
            .unwrap()
            .to_hex()
    }

    fn token(&self, subject_id: &str, role: Role) -> String {
        self.state
            .authorizer
            .issue(TokenInput {
                subject_id: subject_id.to_string(),
                email: format!("{}@example.com", role),
                role,
            })
            .unwrap()
    }

    /// Token for a principal that does not need to exist in the store
    fn token_for(&self, role: Role) -> String {
        self.token(&ObjectId::new().to_hex(), role)
    }

    async fn send_raw(&self, req: Request<Bytes>) -> Reply {
        let response = dispatch(&self.state, req).await;
        let status = response.status();
        let headers = response.headers().clone();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        Reply {
            status,
            headers,
            body,
        }
    }

    async fn send(&self, method: Method, path: &str, token: Option<&str>, body: Option<Value>) -> Reply {
        let mut builder = Request::builder().method(method).uri(path);
        if let Some(token) = token {
            builder = builder.header("Authorization", format!("Bearer {token}"));
        }
        let body = body.map(|b| Bytes::from(b.to_string())).unwrap_or_default();
        self.send_raw(builder.body(body).unwrap()).await
    }
}

fn customer(name: &str) -> Value {
    json!({ "name": name, "phone": "13800000000", "status": "active" })
}

#[tokio::test]
async fn test_health_is_public_and_tagged() {
    let h = harness();
    let reply = h.send(Method::GET, "/health", None, None).await;

    assert_eq!(reply.status, StatusCode::OK);
    assert_eq!(reply.body["healthy"], true);
    assert_eq!(reply.body["store"], "memory");
    assert!(reply.headers.contains_key(REQUEST_ID_HEADER));

    let reply = h.send(Method::GET, "/ready", None, None).await;
    assert_eq!(reply.status, StatusCode::OK);

    let reply = h.send(Method::GET, "/version", None, None).await;
    assert_eq!(reply.body["service"], "healthdesk");
}

#[tokio::test]
async fn test_request_id_is_always_minted() {
    let h = harness();
    let req = Request::builder()
        .uri("/health")
        .header("X-Request-Id", "trace-123")
        .body(Bytes::new())
        .unwrap();
    let reply = h.send_raw(req).await;

    let id = reply.headers.get(REQUEST_ID_HEADER).unwrap().to_str().unwrap();
    assert_ne!(id, "trace-123");
    let id = uuid::Uuid::parse_str(id).unwrap();
    assert_eq!(id.get_version(), Some(uuid::Version::Random));
}

#[tokio::test]
async fn test_oversized_body_is_rejected() {
    let args = Args::try_parse_from([
        "healthdesk",
        "--jwt-secret",
        SECRET,
        "--max-body-bytes",
        "64",
    ])
    .unwrap();
    let state = AppState::new(
        args,
        Arc::new(MemoryStore::new()),
        Authorizer::new(SECRET, 3600).unwrap(),
        AuditLogger::new(),
    );
    let addr = "127.0.0.1:9".parse().unwrap();

    let body = json!({ "email": "a@example.com", "password": "x".repeat(200) }).to_string();
    let req = Request::builder()
        .method(Method::POST)
        .uri("/api/auth/login")
        .body(Full::new(Bytes::from(body)))
        .unwrap();
    let response = handle_request(&state, addr, req).await;
    assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let body: Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(body["code"], "PAYLOAD_TOO_LARGE");

    // Within the limit the request reaches the router
    let req = Request::builder()
        .uri("/health")
        .body(Full::new(Bytes::new()))
        .unwrap();
    let response = handle_request(&state, addr, req).await;
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_unknown_route_and_wrong_method() {
    let h = harness();
    let reply = h.send(Method::GET, "/api/invoices", None, None).await;
    assert_eq!(reply.status, StatusCode::NOT_FOUND);
    assert_eq!(reply.body["code"], "NOT_FOUND");

    let reply = h.send(Method::DELETE, "/api/customers", None, None).await;
    assert_eq!(reply.status, StatusCode::METHOD_NOT_ALLOWED);
    assert_eq!(reply.headers.get("allow").unwrap(), "GET, POST");
}

#[tokio::test]
async fn test_preflight() {
    let h = harness();
    let reply = h.send(Method::OPTIONS, "/api/customers", None, None).await;
    assert_eq!(reply.status, StatusCode::NO_CONTENT);
    assert!(reply.headers.contains_key("access-control-allow-methods"));
}

#[tokio::test]
async fn test_missing_and_malformed_credentials() {
    let h = harness();

    let reply = h.send(Method::GET, "/api/customers", None, None).await;
    assert_eq!(reply.status, StatusCode::UNAUTHORIZED);
    assert_eq!(reply.body["code"], "UNAUTHENTICATED");

    let req = Request::builder()
        .uri("/api/customers")
        .header("Authorization", format!("bearer {}", h.token_for(Role::Admin)))
        .body(Bytes::new())
        .unwrap();
    let reply = h.send_raw(req).await;
    assert_eq!(reply.body["code"], "UNAUTHENTICATED");

    let reply = h
        .send(Method::GET, "/api/customers", Some("not.a.token"), None)
        .await;
    assert_eq!(reply.status, StatusCode::UNAUTHORIZED);
    assert_eq!(reply.body["code"], "INVALID_TOKEN");
}

#[tokio::test]
async fn test_expired_and_foreign_tokens() {
    let h = harness();
    let input = TokenInput {
        subject_id: ObjectId::new().to_hex(),
        email: "admin@example.com".into(),
        role: Role::Admin,
    };

    let expired = h
        .state
        .authorizer
        .jwt()
        .generate_token_at(input.clone(), unix_now() - 7200)
        .unwrap();
    let reply = h.send(Method::GET, "/api/customers", Some(&expired), None).await;
    assert_eq!(reply.status, StatusCode::UNAUTHORIZED);
    assert_eq!(reply.body["code"], "INVALID_TOKEN");

    let foreign = Authorizer::new("some-other-secret", 3600)
        .unwrap()
        .issue(input)
        .unwrap();
    let reply = h.send(Method::GET, "/api/customers", Some(&foreign), None).await;
    assert_eq!(reply.body["code"], "INVALID_TOKEN");
}

#[tokio::test]
async fn test_role_gates() {
    let h = harness();
    let customer_token = h.token_for(Role::Customer);

    let reply = h
        .send(Method::GET, "/api/customers", Some(&customer_token), None)
        .await;
    assert_eq!(reply.status, StatusCode::FORBIDDEN);
    assert_eq!(reply.body["code"], "FORBIDDEN");

    // Catalog reads are open to any principal
    let reply = h
        .send(Method::GET, "/api/products", Some(&customer_token), None)
        .await;
    assert_eq!(reply.status, StatusCode::OK);

    let sales = h.token_for(Role::Sales);
    let reply = h.send(Method::GET, "/api/users", Some(&sales), None).await;
    assert_eq!(reply.status, StatusCode::FORBIDDEN);
    let reply = h
        .send(Method::GET, "/api/dashboard/stats", Some(&sales), None)
        .await;
    assert_eq!(reply.status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_login_me_and_failures() {
    let h = harness();
    h.add_user("lead@example.com", Role::SalesManager, Some("correct-horse"))
        .await;

    let reply = h
        .send(
            Method::POST,
            "/api/auth/login",
            None,
            Some(json!({ "email": "Lead@Example.com", "password": "correct-horse" })),
        )
        .await;
    assert_eq!(reply.status, StatusCode::OK);
    assert_eq!(reply.body["user"]["role"], "sales_manager");
    assert!(reply.body["user"].get("password_hash").is_none());
    assert!(reply.body["user"]["last_login_at"].is_string());
    let token = reply.body["token"].as_str().unwrap().to_string();

    let me = h.send(Method::GET, "/api/auth/me", Some(&token), None).await;
    assert_eq!(me.status, StatusCode::OK);
    assert_eq!(me.body["email"], "lead@example.com");
    assert_eq!(me.body["role"], "sales_manager");
    assert_eq!(me.body["expiresAt"], reply.body["expiresAt"]);

    for (email, password) in [
        ("lead@example.com", "wrong-horse"),
        ("nobody@example.com", "correct-horse"),
    ] {
        let reply = h
            .send(
                Method::POST,
                "/api/auth/login",
                None,
                Some(json!({ "email": email, "password": password })),
            )
            .await;
        assert_eq!(reply.status, StatusCode::UNAUTHORIZED);
        assert_eq!(reply.body["code"], "INVALID_CREDENTIALS");
    }

    let reply = h
        .send(Method::POST, "/api/auth/login", None, Some(json!({ "email": "x" })))
        .await;
    assert_eq!(reply.status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_refresh_rereads_account() {
    let h = harness();
    let id = h.add_user("rep@example.com", Role::Sales, None).await;
    let oid = ObjectId::parse_str(&id).unwrap();
    let token = h.token(&id, Role::Sales);

    // A role change shows up in the refreshed token
    h.store
        .update_by_id(USER_COLLECTION, &oid, doc! { "role": "sales_manager" })
        .await
        .unwrap();
    let reply = h.send(Method::POST, "/api/auth/refresh", Some(&token), None).await;
    assert_eq!(reply.status, StatusCode::OK);
    let refreshed = reply.body["token"].as_str().unwrap().to_string();
    let me = h.send(Method::GET, "/api/auth/me", Some(&refreshed), None).await;
    assert_eq!(me.body["role"], "sales_manager");

    // Deactivation blocks refresh, but an already-issued token keeps working
    h.store
        .update_by_id(USER_COLLECTION, &oid, doc! { "is_active": false })
        .await
        .unwrap();
    let reply = h.send(Method::POST, "/api/auth/refresh", Some(&token), None).await;
    assert_eq!(reply.status, StatusCode::UNAUTHORIZED);
    assert_eq!(reply.body["code"], "INVALID_TOKEN");

    let reply = h.send(Method::GET, "/api/customers", Some(&token), None).await;
    assert_eq!(reply.status, StatusCode::OK);
}

#[tokio::test]
async fn test_customer_crud() {
    let h = harness();
    let sales_id = ObjectId::new().to_hex();
    let sales = h.token(&sales_id, Role::Sales);
    let admin = h.token_for(Role::Admin);

    let created = h
        .send(Method::POST, "/api/customers", Some(&sales), Some(customer("Lin Wei")))
        .await;
    assert_eq!(created.status, StatusCode::CREATED);
    assert_eq!(created.body["created_by"], sales_id.as_str());
    let id = created.body["id"].as_str().unwrap().to_string();

    h.send(Method::POST, "/api/customers", Some(&sales), Some(customer("Zhao Min")))
        .await;

    let list = h
        .send(Method::GET, "/api/customers?search=lin&limit=10", Some(&sales), None)
        .await;
    assert_eq!(list.status, StatusCode::OK);
    assert_eq!(list.body["total"], 1);
    assert_eq!(list.body["totalPages"], 1);
    assert_eq!(list.body["items"][0]["name"], "Lin Wei");

    let path = format!("/api/customers/{id}");
    let updated = h
        .send(Method::PUT, &path, Some(&sales), Some(json!({ "status": "vip" })))
        .await;
    assert_eq!(updated.status, StatusCode::OK);
    assert_eq!(updated.body["status"], "vip");

    let reply = h.send(Method::DELETE, &path, Some(&sales), None).await;
    assert_eq!(reply.status, StatusCode::FORBIDDEN);

    let reply = h.send(Method::DELETE, &path, Some(&admin), None).await;
    assert_eq!(reply.status, StatusCode::OK);

    let reply = h.send(Method::GET, &path, Some(&sales), None).await;
    assert_eq!(reply.status, StatusCode::NOT_FOUND);

    let list = h.send(Method::GET, "/api/customers", Some(&sales), None).await;
    assert_eq!(list.body["total"], 1);
}

#[tokio::test]
async fn test_validation_errors() {
    let h = harness();
    let sales = h.token_for(Role::Sales);

    let reply = h
        .send(Method::POST, "/api/customers", Some(&sales), Some(json!({ "name": "Lin" })))
        .await;
    assert_eq!(reply.status, StatusCode::BAD_REQUEST);
    assert_eq!(reply.body["code"], "VALIDATION_ERROR");
    assert_eq!(reply.body["details"][0]["field"], "phone");

    let reply = h
        .send(Method::GET, "/api/customers/not-an-id", Some(&sales), None)
        .await;
    assert_eq!(reply.status, StatusCode::BAD_REQUEST);

    let reply = h
        .send(Method::GET, "/api/customers?sortDir=up", Some(&sales), None)
        .await;
    assert_eq!(reply.status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_user_management_rules() {
    let h = harness();
    let admin = h.token_for(Role::Admin);
    let root = h.token_for(Role::SystemAdmin);
    let new_user = json!({
        "email": "Rep@Example.com",
        "name": "Rep",
        "role": "sales",
        "password": "long-enough",
    });

    let reply = h
        .send(Method::POST, "/api/users", Some(&admin), Some(new_user.clone()))
        .await;
    assert_eq!(reply.status, StatusCode::CREATED);
    assert_eq!(reply.body["email"], "rep@example.com");
    assert_eq!(reply.body["is_active"], true);
    assert!(reply.body.get("password_hash").is_none());
    assert!(reply.body.get("password").is_none());

    let reply = h
        .send(Method::POST, "/api/users", Some(&admin), Some(new_user))
        .await;
    assert_eq!(reply.status, StatusCode::CONFLICT);

    let escalation = json!({
        "email": "root2@example.com",
        "name": "Root",
        "role": "system_admin",
        "password": "long-enough",
    });
    let reply = h
        .send(Method::POST, "/api/users", Some(&admin), Some(escalation.clone()))
        .await;
    assert_eq!(reply.status, StatusCode::FORBIDDEN);

    let reply = h
        .send(Method::POST, "/api/users", Some(&root), Some(escalation))
        .await;
    assert_eq!(reply.status, StatusCode::CREATED);
    let root2 = reply.body["id"].as_str().unwrap().to_string();

    let reply = h
        .send(Method::DELETE, &format!("/api/users/{root2}"), Some(&admin), None)
        .await;
    assert_eq!(reply.status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_user_updates_respect_system_admin_and_self() {
    let h = harness();
    let root_id = h.add_user("root@example.com", Role::SystemAdmin, None).await;
    let rep_id = h.add_user("rep@example.com", Role::Sales, None).await;
    let admin_id = h.add_user("admin@example.com", Role::Admin, None).await;
    let admin = h.token(&admin_id, Role::Admin);
    let root = h.token(&root_id, Role::SystemAdmin);

    // An admin cannot edit a system admin
    let reply = h
        .send(
            Method::PUT,
            &format!("/api/users/{root_id}"),
            Some(&admin),
            Some(json!({ "name": "Renamed" })),
        )
        .await;
    assert_eq!(reply.status, StatusCode::FORBIDDEN);

    // Nor promote anyone to system admin
    let reply = h
        .send(
            Method::PUT,
            &format!("/api/users/{rep_id}"),
            Some(&admin),
            Some(json!({ "role": "system_admin" })),
        )
        .await;
    assert_eq!(reply.status, StatusCode::FORBIDDEN);
    let stored = h
        .store
        .find_by_id(USER_COLLECTION, &ObjectId::parse_str(&rep_id).unwrap())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.get_str("role").unwrap(), "sales");

    // A system admin can do both
    let reply = h
        .send(
            Method::PUT,
            &format!("/api/users/{rep_id}"),
            Some(&root),
            Some(json!({ "role": "system_admin" })),
        )
        .await;
    assert_eq!(reply.status, StatusCode::OK);

    // Nobody deletes their own account
    let reply = h
        .send(Method::DELETE, &format!("/api/users/{admin_id}"), Some(&admin), None)
        .await;
    assert_eq!(reply.status, StatusCode::BAD_REQUEST);
    let reply = h
        .send(Method::DELETE, &format!("/api/users/{root_id}"), Some(&root), None)
        .await;
    assert_eq!(reply.status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_dashboard_stats() {
    let h = harness();
    let admin = h.token_for(Role::Admin);
    let manager = h.token_for(Role::SalesManager);

    let product = h
        .send(
            Method::POST,
            "/api/products",
            Some(&admin),
            Some(json!({ "name": "Fish Oil", "price": 99.0 })),
        )
        .await;
    let product_id = product.body["id"].as_str().unwrap().to_string();
    let buyer = h
        .send(Method::POST, "/api/customers", Some(&admin), Some(customer("Lin Wei")))
        .await;
    let customer_id = buyer.body["id"].as_str().unwrap().to_string();

    for quantity in [1, 2] {
        let reply = h
            .send(
                Method::POST,
                "/api/purchases",
                Some(&admin),
                Some(json!({
                    "customer_id": customer_id,
                    "product_id": product_id,
                    "quantity": quantity,
                    "amount": 99.0 * quantity as f64,
                })),
            )
            .await;
        assert_eq!(reply.status, StatusCode::CREATED);
    }
    h.send(
        Method::POST,
        "/api/follow-ups",
        Some(&admin),
        Some(json!({ "customer_id": customer_id, "content": "Call back", "status": "pending" })),
    )
    .await;

    let reply = h
        .send(Method::GET, "/api/dashboard/stats", Some(&manager), None)
        .await;
    assert_eq!(reply.status, StatusCode::OK);
    assert_eq!(reply.body["customers"], 1);
    assert_eq!(reply.body["purchases"], 2);
    assert_eq!(reply.body["pendingFollowUps"], 1);
    assert_eq!(reply.body["revenue"]["total"], 297.0);
    assert_eq!(reply.body["revenue"]["orders"], 2);
    assert_eq!(reply.body["customersByStatus"][0]["status"], "active");
    assert_eq!(reply.body["topProducts"][0]["name"], "Fish Oil");
    assert_eq!(reply.body["topProducts"][0]["quantity"], 3);
}
