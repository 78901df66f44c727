//! healthdesk - admin backend for the health-products CRM
//!
//! Serves the staff-facing REST API over customers, products, purchases,
//! follow-ups, health plans and user accounts. Every route is guarded by the
//! request authorizer: bearer tokens are verified with a single process-wide
//! secret and the claimed role is checked against the route's access policy.
//!
//! ## Layout
//!
//! - **auth**: token minting and verification, roles, the access policy table
//! - **db**: document store trait with MongoDB and in-memory adapters
//! - **routes**: route table and handlers
//! - **server**: hyper accept loop and request dispatch
//! - **logging**: tracing setup and the audit trail

pub mod auth;
pub mod config;
pub mod db;
pub mod logging;
pub mod routes;
pub mod server;
pub mod types;

pub use config::Args;
pub use server::{run, AppState};
pub use types::{HealthdeskError, Result};
