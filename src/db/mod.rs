//! Persistence for healthdesk
//!
//! Handlers work against [`DocumentStore`]; `MongoStore` backs production and
//! `MemoryStore` backs dev mode without a database and the test suite.

pub mod memory;
pub mod mongo;
pub mod schemas;
pub mod seed;
pub mod store;

pub use memory::MemoryStore;
pub use mongo::{MongoClient, MongoStore};
pub use seed::ensure_system_admin;
pub use store::{DocumentStore, Query, Search, SortDir};
