//! Authentication and authorization for healthdesk
//!
//! Provides:
//! - JWT token minting and verification
//! - The request authorizer (bearer extraction, role checks)
//! - The access policy table for routed operations
//! - Password hashing with Argon2

pub mod authorizer;
pub mod jwt;
pub mod password;
pub mod policy;
pub mod roles;

pub use authorizer::{AuthError, Authorizer};
pub use jwt::{extract_token_from_header, Claims, JwtValidator, TokenInput};
pub use password::{hash_password, verify_password, MIN_PASSWORD_LEN};
pub use policy::{required_access, Access, Action, Operation};
pub use roles::Role;
