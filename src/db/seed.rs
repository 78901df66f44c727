//! Startup seeding
//!
//! Creates the bootstrap `system_admin` account when none exists yet for the
//! configured email.

use bson::doc;
use tracing::info;

use crate::auth::{hash_password, Role, MIN_PASSWORD_LEN};
use crate::db::schemas::{UserDoc, USER_COLLECTION};
use crate::db::store::DocumentStore;
use crate::types::{HealthdeskError, Result};

/// Ensure a system administrator with this email exists.
///
/// Returns `true` when a new account was created.
pub async fn ensure_system_admin(
    store: &dyn DocumentStore,
    email: &str,
    password: &str,
) -> Result<bool> {
    let email = email.trim().to_lowercase();

    if store
        .find_one(USER_COLLECTION, doc! { "email": &email })
        .await?
        .is_some()
    {
        info!(email = %email, "Bootstrap admin already present");
        return Ok(false);
    }

    if password.chars().count() < MIN_PASSWORD_LEN {
        return Err(HealthdeskError::Config(format!(
            "Bootstrap admin password must be at least {MIN_PASSWORD_LEN} characters"
        )));
    }

    let user = UserDoc::new(
        email.clone(),
        "System Administrator".to_string(),
        Role::SystemAdmin,
        hash_password(password)?,
    );
    let id = store.insert(USER_COLLECTION, user.to_document()?).await?;

    info!(email = %email, id = %id.to_hex(), "Bootstrap system admin created");
    Ok(true)
}
