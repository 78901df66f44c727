//! Configuration for healthdesk
//!
//! CLI arguments and environment variable handling using clap. Every value can
//! be given as a flag or through the environment (or a `.env` file).

use clap::{Parser, ValueEnum};
use std::net::SocketAddr;

use crate::types::HealthdeskError;

/// Signing secret used when `--dev-mode` is set and no `JWT_SECRET` is given.
/// Production startup refuses this value.
pub const DEV_FALLBACK_SECRET: &str = "healthdesk-dev-only-insecure-secret";

/// Seven days, the validity window of tokens minted at login.
pub const DEFAULT_TOKEN_LIFETIME_SECS: u64 = 7 * 24 * 60 * 60;

/// Output format for the tracing subscriber
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

/// healthdesk - admin backend for the health-products CRM
#[derive(Parser, Debug, Clone)]
#[command(name = "healthdesk")]
#[command(about = "Admin backend for the health-products CRM")]
pub struct Args {
    /// Address to listen on
    #[arg(long, env = "LISTEN", default_value = "0.0.0.0:8080")]
    pub listen: SocketAddr,

    /// Enable development mode (fallback secret, in-memory store if MongoDB is down)
    #[arg(long, env = "DEV_MODE", default_value = "false")]
    pub dev_mode: bool,

    /// MongoDB connection URI
    #[arg(long, env = "MONGODB_URI", default_value = "mongodb://localhost:27017")]
    pub mongodb_uri: String,

    /// MongoDB database name
    #[arg(long, env = "MONGODB_DB", default_value = "healthdesk")]
    pub mongodb_db: String,

    /// JWT secret for token signing (required in production)
    #[arg(long, env = "JWT_SECRET", hide_env_values = true)]
    pub jwt_secret: Option<String>,

    /// JWT token expiry in seconds
    #[arg(long, env = "JWT_EXPIRY_SECONDS", default_value_t = DEFAULT_TOKEN_LIFETIME_SECS)]
    pub jwt_expiry_seconds: u64,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// Log output format
    #[arg(long, env = "LOG_FORMAT", value_enum, default_value_t = LogFormat::Text)]
    pub log_format: LogFormat,

    /// Append audit events as JSON lines to this file
    #[arg(long, env = "AUDIT_LOG")]
    pub audit_log: Option<std::path::PathBuf>,

    /// Maximum accepted request body size in bytes
    #[arg(long, env = "MAX_BODY_BYTES", default_value = "1048576")]
    pub max_body_bytes: usize,

    /// Email of the system administrator created at startup when missing
    #[arg(long, env = "BOOTSTRAP_ADMIN_EMAIL")]
    pub bootstrap_admin_email: Option<String>,

    /// Password for the bootstrap system administrator
    #[arg(long, env = "BOOTSTRAP_ADMIN_PASSWORD", hide_env_values = true)]
    pub bootstrap_admin_password: Option<String>,
}

impl Args {
    /// Resolve the signing secret once at startup.
    ///
    /// The development fallback is only ever returned in dev mode.
    pub fn resolve_jwt_secret(&self) -> Result<String, HealthdeskError> {
        match (&self.jwt_secret, self.dev_mode) {
            (Some(secret), _) if secret.is_empty() => {
                Err(HealthdeskError::Config("JWT_SECRET must not be empty".into()))
            }
            (Some(secret), false) if secret == DEV_FALLBACK_SECRET => Err(HealthdeskError::Config(
                "JWT_SECRET is set to the development fallback value".into(),
            )),
            (Some(secret), _) => Ok(secret.clone()),
            (None, true) => Ok(DEV_FALLBACK_SECRET.to_string()),
            (None, false) => Err(HealthdeskError::Config(
                "JWT_SECRET is required in production mode".into(),
            )),
        }
    }

    /// Returns the bootstrap admin credentials when both are configured
    pub fn bootstrap_admin(&self) -> Option<(&str, &str)> {
        match (&self.bootstrap_admin_email, &self.bootstrap_admin_password) {
            (Some(email), Some(password)) => Some((email.as_str(), password.as_str())),
            _ => None,
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), String> {
        self.resolve_jwt_secret().map_err(|e| e.to_string())?;

        if self.jwt_expiry_seconds == 0 {
            return Err("JWT_EXPIRY_SECONDS must be greater than zero".to_string());
        }

        if self.max_body_bytes == 0 {
            return Err("MAX_BODY_BYTES must be greater than zero".to_string());
        }

        if self.bootstrap_admin_email.is_some() != self.bootstrap_admin_password.is_some() {
            return Err(
                "BOOTSTRAP_ADMIN_EMAIL and BOOTSTRAP_ADMIN_PASSWORD must be set together"
                    .to_string(),
            );
        }

        Ok(())
    }
}
