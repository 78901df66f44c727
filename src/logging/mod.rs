//! Logging infrastructure for healthdesk
//!
//! Sets up the `tracing` subscriber and provides the audit trail.

pub mod audit;

pub use audit::{AuditEvent, AuditLogger, EventType, AUDIT_TARGET};

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::LogFormat;

/// Filter used when `RUST_LOG` is not set
pub fn default_filter(level: &str) -> String {
    format!("healthdesk={},info", level)
}

/// Install the global subscriber.
///
/// `RUST_LOG` takes precedence over `level`. Call once, before anything logs.
pub fn init(level: &str, format: LogFormat) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| default_filter(level).into());

    let registry = tracing_subscriber::registry().with(filter);
    match format {
        LogFormat::Text => registry.with(tracing_subscriber::fmt::layer()).init(),
        LogFormat::Json => registry
            .with(tracing_subscriber::fmt::layer().json().with_current_span(true))
            .init(),
    }
}
