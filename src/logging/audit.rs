//! Audit trail
//!
//! Security-relevant events (logins, access denials, record mutations) are
//! emitted as `tracing` events on the `healthdesk::audit` target and, when an
//! audit file is configured, appended to it as JSONL. Token contents are
//! never recorded.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{error, info, warn};

use crate::auth::{Claims, Role};

/// Tracing target for audit events
pub const AUDIT_TARGET: &str = "healthdesk::audit";

/// Audit event types
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    LoginSucceeded,
    LoginFailed,
    /// Rejected by the authorizer (401 or 403)
    AccessDenied,
    RecordCreated,
    RecordUpdated,
    RecordDeleted,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::LoginSucceeded => "login_succeeded",
            EventType::LoginFailed => "login_failed",
            EventType::AccessDenied => "access_denied",
            EventType::RecordCreated => "record_created",
            EventType::RecordUpdated => "record_updated",
            EventType::RecordDeleted => "record_deleted",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AuditEvent {
    pub timestamp: DateTime<Utc>,
    pub event_type: EventType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    /// Acting principal, when known
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<Role>,
    /// Login identifier (login events only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operation: Option<String>,
    /// HTTP status returned to the caller
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub record_id: Option<String>,
}

impl AuditEvent {
    pub fn new(event_type: EventType) -> Self {
        Self {
            timestamp: Utc::now(),
            event_type,
            request_id: None,
            subject_id: None,
            role: None,
            email: None,
            operation: None,
            status: None,
            record_id: None,
        }
    }

    /// Attribute the event to the principal in `claims`
    pub fn with_principal(mut self, claims: &Claims) -> Self {
        self.subject_id = Some(claims.subject_id.clone());
        self.role = Some(claims.role);
        self
    }

    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = Some(request_id.into());
        self
    }

    pub fn with_email(mut self, email: impl Into<String>) -> Self {
        self.email = Some(email.into());
        self
    }

    pub fn with_operation(mut self, operation: impl Into<String>) -> Self {
        self.operation = Some(operation.into());
        self
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_record(mut self, record_id: impl Into<String>) -> Self {
        self.record_id = Some(record_id.into());
        self
    }

    pub fn to_jsonl(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// Audit logger, cheap to clone and shared across requests
#[derive(Clone, Default)]
pub struct AuditLogger {
    inner: Arc<Mutex<AuditLoggerInner>>,
}

#[derive(Default)]
struct AuditLoggerInner {
    writer: Option<BufWriter<File>>,
    path: Option<PathBuf>,
}

impl AuditLogger {
    /// Logger that only emits tracing events
    pub fn new() -> Self {
        Self::default()
    }

    /// Also append events to a JSONL file
    pub async fn init_file(&self, path: PathBuf) -> std::io::Result<()> {
        let file = OpenOptions::new().create(true).append(true).open(&path)?;

        let mut inner = self.inner.lock().await;
        inner.writer = Some(BufWriter::new(file));
        inner.path = Some(path.clone());

        info!("Audit log writing to {}", path.display());
        Ok(())
    }

    pub async fn path(&self) -> Option<PathBuf> {
        self.inner.lock().await.path.clone()
    }

    pub async fn log(&self, event: AuditEvent) {
        let operation = event.operation.as_deref().unwrap_or("-");
        let subject = event.subject_id.as_deref().unwrap_or("-");
        let role = event.role.map(|r| r.as_str()).unwrap_or("-");
        let status = event.status.unwrap_or(0);
        match event.event_type {
            EventType::LoginFailed | EventType::AccessDenied => warn!(
                target: AUDIT_TARGET,
                event = event.event_type.as_str(),
                operation,
                subject,
                role,
                status,
                "audit"
            ),
            _ => info!(
                target: AUDIT_TARGET,
                event = event.event_type.as_str(),
                operation,
                subject,
                role,
                record = event.record_id.as_deref().unwrap_or("-"),
                "audit"
            ),
        }

        let mut inner = self.inner.lock().await;
        let Some(writer) = inner.writer.as_mut() else {
            return;
        };

        let line = match event.to_jsonl() {
            Ok(line) => line,
            Err(e) => {
                error!("Failed to serialize audit event: {}", e);
                return;
            }
        };
        if let Err(e) = writeln!(writer, "{}", line).and_then(|_| writer.flush()) {
            error!("Failed to write audit event: {}", e);
        }
    }
}
