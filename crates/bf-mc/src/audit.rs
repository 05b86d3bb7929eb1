//! Audit trail for multicast configuration changes.
//!
//! Tree objects, device-global port tables, failover, session scopes and
//! device lifecycle changes each produce one [`AuditRecord`], emitted with
//! [`audit_log!`](crate::audit_log) on the `audit` tracing target with the
//! record serialized as JSON.

use crate::error::{McError, McResult};
use crate::handle::SessionHandle;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditCategory {
    /// Group, node or ECMP group creation
    TreeCreate,
    /// Associations, ECMP membership and node bitmaps
    TreeModify,
    /// Group, node or ECMP group deletion
    TreeDelete,
    /// LAG membership, prune masks, global RID
    PortTable,
    /// Fast failover, protection and forwarding state
    Failover,
    /// Session, batch and transaction boundaries
    Session,
    Device,
    /// Rejected hardware pushes
    Hardware,
    /// State restore and replay
    WarmRestart,
}

impl AuditCategory {
    pub const fn as_str(&self) -> &'static str {
        match self {
            AuditCategory::TreeCreate => "tree_create",
            AuditCategory::TreeModify => "tree_modify",
            AuditCategory::TreeDelete => "tree_delete",
            AuditCategory::PortTable => "port_table",
            AuditCategory::Failover => "failover",
            AuditCategory::Session => "session",
            AuditCategory::Device => "device",
            AuditCategory::Hardware => "hardware",
            AuditCategory::WarmRestart => "warm_restart",
        }
    }
}

impl fmt::Display for AuditCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditOutcome {
    Success,
    Failure,
    /// Rejected because another session holds the device.
    Denied,
    Pending,
}

impl fmt::Display for AuditOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AuditOutcome::Success => "success",
            AuditOutcome::Failure => "failure",
            AuditOutcome::Denied => "denied",
            AuditOutcome::Pending => "pending",
        };
        f.write_str(s)
    }
}

/// The object an audited call acted on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditObject {
    /// `mgrp`, `node`, `ecmp`, `lag`, `port`, `session` or `device`
    pub kind: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditRecord {
    pub at: DateTime<Utc>,
    pub category: AuditCategory,
    pub action: String,
    pub outcome: AuditOutcome,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session: Option<SessionHandle>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub object: Option<AuditObject>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl AuditRecord {
    /// A pending record stamped with the current time.
    pub fn new(category: AuditCategory, action: impl Into<String>) -> Self {
        Self {
            at: Utc::now(),
            category,
            action: action.into(),
            outcome: AuditOutcome::Pending,
            session: None,
            object: None,
            details: None,
            error: None,
        }
    }

    pub fn session(mut self, sess: SessionHandle) -> Self {
        self.session = Some(sess);
        self
    }

    pub fn object(mut self, kind: impl Into<String>, id: Option<String>) -> Self {
        self.object = Some(AuditObject {
            kind: kind.into(),
            id,
        });
        self
    }

    pub fn details(mut self, details: serde_json::Value) -> Self {
        if !details.is_null() {
            self.details = Some(details);
        }
        self
    }

    pub fn succeeded(mut self) -> Self {
        self.outcome = AuditOutcome::Success;
        self
    }

    pub fn failed(mut self, error: impl fmt::Display) -> Self {
        self.outcome = AuditOutcome::Failure;
        self.error = Some(error.to_string());
        self
    }

    /// Sets the outcome from a call's result. A `TableLocked` error counts
    /// as denied rather than failed.
    pub fn result<T>(self, result: &McResult<T>) -> Self {
        match result {
            Ok(_) => self.succeeded(),
            Err(e @ McError::TableLocked { .. }) => {
                let mut record = self.failed(e);
                record.outcome = AuditOutcome::Denied;
                record
            }
            Err(e) => self.failed(e),
        }
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|e| format!(r#"{{"audit_error":"{}"}}"#, e))
    }
}

/// Emits an [`AuditRecord`] on the `audit` target: info on success, debug
/// while pending, warn on failure or denial.
#[macro_export]
macro_rules! audit_log {
    ($record:expr) => {{
        let record: $crate::audit::AuditRecord = $record;
        let session = record.session.map(|s| s.0);
        match record.outcome {
            $crate::audit::AuditOutcome::Success => tracing::info!(
                target: "audit",
                category = record.category.as_str(),
                action = %record.action,
                session,
                audit_json = %record.to_json(),
                "{} {}",
                record.category,
                record.action
            ),
            $crate::audit::AuditOutcome::Pending => tracing::debug!(
                target: "audit",
                category = record.category.as_str(),
                action = %record.action,
                session,
                audit_json = %record.to_json(),
                "{} {} pending",
                record.category,
                record.action
            ),
            $crate::audit::AuditOutcome::Failure | $crate::audit::AuditOutcome::Denied => {
                tracing::warn!(
                    target: "audit",
                    category = record.category.as_str(),
                    action = %record.action,
                    session,
                    error = record.error.as_deref().unwrap_or_default(),
                    audit_json = %record.to_json(),
                    "{} {} {}",
                    record.category,
                    record.action,
                    record.outcome
                )
            }
        }
    }};
}

fn env_filter(log_level: &str) -> tracing_subscriber::EnvFilter {
    tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level))
}

/// Installs a JSON subscriber writing to stderr. `RUST_LOG` overrides
/// `log_level`.
pub fn init_logging(log_level: &str) {
    use tracing_subscriber::{fmt, prelude::*};

    tracing_subscriber::registry()
        .with(env_filter(log_level))
        .with(
            fmt::layer()
                .json()
                .with_target(true)
                .with_file(true)
                .with_line_number(true)
                .with_writer(std::io::stderr),
        )
        .init();
}

/// Installs a compact human-readable subscriber writing to stderr.
pub fn init_logging_pretty(log_level: &str) {
    use tracing_subscriber::{fmt, prelude::*};

    tracing_subscriber::registry()
        .with(env_filter(log_level))
        .with(
            fmt::layer()
                .compact()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .init();
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_record_from_result() {
        let ok: McResult<()> = Ok(());
        let record = AuditRecord::new(AuditCategory::TreeCreate, "node_create")
            .session(SessionHandle(1))
            .object("node", Some("node 0x20000000".to_string()))
            .result(&ok);
        assert_eq!(record.outcome, AuditOutcome::Success);
        assert_eq!(record.session, Some(SessionHandle(1)));
        assert!(record.error.is_none());

        let in_use: McResult<()> = Err(McError::in_use("mgrp 0x10000000"));
        let record = AuditRecord::new(AuditCategory::TreeDelete, "mgrp_destroy").result(&in_use);
        assert_eq!(record.outcome, AuditOutcome::Failure);
        assert_eq!(record.error.as_deref(), Some("Object in use: mgrp 0x10000000"));
    }

    #[test]
    fn test_table_locked_is_denied() {
        let locked: McResult<()> = Err(McError::TableLocked { owner: 3 });
        let record = AuditRecord::new(AuditCategory::TreeCreate, "mgrp_create").result(&locked);
        assert_eq!(record.outcome, AuditOutcome::Denied);
    }

    #[test]
    fn test_json_skips_unset_fields() {
        let record = AuditRecord::new(AuditCategory::Failover, "port_down")
            .details(serde_json::json!({ "port": 5 }))
            .details(serde_json::Value::Null);
        let json: serde_json::Value = serde_json::from_str(&record.to_json()).unwrap();
        assert_eq!(json["category"], "failover");
        assert_eq!(json["outcome"], "pending");
        assert_eq!(json["details"]["port"], 5);
        assert!(json.get("error").is_none());
        assert!(json.get("session").is_none());
        assert!(json.get("object").is_none());
    }
}
