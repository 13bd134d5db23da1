//! Append-only audit log.
//!
//! A second writer receiving a configured subset of events (tool calls,
//! denials, client connections, policy events) as JSON lines for offline
//! review. Every policy denial is recorded regardless of whether it surfaced
//! as an error or as a structured blocked result.

use std::collections::HashSet;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;
use std::sync::{Arc, Mutex};

use serde_json::Value;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use uuid::Uuid;

use crate::config::AuditConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AuditCategory {
    ToolCalls,
    AccessDenied,
    ClientConnections,
    SecurityPolicy,
}

impl AuditCategory {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ToolCalls => "tool_calls",
            Self::AccessDenied => "access_denied",
            Self::ClientConnections => "client_connections",
            Self::SecurityPolicy => "security_policy",
        }
    }

    fn parse(raw: &str) -> Option<Self> {
        match raw {
            "tool_calls" => Some(Self::ToolCalls),
            "access_denied" => Some(Self::AccessDenied),
            "client_connections" => Some(Self::ClientConnections),
            "security_policy" => Some(Self::SecurityPolicy),
            _ => None,
        }
    }
}

#[derive(Clone)]
pub struct AuditLog {
    file: Arc<Mutex<File>>,
    categories: Arc<HashSet<AuditCategory>>,
}

impl AuditLog {
    /// Open the audit file in append mode. Returns `None` when auditing is
    /// disabled; an unopenable file is a boot error.
    pub fn from_config(cfg: &AuditConfig) -> std::io::Result<Option<Self>> {
        if !cfg.enabled {
            return Ok(None);
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(Path::new(&cfg.file))?;

        let categories: HashSet<AuditCategory> = cfg
            .events
            .iter()
            .filter_map(|name| {
                let parsed = AuditCategory::parse(name);
                if parsed.is_none() {
                    tracing::warn!(event = %name, "Unknown audit event category, ignoring");
                }
                parsed
            })
            .collect();

        Ok(Some(Self {
            file: Arc::new(Mutex::new(file)),
            categories: Arc::new(categories),
        }))
    }

    /// Append one event if its category is enabled.
    pub fn record(&self, category: AuditCategory, event: Value) {
        if !self.categories.contains(&category) {
            return;
        }

        let timestamp = OffsetDateTime::now_utc()
            .format(&Rfc3339)
            .unwrap_or_default();
        let mut entry = serde_json::Map::new();
        entry.insert("id".to_string(), Value::String(Uuid::new_v4().to_string()));
        entry.insert("time".to_string(), Value::String(timestamp));
        entry.insert(
            "category".to_string(),
            Value::String(category.as_str().to_string()),
        );
        if let Value::Object(fields) = event {
            entry.extend(fields);
        } else {
            entry.insert("event".to_string(), event);
        }

        let line = Value::Object(entry).to_string();
        match self.file.lock() {
            Ok(mut file) => {
                if let Err(e) = writeln!(file, "{line}") {
                    tracing::warn!(error = %e, "Failed to write audit entry");
                }
            }
            Err(_) => tracing::warn!("Audit log mutex poisoned, dropping entry"),
        }
    }
}

/// Record on an optional audit log without cluttering call sites.
pub fn record(audit: &Option<AuditLog>, category: AuditCategory, event: Value) {
    if let Some(audit) = audit {
        audit.record(category, event);
    }
}
