//! Audit log events relevant to instance placement.
//!
//! Events are deserialized from JSON records like:
//!
//! ```json
//! {
//!   "timestamp": "2019-12-30T10:00:00Z",
//!   "instance_id": 12345,
//!   "severity": "Info",
//!   "kind": { "type": "SetPlacement", "server_id": "server-1" }
//! }
//! ```

use std::fs;
use std::path::Path;

use chrono::{DateTime, Utc};
use color_eyre::eyre::{Context, Result};
use serde::{Deserialize, Serialize};

use super::types::{ImageLocator, InstanceId, InstanceLocator};

/// Severity of an audit record. Errors record operations that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Severity {
    #[default]
    Info,
    Notice,
    Warning,
    Error,
}

/// What happened to the instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum EventKind {
    Insert {
        reference: Option<InstanceLocator>,
        #[serde(default)]
        image: Option<ImageLocator>,
    },
    Start {
        reference: Option<InstanceLocator>,
    },
    Resume {
        reference: Option<InstanceLocator>,
    },
    Stop {
        reference: Option<InstanceLocator>,
    },
    Suspend {
        reference: Option<InstanceLocator>,
    },
    Delete {
        reference: Option<InstanceLocator>,
    },
    /// The guest OS shut the instance down
    GuestTerminate {
        reference: Option<InstanceLocator>,
    },
    TerminateOnHostMaintenance {
        reference: Option<InstanceLocator>,
    },
    /// The instance was placed on a sole-tenant node
    SetPlacement {
        server_id: String,
    },
    /// Anything not relevant to placement history
    #[serde(other)]
    Other,
}

/// One audit log record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEvent {
    pub timestamp: DateTime<Utc>,
    /// Absent for events that are not scoped to an instance
    #[serde(default)]
    pub instance_id: Option<InstanceId>,
    #[serde(default)]
    pub severity: Severity,
    pub kind: EventKind,
}

impl AuditEvent {
    pub fn new(timestamp: DateTime<Utc>, instance_id: InstanceId, kind: EventKind) -> Self {
        Self {
            timestamp,
            instance_id: Some(instance_id),
            severity: Severity::Info,
            kind,
        }
    }

    /// Instance this event applies to, if it is relevant for history.
    pub fn relevant_instance(&self) -> Option<InstanceId> {
        if self.severity == Severity::Error || self.kind == EventKind::Other {
            return None;
        }
        self.instance_id
    }
}

/// Load audit events from a JSON array and order them newest first.
pub fn load_events(path: &Path) -> Result<Vec<AuditEvent>> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read audit events: {}", path.display()))?;
    let mut events: Vec<AuditEvent> = serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse audit events: {}", path.display()))?;

    sort_newest_first(&mut events);
    log::info!("Loaded {} audit events from {}", events.len(), path.display());
    Ok(events)
}

/// Stable sort by descending timestamp.
pub fn sort_newest_first(events: &mut [AuditEvent]) {
    events.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
}
