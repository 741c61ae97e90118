// ── Zapmenu Atoms: Pure Data Types ─────────────────────────────────────────
// Plain struct/enum definitions shared by the engine and its host.
// Atoms layer rule: no I/O, no side effects, no imports from engine/.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle status of one bot instance.
///
/// `stopped → starting → ready → stopping → stopped`
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum InstanceStatus {
    #[default]
    Stopped,
    Starting,
    Ready,
    Stopping,
}

impl fmt::Display for InstanceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            InstanceStatus::Stopped => "stopped",
            InstanceStatus::Starting => "starting",
            InstanceStatus::Ready => "ready",
            InstanceStatus::Stopping => "stopping",
        };
        f.write_str(s)
    }
}

/// Point-in-time view of one instance, as reported to the host.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct InstanceSnapshot {
    pub id: String,
    pub label: String,
    pub status: InstanceStatus,
    pub busy: bool,
    /// A runtime handle is currently attached.
    pub live: bool,
    pub message_count: u64,
}

/// Events the core emits for the GUI layer.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum UiEvent {
    Status {
        instance: String,
        status: InstanceStatus,
    },
    Log {
        #[serde(skip_serializing_if = "Option::is_none")]
        instance: Option<String>,
        line: String,
        at: String,
    },
    QrCode {
        instance: String,
        qr: String,
    },
    LicenseExpired {
        instance: String,
        message: String,
    },
    Error {
        instance: String,
        message: String,
    },
}

impl UiEvent {
    pub fn instance(&self) -> Option<&str> {
        match self {
            UiEvent::Status { instance, .. }
            | UiEvent::QrCode { instance, .. }
            | UiEvent::LicenseExpired { instance, .. }
            | UiEvent::Error { instance, .. } => Some(instance),
            UiEvent::Log { instance, .. } => instance.as_deref(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_event_serializes_with_kind_tag() {
        let ev = UiEvent::Status { instance: "a".into(), status: InstanceStatus::Ready };
        let v = serde_json::to_value(&ev).unwrap();
        assert_eq!(v["kind"], "status");
        assert_eq!(v["status"], "ready");
    }

    #[test]
    fn log_event_omits_missing_instance() {
        let ev = UiEvent::Log { instance: None, line: "hi".into(), at: "t".into() };
        let v = serde_json::to_value(&ev).unwrap();
        assert!(v.get("instance").is_none());
        assert_eq!(ev.instance(), None);
    }
}
