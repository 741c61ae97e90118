// Zapmenu Engine — Messaging Runtime Contract
//
// The browser/gateway session that actually talks to WhatsApp lives behind
// these traits. A runtime pushes `RuntimeEvent`s into the channel it was
// created with; the lifecycle manager owns the receiving end.
//
// Module layout:
//   (this file) — RuntimeEvent, InboundMessage, MessagingRuntime, RuntimeFactory
//   evolution   — Evolution API gateway runtime (REST + webhook listener)

pub mod evolution;

use crate::atoms::error::EngineResult;
use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc;

/// A text message received by a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    /// Stable address of the remote party (e.g. `5511999999999@c.us`).
    pub from: String,
    pub body: String,
    /// Push name of the sender, when the network provides one.
    pub display_name: Option<String>,
    pub from_self: bool,
    pub one_to_one: bool,
}

impl InboundMessage {
    /// Only direct messages from someone else are routed.
    pub fn is_routable(&self) -> bool {
        self.one_to_one && !self.from_self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuntimeEvent {
    Qr(String),
    Authenticated,
    Ready,
    Disconnected(String),
    AuthFailure(String),
    Message(InboundMessage),
}

impl RuntimeEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            RuntimeEvent::Qr(_) => "qr",
            RuntimeEvent::Authenticated => "authenticated",
            RuntimeEvent::Ready => "ready",
            RuntimeEvent::Disconnected(_) => "disconnected",
            RuntimeEvent::AuthFailure(_) => "auth_failure",
            RuntimeEvent::Message(_) => "message",
        }
    }
}

pub type EventSender = mpsc::UnboundedSender<RuntimeEvent>;
pub type EventReceiver = mpsc::UnboundedReceiver<RuntimeEvent>;

/// One authenticated messaging session.
#[async_trait]
pub trait MessagingRuntime: Send + Sync {
    /// Bring the session up. QR/auth/ready arrive later as events.
    async fn initialize(&self) -> EngineResult<()>;

    async fn send_message(&self, to: &str, text: &str) -> EngineResult<()>;

    /// Show the "typing…" indicator to a conversant.
    async fn set_typing(&self, to: &str) -> EngineResult<()>;

    /// Graceful teardown. The caller bounds how long it may take.
    async fn destroy(&self) -> EngineResult<()>;

    /// Forced termination after a graceful teardown overran or failed.
    fn kill(&self);
}

/// What a factory needs to know to build a session for one instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeSpec {
    pub instance_id: String,
    /// Credential storage private to this instance.
    pub session_dir: PathBuf,
}

pub trait RuntimeFactory: Send + Sync {
    fn create(&self, spec: &RuntimeSpec, events: EventSender) -> EngineResult<Arc<dyn MessagingRuntime>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn msg(from_self: bool, one_to_one: bool) -> InboundMessage {
        InboundMessage {
            from: "5511@c.us".into(),
            body: "oi".into(),
            display_name: None,
            from_self,
            one_to_one,
        }
    }

    #[test]
    fn only_direct_messages_from_others_are_routable() {
        assert!(msg(false, true).is_routable());
        assert!(!msg(true, true).is_routable());
        assert!(!msg(false, false).is_routable());
    }

    #[test]
    fn event_kinds() {
        assert_eq!(RuntimeEvent::AuthFailure("x".into()).kind(), "auth_failure");
        assert_eq!(RuntimeEvent::Message(msg(false, true)).kind(), "message");
    }
}
