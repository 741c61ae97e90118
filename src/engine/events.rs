// Zapmenu Engine — UI Event Bus
//
// Fan-out of `UiEvent`s to whatever host is listening (GUI, CLI printer).
// Emitting never blocks and never fails: with no subscribers the event is
// dropped, a lagging subscriber skips ahead.

use crate::atoms::constants::EVENT_BUS_CAPACITY;
use crate::atoms::types::{InstanceStatus, UiEvent};
use log::{debug, info};
use tokio::sync::broadcast;

#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<UiEvent>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(EVENT_BUS_CAPACITY)
    }
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        EventBus { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<UiEvent> {
        self.tx.subscribe()
    }

    pub fn emit(&self, event: UiEvent) {
        debug!("[events] {:?}", event);
        let _ = self.tx.send(event);
    }

    pub fn status(&self, instance: &str, status: InstanceStatus) {
        self.emit(UiEvent::Status { instance: instance.to_string(), status });
    }

    /// A log line for the user: goes to the log and to the UI.
    pub fn log(&self, instance: Option<&str>, line: impl Into<String>) {
        let line = line.into();
        match instance {
            Some(id) => info!("[{}] {}", id, line),
            None => info!("{}", line),
        }
        self.emit(UiEvent::Log {
            instance: instance.map(str::to_string),
            line,
            at: chrono::Utc::now().to_rfc3339(),
        });
    }

    pub fn qr(&self, instance: &str, qr: impl Into<String>) {
        self.emit(UiEvent::QrCode { instance: instance.to_string(), qr: qr.into() });
    }

    pub fn error(&self, instance: &str, message: impl Into<String>) {
        self.emit(UiEvent::Error { instance: instance.to_string(), message: message.into() });
    }

    pub fn license_expired(&self, instance: &str, message: impl Into<String>) {
        self.emit(UiEvent::LicenseExpired { instance: instance.to_string(), message: message.into() });
    }
}
