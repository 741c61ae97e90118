// Zapmenu Engine — Instance Event Pump
//
// One task per running instance. Drains runtime events in arrival order and
// ticks the licence re-check. Messages are handled inline, so replies to
// the same instance never interleave. The close signal is only looked at
// between events, so a reply in progress when the instance stops still ends.

use super::{ManagerInner, SessionManager};
use crate::atoms::error::EngineError;
use crate::atoms::types::InstanceStatus;
use crate::engine::dialogue::DialogueTable;
use crate::engine::entitlement::Verdict;
use crate::engine::router;
use crate::engine::runtime::{EventReceiver, InboundMessage, MessagingRuntime, RuntimeEvent};
use log::{debug, info, warn};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;

pub(super) struct Dispatcher {
    pub(super) manager: Arc<ManagerInner>,
    pub(super) instance: String,
    pub(super) generation: u64,
    pub(super) runtime: Arc<dyn MessagingRuntime>,
    pub(super) dialogue: Arc<DialogueTable>,
    pub(super) message_count: Arc<AtomicU64>,
}

impl Dispatcher {
    pub(super) async fn run(self, mut rx: EventReceiver, mut close: oneshot::Receiver<()>, recheck: Option<Duration>) {
        let mut ticker = recheck.map(|every| {
            let mut t = tokio::time::interval_at(tokio::time::Instant::now() + every, every);
            t.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            t
        });

        loop {
            tokio::select! {
                biased;
                _ = &mut close => break,
                event = rx.recv() => match event {
                    Some(event) => self.handle(event).await,
                    None => break,
                },
                _ = tick(&mut ticker) => {
                    if self.recheck_entitlement().await {
                        break;
                    }
                }
            }
        }
        debug!("[lifecycle:{}] Event pump (gen {}) finished", self.instance, self.generation);
    }

    async fn handle(&self, event: RuntimeEvent) {
        debug!("[lifecycle:{}] event {}", self.instance, event.kind());
        match event {
            RuntimeEvent::Qr(qr) => self.on_qr(qr),
            RuntimeEvent::Authenticated => self.on_authenticated(),
            RuntimeEvent::Ready => self.on_ready(),
            RuntimeEvent::Disconnected(reason) => self.on_disconnected(reason),
            RuntimeEvent::AuthFailure(reason) => self.on_auth_failure(reason),
            RuntimeEvent::Message(msg) => self.on_message(msg).await,
        }
    }

    // ── Session events ─────────────────────────────────────────────────

    fn on_qr(&self, qr: String) {
        let events = &self.manager.events;
        events.qr(&self.instance, qr);
        events.log(Some(&self.instance), "QR code received. Scan it with WhatsApp.");
    }

    fn on_authenticated(&self) {
        self.manager.events.log(Some(&self.instance), "Authenticated.");
    }

    fn on_ready(&self) {
        if self.manager.advance(&self.instance, self.generation, &[InstanceStatus::Starting], InstanceStatus::Ready) {
            self.manager.events.log(Some(&self.instance), "Bot connected and ready.");
        }
    }

    fn on_disconnected(&self, reason: String) {
        self.manager.events.log(Some(&self.instance), format!("Disconnected: {}", reason));
        self.session_lost(&reason);
    }

    fn on_auth_failure(&self, reason: String) {
        self.manager
            .events
            .error(&self.instance, format!("Authentication failed: {}", reason));
        self.session_lost(&reason);
    }

    /// Stop from a separate task, pinned to this pump's generation so a late
    /// event cannot take down a newer handle.
    fn session_lost(&self, reason: &str) {
        if !self.manager.session_lost(&self.instance, self.generation, reason) {
            return;
        }
        let manager = SessionManager::from_inner(self.manager.clone());
        let id = self.instance.clone();
        let generation = self.generation;
        tokio::spawn(async move {
            if let Err(e) = manager.stop_generation(&id, generation).await {
                warn!("[lifecycle:{}] Stop after session loss failed: {}", id, e);
            }
        });
    }

    // ── Messages ───────────────────────────────────────────────────────

    async fn on_message(&self, msg: InboundMessage) {
        if !msg.is_routable() {
            debug!("[lifecycle:{}] Ignoring message from {} (group or self)", self.instance, msg.from);
            return;
        }
        self.message_count.fetch_add(1, Ordering::Relaxed);

        let script = self.manager.store.current();
        let Some(action) = router::route(&self.dialogue, &msg.from, &msg.body, &script) else {
            debug!("[lifecycle:{}] No route for {}", self.instance, msg.from);
            return;
        };

        info!("[lifecycle:{}] {} → {}", self.instance, msg.from, action);
        let result = self
            .manager
            .interpreter
            .execute(
                self.runtime.as_ref(),
                &self.dialogue,
                &script,
                &msg.from,
                &action,
                msg.display_name.as_deref(),
            )
            .await;

        match result {
            Ok(delivery) if delivery.is_complete() => {}
            Ok(delivery) => {
                for failure in &delivery.failures {
                    self.manager.events.log(Some(&self.instance), format!("Reply not delivered: {}", failure));
                }
            }
            Err(EngineError::ActionNotFound(name)) => {
                self.manager
                    .events
                    .log(Some(&self.instance), format!("Action \"{}\" is not in the script", name));
            }
            Err(e) => warn!("[lifecycle:{}] Reply to {} failed: {}", self.instance, msg.from, e),
        }
    }

    // ── Licence re-check ───────────────────────────────────────────────

    /// Returns true when the instance has been revoked and the pump should end.
    async fn recheck_entitlement(&self) -> bool {
        let Some(gate) = &self.manager.entitlement else {
            return false;
        };
        match gate.check().await {
            Ok(Verdict::Active) => false,
            Ok(Verdict::Inactive(reason)) => {
                warn!("[lifecycle:{}] Licence no longer active: {}", self.instance, reason);
                self.manager.events.license_expired(&self.instance, reason.clone());
                self.session_lost(&reason);
                true
            }
            Err(e) => {
                warn!("[lifecycle:{}] Licence re-check failed, keeping instance up: {}", self.instance, e);
                false
            }
        }
    }
}

async fn tick(ticker: &mut Option<tokio::time::Interval>) {
    match ticker {
        Some(t) => {
            t.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}
