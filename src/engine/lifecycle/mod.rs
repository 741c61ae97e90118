// Zapmenu Engine — Session Lifecycle Manager
//
// Owns every bot instance record and the only paths that create or destroy
// runtime handles.
//
//   stopped → starting → ready → stopping → stopped
//
// `busy` brackets each start/stop transition; while it is set, further
// start/stop calls for that instance are skipped. It is cleared once
// `initialize()` returns, so an instance waiting for a QR scan (status still
// `starting`) can be stopped. Handle removal and the `stopped` status are
// written under the same lock, so status reads never see a stopped instance
// with a handle or a ready instance without one.
//
// A disconnect or auth failure reported while `start` still holds `busy` is
// parked on the record; `start` then fails instead of reporting success for
// a dead session. Stopping closes the event pump rather than aborting it, so
// a reply already being rendered runs to the end.
//
// Module layout:
//   (this)   — SessionManager, Outcome, LifecycleSettings, start/stop/restart_all
//   dispatch — per-instance event pump: runtime events → router → interpreter

mod dispatch;

use crate::atoms::constants::ROOT_ACTION;
use crate::atoms::error::{EngineError, EngineResult};
use crate::atoms::types::{InstanceSnapshot, InstanceStatus};
use crate::engine::dialogue::DialogueTable;
use crate::engine::entitlement::{EntitlementCheck, Verdict};
use crate::engine::events::EventBus;
use crate::engine::interpreter::Interpreter;
use crate::engine::runtime::{MessagingRuntime, RuntimeFactory, RuntimeSpec};
use crate::engine::script::{MenuScript, ScriptStore};
use dispatch::Dispatcher;
use log::{debug, info, warn};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

// ── Settings / results ─────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LifecycleSettings {
    /// Pause between typing indicator and a bare menu reply.
    pub settle_delay: Duration,
    /// Bound on graceful destroy before the handle is force-killed.
    pub stop_grace: Duration,
    /// Licence re-check cadence while running (None = never).
    pub entitlement_interval: Option<Duration>,
    /// `<session_root>/<instance id>` is handed to the runtime as its credential store.
    pub session_root: PathBuf,
    /// Bound on a runtime's `initialize()`; on expiry the handle is killed.
    pub init_timeout: Duration,
}

/// Whether a start/stop request did anything.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Done,
    Skipped(&'static str),
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RestartReport {
    pub stopped: Vec<String>,
    pub restarted: Vec<String>,
    pub failed: Vec<(String, String)>,
}

// ── Instance records ───────────────────────────────────────────────────

/// The event pump task plus its close signal. Dropping `close` ends the
/// pump after the event it is currently handling.
struct Pump {
    task: JoinHandle<()>,
    close: oneshot::Sender<()>,
}

impl Pump {
    fn close(self) {
        drop(self.close);
    }

    fn abort(self) {
        self.task.abort();
    }
}

struct InstanceRecord {
    label: String,
    status: InstanceStatus,
    busy: bool,
    handle: Option<Arc<dyn MessagingRuntime>>,
    pump: Option<Pump>,
    /// Bumped for every handle; events from an older handle are ignored.
    generation: u64,
    /// Session loss reported while `start` was still in progress.
    lost: Option<String>,
    message_count: Arc<AtomicU64>,
}

impl InstanceRecord {
    fn new(label: String) -> Self {
        InstanceRecord {
            label,
            status: InstanceStatus::Stopped,
            busy: false,
            handle: None,
            pump: None,
            generation: 0,
            lost: None,
            message_count: Arc::new(AtomicU64::new(0)),
        }
    }
}

pub(crate) struct ManagerInner {
    instances: Mutex<BTreeMap<String, InstanceRecord>>,
    store: Arc<ScriptStore>,
    factory: Arc<dyn RuntimeFactory>,
    entitlement: Option<Arc<dyn EntitlementCheck>>,
    events: EventBus,
    settings: LifecycleSettings,
    interpreter: Interpreter,
}

impl ManagerInner {
    /// Status change driven by a runtime event. Ignored if the event comes
    /// from a superseded handle or the instance is already being torn down.
    fn advance(&self, id: &str, generation: u64, from: &[InstanceStatus], to: InstanceStatus) -> bool {
        let changed = {
            let mut map = self.instances.lock();
            match map.get_mut(id) {
                Some(rec) if rec.generation == generation && rec.handle.is_some() && from.contains(&rec.status) => {
                    rec.status = to;
                    true
                }
                _ => false,
            }
        };
        if changed {
            self.events.status(id, to);
        }
        changed
    }

    /// Session went away (disconnect, auth failure, revoked licence).
    /// Returns true when the caller should stop the instance now. A loss
    /// during `start` is parked for `start` to act on, and one during `stop`
    /// or from a superseded handle is dropped.
    fn session_lost(&self, id: &str, generation: u64, reason: &str) -> bool {
        let mut map = self.instances.lock();
        let Some(rec) = map.get_mut(id) else {
            return false;
        };
        if rec.generation != generation || rec.handle.is_none() {
            return false;
        }
        if rec.busy {
            if rec.status == InstanceStatus::Starting {
                info!("[lifecycle] {} lost its session while starting: {}", id, reason);
                rec.lost = Some(reason.to_string());
            }
            return false;
        }
        true
    }

    /// Drop the handle and pump and mark the instance stopped, in one step.
    fn finish_stopped(&self, id: &str) -> Option<Pump> {
        let pump = {
            let mut map = self.instances.lock();
            let rec = map.get_mut(id)?;
            rec.handle = None;
            rec.status = InstanceStatus::Stopped;
            rec.busy = false;
            rec.lost = None;
            rec.pump.take()
        };
        self.events.status(id, InstanceStatus::Stopped);
        pump
    }
}

// ── Manager ────────────────────────────────────────────────────────────

#[derive(Clone)]
pub struct SessionManager {
    inner: Arc<ManagerInner>,
}

impl SessionManager {
    pub fn new(
        store: Arc<ScriptStore>,
        factory: Arc<dyn RuntimeFactory>,
        entitlement: Option<Arc<dyn EntitlementCheck>>,
        events: EventBus,
        settings: LifecycleSettings,
    ) -> Self {
        SessionManager {
            inner: Arc::new(ManagerInner {
                instances: Mutex::new(BTreeMap::new()),
                store,
                factory,
                entitlement,
                events,
                interpreter: Interpreter::new(settings.settle_delay),
                settings,
            }),
        }
    }

    pub(crate) fn from_inner(inner: Arc<ManagerInner>) -> Self {
        SessionManager { inner }
    }

    /// Add a stopped instance. Re-registering an id only updates its label.
    pub fn register(&self, id: impl Into<String>, label: impl Into<String>) {
        let id = id.into();
        let label = label.into();
        let mut map = self.inner.instances.lock();
        match map.get_mut(&id) {
            Some(rec) => rec.label = label,
            None => {
                map.insert(id, InstanceRecord::new(label));
            }
        }
    }

    pub fn events(&self) -> &EventBus {
        &self.inner.events
    }

    pub fn store(&self) -> &Arc<ScriptStore> {
        &self.inner.store
    }

    pub fn ids(&self) -> Vec<String> {
        self.inner.instances.lock().keys().cloned().collect()
    }

    pub fn status(&self, id: &str) -> EngineResult<InstanceStatus> {
        self.inner
            .instances
            .lock()
            .get(id)
            .map(|r| r.status)
            .ok_or_else(|| EngineError::UnknownInstance(id.to_string()))
    }

    pub fn snapshot(&self, id: &str) -> EngineResult<InstanceSnapshot> {
        let map = self.inner.instances.lock();
        let rec = map.get(id).ok_or_else(|| EngineError::UnknownInstance(id.to_string()))?;
        Ok(snapshot_of(id, rec))
    }

    pub fn snapshots(&self) -> Vec<InstanceSnapshot> {
        self.inner
            .instances
            .lock()
            .iter()
            .map(|(id, rec)| snapshot_of(id, rec))
            .collect()
    }

    // ── Start ──────────────────────────────────────────────────────────

    /// Start one instance: licence gate, create handle, bind the event pump,
    /// initialize. Skipped while busy or when a handle already exists.
    pub async fn start(&self, id: &str) -> EngineResult<Outcome> {
        let generation = {
            let mut map = self.inner.instances.lock();
            let rec = map.get_mut(id).ok_or_else(|| EngineError::UnknownInstance(id.to_string()))?;
            if rec.busy {
                info!("[lifecycle] Start of {} ignored: transition in progress", id);
                return Ok(Outcome::Skipped("busy"));
            }
            if rec.handle.is_some() {
                info!("[lifecycle] Start of {} ignored: already running", id);
                return Ok(Outcome::Skipped("already running"));
            }
            rec.busy = true;
            rec.status = InstanceStatus::Starting;
            rec.generation += 1;
            rec.lost = None;
            rec.generation
        };
        self.inner.events.status(id, InstanceStatus::Starting);
        self.inner.events.log(Some(id), "Starting bot...");

        let result = self.bring_up(id, generation).await.and_then(|()| self.finish_start(id));
        match result {
            Ok(()) => Ok(Outcome::Done),
            Err(e) => {
                warn!("[lifecycle] Start of {} failed: {}", id, e);
                let message = match &e {
                    EngineError::Entitlement(_) => format!("Licence check failed, bot not started: {}", e),
                    _ => format!("Bot could not start: {}", e),
                };
                self.inner.events.error(id, message);
                if let Some(pump) = self.inner.finish_stopped(id) {
                    pump.abort();
                }
                Err(e)
            }
        }
    }

    async fn bring_up(&self, id: &str, generation: u64) -> EngineResult<()> {
        if let Some(gate) = &self.inner.entitlement {
            match gate.check().await {
                Ok(Verdict::Active) => {}
                Ok(Verdict::Inactive(reason)) => return Err(EngineError::Entitlement(reason)),
                Err(EngineError::Entitlement(m)) => return Err(EngineError::Entitlement(m)),
                Err(e) => return Err(EngineError::Entitlement(e.to_string())),
            }
        }

        let session_dir = self.inner.settings.session_root.join(id);
        std::fs::create_dir_all(&session_dir)
            .map_err(|e| EngineError::initialization(id, format!("session dir {}: {}", session_dir.display(), e)))?;

        let (tx, rx) = mpsc::unbounded_channel();
        let (close_tx, close_rx) = oneshot::channel();
        let spec = RuntimeSpec { instance_id: id.to_string(), session_dir };
        let handle = self.inner.factory.create(&spec, tx).map_err(|e| match e {
            EngineError::Initialization { .. } => e,
            other => EngineError::initialization(id, other.to_string()),
        })?;

        let message_count = {
            let mut map = self.inner.instances.lock();
            let rec = map.get_mut(id).ok_or_else(|| EngineError::UnknownInstance(id.to_string()))?;
            rec.handle = Some(handle.clone());
            rec.message_count.clone()
        };

        let dispatcher = Dispatcher {
            manager: self.inner.clone(),
            instance: id.to_string(),
            generation,
            runtime: handle.clone(),
            dialogue: Arc::new(DialogueTable::new(ROOT_ACTION)),
            message_count,
        };
        let task = tokio::spawn(dispatcher.run(rx, close_rx, self.inner.settings.entitlement_interval));
        {
            let mut map = self.inner.instances.lock();
            if let Some(rec) = map.get_mut(id) {
                rec.pump = Some(Pump { task, close: close_tx });
            }
        }

        let bound = self.inner.settings.init_timeout;
        match tokio::time::timeout(bound, handle.initialize()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                handle.kill();
                return Err(match e {
                    EngineError::Initialization { .. } => e,
                    other => EngineError::initialization(id, other.to_string()),
                });
            }
            Err(_) => {
                handle.kill();
                return Err(EngineError::initialization(
                    id,
                    format!("initialize timed out after {}s", bound.as_secs()),
                ));
            }
        }

        info!("[lifecycle] {} initialized (gen {})", id, generation);
        Ok(())
    }

    /// Clear `busy` once initialize succeeded, unless the session was lost in
    /// the meantime. Both happen under one lock so a loss cannot slip between.
    fn finish_start(&self, id: &str) -> EngineResult<()> {
        let lost = {
            let mut map = self.inner.instances.lock();
            let rec = map.get_mut(id).ok_or_else(|| EngineError::UnknownInstance(id.to_string()))?;
            match rec.lost.take() {
                Some(reason) => Some((reason, rec.handle.clone())),
                None => {
                    rec.busy = false;
                    None
                }
            }
        };
        match lost {
            None => Ok(()),
            Some((reason, handle)) => {
                if let Some(handle) = handle {
                    handle.kill();
                }
                Err(EngineError::initialization(id, format!("session lost during start: {}", reason)))
            }
        }
    }

    // ── Stop ───────────────────────────────────────────────────────────

    /// Graceful destroy bounded by `stop_grace`, then a forced kill. Always
    /// completes. Skipped while busy or when nothing is running.
    pub async fn stop(&self, id: &str) -> EngineResult<Outcome> {
        self.stop_inner(id, None).await
    }

    /// Stop only if the instance still runs the handle of `generation`.
    pub(crate) async fn stop_generation(&self, id: &str, generation: u64) -> EngineResult<Outcome> {
        self.stop_inner(id, Some(generation)).await
    }

    async fn stop_inner(&self, id: &str, generation: Option<u64>) -> EngineResult<Outcome> {
        let handle = {
            let mut map = self.inner.instances.lock();
            let rec = map.get_mut(id).ok_or_else(|| EngineError::UnknownInstance(id.to_string()))?;
            if generation.is_some_and(|g| g != rec.generation) {
                debug!("[lifecycle] Stop of {} ignored: handle already replaced", id);
                return Ok(Outcome::Skipped("superseded"));
            }
            if rec.busy {
                info!("[lifecycle] Stop of {} ignored: transition in progress", id);
                return Ok(Outcome::Skipped("busy"));
            }
            let Some(handle) = rec.handle.clone() else {
                return Ok(Outcome::Skipped("not running"));
            };
            rec.busy = true;
            rec.status = InstanceStatus::Stopping;
            handle
        };
        self.inner.events.status(id, InstanceStatus::Stopping);

        let grace = self.inner.settings.stop_grace;
        match tokio::time::timeout(grace, handle.destroy()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                warn!("[lifecycle] Graceful stop of {} failed ({}), forcing", id, e);
                handle.kill();
            }
            Err(_) => {
                let e = EngineError::TeardownTimeout { instance: id.to_string(), secs: grace.as_secs() };
                warn!("[lifecycle] {}", e);
                self.inner.events.log(Some(id), format!("{}; forcing shutdown", e));
                handle.kill();
            }
        }

        if let Some(pump) = self.inner.finish_stopped(id) {
            pump.close();
        }
        self.inner.events.log(Some(id), "Bot stopped.");
        Ok(Outcome::Done)
    }

    // ── Bulk operations ────────────────────────────────────────────────

    /// Stop every instance, persist and activate the new script, then start
    /// again the instances that were running (when `restart` is set).
    /// Takes an already-parsed script; see `apply_script_text` for raw text.
    pub async fn restart_all(&self, script: MenuScript, restart: bool) -> EngineResult<RestartReport> {
        let mut report = self.stop_for_restart().await;

        let saved = self.inner.store.save(script);
        match &saved {
            Ok(s) => self.inner.events.log(None, format!("Messages saved ({} actions).", s.len())),
            Err(e) => self.inner.events.log(None, format!("Could not save messages: {}", e)),
        }

        if restart {
            self.start_again(&mut report).await;
        }
        saved.map(|_| report)
    }

    /// Cycle the running instances against the script already active in the
    /// store (after an on-disk edit was reloaded).
    pub async fn restart_running(&self) -> RestartReport {
        let mut report = self.stop_for_restart().await;
        self.start_again(&mut report).await;
        report
    }

    async fn stop_for_restart(&self) -> RestartReport {
        let running: Vec<String> = {
            let map = self.inner.instances.lock();
            map.iter()
                .filter(|(_, r)| r.handle.is_some())
                .map(|(id, _)| id.clone())
                .collect()
        };

        let ids = self.ids();
        let results = futures::future::join_all(ids.iter().map(|id| self.stop(id))).await;

        let mut report = RestartReport::default();
        for (id, res) in ids.iter().zip(results) {
            match res {
                Ok(Outcome::Done) => report.stopped.push(id.clone()),
                Ok(Outcome::Skipped(why)) if running.contains(id) => {
                    warn!("[lifecycle] {} not stopped for restart: {}", id, why);
                }
                Ok(Outcome::Skipped(_)) => {}
                Err(e) => report.failed.push((id.clone(), e.to_string())),
            }
        }
        report
    }

    async fn start_again(&self, report: &mut RestartReport) {
        for id in report.stopped.clone() {
            match self.start(&id).await {
                Ok(Outcome::Done) => report.restarted.push(id),
                Ok(Outcome::Skipped(_)) => {}
                Err(e) => report.failed.push((id, e.to_string())),
            }
        }
    }

    /// Validate script text and apply it via `restart_all`. Invalid text is
    /// rejected before any instance is touched.
    pub async fn apply_script_text(&self, text: &str, restart: bool) -> EngineResult<RestartReport> {
        let script = MenuScript::parse(text).map_err(|e| {
            self.inner.events.log(None, format!("Messages not saved: {}", e));
            e
        })?;
        self.restart_all(script, restart).await
    }

    /// Stop everything (process exit).
    pub async fn shutdown(&self) {
        let ids = self.ids();
        futures::future::join_all(ids.iter().map(|id| self.stop(id))).await;
    }
}

fn snapshot_of(id: &str, rec: &InstanceRecord) -> InstanceSnapshot {
    InstanceSnapshot {
        id: id.to_string(),
        label: rec.label.clone(),
        status: rec.status,
        busy: rec.busy,
        live: rec.handle.is_some(),
        message_count: rec.message_count.load(Ordering::Relaxed),
    }
}
