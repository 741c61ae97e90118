// WhatsApp Gateway — Evolution API runtime
//
// Module layout:
//   api     — create/delete instance, extract_qr, connection_state, send_text, send_presence
//   webhook — bind_webhook, run_webhook_listener, translate_webhook
//   (this)  — EvolutionSettings, EvolutionFactory, EvolutionRuntime
//
// Each local bot instance maps to its own remote instance name, so every
// instance keeps a separate WhatsApp pairing on the gateway side.

pub(crate) mod api;
pub(crate) mod webhook;

use crate::atoms::constants::GATEWAY_TIMEOUT_SECS;
use crate::atoms::error::{EngineError, EngineResult};
use crate::engine::runtime::{EventSender, MessagingRuntime, RuntimeEvent, RuntimeFactory, RuntimeSpec};
use async_trait::async_trait;
use log::{info, warn};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

// ── Settings ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct EvolutionSettings {
    /// Evolution API base URL
    pub api_url: String,
    /// Evolution API key
    pub api_key: String,
    /// Remote instance names are `<prefix>-<instance id>`
    pub instance_prefix: String,
    /// Host the gateway uses to reach our webhook listener
    pub webhook_host: String,
    /// First local webhook port; instances without an explicit port count up from here
    pub webhook_base_port: u16,
    /// How long the gateway shows "typing…" per indicator
    pub typing_ms: u64,
}

impl Default for EvolutionSettings {
    fn default() -> Self {
        EvolutionSettings {
            api_url: "http://127.0.0.1:8085".into(),
            api_key: String::new(),
            instance_prefix: "zapmenu".into(),
            webhook_host: "host.docker.internal".into(),
            webhook_base_port: 8086,
            typing_ms: 1200,
        }
    }
}

impl EvolutionSettings {
    pub fn instance_name(&self, instance_id: &str) -> String {
        format!("{}-{}", self.instance_prefix, instance_id)
    }

    pub fn webhook_url(&self, port: u16) -> String {
        format!("http://{}:{}/webhook/whatsapp", self.webhook_host, port)
    }
}

// ── Factory ────────────────────────────────────────────────────────────

pub struct EvolutionFactory {
    settings: EvolutionSettings,
    ports: HashMap<String, u16>,
    client: reqwest::Client,
}

impl EvolutionFactory {
    /// `ports` maps instance id → local webhook port. Every gateway request
    /// is bounded so a hung gateway cannot stall a start or a reply.
    pub fn new(settings: EvolutionSettings, ports: HashMap<String, u16>) -> EngineResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(GATEWAY_TIMEOUT_SECS))
            .connect_timeout(Duration::from_secs(10))
            .build()?;
        Ok(EvolutionFactory { settings, ports, client })
    }
}

impl RuntimeFactory for EvolutionFactory {
    fn create(&self, spec: &RuntimeSpec, events: EventSender) -> EngineResult<Arc<dyn MessagingRuntime>> {
        let port = *self.ports.get(&spec.instance_id).ok_or_else(|| {
            EngineError::initialization(&spec.instance_id, "no webhook port assigned")
        })?;
        Ok(Arc::new(EvolutionRuntime {
            instance_id: spec.instance_id.clone(),
            instance_name: self.settings.instance_name(&spec.instance_id),
            settings: self.settings.clone(),
            webhook_port: port,
            client: self.client.clone(),
            events,
            stop: Arc::new(AtomicBool::new(false)),
            listener: Mutex::new(None),
        }))
    }
}

// ── Runtime ────────────────────────────────────────────────────────────

pub struct EvolutionRuntime {
    instance_id: String,
    instance_name: String,
    settings: EvolutionSettings,
    webhook_port: u16,
    client: reqwest::Client,
    events: EventSender,
    stop: Arc<AtomicBool>,
    listener: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

#[async_trait]
impl MessagingRuntime for EvolutionRuntime {
    /// 1. Bind the local webhook listener
    /// 2. Create the remote instance and forward its QR code
    /// 3. If the pairing is still valid, report ready right away
    async fn initialize(&self) -> EngineResult<()> {
        let fail = |e: EngineError| EngineError::initialization(&self.instance_id, e.to_string());

        let listener = webhook::bind_webhook(self.webhook_port).await.map_err(fail)?;
        let handle = tokio::spawn(webhook::run_webhook_listener(
            listener,
            self.stop.clone(),
            self.events.clone(),
            self.instance_id.clone(),
        ));
        *self.listener.lock() = Some(handle);

        let qr = api::create_instance(
            &self.client,
            &self.settings,
            &self.instance_name,
            &self.settings.webhook_url(self.webhook_port),
        )
        .await
        .map_err(|e| {
            self.kill();
            fail(e)
        })?;

        if !qr.is_empty() {
            let _ = self.events.send(RuntimeEvent::Qr(qr));
            return Ok(());
        }

        match api::connection_state(&self.client, &self.settings, &self.instance_name).await {
            Ok(state) if state == "open" || state == "connected" => {
                info!("[whatsapp:{}] Existing pairing still valid", self.instance_id);
                let _ = self.events.send(RuntimeEvent::Authenticated);
                let _ = self.events.send(RuntimeEvent::Ready);
            }
            Ok(state) => info!("[whatsapp:{}] Connection state '{}', waiting for webhook", self.instance_id, state),
            Err(e) => warn!("[whatsapp:{}] Connection check failed: {}", self.instance_id, e),
        }
        Ok(())
    }

    async fn send_message(&self, to: &str, text: &str) -> EngineResult<()> {
        api::send_text(&self.client, &self.settings, &self.instance_name, to, text).await
    }

    async fn set_typing(&self, to: &str) -> EngineResult<()> {
        api::send_presence(&self.client, &self.settings, &self.instance_name, to).await
    }

    /// Stop the webhook listener and wait for it. The remote pairing is kept
    /// so the next start does not need a new QR scan.
    async fn destroy(&self) -> EngineResult<()> {
        self.stop.store(true, Ordering::Relaxed);
        let handle = self.listener.lock().take();
        if let Some(handle) = handle {
            handle
                .await
                .map_err(|e| EngineError::Other(format!("webhook listener ended abnormally: {}", e)))?;
        }
        info!("[whatsapp:{}] Session closed", self.instance_id);
        Ok(())
    }

    fn kill(&self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(handle) = self.listener.lock().take() {
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    #[test]
    fn instance_names_are_partitioned_by_id() {
        let s = EvolutionSettings::default();
        assert_eq!(s.instance_name("vendas"), "zapmenu-vendas");
        assert_ne!(s.instance_name("a"), s.instance_name("b"));
        assert_eq!(s.webhook_url(9000), "http://host.docker.internal:9000/webhook/whatsapp");
    }

    #[test]
    fn factory_requires_a_port() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let factory = EvolutionFactory::new(EvolutionSettings::default(), HashMap::new()).unwrap();
        let spec = RuntimeSpec { instance_id: "x".into(), session_dir: "/tmp/x".into() };
        let err = factory.create(&spec, tx).err().unwrap();
        assert!(matches!(err, EngineError::Initialization { .. }));
    }

    #[tokio::test]
    async fn destroy_without_initialize_is_clean() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let factory = EvolutionFactory::new(EvolutionSettings::default(), HashMap::from([("x".to_string(), 0)])).unwrap();
        let spec = RuntimeSpec { instance_id: "x".into(), session_dir: "/tmp/x".into() };
        let rt = factory.create(&spec, tx).unwrap();
        rt.destroy().await.unwrap();
        rt.kill();
    }
}
