// Zapmenu — WhatsApp menu auto-responder
//
//   atoms/  — constants, error type, plain data types
//   engine/ — script, dialogue, router, interpreter, runtimes, lifecycle
//
// `run` hosts the engine headless: the GUI shell only differs in where the
// `UiEvent` stream ends up.

pub mod atoms;
pub mod engine;

pub use atoms::error::{EngineError, EngineResult};
pub use atoms::types::{InstanceSnapshot, InstanceStatus, UiEvent};
pub use engine::config::AppConfig;
pub use engine::events::EventBus;
pub use engine::lifecycle::{LifecycleSettings, Outcome, RestartReport, SessionManager};
pub use engine::script::{MenuScript, ScriptStore};

use atoms::constants::SCRIPT_WATCH_INTERVAL_SECS;
use engine::entitlement::{EntitlementCheck, HttpEntitlement};
use engine::runtime::evolution::EvolutionFactory;
use log::{error, info, warn};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;

/// Wire the store, gateway runtime factory and licence gate into a manager
/// with every configured instance registered (all stopped).
pub fn build_manager(config: &AppConfig, store: Arc<ScriptStore>, events: EventBus) -> EngineResult<SessionManager> {
    let factory = Arc::new(EvolutionFactory::new(config.evolution.clone(), config.webhook_ports())?);
    let entitlement = config
        .entitlement
        .as_ref()
        .map(|s| Arc::new(HttpEntitlement::new(s)) as Arc<dyn EntitlementCheck>);

    let manager = SessionManager::new(store, factory, entitlement, events, config.lifecycle_settings());
    for inst in &config.instances {
        manager.register(inst.id.clone(), inst.display_label());
    }
    Ok(manager)
}

/// Run until Ctrl-C: auto-start instances, follow script edits, then stop
/// everything within the grace period.
pub async fn run(config: AppConfig) -> EngineResult<()> {
    let store = Arc::new(ScriptStore::open(&config.script_path)?);
    info!(
        "[zapmenu] Script {} loaded ({} actions)",
        config.script_path.display(),
        store.current().len()
    );

    let events = EventBus::default();
    let printer = tokio::spawn(print_events(events.subscribe()));
    let manager = build_manager(&config, store.clone(), events)?;

    for inst in config.instances.iter().filter(|i| config.should_auto_start(i)) {
        if let Err(e) = manager.start(&inst.id).await {
            warn!("[zapmenu] {} did not start: {}", inst.id, e);
        }
    }

    let watcher = config.watch_script.then(|| {
        let manager = manager.clone();
        let restart = config.restart_on_save;
        store.clone().watch(Duration::from_secs(SCRIPT_WATCH_INTERVAL_SECS), move |result| match result {
            Ok(script) => {
                manager
                    .events()
                    .log(None, format!("Messages reloaded from disk ({} actions).", script.len()));
                if restart {
                    let manager = manager.clone();
                    tokio::spawn(async move {
                        let report = manager.restart_running().await;
                        for (id, why) in report.failed {
                            warn!("[zapmenu] {} did not come back after reload: {}", id, why);
                        }
                    });
                }
            }
            Err(e) => manager
                .events()
                .log(None, format!("Edited script rejected, keeping the previous one: {}", e)),
        })
    });

    tokio::signal::ctrl_c().await?;
    info!("[zapmenu] Shutting down");
    if let Some(w) = watcher {
        w.abort();
    }
    manager.shutdown().await;
    printer.abort();
    Ok(())
}

async fn print_events(mut rx: tokio::sync::broadcast::Receiver<UiEvent>) {
    loop {
        match rx.recv().await {
            Ok(UiEvent::QrCode { instance, qr }) => {
                info!("[{}] Scan this QR payload with WhatsApp:", instance);
                println!("{}", qr);
            }
            Ok(UiEvent::Status { instance, status }) => info!("[{}] status: {}", instance, status),
            Ok(UiEvent::Error { instance, message }) => error!("[{}] {}", instance, message),
            Ok(UiEvent::LicenseExpired { instance, message }) => warn!("[{}] licence expired: {}", instance, message),
            // Already written to the log by the bus
            Ok(UiEvent::Log { .. }) => {}
            Err(RecvError::Lagged(n)) => warn!("[zapmenu] {} UI events dropped", n),
            Err(RecvError::Closed) => break,
        }
    }
}
