// Zapmenu Engine — Application Settings
//
// zapmenu.toml: where the script lives, which instances exist, pacing and
// teardown bounds, licence server, gateway. Missing file → defaults.
//
//   script_path = "mensagens.json"
//   auto_start = true
//
//   [evolution]
//   api_url = "http://127.0.0.1:8085"
//   api_key = "..."
//
//   [[instances]]
//   id = "vendas"
//   label = "Vendas"

use crate::atoms::constants::{
    DEFAULT_INSTANCE_ID, INIT_TIMEOUT_SECS, SCRIPT_FILE_NAME, SETTLE_DELAY_MS, STOP_GRACE_SECS,
};
use crate::atoms::error::{EngineError, EngineResult};
use crate::engine::entitlement::EntitlementSettings;
use crate::engine::lifecycle::LifecycleSettings;
use crate::engine::runtime::evolution::EvolutionSettings;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct InstanceSettings {
    pub id: String,
    #[serde(default)]
    pub label: Option<String>,
    /// Overrides the global `auto_start` for this instance.
    #[serde(default)]
    pub auto_start: Option<bool>,
    #[serde(default)]
    pub webhook_port: Option<u16>,
}

impl InstanceSettings {
    pub fn new(id: impl Into<String>) -> Self {
        InstanceSettings { id: id.into(), label: None, auto_start: None, webhook_port: None }
    }

    pub fn display_label(&self) -> &str {
        self.label.as_deref().unwrap_or(&self.id)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct AppConfig {
    pub script_path: PathBuf,
    /// Root for per-instance session storage
    pub data_dir: PathBuf,
    pub auto_start: bool,
    /// Start the instances that were running again after a script save
    pub restart_on_save: bool,
    /// Reload the script when the file changes on disk
    pub watch_script: bool,
    pub settle_delay_ms: u64,
    pub stop_grace_secs: u64,
    /// Bound on a runtime's initialize step
    pub init_timeout_secs: u64,
    pub entitlement: Option<EntitlementSettings>,
    pub evolution: EvolutionSettings,
    pub instances: Vec<InstanceSettings>,
}

impl Default for AppConfig {
    fn default() -> Self {
        AppConfig {
            script_path: PathBuf::from(SCRIPT_FILE_NAME),
            data_dir: default_data_dir(),
            auto_start: true,
            restart_on_save: true,
            watch_script: true,
            settle_delay_ms: SETTLE_DELAY_MS,
            stop_grace_secs: STOP_GRACE_SECS,
            init_timeout_secs: INIT_TIMEOUT_SECS,
            entitlement: None,
            evolution: EvolutionSettings::default(),
            instances: vec![InstanceSettings::new(DEFAULT_INSTANCE_ID)],
        }
    }
}

fn default_data_dir() -> PathBuf {
    dirs::data_dir()
        .map(|d| d.join("zapmenu"))
        .unwrap_or_else(|| PathBuf::from(".zapmenu"))
}

impl AppConfig {
    /// Load settings. A missing file yields defaults; relative paths are
    /// resolved against the settings file's directory.
    pub fn load(path: &Path) -> EngineResult<Self> {
        let mut config = if path.exists() {
            let text = std::fs::read_to_string(path)?;
            Self::parse(&text)?
        } else {
            log::info!("[config] {} not found, using defaults", path.display());
            AppConfig::default()
        };

        if let Some(base) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            if config.script_path.is_relative() {
                config.script_path = base.join(&config.script_path);
            }
            if config.data_dir.is_relative() {
                config.data_dir = base.join(&config.data_dir);
            }
        }
        Ok(config)
    }

    pub fn parse(text: &str) -> EngineResult<Self> {
        let config: AppConfig = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> EngineResult<()> {
        if self.instances.is_empty() {
            return Err(EngineError::Config("at least one [[instances]] entry is required".into()));
        }
        let mut seen = HashSet::new();
        for inst in &self.instances {
            if inst.id.is_empty()
                || !inst.id.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
            {
                return Err(EngineError::Config(format!(
                    "instance id \"{}\" must be non-empty and use only letters, digits, '-' or '_'",
                    inst.id
                )));
            }
            if !seen.insert(inst.id.as_str()) {
                return Err(EngineError::Config(format!("duplicate instance id \"{}\"", inst.id)));
            }
        }
        if self.init_timeout_secs == 0 {
            return Err(EngineError::Config("init_timeout_secs must be at least 1".into()));
        }
        let ports = self.webhook_ports();
        if ports.values().collect::<HashSet<_>>().len() != ports.len() {
            return Err(EngineError::Config("two instances share a webhook port".into()));
        }
        Ok(())
    }

    pub fn should_auto_start(&self, inst: &InstanceSettings) -> bool {
        inst.auto_start.unwrap_or(self.auto_start)
    }

    /// Explicit ports win; the rest count up from the base port in list order.
    pub fn webhook_ports(&self) -> HashMap<String, u16> {
        self.instances
            .iter()
            .enumerate()
            .map(|(i, inst)| {
                let port = inst
                    .webhook_port
                    .unwrap_or_else(|| self.evolution.webhook_base_port.saturating_add(i as u16));
                (inst.id.clone(), port)
            })
            .collect()
    }

    pub fn lifecycle_settings(&self) -> LifecycleSettings {
        LifecycleSettings {
            settle_delay: Duration::from_millis(self.settle_delay_ms),
            stop_grace: Duration::from_secs(self.stop_grace_secs),
            init_timeout: Duration::from_secs(self.init_timeout_secs),
            entitlement_interval: self
                .entitlement
                .as_ref()
                .map(|e| e.interval_secs)
                .filter(|secs| *secs > 0)
                .map(Duration::from_secs),
            session_root: self.data_dir.join("sessions"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_have_one_instance() {
        let c = AppConfig::default();
        assert_eq!(c.instances.len(), 1);
        assert_eq!(c.instances[0].id, "principal");
        assert!(c.validate().is_ok());
        assert_eq!(c.lifecycle_settings().stop_grace, Duration::from_secs(5));
        assert_eq!(c.lifecycle_settings().init_timeout, Duration::from_secs(60));
        assert_eq!(c.lifecycle_settings().entitlement_interval, None);
    }

    #[test]
    fn parses_instances_and_ports() {
        let c = AppConfig::parse(
            r#"
            auto_start = false
            [evolution]
            api_key = "k"
            webhook_base_port = 9000
            [[instances]]
            id = "vendas"
            label = "Vendas"
            auto_start = true
            [[instances]]
            id = "suporte"
            [[instances]]
            id = "extra"
            webhook_port = 9500
            "#,
        )
        .unwrap();
        let ports = c.webhook_ports();
        assert_eq!(ports["vendas"], 9000);
        assert_eq!(ports["suporte"], 9001);
        assert_eq!(ports["extra"], 9500);
        assert!(c.should_auto_start(&c.instances[0]));
        assert!(!c.should_auto_start(&c.instances[1]));
        assert_eq!(c.instances[1].display_label(), "suporte");
    }

    #[test]
    fn rejects_duplicate_ids() {
        let err = AppConfig::parse("[[instances]]\nid = \"a\"\n[[instances]]\nid = \"a\"\n").unwrap_err();
        assert!(err.to_string().contains("duplicate"));
    }

    #[test]
    fn rejects_path_unsafe_ids() {
        assert!(AppConfig::parse("[[instances]]\nid = \"../x\"\n").is_err());
    }

    #[test]
    fn rejects_port_collisions() {
        let err = AppConfig::parse(
            "[evolution]\nwebhook_base_port = 9000\n[[instances]]\nid = \"a\"\n[[instances]]\nid = \"b\"\nwebhook_port = 9000\n",
        )
        .unwrap_err();
        assert!(err.to_string().contains("webhook port"));
    }

    #[test]
    fn sessions_live_under_data_dir() {
        let c = AppConfig { data_dir: PathBuf::from("/var/zap"), ..AppConfig::default() };
        assert_eq!(c.lifecycle_settings().session_root, PathBuf::from("/var/zap/sessions"));
    }

    #[test]
    fn relative_paths_resolve_against_settings_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("zapmenu.toml");
        std::fs::write(&path, "script_path = \"bot.json\"\ndata_dir = \"data\"\n").unwrap();
        let c = AppConfig::load(&path).unwrap();
        assert_eq!(c.script_path, dir.path().join("bot.json"));
        assert_eq!(c.data_dir, dir.path().join("data"));
    }

    #[test]
    fn entitlement_interval_flows_into_lifecycle() {
        let c = AppConfig::parse("[entitlement]\nurl = \"https://l\"\nkey = \"k\"\ninterval_secs = 60\n").unwrap();
        assert_eq!(c.lifecycle_settings().entitlement_interval, Some(Duration::from_secs(60)));
    }

    #[test]
    fn init_timeout_is_configurable_but_not_zero() {
        let c = AppConfig::parse(r#"init_timeout_secs = 20
[[instances]]
id = "a"
"#).unwrap();
        assert_eq!(c.lifecycle_settings().init_timeout, Duration::from_secs(20));
        assert!(AppConfig::parse(r#"init_timeout_secs = 0
[[instances]]
id = "a"
"#).is_err());
    }
}
