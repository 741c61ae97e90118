// Zapmenu Engine — Menu Script Store
//
// Owns the active script. Readers take an `Arc` snapshot; a reload or save
// replaces the pointer in one assignment, so a render that already holds the
// old snapshot finishes against it. A failed parse never touches the pointer.

use super::model::{ActionNode, MenuScript};
use crate::atoms::error::{EngineError, EngineResult};
use log::{info, warn};
use parking_lot::{Mutex, RwLock};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

pub struct ScriptStore {
    path: PathBuf,
    active: RwLock<Arc<MenuScript>>,
    /// mtime of the file version currently active (None for in-memory stores).
    seen_mtime: Mutex<Option<SystemTime>>,
}

impl ScriptStore {
    /// Open the store; the initial load must succeed.
    pub fn open(path: impl Into<PathBuf>) -> EngineResult<Self> {
        let path = path.into();
        let script = read_script(&path)?;
        report_warnings(&script);
        info!("[script] Loaded {} actions from {}", script.len(), path.display());
        Ok(ScriptStore {
            seen_mtime: Mutex::new(file_mtime(&path)),
            path,
            active: RwLock::new(Arc::new(script)),
        })
    }

    /// A store seeded with an already-parsed script. `save` still writes to `path`.
    pub fn with_script(path: impl Into<PathBuf>, script: MenuScript) -> Self {
        ScriptStore {
            path: path.into(),
            active: RwLock::new(Arc::new(script)),
            seen_mtime: Mutex::new(None),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read and parse the backing file without activating it.
    pub fn load(&self) -> EngineResult<MenuScript> {
        read_script(&self.path)
    }

    /// Snapshot of the active script.
    pub fn current(&self) -> Arc<MenuScript> {
        self.active.read().clone()
    }

    pub fn get(&self, name: &str) -> EngineResult<ActionNode> {
        self.current().get(name).cloned()
    }

    /// Re-read the backing file. On failure the active script stays in effect.
    pub fn reload(&self) -> EngineResult<Arc<MenuScript>> {
        let mtime = file_mtime(&self.path);
        match self.load() {
            Ok(script) => {
                report_warnings(&script);
                let script = self.activate(script);
                *self.seen_mtime.lock() = mtime;
                info!("[script] Reloaded {} actions from {}", script.len(), self.path.display());
                Ok(script)
            }
            Err(e) => {
                // Remember the broken version so the watcher doesn't retry it every tick
                *self.seen_mtime.lock() = mtime;
                warn!("[script] Reload rejected, keeping previous script: {}", e);
                Err(e)
            }
        }
    }

    /// Swap in a script without touching disk.
    pub fn activate(&self, script: MenuScript) -> Arc<MenuScript> {
        let script = Arc::new(script);
        *self.active.write() = script.clone();
        script
    }

    /// Persist a script (2-space JSON, temp file + rename) and activate it.
    pub fn save(&self, script: MenuScript) -> EngineResult<Arc<MenuScript>> {
        let text = script.to_pretty_json()?;
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, text.as_bytes())?;
        std::fs::rename(&tmp, &self.path)?;
        *self.seen_mtime.lock() = file_mtime(&self.path);
        info!("[script] Saved {} actions to {}", script.len(), self.path.display());
        Ok(self.activate(script))
    }

    /// True when the backing file changed since the active version was read.
    pub fn is_stale(&self) -> bool {
        match file_mtime(&self.path) {
            Some(m) => *self.seen_mtime.lock() != Some(m),
            None => false,
        }
    }

    /// Poll the backing file and reload on change. `on_change` sees every
    /// reload attempt, successful or rejected.
    pub fn watch<F>(self: Arc<Self>, interval: Duration, mut on_change: F) -> tokio::task::JoinHandle<()>
    where
        F: FnMut(EngineResult<Arc<MenuScript>>) + Send + 'static,
    {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                if self.is_stale() {
                    on_change(self.reload());
                }
            }
        })
    }
}

fn read_script(path: &Path) -> EngineResult<MenuScript> {
    let text = std::fs::read_to_string(path).map_err(|e| {
        EngineError::ConfigParse(format!("cannot read {}: {}", path.display(), e))
    })?;
    MenuScript::parse(&text)
}

fn file_mtime(path: &Path) -> Option<SystemTime> {
    std::fs::metadata(path).and_then(|m| m.modified()).ok()
}

fn report_warnings(script: &MenuScript) {
    if !script.has_root() {
        warn!("[script] No \"{}\" action: greetings will not be answered", crate::atoms::constants::ROOT_ACTION);
    }
    for d in script.dangling_references() {
        warn!("[script] Action \"{}\" option {} points at missing action \"{}\"", d.from, d.token, d.target);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const V1: &str = r#"{"boasVindas": {"menu": {"1": {"texto": "Planos", "acao": "planos"}}}, "planos": "R$100"}"#;
    const V2: &str = r#"{"boasVindas": "so texto"}"#;

    fn write(dir: &tempfile::TempDir, text: &str) -> PathBuf {
        let path = dir.path().join("mensagens.json");
        std::fs::write(&path, text).unwrap();
        path
    }

    #[test]
    fn open_fails_on_invalid_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(&dir, "{ nope");
        assert!(ScriptStore::open(&path).err().unwrap().is_config_parse());
    }

    #[test]
    fn open_fails_on_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = ScriptStore::open(dir.path().join("absent.json")).err().unwrap();
        assert!(err.is_config_parse());
    }

    #[test]
    fn reload_swaps_on_success() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(&dir, V1);
        let store = ScriptStore::open(&path).unwrap();
        let before = store.current();
        std::fs::write(&path, V2).unwrap();
        let after = store.reload().unwrap();
        assert_eq!(after.len(), 1);
        // the old snapshot is untouched
        assert_eq!(before.len(), 2);
        assert!(!store.get("boasVindas").unwrap().is_menu());
    }

    #[test]
    fn reload_with_invalid_json_keeps_previous_script() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(&dir, V1);
        let store = ScriptStore::open(&path).unwrap();
        std::fs::write(&path, "{\"boasVindas\": ").unwrap();
        assert!(store.reload().unwrap_err().is_config_parse());
        let script = store.current();
        assert_eq!(script.len(), 2);
        assert!(script.get("boasVindas").unwrap().is_menu());
        assert!(store.get("planos").is_ok());
    }

    #[test]
    fn save_writes_pretty_json_and_activates() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(&dir, V1);
        let store = ScriptStore::open(&path).unwrap();
        store.save(MenuScript::parse(V2).unwrap()).unwrap();
        let on_disk = std::fs::read_to_string(&path).unwrap();
        assert!(on_disk.contains("\n  \"boasVindas\""));
        assert_eq!(store.current().len(), 1);
        assert!(!dir.path().join("mensagens.json.tmp").exists());
        assert!(!store.is_stale());
    }

    #[test]
    fn in_memory_store_is_never_stale() {
        let store = ScriptStore::with_script("/nonexistent/zapmenu.json", MenuScript::default());
        assert!(!store.is_stale());
        assert!(matches!(store.get("x"), Err(EngineError::ActionNotFound(_))));
    }
}
