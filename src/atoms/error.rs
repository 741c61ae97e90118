// ── Zapmenu Atoms: Error Types ─────────────────────────────────────────────
// Single canonical error enum for the engine, built with `thiserror`.
//
// Design rules:
//   • Variants follow the failure taxonomy of the bot: script parsing,
//     dispatch, delivery, session bring-up, licensing, teardown.
//   • The `#[from]` attribute wires std/external error conversions automatically.
//   • `EngineError` → `String` conversion is provided via `Display` so that
//     host command boundaries (`Result<T, String>`) can call `.map_err(|e|
//     e.to_string())` without boilerplate.
//   • No variant carries secret material (API keys, licence keys) in its message.

use thiserror::Error;

// ── Primary error enum ─────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum EngineError {
    /// Filesystem or OS-level I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization / deserialization failure.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// HTTP / network failure (reqwest layer).
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    /// The menu script is malformed. Never partially applied.
    #[error("Script error: {0}")]
    ConfigParse(String),

    /// Application settings (zapmenu.toml) are invalid.
    #[error("Configuration error: {0}")]
    Config(String),

    /// A menu option or route points at an action the script does not define.
    #[error("Action not found: {0}")]
    ActionNotFound(String),

    /// The messaging runtime refused or failed one outbound call.
    #[error("Send failed to {conversant}: {message}")]
    Send { conversant: String, message: String },

    /// A session handle could not be brought up.
    #[error("Initialization failed for {instance}: {message}")]
    Initialization { instance: String, message: String },

    /// The licence gate rejected the instance or could not be reached.
    #[error("Licence check failed: {0}")]
    Entitlement(String),

    /// Graceful teardown exceeded its bound; the handle was force-killed.
    #[error("Teardown of {instance} timed out after {secs}s")]
    TeardownTimeout { instance: String, secs: u64 },

    /// No bot instance is registered under this id.
    #[error("Unknown instance: {0}")]
    UnknownInstance(String),

    /// Catch-all for errors that do not yet have a dedicated variant.
    /// Prefer adding a specific variant over using this in new code.
    #[error("{0}")]
    Other(String),
}

// ── Convenience constructors ───────────────────────────────────────────────

impl EngineError {
    /// Create a send failure for one conversant.
    pub fn send(conversant: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Send { conversant: conversant.into(), message: message.into() }
    }

    /// Create an initialization failure for one instance.
    pub fn initialization(instance: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Initialization { instance: instance.into(), message: message.into() }
    }

    /// Script errors are the only ones that must block activation of a new config.
    pub fn is_config_parse(&self) -> bool {
        matches!(self, Self::ConfigParse(_))
    }
}

// ── Migration bridge: String → EngineError ─────────────────────────────────
// Allows `?` on helpers returning `Result<T, String>` inside functions
// that return `EngineResult<T>`.

impl From<String> for EngineError {
    fn from(s: String) -> Self {
        EngineError::Other(s)
    }
}

impl From<&str> for EngineError {
    fn from(s: &str) -> Self {
        EngineError::Other(s.to_string())
    }
}

impl From<toml::de::Error> for EngineError {
    fn from(e: toml::de::Error) -> Self {
        EngineError::Config(e.to_string())
    }
}

// ── Convenience alias ──────────────────────────────────────────────────────

/// All engine operations should return this type.
pub type EngineResult<T> = Result<T, EngineError>;

// ── Conversion: EngineError → String ──────────────────────────────────────

impl From<EngineError> for String {
    fn from(e: EngineError) -> Self {
        e.to_string()
    }
}
