// ── Zapmenu Atoms: Constants ───────────────────────────────────────────────
// All named constants for the crate live here.
// Collecting them in one place keeps magic strings out of the engine.

// ── Conversation script ───────────────────────────────────────────────────
// The welcome action every conversant starts from and returns to after a
// terminal sequence, a greeting, or the reset token.
pub const ROOT_ACTION: &str = "boasVindas";

/// Typing exactly this resets the conversant to the root action.
pub const RESET_TOKEN: &str = "0";

/// Substrings that (after lowercasing) send the conversant back to the root.
/// Matching is plain substring search, so "oi" also fires inside "oito".
pub const GREETING_KEYWORDS: &[&str] = &[
    "menu", "oi", "olá", "ola", "bom dia", "boa tarde", "boa noite", "opa",
];

/// Replaced at render time with the conversant's first name.
pub const NAME_PLACEHOLDER: &str = "{NOME_CLIENTE}";

/// Used when the conversant has no display name.
pub const FALLBACK_NAME: &str = "amigo(a)";

/// Default script file name, next to the settings file.
pub const SCRIPT_FILE_NAME: &str = "mensagens.json";

/// Default settings file name.
pub const SETTINGS_FILE_NAME: &str = "zapmenu.toml";

// ── Delivery pacing ───────────────────────────────────────────────────────
// Pause between the typing indicator and a bare menu reply.
pub const SETTLE_DELAY_MS: u64 = 2_000;

// ── Lifecycle bounds ──────────────────────────────────────────────────────
// How long a graceful destroy may take before the handle is force-killed.
pub const STOP_GRACE_SECS: u64 = 5;

// How long a runtime may take to come up (gateway calls, webhook bind) before
// the start attempt is abandoned. The QR scan itself is not covered.
pub const INIT_TIMEOUT_SECS: u64 = 60;

// Per-request bound on gateway HTTP calls (create, sendText, sendPresence).
pub const GATEWAY_TIMEOUT_SECS: u64 = 30;

// Licence re-check cadence for running instances (12 hours).
pub const ENTITLEMENT_INTERVAL_SECS: u64 = 12 * 60 * 60;

// Script file poll interval for hot reload.
pub const SCRIPT_WATCH_INTERVAL_SECS: u64 = 3;

// Capacity of the UI event broadcast channel. Slow subscribers lag, never block.
pub const EVENT_BUS_CAPACITY: usize = 256;

// ── Instance defaults ─────────────────────────────────────────────────────
pub const DEFAULT_INSTANCE_ID: &str = "principal";
