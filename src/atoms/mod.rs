// ── Zapmenu Atoms Layer ────────────────────────────────────────────────────
// Pure constants, error and data types. No side effects or I/O.
// Dependency rule: atoms may only depend on std and external pure crates.
// Nothing here may import from engine/ or main.rs.

pub mod constants;
pub mod error;
pub mod types;
