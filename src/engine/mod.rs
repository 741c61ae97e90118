// Zapmenu Engine
//
// Module layout:
//   script      — menu script model, rendering, file-backed store
//   dialogue    — per-conversant current action
//   router      — inbound text → next action
//   interpreter — action → ordered typing/wait/send steps
//   runtime     — messaging runtime trait + Evolution API gateway
//   entitlement — licence gate
//   events      — UI event bus
//   lifecycle   — instance start/stop/restart and event pump
//   config      — zapmenu.toml

pub mod config;
pub mod dialogue;
pub mod entitlement;
pub mod events;
pub mod interpreter;
pub mod lifecycle;
pub mod router;
pub mod runtime;
pub mod script;
