// Zapmenu Engine — Menu Script
//
// Module layout:
//   model  — MenuScript, ActionNode, MenuNode, MessagePart, JSON decode/encode
//   render — {NOME_CLIENTE} substitution, menu text layout
//   store  — ScriptStore: load, get, reload, save, watch

pub mod model;
pub mod render;
pub mod store;

pub use model::{ActionName, ActionNode, Content, DanglingRef, MenuNode, MenuOption, MenuScript, MessagePart};
pub use render::{first_name, render_menu, substitute};
pub use store::ScriptStore;
