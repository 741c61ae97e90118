// Zapmenu Engine — Dialogue State Table
//
// Conversant address → name of the action last rendered to them. Memory only;
// one table per running instance, dropped when the instance stops.
//
// There is no eviction: the table grows with the number of distinct
// conversants an instance has talked to since it started. Contact lists bound
// that in practice; a long-lived instance on a busy number will hold one small
// entry per contact until it is restarted.

use crate::atoms::constants::ROOT_ACTION;
use crate::engine::script::ActionName;
use parking_lot::Mutex;
use std::collections::HashMap;

pub struct DialogueTable {
    root: ActionName,
    states: Mutex<HashMap<String, ActionName>>,
}

impl Default for DialogueTable {
    fn default() -> Self {
        Self::new(ROOT_ACTION)
    }
}

impl DialogueTable {
    pub fn new(root: impl Into<ActionName>) -> Self {
        DialogueTable { root: root.into(), states: Mutex::new(HashMap::new()) }
    }

    pub fn root(&self) -> &str {
        &self.root
    }

    /// Current action for a conversant; the root action when unseen.
    pub fn get(&self, conversant: &str) -> ActionName {
        self.states
            .lock()
            .get(conversant)
            .cloned()
            .unwrap_or_else(|| self.root.clone())
    }

    pub fn set(&self, conversant: &str, action: impl Into<ActionName>) {
        self.states.lock().insert(conversant.to_string(), action.into());
    }

    pub fn reset(&self, conversant: &str) {
        let root = self.root.clone();
        self.set(conversant, root);
    }

    /// Whether this conversant has been routed at least once.
    pub fn is_known(&self, conversant: &str) -> bool {
        self.states.lock().contains_key(conversant)
    }

    pub fn len(&self) -> usize {
        self.states.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
