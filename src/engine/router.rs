// Zapmenu Engine — Router
//
// Decides which action an inbound text triggers, given the conversant's
// current action. Priority:
//   1. option token of the current menu
//   2. reset token "0"
//   3. greeting keyword anywhere in the text
//   4. nothing (the message is ignored)
//
// Callers must already have dropped group messages and the bot's own messages.

use crate::atoms::constants::{GREETING_KEYWORDS, RESET_TOKEN};
use crate::engine::dialogue::DialogueTable;
use crate::engine::script::{ActionName, MenuScript};
use log::debug;

/// Trim and lowercase.
pub fn normalize(text: &str) -> String {
    text.trim().to_lowercase()
}

/// Substring match against the greeting keyword set (input already normalized).
pub fn is_greeting(normalized: &str) -> bool {
    GREETING_KEYWORDS.iter().any(|k| normalized.contains(k))
}

pub fn route(
    dialogue: &DialogueTable,
    conversant: &str,
    raw_text: &str,
    script: &MenuScript,
) -> Option<ActionName> {
    let text = normalize(raw_text);
    if text.is_empty() {
        return None;
    }

    let current = dialogue.get(conversant);
    if let Some(opt) = script
        .get(&current)
        .ok()
        .and_then(|node| node.as_menu())
        .and_then(|menu| menu.option(&text))
    {
        debug!("[router] {} chose option {} of {} → {}", conversant, text, current, opt.target);
        return Some(opt.target.clone());
    }

    if text == RESET_TOKEN || is_greeting(&text) {
        debug!("[router] {} back to root from {}", conversant, current);
        return Some(dialogue.root().to_string());
    }

    None
}
