// Zapmenu Engine — Script Rendering
// Placeholder substitution and menu text layout. Pure string functions.

use super::model::MenuNode;
use crate::atoms::constants::{FALLBACK_NAME, NAME_PLACEHOLDER};

/// First whitespace-delimited token of a display name, or the fallback.
pub fn first_name(display_name: Option<&str>) -> &str {
    display_name
        .and_then(|n| n.split_whitespace().next())
        .unwrap_or(FALLBACK_NAME)
}

/// Replace every `{NOME_CLIENTE}` with the conversant's first name.
pub fn substitute(text: &str, display_name: Option<&str>) -> String {
    if !text.contains(NAME_PLACEHOLDER) {
        return text.to_string();
    }
    text.replace(NAME_PLACEHOLDER, first_name(display_name))
}

/// Title line(s), a blank line, then one `"<token> - <label>"` line per option.
pub fn render_menu(menu: &MenuNode, display_name: Option<&str>) -> String {
    let options = menu
        .options
        .iter()
        .map(|(token, opt)| format!("{} - {}", token, opt.label))
        .collect::<Vec<_>>()
        .join("\n");

    let text = match &menu.title {
        Some(title) if options.is_empty() => title.joined(),
        Some(title) => format!("{}\n\n{}", title.joined(), options),
        None => options,
    };
    substitute(&text, display_name)
}
