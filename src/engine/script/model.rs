// Zapmenu Engine — Menu Script Model
//
// Typed form of the conversation file. Nodes are read through a serde wire
// layer (`Raw*`, field names as written in the file) and converted once into
// tagged `ActionNode`s; renders never look at JSON again.
//
//   menu node      {"titulo": str | [str], "menu": {"1": {"texto", "acao"}}}
//   sequence node  {"mensagens": [{"tipo": "texto" | "menu", "conteudo", "delay"}]}
//   legacy text    "..." | ["...", "..."]   → one-part sequence

use crate::atoms::constants::ROOT_ACTION;
use crate::atoms::error::{EngineError, EngineResult};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Number, Value};
use std::collections::HashMap;
use std::time::Duration;

pub type ActionName = String;

// ── Content ────────────────────────────────────────────────────────────

/// Text written either as one string or as a list of lines.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Content {
    Text(String),
    Lines(Vec<String>),
}

impl Content {
    /// Lines are joined with a newline into a single message body.
    pub fn joined(&self) -> String {
        match self {
            Content::Text(s) => s.clone(),
            Content::Lines(lines) => lines.join("\n"),
        }
    }
}

// ── Wire layer ─────────────────────────────────────────────────────────

#[derive(Serialize, Deserialize)]
struct RawOption {
    texto: String,
    acao: String,
}

#[derive(Serialize, Deserialize)]
struct RawMenu {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    titulo: Option<Content>,
    /// Kept as a JSON map so options stay in file order.
    menu: Map<String, Value>,
}

fn default_part_type() -> String {
    "texto".into()
}

#[derive(Serialize, Deserialize)]
struct RawPart {
    #[serde(default = "default_part_type")]
    tipo: String,
    /// Content or menu, depending on `tipo`.
    conteudo: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    delay: Option<Number>,
}

#[derive(Serialize, Deserialize)]
struct RawSequence {
    mensagens: Vec<RawPart>,
}

fn decode<T: DeserializeOwned>(v: Value, at: &str) -> Result<T, String> {
    serde_json::from_value(v).map_err(|e| format!("{}: {}", at, e))
}

// ── Nodes ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MenuOption {
    pub label: String,
    pub target: ActionName,
}

/// A menu expects a reply: one of its option tokens.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct MenuNode {
    pub title: Option<Content>,
    /// Token → option, in file order.
    pub options: Vec<(String, MenuOption)>,
}

impl MenuNode {
    /// Look up an option by an already-normalized token.
    pub fn option(&self, token: &str) -> Option<&MenuOption> {
        self.options
            .iter()
            .find(|(t, _)| t.trim().to_lowercase() == token)
            .map(|(_, opt)| opt)
    }
}

impl TryFrom<RawMenu> for MenuNode {
    type Error = String;

    fn try_from(raw: RawMenu) -> Result<Self, String> {
        let options = raw
            .menu
            .into_iter()
            .map(|(token, v)| {
                let opt: RawOption = decode(v, &format!("menu.{}", token))?;
                if opt.acao.trim().is_empty() {
                    return Err(format!("menu.{}: empty \"acao\"", token));
                }
                Ok((token, MenuOption { label: opt.texto, target: opt.acao }))
            })
            .collect::<Result<Vec<_>, String>>()?;
        Ok(MenuNode { title: raw.titulo, options })
    }
}

impl From<&MenuNode> for RawMenu {
    fn from(menu: &MenuNode) -> Self {
        RawMenu {
            titulo: menu.title.clone(),
            menu: menu
                .options
                .iter()
                .map(|(token, opt)| (token.clone(), json!({ "texto": opt.label, "acao": opt.target })))
                .collect(),
        }
    }
}

/// One step of a sequence node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessagePart {
    Text { content: Content, delay: Duration },
    Menu { menu: MenuNode, delay: Duration },
}

impl MessagePart {
    pub fn delay(&self) -> Duration {
        match self {
            MessagePart::Text { delay, .. } | MessagePart::Menu { delay, .. } => *delay,
        }
    }
}

impl TryFrom<RawPart> for MessagePart {
    type Error = String;

    fn try_from(raw: RawPart) -> Result<Self, String> {
        let delay = match &raw.delay {
            None => Duration::ZERO,
            Some(n) => n
                .as_u64()
                .or_else(|| n.as_f64().filter(|f| *f >= 0.0).map(|f| f.round() as u64))
                .map(Duration::from_millis)
                .ok_or_else(|| "\"delay\" must be a non-negative number".to_string())?,
        };
        match raw.tipo.as_str() {
            "texto" => Ok(MessagePart::Text { content: decode(raw.conteudo, "conteudo")?, delay }),
            "menu" => {
                let menu = MenuNode::try_from(decode::<RawMenu>(raw.conteudo, "conteudo")?)
                    .map_err(|e| format!("conteudo.{}", e))?;
                Ok(MessagePart::Menu { menu, delay })
            }
            other => Err(format!("unknown part type \"{}\" (expected \"texto\" or \"menu\")", other)),
        }
    }
}

impl From<&MessagePart> for RawPart {
    fn from(part: &MessagePart) -> Self {
        let (tipo, conteudo) = match part {
            MessagePart::Text { content, .. } => ("texto", json!(content)),
            MessagePart::Menu { menu, .. } => ("menu", json!(RawMenu::from(menu))),
        };
        RawPart {
            tipo: tipo.to_string(),
            conteudo,
            delay: Some(Number::from(part.delay().as_millis() as u64)),
        }
    }
}

/// A named node of the script.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActionNode {
    Menu(MenuNode),
    Sequence(Vec<MessagePart>),
}

impl TryFrom<RawSequence> for ActionNode {
    type Error = String;

    fn try_from(raw: RawSequence) -> Result<Self, String> {
        raw.mensagens
            .into_iter()
            .enumerate()
            .map(|(i, p)| MessagePart::try_from(p).map_err(|e| format!("mensagens[{}]: {}", i, e)))
            .collect::<Result<Vec<_>, String>>()
            .map(ActionNode::Sequence)
    }
}

impl ActionNode {
    pub fn is_menu(&self) -> bool {
        matches!(self, ActionNode::Menu(_))
    }

    pub fn as_menu(&self) -> Option<&MenuNode> {
        match self {
            ActionNode::Menu(m) => Some(m),
            ActionNode::Sequence(_) => None,
        }
    }

    /// The node kind is decided here, from the keys present, and nowhere else.
    fn from_value(name: &str, v: &Value) -> EngineResult<Self> {
        let node = match v {
            Value::String(_) | Value::Array(_) => decode::<Content>(v.clone(), "text").map(|content| {
                ActionNode::Sequence(vec![MessagePart::Text { content, delay: Duration::ZERO }])
            }),
            Value::Object(obj) if obj.contains_key("mensagens") => {
                decode::<RawSequence>(v.clone(), "mensagens").and_then(ActionNode::try_from)
            }
            Value::Object(obj) if obj.contains_key("menu") => decode::<RawMenu>(v.clone(), "menu")
                .and_then(MenuNode::try_from)
                .map(ActionNode::Menu),
            _ => Err("expected a menu (\"menu\"), a sequence (\"mensagens\") or plain text".to_string()),
        };
        node.map_err(|e| EngineError::ConfigParse(format!("action \"{}\": {}", name, e)))
    }

    fn to_value(&self) -> Value {
        match self {
            ActionNode::Menu(m) => json!(RawMenu::from(m)),
            ActionNode::Sequence(parts) => {
                json!(RawSequence { mensagens: parts.iter().map(RawPart::from).collect() })
            }
        }
    }
}

// ── Script ─────────────────────────────────────────────────────────────

/// A menu option whose target is not defined in the script.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DanglingRef {
    pub from: ActionName,
    pub token: String,
    pub target: ActionName,
}

/// The whole conversation definition: action name → node.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct MenuScript {
    actions: Vec<(ActionName, ActionNode)>,
    index: HashMap<ActionName, usize>,
}

impl MenuScript {
    /// Decode and validate a complete script. Either every node decodes or the
    /// whole script is rejected.
    pub fn parse(text: &str) -> EngineResult<Self> {
        let value: Value = serde_json::from_str(text)
            .map_err(|e| EngineError::ConfigParse(format!("invalid JSON: {}", e)))?;
        Self::from_value(&value)
    }

    pub fn from_value(value: &Value) -> EngineResult<Self> {
        let root = value.as_object().ok_or_else(|| {
            EngineError::ConfigParse("top level must be an object of actions".into())
        })?;
        let mut script = MenuScript::default();
        for (name, node) in root {
            script.insert(name.clone(), ActionNode::from_value(name, node)?);
        }
        Ok(script)
    }

    pub fn to_value(&self) -> Value {
        let mut obj = Map::new();
        for (name, node) in &self.actions {
            obj.insert(name.clone(), node.to_value());
        }
        Value::Object(obj)
    }

    /// Two-space indented JSON, in the original action order.
    pub fn to_pretty_json(&self) -> EngineResult<String> {
        Ok(serde_json::to_string_pretty(&self.to_value())?)
    }

    /// Insert or replace an action, keeping its original position on replace.
    pub fn insert(&mut self, name: ActionName, node: ActionNode) {
        match self.index.get(&name) {
            Some(&i) => self.actions[i].1 = node,
            None => {
                self.index.insert(name.clone(), self.actions.len());
                self.actions.push((name, node));
            }
        }
    }

    pub fn get(&self, name: &str) -> EngineResult<&ActionNode> {
        self.index
            .get(name)
            .map(|&i| &self.actions[i].1)
            .ok_or_else(|| EngineError::ActionNotFound(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    pub fn has_root(&self) -> bool {
        self.contains(ROOT_ACTION)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.actions.iter().map(|(n, _)| n.as_str())
    }

    pub fn len(&self) -> usize {
        self.actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    /// Menu options (bare or nested in a sequence) pointing at undefined actions.
    /// These are tolerated; dispatch reports them as `ActionNotFound`.
    pub fn dangling_references(&self) -> Vec<DanglingRef> {
        let mut out = Vec::new();
        for (name, node) in &self.actions {
            let menus: Vec<&MenuNode> = match node {
                ActionNode::Menu(m) => vec![m],
                ActionNode::Sequence(parts) => parts
                    .iter()
                    .filter_map(|p| match p {
                        MessagePart::Menu { menu, .. } => Some(menu),
                        MessagePart::Text { .. } => None,
                    })
                    .collect(),
            };
            for menu in menus {
                for (token, opt) in &menu.options {
                    if !self.contains(&opt.target) {
                        out.push(DanglingRef {
                            from: name.clone(),
                            token: token.clone(),
                            target: opt.target.clone(),
                        });
                    }
                }
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"{
        "boasVindas": {"titulo": "Oi {NOME_CLIENTE}", "menu": {"1": {"texto": "Planos", "acao": "planos"}}},
        "planos": {"mensagens": [{"tipo": "texto", "conteudo": "R$100/mes", "delay": 0}]}
    }"#;

    #[test]
    fn parses_menu_and_sequence_nodes() {
        let script = MenuScript::parse(SAMPLE).unwrap();
        assert_eq!(script.len(), 2);
        let root = script.get("boasVindas").unwrap();
        let menu = root.as_menu().unwrap();
        assert_eq!(menu.title, Some(Content::Text("Oi {NOME_CLIENTE}".into())));
        assert_eq!(menu.option("1").unwrap().target, "planos");
        assert!(matches!(script.get("planos").unwrap(), ActionNode::Sequence(p) if p.len() == 1));
    }

    #[test]
    fn option_order_follows_file_order() {
        let script = MenuScript::parse(
            r#"{"m": {"menu": {"2": {"texto": "b", "acao": "x"}, "10": {"texto": "c", "acao": "x"}, "1": {"texto": "a", "acao": "x"}}}}"#,
        )
        .unwrap();
        let tokens: Vec<&str> =
            script.get("m").unwrap().as_menu().unwrap().options.iter().map(|(t, _)| t.as_str()).collect();
        assert_eq!(tokens, vec!["2", "10", "1"]);
    }

    #[test]
    fn legacy_text_becomes_single_part_sequence() {
        let script = MenuScript::parse(r#"{"ajuda": ["linha 1", "linha 2"], "outros": "texto"}"#).unwrap();
        match script.get("ajuda").unwrap() {
            ActionNode::Sequence(parts) => {
                assert_eq!(parts.len(), 1);
                assert_eq!(parts[0].delay(), Duration::ZERO);
            }
            other => panic!("expected sequence, got {:?}", other),
        }
    }

    #[test]
    fn nested_menu_part_and_delay_are_decoded() {
        let script = MenuScript::parse(
            r#"{"seq": {"mensagens": [
                {"tipo": "texto", "conteudo": ["a", "b"], "delay": 1500},
                {"tipo": "menu", "conteudo": {"titulo": "Escolha", "menu": {"1": {"texto": "Voltar", "acao": "boasVindas"}}}}
            ]}}"#,
        )
        .unwrap();
        let ActionNode::Sequence(parts) = script.get("seq").unwrap() else {
            panic!("expected sequence");
        };
        assert_eq!(parts[0].delay(), Duration::from_millis(1500));
        assert!(matches!(&parts[1], MessagePart::Menu { menu, .. } if menu.options.len() == 1));
    }

    #[test]
    fn rejects_invalid_json() {
        let err = MenuScript::parse("{\"a\": ").unwrap_err();
        assert!(err.is_config_parse());
    }

    #[test]
    fn rejects_unknown_part_type_naming_the_action() {
        let err = MenuScript::parse(
            r#"{"seq": {"mensagens": [{"tipo": "video", "conteudo": "x"}]}}"#,
        )
        .unwrap_err();
        assert!(err.is_config_parse());
        assert!(err.to_string().contains("seq"));
        assert!(err.to_string().contains("video"));
    }

    #[test]
    fn rejects_option_without_target() {
        let err = MenuScript::parse(r#"{"m": {"menu": {"1": {"texto": "a"}}}}"#).unwrap_err();
        assert!(err.to_string().contains("acao"));
    }

    #[test]
    fn delay_accepts_fractions_and_rejects_negatives() {
        let script = MenuScript::parse(r#"{"s": {"mensagens": [{"conteudo": "x", "delay": 1499.6}]}}"#).unwrap();
        let ActionNode::Sequence(parts) = script.get("s").unwrap() else {
            panic!("expected sequence");
        };
        assert_eq!(parts[0].delay(), Duration::from_millis(1500));

        let err = MenuScript::parse(r#"{"s": {"mensagens": [{"conteudo": "x", "delay": -5}]}}"#).unwrap_err();
        assert!(err.to_string().contains("action \"s\""));
        assert!(err.to_string().contains("delay"));
    }

    #[test]
    fn missing_content_names_the_part() {
        let err = MenuScript::parse(r#"{"s": {"mensagens": [{"tipo": "texto"}]}}"#).unwrap_err();
        assert!(err.is_config_parse());
        assert!(err.to_string().contains("conteudo"));
    }

    #[test]
    fn legacy_and_nested_nodes_save_in_canonical_form() {
        let script = MenuScript::parse(
            r#"{"ajuda": ["a", "b"],
                "seq": {"mensagens": [{"tipo": "menu", "conteudo": {"menu": {"0": {"texto": "Voltar", "acao": "ajuda"}}}, "delay": 250}]}}"#,
        )
        .unwrap();
        let value = script.to_value();
        assert_eq!(value["ajuda"], json!({"mensagens": [{"tipo": "texto", "conteudo": ["a", "b"], "delay": 0}]}));
        assert_eq!(value["seq"]["mensagens"][0]["tipo"], "menu");
        assert_eq!(value["seq"]["mensagens"][0]["delay"], 250);
        assert!(value["seq"]["mensagens"][0]["conteudo"].get("titulo").is_none());
        assert_eq!(MenuScript::from_value(&value).unwrap(), script);
    }

    #[test]
    fn rejects_non_object_root() {
        assert!(MenuScript::parse("[1, 2]").unwrap_err().is_config_parse());
    }

    #[test]
    fn dangling_targets_are_reported_not_rejected() {
        let script = MenuScript::parse(
            r#"{"boasVindas": {"menu": {"1": {"texto": "a", "acao": "nada"}, "2": {"texto": "b", "acao": "boasVindas"}}}}"#,
        )
        .unwrap();
        let dangling = script.dangling_references();
        assert_eq!(
            dangling,
            vec![DanglingRef { from: "boasVindas".into(), token: "1".into(), target: "nada".into() }]
        );
        assert!(matches!(script.get("nada"), Err(EngineError::ActionNotFound(n)) if n == "nada"));
    }

    #[test]
    fn pretty_json_uses_two_space_indent_and_reparses() {
        let script = MenuScript::parse(SAMPLE).unwrap();
        let text = script.to_pretty_json().unwrap();
        assert!(text.starts_with("{\n  \"boasVindas\""));
        assert_eq!(MenuScript::parse(&text).unwrap(), script);
    }
}
