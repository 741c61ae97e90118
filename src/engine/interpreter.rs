// Zapmenu Engine — Action Interpreter
//
// Turns one action into an ordered list of outbound steps and plays them
// against a runtime. Planning is pure; delivery is best-effort per step:
// a failed send is recorded and the remaining steps still run.
//
//   sequence node → for each part: [wait delay] typing send; state := root
//   menu node     → typing, settle wait, send;               state := action

use crate::atoms::constants::SETTLE_DELAY_MS;
use crate::atoms::error::{EngineError, EngineResult};
use crate::engine::dialogue::DialogueTable;
use crate::engine::runtime::MessagingRuntime;
use crate::engine::script::{render_menu, substitute, ActionName, ActionNode, MenuScript, MessagePart};
use log::warn;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutboundStep {
    Wait(Duration),
    Typing,
    Send(String),
}

/// Everything one action will do, decided before anything is sent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Plan {
    pub action: ActionName,
    pub steps: Vec<OutboundStep>,
    /// Dialogue state once the action has been rendered.
    pub next_state: ActionName,
}

impl Plan {
    pub fn messages(&self) -> Vec<&str> {
        self.steps
            .iter()
            .filter_map(|s| match s {
                OutboundStep::Send(text) => Some(text.as_str()),
                _ => None,
            })
            .collect()
    }
}

/// Result of playing a plan.
#[derive(Debug, Default)]
pub struct Delivery {
    pub sent: usize,
    pub failures: Vec<EngineError>,
}

impl Delivery {
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }
}

#[derive(Debug, Clone)]
pub struct Interpreter {
    settle_delay: Duration,
}

impl Default for Interpreter {
    fn default() -> Self {
        Self::new(Duration::from_millis(SETTLE_DELAY_MS))
    }
}

impl Interpreter {
    pub fn new(settle_delay: Duration) -> Self {
        Interpreter { settle_delay }
    }

    pub fn plan(
        &self,
        script: &MenuScript,
        action: &str,
        display_name: Option<&str>,
        root: &str,
    ) -> EngineResult<Plan> {
        let node = script.get(action)?;
        let mut steps = Vec::new();

        let next_state = match node {
            ActionNode::Menu(menu) => {
                steps.push(OutboundStep::Typing);
                if !self.settle_delay.is_zero() {
                    steps.push(OutboundStep::Wait(self.settle_delay));
                }
                steps.push(OutboundStep::Send(render_menu(menu, display_name)));
                action.to_string()
            }
            ActionNode::Sequence(parts) => {
                for part in parts {
                    if !part.delay().is_zero() {
                        steps.push(OutboundStep::Wait(part.delay()));
                    }
                    steps.push(OutboundStep::Typing);
                    let text = match part {
                        MessagePart::Text { content, .. } => substitute(&content.joined(), display_name),
                        MessagePart::Menu { menu, .. } => render_menu(menu, display_name),
                    };
                    steps.push(OutboundStep::Send(text));
                }
                root.to_string()
            }
        };

        Ok(Plan { action: action.to_string(), steps, next_state })
    }

    /// Plan the action, record the new dialogue state, then deliver.
    ///
    /// `ActionNotFound` is returned before any state change or send. Once the
    /// plan exists the state is committed; delivery failures never roll it back.
    pub async fn execute(
        &self,
        runtime: &dyn MessagingRuntime,
        dialogue: &DialogueTable,
        script: &MenuScript,
        conversant: &str,
        action: &str,
        display_name: Option<&str>,
    ) -> EngineResult<Delivery> {
        let plan = self.plan(script, action, display_name, dialogue.root())?;
        dialogue.set(conversant, plan.next_state.clone());
        Ok(deliver(runtime, conversant, &plan).await)
    }
}

/// Play steps strictly in order. Each send is awaited before the next step.
pub async fn deliver(runtime: &dyn MessagingRuntime, conversant: &str, plan: &Plan) -> Delivery {
    let mut delivery = Delivery::default();
    for step in &plan.steps {
        match step {
            OutboundStep::Wait(d) => tokio::time::sleep(*d).await,
            OutboundStep::Typing => {
                // Typing is cosmetic; a failure is only worth a log line
                if let Err(e) = runtime.set_typing(conversant).await {
                    warn!("[interpreter] Typing indicator for {} failed: {}", conversant, e);
                }
            }
            OutboundStep::Send(text) => match runtime.send_message(conversant, text).await {
                Ok(()) => delivery.sent += 1,
                Err(e) => {
                    warn!("[interpreter] Send of \"{}\" to {} failed: {}", plan.action, conversant, e);
                    delivery.failures.push(match e {
                        EngineError::Send { .. } => e,
                        other => EngineError::send(conversant, other.to_string()),
                    });
                }
            },
        }
    }
    delivery
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use parking_lot::Mutex;

    const SCRIPT: &str = r#"{
        "boasVindas": {"titulo": "Oi {NOME_CLIENTE}", "menu": {"1": {"texto": "Planos", "acao": "planos"}}},
        "planos": {"mensagens": [
            {"tipo": "texto", "conteudo": ["Plano A", "Plano B"], "delay": 0},
            {"tipo": "texto", "conteudo": "Valeu {NOME_CLIENTE}", "delay": 1000},
            {"tipo": "menu", "conteudo": {"titulo": "Mais?", "menu": {"0": {"texto": "Voltar", "acao": "boasVindas"}}}}
        ]},
        "vazio": {"mensagens": []}
    }"#;

    #[derive(Default)]
    struct Recorder {
        calls: Mutex<Vec<String>>,
        fail_sends_containing: Option<&'static str>,
    }

    #[async_trait]
    impl MessagingRuntime for Recorder {
        async fn initialize(&self) -> EngineResult<()> {
            Ok(())
        }
        async fn send_message(&self, to: &str, text: &str) -> EngineResult<()> {
            if self.fail_sends_containing.is_some_and(|f| text.contains(f)) {
                return Err(EngineError::send(to, "gateway 500"));
            }
            self.calls.lock().push(format!("send:{}", text));
            Ok(())
        }
        async fn set_typing(&self, _to: &str) -> EngineResult<()> {
            self.calls.lock().push("typing".into());
            Ok(())
        }
        async fn destroy(&self) -> EngineResult<()> {
            Ok(())
        }
        fn kill(&self) {}
    }

    fn script() -> MenuScript {
        MenuScript::parse(SCRIPT).unwrap()
    }

    #[test]
    fn menu_plan_is_typing_settle_send() {
        let plan = Interpreter::default().plan(&script(), "boasVindas", Some("Ana Souza"), "boasVindas").unwrap();
        assert_eq!(
            plan.steps,
            vec![
                OutboundStep::Typing,
                OutboundStep::Wait(Duration::from_millis(2000)),
                OutboundStep::Send("Oi Ana\n\n1 - Planos".into()),
            ]
        );
        assert_eq!(plan.next_state, "boasVindas");
    }

    #[test]
    fn sequence_plan_orders_parts_and_resets_to_root() {
        let plan = Interpreter::new(Duration::ZERO).plan(&script(), "planos", None, "boasVindas").unwrap();
        assert_eq!(
            plan.steps,
            vec![
                OutboundStep::Typing,
                OutboundStep::Send("Plano A\nPlano B".into()),
                OutboundStep::Wait(Duration::from_millis(1000)),
                OutboundStep::Typing,
                OutboundStep::Send("Valeu amigo(a)".into()),
                OutboundStep::Typing,
                OutboundStep::Send("Mais?\n\n0 - Voltar".into()),
            ]
        );
        assert_eq!(plan.next_state, "boasVindas");
    }

    #[test]
    fn empty_sequence_sends_nothing_and_resets() {
        let plan = Interpreter::default().plan(&script(), "vazio", None, "boasVindas").unwrap();
        assert!(plan.steps.is_empty());
        assert_eq!(plan.next_state, "boasVindas");
    }

    #[tokio::test]
    async fn missing_action_leaves_state_alone() {
        let rt = Recorder::default();
        let table = DialogueTable::default();
        table.set("c", "planos");
        let err = Interpreter::default()
            .execute(&rt, &table, &script(), "c", "fantasma", None)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::ActionNotFound(a) if a == "fantasma"));
        assert_eq!(table.get("c"), "planos");
        assert!(rt.calls.lock().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn execute_menu_sets_state_to_menu() {
        let rt = Recorder::default();
        let table = DialogueTable::default();
        let d = Interpreter::default()
            .execute(&rt, &table, &script(), "c", "boasVindas", Some("Ana"))
            .await
            .unwrap();
        assert_eq!(d.sent, 1);
        assert_eq!(table.get("c"), "boasVindas");
        assert_eq!(*rt.calls.lock(), vec!["typing".to_string(), "send:Oi Ana\n\n1 - Planos".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_part_does_not_block_later_parts_or_revert_state() {
        let rt = Recorder { fail_sends_containing: Some("Plano A"), ..Default::default() };
        let table = DialogueTable::default();
        table.set("c", "boasVindas");
        let d = Interpreter::default()
            .execute(&rt, &table, &script(), "c", "planos", None)
            .await
            .unwrap();
        assert_eq!(d.sent, 2);
        assert_eq!(d.failures.len(), 1);
        assert!(!d.is_complete());
        assert_eq!(table.get("c"), "boasVindas");
        let sends: Vec<String> = rt.calls.lock().iter().filter(|c| c.starts_with("send:")).cloned().collect();
        assert_eq!(sends, vec!["send:Valeu amigo(a)".to_string(), "send:Mais?\n\n0 - Voltar".to_string()]);
    }
}
