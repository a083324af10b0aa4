//! 意图路由：为当前轮选择专职智能体
//!
//! 单次非流式 LLM 调用产出 JSON 决策；解析失败回退默认智能体（置信度 0.3），
//! 未知智能体强制回到默认并封顶置信度，低置信度且存在上一轮意图时保持原智能体
//! （继续性偏置，防止逐轮抖动）。route 永不向上抛错。每个最终决策都追加到
//! route_history（单行审计）与 artifacts（完整结构），并更新 state.intent。

pub mod multi;

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::llm::{LlmClient, Sampling};
use crate::state::{ConversationState, Message};

pub use multi::MultiAgentOrchestrator;

/// 路由决策默认置信度阈值
pub const DEFAULT_CONF_THRESHOLD: f64 = 0.6;
/// 解析失败回退时的置信度
const FALLBACK_CONFIDENCE: f64 = 0.3;
/// 未知智能体强制回退后的置信度上限
const UNKNOWN_AGENT_CONF_CAP: f64 = 0.5;

const ROUTER_SYS: &str = "\
Tu es l'orchestrateur d'une équipe d'agents spécialisés.

Analyse l'historique et choisis l'agent le plus adapté pour ce tour.
Réponds UNIQUEMENT en JSON, sans texte autour :
{\"agent\": \"<nom>\", \"confidence\": 0.0-1.0, \"rationale\": \"...\", \"plan\": [\"étape 1\", \"étape 2\"]}
";

/// 可路由的智能体描述
#[derive(Clone, Debug)]
pub struct AgentSpec {
    pub name: String,
    pub description: String,
}

impl AgentSpec {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
        }
    }
}

/// 每轮新产出的路由决策；归档后不再修改
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RouteDecision {
    pub agent: String,
    pub confidence: f64,
    pub rationale: String,
    #[serde(default)]
    pub plan: Vec<String>,
}

/// 意图路由器
pub struct IntentRouter {
    llm: Arc<dyn LlmClient>,
    agents: Vec<AgentSpec>,
    default_agent: String,
    conf_threshold: f64,
}

/// 去掉可能的 ```json 围栏
fn strip_code_fence(raw: &str) -> &str {
    let s = raw.trim();
    let s = s.strip_prefix("```json").or_else(|| s.strip_prefix("```")).unwrap_or(s);
    let s = s.strip_suffix("```").unwrap_or(s);
    s.trim()
}

impl IntentRouter {
    pub fn new(
        llm: Arc<dyn LlmClient>,
        agents: Vec<AgentSpec>,
        default_agent: impl Into<String>,
    ) -> Self {
        Self {
            llm,
            agents,
            default_agent: default_agent.into(),
            conf_threshold: DEFAULT_CONF_THRESHOLD,
        }
    }

    pub fn with_conf_threshold(mut self, conf_threshold: f64) -> Self {
        self.conf_threshold = conf_threshold;
        self
    }

    pub fn agent_names(&self) -> Vec<&str> {
        self.agents.iter().map(|a| a.name.as_str()).collect()
    }

    fn catalog_text(&self) -> String {
        self.agents
            .iter()
            .map(|a| format!("- {} : {}", a.name, a.description))
            .collect::<Vec<_>>()
            .join("\n")
    }

    fn build_system(&self, state: &ConversationState) -> String {
        let names: Vec<&str> = self.agent_names();
        let mut sys = format!(
            "{}\n{}\n\nAgents disponibles : {}.",
            ROUTER_SYS,
            self.catalog_text(),
            names.join(", ")
        );
        // 继续性：告知上一轮的智能体
        if let Some(intent) = &state.intent {
            sys.push_str(&format!("\nAgent précédent : {} (garder si cohérent).", intent));
        }
        sys
    }

    /// 路由当前轮；决策（含所有回退与覆盖）归档进 state 后返回
    pub async fn route(&self, state: &mut ConversationState) -> RouteDecision {
        let mut messages = vec![Message::system(self.build_system(state))];
        messages.extend_from_slice(state.messages());

        let raw = match self
            .llm
            .complete(&messages, &[], &Sampling::default())
            .await
        {
            Ok(reply) => reply.content,
            Err(e) => {
                tracing::warn!(error = %e, "router LLM call failed");
                String::new()
            }
        };

        let mut decision = match serde_json::from_str::<RouteDecision>(strip_code_fence(&raw)) {
            Ok(mut d) => {
                d.confidence = d.confidence.clamp(0.0, 1.0);
                d
            }
            Err(_) => RouteDecision {
                agent: self.default_agent.clone(),
                confidence: FALLBACK_CONFIDENCE,
                rationale: format!("JSON invalide → fallback {}", self.default_agent),
                plan: Vec::new(),
            },
        };

        // 未知智能体：强制回到默认并封顶置信度
        if !self.agents.iter().any(|a| a.name == decision.agent) {
            decision.rationale.push_str(&format!(
                " (agent inconnu → {})",
                self.default_agent
            ));
            decision.agent = self.default_agent.clone();
            decision.confidence = decision.confidence.min(UNKNOWN_AGENT_CONF_CAP);
        }

        // 继续性偏置：低置信度时不换智能体
        if decision.confidence < self.conf_threshold {
            if let Some(previous) = state.intent.clone() {
                if previous != decision.agent {
                    decision.agent = previous;
                }
                decision
                    .rationale
                    .push_str(" (confiance faible → continuité)");
            }
        }

        state.intent = Some(decision.agent.clone());
        state.route_history.push(format!(
            "router->{} (conf={:.2})",
            decision.agent, decision.confidence
        ));
        state.artifacts.push(serde_json::json!({
            "type": "route_plan",
            "agent": decision.agent,
            "confidence": decision.confidence,
            "rationale": decision.rationale,
            "plan": decision.plan,
        }));

        decision
    }
}
