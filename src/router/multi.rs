//! 多智能体编排：路由器 + 专职编排器
//!
//! 每个智能体是一个独立的 Orchestrator（自己的系统指令与工具子集）。
//! 一轮流程：追加 user 消息 → route 选智能体 → 被选编排器 drive 到 Done。
//! 单智能体部署完全绕过本层（CLI 默认路径）。

use std::collections::HashMap;

use crate::core::{AgentError, Orchestrator, TurnOptions, TurnResult};
use crate::router::{IntentRouter, RouteDecision};
use crate::state::{ConversationState, Message};

/// 多智能体编排器：名字 → 专职编排器，路由器决定本轮由谁执行
pub struct MultiAgentOrchestrator {
    router: IntentRouter,
    agents: HashMap<String, Orchestrator>,
    default_agent: String,
}

impl MultiAgentOrchestrator {
    pub fn new(
        router: IntentRouter,
        agents: HashMap<String, Orchestrator>,
        default_agent: impl Into<String>,
    ) -> Self {
        Self {
            router,
            agents,
            default_agent: default_agent.into(),
        }
    }

    /// 路由并执行一轮；返回 (决策, 轮结果)
    pub async fn run_turn(
        &self,
        state: &mut ConversationState,
        user_input: &str,
        opts: &TurnOptions,
    ) -> Result<(RouteDecision, TurnResult), AgentError> {
        state.push_message(Message::user(user_input));

        let decision = self.router.route(state).await;
        let orchestrator = self
            .agents
            .get(&decision.agent)
            .or_else(|| self.agents.get(&self.default_agent))
            .ok_or_else(|| {
                AgentError::Config(format!("no orchestrator for agent '{}'", decision.agent))
            })?;

        tracing::debug!(agent = %decision.agent, confidence = decision.confidence, "routed turn");
        let result = orchestrator.drive(state, opts).await?;
        Ok((decision, result))
    }
}
