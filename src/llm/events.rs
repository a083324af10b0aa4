//! 流式过程事件：供渲染层展示 token 增量、工具生命周期与最终消息
//!
//! 事件由推理客户端（token 增量 / 最终消息）与编排图（工具生命周期）共同产出，
//! node 字段标注来源节点（chatbot / tools），渲染层据此分类，不参与编排决策。

use serde::Serialize;

use crate::state::Message;

/// 思考节点名
pub const NODE_CHATBOT: &str = "chatbot";
/// 工具节点名
pub const NODE_TOOLS: &str = "tools";

/// 工具生命周期阶段
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolPhase {
    Start,
    End,
}

/// 单轮过程事件（可序列化为 JSON 供调试输出）
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    /// 模型输出的一段 token 增量
    TokenDelta { node: String, text: String },
    /// 工具开始/结束
    ToolLifecycle {
        phase: ToolPhase,
        tool_name: String,
        node: String,
    },
    /// 本思考步的最终 assistant 消息（可携带 tool_calls）
    FinalMessage { node: String, message: Message },
}

impl StreamEvent {
    pub fn token(text: impl Into<String>) -> Self {
        Self::TokenDelta {
            node: NODE_CHATBOT.to_string(),
            text: text.into(),
        }
    }

    pub fn tool_start(tool_name: impl Into<String>) -> Self {
        Self::ToolLifecycle {
            phase: ToolPhase::Start,
            tool_name: tool_name.into(),
            node: NODE_TOOLS.to_string(),
        }
    }

    pub fn tool_end(tool_name: impl Into<String>) -> Self {
        Self::ToolLifecycle {
            phase: ToolPhase::End,
            tool_name: tool_name.into(),
            node: NODE_TOOLS.to_string(),
        }
    }

    pub fn final_message(message: Message) -> Self {
        Self::FinalMessage {
            node: NODE_CHATBOT.to_string(),
            message,
        }
    }
}
