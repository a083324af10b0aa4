//! LLM 客户端抽象
//!
//! 所有后端（OpenAI 兼容 / Mock）实现 LlmClient：complete（非流式，返回可携带
//! tool_calls 的 assistant 消息）、complete_stream（流式，返回 StreamEvent 流，
//! 以 FinalMessage 收尾）。两者都绑定工具目录与采样参数。

use std::pin::Pin;

use async_trait::async_trait;
use futures_util::Stream;
use thiserror::Error;

use crate::llm::StreamEvent;
use crate::state::Message;
use crate::tools::ToolSpec;

/// 推理边界的错误：请求构造、传输或空响应
#[derive(Error, Debug)]
pub enum LlmError {
    #[error("LLM request error: {0}")]
    Request(String),

    #[error("LLM transport error: {0}")]
    Transport(String),

    #[error("LLM returned an empty response")]
    EmptyResponse,
}

/// 采样参数（/model 与 /temp 可在运行时调整）
#[derive(Clone, Debug)]
pub struct Sampling {
    pub temperature: f32,
}

impl Default for Sampling {
    fn default() -> Self {
        Self { temperature: 0.0 }
    }
}

/// 一轮思考步的事件流：TokenDelta* → (ToolLifecycle)* → FinalMessage
pub type EventStream = Pin<Box<dyn Stream<Item = Result<StreamEvent, LlmError>> + Send>>;

/// LLM 客户端 trait：非流式完成与流式完成
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// 非流式完成；返回的 assistant 消息可携带零或多个 tool_calls
    async fn complete(
        &self,
        messages: &[Message],
        tools: &[ToolSpec],
        sampling: &Sampling,
    ) -> Result<Message, LlmError>;

    /// 流式完成，返回事件流（token 增量，最终以 FinalMessage 收尾）
    async fn complete_stream(
        &self,
        messages: &[Message],
        tools: &[ToolSpec],
        sampling: &Sampling,
    ) -> Result<EventStream, LlmError>;

    /// 获取累计 token 使用统计：(prompt_tokens, completion_tokens, total_tokens)
    /// 默认返回 (0, 0, 0)，具体实现可覆盖
    fn token_usage(&self) -> (u64, u64, u64) {
        (0, 0, 0)
    }
}
