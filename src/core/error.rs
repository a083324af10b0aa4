//! Agent 错误类型
//!
//! 工具失败不在这里：ToolError 在编排循环里转成 tool 消息喂回模型，
//! 只有对整轮致命的错误才上升为 AgentError。

use thiserror::Error;

use crate::core::checkpoint::CheckpointError;
use crate::llm::LlmError;

/// 一轮对话中可能致命的错误（推理、步数上限、取消、持久化）
#[derive(Error, Debug)]
pub enum AgentError {
    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    /// 流式与同步回退都失败；携带触发回退的原因
    #[error("Streaming transport failed ({cause}) and synchronous fallback failed: {fallback}")]
    StreamingTransport { cause: String, fallback: String },

    /// 模型↔工具往返超过上限；partial 为最后一次模型输出
    #[error("Max iterations exceeded after {steps} steps")]
    MaxIterationsExceeded { steps: usize, partial: String },

    #[error("Cancelled by user")]
    Cancelled,

    #[error("Checkpoint error: {0}")]
    Checkpoint(#[from] CheckpointError),

    #[error("Config error: {0}")]
    Config(String),
}
