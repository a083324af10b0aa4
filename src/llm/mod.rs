//! LLM 层：客户端抽象、流式事件与实现（OpenAI 兼容 / Mock）

pub mod events;
pub mod mock;
pub mod openai;
pub mod traits;

pub use events::{StreamEvent, ToolPhase, NODE_CHATBOT, NODE_TOOLS};
pub use mock::MockLlmClient;
pub use openai::{OpenAiClient, TokenUsage};
pub use traits::{EventStream, LlmClient, LlmError, Sampling};
