//! 共享数据模型：消息、工具调用与每线程对话状态

pub mod conversation;

pub use conversation::{ConversationState, EmailDraft, Message, Role, ToolCall};
