//! 对话状态：消息历史、路由痕迹与副产物
//!
//! Message 与 LLM API 角色一致（system/user/assistant/tool）；assistant 消息可携带
//! tool_calls，tool 消息通过 tool_call_id 回指同一轮的 assistant。消息只追加、不重排，
//! 插入顺序即模型上下文顺序。ConversationState 按 thread_id 隔离，由编排层独占写入。

use serde::{Deserialize, Serialize};

/// 消息角色（与 LLM API 一致）
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

/// 模型发出的工具调用请求：id 用于结果回指，arguments 为结构化 JSON
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub arguments: serde_json::Value,
}

impl ToolCall {
    pub fn new(name: impl Into<String>, arguments: serde_json::Value) -> Self {
        Self {
            id: format!("call_{}", uuid::Uuid::new_v4().simple()),
            name: name.into(),
            arguments,
        }
    }
}

/// 单条消息
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
    /// 仅 assistant 消息可非空
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
    /// 仅 tool 消息携带：回指同一轮 assistant 消息中的 ToolCall.id
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_call_id: None,
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_call_id: None,
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_call_id: None,
        }
    }

    /// 携带工具调用的 assistant 消息（content 可为空：模型只发调用不说话）
    pub fn assistant_with_tools(content: impl Into<String>, tool_calls: Vec<ToolCall>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
            tool_calls,
            tool_call_id: None,
        }
    }

    /// 工具结果消息，回指 tool_call_id
    pub fn tool(tool_call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: Role::Tool,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_call_id: Some(tool_call_id.into()),
        }
    }

    /// 是否为不带工具调用的 assistant 消息（即一轮的终态）
    pub fn is_final_assistant(&self) -> bool {
        self.role == Role::Assistant && self.tool_calls.is_empty()
    }
}

/// 待确认的外发邮件草稿
///
/// 原型里这是进程级单例；这里落在每线程状态上并随检查点持久化，
/// 并发线程之间互不可见。
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmailDraft {
    pub recipient: String,
    pub subject: String,
    pub body: String,
}

/// 每线程对话状态：消息历史 + 路由痕迹 + 副产物 + 邮件草稿
///
/// 同一 thread_id 同时只有一个活动轮次写入；不同 thread_id 完全独立。
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ConversationState {
    pub thread_id: String,
    messages: Vec<Message>,
    /// 上一次路由选中的智能体名（继续性偏置的依据）
    #[serde(default)]
    pub intent: Option<String>,
    /// 路由决策的单行审计记录，只追加
    #[serde(default)]
    pub route_history: Vec<String>,
    /// 结构化副产物（完整路由决策等），只追加
    #[serde(default)]
    pub artifacts: Vec<serde_json::Value>,
    #[serde(default)]
    pub draft: Option<EmailDraft>,
}

impl ConversationState {
    pub fn new(thread_id: impl Into<String>) -> Self {
        Self {
            thread_id: thread_id.into(),
            messages: Vec::new(),
            intent: None,
            route_history: Vec::new(),
            artifacts: Vec::new(),
            draft: None,
        }
    }

    /// 以身份 system 消息开头的新状态（CLI 启动路径）
    pub fn with_identity(thread_id: impl Into<String>, identity_prompt: &str) -> Self {
        let mut state = Self::new(thread_id);
        state.push_message(Message::system(identity_prompt));
        state
    }

    /// 追加一条消息（唯一写入口，保证只追加）
    pub fn push_message(&mut self, message: Message) {
        self.messages.push(message);
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn last_message(&self) -> Option<&Message> {
        self.messages.last()
    }

    /// /new：换 thread_id 并清空历史，但保留开头的身份 system 消息；
    /// 意图、路由痕迹与草稿一并清除。
    pub fn reset(&mut self, new_thread_id: impl Into<String>) {
        let identity = match self.messages.first() {
            Some(m) if m.role == Role::System => Some(m.clone()),
            _ => None,
        };
        self.thread_id = new_thread_id.into();
        self.messages = identity.into_iter().collect();
        self.intent = None;
        self.route_history.clear();
        self.artifacts.clear();
        self.draft = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tool_message_back_reference() {
        let call = ToolCall::new("get_weather", serde_json::json!({"city": "Vaasa"}));
        let assistant = Message::assistant_with_tools("", vec![call.clone()]);
        let tool = Message::tool(call.id.clone(), "12°C");

        assert_eq!(assistant.tool_calls[0].id, tool.tool_call_id.unwrap());
        assert!(!assistant.is_final_assistant());
        assert!(Message::assistant("done").is_final_assistant());
    }

    #[test]
    fn test_reset_keeps_identity_system_message() {
        let mut state = ConversationState::with_identity("t1", "Tu es Majordome.");
        state.push_message(Message::user("salut"));
        state.push_message(Message::assistant("Bonjour !"));
        state.intent = Some("search".to_string());
        state.route_history.push("router->search (conf=0.90)".to_string());

        state.reset("t2");

        assert_eq!(state.thread_id, "t2");
        assert_eq!(state.messages().len(), 1);
        assert_eq!(state.messages()[0].role, Role::System);
        assert!(state.intent.is_none());
        assert!(state.route_history.is_empty());
        assert!(state.draft.is_none());
    }

    #[test]
    fn test_reset_without_identity_message() {
        let mut state = ConversationState::new("t1");
        state.push_message(Message::user("hi"));
        state.reset("t2");
        assert!(state.messages().is_empty());
    }

    #[test]
    fn test_serde_roundtrip() {
        let mut state = ConversationState::with_identity("t1", "sys");
        state.push_message(Message::user("météo ?"));
        let call = ToolCall::new("get_weather", serde_json::json!({"city": "Vaasa"}));
        let id = call.id.clone();
        state.push_message(Message::assistant_with_tools("", vec![call]));
        state.push_message(Message::tool(id, "12°C"));
        state.draft = Some(EmailDraft {
            recipient: "a@b.fr".into(),
            subject: "Re".into(),
            body: "corps".into(),
        });

        let json = serde_json::to_string(&state).unwrap();
        let back: ConversationState = serde_json::from_str(&json).unwrap();
        assert_eq!(back.messages().len(), 4);
        assert_eq!(back.messages()[2].tool_calls.len(), 1);
        assert_eq!(back.draft, state.draft);
    }
}
