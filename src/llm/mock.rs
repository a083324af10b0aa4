//! Mock LLM 客户端（用于测试，无需 API）
//!
//! 默认回显最后一条 User 消息；with_script 可预排一串 assistant 消息
//! （含 tool_calls），每次 complete 依次弹出，脚本耗尽后退回回显。
//! 流式路径把 content 切成小段 TokenDelta，再以 FinalMessage 收尾。

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;
use futures_util::stream;

use crate::llm::{EventStream, LlmClient, LlmError, Sampling, StreamEvent};
use crate::state::{Message, Role};
use crate::tools::ToolSpec;

/// 流式回复时每段字符数（模拟打字效果）
const CHUNK_CHARS: usize = 6;

/// Mock 客户端：脚本化响应或回显
#[derive(Debug, Default)]
pub struct MockLlmClient {
    script: Mutex<VecDeque<Message>>,
    /// 为 true 时流式路径不产出任何事件（模拟传输降级，测试同步回退）
    silent_stream: bool,
}

impl MockLlmClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// 预排响应脚本：每次 complete 依次返回
    pub fn with_script(responses: Vec<Message>) -> Self {
        Self {
            script: Mutex::new(responses.into()),
            silent_stream: false,
        }
    }

    /// 流式路径产出空流（complete 仍正常），用于验证强制同步回退
    pub fn with_silent_stream(mut self) -> Self {
        self.silent_stream = true;
        self
    }

    fn next_response(&self, messages: &[Message]) -> Message {
        if let Some(scripted) = self.script.lock().unwrap().pop_front() {
            return scripted;
        }
        let last_user = messages
            .iter()
            .rev()
            .find(|m| m.role == Role::User)
            .map(|m| m.content.as_str())
            .unwrap_or("(no input)");
        Message::assistant(format!("Echo from Mock: {}", last_user))
    }
}

#[async_trait]
impl LlmClient for MockLlmClient {
    async fn complete(
        &self,
        messages: &[Message],
        _tools: &[ToolSpec],
        _sampling: &Sampling,
    ) -> Result<Message, LlmError> {
        Ok(self.next_response(messages))
    }

    async fn complete_stream(
        &self,
        messages: &[Message],
        tools: &[ToolSpec],
        sampling: &Sampling,
    ) -> Result<EventStream, LlmError> {
        if self.silent_stream {
            let empty: Vec<Result<StreamEvent, LlmError>> = Vec::new();
            return Ok(Box::pin(stream::iter(empty)));
        }
        let message = self.complete(messages, tools, sampling).await?;
        let mut events: Vec<Result<StreamEvent, LlmError>> = Vec::new();
        let chars: Vec<char> = message.content.chars().collect();
        for chunk in chars.chunks(CHUNK_CHARS) {
            events.push(Ok(StreamEvent::token(chunk.iter().collect::<String>())));
        }
        events.push(Ok(StreamEvent::final_message(message)));
        Ok(Box::pin(stream::iter(events)))
    }
}
