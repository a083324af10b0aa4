//! OpenAI 兼容 API 客户端
//!
//! 通过 async_openai 调用任意 OpenAI 兼容端点（可配置 base_url），使用原生
//! tool-calling：请求绑定 tools 目录，assistant 响应的 tool_calls 与 tool 角色的
//! tool_call_id 原样进出。complete_stream 把增量 chunk 转为 StreamEvent 流：
//! content 增量逐段发 TokenDelta，tool_call 分片按 index 聚合，流结束时组装
//! FinalMessage 收尾。

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_openai::config::OpenAIConfig;
use async_openai::types::chat::{
    ChatCompletionMessageToolCall, ChatCompletionMessageToolCalls,
    ChatCompletionRequestAssistantMessageArgs, ChatCompletionRequestMessage,
    ChatCompletionRequestSystemMessageArgs, ChatCompletionRequestToolMessageArgs,
    ChatCompletionRequestUserMessageArgs, ChatCompletionTool, ChatCompletionTools,
    CreateChatCompletionRequestArgs, FunctionCall, FunctionObject,
};
use async_openai::Client;
use async_trait::async_trait;
use futures_util::StreamExt;
use tokio::sync::mpsc;

use crate::llm::{EventStream, LlmClient, LlmError, Sampling, StreamEvent};
use crate::state::{Message, Role, ToolCall};
use crate::tools::ToolSpec;

/// Token 使用统计（累计值）
#[derive(Debug, Clone, Default)]
pub struct TokenUsage {
    pub prompt_tokens: Arc<AtomicU64>,
    pub completion_tokens: Arc<AtomicU64>,
    pub total_tokens: Arc<AtomicU64>,
}

impl TokenUsage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, prompt: u64, completion: u64) {
        self.prompt_tokens.fetch_add(prompt, Ordering::Relaxed);
        self.completion_tokens.fetch_add(completion, Ordering::Relaxed);
        self.total_tokens.fetch_add(prompt + completion, Ordering::Relaxed);
    }

    pub fn get(&self) -> (u64, u64, u64) {
        (
            self.prompt_tokens.load(Ordering::Relaxed),
            self.completion_tokens.load(Ordering::Relaxed),
            self.total_tokens.load(Ordering::Relaxed),
        )
    }
}

/// OpenAI 兼容客户端：持有 Client 与 model 名
pub struct OpenAiClient {
    client: Client<OpenAIConfig>,
    model: String,
    /// 累计 token 使用统计
    pub usage: TokenUsage,
}

impl OpenAiClient {
    pub fn new(base_url: Option<&str>, model: &str, api_key: Option<&str>) -> Self {
        let api_key = api_key
            .map(String::from)
            .or_else(|| std::env::var("OPENAI_API_KEY").ok())
            .unwrap_or_else(|| "sk-placeholder".to_string());

        let config = if let Some(url) = base_url {
            OpenAIConfig::new()
                .with_api_base(url)
                .with_api_key(api_key)
        } else {
            OpenAIConfig::new().with_api_key(api_key)
        };

        Self {
            client: Client::with_config(config),
            model: model.to_string(),
            usage: TokenUsage::new(),
        }
    }

    fn to_openai_messages(&self, messages: &[Message]) -> Vec<ChatCompletionRequestMessage> {
        messages
            .iter()
            .map(|m| match m.role {
                Role::System => ChatCompletionRequestMessage::System(
                    ChatCompletionRequestSystemMessageArgs::default()
                        .content(m.content.clone())
                        .build()
                        .unwrap(),
                ),
                Role::User => ChatCompletionRequestMessage::User(
                    ChatCompletionRequestUserMessageArgs::default()
                        .content(m.content.clone())
                        .build()
                        .unwrap(),
                ),
                Role::Assistant => {
                    let mut builder = ChatCompletionRequestAssistantMessageArgs::default();
                    builder.content(m.content.clone());
                    if !m.tool_calls.is_empty() {
                        builder.tool_calls(
                            m.tool_calls
                                .iter()
                                .map(|tc| ChatCompletionMessageToolCalls::Function(
                                    ChatCompletionMessageToolCall {
                                        id: tc.id.clone(),
                                        function: FunctionCall {
                                            name: tc.name.clone(),
                                            arguments: tc.arguments.to_string(),
                                        },
                                    },
                                ))
                                .collect::<Vec<_>>(),
                        );
                    }
                    ChatCompletionRequestMessage::Assistant(builder.build().unwrap())
                }
                Role::Tool => ChatCompletionRequestMessage::Tool(
                    ChatCompletionRequestToolMessageArgs::default()
                        .content(m.content.clone())
                        .tool_call_id(m.tool_call_id.clone().unwrap_or_default())
                        .build()
                        .unwrap(),
                ),
            })
            .collect()
    }

    fn to_openai_tools(&self, tools: &[ToolSpec]) -> Vec<ChatCompletionTools> {
        tools
            .iter()
            .map(|spec| ChatCompletionTools::Function(ChatCompletionTool {
                function: FunctionObject {
                    name: spec.name.clone(),
                    description: Some(spec.description.clone()),
                    parameters: Some(spec.parameters.clone()),
                    strict: None,
                },
            }))
            .collect()
    }

    fn build_request(
        &self,
        messages: &[Message],
        tools: &[ToolSpec],
        sampling: &Sampling,
    ) -> Result<async_openai::types::chat::CreateChatCompletionRequest, LlmError> {
        let mut builder = CreateChatCompletionRequestArgs::default();
        builder
            .model(&self.model)
            .temperature(sampling.temperature)
            .messages(self.to_openai_messages(messages));
        if !tools.is_empty() {
            builder.tools(self.to_openai_tools(tools));
        }
        builder.build().map_err(|e| LlmError::Request(e.to_string()))
    }
}

/// 把 API 返回的 tool_calls 转回数据模型；arguments 非法 JSON 时降级为空对象
fn parse_tool_call(id: String, name: String, arguments: &str) -> ToolCall {
    let arguments = serde_json::from_str(arguments).unwrap_or_else(|e| {
        tracing::warn!(tool = %name, error = %e, "malformed tool arguments, using empty object");
        serde_json::json!({})
    });
    ToolCall { id, name, arguments }
}

/// 流式 tool_call 分片的聚合槽（按 chunk index）
#[derive(Default)]
struct ToolCallDraft {
    id: String,
    name: String,
    arguments: String,
}

#[async_trait]
impl LlmClient for OpenAiClient {
    fn token_usage(&self) -> (u64, u64, u64) {
        self.usage.get()
    }

    async fn complete(
        &self,
        messages: &[Message],
        tools: &[ToolSpec],
        sampling: &Sampling,
    ) -> Result<Message, LlmError> {
        let request = self.build_request(messages, tools, sampling)?;

        let response = self
            .client
            .chat()
            .create(request)
            .await
            .map_err(|e| LlmError::Transport(e.to_string()))?;

        if let Some(usage) = &response.usage {
            self.usage
                .add(usage.prompt_tokens as u64, usage.completion_tokens as u64);
        }

        let choice = response.choices.into_iter().next().ok_or(LlmError::EmptyResponse)?;
        let content = choice.message.content.unwrap_or_default();
        let tool_calls = choice
            .message
            .tool_calls
            .unwrap_or_default()
            .into_iter()
            .map(|tc| match tc {
                ChatCompletionMessageToolCalls::Function(f) => {
                    parse_tool_call(f.id, f.function.name, &f.function.arguments)
                }
                ChatCompletionMessageToolCalls::Custom(c) => {
                    parse_tool_call(c.id, c.custom_tool.name, &c.custom_tool.input)
                }
            })
            .collect();

        Ok(Message::assistant_with_tools(content, tool_calls))
    }

    async fn complete_stream(
        &self,
        messages: &[Message],
        tools: &[ToolSpec],
        sampling: &Sampling,
    ) -> Result<EventStream, LlmError> {
        let request = self.build_request(messages, tools, sampling)?;

        let mut stream = self
            .client
            .chat()
            .create_stream(request)
            .await
            .map_err(|e| LlmError::Transport(e.to_string()))?;

        let (tx, rx) = mpsc::unbounded_channel::<Result<StreamEvent, LlmError>>();

        // 后台驱动底层 chunk 流：content 增量即时转发，tool_call 分片聚合到流结束
        tokio::spawn(async move {
            let mut content = String::new();
            let mut drafts: Vec<ToolCallDraft> = Vec::new();

            while let Some(item) = stream.next().await {
                let chunk = match item {
                    Ok(chunk) => chunk,
                    Err(e) => {
                        let _ = tx.send(Err(LlmError::Transport(e.to_string())));
                        return;
                    }
                };
                for choice in chunk.choices {
                    if let Some(text) = choice.delta.content {
                        if !text.is_empty() {
                            content.push_str(&text);
                            let _ = tx.send(Ok(StreamEvent::token(text)));
                        }
                    }
                    for tc in choice.delta.tool_calls.unwrap_or_default() {
                        let idx = tc.index as usize;
                        if drafts.len() <= idx {
                            drafts.resize_with(idx + 1, ToolCallDraft::default);
                        }
                        let draft = &mut drafts[idx];
                        if let Some(id) = tc.id {
                            draft.id = id;
                        }
                        if let Some(f) = tc.function {
                            if let Some(name) = f.name {
                                draft.name.push_str(&name);
                            }
                            if let Some(args) = f.arguments {
                                draft.arguments.push_str(&args);
                            }
                        }
                    }
                }
            }

            let tool_calls: Vec<ToolCall> = drafts
                .into_iter()
                .filter(|d| !d.name.is_empty())
                .map(|d| parse_tool_call(d.id, d.name, &d.arguments))
                .collect();
            let message = Message::assistant_with_tools(content, tool_calls);
            let _ = tx.send(Ok(StreamEvent::final_message(message)));
        });

        let events = futures_util::stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|ev| (ev, rx))
        });
        Ok(Box::pin(events))
    }
}
