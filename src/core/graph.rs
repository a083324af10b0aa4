//! 编排状态机：模型↔工具主循环
//!
//! Thinking → ToolExecuting → Thinking → … → Done。Thinking 调推理客户端
//! （请求 = 活动系统指令 + 全量历史 + 可选的本轮语言指令），返回的 assistant
//! 消息带 tool_calls 则进入 ToolExecuting：整批工具并发执行、结果按原始顺序
//! 追加为 tool 消息后回到 Thinking；不带则收束 Done。往返次数有上限，超出以
//! MaxIterationsExceeded 上浮、状态保留。流式思考步在事件流产不出最终消息时
//! 强制回退为同步调用——传输降级不得吞掉回答。

use std::sync::Arc;

use futures_util::StreamExt;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::core::AgentError;
use crate::llm::{LlmClient, Sampling, StreamEvent};
use crate::state::{ConversationState, Message, Role};
use crate::tools::{ToolExecutor, ToolSpec};

/// 默认的模型↔工具往返上限
pub const DEFAULT_MAX_ITERATIONS: usize = 12;

/// 状态机状态（Thinking 起始，Done 终止）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Thinking,
    ToolExecuting,
    Done,
}

/// 单轮运行选项
pub struct TurnOptions {
    /// 有通道则走流式思考步，过程事件推给渲染层
    pub event_tx: Option<mpsc::UnboundedSender<StreamEvent>>,
    pub cancel: CancellationToken,
    pub sampling: Sampling,
    /// 本轮语言指令（仅注入请求，不写入状态）
    pub lang_directive: Option<String>,
}

impl Default for TurnOptions {
    fn default() -> Self {
        Self {
            event_tx: None,
            cancel: CancellationToken::new(),
            sampling: Sampling::default(),
            lang_directive: None,
        }
    }
}

/// 单轮结果
#[derive(Debug)]
pub struct TurnResult {
    pub response: String,
    /// 经过的 ToolExecuting 往返数
    pub steps: usize,
    pub tools_invoked: usize,
}

/// 编排器：一个系统指令 + 一套工具 + 一个推理客户端
pub struct Orchestrator {
    llm: Arc<dyn LlmClient>,
    executor: ToolExecutor,
    system_prompt: String,
    max_iterations: usize,
}

impl Orchestrator {
    pub fn new(
        llm: Arc<dyn LlmClient>,
        executor: ToolExecutor,
        system_prompt: impl Into<String>,
    ) -> Self {
        Self {
            llm,
            executor,
            system_prompt: system_prompt.into(),
            max_iterations: DEFAULT_MAX_ITERATIONS,
        }
    }

    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    pub fn executor(&self) -> &ToolExecutor {
        &self.executor
    }

    /// 处理一条用户输入：追加 user 消息后驱动状态机到 Done
    pub async fn run_turn(
        &self,
        state: &mut ConversationState,
        user_input: &str,
        opts: &TurnOptions,
    ) -> Result<TurnResult, AgentError> {
        state.push_message(Message::user(user_input));
        self.drive(state, opts).await
    }

    /// 驱动状态机：末消息已是不带工具调用的 assistant 时为 no-op（已在 Done）
    pub async fn drive(
        &self,
        state: &mut ConversationState,
        opts: &TurnOptions,
    ) -> Result<TurnResult, AgentError> {
        if let Some(last) = state.last_message() {
            if last.is_final_assistant() {
                return Ok(TurnResult {
                    response: last.content.clone(),
                    steps: 0,
                    tools_invoked: 0,
                });
            }
        }

        let mut steps = 0;
        let mut tools_invoked = 0;
        let mut last_output = String::new();

        loop {
            if opts.cancel.is_cancelled() {
                return Err(AgentError::Cancelled);
            }
            if steps >= self.max_iterations {
                return Err(AgentError::MaxIterationsExceeded {
                    steps,
                    partial: last_output,
                });
            }

            // Thinking
            let request = self.compose_request(state, opts);
            let reply = self.think(&request, opts).await?;
            last_output = reply.content.clone();

            if reply.tool_calls.is_empty() {
                // Done
                let response = reply.content.clone();
                state.push_message(reply);
                return Ok(TurnResult {
                    response,
                    steps,
                    tools_invoked,
                });
            }

            // ToolExecuting：先落 assistant 消息，再整批调度
            let calls = reply.tool_calls.clone();
            state.push_message(reply);
            self.emit_lifecycle(opts, &calls, true);

            let tool_messages = tokio::select! {
                _ = opts.cancel.cancelled() => return Err(AgentError::Cancelled),
                messages = self.executor.dispatch(&calls) => messages,
            };
            self.emit_lifecycle(opts, &calls, false);

            tools_invoked += calls.len();
            for message in tool_messages {
                state.push_message(message);
            }
            steps += 1;
        }
    }

    /// 请求 = 系统指令（仅当首条不是 system 时前置一次）+ 历史 + 本轮语言指令
    fn compose_request(&self, state: &ConversationState, opts: &TurnOptions) -> Vec<Message> {
        let mut request = Vec::with_capacity(state.messages().len() + 2);
        let has_system = matches!(state.messages().first(), Some(m) if m.role == Role::System);
        if !has_system {
            request.push(Message::system(&self.system_prompt));
        }
        request.extend_from_slice(state.messages());
        if let Some(directive) = &opts.lang_directive {
            request.push(Message::system(directive));
        }
        request
    }

    fn emit_lifecycle(&self, opts: &TurnOptions, calls: &[crate::state::ToolCall], start: bool) {
        if let Some(tx) = &opts.event_tx {
            for call in calls {
                let event = if start {
                    StreamEvent::tool_start(&call.name)
                } else {
                    StreamEvent::tool_end(&call.name)
                };
                let _ = tx.send(event);
            }
        }
    }

    /// 一个思考步：有事件通道走流式（带强制同步回退），否则直接同步
    async fn think(
        &self,
        request: &[Message],
        opts: &TurnOptions,
    ) -> Result<Message, AgentError> {
        let catalog = self.executor.registry().catalog();

        let Some(tx) = &opts.event_tx else {
            return tokio::select! {
                _ = opts.cancel.cancelled() => Err(AgentError::Cancelled),
                reply = self.llm.complete(request, &catalog, &opts.sampling) => Ok(reply?),
            };
        };

        let mut events = match self.llm.complete_stream(request, &catalog, &opts.sampling).await {
            Ok(events) => events,
            Err(e) => {
                let cause = e.to_string();
                tracing::warn!(cause = %cause, "complete_stream failed, falling back to synchronous completion");
                let reply = self.sync_fallback(request, &catalog, opts, &cause).await?;
                let _ = tx.send(StreamEvent::final_message(reply.clone()));
                return Ok(reply);
            }
        };

        let mut final_message = None;
        let mut transport_error = None;
        loop {
            let item = tokio::select! {
                _ = opts.cancel.cancelled() => return Err(AgentError::Cancelled),
                item = events.next() => item,
            };
            match item {
                Some(Ok(event)) => {
                    if let StreamEvent::FinalMessage { message, .. } = &event {
                        final_message = Some(message.clone());
                    }
                    let _ = tx.send(event);
                }
                Some(Err(e)) => {
                    transport_error = Some(e.to_string());
                    break;
                }
                None => break,
            }
        }

        match final_message {
            Some(reply) => Ok(reply),
            None => {
                // 流没有产出可用结果：强制同步回退，传输降级不得吞掉回答
                let cause = transport_error.unwrap_or_else(|| "empty event stream".to_string());
                tracing::warn!(cause = %cause, "stream yielded no final message, falling back to synchronous completion");
                let reply = self.sync_fallback(request, &catalog, opts, &cause).await?;
                let _ = tx.send(StreamEvent::final_message(reply.clone()));
                Ok(reply)
            }
        }
    }

    async fn sync_fallback(
        &self,
        request: &[Message],
        catalog: &[ToolSpec],
        opts: &TurnOptions,
        cause: &str,
    ) -> Result<Message, AgentError> {
        tokio::select! {
            _ = opts.cancel.cancelled() => Err(AgentError::Cancelled),
            reply = self.llm.complete(request, catalog, &opts.sampling) => {
                reply.map_err(|fallback| AgentError::StreamingTransport {
                    cause: cause.to_string(),
                    fallback: fallback.to_string(),
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::MockLlmClient;
    use crate::state::{Role, ToolCall};
    use crate::tools::{EchoTool, Tool, ToolRegistry};
    use async_trait::async_trait;
    use serde_json::{json, Value};

    struct StubWeatherTool;

    #[async_trait]
    impl Tool for StubWeatherTool {
        fn name(&self) -> &str {
            "get_weather"
        }
        fn description(&self) -> &str {
            "stub weather"
        }
        async fn execute(&self, args: Value) -> Result<String, String> {
            let city = args.get("city").and_then(|v| v.as_str()).unwrap_or("?");
            Ok(json!({"city": city, "temperature_2m": 4.2, "wind_speed_10m": 18.0}).to_string())
        }
    }

    struct BrokenSendTool;

    #[async_trait]
    impl Tool for BrokenSendTool {
        fn name(&self) -> &str {
            "send_email"
        }
        fn description(&self) -> &str {
            "stub mailer"
        }
        async fn execute(&self, _args: Value) -> Result<String, String> {
            Err("SMTP connection refused".to_string())
        }
    }

    fn orchestrator_with(
        script: Vec<Message>,
        register: impl FnOnce(&mut ToolRegistry),
    ) -> Orchestrator {
        let mut registry = ToolRegistry::new();
        register(&mut registry);
        Orchestrator::new(
            Arc::new(MockLlmClient::with_script(script)),
            ToolExecutor::new(registry, 5),
            "Tu es Majordome, un assistant serviable.",
        )
    }

    #[tokio::test]
    async fn test_scenario_a_direct_answer_reaches_done_in_one_step() {
        let orch = orchestrator_with(vec![Message::assistant("2+2 font 4.")], |_| {});
        let mut state = ConversationState::new("t");

        let result = orch
            .run_turn(&mut state, "What's 2+2", &TurnOptions::default())
            .await
            .unwrap();

        assert_eq!(result.response, "2+2 font 4.");
        assert_eq!(result.steps, 0);
        assert_eq!(result.tools_invoked, 0);
        // user + assistant，无 tool 消息
        assert_eq!(state.messages().len(), 2);
        assert!(state.last_message().unwrap().is_final_assistant());
    }

    #[tokio::test]
    async fn test_scenario_b_weather_tool_round_trip() {
        let call = ToolCall::new("get_weather", json!({"city": "Vaasa"}));
        let call_id = call.id.clone();
        let orch = orchestrator_with(
            vec![
                Message::assistant_with_tools("", vec![call]),
                Message::assistant("Il fait 4.2°C à Vaasa, vent 18 km/h."),
            ],
            |r| r.register(StubWeatherTool).unwrap(),
        );
        let mut state = ConversationState::new("t");

        let result = orch
            .run_turn(&mut state, "Quel temps fait-il à Vaasa ?", &TurnOptions::default())
            .await
            .unwrap();

        assert!(result.response.contains("Vaasa"));
        assert_eq!(result.steps, 1);
        assert_eq!(result.tools_invoked, 1);

        let roles: Vec<Role> = state.messages().iter().map(|m| m.role.clone()).collect();
        assert_eq!(roles, vec![Role::User, Role::Assistant, Role::Tool, Role::Assistant]);
        let tool_msg = &state.messages()[2];
        assert_eq!(tool_msg.tool_call_id.as_deref(), Some(call_id.as_str()));
        assert!(tool_msg.content.contains("Vaasa"));
    }

    #[tokio::test]
    async fn test_scenario_e_tool_failure_feeds_back_and_continues() {
        let call = ToolCall::new("send_email", json!({"recipient": "x@y.fr"}));
        let orch = orchestrator_with(
            vec![
                Message::assistant_with_tools("", vec![call]),
                Message::assistant("L'envoi a échoué, je peux réessayer."),
            ],
            |r| r.register(BrokenSendTool).unwrap(),
        );
        let mut state = ConversationState::new("t");

        let result = orch
            .run_turn(&mut state, "Envoie le mail", &TurnOptions::default())
            .await
            .unwrap();

        // 工具失败不中止本轮
        assert!(result.response.contains("échoué"));
        let tool_messages: Vec<_> = state
            .messages()
            .iter()
            .filter(|m| m.role == Role::Tool)
            .collect();
        assert_eq!(tool_messages.len(), 1);
        assert!(tool_messages[0].content.contains("SMTP connection refused"));
        // 错误描述，不是堆栈
        assert!(!tool_messages[0].content.contains("backtrace"));
    }

    #[tokio::test]
    async fn test_tool_results_appended_in_call_order() {
        let calls = vec![
            ToolCall::new("echo", json!({"text": "premier"})),
            ToolCall::new("echo", json!({"text": "deuxième"})),
            ToolCall::new("echo", json!({"text": "troisième"})),
        ];
        let ids: Vec<String> = calls.iter().map(|c| c.id.clone()).collect();
        let orch = orchestrator_with(
            vec![
                Message::assistant_with_tools("", calls),
                Message::assistant("fini"),
            ],
            |r| r.register(EchoTool).unwrap(),
        );
        let mut state = ConversationState::new("t");

        orch.run_turn(&mut state, "triple echo", &TurnOptions::default())
            .await
            .unwrap();

        let got: Vec<String> = state
            .messages()
            .iter()
            .filter(|m| m.role == Role::Tool)
            .map(|m| m.tool_call_id.clone().unwrap())
            .collect();
        assert_eq!(got, ids);
    }

    #[tokio::test]
    async fn test_drive_is_idempotent_once_done() {
        let orch = orchestrator_with(vec![Message::assistant("réponse")], |_| {});
        let mut state = ConversationState::new("t");
        orch.run_turn(&mut state, "question", &TurnOptions::default())
            .await
            .unwrap();
        let len_before = state.messages().len();

        // 末消息已是不带工具调用的 assistant：再驱动是 no-op
        let result = orch.drive(&mut state, &TurnOptions::default()).await.unwrap();
        assert_eq!(result.response, "réponse");
        assert_eq!(state.messages().len(), len_before);
    }

    #[tokio::test]
    async fn test_max_iterations_exceeded_preserves_state() {
        // 脚本永远要求调工具：必须被步数上限拦下
        let script: Vec<Message> = (0..20)
            .map(|i| {
                Message::assistant_with_tools(
                    format!("étape {}", i),
                    vec![ToolCall::new("echo", json!({"text": "x"}))],
                )
            })
            .collect();
        let orch = orchestrator_with(script, |r| r.register(EchoTool).unwrap())
            .with_max_iterations(3);
        let mut state = ConversationState::new("t");

        let err = orch
            .run_turn(&mut state, "boucle", &TurnOptions::default())
            .await
            .unwrap_err();

        match err {
            AgentError::MaxIterationsExceeded { steps, partial } => {
                assert_eq!(steps, 3);
                assert!(partial.contains("étape"));
            }
            other => panic!("unexpected error: {other}"),
        }
        // 已追加的消息保留：user + 3×(assistant+tool)
        assert_eq!(state.messages().len(), 7);
    }

    #[tokio::test]
    async fn test_system_prompt_prefixed_once() {
        // 首条已是 system（身份消息）时不再前置编排器指令
        let orch = orchestrator_with(vec![Message::assistant("ok")], |_| {});
        let mut state = ConversationState::with_identity("t", "Identité.");
        let request = orch.compose_request(&state, &TurnOptions::default());
        assert_eq!(request[0].content, "Identité.");
        assert_eq!(
            request.iter().filter(|m| m.role == Role::System).count(),
            1
        );

        // 无身份消息时前置一次
        state = ConversationState::new("t2");
        state.push_message(Message::user("salut"));
        let request = orch.compose_request(&state, &TurnOptions::default());
        assert_eq!(request[0].role, Role::System);
        assert!(request[0].content.contains("Majordome"));
    }

    #[tokio::test]
    async fn test_streamed_turn_falls_back_when_stream_is_silent() {
        // 流式路径产出空流：思考步必须回退为同步调用，回答不得丢失
        let llm = MockLlmClient::with_script(vec![Message::assistant("réponse via fallback")])
            .with_silent_stream();
        let orch = Orchestrator::new(
            Arc::new(llm),
            ToolExecutor::new(ToolRegistry::new(), 5),
            "sys",
        );
        let mut state = ConversationState::new("t");
        let (tx, mut rx) = mpsc::unbounded_channel();
        let opts = TurnOptions {
            event_tx: Some(tx),
            ..TurnOptions::default()
        };

        let result = orch.run_turn(&mut state, "allô ?", &opts).await.unwrap();
        assert_eq!(result.response, "réponse via fallback");

        // 回退结果以 FinalMessage 事件补发给渲染层
        let mut saw_final = false;
        while let Ok(event) = rx.try_recv() {
            if matches!(event, StreamEvent::FinalMessage { .. }) {
                saw_final = true;
            }
        }
        assert!(saw_final);
    }
}
