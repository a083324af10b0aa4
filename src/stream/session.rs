//! 流式会话：把一轮事件流变成渲染无关的输出
//!
//! 分类消费 StreamEvent：token 增量累积进回复缓冲，按防抖间隔（默认 30ms）
//! 限频刷给 RenderSink，流结束后的终端 flush 无条件执行。ToolLifecycle(Start)
//! 丢弃工具前已缓冲的输出并抑制后续 token 渲染（记一次工具使用），End 解除抑制。
//! 整条流没有产出可用文本时，必须回退为同一请求的同步调用并照常渲染——
//! 传输降级不允许悄悄吞掉回答。最终渲染前过 CJK 软守卫。

use std::future::Future;
use std::time::Duration;

use futures_util::{Stream, StreamExt};
use tokio::time::Instant;

use crate::core::AgentError;
use crate::llm::{StreamEvent, ToolPhase};
use crate::stream::language::{enforce_lang_output, Lang};

/// 渲染刷新防抖间隔（毫秒）
pub const DEBOUNCE_MS: u64 = 30;

/// 渲染汇：终端、Web、测试桩等各自实现
pub trait RenderSink {
    /// 防抖后的部分回复（完整缓冲，由实现决定增量策略）
    fn partial(&mut self, text: &str);
    fn tool_started(&mut self, tool_name: &str, node: &str);
    fn tool_finished(&mut self, tool_name: &str, node: &str);
    /// 终端 flush，无条件调用恰好一次
    fn finalize(&mut self, text: &str);
}

/// 一轮的流式会话
pub struct StreamSession<S: RenderSink> {
    sink: S,
    lang: Lang,
    debounce: Duration,
    buffer: String,
    suppressing: bool,
    tools_used: u32,
    last_flush: Option<Instant>,
}

impl<S: RenderSink> StreamSession<S> {
    pub fn new(sink: S, lang: Lang) -> Self {
        Self {
            sink,
            lang,
            debounce: Duration::from_millis(DEBOUNCE_MS),
            buffer: String::new(),
            suppressing: false,
            tools_used: 0,
            last_flush: None,
        }
    }

    pub fn with_debounce(mut self, debounce: Duration) -> Self {
        self.debounce = debounce;
        self
    }

    /// 本轮用过的工具次数（事件流标记）
    pub fn tools_used(&self) -> u32 {
        self.tools_used
    }

    pub fn into_sink(self) -> S {
        self.sink
    }

    fn maybe_flush(&mut self) {
        let now = Instant::now();
        let due = match self.last_flush {
            None => true,
            Some(last) => now.duration_since(last) >= self.debounce,
        };
        if due {
            self.sink.partial(&self.buffer);
            self.last_flush = Some(now);
        }
    }

    fn classify(&mut self, event: StreamEvent) {
        match event {
            StreamEvent::TokenDelta { text, .. } => {
                if self.suppressing {
                    return;
                }
                self.buffer.push_str(&text);
                self.maybe_flush();
            }
            StreamEvent::ToolLifecycle {
                phase: ToolPhase::Start,
                tool_name,
                node,
            } => {
                // 工具前的缓冲输出作废：丢弃，不渲染
                self.buffer.clear();
                self.suppressing = true;
                self.tools_used += 1;
                self.sink.tool_started(&tool_name, &node);
            }
            StreamEvent::ToolLifecycle {
                phase: ToolPhase::End,
                tool_name,
                node,
            } => {
                self.suppressing = false;
                self.sink.tool_finished(&tool_name, &node);
            }
            StreamEvent::FinalMessage { message, .. } => {
                // 带 tool_calls 的最终消息属于中间思考步，不作为输出
                if message.tool_calls.is_empty() && !message.content.is_empty() {
                    self.buffer = message.content;
                }
            }
        }
    }

    /// 消费一轮事件流；流没有产出文本时执行同步回退。返回最终渲染的文本。
    pub async fn run<St, F, Fut>(&mut self, mut events: St, fallback: F) -> Result<String, AgentError>
    where
        St: Stream<Item = StreamEvent> + Unpin,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<String, AgentError>>,
    {
        while let Some(event) = events.next().await {
            self.classify(event);
        }

        let text = if self.buffer.is_empty() {
            // 流式传输没有产出任何可用内容：强制同步回退
            tracing::warn!("stream produced no renderable output, invoking synchronous fallback");
            fallback().await?
        } else {
            std::mem::take(&mut self.buffer)
        };

        let text = enforce_lang_output(&text, self.lang);
        self.sink.finalize(&text);
        Ok(text)
    }
}
