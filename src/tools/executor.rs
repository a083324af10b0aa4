//! 工具执行器
//!
//! 持有 ToolRegistry 与全局超时，invoke(name, args) 在超时内调用 registry.invoke，
//! 超时转为 ToolError::Timeout；每次调用输出结构化审计日志（JSON）。
//! dispatch 负责一条 assistant 消息携带的整批 tool_calls：并发执行，
//! 但结果按 tool_calls 原始顺序转为 tool 消息——失败也写成 tool 消息，
//! 由模型在下一个思考步自行调整，不中止本轮。

use std::time::Duration;

use futures_util::future::join_all;
use tokio::time::{timeout, Instant};

use crate::state::{Message, ToolCall};
use crate::tools::{ToolError, ToolRegistry};

/// 工具执行器：对每次调用施加超时，并将结果映射为 ToolError
pub struct ToolExecutor {
    registry: ToolRegistry,
    timeout: Duration,
}

impl ToolExecutor {
    pub fn new(registry: ToolRegistry, timeout_secs: u64) -> Self {
        Self {
            registry,
            timeout: Duration::from_secs(timeout_secs),
        }
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    pub fn tool_names(&self) -> Vec<String> {
        self.registry.tool_names()
    }

    /// 执行指定工具；超时返回 Timeout；输出 JSON 审计日志
    pub async fn invoke(&self, tool_name: &str, args: serde_json::Value) -> Result<String, ToolError> {
        let start = Instant::now();
        let args_preview = args_preview(&args);
        let result = timeout(self.timeout, self.registry.invoke(tool_name, args)).await;

        let (ok, outcome): (bool, &str) = match &result {
            Ok(Ok(_)) => (true, "ok"),
            Ok(Err(_)) => (false, "error"),
            Err(_) => (false, "timeout"),
        };
        let duration_ms = start.elapsed().as_millis() as u64;
        let audit = serde_json::json!({
            "event": "tool_audit",
            "tool": tool_name,
            "ok": ok,
            "outcome": outcome,
            "duration_ms": duration_ms,
            "args_preview": args_preview,
        });
        tracing::info!(audit = %audit.to_string(), "tool");

        match result {
            Ok(inner) => inner,
            Err(_) => Err(ToolError::Timeout(tool_name.to_string())),
        }
    }

    /// 整批调度：并发执行全部 tool_calls，结果按原始顺序转为 tool 消息。
    /// join_all 按输入顺序返回，完成先后不影响追加顺序。
    pub async fn dispatch(&self, calls: &[ToolCall]) -> Vec<Message> {
        let futures = calls.iter().map(|call| async {
            let content = match self.invoke(&call.name, call.arguments.clone()).await {
                Ok(result) => result,
                Err(e) => format!("Error: {}", e),
            };
            Message::tool(call.id.clone(), content)
        });
        join_all(futures).await
    }
}

fn args_preview(args: &serde_json::Value) -> String {
    let s = args.to_string();
    if s.len() > 200 {
        format!("{}...", s.chars().take(200).collect::<String>())
    } else {
        s
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::{EchoTool, Tool};
    use async_trait::async_trait;
    use serde_json::{json, Value};

    struct SlowTool;

    #[async_trait]
    impl Tool for SlowTool {
        fn name(&self) -> &str {
            "slow"
        }
        fn description(&self) -> &str {
            "sleeps forever"
        }
        async fn execute(&self, _args: Value) -> Result<String, String> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok("never".to_string())
        }
    }

    /// 按 delay_ms 延迟后回显 name，用于验证完成先后与追加顺序无关
    struct DelayedTool {
        name: &'static str,
        delay_ms: u64,
    }

    #[async_trait]
    impl Tool for DelayedTool {
        fn name(&self) -> &str {
            self.name
        }
        fn description(&self) -> &str {
            "delayed echo"
        }
        async fn execute(&self, _args: Value) -> Result<String, String> {
            tokio::time::sleep(Duration::from_millis(self.delay_ms)).await;
            Ok(self.name.to_string())
        }
    }

    #[tokio::test]
    async fn test_timeout_maps_to_tool_error() {
        let mut registry = ToolRegistry::new();
        registry.register(SlowTool).unwrap();
        let executor = ToolExecutor::new(registry, 0);
        let err = executor.invoke("slow", Value::Null).await.unwrap_err();
        assert!(matches!(err, ToolError::Timeout(name) if name == "slow"));
    }

    #[tokio::test]
    async fn test_dispatch_preserves_call_order() {
        let mut registry = ToolRegistry::new();
        registry
            .register(DelayedTool { name: "lent", delay_ms: 80 })
            .unwrap();
        registry
            .register(DelayedTool { name: "moyen", delay_ms: 40 })
            .unwrap();
        registry
            .register(DelayedTool { name: "vite", delay_ms: 1 })
            .unwrap();
        let executor = ToolExecutor::new(registry, 10);

        let calls = vec![
            ToolCall::new("lent", json!({})),
            ToolCall::new("moyen", json!({})),
            ToolCall::new("vite", json!({})),
        ];
        let ids: Vec<String> = calls.iter().map(|c| c.id.clone()).collect();

        let messages = executor.dispatch(&calls).await;

        let got_ids: Vec<String> = messages
            .iter()
            .map(|m| m.tool_call_id.clone().unwrap())
            .collect();
        assert_eq!(got_ids, ids);
        assert_eq!(messages[0].content, "lent");
        assert_eq!(messages[2].content, "vite");
    }

    #[tokio::test]
    async fn test_dispatch_turns_failure_into_tool_message() {
        let mut registry = ToolRegistry::new();
        registry.register(EchoTool).unwrap();
        let executor = ToolExecutor::new(registry, 10);

        let calls = vec![ToolCall::new("absente", json!({}))];
        let messages = executor.dispatch(&calls).await;

        assert_eq!(messages.len(), 1);
        assert!(messages[0].content.starts_with("Error:"));
        assert!(messages[0].content.contains("absente"));
    }
}
