//! 工具注册表
//!
//! 所有工具实现 Tool trait（name / description / parameters_schema / execute），
//! 由 ToolRegistry 按名注册与查找。目录快照保持注册顺序（用于绑定模型与生成
//! prompt 里的工具清单）；一切失败都转为类型化 ToolError，绝不越过此边界 panic，
//! 编排循环据此把失败写回为 tool 消息而不是中止本轮。

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

/// 工具 trait：名称、描述（供 LLM 理解）、参数 schema、异步执行（args 为 JSON）
#[async_trait]
pub trait Tool: Send + Sync {
    /// 工具名称（tool_calls 中的 "name" 字段）
    fn name(&self) -> &str;

    /// 工具描述（供 LLM 理解功能）
    fn description(&self) -> &str;

    /// 参数 JSON Schema（供 LLM 生成正确的参数格式）
    /// 默认返回空对象，表示无参数
    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {},
            "required": []
        })
    }

    /// 执行工具
    async fn execute(&self, args: Value) -> Result<String, String>;
}

/// 注册表构建后不可变的能力描述，用于绑定模型与渲染目录
#[derive(Clone, Debug, Serialize)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

/// 工具边界的类型化错误；注册与调用失败都落在这里
#[derive(Error, Debug)]
pub enum ToolError {
    #[error("Duplicate tool: {0}")]
    Duplicate(String),

    #[error("Unknown tool: {0}")]
    Unknown(String),

    #[error("Tool {name} failed: {cause}")]
    Execution { name: String, cause: String },

    #[error("Tool timeout: {0}")]
    Timeout(String),
}

/// 工具注册表：Vec 保持注册顺序，HashMap 按名索引
#[derive(Default)]
pub struct ToolRegistry {
    tools: Vec<Arc<dyn Tool>>,
    index: HashMap<String, usize>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 注册工具；重名返回 Duplicate
    pub fn register(&mut self, tool: impl Tool + 'static) -> Result<(), ToolError> {
        let name = tool.name().to_string();
        if self.index.contains_key(&name) {
            return Err(ToolError::Duplicate(name));
        }
        self.index.insert(name, self.tools.len());
        self.tools.push(Arc::new(tool));
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.index.get(name).map(|&i| self.tools[i].clone())
    }

    /// 执行指定工具；未知名返回 Unknown，处理器 Err 转 Execution
    pub async fn invoke(&self, name: &str, args: Value) -> Result<String, ToolError> {
        let tool = self
            .get(name)
            .ok_or_else(|| ToolError::Unknown(name.to_string()))?;
        tool.execute(args).await.map_err(|cause| ToolError::Execution {
            name: name.to_string(),
            cause,
        })
    }

    /// 注册顺序的目录快照
    pub fn catalog(&self) -> Vec<ToolSpec> {
        self.tools
            .iter()
            .map(|t| ToolSpec {
                name: t.name().to_string(),
                description: t.description().to_string(),
                parameters: t.parameters_schema(),
            })
            .collect()
    }

    /// prompt 用的文字版工具清单（`- name: description` 一行一个）
    pub fn catalog_text(&self) -> String {
        self.tools
            .iter()
            .map(|t| format!("- {}: {}", t.name(), t.description()))
            .collect::<Vec<_>>()
            .join("\n")
    }

    pub fn tool_names(&self) -> Vec<String> {
        self.tools.iter().map(|t| t.name().to_string()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::EchoTool;

    struct FailTool;

    #[async_trait]
    impl Tool for FailTool {
        fn name(&self) -> &str {
            "fail"
        }
        fn description(&self) -> &str {
            "always fails"
        }
        async fn execute(&self, _args: Value) -> Result<String, String> {
            Err("boom".to_string())
        }
    }

    struct NamedTool(&'static str);

    #[async_trait]
    impl Tool for NamedTool {
        fn name(&self) -> &str {
            self.0
        }
        fn description(&self) -> &str {
            "noop"
        }
        async fn execute(&self, _args: Value) -> Result<String, String> {
            Ok(String::new())
        }
    }

    #[test]
    fn test_duplicate_registration_rejected() {
        let mut registry = ToolRegistry::new();
        registry.register(EchoTool).unwrap();
        let err = registry.register(EchoTool).unwrap_err();
        assert!(matches!(err, ToolError::Duplicate(name) if name == "echo"));
    }

    #[test]
    fn test_catalog_preserves_registration_order() {
        let mut registry = ToolRegistry::new();
        for name in ["zeta", "alpha", "mid"] {
            registry.register(NamedTool(name)).unwrap();
        }
        let names: Vec<String> = registry.catalog().into_iter().map(|s| s.name).collect();
        assert_eq!(names, vec!["zeta", "alpha", "mid"]);
    }

    #[tokio::test]
    async fn test_invoke_unknown_tool() {
        let registry = ToolRegistry::new();
        let err = registry.invoke("nope", Value::Null).await.unwrap_err();
        assert!(matches!(err, ToolError::Unknown(name) if name == "nope"));
    }

    #[tokio::test]
    async fn test_handler_error_becomes_execution_error() {
        let mut registry = ToolRegistry::new();
        registry.register(FailTool).unwrap();
        let err = registry.invoke("fail", Value::Null).await.unwrap_err();
        match err {
            ToolError::Execution { name, cause } => {
                assert_eq!(name, "fail");
                assert_eq!(cause, "boom");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_invoke_echo() {
        let mut registry = ToolRegistry::new();
        registry.register(EchoTool).unwrap();
        let out = registry
            .invoke("echo", serde_json::json!({"text": "salut"}))
            .await
            .unwrap();
        assert_eq!(out, "salut");
    }
}
