//! Majordome - Rust 个人助理编排器
//!
//! 模块划分：
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **core**: 编排状态机、检查点、会话任务、中断管理
//! - **llm**: LLM 客户端抽象与实现（OpenAI 兼容 / Mock）、流式事件
//! - **router**: 意图路由与多智能体编排
//! - **state**: 消息与每线程对话状态
//! - **stream**: 流式输出会话（防抖、同步回退、语言守卫）
//! - **tools**: 工具注册表、执行器与适配器（时间、天气、检索、邮件）
//! - **ui**: REPL 界面、斜杠命令与转录

pub mod config;
pub mod core;
pub mod llm;
pub mod router;
pub mod state;
pub mod stream;
pub mod tools;
pub mod ui;
