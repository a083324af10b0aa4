//! Majordome - Rust 个人助理编排器
//!
//! 入口：初始化日志、加载配置并运行 REPL 主循环。

use anyhow::Context;
use majordome::{config::load_config, ui::run_app};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 日志：默认 info，可通过 RUST_LOG 覆盖
    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env().add_directive("info".parse().unwrap()))
        .with(fmt::layer())
        .init();

    let cfg = load_config(None).unwrap_or_else(|e| {
        tracing::warn!("Config load failed ({}), using defaults", e);
        majordome::config::AppConfig::default()
    });

    run_app(cfg).await.context("App run failed")?;

    Ok(())
}
