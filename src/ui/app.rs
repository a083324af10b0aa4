//! REPL 主循环
//!
//! 读一行用户输入：quit/exit/q 退出，`/` 前缀走斜杠命令，其余提交给会话任务并
//! 以 StreamSession 消费过程事件渲染。轮中 Ctrl+C 中断当前轮（状态保留）。

use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use crossterm::style::Stylize;
use futures_util::FutureExt;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::{mpsc, oneshot};

use crate::config::AppConfig;
use crate::core::{
    create_session, Command, FileCheckpointStore, SessionConfigView, SessionHandle, TurnSummary,
    DEFAULT_THREAD_ID,
};
use crate::stream::{resolve_lang, LangPref, StreamSession};
use crate::ui::commands::handle_slash;
use crate::ui::render::AnsiSink;

fn banner(view: &SessionConfigView) {
    println!("{}", "Majordome — assistant personnel".bold());
    println!(
        "{}",
        format!(
            "modèle {} · thread {} · /new /model /temp /lang /save /tools /config /debug /deep /dump · quit pour sortir",
            view.model, view.thread_id
        )
        .dim()
    );
    println!();
}

fn fmt_ms(elapsed: std::time::Duration) -> String {
    format!("{:.0} ms", elapsed.as_secs_f64() * 1000.0)
}

/// 跑一轮：提交输入、流式渲染、处理中断
async fn run_turn(handle: &SessionHandle, view: &SessionConfigView, input: &str) {
    let (events_tx, events_rx) = mpsc::unbounded_channel();
    let (done_tx, done_rx) = oneshot::channel::<Result<TurnSummary, String>>();

    if handle
        .cmd_tx
        .send(Command::Submit {
            input: input.to_string(),
            events: events_tx,
            done: done_tx,
        })
        .is_err()
    {
        println!("{}", "Session fermée.".red());
        return;
    }

    // 轮结果共享：流没产出内容时作为回退文本，轮后用于统计展示
    let done = done_rx
        .map(|r| r.unwrap_or_else(|_| Err("Session fermée.".to_string())))
        .shared();

    let lang = resolve_lang(view.lang_pref, input);
    let mut session = StreamSession::new(AnsiSink::new(view.debug), lang);

    println!("{}", "🤔 L'agent réfléchit...".green());
    let started = Instant::now();

    let events = Box::pin(futures_util::stream::unfold(events_rx, |mut rx| async move {
        rx.recv().await.map(|ev| (ev, rx))
    }));
    let fallback_done = done.clone();
    let run_fut = session.run(events, move || async move {
        // 流式路径静默：渲染会话任务给出的最终文本（成功回复或错误通知）
        match fallback_done.await {
            Ok(summary) => Ok(summary.response),
            Err(notice) => Ok(notice),
        }
    });
    tokio::pin!(run_fut);

    let rendered = loop {
        tokio::select! {
            result = &mut run_fut => break result,
            _ = tokio::signal::ctrl_c() => {
                println!("\n{}", "⏹ Interruption demandée…".yellow());
                handle.cancel();
            }
        }
    };

    let rendered_text = match rendered {
        Ok(text) => {
            println!("{}", format!("⏱ {}", fmt_ms(started.elapsed())).dim());
            text
        }
        Err(e) => {
            println!("{}", format!("❌ Erreur : {}", e).red());
            String::new()
        }
    };

    // 轮摘要：错误通知（若未经回退渲染过）、检查点告警、debug 统计
    match done.await {
        Ok(summary) => {
            if let Some(warn) = summary.checkpoint_error {
                println!(
                    "{}",
                    format!("⚠️ Checkpoint non persisté : {}", warn).yellow()
                );
            }
            if view.debug {
                let route = summary.route.unwrap_or_else(|| "-".to_string());
                println!(
                    "{}",
                    format!(
                        "debug · agent={} · étapes={} · outils={}",
                        route, summary.steps, summary.tools_invoked
                    )
                    .dim()
                );
            }
        }
        Err(notice) => {
            if rendered_text != notice {
                println!("{}", notice.red());
            }
        }
    }
}

/// CLI 入口：构建会话并进入 REPL
pub async fn run_app(cfg: AppConfig) -> anyhow::Result<()> {
    let checkpoint_dir = cfg
        .app
        .checkpoint_dir
        .clone()
        .unwrap_or_else(|| PathBuf::from("checkpoints"));
    let transcript_dir = cfg
        .app
        .transcript_dir
        .clone()
        .unwrap_or_else(|| PathBuf::from("transcripts"));
    let store = Arc::new(FileCheckpointStore::new(checkpoint_dir));

    let mut view = SessionConfigView {
        thread_id: DEFAULT_THREAD_ID.to_string(),
        model: cfg.llm.model.clone(),
        temperature: cfg.llm.temperature,
        lang_pref: LangPref::parse(&cfg.session.lang_pref).unwrap_or(LangPref::Auto),
        debug: false,
        deep_search: false,
        transcript_dir,
    };
    let handle = create_session(cfg, store, None);

    banner(&view);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("{} ", "Vous ❯".blue().bold());
        std::io::stdout().flush()?;

        let Some(line) = lines.next_line().await? else {
            break;
        };
        let input = line.trim();
        if input.is_empty() {
            continue;
        }
        if matches!(input.to_lowercase().as_str(), "quit" | "exit" | "q") {
            break;
        }

        if input.starts_with('/') {
            let out = handle_slash(input, &mut view, &handle).await;
            println!("{}", out);
            continue;
        }

        run_turn(&handle, &view, input).await;
    }

    let _ = handle.cmd_tx.send(Command::Quit);
    println!("{}", "👋 Au revoir ! À bientôt.".yellow());
    Ok(())
}
