//! 斜杠命令：核心状态变更之上的薄调度
//!
//! /new /model /temp /lang /save /tools /config /debug /deep /dump。
//! 每个命令返回要打印的文本；与会话任务的交互走 Command 通道。

use tokio::sync::oneshot;

use crate::core::{Command, SessionConfigView, SessionHandle};
use crate::stream::LangPref;
use crate::ui::transcript::save_transcript;

/// 处理一条以 `/` 开头的输入；返回要打印的文本
pub async fn handle_slash(
    cmd: &str,
    view: &mut SessionConfigView,
    handle: &SessionHandle,
) -> String {
    let cmd = cmd.trim();

    if cmd == "/new" {
        let (tx, rx) = oneshot::channel();
        if handle.cmd_tx.send(Command::NewThread { done: tx }).is_err() {
            return "Session fermée.".to_string();
        }
        match rx.await {
            Ok(id) => {
                view.thread_id = id.clone();
                format!("✨ Nouveau thread : `{}` (contexte réinitialisé).", id)
            }
            Err(_) => "Session fermée.".to_string(),
        }
    } else if let Some(model) = cmd.strip_prefix("/model ") {
        let model = model.trim().to_string();
        let _ = handle.cmd_tx.send(Command::SetModel(model.clone()));
        view.model = model.clone();
        format!("🧠 Modèle cible : `{}`", model)
    } else if let Some(raw) = cmd.strip_prefix("/temp ") {
        match raw.trim().parse::<f32>() {
            Ok(t) => {
                let _ = handle.cmd_tx.send(Command::SetTemperature(t));
                view.temperature = t;
                format!("🌡️ Température : {}", t)
            }
            Err(_) => "Valeur invalide. Exemple : `/temp 0.2`".to_string(),
        }
    } else if let Some(raw) = cmd.strip_prefix("/lang ") {
        match LangPref::parse(raw) {
            Some(pref) => {
                let _ = handle.cmd_tx.send(Command::SetLang(pref));
                view.lang_pref = pref;
                format!("🌍 Langue préférée : {}", pref.as_str())
            }
            None => "Langue invalide. Utilise `/lang fr`, `/lang en` ou `/lang auto`.".to_string(),
        }
    } else if cmd == "/save" {
        let (tx, rx) = oneshot::channel();
        if handle.cmd_tx.send(Command::Snapshot { done: tx }).is_err() {
            return "Session fermée.".to_string();
        }
        match rx.await {
            Ok(state) => match save_transcript(&view.transcript_dir, &state.thread_id, state.messages()) {
                Ok(path) => format!("💾 Transcript sauvegardé : {}", path.display()),
                Err(e) => format!("Échec de sauvegarde : {}", e),
            },
            Err(_) => "Session fermée.".to_string(),
        }
    } else if cmd == "/tools" {
        "🔧 Outils : current_time, get_weather, web_search, compose_email, send_email.".to_string()
    } else if cmd == "/config" {
        format!(
            "⚙️ Config\n  thread    : {}\n  modèle    : {}\n  température : {}\n  langue    : {}\n  debug     : {}\n  deep      : {}",
            view.thread_id,
            view.model,
            view.temperature,
            view.lang_pref.as_str(),
            if view.debug { "ON" } else { "OFF" },
            if view.deep_search { "ON" } else { "OFF" },
        )
    } else if cmd == "/debug" {
        view.debug = !view.debug;
        format!("🐛 Mode debug : {}", if view.debug { "ON" } else { "OFF" })
    } else if cmd == "/deep" {
        let (tx, rx) = oneshot::channel();
        if handle
            .cmd_tx
            .send(Command::ToggleDeepSearch { done: tx })
            .is_err()
        {
            return "Session fermée.".to_string();
        }
        match rx.await {
            Ok(enabled) => {
                view.deep_search = enabled;
                format!(
                    "🔎 Recherche approfondie {}.",
                    if enabled { "activée" } else { "désactivée" }
                )
            }
            Err(_) => "Session fermée.".to_string(),
        }
    } else if cmd == "/dump" {
        let (tx, rx) = oneshot::channel();
        if handle.cmd_tx.send(Command::Snapshot { done: tx }).is_err() {
            return "Session fermée.".to_string();
        }
        match rx.await {
            Ok(state) => serde_json::to_string_pretty(state.messages())
                .unwrap_or_else(|e| format!("Échec du dump : {}", e)),
            Err(_) => "Session fermée.".to_string(),
        }
    } else {
        format!("Commande inconnue : {}", cmd)
    }
}
