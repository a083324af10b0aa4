//! 会话任务：主控循环
//!
//! 后台任务独占 ConversationState、推理客户端、编排器与检查点存储，消费
//! Command（Submit/NewThread/SetModel/…）。同一线程一次只跑一轮：Submit 驱动
//! 编排图并把过程事件推给渲染层，轮末写检查点。致命错误以 assistant Markdown
//! 通知追加进对话，会话保持可恢复；持久化失败只上报、不推翻内存态。

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};

use crate::config::AppConfig;
use crate::core::checkpoint::CheckpointStore;
use crate::core::graph::{Orchestrator, TurnOptions, TurnResult};
use crate::core::{AgentError, SessionSupervisor};
use crate::llm::{LlmClient, MockLlmClient, OpenAiClient, Sampling, StreamEvent};
use crate::router::{AgentSpec, IntentRouter, MultiAgentOrchestrator};
use crate::state::{ConversationState, Message};
use crate::stream::{lang_directive, resolve_lang, LangPref};
use crate::tools::{
    new_draft_box, ComposeEmailTool, CurrentTimeTool, DraftBox, OutboxMailer, SendEmailTool,
    ToolExecutor, ToolRegistry, WeatherTool, WebSearchTool,
};

/// 启动时的默认线程名（/new 换成短 uuid）
pub const DEFAULT_THREAD_ID: &str = "user_session";

const DEFAULT_IDENTITY_PROMPT: &str = "\
Tu es Majordome, l'assistant IA personnel de ton utilisateur. Tu réponds toujours \
en Markdown clair et bien structuré.

## Ton comportement :
1. Réponds de manière complète et utile.
2. Utilise les outils disponibles sans demander de confirmation inutile, sauf pour \
les actions sensibles (comme l'envoi d'un email : compose_email d'abord, puis \
confirmation, puis send_email).
3. Pour les questions de date ou d'actualité, appelle current_time puis web_search \
avec l'année obtenue.
4. Si un outil renvoie une erreur, reformule poliment et propose une alternative.
5. Réponds uniquement en français ou en anglais, jamais dans d'autres langues.";

const SEARCH_AGENT_PROMPT: &str = "\
Tu es l'agent de recherche. Pour toute question factuelle : current_time d'abord si \
la date compte, puis web_search, puis une réponse structurée en Markdown citant tes \
sources. Ne jamais inventer.";

const WEATHER_AGENT_PROMPT: &str = "\
Tu es l'agent météo. Utilise get_weather (et current_time si la date compte) puis \
présente température et vent en Markdown. Si la ville est introuvable, demande une \
précision.";

const MAIL_AGENT_PROMPT: &str = "\
Tu es l'agent email. Rédige d'abord un brouillon avec compose_email, demande \
confirmation, puis seulement send_email. Ne jamais envoyer sans confirmation \
explicite.";

/// 从 UI 发往会话任务的命令
pub enum Command {
    /// 提交用户输入，触发一轮；events 收过程事件，done 收轮结果
    Submit {
        input: String,
        events: mpsc::UnboundedSender<StreamEvent>,
        done: oneshot::Sender<Result<TurnSummary, String>>,
    },
    /// 新线程：重置历史（保留身份消息），回传新 thread_id
    NewThread { done: oneshot::Sender<String> },
    SetModel(String),
    SetTemperature(f32),
    SetLang(LangPref),
    /// 深度检索开关，回传新状态
    ToggleDeepSearch { done: oneshot::Sender<bool> },
    /// 当前状态快照（/dump、/save、/config）
    Snapshot {
        done: oneshot::Sender<ConversationState>,
    },
    Quit,
}

/// 一轮的结果摘要
#[derive(Debug, Clone)]
pub struct TurnSummary {
    pub response: String,
    pub steps: usize,
    pub tools_invoked: usize,
    pub route: Option<String>,
    /// 持久化失败时的提示；内存态仍然权威
    pub checkpoint_error: Option<String>,
}

/// 会话句柄：命令通道 + 中断入口
#[derive(Clone)]
pub struct SessionHandle {
    pub cmd_tx: mpsc::UnboundedSender<Command>,
    supervisor: Arc<SessionSupervisor>,
}

impl SessionHandle {
    /// 中断当前轮（Ctrl+C）；已追加的消息保留并已被检查点覆盖
    pub fn cancel(&self) {
        self.supervisor.cancel();
    }
}

/// 单编排器或路由式多编排器
enum Engine {
    Single(Orchestrator),
    Multi(MultiAgentOrchestrator),
}

/// 根据配置与环境变量选择 LLM 后端（OpenAI 兼容 / Mock）
pub fn create_llm_from_config(cfg: &AppConfig, model: &str) -> Arc<dyn LlmClient> {
    let has_key = std::env::var("OPENAI_API_KEY").is_ok();
    if has_key || cfg.llm.base_url.is_some() {
        tracing::info!(model = %model, base_url = ?cfg.llm.base_url, "Using OpenAI-compatible LLM");
        Arc::new(OpenAiClient::new(
            cfg.llm.base_url.as_deref(),
            model,
            std::env::var("OPENAI_API_KEY").ok().as_deref(),
        ))
    } else {
        tracing::warn!("No API key and no base_url configured, using Mock LLM");
        Arc::new(MockLlmClient::new())
    }
}

/// 读取身份 prompt：config/prompts/system.txt 优先，否则内置默认
fn identity_prompt() -> String {
    ["config/prompts/system.txt", "../config/prompts/system.txt"]
        .into_iter()
        .find_map(|p| std::fs::read_to_string(p).ok())
        .unwrap_or_else(|| DEFAULT_IDENTITY_PROMPT.to_string())
}

fn search_registry(cfg: &AppConfig, deep_mode: Arc<AtomicBool>) -> ToolRegistry {
    let mut registry = ToolRegistry::new();
    registry.register(CurrentTimeTool).expect("fresh registry");
    registry
        .register(WebSearchTool::new(
            cfg.tools.search.allowed_domains.clone(),
            cfg.tools.search.timeout_secs,
            cfg.tools.search.max_result_chars,
            deep_mode,
        ))
        .expect("fresh registry");
    registry
}

fn weather_registry(cfg: &AppConfig) -> ToolRegistry {
    let mut registry = ToolRegistry::new();
    registry.register(CurrentTimeTool).expect("fresh registry");
    registry
        .register(WeatherTool::new(cfg.tools.search.timeout_secs))
        .expect("fresh registry");
    registry
}

fn mail_registry(cfg: &AppConfig, draft_box: DraftBox) -> ToolRegistry {
    let transport = Arc::new(OutboxMailer::new(cfg.tools.mail.outbox_dir.clone()));
    let mut registry = ToolRegistry::new();
    registry
        .register(ComposeEmailTool::new(draft_box.clone()))
        .expect("fresh registry");
    registry
        .register(SendEmailTool::new(draft_box, transport))
        .expect("fresh registry");
    registry
}

/// 单编排器：全部工具挂在一个注册表上
fn build_single_engine(
    cfg: &AppConfig,
    llm: Arc<dyn LlmClient>,
    draft_box: DraftBox,
    deep_mode: Arc<AtomicBool>,
) -> Engine {
    let mut registry = ToolRegistry::new();
    registry.register(CurrentTimeTool).expect("fresh registry");
    registry
        .register(WeatherTool::new(cfg.tools.search.timeout_secs))
        .expect("fresh registry");
    registry
        .register(WebSearchTool::new(
            cfg.tools.search.allowed_domains.clone(),
            cfg.tools.search.timeout_secs,
            cfg.tools.search.max_result_chars,
            deep_mode,
        ))
        .expect("fresh registry");
    let transport = Arc::new(OutboxMailer::new(cfg.tools.mail.outbox_dir.clone()));
    registry
        .register(ComposeEmailTool::new(draft_box.clone()))
        .expect("fresh registry");
    registry
        .register(SendEmailTool::new(draft_box, transport))
        .expect("fresh registry");

    Engine::Single(
        Orchestrator::new(
            llm,
            ToolExecutor::new(registry, cfg.tools.tool_timeout_secs),
            identity_prompt(),
        )
        .with_max_iterations(cfg.orchestrator.max_iterations),
    )
}

/// 多编排器：每个智能体自己的指令与工具子集，路由器择一执行
fn build_multi_engine(
    cfg: &AppConfig,
    llm: Arc<dyn LlmClient>,
    draft_box: DraftBox,
    deep_mode: Arc<AtomicBool>,
) -> Engine {
    let timeout = cfg.tools.tool_timeout_secs;
    let max_iterations = cfg.orchestrator.max_iterations;
    let make = |registry: ToolRegistry, prompt: &str| {
        Orchestrator::new(llm.clone(), ToolExecutor::new(registry, timeout), prompt)
            .with_max_iterations(max_iterations)
    };

    let mut agents = HashMap::new();
    agents.insert(
        "search".to_string(),
        make(search_registry(cfg, deep_mode), SEARCH_AGENT_PROMPT),
    );
    agents.insert(
        "weather".to_string(),
        make(weather_registry(cfg), WEATHER_AGENT_PROMPT),
    );
    agents.insert(
        "mail".to_string(),
        make(mail_registry(cfg, draft_box), MAIL_AGENT_PROMPT),
    );

    let specs = vec![
        AgentSpec::new("search", "Recherche web, questions factuelles et actualité"),
        AgentSpec::new("weather", "Météo et heure courante"),
        AgentSpec::new("mail", "Rédaction et envoi d'emails"),
    ];
    let router = IntentRouter::new(llm, specs, cfg.router.default_agent.clone())
        .with_conf_threshold(cfg.router.conf_threshold);

    Engine::Multi(MultiAgentOrchestrator::new(
        router,
        agents,
        cfg.router.default_agent.clone(),
    ))
}

fn build_engine(
    cfg: &AppConfig,
    llm: Arc<dyn LlmClient>,
    draft_box: DraftBox,
    deep_mode: Arc<AtomicBool>,
) -> Engine {
    if cfg.router.enabled {
        build_multi_engine(cfg, llm, draft_box, deep_mode)
    } else {
        build_single_engine(cfg, llm, draft_box, deep_mode)
    }
}

/// 致命轮错误 → assistant Markdown 通知
fn error_notice(err: &AgentError) -> String {
    match err {
        AgentError::MaxIterationsExceeded { steps, partial } if !partial.is_empty() => format!(
            "# ⚠️ Erreur\n\nLimite de {} allers-retours outil atteinte.\n\nDernier contenu partiel :\n\n{}",
            steps, partial
        ),
        other => format!("# ⚠️ Erreur\n\n{}", other),
    }
}

/// 创建会话任务：返回句柄；后台任务消费命令直到 Quit
///
/// llm_override 供测试注入脚本化客户端；为 None 时按配置构建。
pub fn create_session(
    cfg: AppConfig,
    store: Arc<dyn CheckpointStore>,
    llm_override: Option<Arc<dyn LlmClient>>,
) -> SessionHandle {
    let (cmd_tx, mut cmd_rx) = mpsc::unbounded_channel::<Command>();
    let supervisor = Arc::new(SessionSupervisor::new());
    let handle = SessionHandle {
        cmd_tx,
        supervisor: supervisor.clone(),
    };

    tokio::spawn(async move {
        let mut model = cfg.llm.model.clone();
        let mut temperature = cfg.llm.temperature;
        let mut lang_pref =
            LangPref::parse(&cfg.session.lang_pref).unwrap_or(LangPref::Auto);

        let draft_box = new_draft_box();
        let deep_mode = Arc::new(AtomicBool::new(false));
        let mut llm = llm_override
            .clone()
            .unwrap_or_else(|| create_llm_from_config(&cfg, &model));
        let mut engine = build_engine(&cfg, llm.clone(), draft_box.clone(), deep_mode.clone());

        // 既有检查点则恢复，否则以身份消息起新状态
        let mut state = match store.load(DEFAULT_THREAD_ID) {
            Ok(Some(saved)) => {
                tracing::info!(thread_id = %saved.thread_id, messages = saved.messages().len(), "Resumed thread from checkpoint");
                saved
            }
            Ok(None) => ConversationState::with_identity(DEFAULT_THREAD_ID, &identity_prompt()),
            Err(e) => {
                tracing::warn!(error = %e, "Checkpoint load failed, starting fresh");
                ConversationState::with_identity(DEFAULT_THREAD_ID, &identity_prompt())
            }
        };

        while let Some(cmd) = cmd_rx.recv().await {
            match cmd {
                Command::Submit { input, events, done } => {
                    let cancel = supervisor.renew();
                    let lang = resolve_lang(lang_pref, &input);
                    let opts = TurnOptions {
                        event_tx: Some(events),
                        cancel,
                        sampling: Sampling { temperature },
                        lang_directive: Some(lang_directive(lang).to_string()),
                    };

                    // 草稿随状态进出，轮内由邮件工具读写
                    *draft_box.lock().unwrap() = state.draft.clone();

                    let outcome: Result<(Option<String>, TurnResult), AgentError> = match &engine {
                        Engine::Single(orch) => orch
                            .run_turn(&mut state, &input, &opts)
                            .await
                            .map(|r| (None, r)),
                        Engine::Multi(multi) => multi
                            .run_turn(&mut state, &input, &opts)
                            .await
                            .map(|(decision, r)| (Some(decision.agent), r)),
                    };

                    state.draft = draft_box.lock().unwrap().clone();

                    let checkpoint_error = match store.save(&state) {
                        Ok(()) => None,
                        Err(e) => {
                            tracing::warn!(error = %e, "Checkpoint save failed, in-memory state remains authoritative");
                            Some(e.to_string())
                        }
                    };

                    let reply = match outcome {
                        Ok((route, result)) => Ok(TurnSummary {
                            response: result.response,
                            steps: result.steps,
                            tools_invoked: result.tools_invoked,
                            route,
                            checkpoint_error,
                        }),
                        Err(AgentError::Cancelled) => {
                            // 中断不是错误通知：部分状态已保留并写入检查点
                            Err("⏹ Tour interrompu.".to_string())
                        }
                        Err(e) => {
                            let notice = error_notice(&e);
                            state.push_message(Message::assistant(notice.clone()));
                            if let Err(save_err) = store.save(&state) {
                                tracing::warn!(error = %save_err, "Checkpoint save failed after error notice");
                            }
                            Err(notice)
                        }
                    };
                    let _ = done.send(reply);
                }
                Command::NewThread { done } => {
                    let new_id = uuid::Uuid::new_v4().simple().to_string()[..8].to_string();
                    state.reset(new_id.clone());
                    *draft_box.lock().unwrap() = None;
                    if let Err(e) = store.save(&state) {
                        tracing::warn!(error = %e, "Checkpoint save failed on new thread");
                    }
                    let _ = done.send(new_id);
                }
                Command::SetModel(new_model) => {
                    model = new_model;
                    if llm_override.is_none() {
                        llm = create_llm_from_config(&cfg, &model);
                    }
                    engine =
                        build_engine(&cfg, llm.clone(), draft_box.clone(), deep_mode.clone());
                    tracing::info!(model = %model, "Model changed, engine rebuilt");
                }
                Command::SetTemperature(t) => {
                    temperature = t;
                }
                Command::SetLang(pref) => {
                    lang_pref = pref;
                }
                Command::ToggleDeepSearch { done } => {
                    let next = !deep_mode.load(Ordering::Relaxed);
                    deep_mode.store(next, Ordering::Relaxed);
                    let _ = done.send(next);
                }
                Command::Snapshot { done } => {
                    let _ = done.send(state.clone());
                }
                Command::Quit => break,
            }
        }
    });

    handle
}

/// 当前会话可变参数的只读视图（/config 展示用，由 UI 维护镜像）
#[derive(Debug, Clone)]
pub struct SessionConfigView {
    pub thread_id: String,
    pub model: String,
    pub temperature: f32,
    pub lang_pref: LangPref,
    pub debug: bool,
    pub deep_search: bool,
    pub transcript_dir: PathBuf,
}
