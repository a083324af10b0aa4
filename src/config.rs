//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `MAJORDOME__*` 覆盖
//! （双下划线表示嵌套，如 `MAJORDOME__LLM__MODEL=gpt-4o-mini`）。

use std::path::PathBuf;

use serde::Deserialize;

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    #[serde(default)]
    pub app: AppSection,
    #[serde(default)]
    pub llm: LlmSection,
    #[serde(default)]
    pub orchestrator: OrchestratorSection,
    #[serde(default)]
    pub router: RouterSection,
    #[serde(default)]
    pub tools: ToolsSection,
    #[serde(default)]
    pub session: SessionSection,
}

/// [app] 段：应用名与各持久化目录
#[derive(Debug, Clone, Deserialize, Default)]
pub struct AppSection {
    pub name: Option<String>,
    /// 检查点目录，未设置时用 ./checkpoints
    pub checkpoint_dir: Option<PathBuf>,
    /// 转录保存目录，未设置时用 ./transcripts
    pub transcript_dir: Option<PathBuf>,
}

/// [llm] 段：端点、模型与采样
#[derive(Debug, Clone, Deserialize, Default)]
pub struct LlmSection {
    #[serde(default = "default_model")]
    pub model: String,
    /// OpenAI 兼容端点（Ollama：http://localhost:11434/v1）
    pub base_url: Option<String>,
    #[serde(default)]
    pub temperature: f32,
}

fn default_model() -> String {
    "qwen2.5:7b".to_string()
}

/// [orchestrator] 段：模型↔工具往返上限
#[derive(Debug, Clone, Deserialize)]
pub struct OrchestratorSection {
    #[serde(default = "default_max_iterations")]
    pub max_iterations: usize,
}

impl Default for OrchestratorSection {
    fn default() -> Self {
        Self {
            max_iterations: default_max_iterations(),
        }
    }
}

fn default_max_iterations() -> usize {
    12
}

/// [router] 段：多智能体路由
#[derive(Debug, Clone, Deserialize)]
pub struct RouterSection {
    /// false 时单编排器模式，完全绕过路由（CLI 默认）
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_agent")]
    pub default_agent: String,
    #[serde(default = "default_conf_threshold")]
    pub conf_threshold: f64,
}

impl Default for RouterSection {
    fn default() -> Self {
        Self {
            enabled: false,
            default_agent: default_agent(),
            conf_threshold: default_conf_threshold(),
        }
    }
}

fn default_agent() -> String {
    "search".to_string()
}

fn default_conf_threshold() -> f64 {
    0.6
}

/// [tools] 段：工具超时与各工具配置
#[derive(Debug, Clone, Deserialize, Default)]
pub struct ToolsSection {
    /// 单次工具调用超时（秒）
    #[serde(default = "default_tool_timeout_secs")]
    pub tool_timeout_secs: u64,
    #[serde(default)]
    pub search: SearchSection,
    #[serde(default)]
    pub mail: MailSection,
}

fn default_tool_timeout_secs() -> u64 {
    30
}

/// [tools.search] 段：抓取超时、结果大小、域名白名单
#[derive(Debug, Clone, Deserialize)]
pub struct SearchSection {
    #[serde(default = "default_search_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_result_chars")]
    pub max_result_chars: usize,
    #[serde(default = "default_allowed_domains")]
    pub allowed_domains: Vec<String>,
}

impl Default for SearchSection {
    fn default() -> Self {
        Self {
            timeout_secs: default_search_timeout_secs(),
            max_result_chars: default_max_result_chars(),
            allowed_domains: default_allowed_domains(),
        }
    }
}

fn default_search_timeout_secs() -> u64 {
    15
}

fn default_max_result_chars() -> usize {
    8000
}

fn default_allowed_domains() -> Vec<String> {
    vec![
        // Wikipédia
        "fr.wikipedia.org".into(),
        "en.wikipedia.org".into(),
        // Presse / actualité
        "www.lemonde.fr".into(),
        "www.france24.com".into(),
        "news.ycombinator.com".into(),
        // Recherche
        "html.duckduckgo.com".into(),
        "duckduckgo.com".into(),
        // Développeur
        "github.com".into(),
        "raw.githubusercontent.com".into(),
        "stackoverflow.com".into(),
        "docs.rs".into(),
        "crates.io".into(),
        "doc.rust-lang.org".into(),
        "developer.mozilla.org".into(),
        // Académique / météo
        "arxiv.org".into(),
        "open-meteo.com".into(),
        "api.open-meteo.com".into(),
    ]
}

/// [tools.mail] 段：外发邮件落盘目录
#[derive(Debug, Clone, Deserialize)]
pub struct MailSection {
    #[serde(default = "default_outbox_dir")]
    pub outbox_dir: PathBuf,
}

impl Default for MailSection {
    fn default() -> Self {
        Self {
            outbox_dir: default_outbox_dir(),
        }
    }
}

fn default_outbox_dir() -> PathBuf {
    PathBuf::from("outbox")
}

/// [session] 段：语言偏好
#[derive(Debug, Clone, Deserialize)]
pub struct SessionSection {
    /// "fr" | "en" | "auto"
    #[serde(default = "default_lang_pref")]
    pub lang_pref: String,
}

impl Default for SessionSection {
    fn default() -> Self {
        Self {
            lang_pref: default_lang_pref(),
        }
    }
}

fn default_lang_pref() -> String {
    "auto".to_string()
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            app: AppSection::default(),
            llm: LlmSection::default(),
            orchestrator: OrchestratorSection::default(),
            router: RouterSection::default(),
            tools: ToolsSection::default(),
            session: SessionSection::default(),
        }
    }
}

/// 从 config 目录加载配置，环境变量 MAJORDOME__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 MAJORDOME__*（双下划线表示嵌套键）
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    let default_names = ["config/default", "../config/default", "default"];
    for name in default_names {
        let path = format!("{}.toml", name);
        if std::path::Path::new(&path).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(ref path) = config_path {
        if path.exists() {
            builder = builder.add_source(config::File::from(path.clone()).required(false));
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("MAJORDOME")
            .separator("__")
            .try_parsing(true),
    );

    let c = builder.build()?;
    c.try_deserialize()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cfg = AppConfig::default();
        assert_eq!(cfg.orchestrator.max_iterations, 12);
        assert!(!cfg.router.enabled);
        assert_eq!(cfg.router.default_agent, "search");
        assert!((cfg.router.conf_threshold - 0.6).abs() < f64::EPSILON);
        assert_eq!(cfg.session.lang_pref, "auto");
        assert!(cfg
            .tools
            .search
            .allowed_domains
            .iter()
            .any(|d| d == "fr.wikipedia.org"));
    }
}
