//! Web 工具：URL 抓取与关键词检索
//!
//! 直接给 url 时走域名白名单抓取；给 query 时走 DuckDuckGo HTML 端点。
//! 对 HTML 响应使用 html2text 提取可读文本，超过 max_result_chars 截断并追加
//! ...[truncated]。深度检索开关（/deep）共享一个 AtomicBool，开启时放大结果预算。

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use html2text::from_read;
use reqwest::Client;
use serde_json::Value;

use crate::tools::Tool;

const DUCKDUCKGO_HTML_URL: &str = "https://html.duckduckgo.com/html/";
/// 深度模式下结果预算放大倍数
const DEEP_BUDGET_FACTOR: usize = 4;

/// web_search 工具：抓取 URL（白名单域名）或检索关键词
pub struct WebSearchTool {
    client: Client,
    allowed_domains: HashSet<String>,
    max_result_chars: usize,
    deep_mode: Arc<AtomicBool>,
}

/// 简易去除 HTML 标签（html2text 失败时的回退）
fn strip_html_tags(html: &str) -> String {
    let mut out = String::with_capacity(html.len());
    let mut in_tag = false;
    let mut prev_whitespace = false;
    for c in html.chars() {
        match c {
            '<' => in_tag = true,
            '>' => in_tag = false,
            _ if !in_tag => {
                let is_whitespace = c.is_whitespace();
                if is_whitespace && prev_whitespace {
                    continue;
                }
                prev_whitespace = is_whitespace;
                out.push(if is_whitespace { ' ' } else { c });
            }
            _ => {}
        }
    }
    out.split_whitespace().collect::<Vec<_>>().join(" ").trim().to_string()
}

/// 判断内容是否像 HTML（需提取可读文本）
fn looks_like_html(s: &str) -> bool {
    let s = s.trim_start();
    s.starts_with("<!") || s.starts_with("<html") || s.starts_with("<HTML")
        || (s.len() > 20 && s.contains('<') && (s.contains("</") || s.contains("<meta") || s.contains("<head") || s.contains("<title")))
}

/// 从 URL 中提取 host（不含端口与路径）
fn extract_domain(url: &str) -> Option<String> {
    let url = url.trim();
    let url = url.strip_prefix("https://").or_else(|| url.strip_prefix("http://"))?;
    let host = url.split('/').next()?;
    let host = host.split(':').next()?;
    Some(host.to_lowercase())
}

impl WebSearchTool {
    pub fn new(
        allowed_domains: Vec<String>,
        timeout_secs: u64,
        max_result_chars: usize,
        deep_mode: Arc<AtomicBool>,
    ) -> Self {
        let allowed_domains = allowed_domains
            .into_iter()
            .map(|s| s.to_lowercase())
            .collect();
        // 现代浏览器 UA 与常用请求头，避免被站点识别为爬虫
        const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36";
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(timeout_secs))
            .user_agent(USER_AGENT)
            .default_headers({
                use reqwest::header::{ACCEPT, ACCEPT_LANGUAGE};
                let mut h = reqwest::header::HeaderMap::new();
                h.insert(ACCEPT, "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8".parse().unwrap());
                h.insert(ACCEPT_LANGUAGE, "fr-FR,fr;q=0.9,en;q=0.8".parse().unwrap());
                h
            })
            .build()
            .unwrap_or_default();
        Self {
            client,
            allowed_domains,
            max_result_chars,
            deep_mode,
        }
    }

    /// 当前结果预算：深度模式放大 DEEP_BUDGET_FACTOR 倍
    fn result_budget(&self) -> usize {
        if self.deep_mode.load(Ordering::Relaxed) {
            self.max_result_chars * DEEP_BUDGET_FACTOR
        } else {
            self.max_result_chars
        }
    }

    fn is_allowed(&self, url: &str) -> Result<(), String> {
        let domain = extract_domain(url)
            .ok_or_else(|| "Invalid or missing URL".to_string())?;
        if self.allowed_domains.contains(&domain) {
            return Ok(());
        }
        Err(format!("Domain not in allowlist: {}", domain))
    }

    /// 将 HTML 转为可读文本（去除 script/style 等）
    fn html_to_text(&self, html: &str) -> String {
        match from_read(html.as_bytes(), 120) {
            Ok(text) if !text.trim().is_empty() => text,
            _ => strip_html_tags(html),
        }
    }

    fn truncate(&self, body: String) -> String {
        let budget = self.result_budget();
        if body.chars().count() > budget {
            body.chars().take(budget).collect::<String>() + "\n...[truncated]"
        } else {
            body
        }
    }

    async fn fetch_body(&self, url: &str) -> Result<String, String> {
        let resp = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| format!("Request failed: {}", e))?;
        if !resp.status().is_success() {
            return Err(format!("HTTP {}", resp.status()));
        }
        let mut body = resp
            .text()
            .await
            .map_err(|e| format!("Read body: {}", e))?;

        // 去除 BOM，避免 HTML 检测失败
        if body.starts_with('\u{FEFF}') {
            body = body[1..].to_string();
        }

        let body = if looks_like_html(&body) {
            self.html_to_text(&body)
        } else {
            body
        };
        Ok(body)
    }

    async fn fetch_url(&self, url: &str) -> Result<String, String> {
        self.is_allowed(url)?;
        let body = self.fetch_body(url).await?;
        Ok(self.truncate(body))
    }

    async fn query(&self, query: &str) -> Result<String, String> {
        let url = format!(
            "{}?q={}",
            DUCKDUCKGO_HTML_URL,
            urlencode(query)
        );
        let body = self.fetch_body(&url).await?;
        Ok(self.truncate(body))
    }
}

/// 最小 query-string 编码（字母数字与 -_.~ 之外转 %XX，空格转 +）
fn urlencode(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for b in s.bytes() {
        match b {
            b'a'..=b'z' | b'A'..=b'Z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(b as char)
            }
            b' ' => out.push('+'),
            _ => out.push_str(&format!("%{:02X}", b)),
        }
    }
    out
}

#[async_trait]
impl Tool for WebSearchTool {
    fn name(&self) -> &str {
        "web_search"
    }

    fn description(&self) -> &str {
        "Web research: pass {\"query\": \"...\"} for a search, or {\"url\": \"https://...\"} to fetch an allowlisted page as readable text."
    }

    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "query": { "type": "string", "description": "Search keywords" },
                "url": { "type": "string", "description": "Exact URL to fetch (allowlisted domains only)" }
            },
            "required": []
        })
    }

    async fn execute(&self, args: Value) -> Result<String, String> {
        let url = args.get("url").and_then(|v| v.as_str()).map(str::trim);
        let query = args.get("query").and_then(|v| v.as_str()).map(str::trim);

        match (url, query) {
            (Some(url), _) if !url.is_empty() => {
                tracing::info!(url = %url, "web_search fetch");
                self.fetch_url(url).await
            }
            (_, Some(q)) if !q.is_empty() => {
                tracing::info!(query = %q, deep = self.deep_mode.load(Ordering::Relaxed), "web_search query");
                self.query(q).await
            }
            _ => Err("Missing url or query".to_string()),
        }
    }
}
