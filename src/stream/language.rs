//! 语言检测与软守卫
//!
//! 会话限定法语/英语：带重音字符的输入判为法语，否则英语。输出端的 CJK 守卫
//! 只加一条可见提醒、不改写内容——误伤合法引用的权衡记录在 DESIGN.md。

use std::sync::OnceLock;

use regex::Regex;

/// 会话语言偏好（/lang fr|en|auto）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LangPref {
    Fr,
    En,
    Auto,
}

impl LangPref {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "fr" => Some(Self::Fr),
            "en" => Some(Self::En),
            "auto" => Some(Self::Auto),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Fr => "fr",
            Self::En => "en",
            Self::Auto => "auto",
        }
    }
}

/// 检出的语言（auto 模式下由输入推断）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lang {
    Fr,
    En,
}

fn accent_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)[éèàùâêîôûç]").unwrap())
}

/// 输入语言启发式：含法语重音字符即法语
pub fn detect_lang(text: &str) -> Lang {
    if accent_regex().is_match(text) {
        Lang::Fr
    } else {
        Lang::En
    }
}

/// 按偏好决定本轮语言：fr/en 固定，auto 按输入推断
pub fn resolve_lang(pref: LangPref, user_input: &str) -> Lang {
    match pref {
        LangPref::Fr => Lang::Fr,
        LangPref::En => Lang::En,
        LangPref::Auto => detect_lang(user_input),
    }
}

/// 本轮注入请求的语言指令（不写入状态）
pub fn lang_directive(lang: Lang) -> &'static str {
    match lang {
        Lang::Fr => {
            "Réponds STRICTEMENT en français. Ne réponds jamais dans une autre langue. \
             Formate toujours en Markdown."
        }
        Lang::En => {
            "Answer STRICTLY in English. Never use any other language. Always format in Markdown."
        }
    }
}

/// 是否含 CJK 统一表意文字
pub fn contains_cjk(text: &str) -> bool {
    text.chars().any(|c| ('\u{4e00}'..='\u{9fff}').contains(&c))
}

/// 输出软守卫：检出 CJK 时不改写，仅前置可见提醒
pub fn enforce_lang_output(text: &str, lang: Lang) -> String {
    if contains_cjk(text) {
        let tag = match lang {
            Lang::Fr => "FR",
            Lang::En => "EN",
        };
        format!("> ⚠️ Réponse réécrite ({}) :\n\n{}", tag, text)
    } else {
        text.to_string()
    }
}
