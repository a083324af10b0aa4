//! 流式输出层：事件消费会话与语言守卫

pub mod language;
pub mod session;

pub use language::{
    contains_cjk, detect_lang, enforce_lang_output, lang_directive, resolve_lang, Lang, LangPref,
};
pub use session::{RenderSink, StreamSession, DEBOUNCE_MS};
