//! 终端渲染汇：把 StreamSession 的输出写到 stdout
//!
//! partial 只打印相对已输出内容的增量后缀（防抖由会话层负责）；工具事件打印
//! 单行提示；finalize 补齐剩余文本。回退或守卫改写导致最终文本与已打印内容
//! 不是前缀关系时，换行后整体重印。

use std::io::Write;

use crossterm::style::Stylize;

use crate::stream::RenderSink;

/// ANSI 终端渲染汇
pub struct AnsiSink {
    printed: String,
    debug: bool,
}

impl AnsiSink {
    pub fn new(debug: bool) -> Self {
        Self {
            printed: String::new(),
            debug,
        }
    }

    fn flush_stdout(&self) {
        let _ = std::io::stdout().flush();
    }
}

impl RenderSink for AnsiSink {
    fn partial(&mut self, text: &str) {
        if let Some(suffix) = text.strip_prefix(self.printed.as_str()) {
            print!("{}", suffix);
        } else {
            // 缓冲被丢弃重建（工具抑制后）：换行重印
            if !self.printed.is_empty() {
                println!();
            }
            print!("{}", text);
        }
        self.printed = text.to_string();
        self.flush_stdout();
    }

    fn tool_started(&mut self, tool_name: &str, node: &str) {
        if !self.printed.is_empty() {
            println!();
            self.printed.clear();
        }
        println!("{}", format!("🔧 {} (nœud : {})…", tool_name, node).cyan());
        self.flush_stdout();
    }

    fn tool_finished(&mut self, tool_name: &str, _node: &str) {
        if self.debug {
            println!("{}", format!("   {} terminé", tool_name).dim());
            self.flush_stdout();
        }
    }

    fn finalize(&mut self, text: &str) {
        if let Some(suffix) = text.strip_prefix(self.printed.as_str()) {
            print!("{}", suffix);
        } else {
            if !self.printed.is_empty() {
                println!();
            }
            print!("{}", text);
        }
        self.printed.clear();
        println!();
        self.flush_stdout();
    }
}
