//! CLI 界面：REPL、斜杠命令、渲染与转录

pub mod app;
pub mod commands;
pub mod render;
pub mod transcript;

pub use app::run_app;
pub use render::AnsiSink;
pub use transcript::save_transcript;
