//! 工具层：注册表、执行器与各工具适配器

pub mod echo;
pub mod email;
pub mod executor;
pub mod registry;
pub mod search;
pub mod time;
pub mod weather;

pub use echo::EchoTool;
pub use email::{
    new_draft_box, ComposeEmailTool, DraftBox, MailTransport, OutboxMailer, SendEmailTool,
};
pub use executor::ToolExecutor;
pub use registry::{Tool, ToolError, ToolRegistry, ToolSpec};
pub use search::WebSearchTool;
pub use time::CurrentTimeTool;
pub use weather::WeatherTool;
