//! 当前时间工具
//!
//! 无参数；返回本地日期、时间、年份与星期。日期类问题的方法论是先取当前时间
//! 再做网络检索，所以这个工具放在 search 智能体的目录里。

use async_trait::async_trait;
use chrono::Local;
use serde_json::Value;

use crate::tools::Tool;

/// current_time 工具：返回本地时间的结构化 JSON
pub struct CurrentTimeTool;

#[async_trait]
impl Tool for CurrentTimeTool {
    fn name(&self) -> &str {
        "current_time"
    }

    fn description(&self) -> &str {
        "Get the current local date and time (year, date, time, weekday). No arguments."
    }

    async fn execute(&self, _args: Value) -> Result<String, String> {
        let now = Local::now();
        let payload = serde_json::json!({
            "year": now.format("%Y").to_string(),
            "date": now.format("%Y-%m-%d").to_string(),
            "time": now.format("%H:%M:%S").to_string(),
            "weekday": now.format("%A").to_string(),
        });
        Ok(payload.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_returns_structured_time() {
        let out = CurrentTimeTool.execute(Value::Null).await.unwrap();
        let parsed: Value = serde_json::from_str(&out).unwrap();
        assert!(parsed.get("year").is_some());
        assert!(parsed.get("date").is_some());
    }
}
