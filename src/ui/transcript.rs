//! 转录保存：对话历史落成 Markdown 文件

use std::io;
use std::path::{Path, PathBuf};

use chrono::Local;

use crate::state::{Message, Role};

fn role_label(role: &Role) -> &'static str {
    match role {
        Role::System => "system",
        Role::User => "user",
        Role::Assistant => "assistant",
        Role::Tool => "tool",
    }
}

/// 保存为 {dir}/{thread_id}-{timestamp}.md，返回路径
pub fn save_transcript(
    dir: impl AsRef<Path>,
    thread_id: &str,
    messages: &[Message],
) -> io::Result<PathBuf> {
    let dir = dir.as_ref();
    std::fs::create_dir_all(dir)?;
    let ts = Local::now().format("%Y%m%d-%H%M%S");
    let path = dir.join(format!("{}-{}.md", thread_id, ts));

    let mut out = String::new();
    for m in messages {
        out.push_str(&format!("### {}\n\n{}\n\n---\n\n", role_label(&m.role), m.content));
    }
    std::fs::write(&path, out)?;
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transcript_contains_roles_and_content() {
        let dir = tempfile::tempdir().unwrap();
        let messages = vec![
            Message::system("identité"),
            Message::user("question"),
            Message::assistant("réponse"),
        ];

        let path = save_transcript(dir.path(), "abc123", &messages).unwrap();
        let written = std::fs::read_to_string(&path).unwrap();

        assert!(path.file_name().unwrap().to_string_lossy().starts_with("abc123-"));
        assert!(written.contains("### user"));
        assert!(written.contains("réponse"));
        assert!(written.contains("---"));
    }
}
