//! 邮件工具：草稿 → 确认 → 发送
//!
//! compose_email 生成结构化草稿写入 DraftBox 并请用户确认；send_email 取草稿
//! （或显式参数）经 MailTransport 投递。DraftBox 按线程持有，轮次结束后由会话层
//! 同步回 ConversationState.draft，随检查点持久化——不存在进程级共享草稿。
//! 真实 SMTP 属外部协作方；内置的 OutboxMailer 把邮件写成 outbox 目录下的
//! Markdown 文件。

use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::Local;
use serde_json::Value;

use crate::state::EmailDraft;
use crate::tools::Tool;

/// 每线程共享的草稿槽：compose 写入，send 取走
pub type DraftBox = Arc<Mutex<Option<EmailDraft>>>;

pub fn new_draft_box() -> DraftBox {
    Arc::new(Mutex::new(None))
}

/// 邮件投递边界：具体传输（SMTP、API……）在此之外
#[async_trait]
pub trait MailTransport: Send + Sync {
    async fn deliver(&self, draft: &EmailDraft) -> Result<String, String>;
}

/// 内置传输：把邮件落成 outbox 目录下的 Markdown 文件
pub struct OutboxMailer {
    outbox_dir: PathBuf,
}

impl OutboxMailer {
    pub fn new(outbox_dir: impl Into<PathBuf>) -> Self {
        Self {
            outbox_dir: outbox_dir.into(),
        }
    }
}

#[async_trait]
impl MailTransport for OutboxMailer {
    async fn deliver(&self, draft: &EmailDraft) -> Result<String, String> {
        std::fs::create_dir_all(&self.outbox_dir)
            .map_err(|e| format!("Outbox dir: {}", e))?;
        let ts = Local::now().format("%Y%m%d-%H%M%S");
        let path = self.outbox_dir.join(format!("{}.md", ts));
        let body = format!(
            "# À : {}\n\n**Sujet :** {}\n\n---\n\n{}\n",
            draft.recipient, draft.subject, draft.body
        );
        std::fs::write(&path, body).map_err(|e| format!("Outbox write: {}", e))?;
        Ok(path.display().to_string())
    }
}

/// compose_email 工具：写草稿，不发送
pub struct ComposeEmailTool {
    draft: DraftBox,
}

impl ComposeEmailTool {
    pub fn new(draft: DraftBox) -> Self {
        Self { draft }
    }
}

#[async_trait]
impl Tool for ComposeEmailTool {
    fn name(&self) -> &str {
        "compose_email"
    }

    fn description(&self) -> &str {
        "Draft an outgoing email (kept until confirmation, nothing is sent). Args: {\"recipient\", \"subject\", \"body\"}"
    }

    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "recipient": { "type": "string", "description": "Recipient address" },
                "subject": { "type": "string", "description": "Email subject" },
                "body": { "type": "string", "description": "Email body (Markdown)" }
            },
            "required": ["recipient", "subject", "body"]
        })
    }

    async fn execute(&self, args: Value) -> Result<String, String> {
        let get = |key: &str| -> Result<String, String> {
            args.get(key)
                .and_then(|v| v.as_str())
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(String::from)
                .ok_or_else(|| format!("Missing {}", key))
        };
        let draft = EmailDraft {
            recipient: get("recipient")?,
            subject: get("subject")?,
            body: get("body")?,
        };
        let preview = format!(
            "📝 **Brouillon prêt** (non envoyé)\n\n- **À :** {}\n- **Sujet :** {}\n\n{}\n\nDemande confirmation avant d'appeler send_email.",
            draft.recipient, draft.subject, draft.body
        );
        *self.draft.lock().unwrap() = Some(draft);
        Ok(preview)
    }
}

/// send_email 工具：投递草稿（或显式参数），成功后清空草稿
pub struct SendEmailTool {
    draft: DraftBox,
    transport: Arc<dyn MailTransport>,
}

impl SendEmailTool {
    pub fn new(draft: DraftBox, transport: Arc<dyn MailTransport>) -> Self {
        Self { draft, transport }
    }
}

#[async_trait]
impl Tool for SendEmailTool {
    fn name(&self) -> &str {
        "send_email"
    }

    fn description(&self) -> &str {
        "Send the pending draft (or explicit fields) after user confirmation. Args (optional): {\"recipient\", \"subject\", \"body\"}"
    }

    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "recipient": { "type": "string" },
                "subject": { "type": "string" },
                "body": { "type": "string" }
            },
            "required": []
        })
    }

    async fn execute(&self, args: Value) -> Result<String, String> {
        let explicit = {
            let get = |key: &str| {
                args.get(key)
                    .and_then(|v| v.as_str())
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(String::from)
            };
            match (get("recipient"), get("subject"), get("body")) {
                (Some(recipient), Some(subject), Some(body)) => Some(EmailDraft {
                    recipient,
                    subject,
                    body,
                }),
                _ => None,
            }
        };

        let draft = match explicit {
            Some(d) => d,
            None => self
                .draft
                .lock()
                .unwrap()
                .clone()
                .ok_or_else(|| "Aucun brouillon en attente (appeler compose_email d'abord)".to_string())?,
        };

        let receipt = self.transport.deliver(&draft).await?;
        *self.draft.lock().unwrap() = None;
        Ok(format!(
            "✉️ Email envoyé à {} — {} ({})",
            draft.recipient, draft.subject, receipt
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct RecordingTransport {
        sent: Mutex<Vec<EmailDraft>>,
    }

    #[async_trait]
    impl MailTransport for RecordingTransport {
        async fn deliver(&self, draft: &EmailDraft) -> Result<String, String> {
            self.sent.lock().unwrap().push(draft.clone());
            Ok("recorded".to_string())
        }
    }

    struct FailingTransport;

    #[async_trait]
    impl MailTransport for FailingTransport {
        async fn deliver(&self, _draft: &EmailDraft) -> Result<String, String> {
            Err("SMTP unreachable".to_string())
        }
    }

    fn compose_args() -> Value {
        serde_json::json!({
            "recipient": "quentin@exemple.fr",
            "subject": "Compte-rendu",
            "body": "Bonjour,\n\nVoici le compte-rendu."
        })
    }

    #[tokio::test]
    async fn test_compose_then_send_uses_draft() {
        let draft = new_draft_box();
        let transport = Arc::new(RecordingTransport {
            sent: Mutex::new(Vec::new()),
        });
        let compose = ComposeEmailTool::new(draft.clone());
        let send = SendEmailTool::new(draft.clone(), transport.clone());

        let preview = compose.execute(compose_args()).await.unwrap();
        assert!(preview.contains("Brouillon"));
        assert!(draft.lock().unwrap().is_some());

        let out = send.execute(serde_json::json!({})).await.unwrap();
        assert!(out.contains("quentin@exemple.fr"));
        assert_eq!(transport.sent.lock().unwrap().len(), 1);
        // 发送成功后草稿清空
        assert!(draft.lock().unwrap().is_none());
    }

    #[tokio::test]
    async fn test_send_without_draft_fails() {
        let send = SendEmailTool::new(
            new_draft_box(),
            Arc::new(RecordingTransport {
                sent: Mutex::new(Vec::new()),
            }),
        );
        let err = send.execute(serde_json::json!({})).await.unwrap_err();
        assert!(err.contains("brouillon"));
    }

    #[tokio::test]
    async fn test_transport_failure_keeps_draft() {
        let draft = new_draft_box();
        let compose = ComposeEmailTool::new(draft.clone());
        let send = SendEmailTool::new(draft.clone(), Arc::new(FailingTransport));

        compose.execute(compose_args()).await.unwrap();
        let err = send.execute(serde_json::json!({})).await.unwrap_err();
        assert!(err.contains("SMTP"));
        // 失败时草稿保留，用户可重试
        assert!(draft.lock().unwrap().is_some());
    }

    #[tokio::test]
    async fn test_outbox_mailer_writes_file() {
        let dir = tempfile::tempdir().unwrap();
        let mailer = OutboxMailer::new(dir.path());
        let path = mailer
            .deliver(&EmailDraft {
                recipient: "a@b.fr".into(),
                subject: "Test".into(),
                body: "corps".into(),
            })
            .await
            .unwrap();
        let written = std::fs::read_to_string(&path).unwrap();
        assert!(written.contains("a@b.fr"));
        assert!(written.contains("corps"));
    }
}
