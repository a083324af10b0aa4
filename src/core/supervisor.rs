//! 会话监管：中断管理
//!
//! 每轮开始时 renew 换发新的 CancellationToken，用户 Ctrl+C 时 cancel 当前轮。
//! 中断只打断进行中的 Thinking/ToolExecuting，已追加的消息保留。

use std::sync::Mutex;

use tokio_util::sync::CancellationToken;

/// 会话级中断管理：持有当前轮的取消令牌
#[derive(Debug, Default)]
pub struct SessionSupervisor {
    token: Mutex<CancellationToken>,
}

impl SessionSupervisor {
    pub fn new() -> Self {
        Self::default()
    }

    /// 开始新一轮：换发新令牌并返回其克隆
    pub fn renew(&self) -> CancellationToken {
        let fresh = CancellationToken::new();
        let mut guard = self.token.lock().unwrap();
        *guard = fresh.clone();
        fresh
    }

    /// 当前轮令牌的克隆
    pub fn current(&self) -> CancellationToken {
        self.token.lock().unwrap().clone()
    }

    /// 触发取消（用户 Ctrl+C）
    pub fn cancel(&self) {
        self.token.lock().unwrap().cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_renew_detaches_previous_turn() {
        let supervisor = SessionSupervisor::new();
        let first = supervisor.renew();
        supervisor.cancel();
        assert!(first.is_cancelled());

        let second = supervisor.renew();
        assert!(!second.is_cancelled());
        supervisor.cancel();
        assert!(second.is_cancelled());
    }
}
