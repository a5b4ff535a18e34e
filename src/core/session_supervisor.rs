//! 会话监管：会话与初始化尝试的生命周期
//!
//! 钱包首次报告地址时开启会话，断开时结束。每次初始化尝试持有一个子 token，
//! 新尝试开始或会话结束时取消旧 token，迟到的结果按尝试编号丢弃。

use tokio_util::sync::CancellationToken;

#[derive(Debug)]
struct ActiveSession {
    id: String,
    address: String,
    token: CancellationToken,
}

/// 会话级生命周期管理
#[derive(Debug)]
pub struct SessionSupervisor {
    /// 编排器整体关闭时触发
    root: CancellationToken,
    session: Option<ActiveSession>,
    attempt: u64,
    attempt_token: CancellationToken,
}

impl SessionSupervisor {
    pub fn new(root: CancellationToken) -> Self {
        let attempt_token = root.child_token();
        Self {
            root,
            session: None,
            attempt: 0,
            attempt_token,
        }
    }

    /// 开启新会话（会先结束旧会话），返回会话 ID
    pub fn start(&mut self, address: &str) -> String {
        self.end();
        let id = uuid::Uuid::new_v4().to_string();
        self.session = Some(ActiveSession {
            id: id.clone(),
            address: address.to_string(),
            token: self.root.child_token(),
        });
        id
    }

    /// 结束会话：取消会话下所有尝试
    pub fn end(&mut self) {
        self.attempt_token.cancel();
        if let Some(session) = self.session.take() {
            session.token.cancel();
        }
    }

    pub fn is_active(&self) -> bool {
        self.session.is_some()
    }

    pub fn session_id(&self) -> Option<&str> {
        self.session.as_ref().map(|s| s.id.as_str())
    }

    pub fn address(&self) -> Option<&str> {
        self.session.as_ref().map(|s| s.address.as_str())
    }

    /// 开始新尝试：取消上一尝试，返回新编号与其取消令牌
    pub fn next_attempt(&mut self) -> (u64, CancellationToken) {
        self.attempt_token.cancel();
        self.attempt += 1;
        let parent = self
            .session
            .as_ref()
            .map(|s| &s.token)
            .unwrap_or(&self.root);
        self.attempt_token = parent.child_token();
        (self.attempt, self.attempt_token.clone())
    }

    /// 放弃当前尝试但不开启新尝试
    pub fn cancel_attempt(&mut self) {
        self.attempt_token.cancel();
    }

    pub fn current_attempt(&self) -> u64 {
        self.attempt
    }

    /// 迟到结果过滤
    pub fn is_current(&self, attempt: u64) -> bool {
        attempt == self.attempt && !self.attempt_token.is_cancelled()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_next_attempt_cancels_previous() {
        let mut supervisor = SessionSupervisor::new(CancellationToken::new());
        supervisor.start("0xAAA");
        let (first, first_token) = supervisor.next_attempt();
        let (second, second_token) = supervisor.next_attempt();
        assert!(first_token.is_cancelled());
        assert!(!second_token.is_cancelled());
        assert!(!supervisor.is_current(first));
        assert!(supervisor.is_current(second));
    }

    #[test]
    fn test_end_cancels_attempt() {
        let mut supervisor = SessionSupervisor::new(CancellationToken::new());
        let id = supervisor.start("0xAAA");
        assert_eq!(supervisor.session_id(), Some(id.as_str()));
        assert_eq!(supervisor.address(), Some("0xAAA"));
        let (attempt, token) = supervisor.next_attempt();
        supervisor.end();
        assert!(token.is_cancelled());
        assert!(!supervisor.is_current(attempt));
        assert!(!supervisor.is_active());
    }

    #[test]
    fn test_cancel_attempt_marks_stale() {
        let mut supervisor = SessionSupervisor::new(CancellationToken::new());
        supervisor.start("0xAAA");
        let (attempt, token) = supervisor.next_attempt();
        supervisor.cancel_attempt();
        assert!(token.is_cancelled());
        assert!(!supervisor.is_current(attempt));
        assert!(supervisor.is_active());
    }

    #[test]
    fn test_root_cancel_propagates() {
        let root = CancellationToken::new();
        let mut supervisor = SessionSupervisor::new(root.clone());
        supervisor.start("0xAAA");
        let (_, token) = supervisor.next_attempt();
        root.cancel();
        assert!(token.is_cancelled());
    }
}
