//! 自动重试预算与用户交互追踪
//!
//! 记录签名拒绝、自动重试次数与冷却窗口，决定当前是否允许自动重试，
//! 避免网络抖动或用户拒绝签名导致无限弹窗。

use std::time::{Duration, Instant};

use serde::Serialize;

/// 自动重试策略
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_auto_retry_attempts: u32,
    /// 两次自动重试之间的最小间隔
    pub cooldown: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_auto_retry_attempts: 2,
            cooldown: Duration::from_secs(30),
        }
    }
}

/// 用户交互状态，由编排器独占
#[derive(Clone, Debug, Serialize)]
pub struct UserInteractionState {
    pub has_rejected_signature: bool,
    #[serde(skip)]
    pub last_rejection_time: Option<Instant>,
    pub auto_retry_attempts: u32,
    pub max_auto_retry_attempts: u32,
    #[serde(skip)]
    pub last_auto_retry_time: Option<Instant>,
    pub manual_retry_requested: bool,
}

impl UserInteractionState {
    pub fn new(policy: &RetryPolicy) -> Self {
        Self::fresh(policy.max_auto_retry_attempts)
    }

    /// 用户拒绝签名；不计入自动重试次数
    pub fn record_rejection(&mut self, now: Instant) {
        self.has_rejected_signature = true;
        self.last_rejection_time = Some(now);
        self.manual_retry_requested = false;
    }

    /// 在发起自动重试之前调用：先计数、打时间戳，再执行
    pub fn record_auto_retry(&mut self, now: Instant) {
        self.auto_retry_attempts += 1;
        self.last_auto_retry_time = Some(now);
    }

    /// 撤销已计数但未执行的自动重试，恢复计数前的时间戳
    pub fn revoke_auto_retry(&mut self, previous: Option<Instant>) {
        self.auto_retry_attempts = self.auto_retry_attempts.saturating_sub(1);
        self.last_auto_retry_time = previous;
    }

    /// 手动重试：清空拒绝与计数，并标记为用户主动请求
    pub fn request_manual_retry(&mut self) {
        *self = Self {
            manual_retry_requested: true,
            ..Self::fresh(self.max_auto_retry_attempts)
        };
    }

    /// 进入 ready：归零计数、清除拒绝标记
    pub fn mark_ready(&mut self) {
        self.auto_retry_attempts = 0;
        self.last_auto_retry_time = None;
        self.has_rejected_signature = false;
        self.last_rejection_time = None;
        self.manual_retry_requested = false;
    }

    fn fresh(max_auto_retry_attempts: u32) -> Self {
        Self {
            has_rejected_signature: false,
            last_rejection_time: None,
            auto_retry_attempts: 0,
            max_auto_retry_attempts,
            last_auto_retry_time: None,
            manual_retry_requested: false,
        }
    }
}

/// 自动重试许可判定
pub struct RetryBudget;

impl RetryBudget {
    /// 允许条件：未被拒绝（或用户已手动请求重试）、次数未用尽、距上次自动重试已过冷却期
    pub fn may_auto_retry(state: &UserInteractionState, policy: &RetryPolicy, now: Instant) -> bool {
        if state.has_rejected_signature && !state.manual_retry_requested {
            return false;
        }
        if state.auto_retry_attempts >= state.max_auto_retry_attempts {
            return false;
        }
        match state.last_auto_retry_time {
            Some(last) => now.saturating_duration_since(last) >= policy.cooldown,
            None => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> RetryPolicy {
        RetryPolicy {
            max_auto_retry_attempts: 2,
            cooldown: Duration::from_secs(30),
        }
    }

    #[test]
    fn test_first_retry_allowed() {
        let p = policy();
        let state = UserInteractionState::new(&p);
        assert!(RetryBudget::may_auto_retry(&state, &p, Instant::now()));
    }

    #[test]
    fn test_cooldown_blocks_second_retry() {
        let p = policy();
        let mut state = UserInteractionState::new(&p);
        let t0 = Instant::now();
        state.record_auto_retry(t0);
        assert!(!RetryBudget::may_auto_retry(&state, &p, t0 + Duration::from_secs(10)));
        assert!(RetryBudget::may_auto_retry(&state, &p, t0 + Duration::from_secs(30)));
    }

    #[test]
    fn test_budget_exhausted_after_two() {
        let p = policy();
        let mut state = UserInteractionState::new(&p);
        let t0 = Instant::now();
        state.record_auto_retry(t0);
        state.record_auto_retry(t0 + Duration::from_secs(31));
        assert_eq!(state.auto_retry_attempts, 2);
        assert!(!RetryBudget::may_auto_retry(&state, &p, t0 + Duration::from_secs(120)));
    }

    #[test]
    fn test_rejection_blocks_until_manual_retry() {
        let p = policy();
        let mut state = UserInteractionState::new(&p);
        let now = Instant::now();
        state.record_rejection(now);
        assert_eq!(state.auto_retry_attempts, 0);
        assert!(!RetryBudget::may_auto_retry(&state, &p, now + Duration::from_secs(600)));

        state.request_manual_retry();
        assert!(state.manual_retry_requested);
        assert!(!state.has_rejected_signature);
        assert!(RetryBudget::may_auto_retry(&state, &p, now));
    }

    #[test]
    fn test_manual_retry_overrides_rejection_flag() {
        let p = policy();
        let mut state = UserInteractionState::new(&p);
        state.has_rejected_signature = true;
        state.manual_retry_requested = true;
        assert!(RetryBudget::may_auto_retry(&state, &p, Instant::now()));
    }

    #[test]
    fn test_revoked_retry_restores_budget() {
        let p = policy();
        let mut state = UserInteractionState::new(&p);
        let t0 = Instant::now();
        state.record_auto_retry(t0);
        let previous = state.last_auto_retry_time;
        state.record_auto_retry(t0 + Duration::from_secs(31));

        state.revoke_auto_retry(previous);
        assert_eq!(state.auto_retry_attempts, 1);
        assert_eq!(state.last_auto_retry_time, Some(t0));
        assert!(RetryBudget::may_auto_retry(&state, &p, t0 + Duration::from_secs(31)));
    }

    #[test]
    fn test_mark_ready_clears_counters() {
        let p = policy();
        let mut state = UserInteractionState::new(&p);
        let now = Instant::now();
        state.record_auto_retry(now);
        state.record_rejection(now);
        state.mark_ready();
        assert_eq!(state.auto_retry_attempts, 0);
        assert!(!state.has_rejected_signature);
        assert_eq!(state.max_auto_retry_attempts, 2);
    }
}
