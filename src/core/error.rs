//! 错误分类与恢复动作
//!
//! 所有子系统的原始错误在边界处经 ErrorClassifier 归类为 ErrorKind，
//! 编排器只按 ErrorKind 分支，不再匹配原始文本。

use std::fmt;

use serde::Serialize;
use thiserror::Error;

/// 错误分类（封闭集合）
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// 用户拒绝签名 / 拒绝请求，只能由用户重新操作恢复
    UserDeclined,
    /// 网络抖动、超时，可在预算内自动重试
    TransientNetwork,
    /// 本地持久化状态损坏（如序列号不一致），需要显式 repair / reset
    LocalCorruption,
    /// 依赖未配置，只降级该依赖
    NotConfigured,
    /// 未知错误：重试策略同 TransientNetwork，但单独记录日志
    Unknown,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::UserDeclined => "user_declined",
            Self::TransientNetwork => "transient_network",
            Self::LocalCorruption => "local_corruption",
            Self::NotConfigured => "not_configured",
            Self::Unknown => "unknown",
        }
    }

    /// 是否允许进入自动重试预算
    pub fn is_auto_retryable(self) -> bool {
        matches!(self, Self::TransientNetwork | Self::Unknown)
    }

    /// 该类错误对应的建议动作
    pub fn recovery_action(self) -> RecoveryAction {
        match self {
            Self::LocalCorruption => RecoveryAction::Reset,
            _ => RecoveryAction::None,
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 面向 UI 的恢复建议；Reset 为破坏性动作，永远不会被自动调用
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RecoveryAction {
    #[default]
    None,
    /// 非破坏性修复（如修复序列号）
    Repair,
    /// 丢弃本地状态后冷启动
    Reset,
}

/// 依赖调用错误：已分类的错误 + 原始信息（钱包、消息客户端、Agent 共用）
#[derive(Error, Clone, Debug, PartialEq, Eq)]
#[error("{kind}: {message}")]
pub struct ClassifiedError {
    pub kind: ErrorKind,
    pub message: String,
}

impl ClassifiedError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// 在边界处对原始错误文本归类
    pub fn classify(raw: impl Into<String>) -> Self {
        let message = raw.into();
        let kind = crate::core::ErrorClassifier::classify(&message);
        Self { kind, message }
    }
}

/// 编排器对外动作的错误
#[derive(Error, Debug)]
pub enum OrchestratorError {
    #[error("Messaging error: {0}")]
    Messaging(#[from] ClassifiedError),

    #[error("Repair failed, reset required: {0}")]
    RepairFailed(ClassifiedError),

    #[error("Orchestrator stopped")]
    Closed,
}

impl OrchestratorError {
    /// 失败后 UI 应提供的动作
    pub fn recovery_action(&self) -> RecoveryAction {
        match self {
            Self::Messaging(e) => e.kind.recovery_action(),
            Self::RepairFailed(_) => RecoveryAction::Reset,
            Self::Closed => RecoveryAction::None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_kinds() {
        assert!(ErrorKind::TransientNetwork.is_auto_retryable());
        assert!(ErrorKind::Unknown.is_auto_retryable());
        assert!(!ErrorKind::UserDeclined.is_auto_retryable());
        assert!(!ErrorKind::LocalCorruption.is_auto_retryable());
        assert!(!ErrorKind::NotConfigured.is_auto_retryable());
    }

    #[test]
    fn test_classify_at_boundary() {
        let err = ClassifiedError::classify("User rejected the request.");
        assert_eq!(err.kind, ErrorKind::UserDeclined);
        assert_eq!(err.to_string(), "user_declined: User rejected the request.");
    }

    #[test]
    fn test_repair_failure_recommends_reset() {
        let err = OrchestratorError::RepairFailed(ClassifiedError::new(
            ErrorKind::LocalCorruption,
            "sequence id still corrupted",
        ));
        assert_eq!(err.recovery_action(), RecoveryAction::Reset);
        assert_eq!(OrchestratorError::Closed.recovery_action(), RecoveryAction::None);
    }
}
