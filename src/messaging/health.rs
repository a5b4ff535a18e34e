//! 消息客户端健康报告与周期性健康监控
//!
//! HealthMonitor 在进入 ready 后立即检查一次，此后按固定间隔检查，
//! 离开 ready 或销毁时取消定时器。报告只用于展示与建议，从不自动执行破坏性动作。

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;

use crate::core::{RecoveryAction, ScheduledTask};
use crate::messaging::{LocalStateDiagnostics, MessagingClientManager, SequenceIdStatus};

/// 健康报告
///
/// 不变式：序列号损坏 => 建议 Reset；is_healthy => 建议 None。
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct HealthReport {
    pub is_healthy: bool,
    pub issues: Vec<String>,
    pub recommended_action: RecoveryAction,
    pub sequence_id_status: SequenceIdStatus,
    pub last_sync_timestamp: Option<i64>,
    /// 客户端未初始化时为 false，报告不参与健康度计算
    pub applicable: bool,
    pub checked_at: i64,
}

impl HealthReport {
    pub fn from_diagnostics(diag: LocalStateDiagnostics) -> Self {
        let mut issues = diag.issues;
        if !diag.database_ok {
            issues.push("Local message database is not accessible".to_string());
        }
        let recommended_action = match diag.sequence_id {
            SequenceIdStatus::Corrupted => {
                issues.push("Sequence ID is corrupted".to_string());
                RecoveryAction::Reset
            }
            SequenceIdStatus::Missing => {
                issues.push("Sequence ID is missing".to_string());
                RecoveryAction::Repair
            }
            SequenceIdStatus::Valid if !issues.is_empty() => RecoveryAction::Repair,
            SequenceIdStatus::Valid => RecoveryAction::None,
        };
        Self {
            is_healthy: recommended_action == RecoveryAction::None,
            issues,
            recommended_action,
            sequence_id_status: diag.sequence_id,
            last_sync_timestamp: diag.last_sync_timestamp,
            applicable: true,
            checked_at: chrono::Utc::now().timestamp_millis(),
        }
    }

    /// 客户端尚未初始化
    pub fn not_applicable() -> Self {
        Self {
            is_healthy: false,
            issues: vec!["Messaging client is not initialized".to_string()],
            recommended_action: RecoveryAction::None,
            sequence_id_status: SequenceIdStatus::Missing,
            last_sync_timestamp: None,
            applicable: false,
            checked_at: chrono::Utc::now().timestamp_millis(),
        }
    }

    /// 健康检查本身失败（如超时）
    pub fn check_failed(reason: impl Into<String>) -> Self {
        Self {
            is_healthy: false,
            issues: vec![reason.into()],
            recommended_action: RecoveryAction::Repair,
            sequence_id_status: SequenceIdStatus::Missing,
            last_sync_timestamp: None,
            applicable: true,
            checked_at: chrono::Utc::now().timestamp_millis(),
        }
    }
}

/// 监控间隔下限；tokio interval 不接受零周期
const MIN_INTERVAL: Duration = Duration::from_millis(10);

/// 周期性健康监控
#[derive(Debug)]
pub struct HealthMonitor {
    interval: Duration,
    task: ScheduledTask,
}

impl HealthMonitor {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval: interval.max(MIN_INTERVAL),
            task: ScheduledTask::new("health-monitor"),
        }
    }

    /// 启动监控：立即检查一次，随后每个 interval 检查；重复调用会替换旧循环
    pub fn start<F>(&mut self, manager: Arc<MessagingClientManager>, on_report: F)
    where
        F: Fn(HealthReport) + Send + Sync + 'static,
    {
        let interval = self.interval;
        tracing::info!("Health monitor started (interval {:?})", interval);
        self.task.schedule(Duration::ZERO, async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let report = manager.perform_health_check().await;
                if !report.is_healthy {
                    tracing::warn!(
                        "Messaging health check found issues: {:?} (recommended: {:?})",
                        report.issues,
                        report.recommended_action
                    );
                }
                on_report(report);
            }
        });
    }

    pub fn stop(&mut self) {
        if self.task.is_pending() {
            tracing::info!("Health monitor stopped");
        }
        self.task.cancel();
    }
}
