//! 依赖状态聚合：钱包 / 消息 / Agent 就绪度 + 健康报告 => 进度、步骤标签、整体健康度
//!
//! 纯函数，无 I/O、无定时器。启动是线性的：某个依赖的进度只有在它之前的依赖都就绪后才计入。
//! 权重：钱包 30，消息 35（累计 65），Agent 35（累计 100）。

use crate::core::{DependencyReadiness, HealthTier, OverallHealth};
use crate::messaging::HealthReport;

pub const WALLET_WEIGHT: u8 = 30;
pub const MESSAGING_WEIGHT: u8 = 35;
pub const AGENT_WEIGHT: u8 = 35;

/// 聚合结果：InitializationState 片段 + 整体健康度
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Aggregate {
    pub progress: u8,
    pub current_operation: &'static str,
    pub issues: Vec<String>,
    pub health: OverallHealth,
    pub all_ready: bool,
}

fn credit(weight: u8, readiness: &DependencyReadiness) -> u8 {
    if readiness.is_ready() {
        weight
    } else {
        (u16::from(weight) * u16::from(readiness.progress()) / 100) as u8
    }
}

pub fn aggregate(
    wallet: &DependencyReadiness,
    messaging: &DependencyReadiness,
    agent: &DependencyReadiness,
    report: Option<&HealthReport>,
) -> Aggregate {
    let mut progress = credit(WALLET_WEIGHT, wallet);
    if wallet.is_ready() {
        progress += credit(MESSAGING_WEIGHT, messaging);
        if messaging.is_ready() {
            progress += credit(AGENT_WEIGHT, agent);
        }
    }
    let all_ready = wallet.is_ready() && messaging.is_ready() && agent.is_ready();
    debug_assert_eq!(progress == 100, all_ready);

    let current_operation = if !wallet.is_ready() {
        "Connecting wallet"
    } else if !messaging.is_ready() {
        "Starting secure messaging"
    } else if !agent.is_ready() {
        "Checking agent status"
    } else {
        "All systems ready"
    };

    let mut issues = Vec::new();
    for (name, dep) in [("Wallet", wallet), ("Messaging", messaging), ("Agent", agent)] {
        if let Some(detail) = dep.detail() {
            issues.push(format!("{name}: {detail}"));
        }
    }

    // 只有在消息客户端就绪时，健康报告才参与计算
    let unhealthy_report = report
        .filter(|r| r.applicable && !r.is_healthy && messaging.is_ready());
    let messaging_readiness = match unhealthy_report {
        Some(r) => {
            issues.extend(r.issues.iter().cloned());
            messaging.clone().degrade()
        }
        None => messaging.clone(),
    };

    let mut health = OverallHealth::from_components(
        wallet.health(),
        messaging_readiness.health(),
        agent.health(),
    );
    if unhealthy_report.is_some() && health.overall == HealthTier::Healthy {
        health.overall = HealthTier::Degraded;
    }

    Aggregate {
        progress,
        current_operation,
        issues,
        health,
        all_ready,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{ComponentHealth, RecoveryAction};
    use crate::messaging::{LocalStateDiagnostics, SequenceIdStatus};

    fn ready() -> DependencyReadiness {
        DependencyReadiness::ready()
    }

    fn pending() -> DependencyReadiness {
        DependencyReadiness::pending()
    }

    fn healthy_report() -> HealthReport {
        HealthReport::from_diagnostics(LocalStateDiagnostics::healthy(Some(1)))
    }

    fn corrupted_report() -> HealthReport {
        HealthReport::from_diagnostics(LocalStateDiagnostics {
            sequence_id: SequenceIdStatus::Corrupted,
            database_ok: true,
            last_sync_timestamp: None,
            issues: vec![],
        })
    }

    #[test]
    fn test_all_ready_is_100_and_healthy() {
        let agg = aggregate(&ready(), &ready(), &ready(), Some(&healthy_report()));
        assert_eq!(agg.progress, 100);
        assert!(agg.all_ready);
        assert_eq!(agg.health.overall, HealthTier::Healthy);
        assert_eq!(agg.current_operation, "All systems ready");
        assert!(agg.issues.is_empty());
    }

    #[test]
    fn test_nothing_started() {
        let agg = aggregate(&pending(), &pending(), &pending(), None);
        assert_eq!(agg.progress, 0);
        assert!(!agg.all_ready);
        assert_eq!(agg.health.overall, HealthTier::Degraded);
        assert_eq!(agg.current_operation, "Connecting wallet");
    }

    #[test]
    fn test_wallet_connecting_partial_credit() {
        let agg = aggregate(&DependencyReadiness::initializing(50), &pending(), &pending(), None);
        assert_eq!(agg.progress, 15);
    }

    #[test]
    fn test_messaging_client_creation_credit() {
        let agg = aggregate(&ready(), &DependencyReadiness::initializing(50), &pending(), None);
        assert_eq!(agg.progress, 47);
        assert_eq!(agg.current_operation, "Starting secure messaging");
    }

    #[test]
    fn test_agent_credit_gated_on_messaging() {
        // Agent 先就绪也不计入，直到消息客户端就绪
        let agg = aggregate(&ready(), &DependencyReadiness::initializing(50), &ready(), None);
        assert_eq!(agg.progress, 47);

        let agg = aggregate(&ready(), &ready(), &DependencyReadiness::initializing(50), None);
        assert_eq!(agg.progress, 82);
        assert_eq!(agg.current_operation, "Checking agent status");
    }

    #[test]
    fn test_messaging_credit_gated_on_wallet() {
        let agg = aggregate(&DependencyReadiness::initializing(50), &ready(), &ready(), None);
        assert_eq!(agg.progress, 15);
        assert!(!agg.all_ready);
    }

    #[test]
    fn test_progress_100_iff_all_ready() {
        let states = [
            pending(),
            DependencyReadiness::initializing(0),
            DependencyReadiness::initializing(50),
            DependencyReadiness::initializing(99),
            ready(),
            DependencyReadiness::ready_degraded("config"),
            DependencyReadiness::failed("err"),
        ];
        for w in &states {
            for m in &states {
                for a in &states {
                    let agg = aggregate(w, m, a, None);
                    let all = w.is_ready() && m.is_ready() && a.is_ready();
                    assert_eq!(agg.progress == 100, all, "{w:?} {m:?} {a:?}");
                    assert!(agg.progress <= 100);
                }
            }
        }
    }

    #[test]
    fn test_single_error_degrades_two_errors_critical() {
        let agg = aggregate(&ready(), &DependencyReadiness::failed("timeout"), &ready(), None);
        assert_eq!(agg.health.overall, HealthTier::Degraded);
        assert_eq!(agg.health.components.messaging, ComponentHealth::Error);
        assert_eq!(agg.issues, vec!["Messaging: timeout".to_string()]);

        let agg = aggregate(
            &DependencyReadiness::failed("rejected"),
            &DependencyReadiness::failed("timeout"),
            &ready(),
            None,
        );
        assert_eq!(agg.health.overall, HealthTier::Critical);
    }

    #[test]
    fn test_unhealthy_report_degrades_when_ready() {
        let report = corrupted_report();
        assert_eq!(report.recommended_action, RecoveryAction::Reset);
        let agg = aggregate(&ready(), &ready(), &ready(), Some(&report));
        // 健康报告不改变就绪与进度
        assert_eq!(agg.progress, 100);
        assert!(agg.all_ready);
        assert_eq!(agg.health.overall, HealthTier::Degraded);
        assert_eq!(agg.health.components.messaging, ComponentHealth::Degraded);
        assert!(agg.issues.iter().any(|i| i.contains("Sequence ID")));
    }

    #[test]
    fn test_report_ignored_when_not_applicable_or_not_ready() {
        let agg = aggregate(&ready(), &ready(), &ready(), Some(&HealthReport::not_applicable()));
        assert_eq!(agg.health.overall, HealthTier::Healthy);

        let agg = aggregate(&ready(), &DependencyReadiness::initializing(30), &pending(), Some(&corrupted_report()));
        assert!(agg.issues.is_empty());
    }

    #[test]
    fn test_configuration_needed_agent_is_ready_but_degraded() {
        let agg = aggregate(
            &ready(),
            &ready(),
            &DependencyReadiness::ready_degraded("Agent configuration needed"),
            None,
        );
        assert_eq!(agg.progress, 100);
        assert_eq!(agg.health.overall, HealthTier::Healthy);
        assert_eq!(agg.health.components.agent, ComponentHealth::Degraded);
        assert_eq!(agg.issues.len(), 1);
    }
}
