//! 状态定义：连接阶段、初始化进度、依赖就绪度与整体健康度
//!
//! 编排器独占 InitializationState；DependencyReadiness 由下层计算后只读传入。
//! ConnectionStatus 是投影给 UI 的只读快照。

use serde::Serialize;

use crate::core::{RecoveryAction, UserInteractionState};
use crate::messaging::HealthReport;

/// 连接阶段：按声明顺序线性推进，Failed 可从任意非终态进入
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionPhase {
    Idle,
    WalletConnecting,
    MessagingStarting,
    MessagingDatabaseCheck,
    MessagingClientCreation,
    MessagingSyncValidation,
    Ready,
    Failed,
}

impl ConnectionPhase {
    /// Ready / Failed 对当前一次尝试而言是终态
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Ready | Self::Failed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::WalletConnecting => "wallet_connecting",
            Self::MessagingStarting => "messaging_starting",
            Self::MessagingDatabaseCheck => "messaging_database_check",
            Self::MessagingClientCreation => "messaging_client_creation",
            Self::MessagingSyncValidation => "messaging_sync_validation",
            Self::Ready => "ready",
            Self::Failed => "failed",
        }
    }
}

/// 单次尝试内的初始化状态
///
/// 进度在一次尝试内单调不减；进入 Failed 时冻结，显式 reset 时归零。
/// 进度为 100 当且仅当阶段为 Ready。
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct InitializationState {
    phase: ConnectionPhase,
    progress: u8,
    current_operation: String,
    issues: Vec<String>,
}

impl Default for InitializationState {
    fn default() -> Self {
        Self {
            phase: ConnectionPhase::Idle,
            progress: 0,
            current_operation: "Waiting for wallet".to_string(),
            issues: Vec::new(),
        }
    }
}

impl InitializationState {
    pub fn phase(&self) -> ConnectionPhase {
        self.phase
    }

    pub fn progress(&self) -> u8 {
        self.progress
    }

    pub fn current_operation(&self) -> &str {
        &self.current_operation
    }

    pub fn issues(&self) -> &[String] {
        &self.issues
    }

    /// 开始新的一次尝试：进度基线归零，阶段回到起点
    pub fn begin_attempt(&mut self, phase: ConnectionPhase) {
        self.phase = phase;
        self.progress = 0;
        self.issues.clear();
    }

    /// 非终态推进：阶段与进度只前进不后退；终态下忽略
    pub fn advance(&mut self, phase: ConnectionPhase, progress: u8, operation: &str, issues: Vec<String>) {
        if self.phase.is_terminal() {
            return;
        }
        debug_assert!(!phase.is_terminal());
        self.phase = self.phase.max(phase);
        self.progress = self.progress.max(progress.min(99));
        self.current_operation = operation.to_string();
        self.issues = issues;
    }

    /// 进入 Failed：进度冻结
    pub fn fail(&mut self, operation: impl Into<String>, issue: Option<String>) {
        self.phase = ConnectionPhase::Failed;
        self.current_operation = operation.into();
        if let Some(issue) = issue {
            if !self.issues.contains(&issue) {
                self.issues.push(issue);
            }
        }
    }

    pub fn complete(&mut self) {
        self.phase = ConnectionPhase::Ready;
        self.progress = 100;
        self.current_operation = "All systems ready".to_string();
        self.issues.clear();
    }

    /// 会话结束或显式重置
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    pub(crate) fn set_issues(&mut self, issues: Vec<String>) {
        self.issues = issues;
    }
}

/// 三个被编排的依赖
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Dependency {
    Wallet,
    Messaging,
    Agent,
}

impl Dependency {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Wallet => "wallet",
            Self::Messaging => "messaging",
            Self::Agent => "agent",
        }
    }
}

/// 单个组件的三态健康度
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ComponentHealth {
    Healthy,
    Degraded,
    Error,
}

/// 依赖就绪度：ready 为 true 时 health 一定不是 Error
///
/// progress 为依赖自身的启动进度（0-100），只有 ready 时为 100。
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DependencyReadiness {
    health: ComponentHealth,
    ready: bool,
    progress: u8,
    detail: Option<String>,
}

impl DependencyReadiness {
    /// 尚未开始
    pub fn pending() -> Self {
        Self {
            health: ComponentHealth::Degraded,
            ready: false,
            progress: 0,
            detail: None,
        }
    }

    /// 正在启动，进度上限 99
    pub fn initializing(progress: u8) -> Self {
        Self {
            health: ComponentHealth::Degraded,
            ready: false,
            progress: progress.min(99),
            detail: None,
        }
    }

    pub fn ready() -> Self {
        Self {
            health: ComponentHealth::Healthy,
            ready: true,
            progress: 100,
            detail: None,
        }
    }

    /// 可用但降级（如 agent 需要配置）
    pub fn ready_degraded(detail: impl Into<String>) -> Self {
        Self {
            health: ComponentHealth::Degraded,
            ready: true,
            progress: 100,
            detail: Some(detail.into()),
        }
    }

    pub fn failed(detail: impl Into<String>) -> Self {
        Self {
            health: ComponentHealth::Error,
            ready: false,
            progress: 0,
            detail: Some(detail.into()),
        }
    }

    pub fn health(&self) -> ComponentHealth {
        self.health
    }

    pub fn is_ready(&self) -> bool {
        self.ready
    }

    pub fn progress(&self) -> u8 {
        self.progress
    }

    pub fn detail(&self) -> Option<&str> {
        self.detail.as_deref()
    }

    /// 就绪时降级（健康检查发现问题），不影响 ready
    pub(crate) fn degrade(mut self) -> Self {
        if self.health == ComponentHealth::Healthy {
            self.health = ComponentHealth::Degraded;
        }
        self
    }
}

/// 整体健康等级
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthTier {
    Healthy,
    Degraded,
    Critical,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct ComponentsHealth {
    pub wallet: ComponentHealth,
    pub messaging: ComponentHealth,
    pub agent: ComponentHealth,
}

/// 整体健康度：>=2 个 Error 为 Critical；恰 1 个 Error 或 >=2 个 Degraded 为 Degraded
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct OverallHealth {
    pub overall: HealthTier,
    pub components: ComponentsHealth,
}

impl OverallHealth {
    pub fn from_components(wallet: ComponentHealth, messaging: ComponentHealth, agent: ComponentHealth) -> Self {
        let all = [wallet, messaging, agent];
        let errors = all.iter().filter(|c| **c == ComponentHealth::Error).count();
        let degraded = all.iter().filter(|c| **c == ComponentHealth::Degraded).count();
        let overall = if errors >= 2 {
            HealthTier::Critical
        } else if errors == 1 || degraded >= 2 {
            HealthTier::Degraded
        } else {
            HealthTier::Healthy
        };
        Self {
            overall,
            components: ComponentsHealth {
                wallet,
                messaging,
                agent,
            },
        }
    }

    /// 按健康度分组的服务名
    pub fn services(&self) -> ServiceSummary {
        let mut summary = ServiceSummary::default();
        let c = &self.components;
        for (dep, health) in [
            (Dependency::Wallet, c.wallet),
            (Dependency::Messaging, c.messaging),
            (Dependency::Agent, c.agent),
        ] {
            let bucket = match health {
                ComponentHealth::Healthy => &mut summary.healthy,
                ComponentHealth::Degraded => &mut summary.degraded,
                ComponentHealth::Error => &mut summary.failed,
            };
            bucket.push(dep.as_str());
        }
        summary
    }
}

impl Default for OverallHealth {
    fn default() -> Self {
        Self::from_components(
            ComponentHealth::Degraded,
            ComponentHealth::Degraded,
            ComponentHealth::Degraded,
        )
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct ServiceSummary {
    pub healthy: Vec<&'static str>,
    pub degraded: Vec<&'static str>,
    pub failed: Vec<&'static str>,
}

/// 投影给 UI 的只读状态快照
#[derive(Clone, Debug, Serialize)]
pub struct ConnectionStatus {
    pub is_ready: bool,
    pub progress: u8,
    pub current_step: String,
    pub error: Option<String>,
    pub system_health: OverallHealth,
    pub phase: ConnectionPhase,
    pub issues: Vec<String>,
    pub recommended_action: RecoveryAction,
    pub health_report: Option<HealthReport>,
    pub user_interaction: UserInteractionState,
    pub session_id: Option<String>,
    /// Unix 毫秒
    pub updated_at: i64,
}

impl ConnectionStatus {
    pub fn initial(user_interaction: UserInteractionState) -> Self {
        let init = InitializationState::default();
        Self {
            is_ready: false,
            progress: init.progress(),
            current_step: init.current_operation().to_string(),
            error: None,
            system_health: OverallHealth::default(),
            phase: init.phase(),
            issues: Vec::new(),
            recommended_action: RecoveryAction::None,
            health_report: None,
            user_interaction,
            session_id: None,
            updated_at: chrono::Utc::now().timestamp_millis(),
        }
    }
}
