//! 核心编排层：错误分类、重试预算、状态投影、依赖聚合、会话监管、任务调度、主控循环

pub mod aggregator;
pub mod classifier;
pub mod error;
pub mod orchestrator;
pub mod retry;
pub mod session_supervisor;
pub mod shutdown;
pub mod state;
pub mod task_scheduler;

pub use classifier::ErrorClassifier;
pub use error::{ClassifiedError, ErrorKind, OrchestratorError, RecoveryAction};
pub use orchestrator::{Command, ConnectionOrchestrator, OrchestratorConfig, OrchestratorHandle};
pub use retry::{RetryBudget, RetryPolicy, UserInteractionState};
pub use session_supervisor::SessionSupervisor;
pub use shutdown::{ShutdownManager, ShutdownReason};
pub use state::{
    ComponentHealth, ComponentsHealth, ConnectionPhase, ConnectionStatus, Dependency,
    DependencyReadiness, HealthTier, InitializationState, OverallHealth, ServiceSummary,
};
pub use task_scheduler::ScheduledTask;
