//! 安全消息客户端：能力抽象、生命周期管理、健康报告与监控

pub mod client;
pub mod health;
pub mod manager;
pub mod mock;

pub use client::{ClientIdentity, LocalStateDiagnostics, MessagingClient, SequenceIdStatus};
pub use health::{HealthMonitor, HealthReport};
pub use manager::{MessagingClientManager, MessagingStep};
pub use mock::{InitOutcome, MockMessagingClient};
