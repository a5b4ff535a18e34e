//! EchoFi - 连接生命周期编排
//!
//! 钱包连接后依次拉起安全消息客户端与自动执行 Agent，把三者的就绪度聚合为
//! 单一进度与健康度，并在有限的重试预算内从瞬时故障中恢复。
//!
//! 模块划分：
//! - **agent**: Agent 健康探测（HTTP / 静态）
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **core**: 错误分类、重试预算、状态、聚合、会话监管、主控循环
//! - **messaging**: 消息客户端能力、生命周期管理与健康监控
//! - **observability**: 日志初始化
//! - **wallet**: 钱包与签名者能力

pub mod agent;
pub mod config;
pub mod core;
pub mod messaging;
pub mod observability;
pub mod wallet;
