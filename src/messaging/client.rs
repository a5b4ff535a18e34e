//! 安全消息客户端能力抽象
//!
//! 底层协议与加密由外部实现；这里只约定生命周期相关的调用。
//! 所有方法返回原始错误文本，由 MessagingClientManager 在边界处归类。

use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;

use crate::wallet::MessageSigner;

/// 本地序列号（消息顺序计数器）状态
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SequenceIdStatus {
    Valid,
    Missing,
    Corrupted,
}

/// 本地持久化状态诊断结果
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LocalStateDiagnostics {
    pub sequence_id: SequenceIdStatus,
    /// 本地数据库是否可读写
    pub database_ok: bool,
    pub last_sync_timestamp: Option<i64>,
    pub issues: Vec<String>,
}

impl LocalStateDiagnostics {
    pub fn healthy(last_sync_timestamp: Option<i64>) -> Self {
        Self {
            sequence_id: SequenceIdStatus::Valid,
            database_ok: true,
            last_sync_timestamp,
            issues: Vec::new(),
        }
    }
}

/// 初始化成功后的客户端身份
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ClientIdentity {
    pub inbox_id: String,
    pub address: String,
}

/// 消息客户端能力
#[async_trait]
pub trait MessagingClient: Send + Sync {
    /// 创建客户端；通常会请求一次签名
    async fn initialize_client(&self, signer: Arc<dyn MessageSigner>) -> Result<ClientIdentity, String>;

    async fn send_message(&self, conversation_id: &str, body: &str) -> Result<(), String>;

    async fn list_conversations(&self) -> Result<Vec<String>, String>;

    /// 与远端同步，返回同步完成时间（Unix 毫秒）
    async fn sync_state(&self) -> Result<i64, String>;

    /// 只读检查本地持久化状态
    async fn check_local_state_health(&self) -> Result<LocalStateDiagnostics, String>;

    /// 非破坏性修复序列号
    async fn repair_local_state(&self) -> Result<(), String>;

    /// 丢弃本地持久化状态
    async fn reset_local_state(&self) -> Result<(), String>;
}
