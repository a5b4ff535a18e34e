//! 钱包能力抽象
//!
//! 连接协议与签名机制由外部实现；编排器只关心连接状态快照与签名者。

pub mod mock;

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::watch;

use crate::core::DependencyReadiness;

pub use mock::{MockSigner, MockWallet};

/// 签名者：消息客户端创建身份时会请求一次签名
#[async_trait]
pub trait MessageSigner: Send + Sync {
    fn address(&self) -> &str;

    async fn sign_message(&self, message: &[u8]) -> Result<Vec<u8>, String>;
}

/// 钱包状态快照
#[derive(Clone, Default)]
pub struct WalletState {
    pub is_connected: bool,
    pub is_connecting: bool,
    pub address: Option<String>,
    pub chain_id: Option<u64>,
    pub signer: Option<Arc<dyn MessageSigner>>,
    pub error: Option<String>,
}

impl fmt::Debug for WalletState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WalletState")
            .field("is_connected", &self.is_connected)
            .field("is_connecting", &self.is_connecting)
            .field("address", &self.address)
            .field("chain_id", &self.chain_id)
            .field("has_signer", &self.signer.is_some())
            .field("error", &self.error)
            .finish()
    }
}

impl WalletState {
    /// 签名者、地址、链 ID 齐全且无错误
    pub fn is_ready(&self) -> bool {
        self.is_connected
            && self.signer.is_some()
            && self.address.is_some()
            && self.chain_id.is_some()
            && self.error.is_none()
    }

    pub fn readiness(&self) -> DependencyReadiness {
        if let Some(error) = &self.error {
            DependencyReadiness::failed(error.clone())
        } else if self.is_ready() {
            DependencyReadiness::ready()
        } else if self.is_connecting || self.is_connected {
            DependencyReadiness::initializing(50)
        } else {
            DependencyReadiness::pending()
        }
    }
}

/// 钱包能力
#[async_trait]
pub trait Wallet: Send + Sync {
    /// 订阅状态变化
    fn subscribe(&self) -> watch::Receiver<WalletState>;

    /// 请求连接；结果通过状态通道反映
    async fn connect(&self) -> Result<(), String>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::ComponentHealth;

    #[test]
    fn test_wallet_readiness() {
        let mut state = WalletState::default();
        assert!(!state.readiness().is_ready());
        assert_eq!(state.readiness().progress(), 0);

        state.is_connecting = true;
        assert_eq!(state.readiness().progress(), 50);

        state = WalletState {
            is_connected: true,
            is_connecting: false,
            address: Some("0xAAA".into()),
            chain_id: Some(84532),
            signer: Some(Arc::new(MockSigner::new("0xAAA"))),
            error: None,
        };
        assert!(state.is_ready());
        assert!(state.readiness().is_ready());

        // 缺少链 ID 不算就绪
        state.chain_id = None;
        assert!(!state.is_ready());

        state.chain_id = Some(84532);
        state.error = Some("user rejected the request".into());
        assert!(!state.is_ready());
        assert_eq!(state.readiness().health(), ComponentHealth::Error);
    }
}
