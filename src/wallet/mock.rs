//! Mock 钱包与签名者（用于测试与演示）

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::watch;

use crate::wallet::{MessageSigner, Wallet, WalletState};

/// 可配置为拒绝签名的签名者
#[derive(Debug)]
pub struct MockSigner {
    address: String,
    reject: AtomicBool,
    sign_calls: AtomicUsize,
}

impl MockSigner {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            reject: AtomicBool::new(false),
            sign_calls: AtomicUsize::new(0),
        }
    }

    pub fn set_reject(&self, reject: bool) {
        self.reject.store(reject, Ordering::SeqCst);
    }

    /// 签名请求（弹窗）次数
    pub fn sign_calls(&self) -> usize {
        self.sign_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MessageSigner for MockSigner {
    fn address(&self) -> &str {
        &self.address
    }

    async fn sign_message(&self, message: &[u8]) -> Result<Vec<u8>, String> {
        self.sign_calls.fetch_add(1, Ordering::SeqCst);
        if self.reject.load(Ordering::SeqCst) {
            return Err("user rejected the request".to_string());
        }
        let mut signature = self.address.as_bytes().to_vec();
        signature.extend_from_slice(message);
        Ok(signature)
    }
}

/// 状态可由测试直接驱动的钱包
pub struct MockWallet {
    tx: watch::Sender<WalletState>,
    /// connect() 成功时使用的地址与链
    target: Mutex<Option<(String, u64)>>,
    signer: Mutex<Option<Arc<MockSigner>>>,
    connect_calls: AtomicUsize,
}

impl Default for MockWallet {
    fn default() -> Self {
        Self::new()
    }
}

impl MockWallet {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(WalletState::default());
        Self {
            tx,
            target: Mutex::new(None),
            signer: Mutex::new(None),
            connect_calls: AtomicUsize::new(0),
        }
    }

    /// connect() 将连接到该账户
    pub fn with_account(self, address: impl Into<String>, chain_id: u64) -> Self {
        if let Ok(mut target) = self.target.lock() {
            *target = Some((address.into(), chain_id));
        }
        self
    }

    /// 立即进入已连接状态，返回签名者以便测试控制签名结果
    pub fn connect_as(&self, address: &str, chain_id: u64) -> Arc<MockSigner> {
        let signer = Arc::new(MockSigner::new(address));
        if let Ok(mut slot) = self.signer.lock() {
            *slot = Some(signer.clone());
        }
        self.tx.send_replace(WalletState {
            is_connected: true,
            is_connecting: false,
            address: Some(address.to_string()),
            chain_id: Some(chain_id),
            signer: Some(signer.clone() as Arc<dyn MessageSigner>),
            error: None,
        });
        signer
    }

    pub fn set_connecting(&self) {
        self.tx.send_modify(|state| {
            state.is_connecting = true;
            state.error = None;
        });
    }

    pub fn set_error(&self, error: impl Into<String>) {
        let error = error.into();
        self.tx.send_modify(|state| {
            state.is_connecting = false;
            state.error = Some(error);
        });
    }

    pub fn disconnect(&self) {
        if let Ok(mut slot) = self.signer.lock() {
            *slot = None;
        }
        self.tx.send_replace(WalletState::default());
    }

    pub fn signer(&self) -> Option<Arc<MockSigner>> {
        self.signer.lock().ok().and_then(|s| s.clone())
    }

    pub fn connect_calls(&self) -> usize {
        self.connect_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Wallet for MockWallet {
    fn subscribe(&self) -> watch::Receiver<WalletState> {
        self.tx.subscribe()
    }

    async fn connect(&self) -> Result<(), String> {
        self.connect_calls.fetch_add(1, Ordering::SeqCst);
        let target = self.target.lock().ok().and_then(|t| t.clone());
        match target {
            Some((address, chain_id)) => {
                self.connect_as(&address, chain_id);
                Ok(())
            }
            None => Err("No wallet provider available".to_string()),
        }
    }
}
