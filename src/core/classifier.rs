//! 错误分类器
//!
//! 将子系统返回的原始错误文本映射为 ErrorKind。关键词按优先级依次匹配：
//! 用户拒绝 > 本地损坏 > 未配置 > 网络抖动，均未命中则为 Unknown。

use crate::core::ErrorKind;

/// 纯函数分类器，无状态
pub struct ErrorClassifier;

impl ErrorClassifier {
    pub fn classify(raw: &str) -> ErrorKind {
        let content = raw.to_lowercase();

        if Self::contains_declined_keywords(&content) {
            return ErrorKind::UserDeclined;
        }
        if Self::contains_corruption_keywords(&content) {
            return ErrorKind::LocalCorruption;
        }
        if Self::contains_not_configured_keywords(&content) {
            return ErrorKind::NotConfigured;
        }
        if Self::contains_network_keywords(&content) {
            return ErrorKind::TransientNetwork;
        }

        ErrorKind::Unknown
    }

    fn contains_declined_keywords(content: &str) -> bool {
        let keywords = [
            "user rejected",
            "user denied",
            "rejected the request",
            "user cancelled",
            "user canceled",
            "declined",
            "denied transaction signature",
            "action_rejected",
            "code 4001",
            "signature request was rejected",
        ];
        keywords.iter().any(|k| content.contains(k))
    }

    fn contains_corruption_keywords(content: &str) -> bool {
        let keywords = [
            "corrupt",
            "sequence id",
            "sequenceid",
            "sequence_id",
            "sequence mismatch",
            "out of order",
            "ordering counter",
            "inconsistent local state",
            "identity mismatch",
        ];
        keywords.iter().any(|k| content.contains(k))
    }

    fn contains_not_configured_keywords(content: &str) -> bool {
        let keywords = [
            "not configured",
            "configuration_needed",
            "configuration needed",
            "missing api key",
            "no signer",
            "unsupported chain",
        ];
        keywords.iter().any(|k| content.contains(k))
    }

    fn contains_network_keywords(content: &str) -> bool {
        let keywords = [
            "timeout",
            "timed out",
            "network",
            "fetch failed",
            "failed to fetch",
            "econnreset",
            "econnrefused",
            "connection reset",
            "connection refused",
            "socket hang up",
            "temporarily unavailable",
            "service unavailable",
            "rate limit",
            "too many requests",
            "502",
            "503",
            "504",
            "offline",
        ];
        keywords.iter().any(|k| content.contains(k))
    }
}
