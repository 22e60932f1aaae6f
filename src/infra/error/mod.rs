//! 错误处理模块
//!
//! 定义网关的统一错误分类。瞬时传输错误（序列化/会话/协议）
//! 可以由投递守卫重试，其余错误直接向上传播。

/// 错误类型
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("配置错误: {0}")]
    Config(String),

    #[error("传输层错误: {0}")]
    Transport(String),

    #[error("传输层序列化错误: {0}")]
    Serialization(String),

    #[error("会话错误: {0}")]
    Session(String),

    #[error("协议错误: {0}")]
    Protocol(String),

    #[error("熔断器开启，发送被拒绝")]
    CircuitOpen,

    #[error("队列已满，消息被挤出")]
    Evicted,

    #[error("操作超时: {0}")]
    Timeout(String),

    #[error("AI 错误: {0}")]
    Ai(String),

    #[error("HTTP 错误: {0}")]
    Http(String),

    #[error("IO 错误: {0}")]
    Io(String),

    #[error("未知错误: {0}")]
    Unknown(String),
}

/// 结果类型
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// 判断错误是否为瞬时传输错误
    ///
    /// 瞬时错误（序列化失败、会话页面关闭、协议错误）由
    /// DeliveryGuard 在固定间隔下重试；其余错误不重试。
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Serialization(_) | Self::Session(_) | Self::Protocol(_)
        )
    }
}

impl From<&str> for Error {
    fn from(s: &str) -> Self {
        Self::Unknown(s.to_string())
    }
}

impl From<String> for Error {
    fn from(s: String) -> Self {
        Self::Unknown(s)
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e.to_string())
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            Self::Timeout(e.to_string())
        } else {
            Self::Http(e.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(Error::Serialization("serialize failed".into()).is_transient());
        assert!(Error::Session("Session closed".into()).is_transient());
        assert!(Error::Protocol("Protocol error: Target closed".into()).is_transient());

        assert!(!Error::CircuitOpen.is_transient());
        assert!(!Error::Evicted.is_transient());
        assert!(!Error::Ai("quota".into()).is_transient());
    }
}
