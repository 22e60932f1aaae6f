//! 传输层抽象模块
//!
//! 聊天传输客户端是外部组件，本模块只定义其契约：
//! 生命周期操作（initialize/destroy）、连接状态查询、发送能力，
//! 以及通过 mpsc 通道投递的生命周期事件。
//!
//! 会话状态是一个不透明目录，整体删除可强制重新认证。

use async_trait::async_trait;
use std::path::Path;
use std::time::Duration;
use tracing::{info, warn};

use crate::core::message::types::InboundMessage;
use crate::infra::error::{Error, Result};

/// 会话删除后的等待时间
const SESSION_WIPE_SETTLE: Duration = Duration::from_secs(2);

/// 传输层连接状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    /// 已断开
    Disconnected,
    /// 等待扫码
    AwaitingCode,
    /// 加载中
    Loading,
    /// 已连接
    Connected,
    /// 认证失败
    AuthFailed,
}

/// 传输层生命周期事件
///
/// 由传输客户端产生，通过 mpsc 通道消费（替代回调注册）。
#[derive(Debug)]
pub enum TransportEvent {
    /// 需要扫码认证
    QrNeeded(String),
    /// 客户端就绪，可收发消息
    Ready,
    /// 认证成功
    Authenticated,
    /// 认证失败
    AuthFailure(String),
    /// 连接断开（携带断开原因）
    Disconnected(String),
    /// 加载进度
    Loading {
        /// 百分比
        percent: u8,
        /// 进度描述
        message: String,
    },
    /// 收到入站消息
    Message(InboundMessage),
}

/// 传输层就绪状态
///
/// 发送前的三项检查：客户端存在、底层会话页面打开、身份信息存在。
#[derive(Debug, Clone, Copy, Default)]
pub struct TransportReadiness {
    /// 客户端实例存在
    pub client_present: bool,
    /// 底层会话页面打开
    pub session_open: bool,
    /// 身份信息存在
    pub identity_present: bool,
}

impl TransportReadiness {
    /// 三项检查全部通过才视为就绪
    pub fn is_ready(&self) -> bool {
        self.client_present && self.session_open && self.identity_present
    }
}

/// 传输客户端契约
///
/// 协议层由外部实现，本系统只调用这四类操作并消费事件。
#[async_trait]
pub trait TransportClient: Send + Sync {
    /// 初始化连接
    async fn initialize(&self) -> Result<()>;

    /// 销毁连接
    async fn destroy(&self) -> Result<()>;

    /// 查询当前连接状态
    async fn connection_state(&self) -> ConnectionState;

    /// 发送一条文本消息
    async fn send(&self, user_id: &str, text: &str) -> Result<()>;

    /// 查询发送就绪状态
    async fn readiness(&self) -> TransportReadiness;
}

/// 判断断开是否为主动断开
///
/// 主动断开（页面跳转或登出）只清理会话，不触发重连。
pub fn is_intentional_disconnect(reason: &str) -> bool {
    reason == "NAVIGATION" || reason == "LOGOUT"
}

/// 删除会话目录，强制下次连接重新认证
///
/// 目录不存在视为成功；删除后等待 2 秒让文件系统稳定。
pub async fn wipe_session_dir(session_dir: &Path) -> Result<()> {
    match tokio::fs::remove_dir_all(session_dir).await {
        Ok(()) => {
            info!(path = %session_dir.display(), "会话已删除");
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            info!(path = %session_dir.display(), "会话目录不存在，跳过删除");
        }
        Err(e) => {
            warn!(path = %session_dir.display(), error = %e, "删除会话失败");
            return Err(Error::Io(e.to_string()));
        }
    }

    tokio::time::sleep(SESSION_WIPE_SETTLE).await;
    Ok(())
}

/// 空传输客户端
///
/// 独立运行（无真实协议客户端注入）时的占位实现，
/// `check` 子命令和 `/health` 端点可正常工作。
pub struct NullTransport;

#[async_trait]
impl TransportClient for NullTransport {
    async fn initialize(&self) -> Result<()> {
        warn!("未注入真实传输客户端，initialize 为空操作");
        Ok(())
    }

    async fn destroy(&self) -> Result<()> {
        Ok(())
    }

    async fn connection_state(&self) -> ConnectionState {
        ConnectionState::Disconnected
    }

    async fn send(&self, _user_id: &str, _text: &str) -> Result<()> {
        Err(Error::Transport("未注入传输客户端".to_string()))
    }

    async fn readiness(&self) -> TransportReadiness {
        TransportReadiness::default()
    }
}
