//! Web 服务模块
//!
//! 基于 axum 提供运维端点：
//! - `GET /health`：健康快照（连接状态、部署状态、指标与错误日志）
//! - `GET /ping`：存活探测，返回 `pong`
//! - `GET /qr`：等待扫码时返回最近的 QR 码

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json};
use axum::routing::get;
use axum::Router;
use std::sync::Arc;
use tracing::info;

use crate::infra::error::{Error, Result};
use crate::stability::StabilityManager;

/// Web 服务共享状态
#[derive(Clone)]
pub struct WebState {
    /// 稳定性管理器（健康快照与 QR 码的来源）
    pub stability: Arc<StabilityManager>,
}

/// Web 服务器
pub struct WebServer {
    port: u16,
}

impl WebServer {
    /// 创建 Web 服务器
    pub fn new(port: u16) -> Self {
        Self { port }
    }

    /// 启动 HTTP 服务
    ///
    /// # 参数说明
    /// * `stability` - 稳定性管理器，为各端点提供数据
    pub async fn start(&self, stability: Arc<StabilityManager>) -> Result<()> {
        let state = WebState { stability };
        let app = create_router(state);

        let addr = format!("0.0.0.0:{}", self.port);
        info!(addr = %addr, "Web 服务启动");

        let listener = tokio::net::TcpListener::bind(&addr)
            .await
            .map_err(|e| Error::Io(format!("绑定 {} 失败: {}", addr, e)))?;

        axum::serve(listener, app)
            .await
            .map_err(|e| Error::Io(format!("Web 服务异常退出: {}", e)))?;

        Ok(())
    }
}

/// 创建路由
pub fn create_router(state: WebState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/ping", get(ping_handler))
        .route("/qr", get(qr_handler))
        .with_state(state)
}

/// 健康快照端点
async fn health_handler(State(state): State<WebState>) -> impl IntoResponse {
    Json(state.stability.snapshot())
}

/// 存活探测端点
async fn ping_handler() -> &'static str {
    "pong"
}

/// QR 码端点
///
/// 等待扫码时返回 QR 码文本，否则返回 404。
async fn qr_handler(State(state): State<WebState>) -> impl IntoResponse {
    match state.stability.qr_code() {
        Some(code) => (StatusCode::OK, code).into_response(),
        None => (
            StatusCode::NOT_FOUND,
            "No hay código QR pendiente".to_string(),
        )
            .into_response(),
    }
}
