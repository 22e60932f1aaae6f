//! 连接稳定性管理模块
//!
//! 负责传输连接的全生命周期监督：
//! - **keep-alive 探测**：每 10 分钟向配置的 URL 发起 HTTP 探测，
//!   502 视为部署进行中（15 分钟部署超时后强制重启），其余失败
//!   累计计数，连续 5 次失败触发服务重启，未达阈值按指数退避重试
//! - **健康巡检**：每 5 分钟检查活动间隔、连接状态与部署状态，
//!   不健康且无恢复操作进行中时触发服务重启
//! - **事件驱动重连**：有界循环（不递归），延迟按指数退避加抖动，
//!   上限 300 秒；认证失败或 3 次尝试后清理会话；连续 15 次失败
//!   后清理资源并终止进程，交由外部监督者重启
//! - **服务重启**：销毁传输、清理会话、等待 10 秒、重启 keep-alive
//!   并重新初始化；重启过程中的任何错误都是致命的
//!
//! `reconnecting` / `deploying` 两个守卫标志保证恢复操作互斥，
//! 并发触发直接跳过。错误环形缓冲最多保留 50 条记录。

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::AbortHandle;
use tracing::{error, info, warn};

use crate::infra::config::StabilityConfig;
use crate::infra::error::{Error, Result};
use crate::transport::{self, ConnectionState, TransportClient, TransportEvent};

/// 最大重连尝试次数，超出后终止进程
pub const MAX_RECONNECT_ATTEMPTS: u32 = 15;

/// 重连基础延迟（毫秒）
pub const RECONNECT_BASE_DELAY_MS: u64 = 10_000;

/// 重连延迟上限（毫秒）
pub const RECONNECT_DELAY_CAP_MS: u64 = 300_000;

/// keep-alive 探测间隔
pub const PING_INTERVAL: Duration = Duration::from_secs(10 * 60);

/// keep-alive 单次探测超时
pub const PING_TIMEOUT: Duration = Duration::from_secs(15);

/// 探测失败退避基数（毫秒）
pub const PING_BACKOFF_BASE_MS: u64 = 15_000;

/// 探测失败退避上限（毫秒）
pub const PING_BACKOFF_CAP_MS: u64 = 180_000;

/// 连续探测失败阈值，达到后重启服务
pub const MAX_PING_FAILURES: u32 = 5;

/// 健康巡检间隔
pub const HEALTH_CHECK_INTERVAL: Duration = Duration::from_secs(5 * 60);

/// 最大静默时间，超过视为不健康
pub const MAX_SILENCE: Duration = Duration::from_secs(60 * 60);

/// 部署超时
pub const DEPLOYMENT_TIMEOUT: Duration = Duration::from_secs(15 * 60);

/// 重启前的等待时间
pub const RESTART_SETTLE: Duration = Duration::from_secs(10);

/// 销毁传输后、重新初始化前的等待时间
const DESTROY_SETTLE: Duration = Duration::from_secs(5);

/// 错误环形缓冲容量
pub const ERROR_LOG_CAPACITY: usize = 50;

// ==================== 错误日志 ====================

/// 错误记录
#[derive(Debug, Clone, Serialize)]
pub struct ErrorRecord {
    /// 错误类别
    pub kind: String,
    /// 错误详情
    pub message: String,
    /// 发生时间
    pub at: DateTime<Utc>,
}

/// 有界错误日志
///
/// 环形缓冲，最多保留 50 条，溢出丢弃最旧记录。
pub struct ErrorLog {
    entries: Mutex<VecDeque<ErrorRecord>>,
}

impl ErrorLog {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(VecDeque::with_capacity(ERROR_LOG_CAPACITY)),
        }
    }

    /// 记录一条错误
    pub fn record(&self, kind: &str, message: &str) {
        let mut entries = self
            .entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        if entries.len() >= ERROR_LOG_CAPACITY {
            entries.pop_front();
        }

        entries.push_back(ErrorRecord {
            kind: kind.to_string(),
            message: message.to_string(),
            at: Utc::now(),
        });
    }

    /// 当前记录数
    pub fn len(&self) -> usize {
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// 导出全部记录
    pub fn snapshot(&self) -> Vec<ErrorRecord> {
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .iter()
            .cloned()
            .collect()
    }
}

impl Default for ErrorLog {
    fn default() -> Self {
        Self::new()
    }
}

// ==================== 健康状态 ====================

/// 部署状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DeploymentStatus {
    /// 稳定
    Stable,
    /// 部署进行中
    InProgress,
    /// 部署超时失败
    Failed,
}

/// 运行指标
#[derive(Debug, Clone, Serialize)]
pub struct Metrics {
    /// 累计重连次数
    pub total_reconnections: u32,
    /// 最近一次重启时间
    pub last_restart: Option<DateTime<Utc>>,
    /// 进程启动时间
    pub started_at: DateTime<Utc>,
    /// 最近一次成功连接时间
    pub last_successful_connection: Option<DateTime<Utc>>,
    /// 检测到的部署次数
    pub deployment_attempts: u32,
}

/// 连接健康记录
struct HealthState {
    connection_status: ConnectionState,
    deployment_status: DeploymentStatus,
    last_ping_at: DateTime<Utc>,
    last_message_at: DateTime<Utc>,
    healthy: bool,
    metrics: Metrics,
}

/// 健康快照（`/health` 端点的响应体）
#[derive(Debug, Clone, Serialize)]
pub struct HealthSnapshot {
    pub status: &'static str,
    pub last_ping: DateTime<Utc>,
    pub last_message: DateTime<Utc>,
    pub connection_status: ConnectionState,
    pub deployment_status: DeploymentStatus,
    pub reconnect_attempts: u32,
    pub ping_failures: u32,
    pub metrics: Metrics,
    pub errors: Vec<ErrorRecord>,
}

// ==================== 退避计算 ====================

/// 计算第 `attempt` 次重连的延迟
///
/// `10000 * 1.5^(attempt-1) + jitter`，上限 300 秒。
pub fn reconnect_delay(attempt: u32, jitter_ms: u64) -> Duration {
    let exponent = attempt.saturating_sub(1).min(63);
    let base = RECONNECT_BASE_DELAY_MS as f64 * 1.5_f64.powi(exponent as i32);
    let total = (base as u64).saturating_add(jitter_ms);
    Duration::from_millis(total.min(RECONNECT_DELAY_CAP_MS))
}

/// 计算探测失败后的退避延迟
///
/// `15000 * 1.5^failures`，上限 180 秒。
pub fn ping_backoff_delay(failures: u32) -> Duration {
    let base = PING_BACKOFF_BASE_MS as f64 * 1.5_f64.powi(failures.min(63) as i32);
    Duration::from_millis((base as u64).min(PING_BACKOFF_CAP_MS))
}

/// 抖动来源：当前时间的亚秒纳秒数对 1000 取模
///
/// 抖动只用于打散并发重连，无需加密强度的随机性。
fn jitter_ms() -> u64 {
    (Utc::now().timestamp_subsec_nanos() as u64) % 1000
}

// ==================== 稳定性管理器 ====================

/// 探测结果决定的下一步动作
enum ProbeOutcome {
    /// 正常，按固定间隔继续
    Healthy,
    /// 与部署相关，按固定间隔继续
    Deployment,
    /// 失败未达阈值，按退避延迟重试
    Backoff(Duration),
    /// 失败达到阈值，需要重启服务
    RestartNeeded,
}

/// 稳定性管理器
pub struct StabilityManager {
    transport: Arc<dyn TransportClient>,
    http: reqwest::Client,
    ping_url: String,
    session_dir: PathBuf,
    state: Mutex<HealthState>,
    ping_failures: AtomicU32,
    reconnect_attempts: AtomicU32,
    /// 重连守卫标志
    reconnecting: AtomicBool,
    /// 部署守卫标志
    deploying: AtomicBool,
    /// 传输是否已初始化过
    initialized: AtomicBool,
    /// keep-alive 任务句柄
    keepalive_task: Mutex<Option<AbortHandle>>,
    /// 部署超时任务句柄
    deployment_timer: Mutex<Option<AbortHandle>>,
    /// 最近收到的 QR 码
    qr_code: Mutex<Option<String>>,
    error_log: Arc<ErrorLog>,
}

impl StabilityManager {
    /// 创建稳定性管理器
    pub fn new(
        transport: Arc<dyn TransportClient>,
        config: &StabilityConfig,
        session_dir: PathBuf,
        error_log: Arc<ErrorLog>,
    ) -> Result<Arc<Self>> {
        let http = reqwest::Client::builder()
            .timeout(PING_TIMEOUT)
            .user_agent("VentiBot/1.0 HealthCheck")
            .build()
            .map_err(|e| Error::Http(format!("创建探测客户端失败: {}", e)))?;

        let now = Utc::now();

        Ok(Arc::new(Self {
            transport,
            http,
            ping_url: config.ping_url.clone(),
            session_dir,
            state: Mutex::new(HealthState {
                connection_status: ConnectionState::Disconnected,
                deployment_status: DeploymentStatus::Stable,
                last_ping_at: now,
                last_message_at: now,
                healthy: true,
                metrics: Metrics {
                    total_reconnections: 0,
                    last_restart: None,
                    started_at: now,
                    last_successful_connection: None,
                    deployment_attempts: 0,
                },
            }),
            ping_failures: AtomicU32::new(0),
            reconnect_attempts: AtomicU32::new(0),
            reconnecting: AtomicBool::new(false),
            deploying: AtomicBool::new(false),
            initialized: AtomicBool::new(false),
            keepalive_task: Mutex::new(None),
            deployment_timer: Mutex::new(None),
            qr_code: Mutex::new(None),
            error_log,
        }))
    }

    /// 获取错误日志引用
    pub fn error_log(&self) -> Arc<ErrorLog> {
        self.error_log.clone()
    }

    /// 启动稳定性系统
    ///
    /// 依次启动 keep-alive、健康巡检，并做首次传输初始化。
    pub async fn start(self: &Arc<Self>) {
        self.start_keep_alive();
        self.start_health_sweep();

        if let Err(e) = self.transport.initialize().await {
            error!(error = %e, "传输初始化失败");
            self.error_log.record("inicio_inicial", &e.to_string());
            let manager = Arc::clone(self);
            tokio::spawn(async move {
                manager.handle_reconnection(false).await;
            });
        } else {
            self.initialized.store(true, Ordering::SeqCst);
        }
    }

    /// 记录收到一条入站消息（活动时间戳）
    pub fn note_message(&self) {
        self.with_state(|s| s.last_message_at = Utc::now());
    }

    /// 最近的 QR 码（等待扫码时）
    pub fn qr_code(&self) -> Option<String> {
        self.qr_code
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// 导出健康快照
    pub fn snapshot(&self) -> HealthSnapshot {
        let state = self
            .state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        HealthSnapshot {
            status: if state.healthy {
                "saludable"
            } else {
                "no_saludable"
            },
            last_ping: state.last_ping_at,
            last_message: state.last_message_at,
            connection_status: state.connection_status,
            deployment_status: state.deployment_status,
            reconnect_attempts: self.reconnect_attempts.load(Ordering::SeqCst),
            ping_failures: self.ping_failures.load(Ordering::SeqCst),
            metrics: state.metrics.clone(),
            errors: self.error_log.snapshot(),
        }
    }

    /// 处理传输生命周期事件
    pub async fn handle_event(self: &Arc<Self>, event: &TransportEvent) {
        match event {
            TransportEvent::QrNeeded(code) => {
                info!("等待扫码认证");
                self.with_state(|s| s.connection_status = ConnectionState::AwaitingCode);
                *self
                    .qr_code
                    .lock()
                    .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(code.clone());
            }
            TransportEvent::Ready => {
                info!("传输客户端就绪，可接收消息");
                self.with_state(|s| {
                    s.connection_status = ConnectionState::Connected;
                    s.healthy = true;
                    s.metrics.last_successful_connection = Some(Utc::now());
                });
                self.ping_failures.store(0, Ordering::SeqCst);
                self.reconnect_attempts.store(0, Ordering::SeqCst);
                self.initialized.store(true, Ordering::SeqCst);
                *self
                    .qr_code
                    .lock()
                    .unwrap_or_else(|poisoned| poisoned.into_inner()) = None;
            }
            TransportEvent::Authenticated => {
                info!("认证成功");
            }
            TransportEvent::AuthFailure(reason) => {
                error!(reason = %reason, "认证失败");
                self.with_state(|s| s.connection_status = ConnectionState::AuthFailed);
                self.error_log.record("fallo_autenticacion", reason);

                let manager = Arc::clone(self);
                tokio::spawn(async move {
                    let _ = transport::wipe_session_dir(&manager.session_dir).await;
                    manager.handle_reconnection(true).await;
                });
            }
            TransportEvent::Disconnected(reason) => {
                warn!(reason = %reason, "连接断开");
                self.with_state(|s| s.connection_status = ConnectionState::Disconnected);
                self.error_log.record("desconexion", reason);

                if transport::is_intentional_disconnect(reason) {
                    // 主动断开只清理会话，不重连
                    let manager = Arc::clone(self);
                    tokio::spawn(async move {
                        let _ = transport::wipe_session_dir(&manager.session_dir).await;
                    });
                    return;
                }

                let manager = Arc::clone(self);
                tokio::spawn(async move {
                    manager.handle_reconnection(false).await;
                });
            }
            TransportEvent::Loading { percent, message } => {
                info!(percent = percent, message = %message, "加载中");
                self.with_state(|s| s.connection_status = ConnectionState::Loading);
            }
            TransportEvent::Message(_) => {
                self.note_message();
            }
        }
    }

    // ==================== keep-alive ====================

    /// 启动（或重启）keep-alive 探测循环
    pub fn start_keep_alive(self: &Arc<Self>) {
        let mut guard = self
            .keepalive_task
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        if let Some(previous) = guard.take() {
            previous.abort();
        }

        let manager = Arc::clone(self);
        let handle = tokio::spawn(async move {
            info!("keep-alive 系统已启动");
            loop {
                let outcome = manager.keep_alive_probe().await;
                let delay = match outcome {
                    ProbeOutcome::Healthy | ProbeOutcome::Deployment => PING_INTERVAL,
                    ProbeOutcome::Backoff(delay) => {
                        info!(secs = delay.as_secs(), "探测退避后重试");
                        delay
                    }
                    ProbeOutcome::RestartNeeded => {
                        // 重启会中止当前 keep-alive 任务，必须另起任务执行
                        let restarter = Arc::clone(&manager);
                        tokio::spawn(async move {
                            restarter.restart_services().await;
                        });
                        break;
                    }
                };
                tokio::time::sleep(delay).await;
            }
        });

        *guard = Some(handle.abort_handle());
    }

    /// 单次 keep-alive 探测
    async fn keep_alive_probe(self: &Arc<Self>) -> ProbeOutcome {
        match self.http.get(&self.ping_url).send().await {
            Ok(response) => {
                let status = response.status().as_u16();

                if status == 502 {
                    self.enter_deployment();
                    return ProbeOutcome::Deployment;
                }

                if (200..500).contains(&status) {
                    if self.deploying.load(Ordering::SeqCst) && status == 200 {
                        self.complete_deployment();
                    }

                    info!(status = status, "探测成功");
                    self.with_state(|s| s.last_ping_at = Utc::now());
                    self.ping_failures.store(0, Ordering::SeqCst);
                    self.reconnect_attempts.store(0, Ordering::SeqCst);
                    return ProbeOutcome::Healthy;
                }

                self.register_ping_failure(&format!("HTTP {}", status))
            }
            Err(e) => self.register_ping_failure(&e.to_string()),
        }
    }

    /// 记录一次探测失败并决定下一步
    fn register_ping_failure(&self, detail: &str) -> ProbeOutcome {
        warn!(url = %self.ping_url, error = %detail, "探测失败");
        self.error_log.record("ping", detail);

        let failures = self.ping_failures.fetch_add(1, Ordering::SeqCst) + 1;

        if failures >= MAX_PING_FAILURES {
            warn!(failures = failures, "连续探测失败达到阈值，准备重启服务");
            self.ping_failures.store(0, Ordering::SeqCst);
            return ProbeOutcome::RestartNeeded;
        }

        ProbeOutcome::Backoff(ping_backoff_delay(failures))
    }

    // ==================== 部署感知 ====================

    /// 进入部署进行中状态并设置部署超时
    fn enter_deployment(self: &Arc<Self>) {
        if self.deploying.swap(true, Ordering::SeqCst) {
            return;
        }

        info!("检测到部署进行中");
        self.with_state(|s| {
            s.deployment_status = DeploymentStatus::InProgress;
            s.metrics.deployment_attempts += 1;
        });

        let manager = Arc::clone(self);
        let handle = tokio::spawn(async move {
            tokio::time::sleep(DEPLOYMENT_TIMEOUT).await;

            if manager.deploying.swap(false, Ordering::SeqCst) {
                warn!("部署超时，重启服务");
                manager.with_state(|s| s.deployment_status = DeploymentStatus::Failed);

                // 先移除自身句柄，重启清理时不能中止本任务
                manager
                    .deployment_timer
                    .lock()
                    .unwrap_or_else(|poisoned| poisoned.into_inner())
                    .take();
                manager.restart_services().await;
            }
        });

        let mut guard = self
            .deployment_timer
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(previous) = guard.replace(handle.abort_handle()) {
            previous.abort();
        }
    }

    /// 部署完成，恢复稳定状态
    fn complete_deployment(&self) {
        info!("部署已完成");
        self.deploying.store(false, Ordering::SeqCst);
        self.with_state(|s| s.deployment_status = DeploymentStatus::Stable);

        let mut guard = self
            .deployment_timer
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(timer) = guard.take() {
            timer.abort();
        }
    }

    // ==================== 健康巡检 ====================

    /// 启动周期性健康巡检
    fn start_health_sweep(self: &Arc<Self>) {
        let manager = Arc::clone(self);

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(HEALTH_CHECK_INTERVAL);
            ticker.tick().await; // 跳过立即触发的首拍
            loop {
                ticker.tick().await;
                manager.sweep_health().await;
            }
        });
    }

    /// 单次健康评估
    async fn sweep_health(self: &Arc<Self>) {
        let now = Utc::now();

        let unhealthy = {
            let mut state = self
                .state
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());

            let since_ping = now - state.last_ping_at;
            let since_message = now - state.last_message_at;
            let silence = since_ping.min(since_message);

            state.healthy = silence.to_std().unwrap_or(Duration::ZERO) < MAX_SILENCE
                && state.connection_status == ConnectionState::Connected
                && state.deployment_status == DeploymentStatus::Stable;

            !state.healthy
        };

        if unhealthy
            && !self.reconnecting.load(Ordering::SeqCst)
            && !self.deploying.load(Ordering::SeqCst)
        {
            warn!("系统疑似不活跃，重启服务");
            self.restart_services().await;
        }
    }

    // ==================== 重连 ====================

    /// 重连循环
    ///
    /// 有界循环：每轮先检查尝试次数上限，15 次失败后清理并终止进程。
    /// 守卫标志保证同一时刻只有一个重连循环。
    pub async fn handle_reconnection(self: &Arc<Self>, auth_failure: bool) {
        if self.reconnecting.swap(true, Ordering::SeqCst) {
            info!("重连已在进行中，跳过");
            return;
        }

        loop {
            let prior_attempts = self.reconnect_attempts.load(Ordering::SeqCst);
            if prior_attempts >= MAX_RECONNECT_ATTEMPTS {
                error!(
                    attempts = prior_attempts,
                    "达到最大重连次数，终止进程"
                );
                self.with_state(|s| {
                    s.healthy = false;
                    s.metrics.last_restart = Some(Utc::now());
                });
                self.cleanup_before_exit().await;
                std::process::exit(1);
            }

            let attempt = self.reconnect_attempts.fetch_add(1, Ordering::SeqCst) + 1;
            self.with_state(|s| s.metrics.total_reconnections += 1);

            let delay = reconnect_delay(attempt, jitter_ms());
            info!(
                attempt = attempt,
                max = MAX_RECONNECT_ATTEMPTS,
                secs = delay.as_secs(),
                "准备重连"
            );
            tokio::time::sleep(delay).await;

            if auth_failure || attempt > 3 {
                let _ = transport::wipe_session_dir(&self.session_dir).await;
            }

            if self.initialized.load(Ordering::SeqCst) {
                if let Err(e) = self.transport.destroy().await {
                    warn!(error = %e, "销毁传输失败");
                }
                tokio::time::sleep(DESTROY_SETTLE).await;
            }

            match self.transport.initialize().await {
                Ok(()) => {
                    self.initialized.store(true, Ordering::SeqCst);

                    if self.transport.connection_state().await == ConnectionState::Connected {
                        info!("重连成功，客户端已就绪");
                        break;
                    }

                    warn!("重新初始化后连接状态异常，继续重试");
                }
                Err(e) => {
                    error!(error = %e, "重连失败");
                    self.error_log.record("reconexion", &e.to_string());

                    let msg = e.to_string();
                    if msg.contains("ERR_FAILED") || msg.to_lowercase().contains("timeout") {
                        let _ = transport::wipe_session_dir(&self.session_dir).await;
                    }
                }
            }
        }

        self.reconnecting.store(false, Ordering::SeqCst);
    }

    // ==================== 重启与清理 ====================

    /// 完整的服务重启
    ///
    /// 销毁传输、清理会话、等待 10 秒、重启 keep-alive 并重新初始化。
    /// 重启过程中的任何错误都是致命的（终止进程）。
    pub async fn restart_services(self: &Arc<Self>) {
        if self.reconnecting.swap(true, Ordering::SeqCst) {
            info!("已有恢复操作进行中，跳过服务重启");
            return;
        }
        if self.deploying.load(Ordering::SeqCst) {
            info!("部署进行中，跳过服务重启");
            self.reconnecting.store(false, Ordering::SeqCst);
            return;
        }

        self.with_state(|s| s.metrics.last_restart = Some(Utc::now()));
        info!("开始重启服务");

        self.stop_background_tasks();
        if let Err(e) = self.transport.destroy().await {
            warn!(error = %e, "重启时销毁传输失败");
        }
        if let Err(e) = transport::wipe_session_dir(&self.session_dir).await {
            error!(error = %e, "重启时清理会话失败");
            self.error_log.record("reinicio_servicios", &e.to_string());
            std::process::exit(1);
        }

        tokio::time::sleep(RESTART_SETTLE).await;
        self.start_keep_alive();

        match self.transport.initialize().await {
            Ok(()) => {
                self.initialized.store(true, Ordering::SeqCst);
                self.reconnecting.store(false, Ordering::SeqCst);

                if self.transport.connection_state().await != ConnectionState::Connected {
                    warn!("重启后连接状态异常，进入重连流程");
                    self.handle_reconnection(false).await;
                } else {
                    info!("服务重启完成");
                }
            }
            Err(e) => {
                error!(error = %e, "服务重启失败");
                self.error_log.record("reinicio_servicios", &e.to_string());
                std::process::exit(1);
            }
        }
    }

    /// 进程退出前的资源清理
    pub async fn cleanup_before_exit(&self) {
        self.stop_background_tasks();

        if let Err(e) = self.transport.destroy().await {
            warn!(error = %e, "退出清理时销毁传输失败");
        }
        let _ = transport::wipe_session_dir(&self.session_dir).await;

        info!("退出前清理完成");
    }

    /// 停止 keep-alive 与部署超时任务
    fn stop_background_tasks(&self) {
        if let Some(task) = self
            .keepalive_task
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take()
        {
            task.abort();
        }
        if let Some(timer) = self
            .deployment_timer
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take()
        {
            timer.abort();
        }
    }

    /// 在健康状态锁内执行变更
    fn with_state<F: FnOnce(&mut HealthState)>(&self, f: F) {
        let mut state = self
            .state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        f(&mut state);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::NullTransport;

    fn manager() -> Arc<StabilityManager> {
        StabilityManager::new(
            Arc::new(NullTransport),
            &StabilityConfig::default(),
            std::env::temp_dir().join("ventibot-test-session"),
            Arc::new(ErrorLog::new()),
        )
        .unwrap()
    }

    #[test]
    fn test_reconnect_delay_sequence_is_non_decreasing_and_capped() {
        let mut previous = Duration::ZERO;
        for attempt in 1..=MAX_RECONNECT_ATTEMPTS {
            let delay = reconnect_delay(attempt, 0);
            assert!(delay >= previous);
            assert!(delay <= Duration::from_millis(RECONNECT_DELAY_CAP_MS));
            previous = delay;
        }

        assert_eq!(reconnect_delay(1, 0), Duration::from_millis(10_000));
        assert_eq!(
            reconnect_delay(30, 500),
            Duration::from_millis(RECONNECT_DELAY_CAP_MS)
        );
    }

    #[test]
    fn test_reconnect_jitter_is_additive_below_cap() {
        let without = reconnect_delay(2, 0);
        let with = reconnect_delay(2, 999);
        assert_eq!(with - without, Duration::from_millis(999));
    }

    #[test]
    fn test_ping_backoff_is_capped() {
        assert_eq!(ping_backoff_delay(1), Duration::from_millis(22_500));
        assert!(ping_backoff_delay(2) > ping_backoff_delay(1));
        assert_eq!(
            ping_backoff_delay(20),
            Duration::from_millis(PING_BACKOFF_CAP_MS)
        );
    }

    #[test]
    fn test_jitter_bounded() {
        for _ in 0..100 {
            assert!(jitter_ms() < 1000);
        }
    }

    #[test]
    fn test_error_log_ring_buffer_caps_at_fifty() {
        let log = ErrorLog::new();

        for i in 0..60 {
            log.record("prueba", &format!("error {}", i));
        }

        assert_eq!(log.len(), ERROR_LOG_CAPACITY);
        let entries = log.snapshot();
        // 最旧的 10 条已被丢弃
        assert_eq!(entries.first().unwrap().message, "error 10");
        assert_eq!(entries.last().unwrap().message, "error 59");
    }

    #[tokio::test]
    async fn test_ready_event_resets_counters() {
        let manager = manager();
        manager.reconnect_attempts.store(7, Ordering::SeqCst);
        manager.ping_failures.store(3, Ordering::SeqCst);

        manager.handle_event(&TransportEvent::Ready).await;

        let snapshot = manager.snapshot();
        assert_eq!(snapshot.connection_status, ConnectionState::Connected);
        assert_eq!(snapshot.reconnect_attempts, 0);
        assert_eq!(snapshot.ping_failures, 0);
    }

    #[tokio::test]
    async fn test_qr_event_stores_code() {
        let manager = manager();

        manager
            .handle_event(&TransportEvent::QrNeeded("codigo-qr".to_string()))
            .await;

        assert_eq!(manager.qr_code().as_deref(), Some("codigo-qr"));
        assert_eq!(
            manager.snapshot().connection_status,
            ConnectionState::AwaitingCode
        );

        manager.handle_event(&TransportEvent::Ready).await;
        assert!(manager.qr_code().is_none());
    }

    #[tokio::test]
    async fn test_deployment_status_transitions() {
        let manager = manager();

        manager.enter_deployment();
        assert_eq!(
            manager.snapshot().deployment_status,
            DeploymentStatus::InProgress
        );
        assert_eq!(manager.snapshot().metrics.deployment_attempts, 1);

        // 重复进入不重复计数
        manager.enter_deployment();
        assert_eq!(manager.snapshot().metrics.deployment_attempts, 1);

        manager.complete_deployment();
        assert_eq!(
            manager.snapshot().deployment_status,
            DeploymentStatus::Stable
        );
    }

    #[tokio::test]
    async fn test_ping_failures_below_threshold_backoff() {
        let manager = manager();

        for expected in 1..MAX_PING_FAILURES {
            let outcome = manager.register_ping_failure("fallo simulado");
            assert!(matches!(outcome, ProbeOutcome::Backoff(_)));
            assert_eq!(manager.ping_failures.load(Ordering::SeqCst), expected);
        }

        let outcome = manager.register_ping_failure("fallo simulado");
        assert!(matches!(outcome, ProbeOutcome::RestartNeeded));
    }
}
