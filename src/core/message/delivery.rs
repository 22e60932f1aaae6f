//! 消息投递模块
//!
//! 出站发送的两层保护：
//! - `CircuitBreaker`：连续失败 5 次后熔断，300 秒冷却后自动闭合
//! - `DeliveryGuard`：发送前校验传输层就绪，瞬时失败按固定间隔重试，
//!   每次失败计入熔断器并记录到稳定性错误日志
//!
//! 所有出站回复都必须经过 `DeliveryGuard`，不允许直接调用传输层。

use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::infra::error::{Error, Result};
use crate::stability::ErrorLog;
use crate::transport::TransportClient;

/// 熔断阈值：连续失败次数
pub const MAX_CONSECUTIVE_FAILURES: u32 = 5;

/// 熔断冷却时间
pub const OPEN_COOLDOWN: Duration = Duration::from_secs(300);

/// 单条消息的最大发送尝试次数
pub const SEND_RETRY_ATTEMPTS: u32 = 3;

/// 重试间隔
pub const SEND_RETRY_DELAY: Duration = Duration::from_secs(2);

/// 熔断器内部状态
#[derive(Debug)]
struct BreakerState {
    /// 是否处于熔断状态
    open: bool,
    /// 熔断时刻
    opened_at: Option<Instant>,
    /// 连续失败计数
    consecutive_failures: u32,
}

/// 投递熔断器
///
/// 状态机：闭合 → 熔断 → 闭合。熔断期间所有发送立即被拒绝；
/// 每次检查时若冷却时间已过则自动闭合并清零计数
/// （基于冷却的半开，而非显式试探请求）。
#[derive(Clone)]
pub struct CircuitBreaker {
    state: Arc<Mutex<BreakerState>>,
}

impl CircuitBreaker {
    /// 创建闭合状态的熔断器
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(BreakerState {
                open: false,
                opened_at: None,
                consecutive_failures: 0,
            })),
        }
    }

    /// 发送前检查
    ///
    /// 熔断中且冷却未过返回 `Error::CircuitOpen`；冷却已过则
    /// 自动闭合并清零失败计数。
    pub fn check(&self) -> Result<()> {
        let mut state = self
            .state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        if !state.open {
            return Ok(());
        }

        let cooled_down = state
            .opened_at
            .map(|at| at.elapsed() > OPEN_COOLDOWN)
            .unwrap_or(true);

        if cooled_down {
            info!("熔断冷却结束，熔断器闭合");
            state.open = false;
            state.opened_at = None;
            state.consecutive_failures = 0;
            return Ok(());
        }

        Err(Error::CircuitOpen)
    }

    /// 记录一次发送失败
    ///
    /// 连续失败达到阈值时进入熔断状态。
    pub fn record_failure(&self) {
        let mut state = self
            .state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        state.consecutive_failures += 1;

        if !state.open && state.consecutive_failures >= MAX_CONSECUTIVE_FAILURES {
            error!(
                failures = state.consecutive_failures,
                "连续发送失败达到阈值，熔断器开启"
            );
            state.open = true;
            state.opened_at = Some(Instant::now());
        }
    }

    /// 记录一次发送成功，清零连续失败计数
    pub fn record_success(&self) {
        let mut state = self
            .state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        state.consecutive_failures = 0;
    }

    /// 当前是否处于熔断状态
    pub fn is_open(&self) -> bool {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .open
    }

    /// 当前连续失败计数
    pub fn failure_count(&self) -> u32 {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .consecutive_failures
    }
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new()
    }
}

/// 投递守卫
///
/// 包装传输层发送：熔断检查、就绪校验、瞬时失败重试。
#[derive(Clone)]
pub struct DeliveryGuard {
    /// 传输客户端
    transport: Arc<dyn TransportClient>,
    /// 熔断器
    breaker: CircuitBreaker,
    /// 稳定性错误日志
    error_log: Arc<ErrorLog>,
}

impl DeliveryGuard {
    /// 创建投递守卫
    pub fn new(
        transport: Arc<dyn TransportClient>,
        breaker: CircuitBreaker,
        error_log: Arc<ErrorLog>,
    ) -> Self {
        Self {
            transport,
            breaker,
            error_log,
        }
    }

    /// 获取熔断器引用
    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    /// 发送一条文本消息
    ///
    /// 流程：
    /// 1. 熔断检查，熔断中立即失败
    /// 2. 就绪校验，未就绪按一次失败处理
    /// 3. 瞬时失败（序列化/会话/协议/target closed）按固定间隔重试，
    ///    最多 3 次尝试；每次失败计入熔断器并记录错误日志
    /// 4. 非瞬时失败或重试耗尽后向调用方传播
    ///
    /// # 日志记录
    /// - DEBUG: 发送成功
    /// - WARN: 单次发送失败
    pub async fn send(&self, user_id: &str, text: &str) -> Result<()> {
        self.breaker.check()?;

        let mut last_error = Error::Unknown("发送未执行".to_string());

        for attempt in 1..=SEND_RETRY_ATTEMPTS {
            let result = self.attempt_send(user_id, text).await;

            match result {
                Ok(()) => {
                    self.breaker.record_success();
                    debug!(user_id = user_id, attempt = attempt, "消息发送成功");
                    return Ok(());
                }
                Err(e) => {
                    warn!(
                        user_id = user_id,
                        attempt = attempt,
                        max = SEND_RETRY_ATTEMPTS,
                        error = %e,
                        "消息发送失败"
                    );
                    self.breaker.record_failure();
                    self.error_log.record("envio", &e.to_string());

                    let transient = is_transient_failure(&e);
                    last_error = e;

                    if !transient {
                        break;
                    }
                    if attempt < SEND_RETRY_ATTEMPTS {
                        tokio::time::sleep(SEND_RETRY_DELAY).await;
                    }
                }
            }
        }

        Err(last_error)
    }

    /// 单次发送尝试：就绪校验 + 传输层调用
    async fn attempt_send(&self, user_id: &str, text: &str) -> Result<()> {
        let readiness = self.transport.readiness().await;
        if !readiness.is_ready() {
            return Err(Error::Session(format!(
                "传输层未就绪: client={} session={} identity={}",
                readiness.client_present, readiness.session_open, readiness.identity_present
            )));
        }

        self.transport.send(user_id, text).await
    }
}

/// 判断发送失败是否可重试
///
/// 瞬时类别：序列化错误、会话错误、协议错误，以及传输层
/// 报出的 "target closed"。
fn is_transient_failure(error: &Error) -> bool {
    if error.is_transient() {
        return true;
    }

    if let Error::Transport(msg) = error {
        let lower = msg.to_lowercase();
        return lower.contains("target closed")
            || lower.contains("serialize")
            || lower.contains("session")
            || lower.contains("protocol");
    }

    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{ConnectionState, TransportReadiness};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// 可编程失败次数的假传输层
    struct FlakyTransport {
        /// 前 N 次发送失败
        fail_first: u32,
        calls: AtomicU32,
        ready: bool,
    }

    impl FlakyTransport {
        fn new(fail_first: u32, ready: bool) -> Self {
            Self {
                fail_first,
                calls: AtomicU32::new(0),
                ready,
            }
        }
    }

    #[async_trait]
    impl TransportClient for FlakyTransport {
        async fn initialize(&self) -> Result<()> {
            Ok(())
        }

        async fn destroy(&self) -> Result<()> {
            Ok(())
        }

        async fn connection_state(&self) -> ConnectionState {
            ConnectionState::Connected
        }

        async fn send(&self, _user_id: &str, _text: &str) -> Result<()> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.fail_first {
                Err(Error::Protocol("Protocol error: Target closed".to_string()))
            } else {
                Ok(())
            }
        }

        async fn readiness(&self) -> TransportReadiness {
            TransportReadiness {
                client_present: self.ready,
                session_open: self.ready,
                identity_present: self.ready,
            }
        }
    }

    fn guard_with(transport: FlakyTransport) -> DeliveryGuard {
        DeliveryGuard::new(
            Arc::new(transport),
            CircuitBreaker::new(),
            Arc::new(ErrorLog::new()),
        )
    }

    #[test]
    fn test_breaker_opens_on_exactly_fifth_failure() {
        let breaker = CircuitBreaker::new();

        for _ in 0..4 {
            breaker.record_failure();
            assert!(!breaker.is_open());
        }

        breaker.record_failure();
        assert!(breaker.is_open());
        assert!(matches!(breaker.check(), Err(Error::CircuitOpen)));
    }

    #[test]
    fn test_breaker_success_resets_counter() {
        let breaker = CircuitBreaker::new();

        breaker.record_failure();
        breaker.record_failure();
        breaker.record_success();
        assert_eq!(breaker.failure_count(), 0);

        for _ in 0..4 {
            breaker.record_failure();
        }
        assert!(!breaker.is_open());
    }

    #[tokio::test(start_paused = true)]
    async fn test_breaker_closes_after_cooldown() {
        let breaker = CircuitBreaker::new();
        for _ in 0..MAX_CONSECUTIVE_FAILURES {
            breaker.record_failure();
        }
        assert!(matches!(breaker.check(), Err(Error::CircuitOpen)));

        tokio::time::advance(OPEN_COOLDOWN + Duration::from_secs(1)).await;

        assert!(breaker.check().is_ok());
        assert!(!breaker.is_open());
        assert_eq!(breaker.failure_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_failures_exhaust_retries_and_count() {
        let guard = guard_with(FlakyTransport::new(u32::MAX, true));

        let result = guard.send("usuario@c.us", "hola").await;

        assert!(result.is_err());
        assert_eq!(guard.breaker().failure_count(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_succeeds_after_transient_failures() {
        let guard = guard_with(FlakyTransport::new(2, true));

        let result = guard.send("usuario@c.us", "hola").await;

        assert!(result.is_ok());
        assert_eq!(guard.breaker().failure_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_not_ready_counts_as_failure() {
        let guard = guard_with(FlakyTransport::new(0, false));

        let result = guard.send("usuario@c.us", "hola").await;

        assert!(matches!(result, Err(Error::Session(_))));
        assert_eq!(guard.breaker().failure_count(), 3);
    }

    #[tokio::test]
    async fn test_open_breaker_rejects_without_touching_transport() {
        let guard = guard_with(FlakyTransport::new(0, true));
        for _ in 0..MAX_CONSECUTIVE_FAILURES {
            guard.breaker().record_failure();
        }

        let result = guard.send("usuario@c.us", "hola").await;
        assert!(matches!(result, Err(Error::CircuitOpen)));
    }
}
