//! 对话状态存储模块
//!
//! 按用户维度维护的几类状态：频率窗口、重复消息记录、垃圾信息冷却、
//! 人工转接/媒体暂停状态、AI 对话上下文。
//!
//! 所有存储使用 `DashMap`；状态变更只发生在队列的单消费者路径上，
//! 后台清理任务只做过期删除。

use dashmap::DashMap;
use std::time::Duration;
use tokio::task::AbortHandle;
use tokio::time::Instant;
use tracing::{debug, info};

/// 频率限制窗口大小
pub const RATE_WINDOW: Duration = Duration::from_secs(60);

/// 窗口内最大消息数
pub const RATE_MAX_MESSAGES: u32 = 10;

/// 第 4 次重复触发的冷却时间
pub const REPEAT_COOLDOWN: Duration = Duration::from_secs(120);

/// 垃圾信息触发的冷却时间
pub const SPAM_COOLDOWN: Duration = Duration::from_secs(180);

/// 暂停（人工转接/媒体）持续时间
pub const PAUSE_DURATION: Duration = Duration::from_secs(3600);

/// 每用户上下文保留的字符数上限
pub const CONTEXT_MAX_CHARS: usize = 1000;

// ==================== 频率限制 ====================

/// 频率窗口
struct RateWindow {
    count: u32,
    window_start: Instant,
}

/// 滑动窗口频率限制器
///
/// 60 秒窗口内最多 10 条；每次检查都会更新窗口。
pub struct RateLimiter {
    windows: DashMap<String, RateWindow>,
}

impl RateLimiter {
    pub fn new() -> Self {
        Self {
            windows: DashMap::new(),
        }
    }

    /// 检查并计数一条消息
    ///
    /// # 返回值
    /// - `true`: 已超出窗口限制
    /// - `false`: 仍在限制内
    pub fn check(&self, user_id: &str) -> bool {
        let now = Instant::now();
        let mut entry = self
            .windows
            .entry(user_id.to_string())
            .or_insert_with(|| RateWindow {
                count: 0,
                window_start: now,
            });

        if now.duration_since(entry.window_start) > RATE_WINDOW {
            entry.count = 1;
            entry.window_start = now;
            return false;
        }

        entry.count += 1;
        entry.count > RATE_MAX_MESSAGES
    }

    /// 删除超过两个窗口周期未活动的记录
    pub fn cleanup_expired(&self) {
        let now = Instant::now();
        self.windows
            .retain(|_, w| now.duration_since(w.window_start) <= RATE_WINDOW * 2);
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new()
    }
}

// ==================== 重复消息检测 ====================

/// 重复消息检测结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RepeatVerdict {
    /// 非重复消息
    Fresh,
    /// 第 2-3 次重复，只需提示
    Repeated,
    /// 第 4 次重复，需要进入冷却
    Excessive,
}

/// 重复消息记录
struct RepeatRecord {
    last_text: String,
    count: u32,
    last_seen_at: Instant,
}

/// 连续重复消息检测器
///
/// 比较小写去空白后的文本；第 4 次重复时计数归零并向上游
/// 发出冷却信号。
pub struct RepeatDetector {
    records: DashMap<String, RepeatRecord>,
}

impl RepeatDetector {
    pub fn new() -> Self {
        Self {
            records: DashMap::new(),
        }
    }

    /// 检查一条消息是否为重复消息
    pub fn check(&self, user_id: &str, text: &str) -> RepeatVerdict {
        let normalized = text.to_lowercase().trim().to_string();
        let now = Instant::now();

        let mut entry = self
            .records
            .entry(user_id.to_string())
            .or_insert_with(|| RepeatRecord {
                last_text: String::new(),
                count: 0,
                last_seen_at: now,
            });

        entry.last_seen_at = now;

        if entry.last_text != normalized {
            entry.last_text = normalized;
            entry.count = 1;
            return RepeatVerdict::Fresh;
        }

        entry.count += 1;

        if entry.count >= 4 {
            entry.count = 0;
            return RepeatVerdict::Excessive;
        }

        if entry.count >= 2 {
            RepeatVerdict::Repeated
        } else {
            RepeatVerdict::Fresh
        }
    }

    /// 删除超过一分钟未活动的记录
    pub fn cleanup_expired(&self) {
        let now = Instant::now();
        self.records
            .retain(|_, r| now.duration_since(r.last_seen_at) <= Duration::from_secs(60));
    }
}

impl Default for RepeatDetector {
    fn default() -> Self {
        Self::new()
    }
}

// ==================== 冷却存储 ====================

/// 垃圾信息冷却存储
///
/// 冷却期内用户的消息被静默丢弃。
pub struct CooldownStore {
    expirations: DashMap<String, Instant>,
}

impl CooldownStore {
    pub fn new() -> Self {
        Self {
            expirations: DashMap::new(),
        }
    }

    /// 为用户设置冷却
    pub fn arm(&self, user_id: &str, duration: Duration) {
        debug!(user_id = user_id, secs = duration.as_secs(), "设置冷却");
        self.expirations
            .insert(user_id.to_string(), Instant::now() + duration);
    }

    /// 检查用户是否处于冷却中，过期条目顺带删除
    pub fn is_active(&self, user_id: &str) -> bool {
        if let Some(expiry) = self.expirations.get(user_id).map(|e| *e) {
            if Instant::now() < expiry {
                return true;
            }
            self.expirations.remove(user_id);
        }
        false
    }

    /// 删除所有已过期的冷却
    pub fn cleanup_expired(&self) {
        let now = Instant::now();
        self.expirations.retain(|_, expiry| now < *expiry);
    }
}

impl Default for CooldownStore {
    fn default() -> Self {
        Self::new()
    }
}

// ==================== 暂停状态 ====================

/// 暂停原因
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PauseReason {
    /// 用户请求人工客服
    HumanRequested,
    /// 收到媒体内容，转交人工处理
    MediaHandoff,
}

/// 暂停条目
struct PauseEntry {
    reason: PauseReason,
    expires_at: Instant,
    /// 自动恢复任务的取消句柄
    auto_return: AbortHandle,
}

/// 对话暂停状态存储
///
/// 每个暂停条目绑定一个可取消的自动恢复任务：
/// 显式清除暂停时任务被取消，不依赖任务醒来后的状态检查。
pub struct ConversationStateStore {
    entries: DashMap<String, PauseEntry>,
}

impl ConversationStateStore {
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
        }
    }

    /// 暂停一个用户
    ///
    /// 已有暂停会被替换，旧的自动恢复任务被取消。
    pub fn pause(&self, user_id: &str, reason: PauseReason, auto_return: AbortHandle) {
        info!(user_id = user_id, reason = ?reason, "用户对话已暂停");

        let entry = PauseEntry {
            reason,
            expires_at: Instant::now() + PAUSE_DURATION,
            auto_return,
        };

        if let Some(previous) = self.entries.insert(user_id.to_string(), entry) {
            previous.auto_return.abort();
        }
    }

    /// 用户是否处于暂停中
    pub fn is_paused(&self, user_id: &str) -> bool {
        self.entries
            .get(user_id)
            .map(|e| Instant::now() < e.expires_at)
            .unwrap_or(false)
    }

    /// 查询暂停原因
    pub fn reason(&self, user_id: &str) -> Option<PauseReason> {
        self.entries.get(user_id).map(|e| e.reason)
    }

    /// 显式清除暂停并取消自动恢复任务
    ///
    /// # 返回值
    /// - `true`: 存在暂停并已清除
    pub fn clear(&self, user_id: &str) -> bool {
        if let Some((_, entry)) = self.entries.remove(user_id) {
            entry.auto_return.abort();
            info!(user_id = user_id, "用户暂停已清除");
            return true;
        }
        false
    }

    /// 自动恢复任务到期时调用：删除条目但不取消任务自身
    ///
    /// # 返回值
    /// - `true`: 条目仍存在并已删除，应向用户发送恢复提示
    pub fn take_for_auto_return(&self, user_id: &str) -> bool {
        self.entries.remove(user_id).is_some()
    }

    /// 当前暂停的用户数
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for ConversationStateStore {
    fn default() -> Self {
        Self::new()
    }
}

// ==================== 对话上下文 ====================

/// AI 对话上下文存储
///
/// 每用户保留最近的对话片段，上限 1000 字符。
pub struct ContextStore {
    contexts: DashMap<String, String>,
}

impl ContextStore {
    pub fn new() -> Self {
        Self {
            contexts: DashMap::new(),
        }
    }

    /// 获取用户当前上下文
    pub fn get(&self, user_id: &str) -> String {
        self.contexts
            .get(user_id)
            .map(|c| c.clone())
            .unwrap_or_default()
    }

    /// 追加一轮对话，旧上下文截断到最后 1000 字符
    pub fn append(&self, user_id: &str, user_message: &str, bot_reply: &str) {
        let previous = self.get(user_id);
        let tail = tail_chars(&previous, CONTEXT_MAX_CHARS);

        let updated = format!("{}\nUsuario: {}\nBot: {}", tail, user_message, bot_reply)
            .trim()
            .to_string();

        self.contexts.insert(user_id.to_string(), updated);
    }
}

impl Default for ContextStore {
    fn default() -> Self {
        Self::new()
    }
}

/// 取字符串的最后 `max` 个字符（按字符边界截断）
fn tail_chars(s: &str, max: usize) -> &str {
    let total = s.chars().count();
    if total <= max {
        return s;
    }

    let skip = total - max;
    match s.char_indices().nth(skip) {
        Some((idx, _)) => &s[idx..],
        None => s,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_rate_limit_triggers_on_eleventh() {
        let limiter = RateLimiter::new();

        for _ in 0..10 {
            assert!(!limiter.check("usuario@c.us"));
        }
        assert!(limiter.check("usuario@c.us"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_window_resets_after_quiet_period() {
        let limiter = RateLimiter::new();

        for _ in 0..11 {
            limiter.check("usuario@c.us");
        }

        tokio::time::advance(RATE_WINDOW + Duration::from_secs(1)).await;

        assert!(!limiter.check("usuario@c.us"));
    }

    #[test]
    fn test_repeat_detector_outcomes() {
        let detector = RepeatDetector::new();

        assert_eq!(detector.check("u", "hola"), RepeatVerdict::Fresh);
        assert_eq!(detector.check("u", "HOLA "), RepeatVerdict::Repeated);
        assert_eq!(detector.check("u", "hola"), RepeatVerdict::Repeated);
        assert_eq!(detector.check("u", "hola"), RepeatVerdict::Excessive);

        // 计数归零后重新累积
        assert_eq!(detector.check("u", "hola"), RepeatVerdict::Fresh);
    }

    #[test]
    fn test_repeat_detector_resets_on_new_text() {
        let detector = RepeatDetector::new();

        detector.check("u", "hola");
        detector.check("u", "hola");
        assert_eq!(detector.check("u", "adios"), RepeatVerdict::Fresh);
        assert_eq!(detector.check("u", "adios"), RepeatVerdict::Repeated);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cooldown_expires() {
        let store = CooldownStore::new();

        store.arm("usuario@c.us", REPEAT_COOLDOWN);
        assert!(store.is_active("usuario@c.us"));

        tokio::time::advance(REPEAT_COOLDOWN + Duration::from_secs(1)).await;
        assert!(!store.is_active("usuario@c.us"));
    }

    #[tokio::test]
    async fn test_pause_clear_aborts_auto_return() {
        let store = ConversationStateStore::new();

        let handle = tokio::spawn(async {
            tokio::time::sleep(Duration::from_secs(3600)).await;
        });
        let abort = handle.abort_handle();

        store.pause("u", PauseReason::HumanRequested, abort);
        assert!(store.is_paused("u"));
        assert_eq!(store.reason("u"), Some(PauseReason::HumanRequested));

        assert!(store.clear("u"));
        assert!(!store.is_paused("u"));

        // 自动恢复任务应已被取消
        assert!(handle.await.unwrap_err().is_cancelled());
    }

    #[test]
    fn test_context_bounded_to_last_chars() {
        let store = ContextStore::new();

        let long_message = "x".repeat(1500);
        store.append("u", &long_message, "ok");
        store.append("u", "¿precio?", "cuesta $900");

        let context = store.get("u");
        assert!(context.contains("¿precio?"));
        assert!(context.contains("cuesta $900"));
        // 旧上下文被截断到 1000 字符以内
        assert!(context.chars().count() < 1100);
    }

    #[test]
    fn test_tail_chars_respects_char_boundaries() {
        let s = "ñandú ñandú";
        assert_eq!(tail_chars(s, 5), "ñandú");
        assert_eq!(tail_chars(s, 100), s);
    }
}
