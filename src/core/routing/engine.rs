//! 对话路由引擎模块
//!
//! 对每条入站消息按固定优先级执行路由规则：
//! 1. 频率超限 → 回复限流提示
//! 2. 第 4 次重复 → 回复垃圾信息警告并设置 120 秒冷却
//! 3. 第 2-3 次重复 → 回复重复提示
//! 4. 冷却中 → 静默丢弃
//! 5. 垃圾信息 → 回复警告并设置 180 秒冷却
//! 6. 请求人工 → 营业时间内转接并暂停 1 小时，否则回复拒绝文案
//! 7. 请求返回机器人且处于人工转接状态 → 清除暂停
//! 8. 暂停中 → 静默丢弃
//! 9. 媒体消息 → 按类型回复并暂停 1 小时
//! 10. 精确问候 "hola" → 欢迎语
//! 11. 精确 "horario" / 包含 "web" → 对应固定文案
//! 12. 营业时间外 → 闭店提示；否则交给 AI 生成回复
//!
//! 所有回复经过投递守卫发送；暂停的自动恢复是可取消的定时任务。

use std::sync::Arc;
use tokio::time::interval;
use tracing::{debug, info, warn};

use super::hours;
use super::messages;
use super::spam::SpamClassifier;
use super::state::{
    ContextStore, ConversationStateStore, CooldownStore, PauseReason, RateLimiter, RepeatDetector,
    RepeatVerdict, PAUSE_DURATION, REPEAT_COOLDOWN, SPAM_COOLDOWN,
};
use crate::ai::engine::AiEngine;
use crate::core::message::delivery::DeliveryGuard;
use crate::core::message::types::InboundMessage;
use crate::infra::error::{Error, Result};

/// 状态清理周期
const CLEANUP_INTERVAL: std::time::Duration = std::time::Duration::from_secs(60);

/// 请求人工客服的关键词
const HUMAN_KEYWORDS: &[&str] = &[
    "agente",
    "persona real",
    "humano",
    "representante",
    "asesor",
    "hablar con alguien",
];

/// 返回机器人的关键词
const BOT_RETURN_KEYWORDS: &[&str] = &["volver al bot", "bot", "asistente virtual", "chatbot"];

/// 判断用户是否请求人工客服
fn wants_human(text: &str) -> bool {
    HUMAN_KEYWORDS.iter().any(|kw| text.contains(kw))
}

/// 判断用户是否想返回机器人
fn wants_bot(text: &str) -> bool {
    BOT_RETURN_KEYWORDS.iter().any(|kw| text.contains(kw))
}

/// 对话路由引擎
pub struct ConversationRouter {
    rate_limiter: RateLimiter,
    repeat_detector: RepeatDetector,
    spam_classifier: SpamClassifier,
    cooldowns: CooldownStore,
    pauses: ConversationStateStore,
    contexts: ContextStore,
    ai: Arc<AiEngine>,
    delivery: DeliveryGuard,
    /// 营业时间检查（测试中可替换）
    store_open: Arc<dyn Fn() -> bool + Send + Sync>,
}

impl ConversationRouter {
    /// 创建路由引擎
    pub fn new(delivery: DeliveryGuard, ai: Arc<AiEngine>) -> Arc<Self> {
        Self::with_store_hours(delivery, ai, Arc::new(hours::is_store_open))
    }

    /// 创建路由引擎并指定营业时间检查
    pub fn with_store_hours(
        delivery: DeliveryGuard,
        ai: Arc<AiEngine>,
        store_open: Arc<dyn Fn() -> bool + Send + Sync>,
    ) -> Arc<Self> {
        Arc::new(Self {
            rate_limiter: RateLimiter::new(),
            repeat_detector: RepeatDetector::new(),
            spam_classifier: SpamClassifier::new(),
            cooldowns: CooldownStore::new(),
            pauses: ConversationStateStore::new(),
            contexts: ContextStore::new(),
            ai,
            delivery,
            store_open,
        })
    }

    /// 路由一条入站消息
    ///
    /// 只在队列的单消费者路径上调用，对话状态的变更不会并发交错。
    pub async fn route(self: &Arc<Self>, message: InboundMessage) -> Result<()> {
        let user_id = message.from.clone();
        let text = message.body.to_lowercase();

        // 1. 频率限制
        if self.rate_limiter.check(&user_id) {
            return self.delivery.send(&user_id, messages::LIMITE_MENSAJES).await;
        }

        // 2-3. 重复消息
        match self.repeat_detector.check(&user_id, &message.body) {
            RepeatVerdict::Excessive => {
                self.cooldowns.arm(&user_id, REPEAT_COOLDOWN);
                return self
                    .delivery
                    .send(&user_id, messages::ADVERTENCIA_SPAM)
                    .await;
            }
            RepeatVerdict::Repeated => {
                return self
                    .delivery
                    .send(&user_id, messages::MENSAJE_REPETIDO)
                    .await;
            }
            RepeatVerdict::Fresh => {}
        }

        // 4. 冷却中静默丢弃
        if self.cooldowns.is_active(&user_id) {
            debug!(user_id = %user_id, "用户冷却中，消息被丢弃");
            return Ok(());
        }

        // 5. 垃圾信息
        if self.spam_classifier.is_spam(&message.body) {
            self.cooldowns.arm(&user_id, SPAM_COOLDOWN);
            return self
                .delivery
                .send(&user_id, messages::ADVERTENCIA_SPAM)
                .await;
        }

        // 6. 请求人工客服
        if wants_human(&text) {
            if !(self.store_open)() {
                return self
                    .delivery
                    .send(&user_id, messages::RECHAZO_AGENTE_CERRADO)
                    .await;
            }

            self.delivery
                .send(&user_id, messages::SOLICITUD_HUMANO)
                .await?;
            self.schedule_pause(&user_id, PauseReason::HumanRequested);
            return Ok(());
        }

        // 7. 返回机器人（仅限人工转接状态）
        if wants_bot(&text) && self.pauses.reason(&user_id) == Some(PauseReason::HumanRequested) {
            self.pauses.clear(&user_id);
            return self
                .delivery
                .send(&user_id, messages::BIENVENIDO_DE_VUELTA)
                .await;
        }

        // 8. 暂停中静默丢弃
        if self.pauses.is_paused(&user_id) {
            debug!(user_id = %user_id, "用户暂停中，消息被丢弃");
            return Ok(());
        }

        // 9. 媒体消息
        if let Some(kind) = message.media {
            let reply = messages::media_received(kind);
            self.delivery.send(&user_id, &reply).await?;
            self.schedule_pause(&user_id, PauseReason::MediaHandoff);
            return Ok(());
        }

        // 10. 精确问候
        if text.trim() == "hola" {
            return self.delivery.send(&user_id, messages::BIENVENIDA).await;
        }

        // 营业时间与官网查询
        if text.trim() == "horario" {
            return self.delivery.send(&user_id, messages::HORARIO).await;
        }
        if text.contains("web") {
            return self.delivery.send(&user_id, messages::PAGINA_WEB).await;
        }

        // 11. 营业时间外
        if !(self.store_open)() {
            return self.delivery.send(&user_id, messages::CERRADO_BREVE).await;
        }

        // 12. AI 生成回复
        self.generate_and_reply(&user_id, &message.body).await
    }

    /// AI 生成路径：生成、更新上下文、投递，失败时回退固定文案
    async fn generate_and_reply(&self, user_id: &str, body: &str) -> Result<()> {
        let context = self.contexts.get(user_id);

        let outcome = match self.ai.generate_reply(body, &context).await {
            Ok(reply) => {
                self.contexts.append(user_id, body, &reply);
                self.delivery.send(user_id, &reply).await
            }
            Err(Error::Timeout(_)) => self.delivery.send(user_id, messages::TIEMPO_ESPERA).await,
            Err(e) => {
                warn!(user_id = user_id, error = %e, "生成回复失败，回退固定文案");
                self.delivery.send(user_id, messages::ERROR).await
            }
        };

        match outcome {
            Ok(()) => Ok(()),
            // 序列化失败时抑制错误回复，避免错误上报的重试循环
            Err(e @ Error::Serialization(_)) => {
                warn!(user_id = user_id, "传输序列化失败，错误回复被抑制");
                Err(e)
            }
            Err(e) => Err(e),
        }
    }

    /// 暂停用户并安排可取消的自动恢复任务
    fn schedule_pause(self: &Arc<Self>, user_id: &str, reason: PauseReason) {
        let router = Arc::clone(self);
        let user = user_id.to_string();

        // 在调度时刻确定到期时间，与存储中的 expires_at 对齐
        let sleep = tokio::time::sleep(PAUSE_DURATION);
        let handle = tokio::spawn(async move {
            sleep.await;

            if router.pauses.take_for_auto_return(&user) {
                info!(user_id = %user, "暂停到期，机器人自动恢复");
                if let Err(e) = router
                    .delivery
                    .send(&user, messages::ASISTENTE_DISPONIBLE)
                    .await
                {
                    warn!(user_id = %user, error = %e, "恢复提示发送失败");
                }
            }
        });

        self.pauses.pause(user_id, reason, handle.abort_handle());
    }

    /// 清理过期的用户状态
    pub fn cleanup_expired(&self) {
        self.rate_limiter.cleanup_expired();
        self.repeat_detector.cleanup_expired();
        self.cooldowns.cleanup_expired();
    }

    /// 启动周期性状态清理任务（每 60 秒）
    pub fn start_cleanup_task(self: &Arc<Self>) {
        let router = Arc::clone(self);

        tokio::spawn(async move {
            let mut ticker = interval(CLEANUP_INTERVAL);
            loop {
                ticker.tick().await;
                router.cleanup_expired();
            }
        });
    }
}
