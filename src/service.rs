//! 服务编排模块
//!
//! 负责网关各组件的组装与生命周期：
//! - 构建错误日志、熔断器、投递守卫、AI 引擎、路由引擎与稳定性管理器
//! - 启动消息队列的单消费者循环（消息按 FIFO 串行路由）
//! - 运行事件循环：入站消息入队，生命周期事件交给稳定性管理器
//! - 监听 Ctrl+C，退出前清理资源

use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use crate::ai::engine::{AiEngine, KnowledgeBase};
use crate::ai::provider::{GeminiConfig, GeminiProvider};
use crate::core::message::delivery::{CircuitBreaker, DeliveryGuard};
use crate::core::message::queue::MessageQueue;
use crate::core::routing::engine::ConversationRouter;
use crate::infra::config::Config;
use crate::infra::error::{Error, Result};
use crate::stability::{ErrorLog, StabilityManager};
use crate::transport::{TransportClient, TransportEvent};
use crate::web::WebServer;

/// 事件通道容量
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// 网关服务
pub struct VentibotService {
    config: Config,
    transport: Arc<dyn TransportClient>,
    event_tx: mpsc::Sender<TransportEvent>,
    event_rx: mpsc::Receiver<TransportEvent>,
}

impl VentibotService {
    /// 创建网关服务
    pub fn new(config: Config, transport: Arc<dyn TransportClient>) -> Self {
        let (event_tx, event_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);

        Self {
            config,
            transport,
            event_tx,
            event_rx,
        }
    }

    /// 获取事件发送端
    ///
    /// 传输客户端集成方通过该通道投递生命周期事件与入站消息。
    pub fn event_sender(&self) -> mpsc::Sender<TransportEvent> {
        self.event_tx.clone()
    }

    /// 运行服务直到收到 Ctrl+C
    pub async fn run(mut self) -> Result<()> {
        info!("网关服务启动");

        // 错误日志在投递守卫与稳定性管理器之间共享
        let error_log = Arc::new(ErrorLog::new());

        let stability = StabilityManager::new(
            self.transport.clone(),
            &self.config.stability,
            self.config.transport.session_dir.clone(),
            error_log.clone(),
        )?;

        let delivery = DeliveryGuard::new(
            self.transport.clone(),
            CircuitBreaker::new(),
            error_log.clone(),
        );

        let ai = Arc::new(AiEngine::new(
            self.build_provider()?,
            KnowledgeBase::new(&self.config.knowledge),
        ));

        let router = ConversationRouter::new(delivery, ai);
        router.start_cleanup_task();

        let queue = MessageQueue::new();
        {
            let router = Arc::clone(&router);
            queue.start_processing(move |message| {
                let router = Arc::clone(&router);
                async move { router.route(message).await }
            });
        }

        // Web 服务独立任务运行，异常退出只记录不拖垮网关
        let web_stability = stability.clone();
        let port = self.config.server.port;
        tokio::spawn(async move {
            if let Err(e) = WebServer::new(port).start(web_stability).await {
                error!(error = %e, "Web 服务异常退出");
            }
        });

        stability.start().await;

        loop {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {
                    info!("收到退出信号，开始清理");
                    stability.cleanup_before_exit().await;
                    info!("网关服务已退出");
                    return Ok(());
                }
                event = self.event_rx.recv() => {
                    let Some(event) = event else {
                        warn!("事件通道已关闭，服务退出");
                        stability.cleanup_before_exit().await;
                        return Ok(());
                    };

                    match event {
                        TransportEvent::Message(message) => {
                            stability.note_message();

                            let completion = queue.enqueue(message);
                            tokio::spawn(async move {
                                if let Ok(Err(e)) = completion.await {
                                    warn!(error = %e, "消息路由失败");
                                }
                            });
                        }
                        other => stability.handle_event(&other).await,
                    }
                }
            }
        }
    }

    /// 根据配置构建 AI Provider
    fn build_provider(&self) -> Result<Arc<GeminiProvider>> {
        let api_key = self
            .config
            .ai
            .api_key
            .clone()
            .filter(|key| !key.is_empty())
            .ok_or_else(|| Error::Config("缺少 AI API Key（GEMINI_API_KEY）".to_string()))?;

        let provider = GeminiProvider::new(GeminiConfig {
            api_key,
            model: self.config.ai.model.clone(),
            base_url: self.config.ai.base_url.clone(),
        })?;

        Ok(Arc::new(provider))
    }
}
