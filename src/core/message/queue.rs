//! 消息队列模块
//!
//! 本模块实现了一个有界 FIFO 消息队列。
//!
//! # 功能特点
//! 1. **入队不阻塞**：`enqueue` 立即返回，路由结果通过 oneshot 通道回传
//! 2. **容量限制**：队列容量上限 100，溢出时挤出最旧的待处理条目，
//!    被挤出条目的结果以 `Error::Evicted` 显式回传，绝不悬挂
//! 3. **单消费者**：一个后台任务严格按 FIFO 顺序逐条处理到完成，
//!    保证对话状态的变更不会并发交错
//!
//! 单条消息的处理失败通过该条目的结果回传，不会终止消费循环。

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::{oneshot, Notify};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::types::InboundMessage;
use crate::infra::error::{Error, Result};

/// 队列容量上限
pub const QUEUE_CAPACITY: usize = 100;

/// 队列条目
///
/// 入队后由队列独占，出队后交给路由处理函数。
struct QueueEntry {
    /// 待路由的消息
    message: InboundMessage,
    /// 入队时间
    enqueued_at: Instant,
    /// 处理结果回传通道
    completion: oneshot::Sender<Result<()>>,
}

/// 消息队列
///
/// 有界 FIFO，单消费者串行处理。
#[derive(Clone)]
pub struct MessageQueue {
    /// 待处理条目
    entries: Arc<Mutex<VecDeque<QueueEntry>>>,
    /// 入队通知
    notify: Arc<Notify>,
    /// 消费循环是否已启动
    started: Arc<AtomicBool>,
}

impl MessageQueue {
    /// 创建新的消息队列
    pub fn new() -> Self {
        info!(cap = QUEUE_CAPACITY, "消息队列创建成功");

        Self {
            entries: Arc::new(Mutex::new(VecDeque::new())),
            notify: Arc::new(Notify::new()),
            started: Arc::new(AtomicBool::new(false)),
        }
    }

    /// 将消息入队
    ///
    /// 不阻塞；返回的 oneshot 接收端携带该消息的路由结果。
    /// 队列已满时挤出最旧的待处理条目，被挤出条目的结果
    /// 以 `Error::Evicted` 回传。
    ///
    /// # 日志记录
    /// - DEBUG: 消息入队
    /// - WARN: 队列已满，挤出最旧条目
    pub fn enqueue(&self, message: InboundMessage) -> oneshot::Receiver<Result<()>> {
        let (tx, rx) = oneshot::channel();

        let evicted = {
            let mut entries = self
                .entries
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());

            let evicted = if entries.len() >= QUEUE_CAPACITY {
                entries.pop_front()
            } else {
                None
            };

            entries.push_back(QueueEntry {
                message,
                enqueued_at: Instant::now(),
                completion: tx,
            });

            evicted
        };

        if let Some(entry) = evicted {
            warn!(
                message_id = %entry.message.id,
                cap = QUEUE_CAPACITY,
                "队列已满，挤出最旧条目"
            );
            let _ = entry.completion.send(Err(Error::Evicted));
        }

        debug!(queued = self.len(), "消息已入队");
        self.notify.notify_one();

        rx
    }

    /// 获取队列当前大小
    pub fn len(&self) -> usize {
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }

    /// 检查队列是否为空
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// 启动消费循环
    ///
    /// 只会启动一次；重复调用为空操作。后台任务严格按 FIFO 顺序
    /// 逐条调用处理函数，上一条处理完成前不会取出下一条。
    ///
    /// # 参数说明
    /// * `processor` - 消息处理函数，返回该条消息的路由结果
    pub fn start_processing<F, Fut>(&self, processor: F)
    where
        F: Fn(InboundMessage) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = Result<()>> + Send,
    {
        if self.started.swap(true, Ordering::SeqCst) {
            warn!("消息队列消费循环已在运行");
            return;
        }

        let entries = self.entries.clone();
        let notify = self.notify.clone();

        tokio::spawn(async move {
            info!("消息队列消费循环已启动");

            loop {
                let entry = {
                    let mut guard = entries
                        .lock()
                        .unwrap_or_else(|poisoned| poisoned.into_inner());
                    guard.pop_front()
                };

                let Some(entry) = entry else {
                    notify.notified().await;
                    continue;
                };

                debug!(
                    message_id = %entry.message.id,
                    waited_ms = entry.enqueued_at.elapsed().as_millis() as u64,
                    "开始处理消息"
                );

                let result = processor(entry.message).await;

                if let Err(e) = &result {
                    warn!(error = %e, "消息处理失败");
                }

                // 调用方可能已放弃等待结果
                let _ = entry.completion.send(result);
            }
        });
    }
}

impl Default for MessageQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[tokio::test]
    async fn test_fifo_order() {
        let queue = MessageQueue::new();
        let processed = Arc::new(Mutex::new(Vec::new()));

        let rx1 = queue.enqueue(InboundMessage::text("m1", "user", "uno"));
        let rx2 = queue.enqueue(InboundMessage::text("m2", "user", "dos"));
        let rx3 = queue.enqueue(InboundMessage::text("m3", "user", "tres"));

        let seen = processed.clone();
        queue.start_processing(move |msg| {
            let seen = seen.clone();
            async move {
                seen.lock().unwrap().push(msg.id.clone());
                Ok(())
            }
        });

        assert!(rx1.await.unwrap().is_ok());
        assert!(rx2.await.unwrap().is_ok());
        assert!(rx3.await.unwrap().is_ok());

        assert_eq!(*processed.lock().unwrap(), vec!["m1", "m2", "m3"]);
    }

    #[tokio::test]
    async fn test_overflow_evicts_oldest_with_error() {
        let queue = MessageQueue::new();

        let mut receivers = Vec::new();
        for i in 0..QUEUE_CAPACITY {
            let msg = InboundMessage::text(&format!("m{}", i), "user", "texto");
            receivers.push(queue.enqueue(msg));
        }
        assert_eq!(queue.len(), QUEUE_CAPACITY);

        // 第 101 条挤出最旧的 m0
        let rx_extra = queue.enqueue(InboundMessage::text("extra", "user", "texto"));
        assert_eq!(queue.len(), QUEUE_CAPACITY);

        let evicted_result = receivers.remove(0).await.unwrap();
        assert!(matches!(evicted_result, Err(Error::Evicted)));

        // 其余条目仍在队列中，未被解决
        drop(rx_extra);
    }

    #[tokio::test]
    async fn test_processing_failure_does_not_stop_loop() {
        let queue = MessageQueue::new();
        let count = Arc::new(AtomicUsize::new(0));

        let rx1 = queue.enqueue(InboundMessage::text("bad", "user", "falla"));
        let rx2 = queue.enqueue(InboundMessage::text("good", "user", "bien"));

        let counter = count.clone();
        queue.start_processing(move |msg| {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                if msg.id == "bad" {
                    Err(Error::Unknown("fallo de prueba".to_string()))
                } else {
                    Ok(())
                }
            }
        });

        assert!(rx1.await.unwrap().is_err());
        assert!(rx2.await.unwrap().is_ok());
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_start_processing_is_single_shot() {
        let queue = MessageQueue::new();
        queue.start_processing(|_msg| async { Ok(()) });
        // 第二次启动为空操作，不会产生竞争的消费者
        queue.start_processing(|_msg| async { Ok(()) });
    }
}
