//! 消息类型定义模块

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 媒体类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    /// 图片
    Image,
    /// 视频
    Video,
    /// 语音
    Audio,
    /// 文档
    Document,
    /// 贴纸
    Sticker,
}

/// 入站消息
///
/// 由传输客户端投递，路由引擎消费。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboundMessage {
    /// 消息 ID（由传输层分配）
    pub id: String,
    /// 发送者用户 ID
    pub from: String,
    /// 消息正文
    pub body: String,
    /// 携带的媒体类型（纯文本消息为 None）
    pub media: Option<MediaKind>,
    /// 接收时间
    pub timestamp: DateTime<Utc>,
}

impl InboundMessage {
    /// 构造一条纯文本消息
    pub fn text(id: &str, from: &str, body: &str) -> Self {
        Self {
            id: id.to_string(),
            from: from.to_string(),
            body: body.to_string(),
            media: None,
            timestamp: Utc::now(),
        }
    }

    /// 构造一条媒体消息
    pub fn with_media(id: &str, from: &str, body: &str, media: MediaKind) -> Self {
        Self {
            media: Some(media),
            ..Self::text(id, from, body)
        }
    }
}
