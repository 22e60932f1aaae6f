//! 消息处理模块
//!
//! 包含消息类型、有界队列和出站投递保护。

pub mod delivery;
pub mod queue;
pub mod types;
