//! 核心业务模块
//!
//! - message/：消息类型、队列与投递
//! - routing/：对话路由状态机

pub mod message;
pub mod routing;
