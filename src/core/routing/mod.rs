//! 对话路由模块
//!
//! - engine：按优先级执行的路由状态机
//! - state：按用户维度的状态存储
//! - spam：垃圾信息识别
//! - hours：营业时间判断
//! - messages：西班牙语固定文案

pub mod engine;
pub mod hours;
pub mod messages;
pub mod spam;
pub mod state;
