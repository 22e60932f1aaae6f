//! VentiBot 智能客服网关
//!
//! 位于聊天传输层与文本生成服务之间的对话网关：
//! - **core**：有界消息队列、投递守卫与熔断器、对话路由状态机
//! - **ai**：生成服务接口（Gemini 实现）、提示词构建与超时重试
//! - **transport**：传输客户端契约与会话管理
//! - **stability**：keep-alive 探测、健康巡检与有界重连
//! - **web**：健康检查与 QR 码端点
//! - **infra**：配置、错误与日志

pub mod ai;
pub mod core;
pub mod infra;
pub mod service;
pub mod stability;
pub mod transport;
pub mod web;
