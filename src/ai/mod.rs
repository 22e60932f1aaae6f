//! AI 模块
//!
//! - provider：文本生成服务接口与 Gemini 实现
//! - engine：提示词构建、超时控制与重试

pub mod engine;
pub mod provider;
