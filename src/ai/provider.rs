//! AI Provider 模块
//!
//! 定义文本生成服务的统一接口，并实现 Gemini Provider。
//!
//! # 配置文件示例
//! ```toml
//! [ai]
//! api_key = "${GEMINI_API_KEY}"
//! model = "gemini-1.5-flash"
//! base_url = "https://generativelanguage.googleapis.com"
//! ```

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, error, info};

use crate::infra::error::{Error, Result};

/// Gemini 默认模型
pub const GEMINI_DEFAULT_MODEL: &str = "gemini-1.5-flash";

/// Gemini 默认 Base URL
pub const GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com";

/// HTTP 客户端超时
const HTTP_TIMEOUT: Duration = Duration::from_secs(90);

/// 文本生成服务接口
///
/// 生成服务被视为黑盒：给定提示词返回生成文本或失败，
/// 超时控制由调用方（AiEngine）负责。
#[async_trait]
pub trait AiProvider: Send + Sync {
    /// 获取 Provider 名称
    fn name(&self) -> &str;

    /// 生成一段回复文本
    async fn generate(&self, prompt: &str) -> Result<String>;
}

/// Gemini Provider 配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeminiConfig {
    /// API Key
    pub api_key: String,
    /// 模型名称
    pub model: Option<String>,
    /// API Base URL
    pub base_url: Option<String>,
}

/// Gemini 生成请求
#[derive(Debug, Serialize)]
struct GeminiRequest {
    contents: Vec<GeminiContent>,
}

/// Gemini 内容块
#[derive(Debug, Serialize, Deserialize)]
struct GeminiContent {
    parts: Vec<GeminiPart>,
}

/// Gemini 文本片段
#[derive(Debug, Serialize, Deserialize)]
struct GeminiPart {
    text: String,
}

/// Gemini 生成响应
#[derive(Debug, Deserialize)]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<GeminiCandidate>,
}

/// Gemini 候选回复
#[derive(Debug, Deserialize)]
struct GeminiCandidate {
    content: GeminiContent,
}

/// Gemini Provider
///
/// 通过 generateContent HTTP 接口调用 Gemini 模型。
#[derive(Clone)]
pub struct GeminiProvider {
    /// 配置
    config: GeminiConfig,
    /// HTTP 客户端
    http_client: reqwest::Client,
}

impl GeminiProvider {
    /// 创建新的 Gemini Provider
    pub fn new(config: GeminiConfig) -> Result<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(HTTP_TIMEOUT)
            .build()
            .map_err(|e| Error::Ai(format!("创建 HTTP 客户端失败: {}", e)))?;

        info!(model = %config.model.as_deref().unwrap_or(GEMINI_DEFAULT_MODEL), "Gemini Provider 已创建");

        Ok(Self {
            config,
            http_client,
        })
    }

    fn get_model(&self) -> &str {
        self.config.model.as_deref().unwrap_or(GEMINI_DEFAULT_MODEL)
    }

    fn get_base_url(&self) -> &str {
        self.config.base_url.as_deref().unwrap_or(GEMINI_BASE_URL)
    }
}

#[async_trait]
impl AiProvider for GeminiProvider {
    fn name(&self) -> &str {
        "gemini"
    }

    /// 调用 generateContent 接口
    ///
    /// # 日志记录
    /// - DEBUG: 发送生成请求
    /// - ERROR: API 返回错误
    async fn generate(&self, prompt: &str) -> Result<String> {
        let model = self.get_model();
        let url = format!(
            "{}/v1beta/models/{}:generateContent?key={}",
            self.get_base_url(),
            model,
            self.config.api_key
        );

        debug!(model = %model, "发送 Gemini 生成请求");

        let request = GeminiRequest {
            contents: vec![GeminiContent {
                parts: vec![GeminiPart {
                    text: prompt.to_string(),
                }],
            }],
        };

        let response = self
            .http_client
            .post(&url)
            .header("Content-Type", "application/json")
            .json(&request)
            .send()
            .await
            .map_err(|e| Error::Ai(format!("Gemini API 请求失败: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            error!(status = ?status, error = %error_text, "Gemini API 错误");
            return Err(Error::Ai(format!("Gemini API 错误: {}", error_text)));
        }

        let body: GeminiResponse = response
            .json()
            .await
            .map_err(|e| Error::Ai(format!("解析 Gemini 响应失败: {}", e)))?;

        let text = body
            .candidates
            .into_iter()
            .next()
            .and_then(|c| c.content.parts.into_iter().next())
            .map(|p| p.text)
            .ok_or_else(|| Error::Ai("Gemini 响应不包含候选文本".to_string()))?;

        Ok(text)
    }
}
