//! AI 引擎模块
//!
//! 在 Provider 之上封装提示词构建、知识库选择、超时控制与重试：
//! - 每次生成强制 60 秒超时
//! - 仅超时触发重试，最多 3 次尝试（有界循环，不递归）
//! - Provider 自身的错误立即向上传播，由路由层回退到固定文案
//! - 用户表达购买意向时在生成文本末尾追加购买选项

use dashmap::DashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::provider::AiProvider;
use crate::core::routing::messages;
use crate::infra::config::KnowledgeConfig;
use crate::infra::error::{Error, Result};

/// 单次生成的超时时间
pub const GENERATION_TIMEOUT: Duration = Duration::from_secs(60);

/// 最大生成尝试次数（仅超时重试）
pub const MAX_GENERATION_ATTEMPTS: u32 = 3;

/// 购买意向关键词
const PURCHASE_KEYWORDS: &[&str] = &[
    "comprar",
    "cotizar",
    "llevar",
    "adquirir",
    "quiero comprar",
    "precio",
    "costo",
];

/// 知识库数据集类别
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Dataset {
    /// 产品信息
    Products,
    /// 公司信息
    Company,
}

/// 知识库
///
/// 从配置的文本文件加载产品/公司信息，带内存缓存。
pub struct KnowledgeBase {
    products_path: Option<PathBuf>,
    company_path: Option<PathBuf>,
    cache: DashMap<PathBuf, String>,
}

impl KnowledgeBase {
    /// 从知识库配置创建
    pub fn new(config: &KnowledgeConfig) -> Self {
        Self {
            products_path: config.products_path.clone(),
            company_path: config.company_path.clone(),
            cache: DashMap::new(),
        }
    }

    /// 根据用户消息选择数据集内容
    fn context_for(&self, user_message: &str) -> String {
        match select_dataset(user_message) {
            Dataset::Products => self.load(
                self.products_path.as_deref(),
                "No hay productos disponibles actualmente.",
            ),
            Dataset::Company => self.load(
                self.company_path.as_deref(),
                "No hay información de la empresa disponible.",
            ),
        }
    }

    /// 读取文件内容，缓存命中时不重复读取
    fn load(&self, path: Option<&Path>, fallback: &str) -> String {
        let Some(path) = path else {
            return fallback.to_string();
        };

        if let Some(cached) = self.cache.get(path) {
            return cached.clone();
        }

        match std::fs::read_to_string(path) {
            Ok(content) => {
                self.cache.insert(path.to_path_buf(), content.clone());
                content
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "知识库文件读取失败");
                fallback.to_string()
            }
        }
    }
}

/// 选择与用户消息相关的数据集
fn select_dataset(user_message: &str) -> Dataset {
    let text = user_message.to_lowercase();

    if text.contains("laptop")
        || text.contains("producto")
        || text.contains("stock")
        || text.contains("precio")
    {
        return Dataset::Products;
    }

    // 默认公司信息
    Dataset::Company
}

/// 判断用户是否表达购买意向
fn has_purchase_intent(user_message: &str) -> bool {
    let text = user_message.to_lowercase();
    PURCHASE_KEYWORDS.iter().any(|kw| text.contains(kw))
}

/// AI 引擎
pub struct AiEngine {
    provider: Arc<dyn AiProvider>,
    knowledge: KnowledgeBase,
}

impl AiEngine {
    /// 创建 AI 引擎
    pub fn new(provider: Arc<dyn AiProvider>, knowledge: KnowledgeBase) -> Self {
        info!(provider = provider.name(), "AI 引擎已创建");
        Self {
            provider,
            knowledge,
        }
    }

    /// 为一条用户消息生成回复
    ///
    /// # 参数说明
    /// * `user_message` - 用户消息正文
    /// * `user_context` - 该用户的历史对话上下文
    ///
    /// # 错误
    /// - `Error::Timeout`: 3 次尝试全部超时
    /// - `Error::Ai`: Provider 返回错误（不重试）
    pub async fn generate_reply(&self, user_message: &str, user_context: &str) -> Result<String> {
        let prompt = self.build_prompt(user_message, user_context);

        let mut attempt = 1;
        loop {
            debug!(
                attempt = attempt,
                max = MAX_GENERATION_ATTEMPTS,
                "生成回复"
            );

            match tokio::time::timeout(GENERATION_TIMEOUT, self.provider.generate(&prompt)).await {
                Ok(Ok(mut text)) => {
                    if has_purchase_intent(user_message) {
                        text.push_str(messages::OPCIONES_COMPRA);
                    }
                    return Ok(text);
                }
                Ok(Err(e)) => return Err(e),
                Err(_elapsed) => {
                    warn!(
                        attempt = attempt,
                        max = MAX_GENERATION_ATTEMPTS,
                        "生成超时"
                    );
                    if attempt >= MAX_GENERATION_ATTEMPTS {
                        return Err(Error::Timeout("生成回复超时".to_string()));
                    }
                    attempt += 1;
                }
            }
        }
    }

    /// 构建提示词
    fn build_prompt(&self, user_message: &str, user_context: &str) -> String {
        let dataset_context = self.knowledge.context_for(user_message);

        format!(
            "Eres un asistente virtual llamado Electra amigable y profesional de ElectronicsJS. \
             Tu objetivo es proporcionar la mejor atención posible siguiendo estas pautas:\n\
             \nCONTEXTO RELEVANTE:\n{}\
             \nHistorial del usuario: {}\
             \nRESPONDE A: \"{}\"\n\
             FORMATO DE RESPUESTA:\n\
             - Mantén las respuestas concisas (máximo 4-5 líneas)\n\
             - Usa viñetas para listas largas\n\
             - Incluye emojis relevantes ocasionalmente",
            dataset_context, user_context, user_message
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// 可编程行为的假 Provider
    struct MockProvider {
        calls: AtomicU32,
        /// 前 N 次调用挂起（模拟超时）
        hang_first: u32,
        /// 是否始终返回错误
        always_fail: bool,
    }

    #[async_trait]
    impl AiProvider for MockProvider {
        fn name(&self) -> &str {
            "mock"
        }

        async fn generate(&self, _prompt: &str) -> Result<String> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if self.always_fail {
                return Err(Error::Ai("cuota agotada".to_string()));
            }
            if call < self.hang_first {
                tokio::time::sleep(Duration::from_secs(3600)).await;
            }
            Ok("Claro, tenemos varias opciones disponibles.".to_string())
        }
    }

    fn engine_with(provider: MockProvider) -> AiEngine {
        AiEngine::new(
            Arc::new(provider),
            KnowledgeBase::new(&KnowledgeConfig::default()),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_retries_then_succeeds() {
        let engine = engine_with(MockProvider {
            calls: AtomicU32::new(0),
            hang_first: 2,
            always_fail: false,
        });

        let reply = engine.generate_reply("¿tienen laptops?", "").await.unwrap();
        assert!(reply.contains("opciones disponibles"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_all_timeouts_exhaust_attempts() {
        let engine = engine_with(MockProvider {
            calls: AtomicU32::new(0),
            hang_first: u32::MAX,
            always_fail: false,
        });

        let result = engine.generate_reply("hola", "").await;
        assert!(matches!(result, Err(Error::Timeout(_))));
    }

    #[tokio::test]
    async fn test_provider_error_is_not_retried() {
        let provider = MockProvider {
            calls: AtomicU32::new(0),
            hang_first: 0,
            always_fail: true,
        };
        let engine = AiEngine::new(
            Arc::new(provider),
            KnowledgeBase::new(&KnowledgeConfig::default()),
        );

        let result = engine.generate_reply("hola", "").await;
        assert!(matches!(result, Err(Error::Ai(_))));
    }

    #[tokio::test]
    async fn test_purchase_intent_appends_options() {
        let engine = engine_with(MockProvider {
            calls: AtomicU32::new(0),
            hang_first: 0,
            always_fail: false,
        });

        let reply = engine
            .generate_reply("quiero comprar una laptop", "")
            .await
            .unwrap();
        assert!(reply.contains("La chorrera"));

        let plain = engine.generate_reply("¿qué horario tienen?", "").await.unwrap();
        assert!(!plain.contains("La chorrera"));
    }

    #[test]
    fn test_dataset_selection() {
        assert_eq!(select_dataset("¿tienen laptops HP?"), Dataset::Products);
        assert_eq!(select_dataset("¿cuál es el precio?"), Dataset::Products);
        assert_eq!(select_dataset("¿cuál es su misión?"), Dataset::Company);
    }
}
