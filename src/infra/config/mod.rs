//! 配置管理系统模块
//!
//! 本模块负责加载和管理网关配置。
//!
//! # 配置文件示例
//! ```toml
//! [server]
//! port = 3000
//!
//! [transport]
//! session_dir = ".wwebjs_auth/session-client"
//! client_id = "electronics-js-bot"
//!
//! [stability]
//! ping_url = "${APP_URL}"
//!
//! [ai]
//! api_key = "${GEMINI_API_KEY}"
//! model = "gemini-1.5-flash"
//!
//! [knowledge]
//! products_path = "datos/laptops.txt"
//! company_path = "datos/info_empresa.txt"
//! ```

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::{env, fs};

/// 主配置结构
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// HTTP 服务配置
    #[serde(default)]
    pub server: ServerConfig,
    /// 传输层配置
    #[serde(default)]
    pub transport: TransportConfig,
    /// 稳定性系统配置
    #[serde(default)]
    pub stability: StabilityConfig,
    /// AI 配置
    #[serde(default)]
    pub ai: AiConfig,
    /// 知识库配置（产品/公司信息文件）
    #[serde(default)]
    pub knowledge: KnowledgeConfig,
}

/// HTTP 服务配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// 监听端口
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { port: 3000 }
    }
}

/// 传输层配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportConfig {
    /// 会话状态目录（整体删除可强制重新认证）
    pub session_dir: PathBuf,
    /// 客户端标识
    pub client_id: String,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            session_dir: PathBuf::from(".wwebjs_auth/session-client"),
            client_id: "electronics-js-bot".to_string(),
        }
    }
}

/// 稳定性系统配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StabilityConfig {
    /// keep-alive 探测目标 URL
    pub ping_url: String,
}

impl Default for StabilityConfig {
    fn default() -> Self {
        Self {
            ping_url: "https://jic-ventibot.onrender.com/".to_string(),
        }
    }
}

/// AI 配置
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AiConfig {
    /// API Key
    pub api_key: Option<String>,
    /// 模型名称
    pub model: Option<String>,
    /// Base URL
    pub base_url: Option<String>,
}

/// 知识库配置
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct KnowledgeConfig {
    /// 产品信息文件路径
    pub products_path: Option<PathBuf>,
    /// 公司信息文件路径
    pub company_path: Option<PathBuf>,
}

/// 配置加载器
#[derive(Debug, Clone)]
pub struct ConfigLoader;

impl ConfigLoader {
    /// 创建新的配置加载器
    pub fn new() -> Self {
        Self
    }

    /// 加载配置
    pub async fn load(&self, path: &str) -> Result<Config, super::error::Error> {
        tracing::info!(path = path, "加载配置文件");

        // 检查文件是否存在
        if !PathBuf::from(path).exists() {
            tracing::warn!(path = path, "配置文件不存在，使用默认配置");
            return Ok(Config::default());
        }

        // 读取文件内容
        let content = fs::read_to_string(path)
            .map_err(|e| super::error::Error::Config(format!("读取配置文件失败: {}", e)))?;

        // 解析 TOML
        let mut config: Config = toml::from_str(&content)
            .map_err(|e| super::error::Error::Config(format!("解析配置文件失败: {}", e)))?;

        // 环境变量替换
        self.substitute_env_vars(&mut config);

        tracing::info!("配置加载成功");
        Ok(config)
    }

    /// 替换环境变量
    ///
    /// 将 `${VAR_NAME}` 格式的字符串替换为对应的环境变量值
    fn substitute_env_vars(&self, config: &mut Config) {
        config.stability.ping_url = self.replace_env_vars(&config.stability.ping_url);

        if let Some(api_key) = &config.ai.api_key {
            config.ai.api_key = Some(self.replace_env_vars(api_key));
        }
        if let Some(base_url) = &config.ai.base_url {
            config.ai.base_url = Some(self.replace_env_vars(base_url));
        }
    }

    /// 替换字符串中的环境变量
    fn replace_env_vars(&self, input: &str) -> String {
        let pattern = r"\$\{([^}]+)\}";

        // 使用正则表达式替换环境变量
        let re = regex::Regex::new(pattern).unwrap();
        let result = re.replace_all(input, |caps: &regex::Captures| {
            let var_name = &caps[1];
            env::var(var_name).unwrap_or_else(|_| caps[0].to_string())
        });

        result.to_string()
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_missing_config_uses_defaults() {
        let loader = ConfigLoader::new();
        let config = loader.load("no-such-file.toml").await.unwrap();

        assert_eq!(config.server.port, 3000);
        assert_eq!(config.transport.client_id, "electronics-js-bot");
    }

    #[test]
    fn test_env_var_substitution() {
        env::set_var("VENTIBOT_TEST_URL", "https://example.test/");

        let loader = ConfigLoader::new();
        let mut config = Config::default();
        config.stability.ping_url = "${VENTIBOT_TEST_URL}".to_string();
        loader.substitute_env_vars(&mut config);

        assert_eq!(config.stability.ping_url, "https://example.test/");
    }

    #[test]
    fn test_unknown_env_var_left_as_is() {
        let loader = ConfigLoader::new();
        let replaced = loader.replace_env_vars("${VENTIBOT_NO_SUCH_VAR}");

        assert_eq!(replaced, "${VENTIBOT_NO_SUCH_VAR}");
    }
}
