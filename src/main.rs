//! VentiBot 网关入口
//!
//! 子命令：
//! - `start`：启动网关服务（消息队列、路由、稳定性系统与 Web 端点）
//! - `check`：加载并校验配置后退出
//! - `version`：打印版本信息

use clap::{Parser, Subcommand};
use std::sync::Arc;
use tracing::{error, info};

use ventibot::infra::config::ConfigLoader;
use ventibot::infra::error::Result;
use ventibot::infra::logging::{self, LogLevel};
use ventibot::service::VentibotService;
use ventibot::transport::NullTransport;

#[derive(Parser)]
#[command(name = "ventibot")]
#[command(about = "WhatsApp 智能客服网关", long_about = None)]
struct Cli {
    /// 配置文件路径
    #[arg(short, long, default_value = "config.toml")]
    config: String,

    /// 输出调试日志
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// 启动网关服务
    Start,
    /// 校验配置文件
    Check,
    /// 打印版本信息
    Version,
}

#[tokio::main]
async fn main() {
    dotenv::dotenv().ok();

    let cli = Cli::parse();

    let level = if cli.verbose {
        LogLevel::Debug
    } else {
        LogLevel::Info
    };
    logging::init(level);

    if let Err(e) = run(cli).await {
        error!(error = %e, "网关退出");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    let loader = ConfigLoader::new();

    match cli.command.unwrap_or(Commands::Start) {
        Commands::Start => {
            let config = loader.load(&cli.config).await?;
            let service = VentibotService::new(config, Arc::new(NullTransport));
            service.run().await
        }
        Commands::Check => {
            let config = loader.load(&cli.config).await?;
            info!(
                port = config.server.port,
                ping_url = %config.stability.ping_url,
                model = config.ai.model.as_deref().unwrap_or("(默认)"),
                "配置校验通过"
            );
            Ok(())
        }
        Commands::Version => {
            info!(version = env!("CARGO_PKG_VERSION"), "ventibot");
            Ok(())
        }
    }
}
