use anyhow::Context;
use clap::Parser;
use clova_proxy::config::Config;
use clova_proxy::server::{self, RelayState};
use std::sync::Arc;

#[derive(Parser, Debug)]
#[command(name = "clova-proxy")]
#[command(about = "Local CORS relay for the Clova Studio chat-completions API", long_about = None)]
struct Args {
    /// 配置文件路径（不存在时使用默认配置）
    #[arg(short, long, default_value = "clova-proxy.yaml")]
    config: String,

    /// 监听端口（覆盖配置文件）
    #[arg(short, long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 初始化日志
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    let mut config = Config::load_or_default(&args.config)
        .with_context(|| format!("加载配置失败: {}", args.config))?;
    if let Some(port) = args.port {
        config.server.port = port;
    }

    let addr = config.listen_addr();
    let state = Arc::new(RelayState::new(config).context("创建上游客户端失败")?);

    server::start_server(state, addr).await?;

    Ok(())
}
