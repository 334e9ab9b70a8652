pub mod cors;
pub mod handlers;

use crate::config::Config;
use crate::upstream::ClovaClient;
use crate::Result;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::signal;
use tracing::{debug, error, info, warn};

/// 所有请求共享的只读状态
#[derive(Debug)]
pub struct RelayState {
    pub config: Config,
    pub upstream: ClovaClient,
}

impl RelayState {
    pub fn new(config: Config) -> Result<Self> {
        let upstream = ClovaClient::new(&config.upstream)?;
        Ok(Self { config, upstream })
    }
}

/// 启动 HTTP 服务器（收到 SIGINT/SIGTERM 后停止）
pub async fn start_server(state: Arc<RelayState>, addr: SocketAddr) -> Result<()> {
    let listener = TcpListener::bind(addr).await?;
    info!("Clova 代理服务器启动: http://{}", addr);
    info!("代理端点: http://{}{}", addr, handlers::RELAY_PATH);
    info!("上游地址: {}", state.upstream.url());

    serve(listener, state, shutdown_signal()).await?;

    info!("代理服务器已关闭");
    Ok(())
}

/// 在已绑定的监听器上接受连接，直到 `shutdown` 完成
pub async fn serve<F>(listener: TcpListener, state: Arc<RelayState>, shutdown: F) -> Result<()>
where
    F: Future<Output = ()>,
{
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            result = listener.accept() => {
                let (stream, peer) = match result {
                    Ok(conn) => conn,
                    Err(e) => {
                        error!("接受连接失败: {}", e);
                        continue;
                    }
                };
                debug!(%peer, "新连接");

                let io = TokioIo::new(stream);
                let state = Arc::clone(&state);

                tokio::spawn(async move {
                    let service = service_fn(move |req| {
                        handlers::handle_request(req, Arc::clone(&state))
                    });

                    if let Err(e) = http1::Builder::new().serve_connection(io, service).await {
                        error!("服务连接错误: {}", e);
                    }
                });
            }
            _ = &mut shutdown => {
                info!("收到关闭信号，停止接受新连接");
                break;
            }
        }
    }

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("设置 Ctrl+C 信号处理失败: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("设置 SIGTERM 信号处理失败: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => warn!("收到 Ctrl+C 信号，开始关闭..."),
        _ = terminate => warn!("收到 SIGTERM 信号，开始关闭..."),
    }
}
