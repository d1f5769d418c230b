//! 监听器
//!
//! 接受入站连接并派发给池中的空闲处理器；池子满员时
//! 直接回一个 503 后关闭，接受循环永不被请求处理阻塞。
//! 周期清理任务与接受循环并行运行。

use std::sync::Arc;
use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio::net::TcpListener;

use crate::error::{VoleError, VoleResult};
use crate::server::config::ServerConfig;
use crate::server::handler::RequestHandler;
use crate::server::pool::ConnectionHandlerPool;
use crate::utils::logger::{info, warn};

/// 池子满员时的拒绝应答
const TOO_BUSY_RESPONSE: &[u8] =
    b"HTTP/1.1 503 Service Unavailable\r\nConnection: close\r\n\r\n503 too many connections\r\n";

/// HTTP 监听器
pub struct HttpListener {
    config: Arc<ServerConfig>,
    pool: Arc<ConnectionHandlerPool>,
    listener: TcpListener,
}

impl HttpListener {
    /// 绑定监听地址并建池。端口为 0 时由系统分配。
    pub async fn bind(
        config: ServerConfig,
        handler: Arc<dyn RequestHandler>,
    ) -> VoleResult<Self> {
        let config = Arc::new(config);
        let pool = Arc::new(ConnectionHandlerPool::new(config.clone(), handler)?);
        let listener = TcpListener::bind(config.listen_addr())
            .await
            .map_err(VoleError::IoError)?;
        let scheme = if pool.tls_enabled() { "https" } else { "http" };
        info!(
            "🚀 VOLE Engine 监听 {}://{}",
            scheme,
            listener.local_addr().map_err(VoleError::IoError)?
        );
        Ok(Self {
            config,
            pool,
            listener,
        })
    }

    /// 实际监听地址（端口 0 绑定后查询分配结果用）
    pub fn local_addr(&self) -> VoleResult<std::net::SocketAddr> {
        self.listener.local_addr().map_err(VoleError::IoError)
    }

    /// 处理器池（诊断用）
    pub fn pool(&self) -> &Arc<ConnectionHandlerPool> {
        &self.pool
    }

    /// 运行接受循环与周期清理，直到监听套接字出错。
    pub async fn serve(self) -> VoleResult<()> {
        let cleanup_pool = self.pool.clone();
        let cleanup_interval = Duration::from_millis(self.config.cleanup_interval.max(1));
        let cleanup_task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(cleanup_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                cleanup_pool.cleanup();
            }
        });

        let result = self.accept_loop().await;
        cleanup_task.abort();
        result
    }

    /// 接受循环：每条连接要么交给处理器，要么立即拒绝
    async fn accept_loop(&self) -> VoleResult<()> {
        loop {
            let (socket, peer_addr) = self
                .listener
                .accept()
                .await
                .map_err(VoleError::IoError)?;
            match self.pool.acquire() {
                Some(handler) => handler.bind(socket, peer_addr),
                None => {
                    warn!("🚦 [监听器] 池满，拒绝连接: {}", peer_addr);
                    // 拒绝写放到独立任务里，不让慢客户端拖住接受循环
                    tokio::spawn(async move {
                        let mut socket = socket;
                        let _ = socket.write_all(TOO_BUSY_RESPONSE).await;
                        let _ = socket.shutdown().await;
                    });
                }
            }
        }
    }

    /// 绑定并一直服务，常规启动入口。
    pub async fn run(config: ServerConfig, handler: Arc<dyn RequestHandler>) -> VoleResult<()> {
        Self::bind(config, handler).await?.serve().await
    }
}
