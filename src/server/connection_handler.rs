//! 连接处理器
//!
//! 一个处理器同一时刻至多服务一条 TCP/TLS 连接，连接结束后
//! 回到空闲状态等待池子复用。每条连接由独立的 tokio 任务驱动：
//! 首包嗅探协议并构造根协议流，之后把收到的字节喂给状态机，
//! 每次收到数据都会重置读超时。

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::BytesMut;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio_rustls::TlsAcceptor;
use uuid::Uuid;

use crate::error::{VoleError, VoleResult};
use crate::server::config::ServerConfig;
use crate::server::handler::RequestHandler;
use crate::server::protocol_detector::{detect_protocol, DetectedProtocol};
use crate::server::stream::ProtocolStream;
use crate::utils::logger::{debug, warn};

/// 嗅探失败时的尽力而为应答
const UNKNOWN_PROTOCOL_RESPONSE: &[u8] =
    b"HTTP/1.1 505 HTTP Version Not Supported\r\nConnection: close\r\n\r\n505 HTTP Version Not Supported\r\n";

/// 连接处理器
///
/// 池子持有的是可克隆的句柄；busy 标志是池子判断空闲的唯一依据，
/// 由服务任务在连接结束时清除。
#[derive(Clone)]
pub struct ConnectionHandler {
    id: Uuid,
    busy: Arc<AtomicBool>,
    config: Arc<ServerConfig>,
    tls: Option<TlsAcceptor>,
    handler: Arc<dyn RequestHandler>,
}

impl ConnectionHandler {
    /// 创建处理器，初始即为忙（acquire 成功后立即绑定连接）
    pub(crate) fn new(
        config: Arc<ServerConfig>,
        tls: Option<TlsAcceptor>,
        handler: Arc<dyn RequestHandler>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            busy: Arc::new(AtomicBool::new(true)),
            config,
            tls,
            handler,
        }
    }

    /// 处理器标识
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// 是否正在服务连接
    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }

    /// 尝试把空闲处理器标记为忙，成功返回 true
    pub(crate) fn try_acquire(&self) -> bool {
        self.busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// 释放处理器回空闲态
    pub(crate) fn release(&self) {
        self.busy.store(false, Ordering::Release);
    }

    /// 绑定一条新连接并在独立任务中服务它。
    ///
    /// 任务结束（断开、超时、协议错误）时处理器自动回到空闲态。
    pub fn bind(&self, socket: TcpStream, peer_addr: SocketAddr) {
        let this = self.clone();
        tokio::spawn(async move {
            debug!("🔌 [处理器 {}] 接管连接: {}", this.id, peer_addr);
            match &this.tls {
                Some(acceptor) => match acceptor.accept(socket).await {
                    Ok(tls_stream) => {
                        if let Err(e) = this.serve(tls_stream, peer_addr).await {
                            debug!("🔌 [处理器 {}] 连接结束: {}", this.id, e);
                        }
                    }
                    Err(e) => {
                        warn!("🔐 [处理器 {}] TLS 握手失败 {}: {}", this.id, peer_addr, e);
                    }
                },
                None => {
                    if let Err(e) = this.serve(socket, peer_addr).await {
                        debug!("🔌 [处理器 {}] 连接结束: {}", this.id, e);
                    }
                }
            }
            this.release();
            debug!("🔌 [处理器 {}] 回到空闲", this.id);
        });
    }

    /// 连接服务循环：读字节、喂状态机、调处理器、写响应
    async fn serve<S>(&self, mut socket: S, peer_addr: SocketAddr) -> VoleResult<()>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send,
    {
        let read_timeout = Duration::from_millis(self.config.read_timeout);
        let mut sniff = BytesMut::new();
        let mut stream: Option<ProtocolStream> = None;
        let mut read_buf = [0u8; 16 * 1024];

        loop {
            let n = match tokio::time::timeout(read_timeout, socket.read(&mut read_buf)).await {
                Ok(Ok(0)) => {
                    debug!("🔌 [处理器 {}] 对端断开: {}", self.id, peer_addr);
                    return Ok(());
                }
                Ok(Ok(n)) => n,
                Ok(Err(e)) => return Err(VoleError::NetworkError(e.to_string())),
                Err(_) => {
                    // 读超时：尽力而为通知对端，然后强制关闭
                    warn!("⏱️ [处理器 {}] 读超时: {}", self.id, peer_addr);
                    if let Some(stream) = &stream {
                        let _ = socket.write_all(&stream.timeout_response()).await;
                        let _ = socket.flush().await;
                    }
                    let _ = socket.shutdown().await;
                    return Ok(());
                }
            };

            // 首包嗅探：确定协议前字节先进嗅探缓冲
            let data: &[u8] = if stream.is_none() {
                sniff.extend_from_slice(&read_buf[..n]);
                match detect_protocol(&sniff) {
                    DetectedProtocol::NeedMoreData => continue,
                    DetectedProtocol::Unknown => {
                        let _ = socket.write_all(UNKNOWN_PROTOCOL_RESPONSE).await;
                        let _ = socket.shutdown().await;
                        return Err(VoleError::ProtocolUnknown(format!(
                            "无法识别来自 {} 的协议",
                            peer_addr
                        )));
                    }
                    detected => {
                        debug!("🔌 [处理器 {}] 协议: {:?}", self.id, detected);
                        stream =
                            ProtocolStream::from_detected(detected, self.config.clone(), peer_addr);
                        &sniff
                    }
                }
            } else {
                &read_buf[..n]
            };

            let root = match stream.as_mut() {
                Some(s) => s,
                None => return Ok(()),
            };
            let mut control = BytesMut::new();
            let requests = match root.recv(data, &mut control) {
                Ok(requests) => requests,
                Err(e) => {
                    // 协议级错误：冲刷可能的收尾字节后关连接
                    let farewell = root.error_response(&e);
                    let _ = socket.write_all(&control).await;
                    let _ = socket.write_all(&farewell).await;
                    let _ = socket.flush().await;
                    let _ = socket.shutdown().await;
                    return Err(e);
                }
            };
            if !sniff.is_empty() {
                sniff.clear();
            }
            if !control.is_empty() {
                socket
                    .write_all(&control)
                    .await
                    .map_err(|e| VoleError::NetworkError(e.to_string()))?;
            }

            // 同一连接上的请求严格按到达顺序处理（HTTP/1 流水线保序）
            for request in requests {
                let mut response = root.make_response(&request);
                self.handler.handle(request, &mut response).await;
                if !response.finished() {
                    // 处理器返回但未收尾，补一个空的最终写
                    response.write(b"", true);
                }
                let close = response.close_connection();
                let bytes = response.take_output();
                socket
                    .write_all(&bytes)
                    .await
                    .map_err(|e| VoleError::NetworkError(e.to_string()))?;
                socket
                    .flush()
                    .await
                    .map_err(|e| VoleError::NetworkError(e.to_string()))?;
                if close {
                    let _ = socket.shutdown().await;
                    return Ok(());
                }
            }

            // 对端通过 GOAWAY 请求收尾：已完成的请求照常应答，然后关闭
            if root.closing() {
                let _ = socket.shutdown().await;
                return Ok(());
            }
        }
    }
}
