//! 协议流抽象
//!
//! HTTP/1 与 HTTP/2 两种流变体的静态分派封装：
//! 变体在嗅探首包时一次性确定，之后不再改变。

pub mod frame;
pub mod http1;
pub mod http2;

use std::net::SocketAddr;
use std::sync::Arc;

use bytes::{Bytes, BytesMut};

use crate::error::VoleResult;
use crate::server::config::ServerConfig;
use crate::server::protocol_detector::DetectedProtocol;
use crate::server::request::{HttpVersion, Request};
use crate::server::response::Response;

use http1::Http1Stream;
use http2::Http2Stream;

/// 连接的根协议流
pub enum ProtocolStream {
    /// HTTP/1.x 变体
    Http1(Http1Stream),
    /// HTTP/2 变体
    Http2(Http2Stream),
}

impl ProtocolStream {
    /// 按嗅探结果构造对应的流变体
    pub fn from_detected(
        detected: DetectedProtocol,
        config: Arc<ServerConfig>,
        peer_addr: SocketAddr,
    ) -> Option<Self> {
        match detected {
            DetectedProtocol::Http1_0 | DetectedProtocol::Http1_1 => {
                Some(ProtocolStream::Http1(Http1Stream::new(config, peer_addr)))
            }
            DetectedProtocol::Http2 => {
                Some(ProtocolStream::Http2(Http2Stream::new(config, peer_addr)))
            }
            _ => None,
        }
    }

    /// 喂入收到的字节，返回完成的请求；
    /// 需要回写的控制字节追加到 `out`
    pub fn recv(&mut self, data: &[u8], out: &mut BytesMut) -> VoleResult<Vec<Request>> {
        match self {
            ProtocolStream::Http1(stream) => stream.recv(data),
            ProtocolStream::Http2(stream) => stream.recv(data, out),
        }
    }

    /// 为请求创建匹配线路形态的响应对象
    pub fn make_response(&self, request: &Request) -> Response {
        match self {
            ProtocolStream::Http1(_) => Response::new_http1(
                request.version.unwrap_or(HttpVersion::Http1_1),
                request.close_connection,
            ),
            ProtocolStream::Http2(stream) => {
                Response::new_http2(request.stream_id(), stream.hpack())
            }
        }
    }

    /// 读超时的尽力而为响应字节
    pub fn timeout_response(&self) -> Bytes {
        match self {
            ProtocolStream::Http1(stream) => stream.timeout_response(),
            ProtocolStream::Http2(stream) => stream.timeout_response(),
        }
    }

    /// 协议错误的尽力而为收尾字节
    pub fn error_response(&self, error: &crate::error::VoleError) -> Bytes {
        match self {
            ProtocolStream::Http1(_) => match error {
                crate::error::VoleError::RequestTooLarge(_) => Bytes::from_static(
                    b"HTTP/1.1 413 Payload Too Large\r\nConnection: close\r\n\r\n413 Payload Too Large\r\n",
                ),
                _ => Bytes::from_static(
                    b"HTTP/1.1 400 Bad Request\r\nConnection: close\r\n\r\n400 Bad Request\r\n",
                ),
            },
            ProtocolStream::Http2(stream) => stream.goaway_for(error),
        }
    }

    /// 对端是否请求了连接收尾（HTTP/2 GOAWAY）
    pub fn closing(&self) -> bool {
        match self {
            ProtocolStream::Http1(_) => false,
            ProtocolStream::Http2(stream) => stream.closing(),
        }
    }
}
