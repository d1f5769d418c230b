//! HTTP/1.x 流状态机
//!
//! 状态循环 IDLE → HEADERS → (BODY)? → RESPONDING → IDLE，
//! 同一连接上的流水线请求按到达顺序依次解析。
//! 折行头部（不含冒号且非空行）拼接到上一个头部的值。

use std::net::SocketAddr;
use std::sync::Arc;

use bytes::{Buf, Bytes, BytesMut};

use crate::error::{VoleError, VoleResult};
use crate::server::config::ServerConfig;
use crate::server::request::{is_known_method, HttpVersion, Request};
use crate::utils::logger::{debug, warn};

/// 可携带请求体的方法
const BODY_METHODS: [&str; 3] = ["POST", "PUT", "OPTIONS"];

/// 解析状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Http1State {
    /// 等待请求行
    Idle,
    /// 累积头部行
    Headers,
    /// 累积 Content-Length 规定的请求体
    Body,
}

/// HTTP/1.x 流
pub struct Http1Stream {
    config: Arc<ServerConfig>,
    peer_addr: SocketAddr,
    state: Http1State,
    buffer: BytesMut,
    /// 解析中的请求
    current: Option<Request>,
    /// 当前请求的 Content-Length
    content_length: usize,
    /// 最近解析的头部名（折行续行的目标）
    last_header: String,
    /// 当前请求已消耗的字节数，用于 max_request_size 限制
    consumed: usize,
}

impl Http1Stream {
    /// 创建流
    pub fn new(config: Arc<ServerConfig>, peer_addr: SocketAddr) -> Self {
        Self {
            config,
            peer_addr,
            state: Http1State::Idle,
            buffer: BytesMut::new(),
            current: None,
            content_length: 0,
            last_header: String::new(),
            consumed: 0,
        }
    }

    /// 喂入新收到的字节，返回按顺序完成的请求。
    ///
    /// 一次 recv 可以完成多个流水线请求；缓冲中的残余
    /// 留待下一次继续解析。
    pub fn recv(&mut self, data: &[u8]) -> VoleResult<Vec<Request>> {
        self.buffer.extend_from_slice(data);
        let mut completed = Vec::new();
        loop {
            if self.consumed > self.config.max_request_size {
                return Err(VoleError::RequestTooLarge(format!(
                    "请求超过 {} 字节上限",
                    self.config.max_request_size
                )));
            }
            match self.state {
                Http1State::Idle => {
                    let Some(line) = self.take_line() else {
                        self.check_pending_size()?;
                        break;
                    };
                    if line.is_empty() {
                        // 请求之间的空行，容忍跳过
                        continue;
                    }
                    let request = self.parse_request_line(&line)?;
                    self.current = Some(request);
                    self.state = Http1State::Headers;
                }
                Http1State::Headers => {
                    let Some(line) = self.take_line() else {
                        self.check_pending_size()?;
                        break;
                    };
                    if line.is_empty() {
                        self.finish_headers(&mut completed)?;
                        continue;
                    }
                    self.parse_header_line(&line)?;
                }
                Http1State::Body => {
                    if self.buffer.len() < self.content_length {
                        break;
                    }
                    let body = self.buffer.split_to(self.content_length).freeze();
                    self.consumed += body.len();
                    self.complete_request(body, &mut completed)?;
                }
            }
        }
        Ok(completed)
    }

    /// 等待更多数据时检查未完成部分是否已超限
    fn check_pending_size(&self) -> VoleResult<()> {
        if self.consumed + self.buffer.len() > self.config.max_request_size {
            return Err(VoleError::RequestTooLarge(format!(
                "请求超过 {} 字节上限",
                self.config.max_request_size
            )));
        }
        Ok(())
    }

    /// 从缓冲取出一行（去掉 CRLF），没有完整行时返回 None
    fn take_line(&mut self) -> Option<String> {
        let pos = self.buffer.windows(2).position(|w| w == b"\r\n")?;
        let line = self.buffer.split_to(pos);
        self.buffer.advance(2);
        self.consumed += pos + 2;
        Some(String::from_utf8_lossy(&line).into_owned())
    }

    /// 解析请求行 `METHOD SP PATH SP HTTP/1.(0|1)`
    fn parse_request_line(&mut self, line: &str) -> VoleResult<Request> {
        let mut parts = line.split(' ');
        let method = parts.next().unwrap_or("");
        let path = parts.next().unwrap_or("");
        let version = parts.next().unwrap_or("");
        if parts.next().is_some() || path.is_empty() {
            return Err(VoleError::ProtocolUnknown(format!(
                "请求行格式错误: {}",
                line
            )));
        }
        if !is_known_method(method) {
            return Err(VoleError::ProtocolUnknown(format!(
                "不支持的请求方法: {}",
                method
            )));
        }
        let version = match version {
            "HTTP/1.1" => HttpVersion::Http1_1,
            "HTTP/1.0" => HttpVersion::Http1_0,
            _ => {
                return Err(VoleError::ProtocolUnknown(format!(
                    "不支持的协议版本: {}",
                    version
                )))
            }
        };
        debug!("🌐 [HTTP/1] {} {} ({})", method, path, version);
        let mut request = Request::new();
        request.method = method.to_string();
        request.path = path.to_string();
        request.version = Some(version);
        request.peer_addr = Some(self.peer_addr);
        Ok(request)
    }

    /// 解析单个头部行，支持折行续行
    fn parse_header_line(&mut self, line: &str) -> VoleResult<()> {
        let request = self
            .current
            .as_mut()
            .ok_or_else(|| VoleError::ProtocolUnknown("头部出现在请求行之前".to_string()))?;
        match line.split_once(':') {
            Some((name, value)) => {
                let name = name.trim().to_ascii_lowercase();
                request.add_header(&name, value);
                self.last_header = name;
            }
            None => {
                // 折行：无冒号且非空，拼到上一个头部
                if self.last_header.is_empty() {
                    warn!("🌐 [HTTP/1] 丢弃无法归属的折行头部: {}", line);
                } else {
                    request.append_to_last_header(&self.last_header, line);
                }
            }
        }
        Ok(())
    }

    /// 头部结束，决定是否进入 BODY 状态
    fn finish_headers(&mut self, completed: &mut Vec<Request>) -> VoleResult<()> {
        let request = self
            .current
            .as_ref()
            .ok_or_else(|| VoleError::ProtocolUnknown("头部结束但没有请求".to_string()))?;
        let may_have_body = BODY_METHODS.contains(&request.method.as_str());
        let content_length = request
            .header("content-length")
            .and_then(|v| v.parse::<usize>().ok());
        match content_length {
            Some(len) if may_have_body && len > 0 => {
                if len > self.config.max_request_size {
                    return Err(VoleError::RequestTooLarge(format!(
                        "Content-Length {} 超过 {} 字节上限",
                        len, self.config.max_request_size
                    )));
                }
                self.content_length = len;
                self.state = Http1State::Body;
                Ok(())
            }
            _ => self.complete_request(Bytes::new(), completed),
        }
    }

    /// 请求组装完成，解码参数并复位状态机
    fn complete_request(
        &mut self,
        body: Bytes,
        completed: &mut Vec<Request>,
    ) -> VoleResult<()> {
        let mut request = self
            .current
            .take()
            .ok_or_else(|| VoleError::ProtocolUnknown("完成了不存在的请求".to_string()))?;
        request.body = body;
        request.parse_query_string();
        request.decode_body(self.config.max_multipart_size)?;
        request.close_connection = wants_close(&request);
        completed.push(request);
        self.state = Http1State::Idle;
        self.content_length = 0;
        self.last_header.clear();
        self.consumed = 0;
        Ok(())
    }

    /// 读超时的尽力而为响应
    pub fn timeout_response(&self) -> Bytes {
        Bytes::from_static(
            b"HTTP/1.1 408 request timeout\r\nConnection: close\r\n\r\n408 request timeout\r\n",
        )
    }
}

/// 请求是否要求响应后关闭连接
fn wants_close(request: &Request) -> bool {
    let connection = request.header("connection").unwrap_or("");
    match request.version {
        Some(HttpVersion::Http1_0) => !connection.eq_ignore_ascii_case("keep-alive"),
        _ => connection.eq_ignore_ascii_case("close"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stream() -> Http1Stream {
        Http1Stream::new(
            Arc::new(ServerConfig::default()),
            "127.0.0.1:4000".parse().unwrap(),
        )
    }

    #[test]
    fn single_get_request() {
        let mut s = stream();
        let requests = s
            .recv(b"GET /index.html HTTP/1.1\r\nHost: localhost\r\n\r\n")
            .unwrap();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].method, "GET");
        assert_eq!(requests[0].path, "/index.html");
        assert_eq!(requests[0].header("host"), Some("localhost"));
        assert!(!requests[0].close_connection);
    }

    #[test]
    fn pipelined_requests_in_one_recv() {
        let mut s = stream();
        let requests = s
            .recv(b"GET /a HTTP/1.1\r\nHost: x\r\n\r\nGET /b HTTP/1.1\r\nHost: x\r\n\r\n")
            .unwrap();
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[0].path, "/a");
        assert_eq!(requests[1].path, "/b");
    }

    #[test]
    fn request_split_across_recv_calls() {
        let mut s = stream();
        assert!(s.recv(b"POST /form HTT").unwrap().is_empty());
        assert!(s
            .recv(b"P/1.1\r\nContent-Length: 7\r\nContent-Type: application/x-www-form-urlencoded\r\n\r\nk=v&a")
            .unwrap()
            .is_empty());
        let requests = s.recv(b"=b").unwrap();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].parameter("k"), Some("v"));
        assert_eq!(requests[0].parameter("a"), Some("b"));
    }

    #[test]
    fn folded_header_is_appended() {
        let mut s = stream();
        let requests = s
            .recv(b"GET / HTTP/1.1\r\nX-Long: first\r\n  continued\r\n\r\n")
            .unwrap();
        assert_eq!(requests[0].header("x-long"), Some("first continued"));
    }

    #[test]
    fn malformed_request_line_is_protocol_unknown() {
        let mut s = stream();
        let err = s.recv(b"NONSENSE-LINE\r\n\r\n").unwrap_err();
        assert!(matches!(err, VoleError::ProtocolUnknown(_)));
    }

    #[test]
    fn unknown_method_is_protocol_unknown() {
        let mut s = stream();
        let err = s.recv(b"BREW /pot HTTP/1.1\r\n\r\n").unwrap_err();
        assert!(matches!(err, VoleError::ProtocolUnknown(_)));
    }

    #[test]
    fn http10_defaults_to_close() {
        let mut s = stream();
        let requests = s.recv(b"GET / HTTP/1.0\r\n\r\n").unwrap();
        assert!(requests[0].close_connection);
    }

    #[test]
    fn connection_close_is_honored() {
        let mut s = stream();
        let requests = s
            .recv(b"GET / HTTP/1.1\r\nConnection: close\r\n\r\n")
            .unwrap();
        assert!(requests[0].close_connection);
    }

    #[test]
    fn oversized_request_is_rejected() {
        let mut s = Http1Stream::new(
            Arc::new(ServerConfig {
                max_request_size: 64,
                ..ServerConfig::default()
            }),
            "127.0.0.1:4000".parse().unwrap(),
        );
        let big = format!("GET /{} HTTP/1.1\r\n\r\n", "x".repeat(128));
        assert!(matches!(
            s.recv(big.as_bytes()),
            Err(VoleError::RequestTooLarge(_))
        ));
    }
}
