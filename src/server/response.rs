//! HTTP 响应对象与线路序列化
//!
//! 响应头在第一次写入响应体时定格（sent_headers 置位后不可再改），
//! sent_final 单向翻转。序列化按协议分派：
//! HTTP/1 在未知长度时自动选择整体缓冲（补 Content-Length）
//! 或分块传输编码；HTTP/2 输出 HEADERS + DATA 帧。

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::SystemTime;

use bytes::{Bytes, BytesMut};

use crate::hpack::{Hpack, HpackTableEntry};
use crate::server::request::HttpVersion;
use crate::server::stream::frame::{Frame, FLAG_END_HEADERS, FLAG_END_STREAM, TYPE_DATA, TYPE_HEADERS};
use crate::utils::logger::warn;

/// 常见状态码的原因短语
pub fn status_text(status: u16) -> &'static str {
    match status {
        100 => "Continue",
        101 => "Switching Protocols",
        200 => "OK",
        201 => "Created",
        202 => "Accepted",
        204 => "No Content",
        206 => "Partial Content",
        301 => "Moved Permanently",
        302 => "Found",
        303 => "See Other",
        304 => "Not Modified",
        307 => "Temporary Redirect",
        308 => "Permanent Redirect",
        400 => "Bad Request",
        401 => "Unauthorized",
        403 => "Forbidden",
        404 => "Not Found",
        405 => "Method Not Allowed",
        408 => "Request Timeout",
        411 => "Length Required",
        413 => "Payload Too Large",
        414 => "URI Too Long",
        415 => "Unsupported Media Type",
        429 => "Too Many Requests",
        500 => "Internal Server Error",
        501 => "Not Implemented",
        502 => "Bad Gateway",
        503 => "Service Unavailable",
        505 => "HTTP Version Not Supported",
        _ => "",
    }
}

/// 响应的线路形态
pub(crate) enum ResponseWire {
    /// HTTP/1.x：记录协议版本与连接是否随后关闭
    Http1 {
        /// 请求的协议版本
        version: HttpVersion,
        /// 响应完成后关闭连接
        close: bool,
    },
    /// HTTP/2：绑定流标识与连接共享的 HPACK 编码器
    Http2 {
        /// 所属流
        stream_id: u32,
        /// 连接级 HPACK 编解码器
        hpack: Arc<Mutex<Hpack>>,
    },
}

/// 一次请求对应的响应
pub struct Response {
    status: u16,
    headers: HashMap<String, String>,
    cookies: Vec<(String, String)>,
    sent_headers: bool,
    sent_final: bool,
    chunked: bool,
    wire: ResponseWire,
    out: BytesMut,
}

impl Response {
    /// 创建 HTTP/1 响应
    pub(crate) fn new_http1(version: HttpVersion, close: bool) -> Self {
        Self::new(ResponseWire::Http1 { version, close })
    }

    /// 创建 HTTP/2 响应
    pub(crate) fn new_http2(stream_id: u32, hpack: Arc<Mutex<Hpack>>) -> Self {
        Self::new(ResponseWire::Http2 { stream_id, hpack })
    }

    fn new(wire: ResponseWire) -> Self {
        Self {
            status: 200,
            headers: HashMap::new(),
            cookies: Vec::new(),
            sent_headers: false,
            sent_final: false,
            chunked: false,
            wire,
            out: BytesMut::new(),
        }
    }

    /// 设置状态码，头部已发出后忽略
    pub fn set_status(&mut self, status: u16) {
        if self.sent_headers {
            warn!("📤 [响应] 头部已发出，忽略状态码修改: {}", status);
            return;
        }
        self.status = status;
    }

    /// 当前状态码
    pub fn status(&self) -> u16 {
        self.status
    }

    /// 设置响应头，头部已发出后忽略
    pub fn set_header(&mut self, name: &str, value: &str) {
        if self.sent_headers {
            warn!("📤 [响应] 头部已发出，忽略头部修改: {}", name);
            return;
        }
        self.headers
            .insert(name.to_ascii_lowercase(), value.to_string());
    }

    /// 读取已设置的响应头
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(|s| s.as_str())
    }

    /// 设置 cookie，头部已发出后忽略
    pub fn set_cookie(&mut self, name: &str, value: &str) {
        if self.sent_headers {
            warn!("📤 [响应] 头部已发出，忽略 cookie 修改: {}", name);
            return;
        }
        self.cookies.push((name.to_string(), value.to_string()));
    }

    /// 头部是否已定格
    pub fn headers_sent(&self) -> bool {
        self.sent_headers
    }

    /// 最终写入是否已完成
    pub fn finished(&self) -> bool {
        self.sent_final
    }

    /// 响应完成后是否应关闭连接
    pub fn close_connection(&self) -> bool {
        match &self.wire {
            ResponseWire::Http1 { close, .. } => *close,
            ResponseWire::Http2 { .. } => false,
        }
    }

    /// 写入一段响应体。`last` 表示这是最终一块。
    ///
    /// 第一次写入会先序列化头部；此后头部与 cookie 不可再改。
    pub fn write(&mut self, data: &[u8], last: bool) {
        if self.sent_final {
            warn!("📤 [响应] 最终块已写出，丢弃 {} 字节", data.len());
            return;
        }
        if !self.sent_headers {
            self.emit_headers(data.len(), last);
            self.sent_headers = true;
        }
        self.emit_body(data, last);
        if last {
            self.sent_final = true;
        }
    }

    /// 取走累计的线路字节
    pub fn take_output(&mut self) -> Bytes {
        self.out.split().freeze()
    }

    /// 序列化响应头
    fn emit_headers(&mut self, first_len: usize, last: bool) {
        match &self.wire {
            ResponseWire::Http1 { version, close } => {
                let version = *version;
                let close = *close;
                let has_length = self.headers.contains_key("content-length");
                let has_te = self.headers.contains_key("transfer-encoding");
                if has_te {
                    self.chunked = self
                        .headers
                        .get("transfer-encoding")
                        .map(|v| v.eq_ignore_ascii_case("chunked"))
                        .unwrap_or(false);
                } else if !has_length && !close {
                    if last {
                        // 唯一一块，整体缓冲并补长度
                        self.headers
                            .insert("content-length".to_string(), first_len.to_string());
                    } else {
                        self.headers
                            .insert("transfer-encoding".to_string(), "chunked".to_string());
                        self.chunked = true;
                    }
                }
                if !self.headers.contains_key("date") {
                    self.headers.insert(
                        "date".to_string(),
                        httpdate::fmt_http_date(SystemTime::now()),
                    );
                }
                if close && !self.headers.contains_key("connection") {
                    self.headers
                        .insert("connection".to_string(), "close".to_string());
                }
                let reason = status_text(self.status);
                self.out.extend_from_slice(
                    format!("{} {} {}\r\n", version, self.status, reason).as_bytes(),
                );
                for (name, value) in &self.headers {
                    self.out
                        .extend_from_slice(format!("{}: {}\r\n", name, value).as_bytes());
                }
                for (name, value) in &self.cookies {
                    self.out
                        .extend_from_slice(format!("set-cookie: {}={}\r\n", name, value).as_bytes());
                }
                self.out.extend_from_slice(b"\r\n");
            }
            ResponseWire::Http2 { stream_id, hpack } => {
                let mut entries = Vec::with_capacity(self.headers.len() + self.cookies.len() + 1);
                // :status 伪头部必须排在最前
                entries.push(HpackTableEntry::new(
                    Bytes::from_static(b":status"),
                    self.status.to_string().into_bytes(),
                ));
                for (name, value) in &self.headers {
                    entries.push(HpackTableEntry::new(
                        name.clone().into_bytes(),
                        value.clone().into_bytes(),
                    ));
                }
                for (name, value) in &self.cookies {
                    entries.push(HpackTableEntry::new(
                        Bytes::from_static(b"set-cookie"),
                        format!("{}={}", name, value).into_bytes(),
                    ));
                }
                let block = {
                    let mut codec = hpack.lock().unwrap_or_else(|e| e.into_inner());
                    codec.encode(&entries)
                };
                Frame::new(TYPE_HEADERS, FLAG_END_HEADERS, *stream_id, block)
                    .write_to(&mut self.out);
            }
        }
    }

    /// 序列化一段响应体
    fn emit_body(&mut self, data: &[u8], last: bool) {
        match &self.wire {
            ResponseWire::Http1 { .. } => {
                if self.chunked {
                    if !data.is_empty() {
                        self.out
                            .extend_from_slice(format!("{:x}\r\n", data.len()).as_bytes());
                        self.out.extend_from_slice(data);
                        self.out.extend_from_slice(b"\r\n");
                    }
                    if last {
                        // 终止块
                        self.out.extend_from_slice(b"0\r\n\r\n");
                    }
                } else {
                    self.out.extend_from_slice(data);
                }
            }
            ResponseWire::Http2 { stream_id, .. } => {
                if !data.is_empty() || last {
                    let flags = if last { FLAG_END_STREAM } else { 0 };
                    Frame::new(TYPE_DATA, flags, *stream_id, Bytes::copy_from_slice(data))
                        .write_to(&mut self.out);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_write_gets_content_length() {
        let mut resp = Response::new_http1(HttpVersion::Http1_1, false);
        resp.set_header("Content-Type", "text/plain");
        resp.write(b"hello", true);
        assert!(resp.finished());
        let wire = resp.take_output();
        let text = String::from_utf8_lossy(&wire);
        assert!(text.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(text.contains("content-length: 5\r\n"));
        assert!(text.ends_with("\r\n\r\nhello"));
    }

    #[test]
    fn multi_write_switches_to_chunked() {
        let mut resp = Response::new_http1(HttpVersion::Http1_1, false);
        resp.write(b"aaa", false);
        resp.write(b"bb", true);
        let wire = resp.take_output();
        let text = String::from_utf8_lossy(&wire);
        assert!(text.contains("transfer-encoding: chunked\r\n"));
        assert!(text.contains("3\r\naaa\r\n"));
        assert!(text.contains("2\r\nbb\r\n"));
        assert!(text.ends_with("0\r\n\r\n"));
    }

    #[test]
    fn headers_freeze_after_first_write() {
        let mut resp = Response::new_http1(HttpVersion::Http1_1, false);
        resp.write(b"x", false);
        resp.set_header("x-late", "1");
        resp.set_status(500);
        resp.write(b"", true);
        let text = String::from_utf8_lossy(&resp.out).into_owned();
        assert!(text.starts_with("HTTP/1.1 200"));
        assert!(!text.contains("x-late"));
    }

    #[test]
    fn final_flag_is_monotonic() {
        let mut resp = Response::new_http1(HttpVersion::Http1_1, false);
        resp.write(b"done", true);
        assert!(resp.finished());
        // 已完成后的写入被丢弃
        resp.write(b"more", true);
        let text = String::from_utf8_lossy(&resp.out).into_owned();
        assert!(!text.contains("more"));
    }

    #[test]
    fn http2_response_emits_headers_and_data_frames() {
        let hpack = Arc::new(Mutex::new(Hpack::new(4096)));
        let mut resp = Response::new_http2(5, hpack.clone());
        resp.set_status(404);
        resp.write(b"gone", true);
        let wire = resp.take_output();
        // HEADERS 帧在前
        assert_eq!(wire[3], TYPE_HEADERS);
        assert_eq!(wire[4], FLAG_END_HEADERS);
        let header_len = ((wire[0] as usize) << 16) | ((wire[1] as usize) << 8) | wire[2] as usize;
        let data_frame = &wire[9 + header_len..];
        assert_eq!(data_frame[3], TYPE_DATA);
        assert_eq!(data_frame[4], FLAG_END_STREAM);
        assert_eq!(&data_frame[9..], b"gone");

        // 头部块能用同级解码器还原，:status 在最前
        let mut decoder = Hpack::new(4096);
        let headers = decoder.decode(&wire[9..9 + header_len]);
        assert!(!decoder.error());
        assert_eq!(&headers[0].name[..], b":status");
        assert_eq!(&headers[0].value[..], b"404");
    }
}
