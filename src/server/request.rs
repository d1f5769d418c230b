//! HTTP 请求对象与请求体解码
//!
//! 头部按小写名称存储（HTTP 语义大小写不敏感），同名多值保序。
//! 请求体按 Content-Type 解码为参数表；multipart 的文件部分
//! 落到临时文件，请求对象销毁时一并释放。

use std::collections::HashMap;
use std::fmt;
use std::io::Write;
use std::net::SocketAddr;
use std::path::Path;

use bytes::Bytes;
use tempfile::NamedTempFile;

use crate::error::{VoleError, VoleResult};
use crate::utils::logger::{debug, warn};

/// 支持的请求方法
const KNOWN_METHODS: [&str; 9] = [
    "GET", "HEAD", "POST", "PUT", "DELETE", "OPTIONS", "TRACE", "CONNECT", "PATCH",
];

/// 判断方法名是否合法
pub fn is_known_method(method: &str) -> bool {
    KNOWN_METHODS.contains(&method)
}

/// HTTP 协议版本
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpVersion {
    /// HTTP/1.0
    Http1_0,
    /// HTTP/1.1
    Http1_1,
    /// HTTP/2
    Http2,
}

impl fmt::Display for HttpVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HttpVersion::Http1_0 => write!(f, "HTTP/1.0"),
            HttpVersion::Http1_1 => write!(f, "HTTP/1.1"),
            HttpVersion::Http2 => write!(f, "HTTP/2"),
        }
    }
}

/// multipart 上传的文件，临时存储随请求销毁释放
#[derive(Debug)]
pub struct UploadedFile {
    /// 客户端提交的原始文件名
    pub file_name: String,
    temp_file: NamedTempFile,
}

impl UploadedFile {
    /// 临时文件路径
    pub fn path(&self) -> &Path {
        self.temp_file.path()
    }
}

/// 一次完整的 HTTP 请求
#[derive(Debug, Default)]
pub struct Request {
    /// 请求方法（大写）
    pub method: String,
    /// 请求路径（不含查询串，已做百分号解码）
    pub path: String,
    /// 协议版本
    pub version: Option<HttpVersion>,
    /// 对端地址
    pub peer_addr: Option<SocketAddr>,
    /// 原始请求体
    pub body: Bytes,
    headers: HashMap<String, Vec<String>>,
    cookies: HashMap<String, String>,
    parameters: HashMap<String, Vec<String>>,
    uploaded_files: HashMap<String, UploadedFile>,
    /// HTTP/2 流标识，HTTP/1 请求恒为 0
    pub(crate) stream_id: u32,
    /// 响应完成后是否关闭连接
    pub(crate) close_connection: bool,
}

impl Request {
    /// 创建空请求
    pub fn new() -> Self {
        Self::default()
    }

    /// 追加一个头部，名称统一转小写；`Cookie` 头会同时解析进 cookie 表
    pub fn add_header(&mut self, name: &str, value: &str) {
        let name = name.trim().to_ascii_lowercase();
        let value = value.trim().to_string();
        if name == "cookie" {
            parse_cookies(&value, &mut self.cookies);
        }
        self.headers.entry(name).or_default().push(value);
    }

    /// 追加到最近一个同名头部的值上（HTTP/1 折行续行用）
    pub fn append_to_last_header(&mut self, name: &str, extra: &str) {
        if let Some(values) = self.headers.get_mut(name) {
            if let Some(last) = values.last_mut() {
                last.push(' ');
                last.push_str(extra.trim());
            }
        }
    }

    /// 取头部的第一个值
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .and_then(|v| v.first())
            .map(|s| s.as_str())
    }

    /// 取头部的全部值（保插入顺序）
    pub fn header_values(&self, name: &str) -> &[String] {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(|v| v.as_slice())
            .unwrap_or(&[])
    }

    /// 全部头部
    pub fn headers(&self) -> &HashMap<String, Vec<String>> {
        &self.headers
    }

    /// 取 cookie 值
    pub fn cookie(&self, name: &str) -> Option<&str> {
        self.cookies.get(name).map(|s| s.as_str())
    }

    /// 全部 cookie
    pub fn cookies(&self) -> &HashMap<String, String> {
        &self.cookies
    }

    /// 取参数的第一个值（查询串与请求体解码的并集）
    pub fn parameter(&self, name: &str) -> Option<&str> {
        self.parameters
            .get(name)
            .and_then(|v| v.first())
            .map(|s| s.as_str())
    }

    /// 取参数的全部值
    pub fn parameter_values(&self, name: &str) -> &[String] {
        self.parameters
            .get(name)
            .map(|v| v.as_slice())
            .unwrap_or(&[])
    }

    /// 全部参数
    pub fn parameters(&self) -> &HashMap<String, Vec<String>> {
        &self.parameters
    }

    /// 取上传文件
    pub fn uploaded_file(&self, name: &str) -> Option<&UploadedFile> {
        self.uploaded_files.get(name)
    }

    /// 记录一个参数
    pub fn add_parameter(&mut self, name: &str, value: &str) {
        self.parameters
            .entry(name.to_string())
            .or_default()
            .push(value.to_string());
    }

    /// HTTP/2 流标识
    pub fn stream_id(&self) -> u32 {
        self.stream_id
    }

    /// 解析路径里的查询串为参数，并把路径截断到 '?' 之前
    pub fn parse_query_string(&mut self) {
        if let Some(pos) = self.path.find('?') {
            let query = self.path[pos + 1..].to_string();
            self.path.truncate(pos);
            decode_form_urlencoded(query.as_bytes(), &mut self.parameters);
        }
        if let Ok(decoded) = urlencoding::decode(&self.path) {
            self.path = decoded.into_owned();
        }
    }

    /// 按 Content-Type 解码请求体
    pub fn decode_body(&mut self, max_multipart_size: usize) -> VoleResult<()> {
        let content_type = self.header("content-type").unwrap_or("").to_string();
        if content_type.starts_with("application/x-www-form-urlencoded") {
            let body = self.body.clone();
            decode_form_urlencoded(&body, &mut self.parameters);
        } else if content_type.starts_with("application/json") {
            let body = self.body.clone();
            self.decode_json_body(&body);
        } else if content_type.starts_with("multipart/form-data") {
            if self.body.len() > max_multipart_size {
                return Err(VoleError::RequestTooLarge(format!(
                    "multipart 请求体 {} 字节超过上限 {}",
                    self.body.len(),
                    max_multipart_size
                )));
            }
            let boundary = extract_boundary(&content_type).ok_or_else(|| {
                VoleError::ProtocolUnknown("multipart 请求缺少 boundary".to_string())
            })?;
            let body = self.body.clone();
            self.decode_multipart_body(&body, &boundary)?;
        }
        Ok(())
    }

    /// JSON 对象的顶层字段进参数表
    fn decode_json_body(&mut self, body: &[u8]) {
        match serde_json::from_slice::<serde_json::Value>(body) {
            Ok(serde_json::Value::Object(map)) => {
                for (key, value) in map {
                    let text = match value {
                        serde_json::Value::String(s) => s,
                        other => other.to_string(),
                    };
                    self.add_parameter(&key, &text);
                }
            }
            Ok(_) => debug!("📦 [请求] JSON 请求体不是对象，跳过参数解码"),
            Err(e) => warn!("📦 [请求] JSON 请求体解析失败: {}", e),
        }
    }

    /// multipart/form-data 解码：普通字段进参数表，文件落临时文件
    fn decode_multipart_body(&mut self, body: &[u8], boundary: &str) -> VoleResult<()> {
        let delimiter = format!("--{}", boundary);
        let parts = split_multipart(body, delimiter.as_bytes());
        for part in parts {
            let Some((head, data)) = split_part_head(part) else {
                continue;
            };
            let head_text = String::from_utf8_lossy(head);
            let Some(name) = attr_value(&head_text, "name") else {
                continue;
            };
            match attr_value(&head_text, "filename") {
                Some(file_name) if !file_name.is_empty() => {
                    let mut temp_file = NamedTempFile::new().map_err(VoleError::IoError)?;
                    temp_file.write_all(data).map_err(VoleError::IoError)?;
                    temp_file.flush().map_err(VoleError::IoError)?;
                    debug!(
                        "📦 [请求] 上传文件 {} ({} 字节) 写入 {:?}",
                        file_name,
                        data.len(),
                        temp_file.path()
                    );
                    self.uploaded_files
                        .insert(name, UploadedFile { file_name, temp_file });
                }
                _ => {
                    let value = String::from_utf8_lossy(data).into_owned();
                    self.add_parameter(&name, &value);
                }
            }
        }
        Ok(())
    }
}

/// 解析 Cookie 请求头
fn parse_cookies(value: &str, cookies: &mut HashMap<String, String>) {
    for pair in value.split(';') {
        if let Some((name, val)) = pair.split_once('=') {
            let decoded = urlencoding::decode(val.trim())
                .map(|c| c.into_owned())
                .unwrap_or_else(|_| val.trim().to_string());
            cookies.insert(name.trim().to_string(), decoded);
        }
    }
}

/// 解码 application/x-www-form-urlencoded 键值对
fn decode_form_urlencoded(data: &[u8], parameters: &mut HashMap<String, Vec<String>>) {
    let text = String::from_utf8_lossy(data);
    for pair in text.split('&') {
        if pair.is_empty() {
            continue;
        }
        let (name, value) = pair.split_once('=').unwrap_or((pair, ""));
        let name = name.replace('+', " ");
        let value = value.replace('+', " ");
        let name = urlencoding::decode(&name)
            .map(|c| c.into_owned())
            .unwrap_or(name.to_string());
        let value = urlencoding::decode(&value)
            .map(|c| c.into_owned())
            .unwrap_or(value.to_string());
        parameters.entry(name).or_default().push(value);
    }
}

/// 从 Content-Type 取出 boundary 参数
fn extract_boundary(content_type: &str) -> Option<String> {
    for part in content_type.split(';') {
        let part = part.trim();
        if let Some(value) = part.strip_prefix("boundary=") {
            return Some(value.trim_matches('"').to_string());
        }
    }
    None
}

/// 按分界线切出各个 part 的原始字节
fn split_multipart<'a>(body: &'a [u8], delimiter: &[u8]) -> Vec<&'a [u8]> {
    let mut parts = Vec::new();
    let mut rest = body;
    // 跳到第一个分界线之后
    let Some(first) = find_subsequence(rest, delimiter) else {
        return parts;
    };
    rest = &rest[first + delimiter.len()..];
    loop {
        let Some(end) = find_subsequence(rest, delimiter) else {
            break;
        };
        let mut part = &rest[..end];
        // 去掉分界线前后的 CRLF
        if part.starts_with(b"\r\n") {
            part = &part[2..];
        }
        if part.ends_with(b"\r\n") {
            part = &part[..part.len() - 2];
        }
        if !part.is_empty() {
            parts.push(part);
        }
        rest = &rest[end + delimiter.len()..];
        // 结束分界线带 "--" 后缀
        if rest.starts_with(b"--") {
            break;
        }
    }
    parts
}

/// 把单个 part 切成头部区与数据区
fn split_part_head(part: &[u8]) -> Option<(&[u8], &[u8])> {
    let pos = find_subsequence(part, b"\r\n\r\n")?;
    Some((&part[..pos], &part[pos + 4..]))
}

/// 在 part 头部文本里找 name="..." 形式的属性值
fn attr_value(head: &str, attr: &str) -> Option<String> {
    let marker = format!("{}=\"", attr);
    let start = head.find(&marker)? + marker.len();
    let end = head[start..].find('"')? + start;
    Some(head[start..end].to_string())
}

/// 朴素子序列查找
fn find_subsequence(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || haystack.len() < needle.len() {
        return None;
    }
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn headers_are_case_insensitive_and_multi_valued() {
        let mut req = Request::new();
        req.add_header("Accept", "text/html");
        req.add_header("ACCEPT", "application/json");
        assert_eq!(req.header("accept"), Some("text/html"));
        assert_eq!(req.header_values("Accept").len(), 2);
    }

    #[test]
    fn cookie_header_is_parsed() {
        let mut req = Request::new();
        req.add_header("Cookie", "sessionid=abc123; theme=dark");
        assert_eq!(req.cookie("sessionid"), Some("abc123"));
        assert_eq!(req.cookie("theme"), Some("dark"));
    }

    #[test]
    fn query_string_becomes_parameters() {
        let mut req = Request::new();
        req.path = "/search?q=%E4%B8%AD%E6%96%87&page=2".to_string();
        req.parse_query_string();
        assert_eq!(req.path, "/search");
        assert_eq!(req.parameter("q"), Some("中文"));
        assert_eq!(req.parameter("page"), Some("2"));
    }

    #[test]
    fn form_urlencoded_body_is_decoded() {
        let mut req = Request::new();
        req.add_header("Content-Type", "application/x-www-form-urlencoded");
        req.body = Bytes::from_static(b"name=vole+engine&tag=a&tag=b");
        req.decode_body(1024).unwrap();
        assert_eq!(req.parameter("name"), Some("vole engine"));
        assert_eq!(req.parameter_values("tag"), &["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn json_object_body_is_decoded() {
        let mut req = Request::new();
        req.add_header("Content-Type", "application/json");
        req.body = Bytes::from_static(br#"{"name":"vole","count":3}"#);
        req.decode_body(1024).unwrap();
        assert_eq!(req.parameter("name"), Some("vole"));
        assert_eq!(req.parameter("count"), Some("3"));
    }

    #[test]
    fn multipart_body_splits_fields_and_files() {
        let body = b"--XbOuNd\r\n\
Content-Disposition: form-data; name=\"title\"\r\n\r\n\
hello\r\n\
--XbOuNd\r\n\
Content-Disposition: form-data; name=\"upload\"; filename=\"a.txt\"\r\n\
Content-Type: text/plain\r\n\r\n\
file-content-here\r\n\
--XbOuNd--\r\n";
        let mut req = Request::new();
        req.add_header("Content-Type", "multipart/form-data; boundary=XbOuNd");
        req.body = Bytes::copy_from_slice(body);
        req.decode_body(1 << 20).unwrap();
        assert_eq!(req.parameter("title"), Some("hello"));
        let file = req.uploaded_file("upload").expect("文件缺失");
        assert_eq!(file.file_name, "a.txt");
        let stored = std::fs::read(file.path()).unwrap();
        assert_eq!(stored, b"file-content-here");
    }

    #[test]
    fn oversized_multipart_is_rejected() {
        let mut req = Request::new();
        req.add_header("Content-Type", "multipart/form-data; boundary=B");
        req.body = Bytes::from(vec![0u8; 64]);
        assert!(req.decode_body(10).is_err());
    }
}
