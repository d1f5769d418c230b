//! 协议检测工具模块
//!
//! 提供协议类型检测功能，用于在连接首包上区分
//! HTTP/2（匹配连接前言字面量）与 HTTP/1.x（请求行里的版本标记）

use crate::server::stream::http2::PREFACE;

/// 首包嗅探结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DetectedProtocol {
    /// HTTP/2 连接前言完整匹配
    Http2,
    /// 请求行以 HTTP/1.1 结尾
    Http1_1,
    /// 请求行以 HTTP/1.0 结尾
    Http1_0,
    /// 数据还不够，继续收
    NeedMoreData,
    /// 无法识别的协议
    Unknown,
}

/// 请求行超过该长度仍无法识别时放弃
const MAX_SNIFF_LEN: usize = 8192;

/// 检测首包数据的协议类型
///
/// 检测方法：
/// 1. 与 24 字节 HTTP/2 连接前言逐字节比较
/// 2. 找到首行 CRLF 后检查行尾的 HTTP/1.x 版本标记
pub fn detect_protocol(data: &[u8]) -> DetectedProtocol {
    if data.is_empty() {
        return DetectedProtocol::NeedMoreData;
    }

    // 方法1: HTTP/2 前言匹配（前缀一致且不足时继续等）
    let check = data.len().min(PREFACE.len());
    if data[..check] == PREFACE[..check] {
        if data.len() >= PREFACE.len() {
            return DetectedProtocol::Http2;
        }
        return DetectedProtocol::NeedMoreData;
    }

    // 方法2: HTTP/1.x 请求行
    match data.windows(2).position(|w| w == b"\r\n") {
        Some(pos) => {
            let line = &data[..pos];
            if line.ends_with(b"HTTP/1.1") {
                DetectedProtocol::Http1_1
            } else if line.ends_with(b"HTTP/1.0") {
                DetectedProtocol::Http1_0
            } else {
                DetectedProtocol::Unknown
            }
        }
        None if data.len() >= MAX_SNIFF_LEN => DetectedProtocol::Unknown,
        None => DetectedProtocol::NeedMoreData,
    }
}
