//! VOLE Engine 错误类型定义
//!
//! 所有子系统共用同一个错误枚举，连接级错误最终都会
//! 导致连接关闭，不会使进程崩溃。

use thiserror::Error;

/// 引擎统一错误类型
#[derive(Error, Debug)]
pub enum VoleError {
    /// 网络 I/O 错误（套接字关闭、读写失败等）
    #[error("网络错误: {0}")]
    NetworkError(String),

    /// TLS 握手或证书加载失败
    #[error("TLS 错误: {0}")]
    TlsError(String),

    /// 无法识别的协议（HTTP/1 请求行损坏、HTTP/2 前言不匹配等）
    #[error("未知协议: {0}")]
    ProtocolUnknown(String),

    /// HTTP/2 帧级错误
    #[error("HTTP/2 帧错误 ({code:?}): {message}")]
    FrameError {
        /// 对应的 HTTP/2 错误码
        code: FrameErrorCode,
        /// 具体描述
        message: String,
    },

    /// HPACK 解码错误，整个头部块视为无效
    #[error("HPACK 压缩错误: {0}")]
    CompressionError(String),

    /// 请求超过配置的大小限制
    #[error("请求过大: {0}")]
    RequestTooLarge(String),

    /// 配置无效或缺失
    #[error("配置错误: {0}")]
    ConfigError(String),

    /// 标准 I/O 错误的透传
    #[error("IO 错误: {0}")]
    IoError(#[from] std::io::Error),
}

/// HTTP/2 帧级错误分类（RFC 7540 §7 的子集）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameErrorCode {
    /// 帧长度与类型不符
    FrameSizeError,
    /// 违反协议规则（流 0 限制、伪头部误用等）
    ProtocolError,
    /// 头部压缩状态损坏
    CompressionError,
}

impl FrameErrorCode {
    /// RFC 7540 §7 定义的错误码数值，GOAWAY 帧中使用
    pub fn wire_code(&self) -> u32 {
        match self {
            FrameErrorCode::ProtocolError => 0x1,
            FrameErrorCode::FrameSizeError => 0x6,
            FrameErrorCode::CompressionError => 0x9,
        }
    }
}

/// 引擎统一结果类型
pub type VoleResult<T> = Result<T, VoleError>;
