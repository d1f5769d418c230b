//! 服务器配置模块
//!
//! 配置以只读结构传入引擎，加载方式（文件、命令行）由宿主决定，
//! 这里只提供 TOML 文件的便捷加载。

use serde::Deserialize;

use crate::error::{VoleError, VoleResult};

/// 服务器配置
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// 监听地址
    pub host: String,
    /// 监听端口
    pub port: u16,
    /// 清理时保留的最少空闲处理器数量
    pub min_threads: usize,
    /// 连接处理器上限，超出的连接会被拒绝
    pub max_threads: usize,
    /// 空闲处理器清理周期（毫秒）
    pub cleanup_interval: u64,
    /// 读超时（毫秒），每次收到数据都会重新计时
    pub read_timeout: u64,
    /// 单个请求的最大字节数（请求行 + 头部 + 体）
    pub max_request_size: usize,
    /// multipart/form-data 请求体的最大字节数
    pub max_multipart_size: usize,
    /// TLS 私钥文件（PEM），与证书文件同时配置才会启用 TLS
    pub ssl_key_file: Option<String>,
    /// TLS 证书文件（PEM）
    pub ssl_cert_file: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            min_threads: 1,
            max_threads: 100,
            cleanup_interval: 1000,
            read_timeout: 10_000,
            max_request_size: 16_000,
            max_multipart_size: 1_000_000,
            ssl_key_file: None,
            ssl_cert_file: None,
        }
    }
}

impl ServerConfig {
    /// 从 TOML 文件加载配置
    pub fn from_toml_file(path: &str) -> VoleResult<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| VoleError::ConfigError(format!("无法读取配置文件 {}: {}", path, e)))?;
        toml::from_str(&content)
            .map_err(|e| VoleError::ConfigError(format!("配置文件解析失败 {}: {}", path, e)))
    }

    /// 监听地址字符串
    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// 是否配置了 TLS（证书与私钥文件都存在才算）
    pub fn tls_enabled(&self) -> bool {
        matches!(
            (&self.ssl_cert_file, &self.ssl_key_file),
            (Some(cert), Some(key)) if !cert.is_empty() && !key.is_empty()
        )
    }
}
