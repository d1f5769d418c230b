//! VOLE Engine - 可嵌入的 HTTP 服务器引擎
//!
//! 提供完整的协议层实现：
//! - HTTP/1.0 / HTTP/1.1 请求解析与响应序列化（支持流水线）
//! - HTTP/2 二进制分帧、多路复用与 HPACK 头部压缩
//! - 按连接复用的处理器池，限制并发并定期回收空闲容量
//! - 可选的 TLS 支持（rustls）
//!
//! 引擎只负责协议与并发，业务逻辑通过 [`server::RequestHandler`]
//! 特征注入，每个完整请求调用一次。

pub mod error;
pub mod hpack;
pub mod server;
pub mod utils;

pub use error::{VoleError, VoleResult};
pub use server::config::ServerConfig;
pub use server::handler::RequestHandler;
pub use server::listener::HttpListener;
pub use server::request::Request;
pub use server::response::Response;
