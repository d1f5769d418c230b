//! 服务器核心模块
//!
//! 数据流向：监听器接受连接 → 池子分配处理器 → 处理器嗅探协议
//! 并驱动根协议流 → 状态机产出请求 → 业务处理器写响应 →
//! 协议流序列化回线路。

pub mod config;
pub mod connection_handler;
pub mod handler;
pub mod listener;
pub mod pool;
pub mod protocol_detector;
pub mod request;
pub mod response;
pub mod stream;

pub use config::ServerConfig;
pub use connection_handler::ConnectionHandler;
pub use handler::{NotFoundHandler, RequestHandler};
pub use listener::HttpListener;
pub use pool::ConnectionHandlerPool;
pub use request::{HttpVersion, Request, UploadedFile};
pub use response::Response;
pub use stream::ProtocolStream;
