//! 请求处理器特征
//!
//! 引擎与业务逻辑的边界：每个完整请求调用一次 `handle`，
//! 传入组装好的请求与全新的未发送响应。处理器返回时
//! 如果还没写出最终块，引擎会补一个空的最终写。

use async_trait::async_trait;

use crate::server::request::Request;
use crate::server::response::Response;

/// 请求处理器
#[async_trait]
pub trait RequestHandler: Send + Sync {
    /// 处理一个请求。`response` 未发送过任何字节。
    async fn handle(&self, request: Request, response: &mut Response);
}

/// 默认处理器：对任何路径都返回 404
pub struct NotFoundHandler;

#[async_trait]
impl RequestHandler for NotFoundHandler {
    async fn handle(&self, request: Request, response: &mut Response) {
        response.set_status(404);
        response.set_header("content-type", "text/plain");
        response.write(format!("404 not found: {}\r\n", request.path).as_bytes(), true);
    }
}
