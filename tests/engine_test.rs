//! 引擎端到端测试：真实 TCP 连接上的协议行为

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::BytesMut;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use vole_engine::hpack::{Hpack, HpackTableEntry};
use vole_engine::server::stream::frame::{
    Frame, FrameHeader, FLAG_END_HEADERS, FLAG_END_STREAM, FRAME_HEADER_LEN, TYPE_DATA,
    TYPE_HEADERS, TYPE_SETTINGS,
};
use vole_engine::{HttpListener, Request, RequestHandler, Response, ServerConfig};

/// 回显处理器：响应体为 "echo 方法 路径"
struct EchoHandler;

#[async_trait]
impl RequestHandler for EchoHandler {
    async fn handle(&self, request: Request, response: &mut Response) {
        response.set_header("content-type", "text/plain");
        response.write(
            format!("echo {} {}", request.method, request.path).as_bytes(),
            true,
        );
    }
}

fn test_config() -> ServerConfig {
    ServerConfig {
        host: "127.0.0.1".to_string(),
        port: 0,
        ..ServerConfig::default()
    }
}

async fn start(config: ServerConfig) -> SocketAddr {
    let listener = HttpListener::bind(config, Arc::new(EchoHandler))
        .await
        .expect("监听失败");
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let _ = listener.serve().await;
    });
    addr
}

/// 持续读取直到谓词满足，整体 5 秒兜底
async fn read_until<F>(socket: &mut TcpStream, mut done: F) -> String
where
    F: FnMut(&str) -> bool,
{
    let mut collected = Vec::new();
    let mut buf = [0u8; 4096];
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        let text = String::from_utf8_lossy(&collected).into_owned();
        if done(&text) {
            return text;
        }
        let n = tokio::time::timeout_at(deadline, socket.read(&mut buf))
            .await
            .expect("等待响应超时")
            .expect("读取失败");
        if n == 0 {
            return String::from_utf8_lossy(&collected).into_owned();
        }
        collected.extend_from_slice(&buf[..n]);
    }
}

/// 读到对端关闭为止
async fn read_until_close(socket: &mut TcpStream) -> String {
    let mut collected = Vec::new();
    let mut buf = [0u8; 4096];
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        let n = tokio::time::timeout_at(deadline, socket.read(&mut buf))
            .await
            .expect("等待关闭超时")
            .expect("读取失败");
        if n == 0 {
            return String::from_utf8_lossy(&collected).into_owned();
        }
        collected.extend_from_slice(&buf[..n]);
    }
}

#[tokio::test]
async fn http1_single_request_roundtrip() {
    let addr = start(test_config()).await;
    let mut socket = TcpStream::connect(addr).await.unwrap();
    socket
        .write_all(b"GET /hello HTTP/1.1\r\nHost: localhost\r\n\r\n")
        .await
        .unwrap();
    let text = read_until(&mut socket, |t| t.contains("echo GET /hello")).await;
    assert!(text.starts_with("HTTP/1.1 200 OK\r\n"));
    assert!(text.contains("content-length: 15"));
}

#[tokio::test]
async fn http1_pipelined_requests_answered_in_order() {
    let addr = start(test_config()).await;
    let mut socket = TcpStream::connect(addr).await.unwrap();
    socket
        .write_all(b"GET /a HTTP/1.1\r\nHost: x\r\n\r\nGET /b HTTP/1.1\r\nHost: x\r\n\r\n")
        .await
        .unwrap();
    let text = read_until(&mut socket, |t| {
        t.contains("echo GET /a") && t.contains("echo GET /b")
    })
    .await;
    let first = text.find("echo GET /a").unwrap();
    let second = text.find("echo GET /b").unwrap();
    assert!(first < second, "流水线响应必须按请求到达顺序返回");
}

#[tokio::test]
async fn http1_post_body_is_delivered() {
    let addr = start(test_config()).await;
    let mut socket = TcpStream::connect(addr).await.unwrap();
    socket
        .write_all(
            b"POST /submit HTTP/1.1\r\nHost: x\r\nContent-Type: application/x-www-form-urlencoded\r\nContent-Length: 3\r\n\r\nk=v",
        )
        .await
        .unwrap();
    let text = read_until(&mut socket, |t| t.contains("echo POST /submit")).await;
    assert!(text.contains("200 OK"));
}

#[tokio::test]
async fn unknown_protocol_gets_505_and_close() {
    let addr = start(test_config()).await;
    let mut socket = TcpStream::connect(addr).await.unwrap();
    socket.write_all(b"NONSENSE GARBAGE\r\n").await.unwrap();
    let text = read_until_close(&mut socket).await;
    assert!(text.contains("505"));
}

#[tokio::test]
async fn read_timeout_produces_best_effort_408() {
    let mut config = test_config();
    config.read_timeout = 200;
    let addr = start(config).await;
    let mut socket = TcpStream::connect(addr).await.unwrap();
    // 发出请求行但头部悬着不收尾，等超时
    socket
        .write_all(b"GET /slow HTTP/1.1\r\nHost: x\r\n")
        .await
        .unwrap();
    let text = read_until_close(&mut socket).await;
    assert!(text.contains("408"));
}

#[tokio::test]
async fn pool_exhaustion_rejects_with_503() {
    let mut config = test_config();
    config.max_threads = 1;
    let addr = start(config).await;

    // 第一条连接占住唯一的处理器
    let _first = TcpStream::connect(addr).await.unwrap();
    tokio::time::sleep(Duration::from_millis(200)).await;

    let mut second = TcpStream::connect(addr).await.unwrap();
    let text = read_until_close(&mut second).await;
    assert!(text.contains("503"));
    assert!(text.contains("too many connections"));
}

/// 从累积缓冲里切出完整帧
fn drain_frames(buf: &mut BytesMut) -> Vec<Frame> {
    let mut frames = Vec::new();
    loop {
        if buf.len() < FRAME_HEADER_LEN {
            return frames;
        }
        let header = FrameHeader::parse(&buf[..FRAME_HEADER_LEN]);
        if buf.len() < FRAME_HEADER_LEN + header.length {
            return frames;
        }
        let _ = buf.split_to(FRAME_HEADER_LEN);
        let payload = buf.split_to(header.length).freeze();
        frames.push(Frame::new(
            header.frame_type,
            header.flags,
            header.stream_id,
            payload,
        ));
    }
}

fn entry(name: &str, value: &str) -> HpackTableEntry {
    HpackTableEntry::new(name.as_bytes().to_vec(), value.as_bytes().to_vec())
}

#[tokio::test]
async fn http2_streams_are_demultiplexed_independently() {
    let addr = start(test_config()).await;
    let mut socket = TcpStream::connect(addr).await.unwrap();

    // 前言 + 空 SETTINGS + 流 1 与流 3 的 HEADERS
    let mut encoder = Hpack::new(4096);
    let mut wire = BytesMut::new();
    wire.extend_from_slice(b"PRI * HTTP/2.0\r\n\r\nSM\r\n\r\n");
    Frame::settings(&[]).write_to(&mut wire);
    let block1 = encoder.encode(&[
        entry(":method", "GET"),
        entry(":path", "/a"),
        entry(":scheme", "http"),
        entry(":authority", "localhost"),
    ]);
    Frame::new(TYPE_HEADERS, FLAG_END_HEADERS | FLAG_END_STREAM, 1, block1).write_to(&mut wire);
    let block3 = encoder.encode(&[
        entry(":method", "GET"),
        entry(":path", "/b"),
        entry(":scheme", "http"),
        entry(":authority", "localhost"),
    ]);
    Frame::new(TYPE_HEADERS, FLAG_END_HEADERS | FLAG_END_STREAM, 3, block3).write_to(&mut wire);
    socket.write_all(&wire).await.unwrap();

    // 收帧直到两个流的 DATA 都到齐
    let mut decoder = Hpack::new(4096);
    let mut pending = BytesMut::new();
    let mut buf = [0u8; 4096];
    let mut statuses: Vec<(u32, String)> = Vec::new();
    let mut bodies: Vec<(u32, String)> = Vec::new();
    let mut saw_server_settings = false;
    let mut saw_settings_ack = false;
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while bodies.len() < 2 {
        let n = tokio::time::timeout_at(deadline, socket.read(&mut buf))
            .await
            .expect("等待 HTTP/2 响应超时")
            .expect("读取失败");
        assert!(n > 0, "服务端过早关闭连接");
        pending.extend_from_slice(&buf[..n]);
        for frame in drain_frames(&mut pending) {
            match frame.frame_type {
                TYPE_SETTINGS => {
                    if frame.flags & 0x1 != 0 {
                        saw_settings_ack = true;
                    } else {
                        saw_server_settings = true;
                    }
                }
                TYPE_HEADERS => {
                    let headers = decoder.decode(&frame.payload);
                    assert!(!decoder.error(), "响应头部块解码失败");
                    assert_eq!(&headers[0].name[..], b":status");
                    statuses.push((
                        frame.stream_id,
                        String::from_utf8_lossy(&headers[0].value).into_owned(),
                    ));
                }
                TYPE_DATA => {
                    assert_ne!(frame.flags & FLAG_END_STREAM, 0);
                    bodies.push((
                        frame.stream_id,
                        String::from_utf8_lossy(&frame.payload).into_owned(),
                    ));
                }
                _ => {}
            }
        }
    }

    assert!(saw_server_settings, "前言之后必须先收到服务端 SETTINGS");
    assert!(saw_settings_ack, "客户端 SETTINGS 必须得到 ACK");
    for (stream_id, status) in &statuses {
        assert_eq!(status, "200", "流 {} 状态码错误", stream_id);
    }
    let body_of = |id: u32| {
        bodies
            .iter()
            .find(|(s, _)| *s == id)
            .map(|(_, b)| b.as_str())
            .unwrap_or_default()
    };
    assert_eq!(body_of(1), "echo GET /a");
    assert_eq!(body_of(3), "echo GET /b");
}

#[tokio::test]
async fn http2_lookalike_garbage_is_rejected() {
    let addr = start(test_config()).await;
    let mut socket = TcpStream::connect(addr).await.unwrap();
    // 前 18 字节与 HTTP/2 前言一致，后半段损坏：
    // 嗅探阶段即判为未知协议并关闭连接
    socket
        .write_all(b"PRI * HTTP/2.0\r\n\r\nXX\r\n\r\n")
        .await
        .unwrap();
    let text = read_until_close(&mut socket).await;
    assert!(text.contains("505"));
}
