//! HTTP/2 流状态机与多路复用
//!
//! 根流（流 0）拥有连接上的全部子流、HPACK 编解码器和设置表；
//! 子流按流标识存放在根流的 arena 里，父子关系用标识查询，
//! 不持有任何反向引用。
//! 帧装配：先凑齐 9 字节帧头，再跨任意多次 recv 凑齐载荷。

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use bytes::{Buf, Bytes, BytesMut};

use crate::error::{FrameErrorCode, VoleError, VoleResult};
use crate::hpack::Hpack;
use crate::server::config::ServerConfig;
use crate::server::request::{is_known_method, HttpVersion, Request};
use crate::server::stream::frame::{
    Frame, FrameHeader, FLAG_ACK, FLAG_END_HEADERS, FLAG_END_STREAM, FLAG_PADDED, FLAG_PRIORITY,
    FRAME_HEADER_LEN, SETTINGS_ENABLE_PUSH, TYPE_CONTINUATION, TYPE_DATA, TYPE_GOAWAY,
    TYPE_HEADERS, TYPE_PING, TYPE_PRIORITY, TYPE_RST_STREAM, TYPE_SETTINGS, TYPE_WINDOW_UPDATE,
};
use crate::utils::logger::{debug, warn};

/// HTTP/2 连接前言
pub const PREFACE: &[u8] = b"PRI * HTTP/2.0\r\n\r\nSM\r\n\r\n";

/// 新建流的默认权重
const DEFAULT_WEIGHT: u8 = 16;

/// 流状态（RFC 7540 §5.1）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    /// 未使用
    Idle,
    /// 双向打开
    Open,
    /// 对端已关闭
    HalfClosedRemote,
    /// 本端已关闭
    HalfClosedLocal,
    /// 已关闭
    Closed,
}

/// arena 中的一个子流
#[derive(Debug)]
struct StreamSlot {
    state: StreamState,
    /// 依赖父流的标识，默认为根流 0
    parent: u32,
    weight: u8,
    /// 正在累积的头部块（HEADERS + CONTINUATION）
    header_block: Option<BytesMut>,
    /// 头部块已经完成，后续 HEADERS 视为重复并忽略
    headers_done: bool,
    /// DATA 载荷累积
    body: BytesMut,
}

impl StreamSlot {
    fn new() -> Self {
        Self {
            state: StreamState::Idle,
            parent: 0,
            weight: DEFAULT_WEIGHT,
            header_block: None,
            headers_done: false,
            body: BytesMut::new(),
        }
    }
}

/// HTTP/2 根流：一个连接的协议状态机
pub struct Http2Stream {
    config: Arc<ServerConfig>,
    peer_addr: SocketAddr,
    /// 连接级 HPACK 编解码器，响应序列化共享同一实例
    hpack: Arc<Mutex<Hpack>>,
    /// 未解析字节
    buffer: BytesMut,
    /// 已解析、等待载荷凑齐的帧头
    pending: Option<FrameHeader>,
    /// 前言校验是否已通过
    preface_done: bool,
    /// 对端的设置表
    settings: HashMap<u16, u32>,
    /// 子流 arena，按流标识索引
    streams: HashMap<u32, StreamSlot>,
    /// 头部块累积中的流（CONTINUATION 只对它合法）
    continuation: Option<u32>,
    /// 见过的最大流标识，GOAWAY 时回带
    max_stream_id: u32,
    /// 收到 GOAWAY 后连接进入收尾
    closing: bool,
}

impl Http2Stream {
    /// 创建根流
    pub fn new(config: Arc<ServerConfig>, peer_addr: SocketAddr) -> Self {
        Self {
            config,
            peer_addr,
            hpack: Arc::new(Mutex::new(Hpack::new(4096))),
            buffer: BytesMut::new(),
            pending: None,
            preface_done: false,
            settings: HashMap::new(),
            streams: HashMap::new(),
            continuation: None,
            max_stream_id: 0,
            closing: false,
        }
    }

    /// 连接共享的 HPACK 编解码器
    pub fn hpack(&self) -> Arc<Mutex<Hpack>> {
        self.hpack.clone()
    }

    /// 对端是否已通过 GOAWAY 请求收尾
    pub fn closing(&self) -> bool {
        self.closing
    }

    /// 对端设置表（测试与诊断用）
    pub fn setting(&self, id: u16) -> Option<u32> {
        self.settings.get(&id).copied()
    }

    /// 喂入新收到的字节。
    ///
    /// 完成的请求按头部块完成的顺序返回；需要回写的控制帧
    /// （服务端 SETTINGS、ACK、PING 应答）追加到 `out`。
    pub fn recv(&mut self, data: &[u8], out: &mut BytesMut) -> VoleResult<Vec<Request>> {
        self.buffer.extend_from_slice(data);
        let mut completed = Vec::new();

        if !self.preface_done {
            if self.buffer.len() < PREFACE.len() {
                return Ok(completed);
            }
            if &self.buffer[..PREFACE.len()] != PREFACE {
                return Err(VoleError::ProtocolUnknown(
                    "HTTP/2 连接前言不匹配".to_string(),
                ));
            }
            self.buffer.advance(PREFACE.len());
            self.preface_done = true;
            // 前言之后立即下发服务端设置：禁用服务端推送
            Frame::settings(&[(SETTINGS_ENABLE_PUSH, 0)]).write_to(out);
            debug!("🚇 [HTTP/2] 前言校验通过: {}", self.peer_addr);
        }

        loop {
            if self.pending.is_none() {
                if self.buffer.len() < FRAME_HEADER_LEN {
                    break;
                }
                let header = FrameHeader::parse(&self.buffer[..FRAME_HEADER_LEN]);
                self.buffer.advance(FRAME_HEADER_LEN);
                self.pending = Some(header);
            }
            let header = match self.pending {
                Some(h) => h,
                None => break,
            };
            if self.buffer.len() < header.length {
                break;
            }
            let payload = self.buffer.split_to(header.length).freeze();
            self.pending = None;
            let frame = Frame::new(header.frame_type, header.flags, header.stream_id, payload);
            self.dispatch_frame(frame, out, &mut completed)?;
        }
        Ok(completed)
    }

    /// 帧路由：非根流的帧送往对应子流，首次引用即创建
    fn dispatch_frame(
        &mut self,
        frame: Frame,
        out: &mut BytesMut,
        completed: &mut Vec<Request>,
    ) -> VoleResult<()> {
        if frame.stream_id != 0 {
            self.ensure_stream(frame.stream_id);
        }
        match frame.frame_type {
            TYPE_HEADERS => self.handle_headers(frame, completed),
            TYPE_CONTINUATION => self.handle_continuation(frame, completed),
            TYPE_PRIORITY => self.handle_priority(frame),
            TYPE_SETTINGS => self.handle_settings(frame, out),
            TYPE_DATA => self.handle_data(frame),
            TYPE_RST_STREAM => self.handle_rst_stream(frame),
            TYPE_PING => self.handle_ping(frame, out),
            TYPE_GOAWAY => {
                debug!("🚇 [HTTP/2] 收到 GOAWAY，连接进入收尾: {}", self.peer_addr);
                self.closing = true;
                Ok(())
            }
            TYPE_WINDOW_UPDATE => {
                // 流量控制窗口不做账，仅消费
                debug!("🚇 [HTTP/2] 忽略 WINDOW_UPDATE (流 {})", frame.stream_id);
                Ok(())
            }
            other => {
                // 未识别帧类型按扩展规则忽略
                debug!("🚇 [HTTP/2] 忽略未识别帧类型 0x{:02x}", other);
                Ok(())
            }
        }
    }

    /// 首次引用即创建子流：IDLE 状态、父为根流、权重 16
    fn ensure_stream(&mut self, id: u32) {
        if !self.streams.contains_key(&id) {
            self.streams.insert(id, StreamSlot::new());
            if id > self.max_stream_id {
                self.max_stream_id = id;
            }
            debug!("🚇 [HTTP/2] 新建流 {}", id);
        }
    }

    /// HEADERS 帧：去填充、吃掉内嵌优先级、开始累积头部块
    fn handle_headers(&mut self, frame: Frame, completed: &mut Vec<Request>) -> VoleResult<()> {
        if frame.stream_id == 0 {
            return Err(frame_error(
                FrameErrorCode::ProtocolError,
                "HEADERS 帧不能指向流 0",
            ));
        }
        let slot = match self.streams.get_mut(&frame.stream_id) {
            Some(s) => s,
            None => return Ok(()),
        };
        if slot.headers_done || slot.header_block.is_some() {
            // 重复的 HEADERS，忽略
            warn!("🚇 [HTTP/2] 流 {} 收到重复 HEADERS，忽略", frame.stream_id);
            return Ok(());
        }
        let mut payload = frame.payload.clone();
        if frame.flags & FLAG_PADDED != 0 {
            if payload.is_empty() {
                return Err(frame_error(
                    FrameErrorCode::FrameSizeError,
                    "PADDED HEADERS 缺少填充长度",
                ));
            }
            let pad = payload[0] as usize;
            payload.advance(1);
            if pad >= payload.len() {
                return Err(frame_error(
                    FrameErrorCode::ProtocolError,
                    "HEADERS 填充长度超过载荷",
                ));
            }
            payload.truncate(payload.len() - pad);
        }
        let mut priority = None;
        if matches!(slot.state, StreamState::Idle) && frame.flags & FLAG_PRIORITY != 0 {
            if payload.len() < 5 {
                return Err(frame_error(
                    FrameErrorCode::FrameSizeError,
                    "HEADERS 内嵌优先级不足 5 字节",
                ));
            }
            priority = Some(parse_priority(&payload[..5]));
            payload.advance(5);
        }
        slot.state = StreamState::Open;
        let end_stream = frame.flags & FLAG_END_STREAM != 0;
        if end_stream {
            slot.state = StreamState::HalfClosedRemote;
        }
        slot.header_block = Some(BytesMut::from(&payload[..]));
        if let Some((exclusive, dependency, weight)) = priority {
            self.apply_priority(frame.stream_id, exclusive, dependency, weight)?;
        }
        if frame.flags & FLAG_END_HEADERS != 0 {
            self.finish_headers(frame.stream_id, completed)?;
        } else {
            self.continuation = Some(frame.stream_id);
        }
        Ok(())
    }

    /// CONTINUATION 帧：只在头部块累积中合法
    fn handle_continuation(
        &mut self,
        frame: Frame,
        completed: &mut Vec<Request>,
    ) -> VoleResult<()> {
        let current = self.continuation;
        if current != Some(frame.stream_id) {
            return Err(frame_error(
                FrameErrorCode::ProtocolError,
                "CONTINUATION 帧没有对应的头部块",
            ));
        }
        let slot = match self.streams.get_mut(&frame.stream_id) {
            Some(s) => s,
            None => {
                return Err(frame_error(
                    FrameErrorCode::ProtocolError,
                    "CONTINUATION 指向不存在的流",
                ))
            }
        };
        match slot.header_block.as_mut() {
            Some(block) => block.extend_from_slice(&frame.payload),
            None => {
                return Err(frame_error(
                    FrameErrorCode::ProtocolError,
                    "CONTINUATION 指向已完成的头部块",
                ))
            }
        }
        if frame.flags & FLAG_END_HEADERS != 0 {
            self.finish_headers(frame.stream_id, completed)?;
        }
        Ok(())
    }

    /// 头部块完成：HPACK 解码、伪头部校验、构造请求
    fn finish_headers(&mut self, stream_id: u32, completed: &mut Vec<Request>) -> VoleResult<()> {
        self.continuation = None;
        let block = {
            let slot = match self.streams.get_mut(&stream_id) {
                Some(s) => s,
                None => return Ok(()),
            };
            slot.headers_done = true;
            match slot.header_block.take() {
                Some(b) => b.freeze(),
                None => return Ok(()),
            }
        };
        let headers = {
            let mut codec = self.hpack.lock().unwrap_or_else(|e| e.into_inner());
            let headers = codec.decode(&block);
            if codec.error() {
                codec.clear_error();
                return Err(VoleError::CompressionError(format!(
                    "流 {} 的头部块解码失败",
                    stream_id
                )));
            }
            headers
        };
        let mut request = Request::new();
        request.version = Some(HttpVersion::Http2);
        request.peer_addr = Some(self.peer_addr);
        request.stream_id = stream_id;
        for entry in headers {
            let name = String::from_utf8_lossy(&entry.name).into_owned();
            let value = String::from_utf8_lossy(&entry.value).into_owned();
            if let Some(pseudo) = name.strip_prefix(':') {
                match pseudo {
                    "path" => request.path = value,
                    "method" => {
                        if !is_known_method(&value) {
                            return Err(VoleError::ProtocolUnknown(format!(
                                "不支持的请求方法: {}",
                                value
                            )));
                        }
                        request.method = value;
                    }
                    // :scheme 与 :authority 接受但不参与请求构造
                    "scheme" | "authority" => {}
                    other => {
                        return Err(frame_error(
                            FrameErrorCode::ProtocolError,
                            &format!("未知伪头部 :{}", other),
                        ));
                    }
                }
            } else {
                request.add_header(&name, &value);
            }
        }
        if request.method.is_empty() || request.path.is_empty() {
            return Err(frame_error(
                FrameErrorCode::ProtocolError,
                "缺少 :method 或 :path 伪头部",
            ));
        }
        request.parse_query_string();
        debug!(
            "🚇 [HTTP/2] 流 {} 请求完成: {} {}",
            stream_id, request.method, request.path
        );
        completed.push(request);
        Ok(())
    }

    /// PRIORITY 帧：5 字节定长，重建依赖树
    fn handle_priority(&mut self, frame: Frame) -> VoleResult<()> {
        if frame.payload.len() != 5 {
            return Err(frame_error(
                FrameErrorCode::FrameSizeError,
                "PRIORITY 帧载荷必须为 5 字节",
            ));
        }
        if frame.stream_id == 0 {
            return Err(frame_error(
                FrameErrorCode::ProtocolError,
                "PRIORITY 帧不能指向流 0",
            ));
        }
        let (exclusive, dependency, weight) = parse_priority(&frame.payload);
        self.apply_priority(frame.stream_id, exclusive, dependency, weight)
    }

    /// 重设流依赖。独占模式下新父的既有子流改挂到本流之下。
    fn apply_priority(
        &mut self,
        stream_id: u32,
        exclusive: bool,
        dependency: u32,
        weight: u8,
    ) -> VoleResult<()> {
        if dependency == stream_id {
            return Err(frame_error(
                FrameErrorCode::ProtocolError,
                "流不能依赖自身",
            ));
        }
        if exclusive {
            // 独占：兄弟流全部变为本流的子流，破掉潜在环
            let siblings: Vec<u32> = self
                .streams
                .iter()
                .filter(|(id, slot)| slot.parent == dependency && **id != stream_id)
                .map(|(id, _)| *id)
                .collect();
            for id in siblings {
                if let Some(slot) = self.streams.get_mut(&id) {
                    slot.parent = stream_id;
                }
            }
        }
        if let Some(slot) = self.streams.get_mut(&stream_id) {
            slot.parent = dependency;
            slot.weight = weight;
            debug!(
                "🚇 [HTTP/2] 流 {} 依赖 {} (独占={}, 权重={})",
                stream_id, dependency, exclusive, weight
            );
        }
        Ok(())
    }

    /// SETTINGS 帧：存参数表并立即 ACK
    fn handle_settings(&mut self, frame: Frame, out: &mut BytesMut) -> VoleResult<()> {
        if frame.stream_id != 0 {
            return Err(frame_error(
                FrameErrorCode::ProtocolError,
                "SETTINGS 帧必须指向流 0",
            ));
        }
        if frame.flags & FLAG_ACK != 0 {
            if !frame.payload.is_empty() {
                return Err(frame_error(
                    FrameErrorCode::FrameSizeError,
                    "SETTINGS ACK 必须为空",
                ));
            }
            return Ok(());
        }
        if frame.payload.len() % 6 != 0 {
            return Err(frame_error(
                FrameErrorCode::FrameSizeError,
                "SETTINGS 载荷长度必须是 6 的倍数",
            ));
        }
        for group in frame.payload.chunks_exact(6) {
            let id = (u16::from(group[0]) << 8) | u16::from(group[1]);
            let value = (u32::from(group[2]) << 24)
                | (u32::from(group[3]) << 16)
                | (u32::from(group[4]) << 8)
                | u32::from(group[5]);
            debug!("🚇 [HTTP/2] 设置参数 0x{:x} = {}", id, value);
            self.settings.insert(id, value);
        }
        Frame::settings_ack().write_to(out);
        Ok(())
    }

    /// DATA 帧：累积到流的请求体缓冲
    fn handle_data(&mut self, frame: Frame) -> VoleResult<()> {
        if frame.stream_id == 0 {
            return Err(frame_error(
                FrameErrorCode::ProtocolError,
                "DATA 帧不能指向流 0",
            ));
        }
        if let Some(slot) = self.streams.get_mut(&frame.stream_id) {
            slot.body.extend_from_slice(&frame.payload);
            if frame.flags & FLAG_END_STREAM != 0 {
                slot.state = StreamState::HalfClosedRemote;
            }
        }
        Ok(())
    }

    /// RST_STREAM 帧：销毁对应子流
    fn handle_rst_stream(&mut self, frame: Frame) -> VoleResult<()> {
        if frame.payload.len() != 4 {
            return Err(frame_error(
                FrameErrorCode::FrameSizeError,
                "RST_STREAM 帧载荷必须为 4 字节",
            ));
        }
        if frame.stream_id == 0 {
            return Err(frame_error(
                FrameErrorCode::ProtocolError,
                "RST_STREAM 帧不能指向流 0",
            ));
        }
        if let Some(mut slot) = self.streams.remove(&frame.stream_id) {
            slot.state = StreamState::Closed;
            debug!("🚇 [HTTP/2] 流 {} 被对端重置", frame.stream_id);
        }
        if self.continuation == Some(frame.stream_id) {
            self.continuation = None;
        }
        Ok(())
    }

    /// PING 帧：非 ACK 的以相同载荷应答
    fn handle_ping(&mut self, frame: Frame, out: &mut BytesMut) -> VoleResult<()> {
        if frame.payload.len() != 8 {
            return Err(frame_error(
                FrameErrorCode::FrameSizeError,
                "PING 帧载荷必须为 8 字节",
            ));
        }
        if frame.flags & FLAG_ACK == 0 {
            Frame::ping_ack(frame.payload.clone()).write_to(out);
        }
        Ok(())
    }

    /// 连接级错误的尽力而为收尾帧
    pub fn goaway_for(&self, error: &VoleError) -> Bytes {
        let code = match error {
            VoleError::FrameError { code, .. } => code.wire_code(),
            VoleError::CompressionError(_) => FrameErrorCode::CompressionError.wire_code(),
            _ => FrameErrorCode::ProtocolError.wire_code(),
        };
        Frame::goaway(self.max_stream_id, code).serialize()
    }

    /// 读超时的尽力而为收尾：NO_ERROR GOAWAY
    pub fn timeout_response(&self) -> Bytes {
        Frame::goaway(self.max_stream_id, 0).serialize()
    }

    /// 流的状态（测试用）
    pub fn stream_state(&self, id: u32) -> Option<StreamState> {
        self.streams.get(&id).map(|s| s.state)
    }

    /// 流的依赖父与权重（测试用）
    pub fn stream_dependency(&self, id: u32) -> Option<(u32, u8)> {
        self.streams.get(&id).map(|s| (s.parent, s.weight))
    }
}

/// 解析 5 字节优先级载荷：E 位 + 31 位依赖 + 权重
fn parse_priority(payload: &[u8]) -> (bool, u32, u8) {
    let exclusive = payload[0] & 0x80 != 0;
    let dependency = ((u32::from(payload[0]) & 0x7f) << 24)
        | (u32::from(payload[1]) << 16)
        | (u32::from(payload[2]) << 8)
        | u32::from(payload[3]);
    let weight = payload[4];
    (exclusive, dependency, weight)
}

/// 构造帧级错误
fn frame_error(code: FrameErrorCode, message: &str) -> VoleError {
    VoleError::FrameError {
        code,
        message: message.to_string(),
    }
}
