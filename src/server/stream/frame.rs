//! HTTP/2 二进制帧（RFC 7540 §4）
//!
//! 帧是 HTTP/2 线路格式的原子单位：9 字节帧头（24 位长度、
//! 8 位类型、8 位标志、31 位流标识）加载荷。
//! 流标识最高位保留，读取时屏蔽，写入时置零。

use bytes::{BufMut, Bytes, BytesMut};

/// 帧头长度
pub const FRAME_HEADER_LEN: usize = 9;

/// 帧类型（RFC 7540 §6）
pub const TYPE_DATA: u8 = 0x0;
/// HEADERS 帧
pub const TYPE_HEADERS: u8 = 0x1;
/// PRIORITY 帧
pub const TYPE_PRIORITY: u8 = 0x2;
/// RST_STREAM 帧
pub const TYPE_RST_STREAM: u8 = 0x3;
/// SETTINGS 帧
pub const TYPE_SETTINGS: u8 = 0x4;
/// PUSH_PROMISE 帧
pub const TYPE_PUSH_PROMISE: u8 = 0x5;
/// PING 帧
pub const TYPE_PING: u8 = 0x6;
/// GOAWAY 帧
pub const TYPE_GOAWAY: u8 = 0x7;
/// WINDOW_UPDATE 帧
pub const TYPE_WINDOW_UPDATE: u8 = 0x8;
/// CONTINUATION 帧
pub const TYPE_CONTINUATION: u8 = 0x9;

/// END_STREAM / ACK 标志位
pub const FLAG_END_STREAM: u8 = 0x1;
/// SETTINGS / PING 的 ACK 标志位
pub const FLAG_ACK: u8 = 0x1;
/// END_HEADERS 标志位
pub const FLAG_END_HEADERS: u8 = 0x4;
/// PADDED 标志位
pub const FLAG_PADDED: u8 = 0x8;
/// HEADERS 帧内嵌优先级信息的标志位
pub const FLAG_PRIORITY: u8 = 0x20;

/// SETTINGS_ENABLE_PUSH 参数编号
pub const SETTINGS_ENABLE_PUSH: u16 = 0x2;

/// 一个完整的 HTTP/2 帧
#[derive(Debug, Clone)]
pub struct Frame {
    /// 帧类型
    pub frame_type: u8,
    /// 标志位
    pub flags: u8,
    /// 流标识（保留位已屏蔽）
    pub stream_id: u32,
    /// 载荷
    pub payload: Bytes,
}

/// 解析出的 9 字节帧头
#[derive(Debug, Clone, Copy)]
pub struct FrameHeader {
    /// 载荷长度（24 位）
    pub length: usize,
    /// 帧类型
    pub frame_type: u8,
    /// 标志位
    pub flags: u8,
    /// 流标识（保留位已屏蔽）
    pub stream_id: u32,
}

impl FrameHeader {
    /// 从 9 字节缓冲解析帧头
    pub fn parse(buf: &[u8]) -> FrameHeader {
        debug_assert!(buf.len() >= FRAME_HEADER_LEN);
        let length = ((buf[0] as usize) << 16) | ((buf[1] as usize) << 8) | buf[2] as usize;
        let frame_type = buf[3];
        let flags = buf[4];
        // 最高位保留，读取时屏蔽
        let stream_id = ((u32::from(buf[5]) & 0x7f) << 24)
            | (u32::from(buf[6]) << 16)
            | (u32::from(buf[7]) << 8)
            | u32::from(buf[8]);
        FrameHeader {
            length,
            frame_type,
            flags,
            stream_id,
        }
    }
}

impl Frame {
    /// 构造帧
    pub fn new(frame_type: u8, flags: u8, stream_id: u32, payload: impl Into<Bytes>) -> Self {
        Self {
            frame_type,
            flags,
            stream_id,
            payload: payload.into(),
        }
    }

    /// 序列化为线路字节，流标识保留位写零
    pub fn serialize(&self) -> Bytes {
        let mut out = BytesMut::with_capacity(FRAME_HEADER_LEN + self.payload.len());
        self.write_to(&mut out);
        out.freeze()
    }

    /// 序列化并追加到已有缓冲
    pub fn write_to(&self, out: &mut BytesMut) {
        let len = self.payload.len();
        out.put_u8((len >> 16) as u8);
        out.put_u8((len >> 8) as u8);
        out.put_u8(len as u8);
        out.put_u8(self.frame_type);
        out.put_u8(self.flags);
        out.put_u32(self.stream_id & 0x7fff_ffff);
        out.extend_from_slice(&self.payload);
    }

    /// 构造 SETTINGS 帧，参数为 (编号, 值) 对
    pub fn settings(params: &[(u16, u32)]) -> Frame {
        let mut payload = BytesMut::with_capacity(params.len() * 6);
        for &(id, value) in params {
            payload.put_u16(id);
            payload.put_u32(value);
        }
        Frame::new(TYPE_SETTINGS, 0, 0, payload.freeze())
    }

    /// 构造空的 SETTINGS ACK 帧
    pub fn settings_ack() -> Frame {
        Frame::new(TYPE_SETTINGS, FLAG_ACK, 0, Bytes::new())
    }

    /// 构造 PING ACK 帧，回带原载荷
    pub fn ping_ack(payload: Bytes) -> Frame {
        Frame::new(TYPE_PING, FLAG_ACK, 0, payload)
    }

    /// 构造 GOAWAY 帧
    pub fn goaway(last_stream_id: u32, error_code: u32) -> Frame {
        let mut payload = BytesMut::with_capacity(8);
        payload.put_u32(last_stream_id & 0x7fff_ffff);
        payload.put_u32(error_code);
        Frame::new(TYPE_GOAWAY, 0, 0, payload.freeze())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_roundtrip_masks_reserved_bit() {
        let frame = Frame::new(TYPE_HEADERS, FLAG_END_HEADERS, 3, Bytes::from_static(b"abc"));
        let wire = frame.serialize();
        assert_eq!(wire.len(), 12);
        let header = FrameHeader::parse(&wire);
        assert_eq!(header.length, 3);
        assert_eq!(header.frame_type, TYPE_HEADERS);
        assert_eq!(header.flags, FLAG_END_HEADERS);
        assert_eq!(header.stream_id, 3);

        // 保留位在读取时被屏蔽
        let mut raw = wire.to_vec();
        raw[5] |= 0x80;
        let header = FrameHeader::parse(&raw);
        assert_eq!(header.stream_id, 3);
    }

    #[test]
    fn settings_frame_layout() {
        let frame = Frame::settings(&[(SETTINGS_ENABLE_PUSH, 0)]);
        let wire = frame.serialize();
        assert_eq!(&wire[..], &[0, 0, 6, 4, 0, 0, 0, 0, 0, 0, 2, 0, 0, 0, 0]);
    }
}
