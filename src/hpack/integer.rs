//! HPACK 前缀整数编码（RFC 7541 §5.1）
//!
//! N 位前缀放在首字节的低 N 位，装不下时用七位一组的
//! 延续字节继续，延续字节最高位为 1 表示后面还有。

use bytes::{BufMut, BytesMut};

use crate::error::{VoleError, VoleResult};

/// 解码 N 位前缀整数，返回整数值与消耗的字节数。
///
/// 输入截断（延续位指向缓冲区之外）是致命解码错误，
/// 调用方必须把整个头部块作废。
pub fn decode_integer(bytes: &[u8], n: u8) -> VoleResult<(u64, usize)> {
    if bytes.is_empty() {
        return Err(VoleError::CompressionError(
            "整数解码时输入为空".to_string(),
        ));
    }
    let mask: u64 = (1u64 << n) - 1;
    let mut value = u64::from(bytes[0]) & mask;
    if value < mask {
        return Ok((value, 1));
    }
    let mut m = 0u32;
    let mut i = 1usize;
    loop {
        if i >= bytes.len() {
            return Err(VoleError::CompressionError(
                "整数延续字节超出输入末尾".to_string(),
            ));
        }
        if m > 56 {
            // 超过 u64 可表示范围，视同损坏的输入
            return Err(VoleError::CompressionError(
                "整数延续字节过多".to_string(),
            ));
        }
        let b = bytes[i];
        value = value
            .checked_add(u64::from(b & 0x7f) << m)
            .ok_or_else(|| VoleError::CompressionError("整数解码溢出".to_string()))?;
        m += 7;
        i += 1;
        if b & 0x80 == 0 {
            break;
        }
    }
    Ok((value, i))
}

/// 编码 N 位前缀整数，首字节高位由 flags 给出指令模式位。
/// 与 decode_integer 完全互逆。
pub fn encode_integer(dst: &mut BytesMut, value: u64, n: u8, flags: u8) {
    let mask: u64 = (1u64 << n) - 1;
    if value < mask {
        dst.put_u8(flags | value as u8);
        return;
    }
    dst.put_u8(flags | mask as u8);
    let mut rest = value - mask;
    while rest >= 128 {
        dst.put_u8((rest % 128) as u8 | 0x80);
        rest /= 128;
    }
    dst.put_u8(rest as u8);
}
