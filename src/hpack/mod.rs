//! HPACK 头部压缩编解码器（RFC 7541）
//!
//! 每个 HTTP/2 连接持有一个 [`Hpack`] 实例，由根流创建，
//! 连接上的所有子流共享同一个动态表。
//! 解码错误具有粘性：一旦置位，本次 decode 返回空列表，
//! 调用方必须把整个头部块乃至连接按协议错误处理。

pub mod huffman;
pub mod integer;
pub mod table;

use bytes::{Bytes, BytesMut};

use crate::utils::logger::{debug, warn};

pub use table::{HpackDynamicTable, HpackTableEntry, STATIC_TABLE};

/// Huffman 编码收益策略：值长度达到该字节数才启用 Huffman
const HUFFMAN_MIN_LEN: usize = 10;

/// HPACK 编解码器
pub struct Hpack {
    dyn_table: HpackDynamicTable,
    error: bool,
}

impl Hpack {
    /// 创建编解码器，动态表初始上限默认 4096 字节
    pub fn new(table_size: usize) -> Self {
        Self {
            dyn_table: HpackDynamicTable::new(table_size),
            error: false,
        }
    }

    /// 解码过程中是否出过错
    pub fn error(&self) -> bool {
        self.error
    }

    /// 清除错误标志
    pub fn clear_error(&mut self) {
        self.error = false;
    }

    /// 动态表（测试与诊断用）
    pub fn dynamic_table(&self) -> &HpackDynamicTable {
        &self.dyn_table
    }

    /// 把 HPACK 头部块解码为有序的头部列表。
    ///
    /// 任何越界读取都会置位错误标志并返回空列表。
    pub fn decode(&mut self, source: &[u8]) -> Vec<HpackTableEntry> {
        let mut headers = Vec::new();
        let mut off = 0usize;
        while off < source.len() {
            let b = source[off];
            // Indexed Header Field: 1xxxxxxx
            if b & 0x80 == 0x80 {
                let (id, consumed) = match integer::decode_integer(&source[off..], 7) {
                    Ok(v) => v,
                    Err(_) => return self.fail(),
                };
                if id == 0 {
                    return self.fail();
                }
                off += consumed;
                match self.table_entry(id) {
                    Some(entry) => headers.push(entry),
                    None => return self.fail(),
                }
            }
            // Dynamic Table Size Update: 001xxxxx
            else if b & 0xe0 == 0x20 {
                let (size, consumed) = match integer::decode_integer(&source[off..], 5) {
                    Ok(v) => v,
                    Err(_) => return self.fail(),
                };
                off += consumed;
                debug!("🗜️ [HPACK] 动态表尺寸更新: {}", size);
                self.dyn_table.set_max_size(size as usize);
            }
            // 字面量头部字段
            else {
                // 01xxxxxx 增量索引（6 位前缀）
                // 0000xxxx 不索引（4 位前缀）
                // 0001xxxx 永不索引（4 位前缀，解码路径与不索引一致，
                //          值不得进入任何索引或日志路径）
                let (n, index) = if b & 0xc0 == 0x40 {
                    (6u8, true)
                } else {
                    (4u8, false)
                };
                let (id, consumed) = match integer::decode_integer(&source[off..], n) {
                    Ok(v) => v,
                    Err(_) => return self.fail(),
                };
                off += consumed;
                let mut entry = if id == 0 {
                    HpackTableEntry::default()
                } else {
                    match self.table_entry(id) {
                        Some(entry) => entry,
                        None => return self.fail(),
                    }
                };
                if id == 0 {
                    match self.read_string(source, &mut off) {
                        Some(name) => entry.name = name,
                        None => return self.fail(),
                    }
                }
                match self.read_string(source, &mut off) {
                    Some(value) => entry.value = value,
                    None => return self.fail(),
                }
                if index {
                    self.dyn_table.insert(entry.clone());
                }
                headers.push(entry);
            }
        }
        headers
    }

    /// 把头部列表编码为一个 HPACK 头部块。
    ///
    /// 空值头部不是合法的可缓存指令，跳过并记录诊断日志，
    /// 不会使整批编码失败。
    pub fn encode(&mut self, headers: &[HpackTableEntry]) -> Bytes {
        let mut out = BytesMut::new();
        for entry in headers {
            if entry.value.is_empty() {
                warn!(
                    "🗜️ [HPACK] 跳过空值头部: {}",
                    String::from_utf8_lossy(&entry.name)
                );
                continue;
            }
            // 名称与值都命中才能用索引形式，避免空值表项按名称
            // 误匹配导致往返丢值
            if let Some(id) = self.exact_index(entry) {
                integer::encode_integer(&mut out, id, 7, 0x80);
                continue;
            }
            // 增量索引字面量，名称已知时引用名称索引
            let name_probe = HpackTableEntry::new(entry.name.clone(), Bytes::new());
            let name_id = self.lookup_index(&name_probe).unwrap_or(0);
            integer::encode_integer(&mut out, name_id, 6, 0x40);
            if name_id == 0 {
                encode_string(&mut out, &entry.name);
            }
            encode_string(&mut out, &entry.value);
            self.dyn_table.insert(entry.clone());
        }
        out.freeze()
    }

    /// 置位错误并返回空列表
    fn fail(&mut self) -> Vec<HpackTableEntry> {
        self.error = true;
        Vec::new()
    }

    /// 按索引取表项：1-61 静态表，62 起按 id-62 查动态表
    fn table_entry(&self, id: u64) -> Option<HpackTableEntry> {
        if (1..=61).contains(&id) {
            STATIC_TABLE.get(id as usize - 1).cloned()
        } else if id >= 62 {
            self.dyn_table.entry(id as usize - 62).cloned()
        } else {
            None
        }
    }

    /// 名称与值逐字节相等的索引查找
    fn exact_index(&self, entry: &HpackTableEntry) -> Option<u64> {
        for (i, candidate) in STATIC_TABLE.iter().enumerate() {
            if candidate.name == entry.name && candidate.value == entry.value {
                return Some(i as u64 + 1);
            }
        }
        for i in 0..self.dyn_table.len() {
            let candidate = self.dyn_table.entry(i)?;
            if candidate.name == entry.name && candidate.value == entry.value {
                return Some(i as u64 + 62);
            }
        }
        None
    }

    /// 表查找语义（空值只比名称）的索引查找，
    /// 用于"名称已知、值待定"的名称引用
    fn lookup_index(&self, entry: &HpackTableEntry) -> Option<u64> {
        for (i, candidate) in STATIC_TABLE.iter().enumerate() {
            if candidate == entry {
                return Some(i as u64 + 1);
            }
        }
        self.dyn_table.index_of(entry).map(|i| i as u64 + 62)
    }

    /// 读取长度前缀字符串（7 位前缀，最高位为 Huffman 标志）。
    /// 越界或 Huffman 解码失败返回 None。
    fn read_string(&mut self, source: &[u8], off: &mut usize) -> Option<Bytes> {
        if *off >= source.len() {
            return None;
        }
        let huffman = source[*off] & 0x80 == 0x80;
        let (len, consumed) = integer::decode_integer(&source[*off..], 7).ok()?;
        *off += consumed;
        let len = len as usize;
        if *off + len > source.len() {
            return None;
        }
        let raw = &source[*off..*off + len];
        *off += len;
        if huffman {
            huffman::decode(raw).ok().map(Bytes::from)
        } else {
            Some(Bytes::copy_from_slice(raw))
        }
    }
}

/// 编码长度前缀字符串，长度达到阈值时用 Huffman
fn encode_string(dst: &mut BytesMut, data: &[u8]) {
    if data.len() >= HUFFMAN_MIN_LEN {
        let encoded = huffman::encode(data);
        integer::encode_integer(dst, encoded.len() as u64, 7, 0x80);
        dst.extend_from_slice(&encoded);
    } else {
        integer::encode_integer(dst, data.len() as u64, 7, 0x00);
        dst.extend_from_slice(data);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(name: &str, value: &str) -> HpackTableEntry {
        HpackTableEntry::new(name.as_bytes().to_vec(), value.as_bytes().to_vec())
    }

    #[test]
    fn decode_rfc_c3_requests() {
        // RFC 7541 C.3.1：第一个请求
        let mut hpack = Hpack::new(4096);
        let block = [
            0x82u8, 0x86, 0x84, 0x41, 0x0f, 0x77, 0x77, 0x77, 0x2e, 0x65, 0x78, 0x61, 0x6d,
            0x70, 0x6c, 0x65, 0x2e, 0x63, 0x6f, 0x6d,
        ];
        let headers = hpack.decode(&block);
        assert!(!hpack.error());
        assert_eq!(headers.len(), 4);
        assert_eq!(&headers[0].name[..], b":method");
        assert_eq!(&headers[0].value[..], b"GET");
        assert_eq!(&headers[3].name[..], b":authority");
        assert_eq!(&headers[3].value[..], b"www.example.com");
        // :authority 进入了动态表
        assert_eq!(hpack.dynamic_table().len(), 1);

        // C.3.2：第二个请求引用动态表索引 62
        let block2 = [0x82u8, 0x86, 0x84, 0xbe, 0x58, 0x08, 0x6e, 0x6f, 0x2d, 0x63, 0x61, 0x63, 0x68, 0x65];
        let headers2 = hpack.decode(&block2);
        assert!(!hpack.error());
        assert_eq!(headers2.len(), 5);
        assert_eq!(&headers2[3].value[..], b"www.example.com");
        assert_eq!(&headers2[4].name[..], b"cache-control");
        assert_eq!(&headers2[4].value[..], b"no-cache");
    }

    #[test]
    fn roundtrip_preserves_order_and_values() {
        let mut encoder = Hpack::new(4096);
        let mut decoder = Hpack::new(4096);
        let headers = vec![
            entry(":method", "POST"),
            entry(":path", "/submit"),
            entry("content-type", "application/json"),
            entry("x-custom-header", "some-rather-long-value-here"),
            entry("content-type", "application/json"),
        ];
        let encoded = encoder.encode(&headers);
        let decoded = decoder.decode(&encoded);
        assert!(!decoder.error());
        assert_eq!(decoded.len(), headers.len());
        for (got, want) in decoded.iter().zip(headers.iter()) {
            assert_eq!(got.name, want.name);
            assert_eq!(got.value, want.value);
        }
    }

    #[test]
    fn empty_value_entries_are_skipped_on_encode() {
        let mut encoder = Hpack::new(4096);
        let encoded = encoder.encode(&[entry("accept", ""), entry("host", "a.cn")]);
        let mut decoder = Hpack::new(4096);
        let decoded = decoder.decode(&encoded);
        assert_eq!(decoded.len(), 1);
        assert_eq!(&decoded[0].name[..], b"host");
    }

    #[test]
    fn zero_index_is_a_sticky_error() {
        let mut hpack = Hpack::new(4096);
        let headers = hpack.decode(&[0x80]);
        assert!(headers.is_empty());
        assert!(hpack.error());
        // 错误粘性：不清除就一直在
        assert!(hpack.error());
        hpack.clear_error();
        assert!(!hpack.error());
    }

    #[test]
    fn truncated_literal_fails_decode() {
        let mut encoder = Hpack::new(4096);
        let encoded = encoder.encode(&[entry("x-header", "一个比较长的值需要截断测试")]);
        let mut decoder = Hpack::new(4096);
        let headers = decoder.decode(&encoded[..encoded.len() - 3]);
        assert!(headers.is_empty());
        assert!(decoder.error());
    }

    #[test]
    fn table_size_update_is_applied() {
        let mut hpack = Hpack::new(4096);
        // 001xxxxx，值 0：把动态表缩到 0
        let headers = hpack.decode(&[0x20]);
        assert!(!hpack.error());
        assert!(headers.is_empty());
        assert_eq!(hpack.dynamic_table().max_size(), 0);
    }

    #[test]
    fn static_name_with_dynamic_value_roundtrips() {
        // "age" 在静态表里只有名称没有值，
        // 编码 ("age","123") 不能折叠成索引形式
        let mut encoder = Hpack::new(4096);
        let encoded = encoder.encode(&[entry("age", "123")]);
        let mut decoder = Hpack::new(4096);
        let decoded = decoder.decode(&encoded);
        assert!(!decoder.error());
        assert_eq!(decoded.len(), 1);
        assert_eq!(&decoded[0].name[..], b"age");
        assert_eq!(&decoded[0].value[..], b"123");
    }
}
