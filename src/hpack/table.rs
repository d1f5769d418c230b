//! HPACK 静态表与动态表（RFC 7541 §2.3）
//!
//! 静态表在进程启动时初始化一次，全局只读共享；
//! 动态表按 HTTP/2 连接各自持有，由根流创建和销毁。

use bytes::Bytes;
use lazy_static::lazy_static;

/// HPACK 表项，头部名称与值的二进制对
#[derive(Debug, Clone, Default)]
pub struct HpackTableEntry {
    /// 头部名称（小写）
    pub name: Bytes,
    /// 头部值
    pub value: Bytes,
}

impl HpackTableEntry {
    /// 创建表项
    pub fn new(name: impl Into<Bytes>, value: impl Into<Bytes>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }

    /// 表项占用的大小，RFC 7541 §4.1 规定每项附加 32 字节开销
    pub fn size(&self) -> usize {
        self.name.len() + self.value.len() + 32
    }
}

/// 表查找专用的相等语义：任意一侧值为空时只比较名称，
/// 用于"名称已知、值待定"的索引查找
impl PartialEq for HpackTableEntry {
    fn eq(&self, other: &Self) -> bool {
        if self.name != other.name {
            return false;
        }
        if self.value.is_empty() || other.value.is_empty() {
            return true;
        }
        self.value == other.value
    }
}

impl Eq for HpackTableEntry {}

/// RFC 7541 附录 A 的 61 项静态表参考数据
const STATIC_TABLE_DATA: [(&str, &str); 61] = [
    (":authority", ""),
    (":method", "GET"),
    (":method", "POST"),
    (":path", "/"),
    (":path", "/index.html"),
    (":scheme", "http"),
    (":scheme", "https"),
    (":status", "200"),
    (":status", "204"),
    (":status", "206"),
    (":status", "304"),
    (":status", "400"),
    (":status", "404"),
    (":status", "500"),
    ("accept-charset", ""),
    ("accept-encoding", "gzip, deflate"),
    ("accept-language", ""),
    ("accept-ranges", ""),
    ("accept", ""),
    ("access-control-allow-origin", ""),
    ("age", ""),
    ("allow", ""),
    ("authorization", ""),
    ("cache-control", ""),
    ("content-disposition", ""),
    ("content-encoding", ""),
    ("content-language", ""),
    ("content-length", ""),
    ("content-location", ""),
    ("content-range", ""),
    ("content-type", ""),
    ("cookie", ""),
    ("date", ""),
    ("etag", ""),
    ("expect", ""),
    ("expires", ""),
    ("from", ""),
    ("host", ""),
    ("if-match", ""),
    ("if-modified-since", ""),
    ("if-none-match", ""),
    ("if-range", ""),
    ("if-unmodified-since", ""),
    ("last-modified", ""),
    ("link", ""),
    ("location", ""),
    ("max-forwards", ""),
    ("proxy-authenticate", ""),
    ("proxy-authorization", ""),
    ("range", ""),
    ("referer", ""),
    ("refresh", ""),
    ("retry-after", ""),
    ("server", ""),
    ("set-cookie", ""),
    ("strict-transport-security", ""),
    ("transfer-encoding", ""),
    ("user-agent", ""),
    ("vary", ""),
    ("via", ""),
    ("www-authenticate", ""),
];

lazy_static! {
    /// 进程级静态表，初始化一次后只读共享
    pub static ref STATIC_TABLE: Vec<HpackTableEntry> = STATIC_TABLE_DATA
        .iter()
        .map(|(name, value)| HpackTableEntry::new(
            Bytes::from_static(name.as_bytes()),
            Bytes::from_static(value.as_bytes()),
        ))
        .collect();
}

/// HPACK 动态表
///
/// 最新插入的表项在位置 0，旧表项随插入逐位后移。
/// 不变量：所有表项的 size() 之和不超过 max_size。
#[derive(Debug)]
pub struct HpackDynamicTable {
    table: Vec<HpackTableEntry>,
    size: usize,
    max_size: usize,
}

impl HpackDynamicTable {
    /// 创建指定最大尺寸的动态表，HTTP/2 默认值为 4096
    pub fn new(max_size: usize) -> Self {
        Self {
            table: Vec::new(),
            size: 0,
            max_size,
        }
    }

    /// 插入表项，必要时从尾部逐出旧表项腾出空间。
    /// 单项就超过 max_size 的表项不会入表。
    pub fn insert(&mut self, entry: HpackTableEntry) {
        let entry_size = entry.size();
        if self.size + entry_size > self.max_size {
            self.shrink(self.max_size.saturating_sub(entry_size));
        }
        if entry_size <= self.max_size {
            self.table.insert(0, entry);
            self.size += entry_size;
        }
    }

    /// 按位置取表项，位置 0 为最新插入
    pub fn entry(&self, index: usize) -> Option<&HpackTableEntry> {
        self.table.get(index)
    }

    /// 检查表中是否存在相等（表查找语义）的表项
    pub fn contains(&self, entry: &HpackTableEntry) -> bool {
        self.table.iter().any(|e| e == entry)
    }

    /// 返回表项的位置，不存在时返回 None
    pub fn index_of(&self, entry: &HpackTableEntry) -> Option<usize> {
        self.table.iter().position(|e| e == entry)
    }

    /// 当前占用大小
    pub fn size(&self) -> usize {
        self.size
    }

    /// 最大允许大小
    pub fn max_size(&self) -> usize {
        self.max_size
    }

    /// 调整最大尺寸，缩小时立即从尾部逐出
    pub fn set_max_size(&mut self, max_size: usize) {
        self.shrink(max_size);
        self.max_size = max_size;
    }

    /// 表项数量
    pub fn len(&self) -> usize {
        self.table.len()
    }

    /// 表是否为空
    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }

    /// 从尾部逐出表项直到占用不超过给定大小
    fn shrink(&mut self, max_size: usize) {
        while self.size > max_size {
            if let Some(last) = self.table.pop() {
                self.size -= last.size();
            } else {
                break;
            }
        }
    }
}
