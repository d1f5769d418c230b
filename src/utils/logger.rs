//! 日志工具模块
//!
//! 统一转发到 rat_logger，引擎内部一律通过
//! `crate::utils::logger::{debug, info, warn, error}` 使用。
//! 日志系统的初始化由宿主应用负责，引擎本身不做全局初始化。

pub use rat_logger::{debug, error, info, trace, warn};
