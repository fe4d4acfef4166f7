//! 图片批量下载器。
//!
//! 从纯文本列表读取图片 URL，按固定并发数下载并保存到本地目录；单个 URL 失败不会中断整批。
//!
//! 代码结构：
//! - `base_system`：配置 / 日志 / 诊断输出等基础设施
//! - `download`：URL 读取、单项下载、工作池与批量编排

pub mod base_system;
pub mod download;
