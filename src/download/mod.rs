//! 下载流程模块入口。
//!
//! 子模块：
//! - `url_source` — 列表文件读取与 URL 校验
//! - `fetcher`    — 单张图片拉取与防冲突落盘
//! - `pool`       — 固定大小工作池（Idle / Accepting / Draining / Closed）
//! - `batch`      — 批量下载编排

pub mod batch;
pub mod fetcher;
pub mod pool;
pub mod url_source;

pub use batch::{BatchDownloader, BatchError, BatchOptions, BatchStatus};
pub use fetcher::{
    FetchError, FetchOutcome, Fetcher, HttpOptions, HttpSource, ImageFetcher, ImageSource,
};
pub use url_source::{SourceError, UrlSource, ValidatedUrl};
