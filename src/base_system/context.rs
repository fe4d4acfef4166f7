//! 全局配置结构（Config）与默认值。
//!
//! 该模块同时提供生成 `config.yml` 的字段元信息。

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::config::{ConfigError, ConfigSpec, FieldMeta};
use crate::download::fetcher::{DEFAULT_USER_AGENT, HttpOptions};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    // 输入 / 输出
    #[serde(default = "default_file_path")]
    pub file_path: String,
    #[serde(default = "default_images_folder")]
    pub images_folder: String,

    // 网络配置
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    #[serde(default = "default_request_timeout")]
    pub request_timeout: u64,
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout: u64,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    // 日志配置
    #[serde(default = "default_log_file")]
    pub log_file: String,

    #[serde(skip)]
    base_dir: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            file_path: default_file_path(),
            images_folder: default_images_folder(),
            concurrency: default_concurrency(),
            request_timeout: default_request_timeout(),
            connect_timeout: default_connect_timeout(),
            user_agent: default_user_agent(),
            log_file: default_log_file(),
            base_dir: None,
        }
    }
}

impl ConfigSpec for Config {
    const FILE_NAME: &'static str = "config.yml";

    fn fields() -> &'static [FieldMeta] {
        static FIELDS: [FieldMeta; 7] = [
            FieldMeta {
                name: "file_path",
                description: "URL 列表文件（每行可含多个以空白分隔的图片地址）",
            },
            FieldMeta {
                name: "images_folder",
                description: "图片保存目录，不存在时自动创建",
            },
            FieldMeta {
                name: "concurrency",
                description: "同时下载的最大数量（>= 1）",
            },
            FieldMeta {
                name: "request_timeout",
                description: "单次请求总超时（秒），0 表示不限制，慢速大图可一直下载到完成",
            },
            FieldMeta {
                name: "connect_timeout",
                description: "连接超时时间（秒）",
            },
            FieldMeta {
                name: "user_agent",
                description: "请求使用的 User-Agent",
            },
            FieldMeta {
                name: "log_file",
                description: "日志文件路径，按天滚动",
            },
        ];
        &FIELDS
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.concurrency == 0 {
            return Err(ConfigError::Validation(
                "concurrency must be at least 1".to_string(),
            ));
        }
        if self.file_path.trim().is_empty() {
            return Err(ConfigError::Validation("file_path is empty".to_string()));
        }
        if self.images_folder.trim().is_empty() {
            return Err(ConfigError::Validation(
                "images_folder is empty".to_string(),
            ));
        }
        Ok(())
    }
}

impl Config {
    /// Relative paths below are resolved against this directory (normally the config file's).
    pub fn with_base_dir(mut self, base: impl Into<PathBuf>) -> Self {
        self.base_dir = Some(base.into());
        self
    }

    pub fn list_path(&self) -> PathBuf {
        self.resolve(&self.file_path)
    }

    pub fn images_dir(&self) -> PathBuf {
        self.resolve(&self.images_folder)
    }

    pub fn log_path(&self) -> PathBuf {
        self.resolve(&self.log_file)
    }

    pub fn http_options(&self) -> HttpOptions {
        HttpOptions {
            request_timeout: (self.request_timeout > 0)
                .then_some(Duration::from_secs(self.request_timeout)),
            connect_timeout: Duration::from_secs(self.connect_timeout.max(1)),
            user_agent: self.user_agent.clone(),
        }
    }

    fn resolve(&self, raw: &str) -> PathBuf {
        let p = Path::new(raw.trim());
        match &self.base_dir {
            Some(base) if p.is_relative() => base.join(p),
            _ => p.to_path_buf(),
        }
    }
}

fn default_file_path() -> String {
    "urls.txt".to_string()
}

fn default_images_folder() -> String {
    "images".to_string()
}

fn default_concurrency() -> usize {
    5
}

fn default_request_timeout() -> u64 {
    0
}

fn default_connect_timeout() -> u64 {
    10
}

fn default_user_agent() -> String {
    DEFAULT_USER_AGENT.to_string()
}

fn default_log_file() -> String {
    "logs/downloader.log".to_string()
}
