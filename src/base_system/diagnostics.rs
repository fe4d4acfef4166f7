//! 诊断输出（Diagnostics Sink）。
//!
//! 下载核心只依赖 `Diagnostics` trait 写入分级消息；具体落到哪里（控制台、滚动日志文件、
//! 内存记录）由调用方组合决定。多目标输出通过 `CompositeSink` 显式转发实现。

use std::fmt;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Level {
    Debug,
    Info,
    Warn,
    Error,
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Level::Debug => "DEBUG",
            Level::Info => "INFO",
            Level::Warn => "WARN",
            Level::Error => "ERROR",
        };
        f.write_str(s)
    }
}

/// Append-only leveled log surface shared by every worker.
///
/// Implementations must tolerate concurrent calls; the core never locks around them.
pub trait Diagnostics: Send + Sync {
    fn log(&self, level: Level, message: &str);

    fn debug(&self, message: &str) {
        self.log(Level::Debug, message);
    }

    fn info(&self, message: &str) {
        self.log(Level::Info, message);
    }

    fn warn(&self, message: &str) {
        self.log(Level::Warn, message);
    }

    fn error(&self, message: &str) {
        self.log(Level::Error, message);
    }
}

pub type SharedDiagnostics = Arc<dyn Diagnostics>;

/// Forwards to the global `tracing` subscriber (console + file layers, see `logging`).
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl Diagnostics for TracingSink {
    fn log(&self, level: Level, message: &str) {
        match level {
            Level::Debug => tracing::debug!(target: "downloader", "{message}"),
            Level::Info => tracing::info!(target: "downloader", "{message}"),
            Level::Warn => tracing::warn!(target: "downloader", "{message}"),
            Level::Error => tracing::error!(target: "downloader", "{message}"),
        }
    }
}

/// 按顺序把每条记录转发给所有成员。
#[derive(Default, Clone)]
pub struct CompositeSink {
    sinks: Vec<SharedDiagnostics>,
}

impl CompositeSink {
    pub fn new(sinks: Vec<SharedDiagnostics>) -> Self {
        Self { sinks }
    }
}

impl Diagnostics for CompositeSink {
    fn log(&self, level: Level, message: &str) {
        for sink in &self.sinks {
            sink.log(level, message);
        }
    }
}

/// Counts records per level without keeping the text.
#[derive(Debug, Default)]
pub struct LevelCounter {
    debug: AtomicUsize,
    info: AtomicUsize,
    warn: AtomicUsize,
    error: AtomicUsize,
}

impl LevelCounter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn count(&self, level: Level) -> usize {
        self.slot(level).load(Ordering::Relaxed)
    }

    fn slot(&self, level: Level) -> &AtomicUsize {
        match level {
            Level::Debug => &self.debug,
            Level::Info => &self.info,
            Level::Warn => &self.warn,
            Level::Error => &self.error,
        }
    }
}

impl Diagnostics for LevelCounter {
    fn log(&self, level: Level, _message: &str) {
        self.slot(level).fetch_add(1, Ordering::Relaxed);
    }
}

/// 内存记录器：保存全部 (级别, 文本)，便于调用方或测试事后检查。
#[derive(Debug, Default)]
pub struct MemorySink {
    records: Mutex<Vec<(Level, String)>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<(Level, String)> {
        self.records
            .lock()
            .map(|r| r.clone())
            .unwrap_or_default()
    }

    pub fn messages(&self, level: Level) -> Vec<String> {
        self.records()
            .into_iter()
            .filter(|(l, _)| *l == level)
            .map(|(_, m)| m)
            .collect()
    }

    pub fn count(&self, level: Level) -> usize {
        self.messages(level).len()
    }

    pub fn contains(&self, level: Level, needle: &str) -> bool {
        self.messages(level).iter().any(|m| m.contains(needle))
    }
}

impl Diagnostics for MemorySink {
    fn log(&self, level: Level, message: &str) {
        // A poisoned lock only means another writer panicked mid-push; keep recording.
        let mut guard = match self.records.lock() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        };
        guard.push((level, message.to_string()));
    }
}
