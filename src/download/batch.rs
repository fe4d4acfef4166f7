//! 批量下载编排。
//!
//! 读取 URL 列表，把每个合法 URL 作为一个任务投递到工作池，等待全部任务结束后输出
//! "Download complete!"。单个 URL 的失败只记日志；写权限被拒会穿过任务边界进入工作池的
//! 失败通道，在 drain 之后单独报告。整个 `download` 调用不会向外抛错。

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use thiserror::Error;

use super::fetcher::{FetchError, Fetcher, HttpOptions, HttpSource, ImageFetcher};
use super::pool::{PoolError, WorkerPool};
use super::url_source::{UrlSource, ValidatedUrl};
use crate::base_system::diagnostics::{Diagnostics, SharedDiagnostics};

#[derive(Debug, Clone)]
pub struct BatchOptions {
    pub list_path: PathBuf,
    pub images_dir: PathBuf,
    pub concurrency: usize,
}

#[derive(Debug, Error)]
pub enum BatchError {
    #[error("Permission denied while creating images folder: {source}")]
    PermissionDenied { dir: PathBuf, source: io::Error },
    #[error("cannot create images folder {}: {source}", dir.display())]
    CreateDir { dir: PathBuf, source: io::Error },
    #[error("cannot build HTTP client: {0}")]
    Client(#[from] reqwest::Error),
    #[error(transparent)]
    Pool(#[from] PoolError),
}

/// How a batch run ended. Per-item outcomes are only ever reported through the sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchStatus {
    Completed {
        dispatched: usize,
        fatal_failures: usize,
    },
    Aborted {
        dispatched: usize,
    },
}

impl BatchStatus {
    pub fn is_clean(&self) -> bool {
        matches!(
            self,
            BatchStatus::Completed {
                fatal_failures: 0,
                ..
            }
        )
    }
}

pub struct BatchDownloader {
    options: BatchOptions,
    fetcher: Arc<dyn Fetcher>,
    sink: SharedDiagnostics,
    pool: WorkerPool<FetchError>,
}

impl BatchDownloader {
    /// Creates the target directory and an idle pool of `concurrency` workers.
    pub fn new(
        options: BatchOptions,
        fetcher: Arc<dyn Fetcher>,
        sink: SharedDiagnostics,
    ) -> Result<Self, BatchError> {
        if let Err(err) = prepare_dir(&options.images_dir) {
            sink.error(&err.to_string());
            return Err(err);
        }

        let pool = WorkerPool::new(options.concurrency, "fetch").map_err(|err| {
            sink.error(&format!("An unexpected error occurred: {err}"));
            BatchError::Pool(err)
        })?;

        Ok(Self {
            options,
            fetcher,
            sink,
            pool,
        })
    }

    /// Same as `new`, fetching over HTTP with the given client options.
    pub fn with_http(
        options: BatchOptions,
        http: &HttpOptions,
        sink: SharedDiagnostics,
    ) -> Result<Self, BatchError> {
        let source = HttpSource::new(http).map_err(|err| {
            sink.error(&format!("An unexpected error occurred: {err}"));
            BatchError::Client(err)
        })?;
        Self::new(options, Arc::new(ImageFetcher::new(source)), sink)
    }

    /// Runs the whole batch. Never returns an error; see `BatchStatus`.
    pub fn download(mut self) -> BatchStatus {
        let source = match UrlSource::open(&self.options.list_path, self.sink.clone()) {
            Ok(s) => s,
            Err(err) => {
                self.sink
                    .error(&format!("An unexpected error occurred: {err}"));
                return BatchStatus::Aborted { dispatched: 0 };
            }
        };

        if let Err(err) = self.pool.start() {
            self.sink
                .error(&format!("An unexpected error occurred: {err}"));
            return BatchStatus::Aborted { dispatched: 0 };
        }

        let mut dispatched = 0usize;
        let mut submit_error = None;
        for url in source {
            let fetcher = self.fetcher.clone();
            let sink = self.sink.clone();
            let dir = self.options.images_dir.clone();
            let submitted = self
                .pool
                .submit(move || run_task(fetcher.as_ref(), &url, &dir, sink.as_ref()));
            match submitted {
                Ok(()) => dispatched += 1,
                Err(err) => {
                    submit_error = Some(err);
                    break;
                }
            }
        }

        // Everything already queued still runs to completion.
        let report = self.pool.drain();
        for failure in &report.failures {
            self.sink.error(&format!("Worker task aborted: {failure}"));
        }

        if let Some(err) = submit_error {
            self.sink
                .error(&format!("An unexpected error occurred: {err}"));
            return BatchStatus::Aborted { dispatched };
        }

        self.sink.info("Download complete!");
        BatchStatus::Completed {
            dispatched,
            fatal_failures: report.failures.len(),
        }
    }
}

fn prepare_dir(dir: &Path) -> Result<(), BatchError> {
    fs::create_dir_all(dir).map_err(|source| dir_error(dir, source))
}

fn dir_error(dir: &Path, source: io::Error) -> BatchError {
    if source.kind() == io::ErrorKind::PermissionDenied {
        BatchError::PermissionDenied {
            dir: dir.to_path_buf(),
            source,
        }
    } else {
        BatchError::CreateDir {
            dir: dir.to_path_buf(),
            source,
        }
    }
}

/// Task body: per-item failures stop here, only the fatal class leaves the task.
fn run_task(
    fetcher: &dyn Fetcher,
    url: &ValidatedUrl,
    dir: &Path,
    sink: &dyn Diagnostics,
) -> Result<(), FetchError> {
    match fetcher.fetch(url, dir, sink) {
        Ok(_) => Ok(()),
        Err(err @ FetchError::PermissionDenied { .. }) => Err(err),
        Err(
            err @ (FetchError::Http { .. }
            | FetchError::Transport { .. }
            | FetchError::Io { .. }
            | FetchError::Unexpected(_)),
        ) => {
            sink.error(&format!("An error occurred while downloading {url}: {err}"));
            Ok(())
        }
    }
}
