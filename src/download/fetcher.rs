//! 单张图片下载与落盘。
//!
//! 每次调用只尝试一次：拉取 → 生成防冲突文件名 → 写入 → 输出一条诊断。
//! 只有本地写权限被拒（PermissionDenied）会以 `Err` 返回给调用方，其余失败都在这里消化。

use std::borrow::Cow;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use reqwest::StatusCode;
use reqwest::blocking::Client;
use reqwest::header::{ACCEPT, ACCEPT_ENCODING, HeaderMap, HeaderValue, USER_AGENT};
use thiserror::Error;
use url::Url;
use uuid::Uuid;

use super::url_source::ValidatedUrl;
use crate::base_system::diagnostics::Diagnostics;

const SUFFIX_LEN: usize = 16;
/// Common filesystem limit for one path component, in bytes.
const MAX_NAME_BYTES: usize = 255;
const MAX_NAME_ATTEMPTS: usize = 4;
const COPY_BUF_SIZE: usize = 64 * 1024;

pub const DEFAULT_USER_AGENT: &str = concat!("image-batch-downloader/", env!("CARGO_PKG_VERSION"));

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("{status}")]
    Http { url: String, status: StatusCode },
    #[error("{}", error_chain(.source.as_ref()))]
    Transport {
        url: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
    #[error("{source}")]
    PermissionDenied {
        dir: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("{source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("{0}")]
    Unexpected(String),
}

impl FetchError {
    /// Only an unwritable target is fatal; everything else is a per-URL condition.
    pub fn is_fatal(&self) -> bool {
        matches!(self, FetchError::PermissionDenied { .. })
    }

    fn transport(
        url: &ValidatedUrl,
        source: impl Into<Box<dyn std::error::Error + Send + Sync>>,
    ) -> Self {
        FetchError::Transport {
            url: url.to_string(),
            source: source.into(),
        }
    }
}

/// Renders an error followed by every distinct cause in its `source()` chain.
fn error_chain(err: &(dyn std::error::Error + Send + Sync + 'static)) -> String {
    let mut text = err.to_string();
    let mut next = err.source();
    while let Some(cause) = next {
        let part = cause.to_string();
        if !text.contains(&part) {
            text.push_str(": ");
            text.push_str(&part);
        }
        next = cause.source();
    }
    text
}

#[derive(Debug)]
pub enum FetchOutcome {
    Saved { path: PathBuf, base_name: String },
    Skipped { reason: String },
    Failed(FetchError),
}

/// Network seam: opens a byte stream for one URL.
pub trait ImageSource: Send + Sync {
    fn open(&self, url: &ValidatedUrl) -> Result<Box<dyn Read + Send>, FetchError>;
}

/// One fetch-and-persist attempt, as seen by the batch orchestrator.
pub trait Fetcher: Send + Sync {
    fn fetch(
        &self,
        url: &ValidatedUrl,
        dir: &Path,
        sink: &dyn Diagnostics,
    ) -> Result<FetchOutcome, FetchError>;
}

#[derive(Debug, Clone)]
pub struct HttpOptions {
    /// Whole-request deadline; `None` lets a slow transfer run to completion.
    pub request_timeout: Option<Duration>,
    pub connect_timeout: Duration,
    pub user_agent: String,
}

impl Default for HttpOptions {
    fn default() -> Self {
        Self {
            request_timeout: None,
            connect_timeout: Duration::from_secs(10),
            user_agent: DEFAULT_USER_AGENT.to_string(),
        }
    }
}

pub struct HttpSource {
    client: Client,
}

impl HttpSource {
    pub fn new(options: &HttpOptions) -> Result<Self, reqwest::Error> {
        // No gzip decoder is compiled in; ask for identity so bytes land on disk verbatim.
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("image/*,*/*;q=0.8"));
        headers.insert(ACCEPT_ENCODING, HeaderValue::from_static("identity"));
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&options.user_agent)
                .unwrap_or(HeaderValue::from_static(DEFAULT_USER_AGENT)),
        );

        let client = Client::builder()
            .default_headers(headers)
            .timeout(options.request_timeout)
            .connect_timeout(options.connect_timeout)
            .build()?;
        Ok(Self { client })
    }
}

impl ImageSource for HttpSource {
    fn open(&self, url: &ValidatedUrl) -> Result<Box<dyn Read + Send>, FetchError> {
        let resp = self
            .client
            .get(url.url().clone())
            .send()
            .map_err(|e| FetchError::transport(url, e))?;
        let status = resp.status();
        if !status.is_success() {
            return Err(FetchError::Http {
                url: url.to_string(),
                status,
            });
        }
        Ok(Box::new(resp))
    }
}

/// Opens a file that must not exist yet.
type OpenNew = fn(&Path) -> io::Result<File>;

fn open_new(path: &Path) -> io::Result<File> {
    OpenOptions::new().write(true).create_new(true).open(path)
}

/// Successful end of one attempt; failures travel as `FetchError`.
enum Attempt {
    Saved { path: PathBuf, base_name: String },
    Skipped { reason: String },
}

pub struct ImageFetcher<S = HttpSource> {
    source: S,
    open_new: OpenNew,
}

impl<S: ImageSource> ImageFetcher<S> {
    pub fn new(source: S) -> Self {
        Self {
            source,
            open_new,
        }
    }

    #[cfg(test)]
    pub(crate) fn with_opener(source: S, open_new: OpenNew) -> Self {
        Self { source, open_new }
    }

    fn try_fetch(&self, url: &ValidatedUrl, dir: &Path) -> Result<Attempt, FetchError> {
        // The orchestrator created the directory already; it may have been removed since.
        fs::create_dir_all(dir).map_err(|e| write_error(dir, dir, e))?;

        let Some(base_name) = base_name_of(url.url()) else {
            return Ok(Attempt::Skipped {
                reason: "URL path has no usable file name".to_string(),
            });
        };

        let mut body = self.source.open(url)?;
        let (path, mut file) = create_unique(dir, &base_name, self.open_new)?;
        if let Err(err) = copy_body(url, &mut body, &mut file, dir, &path) {
            drop(file);
            let _ = fs::remove_file(&path);
            return Err(err);
        }

        Ok(Attempt::Saved { path, base_name })
    }
}

impl<S: ImageSource> Fetcher for ImageFetcher<S> {
    fn fetch(
        &self,
        url: &ValidatedUrl,
        dir: &Path,
        sink: &dyn Diagnostics,
    ) -> Result<FetchOutcome, FetchError> {
        match self.try_fetch(url, dir) {
            Ok(Attempt::Saved { path, base_name }) => {
                sink.info(&format!("Downloaded {base_name}"));
                Ok(FetchOutcome::Saved { path, base_name })
            }
            Ok(Attempt::Skipped { reason }) => {
                sink.warn(&format!("Skipping {url}: {reason}"));
                Ok(FetchOutcome::Skipped { reason })
            }
            Err(err) => match err {
                FetchError::Http { .. } | FetchError::Transport { .. } => {
                    sink.error(&format!("Failed to download {url}: {err}"));
                    Ok(FetchOutcome::Failed(err))
                }
                FetchError::PermissionDenied { ref dir, .. } => {
                    sink.error(&format!(
                        "Permission denied while writing to {}: {err}",
                        dir.display()
                    ));
                    Err(err)
                }
                FetchError::Io { .. } | FetchError::Unexpected(_) => {
                    sink.error(&format!("An error occurred while downloading {url}: {err}"));
                    Ok(FetchOutcome::Failed(err))
                }
            },
        }
    }
}

fn write_error(dir: &Path, path: &Path, source: io::Error) -> FetchError {
    if source.kind() == io::ErrorKind::PermissionDenied {
        FetchError::PermissionDenied {
            dir: dir.to_path_buf(),
            source,
        }
    } else {
        FetchError::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

fn create_unique(
    dir: &Path,
    base_name: &str,
    open_new: OpenNew,
) -> Result<(PathBuf, File), FetchError> {
    for _ in 0..MAX_NAME_ATTEMPTS {
        let path = dir.join(collision_safe_name(base_name));
        match open_new(&path) {
            Ok(file) => return Ok((path, file)),
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => continue,
            Err(e) => return Err(write_error(dir, &path, e)),
        }
    }
    Err(FetchError::Io {
        path: dir.join(base_name),
        source: io::Error::new(
            io::ErrorKind::AlreadyExists,
            "no free file name after repeated attempts",
        ),
    })
}

fn copy_body(
    url: &ValidatedUrl,
    body: &mut dyn Read,
    file: &mut File,
    dir: &Path,
    path: &Path,
) -> Result<u64, FetchError> {
    let mut buf = vec![0u8; COPY_BUF_SIZE];
    let mut written = 0u64;
    loop {
        let n = match body.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(FetchError::transport(url, e)),
        };
        file.write_all(&buf[..n])
            .map_err(|e| write_error(dir, path, e))?;
        written += n as u64;
    }
    file.flush().map_err(|e| write_error(dir, path, e))?;
    Ok(written)
}

/// Last non-empty path segment, percent-decoded and made filesystem-safe.
pub fn base_name_of(url: &Url) -> Option<String> {
    let segment = url.path_segments()?.filter(|s| !s.is_empty()).last()?;
    let decoded = urlencoding::decode(segment).unwrap_or(Cow::Borrowed(segment));
    let cleaned = sanitize_file_name(&decoded);
    if cleaned.is_empty() { None } else { Some(cleaned) }
}

fn sanitize_file_name(name: &str) -> String {
    name.chars()
        .map(|ch| match ch {
            '/' | '\\' | ':' | '"' | '<' | '>' | '|' | '?' | '*' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect::<String>()
        .trim()
        .to_string()
}

/// `<stem>_<random hex>.<ext>`, splitting the base name at its first `.`.
///
/// The whole name stays within `MAX_NAME_BYTES`: the stem is shortened first,
/// then the extension loses bytes from its front so the final `.jpg` survives.
/// Collisions are avoided probabilistically; `create_unique` also refuses to
/// overwrite an existing file.
pub fn collision_safe_name(base_name: &str) -> String {
    let suffix = random_suffix();
    // "_" + suffix
    let fixed = 1 + suffix.len();
    match base_name.split_once('.') {
        Some((stem, ext)) => {
            let ext = tail_within(ext, MAX_NAME_BYTES - fixed - 1);
            let stem = head_within(stem, MAX_NAME_BYTES - fixed - 1 - ext.len());
            format!("{stem}_{suffix}.{ext}")
        }
        None => {
            let stem = head_within(base_name, MAX_NAME_BYTES - fixed);
            format!("{stem}_{suffix}")
        }
    }
}

/// Longest prefix of `s` that fits in `max` bytes and ends on a char boundary.
fn head_within(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

/// Longest suffix of `s` that fits in `max` bytes and starts on a char boundary.
fn tail_within(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut start = s.len() - max;
    while !s.is_char_boundary(start) {
        start += 1;
    }
    &s[start..]
}

fn random_suffix() -> String {
    let mut id = Uuid::new_v4().simple().to_string();
    id.truncate(SUFFIX_LEN);
    id
}
