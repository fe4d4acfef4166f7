//! URL 列表读取与校验。
//!
//! 逐行读取列表文件，按空白切分 token，只产出 http/https 且路径以图片扩展名结尾的 URL。
//! 不合法的 token 记一条 warn 后跳过；读取中途出现 I/O 错误时整个序列立即结束。

use std::collections::VecDeque;
use std::fmt;
use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::iter::FusedIterator;
use std::path::{Path, PathBuf};

use thiserror::Error;
use url::Url;

use crate::base_system::diagnostics::SharedDiagnostics;

pub const IMAGE_EXTENSIONS: [&str; 5] = ["jpg", "jpeg", "png", "gif", "bmp"];

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("File not found: {}", path.display())]
    NotFound { path: PathBuf },
    #[error("cannot open {}: {source}", path.display())]
    Open { path: PathBuf, source: io::Error },
}

impl SourceError {
    pub fn kind(&self) -> io::ErrorKind {
        match self {
            SourceError::NotFound { .. } => io::ErrorKind::NotFound,
            SourceError::Open { source, .. } => source.kind(),
        }
    }
}

/// A token that passed the scheme and image-extension checks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedUrl {
    raw: String,
    url: Url,
}

impl ValidatedUrl {
    /// Returns `None` for anything that is not a well-formed http(s) image URL,
    /// including tokens that fail URL syntax parsing.
    pub fn parse(token: &str) -> Option<Self> {
        let url = Url::parse(token).ok()?;
        if !is_image_url(&url) {
            return None;
        }
        Some(Self {
            raw: token.to_string(),
            url,
        })
    }

    /// The token exactly as it appeared in the list.
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn url(&self) -> &Url {
        &self.url
    }
}

impl fmt::Display for ValidatedUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

pub fn is_image_url(url: &Url) -> bool {
    if !matches!(url.scheme(), "http" | "https") {
        return false;
    }
    let path = url.path().to_ascii_lowercase();
    IMAGE_EXTENSIONS.iter().any(|ext| {
        path.len() > ext.len() + 1
            && path.ends_with(ext)
            && path.as_bytes()[path.len() - ext.len() - 1] == b'.'
    })
}

/// 单次、不可重启的惰性 URL 序列。
pub struct UrlSource<R = BufReader<File>> {
    origin: String,
    lines: io::Lines<R>,
    pending: VecDeque<String>,
    sink: SharedDiagnostics,
    finished: bool,
}

impl UrlSource<BufReader<File>> {
    /// Opens the list file; a missing file is reported before anything is produced.
    pub fn open(path: &Path, sink: SharedDiagnostics) -> Result<Self, SourceError> {
        let file = File::open(path).map_err(|source| {
            if source.kind() == io::ErrorKind::NotFound {
                SourceError::NotFound {
                    path: path.to_path_buf(),
                }
            } else {
                SourceError::Open {
                    path: path.to_path_buf(),
                    source,
                }
            }
        })?;
        Ok(Self::from_reader(
            BufReader::new(file),
            path.display().to_string(),
            sink,
        ))
    }
}

impl<R: BufRead> UrlSource<R> {
    pub fn from_reader(reader: R, origin: impl Into<String>, sink: SharedDiagnostics) -> Self {
        Self {
            origin: origin.into(),
            lines: reader.lines(),
            pending: VecDeque::new(),
            sink,
            finished: false,
        }
    }
}

impl<R: BufRead> Iterator for UrlSource<R> {
    type Item = ValidatedUrl;

    fn next(&mut self) -> Option<ValidatedUrl> {
        loop {
            while let Some(token) = self.pending.pop_front() {
                match ValidatedUrl::parse(&token) {
                    Some(url) => return Some(url),
                    None => self.sink.warn(&format!("Invalid image URL: {token}")),
                }
            }

            if self.finished {
                return None;
            }

            match self.lines.next() {
                Some(Ok(line)) => {
                    self.pending
                        .extend(line.split_whitespace().map(str::to_owned));
                }
                Some(Err(err)) => {
                    // Remaining lines are never read once the reader has failed.
                    self.finished = true;
                    self.sink.error(&format!(
                        "An unexpected error occurred while reading file: {}. Error: {err}",
                        self.origin
                    ));
                    return None;
                }
                None => {
                    self.finished = true;
                    return None;
                }
            }
        }
    }
}

impl<R: BufRead> FusedIterator for UrlSource<R> {}
