//! Archive fetcher for staged application bundles.

use std::{
    fs, io,
    io::{Read, Write},
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};

use reqwest::blocking::Client;
use tempfile::NamedTempFile;
use tracing::{debug, warn};

const USER_AGENT: &str = concat!("stagehand/", env!("CARGO_PKG_VERSION"));
const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Size of each chunk streamed from the response body to disk.
pub const CHUNK_SIZE: usize = 32 * 1024;

/// Cooperative cancellation flag shared between the fetcher and whoever drives it.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
    parents: Vec<Arc<AtomicBool>>,
}

impl CancelToken {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A token that is also cancelled whenever `self` is. Cancelling the child leaves
    /// `self` untouched.
    #[must_use]
    pub fn child_token(&self) -> Self {
        let mut parents = self.parents.clone();
        parents.push(Arc::clone(&self.flag));
        Self {
            flag: Arc::default(),
            parents,
        }
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
            || self.parents.iter().any(|flag| flag.load(Ordering::SeqCst))
    }
}

/// Bytes written so far, and the expected total when the server announced one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchProgress {
    pub transferred: u64,
    pub total: Option<u64>,
}

/// Result of a completed download.
#[derive(Debug, Clone)]
pub struct FetchSummary {
    pub path: PathBuf,
    pub bytes: u64,
    pub total: Option<u64>,
}

#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("download of {url} was cancelled")]
    Cancelled { url: String },
    #[error("failed to build http client: {0}")]
    Client(#[source] reqwest::Error),
    #[error("failed to fetch {url}: {source}")]
    Request {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("unexpected response {status} for {url}")]
    Status { url: String, status: u16 },
    #[error("stream error for {url}: {source}")]
    Stream {
        url: String,
        #[source]
        source: io::Error,
    },
    #[error("failed to write {}: {source}", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl FetchError {
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled { .. })
    }
}

/// Single-attempt streaming downloader. There is no retry and no resume: a failed or
/// cancelled transfer leaves nothing behind at the destination.
pub struct ArchiveFetcher {
    client: Client,
}

impl ArchiveFetcher {
    /// # Errors
    /// Returns an error when the underlying http client cannot be constructed.
    pub fn new() -> Result<Self, FetchError> {
        Ok(Self {
            client: http_client()?,
        })
    }

    /// Download `url` into `dest`, reporting progress after every chunk.
    ///
    /// # Errors
    /// Returns [`FetchError::Cancelled`] when `cancel` fires mid-transfer, otherwise the
    /// request, status, stream or write failure that stopped the download.
    pub fn fetch<F>(
        &self,
        url: &str,
        dest: &Path,
        cancel: &CancelToken,
        on_progress: F,
    ) -> Result<FetchSummary, FetchError>
    where
        F: FnMut(FetchProgress),
    {
        debug!(%url, dest = %dest.display(), "fetching archive");
        if cancel.is_cancelled() {
            discard_destination(dest);
            return Err(FetchError::Cancelled {
                url: url.to_string(),
            });
        }
        let response = match self.client.get(url).send() {
            Ok(response) => response,
            Err(source) => {
                discard_destination(dest);
                return Err(FetchError::Request {
                    url: url.to_string(),
                    source,
                });
            }
        };
        let status = response.status();
        if !status.is_success() {
            discard_destination(dest);
            return Err(FetchError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }
        if cancel.is_cancelled() {
            discard_destination(dest);
            return Err(FetchError::Cancelled {
                url: url.to_string(),
            });
        }
        let total = response.content_length();
        write_stream(url, response, total, dest, cancel, on_progress)
    }
}

/// Stream `reader` into a temporary sibling of `dest` and rename it into place once the
/// whole body arrived.
///
/// # Errors
/// See [`ArchiveFetcher::fetch`].
pub fn write_stream<R, F>(
    url: &str,
    mut reader: R,
    total: Option<u64>,
    dest: &Path,
    cancel: &CancelToken,
    mut on_progress: F,
) -> Result<FetchSummary, FetchError>
where
    R: Read,
    F: FnMut(FetchProgress),
{
    let parent = dest
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    let write_err = |source: io::Error| FetchError::Write {
        path: dest.to_path_buf(),
        source,
    };
    fs::create_dir_all(parent).map_err(write_err)?;
    let mut tmp = tempfile::Builder::new()
        .prefix(".fetch-")
        .tempfile_in(parent)
        .map_err(write_err)?;

    let mut transferred: u64 = 0;
    let mut buffer = vec![0u8; CHUNK_SIZE];
    loop {
        let read = match reader.read(&mut buffer) {
            Ok(0) => break,
            Ok(read) => read,
            Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
            Err(source) => {
                abandon(tmp, dest);
                return Err(FetchError::Stream {
                    url: url.to_string(),
                    source,
                });
            }
        };
        if cancel.is_cancelled() {
            abandon(tmp, dest);
            return Err(FetchError::Cancelled {
                url: url.to_string(),
            });
        }
        if let Err(source) = tmp.write_all(&buffer[..read]) {
            abandon(tmp, dest);
            return Err(write_err(source));
        }
        transferred += read as u64;
        on_progress(FetchProgress { transferred, total });
    }

    if cancel.is_cancelled() {
        abandon(tmp, dest);
        return Err(FetchError::Cancelled {
            url: url.to_string(),
        });
    }
    if let Err(source) = tmp.flush() {
        abandon(tmp, dest);
        return Err(write_err(source));
    }
    persist(tmp, dest)?;
    debug!(dest = %dest.display(), bytes = transferred, "archive stored");
    Ok(FetchSummary {
        path: dest.to_path_buf(),
        bytes: transferred,
        total,
    })
}

fn persist(tmp: NamedTempFile, dest: &Path) -> Result<(), FetchError> {
    tmp.persist(dest).map_err(|err| {
        discard_destination(dest);
        FetchError::Write {
            path: dest.to_path_buf(),
            source: err.error,
        }
    })?;
    Ok(())
}

fn abandon(tmp: NamedTempFile, dest: &Path) {
    if let Err(err) = tmp.close() {
        warn!(error = %err, "failed to remove partial download");
    }
    discard_destination(dest);
}

// A stale copy from an earlier run must not survive a failed refresh.
fn discard_destination(dest: &Path) {
    match fs::remove_file(dest) {
        Ok(()) => debug!(dest = %dest.display(), "removed destination after failed fetch"),
        Err(err) if err.kind() == io::ErrorKind::NotFound => {}
        Err(err) => warn!(dest = %dest.display(), error = %err, "failed to remove destination"),
    }
}

fn http_client() -> Result<Client, FetchError> {
    Client::builder()
        .user_agent(USER_AGENT)
        .connect_timeout(CONNECT_TIMEOUT)
        .build()
        .map_err(FetchError::Client)
}
