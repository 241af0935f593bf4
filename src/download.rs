use crate::{archive::CleanupGuard, error::DownloadError};
use std::{
    fs::{self, File},
    io::{self, Read, Write},
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};
use tracing::{debug, warn};

pub const USER_AGENT: &str = concat!("repohub/", env!("CARGO_PKG_VERSION"));
const CHUNK_SIZE: usize = 64 * 1024;

static SCRATCH_COUNTER: AtomicU64 = AtomicU64::new(0);

pub(crate) fn build_agent(connect_timeout: Duration, read_timeout: Duration) -> ureq::Agent {
    ureq::AgentBuilder::new()
        .timeout_connect(connect_timeout)
        .timeout_read(read_timeout)
        .timeout_write(read_timeout)
        .build()
}

/// Bytes received so far and the advertised total, when the server sent one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Progress {
    pub received: u64,
    pub total: Option<u64>,
}

impl Progress {
    /// `None` while the total is unknown.
    pub fn fraction(&self) -> Option<f32> {
        match self.total {
            Some(0) | None => None,
            Some(total) => Some((self.received as f64 / total as f64).min(1.0) as f32),
        }
    }
}

/// Shared cancellation flag for one in-flight job.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// An open archive stream.
pub struct RemoteArchive {
    pub content_length: Option<u64>,
    pub reader: Box<dyn Read + Send>,
}

/// Where archive bytes come from. HTTP in production, in-memory in tests.
pub trait ArchiveSource: Send + Sync {
    fn open(&self, url: &str) -> Result<RemoteArchive, DownloadError>;
}

pub struct HttpArchiveSource {
    agent: ureq::Agent,
}

impl HttpArchiveSource {
    pub fn new(connect_timeout: Duration, read_timeout: Duration) -> Self {
        Self {
            agent: build_agent(connect_timeout, read_timeout),
        }
    }
}

impl ArchiveSource for HttpArchiveSource {
    fn open(&self, url: &str) -> Result<RemoteArchive, DownloadError> {
        let response = match self.agent.get(url).set("User-Agent", USER_AGENT).call() {
            Ok(response) => response,
            Err(ureq::Error::Status(status, _)) => {
                return Err(DownloadError::Status {
                    url: url.to_string(),
                    status,
                })
            }
            Err(err) => {
                return Err(DownloadError::Transport {
                    url: url.to_string(),
                    message: err.to_string(),
                })
            }
        };
        let content_length = response
            .header("Content-Length")
            .and_then(|value| value.trim().parse::<u64>().ok());
        Ok(RemoteArchive {
            content_length,
            reader: Box::new(response.into_reader()),
        })
    }
}

/// A downloaded archive in the scratch directory. Deleted on drop.
pub struct ScratchFile {
    guard: CleanupGuard,
}

impl ScratchFile {
    pub fn path(&self) -> &Path {
        self.guard.path()
    }
}

/// Streams `url` into a fresh file under `scratch_dir`, reporting progress
/// after every chunk. A cancelled or failed transfer leaves no file behind.
pub fn download_to_scratch(
    source: &dyn ArchiveSource,
    url: &str,
    scratch_dir: &Path,
    progress: &mut dyn FnMut(Progress),
    cancel: &CancelToken,
) -> Result<ScratchFile, DownloadError> {
    if cancel.is_cancelled() {
        return Err(DownloadError::Cancelled);
    }
    fs::create_dir_all(scratch_dir).map_err(|source| DownloadError::Scratch {
        path: scratch_dir.to_path_buf(),
        source,
    })?;

    let path = scratch_path(scratch_dir, url);
    let guard = CleanupGuard::new(&path);
    let mut file = File::create(&path).map_err(|source| DownloadError::Scratch {
        path: path.clone(),
        source,
    })?;

    let RemoteArchive {
        content_length,
        mut reader,
    } = source.open(url)?;
    debug!(url, total = ?content_length, path = %path.display(), "download started");

    let mut received = 0u64;
    let mut buffer = vec![0u8; CHUNK_SIZE];
    progress(Progress {
        received,
        total: content_length,
    });
    loop {
        if cancel.is_cancelled() {
            debug!(url, received, "download cancelled");
            return Err(DownloadError::Cancelled);
        }
        let read = match reader.read(&mut buffer) {
            Ok(0) => break,
            Ok(read) => read,
            Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
            Err(source) => {
                return Err(DownloadError::Interrupted {
                    url: url.to_string(),
                    source,
                })
            }
        };
        file.write_all(&buffer[..read])
            .map_err(|source| DownloadError::Scratch {
                path: path.clone(),
                source,
            })?;
        received += read as u64;
        progress(Progress {
            received,
            total: content_length,
        });
    }

    if let Some(total) = content_length {
        if received < total {
            return Err(DownloadError::Interrupted {
                url: url.to_string(),
                source: io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    format!("received {received} of {total} bytes"),
                ),
            });
        }
    }
    file.flush().map_err(|source| DownloadError::Scratch {
        path: path.clone(),
        source,
    })?;
    drop(file);

    debug!(url, received, "download finished");
    Ok(ScratchFile { guard })
}

/// Removes the scratch directory and everything left in it.
pub fn clear_scratch_dir(scratch_dir: &Path) {
    if !scratch_dir.exists() {
        return;
    }
    if let Err(err) = fs::remove_dir_all(scratch_dir) {
        warn!("failed to clear scratch dir {}: {err}", scratch_dir.display());
    }
}

fn scratch_path(scratch_dir: &Path, url: &str) -> PathBuf {
    let serial = SCRATCH_COUNTER.fetch_add(1, Ordering::Relaxed);
    let hash = blake3::hash(url.as_bytes()).to_hex();
    scratch_dir.join(format!(
        "{}-{}-{serial}.zip",
        &hash.as_str()[..16],
        std::process::id()
    ))
}
