//! Resumable, verified download of an offered file.
//!
//! A [`Download`] moves through these phases:
//!
//! ```text
//! Requesting -> Streaming -> Renaming -> FetchingDigest <-> DigestPending
//!                                              |
//!                                              v
//!                                       ComputingDigest -> Verifying -> Done
//! ```
//!
//! Any phase can end in `Failed`, including through [`Canceller::cancel`].
//! Bytes accumulate in `<name>.part`, which is renamed to `<name>` once the
//! stream ends. The renamed file is then hashed and compared with the
//! sender's digest; on mismatch it is deleted.
//!
//! The engine handles one event at a time from a single queue. Network
//! reads, disk writes, the digest request and the progress timer all run
//! as separate tasks that report back through that queue, so the session
//! state is only touched from one place.

mod engine;
mod event;

use std::fmt;
use std::path::PathBuf;
use std::time::{Duration, Instant};

use tokio::sync::{mpsc, watch};

use crate::config::TransferConfig;
use crate::error::Result;
use crate::hasher::Digest;
use crate::reconcile::TransferPaths;

use engine::Engine;
use event::Event;

/// Largest digest response accepted, in bytes.
pub const MAX_DIGEST_BODY: usize = 1024;

/// Tuning knobs for a download.
#[derive(Debug, Clone)]
pub struct DownloadOptions {
    /// Bytes read per network or disk step
    pub chunk_size: usize,
    /// Interval between progress samples
    pub progress_interval: Duration,
    /// Delay before asking again for a pending digest
    pub digest_retry_interval: Duration,
    /// Give up after this many pending answers (`None`: until cancelled)
    pub max_digest_retries: Option<u32>,
}

impl Default for DownloadOptions {
    fn default() -> Self {
        Self::from(&TransferConfig::default())
    }
}

impl From<&TransferConfig> for DownloadOptions {
    fn from(config: &TransferConfig) -> Self {
        Self {
            chunk_size: config.chunk_size,
            progress_interval: config.progress_interval,
            digest_retry_interval: config.digest_retry_interval,
            max_digest_retries: config.max_digest_retries,
        }
    }
}

/// What to download and where to put it.
#[derive(Debug, Clone)]
pub struct DownloadRequest {
    /// Sender base URL, e.g. `http://192.168.1.4:43121/`
    pub base_url: String,
    /// Local final and partial paths
    pub paths: TransferPaths,
    /// User name sent to the sender for its logs
    pub username: String,
    /// Bytes already in the partial file
    pub resume_offset: u64,
}

impl DownloadRequest {
    /// A fresh download starting at offset 0.
    pub fn new(base_url: impl Into<String>, paths: TransferPaths, username: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            paths,
            username: username.into(),
            resume_offset: 0,
        }
    }

    /// Continue after `offset` bytes already in the partial file.
    #[must_use]
    pub const fn resume_from(mut self, offset: u64) -> Self {
        self.resume_offset = offset;
        self
    }
}

/// Phase of a download.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Waiting for the file response headers
    Requesting,
    /// Copying the body into the partial file
    Streaming,
    /// Moving the partial file to its final name
    Renaming,
    /// Asking the sender for its digest
    FetchingDigest,
    /// The sender is still hashing; waiting before asking again
    DigestPending,
    /// Hashing the downloaded file
    ComputingDigest,
    /// Comparing digests
    Verifying,
    /// Downloaded and verified
    Done,
    /// Stopped with an error
    Failed,
}

impl Phase {
    /// Whether the download has stopped.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Failed)
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Requesting => "requesting",
            Self::Streaming => "downloading",
            Self::Renaming => "renaming",
            Self::FetchingDigest => "fetching digest",
            Self::DigestPending => "waiting for digest",
            Self::ComputingDigest => "verifying",
            Self::Verifying => "comparing digests",
            Self::Done => "done",
            Self::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Snapshot of a running download.
#[derive(Debug, Clone)]
pub struct DownloadProgress {
    /// Current phase
    pub phase: Phase,
    /// Bytes in the partial file, resumed bytes included
    pub bytes_transferred: u64,
    /// Full size of the file, once the response announced it
    pub total_bytes: Option<u64>,
    /// Offset the transfer actually resumed from
    pub resumed_from: u64,
    /// Throughput in bytes per second
    pub speed_bps: u64,
    /// Estimated time remaining in the current phase
    pub eta: Option<Duration>,
    /// Bytes hashed so far during verification
    pub hash_bytes: u64,
    /// Size of the file being hashed
    pub hash_total: u64,
    /// Pending answers received from the digest endpoint
    pub digest_retries: u32,
    /// Failure cause once the phase is `Failed`
    pub error: Option<String>,
    /// When the download started
    pub started_at: Instant,
}

impl DownloadProgress {
    fn new(resume_offset: u64) -> Self {
        Self {
            phase: Phase::Requesting,
            bytes_transferred: resume_offset,
            total_bytes: None,
            resumed_from: resume_offset,
            speed_bps: 0,
            eta: None,
            hash_bytes: 0,
            hash_total: 0,
            digest_retries: 0,
            error: None,
            started_at: Instant::now(),
        }
    }

    /// Download progress as a percentage (0.0 - 100.0), if the size is known.
    #[must_use]
    pub fn percentage(&self) -> Option<f64> {
        self.total_bytes.map(|total| {
            if total == 0 {
                100.0
            } else {
                (self.bytes_transferred as f64 / total as f64) * 100.0
            }
        })
    }

    /// Verification progress as a percentage (0.0 - 100.0).
    #[must_use]
    pub fn hash_percentage(&self) -> f64 {
        if self.hash_total == 0 {
            100.0
        } else {
            (self.hash_bytes as f64 / self.hash_total as f64) * 100.0
        }
    }
}

/// Result of a verified download.
#[derive(Debug, Clone)]
pub struct DownloadOutcome {
    /// Where the file now lives
    pub path: PathBuf,
    /// Size of the file
    pub bytes: u64,
    /// Offset the transfer resumed from (0 for a full download)
    pub resumed_from: u64,
    /// Verified digest
    pub digest: Digest,
    /// Wall time of the whole session
    pub elapsed: Duration,
}

/// Handle that cancels a running download from anywhere.
#[derive(Debug, Clone)]
pub struct Canceller(mpsc::UnboundedSender<Event>);

impl Canceller {
    /// Ask the download to stop. Ignored once it has finished.
    pub fn cancel(&self) {
        let _ = self.0.send(Event::Cancel);
    }
}

/// A download session, ready to run.
#[derive(Debug)]
pub struct Download {
    engine: Engine,
}

impl Download {
    /// Prepare a download. Nothing touches the network or disk until [`run`](Self::run).
    pub fn new(request: DownloadRequest, options: DownloadOptions) -> Result<Self> {
        Ok(Self {
            engine: Engine::new(request, options)?,
        })
    }

    /// Subscribe to progress snapshots, published on every tick and phase change.
    pub fn progress(&self) -> watch::Receiver<DownloadProgress> {
        self.engine.subscribe()
    }

    /// A handle for cancelling this download.
    pub fn canceller(&self) -> Canceller {
        Canceller(self.engine.sender())
    }

    /// Run the session to completion.
    ///
    /// Returns once the file is verified under its final name, or with the
    /// single error that stopped it.
    pub async fn run(self) -> Result<DownloadOutcome> {
        self.engine.run().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_percentage() {
        let mut progress = DownloadProgress::new(0);
        assert!(progress.percentage().is_none());

        progress.total_bytes = Some(200);
        progress.bytes_transferred = 50;
        assert!((progress.percentage().unwrap() - 25.0).abs() < f64::EPSILON);

        progress.total_bytes = Some(0);
        assert!((progress.percentage().unwrap() - 100.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_hash_percentage() {
        let mut progress = DownloadProgress::new(0);
        assert!((progress.hash_percentage() - 100.0).abs() < f64::EPSILON);
        progress.hash_total = 10;
        progress.hash_bytes = 5;
        assert!((progress.hash_percentage() - 50.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_options_follow_config() {
        let config = TransferConfig {
            max_digest_retries: Some(3),
            ..TransferConfig::default()
        };
        let options = DownloadOptions::from(&config);
        assert_eq!(options.max_digest_retries, Some(3));
        assert_eq!(options.chunk_size, crate::DEFAULT_CHUNK_SIZE);
    }

    #[test]
    fn test_terminal_phases() {
        assert!(Phase::Done.is_terminal());
        assert!(Phase::Failed.is_terminal());
        assert!(!Phase::DigestPending.is_terminal());
    }
}
