//! Messages delivered to the download engine.
//!
//! Every I/O step runs as a one-shot task that owns the resources it
//! needs and hands them back inside exactly one event when it finishes.

use std::fmt;
use std::io;
use std::pin::Pin;

use tokio::fs::File;
use tokio::io::AsyncRead;

use crate::error::Result;
use crate::hasher::{ContentHasher, Digest};

/// Response body as a byte reader.
pub(crate) type BodyReader = Pin<Box<dyn AsyncRead + Send>>;

/// Answer of the digest endpoint.
#[derive(Debug)]
pub(crate) enum DigestReply {
    Ready(Digest),
    Pending,
}

pub(crate) enum Event {
    /// Headers of the file request arrived
    Responded(reqwest::Result<reqwest::Response>),
    /// The partial file is open for writing
    PartOpened {
        file: io::Result<File>,
        body: BodyReader,
    },
    /// One chunk came off the network (`Ok(0)` is end of stream)
    ChunkRead {
        body: BodyReader,
        file: File,
        buf: Vec<u8>,
        read: io::Result<usize>,
    },
    /// One chunk reached the partial file
    ChunkWritten {
        body: BodyReader,
        file: File,
        buf: Vec<u8>,
        written: usize,
        result: io::Result<()>,
    },
    /// The partial file was synced and closed
    PartClosed(io::Result<()>),
    Renamed(io::Result<()>),
    DigestFetched(Result<DigestReply>),
    /// Backoff after a pending digest elapsed
    RetryDigest,
    /// The final file is open for hashing, with its length
    HashOpened(io::Result<(File, u64)>),
    /// One chunk was read and fed to the hasher
    HashChunk {
        file: File,
        hasher: ContentHasher,
        buf: Vec<u8>,
        read: io::Result<usize>,
    },
    /// The corrupted final file was deleted (or not)
    CorruptRemoved {
        result: io::Result<()>,
        expected: Digest,
        computed: Digest,
    },
    Tick,
    Cancel,
}

impl Event {
    pub(crate) const fn name(&self) -> &'static str {
        match self {
            Self::Responded(_) => "responded",
            Self::PartOpened { .. } => "part-opened",
            Self::ChunkRead { .. } => "chunk-read",
            Self::ChunkWritten { .. } => "chunk-written",
            Self::PartClosed(_) => "part-closed",
            Self::Renamed(_) => "renamed",
            Self::DigestFetched(_) => "digest-fetched",
            Self::RetryDigest => "retry-digest",
            Self::HashOpened(_) => "hash-opened",
            Self::HashChunk { .. } => "hash-chunk",
            Self::CorruptRemoved { .. } => "corrupt-removed",
            Self::Tick => "tick",
            Self::Cancel => "cancel",
        }
    }
}

impl fmt::Debug for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
