//! Error types for PushPop.
//!
//! This module provides a unified error type for all PushPop operations,
//! with specific error variants for different failure modes. Every failure
//! of a download session surfaces as exactly one of these variants.

use std::io;
use std::net::IpAddr;
use std::path::PathBuf;

use thiserror::Error;

/// A specialized `Result` type for PushPop operations.
pub type Result<T> = std::result::Result<T, Error>;

/// The main error type for PushPop.
#[derive(Error, Debug)]
pub enum Error {
    /// Connection or body read failure
    #[error("transport error: {0}")]
    Transport(String),

    /// The body ended before the declared length was received
    #[error("connection closed after {received} of {expected} bytes")]
    Truncated {
        /// Bytes written to the partial file
        received: u64,
        /// Total bytes announced by the server
        expected: u64,
    },

    /// The server answered with a status the protocol does not allow here
    #[error("unexpected HTTP status {status} while {context}")]
    UnexpectedStatus {
        /// Status code received
        status: u16,
        /// What the client was doing
        context: &'static str,
    },

    /// Writing to the partial file failed
    #[error("cannot write partial file '{}': {source}", path.display())]
    PartialWrite {
        /// The partial file
        path: PathBuf,
        /// Underlying I/O error
        #[source]
        source: io::Error,
    },

    /// Renaming the partial file to its final name failed
    #[error("cannot rename '{}' to '{}': {source}", from.display(), to.display())]
    Rename {
        /// The partial file
        from: PathBuf,
        /// The final file name
        to: PathBuf,
        /// Underlying I/O error
        #[source]
        source: io::Error,
    },

    /// The digest could not be fetched from the sender
    #[error("cannot fetch remote digest: {0}")]
    DigestFetch(String),

    /// The sender returned something that is not a 64 character hex digest
    #[error("malformed digest: expected 64 hex characters, got {length} characters")]
    MalformedDigest {
        /// Length of the rejected value
        length: usize,
    },

    /// Reading the downloaded file for hashing failed
    #[error("cannot read '{}' for hashing: {source}", path.display())]
    HashRead {
        /// The file being hashed
        path: PathBuf,
        /// Underlying I/O error
        #[source]
        source: io::Error,
    },

    /// The downloaded content does not match the sender's digest
    #[error("integrity check failed (digest mismatch)\n  expected: {expected}\n  computed: {computed}")]
    DigestMismatch {
        /// Digest announced by the sender
        expected: String,
        /// Digest of the bytes on disk
        computed: String,
    },

    /// The user cancelled the download
    #[error("download aborted by user")]
    Cancelled,

    /// The user declined to touch existing local files
    #[error("aborted by user, local files left untouched")]
    Aborted,

    /// No matching offer was seen on the network
    #[error("no file offered by user '{0}' was found on the network")]
    OfferNotFound(String),

    /// None of the advertised addresses is on a local network
    #[error("no local interface can reach any of {0:?}")]
    Unreachable(Vec<IpAddr>),

    /// The service record lacks a required TXT entry
    #[error("service metadata has no valid '{0}' entry")]
    MissingMetadata(&'static str),

    /// Service discovery failed
    #[error("discovery error: {0}")]
    Discovery(String),

    /// Invalid path
    #[error("invalid path: {0}")]
    InvalidPath(String),

    /// Configuration file error
    #[error("configuration error: {0}")]
    ConfigError(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Internal error (should not happen)
    #[error("internal error: {0}")]
    Internal(String),
}

/// Failure categories reported to the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Connection and read failures
    Transport,
    /// The peer broke the wire contract
    Protocol,
    /// Local open, write, rename or delete failures
    Filesystem,
    /// Digest mismatch
    Integrity,
    /// Cancelled by the user mid-transfer
    Cancelled,
    /// Declined by the user before anything happened
    Aborted,
    /// Nothing to download from
    Discovery,
    /// Bad configuration
    Config,
    /// Bug
    Internal,
}

impl Error {
    /// Returns the failure category for this error.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::Transport(_) | Self::Truncated { .. } | Self::DigestFetch(_) => {
                ErrorKind::Transport
            }
            Self::UnexpectedStatus { .. } | Self::MalformedDigest { .. } => ErrorKind::Protocol,
            Self::PartialWrite { .. }
            | Self::Rename { .. }
            | Self::HashRead { .. }
            | Self::InvalidPath(_)
            | Self::Io(_) => ErrorKind::Filesystem,
            Self::DigestMismatch { .. } => ErrorKind::Integrity,
            Self::Cancelled => ErrorKind::Cancelled,
            Self::Aborted => ErrorKind::Aborted,
            Self::OfferNotFound(_)
            | Self::Unreachable(_)
            | Self::MissingMetadata(_)
            | Self::Discovery(_) => ErrorKind::Discovery,
            Self::ConfigError(_) => ErrorKind::Config,
            Self::Internal(_) => ErrorKind::Internal,
        }
    }

    /// Returns whether running the download again can pick up where it stopped.
    ///
    /// These failures leave a consistent partial file behind.
    #[must_use]
    pub const fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::Transport(_) | Self::Truncated { .. } | Self::PartialWrite { .. } | Self::Cancelled
        )
    }

    /// Returns a helpful suggestion for resolving the error, if applicable.
    #[must_use]
    pub fn suggestion(&self) -> Option<&'static str> {
        match self {
            Self::Transport(_) | Self::Truncated { .. } | Self::Cancelled => {
                Some("Run pop again to resume from the partial file.")
            }
            Self::DigestMismatch { .. } => Some(
                "The corrupted file was deleted. Run pop again to download it from scratch.",
            ),
            Self::OfferNotFound(_) => Some(
                "Make sure the sender is running push on the same network\n\
                 and that the user name matches the one it advertises.",
            ),
            Self::Unreachable(_) => {
                Some("The sender is on a network none of your interfaces is attached to.")
            }
            _ => None,
        }
    }
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        Self::Transport(err.to_string())
    }
}
