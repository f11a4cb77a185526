//! # PushPop Core Library
//!
//! `pushpop-core` provides the core functionality for PushPop: announce a
//! file on the local network with `push`, and fetch it on another machine
//! with `pop`.
//!
//! ## Features
//!
//! - **Resumable downloads**: interrupted transfers continue from the
//!   `<name>.part` file using HTTP byte ranges
//! - **Integrity verification**: every download is checked against the
//!   sender's BLAKE3 digest, and corrupted files are removed
//! - **Zero configuration**: senders are found through mDNS/DNS-SD
//!
//! ## Modules
//!
//! - [`hasher`] - Streaming content digests
//! - [`cache`] - Single-flight digest cache for the sender
//! - [`server`] - Sender HTTP endpoint (file with byte ranges, digest)
//! - [`reconcile`] - Deciding where a download starts from local files
//! - [`download`] - Event-driven download and verification engine
//! - [`identity`] - Reachable address and advertised user of an offer
//! - [`discovery`] - mDNS announcement and browsing
//! - [`config`] - Configuration management
//! - [`error`] - Error taxonomy
//!
//! ## Example
//!
//! ```rust,ignore
//! use pushpop_core::download::{Download, DownloadOptions, DownloadRequest};
//! use pushpop_core::reconcile::TransferPaths;
//!
//! let paths = TransferPaths::new(Path::new("."), "movie.mkv")?;
//! let request = DownloadRequest::new("http://192.168.1.4:43121/", paths, "alice");
//! let outcome = Download::new(request, DownloadOptions::default())?.run().await?;
//! println!("verified {}", outcome.digest);
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::doc_markdown)]
#![allow(clippy::missing_const_for_fn)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::cast_precision_loss)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_sign_loss)]

pub mod cache;
pub mod config;
pub mod download;
pub mod error;
pub mod hasher;
pub mod identity;
pub mod reconcile;
pub mod server;

#[cfg(feature = "mdns")]
pub mod discovery;

pub use error::{Error, ErrorKind, Result};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// mDNS service type under which files are announced
pub const SERVICE_TYPE: &str = "_pushpop._tcp.local.";

/// Request header carrying the receiver's claimed user name (logging only)
pub const USER_HEADER: &str = "X-PushPop-User";

/// Default chunk size for reads and writes (128 KiB)
pub const DEFAULT_CHUNK_SIZE: usize = 128 * 1024;
