//! Reconciliation of local state before a download starts.
//!
//! The only state kept between runs is `<name>.part`: its length is the
//! resume offset. Before downloading, the receiver looks at which of the
//! final file and the partial file exist and decides where to start,
//! asking the user whenever existing data would be destroyed.
//!
//! | final | partial | resolution |
//! |-------|---------|------------|
//! | no | no | download from 0 |
//! | no | yes | resume at partial length |
//! | yes | no | confirm overwrite (or `force`), then delete final, download from 0 |
//! | yes | yes | choose: keep final, resume partial, restart, abort (`force` restarts) |

use std::io;
use std::path::{Path, PathBuf};

use tokio::fs;

use crate::error::{Error, Result};

/// Suffix appended to the final file name for in-progress downloads.
pub const PART_SUFFIX: &str = ".part";

/// Local paths used by one download.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferPaths {
    /// Where the verified file ends up
    pub final_path: PathBuf,
    /// Where bytes accumulate until the download completes
    pub part_path: PathBuf,
}

impl TransferPaths {
    /// Build the paths for `name` inside `dir`.
    ///
    /// Only the last component of `name` is used, so an advertised name
    /// cannot point outside `dir`.
    pub fn new(dir: &Path, name: &str) -> Result<Self> {
        let file_name = Path::new(name)
            .file_name()
            .and_then(|n| n.to_str())
            .filter(|n| !n.is_empty() && *n != "." && *n != "..")
            .ok_or_else(|| Error::InvalidPath(format!("unusable file name '{name}'")))?;

        Ok(Self {
            final_path: dir.join(file_name),
            part_path: dir.join(format!("{file_name}{PART_SUFFIX}")),
        })
    }

    /// The bare file name.
    #[must_use]
    pub fn file_name(&self) -> &str {
        self.final_path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or_default()
    }

    /// Look at what is on disk right now.
    pub async fn inspect(&self) -> Result<LocalState> {
        Ok(LocalState {
            final_exists: is_file(&self.final_path).await?,
            partial_len: match fs::metadata(&self.part_path).await {
                Ok(meta) if meta.is_file() => Some(meta.len()),
                Ok(_) => None,
                Err(e) if e.kind() == io::ErrorKind::NotFound => None,
                Err(e) => return Err(e.into()),
            },
        })
    }
}

async fn is_file(path: &Path) -> io::Result<bool> {
    match fs::metadata(path).await {
        Ok(meta) => Ok(meta.is_file()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e),
    }
}

/// Presence of the final and partial files.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LocalState {
    /// The final file exists
    pub final_exists: bool,
    /// Length of the partial file, if it exists
    pub partial_len: Option<u64>,
}

/// Answer to the "both files exist" prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictChoice {
    /// Treat the final file as complete and discard the partial file
    KeepFinal,
    /// Discard the final file and resume from the partial file
    ResumePartial,
    /// Discard both and download from scratch
    Restart,
    /// Leave everything alone and stop
    Abort,
}

/// Source of user decisions.
pub trait Prompter {
    /// The final file exists. Return `true` to overwrite it.
    fn confirm_overwrite(&mut self, paths: &TransferPaths) -> bool;

    /// Both files exist. Pick what to do.
    fn resolve_conflict(&mut self, paths: &TransferPaths, partial_len: u64) -> ConflictChoice;
}

/// Prompter for unattended runs: never destroys anything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NonInteractive;

impl Prompter for NonInteractive {
    fn confirm_overwrite(&mut self, _paths: &TransferPaths) -> bool {
        false
    }

    fn resolve_conflict(&mut self, _paths: &TransferPaths, _partial_len: u64) -> ConflictChoice {
        ConflictChoice::Abort
    }
}

/// What to do before (and instead of) downloading.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    /// Download starting at `offset`, after removing the listed files
    Download {
        /// Resume offset into the remote file
        offset: u64,
        /// Delete the final file first
        remove_final: bool,
        /// Delete the partial file first
        remove_partial: bool,
    },
    /// Keep the final file as the result and delete the partial file
    KeepFinal,
    /// Stop without touching anything
    Abort,
}

/// Decide how to start, consulting `prompter` only when data would be lost.
pub fn reconcile(state: LocalState, force: bool, prompter: &mut dyn Prompter, paths: &TransferPaths) -> Resolution {
    match (state.final_exists, state.partial_len) {
        (false, None) => Resolution::Download {
            offset: 0,
            remove_final: false,
            remove_partial: false,
        },
        (false, Some(len)) => Resolution::Download {
            offset: len,
            remove_final: false,
            remove_partial: false,
        },
        (true, None) => {
            if force || prompter.confirm_overwrite(paths) {
                Resolution::Download {
                    offset: 0,
                    remove_final: true,
                    remove_partial: false,
                }
            } else {
                Resolution::Abort
            }
        }
        (true, Some(len)) => {
            let choice = if force {
                ConflictChoice::Restart
            } else {
                prompter.resolve_conflict(paths, len)
            };
            match choice {
                ConflictChoice::KeepFinal => Resolution::KeepFinal,
                ConflictChoice::ResumePartial => Resolution::Download {
                    offset: len,
                    remove_final: true,
                    remove_partial: false,
                },
                ConflictChoice::Restart => Resolution::Download {
                    offset: 0,
                    remove_final: true,
                    remove_partial: true,
                },
                ConflictChoice::Abort => Resolution::Abort,
            }
        }
    }
}

impl Resolution {
    /// Resume offset, if this resolution downloads anything.
    #[must_use]
    pub const fn offset(&self) -> Option<u64> {
        match self {
            Self::Download { offset, .. } => Some(*offset),
            Self::KeepFinal | Self::Abort => None,
        }
    }

    /// Perform the deletions this resolution calls for.
    ///
    /// `Abort` is an error and touches nothing. After a `Download`
    /// resolution at most one of the two files remains on disk.
    pub async fn apply(&self, paths: &TransferPaths) -> Result<()> {
        match *self {
            Self::Abort => return Err(Error::Aborted),
            Self::KeepFinal => remove_if_present(&paths.part_path).await?,
            Self::Download {
                remove_final,
                remove_partial,
                ..
            } => {
                if remove_final {
                    remove_if_present(&paths.final_path).await?;
                }
                if remove_partial {
                    remove_if_present(&paths.part_path).await?;
                }
            }
        }
        Ok(())
    }
}

async fn remove_if_present(path: &Path) -> Result<()> {
    match fs::remove_file(path).await {
        Ok(()) => {
            tracing::debug!(path = %path.display(), "Removed local file");
            Ok(())
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}
