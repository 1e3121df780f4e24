//! Error taxonomy for the sync engine.
//!
//! Failures come in two scopes. `SyncError` aborts the whole run: the server
//! is unreachable, the sync root cannot be prepared, or the operator cancelled.
//! `AssetError` is scoped to a single asset: it is logged, counted in the run
//! summary, and the engine moves on to the next asset. Nothing in between —
//! a per-asset failure must never take down its album or the run.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Failures that abort an entire sync run. No summary is produced.
#[derive(Debug, Error)]
pub enum SyncError {
    /// The Immich server could not be reached or refused the album listing.
    #[error("cannot reach the Immich server")]
    Connection,

    /// The sync root directory could not be created.
    #[error("cannot prepare sync directory {}", path.display())]
    SyncRoot {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The run was cancelled by the operator. Any subprocess in flight has
    /// been killed; partial output is cleaned up by the next run.
    #[error("sync cancelled")]
    Cancelled,
}

/// Failures scoped to a single asset. Counted and logged, never fatal.
///
/// These all retry naturally on the next scheduled run because every
/// reconciliation decision is re-derived from the filesystem.
#[derive(Debug, Error)]
pub enum AssetError {
    /// No configured path mapping rule matches the asset's source path.
    #[error("no path mapping rule matches {path}")]
    NoMappingRule { path: String },

    /// The mapped host path does not exist.
    #[error("source file not found: {}", path.display())]
    SourceMissing { path: PathBuf },

    /// The external converter failed or produced no output.
    #[error("conversion failed for {}", path.display())]
    ConversionFailed { path: PathBuf },

    /// A symlink, delete, or mkdir operation failed.
    #[error("filesystem error: {0}")]
    Filesystem(#[from] io::Error),
}
