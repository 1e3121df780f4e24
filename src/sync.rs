//! Core reconciliation logic for immichAlbum2jellyfin.
//!
//! This module is responsible for the main functionality of the application:
//! - Comparing each remote album against its local directory
//! - Creating symlinks for assets Jellyfin can read directly
//! - Converting HEIC assets to JPEG (with physical rotation applied)
//! - Removing files and album directories no longer backed by the remote
//!
//! The `Syncer` struct orchestrates a full run, while `AssetOutcome` tracks
//! the per-asset decision. A run is convergent rather than transactional:
//! every decision is re-derived from the filesystem, so re-running after any
//! partial failure finishes the job. Albums are processed strictly
//! sequentially — the dominant cost is subprocess spawns and syscalls, and
//! sequential processing keeps progress and the live-directory bookkeeping
//! trivially race-free.

use log::{debug, info, warn};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs as tokio_fs;
use tokio_util::sync::CancellationToken;

use crate::convert::ImageConverter;
use crate::error::{AssetError, SyncError};
use crate::immich::{Album, AlbumProvider, Asset};
use crate::names;
use crate::paths::{PathMapping, map_to_host};
use crate::progress::ProgressTracker;

/// Aggregate counters reported at the end of a run.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SyncSummary {
    /// Album directories live after this run.
    pub albums: usize,
    /// Symlinks created (or replaced).
    pub links_created: usize,
    /// HEIC files transcoded to JPEG.
    pub converted: usize,
    /// Transcodes that also had a physical rotation applied.
    pub rotated: usize,
    /// Entries already correct and left untouched.
    pub unchanged: usize,
    /// Per-asset failures (mapping, missing source, conversion, filesystem).
    pub errors: usize,
}

/// Outcome of reconciling a single asset.
#[derive(Debug)]
enum AssetOutcome {
    /// A symlink was created pointing at the mapped host path.
    Linked,
    /// The asset was transcoded; `rotated` if pixels were rotated too.
    Converted { rotated: bool },
    /// The on-disk entry already matched; nothing was touched.
    Unchanged,
    /// This asset failed; siblings are unaffected.
    Failed(AssetError),
}

/// Drives one reconciliation run across all remote albums.
pub struct Syncer {
    sync_dir: PathBuf,
    path_mappings: Vec<PathMapping>,
    converter: Arc<dyn ImageConverter>,
}

impl Syncer {
    pub fn new(
        sync_dir: PathBuf,
        path_mappings: Vec<PathMapping>,
        converter: Arc<dyn ImageConverter>,
    ) -> Self {
        Self {
            sync_dir,
            path_mappings,
            converter,
        }
    }

    /// Converges the local tree to the remote album set and returns the run
    /// summary. Only an unreachable server, an unusable sync root, or
    /// cancellation abort the run; every other failure is counted and
    /// skipped.
    pub async fn run(
        &self,
        provider: &dyn AlbumProvider,
        include_shared: bool,
        cancel: &CancellationToken,
        progress: &mut ProgressTracker,
    ) -> Result<SyncSummary, SyncError> {
        tokio_fs::create_dir_all(&self.sync_dir)
            .await
            .map_err(|e| SyncError::SyncRoot {
                path: self.sync_dir.clone(),
                source: e,
            })?;

        if !provider.test_connection().await {
            return Err(SyncError::Connection);
        }
        progress.report(5.0);

        let albums = provider.list_albums(include_shared).await.map_err(|e| {
            warn!("Failed to list albums: {e:#}");
            SyncError::Connection
        })?;
        info!("Found {} albums to sync", albums.len());
        progress.report(10.0);

        let mut live_dirs: HashSet<String> = HashSet::new();
        let mut summary = SyncSummary::default();

        for (i, album) in albums.iter().enumerate() {
            if cancel.is_cancelled() {
                return Err(SyncError::Cancelled);
            }

            let detail = match provider.get_album_detail(&album.id).await {
                Ok(Some(detail)) => detail,
                Ok(None) => {
                    debug!("Album {} no longer exists, skipping", album.id);
                    continue;
                }
                Err(e) => {
                    // A transient fetch failure must not let the pruning pass
                    // eat an album directory that is still legitimate.
                    warn!("Failed to fetch album '{}': {e:#}", album.album_name);
                    summary.errors += 1;
                    let folder = self.folder_name(&album.album_name, &album.id);
                    live_dirs.insert(folder);
                    continue;
                }
            };

            if detail.assets.is_empty() {
                debug!("Skipping empty album: {}", detail.album_name);
                continue;
            }

            let folder = self.folder_name(&detail.album_name, &detail.id);
            let album_dir = self.sync_dir.join(&folder);
            if let Err(e) = tokio_fs::create_dir_all(&album_dir).await {
                warn!(
                    "Failed to create album directory {}: {e}",
                    album_dir.display()
                );
                summary.errors += 1;
                continue;
            }
            live_dirs.insert(folder);

            self.reconcile_album(&detail, &album_dir, cancel, &mut summary)
                .await?;

            progress.report(10.0 + 80.0 * (i + 1) as f64 / albums.len() as f64);
        }

        summary.albums = live_dirs.len();
        self.prune_orphan_dirs(&live_dirs).await;
        progress.report(100.0);

        info!(
            "Sync complete: {} albums, {} symlinks, {} converted ({} rotated), {} unchanged, {} errors",
            summary.albums,
            summary.links_created,
            summary.converted,
            summary.rotated,
            summary.unchanged,
            summary.errors
        );
        Ok(summary)
    }

    fn folder_name(&self, album_name: &str, album_id: &str) -> String {
        let folder = names::sanitize_album_name(album_name);
        if folder.is_empty() {
            format!("album-{}", names::short_id(album_id))
        } else {
            folder
        }
    }

    /// Brings one album directory into agreement with the remote asset list.
    /// Filenames present on disk but not resolved for any asset this run are
    /// deleted at the end.
    async fn reconcile_album(
        &self,
        album: &Album,
        album_dir: &Path,
        cancel: &CancellationToken,
        summary: &mut SyncSummary,
    ) -> Result<(), SyncError> {
        let mut stale = snapshot_file_names(album_dir).await;
        let mut used: HashSet<String> = HashSet::new();

        for asset in &album.assets {
            let outcome = self
                .reconcile_asset(asset, album_dir, &mut used, &mut stale, cancel)
                .await?;
            match outcome {
                AssetOutcome::Linked => summary.links_created += 1,
                AssetOutcome::Converted { rotated } => {
                    summary.converted += 1;
                    if rotated {
                        summary.rotated += 1;
                    }
                }
                AssetOutcome::Unchanged => summary.unchanged += 1,
                AssetOutcome::Failed(e) => {
                    warn!("Asset {} in '{}': {e}", asset.id, album.album_name);
                    summary.errors += 1;
                }
            }
        }

        for name in stale {
            let orphan = album_dir.join(&name);
            match tokio_fs::remove_file(&orphan).await {
                Ok(()) => debug!("Removed orphan: {}", orphan.display()),
                Err(e) => warn!("Failed to remove orphan {}: {e}", orphan.display()),
            }
        }

        Ok(())
    }

    /// Decides and applies the change for one asset. All failures scoped to
    /// the asset come back as `AssetOutcome::Failed`; only cancellation
    /// escapes as an error.
    async fn reconcile_asset(
        &self,
        asset: &Asset,
        album_dir: &Path,
        used: &mut HashSet<String>,
        stale: &mut HashSet<String>,
        cancel: &CancellationToken,
    ) -> Result<AssetOutcome, SyncError> {
        let host_path = match map_to_host(&asset.original_path, &self.path_mappings) {
            Ok(path) => path,
            Err(e) => return Ok(AssetOutcome::Failed(e)),
        };

        if !tokio_fs::try_exists(&host_path).await.unwrap_or(false) {
            return Ok(AssetOutcome::Failed(AssetError::SourceMissing {
                path: host_path,
            }));
        }

        let desired = if asset.original_file_name.is_empty() {
            host_path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default()
        } else {
            asset.original_file_name.clone()
        };

        let convert = names::needs_conversion(&desired);
        let file_name = names::resolve_file_name(&desired, convert, &asset.id, used);
        let dest = album_dir.join(&file_name);

        // Resolved means desired: whatever happens below, this name must not
        // be swept as an orphan (a stale file is kept for retry next run).
        stale.remove(&file_name);

        if convert {
            self.reconcile_conversion(&host_path, &dest, cancel).await
        } else {
            Ok(reconcile_link(&host_path, &dest).await)
        }
    }

    /// Converts unless the destination is already at least as new as the
    /// source. A failed or partial conversion leaves a missing or stale
    /// destination, so the next run retries it.
    async fn reconcile_conversion(
        &self,
        host_path: &Path,
        dest: &Path,
        cancel: &CancellationToken,
    ) -> Result<AssetOutcome, SyncError> {
        if let (Ok(dest_meta), Ok(src_meta)) = (
            tokio_fs::metadata(dest).await,
            tokio_fs::metadata(host_path).await,
        ) {
            if let (Ok(dest_mtime), Ok(src_mtime)) = (dest_meta.modified(), src_meta.modified()) {
                if dest_mtime >= src_mtime {
                    return Ok(AssetOutcome::Unchanged);
                }
            }
        }

        let conversion = self.converter.convert(host_path, dest, cancel).await?;
        if conversion.converted {
            Ok(AssetOutcome::Converted {
                rotated: conversion.rotated,
            })
        } else {
            Ok(AssetOutcome::Failed(AssetError::ConversionFailed {
                path: host_path.to_path_buf(),
            }))
        }
    }

    /// Recursively deletes every immediate subdirectory of the sync root
    /// whose name was not marked live this run.
    async fn prune_orphan_dirs(&self, live: &HashSet<String>) {
        let mut entries = match tokio_fs::read_dir(&self.sync_dir).await {
            Ok(entries) => entries,
            Err(e) => {
                warn!("Cannot enumerate {}: {e}", self.sync_dir.display());
                return;
            }
        };

        while let Ok(Some(entry)) = entries.next_entry().await {
            let Ok(file_type) = entry.file_type().await else {
                continue;
            };
            if !file_type.is_dir() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().into_owned();
            if live.contains(&name) {
                continue;
            }
            match tokio_fs::remove_dir_all(entry.path()).await {
                Ok(()) => info!("Removed orphan album directory: {name}"),
                Err(e) => warn!("Failed to remove orphan directory {name}: {e}"),
            }
        }
    }
}

/// Symlink protocol: an existing link with the identical target is left
/// alone; anything else at the destination is removed and relinked.
async fn reconcile_link(host_path: &Path, dest: &Path) -> AssetOutcome {
    match tokio_fs::symlink_metadata(dest).await {
        Ok(meta) => {
            if meta.file_type().is_symlink() {
                if let Ok(target) = tokio_fs::read_link(dest).await {
                    if target == host_path {
                        return AssetOutcome::Unchanged;
                    }
                }
            }
            if let Err(e) = tokio_fs::remove_file(dest).await {
                return AssetOutcome::Failed(AssetError::Filesystem(e));
            }
        }
        Err(_) => {} // nothing at the destination
    }

    match tokio_fs::symlink(host_path, dest).await {
        Ok(()) => AssetOutcome::Linked,
        Err(e) => AssetOutcome::Failed(AssetError::Filesystem(e)),
    }
}

/// Unordered snapshot of the plain-file names currently in a directory.
/// Reconciliation decisions are keyed by filename, never enumeration order.
async fn snapshot_file_names(dir: &Path) -> HashSet<String> {
    let mut file_names = HashSet::new();
    let Ok(mut entries) = tokio_fs::read_dir(dir).await else {
        return file_names;
    };
    while let Ok(Some(entry)) = entries.next_entry().await {
        if let Ok(file_type) = entry.file_type().await {
            if !file_type.is_dir() {
                file_names.insert(entry.file_name().to_string_lossy().into_owned());
            }
        }
    }
    file_names
}
