#![allow(non_snake_case)]
//! # immichAlbum2jellyfin
//!
//! A command-line tool that mirrors Immich albums into a folder tree Jellyfin
//! can index, without duplicating storage.
//!
//! Each run converges the local tree to match the remote album set: one
//! directory per non-empty album, containing a symlink per asset. HEIC assets
//! Jellyfin's web client can't render are transcoded to JPEG instead, with
//! their EXIF orientation baked into the pixels.
//!
//! ## Features
//!
//! - Symlinks assets instead of copying them (paths rewritten from the Immich
//!   container to the host via configurable mapping rules)
//! - Converts HEIC/HEIF to JPEG through `sips`, applying physical rotation
//! - Skips entries that are already correct, so re-runs are cheap
//! - Removes files and album directories no longer present remotely
//! - Survives per-asset failures; only an unreachable server or a Ctrl-C
//!   aborts a run

// Export modules for integration testing
pub mod config;
pub mod convert;
pub mod error;
pub mod immich;
pub mod names;
pub mod paths;
pub mod progress;
pub mod sync;
