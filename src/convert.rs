//! HEIC to JPEG conversion via an external image tool.
//!
//! Jellyfin's web client cannot render HEIC, so convertible assets are
//! transcoded instead of symlinked. The transcode runs through `sips` as a
//! handful of short-lived subprocess calls:
//!
//! 1. convert the source to JPEG at quality 85,
//! 2. read the EXIF orientation of the converted file,
//! 3. bake any rotation into the pixels (viewers that ignore EXIF still
//!    render upright),
//! 4. reset the orientation tag to 1 so nothing double-rotates later.
//!
//! The converter writes to a staging file next to the destination and renames
//! into place only when the whole protocol succeeds, so a failed run never
//! leaves a fresh-looking destination that would mask the retry on the next
//! sync. Cancellation kills the active subprocess and aborts the run; a tool
//! failure is reported as a non-conversion and the caller counts it.

use async_trait::async_trait;
use log::{debug, warn};
use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::process::{Output, Stdio};
use tokio::fs as tokio_fs;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;

use crate::error::SyncError;

const DEFAULT_TOOL: &str = "/usr/bin/sips";
const JPEG_QUALITY: &str = "85";

/// Outcome of one conversion attempt. `converted: false` means the external
/// tool failed; the caller records it as a per-asset error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Conversion {
    pub converted: bool,
    pub rotated: bool,
}

impl Conversion {
    fn failed() -> Self {
        Self {
            converted: false,
            rotated: false,
        }
    }
}

/// Narrow seam around the external transcoder so the sync engine can be
/// tested without spawning real subprocesses.
#[async_trait]
pub trait ImageConverter: Send + Sync {
    /// Transcodes `source` into `dest`, physically applying any EXIF
    /// rotation. Only cancellation is an `Err`; tool failures come back as
    /// `converted: false`.
    async fn convert(
        &self,
        source: &Path,
        dest: &Path,
        cancel: &CancellationToken,
    ) -> Result<Conversion, SyncError>;
}

/// Drives the `sips` command-line tool.
pub struct SipsConverter {
    tool: PathBuf,
}

impl SipsConverter {
    pub fn new() -> Self {
        Self {
            tool: PathBuf::from(DEFAULT_TOOL),
        }
    }

    /// Uses a different tool binary, mainly so tests can point at a stub.
    pub fn with_tool(tool: PathBuf) -> Self {
        Self { tool }
    }

    /// Runs one tool invocation to completion, killing it on cancellation.
    /// A spawn or wait failure yields `None`; the tool's own exit status is
    /// left for the caller to inspect.
    async fn run_tool(
        &self,
        args: &[&OsStr],
        cancel: &CancellationToken,
    ) -> Result<Option<Output>, SyncError> {
        let mut command = Command::new(&self.tool);
        command
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true);

        let child = match command.spawn() {
            Ok(child) => child,
            Err(e) => {
                warn!("Failed to start {}: {e}", self.tool.display());
                return Ok(None);
            }
        };

        tokio::select! {
            output = child.wait_with_output() => match output {
                Ok(output) => Ok(Some(output)),
                Err(e) => {
                    warn!("Failed to wait for {}: {e}", self.tool.display());
                    Ok(None)
                }
            },
            // Dropping the unfinished future kills the child (kill_on_drop).
            _ = cancel.cancelled() => Err(SyncError::Cancelled),
        }
    }

    /// Reads the EXIF orientation of a file. Missing tag, unparsable output,
    /// or a tool failure all behave like orientation 1 (no-op).
    async fn read_orientation(
        &self,
        path: &Path,
        cancel: &CancellationToken,
    ) -> Result<u32, SyncError> {
        let args: [&OsStr; 3] = [
            OsStr::new("-g"),
            OsStr::new("orientation"),
            path.as_os_str(),
        ];
        let orientation = match self.run_tool(&args, cancel).await? {
            Some(output) if output.status.success() => {
                parse_orientation(&String::from_utf8_lossy(&output.stdout))
            }
            _ => 1,
        };
        Ok(orientation)
    }
}

impl Default for SipsConverter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ImageConverter for SipsConverter {
    async fn convert(
        &self,
        source: &Path,
        dest: &Path,
        cancel: &CancellationToken,
    ) -> Result<Conversion, SyncError> {
        let staging = staging_path(dest);

        let convert_args: [&OsStr; 9] = [
            OsStr::new("-s"),
            OsStr::new("format"),
            OsStr::new("jpeg"),
            OsStr::new("-s"),
            OsStr::new("formatOptions"),
            OsStr::new(JPEG_QUALITY),
            source.as_os_str(),
            OsStr::new("--out"),
            staging.as_os_str(),
        ];

        let converted_ok = match self.run_tool(&convert_args, cancel).await {
            Ok(Some(output)) => output.status.success(),
            Ok(None) => false,
            Err(e) => {
                let _ = tokio_fs::remove_file(&staging).await;
                return Err(e);
            }
        };

        if !converted_ok {
            let _ = tokio_fs::remove_file(&staging).await;
            return Ok(Conversion::failed());
        }

        let orientation = self.read_orientation(&staging, cancel).await?;
        let degrees = rotation_degrees(orientation);

        if degrees > 0 {
            debug!(
                "Applying {degrees}° rotation to {} (orientation {orientation})",
                staging.display()
            );
            let degrees_arg = degrees.to_string();
            let rotate_args: [&OsStr; 3] = [
                OsStr::new("-r"),
                OsStr::new(&degrees_arg),
                staging.as_os_str(),
            ];
            self.run_tool(&rotate_args, cancel).await?;
        }

        if orientation > 1 {
            // Even when the value maps to no rotation (the flip variants),
            // reset the tag so viewers don't apply their own transform.
            let reset_args: [&OsStr; 4] = [
                OsStr::new("-s"),
                OsStr::new("orientation"),
                OsStr::new("1"),
                staging.as_os_str(),
            ];
            self.run_tool(&reset_args, cancel).await?;
        }

        match tokio_fs::rename(&staging, dest).await {
            Ok(()) => Ok(Conversion {
                converted: true,
                rotated: degrees > 0,
            }),
            Err(e) => {
                warn!(
                    "Failed to move converted file into place at {}: {e}",
                    dest.display()
                );
                let _ = tokio_fs::remove_file(&staging).await;
                Ok(Conversion::failed())
            }
        }
    }
}

/// Staging file written next to the destination; renamed into place on
/// success, swept as an orphan by the next run otherwise.
fn staging_path(dest: &Path) -> PathBuf {
    let mut name = dest.file_name().unwrap_or_default().to_os_string();
    name.push(".partial");
    dest.with_file_name(name)
}

/// Parses `sips -g orientation` output of the form `  orientation: 6`.
fn parse_orientation(stdout: &str) -> u32 {
    for line in stdout.lines() {
        let trimmed = line.trim();
        let lower = trimmed.to_ascii_lowercase();
        if let Some(rest) = lower.strip_prefix("orientation:") {
            if let Ok(value) = rest.trim().parse::<u32>() {
                return value;
            }
        }
    }
    1
}

/// Maps an EXIF orientation to the physical rotation that uprights it.
/// The flip variants (2, 4, 5, 7) are deliberately left alone: they are rare
/// in practice and handling them would need mirroring, not rotation.
fn rotation_degrees(orientation: u32) -> u32 {
    match orientation {
        3 => 180,
        6 => 90,
        8 => 270,
        _ => 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::os::unix::fs::PermissionsExt;
    use tempfile::TempDir;

    #[test]
    fn test_rotation_mapping() {
        assert_eq!(rotation_degrees(1), 0);
        assert_eq!(rotation_degrees(3), 180);
        assert_eq!(rotation_degrees(6), 90);
        assert_eq!(rotation_degrees(8), 270);
        // Flips are out of scope
        for flip in [2, 4, 5, 7] {
            assert_eq!(rotation_degrees(flip), 0);
        }
        assert_eq!(rotation_degrees(0), 0);
        assert_eq!(rotation_degrees(42), 0);
    }

    #[test]
    fn test_parse_orientation_output() {
        assert_eq!(parse_orientation("  orientation: 6\n"), 6);
        assert_eq!(parse_orientation("/path/to/file.jpg\n  orientation: 3\n"), 3);
        assert_eq!(parse_orientation("ORIENTATION: 8"), 8);
        assert_eq!(parse_orientation(""), 1);
        assert_eq!(parse_orientation("no tag here"), 1);
        assert_eq!(parse_orientation("  orientation: garbage"), 1);
    }

    #[test]
    fn test_staging_path_is_sibling() {
        let dest = Path::new("/albums/Trip/a.jpg");
        let staging = staging_path(dest);
        assert_eq!(staging, Path::new("/albums/Trip/a.jpg.partial"));
        assert_eq!(staging.parent(), dest.parent());
    }

    /// Writes a stub shell script that mimics the sips protocol: creates the
    /// `--out` file on convert, reports a fixed orientation, and logs every
    /// invocation so tests can assert the call sequence.
    fn stub_tool(dir: &Path, orientation: u32, fail_convert: bool) -> (PathBuf, PathBuf) {
        let log = dir.join("calls.log");
        let script = dir.join("fake-sips");
        let body = format!(
            r#"#!/bin/sh
echo "$@" >> "{log}"
case "$1" in
  -g)
    echo "  orientation: {orientation}"
    exit 0
    ;;
  -r)
    exit 0
    ;;
  -s)
    if [ "$2" = "format" ]; then
      if [ "{fail}" = "true" ]; then
        exit 1
      fi
      out=""
      prev=""
      for a in "$@"; do
        if [ "$prev" = "--out" ]; then out="$a"; fi
        prev="$a"
      done
      echo "JPEGDATA" > "$out"
    fi
    exit 0
    ;;
esac
exit 0
"#,
            log = log.display(),
            orientation = orientation,
            fail = fail_convert,
        );
        fs::write(&script, body).unwrap();
        fs::set_permissions(&script, fs::Permissions::from_mode(0o755)).unwrap();
        (script, log)
    }

    #[tokio::test]
    async fn test_convert_with_rotation() {
        let tmp = TempDir::new().unwrap();
        let (tool, log) = stub_tool(tmp.path(), 6, false);
        let source = tmp.path().join("a.heic");
        let dest = tmp.path().join("a.jpg");
        fs::write(&source, "HEICDATA").unwrap();

        let converter = SipsConverter::with_tool(tool);
        let cancel = CancellationToken::new();
        let outcome = converter.convert(&source, &dest, &cancel).await.unwrap();

        assert!(outcome.converted);
        assert!(outcome.rotated);
        assert!(dest.exists());
        assert!(!staging_path(&dest).exists());

        let calls = fs::read_to_string(&log).unwrap();
        assert!(calls.contains("-r 90"), "should rotate 90°: {calls}");
        assert!(
            calls.contains("-s orientation 1"),
            "should reset the tag: {calls}"
        );
    }

    #[tokio::test]
    async fn test_convert_without_rotation() {
        let tmp = TempDir::new().unwrap();
        let (tool, log) = stub_tool(tmp.path(), 1, false);
        let source = tmp.path().join("a.heic");
        let dest = tmp.path().join("a.jpg");
        fs::write(&source, "HEICDATA").unwrap();

        let converter = SipsConverter::with_tool(tool);
        let cancel = CancellationToken::new();
        let outcome = converter.convert(&source, &dest, &cancel).await.unwrap();

        assert!(outcome.converted);
        assert!(!outcome.rotated);
        assert!(dest.exists());

        let calls = fs::read_to_string(&log).unwrap();
        assert!(!calls.contains("-r "), "no rotation call expected: {calls}");
        assert!(
            !calls.contains("-s orientation 1"),
            "no reset needed for orientation 1: {calls}"
        );
    }

    #[tokio::test]
    async fn test_flip_orientation_resets_tag_without_rotation() {
        let tmp = TempDir::new().unwrap();
        let (tool, log) = stub_tool(tmp.path(), 2, false);
        let source = tmp.path().join("a.heic");
        let dest = tmp.path().join("a.jpg");
        fs::write(&source, "HEICDATA").unwrap();

        let converter = SipsConverter::with_tool(tool);
        let cancel = CancellationToken::new();
        let outcome = converter.convert(&source, &dest, &cancel).await.unwrap();

        assert!(outcome.converted);
        assert!(!outcome.rotated);

        let calls = fs::read_to_string(&log).unwrap();
        assert!(!calls.contains("-r "), "flips must not rotate: {calls}");
        assert!(
            calls.contains("-s orientation 1"),
            "tag must still be reset: {calls}"
        );
    }

    #[tokio::test]
    async fn test_failed_convert_leaves_no_output() {
        let tmp = TempDir::new().unwrap();
        let (tool, _log) = stub_tool(tmp.path(), 6, true);
        let source = tmp.path().join("a.heic");
        let dest = tmp.path().join("a.jpg");
        fs::write(&source, "HEICDATA").unwrap();

        let converter = SipsConverter::with_tool(tool);
        let cancel = CancellationToken::new();
        let outcome = converter.convert(&source, &dest, &cancel).await.unwrap();

        assert!(!outcome.converted);
        assert!(!outcome.rotated);
        assert!(!dest.exists());
        assert!(!staging_path(&dest).exists());
    }

    #[tokio::test]
    async fn test_missing_tool_is_a_failed_conversion() {
        let tmp = TempDir::new().unwrap();
        let source = tmp.path().join("a.heic");
        let dest = tmp.path().join("a.jpg");
        fs::write(&source, "HEICDATA").unwrap();

        let converter = SipsConverter::with_tool(tmp.path().join("no-such-tool"));
        let cancel = CancellationToken::new();
        let outcome = converter.convert(&source, &dest, &cancel).await.unwrap();

        assert!(!outcome.converted);
    }

    #[tokio::test]
    async fn test_pre_cancelled_run_aborts() {
        let tmp = TempDir::new().unwrap();
        let (tool, _log) = stub_tool(tmp.path(), 1, false);
        let source = tmp.path().join("a.heic");
        let dest = tmp.path().join("a.jpg");
        fs::write(&source, "HEICDATA").unwrap();

        let converter = SipsConverter::with_tool(tool);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result = converter.convert(&source, &dest, &cancel).await;
        assert!(matches!(result, Err(SyncError::Cancelled)));
    }
}
