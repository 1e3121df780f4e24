//! File and folder naming for synced albums.
//!
//! Two jobs live here: deciding the final on-disk filename for an asset
//! (rewriting convertible extensions to `.jpg` and de-duplicating collisions
//! within an album), and sanitizing album display names into directory names
//! that are safe on every filesystem Jellyfin runs on.

use std::collections::HashSet;
use std::ffi::OsStr;
use std::path::Path;

/// Extensions that get transcoded to JPEG instead of symlinked.
const CONVERTIBLE_EXTENSIONS: [&str; 2] = ["heic", "heif"];

/// Characters stripped out of album names before they become directories.
const ILLEGAL_NAME_CHARS: [char; 10] = ['/', '\\', ':', '*', '?', '"', '\'', '<', '>', '|'];

const MAX_FOLDER_NAME_LEN: usize = 200;

/// Returns true if the filename's extension marks it for conversion
/// (HEIC/HEIF, case-insensitive).
pub fn needs_conversion(file_name: &str) -> bool {
    Path::new(file_name)
        .extension()
        .and_then(OsStr::to_str)
        .map(|ext| CONVERTIBLE_EXTENSIONS.iter().any(|c| c.eq_ignore_ascii_case(ext)))
        .unwrap_or(false)
}

/// The first 8 characters of an Immich id, used to disambiguate names.
pub fn short_id(id: &str) -> String {
    id.chars().take(8).collect()
}

/// Resolves the final filename for an asset within one album directory.
///
/// Convertible assets get their extension rewritten to `.jpg` first. If the
/// resulting name is already taken by another asset in the same album, a
/// short id is inserted before the extension so neither asset overwrites the
/// other. The returned name is recorded in `used`.
pub fn resolve_file_name(
    desired: &str,
    convert: bool,
    asset_id: &str,
    used: &mut HashSet<String>,
) -> String {
    let mut name = if convert {
        replace_extension(desired, "jpg")
    } else {
        desired.to_string()
    };

    if used.contains(&name) {
        name = insert_short_id(&name, asset_id);
    }

    used.insert(name.clone());
    name
}

/// Strips filesystem-illegal characters from an album display name, trims
/// dots and spaces from both ends, and caps the length. May return an empty
/// string; the caller falls back to an id-derived name in that case.
pub fn sanitize_album_name(name: &str) -> String {
    let kept: String = name
        .chars()
        .filter(|c| !c.is_control() && !ILLEGAL_NAME_CHARS.contains(c))
        .collect();

    kept.trim_matches(['.', ' '])
        .chars()
        .take(MAX_FOLDER_NAME_LEN)
        .collect()
}

fn replace_extension(name: &str, new_ext: &str) -> String {
    match Path::new(name).file_stem().and_then(OsStr::to_str) {
        Some(stem) if !stem.is_empty() => format!("{stem}.{new_ext}"),
        _ => format!("{name}.{new_ext}"),
    }
}

fn insert_short_id(name: &str, asset_id: &str) -> String {
    let short = short_id(asset_id);
    let path = Path::new(name);
    match (
        path.file_stem().and_then(OsStr::to_str),
        path.extension().and_then(OsStr::to_str),
    ) {
        (Some(stem), Some(ext)) => format!("{stem}_{short}.{ext}"),
        _ => format!("{name}_{short}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_needs_conversion_is_case_insensitive() {
        assert!(needs_conversion("IMG_0001.HEIC"));
        assert!(needs_conversion("img_0002.heic"));
        assert!(needs_conversion("img_0003.HeIf"));
        assert!(!needs_conversion("img_0004.jpg"));
        assert!(!needs_conversion("img_0005.png"));
        assert!(!needs_conversion("noextension"));
    }

    #[test]
    fn test_convertible_name_gets_jpg_extension() {
        let mut used = HashSet::new();
        let name = resolve_file_name("IMG_0001.HEIC", true, "abcdef1234", &mut used);
        assert_eq!(name, "IMG_0001.jpg");
    }

    #[test]
    fn test_link_name_is_untouched() {
        let mut used = HashSet::new();
        let name = resolve_file_name("sunset.jpg", false, "abcdef1234", &mut used);
        assert_eq!(name, "sunset.jpg");
    }

    #[test]
    fn test_collision_gets_short_id_suffix() {
        let mut used = HashSet::new();
        let first = resolve_file_name("photo.jpg", false, "aaaa1111bbbb", &mut used);
        let second = resolve_file_name("photo.jpg", false, "cccc2222dddd", &mut used);

        assert_eq!(first, "photo.jpg");
        assert_eq!(second, "photo_cccc2222.jpg");
        assert_ne!(first, second);
    }

    #[test]
    fn test_heic_and_jpg_stems_can_collide() {
        // a.heic converts to a.jpg, which then collides with a literal a.jpg
        let mut used = HashSet::new();
        let linked = resolve_file_name("a.jpg", false, "11112222x", &mut used);
        let converted = resolve_file_name("a.heic", true, "33334444y", &mut used);

        assert_eq!(linked, "a.jpg");
        assert_eq!(converted, "a_33334444.jpg");
    }

    #[test]
    fn test_collision_without_extension() {
        let mut used = HashSet::new();
        resolve_file_name("raw", false, "11111111", &mut used);
        let second = resolve_file_name("raw", false, "22222222", &mut used);
        assert_eq!(second, "raw_22222222");
    }

    #[test]
    fn test_sanitize_strips_illegal_chars() {
        assert_eq!(sanitize_album_name("Trip '24"), "Trip 24");
        assert_eq!(sanitize_album_name("a/b\\c:d*e?f\"g<h>i|j"), "abcdefghij");
    }

    #[test]
    fn test_sanitize_trims_dots_and_spaces() {
        assert_eq!(sanitize_album_name("  Holiday... "), "Holiday");
        assert_eq!(sanitize_album_name("..."), "");
    }

    #[test]
    fn test_sanitize_strips_control_chars() {
        assert_eq!(sanitize_album_name("new\nline\ttab"), "newlinetab");
    }

    #[test]
    fn test_sanitize_caps_length() {
        let long = "x".repeat(300);
        assert_eq!(sanitize_album_name(&long).len(), 200);
    }

    #[test]
    fn test_short_id_of_short_input() {
        assert_eq!(short_id("abc"), "abc");
        assert_eq!(short_id("0123456789"), "01234567");
    }
}
