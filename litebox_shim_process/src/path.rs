// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//! Windows path helpers

use std::path::{Path, PathBuf};

/// Does the path contain a drive letter (`C:...`)?
pub fn has_drive_letter(path: &str) -> bool {
    let bytes = path.as_bytes();
    bytes.len() >= 2 && bytes[0].is_ascii_alphabetic() && bytes[1] == b':'
}

/// Does the name contain a directory separator or drive letter?
///
/// Such names are used as given instead of being searched for.
pub fn has_path_component(name: &str) -> bool {
    name.contains(['\\', '/']) || has_drive_letter(name)
}

/// Is this a Windows-style path rather than a host one?
pub fn is_windows_path(path: &str) -> bool {
    has_drive_letter(path) || path.contains('\\')
}

/// Extension of the final path component including the dot (`.exe`)
pub fn extension(name: &str) -> Option<&str> {
    let base = base_name(name);
    base.rfind('.').map(|pos| &base[pos..]).filter(|ext| ext.len() > 1)
}

/// Final path component, accepting both separators
pub fn base_name(name: &str) -> &str {
    name.rsplit(['\\', '/']).next().unwrap_or(name)
}

/// Translate Windows path to Linux path
///
/// Converts Windows-style paths (C:\path\to\file.txt) to host paths rooted at
/// `drive_root` (`<drive_root>/path/to/file.txt`). A path without a drive
/// letter is also placed under `drive_root` when it starts with a backslash;
/// host paths are returned unchanged.
pub fn translate_windows_path_to_linux(windows_path: &str, drive_root: &Path) -> PathBuf {
    if !is_windows_path(windows_path) {
        return PathBuf::from(windows_path);
    }

    let mut path = windows_path;

    // Remove drive letter if present (C:, D:, etc.)
    if has_drive_letter(path) {
        path = &path[2..];
    }

    // Replace backslashes with forward slashes
    let path = path.replace('\\', "/");
    let relative = path.trim_start_matches('/');

    if relative.is_empty() {
        drive_root.to_path_buf()
    } else {
        drive_root.join(relative)
    }
}
