// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Utility functions for tuberun.
//!
//! This module provides common utility functions used across the codebase.

/// Sanitize a user-supplied title into a safe file name stem.
///
/// Every character outside `[A-Za-z0-9_.-]` becomes `_`; an absent or empty
/// title falls back to `video`. The result is used both for
/// `Content-Disposition` filenames and for on-disk output paths.
///
/// # Examples
///
/// ```
/// use tuberun::utils::sanitize_title;
///
/// assert_eq!(sanitize_title(Some("My Video! 2024")), "My_Video__2024");
/// assert_eq!(sanitize_title(None), "video");
/// ```
pub fn sanitize_title(title: Option<&str>) -> String {
    let raw = match title {
        Some(t) if !t.is_empty() => t,
        _ => "video",
    };
    raw.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect()
}
