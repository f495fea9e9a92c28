// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Helpers for keeping secrets and tokens out of logs.

/// Mask a sensitive string (credentials, secrets) for logging.
///
/// Shows only the first `visible_prefix` characters and replaces the rest with "...".
///
/// # Examples
///
/// ```
/// use farmgate::utils::mask_sensitive;
///
/// let credential = "Bearer eyJhbGciOiJIUzI1NiJ9.payload";
/// assert_eq!(mask_sensitive(credential, 6), "Bearer...");
/// ```
pub fn mask_sensitive(input: &str, visible_prefix: usize) -> String {
    let prefix: String = input.chars().take(visible_prefix).collect();
    format!("{}...", prefix)
}

/// Log-safe view of an envelope: key id and total length only.
///
/// ```
/// use farmgate::utils::token_preview;
///
/// assert_eq!(token_preview("k1.eyJkYXRhIjoxfQ.c2ln"), "k1.…(22 chars)");
/// ```
pub fn token_preview(token: &str) -> String {
    match token.split_once('.') {
        Some((key_id, _)) if !key_id.is_empty() && key_id.len() <= 32 => {
            format!("{}.…({} chars)", key_id, token.len())
        }
        _ => format!("…({} chars)", token.len()),
    }
}
