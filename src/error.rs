// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Error types and operator-facing error formatting.
//!
//! Library code returns the typed errors below. The CLI renders failures
//! with [`ErrorBuilder`] so every message carries likely causes and a fix.

use std::fmt;
use std::io;

use thiserror::Error;

use crate::envelope::EnvelopeError;
use crate::identity::IdentityError;
use crate::security::StoreError;

/// Printed at the end of every formatted error.
pub const HELP_HINT: &str = "Run `farmgate --help` or `farmgate config show` for details.";

/// Top-level error for guard wiring: configuration, keys, identity and
/// persistence.
#[derive(Debug, Error)]
pub enum GuardError {
    #[error("envelope rejected: {0}")]
    EnvelopeInvalid(#[from] EnvelopeError),

    #[error("identity could not be resolved: {0}")]
    IdentityUnresolved(#[from] IdentityError),

    #[error("configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl GuardError {
    /// Render with causes and fixes for the terminal.
    pub fn to_report(&self) -> String {
        let builder = ErrorBuilder::new(self.to_string());
        match self {
            GuardError::EnvelopeInvalid(EnvelopeError::UnknownKey)
            | GuardError::EnvelopeInvalid(EnvelopeError::RetiredKey(_)) => builder
                .cause("Token was sealed with a different or rotated key")
                .fix("Check envelope.key_id and envelope.retired_key_ids in the config")
                .fix("Re-seal the payload with the active key"),
            GuardError::EnvelopeInvalid(EnvelopeError::BadSignature) => builder
                .cause("Token was modified in transit")
                .cause("FARMGATE_ENVELOPE_SECRET differs from the sealing side")
                .fix("Compare key fingerprints: farmgate config show"),
            GuardError::EnvelopeInvalid(EnvelopeError::Expired(_)) => builder
                .cause("Token lifetime (envelope.ttl_secs) has passed")
                .fix("Request a fresh token"),
            GuardError::EnvelopeInvalid(_) => builder
                .cause("Token is truncated or not an envelope")
                .fix("Pass the whole token, including both '.' separators"),
            GuardError::IdentityUnresolved(_) => builder
                .cause("Identity service unreachable or returned an error")
                .cause("Credential missing or expired")
                .fix("Check identity_url in the config")
                .fix("Retry with --verbose to see the response status"),
            GuardError::Config(_) => builder
                .cause("Missing or malformed ~/.farmgate/config.json")
                .cause("FARMGATE_ENVELOPE_SECRET not set")
                .fix("Generate a secret: farmgate keygen")
                .fix("Inspect the effective config: farmgate config show"),
            GuardError::Store(_) | GuardError::Io(_) => builder
                .cause("Activity file is unreadable or was edited by hand")
                .fix("Delete the activity file to start a fresh session"),
        }
        .build()
    }
}

/// Formats an error message with title, causes, fixes and a help hint.
///
/// # Example
///
/// ```
/// use farmgate::error::format_error;
///
/// let error = format_error(
///     "Identity service unreachable",
///     &["Service not running", "Wrong identity_url in config"],
///     &["Check config: farmgate config show"],
/// );
/// assert!(error.contains("Possible causes:"));
/// ```
pub fn format_error(title: &str, causes: &[&str], fixes: &[&str]) -> String {
    let mut output = format!("[✗] {}\n\n", title);

    if !causes.is_empty() {
        output.push_str("Possible causes:\n");
        for cause in causes {
            output.push_str(&format!("  - {}\n", cause));
        }
        output.push('\n');
    }

    if !fixes.is_empty() {
        output.push_str("Try these fixes:\n");
        for (i, fix) in fixes.iter().enumerate() {
            output.push_str(&format!("  {}. {}\n", i + 1, fix));
        }
        output.push('\n');
    }

    output.push_str(HELP_HINT);
    output
}

/// Builder for [`format_error`].
#[derive(Debug, Clone)]
pub struct ErrorBuilder {
    title: String,
    causes: Vec<String>,
    fixes: Vec<String>,
}

impl ErrorBuilder {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            causes: Vec::new(),
            fixes: Vec::new(),
        }
    }

    pub fn cause(mut self, cause: impl Into<String>) -> Self {
        self.causes.push(cause.into());
        self
    }

    pub fn fix(mut self, fix: impl Into<String>) -> Self {
        self.fixes.push(fix.into());
        self
    }

    pub fn build(self) -> String {
        let causes: Vec<&str> = self.causes.iter().map(String::as_str).collect();
        let fixes: Vec<&str> = self.fixes.iter().map(String::as_str).collect();
        format_error(&self.title, &causes, &fixes)
    }
}

impl fmt::Display for ErrorBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.clone().build())
    }
}
