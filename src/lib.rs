// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! farmgate - session and transport guard for agricultural records screens
//!
//! Protected screens talk to the records backend through signed envelopes,
//! gate their controls on the signed-in user's privileges, and end the
//! session after 15 minutes without user activity.
//!
//! # Core Modules
//!
//! - [`envelope`] - Signed, key-versioned envelopes for opaque payloads
//! - [`identity`] - Identity model and identity sources
//! - [`security`] - Privilege evaluation and the session lifecycle guard
//! - [`config`] - `~/.farmgate/config.json` and the signing secret
//! - [`error`] - Typed errors and operator-facing error formatting

pub mod config;
pub mod envelope;
pub mod error;
pub mod identity;
pub mod security;
pub mod utils;

pub use config::{load_config, EnvelopeSettings, GuardConfig, SECRET_ENV_VAR};
pub use envelope::{EnvelopeCodec, EnvelopeError, SigningKey};
pub use error::{format_error, ErrorBuilder, GuardError};
pub use identity::{Identity, IdentityError, IdentitySource, LoginStatus, Role};
pub use security::{
    lacks_privilege, ActivityKind, GuardState, InvalidationReason, SessionConfig, SessionGuard,
};
pub use utils::{mask_sensitive, token_preview};
