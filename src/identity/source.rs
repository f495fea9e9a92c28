// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Identity sources.
//!
//! The identity query returns either a complete identity record, an
//! envelope-wrapped one, or an absence signal. Fetch failures are never
//! retried: a failed resolution means "not authenticated".

use std::future::Future;

use reqwest::StatusCode;
use serde::Deserialize;
use thiserror::Error;

use super::Identity;
use crate::envelope::{EnvelopeCodec, EnvelopeError};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IdentityError {
    #[error("identity request failed: {0}")]
    Transport(String),

    #[error("identity endpoint answered with status {0}")]
    Status(u16),

    #[error("identity response could not be decoded: {0}")]
    Decode(String),

    #[error("identity envelope rejected: {0}")]
    Envelope(#[from] EnvelopeError),

    #[error("identity response is wrapped but no envelope codec is configured")]
    NoCodec,
}

/// Anything that can answer "who is the current user".
pub trait IdentitySource {
    fn fetch_identity(
        &self,
    ) -> impl Future<Output = Result<Option<Identity>, IdentityError>> + Send;
}

/// Body of an identity response.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum IdentityWire {
    Wrapped { envelope: String },
    Plain(Identity),
}

/// Turn a decoded response body into an identity, unwrapping envelopes with
/// `codec`. A `null` body is the absence signal.
pub fn resolve_wire(
    body: Option<IdentityWire>,
    codec: Option<&EnvelopeCodec>,
) -> Result<Option<Identity>, IdentityError> {
    match body {
        None => Ok(None),
        Some(IdentityWire::Plain(identity)) => Ok(Some(identity)),
        Some(IdentityWire::Wrapped { envelope }) => {
            let codec = codec.ok_or(IdentityError::NoCodec)?;
            let identity: Option<Identity> = codec.open(&envelope)?;
            Ok(identity)
        }
    }
}

/// Fixed answer. Used by the CLI for identities read from disk and by tests.
#[derive(Debug, Clone)]
pub struct StaticIdentitySource {
    outcome: Result<Option<Identity>, IdentityError>,
}

impl StaticIdentitySource {
    pub fn found(identity: Identity) -> Self {
        Self {
            outcome: Ok(Some(identity)),
        }
    }

    pub fn absent() -> Self {
        Self { outcome: Ok(None) }
    }

    pub fn failing(error: IdentityError) -> Self {
        Self { outcome: Err(error) }
    }
}

impl IdentitySource for StaticIdentitySource {
    async fn fetch_identity(&self) -> Result<Option<Identity>, IdentityError> {
        self.outcome.clone()
    }
}

/// Identity query against the records backend.
///
/// 401, 403, 404 and 204 are read as "no identity". The client has no
/// request timeout.
#[derive(Clone)]
pub struct HttpIdentitySource {
    client: reqwest::Client,
    url: String,
    credential: Option<String>,
    codec: Option<EnvelopeCodec>,
}

impl HttpIdentitySource {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: url.into(),
            credential: None,
            codec: None,
        }
    }

    /// Bearer credential sent with the query.
    pub fn with_credential(mut self, credential: impl Into<String>) -> Self {
        self.credential = Some(credential.into());
        self
    }

    /// Codec for envelope-wrapped responses.
    pub fn with_codec(mut self, codec: EnvelopeCodec) -> Self {
        self.codec = Some(codec);
        self
    }
}

impl std::fmt::Debug for HttpIdentitySource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpIdentitySource")
            .field("url", &self.url)
            .field("credential", &self.credential.as_ref().map(|_| "[REDACTED]"))
            .field("codec", &self.codec)
            .finish()
    }
}

impl IdentitySource for HttpIdentitySource {
    async fn fetch_identity(&self) -> Result<Option<Identity>, IdentityError> {
        let mut request = self.client.get(&self.url);
        if let Some(credential) = &self.credential {
            request = request.bearer_auth(credential);
        }

        let response = request
            .send()
            .await
            .map_err(|e| IdentityError::Transport(e.to_string()))?;

        match response.status() {
            StatusCode::UNAUTHORIZED
            | StatusCode::FORBIDDEN
            | StatusCode::NOT_FOUND
            | StatusCode::NO_CONTENT => {
                tracing::debug!(
                    "IDENTITY_ABSENT | url={} status={}",
                    self.url,
                    response.status().as_u16()
                );
                return Ok(None);
            }
            status if !status.is_success() => return Err(IdentityError::Status(status.as_u16())),
            _ => {}
        }

        let body: Option<IdentityWire> = response
            .json()
            .await
            .map_err(|e| IdentityError::Decode(e.to_string()))?;

        resolve_wire(body, self.codec.as_ref())
    }
}
