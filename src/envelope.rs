// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Signed Envelope Codec
//!
//! Wraps arbitrary JSON payloads in a signed, opaque string so screens can
//! pass query filters, mutation inputs and result sets through a plain string
//! field while still getting tamper evidence.
//!
//! ## Wire format
//!
//! ```text
//! <key_id>.<base64url(claims)>.<base64url(hmac_sha256(key_id "." claims))>
//! ```
//!
//! `claims` is `{"iat": <unix secs>, "exp": <unix secs>?, "data": <payload>}`.
//! The key id versions the secret: envelopes signed under a retired key id are
//! rejected with [`EnvelopeError::RetiredKey`] instead of a generic signature
//! failure.
//!
//! Verification is fail-closed. The claims segment is not even base64-decoded
//! until the tag has been verified.
//!
//! ## Usage
//!
//! ```
//! use farmgate::envelope::{EnvelopeCodec, SigningKey};
//! use serde_json::json;
//!
//! let key = SigningKey::new("k1", "a-deployment-secret-of-32-bytes!").unwrap();
//! let codec = EnvelopeCodec::new(key);
//!
//! let token = codec.encode(&json!({"district": "North", "page": 2}));
//! assert_eq!(codec.decode(&token).unwrap()["page"], 2);
//! ```

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use chrono::{DateTime, Duration, Utc};
use hmac::{Hmac, Mac};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use std::collections::BTreeSet;
use std::fmt;
use subtle::ConstantTimeEq;
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

/// Key id used when the configuration does not name one.
pub const DEFAULT_KEY_ID: &str = "k1";

/// Shortest secret accepted for signing.
pub const MIN_SECRET_LEN: usize = 16;

const MAX_KEY_ID_LEN: usize = 32;

/// Every way an envelope can fail to verify. All variants mean the envelope
/// is invalid; none of them carry any part of the payload.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EnvelopeError {
    #[error("malformed envelope: {0}")]
    Malformed(&'static str),

    #[error("envelope was signed with an unknown key")]
    UnknownKey,

    #[error("envelope was signed with retired key '{0}'")]
    RetiredKey(String),

    #[error("envelope signature does not verify")]
    BadSignature,

    #[error("envelope expired at unix time {0}")]
    Expired(i64),

    #[error("envelope payload has an unexpected shape: {0}")]
    Shape(String),

    #[error("invalid signing key: {0}")]
    InvalidKey(&'static str),
}

/// A versioned symmetric signing key.
#[derive(Clone)]
pub struct SigningKey {
    id: String,
    mac: HmacSha256,
    fingerprint: String,
}

impl SigningKey {
    /// Create a signing key from its id and shared secret.
    ///
    /// The id must be 1-32 characters of `[A-Za-z0-9_-]` so it can never
    /// contain the segment separator. The secret must be at least
    /// [`MIN_SECRET_LEN`] bytes.
    pub fn new(id: impl Into<String>, secret: impl AsRef<[u8]>) -> Result<Self, EnvelopeError> {
        let id = id.into();
        if !is_valid_key_id(&id) {
            return Err(EnvelopeError::InvalidKey(
                "key id must be 1-32 characters of [A-Za-z0-9_-]",
            ));
        }

        let secret = secret.as_ref();
        if secret.len() < MIN_SECRET_LEN {
            return Err(EnvelopeError::InvalidKey("secret must be at least 16 bytes"));
        }

        let mac = HmacSha256::new_from_slice(secret)
            .map_err(|_| EnvelopeError::InvalidKey("secret rejected by HMAC"))?;
        let digest = Sha256::digest(secret);
        let fingerprint = hex::encode(&digest[..4]);

        Ok(Self { id, mac, fingerprint })
    }

    /// The key id written into every envelope signed with this key.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Short, non-reversible identifier of the secret, safe to log.
    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    fn sign(&self, signing_input: &str) -> Vec<u8> {
        let mut mac = self.mac.clone();
        mac.update(signing_input.as_bytes());
        mac.finalize().into_bytes().to_vec()
    }

    /// Constant-time check of `tag` against the signature of `signing_input`.
    fn verify(&self, signing_input: &str, tag: &[u8]) -> bool {
        let expected = self.sign(signing_input);
        if expected.len() != tag.len() {
            return false;
        }
        expected.ct_eq(tag).into()
    }
}

impl fmt::Debug for SigningKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SigningKey")
            .field("id", &self.id)
            .field("fingerprint", &self.fingerprint)
            .finish_non_exhaustive()
    }
}

fn is_valid_key_id(id: &str) -> bool {
    !id.is_empty()
        && id.len() <= MAX_KEY_ID_LEN
        && id.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_')
}

#[derive(Deserialize)]
struct Claims {
    #[allow(dead_code)]
    iat: i64,
    #[serde(default)]
    exp: Option<i64>,
    data: Value,
}

/// Process-wide envelope codec. Stateless apart from its keys, so it can be
/// shared across call sites and tasks freely.
#[derive(Debug, Clone)]
pub struct EnvelopeCodec {
    key: SigningKey,
    retired: BTreeSet<String>,
}

impl EnvelopeCodec {
    pub fn new(key: SigningKey) -> Self {
        Self {
            key,
            retired: BTreeSet::new(),
        }
    }

    /// Mark key ids whose envelopes must be rejected as retired.
    /// The active key id is never treated as retired.
    pub fn with_retired_keys<I, S>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for id in ids {
            let id = id.into();
            if id == self.key.id {
                tracing::warn!(
                    "ENVELOPE_KEY_CONFIG | active key '{}' listed as retired, ignoring",
                    id
                );
                continue;
            }
            self.retired.insert(id);
        }
        self
    }

    pub fn key_id(&self) -> &str {
        self.key.id()
    }

    pub fn fingerprint(&self) -> &str {
        self.key.fingerprint()
    }

    /// Sign a payload. Never fails.
    pub fn encode(&self, payload: &Value) -> String {
        self.encode_at(payload.clone(), Utc::now(), None)
    }

    /// Sign a payload that stops verifying after `ttl`.
    pub fn encode_with_ttl(&self, payload: &Value, ttl: Duration) -> String {
        self.encode_at(payload.clone(), Utc::now(), Some(ttl))
    }

    /// Sign a payload as if issued at `issued_at`.
    pub fn encode_at(
        &self,
        payload: Value,
        issued_at: DateTime<Utc>,
        ttl: Option<Duration>,
    ) -> String {
        let iat = issued_at.timestamp();
        let mut claims = Map::new();
        claims.insert("iat".to_string(), Value::from(iat));
        if let Some(ttl) = ttl {
            claims.insert("exp".to_string(), Value::from(iat.saturating_add(ttl.num_seconds())));
        }
        claims.insert("data".to_string(), payload);

        let body = URL_SAFE_NO_PAD.encode(Value::Object(claims).to_string());
        let signing_input = format!("{}.{}", self.key.id, body);
        let tag = URL_SAFE_NO_PAD.encode(self.key.sign(&signing_input));

        format!("{}.{}", signing_input, tag)
    }

    /// Verify and unwrap an envelope.
    pub fn decode(&self, token: &str) -> Result<Value, EnvelopeError> {
        self.decode_at(token, Utc::now())
    }

    /// Verify and unwrap an envelope, judging expiry against `now`.
    pub fn decode_at(&self, token: &str, now: DateTime<Utc>) -> Result<Value, EnvelopeError> {
        let mut segments = token.split('.');
        let (Some(key_id), Some(body), Some(tag), None) = (
            segments.next(),
            segments.next(),
            segments.next(),
            segments.next(),
        ) else {
            return Err(EnvelopeError::Malformed("expected three segments"));
        };

        if key_id.is_empty() || body.is_empty() || tag.is_empty() {
            return Err(EnvelopeError::Malformed("empty segment"));
        }

        if key_id != self.key.id {
            if self.retired.contains(key_id) {
                return Err(EnvelopeError::RetiredKey(key_id.to_string()));
            }
            return Err(EnvelopeError::UnknownKey);
        }

        let tag = URL_SAFE_NO_PAD
            .decode(tag)
            .map_err(|_| EnvelopeError::Malformed("signature segment is not base64url"))?;

        let signing_input = &token[..key_id.len() + 1 + body.len()];
        if !self.key.verify(signing_input, &tag) {
            tracing::debug!("ENVELOPE_REJECTED | key={} reason=bad_signature", key_id);
            return Err(EnvelopeError::BadSignature);
        }

        let raw = URL_SAFE_NO_PAD
            .decode(body)
            .map_err(|_| EnvelopeError::Malformed("claims segment is not base64url"))?;
        let claims: Claims = serde_json::from_slice(&raw)
            .map_err(|_| EnvelopeError::Malformed("claims are not valid JSON"))?;

        if let Some(exp) = claims.exp {
            if exp <= now.timestamp() {
                return Err(EnvelopeError::Expired(exp));
            }
        }

        Ok(claims.data)
    }

    /// Serialize a typed payload and sign it.
    pub fn seal<T: Serialize>(&self, payload: &T) -> Result<String, EnvelopeError> {
        let value = serde_json::to_value(payload).map_err(|e| EnvelopeError::Shape(e.to_string()))?;
        Ok(self.encode_at(value, Utc::now(), None))
    }

    /// Verify an envelope and deserialize its payload into `T`.
    ///
    /// A verified payload that does not fit `T` is reported as
    /// [`EnvelopeError::Shape`].
    pub fn open<T: DeserializeOwned>(&self, token: &str) -> Result<T, EnvelopeError> {
        let value = self.decode(token)?;
        serde_json::from_value(value).map_err(|e| EnvelopeError::Shape(e.to_string()))
    }
}
