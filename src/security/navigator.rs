// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Navigation side of session termination.

use serde::{Deserialize, Serialize};

use crate::identity::Identity;

/// Where an ended session is sent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RedirectRoutes {
    /// Used for timeouts, fetch failures and explicit logout.
    pub end_session: String,
    /// Used when the resolved identity is stale or foreign: incomplete, or
    /// flagged `LOGOUT` by the server.
    pub stale_identity: String,
    /// Replaces `end_session` for self-service farmer accounts when set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub self_service_end_session: Option<String>,
}

impl Default for RedirectRoutes {
    fn default() -> Self {
        Self {
            end_session: "/logout".to_string(),
            stale_identity: "/logout?reason=stale".to_string(),
            self_service_end_session: None,
        }
    }
}

impl RedirectRoutes {
    /// End-of-session route for whoever held the session.
    pub fn end_session_for(&self, identity: Option<&Identity>) -> &str {
        match (&self.self_service_end_session, identity) {
            (Some(route), Some(identity)) if identity.is_self_service() => route,
            _ => &self.end_session,
        }
    }
}

/// Host-side effects of ending a session. The guard always calls
/// `clear_credentials` before `redirect`.
pub trait Navigator {
    /// Drop the authentication cookie or credential.
    fn clear_credentials(&mut self);

    /// Hard redirect. Nothing on the current screen runs afterwards.
    fn redirect(&mut self, route: &str);
}

/// Navigator that only records what it was asked to do.
#[derive(Debug, Clone, Default)]
pub struct RecordingNavigator {
    pub redirects: Vec<String>,
    pub credential_clears: u32,
    /// Credential clears that happened before each redirect, in order.
    pub clears_before_redirect: Vec<u32>,
}

impl RecordingNavigator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn last_redirect(&self) -> Option<&str> {
        self.redirects.last().map(String::as_str)
    }
}

impl Navigator for RecordingNavigator {
    fn clear_credentials(&mut self) {
        self.credential_clears += 1;
    }

    fn redirect(&mut self, route: &str) {
        self.clears_before_redirect.push(self.credential_clears);
        self.redirects.push(route.to_string());
    }
}
