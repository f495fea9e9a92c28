// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Identity model
//!
//! The authenticated actor as returned by the identity query. Identities are
//! read-only on this side of the boundary: they are resolved once per screen
//! load and dropped on logout or invalidation.
//!
//! Wire format (camelCase JSON):
//!
//! ```json
//! {
//!   "id": "u-102",
//!   "employeeRef": "EMP-4471",
//!   "role": { "id": "r-7", "name": "District Officer", "privileges": ["Crops:Read"] },
//!   "registration": "officer",
//!   "loginStatus": "ACTIVE"
//! }
//! ```

pub mod source;

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

pub use source::{
    resolve_wire, HttpIdentitySource, IdentityError, IdentitySource, IdentityWire,
    StaticIdentitySource,
};

/// Marker that grants every privilege when it appears in a role id, or as an
/// entry of a legacy role-name list.
pub const SUPER_USER_SENTINEL: &str = "__SUPER_USER__";

/// Server-controlled login flag. `Logout` forces the client to end its
/// session on the next identity poll.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LoginStatus {
    Active,
    Logout,
}

/// How the account was registered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Registration {
    /// Regular extension/records officer.
    Officer,
    /// Self-service farmer account.
    Farmer,
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Role {
    pub id: String,
    #[serde(default)]
    pub name: String,
    /// `"<Resource>:<Action>"` strings.
    #[serde(default)]
    pub privileges: BTreeSet<String>,
}

impl Role {
    pub fn new<I, S>(id: impl Into<String>, name: impl Into<String>, privileges: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            id: id.into(),
            name: name.into(),
            privileges: privileges.into_iter().map(Into::into).collect(),
        }
    }

    pub fn is_super_user(&self) -> bool {
        self.id.contains(SUPER_USER_SENTINEL)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Identity {
    #[serde(default)]
    pub id: String,
    #[serde(default, alias = "employeeId")]
    pub employee_ref: Option<String>,
    #[serde(default)]
    pub role: Option<Role>,
    /// Legacy flat role-name list, consulted only when `role` is absent.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub roles: Vec<String>,
    #[serde(default)]
    pub registration: Option<Registration>,
    #[serde(default)]
    pub login_status: Option<LoginStatus>,
}

impl Identity {
    /// A structured-role identity with `ACTIVE` login status.
    pub fn new(id: impl Into<String>, employee_ref: impl Into<String>, role: Role) -> Self {
        Self {
            id: id.into(),
            employee_ref: Some(employee_ref.into()),
            role: Some(role),
            roles: Vec::new(),
            registration: Some(Registration::Officer),
            login_status: Some(LoginStatus::Active),
        }
    }

    /// An identity that only carries a legacy role-name list.
    pub fn legacy<I, S>(id: impl Into<String>, employee_ref: impl Into<String>, roles: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            id: id.into(),
            employee_ref: Some(employee_ref.into()),
            role: None,
            roles: roles.into_iter().map(Into::into).collect(),
            registration: Some(Registration::Officer),
            login_status: Some(LoginStatus::Active),
        }
    }

    pub fn with_login_status(mut self, status: LoginStatus) -> Self {
        self.login_status = Some(status);
        self
    }

    pub fn with_registration(mut self, registration: Registration) -> Self {
        self.registration = Some(registration);
        self
    }

    /// Both the internal id and the employee reference are present.
    pub fn is_complete(&self) -> bool {
        !self.id.trim().is_empty()
            && self
                .employee_ref
                .as_deref()
                .is_some_and(|r| !r.trim().is_empty())
    }

    /// The server still considers this login active. A missing flag counts
    /// as not active.
    pub fn is_logged_in(&self) -> bool {
        self.login_status == Some(LoginStatus::Active)
    }

    pub fn is_self_service(&self) -> bool {
        self.registration == Some(Registration::Farmer)
    }
}
