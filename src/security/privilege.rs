// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Privilege Evaluator
//!
//! Decides whether an identity may see or invoke a gated screen or action.
//! Runs on every render of every gated element, so it is a pure function
//! with no I/O and no allocation on the hot path.
//!
//! ## Rules
//!
//! 1. No identity, an incomplete one, or one the server no longer
//!    considers logged in: denied.
//! 2. Role id contains [`SUPER_USER_SENTINEL`]: allowed, whatever was asked.
//! 3. Structured role: allowed if **any** required privilege is held.
//! 4. No structured role: allowed only if the legacy role-name list contains
//!    the sentinel. Everything else is denied.

use std::fmt;
use std::str::FromStr;

use thiserror::Error;

use crate::identity::{Identity, SUPER_USER_SENTINEL};

/// Returns `true` when the identity is NOT authorized for any of `required`.
///
/// ```
/// use farmgate::identity::{Identity, Role};
/// use farmgate::security::lacks_privilege;
///
/// let clerk = Identity::new("u-1", "E-1", Role::new("r-1", "Clerk", ["Crops:Read"]));
/// assert!(!lacks_privilege(Some(&clerk), &["Crops:Read", "Crops:Update"]));
/// assert!(lacks_privilege(Some(&clerk), &["Crops:Update"]));
/// assert!(lacks_privilege(None, &["Crops:Read"]));
/// ```
pub fn lacks_privilege<S: AsRef<str>>(identity: Option<&Identity>, required: &[S]) -> bool {
    let Some(identity) = identity else {
        return true;
    };
    if !identity.is_complete() || !identity.is_logged_in() {
        return true;
    }

    match &identity.role {
        Some(role) if role.is_super_user() => false,
        Some(role) => !required
            .iter()
            .any(|privilege| role.privileges.contains(privilege.as_ref())),
        None => !identity
            .roles
            .iter()
            .any(|name| name == SUPER_USER_SENTINEL),
    }
}

/// Positive form of [`lacks_privilege`].
pub fn has_privilege<S: AsRef<str>>(identity: Option<&Identity>, required: &[S]) -> bool {
    !lacks_privilege(identity, required)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Action {
    Create,
    Read,
    Update,
    Delete,
}

impl Action {
    pub const ALL: [Action; 4] = [Action::Create, Action::Read, Action::Update, Action::Delete];

    pub fn as_str(&self) -> &'static str {
        match self {
            Action::Create => "Create",
            Action::Read => "Read",
            Action::Update => "Update",
            Action::Delete => "Delete",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid privilege '{0}': expected <Resource>:<Create|Read|Update|Delete>")]
pub struct PrivilegeParseError(String);

/// A `Resource:Action` pair.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Privilege {
    pub resource: String,
    pub action: Action,
}

impl Privilege {
    pub fn new(resource: impl Into<String>, action: Action) -> Self {
        Self {
            resource: resource.into(),
            action,
        }
    }

    /// The four CRUD privileges of one resource, in `Action::ALL` order.
    pub fn crud(resource: &str) -> Vec<Privilege> {
        Action::ALL
            .iter()
            .map(|action| Privilege::new(resource, *action))
            .collect()
    }
}

impl fmt::Display for Privilege {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.resource, self.action)
    }
}

impl FromStr for Privilege {
    type Err = PrivilegeParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || PrivilegeParseError(s.to_string());
        let (resource, action) = s.split_once(':').ok_or_else(invalid)?;
        if resource.trim().is_empty() {
            return Err(invalid());
        }
        let action = match action {
            "Create" => Action::Create,
            "Read" => Action::Read,
            "Update" => Action::Update,
            "Delete" => Action::Delete,
            _ => return Err(invalid()),
        };
        Ok(Privilege::new(resource, action))
    }
}
