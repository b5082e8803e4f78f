//! Principals and handler requirements.

use std::collections::{BTreeMap, BTreeSet};

use common::AggregateId;
use thiserror::Error;

/// The caller on whose behalf a message is processed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Principal {
    name: Option<String>,
    subject: Option<AggregateId>,
    authenticated: bool,
    roles: BTreeSet<String>,
    claims: BTreeMap<String, Vec<String>>,
}

impl Principal {
    /// A caller that has not signed in.
    pub fn anonymous() -> Self {
        Self::default()
    }

    /// A signed-in caller called `name`.
    pub fn authenticated(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            authenticated: true,
            ..Self::default()
        }
    }

    /// Binds the principal to the aggregate that represents it, typically
    /// the signed-in user.
    pub fn with_subject(mut self, subject: AggregateId) -> Self {
        self.subject = Some(subject);
        self
    }

    /// Grants `role`.
    pub fn with_role(mut self, role: impl Into<String>) -> Self {
        self.roles.insert(role.into());
        self
    }

    /// Adds one claim value.
    pub fn with_claim(mut self, claim_type: impl Into<String>, value: impl Into<String>) -> Self {
        self.claims
            .entry(claim_type.into())
            .or_default()
            .push(value.into());
        self
    }

    /// Name of a signed-in caller.
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// The user the caller acts as, if bound to one.
    pub fn subject(&self) -> Option<AggregateId> {
        self.subject
    }

    pub fn is_authenticated(&self) -> bool {
        self.authenticated
    }

    pub fn is_in_role(&self, role: &str) -> bool {
        self.roles.contains(role)
    }

    /// True when at least one value exists for `claim_type`.
    pub fn has_claim(&self, claim_type: &str) -> bool {
        self.claims.contains_key(claim_type)
    }

    /// Every value of `claim_type`.
    pub fn claim_values(&self, claim_type: &str) -> &[String] {
        self.claims
            .get(claim_type)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }
}

/// What a handler demands of the principal.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Requirements {
    authenticated: bool,
    roles: Vec<&'static str>,
    claims: Vec<&'static str>,
}

impl Requirements {
    /// No requirement; anonymous callers pass.
    pub fn none() -> Self {
        Self::default()
    }

    /// Requires a signed-in caller.
    pub fn authenticated() -> Self {
        Self {
            authenticated: true,
            ..Self::default()
        }
    }

    /// Requires `role`. Implies authentication.
    pub fn role(mut self, role: &'static str) -> Self {
        self.authenticated = true;
        self.roles.push(role);
        self
    }

    /// Requires a claim of `claim_type`. Implies authentication.
    pub fn claim(mut self, claim_type: &'static str) -> Self {
        self.authenticated = true;
        self.claims.push(claim_type);
        self
    }

    pub fn is_empty(&self) -> bool {
        !self.authenticated && self.roles.is_empty() && self.claims.is_empty()
    }
}

/// Why a caller was turned away.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Unauthorized {
    #[error("authentication required")]
    Unauthenticated,

    #[error("role {0} required")]
    MissingRole(&'static str),

    #[error("claim {0} required")]
    MissingClaim(&'static str),

    /// Raised by handlers for checks that depend on the message itself.
    #[error("{0}")]
    Denied(String),
}

/// Checks `principal` against `requirements`, reporting the first unmet one.
pub fn authorize(principal: &Principal, requirements: &Requirements) -> Result<(), Unauthorized> {
    if requirements.authenticated && !principal.is_authenticated() {
        return Err(Unauthorized::Unauthenticated);
    }
    if let Some(role) = requirements.roles.iter().copied().find(|r| !principal.is_in_role(r)) {
        return Err(Unauthorized::MissingRole(role));
    }
    if let Some(claim) = requirements.claims.iter().copied().find(|c| !principal.has_claim(c)) {
        return Err(Unauthorized::MissingClaim(claim));
    }
    Ok(())
}
