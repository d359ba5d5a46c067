//! Caller identity handling.

use serde::{Deserialize, Serialize};

use crate::error::{Result, TurnstileError};

/// Longest identity accepted, in bytes.
pub const MAX_IDENTITY_LEN: usize = 256;

/// Identity used for callers that supply none under [`AnonymousPolicy::Shared`].
pub const ANONYMOUS_IDENTITY: &str = "anonymous";

/// What to do with requests that carry no identity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnonymousPolicy {
    /// Refuse the request before it reaches the limiter.
    #[default]
    Reject,
    /// Bill every unidentified caller to one shared bucket.
    Shared,
}

/// An opaque, validated caller identity.
///
/// Identities carry no structure beyond equality; the limiter only uses them
/// to build counter keys.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Identity(String);

impl Identity {
    /// Validate a raw identity. The value is kept as given; surrounding
    /// whitespace is significant.
    pub fn new(raw: impl Into<String>) -> Result<Self> {
        let raw = raw.into();

        if raw.trim().is_empty() {
            return Err(TurnstileError::InvalidIdentity(
                "identity must not be empty".to_string(),
            ));
        }

        if raw.len() > MAX_IDENTITY_LEN {
            return Err(TurnstileError::InvalidIdentity(format!(
                "identity must not be longer than {} bytes",
                MAX_IDENTITY_LEN
            )));
        }

        Ok(Self(raw))
    }

    /// Resolve an optional identity taken from a request.
    ///
    /// Missing or blank identities are rejected or mapped to the shared
    /// anonymous bucket depending on `policy`. Over-long identities are
    /// always rejected.
    pub fn resolve(raw: Option<&str>, policy: AnonymousPolicy) -> Result<Self> {
        let raw = raw.filter(|value| !value.trim().is_empty());

        match (raw, policy) {
            (Some(value), _) => Self::new(value),
            (None, AnonymousPolicy::Shared) => Ok(Self(ANONYMOUS_IDENTITY.to_string())),
            (None, AnonymousPolicy::Reject) => Err(TurnstileError::InvalidIdentity(
                "missing user_id".to_string(),
            )),
        }
    }

    /// The identity as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Identity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<&str> for Identity {
    type Error = TurnstileError;

    fn try_from(value: &str) -> Result<Self> {
        Self::new(value)
    }
}
