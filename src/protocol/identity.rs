//! Account addresses and secrets.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::CourierError;

/// Addressable endpoint on a messaging service, `name@domain`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Identity {
    name: String,
    domain: String,
}

impl Identity {
    /// Build an identity from its two halves.
    pub fn new(name: &str, domain: &str) -> Result<Self, CourierError> {
        validate_part(name, "account name")?;
        validate_part(domain, "domain")?;
        Ok(Self {
            name: name.to_string(),
            domain: domain.to_string(),
        })
    }

    /// Parse `name@domain`.
    pub fn parse(s: &str) -> Result<Self, CourierError> {
        let (name, domain) = s
            .split_once('@')
            .ok_or_else(|| CourierError::InvalidIdentity(format!("'{s}' is missing '@'")))?;
        Self::new(name, domain)
    }

    /// Account name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Service domain.
    pub fn domain(&self) -> &str {
        &self.domain
    }
}

fn validate_part(part: &str, what: &str) -> Result<(), CourierError> {
    if part.is_empty() {
        return Err(CourierError::InvalidIdentity(format!("empty {what}")));
    }
    if let Some(bad) = part
        .chars()
        .find(|c| c.is_whitespace() || c.is_control() || matches!(c, '@' | '/'))
    {
        return Err(CourierError::InvalidIdentity(format!(
            "{what} '{part}' contains {bad:?}"
        )));
    }
    Ok(())
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.name, self.domain)
    }
}

impl FromStr for Identity {
    type Err = CourierError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for Identity {
    type Error = CourierError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<Identity> for String {
    fn from(identity: Identity) -> Self {
        identity.to_string()
    }
}

/// Secret paired with an [`Identity`].
///
/// Never printed: `Debug` and `Display` are redacted and the buffer is wiped
/// on drop.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
#[serde(transparent)]
pub struct Credential(String);

impl Credential {
    /// Wrap a secret.
    pub fn new(secret: impl Into<String>) -> Self {
        Self(secret.into())
    }

    /// Expose the secret for wire encoding or subprocess arguments.
    pub fn expose_secret(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Credential(***)")
    }
}

impl fmt::Display for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("***")
    }
}

impl From<&str> for Credential {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for Credential {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}
