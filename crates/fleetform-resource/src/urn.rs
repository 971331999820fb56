//! Resource URNs
//!
//! Format: `urn:fleetform:<stack>::<project>::<qualified type>::<name>`.
//! The qualified type is the parent chain's types joined with `$`, ending in
//! the resource's own type. Any string with at least three `::`-separated
//! segments is accepted, so short forms like `a::b::c` parse too.

use crate::error::{ResourceError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

const SEPARATOR: &str = "::";

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Urn(String);

impl Urn {
    pub const PREFIX: &'static str = "urn:fleetform:";

    /// Build the URN of a resource, optionally nested under a parent
    pub fn new(stack: &str, project: &str, parent: Option<&Urn>, type_token: &str, name: &str) -> Self {
        let qualified = match parent {
            Some(parent) => format!("{}${}", parent.qualified_type(), type_token),
            None => type_token.to_string(),
        };
        Self(format!(
            "{}{}{sep}{}{sep}{}{sep}{}",
            Self::PREFIX,
            stack,
            project,
            qualified,
            name,
            sep = SEPARATOR
        ))
    }

    pub fn parse(urn: impl Into<String>) -> Result<Self> {
        let urn = urn.into();
        let segments: Vec<&str> = urn.split(SEPARATOR).collect();
        if segments.len() < 3 || segments.iter().any(|s| s.is_empty()) {
            return Err(ResourceError::InvalidUrn(urn));
        }
        Ok(Self(urn))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The resource's logical name (last segment)
    pub fn name(&self) -> &str {
        self.0.rsplit(SEPARATOR).next().unwrap_or(&self.0)
    }

    /// Parent chain types plus own type, `$`-joined
    pub fn qualified_type(&self) -> &str {
        self.0.rsplit(SEPARATOR).nth(1).unwrap_or_default()
    }

    /// The resource's own type token
    pub fn type_token(&self) -> &str {
        let qualified = self.qualified_type();
        qualified.rsplit('$').next().unwrap_or(qualified)
    }
}

impl fmt::Display for Urn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for Urn {
    type Error = ResourceError;

    fn try_from(urn: String) -> Result<Self> {
        Urn::parse(urn)
    }
}

impl From<Urn> for String {
    fn from(urn: Urn) -> Self {
        urn.0
    }
}

impl std::str::FromStr for Urn {
    type Err = ResourceError;

    fn from_str(s: &str) -> Result<Self> {
        Urn::parse(s)
    }
}
