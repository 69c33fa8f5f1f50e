//! Capabilities and route requirements

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// A named permission derived from the kind of credential presented
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Capability {
    /// Authenticated with a user bearer token
    Bearer,
    /// Authenticated with a valid application token
    Application,
    /// The application has been verified by an administrator
    Verified,
    /// The owning user is an administrator
    Admin,
}

impl Capability {
    pub fn as_str(&self) -> &'static str {
        match self {
            Capability::Bearer => "bearer",
            Capability::Application => "application",
            Capability::Verified => "verified",
            Capability::Admin => "admin",
        }
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The capabilities granted to one resolved principal
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct CapabilitySet {
    capabilities: BTreeSet<Capability>,
}

impl CapabilitySet {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn insert(&mut self, capability: Capability) {
        self.capabilities.insert(capability);
    }

    pub fn contains(&self, capability: Capability) -> bool {
        self.capabilities.contains(&capability)
    }

    pub fn is_empty(&self) -> bool {
        self.capabilities.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = Capability> + '_ {
        self.capabilities.iter().copied()
    }
}

impl FromIterator<Capability> for CapabilitySet {
    fn from_iter<T: IntoIterator<Item = Capability>>(iter: T) -> Self {
        Self {
            capabilities: iter.into_iter().collect(),
        }
    }
}

impl fmt::Display for CapabilitySet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = self.iter().map(|c| c.as_str()).collect();
        write!(f, "{{{}}}", names.join(", "))
    }
}

/// What a route demands of the caller: any one of the listed capabilities.
///
/// An empty list marks a public route.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Requirement {
    any_of: &'static [Capability],
}

impl Requirement {
    pub const PUBLIC: Requirement = Requirement { any_of: &[] };

    pub const fn any_of(any_of: &'static [Capability]) -> Self {
        Self { any_of }
    }

    pub fn is_public(&self) -> bool {
        self.any_of.is_empty()
    }

    pub fn capabilities(&self) -> &'static [Capability] {
        self.any_of
    }

    pub fn is_satisfied_by(&self, granted: &CapabilitySet) -> bool {
        self.is_public() || self.any_of.iter().any(|c| granted.contains(*c))
    }
}
