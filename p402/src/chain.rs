//! CAIP-2 chain identifiers.
//!
//! Protocol v2 documents name networks as `namespace:reference`
//! (`eip155:8453` for Base). Protocol v1 documents use legacy names instead;
//! those are resolved through [`crate::networks`].

use std::fmt;
use std::str::FromStr;

use serde_with::{DeserializeFromStr, SerializeDisplay};

/// Namespace used by all EVM chains.
pub const EIP155_NAMESPACE: &str = "eip155";

/// Network named by its CAIP-2 `namespace:reference` pair.
///
/// Travels on the wire as the joined string, e.g. `"eip155:42220"`.
#[derive(
    Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, SerializeDisplay, DeserializeFromStr,
)]
pub struct ChainId {
    namespace: String,
    reference: String,
}

impl ChainId {
    /// Joins a namespace and a reference.
    pub fn new(namespace: impl Into<String>, reference: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            reference: reference.into(),
        }
    }

    /// `eip155:<chain_id>`.
    #[must_use]
    pub fn eip155(chain_id: u64) -> Self {
        Self::new(EIP155_NAMESPACE, chain_id.to_string())
    }

    /// Part before the colon.
    #[must_use]
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Part after the colon.
    #[must_use]
    pub fn reference(&self) -> &str {
        &self.reference
    }

    /// Numeric EIP-155 chain id, or `None` outside the `eip155` namespace or
    /// for a non-numeric reference.
    #[must_use]
    pub fn as_eip155(&self) -> Option<u64> {
        (self.namespace == EIP155_NAMESPACE)
            .then(|| self.reference.parse().ok())
            .flatten()
    }
}

impl fmt::Display for ChainId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.namespace)?;
        f.write_str(":")?;
        f.write_str(&self.reference)
    }
}

/// Text that is not `namespace:reference` with both parts present.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{0:?} is not a CAIP-2 chain id")]
pub struct ChainIdFormatError(String);

impl FromStr for ChainId {
    type Err = ChainIdFormatError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (namespace, reference) = s
            .split_once(':')
            .filter(|(ns, reference)| !ns.is_empty() && !reference.is_empty())
            .ok_or_else(|| ChainIdFormatError(s.to_owned()))?;
        Ok(Self::new(namespace, reference))
    }
}
