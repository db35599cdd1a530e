//! Protocol v2 requirements documents.
//!
//! V2 names networks by CAIP-2 identifier (`"eip155:8453"`), states the
//! price as `amount`, and moves resource metadata to the document level.

use alloy_primitives::Address;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use serde_with::skip_serializing_none;

use super::RequirementExtra;
use crate::amount::TokenAmount;

/// The gated resource a v2 document prices.
#[skip_serializing_none]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceInfo {
    /// Resource URL.
    pub url: String,
    /// What the payment buys.
    #[serde(default)]
    pub description: Option<String>,
    /// Content type of the paid answer.
    #[serde(default)]
    pub mime_type: Option<String>,
}

/// One v2 accept option.
///
/// ```json
/// {
///   "scheme": "exact",
///   "network": "eip155:42220",
///   "amount": "10000",
///   "asset": "0xcebA9300f2b948710d2653dD7B07f33A8B32118C",
///   "payTo": "0x...",
///   "maxTimeoutSeconds": 600,
///   "extra": {}
/// }
/// ```
#[skip_serializing_none]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentRequirements {
    /// Payment scheme identifier.
    pub scheme: String,
    /// Network as `namespace:reference`.
    pub network: String,
    /// Atomic amount.
    #[serde(default)]
    pub amount: Option<TokenAmount>,
    /// Human price, used when no atomic amount is given.
    #[serde(default)]
    pub price: Option<String>,
    /// Stablecoin contract.
    pub asset: Address,
    /// Recipient address.
    pub pay_to: Address,
    /// Upper bound for the authorization window.
    #[serde(default)]
    pub max_timeout_seconds: Option<u64>,
    /// Token metadata.
    #[serde(default)]
    pub extra: Option<RequirementExtra>,
}

/// A v2 `402` document.
#[skip_serializing_none]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentRequired {
    /// Protocol version, always `2`.
    pub x402_version: u8,
    /// Server error message.
    #[serde(default)]
    pub error: Option<String>,
    /// Resource metadata shared by every accept option.
    #[serde(default)]
    pub resource: Option<ResourceInfo>,
    /// Raw accept options.
    pub accepts: Vec<Value>,
    /// Server-preferred network label.
    #[serde(default)]
    pub default_network: Option<String>,
}
