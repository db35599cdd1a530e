//! Protocol v1 requirements documents.
//!
//! V1 names networks by legacy name (`"base-sepolia"`) and states the price
//! as `maxAmountRequired`.

use alloy_primitives::Address;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use serde_with::skip_serializing_none;

use super::RequirementExtra;
use crate::amount::TokenAmount;

/// One v1 accept option.
///
/// ```json
/// {
///   "scheme": "exact",
///   "network": "celo",
///   "maxAmountRequired": "10000",
///   "resource": "https://api.example.com/generate",
///   "payTo": "0x...",
///   "asset": "0xcebA9300f2b948710d2653dD7B07f33A8B32118C",
///   "maxTimeoutSeconds": 300,
///   "extra": { "name": "USD Coin", "version": "2" }
/// }
/// ```
#[skip_serializing_none]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentRequirements {
    /// Payment scheme identifier.
    pub scheme: String,
    /// Legacy network name.
    pub network: String,
    /// Atomic amount.
    #[serde(default)]
    pub max_amount_required: Option<TokenAmount>,
    /// Human price, used when no atomic amount is given.
    #[serde(default)]
    pub price: Option<String>,
    /// Resource URL.
    #[serde(default)]
    pub resource: Option<String>,
    /// Human-readable description.
    #[serde(default)]
    pub description: Option<String>,
    /// MIME type of the paid response.
    #[serde(default)]
    pub mime_type: Option<String>,
    /// Recipient address.
    pub pay_to: Address,
    /// Token contract address.
    pub asset: Address,
    /// Upper bound for the authorization window.
    #[serde(default)]
    pub max_timeout_seconds: Option<u64>,
    /// Token metadata.
    #[serde(default)]
    pub extra: Option<RequirementExtra>,
}

/// A v1 `402` document.
///
/// Accept options stay raw here so one unusable entry does not sink the
/// others; they are typed one by one during normalization.
#[skip_serializing_none]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentRequired {
    /// Protocol version, `1` or absent.
    #[serde(default)]
    pub x402_version: Option<u8>,
    /// Server error message.
    #[serde(default)]
    pub error: Option<String>,
    /// Raw accept options.
    pub accepts: Vec<Value>,
    /// Server-preferred network label.
    #[serde(default)]
    pub default_network: Option<String>,
}
