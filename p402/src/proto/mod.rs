//! Wire model for x402 payment negotiation.
//!
//! Servers speak two dialects of the requirements document. Both are parsed
//! strictly into a [`RequirementsDocument`], tagged by `x402Version`, and then
//! normalized into [`PaymentRequirements`]:
//!
//! - **v1** ([`v1`]): legacy network names and `maxAmountRequired`
//! - **v2** ([`v2`]): CAIP-2 identifiers, `amount`, document-level resource info
//!
//! The client always answers in v2 form through [`PaymentHeader`].

use alloy_primitives::Address;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use serde_with::skip_serializing_none;

use crate::amount::TokenAmount;
use crate::chain::ChainId;
use crate::encoding::Base64Bytes;
use crate::error::PaymentError;
use crate::networks::{NetworkCatalog, NetworkInfo};

mod payment;
pub mod v1;
pub mod v2;

pub use payment::{PaymentAuthorization, PaymentEnvelope, PaymentHeader, SettlementProof};

/// Protocol version the client submits payments with.
pub const X402_VERSION: u8 = 2;

/// The only supported payment scheme: a fixed amount moved by ERC-3009.
pub const SCHEME_EXACT: &str = "exact";

/// Dialect of a requirements document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProtocolVersion {
    /// Legacy names and `maxAmountRequired`.
    V1,
    /// CAIP-2 identifiers and `amount`.
    V2,
}

impl ProtocolVersion {
    /// Numeric `x402Version` value.
    #[must_use]
    pub const fn as_u8(self) -> u8 {
        match self {
            Self::V1 => 1,
            Self::V2 => 2,
        }
    }
}

/// Token metadata carried in a requirement's `extra` object.
///
/// Accepts both the `tokenName`/`tokenVersion` spelling and the shorter
/// `name`/`version` one.
#[skip_serializing_none]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequirementExtra {
    /// EIP-712 domain name of the token.
    #[serde(default, alias = "name")]
    pub token_name: Option<String>,
    /// EIP-712 domain version of the token.
    #[serde(default, alias = "version")]
    pub token_version: Option<String>,
    /// Legacy name of the network, when the document uses CAIP-2.
    #[serde(default)]
    pub legacy_network_name: Option<String>,
}

/// One normalized accept option.
///
/// Immutable once received. `network` is the resolved catalog entry,
/// `network_label` the label exactly as the server declared it, which the
/// paid header echoes back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentRequirement {
    /// Payment scheme, always [`SCHEME_EXACT`].
    pub scheme: String,
    /// Resolved network.
    pub network: &'static NetworkInfo,
    /// Network label as declared by the server.
    pub network_label: String,
    /// Atomic amount, when declared.
    pub amount: Option<TokenAmount>,
    /// Human price, when declared.
    pub price: Option<String>,
    /// Resource URL.
    pub resource: Option<String>,
    /// Human-readable description.
    pub description: Option<String>,
    /// MIME type of the paid response.
    pub mime_type: Option<String>,
    /// Recipient address.
    pub pay_to: Address,
    /// Token contract address.
    pub asset: Address,
    /// Upper bound for the authorization window.
    pub max_timeout_seconds: Option<u64>,
    /// Token metadata.
    pub extra: RequirementExtra,
}

impl PaymentRequirement {
    /// CAIP-2 identifier of the requirement's network.
    #[must_use]
    pub fn chain(&self) -> ChainId {
        self.network.caip2()
    }

    /// Numeric EIP-155 chain id of the requirement's network.
    #[must_use]
    pub const fn chain_id(&self) -> u64 {
        self.network.chain_id
    }
}

/// A requirements document, tagged by dialect.
#[derive(Debug, Clone, PartialEq)]
pub enum RequirementsDocument {
    /// Protocol v1 document.
    V1(v1::PaymentRequired),
    /// Protocol v2 document.
    V2(v2::PaymentRequired),
}

impl RequirementsDocument {
    /// Parses a JSON document, choosing the dialect from `x402Version`.
    ///
    /// An absent version or `1` selects v1, `2` selects v2; anything else is
    /// rejected.
    ///
    /// # Errors
    ///
    /// Returns [`PaymentError::MalformedRequirements`] when the document is not
    /// an object, has no `accepts` list, declares an unsupported version, or
    /// does not match its dialect.
    pub fn parse(value: Value) -> Result<Self, PaymentError> {
        let Value::Object(fields) = &value else {
            return Err(malformed("document is not a JSON object"));
        };
        let version = match fields.get("x402Version") {
            None | Some(Value::Null) => ProtocolVersion::V1,
            Some(raw) => match raw.as_u64() {
                Some(1) => ProtocolVersion::V1,
                Some(2) => ProtocolVersion::V2,
                _ => return Err(malformed(format!("unsupported x402Version {raw}"))),
            },
        };
        if !fields.contains_key("accepts") {
            return Err(malformed("document has no accepts list"));
        }
        let parsed = match version {
            ProtocolVersion::V1 => serde_json::from_value(value).map(Self::V1),
            ProtocolVersion::V2 => serde_json::from_value(value).map(Self::V2),
        };
        parsed.map_err(|e| malformed(e.to_string()))
    }

    /// Dialect of this document.
    #[must_use]
    pub const fn version(&self) -> ProtocolVersion {
        match self {
            Self::V1(_) => ProtocolVersion::V1,
            Self::V2(_) => ProtocolVersion::V2,
        }
    }

    /// Resolves every accept option against `catalog`.
    ///
    /// Options with another scheme are ignored. Options on unknown networks,
    /// with unusable fields, or paying in a token other than the network's
    /// stablecoin are skipped as long as at least one option remains.
    ///
    /// # Errors
    ///
    /// Returns [`PaymentError::UnknownNetwork`] when every exact option names
    /// an unknown network, and [`PaymentError::MalformedRequirements`] when no
    /// usable option remains for any other reason.
    pub fn normalize(self, catalog: &NetworkCatalog) -> Result<PaymentRequirements, PaymentError> {
        let version = self.version();
        let (accepts, default_label, error, resource) = match self {
            Self::V1(doc) => (doc.accepts, doc.default_network, doc.error, None),
            Self::V2(doc) => (doc.accepts, doc.default_network, doc.error, doc.resource),
        };
        if accepts.is_empty() {
            return Err(malformed("document lists no payment options"));
        }

        let mut usable = Vec::with_capacity(accepts.len());
        let mut first_unknown = None;
        let mut first_malformed = None;
        for (index, raw) in accepts.into_iter().enumerate() {
            match normalize_option(version, raw, resource.as_ref(), catalog) {
                Ok(Some(requirement)) => usable.push(requirement),
                Ok(None) => {}
                Err(PaymentError::UnknownNetwork(unknown)) => {
                    tracing::warn!(index, network = %unknown.0, "skipping accept option on unknown network");
                    first_unknown.get_or_insert(unknown);
                }
                Err(err) => {
                    tracing::warn!(index, error = %err, "skipping unusable accept option");
                    first_malformed.get_or_insert(err);
                }
            }
        }

        if usable.is_empty() {
            return Err(first_unknown
                .map(PaymentError::UnknownNetwork)
                .or(first_malformed)
                .unwrap_or_else(|| malformed("no accept option uses the exact scheme")));
        }

        let default_network = default_label.and_then(|label| match catalog.resolve_label(&label) {
            Ok(info) => Some(info.caip2()),
            Err(_) => {
                tracing::warn!(network = %label, "ignoring unknown default network");
                None
            }
        });

        Ok(PaymentRequirements {
            version,
            accepts: usable,
            default_network,
            error,
        })
    }
}

fn normalize_option(
    version: ProtocolVersion,
    raw: Value,
    resource: Option<&v2::ResourceInfo>,
    catalog: &NetworkCatalog,
) -> Result<Option<PaymentRequirement>, PaymentError> {
    let scheme = raw.get("scheme").and_then(Value::as_str).unwrap_or_default();
    if scheme != SCHEME_EXACT {
        tracing::debug!(scheme, "ignoring accept option with unsupported scheme");
        return Ok(None);
    }
    let label = raw
        .get("network")
        .and_then(Value::as_str)
        .ok_or_else(|| malformed("accept option has no network"))?
        .to_owned();
    let network = catalog.resolve_label(&label)?;

    let requirement = match version {
        ProtocolVersion::V1 => {
            let option: v1::PaymentRequirements =
                serde_json::from_value(raw).map_err(|e| malformed(format!("{label}: {e}")))?;
            PaymentRequirement {
                scheme: option.scheme,
                network,
                network_label: label,
                amount: option.max_amount_required,
                price: option.price,
                resource: option.resource,
                description: option.description,
                mime_type: option.mime_type,
                pay_to: option.pay_to,
                asset: option.asset,
                max_timeout_seconds: option.max_timeout_seconds,
                extra: option.extra.unwrap_or_default(),
            }
        }
        ProtocolVersion::V2 => {
            let option: v2::PaymentRequirements =
                serde_json::from_value(raw).map_err(|e| malformed(format!("{label}: {e}")))?;
            PaymentRequirement {
                scheme: option.scheme,
                network,
                network_label: label,
                amount: option.amount,
                price: option.price,
                resource: resource.map(|info| info.url.clone()),
                description: resource.and_then(|info| info.description.clone()),
                mime_type: resource.and_then(|info| info.mime_type.clone()),
                pay_to: option.pay_to,
                asset: option.asset,
                max_timeout_seconds: option.max_timeout_seconds,
                extra: option.extra.unwrap_or_default(),
            }
        }
    };

    if requirement.amount.is_none() && requirement.price.is_none() {
        return Err(malformed(format!(
            "{}: accept option has neither amount nor price",
            requirement.network_label
        )));
    }
    if requirement.asset != network.asset {
        return Err(malformed(format!(
            "{}: asset {} is not the {} stablecoin {}",
            requirement.network_label, requirement.asset, network.display_name, network.asset
        )));
    }
    Ok(Some(requirement))
}

fn malformed(reason: impl Into<String>) -> PaymentError {
    PaymentError::MalformedRequirements(reason.into())
}

/// A normalized requirements document: the ordered accept options a client
/// can choose from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentRequirements {
    /// Dialect the server used.
    pub version: ProtocolVersion,
    /// Usable accept options, in server order. Never empty.
    pub accepts: Vec<PaymentRequirement>,
    /// Server-preferred network, if declared and known.
    pub default_network: Option<ChainId>,
    /// Server error message.
    pub error: Option<String>,
}

impl PaymentRequirements {
    /// Parses and normalizes a JSON document.
    ///
    /// # Errors
    ///
    /// See [`RequirementsDocument::parse`] and [`RequirementsDocument::normalize`].
    pub fn from_value(value: Value, catalog: &NetworkCatalog) -> Result<Self, PaymentError> {
        RequirementsDocument::parse(value)?.normalize(catalog)
    }

    /// Parses and normalizes a JSON body.
    ///
    /// # Errors
    ///
    /// Returns [`PaymentError::MalformedRequirements`] for non-JSON input, and
    /// otherwise behaves like [`PaymentRequirements::from_value`].
    pub fn from_slice(body: &[u8], catalog: &NetworkCatalog) -> Result<Self, PaymentError> {
        let value = serde_json::from_slice(body).map_err(|e| malformed(e.to_string()))?;
        Self::from_value(value, catalog)
    }

    /// Parses and normalizes a base64 `PAYMENT-REQUIRED` header.
    ///
    /// # Errors
    ///
    /// Returns [`PaymentError::MalformedRequirements`] for invalid base64 or
    /// JSON, and otherwise behaves like [`PaymentRequirements::from_value`].
    pub fn from_header(header: &str, catalog: &NetworkCatalog) -> Result<Self, PaymentError> {
        let value = Base64Bytes::from(header)
            .decode_json::<Value>()
            .map_err(|e| malformed(e.to_string()))?;
        Self::from_value(value, catalog)
    }

    /// Index of the first option on `chain`.
    #[must_use]
    pub fn position(&self, chain: &ChainId) -> Option<usize> {
        self.accepts
            .iter()
            .position(|requirement| chain.as_eip155() == Some(requirement.chain_id()))
    }

    /// Index of the first option on the numeric chain `chain_id`.
    #[must_use]
    pub fn position_of_chain_id(&self, chain_id: u64) -> Option<usize> {
        self.accepts
            .iter()
            .position(|requirement| requirement.chain_id() == chain_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const PAY_TO: &str = "0x209693Bc6afc0C5328bA36FaF03C514EF312287C";
    const CELO_USDC: &str = "0xcebA9300f2b948710d2653dD7B07f33A8B32118C";
    const BASE_USDC: &str = "0x833589fCD6eDb6E08f4c7C32D4f71b54bdA02913";

    fn catalog() -> &'static NetworkCatalog {
        NetworkCatalog::global()
    }

    #[test]
    fn parses_v1_document_without_version() {
        let doc = json!({
            "accepts": [{
                "scheme": "exact",
                "network": "celo",
                "maxAmountRequired": "10000",
                "resource": "https://api.example.com/generate",
                "description": "Image generation",
                "payTo": PAY_TO,
                "asset": CELO_USDC,
                "maxTimeoutSeconds": 300,
                "extra": { "name": "USD Coin", "version": "2" }
            }]
        });
        let requirements = PaymentRequirements::from_value(doc, catalog()).unwrap();
        assert_eq!(requirements.version, ProtocolVersion::V1);
        let celo = &requirements.accepts[0];
        assert_eq!(celo.chain_id(), 42220);
        assert_eq!(celo.network_label, "celo");
        assert_eq!(celo.amount, Some(TokenAmount::from(10_000u64)));
        assert_eq!(celo.extra.token_name.as_deref(), Some("USD Coin"));
        assert_eq!(celo.max_timeout_seconds, Some(300));
        assert_eq!(
            celo.resource.as_deref(),
            Some("https://api.example.com/generate")
        );
    }

    #[test]
    fn parses_v2_document_with_resource_info() {
        let doc = json!({
            "x402Version": 2,
            "resource": { "url": "https://api.example.com/data", "description": "Market data" },
            "accepts": [{
                "scheme": "exact",
                "network": "eip155:8453",
                "amount": "1000000",
                "asset": BASE_USDC,
                "payTo": PAY_TO,
                "maxTimeoutSeconds": 60,
                "extra": { "tokenName": "USD Coin", "tokenVersion": "2" }
            }],
            "defaultNetwork": "eip155:8453"
        });
        let requirements = PaymentRequirements::from_value(doc, catalog()).unwrap();
        assert_eq!(requirements.version, ProtocolVersion::V2);
        assert_eq!(requirements.default_network, Some(ChainId::eip155(8453)));
        let base = &requirements.accepts[0];
        assert_eq!(base.network_label, "eip155:8453");
        assert_eq!(base.description.as_deref(), Some("Market data"));
        assert_eq!(base.extra.token_version.as_deref(), Some("2"));
    }

    #[test]
    fn empty_object_is_malformed() {
        let err = PaymentRequirements::from_value(json!({}), catalog()).unwrap_err();
        assert!(matches!(err, PaymentError::MalformedRequirements(_)));
    }

    #[test]
    fn unsupported_version_is_rejected() {
        let doc = json!({ "x402Version": 3, "accepts": [] });
        let err = RequirementsDocument::parse(doc).unwrap_err();
        assert!(matches!(err, PaymentError::MalformedRequirements(m) if m.contains('3')));
    }

    #[test]
    fn v2_fields_do_not_satisfy_v1() {
        let doc = json!({
            "x402Version": 1,
            "accepts": [{
                "scheme": "exact",
                "network": "base",
                "amount": "1000000",
                "asset": BASE_USDC,
                "payTo": PAY_TO
            }]
        });
        let err = PaymentRequirements::from_value(doc, catalog()).unwrap_err();
        assert!(matches!(err, PaymentError::MalformedRequirements(_)));
    }

    #[test]
    fn unknown_networks_are_skipped() {
        let doc = json!({
            "accepts": [
                {
                    "scheme": "exact",
                    "network": "solana",
                    "maxAmountRequired": "10000",
                    "payTo": "2wKupLR9q6wXYppw8Gr2NvWxKBUqm4PPJKkQfoxHDBg4",
                    "asset": "EPjFWdd5AufqSSqeM2qN1xzybapC8G4wEGGkZwyTDt1v"
                },
                {
                    "scheme": "exact",
                    "network": "base",
                    "maxAmountRequired": "10000",
                    "payTo": PAY_TO,
                    "asset": BASE_USDC
                }
            ],
            "defaultNetwork": "solana"
        });
        let requirements = PaymentRequirements::from_value(doc, catalog()).unwrap();
        assert_eq!(requirements.accepts.len(), 1);
        assert_eq!(requirements.accepts[0].chain_id(), 8453);
        assert_eq!(requirements.default_network, None);
    }

    #[test]
    fn foreign_assets_are_skipped() {
        let foreign = "0x471EcE3750Da237f93B8E339c536989b8978a438";
        let option = |asset: &str| {
            json!({
                "scheme": "exact",
                "network": "celo",
                "maxAmountRequired": "10000",
                "payTo": PAY_TO,
                "asset": asset
            })
        };
        let doc = json!({ "accepts": [option(foreign), option(CELO_USDC)] });
        let requirements = PaymentRequirements::from_value(doc, catalog()).unwrap();
        assert_eq!(requirements.accepts.len(), 1);
        assert_eq!(requirements.accepts[0].asset, requirements.accepts[0].network.asset);

        let doc = json!({ "accepts": [option(foreign)] });
        let err = PaymentRequirements::from_value(doc, catalog()).unwrap_err();
        assert!(matches!(&err, PaymentError::MalformedRequirements(m) if m.contains("not the Celo stablecoin")));
    }

    #[test]
    fn only_unknown_networks_is_unknown_network() {
        let doc = json!({
            "accepts": [{
                "scheme": "exact",
                "network": "fantom",
                "maxAmountRequired": "10000",
                "payTo": PAY_TO,
                "asset": BASE_USDC
            }]
        });
        let err = PaymentRequirements::from_value(doc, catalog()).unwrap_err();
        assert!(matches!(err, PaymentError::UnknownNetwork(n) if n.0 == "fantom"));
    }

    #[test]
    fn other_schemes_are_ignored() {
        let doc = json!({
            "accepts": [{
                "scheme": "upto",
                "network": "base",
                "maxAmountRequired": "10000",
                "payTo": PAY_TO,
                "asset": BASE_USDC
            }]
        });
        let err = PaymentRequirements::from_value(doc, catalog()).unwrap_err();
        assert!(matches!(err, PaymentError::MalformedRequirements(_)));
    }

    #[test]
    fn option_needs_amount_or_price() {
        let doc = json!({
            "accepts": [{
                "scheme": "exact",
                "network": "base",
                "payTo": PAY_TO,
                "asset": BASE_USDC
            }]
        });
        let err = PaymentRequirements::from_value(doc, catalog()).unwrap_err();
        assert!(matches!(err, PaymentError::MalformedRequirements(_)));

        let priced = json!({
            "accepts": [{
                "scheme": "exact",
                "network": "base",
                "price": "$0.01",
                "payTo": PAY_TO,
                "asset": BASE_USDC
            }]
        });
        let requirements = PaymentRequirements::from_value(priced, catalog()).unwrap();
        assert_eq!(requirements.accepts[0].price.as_deref(), Some("$0.01"));
    }

    #[test]
    fn header_form_is_base64_json() {
        let doc = json!({
            "x402Version": 2,
            "accepts": [{
                "scheme": "exact",
                "network": "eip155:42220",
                "amount": "10000",
                "asset": CELO_USDC,
                "payTo": PAY_TO
            }]
        });
        let header = Base64Bytes::encode_json(&doc).unwrap().into_string();
        let requirements = PaymentRequirements::from_header(&header, catalog()).unwrap();
        assert_eq!(requirements.position(&ChainId::eip155(42220)), Some(0));
        assert_eq!(requirements.position_of_chain_id(8453), None);

        let err = PaymentRequirements::from_header("not base64!", catalog()).unwrap_err();
        assert!(matches!(err, PaymentError::MalformedRequirements(_)));
    }
}
