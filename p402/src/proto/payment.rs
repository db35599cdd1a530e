use alloy_primitives::{Address, B256, Bytes};
use serde::{Deserialize, Serialize};
use serde_with::skip_serializing_none;

use super::{SCHEME_EXACT, X402_VERSION};
use crate::amount::TokenAmount;
use crate::encoding::Base64Bytes;
use crate::error::PaymentError;
use crate::networks::NetworkCatalog;
use crate::timestamp::UnixTimestamp;

/// ERC-3009 authorization in transport form.
///
/// Amounts and timestamps are decimal strings on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentAuthorization {
    /// Payer address.
    pub from: Address,
    /// Recipient address.
    pub to: Address,
    /// Atomic amount.
    pub value: TokenAmount,
    /// Earliest time the authorization can be executed.
    pub valid_after: UnixTimestamp,
    /// Time the authorization expires.
    pub valid_before: UnixTimestamp,
    /// Random 32-byte nonce.
    pub nonce: B256,
}

/// A signed authorization, ready to attach to the paid request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentEnvelope {
    /// Network label as declared by the server.
    pub network: String,
    /// The signed authorization.
    pub authorization: PaymentAuthorization,
    /// 65-byte EIP-712 signature.
    pub signature: Bytes,
}

impl PaymentEnvelope {
    /// Returns `true` once `validBefore` has been reached.
    #[must_use]
    pub fn is_expired(&self, now: UnixTimestamp) -> bool {
        self.authorization.valid_before.has_passed(now)
    }
}

/// Decoded `PAYMENT-SIGNATURE` header.
///
/// ```json
/// {
///   "x402Version": 2,
///   "scheme": "exact",
///   "network": "celo",
///   "payload": { "network": "celo", "authorization": { ... }, "signature": "0x..." }
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentHeader {
    /// Always [`X402_VERSION`].
    pub x402_version: u8,
    /// Always [`SCHEME_EXACT`].
    pub scheme: String,
    /// Network label as declared by the server.
    pub network: String,
    /// The signed envelope.
    pub payload: PaymentEnvelope,
}

impl PaymentHeader {
    /// Wraps an envelope.
    #[must_use]
    pub fn new(envelope: PaymentEnvelope) -> Self {
        Self {
            x402_version: X402_VERSION,
            scheme: SCHEME_EXACT.to_owned(),
            network: envelope.network.clone(),
            payload: envelope,
        }
    }

    /// Encodes the header value.
    ///
    /// # Errors
    ///
    /// Returns [`PaymentError::Encoding`] if serialization fails.
    pub fn encode(&self) -> Result<String, PaymentError> {
        Ok(Base64Bytes::encode_json(self)?.into_string())
    }

    /// Decodes a header value.
    ///
    /// # Errors
    ///
    /// Returns [`PaymentError::MalformedResponse`] for invalid base64 or JSON.
    pub fn decode(header: &str) -> Result<Self, PaymentError> {
        Ok(Base64Bytes::from(header).decode_json()?)
    }
}

/// Settlement proof returned in `PAYMENT-RESPONSE`.
///
/// Older servers send `transaction` instead of `transactionHash`.
#[skip_serializing_none]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SettlementProof {
    /// Settlement transaction hash.
    #[serde(alias = "transaction")]
    pub transaction_hash: String,
    /// Network label the payment settled on.
    pub network: String,
    /// Payer address.
    #[serde(default)]
    pub payer: Option<String>,
    /// Settlement outcome, when reported.
    #[serde(default)]
    pub success: Option<bool>,
}

impl SettlementProof {
    /// Decodes a header value.
    ///
    /// # Errors
    ///
    /// Returns [`PaymentError::MalformedResponse`] for invalid base64 or JSON.
    pub fn decode(header: &str) -> Result<Self, PaymentError> {
        Ok(Base64Bytes::from(header).decode_json()?)
    }

    /// Explorer link for the settlement transaction, if the network is known.
    #[must_use]
    pub fn explorer_url(&self, catalog: &NetworkCatalog) -> Option<String> {
        catalog
            .resolve_label(&self.network)
            .ok()
            .map(|info| info.explorer_tx_url(&self.transaction_hash))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::{U256, address, b256};
    use serde_json::{Value, json};

    fn envelope() -> PaymentEnvelope {
        PaymentEnvelope {
            network: "celo".into(),
            authorization: PaymentAuthorization {
                from: address!("f39Fd6e51aad88F6F4ce6aB8827279cffFb92266"),
                to: address!("209693Bc6afc0C5328bA36FaF03C514EF312287C"),
                value: TokenAmount(U256::from(10_000u64)),
                valid_after: UnixTimestamp::EPOCH,
                valid_before: UnixTimestamp::from_secs(1_700_003_600),
                nonce: b256!("0x1111111111111111111111111111111111111111111111111111111111111111"),
            },
            signature: Bytes::from(vec![0xab; 65]),
        }
    }

    #[test]
    fn header_round_trips_field_for_field() {
        let header = PaymentHeader::new(envelope());
        let encoded = header.encode().unwrap();
        let decoded = PaymentHeader::decode(&encoded).unwrap();
        assert_eq!(decoded, header);
        assert_eq!(decoded.x402_version, 2);
        assert_eq!(decoded.scheme, "exact");
        assert_eq!(decoded.network, "celo");
    }

    #[test]
    fn header_amounts_are_decimal_strings() {
        let encoded = PaymentHeader::new(envelope()).encode().unwrap();
        let raw: Value = Base64Bytes::from(encoded.as_str()).decode_json().unwrap();
        let authorization = &raw["payload"]["authorization"];
        assert_eq!(authorization["value"], json!("10000"));
        assert_eq!(authorization["validAfter"], json!("0"));
        assert_eq!(authorization["validBefore"], json!("1700003600"));
        assert!(raw["payload"]["signature"].as_str().unwrap().starts_with("0x"));
    }

    #[test]
    fn envelope_expiry() {
        let envelope = envelope();
        assert!(!envelope.is_expired(UnixTimestamp::from_secs(1_700_003_599)));
        assert!(envelope.is_expired(UnixTimestamp::from_secs(1_700_003_600)));
    }

    #[test]
    fn settlement_proof_accepts_legacy_field() {
        let encoded = Base64Bytes::encode_json(&json!({
            "success": true,
            "transaction": "0xdeadbeef",
            "network": "eip155:42220",
            "payer": "0xf39Fd6e51aad88F6F4ce6aB8827279cffFb92266"
        }))
        .unwrap()
        .into_string();
        let proof = SettlementProof::decode(&encoded).unwrap();
        assert_eq!(proof.transaction_hash, "0xdeadbeef");
        assert_eq!(proof.success, Some(true));
        assert_eq!(
            proof.explorer_url(NetworkCatalog::global()).as_deref(),
            Some("https://celoscan.io/tx/0xdeadbeef")
        );
    }

    #[test]
    fn settlement_proof_on_unknown_network_has_no_link() {
        let proof = SettlementProof {
            transaction_hash: "0x01".into(),
            network: "solana".into(),
            payer: None,
            success: None,
        };
        assert_eq!(proof.explorer_url(NetworkCatalog::global()), None);
        assert!(SettlementProof::decode("e30=").is_err());
    }
}
