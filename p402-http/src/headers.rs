//! Header encoding and decoding for the x402 exchange.
//!
//! Requirements arrive base64-encoded in `PAYMENT-REQUIRED` or as the JSON
//! body of the 402 answer. The signed payment leaves in `PAYMENT-SIGNATURE`
//! and the settlement proof comes back in `PAYMENT-RESPONSE` (or the legacy
//! `X-PAYMENT-RESPONSE`).

use http::HeaderMap;
use p402::error::PaymentError;
use p402::networks::NetworkCatalog;
use p402::proto::{PaymentEnvelope, PaymentHeader, PaymentRequirements, SettlementProof};

use crate::constants::{
    PAYMENT_REQUIRED_HEADER, PAYMENT_RESPONSE_HEADER, X_PAYMENT_RESPONSE_HEADER,
};

/// Encodes an envelope as the `PAYMENT-SIGNATURE` header value.
///
/// # Errors
///
/// Returns [`PaymentError::Encoding`] if serialization fails.
pub fn encode_payment_signature(envelope: &PaymentEnvelope) -> Result<String, PaymentError> {
    PaymentHeader::new(envelope.clone()).encode()
}

/// Extracts the requirements document from a 402 answer.
///
/// The `PAYMENT-REQUIRED` header wins when present; otherwise the body is
/// parsed as JSON.
///
/// # Errors
///
/// Returns [`PaymentError::MalformedRequirements`] when neither source holds
/// a usable document, and [`PaymentError::UnknownNetwork`] when no option is
/// on a supported network.
pub fn decode_payment_required(
    headers: &HeaderMap,
    body: &[u8],
    catalog: &NetworkCatalog,
) -> Result<PaymentRequirements, PaymentError> {
    if let Some(value) = headers.get(PAYMENT_REQUIRED_HEADER) {
        let header = value
            .to_str()
            .map_err(|e| PaymentError::MalformedRequirements(e.to_string()))?;
        tracing::trace!("requirements taken from header");
        return PaymentRequirements::from_header(header, catalog);
    }
    if body.trim_ascii().is_empty() {
        return Err(PaymentError::MalformedRequirements(
            "402 answer carries no payment requirements".to_owned(),
        ));
    }
    PaymentRequirements::from_slice(body, catalog)
}

/// Reads the settlement proof from a paid answer, if any.
///
/// A proof that fails to decode is logged and ignored.
#[must_use]
pub fn settlement_proof(headers: &HeaderMap) -> Option<SettlementProof> {
    let value = headers
        .get(PAYMENT_RESPONSE_HEADER)
        .or_else(|| headers.get(X_PAYMENT_RESPONSE_HEADER))?;
    let decoded = value
        .to_str()
        .map_err(|e| PaymentError::MalformedResponse(e.to_string()))
        .and_then(SettlementProof::decode);
    match decoded {
        Ok(proof) => Some(proof),
        Err(err) => {
            tracing::warn!(error = %err, "ignoring malformed settlement proof");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::HeaderValue;
    use p402::encoding::Base64Bytes;
    use serde_json::json;

    fn document() -> serde_json::Value {
        json!({
            "x402Version": 2,
            "accepts": [{
                "scheme": "exact",
                "network": "eip155:42220",
                "amount": "10000",
                "asset": "0xcebA9300f2b948710d2653dD7B07f33A8B32118C",
                "payTo": "0x209693Bc6afc0C5328bA36FaF03C514EF312287C",
                "maxTimeoutSeconds": 300
            }]
        })
    }

    #[test]
    fn header_takes_precedence_over_body() {
        let encoded = Base64Bytes::encode_json(&document()).unwrap().into_string();
        let mut headers = HeaderMap::new();
        headers.insert(
            "payment-required",
            HeaderValue::from_str(&encoded).unwrap(),
        );
        let requirements =
            decode_payment_required(&headers, b"not json", NetworkCatalog::global()).unwrap();
        assert_eq!(requirements.accepts.len(), 1);
        assert_eq!(requirements.accepts[0].chain_id(), 42220);
    }

    #[test]
    fn body_is_used_without_header() {
        let body = serde_json::to_vec(&document()).unwrap();
        let requirements =
            decode_payment_required(&HeaderMap::new(), &body, NetworkCatalog::global()).unwrap();
        assert_eq!(requirements.accepts[0].network_label, "eip155:42220");
    }

    #[test]
    fn empty_answer_is_malformed() {
        let err = decode_payment_required(&HeaderMap::new(), b"  ", NetworkCatalog::global())
            .unwrap_err();
        assert!(matches!(err, PaymentError::MalformedRequirements(_)));
    }

    #[test]
    fn settlement_proof_falls_back_to_legacy_header() {
        let encoded = Base64Bytes::encode_json(&json!({
            "transactionHash": "0xabc",
            "network": "celo"
        }))
        .unwrap()
        .into_string();
        let mut headers = HeaderMap::new();
        headers.insert(
            "x-payment-response",
            HeaderValue::from_str(&encoded).unwrap(),
        );
        let proof = settlement_proof(&headers).unwrap();
        assert_eq!(proof.transaction_hash, "0xabc");

        let mut broken = HeaderMap::new();
        broken.insert("payment-response", HeaderValue::from_static("%%%"));
        assert_eq!(settlement_proof(&broken), None);
    }
}
