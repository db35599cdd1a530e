//! Base64 transport for header values.
//!
//! Every x402 header (`PAYMENT-REQUIRED`, `PAYMENT-SIGNATURE`,
//! `PAYMENT-RESPONSE`) carries standard-alphabet base64 of a JSON document.

use std::fmt::{self, Display, Formatter};

use base64::Engine;
use base64::engine::general_purpose::STANDARD as b64;
use serde::Serialize;
use serde::de::DeserializeOwned;

/// Failure to move a JSON document through a base64 header.
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    /// The header is not valid base64.
    #[error("invalid base64: {0}")]
    Base64(#[from] base64::DecodeError),
    /// The decoded bytes are not the expected JSON document.
    #[error("invalid json: {0}")]
    Json(#[from] serde_json::Error),
}

/// Bytes holding base64 text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Base64Bytes(pub Vec<u8>);

impl Base64Bytes {
    /// Decodes the base64 text to raw binary data.
    ///
    /// # Errors
    ///
    /// Returns an error if the data is not valid base64.
    pub fn decode(&self) -> Result<Vec<u8>, base64::DecodeError> {
        b64.decode(self.0.trim_ascii())
    }

    /// Encodes raw binary data into base64 text.
    pub fn encode<T: AsRef<[u8]>>(input: T) -> Self {
        Self(b64.encode(input.as_ref()).into_bytes())
    }

    /// Serializes `value` as JSON and encodes it.
    ///
    /// # Errors
    ///
    /// Returns an error if `value` cannot be serialized.
    pub fn encode_json<T: Serialize>(value: &T) -> Result<Self, serde_json::Error> {
        serde_json::to_vec(value).map(Self::encode)
    }

    /// Decodes the base64 text and parses the result as JSON.
    ///
    /// # Errors
    ///
    /// Returns [`DecodeError`] if either step fails.
    pub fn decode_json<T: DeserializeOwned>(&self) -> Result<T, DecodeError> {
        let raw = self.decode()?;
        Ok(serde_json::from_slice(&raw)?)
    }

    /// Returns the base64 text as a string.
    #[must_use]
    pub fn into_string(self) -> String {
        String::from_utf8_lossy(&self.0).into_owned()
    }
}

impl AsRef<[u8]> for Base64Bytes {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl From<&[u8]> for Base64Bytes {
    fn from(slice: &[u8]) -> Self {
        Self(slice.to_vec())
    }
}

impl From<&str> for Base64Bytes {
    fn from(text: &str) -> Self {
        Self(text.as_bytes().to_vec())
    }
}

impl Display for Base64Bytes {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", String::from_utf8_lossy(&self.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{Value, json};

    #[test]
    fn json_through_base64() {
        let doc = json!({"x402Version": 2, "accepts": []});
        let encoded = Base64Bytes::encode_json(&doc).unwrap();
        let decoded: Value = encoded.decode_json().unwrap();
        assert_eq!(decoded, doc);
    }

    #[test]
    fn surrounding_whitespace_is_ignored() {
        let encoded = Base64Bytes::from(" e30= \n");
        let decoded: Value = encoded.decode_json().unwrap();
        assert_eq!(decoded, json!({}));
    }

    #[test]
    fn reports_base64_and_json_failures_separately() {
        let err = Base64Bytes::from("%%%").decode_json::<Value>().unwrap_err();
        assert!(matches!(err, DecodeError::Base64(_)));
        let not_json = Base64Bytes::encode("plain text");
        let err = not_json.decode_json::<Value>().unwrap_err();
        assert!(matches!(err, DecodeError::Json(_)));
    }
}
