//! Decoding of paid and rejected answers.

use std::fmt;
use std::str::FromStr;

use http::StatusCode;
use p402::error::PaymentError;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// What a gated resource returns once paid, deciding how its body is decoded.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    /// Any JSON document.
    #[default]
    Json,
    /// A generation result: a JSON object.
    Generation,
    /// A transcription result: a JSON object with a `text` field.
    Transcription,
    /// Plain UTF-8 text.
    Text,
    /// Opaque bytes.
    Binary,
}

/// Wire format of a [`ResourceKind`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyFormat {
    /// JSON.
    Json,
    /// UTF-8 text.
    Text,
    /// Raw bytes.
    Binary,
}

impl ResourceKind {
    /// Wire format of the paid body.
    #[must_use]
    pub const fn format(self) -> BodyFormat {
        match self {
            Self::Json | Self::Generation | Self::Transcription => BodyFormat::Json,
            Self::Text => BodyFormat::Text,
            Self::Binary => BodyFormat::Binary,
        }
    }

    const fn as_str(self) -> &'static str {
        match self {
            Self::Json => "json",
            Self::Generation => "generation",
            Self::Transcription => "transcription",
            Self::Text => "text",
            Self::Binary => "binary",
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Unrecognized resource kind name.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown resource kind: {0}")]
pub struct UnknownResourceKind(String);

impl FromStr for ResourceKind {
    type Err = UnknownResourceKind;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "json" => Ok(Self::Json),
            "generation" => Ok(Self::Generation),
            "transcription" => Ok(Self::Transcription),
            "text" => Ok(Self::Text),
            "binary" | "raw" => Ok(Self::Binary),
            _ => Err(UnknownResourceKind(s.to_owned())),
        }
    }
}

/// A decoded paid body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PaidBody {
    /// JSON document. An empty body decodes to `null`.
    Json(Value),
    /// UTF-8 text.
    Text(String),
    /// Raw bytes.
    Binary(Vec<u8>),
    /// A paid answer whose body does not match the expected kind.
    Undecodable {
        /// Body as received.
        raw: Vec<u8>,
        /// Why decoding failed.
        error: String,
    },
}

impl PaidBody {
    /// Decodes `bytes` as `kind` requires.
    ///
    /// # Errors
    ///
    /// Returns [`PaymentError::MalformedResponse`] if the body does not have
    /// the expected shape.
    pub fn decode(kind: ResourceKind, bytes: &[u8]) -> Result<Self, PaymentError> {
        match kind.format() {
            BodyFormat::Binary => Ok(Self::Binary(bytes.to_vec())),
            BodyFormat::Text => String::from_utf8(bytes.to_vec())
                .map(Self::Text)
                .map_err(|e| malformed(kind, &e)),
            BodyFormat::Json => {
                if bytes.trim_ascii().is_empty() {
                    return Ok(Self::Json(Value::Null));
                }
                let value: Value = serde_json::from_slice(bytes).map_err(|e| malformed(kind, &e))?;
                validate(kind, &value)?;
                Ok(Self::Json(value))
            }
        }
    }

    /// Decodes `bytes` as `kind` requires, keeping the raw bytes when they
    /// do not fit.
    #[must_use]
    pub fn decode_or_raw(kind: ResourceKind, bytes: &[u8]) -> Self {
        Self::decode(kind, bytes).unwrap_or_else(|err| Self::Undecodable {
            raw: bytes.to_vec(),
            error: err.to_string(),
        })
    }

    /// Why the body could not be decoded.
    #[must_use]
    pub fn decode_error(&self) -> Option<&str> {
        match self {
            Self::Undecodable { error, .. } => Some(error.as_str()),
            _ => None,
        }
    }

    /// The JSON document, if this is one.
    #[must_use]
    pub const fn as_json(&self) -> Option<&Value> {
        match self {
            Self::Json(value) => Some(value),
            _ => None,
        }
    }

    /// The text, if this is text.
    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(text) => Some(text),
            _ => None,
        }
    }
}

fn validate(kind: ResourceKind, value: &Value) -> Result<(), PaymentError> {
    let valid = match kind {
        ResourceKind::Generation => value.is_object(),
        ResourceKind::Transcription => value.get("text").is_some_and(Value::is_string),
        _ => true,
    };
    if valid {
        Ok(())
    } else {
        Err(PaymentError::MalformedResponse(format!(
            "{kind} answer has an unexpected shape"
        )))
    }
}

fn malformed(kind: ResourceKind, err: &dyn fmt::Display) -> PaymentError {
    PaymentError::MalformedResponse(format!("{kind} answer: {err}"))
}

/// Error body of a rejected answer.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RejectionBody {
    /// Preferred human reason.
    #[serde(default)]
    pub reason: Option<Value>,
    /// Detailed explanation.
    #[serde(default)]
    pub details: Option<Value>,
    /// Error code or text.
    #[serde(default)]
    pub error: Option<Value>,
    /// Generic message.
    #[serde(default)]
    pub message: Option<Value>,
}

impl RejectionBody {
    /// The first non-empty of `reason`, `details`, `error` and `message`.
    /// Non-string values are rendered as JSON.
    #[must_use]
    pub fn message(&self) -> Option<String> {
        [&self.reason, &self.details, &self.error, &self.message]
            .into_iter()
            .flatten()
            .find_map(|value| match value {
                Value::Null => None,
                Value::String(text) if text.trim().is_empty() => None,
                Value::String(text) => Some(text.clone()),
                other => Some(other.to_string()),
            })
    }
}

/// Message describing a non-success answer: taken from the body when it
/// carries one, otherwise the status text.
#[must_use]
pub fn rejection_message(status: StatusCode, body: &[u8]) -> String {
    serde_json::from_slice::<RejectionBody>(body)
        .ok()
        .and_then(|body| body.message())
        .unwrap_or_else(|| {
            status
                .canonical_reason()
                .map_or_else(|| status.to_string(), str::to_owned)
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn decodes_by_kind() {
        assert_eq!(
            PaidBody::decode(ResourceKind::Json, br#"{"ok":true}"#).unwrap(),
            PaidBody::Json(json!({"ok": true}))
        );
        assert_eq!(
            PaidBody::decode(ResourceKind::Json, b"").unwrap(),
            PaidBody::Json(Value::Null)
        );
        assert_eq!(
            PaidBody::decode(ResourceKind::Text, b"hello").unwrap().as_text(),
            Some("hello")
        );
        assert_eq!(
            PaidBody::decode(ResourceKind::Binary, &[0xff, 0x00]).unwrap(),
            PaidBody::Binary(vec![0xff, 0x00])
        );
    }

    #[test]
    fn rejects_wrong_shapes() {
        assert!(PaidBody::decode(ResourceKind::Json, b"<html>").is_err());
        assert!(PaidBody::decode(ResourceKind::Text, &[0xff, 0xfe]).is_err());
        assert!(PaidBody::decode(ResourceKind::Generation, b"[1,2]").is_err());
        assert!(PaidBody::decode(ResourceKind::Transcription, br#"{"words":[]}"#).is_err());
        assert!(PaidBody::decode(ResourceKind::Transcription, br#"{"text":"hi"}"#).is_ok());
    }

    #[test]
    fn mismatched_bodies_are_kept_raw() {
        let body = PaidBody::decode_or_raw(ResourceKind::Generation, b"<html>ok</html>");
        assert!(matches!(&body, PaidBody::Undecodable { raw, .. } if raw == b"<html>ok</html>"));
        assert!(body.decode_error().is_some_and(|e| e.contains("generation")));
        assert_eq!(
            PaidBody::decode_or_raw(ResourceKind::Text, b"fine"),
            PaidBody::Text("fine".into())
        );
        assert_eq!(PaidBody::Text("fine".into()).decode_error(), None);
    }

    #[test]
    fn kind_names() {
        assert_eq!("Transcription".parse(), Ok(ResourceKind::Transcription));
        assert_eq!("raw".parse(), Ok(ResourceKind::Binary));
        assert!("video".parse::<ResourceKind>().is_err());
        assert_eq!(ResourceKind::Generation.to_string(), "generation");
    }

    #[test]
    fn rejection_message_preference() {
        let body = json!({
            "message": "generic",
            "error": "code",
            "details": {"needed": "10000"},
            "reason": "insufficient remote balance"
        });
        let bytes = serde_json::to_vec(&body).unwrap();
        assert_eq!(
            rejection_message(StatusCode::PAYMENT_REQUIRED, &bytes),
            "insufficient remote balance"
        );

        let bytes = serde_json::to_vec(&json!({"details": {"needed": "10000"}, "error": "x"})).unwrap();
        assert_eq!(
            rejection_message(StatusCode::BAD_REQUEST, &bytes),
            r#"{"needed":"10000"}"#
        );

        let bytes = serde_json::to_vec(&json!({"reason": "", "message": "try later"})).unwrap();
        assert_eq!(rejection_message(StatusCode::BAD_REQUEST, &bytes), "try later");
    }

    #[test]
    fn rejection_message_falls_back_to_status_text() {
        assert_eq!(
            rejection_message(StatusCode::FORBIDDEN, b"nope"),
            "Forbidden"
        );
        assert_eq!(rejection_message(StatusCode::CONFLICT, b"{}"), "Conflict");
    }
}
