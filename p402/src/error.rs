//! Error taxonomy for payment negotiation.
//!
//! Every failure a negotiation can surface is a [`PaymentError`]. Variants are
//! grouped by how a caller reacts to them: fatal for the document, recoverable
//! by user action, advisory, or retriable with the same signed envelope.

use crate::amount::AmountError;
use crate::chain::ChainIdFormatError;
use crate::encoding::DecodeError;
use crate::networks::UnknownNetwork;
use crate::timestamp::UnixTimestamp;

/// Base error type for client-side payment operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PaymentError {
    /// The requirements document could not be parsed.
    #[error("malformed payment requirements: {0}")]
    MalformedRequirements(String),

    /// A requirement names a network outside the catalog.
    #[error(transparent)]
    UnknownNetwork(#[from] UnknownNetwork),

    /// The wallet is connected to a different chain than the requirement.
    #[error("wallet is on chain {active}, payment requires chain {required}")]
    WrongActiveChain {
        /// Chain the wallet reports.
        active: u64,
        /// Chain the selected requirement is on.
        required: u64,
    },

    /// The user refused to sign.
    #[error("signature request was declined")]
    SignatureDeclined,

    /// The payer balance is below the required amount. Advisory only.
    #[error("insufficient balance: have {available}, need {required}")]
    InsufficientBalance {
        /// Formatted balance.
        available: String,
        /// Formatted required amount.
        required: String,
    },

    /// A submission for this payment is already in flight.
    #[error("payment {0} is already being submitted")]
    DuplicateSubmission(String),

    /// The resource answered the paid request with a client error.
    #[error("payment rejected ({status}): {message}")]
    RemoteRejected {
        /// HTTP status code.
        status: u16,
        /// Message taken from the response body, or the status text.
        message: String,
    },

    /// The paid request did not produce a definitive answer.
    #[error("transport failure: {0}")]
    TransportFailure(String),

    /// The price could not be turned into atomic units.
    #[error("invalid amount: {0}")]
    InvalidAmount(#[from] AmountError),

    /// No pending action is registered under this payment id.
    #[error("no pending payment with id {0}")]
    UnknownPaymentId(String),

    /// A pending action is already registered under this payment id.
    #[error("payment {0} is already pending")]
    AlreadyPending(String),

    /// The operation does not apply to the negotiation's current state.
    #[error("invalid negotiation state: {0}")]
    InvalidState(String),

    /// The signed authorization is past its `validBefore`.
    #[error("signed authorization expired at {0}")]
    SignatureExpired(UnixTimestamp),

    /// The resource answered without asking for payment.
    #[error("resource answered {status} without requesting payment")]
    PaymentNotRequired {
        /// HTTP status code of the unpaid answer.
        status: u16,
    },

    /// The wallet failed for a reason other than user refusal.
    #[error("wallet error: {0}")]
    Wallet(String),

    /// A response could not be decoded.
    #[error("malformed response: {0}")]
    MalformedResponse(String),

    /// A value could not be encoded for transport.
    #[error("encoding error: {0}")]
    Encoding(String),
}

impl PaymentError {
    /// Returns `true` if resubmitting the same signed envelope may succeed.
    #[must_use]
    pub const fn is_retriable(&self) -> bool {
        matches!(self, Self::TransportFailure(_))
    }

    /// Returns `true` if recovering requires a new signature.
    #[must_use]
    pub const fn requires_new_signature(&self) -> bool {
        matches!(
            self,
            Self::SignatureDeclined | Self::SignatureExpired(_) | Self::RemoteRejected { .. }
        )
    }

    /// Returns `true` if the requirements document cannot be used at all.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(self, Self::MalformedRequirements(_))
    }
}

impl From<ChainIdFormatError> for PaymentError {
    fn from(value: ChainIdFormatError) -> Self {
        Self::MalformedRequirements(value.to_string())
    }
}

impl From<DecodeError> for PaymentError {
    fn from(value: DecodeError) -> Self {
        Self::MalformedResponse(value.to_string())
    }
}

impl From<serde_json::Error> for PaymentError {
    fn from(value: serde_json::Error) -> Self {
        Self::Encoding(value.to_string())
    }
}
