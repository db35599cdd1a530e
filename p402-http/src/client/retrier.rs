//! Paid resubmission of pending calls.

use std::sync::Arc;

use http::StatusCode;
use p402::error::PaymentError;
use p402::networks::NetworkCatalog;
use p402::proto::{PaymentEnvelope, SettlementProof};
use tracing::{debug, info, instrument, warn};

use super::pending::{PaymentId, PendingActionStore, ProcessingGuard};
use super::response::{PaidBody, rejection_message};
use crate::constants::PAYMENT_SIGNATURE_HEADER;
use crate::headers::{encode_payment_signature, settlement_proof};

/// A paid call the resource accepted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settlement {
    /// Payment the call was made under.
    pub payment_id: PaymentId,
    /// HTTP status of the paid answer.
    pub status: u16,
    /// Settlement proof, when the resource returned one.
    pub proof: Option<SettlementProof>,
    /// Decoded paid body, or the raw bytes if they did not match the
    /// call's resource kind.
    pub body: PaidBody,
}

impl Settlement {
    /// Explorer link for the settlement transaction.
    #[must_use]
    pub fn explorer_url(&self) -> Option<String> {
        self.proof
            .as_ref()
            .and_then(|proof| proof.explorer_url(NetworkCatalog::global()))
    }
}

/// Reissues pending calls with a signed payment attached.
#[derive(Debug, Clone)]
pub struct ActionRetrier {
    http: reqwest::Client,
    pending: Arc<PendingActionStore>,
    guard: Arc<ProcessingGuard>,
}

impl ActionRetrier {
    /// Creates a retrier over shared session state.
    #[must_use]
    pub const fn new(
        http: reqwest::Client,
        pending: Arc<PendingActionStore>,
        guard: Arc<ProcessingGuard>,
    ) -> Self {
        Self {
            http,
            pending,
            guard,
        }
    }

    /// Reissues the call pending under `payment_id` exactly once, carrying
    /// `envelope` in the `PAYMENT-SIGNATURE` header.
    ///
    /// The pending entry is removed only when the resource accepts the
    /// payment. The guard is released on every path.
    ///
    /// # Errors
    ///
    /// - [`PaymentError::UnknownPaymentId`] if nothing is pending under the id
    /// - [`PaymentError::DuplicateSubmission`] if a submission for the id is
    ///   in flight; the network is not touched
    /// - [`PaymentError::RemoteRejected`] for a 4xx answer
    /// - [`PaymentError::TransportFailure`] for a transport error or 5xx answer
    /// - [`PaymentError::MalformedResponse`] for any other non-success answer
    ///
    /// A 2xx answer always settles; a body that does not match the call's
    /// resource kind is returned as [`PaidBody::Undecodable`].
    #[instrument(
        name = "p402.retrier.retry",
        skip_all,
        fields(payment_id = %payment_id, network = %envelope.network)
    )]
    pub async fn retry(
        &self,
        payment_id: &PaymentId,
        envelope: &PaymentEnvelope,
    ) -> Result<Settlement, PaymentError> {
        let call = self
            .pending
            .get(payment_id)
            .ok_or_else(|| PaymentError::UnknownPaymentId(payment_id.to_string()))?;
        let Some(_ticket) = self.guard.try_enter(payment_id) else {
            debug!("submission already in flight");
            return Err(PaymentError::DuplicateSubmission(payment_id.to_string()));
        };

        let header = encode_payment_signature(envelope)?;
        let response = call
            .request(&self.http)
            .header(PAYMENT_SIGNATURE_HEADER, header)
            .send()
            .await
            .map_err(|e| PaymentError::TransportFailure(e.to_string()))?;

        let status = response.status();
        let headers = response.headers().clone();
        let body = response
            .bytes()
            .await
            .map_err(|e| PaymentError::TransportFailure(e.to_string()))?;

        if status.is_success() {
            let proof = settlement_proof(&headers);
            self.pending.remove(payment_id);
            info!(
                status = status.as_u16(),
                transaction = proof.as_ref().map(|p| p.transaction_hash.as_str()),
                "payment settled"
            );
            let body = PaidBody::decode_or_raw(call.kind, &body);
            if let Some(error) = body.decode_error() {
                warn!(kind = %call.kind, error, "paid answer body does not match its kind");
            }
            return Ok(Settlement {
                payment_id: payment_id.clone(),
                status: status.as_u16(),
                proof,
                body,
            });
        }

        let message = rejection_message(status, &body);
        Err(classify_failure(status, message))
    }
}

fn classify_failure(status: StatusCode, message: String) -> PaymentError {
    if status.is_client_error() {
        warn!(status = status.as_u16(), %message, "payment rejected");
        PaymentError::RemoteRejected {
            status: status.as_u16(),
            message,
        }
    } else if status.is_server_error() {
        warn!(status = status.as_u16(), %message, "resource failed, payment may be resubmitted");
        PaymentError::TransportFailure(format!("{status}: {message}"))
    } else {
        PaymentError::MalformedResponse(format!("unexpected status {status}: {message}"))
    }
}
