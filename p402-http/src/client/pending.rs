//! Pending paid calls and the in-flight submission guard.
//!
//! A [`PaidCall`] is registered in the [`PendingActionStore`] when its first
//! 402 answer is observed and stays there until a paid resubmission succeeds.
//! The [`ProcessingGuard`] makes sure one payment id is submitted at most once
//! at a time.

use std::fmt;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use dashmap::mapref::entry::Entry;
use dashmap::{DashMap, DashSet};
use http::header::{CONTENT_TYPE, HeaderName, HeaderValue};
use http::{HeaderMap, Method};
use p402::error::PaymentError;
use rand::{RngExt, rng};
use serde::Serialize;
use url::Url;

use super::response::ResourceKind;

/// Client-generated identifier of one logical paid call.
///
/// Composed of the creation time in milliseconds and a random suffix.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PaymentId(String);

impl PaymentId {
    /// Generates a fresh id.
    #[must_use]
    pub fn generate() -> Self {
        let millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_or(0, |elapsed| elapsed.as_millis());
        let suffix: u64 = rng().random();
        Self(format!("pay_{millis}_{suffix:016x}"))
    }

    /// The id as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PaymentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for PaymentId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for PaymentId {
    fn from(value: &str) -> Self {
        Self(value.to_owned())
    }
}

/// A call to a gated resource, kept verbatim so it can be reissued with a
/// payment attached.
#[derive(Debug, Clone)]
pub struct PaidCall {
    /// HTTP method.
    pub method: Method,
    /// Resource URL.
    pub url: Url,
    /// Request headers, without any payment header.
    pub headers: HeaderMap,
    /// Opaque request body.
    pub body: Vec<u8>,
    /// How the paid answer is decoded.
    pub kind: ResourceKind,
    /// Human description shown while the payment is pending.
    pub description: Option<String>,
}

impl PaidCall {
    /// A call with no headers and an empty body.
    #[must_use]
    pub fn new(method: Method, url: Url) -> Self {
        Self {
            method,
            url,
            headers: HeaderMap::new(),
            body: Vec::new(),
            kind: ResourceKind::default(),
            description: None,
        }
    }

    /// A `GET` call.
    #[must_use]
    pub fn get(url: Url) -> Self {
        Self::new(Method::GET, url)
    }

    /// A `POST` call with a JSON body.
    ///
    /// # Errors
    ///
    /// Returns [`PaymentError::Encoding`] if `body` cannot be serialized.
    pub fn post_json<T: Serialize + ?Sized>(url: Url, body: &T) -> Result<Self, PaymentError> {
        let body = serde_json::to_vec(body)?;
        Ok(Self::new(Method::POST, url)
            .with_header(CONTENT_TYPE, HeaderValue::from_static("application/json"))
            .with_body(body))
    }

    /// Adds a header.
    #[must_use]
    pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// Replaces the body.
    #[must_use]
    pub fn with_body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = body.into();
        self
    }

    /// Sets how the paid answer is decoded.
    #[must_use]
    pub const fn with_kind(mut self, kind: ResourceKind) -> Self {
        self.kind = kind;
        self
    }

    /// Sets the human description.
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub(crate) fn request(&self, http: &reqwest::Client) -> reqwest::RequestBuilder {
        let builder = http
            .request(self.method.clone(), self.url.clone())
            .headers(self.headers.clone());
        if self.body.is_empty() {
            builder
        } else {
            builder.body(self.body.clone())
        }
    }
}

/// Calls awaiting payment, keyed by payment id.
#[derive(Debug, Default)]
pub struct PendingActionStore {
    actions: DashMap<PaymentId, PaidCall>,
}

impl PendingActionStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a call under `id`.
    ///
    /// # Errors
    ///
    /// Returns [`PaymentError::AlreadyPending`] if `id` is already registered.
    pub fn register(&self, id: PaymentId, call: PaidCall) -> Result<(), PaymentError> {
        match self.actions.entry(id) {
            Entry::Occupied(entry) => Err(PaymentError::AlreadyPending(entry.key().to_string())),
            Entry::Vacant(entry) => {
                tracing::debug!(payment_id = %entry.key(), url = %call.url, "pending action registered");
                entry.insert(call);
                Ok(())
            }
        }
    }

    /// A copy of the call registered under `id`.
    #[must_use]
    pub fn get(&self, id: &PaymentId) -> Option<PaidCall> {
        self.actions.get(id).map(|entry| entry.value().clone())
    }

    /// Removes and returns the call registered under `id`.
    pub fn remove(&self, id: &PaymentId) -> Option<PaidCall> {
        self.actions.remove(id).map(|(_, call)| call)
    }

    /// Whether `id` is registered.
    #[must_use]
    pub fn contains(&self, id: &PaymentId) -> bool {
        self.actions.contains_key(id)
    }

    /// Number of pending calls.
    #[must_use]
    pub fn len(&self) -> usize {
        self.actions.len()
    }

    /// Whether no call is pending.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }
}

/// Payment ids currently being submitted.
#[derive(Debug, Default)]
pub struct ProcessingGuard {
    active: DashSet<PaymentId>,
}

impl ProcessingGuard {
    /// Creates an empty guard.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Marks `id` as submitting. Returns `None` if it already is.
    ///
    /// The mark is released when the returned ticket is dropped.
    #[must_use]
    pub fn try_enter(self: &Arc<Self>, id: &PaymentId) -> Option<GuardTicket> {
        self.active.insert(id.clone()).then(|| GuardTicket {
            guard: Arc::clone(self),
            id: id.clone(),
        })
    }

    /// Whether `id` is being submitted.
    #[must_use]
    pub fn contains(&self, id: &PaymentId) -> bool {
        self.active.contains(id)
    }

    /// Number of submissions in flight.
    #[must_use]
    pub fn len(&self) -> usize {
        self.active.len()
    }

    /// Whether nothing is being submitted.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.active.is_empty()
    }
}

/// Proof of entry into a [`ProcessingGuard`].
#[derive(Debug)]
#[must_use = "the guard is released as soon as the ticket is dropped"]
pub struct GuardTicket {
    guard: Arc<ProcessingGuard>,
    id: PaymentId,
}

impl GuardTicket {
    /// The guarded payment id.
    #[must_use]
    pub const fn payment_id(&self) -> &PaymentId {
        &self.id
    }
}

impl Drop for GuardTicket {
    fn drop(&mut self) {
        self.guard.active.remove(&self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn call() -> PaidCall {
        PaidCall::get("https://api.example.com/generate".parse().unwrap())
            .with_description("one image")
    }

    #[test]
    fn payment_ids_are_unique() {
        let a = PaymentId::generate();
        let b = PaymentId::generate();
        assert_ne!(a, b);
        assert!(a.as_str().starts_with("pay_"));
    }

    #[test]
    fn register_rejects_live_duplicates() {
        let store = PendingActionStore::new();
        let id = PaymentId::from("pay_1");
        store.register(id.clone(), call()).unwrap();
        assert_eq!(
            store.register(id.clone(), call()),
            Err(PaymentError::AlreadyPending("pay_1".into()))
        );
        assert_eq!(store.len(), 1);

        let removed = store.remove(&id).unwrap();
        assert_eq!(removed.description.as_deref(), Some("one image"));
        assert!(store.register(id, call()).is_ok());
    }

    #[test]
    fn post_json_sets_content_type() {
        let call = PaidCall::post_json(
            "https://api.example.com/chat".parse().unwrap(),
            &serde_json::json!({"prompt": "hi"}),
        )
        .unwrap();
        assert_eq!(call.method, Method::POST);
        assert_eq!(call.headers[CONTENT_TYPE], "application/json");
        assert_eq!(call.body, br#"{"prompt":"hi"}"#);
    }

    #[test]
    fn guard_admits_one_ticket_per_id() {
        let guard = Arc::new(ProcessingGuard::new());
        let id = PaymentId::from("pay_2");
        let ticket = guard.try_enter(&id).unwrap();
        assert_eq!(ticket.payment_id(), &id);
        assert!(guard.try_enter(&id).is_none());
        assert!(guard.try_enter(&PaymentId::from("pay_3")).is_some());
        assert!(guard.contains(&id));

        drop(ticket);
        assert!(!guard.contains(&id));
        assert!(guard.try_enter(&id).is_some());
    }
}
