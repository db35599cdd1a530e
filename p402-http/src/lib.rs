#![cfg_attr(docsrs, feature(doc_auto_cfg))]

//! HTTP side of client-side x402 payments.
//!
//! A [`PaymentSession`](client::PaymentSession) issues calls to gated
//! resources. When one answers `402 Payment Required` it hands back a
//! [`Negotiation`](client::Negotiation), a state machine that selects a
//! network, signs an ERC-3009 authorization through the wallet, and resubmits
//! the original call with the `PAYMENT-SIGNATURE` header.
//!
//! # Modules
//!
//! - [`client`] - Session, negotiation, pending actions and retries
//! - [`config`] - Client configuration from the environment or serde
//! - [`constants`] - Header names and status codes
//! - [`headers`] - Header encoding and decoding

pub mod client;
pub mod config;
pub mod constants;
pub mod headers;

pub use client::{CallOutcome, Negotiation, NegotiationState, PaymentSession};
pub use config::ClientConfig;
