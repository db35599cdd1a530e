#![cfg_attr(docsrs, feature(doc_auto_cfg))]

//! Core types for client-side x402 payment negotiation.
//!
//! A server that gates an HTTP resource behind a stablecoin payment answers
//! `402 Payment Required` with a requirements document. This crate holds the
//! chain-agnostic pieces a client needs to make sense of that answer: the
//! static network catalog, the versioned wire model, amount and timestamp
//! handling, and the error taxonomy shared by the rest of the workspace.
//!
//! # Modules
//!
//! - [`amount`] - Decimal price parsing and atomic-unit formatting
//! - [`chain`] - CAIP-2 chain identifiers
//! - [`encoding`] - Base64 helpers for header transport
//! - [`error`] - The [`PaymentError`](error::PaymentError) taxonomy
//! - [`networks`] - Static catalog of supported networks
//! - [`proto`] - Requirements documents, envelopes and settlement proofs
//! - [`timestamp`] - Unix timestamps for authorization windows

pub mod amount;
pub mod chain;
pub mod encoding;
pub mod error;
pub mod networks;
pub mod proto;
pub mod timestamp;

pub use error::PaymentError;
