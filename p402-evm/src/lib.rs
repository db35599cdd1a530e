#![cfg_attr(docsrs, feature(doc_auto_cfg))]

//! EIP-155 (EVM) support for client-side x402 payments.
//!
//! Everything chain-specific a paying client needs lives here: building the
//! ERC-3009 `TransferWithAuthorization` typed data, the wallet capability
//! that signs it, and the advisory stablecoin balance check.
//!
//! - [`exact`] - EIP-712 authorization building for the "exact" scheme
//! - [`wallet`] - The [`Wallet`] capability and a private-key implementation
//! - [`balance`] - `balanceOf` reads with in-flight deduplication
//!
//! # Feature Flags
//!
//! - `rpc` (default) - [`balance::RpcBalanceReader`] backed by alloy HTTP providers

pub mod balance;
pub mod exact;
pub mod wallet;

pub use balance::{BalanceCheck, BalanceChecker, BalanceReader};
pub use exact::{AuthorizationBuilder, TypedAuthorization, ValidAfterPolicy};
pub use wallet::{LocalWallet, Wallet, WalletError};
