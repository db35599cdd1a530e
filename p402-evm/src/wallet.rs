//! The wallet capability.
//!
//! Key storage and the signing primitive are outside this crate; a
//! [`Wallet`] only has to report its address and active chain, produce an
//! EIP-712 signature, and optionally switch chains. [`LocalWallet`] backs it
//! with an in-memory private key for tests and headless clients.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use alloy_primitives::{Address, Bytes};
use alloy_signer::Signer;
use alloy_signer_local::PrivateKeySigner;
use async_trait::async_trait;
use p402::error::PaymentError;

use crate::exact::TypedAuthorization;

/// Errors reported by a [`Wallet`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WalletError {
    /// The user refused the request.
    #[error("request declined by user")]
    Declined,
    /// The wallet cannot switch chains.
    #[error("wallet cannot switch to chain {0}")]
    SwitchUnsupported(u64),
    /// The wallet could not answer.
    #[error("wallet unavailable: {0}")]
    Unavailable(String),
    /// The signer failed.
    #[error("signing failed: {0}")]
    Signer(String),
}

impl From<WalletError> for PaymentError {
    fn from(value: WalletError) -> Self {
        match value {
            WalletError::Declined => Self::SignatureDeclined,
            other => Self::Wallet(other.to_string()),
        }
    }
}

/// A signing wallet connected to one EVM chain at a time.
#[async_trait]
pub trait Wallet: Send + Sync {
    /// Address that signs and pays.
    fn address(&self) -> Address;

    /// Numeric chain id the wallet is connected to.
    async fn active_chain(&self) -> Result<u64, WalletError>;

    /// Signs the EIP-712 typed data, returning the 65-byte signature.
    async fn sign_typed_data(&self, typed: &TypedAuthorization) -> Result<Bytes, WalletError>;

    /// Asks the wallet to connect to `chain_id`.
    async fn switch_chain(&self, chain_id: u64) -> Result<(), WalletError> {
        Err(WalletError::SwitchUnsupported(chain_id))
    }
}

#[async_trait]
impl<W: Wallet + ?Sized> Wallet for Arc<W> {
    fn address(&self) -> Address {
        (**self).address()
    }

    async fn active_chain(&self) -> Result<u64, WalletError> {
        (**self).active_chain().await
    }

    async fn sign_typed_data(&self, typed: &TypedAuthorization) -> Result<Bytes, WalletError> {
        (**self).sign_typed_data(typed).await
    }

    async fn switch_chain(&self, chain_id: u64) -> Result<(), WalletError> {
        (**self).switch_chain(chain_id).await
    }
}

/// A wallet holding a private key in memory.
///
/// Chain switching always succeeds unless disabled with
/// [`LocalWallet::pinned`].
#[derive(Debug)]
pub struct LocalWallet {
    signer: PrivateKeySigner,
    active_chain: AtomicU64,
    switchable: bool,
}

impl LocalWallet {
    /// Creates a wallet connected to `chain_id`.
    #[must_use]
    pub const fn new(signer: PrivateKeySigner, chain_id: u64) -> Self {
        Self {
            signer,
            active_chain: AtomicU64::new(chain_id),
            switchable: true,
        }
    }

    /// Parses a hex private key.
    ///
    /// # Errors
    ///
    /// Returns [`WalletError::Signer`] for an invalid key.
    pub fn from_private_key(key: &str, chain_id: u64) -> Result<Self, WalletError> {
        let signer: PrivateKeySigner = key
            .trim()
            .parse()
            .map_err(|e| WalletError::Signer(format!("{e}")))?;
        Ok(Self::new(signer, chain_id))
    }

    /// Disables chain switching.
    #[must_use]
    pub const fn pinned(mut self) -> Self {
        self.switchable = false;
        self
    }
}

#[async_trait]
impl Wallet for LocalWallet {
    fn address(&self) -> Address {
        self.signer.address()
    }

    async fn active_chain(&self) -> Result<u64, WalletError> {
        Ok(self.active_chain.load(Ordering::Acquire))
    }

    async fn sign_typed_data(&self, typed: &TypedAuthorization) -> Result<Bytes, WalletError> {
        let signature = self
            .signer
            .sign_hash(&typed.signing_hash())
            .await
            .map_err(|e| WalletError::Signer(format!("{e:?}")))?;
        Ok(Bytes::copy_from_slice(&signature.as_bytes()))
    }

    async fn switch_chain(&self, chain_id: u64) -> Result<(), WalletError> {
        if !self.switchable {
            return Err(WalletError::SwitchUnsupported(chain_id));
        }
        self.active_chain.store(chain_id, Ordering::Release);
        tracing::debug!(chain_id, "local wallet switched chain");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exact::AuthorizationBuilder;
    use alloy_primitives::{Signature, address};
    use p402::amount::TokenAmount;
    use p402::networks::NetworkCatalog;
    use p402::proto::{PaymentRequirement, RequirementExtra};

    const TEST_KEY: &str = "0xac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80";

    fn requirement() -> PaymentRequirement {
        let network = NetworkCatalog::global().by_legacy_name("base-sepolia").unwrap();
        PaymentRequirement {
            scheme: "exact".into(),
            network,
            network_label: "base-sepolia".into(),
            amount: Some(TokenAmount::from(1_000u64)),
            price: None,
            resource: None,
            description: None,
            mime_type: None,
            pay_to: address!("209693Bc6afc0C5328bA36FaF03C514EF312287C"),
            asset: network.asset,
            max_timeout_seconds: Some(60),
            extra: RequirementExtra::default(),
        }
    }

    #[tokio::test]
    async fn signature_recovers_to_wallet_address() {
        let wallet = LocalWallet::from_private_key(TEST_KEY, 84532).unwrap();
        assert_eq!(
            wallet.address(),
            address!("f39Fd6e51aad88F6F4ce6aB8827279cffFb92266")
        );
        let typed = AuthorizationBuilder::new()
            .build(&requirement(), wallet.address(), Some(84532))
            .unwrap();
        let signature = wallet.sign_typed_data(&typed).await.unwrap();
        assert_eq!(signature.len(), 65);
        let parsed = Signature::try_from(signature.as_ref()).unwrap();
        let recovered = parsed
            .recover_address_from_prehash(&typed.signing_hash())
            .unwrap();
        assert_eq!(recovered, wallet.address());
    }

    #[tokio::test]
    async fn switching_chains() {
        let wallet = LocalWallet::from_private_key(TEST_KEY, 8453).unwrap();
        wallet.switch_chain(42220).await.unwrap();
        assert_eq!(wallet.active_chain().await.unwrap(), 42220);

        let pinned = LocalWallet::from_private_key(TEST_KEY, 8453).unwrap().pinned();
        assert_eq!(
            pinned.switch_chain(42220).await,
            Err(WalletError::SwitchUnsupported(42220))
        );
        assert_eq!(pinned.active_chain().await.unwrap(), 8453);
    }

    #[test]
    fn declines_map_to_signature_declined() {
        assert_eq!(
            PaymentError::from(WalletError::Declined),
            PaymentError::SignatureDeclined
        );
        assert!(matches!(
            PaymentError::from(WalletError::Unavailable("locked".into())),
            PaymentError::Wallet(_)
        ));
        assert!(LocalWallet::from_private_key("0x1234", 1).is_err());
    }
}
