//! Advisory stablecoin balance checks.
//!
//! Before committing a signature the client may read the payer's token
//! balance with a read-only `balanceOf` call. The result is advisory: any
//! failure degrades to [`BalanceCheck::Unknown`] and nothing here blocks a
//! payment.
//!
//! Concurrent checks for the same `(owner, chain, asset)` share a single
//! in-flight read; checks for different keys run independently.

use std::fmt;
use std::sync::Arc;

use alloy_primitives::{Address, U256};
use async_trait::async_trait;
use dashmap::DashMap;
use futures_util::FutureExt;
use futures_util::future::{BoxFuture, Shared};
use p402::amount::format_atomic;
use p402::networks::NetworkInfo;
use p402::proto::PaymentRequirement;

#[cfg(feature = "rpc")]
pub use rpc::RpcBalanceReader;

/// Failure to read a balance.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BalanceError {
    /// The RPC endpoint could not be reached or returned an error.
    #[error("rpc error: {0}")]
    Rpc(String),
    /// The call returned fewer than 32 bytes.
    #[error("malformed balanceOf response of {0} bytes")]
    MalformedResponse(usize),
    /// No RPC endpoint is configured for the network.
    #[error("invalid rpc url for chain {chain_id}: {reason}")]
    InvalidEndpoint {
        /// Numeric chain id.
        chain_id: u64,
        /// Parse failure.
        reason: String,
    },
}

/// Reads ERC-20 balances.
#[async_trait]
pub trait BalanceReader: Send + Sync {
    /// Returns the `asset` balance of `owner` on `network`, in atomic units.
    async fn balance_of(
        &self,
        network: &'static NetworkInfo,
        asset: Address,
        owner: Address,
    ) -> Result<U256, BalanceError>;
}

/// Outcome of a balance check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BalanceCheck {
    /// The balance was read.
    Known {
        /// Balance in atomic units.
        raw: U256,
        /// Balance as a human decimal string.
        formatted: String,
        /// Amount the payment needs, in atomic units.
        required: U256,
        /// Whether the balance covers the payment.
        sufficient: bool,
    },
    /// The balance could not be read.
    Unknown,
}

impl BalanceCheck {
    /// Returns `true` only when the balance is known to fall short.
    #[must_use]
    pub const fn is_insufficient(&self) -> bool {
        matches!(
            self,
            Self::Known {
                sufficient: false,
                ..
            }
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct BalanceKey {
    owner: Address,
    chain_id: u64,
    asset: Address,
}

type SharedRead = Shared<BoxFuture<'static, Result<U256, BalanceError>>>;

/// Balance checks with in-flight deduplication.
#[derive(Clone)]
pub struct BalanceChecker {
    reader: Arc<dyn BalanceReader>,
    in_flight: Arc<DashMap<BalanceKey, SharedRead>>,
}

impl fmt::Debug for BalanceChecker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BalanceChecker")
            .field("in_flight", &self.in_flight.len())
            .finish_non_exhaustive()
    }
}

impl BalanceChecker {
    /// Wraps a reader.
    #[must_use]
    pub fn new(reader: Arc<dyn BalanceReader>) -> Self {
        Self {
            reader,
            in_flight: Arc::new(DashMap::new()),
        }
    }

    /// Checks whether `owner` holds at least `required` of the requirement's
    /// asset.
    #[tracing::instrument(
        name = "p402.balance.check",
        skip_all,
        fields(owner = %owner, network = %requirement.network_label)
    )]
    pub async fn check(
        &self,
        owner: Address,
        requirement: &PaymentRequirement,
        required: U256,
    ) -> BalanceCheck {
        let network = requirement.network;
        let key = BalanceKey {
            owner,
            chain_id: network.chain_id,
            asset: requirement.asset,
        };
        let read = self.shared_read(key, network);
        let result = read.clone().await;
        self.in_flight
            .remove_if(&key, |_, current| current.ptr_eq(&read));

        match result {
            Ok(raw) => {
                let sufficient = raw >= required;
                let formatted = format_atomic(raw, network.decimals);
                tracing::debug!(%formatted, sufficient, "balance read");
                BalanceCheck::Known {
                    raw,
                    formatted,
                    required,
                    sufficient,
                }
            }
            Err(err) => {
                tracing::warn!(error = %err, "balance read failed, continuing without it");
                BalanceCheck::Unknown
            }
        }
    }

    fn shared_read(&self, key: BalanceKey, network: &'static NetworkInfo) -> SharedRead {
        self.in_flight
            .entry(key)
            .or_insert_with(|| {
                let reader = Arc::clone(&self.reader);
                async move { reader.balance_of(network, key.asset, key.owner).await }
                    .boxed()
                    .shared()
            })
            .clone()
    }
}

#[cfg(feature = "rpc")]
mod rpc {
    use std::collections::HashMap;
    use std::fmt;

    use alloy_primitives::{Address, Bytes, U256};
    use alloy_provider::{Provider, RootProvider};
    use alloy_sol_types::SolCall;
    use async_trait::async_trait;
    use dashmap::DashMap;
    use p402::chain::ChainId;
    use p402::networks::NetworkInfo;
    use url::Url;

    use super::{BalanceError, BalanceReader};
    use crate::exact::IERC20::balanceOfCall;

    /// Reads balances through one alloy HTTP provider per chain.
    ///
    /// Endpoints come from the network catalog unless overridden.
    #[derive(Default)]
    pub struct RpcBalanceReader {
        overrides: HashMap<ChainId, Url>,
        providers: DashMap<u64, RootProvider>,
    }

    impl fmt::Debug for RpcBalanceReader {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.debug_struct("RpcBalanceReader")
                .field("overrides", &self.overrides)
                .field("providers", &self.providers.len())
                .finish()
        }
    }

    impl RpcBalanceReader {
        /// Creates a reader with per-chain endpoint overrides.
        #[must_use]
        pub fn new(overrides: HashMap<ChainId, Url>) -> Self {
            Self {
                overrides,
                providers: DashMap::new(),
            }
        }

        fn endpoint(&self, network: &NetworkInfo) -> Result<Url, BalanceError> {
            if let Some(url) = self.overrides.get(&network.caip2()) {
                return Ok(url.clone());
            }
            network
                .rpc_url
                .parse()
                .map_err(|e: url::ParseError| BalanceError::InvalidEndpoint {
                    chain_id: network.chain_id,
                    reason: e.to_string(),
                })
        }

        fn provider(&self, network: &NetworkInfo) -> Result<RootProvider, BalanceError> {
            if let Some(provider) = self.providers.get(&network.chain_id) {
                return Ok(provider.clone());
            }
            let provider = RootProvider::new_http(self.endpoint(network)?);
            self.providers.insert(network.chain_id, provider.clone());
            Ok(provider)
        }
    }

    #[async_trait]
    impl BalanceReader for RpcBalanceReader {
        async fn balance_of(
            &self,
            network: &'static NetworkInfo,
            asset: Address,
            owner: Address,
        ) -> Result<U256, BalanceError> {
            let provider = self.provider(network)?;
            let calldata = Bytes::from(balanceOfCall { account: owner }.abi_encode());
            let tx = alloy_rpc_types_eth::TransactionRequest::default()
                .to(asset)
                .input(calldata.into());

            let result: Bytes = provider
                .call(tx)
                .await
                .map_err(|e| BalanceError::Rpc(e.to_string()))?;

            if result.len() >= 32 {
                Ok(U256::from_be_slice(&result[..32]))
            } else {
                Err(BalanceError::MalformedResponse(result.len()))
            }
        }
    }

}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use alloy_primitives::address;
    use p402::amount::TokenAmount;
    use p402::networks::NetworkCatalog;
    use p402::proto::RequirementExtra;

    const OWNER: Address = address!("f39Fd6e51aad88F6F4ce6aB8827279cffFb92266");

    #[derive(Default)]
    struct SlowReader {
        calls: AtomicUsize,
        balance: u64,
    }

    #[async_trait]
    impl BalanceReader for SlowReader {
        async fn balance_of(
            &self,
            _network: &'static NetworkInfo,
            _asset: Address,
            _owner: Address,
        ) -> Result<U256, BalanceError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(50)).await;
            Ok(U256::from(self.balance))
        }
    }

    struct BrokenReader;

    #[async_trait]
    impl BalanceReader for BrokenReader {
        async fn balance_of(
            &self,
            _network: &'static NetworkInfo,
            _asset: Address,
            _owner: Address,
        ) -> Result<U256, BalanceError> {
            Err(BalanceError::Rpc("connection refused".into()))
        }
    }

    fn requirement(name: &str) -> PaymentRequirement {
        let network = NetworkCatalog::global().by_legacy_name(name).unwrap();
        PaymentRequirement {
            scheme: "exact".into(),
            network,
            network_label: name.into(),
            amount: Some(TokenAmount::from(10_000u64)),
            price: None,
            resource: None,
            description: None,
            mime_type: None,
            pay_to: address!("209693Bc6afc0C5328bA36FaF03C514EF312287C"),
            asset: network.asset,
            max_timeout_seconds: None,
            extra: RequirementExtra::default(),
        }
    }

    #[tokio::test]
    async fn reports_formatted_balance() {
        let reader = Arc::new(SlowReader {
            balance: 50_000,
            ..SlowReader::default()
        });
        let checker = BalanceChecker::new(reader);
        let check = checker
            .check(OWNER, &requirement("celo"), U256::from(10_000u64))
            .await;
        assert_eq!(
            check,
            BalanceCheck::Known {
                raw: U256::from(50_000u64),
                formatted: "0.05".into(),
                required: U256::from(10_000u64),
                sufficient: true,
            }
        );
        let short = checker
            .check(OWNER, &requirement("celo"), U256::from(60_000u64))
            .await;
        assert!(short.is_insufficient());
    }

    #[tokio::test]
    async fn identical_concurrent_checks_share_one_read() {
        let reader = Arc::new(SlowReader {
            balance: 50_000,
            ..SlowReader::default()
        });
        let checker = BalanceChecker::new(reader.clone());
        let celo = requirement("celo");
        let (first, second) = tokio::join!(
            checker.check(OWNER, &celo, U256::from(1u64)),
            checker.check(OWNER, &celo, U256::from(1u64)),
        );
        assert_eq!(first, second);
        assert_eq!(reader.calls.load(Ordering::SeqCst), 1);

        checker.check(OWNER, &celo, U256::from(1u64)).await;
        assert_eq!(reader.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn distinct_keys_are_read_separately() {
        let reader = Arc::new(SlowReader::default());
        let checker = BalanceChecker::new(reader.clone());
        let celo = requirement("celo");
        let base = requirement("base");
        tokio::join!(
            checker.check(OWNER, &celo, U256::ZERO),
            checker.check(OWNER, &base, U256::ZERO),
        );
        assert_eq!(reader.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn failures_degrade_to_unknown() {
        let checker = BalanceChecker::new(Arc::new(BrokenReader));
        let check = checker
            .check(OWNER, &requirement("base"), U256::from(1u64))
            .await;
        assert_eq!(check, BalanceCheck::Unknown);
        assert!(!check.is_insufficient());
    }
}
