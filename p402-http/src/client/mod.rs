//! Client-side payment sessions.
//!
//! A [`PaymentSession`] owns the state shared by all of its negotiations:
//! the HTTP client, the wallet, the [`PendingActionStore`] and the
//! [`ProcessingGuard`]. Each paid call gets its own [`Negotiation`].
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use p402_evm::LocalWallet;
//! use p402_http::client::{CallOutcome, PaidCall, PaymentSession};
//! use p402_http::ClientConfig;
//!
//! # async fn demo() -> Result<(), Box<dyn std::error::Error>> {
//! let wallet = LocalWallet::from_private_key("0x...", 42220)?;
//! let session = PaymentSession::new(ClientConfig::from_env()?, Arc::new(wallet))?;
//!
//! let call = PaidCall::get("https://api.example.com/generate".parse()?);
//! match session.send(call).await? {
//!     CallOutcome::Completed(response) => println!("free: {}", response.status),
//!     CallOutcome::PaymentRequired(mut negotiation) => {
//!         let settlement = negotiation.run().await?;
//!         println!("paid: {:?}", settlement.explorer_url());
//!     }
//! }
//! # Ok(())
//! # }
//! ```

mod discovery;
mod negotiator;
mod pending;
mod response;
mod retrier;

use std::sync::Arc;

use p402::error::PaymentError;
use p402::proto::PaymentRequirements;
use p402_evm::balance::{BalanceChecker, BalanceReader, RpcBalanceReader};
use p402_evm::exact::AuthorizationBuilder;
use p402_evm::wallet::Wallet;
use tracing::instrument;

pub use discovery::{DiscoveryClient, UnpaidResponse};
pub use negotiator::{Negotiation, NegotiationState};
pub use pending::{GuardTicket, PaidCall, PaymentId, PendingActionStore, ProcessingGuard};
pub use response::{
    BodyFormat, PaidBody, RejectionBody, ResourceKind, UnknownResourceKind, rejection_message,
};
pub use retrier::{ActionRetrier, Settlement};

use self::discovery::{Probe, probe};
use self::negotiator::NegotiationDeps;
use crate::config::ClientConfig;

/// Result of [`PaymentSession::send`].
#[derive(Debug)]
pub enum CallOutcome {
    /// The resource answered without asking for payment.
    Completed(UnpaidResponse),
    /// The resource asked for payment. The negotiation has either accepted
    /// the requirements or failed on them.
    PaymentRequired(Box<Negotiation>),
}

/// Shared state and collaborators for paying gated resources.
pub struct PaymentSession {
    http: reqwest::Client,
    config: ClientConfig,
    wallet: Arc<dyn Wallet>,
    balances: Option<BalanceChecker>,
    builder: AuthorizationBuilder,
    pending: Arc<PendingActionStore>,
    guard: Arc<ProcessingGuard>,
    discovery: Option<DiscoveryClient>,
}

impl std::fmt::Debug for PaymentSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PaymentSession")
            .field("payer", &self.wallet.address())
            .field("config", &self.config)
            .field("pending", &self.pending.len())
            .field("submitting", &self.guard.len())
            .finish_non_exhaustive()
    }
}

impl PaymentSession {
    /// Creates a session paying with `wallet`.
    ///
    /// Balances are read through the catalog RPC endpoints (or the
    /// configured overrides) when `check_balance` is set.
    ///
    /// # Errors
    ///
    /// Returns [`PaymentError::TransportFailure`] if the HTTP client cannot be
    /// built.
    pub fn new(config: ClientConfig, wallet: Arc<dyn Wallet>) -> Result<Self, PaymentError> {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .user_agent(config.user_agent.clone())
            .build()
            .map_err(|e| PaymentError::TransportFailure(e.to_string()))?;
        let balances = config.check_balance.then(|| {
            let reader = RpcBalanceReader::new(config.rpc_overrides.clone());
            BalanceChecker::new(Arc::new(reader))
        });
        let discovery = config
            .discovery_url
            .clone()
            .map(|url| DiscoveryClient::new(http.clone(), url));
        Ok(Self {
            http,
            builder: config.authorization_builder(),
            config,
            wallet,
            balances,
            pending: Arc::new(PendingActionStore::new()),
            guard: Arc::new(ProcessingGuard::new()),
            discovery,
        })
    }

    /// Reads balances through `reader` instead of the RPC endpoints.
    #[must_use]
    pub fn with_balance_reader(mut self, reader: Arc<dyn BalanceReader>) -> Self {
        self.config.check_balance = true;
        self.balances = Some(BalanceChecker::new(reader));
        self
    }

    /// Skips balance checks.
    #[must_use]
    pub fn without_balance_check(mut self) -> Self {
        self.config.check_balance = false;
        self.balances = None;
        self
    }

    /// Uses `http` for every request.
    #[must_use]
    pub fn with_http_client(mut self, http: reqwest::Client) -> Self {
        self.discovery = self
            .discovery
            .take()
            .map(|discovery| DiscoveryClient::new(http.clone(), discovery.url().clone()));
        self.http = http;
        self
    }

    /// Session configuration.
    #[must_use]
    pub const fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// The paying wallet.
    #[must_use]
    pub fn wallet(&self) -> &Arc<dyn Wallet> {
        &self.wallet
    }

    /// Calls awaiting payment.
    #[must_use]
    pub const fn pending(&self) -> &Arc<PendingActionStore> {
        &self.pending
    }

    /// Payments being submitted.
    #[must_use]
    pub const fn guard(&self) -> &Arc<ProcessingGuard> {
        &self.guard
    }

    /// Retrier over this session's pending calls.
    #[must_use]
    pub fn retrier(&self) -> ActionRetrier {
        ActionRetrier::new(
            self.http.clone(),
            Arc::clone(&self.pending),
            Arc::clone(&self.guard),
        )
    }

    /// Starts an idle negotiation for `call`.
    ///
    /// Its requirements are loaded by
    /// [`Negotiation::ensure_requirements`] or [`Negotiation::run`].
    #[must_use]
    pub fn negotiation(&self, call: PaidCall) -> Negotiation {
        Negotiation::new(call, self.deps())
    }

    /// Starts a negotiation for `call` from requirements obtained elsewhere.
    ///
    /// # Errors
    ///
    /// Returns [`PaymentError::AlreadyPending`] if the generated payment id
    /// collides with a pending one.
    pub fn negotiate(
        &self,
        call: PaidCall,
        requirements: PaymentRequirements,
    ) -> Result<Negotiation, PaymentError> {
        let mut negotiation = self.negotiation(call);
        let key = negotiation.next_request_key();
        negotiation.accept_requirements(key, Ok(requirements))?;
        Ok(negotiation)
    }

    /// Issues `call` without payment.
    ///
    /// A 402 answer yields a negotiation that has already processed the
    /// requirements document: `RequirementsFetched` for a usable document,
    /// `Failed` otherwise.
    ///
    /// # Errors
    ///
    /// Returns [`PaymentError::TransportFailure`] if the resource cannot be
    /// reached.
    #[instrument(
        name = "p402.session.send",
        skip_all,
        fields(method = %call.method, url = %call.url)
    )]
    pub async fn send(&self, call: PaidCall) -> Result<CallOutcome, PaymentError> {
        match probe(&self.http, &call).await? {
            Probe::Answered(response) => Ok(CallOutcome::Completed(response)),
            Probe::PaymentRequired(result) => {
                let mut negotiation = self.negotiation(call);
                let key = negotiation.next_request_key();
                if let Err(err) = negotiation.accept_requirements(key, result) {
                    tracing::warn!(error = %err, "payment requirements unusable");
                }
                Ok(CallOutcome::PaymentRequired(Box::new(negotiation)))
            }
        }
    }

    fn deps(&self) -> NegotiationDeps {
        NegotiationDeps {
            wallet: Arc::clone(&self.wallet),
            balances: self.balances.clone(),
            builder: self.builder,
            retrier: self.retrier(),
            discovery: self.discovery.clone(),
            http: self.http.clone(),
            pending: Arc::clone(&self.pending),
        }
    }
}
