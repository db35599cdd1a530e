//! The payment negotiation state machine.
//!
//! ```text
//! Idle -> RequirementsFetched -> NetworkSelected -> Signing -> Signed
//!      -> Submitting -> Settled | Rejected | Failed
//! ```
//!
//! Every transition is recorded in [`Negotiation::history`]. A balance check
//! annotates `NetworkSelected` without a transition of its own.

use std::fmt;
use std::sync::Arc;

use p402::amount::format_atomic;
use p402::chain::ChainId;
use p402::error::PaymentError;
use p402::networks::UnknownNetwork;
use p402::proto::{PaymentEnvelope, PaymentRequirement, PaymentRequirements};
use p402::timestamp::UnixTimestamp;
use p402_evm::balance::{BalanceCheck, BalanceChecker};
use p402_evm::exact::AuthorizationBuilder;
use p402_evm::wallet::{Wallet, WalletError};
use tracing::{debug, info, instrument, warn};

use super::discovery::{DiscoveryClient, Probe, probe};
use super::pending::{PaidCall, PaymentId, PendingActionStore};
use super::retrier::{ActionRetrier, Settlement};

/// Where a negotiation stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NegotiationState {
    /// Nothing known about the price yet.
    Idle,
    /// A requirements document was accepted.
    RequirementsFetched,
    /// One accept option is selected.
    NetworkSelected,
    /// The wallet is asked to sign.
    Signing,
    /// A signed envelope is ready.
    Signed,
    /// The paid call is in flight.
    Submitting,
    /// The resource accepted the payment.
    Settled,
    /// The resource refused the payment.
    Rejected,
    /// The negotiation failed. Resumable with the same envelope after a
    /// transport failure.
    Failed,
}

impl NegotiationState {
    /// Whether no further transition is possible.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Settled)
    }

    const fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::RequirementsFetched => "requirements_fetched",
            Self::NetworkSelected => "network_selected",
            Self::Signing => "signing",
            Self::Signed => "signed",
            Self::Submitting => "submitting",
            Self::Settled => "settled",
            Self::Rejected => "rejected",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for NegotiationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Collaborators a negotiation borrows from its session.
#[derive(Clone)]
pub(crate) struct NegotiationDeps {
    pub(crate) wallet: Arc<dyn Wallet>,
    pub(crate) balances: Option<BalanceChecker>,
    pub(crate) builder: AuthorizationBuilder,
    pub(crate) retrier: ActionRetrier,
    pub(crate) discovery: Option<DiscoveryClient>,
    pub(crate) http: reqwest::Client,
    pub(crate) pending: Arc<PendingActionStore>,
}

/// One paid call being negotiated.
///
/// Dropping a negotiation that never produced a signature abandons it: its
/// pending entry is removed, whatever state it stopped in. Once signed, the
/// entry outlives the negotiation so the envelope can still be resubmitted
/// through the session's [`ActionRetrier`].
pub struct Negotiation {
    payment_id: PaymentId,
    call: PaidCall,
    state: NegotiationState,
    history: Vec<NegotiationState>,
    requirements: Option<PaymentRequirements>,
    selected: Option<usize>,
    balance: Option<BalanceCheck>,
    warnings: Vec<PaymentError>,
    envelope: Option<PaymentEnvelope>,
    last_error: Option<PaymentError>,
    settlement: Option<Settlement>,
    request_key: u64,
    registered: bool,
    signed_once: bool,
    deps: NegotiationDeps,
}

impl fmt::Debug for Negotiation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Negotiation")
            .field("payment_id", &self.payment_id)
            .field("url", &self.call.url.as_str())
            .field("state", &self.state)
            .field("selected", &self.selected_requirement().map(|r| &r.network_label))
            .field("last_error", &self.last_error)
            .finish_non_exhaustive()
    }
}

impl Negotiation {
    pub(crate) fn new(call: PaidCall, deps: NegotiationDeps) -> Self {
        Self {
            payment_id: PaymentId::generate(),
            call,
            state: NegotiationState::Idle,
            history: vec![NegotiationState::Idle],
            requirements: None,
            selected: None,
            balance: None,
            warnings: Vec::new(),
            envelope: None,
            last_error: None,
            settlement: None,
            request_key: 0,
            registered: false,
            signed_once: false,
            deps,
        }
    }

    /// Payment id the call is pending under.
    #[must_use]
    pub const fn payment_id(&self) -> &PaymentId {
        &self.payment_id
    }

    /// The call being paid for.
    #[must_use]
    pub const fn call(&self) -> &PaidCall {
        &self.call
    }

    /// Current state.
    #[must_use]
    pub const fn state(&self) -> NegotiationState {
        self.state
    }

    /// Every state entered so far, starting with `Idle`.
    #[must_use]
    pub fn history(&self) -> &[NegotiationState] {
        &self.history
    }

    /// The accepted requirements document.
    #[must_use]
    pub const fn requirements(&self) -> Option<&PaymentRequirements> {
        self.requirements.as_ref()
    }

    /// The selected accept option.
    #[must_use]
    pub fn selected_requirement(&self) -> Option<&PaymentRequirement> {
        let index = self.selected?;
        self.requirements.as_ref()?.accepts.get(index)
    }

    /// Outcome of the balance check for the selected option.
    #[must_use]
    pub const fn balance(&self) -> Option<&BalanceCheck> {
        self.balance.as_ref()
    }

    /// Advisory problems that did not stop the negotiation.
    #[must_use]
    pub fn warnings(&self) -> &[PaymentError] {
        &self.warnings
    }

    /// The signed envelope.
    #[must_use]
    pub const fn envelope(&self) -> Option<&PaymentEnvelope> {
        self.envelope.as_ref()
    }

    /// The most recent error.
    #[must_use]
    pub const fn last_error(&self) -> Option<&PaymentError> {
        self.last_error.as_ref()
    }

    /// The accepted paid answer.
    #[must_use]
    pub const fn settlement(&self) -> Option<&Settlement> {
        self.settlement.as_ref()
    }

    /// Takes the accepted paid answer out of the negotiation.
    pub const fn take_settlement(&mut self) -> Option<Settlement> {
        self.settlement.take()
    }

    /// Key of the latest requirements request.
    #[must_use]
    pub const fn request_key(&self) -> u64 {
        self.request_key
    }

    /// Loads the requirements document unless one is already loaded.
    ///
    /// Requirements come from the session's discovery endpoint when one is
    /// configured, and from an unpaid call to the resource otherwise. A
    /// document that cannot be used moves the negotiation to `Failed`; later
    /// calls return the same error without fetching again.
    ///
    /// # Errors
    ///
    /// - [`PaymentError::MalformedRequirements`] or
    ///   [`PaymentError::UnknownNetwork`] for an unusable document
    /// - [`PaymentError::PaymentNotRequired`] if the resource answered the
    ///   unpaid call without asking for payment
    /// - [`PaymentError::TransportFailure`] if the source cannot be reached
    /// - [`PaymentError::AlreadyPending`] if the payment id is taken
    #[instrument(
        name = "p402.negotiation.ensure_requirements",
        skip_all,
        fields(payment_id = %self.payment_id)
    )]
    pub async fn ensure_requirements(&mut self) -> Result<&PaymentRequirements, PaymentError> {
        if self.state == NegotiationState::Failed && self.requirements.is_none() {
            return Err(self
                .last_error
                .clone()
                .unwrap_or_else(|| PaymentError::InvalidState("requirements failed".into())));
        }
        if self.requirements.is_none() {
            self.fetch_requirements().await?;
        }
        self.requirements
            .as_ref()
            .ok_or_else(|| PaymentError::InvalidState("requirements missing after fetch".into()))
    }

    /// Fetches the requirements document again, replacing the loaded one.
    ///
    /// Only allowed before signing.
    ///
    /// # Errors
    ///
    /// See [`Negotiation::ensure_requirements`].
    #[instrument(
        name = "p402.negotiation.refresh_requirements",
        skip_all,
        fields(payment_id = %self.payment_id)
    )]
    pub async fn refresh_requirements(&mut self) -> Result<&PaymentRequirements, PaymentError> {
        self.expect_state(
            "refresh requirements",
            &[
                NegotiationState::Idle,
                NegotiationState::RequirementsFetched,
                NegotiationState::NetworkSelected,
            ],
        )?;
        self.fetch_requirements().await?;
        self.requirements
            .as_ref()
            .ok_or_else(|| PaymentError::InvalidState("requirements missing after fetch".into()))
    }

    async fn fetch_requirements(&mut self) -> Result<(), PaymentError> {
        let key = self.next_request_key();
        let result = match &self.deps.discovery {
            Some(discovery) => discovery.fetch(&self.call.url, &self.call.method).await,
            None => match probe(&self.deps.http, &self.call).await {
                Ok(Probe::PaymentRequired(result)) => result,
                Ok(Probe::Answered(response)) => Err(PaymentError::PaymentNotRequired {
                    status: response.status.as_u16(),
                }),
                Err(err) => Err(err),
            },
        };
        self.accept_requirements(key, result)
    }

    /// Applies the result of the requirements request identified by `key`.
    /// Results of superseded requests are dropped.
    pub(crate) fn accept_requirements(
        &mut self,
        key: u64,
        result: Result<PaymentRequirements, PaymentError>,
    ) -> Result<(), PaymentError> {
        if key != self.request_key {
            debug!(key, latest = self.request_key, "dropping superseded requirements");
            return Ok(());
        }
        let requirements = match result {
            Ok(requirements) => requirements,
            Err(err) => {
                if unusable_document(&err) {
                    self.requirements = None;
                    self.selected = None;
                    self.clear_selection_state();
                    self.transition(NegotiationState::Failed);
                }
                return Err(self.fail(err));
            }
        };
        if !self.registered {
            self.deps
                .pending
                .register(self.payment_id.clone(), self.call.clone())
                .map_err(|err| self.fail(err))?;
            self.registered = true;
        }
        info!(
            options = requirements.accepts.len(),
            version = requirements.version.as_u8(),
            "payment requirements received"
        );
        self.requirements = Some(requirements);
        self.selected = None;
        self.clear_selection_state();
        self.transition(NegotiationState::RequirementsFetched);
        Ok(())
    }

    /// Starts the next requirements request and returns its key.
    pub(crate) const fn next_request_key(&mut self) -> u64 {
        self.request_key += 1;
        self.request_key
    }

    /// Selects the accept option to pay with.
    ///
    /// With `preferred`, the first option on that chain is taken. Otherwise
    /// the option on the wallet's active chain wins, then the server's
    /// default network, then the first option. Selecting again before the
    /// payment is submitted discards the balance check and any signature.
    ///
    /// # Errors
    ///
    /// Returns [`PaymentError::UnknownNetwork`] if `preferred` is not offered
    /// and [`PaymentError::InvalidState`] outside the selectable states.
    #[instrument(
        name = "p402.negotiation.select_network",
        skip_all,
        fields(payment_id = %self.payment_id)
    )]
    pub async fn select_network(
        &mut self,
        preferred: Option<ChainId>,
    ) -> Result<&PaymentRequirement, PaymentError> {
        self.expect_state(
            "select a network",
            &[
                NegotiationState::RequirementsFetched,
                NegotiationState::NetworkSelected,
                NegotiationState::Signed,
                NegotiationState::Rejected,
            ],
        )?;
        let active = match self.deps.wallet.active_chain().await {
            Ok(chain_id) => Some(chain_id),
            Err(err) => {
                debug!(error = %err, "wallet did not report its chain");
                None
            }
        };
        let requirements = self
            .requirements
            .as_ref()
            .ok_or_else(|| PaymentError::InvalidState("no requirements loaded".into()))?;

        let index = match preferred {
            Some(chain) => requirements
                .position(&chain)
                .ok_or_else(|| UnknownNetwork(chain.to_string()))?,
            None => active
                .and_then(|chain_id| requirements.position_of_chain_id(chain_id))
                .or_else(|| {
                    requirements
                        .default_network
                        .as_ref()
                        .and_then(|chain| requirements.position(chain))
                })
                .unwrap_or(0),
        };

        debug!(
            network = %requirements.accepts[index].network_label,
            "network selected"
        );
        self.selected = Some(index);
        self.clear_selection_state();
        self.transition(NegotiationState::NetworkSelected);
        self.selected_requirement()
            .ok_or_else(|| PaymentError::InvalidState("selection out of range".into()))
    }

    /// Reads the payer balance for the selected option.
    ///
    /// An insufficient balance is recorded as a warning; it never blocks the
    /// negotiation. Without a balance checker the outcome is
    /// [`BalanceCheck::Unknown`].
    ///
    /// # Errors
    ///
    /// Returns [`PaymentError::InvalidAmount`] if the price cannot be
    /// converted, and [`PaymentError::InvalidState`] unless a network is
    /// selected.
    #[instrument(
        name = "p402.negotiation.check_balance",
        skip_all,
        fields(payment_id = %self.payment_id)
    )]
    pub async fn check_balance(&mut self) -> Result<&BalanceCheck, PaymentError> {
        self.expect_state("check the balance", &[NegotiationState::NetworkSelected])?;
        let requirement = self.selected_or_invalid()?.clone();
        let required = AuthorizationBuilder::required_amount(&requirement).map_err(|e| self.fail(e))?;

        let check = match &self.deps.balances {
            Some(checker) => {
                checker
                    .check(self.deps.wallet.address(), &requirement, required)
                    .await
            }
            None => BalanceCheck::Unknown,
        };
        if let BalanceCheck::Known {
            formatted,
            sufficient: false,
            ..
        } = &check
        {
            let warning = PaymentError::InsufficientBalance {
                available: formatted.clone(),
                required: format_atomic(required, requirement.network.decimals),
            };
            warn!(%warning, "continuing despite low balance");
            self.warnings.push(warning);
        }
        Ok(self.balance.insert(check))
    }

    /// Makes sure the wallet is on the selected option's chain, asking it to
    /// switch if needed.
    ///
    /// # Errors
    ///
    /// Returns [`PaymentError::WrongActiveChain`] if the wallet is still on
    /// another chain afterwards, and wallet errors as reported.
    #[instrument(
        name = "p402.negotiation.ensure_chain",
        skip_all,
        fields(payment_id = %self.payment_id)
    )]
    pub async fn ensure_chain(&mut self) -> Result<(), PaymentError> {
        let required = self.selected_or_invalid()?.chain_id();
        let active = self.active_chain().await?;
        if active == required {
            return Ok(());
        }
        info!(active, required, "asking wallet to switch chain");
        if let Err(err) = self.deps.wallet.switch_chain(required).await {
            debug!(error = %err, "chain switch refused");
        }
        let active = self.active_chain().await?;
        if active == required {
            Ok(())
        } else {
            Err(self.fail(PaymentError::WrongActiveChain { active, required }))
        }
    }

    /// Signs an authorization for the selected option.
    ///
    /// The wallet must already be on the option's chain; otherwise nothing is
    /// signed. A declined or failed signature returns the negotiation to
    /// `NetworkSelected`. Signing again replaces a previous envelope.
    ///
    /// # Errors
    ///
    /// - [`PaymentError::WrongActiveChain`] if the wallet is on another chain
    /// - [`PaymentError::SignatureDeclined`] if the user refused
    /// - [`PaymentError::Wallet`] for other wallet failures
    /// - [`PaymentError::InvalidAmount`] if the price cannot be converted
    #[instrument(
        name = "p402.negotiation.sign",
        skip_all,
        fields(payment_id = %self.payment_id)
    )]
    pub async fn sign(&mut self) -> Result<&PaymentEnvelope, PaymentError> {
        self.expect_state(
            "sign",
            &[
                NegotiationState::NetworkSelected,
                NegotiationState::Signed,
                NegotiationState::Rejected,
                NegotiationState::Failed,
            ],
        )?;
        let active = self.active_chain().await?;
        let requirement = self.selected_or_invalid()?;
        let typed = self
            .deps
            .builder
            .build(requirement, self.deps.wallet.address(), Some(active))
            .map_err(|e| self.fail(e))?;

        self.transition(NegotiationState::Signing);
        match self.deps.wallet.sign_typed_data(&typed).await {
            Ok(signature) => {
                self.last_error = None;
                self.signed_once = true;
                self.transition(NegotiationState::Signed);
                Ok(self.envelope.insert(typed.into_envelope(signature)))
            }
            Err(err) => {
                if err == WalletError::Declined {
                    info!("signature declined");
                }
                self.envelope = None;
                self.transition(NegotiationState::NetworkSelected);
                Err(self.fail(err.into()))
            }
        }
    }

    /// Submits the signed envelope with the original call.
    ///
    /// Allowed from `Signed`, and from `Failed` after a transport failure
    /// while the signature is still valid.
    ///
    /// # Errors
    ///
    /// - [`PaymentError::SignatureExpired`] once `validBefore` has passed; a
    ///   new signature is needed
    /// - [`PaymentError::RemoteRejected`] for a 4xx answer (state `Rejected`)
    /// - [`PaymentError::TransportFailure`] for a transport error or 5xx
    ///   answer (state `Failed`)
    /// - [`PaymentError::DuplicateSubmission`] if the same payment is being
    ///   submitted elsewhere (state back to `Signed`)
    #[instrument(
        name = "p402.negotiation.submit",
        skip_all,
        fields(payment_id = %self.payment_id)
    )]
    pub async fn submit(&mut self) -> Result<&Settlement, PaymentError> {
        let resumable = self.state == NegotiationState::Failed
            && self
                .last_error
                .as_ref()
                .is_some_and(PaymentError::is_retriable);
        if self.state != NegotiationState::Signed && !resumable {
            return Err(self.invalid_state("submit"));
        }
        let envelope = self
            .envelope
            .clone()
            .ok_or_else(|| PaymentError::InvalidState("no signed envelope".into()))?;
        if envelope.is_expired(UnixTimestamp::now()) {
            return Err(self.fail(PaymentError::SignatureExpired(
                envelope.authorization.valid_before,
            )));
        }

        self.transition(NegotiationState::Submitting);
        match self.deps.retrier.retry(&self.payment_id, &envelope).await {
            Ok(settlement) => {
                self.last_error = None;
                self.registered = false;
                self.transition(NegotiationState::Settled);
                Ok(self.settlement.insert(settlement))
            }
            Err(err) => {
                let next = match err {
                    PaymentError::DuplicateSubmission(_) => NegotiationState::Signed,
                    PaymentError::RemoteRejected { .. } => NegotiationState::Rejected,
                    _ => NegotiationState::Failed,
                };
                self.transition(next);
                Err(self.fail(err))
            }
        }
    }

    /// Drives the negotiation from wherever it stands to a settlement:
    /// requirements, selection, balance, chain, signature, submission.
    ///
    /// # Errors
    ///
    /// Stops at the first failing step and returns its error.
    #[instrument(
        name = "p402.negotiation.run",
        skip_all,
        fields(payment_id = %self.payment_id, url = %self.call.url)
    )]
    pub async fn run(&mut self) -> Result<&Settlement, PaymentError> {
        if self.state == NegotiationState::Settled {
            return self
                .settlement
                .as_ref()
                .ok_or_else(|| PaymentError::InvalidState("settled without settlement".into()));
        }
        if matches!(self.state, NegotiationState::Idle | NegotiationState::Failed)
            && self.requirements.is_none()
        {
            self.ensure_requirements().await?;
        }
        if self.state == NegotiationState::RequirementsFetched {
            self.select_network(None).await?;
        }
        if self.state == NegotiationState::NetworkSelected {
            if self.deps.balances.is_some() && self.balance.is_none() {
                self.check_balance().await?;
            }
            self.ensure_chain().await?;
            self.sign().await?;
        }
        self.submit().await
    }

    /// Gives up on the payment and forgets its pending entry.
    pub fn abandon(mut self) -> PaidCall {
        self.release();
        self.call.clone()
    }

    fn release(&mut self) {
        if self.registered && self.deps.pending.remove(&self.payment_id).is_some() {
            debug!(payment_id = %self.payment_id, "pending action released");
        }
        self.registered = false;
    }

    async fn active_chain(&mut self) -> Result<u64, PaymentError> {
        self.deps
            .wallet
            .active_chain()
            .await
            .map_err(|err| self.fail(err.into()))
    }

    fn selected_or_invalid(&self) -> Result<&PaymentRequirement, PaymentError> {
        self.selected_requirement()
            .ok_or_else(|| PaymentError::InvalidState("no network selected".into()))
    }

    fn clear_selection_state(&mut self) {
        self.balance = None;
        self.envelope = None;
        self.last_error = None;
        self.warnings
            .retain(|w| !matches!(w, PaymentError::InsufficientBalance { .. }));
    }

    fn expect_state(
        &self,
        action: &str,
        allowed: &[NegotiationState],
    ) -> Result<(), PaymentError> {
        if allowed.contains(&self.state) {
            Ok(())
        } else {
            Err(self.invalid_state(action))
        }
    }

    fn invalid_state(&self, action: &str) -> PaymentError {
        PaymentError::InvalidState(format!("cannot {action} while {}", self.state))
    }

    fn transition(&mut self, next: NegotiationState) {
        debug!(payment_id = %self.payment_id, from = %self.state, to = %next, "negotiation transition");
        self.state = next;
        self.history.push(next);
    }

    fn fail(&mut self, err: PaymentError) -> PaymentError {
        self.last_error = Some(err.clone());
        err
    }
}

impl Drop for Negotiation {
    fn drop(&mut self) {
        if !self.signed_once {
            self.release();
        }
    }
}

const fn unusable_document(err: &PaymentError) -> bool {
    err.is_fatal() || matches!(err, PaymentError::UnknownNetwork(_))
}
