//! EIP-712 typed data for ERC-3009 payments.
//!
//! [`AuthorizationBuilder`] turns a selected requirement into a
//! [`TypedAuthorization`]: the domain, the `TransferWithAuthorization`
//! message, and the same authorization in transport form. It never signs;
//! that is the wallet's job.

use std::fmt;
use std::str::FromStr;

use alloy_primitives::{Address, B256, Bytes, U256};
use alloy_sol_types::{Eip712Domain, SolStruct, eip712_domain};
use p402::amount::{MoneyAmount, TokenAmount};
use p402::error::PaymentError;
use p402::proto::{PaymentAuthorization, PaymentEnvelope, PaymentRequirement};
use p402::timestamp::UnixTimestamp;
use rand::RngExt;
use rand::rng;
use serde_json::{Value, json};
use serde_with::{DeserializeFromStr, SerializeDisplay};

use super::TransferWithAuthorization;

/// Default forward validity of an authorization.
pub const DEFAULT_VALIDITY_SECS: u64 = 3600;

/// How `validAfter` is chosen.
///
/// Parsed from and rendered as `epoch`, `now`, or `skew:<seconds>`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, SerializeDisplay, DeserializeFromStr)]
pub enum ValidAfterPolicy {
    /// `validAfter = 0`: valid immediately regardless of clock drift.
    #[default]
    Epoch,
    /// `validAfter = now`.
    Now,
    /// `validAfter = now - seconds`.
    Skewed(u64),
}

impl ValidAfterPolicy {
    /// Resolves the policy against the current time.
    #[must_use]
    pub fn resolve(self, now: UnixTimestamp) -> UnixTimestamp {
        match self {
            Self::Epoch => UnixTimestamp::EPOCH,
            Self::Now => now,
            Self::Skewed(seconds) => now - seconds,
        }
    }
}

impl fmt::Display for ValidAfterPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Epoch => f.write_str("epoch"),
            Self::Now => f.write_str("now"),
            Self::Skewed(seconds) => write!(f, "skew:{seconds}"),
        }
    }
}

/// Unrecognized [`ValidAfterPolicy`] text.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid validAfter policy {0:?}, expected epoch, now or skew:<seconds>")]
pub struct ValidAfterPolicyError(String);

impl FromStr for ValidAfterPolicy {
    type Err = ValidAfterPolicyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "epoch" | "0" => Ok(Self::Epoch),
            "now" => Ok(Self::Now),
            other => other
                .strip_prefix("skew:")
                .and_then(|secs| secs.trim().parse().ok())
                .map(Self::Skewed)
                .ok_or_else(|| ValidAfterPolicyError(s.to_owned())),
        }
    }
}

/// A ready-to-sign ERC-3009 authorization.
#[derive(Debug, Clone)]
pub struct TypedAuthorization {
    /// EIP-712 domain of the token contract.
    pub domain: Eip712Domain,
    /// The message, with `U256` values.
    pub message: TransferWithAuthorization,
    /// The same authorization in transport form.
    pub authorization: PaymentAuthorization,
    /// Network label the envelope must carry.
    pub network_label: String,
    token_name: String,
    token_version: String,
    chain_id: u64,
    asset: Address,
}

impl TypedAuthorization {
    /// EIP-712 primary type.
    pub const PRIMARY_TYPE: &'static str = "TransferWithAuthorization";

    /// Numeric chain id of the domain.
    #[must_use]
    pub const fn chain_id(&self) -> u64 {
        self.chain_id
    }

    /// Token contract, the EIP-712 verifying contract.
    #[must_use]
    pub const fn verifying_contract(&self) -> Address {
        self.asset
    }

    /// EIP-712 domain name.
    #[must_use]
    pub fn token_name(&self) -> &str {
        &self.token_name
    }

    /// EIP-712 domain version.
    #[must_use]
    pub fn token_version(&self) -> &str {
        &self.token_version
    }

    /// The EIP-712 digest a wallet signs.
    #[must_use]
    pub fn signing_hash(&self) -> B256 {
        self.message.eip712_signing_hash(&self.domain)
    }

    /// The fixed type schema, including `EIP712Domain`.
    #[must_use]
    pub fn types() -> Value {
        json!({
            "EIP712Domain": [
                { "name": "name", "type": "string" },
                { "name": "version", "type": "string" },
                { "name": "chainId", "type": "uint256" },
                { "name": "verifyingContract", "type": "address" }
            ],
            "TransferWithAuthorization": [
                { "name": "from", "type": "address" },
                { "name": "to", "type": "address" },
                { "name": "value", "type": "uint256" },
                { "name": "validAfter", "type": "uint256" },
                { "name": "validBefore", "type": "uint256" },
                { "name": "nonce", "type": "bytes32" }
            ]
        })
    }

    /// Renders the request body of `eth_signTypedData_v4`.
    #[must_use]
    pub fn to_json(&self) -> Value {
        json!({
            "types": Self::types(),
            "primaryType": Self::PRIMARY_TYPE,
            "domain": {
                "name": self.token_name,
                "version": self.token_version,
                "chainId": self.chain_id,
                "verifyingContract": self.asset,
            },
            "message": &self.authorization,
        })
    }

    /// Pairs the authorization with its signature.
    #[must_use]
    pub fn into_envelope(self, signature: Bytes) -> PaymentEnvelope {
        PaymentEnvelope {
            network: self.network_label,
            authorization: self.authorization,
            signature,
        }
    }
}

/// Builds [`TypedAuthorization`]s from requirements.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuthorizationBuilder {
    validity_secs: u64,
    valid_after: ValidAfterPolicy,
}

impl Default for AuthorizationBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl AuthorizationBuilder {
    /// One hour of validity, `validAfter` at the epoch.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            validity_secs: DEFAULT_VALIDITY_SECS,
            valid_after: ValidAfterPolicy::Epoch,
        }
    }

    /// Sets the forward validity. Still clamped by each requirement's
    /// `maxTimeoutSeconds`.
    #[must_use]
    pub const fn with_validity_secs(mut self, secs: u64) -> Self {
        self.validity_secs = secs;
        self
    }

    /// Sets the `validAfter` policy.
    #[must_use]
    pub const fn with_valid_after(mut self, policy: ValidAfterPolicy) -> Self {
        self.valid_after = policy;
        self
    }

    /// Atomic amount a requirement asks for.
    ///
    /// An explicit atomic amount wins; otherwise the human price is scaled by
    /// the token's decimals.
    ///
    /// # Errors
    ///
    /// Returns [`PaymentError::InvalidAmount`] for malformed or over-precise
    /// prices, and [`PaymentError::MalformedRequirements`] if neither is set.
    pub fn required_amount(requirement: &PaymentRequirement) -> Result<U256, PaymentError> {
        if let Some(TokenAmount(amount)) = requirement.amount {
            return Ok(amount);
        }
        let price = requirement.price.as_deref().ok_or_else(|| {
            PaymentError::MalformedRequirements(format!(
                "{}: accept option has neither amount nor price",
                requirement.network_label
            ))
        })?;
        Ok(MoneyAmount::parse(price)?.to_atomic(requirement.network.decimals)?)
    }

    /// Builds the typed data for `payer` at the current time.
    ///
    /// # Errors
    ///
    /// See [`AuthorizationBuilder::build_at`].
    pub fn build(
        &self,
        requirement: &PaymentRequirement,
        payer: Address,
        active_chain: Option<u64>,
    ) -> Result<TypedAuthorization, PaymentError> {
        self.build_at(requirement, payer, active_chain, UnixTimestamp::now())
    }

    /// Builds the typed data for `payer` as of `now`.
    ///
    /// # Errors
    ///
    /// Returns [`PaymentError::WrongActiveChain`] when the wallet reports a
    /// chain other than the requirement's, and amount errors as
    /// [`AuthorizationBuilder::required_amount`] does.
    pub fn build_at(
        &self,
        requirement: &PaymentRequirement,
        payer: Address,
        active_chain: Option<u64>,
        now: UnixTimestamp,
    ) -> Result<TypedAuthorization, PaymentError> {
        let required = requirement.chain_id();
        match active_chain {
            Some(active) if active != required => {
                return Err(PaymentError::WrongActiveChain { active, required });
            }
            _ => {}
        }
        let value = Self::required_amount(requirement)?;

        let horizon = requirement
            .max_timeout_seconds
            .filter(|&max| max > 0)
            .map_or(self.validity_secs, |max| max.min(self.validity_secs))
            .max(1);
        let valid_before = now + horizon;
        let valid_after = self
            .valid_after
            .resolve(now)
            .min(valid_before - 1);

        let nonce: [u8; 32] = rng().random();
        let nonce = B256::from(nonce);

        let token_name = requirement
            .extra
            .token_name
            .clone()
            .unwrap_or_else(|| requirement.network.token_name.to_owned());
        let token_version = requirement
            .extra
            .token_version
            .clone()
            .unwrap_or_else(|| requirement.network.token_version.to_owned());

        let domain = eip712_domain! {
            name: token_name.clone(),
            version: token_version.clone(),
            chain_id: required,
            verifying_contract: requirement.asset,
        };

        let authorization = PaymentAuthorization {
            from: payer,
            to: requirement.pay_to,
            value: TokenAmount(value),
            valid_after,
            valid_before,
            nonce,
        };
        let message = TransferWithAuthorization {
            from: authorization.from,
            to: authorization.to,
            value,
            validAfter: U256::from(valid_after.as_secs()),
            validBefore: U256::from(valid_before.as_secs()),
            nonce,
        };

        tracing::debug!(
            network = %requirement.network_label,
            %value,
            valid_before = %valid_before,
            "built transfer authorization"
        );

        Ok(TypedAuthorization {
            domain,
            message,
            authorization,
            network_label: requirement.network_label.clone(),
            token_name,
            token_version,
            chain_id: required,
            asset: requirement.asset,
        })
    }
}
