//! The "exact" scheme on EVM chains: a fixed amount moved by ERC-3009
//! `transferWithAuthorization`, signed off-chain as EIP-712 typed data.

use alloy_sol_types::sol;

pub mod authorization;

pub use authorization::{
    AuthorizationBuilder, DEFAULT_VALIDITY_SECS, TypedAuthorization, ValidAfterPolicy,
};

sol!(
    /// ERC-3009 `TransferWithAuthorization` as signed in EIP-712 typed data.
    ///
    /// Field order and types define the EIP-712 type hash and must not change.
    #[derive(Debug, PartialEq, Eq)]
    struct TransferWithAuthorization {
        address from;
        address to;
        uint256 value;
        uint256 validAfter;
        uint256 validBefore;
        bytes32 nonce;
    }
);

sol! {
    /// Read-only slice of ERC-20 used for balance checks.
    #[allow(missing_docs)]
    #[derive(Debug)]
    interface IERC20 {
        function balanceOf(address account) external view returns (uint256);
    }
}
