//! Domain errors raised by the relayer core
//!
//! Collaborator (chain client) failures travel as `eyre::Report`; the variants below are the
//! conditions the core itself detects. They are converted into `eyre::Report` with `?` and can
//! be recovered with `downcast_ref::<BridgeError>()`.

use alloy::primitives::{Address, U256};
use thiserror::Error;

use crate::types::Direction;

#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("nil batch")]
    NilBatch,

    #[error(
        "final batch not found, requested nonce: {requested}, fetched nonce: {fetched}, num deposits: {num_deposits}"
    )]
    FinalBatchNotFound {
        requested: u64,
        fetched: u64,
        num_deposits: usize,
    },

    #[error("invalid deposit nonce for deposit {deposit}, expected: {expected}")]
    InvalidDepositNonce { deposit: String, expected: u64 },

    #[error("invalid action id {action_id} for batch {batch_id}")]
    InvalidActionId { action_id: u64, batch_id: u64 },

    #[error("invalid call data: {0}")]
    InvalidCallData(String),

    #[error("missing collaborator: {0}")]
    MissingCollaborator(&'static str),

    #[error("invalid config: {0}")]
    InvalidConfig(String),

    #[error("unknown step identifier: {0}")]
    UnknownStep(String),

    #[error("invalid token setup: {0}")]
    InvalidTokenSetup(String),

    #[error("negative amount on {chain} for token {token}")]
    NegativeAmount { chain: &'static str, token: String },

    #[error(
        "balance mismatch, balance for Ethereum token {eth_token} is {eth_amount} and the balance for source token {source_token} is {source_amount}, direction {direction}"
    )]
    BalanceMismatch {
        eth_token: Address,
        eth_amount: U256,
        source_token: String,
        source_amount: U256,
        direction: Direction,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_final_batch_not_found_message() {
        let err = BridgeError::FinalBatchNotFound {
            requested: 7,
            fetched: 6,
            num_deposits: 0,
        };
        assert_eq!(
            err.to_string(),
            "final batch not found, requested nonce: 7, fetched nonce: 6, num deposits: 0"
        );
    }

    #[test]
    fn test_downcast_through_eyre() {
        let report: eyre::Report = BridgeError::NilBatch.into();
        assert!(matches!(
            report.downcast_ref::<BridgeError>(),
            Some(BridgeError::NilBatch)
        ));
    }
}
