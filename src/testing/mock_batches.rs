//! Mock Batch Helpers
//!
//! Builders for deposits and batches, and a [`TestEnvironment`] that wires a full set of
//! mocks into an executor.

use std::sync::Arc;

use alloy::primitives::U256;

use super::{
    BalanceValidatorMock, EthereumMock, SignaturesHolderMock, SourceChainMock, StatusHandlerMock,
    TopologyMock,
};
use crate::executor::{BridgeExecutor, ExecutorBuilder};
use crate::types::{DepositTransfer, TransferBatch};

/// A deposit moving `amount` of `source_token` into `destination_token`
pub fn deposit(
    nonce: u64,
    source_token: &[u8],
    destination_token: &[u8],
    amount: u64,
) -> DepositTransfer {
    DepositTransfer {
        nonce,
        to_bytes: vec![0x22; 20],
        displayable_to: format!("to-{}", nonce),
        from_bytes: vec![0x11; 32],
        displayable_from: format!("from-{}", nonce),
        source_token_bytes: source_token.to_vec(),
        displayable_token: String::from_utf8_lossy(source_token).into_owned(),
        destination_token_bytes: destination_token.to_vec(),
        amount: U256::from(amount),
        ..Default::default()
    }
}

pub fn batch(id: u64, deposits: Vec<DepositTransfer>) -> TransferBatch {
    TransferBatch {
        id,
        block_number: 1000 + id,
        deposits,
        statuses: Vec::new(),
    }
}

/// Every collaborator an executor needs, as mocks
pub struct TestEnvironment {
    pub source: Arc<SourceChainMock>,
    pub ethereum: Arc<EthereumMock>,
    pub topology: Arc<TopologyMock>,
    pub status_handler: Arc<StatusHandlerMock>,
    pub signatures_holder: Arc<SignaturesHolderMock>,
    pub balance_validator: Arc<BalanceValidatorMock>,
}

impl TestEnvironment {
    /// Fresh mocks; this relayer is the leader
    pub fn new() -> Self {
        Self {
            source: Arc::new(SourceChainMock::default()),
            ethereum: Arc::new(EthereumMock::default()),
            topology: Arc::new(TopologyMock::default()),
            status_handler: Arc::new(StatusHandlerMock::default()),
            signatures_holder: Arc::new(SignaturesHolderMock::default()),
            balance_validator: Arc::new(BalanceValidatorMock::default()),
        }
    }

    /// Builder with every collaborator set and the default config
    pub fn builder(&self) -> ExecutorBuilder {
        ExecutorBuilder::new("test-executor")
            .source_client(self.source.clone())
            .ethereum_client(self.ethereum.clone())
            .topology_provider(self.topology.clone())
            .status_handler(self.status_handler.clone())
            .signatures_holder(self.signatures_holder.clone())
            .balance_validator(self.balance_validator.clone())
    }

    pub fn executor(&self) -> BridgeExecutor {
        self.builder()
            .build()
            .expect("mock environment builds an executor")
    }
}

impl Default for TestEnvironment {
    fn default() -> Self {
        Self::new()
    }
}
