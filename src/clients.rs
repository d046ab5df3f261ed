//! Collaborator interfaces consumed by the relayer core
//!
//! The concrete chain clients (transaction building, signing, gas estimation), the leader
//! election, the peer-to-peer signature store and the status sink all live outside this
//! crate. The executor only talks to them through the traits below.

use alloy::primitives::{Address, B256, U256};
use async_trait::async_trait;
use eyre::Result;

use crate::types::{ArgListsBatch, Direction, FetchedBatch, ScDepositEvent, TransferBatch};

/// Status metric: number of batches processed so far
pub const METRIC_NUM_BATCHES: &str = "num batches";
/// Status metric: last warning or error reported by the executor
pub const METRIC_LAST_ERROR: &str = "last error";

/// Client for the source chain, which hosts the multisig contract proposals are voted on
#[async_trait]
pub trait SourceChainClient: Send + Sync {
    /// Current pending batch, `None` when nothing is pending
    async fn get_pending_batch(&self) -> Result<Option<TransferBatch>>;
    /// Batch by id, `None` when no such batch exists
    async fn get_batch(&self, batch_id: u64) -> Result<Option<TransferBatch>>;
    async fn get_last_executed_eth_batch_id(&self) -> Result<u64>;
    async fn get_last_executed_eth_tx_id(&self) -> Result<u64>;

    async fn was_proposed_transfer(&self, batch: &TransferBatch) -> Result<bool>;
    async fn get_action_id_for_propose_transfer(&self, batch: &TransferBatch) -> Result<u64>;
    async fn propose_transfer(&self, batch: &TransferBatch) -> Result<String>;

    async fn was_proposed_set_status(&self, batch: &TransferBatch) -> Result<bool>;
    async fn get_action_id_for_set_status_on_pending_transfer(
        &self,
        batch: &TransferBatch,
    ) -> Result<u64>;
    async fn propose_set_status(&self, batch: &TransferBatch) -> Result<String>;

    async fn was_signed(&self, action_id: u64) -> Result<bool>;
    async fn sign(&self, action_id: u64) -> Result<String>;
    async fn quorum_reached(&self, action_id: u64) -> Result<bool>;
    async fn was_executed(&self, action_id: u64) -> Result<bool>;
    async fn perform_action(&self, action_id: u64, batch: &TransferBatch) -> Result<String>;

    async fn check_required_balance(&self, token: &[u8], amount: U256) -> Result<()>;
    async fn total_balances(&self, token: &[u8]) -> Result<U256>;
    async fn mint_balances(&self, token: &[u8]) -> Result<U256>;
    async fn burn_balances(&self, token: &[u8]) -> Result<U256>;
    async fn is_mint_burn_token(&self, token: &[u8]) -> Result<bool>;
    async fn is_native_token(&self, token: &[u8]) -> Result<bool>;

    async fn check_client_availability(&self) -> Result<()>;
}

/// Client for the Ethereum-compatible chain
#[async_trait]
pub trait EthereumClient: Send + Sync {
    /// Batch by nonce. A missing batch comes back with a different id or no deposits.
    async fn get_batch(&self, nonce: u64) -> Result<FetchedBatch>;
    async fn get_batch_sc_metadata(
        &self,
        batch_id: u64,
        block_number: u64,
    ) -> Result<Vec<ScDepositEvent>>;
    async fn was_executed(&self, batch_id: u64) -> Result<bool>;

    async fn generate_message_hash(&self, lists: &ArgListsBatch, batch_id: u64) -> Result<B256>;
    fn broadcast_signature_for_message_hash(&self, msg_hash: B256);
    async fn execute_transfer(
        &self,
        msg_hash: B256,
        lists: &ArgListsBatch,
        batch_id: u64,
        quorum: u64,
    ) -> Result<String>;
    async fn get_quorum_size(&self) -> Result<u64>;
    async fn is_quorum_reached(&self, msg_hash: B256) -> Result<bool>;
    /// Per-deposit statuses, empty while the batch is not final
    async fn get_transactions_statuses(&self, batch_id: u64) -> Result<Vec<u8>>;

    async fn check_required_balance(&self, token: Address, amount: U256) -> Result<()>;
    async fn total_balances(&self, token: Address) -> Result<U256>;
    async fn mint_balances(&self, token: Address) -> Result<U256>;
    async fn burn_balances(&self, token: Address) -> Result<U256>;
    async fn is_mint_burn_token(&self, token: Address) -> Result<bool>;
    async fn is_native_token(&self, token: Address) -> Result<bool>;

    async fn check_client_availability(&self) -> Result<()>;
}

/// Leader election, computed elsewhere
pub trait TopologyProvider: Send + Sync {
    fn my_turn_as_leader(&self) -> bool;
}

/// Peer-to-peer store of Ethereum signatures gathered from the other relayers
pub trait SignaturesHolder: Send + Sync {
    fn clear_stored_signatures(&self);
}

/// Sink for status values reported by the executor
pub trait StatusHandler: Send + Sync {
    fn set_int_metric(&self, metric: &str, value: i64);
    fn set_string_metric(&self, metric: &str, value: String);
    fn name(&self) -> &str;
}

/// Decides whether moving `amount` of a token pair is currently safe
#[async_trait]
pub trait BalanceValidator: Send + Sync {
    async fn check_token(
        &self,
        eth_token: Address,
        source_token: &[u8],
        amount: U256,
        direction: Direction,
    ) -> Result<()>;
}
