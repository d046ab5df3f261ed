//! Programmable chain clients
//!
//! Each mock keeps its chain in a public state struct behind a mutex. Mutating calls
//! (propose, sign, perform, execute) update that state the way the real contracts would, so
//! a full flow can be driven against a pair of mocks.

use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};

use alloy::primitives::{Address, B256, U256};
use async_trait::async_trait;
use eyre::Result;

use super::CallRecorder;
use crate::clients::{EthereumClient, SourceChainClient};
use crate::types::{ArgListsBatch, FetchedBatch, ScDepositEvent, TransferBatch};

/// Balance and classification of one token on one chain
#[derive(Debug, Clone, Default)]
pub struct TokenBalances {
    pub total: U256,
    pub mint: U256,
    pub burn: U256,
    pub is_mint_burn: bool,
    pub is_native: bool,
}

#[derive(Debug, Default)]
pub struct SourceChainState {
    pub pending_batch: Option<TransferBatch>,
    /// Older batches, looked up by [`SourceChainClient::get_batch`]
    pub batches: HashMap<u64, TransferBatch>,
    pub last_executed_eth_batch_id: u64,
    pub last_executed_eth_tx_id: u64,
    pub transfer_proposed: bool,
    pub set_status_proposed: bool,
    /// Action id handed out for either proposal kind
    pub action_id: u64,
    pub signed: bool,
    pub quorum_reached: bool,
    pub executed: bool,
    pub proposed_transfers: Vec<u64>,
    /// Batch id and statuses of every set-status proposal
    pub proposed_set_statuses: Vec<(u64, Vec<u8>)>,
    /// Action id and batch id of every performed action
    pub performed_actions: Vec<(u64, u64)>,
    pub balances: HashMap<Vec<u8>, TokenBalances>,
}

/// In-memory source chain
#[derive(Debug, Default)]
pub struct SourceChainMock {
    state: Mutex<SourceChainState>,
    calls: CallRecorder,
}

impl SourceChainMock {
    pub fn state(&self) -> MutexGuard<'_, SourceChainState> {
        self.state.lock().unwrap()
    }

    /// Makes the next call to `method` fail
    pub fn fail(&self, method: &'static str) {
        self.calls.fail(method);
    }

    pub fn call_count(&self, method: &str) -> usize {
        self.calls.call_count(method)
    }

    fn token(&self, token: &[u8]) -> TokenBalances {
        self.state().balances.get(token).cloned().unwrap_or_default()
    }
}

#[async_trait]
impl SourceChainClient for SourceChainMock {
    async fn get_pending_batch(&self) -> Result<Option<TransferBatch>> {
        self.calls.record("get_pending_batch")?;
        Ok(self.state().pending_batch.clone())
    }

    async fn get_batch(&self, batch_id: u64) -> Result<Option<TransferBatch>> {
        self.calls.record("get_batch")?;
        let state = self.state();
        if let Some(pending) = state.pending_batch.as_ref().filter(|b| b.id == batch_id) {
            return Ok(Some(pending.clone()));
        }
        Ok(state.batches.get(&batch_id).cloned())
    }

    async fn get_last_executed_eth_batch_id(&self) -> Result<u64> {
        self.calls.record("get_last_executed_eth_batch_id")?;
        Ok(self.state().last_executed_eth_batch_id)
    }

    async fn get_last_executed_eth_tx_id(&self) -> Result<u64> {
        self.calls.record("get_last_executed_eth_tx_id")?;
        Ok(self.state().last_executed_eth_tx_id)
    }

    async fn was_proposed_transfer(&self, _batch: &TransferBatch) -> Result<bool> {
        self.calls.record("was_proposed_transfer")?;
        Ok(self.state().transfer_proposed)
    }

    async fn get_action_id_for_propose_transfer(&self, _batch: &TransferBatch) -> Result<u64> {
        self.calls.record("get_action_id_for_propose_transfer")?;
        Ok(self.state().action_id)
    }

    async fn propose_transfer(&self, batch: &TransferBatch) -> Result<String> {
        self.calls.record("propose_transfer")?;
        let mut state = self.state();
        state.transfer_proposed = true;
        state.proposed_transfers.push(batch.id);
        Ok(format!("propose-transfer-{}", batch.id))
    }

    async fn was_proposed_set_status(&self, _batch: &TransferBatch) -> Result<bool> {
        self.calls.record("was_proposed_set_status")?;
        Ok(self.state().set_status_proposed)
    }

    async fn get_action_id_for_set_status_on_pending_transfer(
        &self,
        _batch: &TransferBatch,
    ) -> Result<u64> {
        self.calls
            .record("get_action_id_for_set_status_on_pending_transfer")?;
        Ok(self.state().action_id)
    }

    async fn propose_set_status(&self, batch: &TransferBatch) -> Result<String> {
        self.calls.record("propose_set_status")?;
        let mut state = self.state();
        state.set_status_proposed = true;
        state
            .proposed_set_statuses
            .push((batch.id, batch.statuses.clone()));
        Ok(format!("propose-set-status-{}", batch.id))
    }

    async fn was_signed(&self, _action_id: u64) -> Result<bool> {
        self.calls.record("was_signed")?;
        Ok(self.state().signed)
    }

    async fn sign(&self, action_id: u64) -> Result<String> {
        self.calls.record("sign")?;
        self.state().signed = true;
        Ok(format!("sign-{}", action_id))
    }

    async fn quorum_reached(&self, _action_id: u64) -> Result<bool> {
        self.calls.record("quorum_reached")?;
        Ok(self.state().quorum_reached)
    }

    async fn was_executed(&self, _action_id: u64) -> Result<bool> {
        self.calls.record("was_executed")?;
        Ok(self.state().executed)
    }

    async fn perform_action(&self, action_id: u64, batch: &TransferBatch) -> Result<String> {
        self.calls.record("perform_action")?;
        let mut state = self.state();
        state.executed = true;
        state.performed_actions.push((action_id, batch.id));
        Ok(format!("perform-{}", action_id))
    }

    async fn check_required_balance(&self, _token: &[u8], _amount: U256) -> Result<()> {
        self.calls.record("check_required_balance")
    }

    async fn total_balances(&self, token: &[u8]) -> Result<U256> {
        self.calls.record("total_balances")?;
        Ok(self.token(token).total)
    }

    async fn mint_balances(&self, token: &[u8]) -> Result<U256> {
        self.calls.record("mint_balances")?;
        Ok(self.token(token).mint)
    }

    async fn burn_balances(&self, token: &[u8]) -> Result<U256> {
        self.calls.record("burn_balances")?;
        Ok(self.token(token).burn)
    }

    async fn is_mint_burn_token(&self, token: &[u8]) -> Result<bool> {
        self.calls.record("is_mint_burn_token")?;
        Ok(self.token(token).is_mint_burn)
    }

    async fn is_native_token(&self, token: &[u8]) -> Result<bool> {
        self.calls.record("is_native_token")?;
        Ok(self.token(token).is_native)
    }

    async fn check_client_availability(&self) -> Result<()> {
        self.calls.record("check_client_availability")
    }
}

#[derive(Debug, Default)]
pub struct EthereumState {
    pub batches: HashMap<u64, FetchedBatch>,
    pub sc_events: Vec<ScDepositEvent>,
    /// Batch ids executed on Ethereum
    pub executed_batches: HashSet<u64>,
    /// Hash returned by [`EthereumClient::generate_message_hash`]
    pub msg_hash: B256,
    pub broadcasted: Vec<B256>,
    /// Message hash, batch id and quorum of every executed transfer
    pub executed_transfers: Vec<(B256, u64, u64)>,
    pub quorum_size: u64,
    pub quorum_reached: bool,
    pub statuses: HashMap<u64, Vec<u8>>,
    pub balances: HashMap<Address, TokenBalances>,
}

/// In-memory Ethereum chain
#[derive(Debug, Default)]
pub struct EthereumMock {
    state: Mutex<EthereumState>,
    calls: CallRecorder,
}

impl EthereumMock {
    pub fn state(&self) -> MutexGuard<'_, EthereumState> {
        self.state.lock().unwrap()
    }

    pub fn insert_batch(&self, batch: TransferBatch, is_final: bool) {
        self.state()
            .batches
            .insert(batch.id, FetchedBatch { batch, is_final });
    }

    /// Makes the next call to `method` fail
    pub fn fail(&self, method: &'static str) {
        self.calls.fail(method);
    }

    pub fn call_count(&self, method: &str) -> usize {
        self.calls.call_count(method)
    }

    fn token(&self, token: Address) -> TokenBalances {
        self.state().balances.get(&token).cloned().unwrap_or_default()
    }
}

#[async_trait]
impl EthereumClient for EthereumMock {
    async fn get_batch(&self, nonce: u64) -> Result<FetchedBatch> {
        self.calls.record("get_batch")?;
        Ok(self.state().batches.get(&nonce).cloned().unwrap_or_default())
    }

    async fn get_batch_sc_metadata(
        &self,
        _batch_id: u64,
        _block_number: u64,
    ) -> Result<Vec<ScDepositEvent>> {
        self.calls.record("get_batch_sc_metadata")?;
        Ok(self.state().sc_events.clone())
    }

    async fn was_executed(&self, batch_id: u64) -> Result<bool> {
        self.calls.record("was_executed")?;
        Ok(self.state().executed_batches.contains(&batch_id))
    }

    async fn generate_message_hash(&self, _lists: &ArgListsBatch, _batch_id: u64) -> Result<B256> {
        self.calls.record("generate_message_hash")?;
        Ok(self.state().msg_hash)
    }

    fn broadcast_signature_for_message_hash(&self, msg_hash: B256) {
        // broadcasting cannot fail, an armed failure is simply consumed
        let _ = self.calls.record("broadcast_signature_for_message_hash");
        self.state().broadcasted.push(msg_hash);
    }

    async fn execute_transfer(
        &self,
        msg_hash: B256,
        _lists: &ArgListsBatch,
        batch_id: u64,
        quorum: u64,
    ) -> Result<String> {
        self.calls.record("execute_transfer")?;
        let mut state = self.state();
        state.executed_batches.insert(batch_id);
        state.executed_transfers.push((msg_hash, batch_id, quorum));
        Ok(format!("execute-{}", batch_id))
    }

    async fn get_quorum_size(&self) -> Result<u64> {
        self.calls.record("get_quorum_size")?;
        Ok(self.state().quorum_size)
    }

    async fn is_quorum_reached(&self, _msg_hash: B256) -> Result<bool> {
        self.calls.record("is_quorum_reached")?;
        Ok(self.state().quorum_reached)
    }

    async fn get_transactions_statuses(&self, batch_id: u64) -> Result<Vec<u8>> {
        self.calls.record("get_transactions_statuses")?;
        Ok(self
            .state()
            .statuses
            .get(&batch_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn check_required_balance(&self, _token: Address, _amount: U256) -> Result<()> {
        self.calls.record("check_required_balance")
    }

    async fn total_balances(&self, token: Address) -> Result<U256> {
        self.calls.record("total_balances")?;
        Ok(self.token(token).total)
    }

    async fn mint_balances(&self, token: Address) -> Result<U256> {
        self.calls.record("mint_balances")?;
        Ok(self.token(token).mint)
    }

    async fn burn_balances(&self, token: Address) -> Result<U256> {
        self.calls.record("burn_balances")?;
        Ok(self.token(token).burn)
    }

    async fn is_mint_burn_token(&self, token: Address) -> Result<bool> {
        self.calls.record("is_mint_burn_token")?;
        Ok(self.token(token).is_mint_burn)
    }

    async fn is_native_token(&self, token: Address) -> Result<bool> {
        self.calls.record("is_native_token")?;
        Ok(self.token(token).is_native)
    }

    async fn check_client_availability(&self) -> Result<()> {
        self.calls.record("check_client_availability")
    }
}
