//! Bridge executor
//!
//! The executor is the single authority behind every step: it holds the batch of the current
//! cycle, the on-chain action id and the Ethereum message hash, wraps the collaborator calls
//! and keeps the retry counters. It never decides which step runs next.

mod retry;

pub use retry::RetryCounter;

use std::collections::HashMap;
use std::fmt::{self, Display, Write as _};
use std::sync::Arc;
use std::time::Duration;

use alloy::primitives::{Address, B256, U256};
use eyre::{Result, WrapErr};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn, Level};

use crate::call_data::{encode_call_data, MISSING_DATA_MARKER};
use crate::clients::{
    BalanceValidator, EthereumClient, SignaturesHolder, SourceChainClient, StatusHandler,
    TopologyProvider, METRIC_LAST_ERROR, METRIC_NUM_BATCHES,
};
use crate::errors::BridgeError;
use crate::types::{extract_list_to_ethereum, ArgListsBatch, FetchedBatch, ScDepositEvent, TransferBatch};

/// Reserved action id meaning "no valid action"
pub const INVALID_ACTION_ID: u64 = 0;
/// Smallest accepted wait budget for an Ethereum confirmation
pub const MIN_TIME_FOR_WAIT_ON_ETHEREUM: Duration = Duration::from_secs(1);
/// Number of sub-intervals a wait budget is split into
pub const WAIT_SPLITS: u32 = 10;

/// Tunables of the executor
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutorConfig {
    pub max_quorum_retries_on_ethereum: u64,
    pub max_quorum_retries_on_source: u64,
    pub max_retries_on_was_proposed: u64,
    pub time_for_wait_on_ethereum: Duration,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            max_quorum_retries_on_ethereum: 3,
            max_quorum_retries_on_source: 3,
            max_retries_on_was_proposed: 3,
            time_for_wait_on_ethereum: Duration::from_secs(10),
        }
    }
}

impl ExecutorConfig {
    /// Checks the floors every executor relies on
    pub fn validate(&self) -> Result<(), BridgeError> {
        if self.time_for_wait_on_ethereum < MIN_TIME_FOR_WAIT_ON_ETHEREUM {
            return Err(BridgeError::InvalidConfig(format!(
                "time for wait on Ethereum {:?} is below the minimum of {:?}",
                self.time_for_wait_on_ethereum, MIN_TIME_FOR_WAIT_ON_ETHEREUM
            )));
        }

        for (name, value) in [
            ("max quorum retries on Ethereum", self.max_quorum_retries_on_ethereum),
            ("max quorum retries on source chain", self.max_quorum_retries_on_source),
            ("max retries on was proposed", self.max_retries_on_was_proposed),
        ] {
            if value < 1 {
                return Err(BridgeError::InvalidConfig(format!(
                    "{} must be at least 1, got {}",
                    name, value
                )));
            }
        }

        Ok(())
    }
}

/// Collects the collaborators of a [`BridgeExecutor`] and validates them once
#[derive(Default)]
pub struct ExecutorBuilder {
    executor_name: String,
    source: Option<Arc<dyn SourceChainClient>>,
    ethereum: Option<Arc<dyn EthereumClient>>,
    topology: Option<Arc<dyn TopologyProvider>>,
    status_handler: Option<Arc<dyn StatusHandler>>,
    signatures_holder: Option<Arc<dyn SignaturesHolder>>,
    balance_validator: Option<Arc<dyn BalanceValidator>>,
    config: ExecutorConfig,
}

impl ExecutorBuilder {
    /// `executor_name` is attached to every log line of the executor
    pub fn new(executor_name: impl Into<String>) -> Self {
        Self {
            executor_name: executor_name.into(),
            ..Default::default()
        }
    }

    pub fn source_client(mut self, client: Arc<dyn SourceChainClient>) -> Self {
        self.source = Some(client);
        self
    }

    pub fn ethereum_client(mut self, client: Arc<dyn EthereumClient>) -> Self {
        self.ethereum = Some(client);
        self
    }

    pub fn topology_provider(mut self, topology: Arc<dyn TopologyProvider>) -> Self {
        self.topology = Some(topology);
        self
    }

    pub fn status_handler(mut self, handler: Arc<dyn StatusHandler>) -> Self {
        self.status_handler = Some(handler);
        self
    }

    pub fn signatures_holder(mut self, holder: Arc<dyn SignaturesHolder>) -> Self {
        self.signatures_holder = Some(holder);
        self
    }

    pub fn balance_validator(mut self, validator: Arc<dyn BalanceValidator>) -> Self {
        self.balance_validator = Some(validator);
        self
    }

    pub fn config(mut self, config: ExecutorConfig) -> Self {
        self.config = config;
        self
    }

    pub fn build(self) -> Result<BridgeExecutor> {
        if self.executor_name.is_empty() {
            return Err(BridgeError::InvalidConfig("empty executor name".to_string()).into());
        }
        let source = self
            .source
            .ok_or(BridgeError::MissingCollaborator("source chain client"))?;
        let ethereum = self
            .ethereum
            .ok_or(BridgeError::MissingCollaborator("Ethereum client"))?;
        let topology = self
            .topology
            .ok_or(BridgeError::MissingCollaborator("topology provider"))?;
        let status_handler = self
            .status_handler
            .ok_or(BridgeError::MissingCollaborator("status handler"))?;
        let signatures_holder = self
            .signatures_holder
            .ok_or(BridgeError::MissingCollaborator("signatures holder"))?;
        let balance_validator = self
            .balance_validator
            .ok_or(BridgeError::MissingCollaborator("balance validator"))?;
        self.config.validate()?;

        info!(
            executor = %self.executor_name,
            status_handler = status_handler.name(),
            max_quorum_retries_on_ethereum = self.config.max_quorum_retries_on_ethereum,
            max_quorum_retries_on_source = self.config.max_quorum_retries_on_source,
            max_retries_on_was_proposed = self.config.max_retries_on_was_proposed,
            time_for_wait_on_ethereum = ?self.config.time_for_wait_on_ethereum,
            "bridge executor created"
        );

        Ok(BridgeExecutor {
            quorum_retries_on_ethereum: RetryCounter::new(
                "quorum on Ethereum",
                self.config.max_quorum_retries_on_ethereum,
            ),
            quorum_retries_on_source: RetryCounter::new(
                "quorum on source chain",
                self.config.max_quorum_retries_on_source,
            ),
            retries_on_was_proposed: RetryCounter::new(
                "was transfer proposed",
                self.config.max_retries_on_was_proposed,
            ),
            executor_name: self.executor_name,
            source,
            ethereum,
            topology,
            status_handler,
            signatures_holder,
            balance_validator,
            time_for_wait_on_ethereum: self.config.time_for_wait_on_ethereum,
            batch: None,
            action_id: INVALID_ACTION_ID,
            msg_hash: B256::ZERO,
        })
    }
}

/// Per-flow executor: collaborators plus the transient state of one cycle
pub struct BridgeExecutor {
    executor_name: String,
    source: Arc<dyn SourceChainClient>,
    ethereum: Arc<dyn EthereumClient>,
    topology: Arc<dyn TopologyProvider>,
    status_handler: Arc<dyn StatusHandler>,
    signatures_holder: Arc<dyn SignaturesHolder>,
    balance_validator: Arc<dyn BalanceValidator>,
    time_for_wait_on_ethereum: Duration,

    batch: Option<TransferBatch>,
    action_id: u64,
    msg_hash: B256,
    quorum_retries_on_ethereum: RetryCounter,
    quorum_retries_on_source: RetryCounter,
    retries_on_was_proposed: RetryCounter,
}

impl BridgeExecutor {
    pub fn executor_name(&self) -> &str {
        &self.executor_name
    }

    /// Logs `message` with `key = value` extras. Warnings and errors also become the
    /// `last error` status metric.
    pub fn print_info(&self, level: Level, message: &str, extras: &[(&str, &dyn Display)]) {
        let rendered = render_extras(extras);
        let executor = self.executor_name.as_str();

        match level {
            Level::ERROR => error!(executor = %executor, "{}{}", message, rendered),
            Level::WARN => warn!(executor = %executor, "{}{}", message, rendered),
            Level::INFO => info!(executor = %executor, "{}{}", message, rendered),
            Level::DEBUG => debug!(executor = %executor, "{}{}", message, rendered),
            _ => trace!(executor = %executor, "{}{}", message, rendered),
        }

        if level == Level::ERROR || level == Level::WARN {
            self.status_handler
                .set_string_metric(METRIC_LAST_ERROR, format!("{}: {}{}", level, message, rendered));
        }
    }

    fn set_num_batches(&self, num_batches: u64) {
        self.status_handler
            .set_int_metric(METRIC_NUM_BATCHES, i64::try_from(num_batches).unwrap_or(i64::MAX));
    }

    fn stored_batch(&self) -> Result<&TransferBatch, BridgeError> {
        self.batch.as_ref().ok_or(BridgeError::NilBatch)
    }

    // ------------------------------------------------------------------
    // Batch fetch and storage
    // ------------------------------------------------------------------

    /// Fetches the pending batch of the source chain without storing it
    pub async fn get_batch_from_source(&self) -> Result<Option<TransferBatch>> {
        let batch = self
            .source
            .get_pending_batch()
            .await
            .wrap_err("failed to fetch the pending batch from the source chain")?;

        if let Some(batch) = &batch {
            self.set_num_batches(batch.id.saturating_sub(1));
            debug!(executor = %self.executor_name, batch_id = batch.id, "fetched pending batch from source chain");
        }

        Ok(batch)
    }

    pub fn store_batch_from_source(&mut self, batch: TransferBatch) {
        self.batch = Some(batch);
        self.action_id = INVALID_ACTION_ID;
    }

    pub fn get_stored_batch(&self) -> Option<&TransferBatch> {
        self.batch.as_ref()
    }

    pub async fn get_last_executed_eth_batch_id_from_source(&self) -> Result<u64> {
        let batch_id = self.source.get_last_executed_eth_batch_id().await?;
        self.set_num_batches(batch_id);
        Ok(batch_id)
    }

    /// Fetches the Ethereum batch `nonce`, accepting it only when it exists, carries deposits
    /// and is final. Call data from the smart-contract events is attached before storing.
    pub async fn get_and_store_batch_from_ethereum(&mut self, nonce: u64) -> Result<()> {
        self.batch = None;

        let FetchedBatch { mut batch, is_final } = self
            .ethereum
            .get_batch(nonce)
            .await
            .wrap_err_with(|| format!("failed to fetch Ethereum batch {}", nonce))?;

        if batch.id != nonce || batch.deposits.is_empty() || !is_final {
            return Err(BridgeError::FinalBatchNotFound {
                requested: nonce,
                fetched: batch.id,
                num_deposits: batch.deposits.len(),
            }
            .into());
        }

        let events = self
            .ethereum
            .get_batch_sc_metadata(batch.id, batch.block_number)
            .await
            .wrap_err_with(|| format!("failed to fetch call data events for batch {}", nonce))?;
        apply_sc_metadata(&mut batch, &events)?;

        self.batch = Some(batch);
        Ok(())
    }

    pub fn store_batch_statuses(&mut self, statuses: Vec<u8>) -> Result<()> {
        let batch = self.batch.as_mut().ok_or(BridgeError::NilBatch)?;
        batch.statuses = statuses;
        Ok(())
    }

    pub fn resolve_new_deposits_statuses(&mut self, num_deposits: usize) -> Result<()> {
        let batch = self.batch.as_mut().ok_or(BridgeError::NilBatch)?;
        batch.resolve_new_deposits(num_deposits);
        Ok(())
    }

    /// Requires the stored batch's deposit nonces to continue the last nonce executed on
    /// the source chain without gaps
    pub async fn verify_last_deposit_nonce_executed_on_ethereum_batch(&self) -> Result<()> {
        let batch = self.stored_batch()?;
        let last_nonce = self.source.get_last_executed_eth_tx_id().await?;
        verify_deposit_nonces(batch, last_nonce)?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Source chain actions
    // ------------------------------------------------------------------

    pub async fn get_and_store_action_id_for_propose_transfer_on_source(&mut self) -> Result<u64> {
        let batch = self.stored_batch()?;
        let action_id = self.source.get_action_id_for_propose_transfer(batch).await?;
        self.action_id = action_id;
        Ok(action_id)
    }

    pub async fn get_and_store_action_id_for_propose_set_status_on_source(
        &mut self,
    ) -> Result<u64> {
        let batch = self.stored_batch()?;
        let action_id = self
            .source
            .get_action_id_for_set_status_on_pending_transfer(batch)
            .await?;
        self.action_id = action_id;
        Ok(action_id)
    }

    pub fn get_stored_action_id(&self) -> u64 {
        self.action_id
    }

    pub async fn was_transfer_proposed_on_source(&self) -> Result<bool> {
        let batch = self.stored_batch()?;
        self.source.was_proposed_transfer(batch).await
    }

    pub async fn propose_transfer_on_source(&self) -> Result<()> {
        let batch = self.stored_batch()?;
        let tx_hash = self.source.propose_transfer(batch).await?;
        info!(
            executor = %self.executor_name,
            batch_id = batch.id,
            tx_hash = %tx_hash,
            "proposed transfer on source chain"
        );
        Ok(())
    }

    pub async fn was_set_status_proposed_on_source(&self) -> Result<bool> {
        let batch = self.stored_batch()?;
        self.source.was_proposed_set_status(batch).await
    }

    pub async fn propose_set_status_on_source(&self) -> Result<()> {
        let batch = self.stored_batch()?;
        let tx_hash = self.source.propose_set_status(batch).await?;
        info!(
            executor = %self.executor_name,
            batch_id = batch.id,
            tx_hash = %tx_hash,
            "proposed set status on source chain"
        );
        Ok(())
    }

    pub async fn was_action_signed_on_source(&self) -> Result<bool> {
        self.source.was_signed(self.action_id).await
    }

    pub async fn sign_action_on_source(&self) -> Result<()> {
        let tx_hash = self.source.sign(self.action_id).await?;
        info!(
            executor = %self.executor_name,
            action_id = self.action_id,
            tx_hash = %tx_hash,
            "signed action on source chain"
        );
        Ok(())
    }

    pub async fn process_quorum_reached_on_source(&self) -> Result<bool> {
        self.source.quorum_reached(self.action_id).await
    }

    pub async fn was_action_performed_on_source(&self) -> Result<bool> {
        self.source.was_executed(self.action_id).await
    }

    pub async fn perform_action_on_source(&self) -> Result<()> {
        let batch = self.stored_batch()?;
        let tx_hash = self.source.perform_action(self.action_id, batch).await?;
        info!(
            executor = %self.executor_name,
            batch_id = batch.id,
            action_id = self.action_id,
            tx_hash = %tx_hash,
            "performed action on source chain"
        );
        Ok(())
    }

    // ------------------------------------------------------------------
    // Ethereum side
    // ------------------------------------------------------------------

    pub async fn was_transfer_performed_on_ethereum(&self) -> Result<bool> {
        let batch = self.stored_batch()?;
        self.ethereum.was_executed(batch.id).await
    }

    /// Generates and keeps the message hash of the stored batch, then broadcasts this
    /// relayer's signature for it
    pub async fn sign_transfer_on_ethereum(&mut self) -> Result<()> {
        let batch = self.stored_batch()?;
        let batch_id = batch.id;
        let lists = extract_list_to_ethereum(batch);

        let msg_hash = self
            .ethereum
            .generate_message_hash(&lists, batch_id)
            .await
            .wrap_err_with(|| format!("failed to generate message hash for batch {}", batch_id))?;
        self.msg_hash = msg_hash;
        self.ethereum.broadcast_signature_for_message_hash(msg_hash);

        info!(
            executor = %self.executor_name,
            batch_id,
            msg_hash = %msg_hash,
            "signed transfer on Ethereum"
        );
        Ok(())
    }

    pub async fn perform_transfer_on_ethereum(&self) -> Result<()> {
        let batch = self.stored_batch()?;
        let quorum = self.ethereum.get_quorum_size().await?;
        let lists = extract_list_to_ethereum(batch);

        let tx_hash = self
            .ethereum
            .execute_transfer(self.msg_hash, &lists, batch.id, quorum)
            .await?;
        info!(
            executor = %self.executor_name,
            batch_id = batch.id,
            quorum,
            tx_hash = %tx_hash,
            "performed transfer on Ethereum"
        );
        Ok(())
    }

    pub async fn is_quorum_reached_on_ethereum(&self) -> Result<bool> {
        self.ethereum.is_quorum_reached(self.msg_hash).await
    }

    pub async fn get_batch_statuses_from_ethereum(&self) -> Result<Vec<u8>> {
        let batch = self.stored_batch()?;
        self.ethereum.get_transactions_statuses(batch.id).await
    }

    pub fn clear_stored_p2p_signatures_for_ethereum(&self) {
        self.signatures_holder.clear_stored_signatures();
        debug!(executor = %self.executor_name, "cleared stored p2p signatures for Ethereum");
    }

    pub fn msg_hash(&self) -> B256 {
        self.msg_hash
    }

    // ------------------------------------------------------------------
    // Paced waits
    // ------------------------------------------------------------------

    /// Waits up to the configured budget for the stored batch to show up as executed on
    /// Ethereum, checking after every sub-interval
    pub async fn wait_for_transfer_confirmation(&self, cancel: &CancellationToken) {
        let interval = self.time_for_wait_on_ethereum / WAIT_SPLITS;

        for _ in 0..WAIT_SPLITS {
            if !wait_interval(interval, cancel).await {
                debug!(executor = %self.executor_name, "transfer confirmation wait cancelled");
                return;
            }

            match self.was_transfer_performed_on_ethereum().await {
                Ok(true) => return,
                Ok(false) => {}
                Err(e) => debug!(
                    executor = %self.executor_name,
                    error = %e,
                    "failed to check transfer confirmation"
                ),
            }
        }
    }

    /// Polls the final per-deposit statuses of the stored batch. Returns an empty vector
    /// on cancellation, on error or when the wait budget runs out.
    pub async fn wait_and_return_final_batch_statuses(&self, cancel: &CancellationToken) -> Vec<u8> {
        let interval = self.time_for_wait_on_ethereum / WAIT_SPLITS;

        for _ in 0..WAIT_SPLITS {
            match self.get_batch_statuses_from_ethereum().await {
                Ok(statuses) if !statuses.is_empty() => return statuses,
                Ok(_) => {}
                Err(e) => {
                    self.print_info(
                        Level::ERROR,
                        "error getting the batch statuses from Ethereum",
                        &[("error", &e)],
                    );
                    return Vec::new();
                }
            }

            if !wait_interval(interval, cancel).await {
                return Vec::new();
            }
        }

        Vec::new()
    }

    // ------------------------------------------------------------------
    // Retry counters
    // ------------------------------------------------------------------

    pub fn process_max_quorum_retries_on_ethereum(&mut self) -> bool {
        self.quorum_retries_on_ethereum.process()
    }

    pub fn reset_retries_count_on_ethereum(&mut self) {
        self.quorum_retries_on_ethereum.reset();
    }

    pub fn process_max_quorum_retries_on_source(&mut self) -> bool {
        self.quorum_retries_on_source.process()
    }

    pub fn reset_retries_count_on_source(&mut self) {
        self.quorum_retries_on_source.reset();
    }

    pub fn process_max_retries_on_was_transfer_proposed(&mut self) -> bool {
        self.retries_on_was_proposed.process()
    }

    pub fn reset_retries_on_was_transfer_proposed(&mut self) {
        self.retries_on_was_proposed.reset();
    }

    // ------------------------------------------------------------------
    // Balance checks, availability and leadership
    // ------------------------------------------------------------------

    /// Validates every distinct Ethereum token of the batch once, with the summed amount
    pub async fn check_available_tokens(&self, lists: &ArgListsBatch) -> Result<()> {
        for (eth_token, source_token, amount) in aggregate_amounts_by_token(lists) {
            self.balance_validator
                .check_token(eth_token, &source_token, amount, lists.direction)
                .await
                .wrap_err_with(|| {
                    format!(
                        "balance check failed for token {} amount {} direction {}",
                        eth_token, amount, lists.direction
                    )
                })?;
        }
        Ok(())
    }

    pub async fn check_source_client_availability(&self) -> Result<()> {
        self.source.check_client_availability().await
    }

    pub async fn check_ethereum_client_availability(&self) -> Result<()> {
        self.ethereum.check_client_availability().await
    }

    pub fn my_turn_as_leader(&self) -> bool {
        self.topology.my_turn_as_leader()
    }
}

/// Sets the call data of every deposit from the matching smart-contract event.
///
/// Deposits without an event, or whose event has no call data, get the missing-data marker.
/// The data is always derived from the raw event payload, so applying the same events twice
/// gives the same batch.
pub fn apply_sc_metadata(
    batch: &mut TransferBatch,
    events: &[ScDepositEvent],
) -> Result<(), BridgeError> {
    for deposit in &mut batch.deposits {
        deposit.data = match events.iter().find(|event| event.deposit_nonce == deposit.nonce) {
            Some(event) if !event.call_data.is_empty() => encode_call_data(&event.call_data)?,
            _ => vec![MISSING_DATA_MARKER],
        };
        deposit.displayable_data = hex::encode(&deposit.data);
    }
    Ok(())
}

fn verify_deposit_nonces(batch: &TransferBatch, last_nonce: u64) -> Result<(), BridgeError> {
    let mut expected = last_nonce;
    for deposit in &batch.deposits {
        expected = expected
            .checked_add(1)
            .ok_or_else(|| BridgeError::InvalidDepositNonce {
                deposit: deposit.to_string(),
                expected,
            })?;
        if deposit.nonce != expected {
            return Err(BridgeError::InvalidDepositNonce {
                deposit: deposit.to_string(),
                expected,
            });
        }
    }
    Ok(())
}

/// Sums amounts per Ethereum token, in order of first occurrence
fn aggregate_amounts_by_token(lists: &ArgListsBatch) -> Vec<(Address, Vec<u8>, U256)> {
    let mut positions: HashMap<Address, usize> = HashMap::new();
    let mut aggregated: Vec<(Address, Vec<u8>, U256)> = Vec::new();

    for ((eth_token, source_token), amount) in lists
        .eth_tokens
        .iter()
        .zip(&lists.source_tokens)
        .zip(&lists.amounts)
    {
        match positions.get(eth_token) {
            Some(&index) => aggregated[index].2 += *amount,
            None => {
                positions.insert(*eth_token, aggregated.len());
                aggregated.push((*eth_token, source_token.clone(), *amount));
            }
        }
    }

    aggregated
}

fn render_extras(extras: &[(&str, &dyn Display)]) -> String {
    let mut rendered = String::new();
    for (key, value) in extras {
        // writing into a String cannot fail
        let _ = write!(rendered, " {} = {}", key, value);
    }
    rendered
}

/// Sleeps for `interval`; returns `false` when cancelled first
async fn wait_interval(interval: Duration, cancel: &CancellationToken) -> bool {
    tokio::select! {
        _ = cancel.cancelled() => false,
        _ = tokio::time::sleep(interval) => true,
    }
}

impl fmt::Debug for BridgeExecutor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BridgeExecutor")
            .field("executor_name", &self.executor_name)
            .field("batch_id", &self.batch.as_ref().map(|batch| batch.id))
            .field("action_id", &self.action_id)
            .field("msg_hash", &self.msg_hash)
            .finish_non_exhaustive()
    }
}
