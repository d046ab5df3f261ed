//! Ethereum to source chain flow
//!
//! Picks up the next final batch created on Ethereum and executes it on the source chain
//! through the multisig quorum.

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, Level};

use super::source_quorum::{create_source_quorum_steps, QuorumSteps, SourceAction};
use super::{Step, StepIdentifier};
use crate::errors::BridgeError;
use crate::executor::BridgeExecutor;
use crate::types::extract_list_from_ethereum;

pub const GETTING_PENDING_BATCH_FROM_ETHEREUM: StepIdentifier =
    StepIdentifier("GettingPendingBatchFromEthereum");
pub const PROPOSING_TRANSFER_ON_SOURCE: StepIdentifier = StepIdentifier("ProposingTransferOnSource");
pub const SIGNING_PROPOSED_TRANSFER_ON_SOURCE: StepIdentifier =
    StepIdentifier("SigningProposedTransferOnSource");
pub const WAITING_FOR_QUORUM_ON_TRANSFER: StepIdentifier =
    StepIdentifier("WaitingForQuorumOnTransfer");
pub const PERFORMING_ACTION_ON_SOURCE: StepIdentifier = StepIdentifier("PerformingActionOnSource");

/// Initial step of the flow
pub const INITIAL_STEP: StepIdentifier = GETTING_PENDING_BATCH_FROM_ETHEREUM;

const TRANSFER_STEPS: QuorumSteps = QuorumSteps {
    restart: GETTING_PENDING_BATCH_FROM_ETHEREUM,
    propose: PROPOSING_TRANSFER_ON_SOURCE,
    sign: SIGNING_PROPOSED_TRANSFER_ON_SOURCE,
    wait_quorum: WAITING_FOR_QUORUM_ON_TRANSFER,
    perform: PERFORMING_ACTION_ON_SOURCE,
};

pub fn create_steps() -> Vec<Box<dyn Step>> {
    let mut steps: Vec<Box<dyn Step>> = vec![Box::new(GettingPendingBatchFromEthereumStep)];
    steps.extend(create_source_quorum_steps(SourceAction::Transfer, TRANSFER_STEPS));
    steps
}

/// Fetches and validates the Ethereum batch following the last one executed on the source
/// chain. Starting here also resets the retry counters of the cycle.
pub struct GettingPendingBatchFromEthereumStep;

#[async_trait]
impl Step for GettingPendingBatchFromEthereumStep {
    fn identifier(&self) -> StepIdentifier {
        GETTING_PENDING_BATCH_FROM_ETHEREUM
    }

    async fn execute(
        &self,
        executor: &mut BridgeExecutor,
        _cancel: &CancellationToken,
    ) -> StepIdentifier {
        if let Err(e) = executor.check_source_client_availability().await {
            debug!(executor = executor.executor_name(), error = %e, "source chain client unavailable");
        }
        if let Err(e) = executor.check_ethereum_client_availability().await {
            debug!(executor = executor.executor_name(), error = %e, "Ethereum client unavailable");
        }

        executor.reset_retries_count_on_source();
        executor.reset_retries_on_was_transfer_proposed();

        let last_batch_id = match executor.get_last_executed_eth_batch_id_from_source().await {
            Ok(batch_id) => batch_id,
            Err(e) => {
                executor.print_info(
                    Level::ERROR,
                    "error fetching the last executed Ethereum batch ID",
                    &[("error", &e)],
                );
                return GETTING_PENDING_BATCH_FROM_ETHEREUM;
            }
        };

        let batch_id = last_batch_id + 1;
        if let Err(e) = executor.get_and_store_batch_from_ethereum(batch_id).await {
            if matches!(
                e.downcast_ref::<BridgeError>(),
                Some(BridgeError::FinalBatchNotFound { .. })
            ) {
                debug!(executor = executor.executor_name(), batch_id, error = %e, "no final batch on Ethereum");
            } else {
                executor.print_info(
                    Level::ERROR,
                    "error fetching the Ethereum batch",
                    &[("batch ID", &batch_id), ("error", &e)],
                );
            }
            return GETTING_PENDING_BATCH_FROM_ETHEREUM;
        }

        if let Err(e) = executor
            .verify_last_deposit_nonce_executed_on_ethereum_batch()
            .await
        {
            executor.print_info(
                Level::ERROR,
                "verification failed for the Ethereum batch",
                &[("batch ID", &batch_id), ("error", &e)],
            );
            return GETTING_PENDING_BATCH_FROM_ETHEREUM;
        }

        let Some(batch) = executor.get_stored_batch() else {
            return GETTING_PENDING_BATCH_FROM_ETHEREUM;
        };
        let num_deposits = batch.deposits.len();
        let lists = extract_list_from_ethereum(batch);

        if let Err(e) = executor.check_available_tokens(&lists).await {
            executor.print_info(
                Level::ERROR,
                "error checking available tokens",
                &[("batch ID", &batch_id), ("error", &e)],
            );
            return GETTING_PENDING_BATCH_FROM_ETHEREUM;
        }

        info!(
            executor = executor.executor_name(),
            batch_id, num_deposits, "fetched new batch from Ethereum"
        );
        PROPOSING_TRANSFER_ON_SOURCE
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::steps::create_ethereum_to_source_steps;
    use crate::testing::{batch, deposit, TestEnvironment};
    use alloy::primitives::{address, Address};

    const ETH_TOKEN: Address = address!("00000000000000000000000000000000000000e1");

    /// Ethereum batch 6 with deposits 21 and 22, following batch 5 / nonce 20
    fn ready_environment() -> TestEnvironment {
        let env = TestEnvironment::new();
        env.source.state().last_executed_eth_batch_id = 5;
        env.source.state().last_executed_eth_tx_id = 20;
        env.source.state().action_id = 77;
        env.ethereum.insert_batch(
            batch(
                6,
                vec![
                    deposit(21, ETH_TOKEN.as_slice(), b"SRC-1", 10),
                    deposit(22, ETH_TOKEN.as_slice(), b"SRC-1", 15),
                ],
            ),
            true,
        );
        env
    }

    async fn run_initial(executor: &mut BridgeExecutor) -> StepIdentifier {
        GettingPendingBatchFromEthereumStep
            .execute(executor, &CancellationToken::new())
            .await
    }

    #[tokio::test]
    async fn test_fetches_and_validates_batch() {
        let env = ready_environment();
        let mut executor = env.executor();

        assert_eq!(run_initial(&mut executor).await, PROPOSING_TRANSFER_ON_SOURCE);
        assert_eq!(executor.get_stored_batch().unwrap().id, 6);
        let calls = env.balance_validator.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].0, ETH_TOKEN);
        assert_eq!(calls[0].2, alloy::primitives::U256::from(25));
    }

    #[tokio::test]
    async fn test_availability_failures_do_not_abort() {
        let env = ready_environment();
        env.source.fail("check_client_availability");
        env.ethereum.fail("check_client_availability");
        let mut executor = env.executor();

        assert_eq!(run_initial(&mut executor).await, PROPOSING_TRANSFER_ON_SOURCE);
    }

    #[tokio::test]
    async fn test_failures_stay_on_initial_step() {
        let env = ready_environment();
        let mut executor = env.executor();

        env.source.fail("get_last_executed_eth_batch_id");
        assert_eq!(run_initial(&mut executor).await, INITIAL_STEP);

        env.ethereum.fail("get_batch");
        assert_eq!(run_initial(&mut executor).await, INITIAL_STEP);

        env.ethereum.fail("get_batch_sc_metadata");
        assert_eq!(run_initial(&mut executor).await, INITIAL_STEP);

        env.source.fail("get_last_executed_eth_tx_id");
        assert_eq!(run_initial(&mut executor).await, INITIAL_STEP);

        env.balance_validator.fail_on(ETH_TOKEN);
        assert_eq!(run_initial(&mut executor).await, INITIAL_STEP);
    }

    #[tokio::test]
    async fn test_non_final_batch_is_not_picked_up() {
        let env = ready_environment();
        env.ethereum.state().batches.get_mut(&6).unwrap().is_final = false;
        let mut executor = env.executor();

        assert_eq!(run_initial(&mut executor).await, INITIAL_STEP);
        assert!(executor.get_stored_batch().is_none());
        assert!(env.balance_validator.calls().is_empty());
    }

    #[tokio::test]
    async fn test_nonce_gap_stays_on_initial_step() {
        let env = ready_environment();
        env.source.state().last_executed_eth_tx_id = 19;
        let mut executor = env.executor();

        assert_eq!(run_initial(&mut executor).await, INITIAL_STEP);
        assert!(env.balance_validator.calls().is_empty());
    }

    #[tokio::test]
    async fn test_initial_step_resets_retry_counters() {
        let env = ready_environment();
        let mut executor = env.executor();
        for _ in 0..3 {
            executor.process_max_quorum_retries_on_source();
            executor.process_max_retries_on_was_transfer_proposed();
        }

        run_initial(&mut executor).await;
        assert!(!executor.process_max_quorum_retries_on_source());
        assert!(!executor.process_max_retries_on_was_transfer_proposed());
    }

    #[tokio::test]
    async fn test_full_cycle_as_leader() {
        let env = ready_environment();
        let mut executor = env.executor();
        let states = create_ethereum_to_source_steps().unwrap();
        let cancel = CancellationToken::new();
        env.source.state().quorum_reached = true;

        let mut current = INITIAL_STEP;
        let mut visited = vec![current];
        for _ in 0..5 {
            current = states[&current].execute(&mut executor, &cancel).await;
            visited.push(current);
        }

        assert_eq!(
            visited,
            vec![
                GETTING_PENDING_BATCH_FROM_ETHEREUM,
                PROPOSING_TRANSFER_ON_SOURCE,
                SIGNING_PROPOSED_TRANSFER_ON_SOURCE,
                WAITING_FOR_QUORUM_ON_TRANSFER,
                PERFORMING_ACTION_ON_SOURCE,
                PERFORMING_ACTION_ON_SOURCE,
            ]
        );
        // once performed the next pass closes the cycle
        assert_eq!(
            states[&current].execute(&mut executor, &cancel).await,
            INITIAL_STEP
        );
        assert_eq!(env.source.state().performed_actions, vec![(77, 6)]);
    }
}
