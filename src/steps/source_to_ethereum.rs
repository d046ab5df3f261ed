//! Source chain to Ethereum flow
//!
//! Executes the pending source chain batch on Ethereum once enough relayers signed it, then
//! writes the per-deposit statuses back to the source chain through the multisig quorum.

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, Level};

use super::source_quorum::{create_source_quorum_steps, QuorumSteps, SourceAction};
use super::{Step, StepIdentifier};
use crate::executor::BridgeExecutor;
use crate::types::extract_list_to_ethereum;

pub const GETTING_PENDING_BATCH_FROM_SOURCE: StepIdentifier =
    StepIdentifier("GettingPendingBatchFromSource");
pub const SIGNING_PROPOSED_TRANSFER_ON_ETHEREUM: StepIdentifier =
    StepIdentifier("SigningProposedTransferOnEthereum");
pub const WAITING_FOR_QUORUM_ON_TRANSFER_ON_ETHEREUM: StepIdentifier =
    StepIdentifier("WaitingForQuorumOnTransferOnEthereum");
pub const PERFORMING_TRANSFER_ON_ETHEREUM: StepIdentifier =
    StepIdentifier("PerformingTransferOnEthereum");
pub const WAITING_TRANSFER_CONFIRMATION: StepIdentifier =
    StepIdentifier("WaitingTransferConfirmation");
pub const RESOLVING_SET_STATUS_ON_SOURCE: StepIdentifier =
    StepIdentifier("ResolvingSetStatusOnSource");
pub const PROPOSING_SET_STATUS_ON_SOURCE: StepIdentifier =
    StepIdentifier("ProposingSetStatusOnSource");
pub const SIGNING_PROPOSED_SET_STATUS_ON_SOURCE: StepIdentifier =
    StepIdentifier("SigningProposedSetStatusOnSource");
pub const WAITING_FOR_QUORUM_ON_SET_STATUS: StepIdentifier =
    StepIdentifier("WaitingForQuorumOnSetStatus");
pub const PERFORMING_SET_STATUS: StepIdentifier = StepIdentifier("PerformingSetStatus");

/// Initial step of the flow
pub const INITIAL_STEP: StepIdentifier = GETTING_PENDING_BATCH_FROM_SOURCE;

const SET_STATUS_STEPS: QuorumSteps = QuorumSteps {
    restart: GETTING_PENDING_BATCH_FROM_SOURCE,
    propose: PROPOSING_SET_STATUS_ON_SOURCE,
    sign: SIGNING_PROPOSED_SET_STATUS_ON_SOURCE,
    wait_quorum: WAITING_FOR_QUORUM_ON_SET_STATUS,
    perform: PERFORMING_SET_STATUS,
};

pub fn create_steps() -> Vec<Box<dyn Step>> {
    let mut steps: Vec<Box<dyn Step>> = vec![
        Box::new(GettingPendingBatchFromSourceStep),
        Box::new(SigningProposedTransferOnEthereumStep),
        Box::new(WaitingForQuorumOnTransferStep),
        Box::new(PerformingTransferOnEthereumStep),
        Box::new(WaitingTransferConfirmationStep),
        Box::new(ResolvingSetStatusOnSourceStep),
    ];
    steps.extend(create_source_quorum_steps(SourceAction::SetStatus, SET_STATUS_STEPS));
    steps
}

/// Fetches the pending source batch and resets the retry counters of the cycle
pub struct GettingPendingBatchFromSourceStep;

#[async_trait]
impl Step for GettingPendingBatchFromSourceStep {
    fn identifier(&self) -> StepIdentifier {
        GETTING_PENDING_BATCH_FROM_SOURCE
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

        executor.reset_retries_count_on_ethereum();
        executor.reset_retries_count_on_source();
        executor.reset_retries_on_was_transfer_proposed();

        let batch = match executor.get_batch_from_source().await {
            Ok(Some(batch)) => batch,
            Ok(None) => {
                debug!(executor = executor.executor_name(), "no new batch found on source chain");
                return GETTING_PENDING_BATCH_FROM_SOURCE;
            }
            Err(e) => {
                executor.print_info(
                    Level::ERROR,
                    "error fetching the pending batch from source chain",
                    &[("error", &e)],
                );
                return GETTING_PENDING_BATCH_FROM_SOURCE;
            }
        };

        let batch_id = batch.id;
        let num_deposits = batch.deposits.len();
        let lists = extract_list_to_ethereum(&batch);
        executor.store_batch_from_source(batch);

        match executor.was_transfer_performed_on_ethereum().await {
            Err(e) => {
                executor.print_info(
                    Level::ERROR,
                    "error determining if the batch was performed on Ethereum",
                    &[("batch ID", &batch_id), ("error", &e)],
                );
                return GETTING_PENDING_BATCH_FROM_SOURCE;
            }
            Ok(true) => {
                info!(
                    executor = executor.executor_name(),
                    batch_id, "batch already performed on Ethereum, resolving set status"
                );
                return RESOLVING_SET_STATUS_ON_SOURCE;
            }
            Ok(false) => {}
        }

        if let Err(e) = executor.check_available_tokens(&lists).await {
            executor.print_info(
                Level::ERROR,
                "error checking available tokens",
                &[("batch ID", &batch_id), ("error", &e)],
            );
            return GETTING_PENDING_BATCH_FROM_SOURCE;
        }

        info!(
            executor = executor.executor_name(),
            batch_id, num_deposits, "fetched new batch from source chain"
        );
        SIGNING_PROPOSED_TRANSFER_ON_ETHEREUM
    }
}

pub struct SigningProposedTransferOnEthereumStep;

#[async_trait]
impl Step for SigningProposedTransferOnEthereumStep {
    fn identifier(&self) -> StepIdentifier {
        SIGNING_PROPOSED_TRANSFER_ON_ETHEREUM
    }

    async fn execute(
        &self,
        executor: &mut BridgeExecutor,
        _cancel: &CancellationToken,
    ) -> StepIdentifier {
        let Some(batch_id) = executor.get_stored_batch().map(|batch| batch.id) else {
            debug!(executor = executor.executor_name(), "no batch found");
            return GETTING_PENDING_BATCH_FROM_SOURCE;
        };

        if let Err(e) = executor.sign_transfer_on_ethereum().await {
            executor.print_info(
                Level::ERROR,
                "error signing the transfer on Ethereum",
                &[("batch ID", &batch_id), ("error", &e)],
            );
            return GETTING_PENDING_BATCH_FROM_SOURCE;
        }

        WAITING_FOR_QUORUM_ON_TRANSFER_ON_ETHEREUM
    }
}

pub struct WaitingForQuorumOnTransferStep;

#[async_trait]
impl Step for WaitingForQuorumOnTransferStep {
    fn identifier(&self) -> StepIdentifier {
        WAITING_FOR_QUORUM_ON_TRANSFER_ON_ETHEREUM
    }

    async fn execute(
        &self,
        executor: &mut BridgeExecutor,
        _cancel: &CancellationToken,
    ) -> StepIdentifier {
        let msg_hash = executor.msg_hash();

        if executor.process_max_quorum_retries_on_ethereum() {
            executor.print_info(
                Level::WARN,
                "max number of retries reached while waiting for the quorum on Ethereum, restarting",
                &[("message hash", &msg_hash)],
            );
            return GETTING_PENDING_BATCH_FROM_SOURCE;
        }

        match executor.is_quorum_reached_on_ethereum().await {
            Err(e) => {
                executor.print_info(
                    Level::ERROR,
                    "error determining if the quorum was reached on Ethereum",
                    &[("message hash", &msg_hash), ("error", &e)],
                );
                GETTING_PENDING_BATCH_FROM_SOURCE
            }
            Ok(false) => {
                debug!(
                    executor = executor.executor_name(),
                    msg_hash = %msg_hash,
                    "quorum not reached on Ethereum yet"
                );
                WAITING_FOR_QUORUM_ON_TRANSFER_ON_ETHEREUM
            }
            Ok(true) => {
                info!(
                    executor = executor.executor_name(),
                    msg_hash = %msg_hash,
                    "quorum reached on Ethereum"
                );
                PERFORMING_TRANSFER_ON_ETHEREUM
            }
        }
    }
}

pub struct PerformingTransferOnEthereumStep;

#[async_trait]
impl Step for PerformingTransferOnEthereumStep {
    fn identifier(&self) -> StepIdentifier {
        PERFORMING_TRANSFER_ON_ETHEREUM
    }

    async fn execute(
        &self,
        executor: &mut BridgeExecutor,
        _cancel: &CancellationToken,
    ) -> StepIdentifier {
        match executor.was_transfer_performed_on_ethereum().await {
            Err(e) => {
                executor.print_info(
                    Level::ERROR,
                    "error determining if the transfer was performed on Ethereum",
                    &[("error", &e)],
                );
                return GETTING_PENDING_BATCH_FROM_SOURCE;
            }
            Ok(true) => {
                info!(
                    executor = executor.executor_name(),
                    "transfer performed on Ethereum, resolving set status"
                );
                return RESOLVING_SET_STATUS_ON_SOURCE;
            }
            Ok(false) => {}
        }

        if executor.my_turn_as_leader() {
            if let Err(e) = executor.perform_transfer_on_ethereum().await {
                executor.print_info(
                    Level::ERROR,
                    "error performing the transfer on Ethereum",
                    &[("error", &e)],
                );
                return GETTING_PENDING_BATCH_FROM_SOURCE;
            }
        }

        WAITING_TRANSFER_CONFIRMATION
    }
}

/// Paces the wait for the Ethereum execution; the next step re-derives the outcome
pub struct WaitingTransferConfirmationStep;

#[async_trait]
impl Step for WaitingTransferConfirmationStep {
    fn identifier(&self) -> StepIdentifier {
        WAITING_TRANSFER_CONFIRMATION
    }

    async fn execute(
        &self,
        executor: &mut BridgeExecutor,
        cancel: &CancellationToken,
    ) -> StepIdentifier {
        executor.wait_for_transfer_confirmation(cancel).await;
        PERFORMING_TRANSFER_ON_ETHEREUM
    }
}

/// Prepares the set-status proposal: drops stale p2p signatures, refreshes the pending batch
/// and attaches the final statuses from Ethereum
pub struct ResolvingSetStatusOnSourceStep;

#[async_trait]
impl Step for ResolvingSetStatusOnSourceStep {
    fn identifier(&self) -> StepIdentifier {
        RESOLVING_SET_STATUS_ON_SOURCE
    }

    async fn execute(
        &self,
        executor: &mut BridgeExecutor,
        cancel: &CancellationToken,
    ) -> StepIdentifier {
        executor.clear_stored_p2p_signatures_for_ethereum();

        let batch = match executor.get_batch_from_source().await {
            Ok(Some(batch)) if !batch.deposits.is_empty() => batch,
            Ok(_) => {
                executor.print_info(Level::DEBUG, "nil or empty batch on source chain", &[]);
                return GETTING_PENDING_BATCH_FROM_SOURCE;
            }
            Err(e) => {
                executor.print_info(
                    Level::ERROR,
                    "error fetching the pending batch from source chain",
                    &[("error", &e)],
                );
                return GETTING_PENDING_BATCH_FROM_SOURCE;
            }
        };
        let batch_id = batch.id;
        let num_deposits = batch.deposits.len();
        executor.store_batch_from_source(batch);

        let statuses = executor.wait_and_return_final_batch_statuses(cancel).await;
        if statuses.is_empty() {
            debug!(
                executor = executor.executor_name(),
                batch_id, "no final statuses on Ethereum"
            );
            return GETTING_PENDING_BATCH_FROM_SOURCE;
        }

        let stored = executor
            .store_batch_statuses(statuses)
            .and_then(|()| executor.resolve_new_deposits_statuses(num_deposits));
        if let Err(e) = stored {
            executor.print_info(
                Level::ERROR,
                "error storing the batch statuses",
                &[("batch ID", &batch_id), ("error", &e)],
            );
            return GETTING_PENDING_BATCH_FROM_SOURCE;
        }

        PROPOSING_SET_STATUS_ON_SOURCE
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::steps::create_source_to_ethereum_steps;
    use crate::testing::{batch, deposit, TestEnvironment};
    use crate::types::{STATUS_EXECUTED, STATUS_REJECTED};
    use alloy::primitives::{address, Address, B256};

    const ETH_TOKEN: Address = address!("00000000000000000000000000000000000000e1");
    const SOURCE_TOKEN: &[u8] = b"SRC-1";

    /// Pending source batch 3 with two deposits of the same token
    fn ready_environment() -> TestEnvironment {
        let env = TestEnvironment::new();
        env.source.state().pending_batch = Some(batch(
            3,
            vec![
                deposit(1, SOURCE_TOKEN, ETH_TOKEN.as_slice(), 4),
                deposit(2, SOURCE_TOKEN, ETH_TOKEN.as_slice(), 6),
            ],
        ));
        env.source.state().action_id = 11;
        env.ethereum.state().msg_hash = B256::repeat_byte(0x07);
        env.ethereum.state().quorum_size = 2;
        env
    }

    fn executor_with_pending_batch(env: &TestEnvironment) -> BridgeExecutor {
        let mut executor = env.executor();
        let pending = env.source.state().pending_batch.clone().unwrap();
        executor.store_batch_from_source(pending);
        executor
    }

    async fn run(step: &dyn Step, executor: &mut BridgeExecutor) -> StepIdentifier {
        step.execute(executor, &CancellationToken::new()).await
    }

    #[tokio::test]
    async fn test_getting_pending_batch() {
        let env = ready_environment();
        let mut executor = env.executor();

        assert_eq!(
            run(&GettingPendingBatchFromSourceStep, &mut executor).await,
            SIGNING_PROPOSED_TRANSFER_ON_ETHEREUM
        );
        assert_eq!(executor.get_stored_batch().unwrap().id, 3);
        let calls = env.balance_validator.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].0, ETH_TOKEN);
        assert_eq!(calls[0].2, alloy::primitives::U256::from(10));
    }

    #[tokio::test]
    async fn test_getting_pending_batch_routes_performed_batch_to_set_status() {
        let env = ready_environment();
        env.ethereum.state().executed_batches.insert(3);
        let mut executor = env.executor();

        assert_eq!(
            run(&GettingPendingBatchFromSourceStep, &mut executor).await,
            RESOLVING_SET_STATUS_ON_SOURCE
        );
        assert!(env.balance_validator.calls().is_empty());
    }

    #[tokio::test]
    async fn test_getting_pending_batch_failures_stay_on_initial_step() {
        let env = ready_environment();
        let mut executor = env.executor();

        env.source.fail("get_pending_batch");
        assert_eq!(run(&GettingPendingBatchFromSourceStep, &mut executor).await, INITIAL_STEP);

        env.ethereum.fail("was_executed");
        assert_eq!(run(&GettingPendingBatchFromSourceStep, &mut executor).await, INITIAL_STEP);

        env.balance_validator.fail_on(ETH_TOKEN);
        assert_eq!(run(&GettingPendingBatchFromSourceStep, &mut executor).await, INITIAL_STEP);

        env.source.state().pending_batch = None;
        assert_eq!(run(&GettingPendingBatchFromSourceStep, &mut executor).await, INITIAL_STEP);
    }

    #[tokio::test]
    async fn test_initial_step_resets_every_counter() {
        let env = ready_environment();
        let mut executor = env.executor();
        for _ in 0..3 {
            executor.process_max_quorum_retries_on_ethereum();
            executor.process_max_quorum_retries_on_source();
            executor.process_max_retries_on_was_transfer_proposed();
        }

        run(&GettingPendingBatchFromSourceStep, &mut executor).await;
        assert!(!executor.process_max_quorum_retries_on_ethereum());
        assert!(!executor.process_max_quorum_retries_on_source());
        assert!(!executor.process_max_retries_on_was_transfer_proposed());
    }

    #[tokio::test]
    async fn test_signing_on_ethereum() {
        let env = ready_environment();
        let mut executor = env.executor();
        assert_eq!(
            run(&SigningProposedTransferOnEthereumStep, &mut executor).await,
            INITIAL_STEP
        );

        let mut executor = executor_with_pending_batch(&env);
        assert_eq!(
            run(&SigningProposedTransferOnEthereumStep, &mut executor).await,
            WAITING_FOR_QUORUM_ON_TRANSFER_ON_ETHEREUM
        );
        assert_eq!(env.ethereum.state().broadcasted, vec![B256::repeat_byte(0x07)]);

        env.ethereum.fail("generate_message_hash");
        assert_eq!(
            run(&SigningProposedTransferOnEthereumStep, &mut executor).await,
            INITIAL_STEP
        );
    }

    #[tokio::test]
    async fn test_waiting_for_quorum_on_ethereum() {
        let env = ready_environment();
        let mut executor = executor_with_pending_batch(&env);

        assert_eq!(
            run(&WaitingForQuorumOnTransferStep, &mut executor).await,
            WAITING_FOR_QUORUM_ON_TRANSFER_ON_ETHEREUM
        );

        env.ethereum.fail("is_quorum_reached");
        assert_eq!(run(&WaitingForQuorumOnTransferStep, &mut executor).await, INITIAL_STEP);

        env.ethereum.state().quorum_reached = true;
        assert_eq!(
            run(&WaitingForQuorumOnTransferStep, &mut executor).await,
            PERFORMING_TRANSFER_ON_ETHEREUM
        );

        // three attempts used, the fourth hits the ceiling
        assert_eq!(run(&WaitingForQuorumOnTransferStep, &mut executor).await, INITIAL_STEP);
    }

    #[tokio::test]
    async fn test_performing_transfer_on_ethereum() {
        let env = ready_environment();
        let mut executor = executor_with_pending_batch(&env);

        assert_eq!(
            run(&PerformingTransferOnEthereumStep, &mut executor).await,
            WAITING_TRANSFER_CONFIRMATION
        );
        assert_eq!(env.ethereum.state().executed_transfers.len(), 1);

        assert_eq!(
            run(&PerformingTransferOnEthereumStep, &mut executor).await,
            RESOLVING_SET_STATUS_ON_SOURCE
        );
    }

    #[tokio::test]
    async fn test_performing_transfer_as_follower_only_waits() {
        let env = ready_environment();
        env.topology.set_leader(false);
        let mut executor = executor_with_pending_batch(&env);

        assert_eq!(
            run(&PerformingTransferOnEthereumStep, &mut executor).await,
            WAITING_TRANSFER_CONFIRMATION
        );
        assert!(env.ethereum.state().executed_transfers.is_empty());
    }

    #[tokio::test]
    async fn test_performing_transfer_errors_restart() {
        let env = ready_environment();
        let mut executor = executor_with_pending_batch(&env);

        env.ethereum.fail("was_executed");
        assert_eq!(run(&PerformingTransferOnEthereumStep, &mut executor).await, INITIAL_STEP);

        env.ethereum.fail("get_quorum_size");
        assert_eq!(run(&PerformingTransferOnEthereumStep, &mut executor).await, INITIAL_STEP);

        env.ethereum.fail("execute_transfer");
        assert_eq!(run(&PerformingTransferOnEthereumStep, &mut executor).await, INITIAL_STEP);
    }

    #[tokio::test(start_paused = true)]
    async fn test_waiting_transfer_confirmation_returns_to_performing() {
        let env = ready_environment();
        let mut executor = executor_with_pending_batch(&env);

        assert_eq!(
            run(&WaitingTransferConfirmationStep, &mut executor).await,
            PERFORMING_TRANSFER_ON_ETHEREUM
        );

        let cancel = CancellationToken::new();
        cancel.cancel();
        assert_eq!(
            WaitingTransferConfirmationStep
                .execute(&mut executor, &cancel)
                .await,
            PERFORMING_TRANSFER_ON_ETHEREUM
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_resolving_set_status() {
        let env = ready_environment();
        env.ethereum
            .state()
            .statuses
            .insert(3, vec![STATUS_EXECUTED]);
        let mut executor = env.executor();

        assert_eq!(
            run(&ResolvingSetStatusOnSourceStep, &mut executor).await,
            PROPOSING_SET_STATUS_ON_SOURCE
        );
        assert_eq!(env.signatures_holder.cleared_count(), 1);
        // the second deposit has no status on Ethereum and is rejected
        assert_eq!(
            executor.get_stored_batch().unwrap().statuses,
            vec![STATUS_EXECUTED, STATUS_REJECTED]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_resolving_set_status_failures_restart() {
        let env = ready_environment();
        let mut executor = env.executor();

        // no statuses before the wait budget runs out
        assert_eq!(run(&ResolvingSetStatusOnSourceStep, &mut executor).await, INITIAL_STEP);

        env.source.fail("get_pending_batch");
        assert_eq!(run(&ResolvingSetStatusOnSourceStep, &mut executor).await, INITIAL_STEP);

        env.source.state().pending_batch = Some(batch(3, vec![]));
        assert_eq!(run(&ResolvingSetStatusOnSourceStep, &mut executor).await, INITIAL_STEP);

        env.source.state().pending_batch = None;
        assert_eq!(run(&ResolvingSetStatusOnSourceStep, &mut executor).await, INITIAL_STEP);

        // signatures are cleared whatever the outcome
        assert_eq!(env.signatures_holder.cleared_count(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_full_cycle_as_leader() {
        let env = ready_environment();
        env.ethereum.state().quorum_reached = true;
        env.source.state().quorum_reached = true;
        env.ethereum
            .state()
            .statuses
            .insert(3, vec![STATUS_EXECUTED, STATUS_EXECUTED]);
        let mut executor = env.executor();
        let states = create_source_to_ethereum_steps().unwrap();
        let cancel = CancellationToken::new();

        let mut current = INITIAL_STEP;
        let mut visited = vec![current];
        for _ in 0..11 {
            current = states[&current].execute(&mut executor, &cancel).await;
            visited.push(current);
        }

        assert_eq!(
            visited,
            vec![
                GETTING_PENDING_BATCH_FROM_SOURCE,
                SIGNING_PROPOSED_TRANSFER_ON_ETHEREUM,
                WAITING_FOR_QUORUM_ON_TRANSFER_ON_ETHEREUM,
                PERFORMING_TRANSFER_ON_ETHEREUM,
                WAITING_TRANSFER_CONFIRMATION,
                PERFORMING_TRANSFER_ON_ETHEREUM,
                RESOLVING_SET_STATUS_ON_SOURCE,
                PROPOSING_SET_STATUS_ON_SOURCE,
                SIGNING_PROPOSED_SET_STATUS_ON_SOURCE,
                WAITING_FOR_QUORUM_ON_SET_STATUS,
                PERFORMING_SET_STATUS,
                PERFORMING_SET_STATUS,
            ]
        );
        assert_eq!(
            env.source.state().proposed_set_statuses,
            vec![(3, vec![STATUS_EXECUTED, STATUS_EXECUTED])]
        );
        assert_eq!(
            states[&current].execute(&mut executor, &cancel).await,
            INITIAL_STEP
        );
    }
}
