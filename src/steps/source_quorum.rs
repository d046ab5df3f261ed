//! Quorum-driven actions on the source chain
//!
//! Transfers (in the Ethereum to source flow) and set-status updates (in the source to
//! Ethereum flow) go through the same four steps on the source chain multisig:
//!
//! 1. propose: the leader proposes unless some relayer already did
//! 2. sign: every relayer signs the proposed action once
//! 3. wait quorum: poll until enough signatures are in, bounded by the source retry ceiling
//! 4. perform: the leader performs the action; seeing it performed ends the cycle
//!
//! Any collaborator failure sends the flow back to its restart step.

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, Level};

use super::{Step, StepIdentifier};
use crate::errors::BridgeError;
use crate::executor::{BridgeExecutor, INVALID_ACTION_ID};

/// Kind of action voted on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceAction {
    Transfer,
    SetStatus,
}

impl SourceAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceAction::Transfer => "transfer",
            SourceAction::SetStatus => "set status",
        }
    }
}

/// Step identifiers one instance of the quorum steps routes between
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuorumSteps {
    /// Initial step of the flow
    pub restart: StepIdentifier,
    pub propose: StepIdentifier,
    pub sign: StepIdentifier,
    pub wait_quorum: StepIdentifier,
    pub perform: StepIdentifier,
}

/// The four steps of `action`, wired with `steps`
pub fn create_source_quorum_steps(action: SourceAction, steps: QuorumSteps) -> Vec<Box<dyn Step>> {
    vec![
        Box::new(ProposeOnSourceStep { action, steps }),
        Box::new(SignOnSourceStep { action, steps }),
        Box::new(WaitForQuorumOnSourceStep { action, steps }),
        Box::new(PerformOnSourceStep { action, steps }),
    ]
}

pub struct ProposeOnSourceStep {
    action: SourceAction,
    steps: QuorumSteps,
}

#[async_trait]
impl Step for ProposeOnSourceStep {
    fn identifier(&self) -> StepIdentifier {
        self.steps.propose
    }

    async fn execute(
        &self,
        executor: &mut BridgeExecutor,
        _cancel: &CancellationToken,
    ) -> StepIdentifier {
        let Some(batch_id) = executor.get_stored_batch().map(|batch| batch.id) else {
            debug!(executor = executor.executor_name(), "no batch found");
            return self.steps.restart;
        };

        let was_proposed = match self.action {
            SourceAction::Transfer => executor.was_transfer_proposed_on_source().await,
            SourceAction::SetStatus => executor.was_set_status_proposed_on_source().await,
        };
        match was_proposed {
            Err(e) => {
                executor.print_info(
                    Level::ERROR,
                    &format!("error determining if the {} was proposed", self.action.as_str()),
                    &[("batch ID", &batch_id), ("error", &e)],
                );
                return self.steps.restart;
            }
            Ok(true) => {
                info!(
                    executor = executor.executor_name(),
                    batch_id,
                    action = self.action.as_str(),
                    "already proposed on source chain"
                );
                return self.steps.sign;
            }
            Ok(false) => {}
        }

        if !executor.my_turn_as_leader() {
            if executor.process_max_retries_on_was_transfer_proposed() {
                executor.print_info(
                    Level::WARN,
                    &format!(
                        "max number of retries reached while waiting for the {} proposal",
                        self.action.as_str()
                    ),
                    &[("batch ID", &batch_id)],
                );
                return self.steps.restart;
            }
            debug!(
                executor = executor.executor_name(),
                batch_id, "not my turn as leader, waiting for the proposal"
            );
            return self.steps.propose;
        }

        let proposed = match self.action {
            SourceAction::Transfer => executor.propose_transfer_on_source().await,
            SourceAction::SetStatus => executor.propose_set_status_on_source().await,
        };
        if let Err(e) = proposed {
            executor.print_info(
                Level::ERROR,
                &format!("error proposing the {} on source chain", self.action.as_str()),
                &[("batch ID", &batch_id), ("error", &e)],
            );
            return self.steps.restart;
        }

        self.steps.sign
    }
}

pub struct SignOnSourceStep {
    action: SourceAction,
    steps: QuorumSteps,
}

#[async_trait]
impl Step for SignOnSourceStep {
    fn identifier(&self) -> StepIdentifier {
        self.steps.sign
    }

    async fn execute(
        &self,
        executor: &mut BridgeExecutor,
        _cancel: &CancellationToken,
    ) -> StepIdentifier {
        let Some(batch_id) = executor.get_stored_batch().map(|batch| batch.id) else {
            debug!(executor = executor.executor_name(), "no batch found");
            return self.steps.restart;
        };

        let action_id = match self.action {
            SourceAction::Transfer => {
                executor
                    .get_and_store_action_id_for_propose_transfer_on_source()
                    .await
            }
            SourceAction::SetStatus => {
                executor
                    .get_and_store_action_id_for_propose_set_status_on_source()
                    .await
            }
        };
        let action_id = match action_id {
            Ok(action_id) => action_id,
            Err(e) => {
                executor.print_info(
                    Level::ERROR,
                    &format!("error fetching the {} action ID", self.action.as_str()),
                    &[("batch ID", &batch_id), ("error", &e)],
                );
                return self.steps.restart;
            }
        };
        if action_id == INVALID_ACTION_ID {
            let e = BridgeError::InvalidActionId {
                action_id,
                batch_id,
            };
            executor.print_info(
                Level::ERROR,
                "contract error, got invalid action ID",
                &[("batch ID", &batch_id), ("error", &e)],
            );
            return self.steps.restart;
        }

        match executor.was_action_signed_on_source().await {
            Err(e) => {
                executor.print_info(
                    Level::ERROR,
                    "error determining if the action was signed",
                    &[("batch ID", &batch_id), ("action ID", &action_id), ("error", &e)],
                );
                return self.steps.restart;
            }
            Ok(true) => {
                debug!(
                    executor = executor.executor_name(),
                    batch_id, action_id, "action already signed by this relayer"
                );
                return self.steps.wait_quorum;
            }
            Ok(false) => {}
        }

        if let Err(e) = executor.sign_action_on_source().await {
            executor.print_info(
                Level::ERROR,
                "error signing the action on source chain",
                &[("batch ID", &batch_id), ("action ID", &action_id), ("error", &e)],
            );
            return self.steps.restart;
        }

        self.steps.wait_quorum
    }
}

pub struct WaitForQuorumOnSourceStep {
    action: SourceAction,
    steps: QuorumSteps,
}

#[async_trait]
impl Step for WaitForQuorumOnSourceStep {
    fn identifier(&self) -> StepIdentifier {
        self.steps.wait_quorum
    }

    async fn execute(
        &self,
        executor: &mut BridgeExecutor,
        _cancel: &CancellationToken,
    ) -> StepIdentifier {
        let action_id = executor.get_stored_action_id();

        if executor.process_max_quorum_retries_on_source() {
            executor.print_info(
                Level::WARN,
                &format!(
                    "max number of retries reached while waiting for the {} quorum, restarting",
                    self.action.as_str()
                ),
                &[("action ID", &action_id)],
            );
            return self.steps.restart;
        }

        match executor.process_quorum_reached_on_source().await {
            Err(e) => {
                executor.print_info(
                    Level::ERROR,
                    "error determining if the quorum was reached",
                    &[("action ID", &action_id), ("error", &e)],
                );
                self.steps.restart
            }
            Ok(false) => {
                debug!(
                    executor = executor.executor_name(),
                    action_id, "quorum not reached yet"
                );
                self.steps.wait_quorum
            }
            Ok(true) => {
                info!(
                    executor = executor.executor_name(),
                    action_id,
                    action = self.action.as_str(),
                    "quorum reached on source chain"
                );
                self.steps.perform
            }
        }
    }
}

pub struct PerformOnSourceStep {
    action: SourceAction,
    steps: QuorumSteps,
}

#[async_trait]
impl Step for PerformOnSourceStep {
    fn identifier(&self) -> StepIdentifier {
        self.steps.perform
    }

    async fn execute(
        &self,
        executor: &mut BridgeExecutor,
        _cancel: &CancellationToken,
    ) -> StepIdentifier {
        let action_id = executor.get_stored_action_id();

        match executor.was_action_performed_on_source().await {
            Err(e) => {
                executor.print_info(
                    Level::ERROR,
                    "error determining if the action was performed",
                    &[("action ID", &action_id), ("error", &e)],
                );
                return self.steps.restart;
            }
            Ok(true) => {
                info!(
                    executor = executor.executor_name(),
                    action_id,
                    action = self.action.as_str(),
                    "action performed on source chain, cycle complete"
                );
                return self.steps.restart;
            }
            Ok(false) => {}
        }

        if !executor.my_turn_as_leader() {
            debug!(
                executor = executor.executor_name(),
                action_id, "not my turn as leader, waiting for the action to be performed"
            );
            return self.steps.perform;
        }

        if let Err(e) = executor.perform_action_on_source().await {
            executor.print_info(
                Level::ERROR,
                "error performing the action on source chain",
                &[("action ID", &action_id), ("error", &e)],
            );
            return self.steps.restart;
        }

        self.steps.perform
    }
}
