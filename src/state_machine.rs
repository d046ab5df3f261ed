//! State machine runner
//!
//! Drives one flow: on every tick the current step runs to completion and its result becomes
//! the current step. Steps never run concurrently, so the executor needs no locking.

use std::time::Duration;

use eyre::Result;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::errors::BridgeError;
use crate::executor::BridgeExecutor;
use crate::metrics;
use crate::steps::{
    create_ethereum_to_source_steps, create_source_to_ethereum_steps, ethereum_to_source,
    source_to_ethereum, MachineStates, StepIdentifier,
};

/// Flow label of the Ethereum to source chain state machine
pub const ETHEREUM_TO_SOURCE_FLOW: &str = "ethereum_to_source";
/// Flow label of the source chain to Ethereum state machine
pub const SOURCE_TO_ETHEREUM_FLOW: &str = "source_to_ethereum";

pub struct StateMachine {
    name: String,
    steps: MachineStates,
    current: StepIdentifier,
    executor: BridgeExecutor,
    step_interval: Duration,
}

impl StateMachine {
    /// Checks the wiring: `initial` must be a known step and every step must be stored under
    /// its own identifier
    pub fn new(
        name: impl Into<String>,
        steps: MachineStates,
        initial: StepIdentifier,
        executor: BridgeExecutor,
        step_interval: Duration,
    ) -> Result<Self> {
        let name = name.into();

        if !steps.contains_key(&initial) {
            return Err(BridgeError::UnknownStep(initial.to_string()).into());
        }
        if let Some((key, step)) = steps.iter().find(|(key, step)| **key != step.identifier()) {
            return Err(BridgeError::InvalidConfig(format!(
                "step {} is registered as {}",
                step.identifier(),
                key
            ))
            .into());
        }
        if step_interval.is_zero() {
            return Err(BridgeError::InvalidConfig(format!(
                "zero step interval for state machine {}",
                name
            ))
            .into());
        }

        Ok(Self {
            name,
            steps,
            current: initial,
            executor,
            step_interval,
        })
    }

    /// State machine for the Ethereum to source chain flow
    pub fn ethereum_to_source(executor: BridgeExecutor, step_interval: Duration) -> Result<Self> {
        Self::new(
            ETHEREUM_TO_SOURCE_FLOW,
            create_ethereum_to_source_steps()?,
            ethereum_to_source::INITIAL_STEP,
            executor,
            step_interval,
        )
    }

    /// State machine for the source chain to Ethereum flow
    pub fn source_to_ethereum(executor: BridgeExecutor, step_interval: Duration) -> Result<Self> {
        Self::new(
            SOURCE_TO_ETHEREUM_FLOW,
            create_source_to_ethereum_steps()?,
            source_to_ethereum::INITIAL_STEP,
            executor,
            step_interval,
        )
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn current_step(&self) -> StepIdentifier {
        self.current
    }

    pub fn executor(&self) -> &BridgeExecutor {
        &self.executor
    }

    /// Runs the current step once. A step handing back an unknown identifier is a wiring
    /// error and leaves the current step unchanged.
    pub async fn execute_step(&mut self, cancel: &CancellationToken) -> Result<StepIdentifier> {
        let step = self
            .steps
            .get(&self.current)
            .ok_or_else(|| BridgeError::UnknownStep(self.current.to_string()))?;

        let next = step.execute(&mut self.executor, cancel).await;
        metrics::record_step_executed(&self.name, self.current.as_str());

        if !self.steps.contains_key(&next) {
            return Err(BridgeError::UnknownStep(next.to_string()).into());
        }
        if next != self.current {
            debug!(flow = %self.name, from = %self.current, to = %next, "state machine transition");
        }

        self.current = next;
        Ok(next)
    }

    /// Ticks the flow every `step_interval` until `cancel` fires
    pub async fn run(&mut self, cancel: &CancellationToken) -> Result<()> {
        info!(
            flow = %self.name,
            step = %self.current,
            interval = ?self.step_interval,
            "state machine starting"
        );

        let mut interval = tokio::time::interval(self.step_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!(flow = %self.name, step = %self.current, "state machine stopped");
                    break;
                }
                _ = interval.tick() => {
                    self.execute_step(cancel).await?;
                }
            }
        }

        Ok(())
    }
}
