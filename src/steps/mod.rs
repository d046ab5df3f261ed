//! Step flows
//!
//! Each flow is a fixed set of named steps. A step runs one decision over the executor and
//! returns the identifier of the next step; the runner in [`crate::state_machine`] looks the
//! identifier up in the flow's [`MachineStates`].
//!
//! ## Submodules
//!
//! - `ethereum_to_source` - final Ethereum batches executed on the source chain (5 steps)
//! - `source_to_ethereum` - source batches executed on Ethereum, statuses written back (10 steps)
//! - `source_quorum` - propose / sign / wait quorum / perform on the source chain, shared by both

pub mod ethereum_to_source;
pub mod source_quorum;
pub mod source_to_ethereum;

use std::collections::HashMap;
use std::fmt;

use async_trait::async_trait;
use eyre::Result;
use tokio_util::sync::CancellationToken;

use crate::errors::BridgeError;
use crate::executor::BridgeExecutor;

/// Name of a step, unique within its flow
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StepIdentifier(pub &'static str);

impl StepIdentifier {
    pub fn as_str(&self) -> &'static str {
        self.0
    }
}

impl fmt::Display for StepIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.0)
    }
}

/// One decision of a flow
#[async_trait]
pub trait Step: Send + Sync {
    fn identifier(&self) -> StepIdentifier;

    /// Runs the step and returns the step to run next
    async fn execute(
        &self,
        executor: &mut BridgeExecutor,
        cancel: &CancellationToken,
    ) -> StepIdentifier;
}

/// Steps of one flow, keyed by identifier
pub type MachineStates = HashMap<StepIdentifier, Box<dyn Step>>;

pub fn create_ethereum_to_source_steps() -> Result<MachineStates> {
    into_machine_states(ethereum_to_source::create_steps())
}

pub fn create_source_to_ethereum_steps() -> Result<MachineStates> {
    into_machine_states(source_to_ethereum::create_steps())
}

fn into_machine_states(steps: Vec<Box<dyn Step>>) -> Result<MachineStates> {
    let mut states = MachineStates::with_capacity(steps.len());
    for step in steps {
        let identifier = step.identifier();
        if states.insert(identifier, step).is_some() {
            return Err(
                BridgeError::InvalidConfig(format!("duplicate step identifier {}", identifier))
                    .into(),
            );
        }
    }
    Ok(states)
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Noop(StepIdentifier);

    #[async_trait]
    impl Step for Noop {
        fn identifier(&self) -> StepIdentifier {
            self.0
        }

        async fn execute(
            &self,
            _executor: &mut BridgeExecutor,
            _cancel: &CancellationToken,
        ) -> StepIdentifier {
            self.0
        }
    }

    #[test]
    fn test_ethereum_to_source_factory() {
        let states = create_ethereum_to_source_steps().unwrap();
        assert_eq!(states.len(), 5);
        assert!(states.contains_key(&ethereum_to_source::GETTING_PENDING_BATCH_FROM_ETHEREUM));
        for (identifier, step) in &states {
            assert_eq!(*identifier, step.identifier());
        }
    }

    #[test]
    fn test_source_to_ethereum_factory() {
        let states = create_source_to_ethereum_steps().unwrap();
        assert_eq!(states.len(), 10);
        assert!(states.contains_key(&source_to_ethereum::GETTING_PENDING_BATCH_FROM_SOURCE));
        for (identifier, step) in &states {
            assert_eq!(*identifier, step.identifier());
        }
    }

    #[test]
    fn test_duplicate_identifiers_are_rejected() {
        let steps: Vec<Box<dyn Step>> = vec![
            Box::new(Noop(StepIdentifier("A"))),
            Box::new(Noop(StepIdentifier("A"))),
        ];
        let err = into_machine_states(steps).err().unwrap();
        assert!(matches!(
            err.downcast_ref::<BridgeError>(),
            Some(BridgeError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_step_identifier_display() {
        assert_eq!(StepIdentifier("PerformingSetStatus").to_string(), "PerformingSetStatus");
    }
}
