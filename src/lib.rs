//! Batch Relayer: core of the batch bridge relayer
//!
//! Moves batches of token transfers between Ethereum and the source chain:
//!
//! - **Steps** - The two flows (`ethereum_to_source`, `source_to_ethereum`) as state machine steps
//! - **State Machine** - Ticks one flow at a time until cancelled
//! - **Executor** - Per-flow state and every chain interaction the steps need
//! - **Balance Validator** - Checks that both chains agree on the bridged amount of a token
//! - **Call Data** - Framing of the optional smart-contract payload carried by a deposit
//! - **Clients** - Traits implemented by the chain clients and the other collaborators
//! - **Testing Module** - In-memory mocks of every collaborator
//!
//! ## Feature Flags
//!
//! - `testing` - Enable the mock collaborators for downstream tests

pub mod balance_validator;
pub mod call_data;
pub mod clients;
pub mod config;
pub mod errors;
pub mod executor;
pub mod logging;
pub mod metrics;
pub mod state_machine;
pub mod steps;
pub mod types;

// Testing utilities (feature-gated)
#[cfg(any(test, feature = "testing"))]
pub mod testing;

// Re-export commonly used items at the crate root
pub use balance_validator::BridgeBalanceValidator;
pub use call_data::{decode_call_data, encode_call_data};
pub use clients::{
    BalanceValidator, EthereumClient, SignaturesHolder, SourceChainClient, StatusHandler,
    TopologyProvider,
};
pub use config::Config;
pub use errors::BridgeError;
pub use executor::{BridgeExecutor, ExecutorBuilder, ExecutorConfig};
pub use logging::init_logging;
pub use metrics::MetricsStatusHandler;
pub use state_machine::StateMachine;
pub use steps::{
    create_ethereum_to_source_steps, create_source_to_ethereum_steps, MachineStates, Step,
    StepIdentifier,
};
pub use types::{DepositTransfer, Direction, TransferBatch};
