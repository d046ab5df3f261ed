//! Testing Utilities Module
//!
//! In-memory collaborators for exercising the executor, the steps and the balance validator
//! without any chain.
//!
//! ## Submodules
//!
//! - `chain_mocks` - Programmable source chain and Ethereum clients
//! - `collaborator_mocks` - Topology, signature store, status sink and balance validator
//! - `mock_batches` - Batch and deposit builders, plus a wired [`TestEnvironment`]

pub mod chain_mocks;
pub mod collaborator_mocks;
pub mod mock_batches;

pub use chain_mocks::*;
pub use collaborator_mocks::*;
pub use mock_batches::*;

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use eyre::{eyre, Result};

/// Counts calls per method name and injects one-shot failures
#[derive(Debug, Default)]
pub struct CallRecorder {
    calls: Mutex<HashMap<&'static str, usize>>,
    failures: Mutex<HashSet<&'static str>>,
}

impl CallRecorder {
    /// Records a call to `method`; fails if a failure was armed for it
    pub fn record(&self, method: &'static str) -> Result<()> {
        *self.calls.lock().unwrap().entry(method).or_default() += 1;
        if self.failures.lock().unwrap().remove(method) {
            return Err(eyre!("injected failure in {}", method));
        }
        Ok(())
    }

    /// Makes the next call to `method` fail
    pub fn fail(&self, method: &'static str) {
        self.failures.lock().unwrap().insert(method);
    }

    pub fn call_count(&self, method: &str) -> usize {
        self.calls.lock().unwrap().get(method).copied().unwrap_or(0)
    }
}
