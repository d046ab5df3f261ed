//! Topology, signature store, status sink and balance validator mocks

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use alloy::primitives::{Address, U256};
use async_trait::async_trait;
use eyre::{eyre, Result};

use crate::clients::{BalanceValidator, SignaturesHolder, StatusHandler, TopologyProvider};
use crate::types::Direction;

/// Leader flag that tests can flip at any time
#[derive(Debug)]
pub struct TopologyMock {
    leader: AtomicBool,
}

impl TopologyMock {
    pub fn new(leader: bool) -> Self {
        Self {
            leader: AtomicBool::new(leader),
        }
    }

    pub fn set_leader(&self, leader: bool) {
        self.leader.store(leader, Ordering::SeqCst);
    }
}

impl Default for TopologyMock {
    fn default() -> Self {
        Self::new(true)
    }
}

impl TopologyProvider for TopologyMock {
    fn my_turn_as_leader(&self) -> bool {
        self.leader.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Default)]
pub struct SignaturesHolderMock {
    cleared: AtomicUsize,
}

impl SignaturesHolderMock {
    pub fn cleared_count(&self) -> usize {
        self.cleared.load(Ordering::SeqCst)
    }
}

impl SignaturesHolder for SignaturesHolderMock {
    fn clear_stored_signatures(&self) {
        self.cleared.fetch_add(1, Ordering::SeqCst);
    }
}

#[derive(Debug, Default)]
pub struct StatusHandlerMock {
    ints: Mutex<HashMap<String, i64>>,
    strings: Mutex<HashMap<String, String>>,
}

impl StatusHandlerMock {
    pub fn int_metric(&self, metric: &str) -> Option<i64> {
        self.ints.lock().unwrap().get(metric).copied()
    }

    pub fn string_metric(&self, metric: &str) -> Option<String> {
        self.strings.lock().unwrap().get(metric).cloned()
    }
}

impl StatusHandler for StatusHandlerMock {
    fn set_int_metric(&self, metric: &str, value: i64) {
        self.ints.lock().unwrap().insert(metric.to_string(), value);
    }

    fn set_string_metric(&self, metric: &str, value: String) {
        self.strings.lock().unwrap().insert(metric.to_string(), value);
    }

    fn name(&self) -> &str {
        "mock"
    }
}

/// One recorded balance check
pub type TokenCheck = (Address, Vec<u8>, U256, Direction);

/// Records every token check; fails for the tokens it is told to
#[derive(Debug, Default)]
pub struct BalanceValidatorMock {
    calls: Mutex<Vec<TokenCheck>>,
    failing_tokens: Mutex<Vec<Address>>,
}

impl BalanceValidatorMock {
    pub fn calls(&self) -> Vec<TokenCheck> {
        self.calls.lock().unwrap().clone()
    }

    /// Every check of `token` fails from now on
    pub fn fail_on(&self, token: Address) {
        self.failing_tokens.lock().unwrap().push(token);
    }
}

#[async_trait]
impl BalanceValidator for BalanceValidatorMock {
    async fn check_token(
        &self,
        eth_token: Address,
        source_token: &[u8],
        amount: U256,
        direction: Direction,
    ) -> Result<()> {
        self.calls
            .lock()
            .unwrap()
            .push((eth_token, source_token.to_vec(), amount, direction));

        if self.failing_tokens.lock().unwrap().contains(&eth_token) {
            return Err(eyre!("injected balance failure for {}", eth_token));
        }
        Ok(())
    }
}
