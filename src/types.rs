//! Chain-agnostic batch and deposit types
//!
//! A [`TransferBatch`] is produced by one of the chain clients and then held by the
//! executor for the duration of a single flow cycle.

use alloy::primitives::{Address, U256};
use std::fmt;

/// Per-deposit status byte: the transfer was executed on the destination chain
pub const STATUS_EXECUTED: u8 = 3;
/// Per-deposit status byte: the transfer was rejected on the destination chain
pub const STATUS_REJECTED: u8 = 4;

const ADDRESS_LEN: usize = 20;

/// One token transfer instruction inside a batch
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DepositTransfer {
    pub nonce: u64,
    pub to_bytes: Vec<u8>,
    pub displayable_to: String,
    pub from_bytes: Vec<u8>,
    pub displayable_from: String,
    pub source_token_bytes: Vec<u8>,
    pub displayable_token: String,
    pub destination_token_bytes: Vec<u8>,
    pub amount: U256,
    /// Smart-contract call payload, see [`crate::call_data`]
    pub data: Vec<u8>,
    pub displayable_data: String,
}

impl fmt::Display for DepositTransfer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "to: {}, from: {}, source token: {}, amount: {}, deposit nonce: {}",
            self.displayable_to, self.displayable_from, self.displayable_token, self.amount, self.nonce
        )
    }
}

/// A numbered group of deposits moved together between the two chains
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransferBatch {
    pub id: u64,
    /// Ethereum block the batch was created in (0 for source-chain batches)
    pub block_number: u64,
    /// Deposits in nonce order
    pub deposits: Vec<DepositTransfer>,
    /// Empty until the transfer side executed the batch
    pub statuses: Vec<u8>,
}

impl TransferBatch {
    /// Reconciles the status array against an authoritative deposit count.
    ///
    /// Missing entries are padded with [`STATUS_REJECTED`]. A shrinking count is logged and
    /// the statuses are left untouched.
    pub fn resolve_new_deposits(&mut self, new_num_deposits: usize) {
        let old_len = self.statuses.len();
        if new_num_deposits == old_len {
            return;
        }
        if new_num_deposits < old_len {
            tracing::error!(
                batch_id = self.id,
                num_statuses = old_len,
                new_num_deposits,
                "number of statuses is greater than the new number of deposits"
            );
            return;
        }

        self.statuses.resize(new_num_deposits, STATUS_REJECTED);
    }

    /// Sum of the amounts of all deposits whose source token matches `token`
    pub fn total_amount_for_token(&self, token: &[u8]) -> U256 {
        self.deposits
            .iter()
            .filter(|deposit| deposit.source_token_bytes == token)
            .fold(U256::ZERO, |acc, deposit| acc + deposit.amount)
    }
}

impl fmt::Display for TransferBatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Batch id {}:", self.id)?;
        for deposit in &self.deposits {
            write!(f, "\n  {}", deposit)?;
        }
        if !self.statuses.is_empty() {
            write!(f, "\nStatuses: {}", hex::encode(&self.statuses))?;
        }
        Ok(())
    }
}

/// An Ethereum batch together with its finality flag
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FetchedBatch {
    pub batch: TransferBatch,
    /// `true` when the batch can no longer be reorganized
    pub is_final: bool,
}

/// Smart-contract-call deposit event emitted on Ethereum
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScDepositEvent {
    pub deposit_nonce: u64,
    pub call_data: Vec<u8>,
}

/// Direction a batch is moving in, relative to Ethereum
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    FromEthereum,
    ToEthereum,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::FromEthereum => "FromEthereum",
            Direction::ToEthereum => "ToEthereum",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Column-wise view of a batch, as consumed by the Ethereum contract and the balance checks
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArgListsBatch {
    pub eth_tokens: Vec<Address>,
    pub recipients: Vec<Address>,
    pub source_tokens: Vec<Vec<u8>>,
    pub amounts: Vec<U256>,
    pub nonces: Vec<u64>,
    pub direction: Direction,
}

impl ArgListsBatch {
    fn with_capacity(capacity: usize, direction: Direction) -> Self {
        Self {
            eth_tokens: Vec::with_capacity(capacity),
            recipients: Vec::with_capacity(capacity),
            source_tokens: Vec::with_capacity(capacity),
            amounts: Vec::with_capacity(capacity),
            nonces: Vec::with_capacity(capacity),
            direction,
        }
    }
}

/// Extracts the argument lists of a batch that moves from Ethereum to the source chain
pub fn extract_list_from_ethereum(batch: &TransferBatch) -> ArgListsBatch {
    let mut lists = ArgListsBatch::with_capacity(batch.deposits.len(), Direction::FromEthereum);
    for deposit in &batch.deposits {
        lists.eth_tokens.push(address_from_bytes(&deposit.source_token_bytes));
        lists.recipients.push(if deposit.to_bytes.len() == ADDRESS_LEN {
            Address::from_slice(&deposit.to_bytes)
        } else {
            Address::ZERO
        });
        lists.source_tokens.push(deposit.destination_token_bytes.clone());
        lists.amounts.push(deposit.amount);
        lists.nonces.push(deposit.nonce);
    }
    lists
}

/// Extracts the argument lists of a batch that moves from the source chain to Ethereum
pub fn extract_list_to_ethereum(batch: &TransferBatch) -> ArgListsBatch {
    let mut lists = ArgListsBatch::with_capacity(batch.deposits.len(), Direction::ToEthereum);
    for deposit in &batch.deposits {
        lists.eth_tokens.push(address_from_bytes(&deposit.destination_token_bytes));
        lists.recipients.push(address_from_bytes(&deposit.to_bytes));
        lists.source_tokens.push(deposit.source_token_bytes.clone());
        lists.amounts.push(deposit.amount);
        lists.nonces.push(deposit.nonce);
    }
    lists
}

/// Builds an address from the last 20 bytes of `bytes`, left-padding shorter inputs
pub fn address_from_bytes(bytes: &[u8]) -> Address {
    if bytes.len() >= ADDRESS_LEN {
        return Address::from_slice(&bytes[bytes.len() - ADDRESS_LEN..]);
    }
    let mut padded = [0u8; ADDRESS_LEN];
    padded[ADDRESS_LEN - bytes.len()..].copy_from_slice(bytes);
    Address::from(padded)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn deposit(nonce: u64, token: &[u8], amount: u64) -> DepositTransfer {
        DepositTransfer {
            nonce,
            source_token_bytes: token.to_vec(),
            destination_token_bytes: vec![0xaa; 20],
            to_bytes: vec![0x11; 20],
            amount: U256::from(amount),
            ..Default::default()
        }
    }

    #[test]
    fn test_resolve_new_deposits_pads_with_rejected() {
        let mut batch = TransferBatch {
            statuses: vec![STATUS_EXECUTED, STATUS_EXECUTED],
            ..Default::default()
        };
        batch.resolve_new_deposits(4);
        assert_eq!(
            batch.statuses,
            vec![STATUS_EXECUTED, STATUS_EXECUTED, STATUS_REJECTED, STATUS_REJECTED]
        );
    }

    #[test]
    fn test_resolve_new_deposits_same_count_is_noop() {
        let mut batch = TransferBatch {
            statuses: vec![STATUS_EXECUTED, STATUS_REJECTED],
            ..Default::default()
        };
        batch.resolve_new_deposits(2);
        assert_eq!(batch.statuses, vec![STATUS_EXECUTED, STATUS_REJECTED]);
    }

    #[test]
    fn test_resolve_new_deposits_never_truncates() {
        let mut batch = TransferBatch {
            statuses: vec![STATUS_EXECUTED, STATUS_EXECUTED, STATUS_EXECUTED],
            ..Default::default()
        };
        batch.resolve_new_deposits(1);
        assert_eq!(batch.statuses.len(), 3);
    }

    #[test]
    fn test_resolve_new_deposits_from_empty() {
        let mut batch = TransferBatch::default();
        batch.resolve_new_deposits(2);
        assert_eq!(batch.statuses, vec![STATUS_REJECTED, STATUS_REJECTED]);
    }

    #[test]
    fn test_clone_is_deep() {
        let original = TransferBatch {
            id: 1,
            deposits: vec![deposit(1, b"tkn", 10)],
            ..Default::default()
        };
        let mut cloned = original.clone();
        cloned.deposits[0].source_token_bytes.push(0xff);
        cloned.deposits[0].amount = U256::from(11);
        assert_eq!(original.deposits[0].source_token_bytes, b"tkn".to_vec());
        assert_eq!(original.deposits[0].amount, U256::from(10));
    }

    #[test]
    fn test_total_amount_for_token() {
        let batch = TransferBatch {
            deposits: vec![deposit(1, b"a", 10), deposit(2, b"b", 5), deposit(3, b"a", 7)],
            ..Default::default()
        };
        assert_eq!(batch.total_amount_for_token(b"a"), U256::from(17));
        assert_eq!(batch.total_amount_for_token(b"c"), U256::ZERO);
    }

    #[test]
    fn test_extract_list_to_ethereum() {
        let batch = TransferBatch {
            deposits: vec![deposit(5, b"src", 3)],
            ..Default::default()
        };
        let lists = extract_list_to_ethereum(&batch);
        assert_eq!(lists.direction, Direction::ToEthereum);
        assert_eq!(lists.eth_tokens, vec![Address::from([0xaa; 20])]);
        assert_eq!(lists.recipients, vec![Address::from([0x11; 20])]);
        assert_eq!(lists.source_tokens, vec![b"src".to_vec()]);
        assert_eq!(lists.nonces, vec![5]);
    }

    #[test]
    fn test_extract_list_from_ethereum_swaps_tokens() {
        let batch = TransferBatch {
            deposits: vec![deposit(5, &[0xbb; 20], 3)],
            ..Default::default()
        };
        let lists = extract_list_from_ethereum(&batch);
        assert_eq!(lists.direction, Direction::FromEthereum);
        assert_eq!(lists.eth_tokens, vec![Address::from([0xbb; 20])]);
        assert_eq!(lists.source_tokens, vec![vec![0xaa; 20]]);
    }

    #[test]
    fn test_address_from_short_bytes_is_left_padded() {
        let address = address_from_bytes(&[0x01, 0x02]);
        let mut expected = [0u8; 20];
        expected[18] = 0x01;
        expected[19] = 0x02;
        assert_eq!(address, Address::from(expected));
    }

    #[test]
    fn test_direction_display() {
        assert_eq!(Direction::FromEthereum.to_string(), "FromEthereum");
        assert_eq!(format!("{}", Direction::ToEthereum), "ToEthereum");
    }
}
