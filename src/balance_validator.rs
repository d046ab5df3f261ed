//! Cross-chain balance validation
//!
//! Before a batch is moved, the relayer proves that both chains agree on how much of each
//! token is in circulation once every batch still in flight is accounted for:
//!
//! - A lock/unlock ("total balance") side must hold `total - pending`.
//! - A mint/burn side computes `mint - burn'` (or `burn' - mint` when the token is native
//!   there), where `burn' = burn - pending` cancels out what was burned in advance when
//!   the pending deposits were registered.
//!
//! Both sides must produce the same amount, otherwise the transfer is refused.

use std::sync::Arc;

use alloy::primitives::{Address, U256};
use async_trait::async_trait;
use eyre::Result;
use tracing::debug;

use crate::clients::{BalanceValidator, EthereumClient, SourceChainClient};
use crate::errors::BridgeError;
use crate::types::Direction;

const ETHEREUM: &str = "Ethereum";
const SOURCE: &str = "source chain";

/// Balance validator backed by the two chain clients
pub struct BridgeBalanceValidator {
    source: Arc<dyn SourceChainClient>,
    ethereum: Arc<dyn EthereumClient>,
}

struct TokenSetup {
    is_mint_burn: bool,
    is_native: bool,
}

impl BridgeBalanceValidator {
    pub fn new(source: Arc<dyn SourceChainClient>, ethereum: Arc<dyn EthereumClient>) -> Self {
        Self { source, ethereum }
    }

    async fn check_required_balance(
        &self,
        eth_token: Address,
        source_token: &[u8],
        amount: U256,
        direction: Direction,
    ) -> Result<()> {
        match direction {
            Direction::FromEthereum => self.source.check_required_balance(source_token, amount).await,
            Direction::ToEthereum => self.ethereum.check_required_balance(eth_token, amount).await,
        }
    }

    async fn ethereum_setup(&self, token: Address) -> Result<TokenSetup> {
        Ok(TokenSetup {
            is_mint_burn: self.ethereum.is_mint_burn_token(token).await?,
            is_native: self.ethereum.is_native_token(token).await?,
        })
    }

    async fn source_setup(&self, token: &[u8]) -> Result<TokenSetup> {
        Ok(TokenSetup {
            is_mint_burn: self.source.is_mint_burn_token(token).await?,
            is_native: self.source.is_native_token(token).await?,
        })
    }

    async fn compute_eth_amount(&self, token: Address, setup: &TokenSetup) -> Result<U256> {
        let pending = self.pending_amount_in_ethereum_batches(token).await?;
        let negative = || BridgeError::NegativeAmount {
            chain: ETHEREUM,
            token: token.to_string(),
        };

        if !setup.is_mint_burn {
            let total = self.ethereum.total_balances(token).await?;
            return Ok(total.checked_sub(pending).ok_or_else(negative)?);
        }

        let burn = self.ethereum.burn_balances(token).await?;
        let mint = self.ethereum.mint_balances(token).await?;
        Ok(mint_burn_amount(burn, mint, pending, setup.is_native).ok_or_else(negative)?)
    }

    async fn compute_source_amount(&self, token: &[u8], setup: &TokenSetup) -> Result<U256> {
        let pending = self.pending_amount_in_source_batches(token).await?;
        let negative = || BridgeError::NegativeAmount {
            chain: SOURCE,
            token: display_token(token),
        };

        if !setup.is_mint_burn {
            let total = self.source.total_balances(token).await?;
            return Ok(total.checked_sub(pending).ok_or_else(negative)?);
        }

        let burn = self.source.burn_balances(token).await?;
        let mint = self.source.mint_balances(token).await?;
        Ok(mint_burn_amount(burn, mint, pending, setup.is_native).ok_or_else(negative)?)
    }

    /// Sums the token across Ethereum batches not yet executed on the source chain.
    ///
    /// Walks forward from the last batch the source chain executed; finality is ignored
    /// since a non-final batch has already moved funds on Ethereum.
    async fn pending_amount_in_ethereum_batches(&self, token: Address) -> Result<U256> {
        let mut batch_id = self.source.get_last_executed_eth_batch_id().await?;
        let mut amount = U256::ZERO;

        loop {
            let next_id = batch_id + 1;
            let fetched = self.ethereum.get_batch(next_id).await?;
            if fetched.batch.id != next_id || fetched.batch.deposits.is_empty() {
                break;
            }
            amount += fetched.batch.total_amount_for_token(token.as_slice());
            batch_id = next_id;
        }

        Ok(amount)
    }

    /// Sums the token across source batches not yet executed on Ethereum.
    ///
    /// Walks backwards from the pending batch and stops at the first batch already executed
    /// on Ethereum, or when no earlier batch exists.
    async fn pending_amount_in_source_batches(&self, token: &[u8]) -> Result<U256> {
        let Some(mut batch) = self.source.get_pending_batch().await? else {
            return Ok(U256::ZERO);
        };
        let mut amount = U256::ZERO;

        loop {
            if self.ethereum.was_executed(batch.id).await? {
                break;
            }
            amount += batch.total_amount_for_token(token);

            let Some(previous_id) = batch.id.checked_sub(1) else {
                break;
            };
            match self.source.get_batch(previous_id).await? {
                Some(previous) => batch = previous,
                None => break,
            }
        }

        Ok(amount)
    }
}

#[async_trait]
impl BalanceValidator for BridgeBalanceValidator {
    async fn check_token(
        &self,
        eth_token: Address,
        source_token: &[u8],
        amount: U256,
        direction: Direction,
    ) -> Result<()> {
        self.check_required_balance(eth_token, source_token, amount, direction)
            .await?;

        let eth_setup = self.ethereum_setup(eth_token).await?;
        let source_setup = self.source_setup(source_token).await?;

        if !eth_setup.is_native && !eth_setup.is_mint_burn {
            return Err(BridgeError::InvalidTokenSetup(format!(
                "token {} is neither native nor mint-burn on {}",
                eth_token, ETHEREUM
            ))
            .into());
        }
        if !source_setup.is_native && !source_setup.is_mint_burn {
            return Err(BridgeError::InvalidTokenSetup(format!(
                "token {} is neither native nor mint-burn on the {}",
                display_token(source_token),
                SOURCE
            ))
            .into());
        }
        if eth_setup.is_native && source_setup.is_native {
            return Err(BridgeError::InvalidTokenSetup(format!(
                "tokens {} and {} are both native",
                eth_token,
                display_token(source_token)
            ))
            .into());
        }

        let eth_amount = self.compute_eth_amount(eth_token, &eth_setup).await?;
        let source_amount = self.compute_source_amount(source_token, &source_setup).await?;

        debug!(
            eth_token = %eth_token,
            eth_amount = %eth_amount,
            source_token = %display_token(source_token),
            source_amount = %source_amount,
            amount = %amount,
            direction = %direction,
            "balance validator computed amounts"
        );

        if eth_amount != source_amount {
            return Err(BridgeError::BalanceMismatch {
                eth_token,
                eth_amount,
                source_token: display_token(source_token),
                source_amount,
                direction,
            }
            .into());
        }

        Ok(())
    }
}

fn mint_burn_amount(burn: U256, mint: U256, pending: U256, is_native: bool) -> Option<U256> {
    let burn = burn.checked_sub(pending)?;
    if is_native {
        burn.checked_sub(mint)
    } else {
        mint.checked_sub(burn)
    }
}

fn display_token(token: &[u8]) -> String {
    String::from_utf8_lossy(token).into_owned()
}
