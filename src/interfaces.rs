//! Collaborator contracts the engine consumes.
//!
//! The engine never owns an oracle, a rebalancer or the rebasing token; they
//! are passed per call as trait parameters so tests and the CLI can plug in
//! fixtures (same pattern as a pluggable matching engine).

use std::collections::HashMap;

use crate::error::{ProtocolError, Result};
use crate::ledger::Address;
use crate::tick_math::WAD;

/// The operation a price proof is being resolved for. Lets an oracle
/// adapter pick the feed and staleness rules per action.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProtocolAction {
    InitiateDeposit,
    ValidateDeposit,
    InitiateWithdrawal,
    ValidateWithdrawal,
    InitiateOpenPosition,
    ValidateOpenPosition,
    InitiateClosePosition,
    ValidateClosePosition,
    Liquidation,
}

/// A resolved oracle price.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PriceSample {
    /// WAD price.
    pub price: u128,
    /// Timestamp the price was observed at, seconds.
    pub timestamp: u64,
    /// Fee the oracle charged for this resolution; settled by the caller,
    /// not routed through the engine.
    pub fee: u128,
}

/// Price-oracle collaborator. Must be deterministic for a given proof and
/// fail with a distinguishable error for stale or invalid proofs.
pub trait Oracle {
    fn resolve(
        &self,
        proof: &[u8],
        action: ProtocolAction,
        at_or_after: u64,
    ) -> Result<PriceSample>;
}

/// What the rebalancer wants done with its proxy position after a trigger.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RebalancerOrder {
    /// Nothing to do.
    Stay,
    /// Open (or re-open) the proxy position with this collateral and
    /// leverage (both WAD).
    Open { amount: u128, leverage: u128 },
    /// Close the standing proxy position entirely.
    Close,
}

/// Rebalancer collaborator, pinged by the liquidation engine when the
/// post-liquidation imbalance passes the configured threshold.
pub trait Rebalancer {
    fn address(&self) -> Address;
    /// `imbalance` is the signed WAD long-vs-vault imbalance.
    fn on_trigger(&self, imbalance: i128) -> RebalancerOrder;
}

/// Rebasing synthetic-token collaborator. Share/divisor bookkeeping is its
/// own concern; the engine only mints on deposits and burns on withdrawals.
pub trait RebasingToken {
    fn mint(&mut self, to: Address, shares: u128) -> Result<()>;
    fn burn(&mut self, from: Address, shares: u128) -> Result<()>;
}

// ---------------------------------------------------------------------------
// Fixtures (used by tests and the CLI scenario runner)
// ---------------------------------------------------------------------------

/// Oracle fixture: decodes the proof as `(wad_price_le_bytes[16] ||
/// timestamp_le_bytes[8])`, charging no fee. A malformed proof is the
/// "cryptographically invalid" case.
#[derive(Clone, Copy, Debug, Default)]
pub struct FixtureOracle;

impl FixtureOracle {
    /// Encode a proof the fixture accepts.
    pub fn proof(price: u128, timestamp: u64) -> Vec<u8> {
        let mut out = Vec::with_capacity(24);
        out.extend_from_slice(&price.to_le_bytes());
        out.extend_from_slice(&timestamp.to_le_bytes());
        out
    }
}

impl Oracle for FixtureOracle {
    fn resolve(
        &self,
        proof: &[u8],
        _action: ProtocolAction,
        at_or_after: u64,
    ) -> Result<PriceSample> {
        let (price_bytes, ts_bytes) = match proof {
            proof if proof.len() == 24 => proof.split_at(16),
            _ => return Err(ProtocolError::Oracle("malformed proof".into())),
        };
        let price = price_bytes
            .try_into()
            .map(u128::from_le_bytes)
            .map_err(|_| ProtocolError::Oracle("malformed proof".into()))?;
        let timestamp = ts_bytes
            .try_into()
            .map(u64::from_le_bytes)
            .map_err(|_| ProtocolError::Oracle("malformed proof".into()))?;
        if price == 0 {
            return Err(ProtocolError::Oracle("zero price".into()));
        }
        if timestamp < at_or_after {
            return Err(ProtocolError::PriceTimestampMismatch {
                price_ts: timestamp,
                action_ts: at_or_after,
            });
        }
        Ok(PriceSample {
            price,
            timestamp,
            fee: 0,
        })
    }
}

/// Rebalancer fixture that never reacts.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopRebalancer;

impl Rebalancer for NoopRebalancer {
    fn address(&self) -> Address {
        [0xEB; 32]
    }

    fn on_trigger(&self, _imbalance: i128) -> RebalancerOrder {
        RebalancerOrder::Stay
    }
}

/// In-memory rebasing-token fixture tracking per-address share balances.
#[derive(Clone, Debug, Default)]
pub struct LedgerToken {
    balances: HashMap<Address, u128>,
    total_shares: u128,
}

impl LedgerToken {
    pub fn balance_of(&self, who: &Address) -> u128 {
        self.balances.get(who).copied().unwrap_or(0)
    }

    pub fn total_shares(&self) -> u128 {
        self.total_shares
    }
}

impl RebasingToken for LedgerToken {
    fn mint(&mut self, to: Address, shares: u128) -> Result<()> {
        let balance = self.balances.entry(to).or_insert(0);
        *balance = balance.checked_add(shares).ok_or(ProtocolError::Overflow)?;
        self.total_shares = self
            .total_shares
            .checked_add(shares)
            .ok_or(ProtocolError::Overflow)?;
        Ok(())
    }

    fn burn(&mut self, from: Address, shares: u128) -> Result<()> {
        let held = self.balance_of(&from);
        if held < shares {
            return Err(ProtocolError::AmountTooLarge {
                requested: shares,
                held,
            });
        }
        if let Some(balance) = self.balances.get_mut(&from) {
            *balance -= shares;
        }
        self.total_shares -= shares;
        Ok(())
    }
}

/// Shares minted for an asset deposit at `price`: the synthetic targets one
/// quote unit per share. Widened through 256 bits; WAD * WAD products do
/// not fit in u128.
pub fn shares_for_deposit(amount: u128, price: u128) -> Result<u128> {
    huge_uint::HugeUint::mul_u128(amount, price)
        .checked_div(&huge_uint::HugeUint::from_u128(WAD))
        .and_then(|v| v.try_to_u128())
        .ok_or(ProtocolError::Overflow)
}

/// Assets owed for burning `shares` at `price`.
pub fn assets_for_withdrawal(shares: u128, price: u128) -> Result<u128> {
    if price == 0 {
        return Err(ProtocolError::InvalidPrice(0));
    }
    huge_uint::HugeUint::mul_u128(shares, WAD)
        .checked_div(&huge_uint::HugeUint::from_u128(price))
        .and_then(|v| v.try_to_u128())
        .ok_or(ProtocolError::Overflow)
}
