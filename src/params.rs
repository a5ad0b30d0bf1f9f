//! Protocol parameters.

use serde::{Deserialize, Serialize};

use crate::error::{ProtocolError, Result};
use crate::tick_math::{MAX_TICK, MIN_TICK, WAD};

/// Static configuration for one protocol instance. All ratios are WAD
/// (1e18) fixed point; durations are seconds.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Params {
    /// Distance between two usable ticks.
    pub tick_spacing: i32,

    /// Liquidation penalty, in ticks, attached to a tick at creation.
    /// Must be a multiple of `tick_spacing`.
    pub liquidation_penalty_ticks: i32,

    /// Minimum leverage (WAD, e.g. 1.000000001e18).
    pub min_leverage: u128,

    /// Maximum leverage (WAD, e.g. 10e18).
    pub max_leverage: u128,

    /// Minimum position collateral (WAD asset units).
    pub min_position_amount: u128,

    /// Funding sensitivity: rate per day at full imbalance (WAD/day).
    pub funding_sf: i128,

    /// Symmetric clamp on the instantaneous funding rate (WAD/day).
    pub max_funding_rate: i128,

    /// EMA window for the funding rate, seconds.
    pub ema_period: u64,

    /// Seconds that must elapse after an initiate before its validate.
    pub validation_delay: u64,

    /// Seconds after which any third party may validate a pending action
    /// and keep its security deposit.
    pub validation_deadline: u64,

    /// Window after initiation inside which a price proof timestamp is
    /// accepted for validation, seconds.
    pub price_validity: u64,

    /// Security deposit charged on every initiate (WAD asset units).
    pub security_deposit: u128,

    /// Long-side imbalance limit for opens: reject when
    /// (long trading expo - vault) / vault exceeds this (WAD).
    pub open_imbalance_limit: i128,

    /// Vault-side imbalance limit for deposits: reject when
    /// (vault - long trading expo) / long trading expo exceeds this (WAD).
    pub deposit_imbalance_limit: i128,

    /// Imbalance past which a liquidation pass pings the rebalancer (WAD).
    pub rebalancer_trigger_imbalance: i128,

    /// Default tick-walk bound for liquidation passes triggered as a side
    /// effect of user actions.
    pub max_liquidation_iterations: u16,
}

impl Default for Params {
    fn default() -> Self {
        Self {
            tick_spacing: 100,
            liquidation_penalty_ticks: 200,
            min_leverage: WAD + WAD / 1_000_000_000, // 1.000000001x
            max_leverage: 10 * WAD,
            min_position_amount: WAD / 1000, // 0.001 asset
            funding_sf: (WAD / 100) as i128, // 1%/day at full imbalance
            max_funding_rate: (WAD / 20) as i128, // 5%/day
            ema_period: 8 * 3600,
            validation_delay: 24,
            validation_deadline: 20 * 60,
            price_validity: 60 * 60,
            security_deposit: WAD / 2000, // 0.0005 asset
            open_imbalance_limit: (WAD / 5) as i128, // +20%
            deposit_imbalance_limit: (WAD / 5) as i128,
            rebalancer_trigger_imbalance: (WAD / 2) as i128, // 50%
            max_liquidation_iterations: 10,
        }
    }
}

impl Params {
    pub fn validate(&self) -> Result<()> {
        if self.tick_spacing <= 0 || self.tick_spacing > MAX_TICK {
            return Err(ProtocolError::InvalidTick(self.tick_spacing));
        }
        if self.liquidation_penalty_ticks < 0
            || self.liquidation_penalty_ticks % self.tick_spacing != 0
        {
            return Err(ProtocolError::InvalidTick(self.liquidation_penalty_ticks));
        }
        if self.min_leverage <= WAD || self.max_leverage <= self.min_leverage {
            return Err(ProtocolError::LeverageOutOfRange(self.min_leverage));
        }
        if self.max_funding_rate < 0 || self.funding_sf < 0 {
            return Err(ProtocolError::Overflow);
        }
        if self.ema_period == 0 || self.price_validity == 0 {
            return Err(ProtocolError::Overflow);
        }
        if self.validation_deadline <= self.validation_delay {
            return Err(ProtocolError::Overflow);
        }
        debug_assert!(MIN_TICK < 0);
        Ok(())
    }

    /// Number of spacing-aligned tick buckets the bitmap must cover.
    pub(crate) fn bucket_count(&self) -> usize {
        ((MAX_TICK - MIN_TICK) / self.tick_spacing) as usize + 1
    }
}
