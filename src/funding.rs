//! Funding & balance accounting.
//!
//! One global settlement step reprices the long/vault split for the price
//! move since the last update and applies the funding transfer, in O(1):
//! per-position effects ride on the accumulator (see `ledger`), never on a
//! position walk. Intermediate balances are deliberately signed and
//! unclamped; shortfalls are shifted to the other side and only the final
//! committed values are clamped to zero, so bad debt is socialized instead
//! of silently truncated.

use huge_uint::HugeUint;

use crate::error::{ProtocolError, Result};
use crate::params::Params;
use crate::tick_math::WAD;

const SECONDS_PER_DAY: u128 = 86_400;

/// Long/vault balances plus the funding state.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Accounting {
    /// Asset backing the long side (sum of position collateral, price-
    /// settled), WAD.
    pub balance_long: u128,
    /// Asset backing the vault side, WAD.
    pub balance_vault: u128,
    /// EMA of the funding rate, WAD per day, signed.
    pub funding_ema: i128,
    /// Price at the last settlement, WAD.
    pub last_price: u128,
    /// Timestamp of the last settlement, seconds.
    pub last_update: u64,
}

/// What one settlement step did.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FundingReport {
    pub elapsed: u64,
    /// Instantaneous funding rate used, WAD per day.
    pub funding_rate: i128,
    /// Asset moved long->vault (negative: vault->long), WAD.
    pub funding_amount: i128,
    /// Asset moved vault->long by the price settlement, WAD.
    pub pnl_shift: i128,
}

impl Accounting {
    pub fn new(price: u128, timestamp: u64) -> Self {
        Self {
            balance_long: 0,
            balance_vault: 0,
            funding_ema: 0,
            last_price: price,
            last_update: timestamp,
        }
    }

    /// Long trading expo: total expo minus the long balance. The price
    /// sensitivity of the long side; non-negative by clamping.
    pub fn long_trading_expo(&self, total_expo: u128) -> u128 {
        total_expo.saturating_sub(self.balance_long)
    }

    /// Signed WAD imbalance of the long side against the vault:
    /// (long trading expo - vault) / max(long trading expo, vault).
    /// Zero when both sides are empty.
    pub fn imbalance(&self, total_expo: u128) -> i128 {
        let trading = self.long_trading_expo(total_expo);
        let vault = self.balance_vault;
        let denom = trading.max(vault);
        if denom == 0 {
            return 0;
        }
        let num = trading as i128 - vault as i128;
        // |num| <= denom so the WAD scale cannot overflow i128 for any
        // realistic balance.
        num.saturating_mul(WAD as i128) / denom as i128
    }

    /// Settle PnL and funding up to (`price`, `timestamp`). No-op when no
    /// time has elapsed. Returns the applied amounts; zero-sum between the
    /// two sides apart from the commit-time bad-debt clamp.
    pub fn apply_pnl_and_funding(
        &mut self,
        total_expo: u128,
        price: u128,
        timestamp: u64,
        params: &Params,
    ) -> Result<FundingReport> {
        let elapsed = timestamp.saturating_sub(self.last_update);
        if elapsed == 0 {
            return Ok(FundingReport::default());
        }
        if price == 0 {
            return Err(ProtocolError::InvalidPrice(0));
        }

        let trading_expo = self.long_trading_expo(total_expo);

        // Price settlement: the long side gains trading_expo * Δp / p,
        // computed as expo - expo * p0 / p to stay in unsigned widening math.
        let pnl_shift = trading_expo as i128 - signed_mul_div(trading_expo, self.last_price, price)?;

        // Funding from the pre-settlement imbalance.
        let rate = self
            .imbalance(total_expo)
            .saturating_mul(params.funding_sf)
            / WAD as i128;
        let rate = rate.clamp(-params.max_funding_rate, params.max_funding_rate);
        let funding_amount = funding_amount(rate, elapsed, total_expo)?;

        let mut long = self.balance_long as i128 + pnl_shift - funding_amount;
        let mut vault = self.balance_vault as i128 - pnl_shift + funding_amount;

        // Commit: shortfall on one side is the other side's loss; clamp
        // only after the reallocation.
        if long < 0 {
            vault += long;
            long = 0;
        }
        if vault < 0 {
            long += vault;
            vault = 0;
        }
        self.balance_long = long.max(0) as u128;
        self.balance_vault = vault.max(0) as u128;

        self.funding_ema = ema_blend(self.funding_ema, rate, elapsed, params.ema_period);
        self.last_price = price;
        self.last_update = timestamp;

        log::trace!(
            "funding settled: dt={elapsed}s rate={rate} amount={funding_amount} pnl={pnl_shift}"
        );

        Ok(FundingReport {
            elapsed,
            funding_rate: rate,
            funding_amount,
            pnl_shift,
        })
    }

    /// Apply a signed delta pair produced by the liquidation walk, with the
    /// same shortfall-then-clamp commit as the settlement step.
    pub fn commit_signed(&mut self, long: i128, vault: i128) {
        let mut long = long;
        let mut vault = vault;
        if long < 0 {
            vault += long;
            long = 0;
        }
        if vault < 0 {
            long += vault;
            vault = 0;
        }
        self.balance_long = long.max(0) as u128;
        self.balance_vault = vault.max(0) as u128;
    }
}

/// expo * old_price / new_price, widening through 512 bits.
fn signed_mul_div(expo: u128, old_price: u128, new_price: u128) -> Result<i128> {
    let scaled = HugeUint::mul_u128(expo, old_price)
        .checked_div(&HugeUint::from_u128(new_price))
        .ok_or(ProtocolError::Overflow)?
        .try_to_u128()
        .ok_or(ProtocolError::Overflow)?;
    i128::try_from(scaled).map_err(|_| ProtocolError::Overflow)
}

/// rate (WAD/day) * elapsed * total_expo / WAD / 86400, signed.
fn funding_amount(rate: i128, elapsed: u64, total_expo: u128) -> Result<i128> {
    let magnitude = HugeUint::mul_u128(rate.unsigned_abs(), elapsed as u128)
        .checked_mul_u128(total_expo)
        .ok_or(ProtocolError::Overflow)?
        .checked_div(&HugeUint::from_u128(WAD * SECONDS_PER_DAY))
        .ok_or(ProtocolError::Overflow)?
        .try_to_u128()
        .ok_or(ProtocolError::Overflow)?;
    let magnitude = i128::try_from(magnitude).map_err(|_| ProtocolError::Overflow)?;
    Ok(if rate < 0 { -magnitude } else { magnitude })
}

/// Window blend: snaps to the instantaneous rate once a full period has
/// elapsed, otherwise weights by elapsed time.
fn ema_blend(previous: i128, rate: i128, elapsed: u64, period: u64) -> i128 {
    if elapsed >= period {
        return rate;
    }
    let elapsed = elapsed as i128;
    let period = period as i128;
    (rate.saturating_mul(elapsed) + previous.saturating_mul(period - elapsed)) / period
}
