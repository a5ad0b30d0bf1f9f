//! Liquidation engine: the bounded tick walk.
//!
//! Given a fresh price, settle funding, derive the liquidation boundary
//! tick, then pop populated ticks from the top of the book while they sit
//! above the boundary, up to the caller's iteration budget. Each tick's
//! remaining value (possibly negative: bad debt) moves from the long side
//! to the vault as unclamped signed deltas; balances are committed once
//! after the walk. Liquidation never fails: an empty book or a boundary
//! above every tick processes zero iterations.

use crate::error::Result;
use crate::funding::Accounting;
use crate::ledger::Ledger;
use crate::params::Params;
use huge_uint::HugeUint;

/// Outcome of one liquidation pass.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LiquidationReport {
    pub liquidated_positions: usize,
    pub liquidated_ticks: Vec<i32>,
    /// Collateral handed to the vault by the walk, net of bad debt (signed).
    pub remaining_collateral: i128,
    /// Shortfall absorbed by the vault, WAD.
    pub bad_debt: u128,
    /// Set when the post-walk imbalance warrants a rebalancer trigger;
    /// carries the signed WAD imbalance.
    pub rebalancer_trigger: Option<i128>,
}

/// Run a liquidation pass at (`price`, `timestamp`), walking at most
/// `max_iterations` ticks.
pub(crate) fn run(
    ledger: &mut Ledger,
    accounting: &mut Accounting,
    params: &Params,
    price: u128,
    timestamp: u64,
    max_iterations: u16,
) -> Result<LiquidationReport> {
    accounting.apply_pnl_and_funding(ledger.total_expo(), price, timestamp, params)?;

    let mut report = LiquidationReport::default();
    let trading_expo = accounting.long_trading_expo(ledger.total_expo());
    let boundary = ledger.effective_tick_for_price(price, price, trading_expo)?;

    let mut long_delta: i128 = 0;
    let mut cursor = ledger.highest_tick();
    for _ in 0..max_iterations {
        let tick = match cursor {
            Some(tick) if tick > boundary => tick,
            _ => break,
        };

        // Value the tick at the pass price before the removal changes the
        // accumulator: expo - expo * liq_price_without_penalty / price.
        let penalty = ledger
            .tick(tick)
            .map(|data| data.penalty_ticks)
            .unwrap_or(0);
        let liq_price = ledger.effective_price_for_tick(tick - penalty, price, trading_expo)?;
        let removed = ledger.liquidate_tick(tick)?;
        cursor = ledger.next_tick_below(tick);

        let owed = HugeUint::mul_u128(removed.total_expo, liq_price)
            .checked_div(&HugeUint::from_u128(price))
            .and_then(|v| v.try_to_u128())
            .map(|v| v as i128)
            .unwrap_or(i128::MAX);
        let tick_value = removed.total_expo as i128 - owed;
        if tick_value < 0 {
            report.bad_debt += tick_value.unsigned_abs();
        }
        long_delta -= tick_value;
        report.remaining_collateral += tick_value;
        report.liquidated_positions += removed.positions_count;
        report.liquidated_ticks.push(tick);

        log::debug!(
            "liquidated tick {tick}: {} positions, expo {}, value {tick_value}",
            removed.positions_count,
            removed.total_expo,
        );
    }

    if long_delta != 0 {
        accounting.commit_signed(
            accounting.balance_long as i128 + long_delta,
            accounting.balance_vault as i128 - long_delta,
        );
    }

    if !report.liquidated_ticks.is_empty() {
        log::info!(
            "liquidation pass: {} ticks, {} positions, bad debt {}",
            report.liquidated_ticks.len(),
            report.liquidated_positions,
            report.bad_debt,
        );
        let imbalance = accounting.imbalance(ledger.total_expo());
        if imbalance.unsigned_abs() as i128 >= params.rebalancer_trigger_imbalance {
            report.rebalancer_trigger = Some(imbalance);
        }
    }

    Ok(report)
}
