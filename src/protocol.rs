//! Protocol entry points.
//!
//! `Protocol` owns the ledger, the balance accounting and the pending-action
//! store; collaborators (oracle, rebalancer, rebasing token) are passed per
//! call. Every state-changing operation starts with a liquidation pass at
//! the freshest price, so the book the operation sees is never stale, then
//! runs its own initiate/validate logic. Initiates store a pending action;
//! validates consume one, pinned to the price window of this initiation.

use huge_uint::HugeUint;

use crate::error::{ProtocolError, Result};
use crate::funding::Accounting;
use crate::interfaces::{
    assets_for_withdrawal, shares_for_deposit, Oracle, PriceSample, ProtocolAction, Rebalancer,
    RebalancerOrder, RebasingToken,
};
use crate::ledger::{Address, Ledger, Position, PositionId};
use crate::liquidation::{self, LiquidationReport};
use crate::params::Params;
use crate::pending::{ActionKind, PendingAction, PendingPayload, PendingStore};
use crate::tick_math::{self, WAD};

/// What a successful validate did, including who earned the security
/// deposit (the validator, which is only the initiator when they validate
/// themselves in time).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ValidateOutcome {
    pub kind: ActionKind,
    pub user: Address,
    /// Shares minted (deposit), assets paid (withdrawal/close), or zero.
    pub amount_out: u128,
    pub security_deposit: u128,
    pub deposit_refunded_to: Address,
    /// The action referenced a position that was liquidated while pending;
    /// the slot was cleared with no economic effect.
    pub position_was_liquidated: bool,
}

#[derive(Clone, Debug)]
pub struct Protocol {
    params: Params,
    ledger: Ledger,
    accounting: Accounting,
    pending: PendingStore,
    /// Security deposits currently held against pending actions.
    deposits_held: u128,
    /// Standing proxy position owned by the rebalancer, if open.
    rebalancer_position: Option<PositionId>,
}

impl Protocol {
    pub fn new(params: Params, initial_price: u128, timestamp: u64) -> Result<Self> {
        params.validate()?;
        if initial_price == 0 {
            return Err(ProtocolError::InvalidPrice(0));
        }
        Ok(Self {
            ledger: Ledger::new(
                params.tick_spacing,
                params.liquidation_penalty_ticks,
                params.bucket_count(),
            ),
            accounting: Accounting::new(initial_price, timestamp),
            pending: PendingStore::default(),
            deposits_held: 0,
            rebalancer_position: None,
            params,
        })
    }

    pub fn params(&self) -> &Params {
        &self.params
    }

    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    pub fn accounting(&self) -> &Accounting {
        &self.accounting
    }

    pub fn pending(&self, user: &Address) -> Option<&PendingAction> {
        self.pending.get(user)
    }

    pub fn deposits_held(&self) -> u128 {
        self.deposits_held
    }

    /// Standing rebalancer proxy position, if one is open.
    pub fn rebalancer_position(&self) -> Option<&PositionId> {
        self.rebalancer_position.as_ref()
    }

    /// Actions that are (or will be within `lookahead` seconds) past the
    /// validation deadline, oldest first, excluding the caller's own.
    pub fn actionable_pending_actions(
        &self,
        caller: &Address,
        now: u64,
        lookahead: u64,
        max: usize,
    ) -> Vec<&PendingAction> {
        self.pending
            .actionable(now, self.params.validation_deadline, caller, lookahead, max)
    }

    // -----------------------------------------------------------------------
    // Maintenance
    // -----------------------------------------------------------------------

    /// Public liquidation entry: settle funding, walk at most
    /// `max_iterations` ticks, and let the rebalancer react if the
    /// remaining imbalance warrants it.
    pub fn liquidate<O: Oracle, R: Rebalancer>(
        &mut self,
        oracle: &O,
        rebalancer: &R,
        proof: &[u8],
        max_iterations: u16,
    ) -> Result<LiquidationReport> {
        let sample = oracle.resolve(proof, ProtocolAction::Liquidation, 0)?;
        let report = liquidation::run(
            &mut self.ledger,
            &mut self.accounting,
            &self.params,
            sample.price,
            sample.timestamp,
            max_iterations,
        )?;
        self.after_liquidation(&report, rebalancer, &sample)?;
        Ok(report)
    }

    /// Internal pass used as a prologue by every entry point.
    fn liquidation_prologue<R: Rebalancer>(
        &mut self,
        rebalancer: &R,
        sample: &PriceSample,
    ) -> Result<()> {
        let report = liquidation::run(
            &mut self.ledger,
            &mut self.accounting,
            &self.params,
            sample.price,
            sample.timestamp,
            self.params.max_liquidation_iterations,
        )?;
        self.after_liquidation(&report, rebalancer, sample)
    }

    fn after_liquidation<R: Rebalancer>(
        &mut self,
        report: &LiquidationReport,
        rebalancer: &R,
        sample: &PriceSample,
    ) -> Result<()> {
        // Drop the proxy handle if its tick was among the liquidated.
        if let Some(id) = self.rebalancer_position {
            if self.ledger.position(&id).is_err() {
                self.rebalancer_position = None;
            }
        }
        let Some(imbalance) = report.rebalancer_trigger else {
            return Ok(());
        };
        match rebalancer.on_trigger(imbalance) {
            RebalancerOrder::Stay => {}
            RebalancerOrder::Open { amount, leverage } => {
                // Re-entering the normal open path; failures here must not
                // poison the surrounding liquidation.
                match self.open_position_at(
                    rebalancer.address(),
                    amount,
                    leverage,
                    sample.price,
                    sample.timestamp,
                ) {
                    Ok(id) => self.rebalancer_position = Some(id),
                    Err(err) => log::warn!("rebalancer open rejected: {err}"),
                }
            }
            RebalancerOrder::Close => {
                if let Some(id) = self.rebalancer_position.take() {
                    if let Err(err) = self.close_position_now(&id, sample.price) {
                        log::warn!("rebalancer close rejected: {err}");
                    }
                }
            }
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Deposit / withdrawal (vault side)
    // -----------------------------------------------------------------------

    pub fn initiate_deposit<O: Oracle, R: Rebalancer, T: RebasingToken>(
        &mut self,
        oracle: &O,
        rebalancer: &R,
        token: &mut T,
        user: Address,
        amount: u128,
        min_shares: u128,
        proof: &[u8],
        actionable_proofs: &[&[u8]],
    ) -> Result<()> {
        let sample = oracle.resolve(proof, ProtocolAction::InitiateDeposit, 0)?;
        self.liquidation_prologue(rebalancer, &sample)?;
        self.clear_actionable(oracle, token, &user, sample.timestamp, actionable_proofs)?;

        if amount == 0 {
            return Err(ProtocolError::ZeroAmount);
        }
        self.check_deposit_imbalance(amount)?;

        self.pending.insert(PendingAction {
            user,
            timestamp: sample.timestamp,
            security_deposit: self.params.security_deposit,
            payload: PendingPayload::Deposit { amount, min_shares },
        })?;
        self.deposits_held += self.params.security_deposit;
        Ok(())
    }

    pub fn validate_deposit<O: Oracle, T: RebasingToken>(
        &mut self,
        oracle: &O,
        token: &mut T,
        validator: Address,
        user: Address,
        proof: &[u8],
    ) -> Result<ValidateOutcome> {
        let action = self.expect_pending(&user, ActionKind::Deposit)?;
        let sample = self.resolve_for_validation(
            oracle,
            proof,
            ProtocolAction::ValidateDeposit,
            &action,
        )?;
        let PendingPayload::Deposit { amount, min_shares } = action.payload else {
            return Err(ProtocolError::PendingKindMismatch);
        };

        let shares = shares_for_deposit(amount, sample.price)?;
        if shares < min_shares {
            return Err(ProtocolError::SlippageExceeded {
                actual: shares,
                min: min_shares,
            });
        }

        self.consume_pending(&user)?;
        self.accounting.balance_vault = self
            .accounting
            .balance_vault
            .checked_add(amount)
            .ok_or(ProtocolError::Overflow)?;
        token.mint(user, shares)?;

        Ok(self.outcome(ActionKind::Deposit, user, shares, &action, validator, false))
    }

    pub fn initiate_withdrawal<O: Oracle, R: Rebalancer, T: RebasingToken>(
        &mut self,
        oracle: &O,
        rebalancer: &R,
        token: &mut T,
        user: Address,
        shares: u128,
        min_assets: u128,
        proof: &[u8],
        actionable_proofs: &[&[u8]],
    ) -> Result<()> {
        let sample = oracle.resolve(proof, ProtocolAction::InitiateWithdrawal, 0)?;
        self.liquidation_prologue(rebalancer, &sample)?;
        self.clear_actionable(oracle, token, &user, sample.timestamp, actionable_proofs)?;

        if shares == 0 {
            return Err(ProtocolError::ZeroAmount);
        }
        self.pending.insert(PendingAction {
            user,
            timestamp: sample.timestamp,
            security_deposit: self.params.security_deposit,
            payload: PendingPayload::Withdrawal { shares, min_assets },
        })?;
        self.deposits_held += self.params.security_deposit;
        Ok(())
    }

    pub fn validate_withdrawal<O: Oracle, T: RebasingToken>(
        &mut self,
        oracle: &O,
        token: &mut T,
        validator: Address,
        user: Address,
        proof: &[u8],
    ) -> Result<ValidateOutcome> {
        let action = self.expect_pending(&user, ActionKind::Withdrawal)?;
        let sample = self.resolve_for_validation(
            oracle,
            proof,
            ProtocolAction::ValidateWithdrawal,
            &action,
        )?;
        let PendingPayload::Withdrawal { shares, min_assets } = action.payload else {
            return Err(ProtocolError::PendingKindMismatch);
        };

        let assets = assets_for_withdrawal(shares, sample.price)?.min(self.accounting.balance_vault);
        if assets < min_assets {
            return Err(ProtocolError::SlippageExceeded {
                actual: assets,
                min: min_assets,
            });
        }

        token.burn(user, shares)?;
        self.consume_pending(&user)?;
        self.accounting.balance_vault -= assets;

        Ok(self.outcome(ActionKind::Withdrawal, user, assets, &action, validator, false))
    }

    // -----------------------------------------------------------------------
    // Open position (long side)
    // -----------------------------------------------------------------------

    pub fn initiate_open_position<O: Oracle, R: Rebalancer, T: RebasingToken>(
        &mut self,
        oracle: &O,
        rebalancer: &R,
        token: &mut T,
        user: Address,
        amount: u128,
        leverage: u128,
        proof: &[u8],
        actionable_proofs: &[&[u8]],
    ) -> Result<PositionId> {
        let sample = oracle.resolve(proof, ProtocolAction::InitiateOpenPosition, 0)?;
        self.liquidation_prologue(rebalancer, &sample)?;
        self.clear_actionable(oracle, token, &user, sample.timestamp, actionable_proofs)?;

        if self.pending.get(&user).is_some() {
            return Err(ProtocolError::AlreadyPending);
        }
        let id = self.open_position_at(user, amount, leverage, sample.price, sample.timestamp)?;
        self.pending.insert(PendingAction {
            user,
            timestamp: sample.timestamp,
            security_deposit: self.params.security_deposit,
            payload: PendingPayload::OpenPosition { id },
        })?;
        self.deposits_held += self.params.security_deposit;
        Ok(id)
    }

    pub fn validate_open_position<O: Oracle>(
        &mut self,
        oracle: &O,
        validator: Address,
        user: Address,
        proof: &[u8],
    ) -> Result<ValidateOutcome> {
        let action = self.expect_pending(&user, ActionKind::OpenPosition)?;
        let sample = self.resolve_for_validation(
            oracle,
            proof,
            ProtocolAction::ValidateOpenPosition,
            &action,
        )?;
        let PendingPayload::OpenPosition { id } = action.payload else {
            return Err(ProtocolError::PendingKindMismatch);
        };

        // The tick may have been liquidated while the action was pending;
        // the slot is cleared with no further effect.
        let amount = match self.ledger.position(&id) {
            Ok(position) => position.amount,
            Err(ProtocolError::StalePosition { .. }) => {
                self.consume_pending(&user)?;
                return Ok(self.outcome(ActionKind::OpenPosition, user, 0, &action, validator, true));
            }
            Err(err) => return Err(err),
        };

        // Re-anchor the exposure to the validated entry price so the
        // position's realized leverage matches the price it actually got.
        let trading_expo = self.accounting.long_trading_expo(self.ledger.total_expo());
        let penalty = self
            .ledger
            .tick(id.tick)
            .map(|data| data.penalty_ticks)
            .unwrap_or(self.params.liquidation_penalty_ticks);
        let liq_price = self.ledger.effective_price_for_tick(
            id.tick - penalty,
            sample.price,
            trading_expo,
        )?;
        // Skip the re-anchor when the validated price already sits at or
        // under the liquidation price; the next liquidation pass claims
        // the tick and the slot must not stay stuck until then.
        let new_expo = if liq_price < sample.price {
            let expo = expo_for(amount, sample.price, liq_price)?;
            self.ledger.update_amounts(&id, amount, expo)?;
            expo
        } else {
            self.ledger.position(&id)?.total_expo
        };

        self.consume_pending(&user)?;
        Ok(self.outcome(ActionKind::OpenPosition, user, new_expo, &action, validator, false))
    }

    // -----------------------------------------------------------------------
    // Close position
    // -----------------------------------------------------------------------

    pub fn initiate_close_position<O: Oracle, R: Rebalancer, T: RebasingToken>(
        &mut self,
        oracle: &O,
        rebalancer: &R,
        token: &mut T,
        user: Address,
        id: PositionId,
        amount_to_close: u128,
        proof: &[u8],
        actionable_proofs: &[&[u8]],
    ) -> Result<()> {
        let sample = oracle.resolve(proof, ProtocolAction::InitiateClosePosition, 0)?;
        self.liquidation_prologue(rebalancer, &sample)?;
        self.clear_actionable(oracle, token, &user, sample.timestamp, actionable_proofs)?;

        if self.pending.get(&user).is_some() {
            return Err(ProtocolError::AlreadyPending);
        }
        let min_amount = self.params.min_position_amount;
        let position = self.ledger.position(&id)?;
        if position.user != user {
            return Err(ProtocolError::NotPositionOwner);
        }
        if position.pending_close {
            return Err(ProtocolError::CloseAlreadyPending);
        }
        if amount_to_close == 0 {
            return Err(ProtocolError::ZeroAmount);
        }
        if amount_to_close > position.amount {
            return Err(ProtocolError::AmountTooLarge {
                requested: amount_to_close,
                held: position.amount,
            });
        }
        // No dust positions: a remainder under the minimum forces a full
        // close.
        let remainder = position.amount - amount_to_close;
        let amount_to_close = if remainder > 0 && remainder < min_amount {
            position.amount
        } else {
            amount_to_close
        };

        self.ledger.position_mut(&id)?.pending_close = true;
        self.pending.insert(PendingAction {
            user,
            timestamp: sample.timestamp,
            security_deposit: self.params.security_deposit,
            payload: PendingPayload::ClosePosition {
                id,
                amount_to_close,
            },
        })?;
        self.deposits_held += self.params.security_deposit;
        Ok(())
    }

    pub fn validate_close_position<O: Oracle>(
        &mut self,
        oracle: &O,
        validator: Address,
        user: Address,
        proof: &[u8],
    ) -> Result<ValidateOutcome> {
        let action = self.expect_pending(&user, ActionKind::ClosePosition)?;
        let sample = self.resolve_for_validation(
            oracle,
            proof,
            ProtocolAction::ValidateClosePosition,
            &action,
        )?;
        let PendingPayload::ClosePosition {
            id,
            amount_to_close,
        } = action.payload
        else {
            return Err(ProtocolError::PendingKindMismatch);
        };

        // Liquidated while pending: clear the slot, nothing to pay out.
        let position = match self.ledger.position(&id) {
            Ok(position) => *position,
            Err(ProtocolError::StalePosition { .. }) => {
                self.consume_pending(&user)?;
                return Ok(self.outcome(
                    ActionKind::ClosePosition,
                    user,
                    0,
                    &action,
                    validator,
                    true,
                ));
            }
            Err(err) => return Err(err),
        };

        let payout = self.settle_close(&id, &position, amount_to_close, sample.price)?;
        self.consume_pending(&user)?;
        Ok(self.outcome(ActionKind::ClosePosition, user, payout, &action, validator, false))
    }

    // -----------------------------------------------------------------------
    // Third-party validation of stale actions
    // -----------------------------------------------------------------------

    /// Validate up to `proofs.len()` other accounts' overdue actions; the
    /// caller keeps each security deposit. Returns how many were cleared.
    pub fn validate_actionable<O: Oracle, T: RebasingToken>(
        &mut self,
        oracle: &O,
        token: &mut T,
        caller: Address,
        now: u64,
        proofs: &[&[u8]],
    ) -> Result<usize> {
        self.clear_actionable(oracle, token, &caller, now, proofs)
    }

    fn clear_actionable<O: Oracle, T: RebasingToken>(
        &mut self,
        oracle: &O,
        token: &mut T,
        caller: &Address,
        now: u64,
        proofs: &[&[u8]],
    ) -> Result<usize> {
        let users: Vec<Address> = self
            .pending
            .actionable(
                now,
                self.params.validation_deadline,
                caller,
                0,
                proofs.len(),
            )
            .iter()
            .map(|action| action.user)
            .collect();

        let mut cleared = 0;
        for (user, proof) in users.iter().zip(proofs) {
            let Some(kind) = self.pending.get(user).map(|action| action.payload.kind()) else {
                continue;
            };
            let result = match kind {
                ActionKind::Deposit => self.validate_deposit(oracle, token, *caller, *user, *proof),
                ActionKind::Withdrawal => {
                    self.validate_withdrawal(oracle, token, *caller, *user, *proof)
                }
                ActionKind::OpenPosition => self.validate_open_position(oracle, *caller, *user, *proof),
                ActionKind::ClosePosition => {
                    self.validate_close_position(oracle, *caller, *user, *proof)
                }
            };
            // Another account's failing action must not abort the caller's
            // own flow; skip it and move on.
            match result {
                Ok(outcome) => {
                    debug_assert_eq!(outcome.deposit_refunded_to, *caller);
                    cleared += 1;
                }
                Err(err) => log::warn!("skipping actionable {kind:?} of another account: {err}"),
            }
        }
        Ok(cleared)
    }

    // -----------------------------------------------------------------------
    // Internals
    // -----------------------------------------------------------------------

    /// Open a position against the current book at `price`. Shared by the
    /// user initiate path and the rebalancer callback.
    fn open_position_at(
        &mut self,
        user: Address,
        amount: u128,
        leverage: u128,
        price: u128,
        timestamp: u64,
    ) -> Result<PositionId> {
        if !(self.params.min_leverage..=self.params.max_leverage).contains(&leverage) {
            return Err(ProtocolError::LeverageOutOfRange(leverage));
        }
        if amount < self.params.min_position_amount {
            return Err(ProtocolError::PositionTooSmall {
                amount,
                min: self.params.min_position_amount,
            });
        }

        // Desired unpenalized liquidation price: entry * (1 - 1/leverage).
        let desired = HugeUint::mul_u128(price, leverage - WAD)
            .checked_div(&HugeUint::from_u128(leverage))
            .and_then(|v| v.try_to_u128())
            .ok_or(ProtocolError::Overflow)?;

        let trading_expo = self.accounting.long_trading_expo(self.ledger.total_expo());
        // Round to the tick strictly above the unpenalized liquidation
        // price (the protocol-protecting direction), then attach the
        // penalty to get the stored tick.
        let raw = self
            .ledger
            .effective_tick_for_price(desired, price, trading_expo)?;
        let unpenalized_tick = tick_math::round_up_to_spacing(raw + 1, self.params.tick_spacing);
        let tick = unpenalized_tick + self.params.liquidation_penalty_ticks;

        let liq_price = self
            .ledger
            .effective_price_for_tick(unpenalized_tick, price, trading_expo)?;
        if liq_price >= price {
            return Err(ProtocolError::InvalidLiquidationPrice);
        }
        let total_expo = expo_for(amount, price, liq_price)?;
        self.check_open_imbalance(amount, total_expo)?;

        let id = self.ledger.insert(
            tick,
            Position {
                user,
                amount,
                total_expo,
                timestamp,
                pending_close: false,
            },
        )?;
        self.accounting.balance_long = self
            .accounting
            .balance_long
            .checked_add(amount)
            .ok_or(ProtocolError::Overflow)?;
        Ok(id)
    }

    /// Settle (part of) a position at `price`, paying its current value out
    /// of the long balance. Returns the payout.
    fn settle_close(
        &mut self,
        id: &PositionId,
        position: &Position,
        amount_to_close: u128,
        price: u128,
    ) -> Result<u128> {
        let expo_to_close = HugeUint::mul_u128(position.total_expo, amount_to_close)
            .checked_div(&HugeUint::from_u128(position.amount.max(1)))
            .and_then(|v| v.try_to_u128())
            .ok_or(ProtocolError::Overflow)?;

        let trading_expo = self.accounting.long_trading_expo(self.ledger.total_expo());
        let penalty = self
            .ledger
            .tick(id.tick)
            .map(|data| data.penalty_ticks)
            .unwrap_or(self.params.liquidation_penalty_ticks);
        let liq_price =
            self.ledger
                .effective_price_for_tick(id.tick - penalty, price, trading_expo)?;

        // value = expo * (price - liq) / price, zero when under water (the
        // liquidation engine owns that case).
        let value = if price > liq_price {
            HugeUint::mul_u128(expo_to_close, price - liq_price)
                .checked_div(&HugeUint::from_u128(price))
                .and_then(|v| v.try_to_u128())
                .ok_or(ProtocolError::Overflow)?
        } else {
            0
        };

        if amount_to_close == position.amount {
            self.ledger.remove(id)?;
        } else {
            self.ledger.update_amounts(
                id,
                position.amount - amount_to_close,
                position.total_expo - expo_to_close,
            )?;
            self.ledger.position_mut(id)?.pending_close = false;
        }

        let payout = value.min(self.accounting.balance_long);
        self.accounting.balance_long -= payout;
        Ok(payout)
    }

    /// Immediate full close used by the rebalancer callback; the freed
    /// value stays in the vault rather than being paid out.
    fn close_position_now(&mut self, id: &PositionId, price: u128) -> Result<()> {
        let position = *self.ledger.position(id)?;
        let value = self.settle_close(id, &position, position.amount, price)?;
        self.accounting.balance_vault = self
            .accounting
            .balance_vault
            .checked_add(value)
            .ok_or(ProtocolError::Overflow)?;
        Ok(())
    }

    fn check_open_imbalance(&self, amount: u128, expo: u128) -> Result<()> {
        let vault = self.accounting.balance_vault;
        if vault == 0 {
            return Ok(()); // bootstrap: nothing to compare against yet
        }
        let new_expo = self
            .ledger
            .total_expo()
            .checked_add(expo)
            .ok_or(ProtocolError::Overflow)?;
        let new_long = self
            .accounting
            .balance_long
            .checked_add(amount)
            .ok_or(ProtocolError::Overflow)?;
        let new_trading = new_expo.saturating_sub(new_long);
        let imbalance = (new_trading as i128 - vault as i128)
            .saturating_mul(WAD as i128)
            / vault as i128;
        if imbalance > self.params.open_imbalance_limit {
            return Err(ProtocolError::ImbalanceLimitReached);
        }
        Ok(())
    }

    fn check_deposit_imbalance(&self, amount: u128) -> Result<()> {
        let trading = self.accounting.long_trading_expo(self.ledger.total_expo());
        if trading == 0 {
            return Ok(());
        }
        let new_vault = self
            .accounting
            .balance_vault
            .checked_add(amount)
            .ok_or(ProtocolError::Overflow)?;
        let imbalance = (new_vault as i128 - trading as i128)
            .saturating_mul(WAD as i128)
            / trading as i128;
        if imbalance > self.params.deposit_imbalance_limit {
            return Err(ProtocolError::ImbalanceLimitReached);
        }
        Ok(())
    }

    fn expect_pending(&self, user: &Address, kind: ActionKind) -> Result<PendingAction> {
        let action = self
            .pending
            .get(user)
            .copied()
            .ok_or(ProtocolError::NoPendingAction)?;
        if action.payload.kind() != kind {
            return Err(ProtocolError::PendingKindMismatch);
        }
        Ok(action)
    }

    fn consume_pending(&mut self, user: &Address) -> Result<()> {
        let action = self.pending.take(user)?;
        self.deposits_held = self.deposits_held.saturating_sub(action.security_deposit);
        Ok(())
    }

    /// Resolve a validation price pinned to the action's initiation window:
    /// at least `validation_delay` after initiation, at most
    /// `price_validity` after it.
    fn resolve_for_validation<O: Oracle>(
        &self,
        oracle: &O,
        proof: &[u8],
        kind: ProtocolAction,
        action: &PendingAction,
    ) -> Result<PriceSample> {
        let earliest = action.timestamp + self.params.validation_delay;
        let sample = oracle.resolve(proof, kind, action.timestamp)?;
        if sample.timestamp < earliest {
            return Err(ProtocolError::ValidationTooEarly {
                elapsed: sample.timestamp.saturating_sub(action.timestamp),
                delay: self.params.validation_delay,
            });
        }
        if sample.timestamp > action.timestamp + self.params.price_validity {
            return Err(ProtocolError::PriceTimestampMismatch {
                price_ts: sample.timestamp,
                action_ts: action.timestamp,
            });
        }
        Ok(sample)
    }

    fn outcome(
        &self,
        kind: ActionKind,
        user: Address,
        amount_out: u128,
        action: &PendingAction,
        validator: Address,
        position_was_liquidated: bool,
    ) -> ValidateOutcome {
        ValidateOutcome {
            kind,
            user,
            amount_out,
            security_deposit: action.security_deposit,
            deposit_refunded_to: validator,
            position_was_liquidated,
        }
    }
}

/// Exposure that realizes the entry/liquidation spread:
/// amount * price / (price - liq_price).
fn expo_for(amount: u128, price: u128, liq_price: u128) -> Result<u128> {
    if price <= liq_price {
        return Err(ProtocolError::InvalidLiquidationPrice);
    }
    HugeUint::mul_u128(amount, price)
        .checked_div(&HugeUint::from_u128(price - liq_price))
        .and_then(|v| v.try_to_u128())
        .ok_or(ProtocolError::Overflow)
}
