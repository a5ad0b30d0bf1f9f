//! Pending-action store: the per-account single-slot queue behind the
//! two-phase initiate/validate protocol.
//!
//! Each account holds at most one in-flight action. Insertion order is kept
//! in a FIFO queue so third parties can discover the oldest actionable
//! (deadline-overdue) actions and clear them for the security deposit.

use std::collections::{HashMap, VecDeque};

use crate::error::{ProtocolError, Result};
use crate::ledger::{Address, PositionId};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ActionKind {
    Deposit,
    Withdrawal,
    OpenPosition,
    ClosePosition,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PendingPayload {
    Deposit {
        /// Asset amount awaiting its mint, WAD.
        amount: u128,
        /// Minimum acceptable shares out.
        min_shares: u128,
    },
    Withdrawal {
        shares: u128,
        /// Minimum acceptable assets out.
        min_assets: u128,
    },
    OpenPosition {
        id: PositionId,
    },
    ClosePosition {
        id: PositionId,
        /// Portion of the collateral being closed, WAD.
        amount_to_close: u128,
    },
}

impl PendingPayload {
    pub fn kind(&self) -> ActionKind {
        match self {
            Self::Deposit { .. } => ActionKind::Deposit,
            Self::Withdrawal { .. } => ActionKind::Withdrawal,
            Self::OpenPosition { .. } => ActionKind::OpenPosition,
            Self::ClosePosition { .. } => ActionKind::ClosePosition,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PendingAction {
    pub user: Address,
    /// Initiation timestamp; economic terms are pinned to it.
    pub timestamp: u64,
    /// Refundable stake, paid to whoever validates.
    pub security_deposit: u128,
    pub payload: PendingPayload,
}

#[derive(Clone, Debug, Default)]
pub struct PendingStore {
    actions: HashMap<Address, PendingAction>,
    queue: VecDeque<Address>,
}

impl PendingStore {
    pub fn len(&self) -> usize {
        self.actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    pub fn get(&self, user: &Address) -> Option<&PendingAction> {
        self.actions.get(user)
    }

    /// Store a new action; rejects while the account's slot is occupied.
    pub fn insert(&mut self, action: PendingAction) -> Result<()> {
        if self.actions.contains_key(&action.user) {
            return Err(ProtocolError::AlreadyPending);
        }
        self.queue.push_back(action.user);
        self.actions.insert(action.user, action);
        Ok(())
    }

    /// Remove and return the account's action.
    pub fn take(&mut self, user: &Address) -> Result<PendingAction> {
        let action = self
            .actions
            .remove(user)
            .ok_or(ProtocolError::NoPendingAction)?;
        self.queue.retain(|u| u != user);
        Ok(action)
    }

    /// Oldest-first actions that are past (or within `lookahead` seconds of)
    /// the validation deadline, skipping `caller`'s own slot, capped at
    /// `max`. Callers use this to assemble the price proofs they must
    /// submit alongside their own call.
    pub fn actionable(
        &self,
        now: u64,
        deadline: u64,
        caller: &Address,
        lookahead: u64,
        max: usize,
    ) -> Vec<&PendingAction> {
        let cutoff = now.saturating_add(lookahead);
        self.queue
            .iter()
            .filter(|user| *user != caller)
            .filter_map(|user| self.actions.get(user))
            .take_while(|action| action.timestamp.saturating_add(deadline) <= cutoff)
            .take(max)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALICE: Address = [1u8; 32];
    const BOB: Address = [2u8; 32];
    const CAROL: Address = [3u8; 32];

    fn deposit(user: Address, timestamp: u64) -> PendingAction {
        PendingAction {
            user,
            timestamp,
            security_deposit: 100,
            payload: PendingPayload::Deposit {
                amount: 1000,
                min_shares: 0,
            },
        }
    }

    #[test]
    fn one_slot_per_account() {
        let mut store = PendingStore::default();
        store.insert(deposit(ALICE, 10)).unwrap();
        assert_eq!(
            store.insert(deposit(ALICE, 20)),
            Err(ProtocolError::AlreadyPending)
        );
        store.take(&ALICE).unwrap();
        assert_eq!(store.take(&ALICE), Err(ProtocolError::NoPendingAction));
        // Slot is free again after a take.
        store.insert(deposit(ALICE, 30)).unwrap();
    }

    #[test]
    fn actionable_is_oldest_first_and_skips_caller() {
        let mut store = PendingStore::default();
        store.insert(deposit(ALICE, 0)).unwrap();
        store.insert(deposit(BOB, 50)).unwrap();
        store.insert(deposit(CAROL, 5000)).unwrap();

        // deadline 100: at t=200 ALICE (0) and BOB (50) are overdue.
        let found = store.actionable(200, 100, &BOB, 0, 10);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].user, ALICE);

        let found = store.actionable(200, 100, &CAROL, 0, 10);
        assert_eq!(found.iter().map(|a| a.user).collect::<Vec<_>>(), vec![ALICE, BOB]);
    }

    #[test]
    fn lookahead_widens_the_window() {
        let mut store = PendingStore::default();
        store.insert(deposit(ALICE, 100)).unwrap();
        // Deadline at 200; at t=150 not yet actionable...
        assert!(store.actionable(150, 100, &BOB, 0, 10).is_empty());
        // ...but a 60s lookahead already surfaces it.
        assert_eq!(store.actionable(150, 100, &BOB, 60, 10).len(), 1);
    }

    #[test]
    fn cap_limits_results() {
        let mut store = PendingStore::default();
        store.insert(deposit(ALICE, 0)).unwrap();
        store.insert(deposit(BOB, 0)).unwrap();
        assert_eq!(store.actionable(1000, 100, &CAROL, 0, 1).len(), 1);
    }
}
