//! Fuzzing suite for the protocol engine
//!
//! Run with: cargo test --features fuzz
//! Increase cases: PROPTEST_CASES=1000 cargo test --features fuzz
//!
//! This suite implements:
//! - Snapshot-based "no mutation on error" checking for rejected actions
//! - Global invariants (accumulator consistency, balance conservation,
//!   tick version monotonicity, one pending slot per account)
//! - An action-based state machine fuzzer
//! - A deterministic seeded sequence with logging

#![cfg(feature = "fuzz")]

use std::collections::HashMap;

use proptest::prelude::*;
use undertow::*;

const ORACLE: FixtureOracle = FixtureOracle;
const REBALANCER: NoopRebalancer = NoopRebalancer;

const START_PRICE: u128 = 2000 * WAD;
const USERS: usize = 4;

fn user_address(index: usize) -> Address {
    let mut addr = [0u8; 32];
    addr[0] = index as u8 + 1;
    addr
}

fn proof(price: u128, timestamp: u64) -> Vec<u8> {
    FixtureOracle::proof(price, timestamp)
}

// ============================================================================
// SNAPSHOT FOR "NO MUTATION ON ERROR" CHECKING
// ============================================================================

/// Captures everything a rejected action must leave untouched.
#[derive(Clone, Debug, PartialEq)]
struct Snapshot {
    balance_long: u128,
    balance_vault: u128,
    funding_ema: i128,
    last_price: u128,
    last_update: u64,
    total_expo: u128,
    positions_count: usize,
    accumulator: huge_uint::HugeUint,
    deposits_held: u128,
    pending: Vec<(Address, u64)>,
    token_shares: u128,
}

impl Snapshot {
    fn take(engine: &Protocol, token: &LedgerToken) -> Self {
        let acc = engine.accounting();
        let pending = (0..USERS)
            .filter_map(|i| {
                let addr = user_address(i);
                engine.pending(&addr).map(|action| (addr, action.timestamp))
            })
            .collect();
        Snapshot {
            balance_long: acc.balance_long,
            balance_vault: acc.balance_vault,
            funding_ema: acc.funding_ema,
            last_price: acc.last_price,
            last_update: acc.last_update,
            total_expo: engine.ledger().total_expo(),
            positions_count: engine.ledger().positions_count(),
            accumulator: *engine.ledger().accumulator(),
            deposits_held: engine.deposits_held(),
            pending,
            token_shares: token.total_shares(),
        }
    }
}

fn assert_unchanged(engine: &Protocol, token: &LedgerToken, snapshot: &Snapshot, context: &str) {
    let current = Snapshot::take(engine, token);
    assert_eq!(&current, snapshot, "{context}: state mutated by rejected action");
}

// ============================================================================
// ACTION STATE MACHINE
// ============================================================================

#[derive(Clone, Debug)]
enum Action {
    Deposit { user: usize, amount: u128 },
    Withdraw { user: usize, shares: u128 },
    Open { user: usize, amount: u128, leverage: u128 },
    Close { user: usize, fraction: u8 },
    Validate { user: usize },
    Liquidate { budget: u16 },
    MovePrice { bps: i32 },
    AdvanceTime { seconds: u64 },
}

fn arb_action() -> impl Strategy<Value = Action> {
    prop_oneof![
        (0..USERS, 1u128..50).prop_map(|(user, amount)| Action::Deposit {
            user,
            amount: amount * WAD,
        }),
        (0..USERS, 1u128..100_000).prop_map(|(user, shares)| Action::Withdraw {
            user,
            shares: shares * WAD,
        }),
        (0..USERS, 1u128..10, 11u128..95).prop_map(|(user, amount, tenths)| Action::Open {
            user,
            amount: amount * WAD,
            leverage: tenths * WAD / 10,
        }),
        (0..USERS, 1u8..=100).prop_map(|(user, fraction)| Action::Close { user, fraction }),
        (0..USERS).prop_map(|user| Action::Validate { user }),
        (1u16..8).prop_map(|budget| Action::Liquidate { budget }),
        (-500i32..500).prop_map(|bps| Action::MovePrice { bps }),
        (1u64..3600).prop_map(|seconds| Action::AdvanceTime { seconds }),
    ]
}

struct Harness {
    engine: Protocol,
    token: LedgerToken,
    now: u64,
    price: u128,
    last_position: HashMap<usize, PositionId>,
    versions_seen: HashMap<i32, u64>,
}

impl Harness {
    fn new() -> Self {
        Harness {
            engine: Protocol::new(Params::default(), START_PRICE, 0).unwrap(),
            token: LedgerToken::default(),
            now: 0,
            price: START_PRICE,
            last_position: HashMap::new(),
            versions_seen: HashMap::new(),
        }
    }

    /// Bring the book to a fixed point at the current price so a later
    /// rejected action's prologue has nothing left to do.
    fn settle(&mut self) {
        for _ in 0..8 {
            let report = self
                .engine
                .liquidate(&ORACLE, &REBALANCER, &proof(self.price, self.now), 50)
                .unwrap();
            if report.liquidated_positions == 0 {
                break;
            }
        }
    }

    fn apply(&mut self, action: &Action) {
        match *action {
            Action::MovePrice { bps } => {
                let next = (self.price as i128 + self.price as i128 * bps as i128 / 10_000)
                    .max(WAD as i128);
                self.price = next as u128;
            }
            Action::AdvanceTime { seconds } => {
                self.now += seconds;
            }
            Action::Liquidate { budget } => {
                let acc = self.engine.accounting();
                let before = acc.balance_long + acc.balance_vault;
                self.engine
                    .liquidate(&ORACLE, &REBALANCER, &proof(self.price, self.now), budget)
                    .unwrap();
                let acc = self.engine.accounting();
                // Settlement and the walk only move value between the two
                // sides.
                assert_eq!(acc.balance_long + acc.balance_vault, before);
            }
            Action::Deposit { user, amount } => {
                self.settle();
                let snapshot = Snapshot::take(&self.engine, &self.token);
                let result = self.engine.initiate_deposit(
                    &ORACLE,
                    &REBALANCER,
                    &mut self.token,
                    user_address(user),
                    amount,
                    0,
                    &proof(self.price, self.now),
                    &[],
                );
                if result.is_err() {
                    assert_unchanged(&self.engine, &self.token, &snapshot, "deposit");
                }
            }
            Action::Withdraw { user, shares } => {
                self.settle();
                let snapshot = Snapshot::take(&self.engine, &self.token);
                let result = self.engine.initiate_withdrawal(
                    &ORACLE,
                    &REBALANCER,
                    &mut self.token,
                    user_address(user),
                    shares,
                    0,
                    &proof(self.price, self.now),
                    &[],
                );
                if result.is_err() {
                    assert_unchanged(&self.engine, &self.token, &snapshot, "withdraw");
                }
            }
            Action::Open {
                user,
                amount,
                leverage,
            } => {
                self.settle();
                let snapshot = Snapshot::take(&self.engine, &self.token);
                let result = self.engine.initiate_open_position(
                    &ORACLE,
                    &REBALANCER,
                    &mut self.token,
                    user_address(user),
                    amount,
                    leverage,
                    &proof(self.price, self.now),
                    &[],
                );
                match result {
                    Ok(id) => {
                        self.last_position.insert(user, id);
                    }
                    Err(_) => assert_unchanged(&self.engine, &self.token, &snapshot, "open"),
                }
            }
            Action::Close { user, fraction } => {
                let Some(&id) = self.last_position.get(&user) else {
                    return;
                };
                let amount = match self.engine.ledger().position(&id) {
                    Ok(position) => position.amount * fraction as u128 / 100,
                    Err(_) => return,
                };
                if amount == 0 {
                    return;
                }
                self.settle();
                let snapshot = Snapshot::take(&self.engine, &self.token);
                let result = self.engine.initiate_close_position(
                    &ORACLE,
                    &REBALANCER,
                    &mut self.token,
                    user_address(user),
                    id,
                    amount,
                    &proof(self.price, self.now),
                    &[],
                );
                if result.is_err() {
                    assert_unchanged(&self.engine, &self.token, &snapshot, "close");
                }
            }
            Action::Validate { user } => {
                let addr = user_address(user);
                let Some(kind) = self.engine.pending(&addr).map(|a| a.payload.kind()) else {
                    return;
                };
                let snapshot = Snapshot::take(&self.engine, &self.token);
                let price_proof = proof(self.price, self.now);
                let result = match kind {
                    ActionKind::Deposit => self.engine.validate_deposit(
                        &ORACLE,
                        &mut self.token,
                        addr,
                        addr,
                        &price_proof,
                    ),
                    ActionKind::Withdrawal => self.engine.validate_withdrawal(
                        &ORACLE,
                        &mut self.token,
                        addr,
                        addr,
                        &price_proof,
                    ),
                    ActionKind::OpenPosition => {
                        self.engine
                            .validate_open_position(&ORACLE, addr, addr, &price_proof)
                    }
                    ActionKind::ClosePosition => {
                        self.engine
                            .validate_close_position(&ORACLE, addr, addr, &price_proof)
                    }
                };
                if result.is_err() {
                    assert_unchanged(&self.engine, &self.token, &snapshot, "validate");
                }
            }
        }
        self.check_invariants();
    }

    fn check_invariants(&mut self) {
        let ledger = self.engine.ledger();

        // The incrementally maintained accumulator must match a fresh walk
        // over every open tick.
        assert_eq!(
            ledger.recompute_accumulator().unwrap(),
            *ledger.accumulator(),
            "accumulator out of sync",
        );

        // Tick versions never go backwards.
        for (&tick, &seen) in &self.versions_seen {
            assert!(
                ledger.tick_version(tick) >= seen,
                "tick {tick} version went backwards",
            );
        }
        for user in 0..USERS {
            if let Some(&id) = self.last_position.get(&user) {
                let version = ledger.tick_version(id.tick);
                self.versions_seen.insert(id.tick, version);
            }
        }
    }
}

// ============================================================================
// PROPERTY TESTS
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn fuzz_action_state_machine(actions in proptest::collection::vec(arb_action(), 1..40)) {
        let mut harness = Harness::new();
        for action in &actions {
            harness.apply(action);
        }
    }

    #[test]
    fn fuzz_open_close_returns_at_most_collateral_plus_gain(
        amount in 1u128..20,
        tenths in 11u128..95,
        bps in -300i32..300,
    ) {
        let amount = amount * WAD;
        let leverage = tenths * WAD / 10;
        let mut harness = Harness::new();

        harness.apply(&Action::Deposit { user: 0, amount: 500 * WAD });
        harness.apply(&Action::AdvanceTime { seconds: 60 });
        harness.apply(&Action::Validate { user: 0 });
        harness.apply(&Action::Open { user: 1, amount, leverage });
        harness.apply(&Action::AdvanceTime { seconds: 60 });
        harness.apply(&Action::Validate { user: 1 });
        harness.apply(&Action::MovePrice { bps });
        harness.apply(&Action::AdvanceTime { seconds: 60 });
        harness.apply(&Action::Close { user: 1, fraction: 100 });
        harness.apply(&Action::AdvanceTime { seconds: 60 });

        let addr = user_address(1);
        if harness.engine.pending(&addr).is_some() {
            let price_proof = proof(harness.price, harness.now);
            if let Ok(outcome) =
                harness
                    .engine
                    .validate_close_position(&ORACLE, addr, addr, &price_proof)
            {
                // A close can never pay more than the leveraged upside at
                // the observed move, nor more than the long side held.
                let ceiling = amount + amount * tenths * 3 * bps.unsigned_abs() as u128 / 100_000;
                prop_assert!(
                    outcome.amount_out <= ceiling,
                    "payout {} above ceiling {}",
                    outcome.amount_out,
                    ceiling,
                );
            }
        }
    }

    #[test]
    fn fuzz_liquidation_drains_only_underwater_ticks(bps in -3000i32..0) {
        let mut harness = Harness::new();
        harness.apply(&Action::Deposit { user: 0, amount: 100 * WAD });
        harness.apply(&Action::AdvanceTime { seconds: 60 });
        harness.apply(&Action::Validate { user: 0 });
        harness.apply(&Action::Open { user: 1, amount: 2 * WAD, leverage: 3 * WAD });
        harness.apply(&Action::AdvanceTime { seconds: 60 });
        harness.apply(&Action::Validate { user: 1 });

        harness.apply(&Action::MovePrice { bps });
        harness.apply(&Action::AdvanceTime { seconds: 60 });
        harness.apply(&Action::Liquidate { budget: 8 });

        // Any position still in the book values strictly positive.
        let ledger = harness.engine.ledger();
        if let Some(&id) = harness.last_position.get(&1) {
            if let Ok(position) = ledger.position(&id) {
                assert!(position.total_expo > 0);
            }
        }
    }
}

// ============================================================================
// DETERMINISTIC SEQUENCE
// ============================================================================

/// A fixed walk through every action kind, useful under RUST_LOG=debug.
#[test]
fn fuzz_deterministic_lifecycle() {
    let _ = env_logger::builder().is_test(true).try_init();

    let mut harness = Harness::new();
    let steps = [
        Action::Deposit { user: 0, amount: 50 * WAD },
        Action::AdvanceTime { seconds: 60 },
        Action::Validate { user: 0 },
        Action::Open { user: 1, amount: 2 * WAD, leverage: 3 * WAD },
        Action::AdvanceTime { seconds: 60 },
        Action::Validate { user: 1 },
        Action::Open { user: 2, amount: WAD, leverage: 5 * WAD },
        Action::AdvanceTime { seconds: 60 },
        Action::Validate { user: 2 },
        Action::MovePrice { bps: -400 },
        Action::AdvanceTime { seconds: 600 },
        Action::Liquidate { budget: 4 },
        Action::Close { user: 1, fraction: 50 },
        Action::AdvanceTime { seconds: 60 },
        Action::Validate { user: 1 },
        Action::Withdraw { user: 0, shares: 1000 * WAD },
        Action::AdvanceTime { seconds: 60 },
        Action::Validate { user: 0 },
        Action::AdvanceTime { seconds: 86_400 },
        Action::Liquidate { budget: 8 },
    ];
    for action in &steps {
        harness.apply(action);
    }

    // The run must end with a coherent book.
    let ledger = harness.engine.ledger();
    assert_eq!(
        ledger.recompute_accumulator().unwrap(),
        *ledger.accumulator()
    );
}
