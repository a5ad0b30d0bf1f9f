//! Drives a `Protocol` instance through a scenario, printing each step.

use std::collections::HashMap;

use anyhow::Context;
use colored::Colorize;

use undertow::{
    ActionKind, Address, FixtureOracle, LedgerToken, NoopRebalancer, PositionId, Protocol, WAD,
};

use crate::config::{wad, Scenario, Step};

pub struct Runner {
    protocol: Protocol,
    token: LedgerToken,
    oracle: FixtureOracle,
    rebalancer: NoopRebalancer,
    /// Last opened position per scenario user, for close steps.
    positions: HashMap<String, PositionId>,
}

/// Scenario user names map to fixed addresses: the name's bytes, zero
/// padded. Names longer than 32 bytes are truncated.
fn address_of(name: &str) -> Address {
    let mut addr = [0u8; 32];
    let bytes = name.as_bytes();
    let n = bytes.len().min(32);
    addr[..n].copy_from_slice(&bytes[..n]);
    addr
}

fn natural(value: u128) -> f64 {
    value as f64 / WAD as f64
}

impl Runner {
    pub fn new(scenario: &Scenario) -> anyhow::Result<Self> {
        let protocol = Protocol::new(
            undertow::Params::default(),
            wad(scenario.initial_price),
            scenario.start,
        )
        .context("creating engine")?;
        Ok(Self {
            protocol,
            token: LedgerToken::default(),
            oracle: FixtureOracle,
            rebalancer: NoopRebalancer,
            positions: HashMap::new(),
        })
    }

    pub fn run(&mut self, scenario: &Scenario) -> anyhow::Result<()> {
        for step in &scenario.steps {
            self.step(step)?;
        }
        Ok(())
    }

    fn step(&mut self, step: &Step) -> anyhow::Result<()> {
        match step {
            Step::Deposit {
                user,
                amount,
                price,
                at,
            } => {
                let proof = FixtureOracle::proof(wad(*price), *at);
                self.protocol
                    .initiate_deposit(
                        &self.oracle,
                        &self.rebalancer,
                        &mut self.token,
                        address_of(user),
                        wad(*amount),
                        0,
                        &proof,
                        &[],
                    )
                    .with_context(|| format!("deposit by {user}"))?;
                println!(
                    "{} {} deposits {} (pending)",
                    format!("[{at}]").dimmed(),
                    user.bright_cyan(),
                    amount
                );
            }
            Step::Withdraw {
                user,
                shares,
                price,
                at,
            } => {
                let proof = FixtureOracle::proof(wad(*price), *at);
                self.protocol
                    .initiate_withdrawal(
                        &self.oracle,
                        &self.rebalancer,
                        &mut self.token,
                        address_of(user),
                        wad(*shares),
                        0,
                        &proof,
                        &[],
                    )
                    .with_context(|| format!("withdrawal by {user}"))?;
                println!(
                    "{} {} withdraws {} shares (pending)",
                    format!("[{at}]").dimmed(),
                    user.bright_cyan(),
                    shares
                );
            }
            Step::Open {
                user,
                amount,
                leverage,
                price,
                at,
            } => {
                let proof = FixtureOracle::proof(wad(*price), *at);
                let id = self
                    .protocol
                    .initiate_open_position(
                        &self.oracle,
                        &self.rebalancer,
                        &mut self.token,
                        address_of(user),
                        wad(*amount),
                        wad(*leverage),
                        &proof,
                        &[],
                    )
                    .with_context(|| format!("open by {user}"))?;
                self.positions.insert(user.clone(), id);
                println!(
                    "{} {} opens {} @ {}x, tick {} (pending)",
                    format!("[{at}]").dimmed(),
                    user.bright_cyan(),
                    amount,
                    leverage,
                    id.tick
                );
            }
            Step::Close {
                user,
                amount,
                price,
                at,
            } => {
                let id = *self
                    .positions
                    .get(user)
                    .with_context(|| format!("{user} has no open position"))?;
                let proof = FixtureOracle::proof(wad(*price), *at);
                self.protocol
                    .initiate_close_position(
                        &self.oracle,
                        &self.rebalancer,
                        &mut self.token,
                        address_of(user),
                        id,
                        wad(*amount),
                        &proof,
                        &[],
                    )
                    .with_context(|| format!("close by {user}"))?;
                println!(
                    "{} {} closes {} of tick {} (pending)",
                    format!("[{at}]").dimmed(),
                    user.bright_cyan(),
                    amount,
                    id.tick
                );
            }
            Step::Validate { user, price, at } => {
                let addr = address_of(user);
                let proof = FixtureOracle::proof(wad(*price), *at);
                let kind = self
                    .protocol
                    .pending(&addr)
                    .map(|action| action.payload.kind())
                    .with_context(|| format!("{user} has nothing pending"))?;
                let outcome = match kind {
                    ActionKind::Deposit => self.protocol.validate_deposit(
                        &self.oracle,
                        &mut self.token,
                        addr,
                        addr,
                        &proof,
                    ),
                    ActionKind::Withdrawal => self.protocol.validate_withdrawal(
                        &self.oracle,
                        &mut self.token,
                        addr,
                        addr,
                        &proof,
                    ),
                    ActionKind::OpenPosition => {
                        self.protocol
                            .validate_open_position(&self.oracle, addr, addr, &proof)
                    }
                    ActionKind::ClosePosition => {
                        self.protocol
                            .validate_close_position(&self.oracle, addr, addr, &proof)
                    }
                }
                .with_context(|| format!("validate by {user}"))?;
                let note = if outcome.position_was_liquidated {
                    " (position was liquidated)".bright_red().to_string()
                } else {
                    String::new()
                };
                println!(
                    "{} {} validates {:?}, out {:.6}{}",
                    format!("[{at}]").dimmed(),
                    user.bright_cyan(),
                    outcome.kind,
                    natural(outcome.amount_out),
                    note
                );
            }
            Step::Liquidate {
                price,
                at,
                iterations,
            } => {
                let proof = FixtureOracle::proof(wad(*price), *at);
                let report = self
                    .protocol
                    .liquidate(&self.oracle, &self.rebalancer, &proof, *iterations)
                    .context("liquidation pass")?;
                let line = format!(
                    "liquidated {} positions across ticks {:?}, bad debt {:.6}",
                    report.liquidated_positions,
                    report.liquidated_ticks,
                    natural(report.bad_debt)
                );
                let line = if report.liquidated_positions > 0 {
                    line.bright_yellow().to_string()
                } else {
                    line.dimmed().to_string()
                };
                println!("{} price {} -> {}", format!("[{at}]").dimmed(), price, line);
            }
            Step::Status { at } => self.print_status(*at),
        }
        Ok(())
    }

    fn print_status(&self, at: u64) {
        let acc = self.protocol.accounting();
        let ledger = self.protocol.ledger();
        println!("{} {}", format!("[{at}]").dimmed(), "status".bright_green().bold());
        println!("  balance long:  {:.6}", natural(acc.balance_long));
        println!("  balance vault: {:.6}", natural(acc.balance_vault));
        println!("  total expo:    {:.6}", natural(ledger.total_expo()));
        println!("  positions:     {}", ledger.positions_count());
        println!("  funding ema:   {:.9}/day", acc.funding_ema as f64 / WAD as f64);
        println!("  token shares:  {:.6}", natural(self.token.total_shares()));
    }
}
