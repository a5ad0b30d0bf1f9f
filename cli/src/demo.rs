//! Canned walkthrough: fund the vault, open a 3x long, crash the price,
//! watch the liquidation pass claim the tick.

use colored::Colorize;

use crate::config::{Scenario, Step};
use crate::runner::Runner;

pub fn run() -> anyhow::Result<()> {
    println!("{}", "Undertow demo: deposit, open 3x, crash, liquidate".bright_green().bold());

    let scenario = Scenario {
        initial_price: 2000.0,
        start: 0,
        steps: vec![
            Step::Deposit {
                user: "alice".into(),
                amount: 10.0,
                price: 2000.0,
                at: 10,
            },
            Step::Validate {
                user: "alice".into(),
                price: 2000.0,
                at: 60,
            },
            Step::Open {
                user: "bob".into(),
                amount: 2.0,
                leverage: 3.0,
                price: 2000.0,
                at: 120,
            },
            Step::Validate {
                user: "bob".into(),
                price: 2001.0,
                at: 180,
            },
            Step::Status { at: 180 },
            Step::Liquidate {
                price: 1350.0,
                at: 600,
                iterations: 10,
            },
            Step::Status { at: 600 },
        ],
    };

    let mut runner = Runner::new(&scenario)?;
    runner.run(&scenario)
}
