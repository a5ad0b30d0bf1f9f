//! Scenario files.
//!
//! A scenario is a TOML document describing a starting price and a list of
//! timestamped steps to drive the engine through. Prices and amounts are
//! written in natural units (2000.0 = 2000 quote per asset) and converted
//! to WAD fixed point on load.

use std::fs;
use std::path::Path;

use anyhow::Context;
use serde::Deserialize;

use undertow::WAD;

#[derive(Debug, Deserialize)]
pub struct Scenario {
    /// Oracle price at engine creation, natural units.
    pub initial_price: f64,

    /// Timestamp of engine creation, seconds.
    #[serde(default)]
    pub start: u64,

    #[serde(default)]
    pub steps: Vec<Step>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "action", rename_all = "kebab-case")]
pub enum Step {
    /// Initiate a vault deposit.
    Deposit {
        user: String,
        amount: f64,
        price: f64,
        at: u64,
    },

    /// Initiate a vault withdrawal.
    Withdraw {
        user: String,
        shares: f64,
        price: f64,
        at: u64,
    },

    /// Initiate a leveraged long.
    Open {
        user: String,
        amount: f64,
        leverage: f64,
        price: f64,
        at: u64,
    },

    /// Initiate closing the user's last opened position (or part of it).
    Close {
        user: String,
        amount: f64,
        price: f64,
        at: u64,
    },

    /// Validate whatever action the user has pending.
    Validate { user: String, price: f64, at: u64 },

    /// Run a liquidation pass at the given price.
    Liquidate {
        price: f64,
        at: u64,
        #[serde(default = "default_iterations")]
        iterations: u16,
    },

    /// Print engine balances and book statistics.
    Status { at: u64 },
}

fn default_iterations() -> u16 {
    10
}

impl Scenario {
    pub fn from_path(path: &Path) -> anyhow::Result<Self> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("reading scenario {}", path.display()))?;
        let scenario: Scenario =
            toml::from_str(&text).with_context(|| format!("parsing scenario {}", path.display()))?;
        if scenario.initial_price <= 0.0 {
            anyhow::bail!("initial_price must be positive");
        }
        Ok(scenario)
    }
}

/// Natural units to WAD fixed point. f64 mantissa precision is plenty for
/// scenario inputs.
pub fn wad(value: f64) -> u128 {
    (value * WAD as f64) as u128
}
