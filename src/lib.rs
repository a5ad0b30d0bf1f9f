//! Undertow: a position ledger and liquidation-accounting engine for a
//! leveraged synthetic-asset protocol.
//!
//! Long positions live in geometric price ticks (base 1.0001). A global
//! liquidation multiplier, maintained as a 512-bit accumulator over all
//! open exposure, reprices every tick as funding shifts value between the
//! long side and the vault. User flows are two-phase: an initiate stores a
//! pending action at an oracle price, a later validate settles it at a
//! fresher one, and overdue actions can be validated by anyone for the
//! security deposit.
//!
//! The engine is a pure state model: it tracks balances and owed amounts
//! but holds no funds and performs no transfers.

pub mod bitmap;
pub mod error;
pub mod funding;
pub mod interfaces;
pub mod ledger;
pub mod liquidation;
pub mod params;
pub mod pending;
pub mod protocol;
pub mod tick_math;

pub use error::{ProtocolError, Result};
pub use funding::{Accounting, FundingReport};
pub use interfaces::{
    FixtureOracle, LedgerToken, NoopRebalancer, Oracle, PriceSample, ProtocolAction, Rebalancer,
    RebalancerOrder, RebasingToken,
};
pub use ledger::{Address, Ledger, Position, PositionId};
pub use liquidation::LiquidationReport;
pub use params::Params;
pub use pending::{ActionKind, PendingAction, PendingPayload, PendingStore};
pub use protocol::{Protocol, ValidateOutcome};
pub use tick_math::{MAX_TICK, MIN_TICK, WAD};
