//! Protocol error taxonomy.
//!
//! Four families, all surfaced synchronously and none retried by the engine:
//! input validation, concurrency invalidation (stale tick versions, occupied
//! pending slots), oracle failures propagated from the collaborator, and
//! invariant protection (imbalance limits). Errors never leave partial state
//! behind; every operation validates before it mutates.

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    // -- input validation --
    #[error("leverage {0} outside the configured [min, max] range")]
    LeverageOutOfRange(u128),

    #[error("position amount {amount} below the minimum size {min}")]
    PositionTooSmall { amount: u128, min: u128 },

    #[error("amount to close {requested} exceeds the position amount {held}")]
    AmountTooLarge { requested: u128, held: u128 },

    #[error("zero amount")]
    ZeroAmount,

    #[error("tick {0} outside the supported range")]
    InvalidTick(i32),

    #[error("price {0} outside the representable tick range")]
    InvalidPrice(u128),

    #[error("requested liquidation price is above the entry price tick")]
    InvalidLiquidationPrice,

    #[error("output {actual} below the caller minimum {min}")]
    SlippageExceeded { actual: u128, min: u128 },

    // -- concurrency invalidation --
    #[error("position {tick}@v{version} was liquidated (tick is at v{current})")]
    StalePosition {
        tick: i32,
        version: u64,
        current: u64,
    },

    #[error("position not found")]
    PositionNotFound,

    #[error("position belongs to another user")]
    NotPositionOwner,

    #[error("position already has a close in flight")]
    CloseAlreadyPending,

    #[error("account already has a pending action")]
    AlreadyPending,

    #[error("no pending action for this account")]
    NoPendingAction,

    #[error("pending action kind does not match the validate call")]
    PendingKindMismatch,

    // -- oracle --
    #[error("oracle rejected the price proof: {0}")]
    Oracle(String),

    #[error("price timestamp {price_ts} is outside the action's window starting at {action_ts}")]
    PriceTimestampMismatch { price_ts: u64, action_ts: u64 },

    #[error("validation attempted {elapsed}s after initiation, before the {delay}s delay")]
    ValidationTooEarly { elapsed: u64, delay: u64 },

    // -- invariant protection --
    #[error("operation would push the long/vault imbalance past the configured limit")]
    ImbalanceLimitReached,

    #[error("arithmetic overflow")]
    Overflow,
}

pub type Result<T> = core::result::Result<T, ProtocolError>;
