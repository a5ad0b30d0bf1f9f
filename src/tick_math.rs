//! Tick price math: conversion between a signed geometric price-bucket index
//! (base 1.0001) and a WAD fixed-point price.
//!
//! `price_at_tick` is exact integer math: binary exponentiation over the Q128
//! representation of 1.0001, with negative ticks handled through the Q256
//! reciprocal. `tick_at_price` is the floor inverse, computed by binary
//! search over `price_at_tick` so the pair is consistent by construction.

use huge_uint::HugeUint;

use crate::error::{ProtocolError, Result};

/// 1e18 fixed point, the price and amount scale used everywhere.
pub const WAD: u128 = 1_000_000_000_000_000_000;

pub const MIN_TICK: i32 = -100_000;
pub const MAX_TICK: i32 = 100_000;

/// 1.0001 in Q128: floor(1.0001 * 2^128). The value is 129 bits wide, so it
/// lives in limbs rather than a `u128` literal.
fn ratio_q128() -> HugeUint {
    HugeUint::from_limbs([0x295E9E1B089A0275, 0x0006_8DB8_BAC7_10CB, 1, 0, 0, 0, 0, 0])
}

/// 1.0 in Q128, i.e. 2^128 (limb 2 of a little-endian u64 array).
fn one_q128() -> HugeUint {
    HugeUint::from_limbs([0, 0, 1, 0, 0, 0, 0, 0])
}

/// 2^256; dividing it by a Q128 value yields the Q128 reciprocal.
fn one_q256() -> HugeUint {
    HugeUint::from_limbs([0, 0, 0, 0, 1, 0, 0, 0])
}

/// 1.0001^exp in Q128, for exp in [0, MAX_TICK].
fn pow_q128(mut exp: u32) -> Result<HugeUint> {
    let mut result = one_q128();
    let mut base = ratio_q128();
    while exp > 0 {
        if exp & 1 == 1 {
            result = result
                .checked_mul(&base)
                .ok_or(ProtocolError::Overflow)?
                .shr128();
        }
        base = base
            .checked_mul(&base)
            .ok_or(ProtocolError::Overflow)?
            .shr128();
        exp >>= 1;
    }
    Ok(result)
}

/// WAD price of a tick: 1.0001^tick * 1e18.
pub fn price_at_tick(tick: i32) -> Result<u128> {
    if !(MIN_TICK..=MAX_TICK).contains(&tick) {
        return Err(ProtocolError::InvalidTick(tick));
    }
    let ratio = pow_q128(tick.unsigned_abs())?;
    let ratio = if tick < 0 {
        one_q256()
            .checked_div(&ratio)
            .ok_or(ProtocolError::Overflow)?
    } else {
        ratio
    };
    ratio
        .checked_mul_u128(WAD)
        .ok_or(ProtocolError::Overflow)?
        .shr128()
        .try_to_u128()
        .ok_or(ProtocolError::Overflow)
}

/// Greatest tick whose price does not exceed `price` (floor semantics).
pub fn tick_at_price(price: u128) -> Result<i32> {
    if price < price_at_tick(MIN_TICK)? || price > price_at_tick(MAX_TICK)? {
        return Err(ProtocolError::InvalidPrice(price));
    }
    let mut lo = MIN_TICK;
    let mut hi = MAX_TICK;
    // Invariant: price_at_tick(lo) <= price < price_at_tick(hi + 1).
    while lo < hi {
        let mid = lo + (hi - lo + 1) / 2;
        if price_at_tick(mid)? <= price {
            lo = mid;
        } else {
            hi = mid - 1;
        }
    }
    Ok(lo)
}

/// Round toward negative infinity to a multiple of `spacing`.
#[inline]
pub fn round_down_to_spacing(tick: i32, spacing: i32) -> i32 {
    tick - tick.rem_euclid(spacing)
}

/// Round toward positive infinity to a multiple of `spacing`.
#[inline]
pub fn round_up_to_spacing(tick: i32, spacing: i32) -> i32 {
    let rem = tick.rem_euclid(spacing);
    if rem == 0 {
        tick
    } else {
        tick - rem + spacing
    }
}
