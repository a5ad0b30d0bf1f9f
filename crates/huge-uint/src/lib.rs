//! Fixed-width 512-bit unsigned integer arithmetic.
//!
//! The liquidation-multiplier accumulator sums products of WAD prices and WAD
//! exposures, which do not fit in 256 bits. This crate provides the minimal
//! set of operations the engine needs: carry/borrow add and sub, a widening
//! u128 multiply, scaling by a u128, and long division. All operations are
//! total (checked) and verified against `num-bigint` in the property tests.

#![forbid(unsafe_code)]

/// Number of 64-bit limbs.
const LIMBS: usize = 8;

/// 512-bit unsigned integer, little-endian `u64` limbs.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
pub struct HugeUint {
    limbs: [u64; LIMBS],
}

impl HugeUint {
    pub const ZERO: Self = Self { limbs: [0; LIMBS] };

    pub const MAX: Self = Self {
        limbs: [u64::MAX; LIMBS],
    };

    pub fn from_u128(value: u128) -> Self {
        let mut limbs = [0u64; LIMBS];
        limbs[0] = value as u64;
        limbs[1] = (value >> 64) as u64;
        Self { limbs }
    }

    pub fn is_zero(&self) -> bool {
        self.limbs.iter().all(|&l| l == 0)
    }

    /// Raw limbs, little-endian.
    pub fn limbs(&self) -> &[u64; LIMBS] {
        &self.limbs
    }

    pub fn from_limbs(limbs: [u64; LIMBS]) -> Self {
        Self { limbs }
    }

    /// Index of the highest set bit, or `None` for zero.
    pub fn highest_bit(&self) -> Option<u32> {
        for (i, &limb) in self.limbs.iter().enumerate().rev() {
            if limb != 0 {
                return Some(i as u32 * 64 + 63 - limb.leading_zeros());
            }
        }
        None
    }

    /// Add with carry propagation; `None` on overflow past 512 bits.
    pub fn checked_add(&self, rhs: &Self) -> Option<Self> {
        let mut out = [0u64; LIMBS];
        let mut carry = false;
        for i in 0..LIMBS {
            let (sum, c1) = self.limbs[i].overflowing_add(rhs.limbs[i]);
            let (sum, c2) = sum.overflowing_add(carry as u64);
            out[i] = sum;
            carry = c1 || c2;
        }
        if carry {
            None
        } else {
            Some(Self { limbs: out })
        }
    }

    /// Subtract with borrow propagation; `None` when `rhs > self`.
    pub fn checked_sub(&self, rhs: &Self) -> Option<Self> {
        let mut out = [0u64; LIMBS];
        let mut borrow = false;
        for i in 0..LIMBS {
            let (diff, b1) = self.limbs[i].overflowing_sub(rhs.limbs[i]);
            let (diff, b2) = diff.overflowing_sub(borrow as u64);
            out[i] = diff;
            borrow = b1 || b2;
        }
        if borrow {
            None
        } else {
            Some(Self { limbs: out })
        }
    }

    /// Full 256-bit product of two `u128`s, held in the 512-bit container.
    /// Never overflows.
    pub fn mul_u128(a: u128, b: u128) -> Self {
        Self::from_u128(a)
            .checked_mul_u128(b)
            .unwrap_or(Self::ZERO) // unreachable: 128 + 128 bits < 512
    }

    /// Scale a 512-bit value by a `u128`; `None` if the result exceeds
    /// 512 bits.
    pub fn checked_mul_u128(&self, m: u128) -> Option<Self> {
        let lo = m as u64;
        let hi = (m >> 64) as u64;

        let (part_lo, ovf_lo) = self.mul_limb(lo);
        if ovf_lo != 0 {
            return None;
        }
        if hi == 0 {
            return Some(part_lo);
        }
        let (part_hi, ovf_hi) = self.mul_limb(hi);
        if ovf_hi != 0 {
            return None;
        }
        let shifted = part_hi.checked_shl64()?;
        part_lo.checked_add(&shifted)
    }

    /// Multiply by a single limb; returns (truncated result, overflow limb).
    fn mul_limb(&self, m: u64) -> (Self, u64) {
        let mut out = [0u64; LIMBS];
        let mut carry: u64 = 0;
        for i in 0..LIMBS {
            let wide = self.limbs[i] as u128 * m as u128 + carry as u128;
            out[i] = wide as u64;
            carry = (wide >> 64) as u64;
        }
        (Self { limbs: out }, carry)
    }

    /// Shift left by one full limb (64 bits); `None` on overflow.
    fn checked_shl64(&self) -> Option<Self> {
        if self.limbs[LIMBS - 1] != 0 {
            return None;
        }
        let mut out = [0u64; LIMBS];
        out[1..].copy_from_slice(&self.limbs[..LIMBS - 1]);
        Some(Self { limbs: out })
    }

    /// Floor division by another 512-bit value; `None` on division by zero.
    ///
    /// Binary long division: correctness over speed, this is not on a hot
    /// path and the property tests pin it against `num-bigint`.
    pub fn checked_div(&self, rhs: &Self) -> Option<Self> {
        if rhs.is_zero() {
            return None;
        }
        if self < rhs {
            return Some(Self::ZERO);
        }
        let top = match self.highest_bit() {
            Some(b) => b,
            None => return Some(Self::ZERO),
        };
        let mut quotient = Self::ZERO;
        let mut remainder = Self::ZERO;
        for bit in (0..=top).rev() {
            remainder = remainder.shl1();
            if self.bit(bit) {
                remainder.limbs[0] |= 1;
            }
            if &remainder >= rhs {
                // borrow cannot occur: remainder >= rhs
                remainder = remainder.checked_sub(rhs)?;
                quotient.set_bit(bit);
            }
        }
        Some(quotient)
    }

    /// Remainder of floor division; `None` on division by zero.
    pub fn checked_rem(&self, rhs: &Self) -> Option<Self> {
        let q = self.checked_div(rhs)?;
        let prod = q.checked_mul(rhs)?;
        self.checked_sub(&prod)
    }

    fn shl1(&self) -> Self {
        let mut out = [0u64; LIMBS];
        let mut carry = 0u64;
        for i in 0..LIMBS {
            out[i] = (self.limbs[i] << 1) | carry;
            carry = self.limbs[i] >> 63;
        }
        Self { limbs: out }
    }

    fn bit(&self, index: u32) -> bool {
        let limb = (index / 64) as usize;
        (self.limbs[limb] >> (index % 64)) & 1 == 1
    }

    fn set_bit(&mut self, index: u32) {
        let limb = (index / 64) as usize;
        self.limbs[limb] |= 1 << (index % 64);
    }

    /// Narrow to `u128`; `None` if any upper limb is set.
    pub fn try_to_u128(&self) -> Option<u128> {
        if self.limbs[2..].iter().any(|&l| l != 0) {
            return None;
        }
        Some(self.limbs[0] as u128 | (self.limbs[1] as u128) << 64)
    }

    /// Full 512x512 product, `None` on overflow past 512 bits.
    pub fn checked_mul(&self, rhs: &Self) -> Option<Self> {
        let mut acc = Self::ZERO;
        for (i, &limb) in rhs.limbs.iter().enumerate() {
            if limb == 0 {
                continue;
            }
            let (mut part, ovf) = self.mul_limb(limb);
            if ovf != 0 {
                return None;
            }
            for _ in 0..i {
                part = part.checked_shl64()?;
            }
            acc = acc.checked_add(&part)?;
        }
        Some(acc)
    }

    /// Logical shift right by 128 bits (two limbs), filling with zeros.
    /// Used by Q128 fixed-point callers to renormalize after a multiply.
    pub fn shr128(&self) -> Self {
        let mut out = [0u64; LIMBS];
        out[..LIMBS - 2].copy_from_slice(&self.limbs[2..]);
        Self { limbs: out }
    }
}

impl PartialOrd for HugeUint {
    fn partial_cmp(&self, other: &Self) -> Option<core::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for HugeUint {
    fn cmp(&self, other: &Self) -> core::cmp::Ordering {
        for i in (0..LIMBS).rev() {
            match self.limbs[i].cmp(&other.limbs[i]) {
                core::cmp::Ordering::Equal => continue,
                ord => return ord,
            }
        }
        core::cmp::Ordering::Equal
    }
}

impl From<u128> for HugeUint {
    fn from(value: u128) -> Self {
        Self::from_u128(value)
    }
}
