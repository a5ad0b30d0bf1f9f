//! Sparse occupancy bitmap over spacing-aligned ticks.
//!
//! Ticks are biased into an unsigned bucket index `(tick - MIN_TICK) /
//! spacing` and stored one bit per bucket in a word array, giving O(1)
//! membership and word-skipping directional scans for the liquidation walk.

use crate::tick_math::MIN_TICK;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TickBitmap {
    words: Vec<u64>,
    spacing: i32,
    buckets: usize,
}

impl TickBitmap {
    pub fn new(spacing: i32, buckets: usize) -> Self {
        Self {
            words: vec![0; buckets / 64 + 1],
            spacing,
            buckets,
        }
    }

    /// Bucket of `tick`, flooring unaligned ticks (scans may hand us a raw
    /// boundary tick; set/clear only ever see aligned ones).
    #[inline]
    fn bucket(&self, tick: i32) -> usize {
        (tick as i64 - MIN_TICK as i64).div_euclid(self.spacing as i64) as usize
    }

    #[inline]
    fn tick_of(&self, bucket: usize) -> i32 {
        MIN_TICK + bucket as i32 * self.spacing
    }

    pub fn set(&mut self, tick: i32) {
        debug_assert_eq!(tick.rem_euclid(self.spacing), 0, "unaligned tick {tick}");
        let b = self.bucket(tick);
        self.words[b >> 6] |= 1 << (b & 63);
    }

    pub fn clear(&mut self, tick: i32) {
        debug_assert_eq!(tick.rem_euclid(self.spacing), 0, "unaligned tick {tick}");
        let b = self.bucket(tick);
        self.words[b >> 6] &= !(1 << (b & 63));
    }

    pub fn is_set(&self, tick: i32) -> bool {
        let b = self.bucket(tick);
        (self.words[b >> 6] >> (b & 63)) & 1 == 1
    }

    /// Highest populated tick, if any.
    pub fn highest_set(&self) -> Option<i32> {
        for (w, &word) in self.words.iter().enumerate().rev() {
            if word != 0 {
                let bit = 63 - word.leading_zeros() as usize;
                return Some(self.tick_of((w << 6) | bit));
            }
        }
        None
    }

    /// Nearest populated tick at or below `tick`.
    pub fn next_set_at_or_below(&self, tick: i32) -> Option<i32> {
        if tick < MIN_TICK {
            return None;
        }
        let start = self.bucket(tick.min(self.tick_of(self.buckets - 1)));
        let mut w = start >> 6;
        // Mask away bits above the starting bucket in the first word.
        let mut word = self.words[w] & (u64::MAX >> (63 - (start & 63)));
        loop {
            if word != 0 {
                let bit = 63 - word.leading_zeros() as usize;
                return Some(self.tick_of((w << 6) | bit));
            }
            if w == 0 {
                return None;
            }
            w -= 1;
            word = self.words[w];
        }
    }

    /// Nearest populated tick at or above `tick`.
    pub fn next_set_at_or_above(&self, tick: i32) -> Option<i32> {
        let start = self.bucket(tick.max(MIN_TICK));
        if start >= self.buckets {
            return None;
        }
        let mut w = start >> 6;
        let mut word = self.words[w] & (u64::MAX << (start & 63));
        loop {
            if word != 0 {
                let bit = word.trailing_zeros() as usize;
                let bucket = (w << 6) | bit;
                if bucket >= self.buckets {
                    return None;
                }
                return Some(self.tick_of(bucket));
            }
            w += 1;
            if w >= self.words.len() {
                return None;
            }
            word = self.words[w];
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tick_math::MAX_TICK;

    fn bitmap() -> TickBitmap {
        let spacing = 100;
        let buckets = ((MAX_TICK - MIN_TICK) / spacing) as usize + 1;
        TickBitmap::new(spacing, buckets)
    }

    #[test]
    fn set_clear_membership() {
        let mut bm = bitmap();
        assert!(!bm.is_set(500));
        bm.set(500);
        assert!(bm.is_set(500));
        bm.clear(500);
        assert!(!bm.is_set(500));
    }

    #[test]
    fn directional_scans() {
        let mut bm = bitmap();
        bm.set(-20_000);
        bm.set(0);
        bm.set(75_900);

        assert_eq!(bm.highest_set(), Some(75_900));
        assert_eq!(bm.next_set_at_or_below(75_900), Some(75_900));
        assert_eq!(bm.next_set_at_or_below(75_800), Some(0));
        assert_eq!(bm.next_set_at_or_below(-100), Some(-20_000));
        assert_eq!(bm.next_set_at_or_below(-20_100), None);

        assert_eq!(bm.next_set_at_or_above(-20_000), Some(-20_000));
        assert_eq!(bm.next_set_at_or_above(-19_900), Some(0));
        assert_eq!(bm.next_set_at_or_above(76_000), None);
    }

    #[test]
    fn boundary_ticks() {
        let mut bm = bitmap();
        bm.set(MIN_TICK);
        bm.set(MAX_TICK);
        assert_eq!(bm.highest_set(), Some(MAX_TICK));
        assert_eq!(bm.next_set_at_or_below(MAX_TICK - 100), Some(MIN_TICK));
        assert_eq!(bm.next_set_at_or_above(MIN_TICK + 100), Some(MAX_TICK));
    }

    #[test]
    fn empty_scans_are_none() {
        let bm = bitmap();
        assert_eq!(bm.highest_set(), None);
        assert_eq!(bm.next_set_at_or_below(0), None);
        assert_eq!(bm.next_set_at_or_above(0), None);
    }

    #[test]
    fn out_of_range_scans_are_none() {
        let mut bm = bitmap();
        bm.set(MIN_TICK);
        bm.set(MAX_TICK);
        assert_eq!(bm.next_set_at_or_below(MIN_TICK - 1), None);
        assert_eq!(bm.next_set_at_or_below(i32::MIN), None);
        assert_eq!(bm.next_set_at_or_above(MAX_TICK + 1), None);
        assert_eq!(bm.next_set_at_or_above(i32::MAX), None);
    }
}
