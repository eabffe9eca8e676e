//! Dense bit-per-unit map recording which units of a module require instrumentation.
//!
//! The [`InstrumentationMap`] is the storage behind every selection descriptor and every
//! aggregated per-module bitmap. It packs one flag per addressable unit into machine words so
//! that lookups at translation time are a shift and a mask, and whole-range updates during
//! compilation fill entire words at once.

const WORD_BITS: usize = u64::BITS as usize;

/// Tracks, for every unit of a module image, whether instrumentation is required there.
///
/// The map has a fixed length chosen at construction; it never grows. Lookups past the end
/// return `false`, which matches the "do not instrument" default used everywhere else.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct InstrumentationMap {
    words: Vec<u64>,
    len: usize,
}

impl InstrumentationMap {
    /// Create a map of `len` units, none of which require instrumentation.
    ///
    /// ## Arguments
    /// * 'len' - The amount of units to track
    #[must_use]
    pub fn new(len: usize) -> InstrumentationMap {
        InstrumentationMap {
            words: vec![0_u64; len.div_ceil(WORD_BITS)],
            len,
        }
    }

    /// Create a map of `len` units, all of which require instrumentation.
    #[must_use]
    pub fn full(len: usize) -> InstrumentationMap {
        let mut map = InstrumentationMap::new(len);
        map.set_range(0, len, true);
        map
    }

    /// Returns the amount of units this map tracks
    #[must_use]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Check if the map tracks no units at all
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Check if a unit requires instrumentation
    ///
    /// # Arguments
    /// * 'unit' - The offset that should be looked up
    #[must_use]
    pub fn get(&self, unit: usize) -> bool {
        if unit >= self.len {
            return false;
        }

        match self.words.get(unit / WORD_BITS) {
            Some(word) => (word >> (unit % WORD_BITS)) & 1 != 0,
            None => false,
        }
    }

    /// Set or clear `count` consecutive units, starting at `start`.
    ///
    /// The range is clipped to the length of the map; callers validate ranges before they
    /// reach this point.
    ///
    /// # Arguments
    /// * 'start' - The first unit which is going to be set
    /// * 'count' - The count of units that should receive the new state
    /// * 'state' - The state that should be applied to the units
    pub fn set_range(&mut self, start: usize, count: usize, state: bool) {
        let end = start.saturating_add(count).min(self.len);
        let mut unit = start;

        while unit < end {
            let Some(word) = self.words.get_mut(unit / WORD_BITS) else {
                return;
            };

            let bit = unit % WORD_BITS;
            let span = (WORD_BITS - bit).min(end - unit);
            let mask = if span == WORD_BITS {
                u64::MAX
            } else {
                ((1_u64 << span) - 1) << bit
            };

            if state {
                *word |= mask;
            } else {
                *word &= !mask;
            }

            unit += span;
        }
    }

    /// Set a single unit
    pub fn set(&mut self, unit: usize, state: bool) {
        self.set_range(unit, 1, state);
    }

    /// Merge another map into this one, so that every unit set in either is set afterwards.
    ///
    /// Units of `other` beyond this map's length are ignored.
    pub fn union_with(&mut self, other: &InstrumentationMap) {
        for (dst, src) in self.words.iter_mut().zip(other.words.iter()) {
            *dst |= *src;
        }
        self.clear_tail();
    }

    /// Number of units that require instrumentation
    #[must_use]
    pub fn count(&self) -> usize {
        self.words.iter().map(|w| w.count_ones() as usize).sum()
    }

    /// Returns `true` if at least one unit requires instrumentation
    #[must_use]
    pub fn any(&self) -> bool {
        self.words.iter().any(|w| *w != 0)
    }

    /// Iterate over the offsets of all units that require instrumentation
    pub fn iter(&self) -> impl Iterator<Item = usize> + '_ {
        (0..self.len).filter(move |unit| self.get(*unit))
    }

    fn clear_tail(&mut self) {
        let used = self.len % WORD_BITS;
        if used != 0 {
            if let Some(last) = self.words.last_mut() {
                *last &= (1_u64 << used) - 1;
            }
        }
    }
}

impl std::fmt::Debug for InstrumentationMap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InstrumentationMap")
            .field("len", &self.len)
            .field("instrumented", &self.count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_small() {
        let map = InstrumentationMap::new(4096);

        assert_eq!(map.len(), 4096);
        assert!(!map.any());
    }

    #[test]
    fn create_empty() {
        let map = InstrumentationMap::new(0);

        assert!(map.is_empty());
        assert!(!map.get(0));
    }

    #[test]
    fn use_one() {
        let mut map = InstrumentationMap::new(4096);

        map.set(1, true);
        assert!(map.get(1));

        map.set(1, false);
        assert!(!map.get(1));

        assert!(!map.get(2));
    }

    #[test]
    fn get_past_end() {
        let map = InstrumentationMap::full(10);

        assert!(map.get(9));
        assert!(!map.get(10));
        assert!(!map.get(usize::MAX));
    }

    #[test]
    fn set_range_long() {
        let mut map = InstrumentationMap::new(4096);

        map.set_range(3, 1001, true);

        assert!(!map.get(2));
        assert!(map.get(3));
        assert!(map.get(64));
        assert!(map.get(666));
        assert!(map.get(1003));
        assert!(!map.get(1004));
        assert_eq!(map.count(), 1001);
    }

    #[test]
    fn set_range_clears() {
        let mut map = InstrumentationMap::full(256);

        map.set_range(60, 10, false);

        assert!(map.get(59));
        assert!(!map.get(60));
        assert!(!map.get(69));
        assert!(map.get(70));
        assert_eq!(map.count(), 246);
    }

    #[test]
    fn set_range_is_clipped() {
        let mut map = InstrumentationMap::new(100);

        map.set_range(90, 50, true);

        assert_eq!(map.count(), 10);
        assert!(map.get(99));
    }

    #[test]
    fn full_has_no_stray_bits() {
        for len in [1, 63, 64, 65, 127, 129] {
            let map = InstrumentationMap::full(len);
            assert_eq!(map.count(), len, "length {}", len);
        }
    }

    #[test]
    fn union() {
        let mut a = InstrumentationMap::new(128);
        let mut b = InstrumentationMap::new(128);

        a.set_range(0, 8, true);
        b.set_range(100, 8, true);
        a.union_with(&b);

        assert!(a.get(0));
        assert!(a.get(7));
        assert!(!a.get(8));
        assert!(a.get(100));
        assert!(a.get(107));
        assert_eq!(a.count(), 16);
    }

    #[test]
    fn union_with_longer_map() {
        let mut short = InstrumentationMap::new(70);
        let long = InstrumentationMap::full(128);

        short.union_with(&long);

        assert_eq!(short.count(), 70);
    }

    #[test]
    fn iter_offsets() {
        let mut map = InstrumentationMap::new(200);
        map.set(5, true);
        map.set(64, true);
        map.set(199, true);

        assert_eq!(map.iter().collect::<Vec<_>>(), vec![5, 64, 199]);
    }

    #[test]
    fn word_boundary() {
        for offset in 1..8 {
            let len = WORD_BITS + offset;
            let mut map = InstrumentationMap::new(len);

            for i in 0..len {
                map.set(i, true);
                assert!(map.get(i), "Unit {} should be set", i);
            }

            let last = len - 1;
            map.set(last, false);
            assert!(!map.get(last), "Last unit should be cleared");
        }
    }
}
