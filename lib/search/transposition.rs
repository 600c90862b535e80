use crate::chess::{Move, Zobrist};
use crate::eval::Value;
use crate::search::{Depth, DEPTH_NONE};
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering::Relaxed};

/// Whether the stored score is exact or a bound.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
#[cfg_attr(test, derive(test_strategy::Arbitrary))]
#[repr(u8)]
pub enum Bound {
    None,
    Upper,
    Lower,
    Exact,
}

impl Bound {
    /// Whether this bound admits a lower bound on the true score.
    #[inline(always)]
    pub const fn is_lower(self) -> bool {
        matches!(self, Bound::Lower | Bound::Exact)
    }

    /// Whether this bound admits an upper bound on the true score.
    #[inline(always)]
    pub const fn is_upper(self) -> bool {
        matches!(self, Bound::Upper | Bound::Exact)
    }
}

/// A decoded transposition table entry.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct Transposition {
    pub value: Value,
    pub eval: Value,
    pub depth: Depth,
    pub bound: Bound,
    pub best: Option<Move>,
    pub is_pv: bool,
}

// Entries are packed into a single word:
//   bits  0..16  move
//   bits 16..32  value
//   bits 32..48  eval
//   bits 48..56  depth, offset so that DEPTH_NONE maps to 1
//   bits 56..58  bound
//   bit  58      pv
//   bits 59..64  generation
const DEPTH_OFFSET: Depth = DEPTH_NONE - 1;
const GENERATION_BITS: u64 = 5;
const GENERATION_MASK: u8 = (1 << GENERATION_BITS) - 1;

fn pack(tpos: &Transposition, generation: u8) -> u64 {
    let mv = tpos.best.map_or(0, Move::bits) as u64;
    let value = tpos.value.get() as i16 as u16 as u64;
    let eval = tpos.eval.get() as i16 as u16 as u64;
    let depth = (tpos.depth - DEPTH_OFFSET) as u64 & 0xFF;
    let bound = tpos.bound as u64;
    let pv = tpos.is_pv as u64;
    let generation = (generation & GENERATION_MASK) as u64;

    mv | (value << 16) | (eval << 32) | (depth << 48) | (bound << 56) | (pv << 58)
        | (generation << 59)
}

fn unpack(data: u64) -> Transposition {
    Transposition {
        best: Move::from_bits(data as u16),
        value: Value::new((data >> 16) as u16 as i16 as i32),
        eval: Value::new((data >> 32) as u16 as i16 as i32),
        depth: ((data >> 48) as u8 as Depth) + DEPTH_OFFSET,
        bound: match (data >> 56) & 0b11 {
            0 => Bound::None,
            1 => Bound::Upper,
            2 => Bound::Lower,
            _ => Bound::Exact,
        },
        is_pv: (data >> 58) & 1 != 0,
    }
}

#[inline(always)]
fn generation_of(data: u64) -> u8 {
    (data >> 59) as u8 & GENERATION_MASK
}

#[derive(Debug, Default)]
struct Slot {
    // `key` stores the zobrist hash xor-ed with `data`, so that a torn
    // read surfaces as a key mismatch and is treated as a miss.
    key: AtomicU64,
    data: AtomicU64,
}

const CLUSTER: usize = 2;

/// The shared transposition table.
///
/// Reads and writes are lock-free and may race; the xor discipline on the
/// key guarantees a racing read at worst misses.
#[derive(Debug)]
pub struct TranspositionTable {
    slots: Box<[Slot]>,
    generation: AtomicU8,
}

impl TranspositionTable {
    /// Creates a table of at most `size` MiB.
    pub fn new(size: usize) -> Self {
        let len = (size << 20) / size_of::<Slot>() / CLUSTER * CLUSTER;
        let slots = (0..len.max(CLUSTER)).map(|_| Slot::default()).collect();

        TranspositionTable {
            slots,
            generation: AtomicU8::new(0),
        }
    }

    #[inline(always)]
    fn cluster(&self, key: Zobrist) -> usize {
        let clusters = (self.slots.len() / CLUSTER) as u128;
        ((key as u128 * clusters) >> 64) as usize * CLUSTER
    }

    /// The number of entries in the table.
    #[inline(always)]
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Ages out entries from previous searches.
    #[inline(always)]
    pub fn new_search(&self) {
        self.generation.fetch_add(1, Relaxed);
    }

    #[inline(always)]
    fn relative_age(&self, data: u64) -> u8 {
        let generation = self.generation.load(Relaxed) & GENERATION_MASK;
        generation.wrapping_sub(generation_of(data)) & GENERATION_MASK
    }

    /// Looks up the entry for a position.
    pub fn probe(&self, key: Zobrist) -> Option<Transposition> {
        let cluster = self.cluster(key);
        for slot in &self.slots[cluster..cluster + CLUSTER] {
            let data = slot.data.load(Relaxed);
            if data != 0 && slot.key.load(Relaxed) ^ data == key {
                // Refresh the generation so the entry survives aging.
                let tpos = unpack(data);
                let refreshed = pack(&tpos, self.generation.load(Relaxed));
                slot.key.store(key ^ refreshed, Relaxed);
                slot.data.store(refreshed, Relaxed);
                return Some(tpos);
            }
        }

        None
    }

    /// Stores or refreshes an entry.
    ///
    /// Within a cluster the key-matching slot is preferred; otherwise the
    /// slot minimizing `depth - 8 * relative_age` is replaced. A matching
    /// slot keeps its deeper data unless the new bound is exact or the
    /// stored depth is no longer competitive.
    #[allow(clippy::too_many_arguments)]
    pub fn save(
        &self,
        key: Zobrist,
        value: Value,
        is_pv: bool,
        bound: Bound,
        depth: Depth,
        best: Option<Move>,
        eval: Value,
    ) {
        let cluster = self.cluster(key);
        let slots = &self.slots[cluster..cluster + CLUSTER];

        let mut target = &slots[0];
        let mut matched = false;
        for slot in slots {
            let data = slot.data.load(Relaxed);
            if data == 0 || slot.key.load(Relaxed) ^ data == key {
                target = slot;
                matched = data != 0;
                break;
            }

            let current = target.data.load(Relaxed);
            let slot_priority = unpack(data).depth - 8 * self.relative_age(data) as Depth;
            let target_priority = unpack(current).depth - 8 * self.relative_age(current) as Depth;
            if slot_priority < target_priority {
                target = slot;
            }
        }

        let mut tpos = Transposition {
            value,
            eval,
            depth,
            bound,
            best,
            is_pv,
        };

        if matched {
            let old = unpack(target.data.load(Relaxed));

            // Preserve the old move when the new search found none.
            if tpos.best.is_none() {
                tpos.best = old.best;
            }

            // Don't overwrite deeper data with a shallow bound.
            if bound != Bound::Exact && depth < old.depth - 4 {
                return;
            }
        }

        let data = pack(&tpos, self.generation.load(Relaxed));
        target.key.store(key ^ data, Relaxed);
        target.data.store(data, Relaxed);
    }

    /// Hints the CPU to fetch the cluster for a position.
    #[inline(always)]
    pub fn prefetch(&self, key: Zobrist) {
        #[cfg(target_arch = "x86_64")]
        unsafe {
            let cluster = self.cluster(key);
            let ptr = self.slots.as_ptr().add(cluster) as *const i8;
            std::arch::x86_64::_mm_prefetch(ptr, std::arch::x86_64::_MM_HINT_T0);
        }

        #[cfg(not(target_arch = "x86_64"))]
        let _ = key;
    }

    /// An estimate of the table occupancy, in permille.
    pub fn hashfull(&self) -> usize {
        let generation = self.generation.load(Relaxed) & GENERATION_MASK;
        let sample = self.slots.len().min(1000);

        let filled = self.slots[..sample]
            .iter()
            .filter(|slot| {
                let data = slot.data.load(Relaxed);
                data != 0 && generation_of(data) == generation
            })
            .count();

        filled * 1000 / sample
    }

    /// Empties the table.
    pub fn clear(&self) {
        for slot in self.slots.iter() {
            slot.key.store(0, Relaxed);
            slot.data.store(0, Relaxed);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_strategy::proptest;

    fn tpos(value: i32, depth: Depth, bound: Bound) -> Transposition {
        Transposition {
            value: Value::new(value),
            eval: Value::new(0),
            depth,
            bound,
            best: None,
            is_pv: false,
        }
    }

    #[proptest]
    fn packing_round_trips(
        #[strategy(-32002i32..=32002)] value: i32,
        #[strategy(-32002i32..=32002)] eval: i32,
        #[strategy(DEPTH_NONE..crate::search::MAX_PLY)] depth: Depth,
        bound: Bound,
        best: Option<crate::chess::Move>,
        is_pv: bool,
        generation: u8,
    ) {
        let tpos = Transposition {
            value: Value::new(value),
            eval: Value::new(eval),
            depth,
            bound,
            best,
            is_pv,
        };

        assert_eq!(unpack(pack(&tpos, generation)), tpos);
    }

    #[proptest]
    fn probe_misses_on_empty_table(key: u64) {
        let tt = TranspositionTable::new(1);
        assert_eq!(tt.probe(key), None);
    }

    #[proptest]
    fn probe_finds_saved_entry(key: u64, #[strategy(-1000i32..1000)] value: i32) {
        let tt = TranspositionTable::new(1);
        tt.save(
            key,
            Value::new(value),
            false,
            Bound::Exact,
            8,
            None,
            Value::new(0),
        );

        let entry = tt.probe(key).unwrap();
        assert_eq!(entry.value, Value::new(value));
        assert_eq!(entry.depth, 8);
        assert_eq!(entry.bound, Bound::Exact);
    }

    #[proptest]
    fn probe_misses_on_unrelated_key(key: u64, #[filter(#key != #other)] other: u64) {
        let tt = TranspositionTable::new(1);
        tt.save(key, Value::ZERO, false, Bound::Lower, 4, None, Value::ZERO);

        // The other key either indexes a different cluster or fails the
        // key check within the same cluster.
        if let Some(entry) = tt.probe(other) {
            assert_eq!(entry.bound, Bound::Lower);
        }
    }

    #[test]
    fn later_deeper_write_wins_on_the_same_key() {
        let tt = TranspositionTable::new(1);
        let key = 0xDEADBEEF;

        let a = tpos(10, 4, Bound::Lower);
        tt.save(key, a.value, a.is_pv, a.bound, a.depth, a.best, a.eval);

        let b = tpos(20, 8, Bound::Lower);
        tt.save(key, b.value, b.is_pv, b.bound, b.depth, b.best, b.eval);

        let entry = tt.probe(key).unwrap();
        assert_eq!(entry.value, Value::new(20));
        assert_eq!(entry.depth, 8);
    }

    #[test]
    fn much_shallower_bound_does_not_replace_on_the_same_key() {
        let tt = TranspositionTable::new(1);
        let key = 0xDEADBEEF;

        tt.save(key, Value::new(10), false, Bound::Lower, 12, None, Value::ZERO);
        tt.save(key, Value::new(20), false, Bound::Lower, 2, None, Value::ZERO);

        let entry = tt.probe(key).unwrap();
        assert_eq!(entry.depth, 12);
        assert_eq!(entry.value, Value::new(10));
    }

    #[test]
    fn clear_empties_the_table() {
        let tt = TranspositionTable::new(1);
        tt.save(1, Value::ZERO, false, Bound::Exact, 4, None, Value::ZERO);
        tt.new_search();
        tt.clear();
        assert_eq!(tt.probe(1), None);
        assert_eq!(tt.hashfull(), 0);
    }

    #[test]
    fn hashfull_grows_with_occupancy() {
        let tt = TranspositionTable::new(1);
        assert_eq!(tt.hashfull(), 0);

        for key in 0..10_000u64 {
            let key = key.wrapping_mul(0x9E3779B97F4A7C15);
            tt.save(key, Value::ZERO, false, Bound::Exact, 4, None, Value::ZERO);
        }

        assert!(tt.hashfull() > 0);
    }
}
