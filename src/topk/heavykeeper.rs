//! HeavyKeeper top-k sketch.
//!
//! Implementation of the HeavyKeeper algorithm from "HeavyKeeper: An
//! Accurate Algorithm for Finding Top-k Elephant Flows" (USENIX ATC '18):
//! a grid of (fingerprint, count) cells where colliding keys fight for a
//! cell through exponential-decay trials. Frequent keys resist decay, rare
//! colliders erode, and the winners feed a fixed-capacity min-heap holding
//! the current top-k.

use crossbeam_channel::{bounded, Receiver, Sender};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use xxhash_rust::xxh32::xxh32;

use super::minheap::MinHeap;
use super::Item;

/// Size of the precomputed `decay^i` table; counts at or above this clamp to
/// the last entry.
const LOOKUP_TABLE: usize = 256;

/// Capacity of the expelled-items feed. Overflow drops silently; consumers
/// are advisory and must tolerate missed evictions.
const EXPELLED_CAPACITY: usize = 32;

/// One grid cell: an identity tag plus the count it has defended.
#[derive(Clone, Copy, Default)]
struct Cell {
    fingerprint: u32,
    count: u32,
}

/// Probabilistic top-k sketch with bounded memory.
///
/// Not internally synchronized: `add` and `fading` take `&mut self`, and
/// concurrent callers are expected to serialize behind their own lock, the
/// way the hot-key cache does.
pub struct HeavyKeeper {
    width: usize,
    decay_table: Vec<f64>,
    min_count: u32,
    total: u64,
    grid: Vec<Vec<Cell>>,
    heap: MinHeap,
    // Decay trials need statistical spread, not entropy; the fixed seed
    // keeps sketch behavior reproducible.
    rng: StdRng,
    expelled_tx: Sender<Item>,
    expelled_rx: Receiver<Item>,
}

impl HeavyKeeper {
    /// Creates a sketch tracking the top `k` keys over a `depth x width`
    /// grid with the given per-trial `decay` (in `(0, 1)`, typically 0.925).
    ///
    /// Keys whose estimated count stays below `min_count` are never
    /// promoted into the top-k heap.
    pub fn new(k: u32, width: usize, depth: usize, decay: f64, min_count: u32) -> Self {
        debug_assert!(decay > 0.0 && decay < 1.0);
        let (expelled_tx, expelled_rx) = bounded(EXPELLED_CAPACITY);
        HeavyKeeper {
            width,
            decay_table: (0..LOOKUP_TABLE).map(|i| decay.powi(i as i32)).collect(),
            min_count,
            total: 0,
            grid: vec![vec![Cell::default(); width]; depth],
            heap: MinHeap::new(k as usize),
            rng: StdRng::seed_from_u64(0),
            expelled_tx,
            expelled_rx,
        }
    }

    /// Records `incr` occurrences of `key`.
    ///
    /// Returns the item expelled from the top-k (if the key's promotion
    /// displaced one) and whether the key is a top-k member after this add.
    pub fn add(&mut self, key: &str, incr: u32) -> (Option<Item>, bool) {
        let bytes = key.as_bytes();
        let fingerprint = xxh32(bytes, 0);
        let mut max_count: u32 = 0;

        for row in 0..self.grid.len() {
            let col = (xxh32(bytes, row as u32) as usize) % self.width;
            let cell = self.grid[row][col];

            if cell.count == 0 {
                self.grid[row][col] = Cell {
                    fingerprint,
                    count: incr,
                };
                max_count = max_count.max(incr);
            } else if cell.fingerprint == fingerprint {
                let count = cell.count + incr;
                self.grid[row][col].count = count;
                max_count = max_count.max(count);
            } else {
                // Collision with a different key: the incumbent's count
                // erodes with probability decay^count per trial.
                let mut remaining = incr;
                while remaining > 0 {
                    let count = self.grid[row][col].count;
                    let decay = self.decay_table[count.min(LOOKUP_TABLE as u32 - 1) as usize];
                    if self.rng.gen::<f64>() < decay {
                        self.grid[row][col].count -= 1;
                        if self.grid[row][col].count == 0 {
                            self.grid[row][col] = Cell {
                                fingerprint,
                                count: remaining,
                            };
                            max_count = max_count.max(remaining);
                            break;
                        }
                    }
                    remaining -= 1;
                }
            }
        }

        self.total += u64::from(incr);
        if max_count < self.min_count {
            return (None, false);
        }
        if self.heap.is_full() && max_count < self.heap.min() {
            return (None, false);
        }
        if let Some(index) = self.heap.find(key) {
            self.heap.fix(index, max_count);
            return (None, true);
        }
        let expelled = self.heap.push_or_replace(Item {
            key: key.to_string(),
            count: max_count,
        });
        if let Some(ref evicted) = expelled {
            // Non-blocking publish; a full feed drops the event.
            let _ = self.expelled_tx.try_send(evicted.clone());
        }
        (expelled, true)
    }

    /// Current top-k ranking, highest count first.
    pub fn list(&self) -> Vec<Item> {
        self.heap.sorted()
    }

    /// Whether `key` is currently a top-k member.
    pub fn query(&self, key: &str) -> bool {
        self.heap.find(key).is_some()
    }

    /// Estimated count for `key`, if it is currently a top-k member.
    pub fn count(&self, key: &str) -> Option<u32> {
        self.heap.find(key).map(|index| self.heap.node(index).count)
    }

    /// Halves every tracked count, giving recent traffic twice the weight
    /// of older traffic.
    pub fn fading(&mut self) {
        for row in &mut self.grid {
            for cell in row.iter_mut() {
                cell.count >>= 1;
            }
        }
        for node in self.heap.nodes_mut() {
            node.count >>= 1;
        }
        self.total >>= 1;
    }

    /// Total number of occurrences recorded, halved by each [`fading`] pass.
    ///
    /// [`fading`]: HeavyKeeper::fading
    pub fn total(&self) -> u64 {
        self.total
    }

    /// Feed of items expelled from the top-k.
    ///
    /// The feed is bounded; when no consumer keeps up, eviction events are
    /// dropped rather than blocking `add`.
    pub fn expelled(&self) -> Receiver<Item> {
        self.expelled_rx.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_list_never_exceeds_k() {
        let mut sketch = HeavyKeeper::new(5, 256, 4, 0.925, 0);
        for i in 0..1000 {
            sketch.add(&i.to_string(), 1);
            assert!(sketch.list().len() <= 5);
        }
    }

    #[test]
    fn test_repeated_key_accumulates() {
        let mut sketch = HeavyKeeper::new(10, 256, 4, 0.925, 0);
        for _ in 0..50 {
            sketch.add("hot", 1);
        }
        let ranked = sketch.list();
        assert_eq!(ranked[0].key, "hot");
        assert_eq!(ranked[0].count, 50);
        assert_eq!(sketch.count("hot"), Some(50));
        assert!(sketch.query("hot"));
        assert!(!sketch.query("cold"));
    }

    #[test]
    fn test_min_count_gates_promotion() {
        let mut sketch = HeavyKeeper::new(100, 256, 4, 0.925, 10);
        for _ in 0..9 {
            let (_, promoted) = sketch.add("1", 1);
            assert!(!promoted);
        }
        let (_, promoted) = sketch.add("1", 1);
        assert!(promoted);
    }

    #[test]
    fn test_total_tracks_increments() {
        let mut sketch = HeavyKeeper::new(10, 256, 4, 0.925, 0);
        sketch.add("a", 3);
        sketch.add("b", 2);
        assert_eq!(sketch.total(), 5);
    }

    #[test]
    fn test_fading_halves_counts_and_total() {
        let mut sketch = HeavyKeeper::new(10, 256, 4, 0.925, 0);
        for _ in 0..40 {
            sketch.add("hot", 1);
        }
        sketch.fading();
        assert_eq!(sketch.total(), 20);
        assert_eq!(sketch.count("hot"), Some(20));
        // Counts keep accumulating on the faded base.
        sketch.add("hot", 1);
        assert_eq!(sketch.count("hot"), Some(21));
    }

    #[test]
    fn test_expelled_feed_reports_evictions() {
        let mut sketch = HeavyKeeper::new(1, 256, 4, 0.925, 0);
        let feed = sketch.expelled();
        for _ in 0..5 {
            sketch.add("first", 1);
        }
        let (expelled, promoted) = sketch.add("second", 10);
        assert!(promoted);
        assert_eq!(expelled.as_ref().map(|i| i.key.as_str()), Some("first"));
        assert_eq!(feed.try_recv().map(|i| i.key), Ok("first".to_string()));
    }

    #[test]
    fn test_expelled_feed_drops_on_overflow() {
        let mut sketch = HeavyKeeper::new(1, 4096, 4, 0.925, 0);
        // Escalating counts so each new key displaces the previous one.
        for i in 0..100u32 {
            sketch.add(&format!("key-{i}"), i + 1);
        }
        let feed = sketch.expelled();
        // The feed is bounded at 32; everything beyond was dropped, and the
        // sketch itself never stalled.
        assert!(feed.len() <= 32);
        assert_eq!(sketch.list().len(), 1);
    }
}
