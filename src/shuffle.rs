// Randomized playlist traversal
//
// A shuffle order is a permutation of playlist indices plus a cursor into
// it. The permutation is regenerated when the playlist changes under
// shuffle, or when shuffle is entered; the cursor re-resolves to the
// current track so resume never jumps.

use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};

/// Fisher–Yates permutation of `[0..len)` with a circular cursor.
#[derive(Debug)]
pub struct ShuffleSequencer {
    order: Vec<usize>,
    cursor: usize,
    rng: SmallRng,
}

impl ShuffleSequencer {
    /// Build a sequencer over `len` tracks, positioning the cursor on
    /// `current_index` when it falls inside the playlist.
    pub fn new(len: usize, current_index: usize) -> Self {
        Self::with_rng(len, current_index, SmallRng::from_entropy())
    }

    /// Deterministic variant for tests.
    pub fn with_seed(len: usize, current_index: usize, seed: u64) -> Self {
        Self::with_rng(len, current_index, SmallRng::seed_from_u64(seed))
    }

    fn with_rng(len: usize, current_index: usize, rng: SmallRng) -> Self {
        let mut sequencer = Self {
            order: Vec::new(),
            cursor: 0,
            rng,
        };
        sequencer.regenerate(len, current_index);
        sequencer
    }

    /// Regenerate the permutation and re-resolve the cursor to
    /// `current_index`.
    pub fn regenerate(&mut self, len: usize, current_index: usize) {
        self.order = (0..len).collect();
        for i in (1..len).rev() {
            let j = self.rng.gen_range(0..=i);
            self.order.swap(i, j);
        }
        self.cursor = 0;
        if len > 0 {
            self.resolve_cursor(current_index);
        }
    }

    /// Point the cursor at `index`'s position in the permutation.
    ///
    /// A miss means the permutation invariant broke somewhere else; recover
    /// by regenerating, but make noise about it.
    pub fn resolve_cursor(&mut self, index: usize) {
        match self.order.iter().position(|&i| i == index) {
            Some(position) => self.cursor = position,
            None => {
                debug_assert!(
                    index >= self.order.len(),
                    "index {} missing from shuffle order of {} entries",
                    index,
                    self.order.len()
                );
                log::warn!(
                    "index {} not found in shuffle order, regenerating",
                    index
                );
                let len = self.order.len();
                self.regenerate(len, 0);
                self.cursor = 0;
            }
        }
    }

    /// Advance circularly and return the playlist index at the new cursor.
    pub fn advance(&mut self) -> Option<usize> {
        if self.order.is_empty() {
            return None;
        }
        self.cursor = (self.cursor + 1) % self.order.len();
        Some(self.order[self.cursor])
    }

    /// Retreat circularly and return the playlist index at the new cursor.
    pub fn retreat(&mut self) -> Option<usize> {
        if self.order.is_empty() {
            return None;
        }
        self.cursor = if self.cursor > 0 {
            self.cursor - 1
        } else {
            self.order.len() - 1
        };
        Some(self.order[self.cursor])
    }

    pub fn current(&self) -> Option<usize> {
        self.order.get(self.cursor).copied()
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn order(&self) -> &[usize] {
        &self.order
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn order_is_a_permutation_for_all_small_sizes() {
        for len in 1..=32 {
            let sequencer = ShuffleSequencer::with_seed(len, 0, 7);
            let mut seen = vec![false; len];
            for &index in sequencer.order() {
                assert!(index < len);
                assert!(!seen[index], "index {} repeated for len {}", index, len);
                seen[index] = true;
            }
            assert!(seen.iter().all(|&s| s));
        }
    }

    #[test]
    fn cursor_resolves_to_current_index() {
        for seed in 0..20 {
            let sequencer = ShuffleSequencer::with_seed(10, 4, seed);
            assert_eq!(sequencer.current(), Some(4));
        }
    }

    #[test]
    fn advance_then_retreat_round_trips() {
        let mut sequencer = ShuffleSequencer::with_seed(5, 2, 99);
        let start = sequencer.cursor();
        sequencer.advance().unwrap();
        sequencer.retreat().unwrap();
        assert_eq!(sequencer.cursor(), start);
        assert_eq!(sequencer.current(), Some(2));
    }

    #[test]
    fn traversal_is_circular() {
        let mut sequencer = ShuffleSequencer::with_seed(3, 0, 1);
        let mut visited = Vec::new();
        for _ in 0..3 {
            visited.push(sequencer.advance().unwrap());
        }
        visited.sort_unstable();
        assert_eq!(visited, vec![0, 1, 2]);
        // One full lap lands back on the starting entry.
        assert_eq!(sequencer.current(), Some(0));
    }

    #[test]
    fn single_track_always_yields_itself() {
        let mut sequencer = ShuffleSequencer::with_seed(1, 0, 3);
        assert_eq!(sequencer.advance(), Some(0));
        assert_eq!(sequencer.retreat(), Some(0));
    }

    #[test]
    fn empty_playlist_yields_nothing() {
        let mut sequencer = ShuffleSequencer::with_seed(0, 0, 3);
        assert_eq!(sequencer.advance(), None);
        assert_eq!(sequencer.retreat(), None);
        assert_eq!(sequencer.current(), None);
    }
}
