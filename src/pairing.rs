//! Pair selection: which unresolved pair to show next.
//!
//! Candidates are generated from a shuffled item list, stably sorted by how
//! many results each item already has, so under-compared items come first
//! without sorting the (much larger) pair list itself. Randomness only ever
//! affects ordering; the validity rule is deterministic given that order.

use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::rating_store::{ItemId, RatingStore};

/// Two distinct items shown side by side. Order carries no meaning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Pair {
    pub left: ItemId,
    pub right: ItemId,
}

impl Pair {
    pub fn new(left: ItemId, right: ItemId) -> Self {
        Self { left, right }
    }

    pub fn contains(&self, id: ItemId) -> bool {
        self.left == id || self.right == id
    }

    pub fn shares_item(&self, other: &Pair) -> bool {
        self.contains(other.left) || self.contains(other.right)
    }

    /// `(winner, loser)` when the user picks the left item.
    pub fn left_wins(&self) -> (ItemId, ItemId) {
        (self.left, self.right)
    }

    /// `(winner, loser)` when the user picks the right item.
    pub fn right_wins(&self) -> (ItemId, ItemId) {
        (self.right, self.left)
    }
}

/// What the selector found.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PairSelection {
    /// Unresolved pairs left in the store.
    pub remaining: usize,
    /// Next pair to show; `None` exactly when `remaining == 0`.
    pub pair: Option<Pair>,
}

impl PairSelection {
    pub fn is_complete(&self) -> bool {
        self.remaining == 0
    }
}

/// Number of unordered pairs with no known result.
pub fn count_remaining_pairs(store: &RatingStore) -> usize {
    let ids: Vec<ItemId> = store.ids().collect();
    let mut remaining = 0;
    for (i, &outer) in ids.iter().enumerate() {
        for &inner in &ids[i + 1..] {
            if !store.is_resolved(outer, inner) {
                remaining += 1;
            }
        }
    }
    remaining
}

/// Pick the next pair to present.
///
/// Rules, applied to candidates in generation order:
/// - while some item has no results at all, both items must be at the lowest
///   comparison count; afterwards at least one of them must be;
/// - a candidate sharing an item with `previous` is skipped;
/// - after `remaining - 1` rejected candidates, the first candidate is taken
///   unconditionally so the selector always yields a pair.
///
/// The chosen pair comes back in random left/right order.
pub fn select_pair<R: Rng>(
    store: &RatingStore,
    previous: Option<&Pair>,
    rng: &mut R,
) -> PairSelection {
    let mut items: Vec<(ItemId, usize)> = store
        .iter()
        .map(|(id, record)| (id, record.comparisons()))
        .collect();
    items.shuffle(rng);
    items.sort_by_key(|&(_, total)| total);

    let lowest_total = store.lowest_comparisons();

    let mut candidates: Vec<((ItemId, usize), (ItemId, usize))> = Vec::new();
    for (i, &outer) in items.iter().enumerate() {
        for &inner in &items[i + 1..] {
            if !store.is_resolved(outer.0, inner.0) {
                candidates.push((outer, inner));
            }
        }
    }

    let remaining = candidates.len();
    let Some(&first) = candidates.first() else {
        return PairSelection {
            remaining: 0,
            pair: None,
        };
    };

    let attempts = remaining.saturating_sub(1).max(1);
    let chosen = candidates
        .iter()
        .take(attempts)
        .copied()
        .find(|&(a, b)| {
            let paced = if lowest_total == 0 {
                a.1 <= lowest_total && b.1 <= lowest_total
            } else {
                a.1 <= lowest_total || b.1 <= lowest_total
            };
            let repeats = previous.is_some_and(|prev| prev.contains(a.0) || prev.contains(b.0));
            paced && !repeats
        })
        .unwrap_or(first);

    let ((a, _), (b, _)) = chosen;
    let pair = if rng.gen_bool(0.5) {
        Pair::new(a, b)
    } else {
        Pair::new(b, a)
    };

    PairSelection {
        remaining,
        pair: Some(pair),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::elo::{apply_decision, KFactorPolicy};
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn decide(store: &RatingStore, winner: ItemId, loser: ItemId) -> RatingStore {
        apply_decision(store, winner, loser, KFactorPolicy::default())
            .unwrap()
            .store
    }

    #[test]
    fn fresh_store_counts_all_pairs() {
        let store = RatingStore::initialize(1..=10).unwrap();
        let mut rng = StdRng::seed_from_u64(7);
        let selection = select_pair(&store, None, &mut rng);
        assert_eq!(selection.remaining, 45);
        assert_eq!(count_remaining_pairs(&store), 45);
        let pair = selection.pair.unwrap();
        assert_ne!(pair.left, pair.right);
    }

    #[test]
    fn cold_start_pairs_only_uncompared_items() {
        let store = RatingStore::initialize(1..=8).unwrap();
        let store = decide(&store, 1, 2);
        let store = decide(&store, 3, 4);
        for seed in 0..50 {
            let mut rng = StdRng::seed_from_u64(seed);
            let pair = select_pair(&store, None, &mut rng).pair.unwrap();
            for id in [pair.left, pair.right] {
                assert_eq!(store.get(id).unwrap().comparisons(), 0, "seed {seed}");
            }
        }
    }

    #[test]
    fn avoids_items_from_previous_pair_when_possible() {
        let store = RatingStore::initialize(1..=6).unwrap();
        let previous = Pair::new(1, 2);
        for seed in 0..50 {
            let mut rng = StdRng::seed_from_u64(seed);
            let pair = select_pair(&store, Some(&previous), &mut rng).pair.unwrap();
            assert!(!pair.shares_item(&previous), "seed {seed}: {pair:?}");
        }
    }

    #[test]
    fn paced_phase_keeps_a_least_compared_item() {
        let store = RatingStore::initialize(1..=6).unwrap();
        let store = decide(&store, 1, 2);
        let store = decide(&store, 3, 4);
        let store = decide(&store, 5, 6);
        let store = decide(&store, 1, 3);
        let lowest = store.lowest_comparisons();
        assert!(lowest > 0);
        for seed in 0..50 {
            let mut rng = StdRng::seed_from_u64(seed);
            let pair = select_pair(&store, None, &mut rng).pair.unwrap();
            let a = store.get(pair.left).unwrap().comparisons();
            let b = store.get(pair.right).unwrap().comparisons();
            assert!(a <= lowest || b <= lowest, "seed {seed}: {pair:?}");
            assert!(!store.is_resolved(pair.left, pair.right));
        }
    }

    #[test]
    fn single_remaining_pair_is_always_offered() {
        let store = RatingStore::initialize([1, 2, 3]).unwrap();
        let store = decide(&store, 1, 2);
        let store = decide(&store, 1, 3);
        let previous = Pair::new(2, 3);
        let mut rng = StdRng::seed_from_u64(1);
        let selection = select_pair(&store, Some(&previous), &mut rng);
        assert_eq!(selection.remaining, 1);
        let pair = selection.pair.unwrap();
        assert!(pair == Pair::new(2, 3) || pair == Pair::new(3, 2));
    }

    #[test]
    fn transitively_resolved_pair_is_never_offered() {
        let store = RatingStore::initialize([1, 2, 3]).unwrap();
        let store = decide(&store, 1, 2);
        let store = decide(&store, 2, 3);
        let mut rng = StdRng::seed_from_u64(3);
        let selection = select_pair(&store, None, &mut rng);
        assert!(selection.is_complete());
        assert_eq!(selection.pair, None);
    }

    #[test]
    fn completes_only_when_every_pair_is_resolved() {
        let mut store = RatingStore::initialize(1..=12).unwrap();
        let mut rng = StdRng::seed_from_u64(99);
        let mut previous = None;
        loop {
            let selection = select_pair(&store, previous.as_ref(), &mut rng);
            assert_eq!(selection.remaining, count_remaining_pairs(&store));
            let Some(pair) = selection.pair else {
                break;
            };
            // Lower ID always wins.
            let (w, l) = if pair.left < pair.right {
                pair.left_wins()
            } else {
                pair.right_wins()
            };
            store = decide(&store, w, l);
            previous = Some(pair);
        }
        for (_, record) in store.iter() {
            assert_eq!(record.comparisons(), 11);
        }
        assert_eq!(store.get(1).unwrap().won_against().len(), 11);
        assert_eq!(store.get(12).unwrap().lost_to().len(), 11);
        assert!(store.get(1).unwrap().rating() > crate::rating_store::INITIAL_RATING);
        assert!(store.get(12).unwrap().rating() < crate::rating_store::INITIAL_RATING);
    }
}
