//! Per-item rating records keyed by item ID.
//!
//! The store is the authoritative record of what has been decided so far:
//! each item's current Elo rating plus the opponents it has beaten and lost
//! to, directly or through propagation. Callers only ever read it; the
//! comparison engine produces new store values instead of mutating a shared one.

use indexmap::{IndexMap, IndexSet};
use serde::{Deserialize, Serialize};

use crate::error::RankError;

/// Stable integer identifier of an external item (a MyAnimeList `mal_id`).
pub type ItemId = i64;

/// Rating every item starts with.
pub const INITIAL_RATING: i64 = 1600;

/// Rating and known results for a single item.
///
/// `won_against` and `lost_to` keep insertion order; the comparison engine
/// walks them in that order while it propagates a decision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RatingRecord {
    pub(crate) rating: i64,
    pub(crate) won_against: IndexSet<ItemId>,
    pub(crate) lost_to: IndexSet<ItemId>,
}

impl RatingRecord {
    pub(crate) fn new(rating: i64) -> Self {
        Self {
            rating,
            won_against: IndexSet::new(),
            lost_to: IndexSet::new(),
        }
    }

    pub(crate) fn with_results(
        rating: i64,
        won_against: impl IntoIterator<Item = ItemId>,
        lost_to: impl IntoIterator<Item = ItemId>,
    ) -> Self {
        Self {
            rating,
            won_against: won_against.into_iter().collect(),
            lost_to: lost_to.into_iter().collect(),
        }
    }

    pub fn rating(&self) -> i64 {
        self.rating
    }

    /// Items this one has beaten, in the order the results were recorded.
    pub fn won_against(&self) -> &IndexSet<ItemId> {
        &self.won_against
    }

    /// Items this one has lost to, in the order the results were recorded.
    pub fn lost_to(&self) -> &IndexSet<ItemId> {
        &self.lost_to
    }

    /// Total comparisons this item took part in (wins + losses).
    pub fn comparisons(&self) -> usize {
        self.won_against.len() + self.lost_to.len()
    }

    /// Whether the result against `other` is already known.
    pub fn has_result_against(&self, other: ItemId) -> bool {
        self.won_against.contains(&other) || self.lost_to.contains(&other)
    }
}

/// Mapping from item ID to its rating record.
///
/// Iteration follows insertion order, which keeps seeded pair selection
/// reproducible.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RatingStore {
    records: IndexMap<ItemId, RatingRecord>,
}

impl RatingStore {
    /// Create one fresh record per distinct ID.
    ///
    /// Duplicate IDs collapse into one record. Fewer than two distinct IDs is
    /// `InvalidInput`: nothing can be ranked without a pair.
    pub fn initialize(item_ids: impl IntoIterator<Item = ItemId>) -> Result<Self, RankError> {
        let mut records = IndexMap::new();
        for id in item_ids {
            records
                .entry(id)
                .or_insert_with(|| RatingRecord::new(INITIAL_RATING));
        }
        if records.len() < 2 {
            return Err(RankError::invalid_input(format!(
                "at least two items are required, got {}",
                records.len()
            )));
        }
        Ok(Self { records })
    }

    /// Build a store from already-populated records, checking every invariant.
    pub(crate) fn from_records(records: IndexMap<ItemId, RatingRecord>) -> Result<Self, RankError> {
        if records.len() < 2 {
            return Err(RankError::invalid_input(format!(
                "at least two items are required, got {}",
                records.len()
            )));
        }
        let store = Self { records };
        store.check_invariants()?;
        Ok(store)
    }

    pub fn get(&self, id: ItemId) -> Result<&RatingRecord, RankError> {
        self.records.get(&id).ok_or(RankError::NotFound(id))
    }

    pub fn contains(&self, id: ItemId) -> bool {
        self.records.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn ids(&self) -> impl Iterator<Item = ItemId> + '_ {
        self.records.keys().copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (ItemId, &RatingRecord)> + '_ {
        self.records.iter().map(|(id, record)| (*id, record))
    }

    /// Whether `a` and `b` already have a known result against each other.
    pub fn is_resolved(&self, a: ItemId, b: ItemId) -> bool {
        self.records
            .get(&a)
            .is_some_and(|record| record.has_result_against(b))
    }

    /// Lowest comparison count over all items (0 for an empty store).
    pub fn lowest_comparisons(&self) -> usize {
        self.records
            .values()
            .map(RatingRecord::comparisons)
            .min()
            .unwrap_or(0)
    }

    /// Items ordered by rating, highest first. Ties keep ascending ID order.
    pub fn ranked(&self) -> Vec<(ItemId, &RatingRecord)> {
        let mut entries: Vec<_> = self.iter().collect();
        entries.sort_by(|a, b| b.1.rating.cmp(&a.1.rating).then(a.0.cmp(&b.0)));
        entries
    }

    /// Verify disjointness, self-exclusion, referential integrity and symmetry.
    pub fn check_invariants(&self) -> Result<(), RankError> {
        for (&id, record) in &self.records {
            if record.has_result_against(id) {
                return Err(RankError::invalid_input(format!(
                    "item {id} has a result against itself"
                )));
            }
            if let Some(both) = record.won_against.intersection(&record.lost_to).next() {
                return Err(RankError::invalid_input(format!(
                    "item {id} both won against and lost to {both}"
                )));
            }
            for &other in &record.won_against {
                let mirror = self.records.get(&other).ok_or(RankError::NotFound(other))?;
                if !mirror.lost_to.contains(&id) {
                    return Err(RankError::invalid_input(format!(
                        "item {id} won against {other} but {other} has no loss to {id}"
                    )));
                }
            }
            for &other in &record.lost_to {
                let mirror = self.records.get(&other).ok_or(RankError::NotFound(other))?;
                if !mirror.won_against.contains(&id) {
                    return Err(RankError::invalid_input(format!(
                        "item {id} lost to {other} but {other} has no win over {id}"
                    )));
                }
            }
        }
        Ok(())
    }

    /// Apply one result in place: new ratings for both sides plus the two edges.
    ///
    /// Only the comparison engine calls this, and only on its own private copy.
    pub(crate) fn record_result(
        &mut self,
        winner: ItemId,
        loser: ItemId,
        winner_rating: i64,
        loser_rating: i64,
    ) -> Result<(), RankError> {
        let winner_record = self
            .records
            .get_mut(&winner)
            .ok_or(RankError::NotFound(winner))?;
        winner_record.rating = winner_rating;
        winner_record.won_against.insert(loser);

        let loser_record = self
            .records
            .get_mut(&loser)
            .ok_or(RankError::NotFound(loser))?;
        loser_record.rating = loser_rating;
        loser_record.lost_to.insert(winner);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn initialize_sets_default_rating_and_empty_results() {
        let store = RatingStore::initialize([10, 20, 30]).unwrap();
        assert_eq!(store.len(), 3);
        for (_, record) in store.iter() {
            assert_eq!(record.rating(), INITIAL_RATING);
            assert!(record.won_against().is_empty());
            assert!(record.lost_to().is_empty());
        }
    }

    #[test]
    fn initialize_requires_two_distinct_items() {
        assert!(matches!(
            RatingStore::initialize(Vec::<ItemId>::new()),
            Err(RankError::InvalidInput(_))
        ));
        assert!(matches!(
            RatingStore::initialize([7]),
            Err(RankError::InvalidInput(_))
        ));
        assert!(matches!(
            RatingStore::initialize([7, 7, 7]),
            Err(RankError::InvalidInput(_))
        ));
    }

    #[test]
    fn get_unknown_id_is_not_found() {
        let store = RatingStore::initialize([1, 2]).unwrap();
        assert_eq!(store.get(3).unwrap_err(), RankError::NotFound(3));
    }

    #[test]
    fn ranked_orders_by_rating_then_id() {
        let mut store = RatingStore::initialize([3, 1, 2]).unwrap();
        store.record_result(2, 3, 1616, 1584).unwrap();
        let order: Vec<ItemId> = store.ranked().into_iter().map(|(id, _)| id).collect();
        assert_eq!(order, vec![2, 1, 3]);
    }

    #[test]
    fn check_invariants_rejects_asymmetric_results() {
        let mut records = IndexMap::new();
        records.insert(1, RatingRecord::with_results(1600, [2], []));
        records.insert(2, RatingRecord::new(1600));
        assert!(matches!(
            RatingStore::from_records(records),
            Err(RankError::InvalidInput(_))
        ));
    }

    #[test]
    fn check_invariants_rejects_overlap_and_self_reference() {
        let mut overlap = IndexMap::new();
        overlap.insert(1, RatingRecord::with_results(1600, [2], [2]));
        overlap.insert(2, RatingRecord::with_results(1600, [1], [1]));
        assert!(RatingStore::from_records(overlap).is_err());

        let mut itself = IndexMap::new();
        itself.insert(1, RatingRecord::with_results(1600, [1], []));
        itself.insert(2, RatingRecord::new(1600));
        assert!(RatingStore::from_records(itself).is_err());
    }

    #[test]
    fn check_invariants_rejects_dangling_reference() {
        let mut records = IndexMap::new();
        records.insert(1, RatingRecord::with_results(1600, [9], []));
        records.insert(2, RatingRecord::new(1600));
        assert_eq!(
            RatingStore::from_records(records).unwrap_err(),
            RankError::NotFound(9)
        );
    }
}
