//! Comparison engine: Elo updates with transitive auto-resolution.
//!
//! A decision "W beat L" is applied to the direct pair first, then every
//! result it logically forces is applied too, without asking the user:
//! - every item L had already beaten now loses to W (counted in `auto_count_a`);
//! - every item that had already beaten W now beats L (counted in `auto_count_b`).
//!
//! Forced results propagate again from the pair they were applied to, so the
//! walk is depth-first. Each step adds a result between two items that had
//! none, so the walk ends after at most the number of unresolved pairs.
//!
//! The walk runs on an explicit frame stack rather than native recursion, so a
//! long chain of forced results cannot exhaust the call stack. The order of
//! updates (and therefore the rating drift) matches the recursive definition.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::RankError;
use crate::rating_store::{ItemId, RatingStore};

/// K-factor used by the fixed policy.
pub const DEFAULT_K_FACTOR: f64 = 32.0;

/// How the K-factor is chosen for each rating update.
///
/// Picked once per session and never changed during it.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KFactorPolicy {
    /// Same K for every update.
    Fixed(f64),
    /// 32 up to 2100, 24 up to 2400, 16 above, based on the item's own rating.
    Banded,
}

impl Default for KFactorPolicy {
    fn default() -> Self {
        Self::Fixed(DEFAULT_K_FACTOR)
    }
}

impl KFactorPolicy {
    /// K to apply to an item currently rated `rating`.
    pub fn k_for(&self, rating: i64) -> f64 {
        match self {
            Self::Fixed(k) => *k,
            Self::Banded => {
                if rating > 2400 {
                    16.0
                } else if rating > 2100 {
                    24.0
                } else {
                    32.0
                }
            }
        }
    }
}

/// Expected score of a player rated `rating` against one rated `opponent`.
pub fn expected_score(rating: i64, opponent: i64) -> f64 {
    1.0 / (1.0 + 10f64.powf((opponent - rating) as f64 / 400.0))
}

/// New rating after a game with outcome `actual` (1.0 win, 0.0 loss).
pub fn updated_rating(current: i64, expected: f64, actual: f64, k: f64) -> i64 {
    (current as f64 + k * (actual - expected)).round() as i64
}

/// Result of applying one human decision.
#[derive(Debug, Clone)]
pub struct DecisionOutcome {
    /// New store with the decision and every forced consequence applied.
    pub store: RatingStore,
    /// Results forced by "losers of the loser lose to the winner".
    pub auto_count_a: usize,
    /// Results forced by "winners over the winner beat the loser".
    pub auto_count_b: usize,
}

impl DecisionOutcome {
    pub fn auto_total(&self) -> usize {
        self.auto_count_a + self.auto_count_b
    }
}

#[derive(Debug, Clone, Copy)]
enum Sweep {
    SubLosers,
    SupWinners,
}

/// One pending propagation step: result `winner > loser` was just applied.
#[derive(Debug)]
struct Frame {
    winner: ItemId,
    loser: ItemId,
    sweep: Sweep,
    cursor: usize,
}

impl Frame {
    fn new(winner: ItemId, loser: ItemId) -> Self {
        Self {
            winner,
            loser,
            sweep: Sweep::SubLosers,
            cursor: 0,
        }
    }
}

/// Apply "`winner` beat `loser`" and everything it forces.
///
/// The input store is never modified; the returned outcome carries a new one.
/// Fails with `InvalidInput` when both IDs are equal, `NotFound` when either is
/// missing, and `PrecompareViolation` when the pair already has a result.
pub fn apply_decision(
    store: &RatingStore,
    winner: ItemId,
    loser: ItemId,
    policy: KFactorPolicy,
) -> Result<DecisionOutcome, RankError> {
    if winner == loser {
        return Err(RankError::invalid_input(format!(
            "item {winner} cannot be compared with itself"
        )));
    }
    store.get(winner)?;
    store.get(loser)?;
    if store.is_resolved(winner, loser) {
        return Err(RankError::PrecompareViolation { winner, loser });
    }

    let mut next = store.clone();
    let mut auto_count_a = 0;
    let mut auto_count_b = 0;

    apply_result(&mut next, winner, loser, policy)?;
    let mut stack = vec![Frame::new(winner, loser)];

    while let Some(frame) = stack.last_mut() {
        let (w, l) = (frame.winner, frame.loser);
        match frame.sweep {
            Sweep::SubLosers => {
                let Some(sub) = next.get(l)?.won_against().get_index(frame.cursor).copied() else {
                    frame.sweep = Sweep::SupWinners;
                    frame.cursor = 0;
                    continue;
                };
                frame.cursor += 1;
                if sub == w || sub == l || next.is_resolved(w, sub) {
                    continue;
                }
                apply_result(&mut next, w, sub, policy)?;
                auto_count_a += 1;
                stack.push(Frame::new(w, sub));
            }
            Sweep::SupWinners => {
                let Some(sup) = next.get(w)?.lost_to().get_index(frame.cursor).copied() else {
                    stack.pop();
                    continue;
                };
                frame.cursor += 1;
                if sup == w || sup == l || next.is_resolved(sup, l) {
                    continue;
                }
                apply_result(&mut next, sup, l, policy)?;
                auto_count_b += 1;
                stack.push(Frame::new(sup, l));
            }
        }
    }

    debug!(winner, loser, auto_count_a, auto_count_b, "decision applied");

    Ok(DecisionOutcome {
        store: next,
        auto_count_a,
        auto_count_b,
    })
}

/// Rating update plus result edges for a single pair, using current ratings.
fn apply_result(
    store: &mut RatingStore,
    winner: ItemId,
    loser: ItemId,
    policy: KFactorPolicy,
) -> Result<(), RankError> {
    let winner_rating = store.get(winner)?.rating();
    let loser_rating = store.get(loser)?.rating();

    let new_winner = updated_rating(
        winner_rating,
        expected_score(winner_rating, loser_rating),
        1.0,
        policy.k_for(winner_rating),
    );
    let new_loser = updated_rating(
        loser_rating,
        expected_score(loser_rating, winner_rating),
        0.0,
        policy.k_for(loser_rating),
    );

    store.record_result(winner, loser, new_winner, new_loser)
}
