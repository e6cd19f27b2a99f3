//! Error types for the ranking core.

use thiserror::Error;

use crate::rating_store::ItemId;

/// Errors raised by the rating store, the comparison engine and the pair selector.
///
/// None of these are user-facing: each one means a caller broke a contract.
/// Every operation that returns one leaves its inputs untouched.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RankError {
    /// A precondition on the arguments did not hold (too few items, same ID twice, ...).
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// The referenced item is not part of the store.
    #[error("item {0} not found")]
    NotFound(ItemId),

    /// The pair had already been decided, directly or transitively.
    #[error("pair {winner} vs {loser} is already resolved")]
    PrecompareViolation { winner: ItemId, loser: ItemId },
}

impl RankError {
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput(message.into())
    }

    /// Short code for logging.
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidInput(_) => "invalid_input",
            Self::NotFound(_) => "not_found",
            Self::PrecompareViolation { .. } => "precompare_violation",
        }
    }
}
