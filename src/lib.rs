#![forbid(unsafe_code)]

//! # animesort
//!
//! Rank a long list of titles by repeatedly picking the better of two.
//!
//! Every choice updates Elo ratings and is propagated through what is already
//! known: if A beat B and B now beats C, the session never asks about A and C.
//! A pair selector keeps the least-compared items in front so propagation
//! pays off early, and the session state machine adds one-level undo, a
//! persisted save slot and a JSON import/export format on top.

pub mod elo;
pub mod error;
pub mod pairing;
pub mod rating_store;
pub mod session;
pub mod source;
pub mod transfer;

pub use elo::{apply_decision, DecisionOutcome, KFactorPolicy};
pub use error::RankError;
pub use pairing::{count_remaining_pairs, select_pair, Pair, PairSelection};
pub use rating_store::{ItemId, RatingRecord, RatingStore, INITIAL_RATING};
pub use session::{
    Counters, MemorySnapshotStore, Phase, RankedEntry, Session, SessionConfig, SessionError,
    SessionEvent, SessionState, SnapshotStore, SqliteSnapshotStore,
};
pub use source::{FetchError, FileItemSource, ItemSource, JikanConfig, JikanSource, SourceItem};
pub use transfer::{export_document, parse_import, validate_import, ImportDocument, ImportError};
