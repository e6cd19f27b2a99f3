//! Session state machine and the driver that feeds it.
//!
//! [`SessionState::apply`] is the only place a session changes. [`Session`]
//! owns the current state together with the random source, the snapshot store
//! and the configuration, and offers the operations a front end needs.

pub mod snapshot;
pub mod state;

use rand::rngs::StdRng;
use rand::SeedableRng;
use thiserror::Error;
use tracing::{debug, warn};

use crate::elo::KFactorPolicy;
use crate::error::RankError;
use crate::pairing::Pair;
use crate::rating_store::ItemId;
use crate::source::{FetchError, ItemSource, COMPLETED_STATUS};
use crate::transfer::{export_document, parse_import, ImportDocument, ImportError};

pub use snapshot::{
    MemorySnapshotStore, SnapshotError, SnapshotStore, SqliteSnapshotStore, SAVE_SLOT,
};
pub use state::{
    Counters, Phase, RankedEntry, SessionEvent, SessionState, TransitionContext, UndoSnapshot,
};

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("cannot handle `{event}` while {phase:?}")]
    InvalidTransition { phase: Phase, event: &'static str },

    #[error(transparent)]
    Rank(#[from] RankError),

    #[error("could not load items: {0}")]
    Fetch(#[from] FetchError),

    #[error("import rejected: {0}")]
    Import(#[from] ImportError),

    #[error("snapshot store: {0}")]
    Snapshot(#[from] SnapshotError),

    #[error("nothing to undo")]
    NoUndo,

    #[error("no saved session")]
    NoSave,

    #[error("ranking is not finished")]
    NotFinished,
}

/// Per-session settings, fixed when the session is created.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SessionConfig {
    pub k_factor: KFactorPolicy,
    /// Seed for pair shuffling; `None` seeds from the OS.
    pub rng_seed: Option<u64>,
    /// `watching_status` an item needs to be ranked.
    pub eligible_status: i64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            k_factor: KFactorPolicy::default(),
            rng_seed: None,
            eligible_status: COMPLETED_STATUS,
        }
    }
}

pub struct Session<S: SnapshotStore> {
    state: SessionState,
    config: SessionConfig,
    rng: StdRng,
    snapshots: S,
}

impl<S: SnapshotStore> Session<S> {
    pub fn new(config: SessionConfig, snapshots: S) -> Self {
        let rng = match config.rng_seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self {
            state: SessionState::new(),
            config,
            rng,
            snapshots,
        }
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn snapshots(&self) -> &S {
        &self.snapshots
    }

    /// Apply one event. On error the current state is kept as it was.
    pub fn dispatch(&mut self, event: SessionEvent) -> Result<&SessionState, SessionError> {
        let mut ctx = TransitionContext {
            config: &self.config,
            rng: &mut self.rng,
            snapshots: &self.snapshots,
        };
        let next = self.state.apply(event, &mut ctx)?;
        self.state = next;
        Ok(&self.state)
    }

    pub fn set_source(&mut self, source_id: impl Into<String>) -> Result<&SessionState, SessionError> {
        self.dispatch(SessionEvent::SetSource(source_id.into()))
    }

    /// Fetch the item list and start comparing.
    ///
    /// Also completes a pending import, in which case the session ends up
    /// `Finished`. A failed fetch leaves the session in `ErrorLoading` and
    /// returns the fetch error.
    pub async fn load(&mut self, source: &dyn ItemSource) -> Result<Phase, SessionError> {
        if self.state.phase() != Phase::Loading {
            self.dispatch(SessionEvent::StartLoading)?;
        }
        let source_id = self.state.username().to_string();
        match source.fetch_items(&source_id).await {
            Ok(items) => Ok(self.dispatch(SessionEvent::FinishLoading(items))?.phase()),
            Err(err) => {
                warn!(code = err.code(), "item fetch failed");
                self.dispatch(SessionEvent::LoadFailed(err.to_string()))?;
                Err(err.into())
            }
        }
    }

    pub fn decide(&mut self, winner: ItemId, loser: ItemId) -> Result<&SessionState, SessionError> {
        self.dispatch(SessionEvent::Decide { winner, loser })
    }

    /// Decide the current pair in favour of its left item.
    pub fn choose_left(&mut self) -> Result<&SessionState, SessionError> {
        let (winner, loser) = self.require_pair()?.left_wins();
        self.decide(winner, loser)
    }

    /// Decide the current pair in favour of its right item.
    pub fn choose_right(&mut self) -> Result<&SessionState, SessionError> {
        let (winner, loser) = self.require_pair()?.right_wins();
        self.decide(winner, loser)
    }

    fn require_pair(&self) -> Result<Pair, SessionError> {
        self.state
            .current_pair()
            .ok_or(SessionError::InvalidTransition {
                phase: self.state.phase(),
                event: "decide",
            })
    }

    pub fn undo(&mut self) -> Result<&SessionState, SessionError> {
        self.dispatch(SessionEvent::Undo)
    }

    pub fn save(&mut self) -> Result<&SessionState, SessionError> {
        self.dispatch(SessionEvent::Save)
    }

    pub fn restore(&mut self) -> Result<&SessionState, SessionError> {
        self.dispatch(SessionEvent::Restore)
    }

    pub fn delete_save(&mut self) -> Result<&SessionState, SessionError> {
        self.dispatch(SessionEvent::DeleteSave)
    }

    /// Validate an import document and seed the session from it.
    ///
    /// On success the session waits in `Loading` for the item list; call
    /// [`Session::load`] or [`Session::finish_import_offline`]. A rejected
    /// document moves the session to `ImportError` and nothing else changes.
    pub fn import_json(&mut self, raw: &str) -> Result<&SessionState, SessionError> {
        match parse_import(raw) {
            Ok(document) => self.dispatch(SessionEvent::ImportDone(document)),
            Err(err) => {
                // Outside the resting phases the state is kept and only the
                // document error is reported.
                let recorded = self.dispatch(SessionEvent::ImportFailed(err.to_string()));
                if let Err(rejected) = recorded {
                    debug!(error = %rejected, "import failure not recorded");
                }
                Err(err.into())
            }
        }
    }

    /// Finish a pending import with the titles carried by the document.
    pub fn finish_import_offline(&mut self) -> Result<&SessionState, SessionError> {
        self.dispatch(SessionEvent::FinishImportOffline)
    }

    /// Export a finished ranking.
    pub fn export(&self) -> Result<ImportDocument, SessionError> {
        if self.state.phase() != Phase::Finished {
            return Err(SessionError::NotFinished);
        }
        let store = self.state.store().ok_or(SessionError::NotFinished)?;
        let completed_at = self
            .state
            .completed_at()
            .unwrap_or_else(|| chrono::Utc::now().timestamp_millis());
        Ok(export_document(
            self.state.username(),
            store,
            self.state.counters(),
            completed_at,
            self.state.items(),
        ))
    }
}
