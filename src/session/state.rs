//! Session state and its single transition function.

use chrono::Utc;
use indexmap::IndexMap;
use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::snapshot::{SnapshotError, SnapshotStore, SAVE_SLOT};
use super::{SessionConfig, SessionError};
use crate::elo::{apply_decision, KFactorPolicy};
use crate::error::RankError;
use crate::pairing::{count_remaining_pairs, select_pair, Pair};
use crate::rating_store::{ItemId, RatingStore};
use crate::source::SourceItem;
use crate::transfer::ImportDocument;

/// Where the session is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    #[default]
    Idle,
    Loading,
    /// The last load failed; a new source or a retry goes back through `Idle`.
    ErrorLoading,
    /// The last import was rejected; the session is otherwise as before.
    ImportError,
    Comparing,
    Finished,
}

impl Phase {
    /// Phases from which a new load or import may begin.
    fn is_resting(self) -> bool {
        matches!(self, Self::Idle | Self::ErrorLoading | Self::ImportError)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Counters {
    pub total_initial_pairs: usize,
    pub total_remaining_pairs: usize,
    /// Decisions made by the user.
    pub manually_eliminated: usize,
    /// Results forced on losers of the loser.
    pub auto_eliminated_a: usize,
    /// Results forced on winners over the winner.
    pub auto_eliminated_b: usize,
}

impl Counters {
    pub fn automatic_total(&self) -> usize {
        self.auto_eliminated_a + self.auto_eliminated_b
    }

    pub fn resolved(&self) -> usize {
        self.total_initial_pairs.saturating_sub(self.total_remaining_pairs)
    }
}

/// Everything needed to roll back exactly one decision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UndoSnapshot {
    store: RatingStore,
    counters: Counters,
    current_pair: Option<Pair>,
}

/// One row of the results listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RankedEntry {
    /// 1-based position.
    pub rank: usize,
    pub id: ItemId,
    pub title: Option<String>,
    pub rating: i64,
    pub wins: usize,
    pub losses: usize,
}

/// Input to [`SessionState::apply`]. Every change to a session is one of these.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    SetSource(String),
    StartLoading,
    FinishLoading(Vec<SourceItem>),
    /// Complete a pending import without a fetched list.
    FinishImportOffline,
    LoadFailed(String),
    Decide { winner: ItemId, loser: ItemId },
    Undo,
    ImportDone(ImportDocument),
    ImportFailed(String),
    Save,
    Restore,
    DeleteSave,
}

impl SessionEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::SetSource(_) => "set_source",
            Self::StartLoading => "start_loading",
            Self::FinishLoading(_) => "finish_loading",
            Self::FinishImportOffline => "finish_import_offline",
            Self::LoadFailed(_) => "load_failed",
            Self::Decide { .. } => "decide",
            Self::Undo => "undo",
            Self::ImportDone(_) => "import_done",
            Self::ImportFailed(_) => "import_failed",
            Self::Save => "save",
            Self::Restore => "restore",
            Self::DeleteSave => "delete_save",
        }
    }
}

/// Collaborators a transition may use.
pub struct TransitionContext<'a, R: Rng> {
    pub config: &'a SessionConfig,
    pub rng: &'a mut R,
    pub snapshots: &'a dyn SnapshotStore,
}

/// The whole session: ratings, counters, current pair, undo slot and flags.
///
/// Values are immutable from the outside; [`SessionState::apply`] returns the
/// next state and leaves `self` as it was, even on failure.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SessionState {
    phase: Phase,
    username: String,
    items: IndexMap<ItemId, SourceItem>,
    store: Option<RatingStore>,
    counters: Counters,
    current_pair: Option<Pair>,
    previous: Option<UndoSnapshot>,
    completed_at: Option<i64>,
    k_factor: KFactorPolicy,
    saved: bool,
    import_pending: bool,
    last_error: Option<String>,
}

impl SessionState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    /// Display metadata for the ranked items.
    pub fn items(&self) -> &IndexMap<ItemId, SourceItem> {
        &self.items
    }

    pub fn title_of(&self, id: ItemId) -> Option<&str> {
        self.items
            .get(&id)
            .map(|item| item.title.as_str())
            .filter(|title| !title.is_empty())
    }

    pub fn store(&self) -> Option<&RatingStore> {
        self.store.as_ref()
    }

    pub fn counters(&self) -> &Counters {
        &self.counters
    }

    pub fn current_pair(&self) -> Option<Pair> {
        self.current_pair
    }

    pub fn can_undo(&self) -> bool {
        self.previous.is_some()
    }

    /// Completion time in epoch milliseconds.
    pub fn completed_at(&self) -> Option<i64> {
        self.completed_at
    }

    pub fn k_factor(&self) -> KFactorPolicy {
        self.k_factor
    }

    pub fn is_saved(&self) -> bool {
        self.saved
    }

    /// Message of the last failed load or import.
    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    /// Share of the initial pairs already resolved, in percent.
    pub fn progress(&self) -> f64 {
        if self.counters.total_initial_pairs == 0 {
            return if self.phase == Phase::Finished { 100.0 } else { 0.0 };
        }
        self.counters.resolved() as f64 / self.counters.total_initial_pairs as f64 * 100.0
    }

    /// Items by rating, highest first.
    pub fn results(&self) -> Vec<RankedEntry> {
        let Some(store) = &self.store else {
            return Vec::new();
        };
        store
            .ranked()
            .into_iter()
            .enumerate()
            .map(|(i, (id, record))| RankedEntry {
                rank: i + 1,
                id,
                title: self.title_of(id).map(str::to_string),
                rating: record.rating(),
                wins: record.won_against().len(),
                losses: record.lost_to().len(),
            })
            .collect()
    }

    /// Compute the state that follows `event`.
    ///
    /// Errors leave nothing changed: the caller keeps `self`.
    pub fn apply<R: Rng>(
        &self,
        event: SessionEvent,
        ctx: &mut TransitionContext<'_, R>,
    ) -> Result<SessionState, SessionError> {
        let event_name = event.name();
        let next = match event {
            SessionEvent::SetSource(source) => self.set_source(&source, event_name)?,
            SessionEvent::StartLoading => self.start_loading(event_name)?,
            SessionEvent::FinishLoading(items) => self.finish_loading(items, ctx, event_name)?,
            SessionEvent::FinishImportOffline => {
                self.require(&[Phase::Loading], event_name)?;
                if !self.import_pending {
                    return Err(self.invalid(event_name));
                }
                self.finish_import(IndexMap::new(), event_name)?
            }
            SessionEvent::LoadFailed(message) => {
                self.require(&[Phase::Loading], event_name)?;
                warn!(username = %self.username, error = %message, "load failed");
                SessionState {
                    phase: Phase::ErrorLoading,
                    import_pending: false,
                    last_error: Some(message),
                    ..self.clone()
                }
            }
            SessionEvent::Decide { winner, loser } => self.decide(winner, loser, ctx, event_name)?,
            SessionEvent::Undo => self.undo(event_name)?,
            SessionEvent::ImportDone(document) => self.import_done(document, event_name)?,
            SessionEvent::ImportFailed(message) => {
                if !self.phase.is_resting() {
                    return Err(self.invalid(event_name));
                }
                warn!(error = %message, "import rejected");
                SessionState {
                    phase: Phase::ImportError,
                    last_error: Some(message),
                    ..self.clone()
                }
            }
            SessionEvent::Save => {
                if self.phase == Phase::Loading {
                    return Err(self.invalid(event_name));
                }
                let mut next = self.clone();
                next.saved = true;
                let blob = serde_json::to_string(&next)
                    .map_err(|e| SnapshotError::Serde(e.to_string()))?;
                ctx.snapshots.put(SAVE_SLOT, &blob)?;
                info!(phase = ?next.phase, bytes = blob.len(), "session saved");
                next
            }
            SessionEvent::Restore => {
                if self.phase == Phase::Loading {
                    return Err(self.invalid(event_name));
                }
                let blob = ctx.snapshots.get(SAVE_SLOT)?.ok_or(SessionError::NoSave)?;
                let mut restored: SessionState = serde_json::from_str(&blob)
                    .map_err(|e| SnapshotError::Serde(e.to_string()))?;
                if let Some(store) = &restored.store {
                    store.check_invariants()?;
                }
                restored.saved = true;
                info!(phase = ?restored.phase, "session restored");
                restored
            }
            SessionEvent::DeleteSave => {
                ctx.snapshots.delete(SAVE_SLOT)?;
                info!("saved session deleted");
                self.clone()
            }
        };
        Ok(next)
    }

    fn require(&self, allowed: &[Phase], event: &'static str) -> Result<(), SessionError> {
        if allowed.contains(&self.phase) {
            Ok(())
        } else {
            Err(self.invalid(event))
        }
    }

    fn invalid(&self, event: &'static str) -> SessionError {
        SessionError::InvalidTransition {
            phase: self.phase,
            event,
        }
    }

    fn set_source(&self, source: &str, event: &'static str) -> Result<SessionState, SessionError> {
        if !(self.phase.is_resting() || self.phase == Phase::Finished) {
            return Err(self.invalid(event));
        }
        let username = source.trim();
        if username.is_empty() {
            return Err(RankError::invalid_input("source identifier must not be empty").into());
        }
        Ok(SessionState {
            username: username.to_string(),
            ..SessionState::default()
        })
    }

    fn start_loading(&self, event: &'static str) -> Result<SessionState, SessionError> {
        if !self.phase.is_resting() {
            return Err(self.invalid(event));
        }
        if self.username.trim().is_empty() {
            return Err(RankError::invalid_input("source identifier must not be empty").into());
        }
        info!(username = %self.username, "loading item list");
        Ok(SessionState {
            phase: Phase::Loading,
            import_pending: false,
            last_error: None,
            ..self.clone()
        })
    }

    fn finish_loading<R: Rng>(
        &self,
        items: Vec<SourceItem>,
        ctx: &mut TransitionContext<'_, R>,
        event: &'static str,
    ) -> Result<SessionState, SessionError> {
        self.require(&[Phase::Loading], event)?;

        let mut eligible: IndexMap<ItemId, SourceItem> = IndexMap::new();
        for item in items {
            if item.watching_status == ctx.config.eligible_status {
                eligible.insert(item.mal_id, item);
            }
        }

        if eligible.len() < 2 {
            warn!(eligible = eligible.len(), "not enough items to rank");
            let failed = SessionState {
                phase: Phase::ErrorLoading,
                import_pending: false,
                last_error: Some(format!(
                    "need at least 2 completed items, found {}",
                    eligible.len()
                )),
                ..self.clone()
            };
            // An abandoned import leaves nothing of the document behind.
            if self.import_pending {
                return Ok(SessionState {
                    items: IndexMap::new(),
                    store: None,
                    counters: Counters::default(),
                    completed_at: None,
                    ..failed
                });
            }
            return Ok(failed);
        }

        if self.import_pending {
            return self.finish_import(eligible, event);
        }

        let store = RatingStore::initialize(eligible.keys().copied())?;
        let selection = select_pair(&store, None, &mut *ctx.rng);
        info!(
            items = store.len(),
            pairs = selection.remaining,
            "comparison started"
        );
        Ok(SessionState {
            phase: Phase::Comparing,
            username: self.username.clone(),
            items: eligible,
            store: Some(store),
            counters: Counters {
                total_initial_pairs: selection.remaining,
                total_remaining_pairs: selection.remaining,
                ..Counters::default()
            },
            current_pair: selection.pair,
            previous: None,
            completed_at: None,
            k_factor: ctx.config.k_factor,
            saved: false,
            import_pending: false,
            last_error: None,
        })
    }

    /// Settle a pending import as `Finished`, taking fresher titles from
    /// `fetched` for items the imported store knows.
    fn finish_import(
        &self,
        fetched: IndexMap<ItemId, SourceItem>,
        event: &'static str,
    ) -> Result<SessionState, SessionError> {
        let Some(store) = &self.store else {
            return Err(self.invalid(event));
        };
        let mut display = self.items.clone();
        for (id, item) in fetched {
            if store.contains(id) {
                display.insert(id, item);
            }
        }
        info!(items = store.len(), "imported ranking loaded");
        Ok(SessionState {
            phase: Phase::Finished,
            items: display,
            current_pair: None,
            previous: None,
            import_pending: false,
            last_error: None,
            ..self.clone()
        })
    }

    fn decide<R: Rng>(
        &self,
        winner: ItemId,
        loser: ItemId,
        ctx: &mut TransitionContext<'_, R>,
        event: &'static str,
    ) -> Result<SessionState, SessionError> {
        self.require(&[Phase::Comparing], event)?;
        let Some(store) = &self.store else {
            return Err(self.invalid(event));
        };

        let outcome = apply_decision(store, winner, loser, self.k_factor)?;
        let selection = select_pair(&outcome.store, self.current_pair.as_ref(), &mut *ctx.rng);

        let counters = Counters {
            total_initial_pairs: self.counters.total_initial_pairs,
            total_remaining_pairs: selection.remaining,
            manually_eliminated: self.counters.manually_eliminated + 1,
            auto_eliminated_a: self.counters.auto_eliminated_a + outcome.auto_count_a,
            auto_eliminated_b: self.counters.auto_eliminated_b + outcome.auto_count_b,
        };
        debug!(
            winner,
            loser,
            remaining = selection.remaining,
            automatic = outcome.auto_total(),
            "decision recorded"
        );

        let (phase, completed_at) = if selection.is_complete() {
            info!(
                manual = counters.manually_eliminated,
                automatic = counters.automatic_total(),
                "ranking finished"
            );
            (Phase::Finished, Some(Utc::now().timestamp_millis()))
        } else {
            (Phase::Comparing, None)
        };

        Ok(SessionState {
            phase,
            store: Some(outcome.store),
            counters,
            current_pair: selection.pair,
            previous: Some(UndoSnapshot {
                store: store.clone(),
                counters: self.counters,
                current_pair: self.current_pair,
            }),
            completed_at,
            saved: false,
            ..self.clone()
        })
    }

    fn undo(&self, event: &'static str) -> Result<SessionState, SessionError> {
        self.require(&[Phase::Comparing, Phase::Finished], event)?;
        let Some(snapshot) = &self.previous else {
            return Err(SessionError::NoUndo);
        };
        debug!("decision undone");
        Ok(SessionState {
            phase: Phase::Comparing,
            store: Some(snapshot.store.clone()),
            counters: snapshot.counters,
            current_pair: snapshot.current_pair,
            previous: None,
            completed_at: None,
            saved: false,
            ..self.clone()
        })
    }

    fn import_done(
        &self,
        document: ImportDocument,
        event: &'static str,
    ) -> Result<SessionState, SessionError> {
        if !self.phase.is_resting() {
            return Err(self.invalid(event));
        }
        let store = document.to_store()?;
        let items = document
            .display_items()
            .into_iter()
            .map(|item| (item.mal_id, item))
            .collect();
        let remaining = count_remaining_pairs(&store);
        info!(username = %document.username, items = store.len(), "import accepted");

        Ok(SessionState {
            phase: Phase::Loading,
            username: document.username,
            items,
            store: Some(store),
            counters: Counters {
                total_initial_pairs: document.total_initial_pairs as usize,
                total_remaining_pairs: remaining,
                manually_eliminated: document.manually_eliminated_count as usize,
                auto_eliminated_a: document.auto_eliminated_count_a as usize,
                auto_eliminated_b: document.auto_eliminated_count_b as usize,
            },
            current_pair: None,
            previous: None,
            completed_at: Some(document.completed_timestamp),
            k_factor: self.k_factor,
            saved: false,
            import_pending: true,
            last_error: None,
        })
    }
}
