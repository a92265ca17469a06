//! In-memory saved stops, their display list, and settings.

use std::collections::{HashMap, HashSet};

use anyhow::Result;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::{
    models::{append_unseen, DisplayStop, SavedStop, StopKey},
    reconcile::{CycleOutcome, GenerationCounter},
    storage::StopPersistence,
};

/// Default bound on favorites selected per stop.
pub const DEFAULT_MAX_FAVORITES: u8 = 5;
/// Largest accepted favorites bound.
pub const MAX_FAVORITES_LIMIT: u8 = 20;

/// Store operations that are rejected without changing state.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum StoreError {
    /// A stop with the same id is already saved.
    #[error("'{stop_name}' is already on the dashboard")]
    DuplicateStop {
        /// Name of the stop that was being added.
        stop_name: String,
    },
    /// The stop came from a search result without an id.
    #[error("stop has no identifier and cannot be tracked")]
    MissingStopId,
    /// Settings input outside `1..=20` or not a number.
    #[error("max favorites must be a number between 1 and 20, got '{0}'")]
    InvalidMaxFavorites(String),
}

/// What `remove_favorite_bus` ended up doing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FavoriteRemoval {
    /// The route was removed; the stop keeps other favorites.
    Removed,
    /// The route was the last favorite, so the stop was removed too.
    StopRemoved,
    /// No such stop or route.
    NotFound,
}

/// Whether a cycle outcome was applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitStatus {
    /// The outcome replaced the display list.
    Applied,
    /// A newer cycle had started; the outcome was dropped.
    Stale,
}

/// Single source of truth for saved stops and what is shown for them.
#[derive(Debug, Clone)]
pub struct StopStore {
    stops: Vec<SavedStop>,
    display: Vec<DisplayStop>,
    max_favorites: u8,
    dirty: bool,
}

impl Default for StopStore {
    fn default() -> Self {
        Self::new(Vec::new(), DEFAULT_MAX_FAVORITES)
    }
}

impl StopStore {
    /// Build a store from persisted stops. Stops get placeholder arrivals until
    /// the first refresh commits.
    pub fn new(mut stops: Vec<SavedStop>, max_favorites: u8) -> Self {
        let mut repaired = false;
        for stop in &mut stops {
            repaired |= stop.normalize();
        }
        let display = stops
            .iter()
            .cloned()
            .map(DisplayStop::without_live_data)
            .collect();
        Self {
            stops,
            display,
            max_favorites: clamp_max_favorites(max_favorites),
            dirty: repaired,
        }
    }

    /// Load stops and settings through the persistence hooks.
    ///
    /// Missing entries fall back to an empty list and the default bound.
    pub fn load(persistence: &dyn StopPersistence) -> Result<Self> {
        let stops = persistence.load_stops()?.unwrap_or_default();
        let max_favorites = persistence
            .load_max_favorites()?
            .unwrap_or(DEFAULT_MAX_FAVORITES);
        info!(stops = stops.len(), max_favorites, "stop store loaded");
        Ok(Self::new(stops, max_favorites))
    }

    /// Saved stops in insertion order.
    pub fn saved_stops(&self) -> &[SavedStop] {
        &self.stops
    }

    /// Display entries, one per saved stop, in the same order.
    pub fn display_stops(&self) -> &[DisplayStop] {
        &self.display
    }

    /// Current bound on favorites selected when adding a stop.
    pub fn max_favorites(&self) -> u8 {
        self.max_favorites
    }

    /// Whether there are unsaved changes.
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Append a stop unless one with the same id exists.
    pub fn add_stop(&mut self, stop: SavedStop) -> Result<(), StoreError> {
        if stop.stop_id.trim().is_empty() {
            return Err(StoreError::MissingStopId);
        }
        if self.stops.iter().any(|saved| saved.stop_id == stop.stop_id) {
            debug!(stop_id = %stop.stop_id, "duplicate stop rejected");
            return Err(StoreError::DuplicateStop {
                stop_name: stop.stop_name,
            });
        }
        let mut stop = stop;
        stop.normalize();
        info!(stop_id = %stop.stop_id, favorites = stop.favorite_buses.len(), "stop added");
        self.display.push(DisplayStop::without_live_data(stop.clone()));
        self.stops.push(stop);
        self.dirty = true;
        Ok(())
    }

    /// Remove a stop and its display entry. Returns `false` if it was not saved.
    pub fn remove_stop(&mut self, stop_id: &str) -> bool {
        let before = self.stops.len();
        self.stops.retain(|stop| stop.stop_id != stop_id);
        self.display.retain(|entry| entry.stop.stop_id != stop_id);
        let removed = self.stops.len() != before;
        if removed {
            info!(stop_id, "stop removed");
            self.dirty = true;
        }
        removed
    }

    /// Stop tracking a route at a stop, removing the stop once no favorite is left.
    pub fn remove_favorite_bus(&mut self, stop_id: &str, route_id: &str) -> FavoriteRemoval {
        let Some(stop) = self.stops.iter_mut().find(|stop| stop.stop_id == stop_id) else {
            return FavoriteRemoval::NotFound;
        };
        let before = stop.favorite_buses.len();
        stop.favorite_buses.retain(|bus| bus.route_id != route_id);
        if stop.favorite_buses.len() == before {
            return FavoriteRemoval::NotFound;
        }
        if stop.favorite_buses.is_empty() {
            self.remove_stop(stop_id);
            return FavoriteRemoval::StopRemoved;
        }
        let favorites = stop.favorite_buses.clone();
        if let Some(entry) = self
            .display
            .iter_mut()
            .find(|entry| entry.stop.stop_id == stop_id)
        {
            entry.stop.favorite_buses = favorites;
            entry.arrivals.retain(|arrival| arrival.route_id != route_id);
        }
        info!(stop_id, route_id, "favorite removed");
        self.dirty = true;
        FavoriteRemoval::Removed
    }

    /// Change the favorites bound. Existing stops keep their favorites.
    pub fn set_max_favorites(&mut self, value: u8) -> Result<(), StoreError> {
        if !(1..=MAX_FAVORITES_LIMIT).contains(&value) {
            return Err(StoreError::InvalidMaxFavorites(value.to_string()));
        }
        if value != self.max_favorites {
            self.max_favorites = value;
            self.dirty = true;
        }
        Ok(())
    }

    /// Validate raw settings input and apply it.
    pub fn set_max_favorites_from_input(&mut self, input: &str) -> Result<u8, StoreError> {
        let value = parse_max_favorites(input)?;
        self.set_max_favorites(value)?;
        Ok(value)
    }

    /// Apply a refresh outcome if no newer cycle has started.
    ///
    /// The outcome is merged into the stops as they are now: stops removed
    /// while the cycle ran are skipped, stops added meanwhile keep their
    /// current entry, and arrivals are filtered with the current favorites.
    pub fn commit(&mut self, outcome: CycleOutcome, generations: &GenerationCounter) -> CommitStatus {
        if !generations.is_current(outcome.generation) {
            debug!(
                generation = outcome.generation.value(),
                current = generations.current().value(),
                "discarding stale refresh result"
            );
            return CommitStatus::Stale;
        }

        let mut results: HashMap<StopKey, _> = outcome
            .stops
            .into_iter()
            .map(|result| (result.key.clone(), result))
            .collect();
        let mut previous: HashMap<StopKey, DisplayStop> = self
            .display
            .drain(..)
            .map(|entry| (entry.stop.key(), entry))
            .collect();

        let mut grown = false;
        let mut display = Vec::with_capacity(self.stops.len());
        for stop in &mut self.stops {
            let key = stop.key();
            match results.remove(&key) {
                Some(result) => {
                    // The stop may have been replaced mid-cycle; union rather than overwrite.
                    let mut seen: HashSet<String> = stop
                        .all_discovered_buses
                        .iter()
                        .map(|bus| bus.route_id.clone())
                        .collect();
                    let appended = append_unseen(
                        &mut stop.all_discovered_buses,
                        &mut seen,
                        result.discovered.iter().cloned(),
                    );
                    let repaired = stop.normalize();
                    grown |= appended || repaired;
                    let arrivals = result.arrivals_for(stop);
                    display.push(DisplayStop {
                        stop: stop.clone(),
                        arrivals,
                    });
                }
                None => display.push(
                    previous
                        .remove(&key)
                        .unwrap_or_else(|| DisplayStop::without_live_data(stop.clone())),
                ),
            }
        }
        self.display = display;
        if grown {
            self.dirty = true;
        }
        debug!(generation = outcome.generation.value(), "refresh result committed");
        CommitStatus::Applied
    }

    /// Persist the full snapshot if anything changed.
    ///
    /// A failed write is logged and leaves the store dirty so the next trigger
    /// retries it. Returns whether a write succeeded.
    pub fn flush(&mut self, persistence: &dyn StopPersistence) -> bool {
        if !self.dirty {
            return false;
        }
        let result = persistence
            .save_stops(&self.stops)
            .and_then(|()| persistence.save_max_favorites(self.max_favorites));
        match result {
            Ok(()) => {
                self.dirty = false;
                debug!(stops = self.stops.len(), "stop store persisted");
                true
            }
            Err(err) => {
                warn!(error = %format!("{err:#}"), "failed to persist stops; will retry");
                false
            }
        }
    }
}

/// Parse settings input for the favorites bound.
pub fn parse_max_favorites(input: &str) -> Result<u8, StoreError> {
    let trimmed = input.trim();
    trimmed
        .parse::<u8>()
        .ok()
        .filter(|value| (1..=MAX_FAVORITES_LIMIT).contains(value))
        .ok_or_else(|| StoreError::InvalidMaxFavorites(trimmed.to_string()))
}

fn clamp_max_favorites(value: u8) -> u8 {
    if (1..=MAX_FAVORITES_LIMIT).contains(&value) {
        value
    } else {
        warn!(value, "ignoring out-of-range max favorites");
        DEFAULT_MAX_FAVORITES
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::{
        models::{ArrivalInfo, FavoriteBus},
        reconcile::{run_cycle, ReconcileEngine},
        storage::{FileStorage, MemoryStorage},
        transit::testing::ScriptedSource,
    };
    use tempfile::tempdir;
    use tokio::sync::mpsc;

    fn stop(stop_id: &str, favorites: &[(&str, &str)]) -> SavedStop {
        SavedStop::new(
            stop_id,
            format!("Stop {stop_id}"),
            "25",
            favorites
                .iter()
                .map(|(id, no)| FavoriteBus::new(*id, *no))
                .collect(),
            Vec::new(),
        )
    }

    fn arrival(route_id: &str, route_no: &str, arr_time: i32) -> ArrivalInfo {
        ArrivalInfo {
            route_id: route_id.to_string(),
            route_no: route_no.to_string(),
            arr_time,
            remaining_stops: 1,
        }
    }

    #[test]
    fn duplicate_add_leaves_store_unchanged() {
        let mut store = StopStore::default();
        store.add_stop(stop("100", &[("R1", "10")])).unwrap();
        let before = store.clone();

        let err = store
            .add_stop(stop("100", &[("R2", "20")]))
            .unwrap_err();

        assert_eq!(
            err,
            StoreError::DuplicateStop {
                stop_name: "Stop 100".to_string()
            }
        );
        assert_eq!(store.saved_stops(), before.saved_stops());
        assert_eq!(store.display_stops(), before.display_stops());
    }

    #[test]
    fn stop_without_id_is_rejected() {
        let mut store = StopStore::default();
        assert_eq!(
            store.add_stop(stop("", &[("R1", "10")])),
            Err(StoreError::MissingStopId)
        );
        assert!(store.saved_stops().is_empty());
    }

    #[test]
    fn added_stop_shows_placeholder_arrivals() {
        let mut store = StopStore::default();
        store
            .add_stop(stop("100", &[("R1", "10"), ("R2", "20")]))
            .unwrap();
        let arrivals = &store.display_stops()[0].arrivals;
        assert_eq!(arrivals.len(), 2);
        assert!(arrivals.iter().all(|a| !a.has_live_data()));
        assert!(store.is_dirty());
    }

    #[test]
    fn removing_a_favorite_updates_display() {
        let mut store = StopStore::default();
        store
            .add_stop(stop("100", &[("R1", "10"), ("R2", "20")]))
            .unwrap();

        assert_eq!(store.remove_favorite_bus("100", "R1"), FavoriteRemoval::Removed);

        let entry = &store.display_stops()[0];
        assert_eq!(entry.arrivals.len(), 1);
        assert_eq!(entry.arrivals[0].route_id, "R2");
        assert_eq!(store.saved_stops()[0].favorite_buses.len(), 1);
        // Discovery history is kept.
        assert_eq!(store.saved_stops()[0].all_discovered_buses.len(), 2);
    }

    #[test]
    fn removing_last_favorite_removes_stop_everywhere() -> Result<()> {
        let dir = tempdir()?;
        let storage = FileStorage::new(dir.path());
        let mut store = StopStore::default();
        store.add_stop(stop("100", &[("R1", "10")])).unwrap();
        store.add_stop(stop("200", &[("R5", "50")])).unwrap();
        assert!(store.flush(&storage));

        assert_eq!(
            store.remove_favorite_bus("100", "R1"),
            FavoriteRemoval::StopRemoved
        );
        assert!(store.flush(&storage));

        assert!(store.saved_stops().iter().all(|s| s.stop_id != "100"));
        assert!(store.display_stops().iter().all(|d| d.stop.stop_id != "100"));
        let reloaded = StopStore::load(&storage)?;
        assert_eq!(reloaded.saved_stops().len(), 1);
        assert_eq!(reloaded.saved_stops()[0].stop_id, "200");
        Ok(())
    }

    #[test]
    fn removing_unknown_favorite_is_reported() {
        let mut store = StopStore::default();
        store.add_stop(stop("100", &[("R1", "10")])).unwrap();
        assert_eq!(store.remove_favorite_bus("100", "R9"), FavoriteRemoval::NotFound);
        assert_eq!(store.remove_favorite_bus("999", "R1"), FavoriteRemoval::NotFound);
        assert_eq!(store.saved_stops().len(), 1);
    }

    #[test]
    fn max_favorites_is_validated() {
        let mut store = StopStore::default();
        assert_eq!(store.max_favorites(), DEFAULT_MAX_FAVORITES);
        assert!(store.set_max_favorites(0).is_err());
        assert!(store.set_max_favorites(21).is_err());
        assert_eq!(store.set_max_favorites_from_input(" 12 "), Ok(12));
        assert!(matches!(
            store.set_max_favorites_from_input("many"),
            Err(StoreError::InvalidMaxFavorites(_))
        ));
        assert_eq!(store.max_favorites(), 12);
    }

    #[test]
    fn lowering_max_favorites_keeps_existing_favorites() {
        let mut store = StopStore::default();
        store
            .add_stop(stop("100", &[("R1", "10"), ("R2", "20"), ("R3", "30")]))
            .unwrap();
        store.set_max_favorites(1).unwrap();
        assert_eq!(store.saved_stops()[0].favorite_buses.len(), 3);
    }

    #[tokio::test]
    async fn commit_applies_current_generation() {
        let source = Arc::new(ScriptedSource::default());
        source.set_routes("100", vec![FavoriteBus::new("R1", "10"), FavoriteBus::new("R2", "20")]);
        source.set_arrivals("100", vec![arrival("R1", "10", 4)]);
        let engine = ReconcileEngine::new(source);
        let mut store = StopStore::default();
        store.add_stop(stop("100", &[("R1", "10")])).unwrap();
        store.flush(&MemoryStorage::default());

        let outcome = engine.run(store.saved_stops()).await;

        assert_eq!(store.commit(outcome, &engine.generations()), CommitStatus::Applied);
        assert_eq!(store.display_stops()[0].arrivals, vec![arrival("R1", "10", 4)]);
        assert_eq!(store.saved_stops()[0].all_discovered_buses.len(), 2);
        assert!(store.is_dirty());
    }

    #[tokio::test]
    async fn older_cycle_finishing_late_is_discarded() {
        let source = ScriptedSource::default();
        source.set_routes("100", vec![FavoriteBus::new("R1", "10")]);
        let gate = source.gate("100");
        source.set_arrivals("100", vec![arrival("R1", "10", 9)]);
        let engine = ReconcileEngine::new(Arc::new(source.clone()));
        let mut store = StopStore::default();
        store.add_stop(stop("100", &[("R1", "10")])).unwrap();
        let (tx, mut rx) = mpsc::channel(4);

        // Cycle A blocks on its arrival fetch.
        let first = engine.start_cycle(store.saved_stops().to_vec(), tx.clone());
        while source.arrival_calls() == 0 {
            tokio::task::yield_now().await;
        }
        // Cycle B starts later and completes first with fresher data.
        source.set_arrivals("100", vec![arrival("R1", "10", 2)]);
        let second = engine.start_cycle(store.saved_stops().to_vec(), tx);
        assert!(second > first);

        let outcome_b = rx.recv().await.unwrap();
        assert_eq!(outcome_b.generation, second);
        assert_eq!(
            store.commit(outcome_b, &engine.generations()),
            CommitStatus::Applied
        );

        gate.notify_one();
        let outcome_a = rx.recv().await.unwrap();
        assert_eq!(outcome_a.generation, first);
        assert_eq!(
            store.commit(outcome_a, &engine.generations()),
            CommitStatus::Stale
        );
        assert_eq!(store.display_stops()[0].arrivals, vec![arrival("R1", "10", 2)]);
    }

    #[tokio::test]
    async fn commit_respects_changes_made_during_the_cycle() {
        let source = ScriptedSource::default();
        source.set_arrivals("100", vec![arrival("R1", "10", 3), arrival("R2", "20", 6)]);
        source.set_arrivals("200", vec![arrival("R5", "50", 1)]);
        let counter = GenerationCounter::new();
        let mut store = StopStore::default();
        store
            .add_stop(stop("100", &[("R1", "10"), ("R2", "20")]))
            .unwrap();
        store.add_stop(stop("200", &[("R5", "50")])).unwrap();

        let generation = counter.begin();
        let outcome = run_cycle(&source, generation, store.saved_stops()).await;

        // While the cycle was in flight the user edited the dashboard.
        store.remove_favorite_bus("100", "R1");
        store.remove_stop("200");
        store.add_stop(stop("300", &[("R7", "70")])).unwrap();

        assert_eq!(store.commit(outcome, &counter), CommitStatus::Applied);
        let ids: Vec<_> = store
            .display_stops()
            .iter()
            .map(|d| d.stop.stop_id.as_str())
            .collect();
        assert_eq!(ids, ["100", "300"]);
        assert_eq!(store.display_stops()[0].arrivals, vec![arrival("R2", "20", 6)]);
        assert!(!store.display_stops()[1].arrivals[0].has_live_data());
    }

    #[tokio::test]
    async fn commit_keeps_routes_of_stop_readded_mid_cycle() {
        let source = ScriptedSource::default();
        source.set_arrivals("100", vec![arrival("R5", "50", 4)]);
        let counter = GenerationCounter::new();
        let mut store = StopStore::default();
        store.add_stop(stop("100", &[("R1", "10")])).unwrap();

        let generation = counter.begin();
        let outcome = run_cycle(&source, generation, store.saved_stops()).await;

        // Same identity, different routes.
        store.remove_stop("100");
        store
            .add_stop(SavedStop::new(
                "100",
                "Stop 100",
                "25",
                vec![FavoriteBus::new("R5", "50")],
                vec![FavoriteBus::new("R5", "50"), FavoriteBus::new("R6", "60")],
            ))
            .unwrap();
        store.flush(&MemoryStorage::default());

        assert_eq!(store.commit(outcome, &counter), CommitStatus::Applied);
        let saved = &store.saved_stops()[0];
        let routes: Vec<_> = saved
            .all_discovered_buses
            .iter()
            .map(|bus| bus.route_id.as_str())
            .collect();
        assert_eq!(routes, ["R5", "R6", "R1"]);
        assert_eq!(saved.favorite_buses, vec![FavoriteBus::new("R5", "50")]);
        assert_eq!(store.display_stops()[0].arrivals, vec![arrival("R5", "50", 4)]);
        assert!(store.is_dirty());
    }

    #[tokio::test]
    async fn commit_without_new_routes_leaves_store_clean() {
        let source = ScriptedSource::default();
        source.set_routes("100", vec![FavoriteBus::new("R1", "10")]);
        let counter = GenerationCounter::new();
        let mut store = StopStore::default();
        store.add_stop(stop("100", &[("R1", "10")])).unwrap();
        store.flush(&MemoryStorage::default());

        let generation = counter.begin();
        let outcome = run_cycle(&source, generation, store.saved_stops()).await;

        assert_eq!(store.commit(outcome, &counter), CommitStatus::Applied);
        assert!(!store.is_dirty());
    }

    #[test]
    fn failed_flush_stays_dirty_and_retries() {
        let storage = MemoryStorage::default();
        storage.fail_writes(true);
        let mut store = StopStore::default();
        store.add_stop(stop("100", &[("R1", "10")])).unwrap();

        assert!(!store.flush(&storage));
        assert!(store.is_dirty());

        storage.fail_writes(false);
        assert!(store.flush(&storage));
        assert!(!store.is_dirty());
        assert_eq!(storage.stops().map(|s| s.len()), Some(1));
        assert!(!store.flush(&storage));
    }
}
