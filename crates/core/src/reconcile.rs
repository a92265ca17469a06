//! Merging of live transit data into saved stops.
//!
//! A refresh cycle snapshots the saved stops, fetches the route list and the
//! live arrivals of every stop concurrently, and produces one
//! [`StopReconciliation`] per stop. Cycles are tagged with a [`Generation`]
//! taken when the cycle starts; the store only commits the outcome of the most
//! recently started cycle (see [`GenerationCounter`]).

use std::{
    collections::{HashMap, HashSet},
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
};

use futures::future::join_all;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::{
    models::{append_unseen, ArrivalInfo, DisplayStop, FavoriteBus, SavedStop, StopKey},
    transit::TransitSource,
};

/// Tag of one refresh cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Generation(u64);

impl Generation {
    /// Raw counter value.
    pub fn value(self) -> u64 {
        self.0
    }
}

/// Monotonic counter shared between the engine and the store commit.
#[derive(Debug, Default)]
pub struct GenerationCounter {
    current: AtomicU64,
}

impl GenerationCounter {
    /// Create a counter that has not started any cycle.
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a new cycle and return its tag.
    pub fn begin(&self) -> Generation {
        Generation(self.current.fetch_add(1, Ordering::SeqCst) + 1)
    }

    /// Tag of the most recently started cycle.
    pub fn current(&self) -> Generation {
        Generation(self.current.load(Ordering::SeqCst))
    }

    /// Whether no cycle has started since `generation`.
    pub fn is_current(&self, generation: Generation) -> bool {
        self.current() == generation
    }
}

/// Result of merging one stop's live data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StopReconciliation {
    /// Stop the result belongs to.
    pub key: StopKey,
    /// Discovered routes after the union, in discovery order.
    pub discovered: Vec<FavoriteBus>,
    /// One arrival per discovered route, live or placeholder.
    pub merged: Vec<ArrivalInfo>,
}

impl StopReconciliation {
    /// Arrivals to show for `stop`, in favorite order.
    ///
    /// Falls back to every discovered route when the stop has no favorites.
    pub fn arrivals_for(&self, stop: &SavedStop) -> Vec<ArrivalInfo> {
        if stop.favorite_buses.is_empty() {
            return self.merged.clone();
        }
        let by_route: HashMap<&str, &ArrivalInfo> = self
            .merged
            .iter()
            .map(|arrival| (arrival.route_id.as_str(), arrival))
            .collect();
        stop.favorite_buses
            .iter()
            .map(|bus| {
                by_route
                    .get(bus.route_id.as_str())
                    .map(|arrival| (*arrival).clone())
                    .unwrap_or_else(|| ArrivalInfo::no_live_data(bus))
            })
            .collect()
    }
}

/// Merge live data into one stop.
///
/// The discovered list is the previous one, extended with routes first seen
/// in `live_routes`, then in `live_arrivals`, then any favorite it is still
/// missing. It never shrinks and keeps discovery order.
pub fn reconcile(
    stop: &SavedStop,
    live_routes: &[FavoriteBus],
    live_arrivals: &[ArrivalInfo],
) -> StopReconciliation {
    let mut discovered = Vec::with_capacity(stop.all_discovered_buses.len());
    let mut seen = HashSet::new();
    append_unseen(
        &mut discovered,
        &mut seen,
        stop.all_discovered_buses.iter().cloned(),
    );
    append_unseen(&mut discovered, &mut seen, live_routes.iter().cloned());
    append_unseen(
        &mut discovered,
        &mut seen,
        live_arrivals.iter().map(ArrivalInfo::bus),
    );
    append_unseen(&mut discovered, &mut seen, stop.favorite_buses.iter().cloned());

    let mut live: HashMap<&str, &ArrivalInfo> = HashMap::new();
    for arrival in live_arrivals {
        // Several vehicles of one route may be reported; show the soonest.
        live.entry(arrival.route_id.as_str())
            .and_modify(|current| {
                if arrival.arr_time < current.arr_time {
                    *current = arrival;
                }
            })
            .or_insert(arrival);
    }

    let merged = discovered
        .iter()
        .map(|bus| {
            live.get(bus.route_id.as_str())
                .map(|arrival| (*arrival).clone())
                .unwrap_or_else(|| ArrivalInfo::no_live_data(bus))
        })
        .collect();

    StopReconciliation {
        key: stop.key(),
        discovered,
        merged,
    }
}

/// Merge live data into one stop and return the updated stop with its display entry.
pub fn reconcile_stop(
    stop: &SavedStop,
    live_routes: &[FavoriteBus],
    live_arrivals: &[ArrivalInfo],
) -> (SavedStop, DisplayStop) {
    let result = reconcile(stop, live_routes, live_arrivals);
    let arrivals = result.arrivals_for(stop);
    let mut updated = stop.clone();
    updated.all_discovered_buses = result.discovered;
    let display = DisplayStop {
        stop: updated.clone(),
        arrivals,
    };
    (updated, display)
}

/// Everything one refresh cycle produced.
#[derive(Debug, Clone)]
pub struct CycleOutcome {
    /// Tag taken when the cycle started.
    pub generation: Generation,
    /// One result per stop in the snapshot, in snapshot order.
    pub stops: Vec<StopReconciliation>,
}

/// Runs refresh cycles against a transit source.
#[derive(Clone)]
pub struct ReconcileEngine {
    source: Arc<dyn TransitSource>,
    generations: Arc<GenerationCounter>,
}

impl ReconcileEngine {
    /// Create an engine with its own generation counter.
    pub fn new(source: Arc<dyn TransitSource>) -> Self {
        Self {
            source,
            generations: Arc::new(GenerationCounter::new()),
        }
    }

    /// Counter the store must consult when committing an outcome.
    pub fn generations(&self) -> Arc<GenerationCounter> {
        Arc::clone(&self.generations)
    }

    /// Transit source backing the engine.
    pub fn source(&self) -> Arc<dyn TransitSource> {
        Arc::clone(&self.source)
    }

    /// Tag a new cycle and run it on a background task.
    ///
    /// The generation is taken before this returns, so a cycle started later
    /// always supersedes this one regardless of which finishes first. The
    /// outcome is delivered on `sender`.
    pub fn start_cycle(
        &self,
        stops: Vec<SavedStop>,
        sender: mpsc::Sender<CycleOutcome>,
    ) -> Generation {
        let generation = self.generations.begin();
        let source = Arc::clone(&self.source);
        tokio::spawn(async move {
            let outcome = run_cycle(source.as_ref(), generation, &stops).await;
            if sender.send(outcome).await.is_err() {
                debug!(generation = generation.value(), "cycle receiver dropped");
            }
        });
        generation
    }

    /// Tag a new cycle and run it on the current task.
    pub async fn run(&self, stops: &[SavedStop]) -> CycleOutcome {
        let generation = self.generations.begin();
        run_cycle(self.source.as_ref(), generation, stops).await
    }
}

/// Fetch and merge every stop of the snapshot concurrently.
pub async fn run_cycle(
    source: &dyn TransitSource,
    generation: Generation,
    stops: &[SavedStop],
) -> CycleOutcome {
    debug!(generation = generation.value(), stops = stops.len(), "refresh cycle started");
    let results = join_all(stops.iter().map(|stop| refresh_stop(source, stop))).await;
    info!(generation = generation.value(), stops = results.len(), "refresh cycle finished");
    CycleOutcome {
        generation,
        stops: results,
    }
}

async fn refresh_stop(source: &dyn TransitSource, stop: &SavedStop) -> StopReconciliation {
    let (live_routes, live_arrivals) = tokio::join!(
        source.routes_for_stop(&stop.stop_id, &stop.city_code),
        source.arrivals(&stop.stop_id, &stop.city_code),
    );
    if live_routes.is_empty() && live_arrivals.is_empty() {
        warn!(stop_id = %stop.stop_id, "no live data for stop this cycle");
    }
    reconcile(stop, &live_routes, &live_arrivals)
}
