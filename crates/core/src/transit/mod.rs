//! Transit data adapters.
//!
//! The rest of the crate only sees [`TransitSource`]. Implementations must
//! never fail: a network error, a malformed payload or an empty upstream
//! answer all map to the empty value of the call.

/// HTTP client for the public data portal.
pub mod client;

use futures::future::BoxFuture;

use crate::models::{ArrivalInfo, City, FavoriteBus, RouteDetails, StopSearchResult};

pub use client::DataGoKrClient;

/// Typed access to the transit provider.
pub trait TransitSource: Send + Sync {
    /// Every route serving a stop.
    fn routes_for_stop<'a>(
        &'a self,
        stop_id: &'a str,
        city_code: &'a str,
    ) -> BoxFuture<'a, Vec<FavoriteBus>>;

    /// Live arrival predictions at a stop, in whole minutes.
    fn arrivals<'a>(
        &'a self,
        stop_id: &'a str,
        city_code: &'a str,
    ) -> BoxFuture<'a, Vec<ArrivalInfo>>;

    /// Stop list and vehicle positions of a route.
    fn route_details<'a>(
        &'a self,
        route_id: &'a str,
        city_code: &'a str,
    ) -> BoxFuture<'a, RouteDetails>;

    /// Stops close to a coordinate.
    fn nearby_stops(&self, latitude: f64, longitude: f64)
        -> BoxFuture<'_, Vec<StopSearchResult>>;

    /// City containing a coordinate.
    fn city_at(&self, latitude: f64, longitude: f64) -> BoxFuture<'_, Option<City>>;
}

#[cfg(test)]
pub(crate) mod testing {
    //! In-memory source with per-stop scripted answers.

    use std::{
        collections::HashMap,
        sync::{
            atomic::{AtomicUsize, Ordering},
            Arc, Mutex,
        },
    };

    use futures::{future::BoxFuture, FutureExt};
    use tokio::sync::Notify;

    use super::TransitSource;
    use crate::models::{ArrivalInfo, City, FavoriteBus, RouteDetails, StopSearchResult};

    #[derive(Default)]
    struct Script {
        routes: HashMap<String, Vec<FavoriteBus>>,
        arrivals: HashMap<String, Vec<ArrivalInfo>>,
        gates: HashMap<String, Arc<Notify>>,
    }

    /// Source answering from scripted tables. Unknown stops yield empty results.
    #[derive(Default, Clone)]
    pub struct ScriptedSource {
        script: Arc<Mutex<Script>>,
        arrival_calls: Arc<AtomicUsize>,
    }

    impl ScriptedSource {
        pub fn set_routes(&self, stop_id: &str, routes: Vec<FavoriteBus>) {
            if let Ok(mut script) = self.script.lock() {
                script.routes.insert(stop_id.to_string(), routes);
            }
        }

        pub fn set_arrivals(&self, stop_id: &str, arrivals: Vec<ArrivalInfo>) {
            if let Ok(mut script) = self.script.lock() {
                script.arrivals.insert(stop_id.to_string(), arrivals);
            }
        }

        /// Hold arrival answers for `stop_id` until the returned handle is notified.
        pub fn gate(&self, stop_id: &str) -> Arc<Notify> {
            let notify = Arc::new(Notify::new());
            if let Ok(mut script) = self.script.lock() {
                script.gates.insert(stop_id.to_string(), Arc::clone(&notify));
            }
            notify
        }

        /// Number of arrival fetches started so far.
        pub fn arrival_calls(&self) -> usize {
            self.arrival_calls.load(Ordering::SeqCst)
        }

        fn take_gate(&self, stop_id: &str) -> Option<Arc<Notify>> {
            self.script
                .lock()
                .ok()
                .and_then(|mut script| script.gates.remove(stop_id))
        }

        fn routes(&self, stop_id: &str) -> Vec<FavoriteBus> {
            self.script
                .lock()
                .ok()
                .and_then(|script| script.routes.get(stop_id).cloned())
                .unwrap_or_default()
        }

        fn arrivals_now(&self, stop_id: &str) -> Vec<ArrivalInfo> {
            self.script
                .lock()
                .ok()
                .and_then(|script| script.arrivals.get(stop_id).cloned())
                .unwrap_or_default()
        }
    }

    impl TransitSource for ScriptedSource {
        fn routes_for_stop<'a>(
            &'a self,
            stop_id: &'a str,
            _city_code: &'a str,
        ) -> BoxFuture<'a, Vec<FavoriteBus>> {
            let routes = self.routes(stop_id);
            async move { routes }.boxed()
        }

        fn arrivals<'a>(
            &'a self,
            stop_id: &'a str,
            _city_code: &'a str,
        ) -> BoxFuture<'a, Vec<ArrivalInfo>> {
            self.arrival_calls.fetch_add(1, Ordering::SeqCst);
            let gate = self.take_gate(stop_id);
            // Answer as of the call, even when released later.
            let arrivals = self.arrivals_now(stop_id);
            async move {
                if let Some(gate) = gate {
                    gate.notified().await;
                }
                arrivals
            }
            .boxed()
        }

        fn route_details<'a>(
            &'a self,
            _route_id: &'a str,
            _city_code: &'a str,
        ) -> BoxFuture<'a, RouteDetails> {
            async { RouteDetails::default() }.boxed()
        }

        fn nearby_stops(
            &self,
            _latitude: f64,
            _longitude: f64,
        ) -> BoxFuture<'_, Vec<StopSearchResult>> {
            async { Vec::new() }.boxed()
        }

        fn city_at(&self, _latitude: f64, _longitude: f64) -> BoxFuture<'_, Option<City>> {
            async { None }.boxed()
        }
    }
}
