//! Shared domain models.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

/// Arrival time reported when a known route has no live service data.
pub const NO_LIVE_DATA: i32 = -1;

/// A bus route the user tracks (or has seen) at a stop.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FavoriteBus {
    /// Stable provider route identifier.
    pub route_id: String,
    /// Rider-facing line number. Display only.
    pub route_no: String,
}

impl FavoriteBus {
    /// Convenience constructor.
    pub fn new(route_id: impl Into<String>, route_no: impl Into<String>) -> Self {
        Self {
            route_id: route_id.into(),
            route_no: route_no.into(),
        }
    }
}

/// Live arrival prediction for one route at one stop.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArrivalInfo {
    /// Stable provider route identifier.
    pub route_id: String,
    /// Rider-facing line number.
    pub route_no: String,
    /// Whole minutes until arrival, or [`NO_LIVE_DATA`].
    pub arr_time: i32,
    /// Stops remaining before the bus reaches this stop.
    pub remaining_stops: i32,
}

impl ArrivalInfo {
    /// Placeholder used for a known route absent from the live feed.
    pub fn no_live_data(bus: &FavoriteBus) -> Self {
        Self {
            route_id: bus.route_id.clone(),
            route_no: bus.route_no.clone(),
            arr_time: NO_LIVE_DATA,
            remaining_stops: 0,
        }
    }

    /// Whether the provider reported a prediction for this route.
    pub fn has_live_data(&self) -> bool {
        self.arr_time != NO_LIVE_DATA
    }

    /// Route identity of this arrival.
    pub fn bus(&self) -> FavoriteBus {
        FavoriteBus::new(self.route_id.clone(), self.route_no.clone())
    }
}

/// A stop saved by the user together with its favorite routes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SavedStop {
    /// Provider stop identifier.
    pub stop_id: String,
    /// Display name of the stop.
    pub stop_name: String,
    /// City the stop belongs to.
    pub city_code: String,
    /// Routes the user tracks, in display order.
    pub favorite_buses: Vec<FavoriteBus>,
    /// Every route ever observed at this stop, in discovery order.
    #[serde(default)]
    pub all_discovered_buses: Vec<FavoriteBus>,
}

impl SavedStop {
    /// Build a stop, seeding the discovered list so it always covers the favorites.
    pub fn new(
        stop_id: impl Into<String>,
        stop_name: impl Into<String>,
        city_code: impl Into<String>,
        favorite_buses: Vec<FavoriteBus>,
        discovered: Vec<FavoriteBus>,
    ) -> Self {
        let mut stop = Self {
            stop_id: stop_id.into(),
            stop_name: stop_name.into(),
            city_code: city_code.into(),
            favorite_buses,
            all_discovered_buses: discovered,
        };
        stop.normalize();
        stop
    }

    /// Identity of the stop.
    pub fn key(&self) -> StopKey {
        StopKey {
            stop_id: self.stop_id.clone(),
            city_code: self.city_code.clone(),
        }
    }

    /// Deduplicate the discovered list and append any favorite it is missing.
    ///
    /// Returns `true` when the discovered list changed.
    pub fn normalize(&mut self) -> bool {
        let before = self.all_discovered_buses.len();
        let mut seen = HashSet::new();
        self.all_discovered_buses
            .retain(|bus| seen.insert(bus.route_id.clone()));
        let deduped = self.all_discovered_buses.len() != before;
        let appended = append_unseen(
            &mut self.all_discovered_buses,
            &mut seen,
            self.favorite_buses.iter().cloned(),
        );
        deduped || appended
    }

    /// Whether `route_id` is one of the stop's favorites.
    pub fn is_favorite(&self, route_id: &str) -> bool {
        self.favorite_buses.iter().any(|bus| bus.route_id == route_id)
    }
}

/// Appends buses whose route id is not yet in `seen`, preserving order.
pub(crate) fn append_unseen(
    target: &mut Vec<FavoriteBus>,
    seen: &mut HashSet<String>,
    candidates: impl IntoIterator<Item = FavoriteBus>,
) -> bool {
    let mut changed = false;
    for bus in candidates {
        if seen.insert(bus.route_id.clone()) {
            target.push(bus);
            changed = true;
        }
    }
    changed
}

/// `(stop_id, city_code)` identity pair of a saved stop.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StopKey {
    /// Provider stop identifier.
    pub stop_id: String,
    /// City the stop belongs to.
    pub city_code: String,
}

/// A saved stop together with the arrivals currently shown for it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DisplayStop {
    /// Underlying saved stop.
    pub stop: SavedStop,
    /// Arrivals for the favorite routes, in favorite order.
    pub arrivals: Vec<ArrivalInfo>,
}

impl DisplayStop {
    /// Display entry with every favorite marked as having no live data.
    pub fn without_live_data(stop: SavedStop) -> Self {
        let source = if stop.favorite_buses.is_empty() {
            &stop.all_discovered_buses
        } else {
            &stop.favorite_buses
        };
        let arrivals = source.iter().map(ArrivalInfo::no_live_data).collect();
        Self { stop, arrivals }
    }
}

/// One stop on a route, as listed by the provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteStop {
    /// Provider stop identifier.
    pub id: String,
    /// Display name.
    pub name: String,
    /// Position along the route.
    pub order: u32,
}

/// A vehicle currently running on a route.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BusLocation {
    /// Stop the vehicle was last reported at.
    pub current_stop_id: String,
    /// Licence plate.
    pub plate_no: String,
}

/// Ordered stop list of a route plus live vehicle positions.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RouteDetails {
    /// Stops sorted by `order`.
    pub route_stops: Vec<RouteStop>,
    /// Vehicles reported on the route.
    pub bus_locations: Vec<BusLocation>,
}

impl RouteDetails {
    /// Pair each stop with the plates of vehicles currently at it.
    pub fn stops_with_buses(&self) -> Vec<(&RouteStop, Vec<&str>)> {
        self.route_stops
            .iter()
            .map(|stop| {
                let plates = self
                    .bus_locations
                    .iter()
                    .filter(|location| location.current_stop_id == stop.id)
                    .map(|location| location.plate_no.as_str())
                    .collect();
                (stop, plates)
            })
            .collect()
    }
}

/// Candidate stop returned by a nearby search.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StopSearchResult {
    /// Provider stop identifier (may be empty for malformed entries).
    pub id: String,
    /// Display name.
    pub name: String,
    /// Rider-facing stop number, when the provider has one.
    pub stop_no: Option<String>,
    /// City the stop belongs to.
    pub city_code: String,
}

/// City resolved from coordinates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct City {
    /// Provider city code.
    pub code: String,
    /// Display name.
    pub name: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_stop_seeds_discovered_from_favorites() {
        let stop = SavedStop::new(
            "100",
            "Main St",
            "25",
            vec![FavoriteBus::new("R1", "10"), FavoriteBus::new("R3", "30")],
            vec![FavoriteBus::new("R2", "20"), FavoriteBus::new("R1", "10")],
        );
        let ids: Vec<_> = stop
            .all_discovered_buses
            .iter()
            .map(|bus| bus.route_id.as_str())
            .collect();
        assert_eq!(ids, ["R2", "R1", "R3"]);
    }

    #[test]
    fn legacy_payload_without_discovered_list_is_accepted() {
        let raw = r#"{"stopId":"100","stopName":"Main St","cityCode":"25",
            "favoriteBuses":[{"routeId":"R1","routeNo":"10"}]}"#;
        let mut stop: SavedStop = serde_json::from_str(raw).unwrap();
        assert!(stop.all_discovered_buses.is_empty());
        assert!(stop.normalize());
        assert_eq!(stop.all_discovered_buses, stop.favorite_buses);
    }

    #[test]
    fn route_details_marks_stops_with_buses() {
        let details = RouteDetails {
            route_stops: vec![
                RouteStop {
                    id: "A".to_string(),
                    name: "Alpha".to_string(),
                    order: 1,
                },
                RouteStop {
                    id: "B".to_string(),
                    name: "Beta".to_string(),
                    order: 2,
                },
            ],
            bus_locations: vec![BusLocation {
                current_stop_id: "B".to_string(),
                plate_no: "70A1234".to_string(),
            }],
        };
        let marked = details.stops_with_buses();
        assert!(marked[0].1.is_empty());
        assert_eq!(marked[1].1, vec!["70A1234"]);
    }
}
