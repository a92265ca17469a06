//! Add-stop flow: ranking nearby stops and picking favorite routes.

use crate::models::{FavoriteBus, SavedStop, StopSearchResult};

/// Queries shorter than this (in characters) match nothing.
pub const MIN_QUERY_CHARS: usize = 2;

fn name_score(name: &str, query: &str) -> u8 {
    if name == query {
        3
    } else if name.starts_with(query) {
        2
    } else if name.contains(query) {
        1
    } else {
        0
    }
}

/// Filter `stops` by name (case-insensitive) or stop number and order the
/// matches best first. Equal scores keep their provider order.
pub fn rank_stops<'a>(stops: &'a [StopSearchResult], query: &str) -> Vec<&'a StopSearchResult> {
    let query = query.trim();
    if query.chars().count() < MIN_QUERY_CHARS {
        return Vec::new();
    }
    let lowered = query.to_lowercase();

    let mut matches: Vec<(u8, &StopSearchResult)> = stops
        .iter()
        .filter(|stop| {
            stop.name.to_lowercase().contains(&lowered)
                || stop
                    .stop_no
                    .as_deref()
                    .is_some_and(|number| number.contains(query))
        })
        .map(|stop| (name_score(&stop.name.to_lowercase(), &lowered), stop))
        .collect();
    matches.sort_by(|a, b| b.0.cmp(&a.0));
    matches.into_iter().map(|(_, stop)| stop).collect()
}

/// Result of toggling a route in a [`FavoriteSelection`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToggleOutcome {
    /// Route added to the selection.
    Selected,
    /// Route removed from the selection.
    Deselected,
    /// Selection already holds the maximum number of routes.
    LimitReached,
}

/// Routes picked for a stop being added, bounded by the favorites limit.
#[derive(Debug, Clone)]
pub struct FavoriteSelection {
    max: usize,
    selected: Vec<FavoriteBus>,
}

impl FavoriteSelection {
    /// Empty selection allowing up to `max` routes.
    pub fn new(max: u8) -> Self {
        Self {
            max: usize::from(max),
            selected: Vec::new(),
        }
    }

    /// Add or remove `bus`, by route id.
    pub fn toggle(&mut self, bus: &FavoriteBus) -> ToggleOutcome {
        if let Some(index) = self
            .selected
            .iter()
            .position(|chosen| chosen.route_id == bus.route_id)
        {
            self.selected.remove(index);
            return ToggleOutcome::Deselected;
        }
        if self.selected.len() >= self.max {
            return ToggleOutcome::LimitReached;
        }
        self.selected.push(bus.clone());
        ToggleOutcome::Selected
    }

    /// Whether `route_id` is selected.
    pub fn contains(&self, route_id: &str) -> bool {
        self.selected.iter().any(|bus| bus.route_id == route_id)
    }

    /// Largest number of routes that may be selected.
    pub fn limit(&self) -> usize {
        self.max
    }

    /// Selected routes in selection order.
    pub fn selected(&self) -> &[FavoriteBus] {
        &self.selected
    }

    /// Number of selected routes.
    pub fn len(&self) -> usize {
        self.selected.len()
    }

    /// Whether nothing is selected.
    pub fn is_empty(&self) -> bool {
        self.selected.is_empty()
    }
}

/// Assemble the stop to save from a search hit, the chosen favorites and
/// every route the provider lists for the stop.
///
/// `None` if the hit has no identifier or city, or nothing was selected.
pub fn build_saved_stop(
    stop: &StopSearchResult,
    selection: &FavoriteSelection,
    routes_at_stop: &[FavoriteBus],
) -> Option<SavedStop> {
    if stop.id.is_empty() || stop.city_code.is_empty() || selection.is_empty() {
        return None;
    }
    let discovered = if routes_at_stop.is_empty() {
        selection.selected().to_vec()
    } else {
        routes_at_stop.to_vec()
    };
    Some(SavedStop::new(
        stop.id.clone(),
        stop.name.clone(),
        stop.city_code.clone(),
        selection.selected().to_vec(),
        discovered,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hit(id: &str, name: &str, stop_no: Option<&str>) -> StopSearchResult {
        StopSearchResult {
            id: id.to_string(),
            name: name.to_string(),
            stop_no: stop_no.map(str::to_string),
            city_code: "25".to_string(),
        }
    }

    fn ids(ranked: &[&StopSearchResult]) -> Vec<String> {
        ranked.iter().map(|stop| stop.id.clone()).collect()
    }

    #[test]
    fn short_queries_match_nothing() {
        let stops = vec![hit("1", "Market", None)];
        assert!(rank_stops(&stops, "M").is_empty());
        assert!(rank_stops(&stops, " M ").is_empty());
    }

    #[test]
    fn exact_then_prefix_then_contains() {
        let stops = vec![
            hit("contains", "Old Market Square", None),
            hit("prefix", "Market Street", None),
            hit("exact", "market", None),
            hit("other", "Harbour", None),
        ];
        assert_eq!(ids(&rank_stops(&stops, "Market")), ["exact", "prefix", "contains"]);
    }

    #[test]
    fn stop_number_matches_rank_last_in_provider_order() {
        let stops = vec![
            hit("a", "Library", Some("31204")),
            hit("b", "Station 312", None),
            hit("c", "Park", Some("10312")),
        ];
        assert_eq!(ids(&rank_stops(&stops, "312")), ["b", "a", "c"]);
    }

    #[test]
    fn selection_respects_limit() {
        let mut selection = FavoriteSelection::new(2);
        let one = FavoriteBus::new("R1", "1");
        let two = FavoriteBus::new("R2", "2");
        let three = FavoriteBus::new("R3", "3");

        assert_eq!(selection.toggle(&one), ToggleOutcome::Selected);
        assert_eq!(selection.toggle(&two), ToggleOutcome::Selected);
        assert_eq!(selection.toggle(&three), ToggleOutcome::LimitReached);
        assert!(!selection.contains("R3"));
        assert_eq!(selection.toggle(&one), ToggleOutcome::Deselected);
        assert_eq!(selection.toggle(&three), ToggleOutcome::Selected);
        assert_eq!(selection.selected(), [two, three]);
    }

    #[test]
    fn builds_stop_with_all_routes_discovered() {
        let mut selection = FavoriteSelection::new(5);
        selection.toggle(&FavoriteBus::new("R2", "20"));
        let routes = vec![FavoriteBus::new("R1", "10"), FavoriteBus::new("R2", "20")];

        let stop = build_saved_stop(&hit("100", "Main St", None), &selection, &routes).unwrap();
        assert_eq!(stop.favorite_buses, vec![FavoriteBus::new("R2", "20")]);
        assert_eq!(stop.all_discovered_buses, routes);

        let fallback = build_saved_stop(&hit("100", "Main St", None), &selection, &[]).unwrap();
        assert_eq!(fallback.all_discovered_buses, fallback.favorite_buses);
    }

    #[test]
    fn refuses_incomplete_stops() {
        let mut selection = FavoriteSelection::new(5);
        assert!(build_saved_stop(&hit("100", "Main St", None), &selection, &[]).is_none());
        selection.toggle(&FavoriteBus::new("R1", "10"));
        assert!(build_saved_stop(&hit("", "Main St", None), &selection, &[]).is_none());
    }
}
