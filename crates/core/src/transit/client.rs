use std::time::Duration;

use anyhow::{Context, Result};
use futures::{future::BoxFuture, FutureExt};
use serde::{de::DeserializeOwned, Deserialize, Deserializer};
use serde_json::Value;
use tracing::{debug, warn, Instrument};

use crate::{
    config::AppConfig,
    models::{
        ArrivalInfo, BusLocation, City, FavoriteBus, RouteDetails, RouteStop, StopSearchResult,
    },
};

use super::TransitSource;

const STOP_ROUTES_PATH: &str = "1613000/BusSttnInfoInqireService/getSttnThrghRouteList";
const NEARBY_STOPS_PATH: &str = "1613000/BusSttnInfoInqireService/getCrdntPrxmtSttnList";
const ARRIVALS_PATH: &str = "1613000/ArvlInfoInqireService/getSttnAcctoArvlPrearngeInfoList";
const ROUTE_STOPS_PATH: &str = "1613000/BusRouteInfoInqireService/getRouteAcctoThrghSttnList";
const BUS_LOCATIONS_PATH: &str = "1613000/BusLcInfoInqireService/getRouteAcctoBusLcList";

/// [`TransitSource`] backed by the Korean public data portal bus APIs.
#[derive(Debug, Clone)]
pub struct DataGoKrClient {
    http: reqwest::Client,
    base_url: String,
    service_key: String,
}

impl DataGoKrClient {
    /// Build a client from configuration.
    pub fn new(config: &AppConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .gzip(true)
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self {
            http,
            base_url: config.api_base_url.trim_end_matches('/').to_string(),
            service_key: config.service_key.clone(),
        })
    }

    async fn get_items<T: DeserializeOwned>(
        &self,
        path: &str,
        params: &[(&str, String)],
    ) -> Result<Vec<T>> {
        let url = format!("{}/{}", self.base_url, path);
        let response = self
            .http
            .get(&url)
            .query(&[("serviceKey", self.service_key.as_str()), ("_type", "json")])
            .query(params)
            .send()
            .instrument(tracing::debug_span!("transit request", path))
            .await
            .with_context(|| format!("request to {path} failed"))?
            .error_for_status()?;
        let body = response
            .text()
            .await
            .with_context(|| format!("failed to read body of {path}"))?;
        let items = parse_items(&body).with_context(|| format!("malformed payload from {path}"))?;
        debug!(path, count = items.len(), "transit response");
        Ok(items)
    }

    async fn try_routes_for_stop(&self, stop_id: &str, city_code: &str) -> Result<Vec<FavoriteBus>> {
        let items: Vec<RawStopRoute> = self
            .get_items(
                STOP_ROUTES_PATH,
                &[
                    ("nodeId", stop_id.to_string()),
                    ("cityCode", city_code.to_string()),
                    ("numOfRows", "150".to_string()),
                ],
            )
            .await?;
        Ok(items.into_iter().filter_map(RawStopRoute::into_bus).collect())
    }

    async fn try_arrivals(&self, stop_id: &str, city_code: &str) -> Result<Vec<ArrivalInfo>> {
        let items: Vec<RawArrival> = self
            .get_items(
                ARRIVALS_PATH,
                &[
                    ("nodeId", stop_id.to_string()),
                    ("cityCode", city_code.to_string()),
                    ("numOfRows", "100".to_string()),
                ],
            )
            .await?;
        Ok(items.into_iter().filter_map(RawArrival::into_arrival).collect())
    }

    async fn try_route_details(&self, route_id: &str, city_code: &str) -> Result<RouteDetails> {
        let stops_params = [
            ("routeId", route_id.to_string()),
            ("cityCode", city_code.to_string()),
            ("numOfRows", "150".to_string()),
        ];
        let location_params = [
            ("routeId", route_id.to_string()),
            ("cityCode", city_code.to_string()),
            ("numOfRows", "20".to_string()),
        ];
        let (stops, locations) = tokio::join!(
            self.get_items::<RawRouteStop>(ROUTE_STOPS_PATH, &stops_params),
            self.get_items::<RawBusLocation>(BUS_LOCATIONS_PATH, &location_params),
        );
        let mut route_stops: Vec<RouteStop> =
            stops?.into_iter().map(RawRouteStop::into_stop).collect();
        route_stops.sort_by_key(|stop| stop.order);
        let bus_locations = locations?
            .into_iter()
            .map(RawBusLocation::into_location)
            .collect();
        Ok(RouteDetails {
            route_stops,
            bus_locations,
        })
    }

    async fn try_nearby(
        &self,
        latitude: f64,
        longitude: f64,
        rows: u32,
    ) -> Result<Vec<RawNearbyStop>> {
        self.get_items(
            NEARBY_STOPS_PATH,
            &[
                ("gpsLati", latitude.to_string()),
                ("gpsLong", longitude.to_string()),
                ("numOfRows", rows.to_string()),
            ],
        )
        .await
    }
}

impl TransitSource for DataGoKrClient {
    fn routes_for_stop<'a>(
        &'a self,
        stop_id: &'a str,
        city_code: &'a str,
    ) -> BoxFuture<'a, Vec<FavoriteBus>> {
        async move {
            self.try_routes_for_stop(stop_id, city_code)
                .await
                .unwrap_or_else(|err| {
                    warn!(stop_id, error = %format!("{err:#}"), "route list fetch failed");
                    Vec::new()
                })
        }
        .boxed()
    }

    fn arrivals<'a>(
        &'a self,
        stop_id: &'a str,
        city_code: &'a str,
    ) -> BoxFuture<'a, Vec<ArrivalInfo>> {
        async move {
            self.try_arrivals(stop_id, city_code)
                .await
                .unwrap_or_else(|err| {
                    warn!(stop_id, error = %format!("{err:#}"), "arrival fetch failed");
                    Vec::new()
                })
        }
        .boxed()
    }

    fn route_details<'a>(
        &'a self,
        route_id: &'a str,
        city_code: &'a str,
    ) -> BoxFuture<'a, RouteDetails> {
        async move {
            self.try_route_details(route_id, city_code)
                .await
                .unwrap_or_else(|err| {
                    warn!(route_id, error = %format!("{err:#}"), "route detail fetch failed");
                    RouteDetails::default()
                })
        }
        .boxed()
    }

    fn nearby_stops(
        &self,
        latitude: f64,
        longitude: f64,
    ) -> BoxFuture<'_, Vec<StopSearchResult>> {
        async move {
            match self.try_nearby(latitude, longitude, 50).await {
                Ok(items) => items
                    .into_iter()
                    .map(RawNearbyStop::into_result)
                    .collect(),
                Err(err) => {
                    warn!(error = %format!("{err:#}"), "nearby stop search failed");
                    Vec::new()
                }
            }
        }
        .boxed()
    }

    fn city_at(&self, latitude: f64, longitude: f64) -> BoxFuture<'_, Option<City>> {
        async move {
            match self.try_nearby(latitude, longitude, 1).await {
                Ok(items) => items.into_iter().find_map(RawNearbyStop::into_city),
                Err(err) => {
                    warn!(error = %format!("{err:#}"), "city lookup failed");
                    None
                }
            }
        }
        .boxed()
    }
}

/// Extract `response.body.items.item` from a portal payload.
///
/// `item` is an array, a single object when there is one result, and `items`
/// is an empty string when there are none.
pub(crate) fn parse_items<T: DeserializeOwned>(body: &str) -> Result<Vec<T>> {
    let envelope: Envelope<T> = serde_json::from_str(body)?;
    let Some(body) = envelope.response.body else {
        return Ok(Vec::new());
    };
    Ok(match body.items {
        Items::List { item } => match item {
            OneOrMany::Many(items) => items,
            OneOrMany::One(item) => vec![item],
        },
        Items::Empty(_) => Vec::new(),
    })
}

#[derive(Debug, Deserialize)]
#[serde(bound = "T: DeserializeOwned")]
struct Envelope<T> {
    response: ResponsePart<T>,
}

#[derive(Debug, Deserialize)]
#[serde(bound = "T: DeserializeOwned")]
struct ResponsePart<T> {
    #[serde(default)]
    body: Option<Body<T>>,
}

#[derive(Debug, Deserialize)]
#[serde(bound = "T: DeserializeOwned")]
struct Body<T> {
    #[serde(default)]
    items: Items<T>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged, bound = "T: DeserializeOwned")]
enum Items<T> {
    List {
        #[serde(default)]
        item: OneOrMany<T>,
    },
    Empty(Value),
}

impl<T> Default for Items<T> {
    fn default() -> Self {
        Items::Empty(Value::Null)
    }
}

#[derive(Debug, Deserialize)]
#[serde(untagged, bound = "T: DeserializeOwned")]
enum OneOrMany<T> {
    Many(Vec<T>),
    One(T),
}

impl<T> Default for OneOrMany<T> {
    fn default() -> Self {
        OneOrMany::Many(Vec::new())
    }
}

/// Accepts strings and numbers; empty strings and anything else become `None`.
fn lenient_text<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::String(text) if !text.trim().is_empty() => Some(text.trim().to_string()),
        Value::Number(number) => Some(number.to_string()),
        _ => None,
    })
}

/// Accepts numbers and numeric strings.
fn lenient_number<'de, D>(deserializer: D) -> Result<Option<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::Number(number) => number
            .as_i64()
            .or_else(|| number.as_f64().map(|value| value.floor() as i64)),
        Value::String(text) => text.trim().parse().ok(),
        _ => None,
    })
}

#[derive(Debug, Deserialize)]
struct RawStopRoute {
    #[serde(default, deserialize_with = "lenient_text")]
    routeid: Option<String>,
    #[serde(default, deserialize_with = "lenient_text")]
    routeno: Option<String>,
}

impl RawStopRoute {
    fn into_bus(self) -> Option<FavoriteBus> {
        let route_id = self.routeid?;
        Some(FavoriteBus::new(route_id, self.routeno.unwrap_or_default()))
    }
}

#[derive(Debug, Deserialize)]
struct RawArrival {
    #[serde(default, deserialize_with = "lenient_text")]
    routeid: Option<String>,
    #[serde(default, deserialize_with = "lenient_text")]
    routeno: Option<String>,
    #[serde(default, deserialize_with = "lenient_number")]
    arrtime: Option<i64>,
    #[serde(default, deserialize_with = "lenient_number")]
    arrprevstationcnt: Option<i64>,
}

impl RawArrival {
    fn into_arrival(self) -> Option<ArrivalInfo> {
        let route_id = self.routeid?;
        // The provider reports seconds; the dashboard works in whole minutes.
        let seconds = self.arrtime?.max(0);
        Some(ArrivalInfo {
            route_id,
            route_no: self.routeno.unwrap_or_default(),
            arr_time: i32::try_from(seconds / 60).unwrap_or(i32::MAX),
            remaining_stops: self
                .arrprevstationcnt
                .and_then(|count| i32::try_from(count.max(0)).ok())
                .unwrap_or(0),
        })
    }
}

#[derive(Debug, Deserialize)]
struct RawNearbyStop {
    #[serde(default, deserialize_with = "lenient_text")]
    nodeid: Option<String>,
    #[serde(default, deserialize_with = "lenient_text")]
    nodenm: Option<String>,
    #[serde(default, deserialize_with = "lenient_text")]
    nodeno: Option<String>,
    #[serde(default, deserialize_with = "lenient_text")]
    citycode: Option<String>,
    #[serde(default, deserialize_with = "lenient_text")]
    cityname: Option<String>,
}

impl RawNearbyStop {
    fn into_result(self) -> StopSearchResult {
        StopSearchResult {
            id: self.nodeid.unwrap_or_default(),
            name: self.nodenm.unwrap_or_default(),
            stop_no: self.nodeno,
            city_code: self.citycode.unwrap_or_default(),
        }
    }

    fn into_city(self) -> Option<City> {
        Some(City {
            code: self.citycode?,
            name: self.cityname?,
        })
    }
}

#[derive(Debug, Deserialize)]
struct RawRouteStop {
    #[serde(default, deserialize_with = "lenient_text")]
    nodeid: Option<String>,
    #[serde(default, deserialize_with = "lenient_text")]
    nodenm: Option<String>,
    #[serde(default, deserialize_with = "lenient_number")]
    nodeord: Option<i64>,
}

impl RawRouteStop {
    fn into_stop(self) -> RouteStop {
        RouteStop {
            id: self.nodeid.unwrap_or_default(),
            name: self.nodenm.unwrap_or_default(),
            order: self
                .nodeord
                .and_then(|order| u32::try_from(order).ok())
                .unwrap_or(u32::MAX),
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawBusLocation {
    #[serde(default, deserialize_with = "lenient_text")]
    nodeid: Option<String>,
    #[serde(default, deserialize_with = "lenient_text")]
    vehicleno: Option<String>,
}

impl RawBusLocation {
    fn into_location(self) -> BusLocation {
        BusLocation {
            current_stop_id: self.nodeid.unwrap_or_default(),
            plate_no: self.vehicleno.unwrap_or_default(),
        }
    }
}
