//! Short-term forecast for the dashboard header.

use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{Duration as ChronoDuration, NaiveDate, NaiveDateTime, Timelike};
use serde::Deserialize;
use tracing::{debug, warn};

use crate::{config::AppConfig, transit::client::parse_items};

const FORECAST_PATH: &str = "1360000/VilageFcstInfoService_2.0/getVilageFcst";
/// Hours at which the forecast service publishes a new run.
const BASE_HOURS: [u32; 8] = [2, 5, 8, 11, 14, 17, 20, 23];
const HOURLY_SLOTS: i64 = 24;

/// Sky/precipitation summary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WeatherCondition {
    /// Clear sky.
    Sunny,
    /// Mostly cloudy.
    Cloudy,
    /// Overcast.
    Overcast,
    /// Rain.
    Rain,
    /// Snow.
    Snow,
    /// Showers.
    Shower,
}

impl WeatherCondition {
    /// Derive the condition from precipitation type (PTY) and sky state (SKY) codes.
    pub fn from_codes(sky: Option<&str>, precipitation: Option<&str>) -> Self {
        match precipitation {
            Some("1") => return Self::Rain,
            Some("3") => return Self::Snow,
            Some("4") => return Self::Shower,
            Some(code) if code != "0" => return Self::Sunny,
            _ => {}
        }
        match sky {
            Some("3") => Self::Cloudy,
            Some("4") => Self::Overcast,
            _ => Self::Sunny,
        }
    }

    /// Short label.
    pub fn label(self) -> &'static str {
        match self {
            Self::Sunny => "Sunny",
            Self::Cloudy => "Cloudy",
            Self::Overcast => "Overcast",
            Self::Rain => "Rain",
            Self::Snow => "Snow",
            Self::Shower => "Showers",
        }
    }

    /// Single-glyph icon.
    pub fn icon(self) -> &'static str {
        match self {
            Self::Sunny => "☀",
            Self::Cloudy => "⛅",
            Self::Overcast => "☁",
            Self::Rain => "☂",
            Self::Snow => "❄",
            Self::Shower => "⛈",
        }
    }
}

/// Forecast for one hour.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HourlyWeather {
    /// Hour of day, 0–23.
    pub hour: u32,
    /// Expected condition.
    pub condition: WeatherCondition,
    /// Temperature in °C.
    pub temperature: i32,
    /// Precipitation probability in percent.
    pub rain_chance: i32,
}

/// Current weather plus the next 24 hours.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WeatherInfo {
    /// Local date the forecast was requested for.
    pub date: NaiveDate,
    /// Condition for the current hour.
    pub condition: WeatherCondition,
    /// Temperature for the current hour in °C.
    pub temperature: i32,
    /// 24 hourly entries starting at the current hour.
    pub hourly: Vec<HourlyWeather>,
}

/// Forecast grid cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GridPoint {
    /// Column.
    pub nx: i32,
    /// Row.
    pub ny: i32,
}

/// Project a coordinate onto the 5 km forecast grid (Lambert conformal conic).
pub fn to_grid(latitude: f64, longitude: f64) -> GridPoint {
    use std::f64::consts::PI;

    const EARTH_RADIUS_KM: f64 = 6371.00877;
    const GRID_KM: f64 = 5.0;
    const STANDARD_LAT_1: f64 = 30.0;
    const STANDARD_LAT_2: f64 = 60.0;
    const ORIGIN_LON: f64 = 126.0;
    const ORIGIN_LAT: f64 = 38.0;
    const ORIGIN_X: f64 = 43.0;
    const ORIGIN_Y: f64 = 136.0;

    let rad = PI / 180.0;
    let re = EARTH_RADIUS_KM / GRID_KM;
    let slat1 = STANDARD_LAT_1 * rad;
    let slat2 = STANDARD_LAT_2 * rad;
    let olon = ORIGIN_LON * rad;
    let olat = ORIGIN_LAT * rad;

    let quarter = |lat: f64| (PI * 0.25 + lat * 0.5).tan();
    let sn = (slat1.cos() / slat2.cos()).ln() / (quarter(slat2) / quarter(slat1)).ln();
    let sf = quarter(slat1).powf(sn) * slat1.cos() / sn;
    let ro = re * sf / quarter(olat).powf(sn);
    let ra = re * sf / quarter(latitude * rad).powf(sn);

    let mut theta = longitude * rad - olon;
    if theta > PI {
        theta -= 2.0 * PI;
    }
    if theta < -PI {
        theta += 2.0 * PI;
    }
    theta *= sn;

    GridPoint {
        nx: (ra * theta.sin() + ORIGIN_X + 0.5).floor() as i32,
        ny: (ro - ra * theta.cos() + ORIGIN_Y + 0.5).floor() as i32,
    }
}

/// Latest published forecast run at or before `now`.
///
/// Before the first run of the day this is the last run of the previous day.
pub fn forecast_base(now: NaiveDateTime) -> (NaiveDate, u32) {
    let hour = now.hour();
    match BASE_HOURS.iter().rev().find(|base| **base <= hour) {
        Some(base) => (now.date(), *base),
        None => (
            now.date().pred_opt().unwrap_or(now.date()),
            BASE_HOURS[BASE_HOURS.len() - 1],
        ),
    }
}

/// One row of the forecast payload.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ForecastItem {
    /// Measurement code (`TMP`, `SKY`, `PTY`, `POP`, ...).
    pub category: String,
    /// `YYYYMMDD`.
    pub fcst_date: String,
    /// `HHMM`.
    pub fcst_time: String,
    /// Value as text.
    pub fcst_value: String,
}

fn slot_value<'a>(items: &'a [ForecastItem], category: &str, slot: NaiveDateTime) -> Option<&'a str> {
    let date = slot.format("%Y%m%d").to_string();
    let time = format!("{:02}00", slot.hour());
    items
        .iter()
        .find(|item| item.category == category && item.fcst_date == date && item.fcst_time == time)
        .map(|item| item.fcst_value.as_str())
}

fn rounded(raw: Option<&str>) -> i32 {
    raw.and_then(|text| text.trim().parse::<f64>().ok())
        .map(|value| value.round() as i32)
        .unwrap_or(0)
}

/// Build the dashboard forecast from raw items. `None` if there are no items.
pub fn summarize(items: &[ForecastItem], now: NaiveDateTime) -> Option<WeatherInfo> {
    if items.is_empty() {
        return None;
    }

    let current_slot = now
        .date()
        .and_hms_opt(now.hour(), 0, 0)
        .unwrap_or(now);

    let hourly: Vec<HourlyWeather> = (0..HOURLY_SLOTS)
        .map(|offset| {
            let slot = current_slot + ChronoDuration::hours(offset);
            HourlyWeather {
                hour: slot.hour(),
                condition: WeatherCondition::from_codes(
                    slot_value(items, "SKY", slot),
                    slot_value(items, "PTY", slot),
                ),
                temperature: rounded(slot_value(items, "TMP", slot)),
                rain_chance: rounded(slot_value(items, "POP", slot)),
            }
        })
        .collect();

    // A fresh run starts at the next hour, so the current hour may be missing.
    let reference = if slot_value(items, "TMP", current_slot).is_some() {
        current_slot
    } else {
        (1..HOURLY_SLOTS)
            .map(|offset| current_slot + ChronoDuration::hours(offset))
            .find(|slot| slot_value(items, "TMP", *slot).is_some())
            .unwrap_or(current_slot)
    };

    Some(WeatherInfo {
        date: now.date(),
        condition: WeatherCondition::from_codes(
            slot_value(items, "SKY", reference),
            slot_value(items, "PTY", reference),
        ),
        temperature: rounded(slot_value(items, "TMP", reference)),
        hourly,
    })
}

/// Fetches the short-term forecast.
#[derive(Debug, Clone)]
pub struct WeatherClient {
    http: reqwest::Client,
    base_url: String,
    service_key: String,
}

impl WeatherClient {
    /// Build a client from configuration.
    pub fn new(config: &AppConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self {
            http,
            base_url: config.api_base_url.trim_end_matches('/').to_string(),
            service_key: config.service_key.clone(),
        })
    }

    /// Forecast for a coordinate, or `None` when it cannot be retrieved.
    pub async fn fetch(&self, latitude: f64, longitude: f64, now: NaiveDateTime) -> Option<WeatherInfo> {
        match self.try_fetch(latitude, longitude, now).await {
            Ok(info) => info,
            Err(err) => {
                warn!(error = %format!("{err:#}"), "weather fetch failed");
                None
            }
        }
    }

    async fn try_fetch(
        &self,
        latitude: f64,
        longitude: f64,
        now: NaiveDateTime,
    ) -> Result<Option<WeatherInfo>> {
        let grid = to_grid(latitude, longitude);
        let (base_date, base_hour) = forecast_base(now);
        debug!(nx = grid.nx, ny = grid.ny, %base_date, base_hour, "fetching forecast");
        let body = self
            .http
            .get(format!("{}/{}", self.base_url, FORECAST_PATH))
            .query(&[
                ("serviceKey", self.service_key.clone()),
                ("pageNo", "1".to_string()),
                ("numOfRows", "1000".to_string()),
                ("dataType", "JSON".to_string()),
                ("base_date", base_date.format("%Y%m%d").to_string()),
                ("base_time", format!("{base_hour:02}00")),
                ("nx", grid.nx.to_string()),
                ("ny", grid.ny.to_string()),
            ])
            .send()
            .await
            .context("forecast request failed")?
            .error_for_status()?
            .text()
            .await
            .context("failed to read forecast body")?;
        let items: Vec<ForecastItem> = parse_items(&body).context("malformed forecast payload")?;
        if items.is_empty() {
            anyhow::bail!("forecast service returned no items");
        }
        Ok(summarize(&items, now))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(date: (i32, u32, u32), hour: u32, minute: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(date.0, date.1, date.2)
            .and_then(|day| day.and_hms_opt(hour, minute, 0))
            .unwrap()
    }

    fn item(category: &str, date: &str, time: &str, value: &str) -> ForecastItem {
        ForecastItem {
            category: category.to_string(),
            fcst_date: date.to_string(),
            fcst_time: time.to_string(),
            fcst_value: value.to_string(),
        }
    }

    #[test]
    fn grid_matches_known_cells() {
        assert_eq!(to_grid(37.5665, 126.9780), GridPoint { nx: 60, ny: 127 });
        assert_eq!(to_grid(35.1796, 129.0756), GridPoint { nx: 98, ny: 76 });
        assert_eq!(to_grid(38.0, 126.0), GridPoint { nx: 43, ny: 136 });
    }

    #[test]
    fn base_time_picks_latest_run() {
        assert_eq!(
            forecast_base(at((2024, 5, 10), 14, 30)),
            (NaiveDate::from_ymd_opt(2024, 5, 10).unwrap(), 14)
        );
        assert_eq!(
            forecast_base(at((2024, 5, 10), 4, 59)),
            (NaiveDate::from_ymd_opt(2024, 5, 10).unwrap(), 2)
        );
        assert_eq!(
            forecast_base(at((2024, 5, 10), 1, 0)),
            (NaiveDate::from_ymd_opt(2024, 5, 9).unwrap(), 23)
        );
    }

    #[test]
    fn condition_prefers_precipitation() {
        assert_eq!(
            WeatherCondition::from_codes(Some("4"), Some("1")),
            WeatherCondition::Rain
        );
        assert_eq!(
            WeatherCondition::from_codes(Some("3"), Some("0")),
            WeatherCondition::Cloudy
        );
        assert_eq!(
            WeatherCondition::from_codes(Some("4"), None),
            WeatherCondition::Overcast
        );
        assert_eq!(WeatherCondition::from_codes(None, None), WeatherCondition::Sunny);
    }

    #[test]
    fn summary_reads_current_and_hourly_slots() {
        let items = vec![
            item("TMP", "20240510", "1500", "21"),
            item("SKY", "20240510", "1500", "3"),
            item("PTY", "20240510", "1500", "0"),
            item("POP", "20240510", "1500", "30"),
            item("TMP", "20240510", "1600", "20"),
            item("PTY", "20240510", "1600", "1"),
            item("POP", "20240510", "1600", "70"),
            item("TMP", "20240511", "0100", "12"),
        ];
        let info = summarize(&items, at((2024, 5, 10), 15, 20)).unwrap();

        assert_eq!(info.temperature, 21);
        assert_eq!(info.condition, WeatherCondition::Cloudy);
        assert_eq!(info.hourly.len(), 24);
        assert_eq!(info.hourly[0].rain_chance, 30);
        assert_eq!(info.hourly[1].condition, WeatherCondition::Rain);
        assert_eq!(info.hourly[10].hour, 1);
        assert_eq!(info.hourly[10].temperature, 12);
        assert_eq!(info.hourly[5].temperature, 0);
    }

    #[test]
    fn summary_falls_back_when_current_hour_missing() {
        let items = vec![
            item("TMP", "20240510", "1500", "18"),
            item("SKY", "20240510", "1500", "4"),
        ];
        let info = summarize(&items, at((2024, 5, 10), 14, 5)).unwrap();
        assert_eq!(info.temperature, 18);
        assert_eq!(info.condition, WeatherCondition::Overcast);
    }

    #[test]
    fn empty_forecast_has_no_summary() {
        assert!(summarize(&[], at((2024, 5, 10), 9, 0)).is_none());
    }
}
