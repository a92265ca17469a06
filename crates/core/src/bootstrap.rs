//! Startup data shown around the stop list.

use chrono::NaiveDateTime;
use tracing::info;

use crate::{
    calendar::{schedule_for, CalendarSource, ScheduleInfo},
    config::AppConfig,
    models::City,
    transit::TransitSource,
    weather::{WeatherClient, WeatherInfo},
};

/// City, forecast and schedule gathered once at startup.
#[derive(Debug, Clone)]
pub struct Surroundings {
    /// City containing the configured location.
    pub city: Option<City>,
    /// Forecast for the configured location.
    pub weather: Option<WeatherInfo>,
    /// Today's first event.
    pub schedule: ScheduleInfo,
}

/// Look up city and weather concurrently and read the calendar.
///
/// Without a configured location, city and weather stay empty.
pub async fn gather(
    config: &AppConfig,
    source: &dyn TransitSource,
    weather: &WeatherClient,
    calendar: Option<&dyn CalendarSource>,
    now: NaiveDateTime,
) -> Surroundings {
    let schedule = schedule_for(calendar, now.date());
    let Some((latitude, longitude)) = config.location() else {
        info!("no location configured; weather and nearby search disabled");
        return Surroundings {
            city: None,
            weather: None,
            schedule,
        };
    };

    let (city, forecast) = tokio::join!(
        source.city_at(latitude, longitude),
        weather.fetch(latitude, longitude, now),
    );
    info!(
        city = city.as_ref().map(|city| city.name.as_str()).unwrap_or("unknown"),
        weather = forecast.is_some(),
        "surroundings loaded"
    );
    Surroundings {
        city,
        weather: forecast,
        schedule,
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use anyhow::Result;
    use chrono::NaiveDate;

    use super::*;
    use crate::{
        calendar::CalendarEvent,
        transit::testing::ScriptedSource,
    };

    struct FixedCalendar(Vec<CalendarEvent>);

    impl CalendarSource for FixedCalendar {
        fn events(&self) -> Result<Vec<CalendarEvent>> {
            Ok(self.0.clone())
        }
    }

    fn config() -> AppConfig {
        AppConfig {
            service_key: String::new(),
            api_base_url: "http://127.0.0.1:9".to_string(),
            refresh_interval_secs: 30,
            request_timeout_secs: 1,
            autosave_interval_secs: None,
            data_dir: PathBuf::from("."),
            latitude: None,
            longitude: None,
            calendar_path: None,
        }
    }

    #[tokio::test]
    async fn without_location_only_schedule_is_loaded() -> Result<()> {
        let config = config();
        let now = NaiveDate::from_ymd_opt(2024, 5, 10)
            .and_then(|day| day.and_hms_opt(8, 0, 0))
            .unwrap();
        let calendar = FixedCalendar(vec![CalendarEvent {
            summary: "Standup".to_string(),
            start: now + chrono::Duration::minutes(90),
        }]);

        let surroundings = gather(
            &config,
            &ScriptedSource::default(),
            &WeatherClient::new(&config)?,
            Some(&calendar),
            now,
        )
        .await;

        assert!(surroundings.city.is_none());
        assert!(surroundings.weather.is_none());
        assert_eq!(surroundings.schedule.title, "09:30 - Standup");
        Ok(())
    }

    #[tokio::test]
    async fn unreachable_services_leave_panels_empty() -> Result<()> {
        let mut config = config();
        config.latitude = Some(37.5665);
        config.longitude = Some(126.9780);
        let now = NaiveDate::from_ymd_opt(2024, 5, 10)
            .and_then(|day| day.and_hms_opt(8, 0, 0))
            .unwrap();

        let surroundings = gather(
            &config,
            &ScriptedSource::default(),
            &WeatherClient::new(&config)?,
            None,
            now,
        )
        .await;

        assert!(surroundings.city.is_none());
        assert!(surroundings.weather.is_none());
        assert!(!surroundings.schedule.has_schedule);
        Ok(())
    }
}
