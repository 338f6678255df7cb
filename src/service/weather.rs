//! Weather lookups against the Open-Meteo APIs.
//!
//! A city name is geocoded first; its coordinates and timezone then drive
//! either the archive API (the past seven days, today included) or the
//! forecast API (the next seven days).

use chrono::{Local, NaiveDate, TimeDelta};
use reqwest::{Client, Response};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;
use std::time::Duration;
use tracing::debug;

use crate::error::{Error, Result};

const DAILY_FIELDS: &str = "temperature_2m_max,temperature_2m_min,precipitation_sum,windspeed_10m_max";

/// Base URLs of the three Open-Meteo endpoints.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WeatherEndpoints {
    pub geocoding_url: String,
    pub archive_url: String,
    pub forecast_url: String,
}

impl Default for WeatherEndpoints {
    fn default() -> Self {
        Self {
            geocoding_url: "https://geocoding-api.open-meteo.com/v1/search".to_string(),
            archive_url: "https://archive-api.open-meteo.com/v1/archive".to_string(),
            forecast_url: "https://api.open-meteo.com/v1/forecast".to_string(),
        }
    }
}

impl WeatherEndpoints {
    /// All three endpoints under one base URL, as a local stand-in would
    /// serve them.
    pub fn under(base: &str) -> Self {
        let base = base.trim_end_matches('/');
        Self {
            geocoding_url: format!("{}/v1/search", base),
            archive_url: format!("{}/v1/archive", base),
            forecast_url: format!("{}/v1/forecast", base),
        }
    }
}

/// Which seven days to report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Period {
    PastWeek,
    NextWeek,
}

impl Period {
    fn heading(self) -> (&'static str, &'static str, &'static str) {
        match self {
            Period::PastWeek => ("Weather Data", "PAST 7 DAYS", "Last 7 Days"),
            Period::NextWeek => ("Weather Forecast", "NEXT 7 DAYS", "Next 7 Days"),
        }
    }
}

/// A geocoded city.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Location {
    pub name: String,
    #[serde(default)]
    pub country: String,
    pub latitude: f64,
    pub longitude: f64,
    #[serde(default = "default_timezone")]
    pub timezone: String,
}

fn default_timezone() -> String {
    "UTC".to_string()
}

/// One day of weather. Values the API has no data for are `null`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyRecord {
    pub date: String,
    pub max_temp_c: Option<f64>,
    pub min_temp_c: Option<f64>,
    pub precipitation_mm: Option<f64>,
    pub max_wind_speed_kmh: Option<f64>,
}

/// Weather for one city over one period.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeatherReport {
    pub city: String,
    pub country: String,
    pub latitude: f64,
    pub longitude: f64,
    pub timezone: String,
    pub records: Vec<DailyRecord>,
}

impl WeatherReport {
    /// Human-readable rendering.
    pub fn to_text(&self, period: Period) -> String {
        let (title, span, label) = period.heading();
        let mut out = format!(
            "{} ({}) for {} ({})\nLocation: {}, {}\nTimezone: {}\n\n{}:\n{}",
            title,
            span,
            self.city,
            self.country,
            self.latitude,
            self.longitude,
            self.timezone,
            label,
            "=".repeat(70)
        );
        for r in &self.records {
            let _ = write!(
                out,
                "\nDate: {}\n  Max Temperature: {}°C\n  Min Temperature: {}°C\n  Precipitation: {}mm\n  Max Wind Speed: {}km/h",
                r.date,
                show(r.max_temp_c),
                show(r.min_temp_c),
                show(r.precipitation_mm),
                show(r.max_wind_speed_kmh)
            );
        }
        out
    }
}

fn show(value: Option<f64>) -> String {
    value.map_or_else(|| "n/a".to_string(), |v| v.to_string())
}

#[derive(Debug, Deserialize)]
struct GeocodingResponse {
    #[serde(default)]
    results: Vec<Location>,
}

#[derive(Debug, Deserialize)]
struct DailyResponse {
    timezone: Option<String>,
    #[serde(default)]
    daily: Option<DailySeries>,
}

#[derive(Debug, Default, Deserialize)]
struct DailySeries {
    #[serde(default)]
    time: Vec<String>,
    #[serde(default)]
    temperature_2m_max: Vec<Option<f64>>,
    #[serde(default)]
    temperature_2m_min: Vec<Option<f64>>,
    #[serde(default)]
    precipitation_sum: Vec<Option<f64>>,
    #[serde(default)]
    windspeed_10m_max: Vec<Option<f64>>,
}

impl DailySeries {
    fn into_records(self) -> Vec<DailyRecord> {
        let at = |series: &[Option<f64>], i: usize| series.get(i).copied().flatten();
        self.time
            .iter()
            .enumerate()
            .map(|(i, date)| DailyRecord {
                date: date.clone(),
                max_temp_c: at(&self.temperature_2m_max, i),
                min_temp_c: at(&self.temperature_2m_min, i),
                precipitation_mm: at(&self.precipitation_sum, i),
                max_wind_speed_kmh: at(&self.windspeed_10m_max, i),
            })
            .collect()
    }
}

/// Client for the Open-Meteo APIs.
#[derive(Debug, Clone)]
pub struct WeatherService {
    client: Client,
    endpoints: WeatherEndpoints,
}

impl WeatherService {
    pub fn new(endpoints: WeatherEndpoints, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Internal(format!("Failed to create HTTP client: {}", e)))?;
        Ok(Self { client, endpoints })
    }

    pub fn endpoints(&self) -> &WeatherEndpoints {
        &self.endpoints
    }

    /// Resolve a city name. `None` when the geocoder has no match.
    pub async fn geocode(&self, city: &str) -> Result<Option<Location>> {
        let response = self
            .client
            .get(&self.endpoints.geocoding_url)
            .query(&[("name", city), ("count", "1"), ("language", "en"), ("format", "json")])
            .send()
            .await?;
        let found: GeocodingResponse = parse(response).await?;
        Ok(found.results.into_iter().next())
    }

    /// Weather for `city` over `period`. `None` when the city is unknown.
    pub async fn report(&self, city: &str, period: Period) -> Result<Option<WeatherReport>> {
        let Some(location) = self.geocode(city).await? else {
            return Ok(None);
        };
        debug!(
            "Resolved {} to {} ({}, {})",
            city, location.name, location.latitude, location.longitude
        );

        let mut query = vec![
            ("latitude", location.latitude.to_string()),
            ("longitude", location.longitude.to_string()),
            ("daily", DAILY_FIELDS.to_string()),
            ("timezone", location.timezone.clone()),
            ("temperature_unit", "celsius".to_string()),
        ];
        let url = match period {
            Period::PastWeek => {
                let (start, end) = past_week(Local::now().date_naive());
                query.push(("start_date", start.to_string()));
                query.push(("end_date", end.to_string()));
                &self.endpoints.archive_url
            }
            Period::NextWeek => {
                query.push(("forecast_days", "7".to_string()));
                &self.endpoints.forecast_url
            }
        };

        let response = self.client.get(url).query(&query).send().await?;
        let data: DailyResponse = parse(response).await?;

        Ok(Some(WeatherReport {
            city: location.name,
            country: location.country,
            latitude: location.latitude,
            longitude: location.longitude,
            timezone: data.timezone.unwrap_or_else(default_timezone),
            records: data.daily.unwrap_or_default().into_records(),
        }))
    }
}

/// Seven days ending today, both ends inclusive.
fn past_week(today: NaiveDate) -> (NaiveDate, NaiveDate) {
    (today - TimeDelta::days(6), today)
}

async fn parse<R: DeserializeOwned>(response: Response) -> Result<R> {
    let status = response.status();
    if !status.is_success() {
        let status_text = status.canonical_reason().unwrap_or("Unknown");
        let body = response.text().await.unwrap_or_default();
        return Err(Error::api(status.as_u16(), status_text, body));
    }
    Ok(response.json().await?)
}
