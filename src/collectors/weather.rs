use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use log::debug;
use reqwest::Client;
use serde::Deserialize;

use super::{CollectContext, Collector};
use crate::error::CollectorError;
use crate::metrics::{CollectorKind, Reading, WeatherReport};

const ENDPOINT: &str = "https://api.openweathermap.org/data/2.5/weather";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Current conditions from OpenWeatherMap. Without a usable API key the
/// collector reports no weather instead of failing.
pub struct WeatherCollector {
    client: Client,
}

impl WeatherCollector {
    pub fn new() -> Self {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .unwrap_or_default();
        WeatherCollector { client }
    }
}

impl Default for WeatherCollector {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Collector for WeatherCollector {
    fn kind(&self) -> CollectorKind {
        CollectorKind::Weather
    }

    fn source(&self) -> &'static str {
        "openweathermap"
    }

    async fn produce(&mut self, ctx: &CollectContext) -> Result<Reading, CollectorError> {
        let weather = &ctx.config.weather;
        let Some(api_key) = weather.usable_key() else {
            debug!("weather disabled: no API key configured");
            return Ok(Reading::Weather(None));
        };

        let lat = weather.latitude.to_string();
        let lon = weather.longitude.to_string();
        let response = self
            .client
            .get(ENDPOINT)
            .query(&[
                ("lat", lat.as_str()),
                ("lon", lon.as_str()),
                ("appid", api_key),
                ("units", "metric"),
            ])
            .send()
            .await
            .map_err(|err| {
                if err.is_timeout() {
                    CollectorError::timeout(REQUEST_TIMEOUT)
                } else {
                    CollectorError::unavailable(err.to_string())
                }
            })?;

        if !response.status().is_success() {
            return Err(CollectorError::unavailable(format!(
                "weather API returned {}",
                response.status()
            )));
        }

        let body = response
            .text()
            .await
            .map_err(|err| CollectorError::unavailable(err.to_string()))?;
        parse_weather(&body).map(|report| Reading::Weather(Some(report)))
    }
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    name: Option<String>,
    main: ApiMain,
    #[serde(default)]
    weather: Vec<ApiCondition>,
    #[serde(default)]
    wind: ApiWind,
    #[serde(default)]
    clouds: ApiClouds,
    #[serde(default)]
    sys: ApiSys,
}

#[derive(Debug, Deserialize)]
struct ApiMain {
    temp: f64,
    feels_like: Option<f64>,
    #[serde(default)]
    humidity: u32,
    #[serde(default)]
    pressure: u32,
}

#[derive(Debug, Deserialize)]
struct ApiCondition {
    main: String,
    #[serde(default)]
    description: String,
}

#[derive(Debug, Default, Deserialize)]
struct ApiWind {
    #[serde(default)]
    speed: f64,
}

#[derive(Debug, Default, Deserialize)]
struct ApiClouds {
    #[serde(default)]
    all: u32,
}

#[derive(Debug, Default, Deserialize)]
struct ApiSys {
    country: Option<String>,
    sunrise: Option<i64>,
    sunset: Option<i64>,
}

pub fn parse_weather(body: &str) -> Result<WeatherReport, CollectorError> {
    let api: ApiResponse =
        serde_json::from_str(body).map_err(|err| CollectorError::parse(format!("weather JSON: {}", err)))?;

    let description = match api.weather.first() {
        Some(cond) if cond.description.is_empty() => cond.main.clone(),
        Some(cond) => format!("{}: {}", cond.main, cond.description),
        None => "Unknown".to_string(),
    };
    let city = api.name.unwrap_or_else(|| "Unknown".to_string());
    let location = match api.sys.country {
        Some(country) if !country.is_empty() => format!("{}, {}", city, country),
        _ => city,
    };

    Ok(WeatherReport {
        location,
        temperature: api.main.temp,
        feels_like: api.main.feels_like.unwrap_or(api.main.temp),
        description,
        humidity: api.main.humidity,
        wind_speed: api.wind.speed,
        pressure: api.main.pressure,
        cloud_cover: api.clouds.all,
        sunrise: api.sys.sunrise.and_then(|ts| DateTime::<Utc>::from_timestamp(ts, 0)),
        sunset: api.sys.sunset.and_then(|ts| DateTime::<Utc>::from_timestamp(ts, 0)),
    })
}
