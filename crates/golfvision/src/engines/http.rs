//! HTTP enrichment providers (Nominatim geocoding, Open-Meteo elevation and
//! weather).

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::Value;

use super::{ElevationProfile, ElevationSource, EngineError, Geocoder, WeatherReport, WeatherSource};
use crate::job::Coordinates;

const USER_AGENT: &str = concat!("golfvision/", env!("CARGO_PKG_VERSION"));
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Grid offset in degrees between elevation samples (roughly 500 m).
const GRID_STEP_DEG: f64 = 0.005;

fn create_http_client(timeout: Duration) -> Result<Client, EngineError> {
    Ok(Client::builder()
        .user_agent(USER_AGENT)
        .connect_timeout(CONNECT_TIMEOUT)
        .timeout(timeout)
        .build()?)
}

async fn get_json(client: &Client, url: &str, query: &[(&str, String)]) -> Result<Value, EngineError> {
    let response = client.get(url).query(query).send().await?;
    if !response.status().is_success() {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        return Err(EngineError::InvalidResponse(format!(
            "{} returned {}: {}",
            url,
            status,
            body.chars().take(200).collect::<String>()
        )));
    }
    Ok(response.json().await?)
}

// ─── Nominatim ──────────────────────────────────────────────────────────────

#[derive(Deserialize)]
struct NominatimPlace {
    lat: String,
    lon: String,
}

fn parse_nominatim(name: &str, body: Value) -> Result<Coordinates, EngineError> {
    let places: Vec<NominatimPlace> = serde_json::from_value(body)
        .map_err(|e| EngineError::InvalidResponse(format!("nominatim: {}", e)))?;
    let place = places
        .into_iter()
        .next()
        .ok_or_else(|| EngineError::NotFound(name.to_string()))?;
    let lat = place.lat.parse::<f64>();
    let lng = place.lon.parse::<f64>();
    match (lat, lng) {
        (Ok(lat), Ok(lng)) if Coordinates::new(lat, lng).is_valid() => Ok(Coordinates::new(lat, lng)),
        _ => Err(EngineError::InvalidResponse(format!(
            "nominatim: bad coordinates '{}', '{}'",
            place.lat, place.lon
        ))),
    }
}

pub struct NominatimGeocoder {
    client: Client,
    base_url: String,
}

impl NominatimGeocoder {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, EngineError> {
        Ok(Self {
            client: create_http_client(timeout)?,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl Geocoder for NominatimGeocoder {
    async fn geocode(&self, name: &str) -> Result<Coordinates, EngineError> {
        let url = format!("{}/search", self.base_url);
        let body = get_json(
            &self.client,
            &url,
            &[
                ("q", name.to_string()),
                ("format", "json".to_string()),
                ("limit", "1".to_string()),
            ],
        )
        .await?;
        parse_nominatim(name, body)
    }
}

// ─── Open-Meteo ─────────────────────────────────────────────────────────────

/// 3x3 grid around `at`, row-major from north-west.
fn sample_grid(at: Coordinates) -> Vec<Coordinates> {
    let mut grid = Vec::with_capacity(9);
    for dy in [1.0, 0.0, -1.0] {
        for dx in [-1.0, 0.0, 1.0] {
            grid.push(Coordinates::new(
                at.lat + dy * GRID_STEP_DEG,
                at.lng + dx * GRID_STEP_DEG,
            ));
        }
    }
    grid
}

fn join_axis(points: &[Coordinates], axis: fn(&Coordinates) -> f64) -> String {
    points
        .iter()
        .map(|p| format!("{:.5}", axis(p)))
        .collect::<Vec<_>>()
        .join(",")
}

fn parse_elevation(body: &Value) -> Result<ElevationProfile, EngineError> {
    let samples: Vec<f64> = body
        .get("elevation")
        .and_then(|e| e.as_array())
        .ok_or_else(|| EngineError::InvalidResponse("open-meteo: missing elevation".to_string()))?
        .iter()
        .filter_map(|v| v.as_f64())
        .collect();
    if samples.is_empty() {
        return Err(EngineError::InvalidResponse(
            "open-meteo: empty elevation".to_string(),
        ));
    }
    Ok(ElevationProfile::from_samples(samples))
}

fn describe_weather_code(code: i64) -> &'static str {
    match code {
        0 => "Clear skies",
        1..=3 => "Partly cloudy",
        45 | 48 => "Foggy",
        51..=67 => "Light rain",
        71..=77 => "Snow",
        80..=82 => "Passing showers",
        95..=99 => "Thunderstorms",
        _ => "Mixed conditions",
    }
}

fn parse_weather(body: &Value) -> Result<WeatherReport, EngineError> {
    let current = body
        .get("current_weather")
        .ok_or_else(|| EngineError::InvalidResponse("open-meteo: missing current_weather".to_string()))?;
    let temperature_c = current.get("temperature").and_then(|v| v.as_f64());
    let wind_kph = current.get("windspeed").and_then(|v| v.as_f64());
    let code = current
        .get("weathercode")
        .and_then(|v| v.as_i64())
        .unwrap_or(-1);

    let mut summary = describe_weather_code(code).to_string();
    if let Some(t) = temperature_c {
        summary.push_str(&format!(", {:.0}°C", t));
    }
    if let Some(w) = wind_kph {
        summary.push_str(&format!(", wind {:.0} km/h", w));
    }

    Ok(WeatherReport {
        summary,
        temperature_c,
        wind_kph,
    })
}

pub struct OpenMeteoClient {
    client: Client,
    base_url: String,
}

impl OpenMeteoClient {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, EngineError> {
        Ok(Self {
            client: create_http_client(timeout)?,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl ElevationSource for OpenMeteoClient {
    async fn elevation_profile(&self, at: Coordinates) -> Result<ElevationProfile, EngineError> {
        let grid = sample_grid(at);
        let url = format!("{}/v1/elevation", self.base_url);
        let body = get_json(
            &self.client,
            &url,
            &[
                ("latitude", join_axis(&grid, |c| c.lat)),
                ("longitude", join_axis(&grid, |c| c.lng)),
            ],
        )
        .await?;
        parse_elevation(&body)
    }
}

#[async_trait]
impl WeatherSource for OpenMeteoClient {
    async fn weather(&self, at: Coordinates) -> Result<WeatherReport, EngineError> {
        let url = format!("{}/v1/forecast", self.base_url);
        let body = get_json(
            &self.client,
            &url,
            &[
                ("latitude", format!("{:.4}", at.lat)),
                ("longitude", format!("{:.4}", at.lng)),
                ("current_weather", "true".to_string()),
            ],
        )
        .await?;
        parse_weather(&body)
    }
}
