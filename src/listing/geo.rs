use crate::config::GEOCODER_URL;
use crate::http::build_client;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{debug, warn};

/// What the client's geolocation request produced.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum LocationReport {
    Coordinates { latitude: f64, longitude: f64 },
    Failed { error: LocationFailure },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LocationFailure {
    PermissionDenied,
    Unavailable,
    Timeout,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "code", rename_all = "snake_case")]
pub enum LocationWarning {
    LocationUnavailable { reason: LocationFailure },
    InvalidCoordinates,
}

impl fmt::Display for LocationWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LocationWarning::LocationUnavailable {
                reason: LocationFailure::PermissionDenied,
            } => write!(
                f,
                "location access was denied; you can type your location instead"
            ),
            LocationWarning::LocationUnavailable { .. } => {
                write!(f, "could not determine your location")
            }
            LocationWarning::InvalidCoordinates => write!(f, "coordinates are out of range"),
        }
    }
}

#[derive(Debug, Deserialize)]
struct ReverseResponse {
    #[serde(default)]
    display_name: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ReverseGeocoder {
    url: String,
    http: Client,
}

impl ReverseGeocoder {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            http: build_client(),
        }
    }

    pub fn from_env() -> Self {
        Self::new(GEOCODER_URL.as_str())
    }

    /// Turns coordinates into an address. Any failure degrades to the raw
    /// coordinate string rather than an error.
    pub async fn resolve(&self, latitude: f64, longitude: f64) -> String {
        let fallback = coordinate_label(latitude, longitude);
        if self.url.trim().is_empty() {
            return fallback;
        }

        let lat = latitude.to_string();
        let lon = longitude.to_string();
        let response = self
            .http
            .get(&self.url)
            .query(&[("format", "json"), ("lat", &lat), ("lon", &lon)])
            .send()
            .await;

        let response = match response {
            Ok(r) if r.status().is_success() => r,
            Ok(r) => {
                warn!(target = "barter.geo", status = r.status().as_u16(), "reverse_geocode_rejected");
                return fallback;
            }
            Err(err) => {
                warn!(target = "barter.geo", error = %err, "reverse_geocode_failed");
                return fallback;
            }
        };

        match response.json::<ReverseResponse>().await {
            Ok(ReverseResponse {
                display_name: Some(name),
            }) if !name.trim().is_empty() => {
                debug!(target = "barter.geo", "reverse_geocode_resolved");
                name.trim().to_string()
            }
            _ => fallback,
        }
    }
}

pub fn coordinates_in_range(latitude: f64, longitude: f64) -> bool {
    latitude.is_finite()
        && longitude.is_finite()
        && (-90.0..=90.0).contains(&latitude)
        && (-180.0..=180.0).contains(&longitude)
}

pub fn coordinate_label(latitude: f64, longitude: f64) -> String {
    format!("{latitude:.6}, {longitude:.6}")
}
