#![allow(dead_code)]
//! Weather inputs to the PV provider (§4.5): cloud cover and temperature.
//! No external forecast API is wired in by default; [`DemoWeatherProvider`]
//! gives the PV clear-sky model a plausible clear-day baseline, and a real
//! client can be added behind the same trait.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct WeatherPoint {
    pub timestamp: DateTime<Utc>,
    pub temperature_c: f64,
    pub cloud_cover_percent: f64,
}

#[async_trait]
pub trait WeatherProvider: Send + Sync {
    async fn forecast_next_24h(&self, latitude: f64, longitude: f64) -> Vec<WeatherPoint>;
}

/// Assumes a mild, mostly clear day. Good enough to keep the PV clear-sky
/// model exercised when no real weather feed is configured.
pub struct DemoWeatherProvider;

#[async_trait]
impl WeatherProvider for DemoWeatherProvider {
    async fn forecast_next_24h(&self, _latitude: f64, _longitude: f64) -> Vec<WeatherPoint> {
        let now = Utc::now();
        (0..24)
            .map(|h| WeatherPoint {
                timestamp: now + chrono::Duration::hours(h),
                temperature_c: 18.0,
                cloud_cover_percent: 20.0,
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn demo_provider_returns_24_points() {
        let points = DemoWeatherProvider.forecast_next_24h(48.2, 16.4).await;
        assert_eq!(points.len(), 24);
    }
}
