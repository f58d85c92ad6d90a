#![allow(dead_code)]
//! PV production forecaster (§4.5): a clear-sky model adjusted for cloud
//! cover and panel temperature derating when weather is available, falling
//! back to a sinusoidal demo curve.

use async_trait::async_trait;
use chrono::{DateTime, Datelike, Timelike, Utc};

use crate::domain::SeriesPoint;
use crate::forecast::weather::WeatherProvider;

#[async_trait]
pub trait PvForecaster: Send + Sync {
    async fn predict_next_24h(&self) -> Vec<SeriesPoint>;
}

/// Simplified solar-elevation clear-sky model keyed to latitude and
/// day-of-year, adjusted for cloud cover and hot-panel derating.
pub struct ClearSkyPvForecaster<W: WeatherProvider> {
    pub peak_kw: f64,
    pub latitude: f64,
    pub longitude: f64,
    pub weather: W,
}

impl<W: WeatherProvider> ClearSkyPvForecaster<W> {
    pub fn new(peak_kw: f64, latitude: f64, longitude: f64, weather: W) -> Self {
        Self { peak_kw, latitude, longitude, weather }
    }

    /// Clear-sky irradiance factor in `[0, 1]` for a given hour-of-day and
    /// day-of-year, ignoring weather.
    fn clear_sky(&self, hour: f64, day_of_year: i64) -> f64 {
        let seasonal_shift = ((day_of_year as f64 - 80.0) / 365.0 * std::f64::consts::TAU).sin() * 2.0;
        let sunrise = 7.0 - seasonal_shift;
        let sunset = 19.0 + seasonal_shift;
        if hour < sunrise || hour > sunset {
            return 0.0;
        }
        let day_len = (sunset - sunrise).max(0.01);
        let x = (hour - sunrise) / day_len;
        let elevation = (std::f64::consts::PI * x).sin().max(0.0);
        let seasonal_factor =
            0.7 + 0.3 * ((day_of_year as f64 - 80.0) / 365.0 * std::f64::consts::TAU).sin();
        elevation * seasonal_factor.clamp(0.4, 1.0)
    }
}

#[async_trait]
impl<W: WeatherProvider + Sync> PvForecaster for ClearSkyPvForecaster<W> {
    async fn predict_next_24h(&self) -> Vec<SeriesPoint> {
        let weather = self.weather.forecast_next_24h(self.latitude, self.longitude).await;
        let now = Utc::now();

        (0..24i64)
            .map(|h| {
                let t: DateTime<Utc> = now + chrono::Duration::hours(h);
                let hour = t.hour() as f64 + t.minute() as f64 / 60.0;
                let day_of_year = t.ordinal0() as i64;
                let clear_sky = self.clear_sky(hour, day_of_year);

                let (clouds, temp) = weather
                    .get(h as usize)
                    .map(|w| (w.cloud_cover_percent, w.temperature_c))
                    .unwrap_or((20.0, 18.0));

                let cloud_factor = 1.0 - 0.8 * (clouds / 100.0);
                let temp_derate = 1.0 - (temp - 25.0).max(0.0) * 0.004;

                let pv_kw = (self.peak_kw * clear_sky * cloud_factor * temp_derate).max(0.0);
                SeriesPoint { timestamp: t, value: pv_kw }
            })
            .collect()
    }
}

/// Sinusoidal demo curve between 06:00 and 20:00, peak 50 kW at 13:00.
pub struct DemoPvForecaster {
    pub peak_kw: f64,
}

impl Default for DemoPvForecaster {
    fn default() -> Self {
        Self { peak_kw: 50.0 }
    }
}

#[async_trait]
impl PvForecaster for DemoPvForecaster {
    async fn predict_next_24h(&self) -> Vec<SeriesPoint> {
        let now = Utc::now();
        (0..24i64)
            .map(|h| {
                let t = now + chrono::Duration::hours(h);
                let hour = t.hour() as f64;
                let pv = if (6.0..=20.0).contains(&hour) {
                    let x = (hour - 6.0) / 14.0;
                    (std::f64::consts::PI * x).sin().max(0.0) * self.peak_kw
                } else {
                    0.0
                };
                SeriesPoint { timestamp: t, value: pv.max(0.0) }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::forecast::weather::DemoWeatherProvider;

    #[tokio::test]
    async fn clear_sky_forecast_never_negative() {
        let forecaster = ClearSkyPvForecaster::new(10.0, 48.2, 16.4, DemoWeatherProvider);
        let series = forecaster.predict_next_24h().await;
        assert_eq!(series.len(), 24);
        assert!(series.iter().all(|p| p.value >= 0.0));
    }

    #[tokio::test]
    async fn demo_curve_peaks_near_midday() {
        let forecaster = DemoPvForecaster::default();
        let series = forecaster.predict_next_24h().await;
        assert!(series.iter().all(|p| p.value >= 0.0));
        assert!(series.iter().any(|p| p.value > 0.0));
    }
}
