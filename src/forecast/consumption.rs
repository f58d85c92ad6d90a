#![allow(dead_code)]
//! Load forecaster (§4.5): a multiplicative daily/weekly/yearly seasonal
//! model fit on history when enough is available, else a fixed weekday
//! pattern.

use async_trait::async_trait;
use chrono::{DateTime, Datelike, Timelike, Utc};

use crate::domain::SeriesPoint;

#[async_trait]
pub trait LoadForecaster: Send + Sync {
    async fn predict_next_24h(&self) -> Vec<SeriesPoint>;
}

/// Fixed 24h weekday pattern: a baseline plus morning and evening bumps.
pub struct FixedPatternLoadForecaster {
    pub base_kw: f64,
}

impl Default for FixedPatternLoadForecaster {
    fn default() -> Self {
        Self { base_kw: 0.6 }
    }
}

fn bump(x: f64, mu: f64, sigma: f64) -> f64 {
    let z = (x - mu) / sigma.max(0.01);
    (-0.5 * z * z).exp()
}

fn weekday_pattern_kw(base_kw: f64, hour: f64) -> f64 {
    let morning = bump(hour, 7.5, 1.5);
    let evening = bump(hour, 18.5, 2.0) * 1.6;
    (base_kw + morning + evening).max(0.2)
}

#[async_trait]
impl LoadForecaster for FixedPatternLoadForecaster {
    async fn predict_next_24h(&self) -> Vec<SeriesPoint> {
        let now = Utc::now();
        (0..24i64)
            .map(|h| {
                let t = now + chrono::Duration::hours(h);
                SeriesPoint { timestamp: t, value: weekday_pattern_kw(self.base_kw, t.hour() as f64) }
            })
            .collect()
    }
}

/// A single historical `(timestamp, load_kw)` observation used to fit the
/// seasonal model.
#[derive(Debug, Clone, Copy)]
pub struct LoadObservation {
    pub timestamp: DateTime<Utc>,
    pub load_kw: f64,
}

/// Multiplicative daily × weekly × yearly seasonal decomposition: average
/// load scaled by an hour-of-day factor, a day-of-week factor, and a
/// month-of-year factor, each estimated as the mean ratio to overall mean
/// within that bucket. Requires at least 30 days of history to fit;
/// otherwise falls back to [`FixedPatternLoadForecaster`].
pub struct SeasonalLoadForecaster {
    fallback: FixedPatternLoadForecaster,
    overall_mean: f64,
    hourly_factor: [f64; 24],
    weekday_factor: [f64; 7],
    monthly_factor: [f64; 12],
    fitted: bool,
}

impl SeasonalLoadForecaster {
    pub fn fit(history: &[LoadObservation]) -> Self {
        let min_span_days = 30;
        let covers_enough_history = history
            .iter()
            .map(|o| o.timestamp)
            .min()
            .zip(history.iter().map(|o| o.timestamp).max())
            .map(|(min, max)| (max - min).num_days() >= min_span_days)
            .unwrap_or(false);

        if history.is_empty() || !covers_enough_history {
            return Self {
                fallback: FixedPatternLoadForecaster::default(),
                overall_mean: 0.0,
                hourly_factor: [1.0; 24],
                weekday_factor: [1.0; 7],
                monthly_factor: [1.0; 12],
                fitted: false,
            };
        }

        let overall_mean = history.iter().map(|o| o.load_kw).sum::<f64>() / history.len() as f64;
        let overall_mean = if overall_mean > 0.0 { overall_mean } else { 1.0 };

        let hourly_factor = bucket_factors(history, overall_mean, 24, |o| o.timestamp.hour() as usize);
        let weekday_factor = bucket_factors(history, overall_mean, 7, |o| {
            o.timestamp.weekday().num_days_from_monday() as usize
        });
        let monthly_factor =
            bucket_factors(history, overall_mean, 12, |o| o.timestamp.month0() as usize);

        Self {
            fallback: FixedPatternLoadForecaster::default(),
            overall_mean,
            hourly_factor: hourly_factor.try_into().unwrap(),
            weekday_factor: weekday_factor.try_into().unwrap(),
            monthly_factor: monthly_factor.try_into().unwrap(),
            fitted: true,
        }
    }
}

fn bucket_factors(
    history: &[LoadObservation],
    overall_mean: f64,
    buckets: usize,
    key: impl Fn(&LoadObservation) -> usize,
) -> Vec<f64> {
    let mut sums = vec![0.0; buckets];
    let mut counts = vec![0u32; buckets];
    for obs in history {
        let b = key(obs).min(buckets - 1);
        sums[b] += obs.load_kw;
        counts[b] += 1;
    }
    sums.iter()
        .zip(counts.iter())
        .map(|(sum, count)| if *count > 0 { (sum / *count as f64) / overall_mean } else { 1.0 })
        .collect()
}

#[async_trait]
impl LoadForecaster for SeasonalLoadForecaster {
    async fn predict_next_24h(&self) -> Vec<SeriesPoint> {
        if !self.fitted {
            return self.fallback.predict_next_24h().await;
        }

        let now = Utc::now();
        (0..24i64)
            .map(|h| {
                let t = now + chrono::Duration::hours(h);
                let hf = self.hourly_factor[t.hour() as usize];
                let wf = self.weekday_factor[t.weekday().num_days_from_monday() as usize];
                let mf = self.monthly_factor[t.month0() as usize];
                let value = (self.overall_mean * hf * wf * mf).max(0.0);
                SeriesPoint { timestamp: t, value }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn fixed_pattern_never_negative() {
        let forecaster = FixedPatternLoadForecaster::default();
        let series = forecaster.predict_next_24h().await;
        assert_eq!(series.len(), 24);
        assert!(series.iter().all(|p| p.value >= 0.0));
    }

    #[tokio::test]
    async fn seasonal_forecaster_falls_back_without_enough_history() {
        let forecaster = SeasonalLoadForecaster::fit(&[]);
        assert!(!forecaster.fitted);
        let series = forecaster.predict_next_24h().await;
        assert_eq!(series.len(), 24);
    }

    #[test]
    fn seasonal_forecaster_fits_with_sufficient_history() {
        let now = Utc::now();
        let history: Vec<_> = (0..40 * 24)
            .map(|i| LoadObservation {
                timestamp: now - chrono::Duration::hours(i),
                load_kw: 1.0 + (i % 24) as f64 * 0.1,
            })
            .collect();
        let forecaster = SeasonalLoadForecaster::fit(&history);
        assert!(forecaster.fitted);
    }
}
