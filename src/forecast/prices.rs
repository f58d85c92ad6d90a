#![allow(dead_code)]
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Timelike, Utc};
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use serde::Deserialize;
use std::{sync::Arc, time::Duration};
use tokio::sync::RwLock;
use tracing::warn;

use crate::domain::{Region, SeriesPoint};

#[async_trait]
pub trait PriceForecaster: Send + Sync {
    /// Day-ahead EUR/MWh prices, hourly, covering at least the next 24h.
    async fn predict(&self, region: Region) -> Result<Vec<SeriesPoint>>;
}

/// awattar day-ahead market data client (§4.5), with an in-memory cache and
/// a fixed demo curve fallback for offline/demo operation.
#[derive(Clone)]
pub struct AwattarPriceForecaster {
    client: reqwest::Client,
    cache: Arc<RwLock<Option<(DateTime<Utc>, Region, Vec<SeriesPoint>)>>>,
    ttl: Duration,
    demo_mode: bool,
}

impl AwattarPriceForecaster {
    pub fn new(ttl: Duration, demo_mode: bool) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(USER_AGENT, HeaderValue::from_static("bess-ems/0.1"));
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .default_headers(headers)
            .build()?;
        Ok(Self {
            client,
            cache: Arc::new(RwLock::new(None)),
            ttl,
            demo_mode,
        })
    }

    fn endpoint(region: Region) -> &'static str {
        match region {
            Region::At => "https://api.awattar.at/v1/marketdata",
            Region::De => "https://api.awattar.de/v1/marketdata",
        }
    }

    async fn fetch_live(&self, region: Region) -> Result<Vec<SeriesPoint>> {
        let resp = self
            .client
            .get(Self::endpoint(region))
            .send()
            .await
            .context("awattar GET failed")?;
        let status = resp.status();
        let body = resp.text().await.context("awattar read failed")?;
        if !status.is_success() {
            anyhow::bail!("awattar API error: HTTP {status}: {body}");
        }
        let raw: AwattarResponse =
            serde_json::from_str(&body).context("awattar JSON parse failed")?;
        Ok(raw
            .data
            .into_iter()
            .filter_map(|e| {
                DateTime::from_timestamp_millis(e.start_timestamp)
                    .map(|ts| SeriesPoint { timestamp: ts, value: e.marketprice })
            })
            .collect())
    }

    /// Night-low, morning/evening-peak 24h demo curve (EUR/MWh).
    fn demo_curve() -> Vec<SeriesPoint> {
        let now = Utc::now();
        let start = now
            .date_naive()
            .and_hms_opt(now.hour(), 0, 0)
            .unwrap()
            .and_utc();
        (0..24)
            .map(|h| {
                let hh = h as f64;
                let morning = bump(hh, 8.0, 1.5) * 60.0;
                let evening = bump(hh, 19.0, 2.0) * 80.0;
                let night_low = if (0.0..6.0).contains(&hh) { -10.0 } else { 0.0 };
                SeriesPoint {
                    timestamp: start + chrono::Duration::hours(h),
                    value: 60.0 + morning + evening + night_low,
                }
            })
            .collect()
    }
}

fn bump(x: f64, mu: f64, sigma: f64) -> f64 {
    let z = (x - mu) / sigma.max(0.01);
    (-0.5 * z * z).exp()
}

#[async_trait]
impl PriceForecaster for AwattarPriceForecaster {
    async fn predict(&self, region: Region) -> Result<Vec<SeriesPoint>> {
        if self.demo_mode {
            return Ok(Self::demo_curve());
        }

        {
            let c = self.cache.read().await;
            if let Some((ts, r, v)) = &*c {
                if *r == region && (Utc::now() - *ts).num_seconds() < self.ttl.as_secs() as i64 {
                    return Ok(v.clone());
                }
            }
        }

        match self.fetch_live(region).await {
            Ok(points) => {
                let mut c = self.cache.write().await;
                *c = Some((Utc::now(), region, points.clone()));
                Ok(points)
            }
            Err(e) => {
                warn!(error=%e, region=%region, "awattar fetch failed, falling back to demo curve");
                Ok(Self::demo_curve())
            }
        }
    }
}

#[derive(Debug, Deserialize)]
struct AwattarResponse {
    data: Vec<AwattarEntry>,
}

#[derive(Debug, Deserialize)]
struct AwattarEntry {
    start_timestamp: i64,
    marketprice: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn demo_mode_always_produces_24h_curve() {
        let forecaster = AwattarPriceForecaster::new(Duration::from_secs(3600), true).unwrap();
        let points = forecaster.predict(Region::At).await.unwrap();
        assert_eq!(points.len(), 24);
        assert!(points.iter().all(|p| p.value.is_finite()));
    }

    #[test]
    fn endpoints_match_region() {
        assert!(AwattarPriceForecaster::endpoint(Region::At).contains("awattar.at"));
        assert!(AwattarPriceForecaster::endpoint(Region::De).contains("awattar.de"));
    }
}
