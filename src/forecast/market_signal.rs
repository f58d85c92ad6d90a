//! Market Signal Window (§3, supplemental): a bounded rolling window backing
//! the derived statistics the Strategy Selector's learned-classifier
//! feature vector needs (§4.8): `price_trend`, `price_volatility`, and
//! rolling 6h averages of price/PV/load.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};

const WINDOW_HOURS: i64 = 168;
const MAX_TREND_SLOPE_EUR_PER_MWH_PER_H: f64 = 50.0;
const MAX_VOLATILITY_EUR_PER_MWH: f64 = 100.0;

#[derive(Debug, Clone, Copy)]
struct Point {
    timestamp: DateTime<Utc>,
    price: f64,
    pv: f64,
    load: f64,
}

/// Rolling 168h window of observed `(price, pv, load)` points, owned by the
/// Forecast Aggregator and refreshed once per optimization cycle.
#[derive(Debug, Clone, Default)]
pub struct MarketSignalWindow {
    points: VecDeque<Point>,
}

impl MarketSignalWindow {
    pub fn new() -> Self {
        Self { points: VecDeque::new() }
    }

    pub fn push(&mut self, timestamp: DateTime<Utc>, price: f64, pv: f64, load: f64) {
        self.points.push_back(Point { timestamp, price, pv, load });
        let cutoff = timestamp - chrono::Duration::hours(WINDOW_HOURS);
        while self.points.front().map(|p| p.timestamp < cutoff).unwrap_or(false) {
            self.points.pop_front();
        }
    }

    /// Linear-regression slope of price over the window (EUR/MWh per hour),
    /// normalized to `[-1, 1]` assuming a 50 EUR/MWh/h maximum swing.
    pub fn price_trend(&self) -> f64 {
        if self.points.len() < 2 {
            return 0.0;
        }
        let t0 = self.points.front().unwrap().timestamp;
        let xs: Vec<f64> = self
            .points
            .iter()
            .map(|p| (p.timestamp - t0).num_seconds() as f64 / 3600.0)
            .collect();
        let ys: Vec<f64> = self.points.iter().map(|p| p.price).collect();
        let slope = linreg_slope(&xs, &ys);
        (slope / MAX_TREND_SLOPE_EUR_PER_MWH_PER_H).clamp(-1.0, 1.0)
    }

    /// Population standard deviation of price over the window, normalized
    /// to a 100 EUR/MWh ceiling (so the result lands in `[0, 1]` for
    /// typical spreads).
    pub fn price_volatility(&self) -> f64 {
        if self.points.is_empty() {
            return 0.0;
        }
        let mean = self.points.iter().map(|p| p.price).sum::<f64>() / self.points.len() as f64;
        let variance = self.points.iter().map(|p| (p.price - mean).powi(2)).sum::<f64>()
            / self.points.len() as f64;
        (variance.sqrt() / MAX_VOLATILITY_EUR_PER_MWH).clamp(0.0, 1.0)
    }

    fn recent(&self, hours: i64) -> impl Iterator<Item = &Point> {
        let cutoff = self
            .points
            .back()
            .map(|p| p.timestamp - chrono::Duration::hours(hours));
        self.points.iter().filter(move |p| cutoff.map(|c| p.timestamp >= c).unwrap_or(true))
    }

    pub fn price_6h_avg(&self) -> f64 {
        avg(self.recent(6).map(|p| p.price))
    }

    pub fn pv_6h_avg(&self) -> f64 {
        avg(self.recent(6).map(|p| p.pv))
    }

    pub fn load_6h_avg(&self) -> f64 {
        avg(self.recent(6).map(|p| p.load))
    }

    pub fn current_price(&self) -> f64 {
        self.points.back().map(|p| p.price).unwrap_or(0.0)
    }
}

fn avg(values: impl Iterator<Item = f64>) -> f64 {
    let (sum, count) = values.fold((0.0, 0u32), |(s, c), v| (s + v, c + 1));
    if count == 0 { 0.0 } else { sum / count as f64 }
}

fn linreg_slope(xs: &[f64], ys: &[f64]) -> f64 {
    let n = xs.len() as f64;
    let mean_x = xs.iter().sum::<f64>() / n;
    let mean_y = ys.iter().sum::<f64>() / n;
    let mut num = 0.0;
    let mut den = 0.0;
    for (x, y) in xs.iter().zip(ys.iter()) {
        num += (x - mean_x) * (y - mean_y);
        den += (x - mean_x).powi(2);
    }
    if den.abs() < f64::EPSILON { 0.0 } else { num / den }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn rising_prices_yield_positive_trend() {
        let mut window = MarketSignalWindow::new();
        let t0 = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        for h in 0..10 {
            window.push(t0 + chrono::Duration::hours(h), 50.0 + h as f64 * 5.0, 1.0, 1.0);
        }
        assert!(window.price_trend() > 0.0);
    }

    #[test]
    fn flat_prices_yield_zero_volatility() {
        let mut window = MarketSignalWindow::new();
        let t0 = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        for h in 0..10 {
            window.push(t0 + chrono::Duration::hours(h), 50.0, 1.0, 1.0);
        }
        assert_eq!(window.price_volatility(), 0.0);
    }

    #[test]
    fn window_evicts_points_older_than_168_hours() {
        let mut window = MarketSignalWindow::new();
        let t0 = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        window.push(t0, 10.0, 0.0, 0.0);
        window.push(t0 + chrono::Duration::hours(200), 20.0, 0.0, 0.0);
        assert_eq!(window.points.len(), 1);
    }
}
