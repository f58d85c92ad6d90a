//! Forecast Aggregator (C5): `fetch_forecast` combines the price, PV, and
//! load providers into one [`ForecastSeries`] and folds the result into the
//! owned [`MarketSignalWindow`].

pub mod consumption;
pub mod market_signal;
pub mod prices;
pub mod production;
pub mod tariff;
pub mod weather;

pub use consumption::*;
pub use market_signal::*;
pub use prices::*;
pub use production::*;
pub use tariff::*;
pub use weather::*;

use std::sync::Arc;

use tokio::sync::RwLock;

use crate::domain::{ForecastSeries, Region, SeriesPoint};

/// Owns the three providers plus the Market Signal Window and exposes the
/// single `fetch_forecast` entry point the Site Controller calls once per
/// optimization cycle (§4.5).
pub struct ForecastAggregator {
    pub region: Region,
    pub prices: Box<dyn PriceForecaster>,
    pub pv: Box<dyn PvForecaster>,
    pub load: Box<dyn LoadForecaster>,
    pub tariff: GridTariffSchedule,
    signal_window: Arc<RwLock<MarketSignalWindow>>,
}

impl ForecastAggregator {
    pub fn new(
        region: Region,
        prices: Box<dyn PriceForecaster>,
        pv: Box<dyn PvForecaster>,
        load: Box<dyn LoadForecaster>,
        tariff: GridTariffSchedule,
    ) -> Self {
        Self {
            region,
            prices,
            pv,
            load,
            tariff,
            signal_window: Arc::new(RwLock::new(MarketSignalWindow::new())),
        }
    }

    pub fn signal_window(&self) -> Arc<RwLock<MarketSignalWindow>> {
        self.signal_window.clone()
    }

    pub async fn fetch_forecast(&self) -> anyhow::Result<ForecastSeries> {
        let prices = self.prices.predict(self.region).await?;
        let pv = self.pv.predict_next_24h().await;
        let load = self.load.predict_next_24h().await;

        self.update_signal_window(&prices, &pv, &load).await;

        Ok(ForecastSeries {
            region: self.region,
            generated_at: chrono::Utc::now(),
            prices,
            pv,
            load,
        })
    }

    async fn update_signal_window(&self, prices: &[SeriesPoint], pv: &[SeriesPoint], load: &[SeriesPoint]) {
        let mut window = self.signal_window.write().await;
        for i in 0..prices.len() {
            let price = prices[i].value;
            let pv_v = pv.get(i).map(|p| p.value).unwrap_or(0.0);
            let load_v = load.get(i).map(|p| p.value).unwrap_or(0.0);
            window.push(prices[i].timestamp, price, pv_v, load_v);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn fetch_forecast_aligns_series_lengths_and_updates_window() {
        let aggregator = ForecastAggregator::new(
            Region::At,
            Box::new(AwattarPriceForecaster::new(Duration::from_secs(3600), true).unwrap()),
            Box::new(DemoPvForecaster::default()),
            Box::new(FixedPatternLoadForecaster::default()),
            GridTariffSchedule::flat(0.25),
        );

        let series = aggregator.fetch_forecast().await.unwrap();
        assert_eq!(series.horizon_len(), 24);
        assert_eq!(series.pv.len(), 24);
        assert_eq!(series.load.len(), 24);

        let window = aggregator.signal_window();
        let window = window.read().await;
        assert!(window.price_6h_avg().is_finite());
    }
}
