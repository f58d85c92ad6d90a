//! Strategy Selector (C8): hysteretic choice among the Strategy Set, with
//! an optional learned classifier standing in for the score-based
//! argmax (§4.8).

use chrono::{Datelike, Timelike, Utc};

use crate::domain::{ForecastSeries, PlantState};
use crate::forecast::MarketSignalWindow;

use super::Strategy;

#[derive(Debug, Clone, PartialEq)]
pub enum SelectionMode {
    Auto,
    Manual(String),
}

/// The fixed 17-feature vector fed to the optional learned classifier
/// (§4.8). Field order matches the spec's listing exactly.
pub fn feature_vector(
    state: &PlantState,
    forecast: &ForecastSeries,
    window: &MarketSignalWindow,
    current_strategy_score: f64,
) -> [f64; 17] {
    let now = Utc::now();
    let current_price = forecast.prices.first().map(|p| p.value).unwrap_or(window.current_price());
    [
        state.soc_pct / 100.0,
        state.soh_pct / 100.0,
        state.temperature_c / 50.0,
        window.price_trend(),
        window.price_volatility(),
        current_price / 100.0,
        window.pv_6h_avg() / 100.0,
        window.load_6h_avg() / 100.0,
        window.price_6h_avg() / 100.0,
        now.hour() as f64 / 24.0,
        now.weekday().num_days_from_monday() as f64 / 7.0,
        if matches!(now.weekday(), chrono::Weekday::Sat | chrono::Weekday::Sun) { 1.0 } else { 0.0 },
        current_strategy_score,
        state.p_bess_kw / 100.0,
        state.p_pv_kw / 100.0,
        state.p_load_kw / 100.0,
        state.p_grid_kw / 100.0,
    ]
}

/// One joined `(feature_vector, chosen_strategy)` training example, built
/// by pairing a historical optimization record with the closest state
/// snapshot within 1h (§4.8).
#[derive(Debug, Clone)]
pub struct TrainingExample {
    pub features: [f64; 17],
    pub strategy_name: String,
}

/// Minimum number of joined training examples before the learned stage is
/// attempted; below this, the selector always falls back to score argmax.
pub const MIN_TRAINING_RECORDS: usize = 100;

#[cfg(feature = "ml")]
pub struct LearnedClassifier {
    model: smartcore::ensemble::random_forest_classifier::RandomForestClassifier<
        f64,
        u32,
        smartcore::linalg::basic::matrix::DenseMatrix<f64>,
        Vec<u32>,
    >,
    class_names: Vec<String>,
}

#[cfg(feature = "ml")]
impl LearnedClassifier {
    pub fn train(examples: &[TrainingExample]) -> anyhow::Result<Option<Self>> {
        if examples.len() < MIN_TRAINING_RECORDS {
            return Ok(None);
        }

        use smartcore::ensemble::random_forest_classifier::{
            RandomForestClassifier, RandomForestClassifierParameters,
        };
        use smartcore::linalg::basic::matrix::DenseMatrix;

        let mut class_names: Vec<String> = examples.iter().map(|e| e.strategy_name.clone()).collect();
        class_names.sort();
        class_names.dedup();

        let x: Vec<Vec<f64>> = examples.iter().map(|e| e.features.to_vec()).collect();
        let y: Vec<u32> = examples
            .iter()
            .map(|e| class_names.iter().position(|n| n == &e.strategy_name).unwrap() as u32)
            .collect();

        let matrix = DenseMatrix::from_2d_vec(&x)?;
        let model = RandomForestClassifier::fit(&matrix, &y, RandomForestClassifierParameters::default())?;

        Ok(Some(Self { model, class_names }))
    }

    pub fn predict(&self, features: &[f64; 17]) -> anyhow::Result<String> {
        use smartcore::linalg::basic::matrix::DenseMatrix;
        let matrix = DenseMatrix::from_2d_vec(&vec![features.to_vec()])?;
        let prediction = self.model.predict(&matrix)?;
        Ok(self.class_names[prediction[0] as usize].clone())
    }
}

pub struct StrategySelector {
    pub strategies: Vec<Box<dyn Strategy>>,
    pub mode: SelectionMode,
    pub switch_threshold: f64,
    pub current_strategy: Option<String>,
    #[cfg(feature = "ml")]
    pub classifier: Option<LearnedClassifier>,
}

impl StrategySelector {
    pub fn new(strategies: Vec<Box<dyn Strategy>>) -> Self {
        Self {
            strategies,
            mode: SelectionMode::Auto,
            switch_threshold: 0.15,
            current_strategy: None,
            #[cfg(feature = "ml")]
            classifier: None,
        }
    }

    fn scores(&self, state: &PlantState, forecast: &ForecastSeries) -> Vec<(String, f64)> {
        self.strategies
            .iter()
            .filter_map(|s| s.evaluate(state, forecast).map(|score| (s.name().to_string(), score)))
            .collect()
    }

    /// Returns the strategy name that should drive this optimization cycle.
    pub fn select(
        &mut self,
        state: &PlantState,
        forecast: &ForecastSeries,
        #[allow(unused_variables)] window: &MarketSignalWindow,
    ) -> Option<String> {
        if let SelectionMode::Manual(name) = &self.mode {
            self.current_strategy = Some(name.clone());
            return self.current_strategy.clone();
        }

        let scores = self.scores(state, forecast);
        if scores.is_empty() {
            return self.current_strategy.clone();
        }

        let argmax = scores
            .iter()
            .max_by(|a, b| a.1.partial_cmp(&b.1).unwrap())
            .map(|(name, score)| (name.clone(), *score))
            .unwrap();

        #[cfg(feature = "ml")]
        let best = self
            .classifier
            .as_ref()
            .and_then(|c| {
                let current_score = self.current_strategy.as_ref().and_then(|cur| {
                    scores.iter().find(|(n, _)| n == cur).map(|(_, s)| *s)
                }).unwrap_or(argmax.1);
                let features = feature_vector(state, forecast, window, current_score);
                c.predict(&features).ok()
            })
            .and_then(|name| scores.iter().find(|(n, _)| *n == name).cloned())
            .unwrap_or(argmax);

        #[cfg(not(feature = "ml"))]
        let best = argmax;

        let accepted = match &self.current_strategy {
            None => true,
            Some(current) if *current == best.0 => true,
            Some(current) => {
                let current_score = scores.iter().find(|(n, _)| n == current).map(|(_, s)| *s).unwrap_or(0.0);
                best.1 - current_score >= self.switch_threshold
            }
        };

        if accepted {
            self.current_strategy = Some(best.0.clone());
        }
        self.current_strategy.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Region, SeriesPoint};
    use crate::strategies::{ArbitrageStrategy, PeakShavingStrategy};

    fn make_forecast() -> ForecastSeries {
        let now = Utc::now();
        ForecastSeries {
            region: Region::At,
            generated_at: now,
            prices: vec![SeriesPoint { timestamp: now, value: 50.0 }],
            pv: Vec::new(),
            load: vec![SeriesPoint { timestamp: now, value: 1.0 }],
        }
    }

    #[test]
    fn manual_mode_pins_strategy_regardless_of_scores() {
        let mut selector = StrategySelector::new(vec![
            Box::new(ArbitrageStrategy::default()),
            Box::new(PeakShavingStrategy),
        ]);
        selector.mode = SelectionMode::Manual("peak_shaving".to_string());
        let state = PlantState::new(1);
        let forecast = make_forecast();
        let window = MarketSignalWindow::new();
        assert_eq!(selector.select(&state, &forecast, &window), Some("peak_shaving".to_string()));
    }

    #[test]
    fn hysteresis_prevents_small_score_swings_from_switching() {
        let mut selector = StrategySelector::new(vec![
            Box::new(ArbitrageStrategy::default()),
            Box::new(PeakShavingStrategy),
        ]);
        selector.current_strategy = Some("peak_shaving".to_string());
        selector.switch_threshold = 10.0; // unreachable, forces hold
        let state = PlantState::new(1);
        let forecast = make_forecast();
        let window = MarketSignalWindow::new();
        assert_eq!(selector.select(&state, &forecast, &window), Some("peak_shaving".to_string()));
    }
}
