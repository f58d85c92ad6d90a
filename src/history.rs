//! History Store (C11): append-only per-site SQLite journal plus derived
//! daily metrics (§4.11).

use anyhow::Result;
use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::PlantState;
use crate::strategies::StrategyResult;

#[async_trait]
pub trait HistoryStore: Send + Sync {
    async fn append_state(&self, state: &PlantState, price_eur_per_mwh: Option<f64>) -> Result<()>;
    async fn append_optimization(&self, result: &StrategyResult) -> Result<()>;
    async fn append_strategy_change(
        &self,
        old: Option<&str>,
        new: &str,
        reason: &str,
        scores: &serde_json::Value,
    ) -> Result<()>;
    async fn calculate_daily_metrics(&self, date: NaiveDate) -> Result<DailyMetrics>;
    async fn get_performance_summary(&self, days: i64) -> Result<Vec<DailyMetrics>>;
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct DailyMetrics {
    pub date: Option<NaiveDate>,
    pub avg_soc_pct: f64,
    pub min_soc_pct: f64,
    pub max_soc_pct: f64,
    pub energy_charged_kwh: f64,
    pub energy_discharged_kwh: f64,
    pub total_profit_eur: f64,
    pub total_revenue_eur: f64,
    pub total_cost_eur: f64,
    pub strategy_usage: serde_json::Value,
    pub cycles: f64,
}

#[cfg(feature = "db")]
pub struct SqliteHistoryStore {
    pool: sqlx::SqlitePool,
}

#[cfg(feature = "db")]
impl SqliteHistoryStore {
    pub async fn connect(site_id: u32, base_path: &str) -> Result<Self> {
        let path = format!("{base_path}/history_site_{site_id}.db");
        let url = format!("sqlite://{path}?mode=rwc");
        let pool = sqlx::sqlite::SqlitePoolOptions::new().max_connections(5).connect(&url).await?;
        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    async fn migrate(&self) -> Result<()> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS state_history (
                timestamp TEXT NOT NULL,
                soc REAL NOT NULL,
                p_bess REAL NOT NULL,
                p_pv REAL NOT NULL,
                p_load REAL NOT NULL,
                p_grid REAL NOT NULL,
                price REAL,
                active_strategy TEXT,
                setpoint_kw REAL NOT NULL,
                mode TEXT NOT NULL
            )",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS optimization_history (
                timestamp TEXT NOT NULL,
                strategy_name TEXT NOT NULL,
                expected_profit REAL NOT NULL,
                expected_revenue REAL NOT NULL,
                expected_cost REAL NOT NULL,
                confidence REAL NOT NULL,
                optimization_status TEXT NOT NULL,
                solver TEXT NOT NULL,
                metadata TEXT NOT NULL
            )",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS strategy_changes (
                timestamp TEXT NOT NULL,
                old_strategy TEXT,
                new_strategy TEXT NOT NULL,
                reason TEXT NOT NULL,
                scores TEXT NOT NULL
            )",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS daily_metrics (
                date TEXT NOT NULL UNIQUE,
                avg_soc_pct REAL NOT NULL,
                min_soc_pct REAL NOT NULL,
                max_soc_pct REAL NOT NULL,
                energy_charged_kwh REAL NOT NULL,
                energy_discharged_kwh REAL NOT NULL,
                total_profit_eur REAL NOT NULL,
                total_revenue_eur REAL NOT NULL,
                total_cost_eur REAL NOT NULL,
                strategy_usage TEXT NOT NULL,
                cycles REAL NOT NULL
            )",
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

#[cfg(feature = "db")]
#[async_trait]
impl HistoryStore for SqliteHistoryStore {
    async fn append_state(&self, state: &PlantState, price_eur_per_mwh: Option<f64>) -> Result<()> {
        sqlx::query(
            "INSERT INTO state_history
             (timestamp, soc, p_bess, p_pv, p_load, p_grid, price, active_strategy, setpoint_kw, mode)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(state.timestamp.to_rfc3339())
        .bind(state.soc_pct)
        .bind(state.p_bess_kw)
        .bind(state.p_pv_kw)
        .bind(state.p_load_kw)
        .bind(state.p_grid_kw)
        .bind(price_eur_per_mwh)
        .bind(&state.active_strategy)
        .bind(state.setpoint_kw)
        .bind(format!("{:?}", state.mode))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn append_optimization(&self, result: &StrategyResult) -> Result<()> {
        sqlx::query(
            "INSERT INTO optimization_history
             (timestamp, strategy_name, expected_profit, expected_revenue, expected_cost, confidence, optimization_status, solver, metadata)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(Utc::now().to_rfc3339())
        .bind(&result.strategy_name)
        .bind(result.schedule.expected_profit)
        .bind(result.schedule.expected_revenue)
        .bind(result.schedule.expected_cost)
        .bind(result.confidence)
        .bind(&result.schedule.status)
        .bind(format!("{:?}", result.schedule.solver))
        .bind(result.metadata.to_string())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn append_strategy_change(
        &self,
        old: Option<&str>,
        new: &str,
        reason: &str,
        scores: &serde_json::Value,
    ) -> Result<()> {
        sqlx::query(
            "INSERT INTO strategy_changes (timestamp, old_strategy, new_strategy, reason, scores)
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(Utc::now().to_rfc3339())
        .bind(old)
        .bind(new)
        .bind(reason)
        .bind(scores.to_string())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn calculate_daily_metrics(&self, date: NaiveDate) -> Result<DailyMetrics> {
        let start = date.and_hms_opt(0, 0, 0).unwrap().and_utc();
        let end = start + chrono::Duration::hours(24);

        let row: (Option<f64>, Option<f64>, Option<f64>) = sqlx::query_as(
            "SELECT AVG(soc), MIN(soc), MAX(soc) FROM state_history WHERE timestamp >= ? AND timestamp < ?",
        )
        .bind(start.to_rfc3339())
        .bind(end.to_rfc3339())
        .fetch_one(&self.pool)
        .await?;

        let energy: (Option<f64>, Option<f64>) = sqlx::query_as(
            "SELECT
                SUM(CASE WHEN p_bess < 0 THEN -p_bess ELSE 0 END),
                SUM(CASE WHEN p_bess > 0 THEN p_bess ELSE 0 END)
             FROM state_history WHERE timestamp >= ? AND timestamp < ?",
        )
        .bind(start.to_rfc3339())
        .bind(end.to_rfc3339())
        .fetch_one(&self.pool)
        .await?;

        let profit: (Option<f64>, Option<f64>, Option<f64>) = sqlx::query_as(
            "SELECT SUM(expected_profit), SUM(expected_revenue), SUM(expected_cost)
             FROM optimization_history WHERE timestamp >= ? AND timestamp < ?",
        )
        .bind(start.to_rfc3339())
        .bind(end.to_rfc3339())
        .fetch_one(&self.pool)
        .await?;

        let strategy_rows: Vec<(String,)> = sqlx::query_as(
            "SELECT active_strategy FROM state_history WHERE timestamp >= ? AND timestamp < ? AND active_strategy IS NOT NULL",
        )
        .bind(start.to_rfc3339())
        .bind(end.to_rfc3339())
        .fetch_all(&self.pool)
        .await?;
        let mut usage = std::collections::HashMap::<String, i64>::new();
        for (name,) in strategy_rows {
            *usage.entry(name).or_insert(0) += 1;
        }

        let energy_discharged_kwh = energy.1.unwrap_or(0.0);
        let metrics = DailyMetrics {
            date: Some(date),
            avg_soc_pct: row.0.unwrap_or(0.0),
            min_soc_pct: row.1.unwrap_or(0.0),
            max_soc_pct: row.2.unwrap_or(0.0),
            energy_charged_kwh: energy.0.unwrap_or(0.0),
            energy_discharged_kwh,
            total_profit_eur: profit.0.unwrap_or(0.0),
            total_revenue_eur: profit.1.unwrap_or(0.0),
            total_cost_eur: profit.2.unwrap_or(0.0),
            strategy_usage: serde_json::to_value(&usage)?,
            cycles: energy_discharged_kwh / 200.0,
        };

        sqlx::query(
            "INSERT INTO daily_metrics
             (date, avg_soc_pct, min_soc_pct, max_soc_pct, energy_charged_kwh, energy_discharged_kwh,
              total_profit_eur, total_revenue_eur, total_cost_eur, strategy_usage, cycles)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(date) DO UPDATE SET
              avg_soc_pct = excluded.avg_soc_pct, min_soc_pct = excluded.min_soc_pct, max_soc_pct = excluded.max_soc_pct,
              energy_charged_kwh = excluded.energy_charged_kwh, energy_discharged_kwh = excluded.energy_discharged_kwh,
              total_profit_eur = excluded.total_profit_eur, total_revenue_eur = excluded.total_revenue_eur,
              total_cost_eur = excluded.total_cost_eur, strategy_usage = excluded.strategy_usage, cycles = excluded.cycles",
        )
        .bind(date.to_string())
        .bind(metrics.avg_soc_pct)
        .bind(metrics.min_soc_pct)
        .bind(metrics.max_soc_pct)
        .bind(metrics.energy_charged_kwh)
        .bind(metrics.energy_discharged_kwh)
        .bind(metrics.total_profit_eur)
        .bind(metrics.total_revenue_eur)
        .bind(metrics.total_cost_eur)
        .bind(metrics.strategy_usage.to_string())
        .bind(metrics.cycles)
        .execute(&self.pool)
        .await?;

        Ok(metrics)
    }

    async fn get_performance_summary(&self, days: i64) -> Result<Vec<DailyMetrics>> {
        let cutoff = (Utc::now() - chrono::Duration::days(days)).date_naive();
        let rows: Vec<(
            String,
            f64,
            f64,
            f64,
            f64,
            f64,
            f64,
            f64,
            f64,
            String,
            f64,
        )> = sqlx::query_as(
            "SELECT date, avg_soc_pct, min_soc_pct, max_soc_pct, energy_charged_kwh, energy_discharged_kwh,
                    total_profit_eur, total_revenue_eur, total_cost_eur, strategy_usage, cycles
             FROM daily_metrics WHERE date >= ? ORDER BY date ASC",
        )
        .bind(cutoff.to_string())
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|r| DailyMetrics {
                date: NaiveDate::parse_from_str(&r.0, "%Y-%m-%d").ok(),
                avg_soc_pct: r.1,
                min_soc_pct: r.2,
                max_soc_pct: r.3,
                energy_charged_kwh: r.4,
                energy_discharged_kwh: r.5,
                total_profit_eur: r.6,
                total_revenue_eur: r.7,
                total_cost_eur: r.8,
                strategy_usage: serde_json::from_str(&r.9).unwrap_or_default(),
                cycles: r.10,
            })
            .collect())
    }
}

/// No-op store used when the `db` feature is disabled, so the site
/// controller can depend on [`HistoryStore`] unconditionally.
pub struct NullHistoryStore;

#[async_trait]
impl HistoryStore for NullHistoryStore {
    async fn append_state(&self, _state: &PlantState, _price_eur_per_mwh: Option<f64>) -> Result<()> {
        Ok(())
    }

    async fn append_optimization(&self, _result: &StrategyResult) -> Result<()> {
        Ok(())
    }

    async fn append_strategy_change(
        &self,
        _old: Option<&str>,
        _new: &str,
        _reason: &str,
        _scores: &serde_json::Value,
    ) -> Result<()> {
        Ok(())
    }

    async fn calculate_daily_metrics(&self, date: NaiveDate) -> Result<DailyMetrics> {
        Ok(DailyMetrics { date: Some(date), ..Default::default() })
    }

    async fn get_performance_summary(&self, _days: i64) -> Result<Vec<DailyMetrics>> {
        Ok(Vec::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn null_store_accepts_all_appends() {
        let store = NullHistoryStore;
        let state = PlantState::new(1);
        assert!(store.append_state(&state, Some(50.0)).await.is_ok());
        let summary = store.get_performance_summary(7).await.unwrap();
        assert!(summary.is_empty());
    }
}
