//! Grid Tariff Schedule (§3, supplemental): a named tariff composed of
//! ordered time-of-day windows, each scaling a base grid-transfer rate.
//! Only the lookup is part of the core; CRUD over tariffs is out of scope.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TariffWindow {
    /// Minutes since midnight, local time.
    pub start_minute: u32,
    /// Minutes since midnight, local time. May be `< start_minute` to wrap
    /// past midnight.
    pub end_minute: u32,
    pub multiplier: f64,
}

impl TariffWindow {
    fn contains(&self, minute_of_day: u32) -> bool {
        if self.start_minute <= self.end_minute {
            (self.start_minute..self.end_minute).contains(&minute_of_day)
        } else {
            minute_of_day >= self.start_minute || minute_of_day < self.end_minute
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GridTariffSchedule {
    pub name: String,
    pub base_rate_eur_per_kwh: f64,
    pub windows: Vec<TariffWindow>,
}

impl GridTariffSchedule {
    /// A flat tariff with no time-of-day structure.
    pub fn flat(base_rate_eur_per_kwh: f64) -> Self {
        Self {
            name: "flat".to_string(),
            base_rate_eur_per_kwh,
            windows: Vec::new(),
        }
    }

    /// NE5/NE7-style two-rate tariff: a cheap overnight window, peak
    /// multiplier otherwise.
    pub fn ne5(base_rate_eur_per_kwh: f64) -> Self {
        Self {
            name: "NE5".to_string(),
            base_rate_eur_per_kwh,
            windows: vec![
                TariffWindow { start_minute: 22 * 60, end_minute: 6 * 60, multiplier: 0.6 },
                TariffWindow { start_minute: 6 * 60, end_minute: 22 * 60, multiplier: 1.0 },
            ],
        }
    }

    /// Grid-transfer rate in EUR/kWh applicable at `timestamp` (local time
    /// assumed already applied by the caller via `chrono_tz` conversion, or
    /// UTC when no local offset is configured).
    pub fn rate_at(&self, timestamp: chrono::DateTime<chrono::Utc>) -> f64 {
        use chrono::Timelike;
        let minute_of_day = timestamp.hour() * 60 + timestamp.minute();
        let multiplier = self
            .windows
            .iter()
            .find(|w| w.contains(minute_of_day))
            .map(|w| w.multiplier)
            .unwrap_or(1.0);
        self.base_rate_eur_per_kwh * multiplier
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn flat_tariff_ignores_time() {
        let tariff = GridTariffSchedule::flat(0.25);
        let noon = chrono::Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap();
        let midnight = chrono::Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap();
        assert_eq!(tariff.rate_at(noon), 0.25);
        assert_eq!(tariff.rate_at(midnight), 0.25);
    }

    #[test]
    fn ne5_applies_overnight_discount_across_midnight() {
        let tariff = GridTariffSchedule::ne5(0.30);
        let overnight = chrono::Utc.with_ymd_and_hms(2024, 6, 1, 2, 0, 0).unwrap();
        let daytime = chrono::Utc.with_ymd_and_hms(2024, 6, 1, 14, 0, 0).unwrap();
        assert!((tariff.rate_at(overnight) - 0.18).abs() < 1e-9);
        assert!((tariff.rate_at(daytime) - 0.30).abs() < 1e-9);
    }
}
