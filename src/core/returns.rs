use std::collections::BTreeMap;

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::Serialize;
use statrs::distribution::Normal;
use tracing::{debug, warn};

use super::error::ConfigError;
use super::historical::IndexRegistry;
use super::portfolio::PortfolioRebalancer;
use super::types::ReturnConfiguration;

pub const MIN_RETURN: f64 = -0.95;
pub const MAX_RETURN: f64 = 2.5;

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReturnSeries {
    pub rates: BTreeMap<i32, f64>,
    pub backfilled_years: Vec<i32>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub turnover: BTreeMap<i32, f64>,
}

impl ReturnSeries {
    pub fn constant(rate: f64, first_year: i32, last_year: i32) -> Self {
        Self {
            rates: (first_year..=last_year).map(|year| (year, rate)).collect(),
            ..Self::default()
        }
    }

    pub fn rate(&self, year: i32) -> f64 {
        self.rates.get(&year).copied().unwrap_or(0.0)
    }

    pub fn rebalancing_turnover(&self, year: i32) -> f64 {
        self.turnover.get(&year).copied().unwrap_or(0.0)
    }
}

pub fn monthly_from_annual(annual: f64) -> f64 {
    if annual <= -1.0 {
        return -1.0;
    }
    (1.0 + annual).powf(1.0 / 12.0) - 1.0
}

pub fn run_rng(seed: Option<u64>) -> ChaCha8Rng {
    match seed {
        Some(seed) => ChaCha8Rng::seed_from_u64(seed),
        None => ChaCha8Rng::from_entropy(),
    }
}

pub fn generate_series(
    config: &ReturnConfiguration,
    registry: &IndexRegistry,
    first_year: i32,
    last_year: i32,
) -> Result<ReturnSeries, ConfigError> {
    let years = first_year..=last_year;

    let series = match config {
        ReturnConfiguration::Fixed { rate } => ReturnSeries::constant(*rate, first_year, last_year),
        ReturnConfiguration::Random {
            average_return,
            standard_deviation,
            seed,
        } => {
            if *standard_deviation == 0.0 {
                ReturnSeries::constant(*average_return, first_year, last_year)
            } else {
                let normal = Normal::new(*average_return, *standard_deviation)
                    .map_err(|e| ConfigError::Distribution(e.to_string()))?;
                let mut rng = run_rng(*seed);
                ReturnSeries {
                    rates: years
                        .map(|year| {
                            (year, rng.sample(&normal).clamp(MIN_RETURN, MAX_RETURN))
                        })
                        .collect(),
                    ..ReturnSeries::default()
                }
            }
        }
        ReturnConfiguration::Variable { yearly_returns } => ReturnSeries {
            rates: years
                .map(|year| {
                    let rate = yearly_returns.get(&year).copied().unwrap_or(0.0);
                    (year, rate)
                })
                .collect(),
            ..ReturnSeries::default()
        },
        ReturnConfiguration::Historical { index_id } => {
            let index = registry
                .get(index_id)
                .ok_or_else(|| ConfigError::UnknownIndex(index_id.clone()))?;
            let mut series = ReturnSeries::default();
            for year in years {
                let (rate, backfilled) = index.rate_for(year);
                if backfilled {
                    series.backfilled_years.push(year);
                }
                series.rates.insert(year, rate);
            }
            if !series.backfilled_years.is_empty() {
                warn!(
                    index = %index_id,
                    years = ?series.backfilled_years,
                    "no recorded returns, using the index average"
                );
            }
            series
        }
        ReturnConfiguration::MultiAsset(multi) => {
            let mut rebalancer = PortfolioRebalancer::new(multi)?;
            let mut rng = run_rng(multi.seed);
            let mut series = ReturnSeries::default();
            for year in years {
                let step = rebalancer.step(year, &mut rng);
                series.rates.insert(year, step.portfolio_return);
                if step.turnover > 0.0 {
                    series.turnover.insert(year, step.turnover);
                }
            }
            series
        }
    };

    debug!(first_year, last_year, years = series.rates.len(), "return series generated");
    Ok(series)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::historical::HistoricalIndex;

    fn assert_approx(actual: f64, expected: f64) {
        assert!(
            (actual - expected).abs() <= 1e-9,
            "expected {expected}, got {actual}"
        );
    }

    fn random(seed: Option<u64>) -> ReturnConfiguration {
        ReturnConfiguration::Random {
            average_return: 0.07,
            standard_deviation: 0.15,
            seed,
        }
    }

    #[test]
    fn monthly_rate_compounds_back_to_annual() {
        let monthly = monthly_from_annual(0.05);
        assert_approx((1.0 + monthly).powi(12) - 1.0, 0.05);
        assert_approx(monthly_from_annual(-1.5), -1.0);
    }

    #[test]
    fn same_seed_reproduces_sequence() {
        let registry = IndexRegistry::builtin();
        let a = generate_series(&random(Some(42)), &registry, 2020, 2060).expect("series");
        let b = generate_series(&random(Some(42)), &registry, 2020, 2060).expect("series");
        assert_eq!(a, b);
    }

    #[test]
    fn different_seeds_differ() {
        let registry = IndexRegistry::builtin();
        let a = generate_series(&random(Some(1)), &registry, 2020, 2060).expect("series");
        let b = generate_series(&random(Some(2)), &registry, 2020, 2060).expect("series");
        assert_ne!(a.rates, b.rates);
    }

    #[test]
    fn random_draws_are_clamped() {
        let config = ReturnConfiguration::Random {
            average_return: 0.0,
            standard_deviation: 5.0,
            seed: Some(9),
        };
        let series =
            generate_series(&config, &IndexRegistry::builtin(), 2000, 2200).expect("series");
        assert!(
            series
                .rates
                .values()
                .all(|r| (MIN_RETURN..=MAX_RETURN).contains(r))
        );
    }

    #[test]
    fn zero_deviation_yields_average() {
        let config = ReturnConfiguration::Random {
            average_return: 0.04,
            standard_deviation: 0.0,
            seed: None,
        };
        let series =
            generate_series(&config, &IndexRegistry::builtin(), 2020, 2025).expect("series");
        assert!(series.rates.values().all(|r| *r == 0.04));
    }

    #[test]
    fn negative_deviation_is_a_distribution_error() {
        let config = ReturnConfiguration::Random {
            average_return: 0.04,
            standard_deviation: -0.1,
            seed: Some(1),
        };
        assert!(matches!(
            generate_series(&config, &IndexRegistry::builtin(), 2020, 2025),
            Err(ConfigError::Distribution(_))
        ));
    }

    #[test]
    fn variable_mode_defaults_missing_years_to_zero() {
        let config = ReturnConfiguration::Variable {
            yearly_returns: BTreeMap::from([(2021, 0.1)]),
        };
        let series =
            generate_series(&config, &IndexRegistry::builtin(), 2020, 2022).expect("series");
        assert_approx(series.rate(2020), 0.0);
        assert_approx(series.rate(2021), 0.1);
    }

    #[test]
    fn historical_backfills_years_before_the_record() {
        let mut registry = IndexRegistry::builtin();
        registry.register(HistoricalIndex {
            id: "short".to_string(),
            name: "Short".to_string(),
            returns: (2000..=2020).map(|year| (year, 0.05)).collect(),
        });
        let config = ReturnConfiguration::Historical {
            index_id: "short".to_string(),
        };
        let series = generate_series(&config, &registry, 1995, 2020).expect("series");
        assert_eq!(series.backfilled_years, vec![1995, 1996, 1997, 1998, 1999]);
        assert_approx(series.rate(1995), 0.05);
    }

    #[test]
    fn unknown_index_is_rejected() {
        let config = ReturnConfiguration::Historical {
            index_id: "nikkei".to_string(),
        };
        assert_eq!(
            generate_series(&config, &IndexRegistry::builtin(), 2020, 2021),
            Err(ConfigError::UnknownIndex("nikkei".to_string()))
        );
    }
}
