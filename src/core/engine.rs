use std::collections::BTreeMap;

use serde::Serialize;
use tracing::{debug, info, warn};

use super::accumulation::{AccumulationOutput, accumulate};
use super::error::ConfigError;
use super::historical::IndexRegistry;
use super::household::AllowanceCoordination;
use super::overlay::{OverlayConfig, OverlayReport, compose};
use super::returns::generate_series;
use super::tax::{HouseholdLedger, TaxCalculator};
use super::types::{ReturnConfiguration, SimulationConfig};
use super::validation::validate;
use super::withdrawal::{WithdrawalContext, WithdrawalOutput, starting_position, withdraw};

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReturnsReport {
    pub rates: BTreeMap<i32, f64>,
    pub backfilled_years: Vec<i32>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub rebalancing_turnover: BTreeMap<i32, f64>,
    pub overlay: OverlayReport,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SimulationOutput {
    pub accumulation: AccumulationOutput,
    pub withdrawal: Option<WithdrawalOutput>,
    pub returns: ReturnsReport,
    pub inflation: BTreeMap<i32, f64>,
    pub expected_end_year: Option<i32>,
}

impl SimulationOutput {
    pub fn final_capital(&self) -> f64 {
        self.withdrawal
            .as_ref()
            .map_or(self.accumulation.summary.endkapital, |w| {
                w.summary.endkapital
            })
    }

    pub fn depletion_year(&self) -> Option<i32> {
        self.withdrawal.as_ref().and_then(|w| w.depletion_year)
    }
}

pub fn simulate(config: &SimulationConfig) -> Result<SimulationOutput, ConfigError> {
    validate(config)?;

    let timeline = &config.timeline;
    debug!(
        start_year = timeline.start_year,
        transition_year = timeline.transition_year,
        end_year = timeline.end_year,
        elements = config.elements.len(),
        "simulation started"
    );

    let registry = IndexRegistry::with_custom(&config.custom_indices);
    let mut series = generate_series(
        &config.returns,
        &registry,
        timeline.start_year,
        timeline.end_year,
    )?;
    let mut inflation: BTreeMap<i32, f64> = (timeline.start_year..=timeline.end_year)
        .map(|year| (year, config.inflation_rate))
        .collect();
    let overlay = compose(
        &mut series.rates,
        &mut inflation,
        &config.overlays,
        config.returns.is_variable(),
    );
    debug!(?overlay, "overlays composed");

    let calc = TaxCalculator::new(&config.tax);
    let (person_count, coordination) = config.household.as_ref().map_or(
        (1, AllowanceCoordination::Separate),
        |household| (household.person_count(), household.coordination()),
    );
    let mut ledger = HouseholdLedger::new(
        person_count,
        coordination,
        config.tax.sparerpauschbetrag,
        config.tax.grundfreibetrag,
    );

    let realize_rebalancing_gains = matches!(
        &config.returns,
        ReturnConfiguration::MultiAsset(multi) if multi.realize_rebalancing_gains
    );
    let accumulation = accumulate(
        &config.elements,
        timeline,
        &series,
        &calc,
        &mut ledger,
        realize_rebalancing_gains,
    );

    let withdrawal = config.withdrawal.as_ref().map(|withdrawal_config| {
        let start = starting_position(withdrawal_config, &accumulation.handoff, &calc);
        let ctx = WithdrawalContext {
            timeline,
            config: withdrawal_config,
            returns: &series,
            inflation: &inflation,
            calc: &calc,
            household: config.household.as_ref(),
            realize_rebalancing_gains,
        };
        withdraw(&start, &ctx, &mut ledger)
    });

    let output = SimulationOutput {
        accumulation,
        withdrawal,
        returns: ReturnsReport {
            rates: series.rates,
            backfilled_years: series.backfilled_years,
            rebalancing_turnover: series.turnover,
            overlay,
        },
        inflation,
        expected_end_year: config
            .household
            .as_ref()
            .map(|household| household.expected_end_year(timeline.start_year)),
    };

    debug!(
        handoff_capital = output.accumulation.summary.endkapital,
        final_capital = output.final_capital(),
        depletion_year = ?output.depletion_year(),
        "simulation finished"
    );
    Ok(output)
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Percentiles {
    pub p5: f64,
    pub p25: f64,
    pub p50: f64,
    pub p75: f64,
    pub p95: f64,
}

impl Percentiles {
    fn from_values(values: &mut [f64]) -> Self {
        Self {
            p5: percentile(values, 5.0),
            p25: percentile(values, 25.0),
            p50: percentile(values, 50.0),
            p75: percentile(values, 75.0),
            p95: percentile(values, 95.0),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MonteCarloResult {
    pub trials: u32,
    pub seed: u64,
    pub success_rate: f64,
    pub handoff_capital: Percentiles,
    pub final_capital: Percentiles,
    pub median_depletion_year: Option<i32>,
}

pub fn run_monte_carlo(
    config: &SimulationConfig,
    trials: u32,
    seed: Option<u64>,
) -> Result<MonteCarloResult, ConfigError> {
    if trials == 0 {
        return Err(ConfigError::MonteCarlo("at least one trial is required".to_string()));
    }
    if !config.returns.is_stochastic() {
        return Err(ConfigError::MonteCarlo(
            "requires the random or multiasset return mode".to_string(),
        ));
    }
    validate(config)?;

    let seed = seed.unwrap_or_else(rand::random);
    info!(trials, seed, "monte carlo started");

    let mut handoff = Vec::with_capacity(trials as usize);
    let mut finals = Vec::with_capacity(trials as usize);
    let mut depletion_years = Vec::new();
    let mut trial_config = config.clone();
    // Stochastic modes never take overlays; warn once instead of per trial.
    if trial_config.overlays != OverlayConfig::default() {
        warn!("overlays ignored, they only apply to variable returns");
        trial_config.overlays = OverlayConfig::default();
    }

    for trial in 0..trials {
        trial_config.returns = config.returns.reseeded(derive_seed(seed, trial));
        let output = simulate(&trial_config)?;
        handoff.push(output.accumulation.summary.endkapital);
        finals.push(output.final_capital());
        if let Some(year) = output.depletion_year() {
            depletion_years.push(year as f64);
        }
    }

    let successes = trials as usize - depletion_years.len();
    let result = MonteCarloResult {
        trials,
        seed,
        success_rate: successes as f64 / trials as f64,
        handoff_capital: Percentiles::from_values(&mut handoff),
        final_capital: Percentiles::from_values(&mut finals),
        median_depletion_year: (!depletion_years.is_empty())
            .then(|| percentile(&mut depletion_years, 50.0).round() as i32),
    };

    info!(success_rate = result.success_rate, "monte carlo finished");
    Ok(result)
}

fn derive_seed(base_seed: u64, trial: u32) -> u64 {
    splitmix64(base_seed ^ trial as u64)
}

fn splitmix64(mut x: u64) -> u64 {
    x = x.wrapping_add(0x9E3779B97F4A7C15);
    let mut z = x;
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58476D1CE4E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D049BB133111EB);
    z ^ (z >> 31)
}

fn percentile(values: &mut [f64], p: f64) -> f64 {
    if values.is_empty() {
        return 0.0;
    }

    values.sort_by(|a, b| a.total_cmp(b));

    let n = values.len();
    if n == 1 {
        return values[0];
    }

    let rank = (p / 100.0) * (n as f64 - 1.0);
    let lower = rank.floor() as usize;
    let upper = rank.ceil() as usize;

    if lower == upper {
        values[lower]
    } else {
        let w = rank - lower as f64;
        values[lower] * (1.0 - w) + values[upper] * w
    }
}
