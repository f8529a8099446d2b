use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::warn;

use super::returns::{MAX_RETURN, MIN_RETURN};

#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum OverlayMode {
    #[default]
    Additive,
    Override,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ShockPreset {
    DotCom,
    FinancialCrisis,
    Covid,
}

impl ShockPreset {
    pub fn returns(self) -> &'static [f64] {
        match self {
            ShockPreset::DotCom => &[-0.08, -0.20, -0.44],
            ShockPreset::FinancialCrisis => &[-0.40, 0.24],
            ShockPreset::Covid => &[-0.34, 0.27],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum MarketShock {
    Custom {
        start_year: i32,
        returns: Vec<f64>,
        #[serde(default)]
        mode: OverlayMode,
    },
    Preset {
        start_year: i32,
        preset: ShockPreset,
    },
}

impl MarketShock {
    pub fn start_year(&self) -> i32 {
        match self {
            MarketShock::Custom { start_year, .. } | MarketShock::Preset { start_year, .. } => {
                *start_year
            }
        }
    }

    pub fn returns(&self) -> &[f64] {
        match self {
            MarketShock::Custom { returns, .. } => returns,
            MarketShock::Preset { preset, .. } => preset.returns(),
        }
    }

    pub fn mode(&self) -> OverlayMode {
        match self {
            MarketShock::Custom { mode, .. } => *mode,
            MarketShock::Preset { .. } => OverlayMode::Override,
        }
    }

    pub fn cumulative_impact(&self) -> f64 {
        self.returns().iter().fold(1.0, |acc, r| acc * (1.0 + r)) - 1.0
    }
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum InflationMode {
    #[default]
    Replace,
    Additive,
    Blend { weight: f64 },
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum InflationPreset {
    Stagflation,
    Deflation,
    Hyperinflation,
}

impl InflationPreset {
    pub fn rates(self) -> &'static [f64] {
        match self {
            InflationPreset::Stagflation => &[0.08, 0.09, 0.07, 0.06, 0.05],
            InflationPreset::Deflation => &[-0.01, -0.02, -0.01],
            InflationPreset::Hyperinflation => &[0.15, 0.25, 0.40, 0.20],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum InflationScenario {
    Custom {
        start_year: i32,
        rates: Vec<f64>,
        #[serde(default)]
        mode: InflationMode,
    },
    Preset {
        start_year: i32,
        preset: InflationPreset,
    },
}

impl InflationScenario {
    fn parts(&self) -> (i32, &[f64], InflationMode) {
        match self {
            InflationScenario::Custom {
                start_year,
                rates,
                mode,
            } => (*start_year, rates, *mode),
            InflationScenario::Preset { start_year, preset } => {
                (*start_year, preset.rates(), InflationMode::Replace)
            }
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct OverlayConfig {
    pub market_shocks: Vec<MarketShock>,
    pub inflation_scenario: Option<InflationScenario>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OverlayReport {
    pub shocks_applied: usize,
    pub shocks_ignored: usize,
    pub shock_impacts: Vec<f64>,
    pub shock_years: Vec<i32>,
    pub inflation_scenario_ignored: bool,
    pub inflation_years: Vec<i32>,
}

/// Applies the overlays in place. Overlays only take effect on variable
/// returns; years absent from the series are outside the simulated range.
pub fn compose(
    returns: &mut BTreeMap<i32, f64>,
    inflation: &mut BTreeMap<i32, f64>,
    overlays: &OverlayConfig,
    variable_mode: bool,
) -> OverlayReport {
    let mut report = OverlayReport::default();

    for shock in &overlays.market_shocks {
        if !variable_mode {
            report.shocks_ignored += 1;
            warn!(
                start_year = shock.start_year(),
                "market shock ignored, shocks only apply to variable returns"
            );
            continue;
        }

        report.shocks_applied += 1;
        report.shock_impacts.push(shock.cumulative_impact());
        for (offset, shock_rate) in shock.returns().iter().enumerate() {
            let year = shock.start_year() + offset as i32;
            let Some(rate) = returns.get_mut(&year) else {
                continue;
            };
            *rate = match shock.mode() {
                OverlayMode::Additive => (*rate + shock_rate).clamp(MIN_RETURN, MAX_RETURN),
                OverlayMode::Override => *shock_rate,
            };
            report.shock_years.push(year);
        }
    }

    match &overlays.inflation_scenario {
        Some(scenario) if !variable_mode => {
            report.inflation_scenario_ignored = true;
            warn!(
                start_year = scenario.parts().0,
                "inflation scenario ignored, overlays only apply to variable returns"
            );
        }
        Some(scenario) => apply_inflation(inflation, scenario, &mut report),
        None => {}
    }

    report.shock_years.sort_unstable();
    report.shock_years.dedup();
    report
}

fn apply_inflation(
    inflation: &mut BTreeMap<i32, f64>,
    scenario: &InflationScenario,
    report: &mut OverlayReport,
) {
    let (start_year, rates, mode) = scenario.parts();
    for (offset, scenario_rate) in rates.iter().enumerate() {
        let year = start_year + offset as i32;
        let Some(rate) = inflation.get_mut(&year) else {
            continue;
        };
        *rate = match mode {
            InflationMode::Replace => *scenario_rate,
            InflationMode::Additive => *rate + scenario_rate,
            InflationMode::Blend { weight } => {
                let weight = weight.clamp(0.0, 1.0);
                weight * scenario_rate + (1.0 - weight) * *rate
            }
        };
        report.inflation_years.push(year);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_approx(actual: f64, expected: f64) {
        assert!(
            (actual - expected).abs() <= 1e-9,
            "expected {expected}, got {actual}"
        );
    }

    fn flat(rate: f64) -> BTreeMap<i32, f64> {
        (2020..=2030).map(|year| (year, rate)).collect()
    }

    #[test]
    fn preset_overrides_base_returns() {
        let mut returns = flat(0.05);
        let mut inflation = flat(0.02);
        let overlays = OverlayConfig {
            market_shocks: vec![MarketShock::Preset {
                start_year: 2024,
                preset: ShockPreset::FinancialCrisis,
            }],
            inflation_scenario: None,
        };
        let report = compose(&mut returns, &mut inflation, &overlays, true);
        assert_approx(report.shock_impacts[0], 0.60 * 1.24 - 1.0);
        assert_approx(returns[&2024], -0.40);
        assert_approx(returns[&2025], 0.24);
        assert_approx(returns[&2026], 0.05);
        assert_eq!(report.shock_years, vec![2024, 2025]);
    }

    #[test]
    fn custom_shock_adds_by_default() {
        let mut returns = flat(0.05);
        let mut inflation = flat(0.02);
        let overlays = OverlayConfig {
            market_shocks: vec![MarketShock::Custom {
                start_year: 2029,
                returns: vec![-0.10, -0.10, -0.10],
                mode: OverlayMode::Additive,
            }],
            inflation_scenario: None,
        };
        let report = compose(&mut returns, &mut inflation, &overlays, true);
        assert_approx(returns[&2029], -0.05);
        assert_approx(returns[&2030], -0.05);
        // 2031 lies outside the simulated range.
        assert!(!returns.contains_key(&2031));
        assert_eq!(report.shock_years, vec![2029, 2030]);
    }

    #[test]
    fn shocks_are_a_no_op_outside_variable_mode() {
        let mut returns = flat(0.05);
        let mut inflation = flat(0.02);
        let overlays = OverlayConfig {
            market_shocks: vec![MarketShock::Preset {
                start_year: 2024,
                preset: ShockPreset::Covid,
            }],
            inflation_scenario: Some(InflationScenario::Preset {
                start_year: 2022,
                preset: InflationPreset::Deflation,
            }),
        };
        let report = compose(&mut returns, &mut inflation, &overlays, false);
        assert_eq!(returns, flat(0.05));
        assert_eq!(inflation, flat(0.02));
        assert_eq!(report.shocks_ignored, 1);
        assert_eq!(report.shocks_applied, 0);
        assert!(report.inflation_scenario_ignored);
        assert!(report.inflation_years.is_empty());
    }

    #[test]
    fn additive_shock_never_drives_a_rate_below_total_loss() {
        let mut returns = flat(0.05);
        returns.insert(2025, -0.5);
        let mut inflation = flat(0.02);
        let overlays = OverlayConfig {
            market_shocks: vec![MarketShock::Custom {
                start_year: 2025,
                returns: vec![-0.6],
                mode: OverlayMode::Additive,
            }],
            inflation_scenario: None,
        };
        compose(&mut returns, &mut inflation, &overlays, true);
        assert_approx(returns[&2025], MIN_RETURN);
    }

    #[test]
    fn inflation_blend_weights_scenario_and_base() {
        let mut returns = flat(0.05);
        let mut inflation = flat(0.02);
        let overlays = OverlayConfig {
            market_shocks: Vec::new(),
            inflation_scenario: Some(InflationScenario::Custom {
                start_year: 2020,
                rates: vec![0.10],
                mode: InflationMode::Blend { weight: 0.25 },
            }),
        };
        let report = compose(&mut returns, &mut inflation, &overlays, true);
        assert!(!report.inflation_scenario_ignored);
        assert_eq!(report.inflation_years, vec![2020]);
        assert_approx(inflation[&2020], 0.25 * 0.10 + 0.75 * 0.02);
        assert_approx(inflation[&2021], 0.02);
    }

    #[test]
    fn cumulative_impact_of_dot_com_crash() {
        let shock = MarketShock::Preset {
            start_year: 2000,
            preset: ShockPreset::DotCom,
        };
        assert_approx(shock.cumulative_impact(), 0.92 * 0.80 * 0.56 - 1.0);
    }
}
