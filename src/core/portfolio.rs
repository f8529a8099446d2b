use rand::Rng;
use rand_chacha::ChaCha8Rng;
use statrs::distribution::Normal;

use super::error::ConfigError;
use super::returns::{MAX_RETURN, MIN_RETURN};
use super::types::{MultiAssetConfig, RebalanceFrequency};

const PIVOT_TOLERANCE: f64 = 1e-10;
pub const WEIGHT_TOLERANCE: f64 = 1e-6;

/// Lower-triangular `L` with `L·Lᵀ = matrix`. Positive semi-definite input is
/// accepted: near-zero pivots produce a zero column instead of a failure.
pub fn cholesky(matrix: &[Vec<f64>]) -> Result<Vec<Vec<f64>>, ConfigError> {
    let n = matrix.len();
    if matrix.iter().any(|row| row.len() != n) {
        return Err(ConfigError::CorrelationMatrix(format!(
            "expected a {n}x{n} matrix"
        )));
    }

    let mut lower = vec![vec![0.0; n]; n];
    for i in 0..n {
        for j in 0..=i {
            let dot: f64 = (0..j).map(|k| lower[i][k] * lower[j][k]).sum();
            if i == j {
                let pivot = matrix[i][i] - dot;
                if pivot < -PIVOT_TOLERANCE || !pivot.is_finite() {
                    return Err(ConfigError::NotPositiveSemiDefinite { row: i, pivot });
                }
                lower[i][j] = pivot.max(0.0).sqrt();
            } else if lower[j][j] > PIVOT_TOLERANCE {
                lower[i][j] = (matrix[i][j] - dot) / lower[j][j];
            } else if (matrix[i][j] - dot).abs() > 1e-8 {
                // Zero pivot with a non-zero remainder cannot be factorised.
                return Err(ConfigError::NotPositiveSemiDefinite {
                    row: i,
                    pivot: matrix[i][j] - dot,
                });
            }
        }
    }
    Ok(lower)
}

pub fn validate_multi_asset(config: &MultiAssetConfig) -> Result<Vec<Vec<f64>>, ConfigError> {
    let n = config.assets.len();
    if n == 0 {
        return Err(ConfigError::CorrelationMatrix(
            "at least one asset class is required".to_string(),
        ));
    }

    for asset in &config.assets {
        if !(0.0..=1.0).contains(&asset.target_weight) {
            return Err(ConfigError::rate(
                format!("assets.{}.targetWeight", asset.name),
                "within [0, 1]",
                asset.target_weight,
            ));
        }
        if !asset.volatility.is_finite() || asset.volatility < 0.0 {
            return Err(ConfigError::rate(
                format!("assets.{}.volatility", asset.name),
                ">= 0",
                asset.volatility,
            ));
        }
        if !asset.expected_return.is_finite() || asset.expected_return <= -1.0 {
            return Err(ConfigError::rate(
                format!("assets.{}.expectedReturn", asset.name),
                "> -1",
                asset.expected_return,
            ));
        }
    }

    let total: f64 = config.assets.iter().map(|a| a.target_weight).sum();
    if (total - 1.0).abs() > WEIGHT_TOLERANCE {
        return Err(ConfigError::AllocationSum(total));
    }

    if config.correlations.len() != n {
        return Err(ConfigError::CorrelationMatrix(format!(
            "expected {n} rows for {n} assets, got {}",
            config.correlations.len()
        )));
    }
    for (i, row) in config.correlations.iter().enumerate() {
        if row.len() != n {
            return Err(ConfigError::CorrelationMatrix(format!(
                "row {i} has {} entries, expected {n}",
                row.len()
            )));
        }
        if (row[i] - 1.0).abs() > 1e-9 {
            return Err(ConfigError::CorrelationMatrix(format!(
                "diagonal entry {i} must be 1"
            )));
        }
        for (j, value) in row.iter().enumerate() {
            if !(-1.0..=1.0).contains(value) {
                return Err(ConfigError::CorrelationMatrix(format!(
                    "entry ({i}, {j}) = {value} outside [-1, 1]"
                )));
            }
            if (value - config.correlations[j][i]).abs() > 1e-9 {
                return Err(ConfigError::CorrelationMatrix(format!(
                    "matrix is not symmetric at ({i}, {j})"
                )));
            }
        }
    }

    if let RebalanceFrequency::EveryYears { years: 0 } = config.rebalance_frequency {
        return Err(ConfigError::CorrelationMatrix(
            "rebalance interval must be at least one year".to_string(),
        ));
    }

    cholesky(&config.correlations)
}

#[derive(Debug, Clone, PartialEq)]
pub struct RebalanceYear {
    pub year: i32,
    pub portfolio_return: f64,
    pub asset_returns: Vec<f64>,
    pub turnover: f64,
    pub rebalanced: bool,
}

pub struct PortfolioRebalancer<'a> {
    config: &'a MultiAssetConfig,
    factor: Vec<Vec<f64>>,
    weights: Vec<f64>,
    years_since_rebalance: u32,
    standard: Normal,
}

impl<'a> PortfolioRebalancer<'a> {
    pub fn new(config: &'a MultiAssetConfig) -> Result<Self, ConfigError> {
        let factor = validate_multi_asset(config)?;
        let standard =
            Normal::new(0.0, 1.0).map_err(|e| ConfigError::Distribution(e.to_string()))?;
        Ok(Self {
            config,
            factor,
            weights: config.assets.iter().map(|a| a.target_weight).collect(),
            years_since_rebalance: 0,
            standard,
        })
    }

    pub fn weights(&self) -> &[f64] {
        &self.weights
    }

    fn correlated_draws(&self, rng: &mut ChaCha8Rng) -> Vec<f64> {
        let independent: Vec<f64> = (0..self.factor.len())
            .map(|_| rng.sample(&self.standard))
            .collect();
        self.factor
            .iter()
            .map(|row| row.iter().zip(&independent).map(|(l, e)| l * e).sum())
            .collect()
    }

    fn rebalance_due(&self) -> bool {
        match self.config.rebalance_frequency {
            RebalanceFrequency::Never => false,
            RebalanceFrequency::Annually => true,
            RebalanceFrequency::EveryYears { years } => self.years_since_rebalance >= years,
        }
    }

    pub fn step(&mut self, year: i32, rng: &mut ChaCha8Rng) -> RebalanceYear {
        let draws = self.correlated_draws(rng);
        let asset_returns: Vec<f64> = self
            .config
            .assets
            .iter()
            .zip(&draws)
            .map(|(asset, z)| {
                (asset.expected_return + asset.volatility * z).clamp(MIN_RETURN, MAX_RETURN)
            })
            .collect();

        let portfolio_return: f64 = self
            .weights
            .iter()
            .zip(&asset_returns)
            .map(|(w, r)| w * r)
            .sum();

        let growth = 1.0 + portfolio_return;
        if growth > 0.0 {
            for (weight, r) in self.weights.iter_mut().zip(&asset_returns) {
                *weight = *weight * (1.0 + r) / growth;
            }
        }

        self.years_since_rebalance += 1;
        let mut turnover = 0.0;
        let rebalanced = self.rebalance_due();
        if rebalanced {
            turnover = 0.5
                * self
                    .weights
                    .iter()
                    .zip(&self.config.assets)
                    .map(|(w, asset)| (w - asset.target_weight).abs())
                    .sum::<f64>();
            for (weight, asset) in self.weights.iter_mut().zip(&self.config.assets) {
                *weight = asset.target_weight;
            }
            self.years_since_rebalance = 0;
        }

        RebalanceYear {
            year,
            portfolio_return,
            asset_returns,
            turnover,
            rebalanced,
        }
    }
}
