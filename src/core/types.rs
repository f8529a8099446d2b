use std::collections::BTreeMap;

use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};

use super::historical::HistoricalIndex;
use super::household::{HealthInsurance, Household};
use super::overlay::OverlayConfig;
use super::tax::TaxParameters;

#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Resolution {
    #[default]
    Yearly,
    Monthly,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Timeline {
    pub start_year: i32,
    pub transition_year: i32,
    pub end_year: i32,
    #[serde(default)]
    pub resolution: Resolution,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ContributionSchedule {
    Monthly,
    Yearly,
    OneTime,
}

#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FundType {
    #[default]
    Equity,
    Mixed,
    RealEstate,
    ForeignRealEstate,
    Other,
}

#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Owner {
    #[default]
    Primary,
    Spouse,
}

impl Owner {
    pub fn index(self) -> usize {
        match self {
            Owner::Primary => 0,
            Owner::Spouse => 1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContributionElement {
    pub id: String,
    pub start: NaiveDate,
    #[serde(default)]
    pub end: Option<NaiveDate>,
    pub amount: f64,
    pub schedule: ContributionSchedule,
    #[serde(default)]
    pub cost_basis: Option<f64>,
    #[serde(default)]
    pub fund_type: FundType,
    #[serde(default)]
    pub ter: f64,
    #[serde(default)]
    pub transaction_cost_percent: f64,
    #[serde(default)]
    pub transaction_cost_absolute: f64,
    #[serde(default)]
    pub owner: Owner,
}

impl ContributionElement {
    pub fn payment_months(&self, year: i32) -> Vec<u32> {
        let start = (self.start.year(), self.start.month());
        let end = self.end.map(|d| (d.year(), d.month()));
        let in_range = |month: u32| {
            let at = (year, month);
            at >= start && end.is_none_or(|end| at <= end)
        };

        match self.schedule {
            ContributionSchedule::Monthly => (1..=12).filter(|&m| in_range(m)).collect(),
            ContributionSchedule::Yearly => {
                let month = self.start.month();
                if in_range(month) {
                    vec![month]
                } else {
                    Vec::new()
                }
            }
            ContributionSchedule::OneTime => {
                if year == self.start.year() {
                    vec![self.start.month()]
                } else {
                    Vec::new()
                }
            }
        }
    }

    pub fn basis_per_payment(&self) -> f64 {
        self.cost_basis.unwrap_or(self.amount).max(0.0)
    }

    pub fn net_payment(&self) -> f64 {
        let costs = self.amount * self.transaction_cost_percent + self.transaction_cost_absolute;
        (self.amount - costs).max(0.0)
    }
}

/// One row of the projection. `startkapital` already includes the year's
/// `einzahlung`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct YearResult {
    pub year: i32,
    pub startkapital: f64,
    pub endkapital: f64,
    pub zinsen: f64,
    pub bezahlte_steuer: f64,
    pub vorabpauschale: f64,
    pub genutzter_freibetrag: f64,
    pub einzahlung: f64,
    pub entnahme: f64,
    pub kosten: f64,
}

impl YearResult {
    pub fn empty(year: i32) -> Self {
        Self {
            year,
            ..Self::default()
        }
    }

    pub(crate) fn add(&mut self, other: &YearResult) {
        self.startkapital += other.startkapital;
        self.endkapital += other.endkapital;
        self.zinsen += other.zinsen;
        self.bezahlte_steuer += other.bezahlte_steuer;
        self.vorabpauschale += other.vorabpauschale;
        self.genutzter_freibetrag += other.genutzter_freibetrag;
        self.einzahlung += other.einzahlung;
        self.entnahme += other.entnahme;
        self.kosten += other.kosten;
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Summary {
    pub startkapital: f64,
    pub einzahlungen: f64,
    pub zinsen: f64,
    pub bezahlte_steuer: f64,
    pub entnahmen: f64,
    pub endkapital: f64,
}

impl Summary {
    pub fn from_years(years: &[YearResult]) -> Self {
        let Some(first) = years.first() else {
            return Self::default();
        };

        let mut summary = years.iter().fold(Self::default(), |mut acc, row| {
            acc.einzahlungen += row.einzahlung;
            acc.zinsen += row.zinsen;
            acc.bezahlte_steuer += row.bezahlte_steuer;
            acc.entnahmen += row.entnahme;
            acc
        });
        summary.startkapital = first.startkapital - first.einzahlung + summary.einzahlungen;
        summary.endkapital = years.last().map_or(0.0, |row| row.endkapital);
        summary
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssetClass {
    pub name: String,
    pub target_weight: f64,
    pub expected_return: f64,
    pub volatility: f64,
}

#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum RebalanceFrequency {
    Never,
    #[default]
    Annually,
    EveryYears { years: u32 },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MultiAssetConfig {
    pub assets: Vec<AssetClass>,
    pub correlations: Vec<Vec<f64>>,
    #[serde(default)]
    pub rebalance_frequency: RebalanceFrequency,
    #[serde(default)]
    pub seed: Option<u64>,
    #[serde(default)]
    pub realize_rebalancing_gains: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum ReturnConfiguration {
    Fixed {
        rate: f64,
    },
    Random {
        average_return: f64,
        standard_deviation: f64,
        #[serde(default)]
        seed: Option<u64>,
    },
    Variable {
        yearly_returns: BTreeMap<i32, f64>,
    },
    Historical {
        index_id: String,
    },
    #[serde(rename = "multiasset")]
    MultiAsset(MultiAssetConfig),
}

impl ReturnConfiguration {
    pub fn is_variable(&self) -> bool {
        matches!(self, ReturnConfiguration::Variable { .. })
    }

    pub fn is_stochastic(&self) -> bool {
        matches!(
            self,
            ReturnConfiguration::Random { .. } | ReturnConfiguration::MultiAsset(_)
        )
    }

    pub fn reseeded(&self, seed: u64) -> Self {
        let mut config = self.clone();
        match &mut config {
            ReturnConfiguration::Random { seed: current, .. } => *current = Some(seed),
            ReturnConfiguration::MultiAsset(multi) => multi.seed = Some(seed),
            ReturnConfiguration::Fixed { .. }
            | ReturnConfiguration::Variable { .. }
            | ReturnConfiguration::Historical { .. } => {}
        }
        config
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GuardrailConfig {
    pub base_rate: f64,
    pub upper_band: f64,
    pub lower_band: f64,
    pub raise: f64,
    pub cut: f64,
    #[serde(default = "default_evaluation_interval")]
    pub evaluation_interval_years: u32,
    #[serde(default)]
    pub min_rate: f64,
    #[serde(default = "default_max_rate")]
    pub max_rate: f64,
}

fn default_evaluation_interval() -> u32 {
    1
}

fn default_max_rate() -> f64 {
    1.0
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaxOptimizedConfig {
    pub min_rate: f64,
    pub max_rate: f64,
    pub target_effective_tax_rate: f64,
    #[serde(default)]
    pub target_allowance_utilization: f64,
}

#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum DivisorSource {
    #[default]
    UniformLifetime,
    LifeExpectancy,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum WithdrawalStrategy {
    FixedPercent {
        rate: f64,
        #[serde(default)]
        inflation_adjusted: bool,
    },
    FixedAmount {
        annual_amount: f64,
        #[serde(default)]
        inflation_adjusted: bool,
    },
    DynamicGuardrails(GuardrailConfig),
    VariablePercent {
        rate: f64,
    },
    RequiredMinimumDistribution {
        #[serde(default)]
        person: Owner,
        #[serde(default)]
        divisor_source: DivisorSource,
    },
    CapitalPreservation,
    TaxOptimized(TaxOptimizedConfig),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WithdrawalSegment {
    pub name: String,
    pub start_year: i32,
    pub end_year: i32,
    pub strategy: WithdrawalStrategy,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum WithdrawalPlan {
    Single { strategy: WithdrawalStrategy },
    Segmented { segments: Vec<WithdrawalSegment> },
}

impl WithdrawalPlan {
    pub fn segments(&self, first_year: i32, end_year: i32) -> Vec<WithdrawalSegment> {
        match self {
            WithdrawalPlan::Single { strategy } => vec![WithdrawalSegment {
                name: "Entsparphase".to_string(),
                start_year: first_year,
                end_year,
                strategy: strategy.clone(),
            }],
            WithdrawalPlan::Segmented { segments } => segments.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WithdrawalConfig {
    pub plan: WithdrawalPlan,
    #[serde(default)]
    pub starting_capital: Option<f64>,
    #[serde(default)]
    pub cost_basis: Option<f64>,
    #[serde(default)]
    pub fund_type: Option<FundType>,
    #[serde(default)]
    pub ter: Option<f64>,
    #[serde(default)]
    pub use_grundfreibetrag: bool,
    #[serde(default)]
    pub health_insurance: Option<HealthInsurance>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SimulationConfig {
    pub timeline: Timeline,
    #[serde(default)]
    pub elements: Vec<ContributionElement>,
    pub returns: ReturnConfiguration,
    #[serde(default)]
    pub inflation_rate: f64,
    #[serde(default)]
    pub overlays: OverlayConfig,
    #[serde(default)]
    pub tax: TaxParameters,
    #[serde(default)]
    pub household: Option<Household>,
    #[serde(default)]
    pub withdrawal: Option<WithdrawalConfig>,
    #[serde(default)]
    pub custom_indices: Vec<HistoricalIndex>,
}
