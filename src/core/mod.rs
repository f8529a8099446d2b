mod accumulation;
mod engine;
mod error;
mod historical;
mod household;
mod overlay;
mod portfolio;
mod returns;
mod tax;
mod types;
mod validation;
mod withdrawal;

pub use accumulation::{AccumulationOutput, ElementResult, accumulate};
pub use engine::{
    MonteCarloResult, Percentiles, ReturnsReport, SimulationOutput, run_monte_carlo, simulate,
};
pub use error::ConfigError;
pub use historical::{HistoricalIndex, IndexRegistry};
pub use household::{
    AllowanceCoordination, Gender, HealthInsurance, Household, Person, StatutoryPension,
    life_expectancy,
};
pub use overlay::{
    InflationMode, InflationPreset, InflationScenario, MarketShock, OverlayConfig, OverlayMode,
    OverlayReport, ShockPreset, compose,
};
pub use portfolio::{PortfolioRebalancer, RebalanceYear, cholesky};
pub use returns::{ReturnSeries, generate_series, monthly_from_annual};
pub use tax::{
    AllowanceLedger, Holding, HouseholdLedger, PartialExemption, TaxCalculator, TaxOutcome,
    TaxParameters,
};
pub use types::{
    AssetClass, ContributionElement, ContributionSchedule, DivisorSource, FundType,
    GuardrailConfig, MultiAssetConfig, Owner, RebalanceFrequency, Resolution,
    ReturnConfiguration, SimulationConfig, Summary, TaxOptimizedConfig, Timeline,
    WithdrawalConfig, WithdrawalPlan, WithdrawalSegment, WithdrawalStrategy, YearResult,
};
pub use validation::validate;
pub use withdrawal::{
    SegmentSummary, WithdrawalContext, WithdrawalOutput, WithdrawalYear, starting_position,
    uniform_lifetime_divisor, withdraw,
};
