use chrono::Datelike;

use super::error::ConfigError;
use super::historical::IndexRegistry;
use super::household::{Household, Person};
use super::overlay::{InflationMode, InflationScenario, OverlayConfig};
use super::portfolio::validate_multi_asset;
use super::tax::TaxParameters;
use super::types::{
    ContributionElement, Owner, ReturnConfiguration, SimulationConfig, Timeline,
    WithdrawalConfig, WithdrawalSegment, WithdrawalStrategy,
};

pub fn validate(config: &SimulationConfig) -> Result<(), ConfigError> {
    validate_timeline(&config.timeline, config.withdrawal.is_some())?;
    for element in &config.elements {
        validate_element(element, &config.timeline, config.household.as_ref())?;
    }
    validate_returns(
        &config.returns,
        &IndexRegistry::with_custom(&config.custom_indices),
    )?;
    finite_above("inflationRate", -1.0, config.inflation_rate)?;
    validate_overlays(&config.overlays)?;
    validate_tax(&config.tax)?;
    if let Some(household) = &config.household {
        validate_household(household)?;
    }
    if let Some(withdrawal) = &config.withdrawal {
        validate_withdrawal(withdrawal, &config.timeline, config.household.as_ref())?;
    }
    Ok(())
}

fn validate_timeline(timeline: &Timeline, has_withdrawal: bool) -> Result<(), ConfigError> {
    if timeline.transition_year < timeline.start_year {
        return Err(ConfigError::InvalidTimeline(format!(
            "transition year {} is before start year {}",
            timeline.transition_year, timeline.start_year
        )));
    }
    if timeline.end_year < timeline.transition_year {
        return Err(ConfigError::InvalidTimeline(format!(
            "end year {} is before transition year {}",
            timeline.end_year, timeline.transition_year
        )));
    }
    if has_withdrawal && timeline.end_year == timeline.transition_year {
        return Err(ConfigError::InvalidTimeline(
            "a withdrawal phase needs at least one year after the transition year".to_string(),
        ));
    }
    Ok(())
}

fn validate_element(
    element: &ContributionElement,
    timeline: &Timeline,
    household: Option<&Household>,
) -> Result<(), ConfigError> {
    let invalid = |reason: String| ConfigError::InvalidContribution {
        id: element.id.clone(),
        reason,
    };

    if element.id.trim().is_empty() {
        return Err(invalid("id must not be empty".to_string()));
    }
    if let Some(end) = element.end {
        if end < element.start {
            return Err(invalid(format!("end {end} is before start {}", element.start)));
        }
        if end.year() < timeline.start_year {
            return Err(invalid(format!(
                "end {end} is before the simulation start {}",
                timeline.start_year
            )));
        }
    }
    let start_year = element.start.year();
    if start_year < timeline.start_year || start_year > timeline.transition_year {
        return Err(invalid(format!(
            "start {} is outside the accumulation phase {}..={}",
            element.start, timeline.start_year, timeline.transition_year
        )));
    }
    if !element.amount.is_finite() || element.amount < 0.0 {
        return Err(invalid(format!("amount must be >= 0, got {}", element.amount)));
    }
    if let Some(basis) = element.cost_basis {
        if !basis.is_finite() || basis < 0.0 {
            return Err(invalid(format!("cost basis must be >= 0, got {basis}")));
        }
    }
    unit_interval(format!("elements.{}.ter", element.id), element.ter)?;
    unit_interval(
        format!("elements.{}.transactionCostPercent", element.id),
        element.transaction_cost_percent,
    )?;
    if !element.transaction_cost_absolute.is_finite() || element.transaction_cost_absolute < 0.0 {
        return Err(ConfigError::rate(
            format!("elements.{}.transactionCostAbsolute", element.id),
            ">= 0",
            element.transaction_cost_absolute,
        ));
    }
    if element.owner == Owner::Spouse && household.is_none_or(|h| h.person(Owner::Spouse).is_none())
    {
        return Err(invalid("owner 'spouse' requires a couple household".to_string()));
    }
    Ok(())
}

fn validate_returns(
    returns: &ReturnConfiguration,
    registry: &IndexRegistry,
) -> Result<(), ConfigError> {
    match returns {
        ReturnConfiguration::Fixed { rate } => finite_above("returns.rate", -1.0, *rate),
        ReturnConfiguration::Random {
            average_return,
            standard_deviation,
            ..
        } => {
            finite_above("returns.averageReturn", -1.0, *average_return)?;
            if !standard_deviation.is_finite() || *standard_deviation < 0.0 {
                return Err(ConfigError::rate(
                    "returns.standardDeviation",
                    ">= 0",
                    *standard_deviation,
                ));
            }
            Ok(())
        }
        ReturnConfiguration::Variable { yearly_returns } => {
            for (year, rate) in yearly_returns {
                finite_above(format!("returns.yearlyReturns.{year}"), -1.0, *rate)?;
            }
            Ok(())
        }
        ReturnConfiguration::Historical { index_id } => registry
            .get(index_id)
            .map(|_| ())
            .ok_or_else(|| ConfigError::UnknownIndex(index_id.clone())),
        ReturnConfiguration::MultiAsset(multi) => validate_multi_asset(multi).map(|_| ()),
    }
}

fn validate_overlays(overlays: &OverlayConfig) -> Result<(), ConfigError> {
    for shock in &overlays.market_shocks {
        for rate in shock.returns() {
            finite_above("overlays.marketShocks.returns", -1.0, *rate)?;
        }
    }
    if let Some(InflationScenario::Custom { rates, mode, .. }) = &overlays.inflation_scenario {
        for rate in rates {
            finite_above("overlays.inflationScenario.rates", -1.0, *rate)?;
        }
        if let InflationMode::Blend { weight } = mode {
            unit_interval("overlays.inflationScenario.weight", *weight)?;
        }
    }
    Ok(())
}

fn validate_tax(tax: &TaxParameters) -> Result<(), ConfigError> {
    unit_interval("tax.capitalGainsRate", tax.capital_gains_rate)?;
    unit_interval("tax.solidaritySurcharge", tax.solidarity_surcharge)?;
    unit_interval("tax.churchTax", tax.church_tax)?;
    unit_interval("tax.incomeTaxRate", tax.income_tax_rate)?;
    let exemption = &tax.partial_exemption;
    for (field, quota) in [
        ("tax.partialExemption.equity", exemption.equity),
        ("tax.partialExemption.mixed", exemption.mixed),
        ("tax.partialExemption.realEstate", exemption.real_estate),
        ("tax.partialExemption.foreignRealEstate", exemption.foreign_real_estate),
        ("tax.partialExemption.other", exemption.other),
    ] {
        unit_interval(field, quota)?;
    }
    non_negative("tax.sparerpauschbetrag", tax.sparerpauschbetrag)?;
    non_negative("tax.grundfreibetrag", tax.grundfreibetrag)?;
    for (year, rate) in &tax.basiszins {
        if !rate.is_finite() {
            return Err(ConfigError::rate(format!("tax.basiszins.{year}"), "finite", *rate));
        }
    }
    Ok(())
}

fn validate_household(household: &Household) -> Result<(), ConfigError> {
    let check = |person: &Person| -> Result<(), ConfigError> {
        if let Some(pension) = &person.statutory_pension {
            if !pension.annual_amount.is_finite() || pension.annual_amount < 0.0 {
                return Err(ConfigError::InvalidHousehold(format!(
                    "pension amount must be >= 0, got {}",
                    pension.annual_amount
                )));
            }
            unit_interval("household.statutoryPension.taxableShare", pension.taxable_share)?;
            finite_above(
                "household.statutoryPension.annualIncrease",
                -1.0,
                pension.annual_increase,
            )?;
        }
        Ok(())
    };
    for (_, person) in household.members() {
        check(person)?;
    }
    Ok(())
}

fn validate_withdrawal(
    withdrawal: &WithdrawalConfig,
    timeline: &Timeline,
    household: Option<&Household>,
) -> Result<(), ConfigError> {
    let first = timeline.transition_year + 1;
    let segments = withdrawal.plan.segments(first, timeline.end_year);
    validate_segments(&segments, first, timeline.end_year)?;
    for segment in &segments {
        validate_strategy(segment, household)?;
    }

    if let Some(capital) = withdrawal.starting_capital {
        non_negative("withdrawal.startingCapital", capital)?;
    }
    if let Some(basis) = withdrawal.cost_basis {
        non_negative("withdrawal.costBasis", basis)?;
    }
    if let Some(ter) = withdrawal.ter {
        unit_interval("withdrawal.ter", ter)?;
    }
    if let Some(insurance) = &withdrawal.health_insurance {
        unit_interval(
            "withdrawal.healthInsurance.contributionRate",
            insurance.contribution_rate,
        )?;
        non_negative(
            "withdrawal.healthInsurance.familyInsuranceIncomeLimit",
            insurance.family_insurance_income_limit,
        )?;
        non_negative(
            "withdrawal.healthInsurance.contributionCeiling",
            insurance.contribution_ceiling,
        )?;
    }
    Ok(())
}

/// Segments must be non-empty, ordered, contiguous and cover
/// `first_year..=end_year` exactly.
pub fn validate_segments(
    segments: &[WithdrawalSegment],
    first_year: i32,
    end_year: i32,
) -> Result<(), ConfigError> {
    let (Some(head), Some(tail)) = (segments.first(), segments.last()) else {
        return Err(ConfigError::InvalidStrategy(
            "a segmented plan needs at least one segment".to_string(),
        ));
    };

    for segment in segments {
        if segment.end_year < segment.start_year {
            return Err(ConfigError::InvalidSegment {
                name: segment.name.clone(),
                reason: format!(
                    "end year {} is before start year {}",
                    segment.end_year, segment.start_year
                ),
            });
        }
    }

    for pair in segments.windows(2) {
        let (prev, next) = (&pair[0], &pair[1]);
        if next.start_year <= prev.end_year {
            return Err(ConfigError::SegmentOverlap(next.start_year));
        }
        if next.start_year > prev.end_year + 1 {
            return Err(ConfigError::SegmentGap {
                after: prev.end_year,
                before: next.start_year,
            });
        }
    }

    if head.start_year != first_year || tail.end_year != end_year {
        return Err(ConfigError::SegmentCoverage {
            expected_start: first_year,
            expected_end: end_year,
            actual_start: head.start_year,
            actual_end: tail.end_year,
        });
    }
    Ok(())
}

fn validate_strategy(
    segment: &WithdrawalSegment,
    household: Option<&Household>,
) -> Result<(), ConfigError> {
    let invalid = |reason: String| ConfigError::InvalidSegment {
        name: segment.name.clone(),
        reason,
    };

    match &segment.strategy {
        WithdrawalStrategy::FixedPercent { rate, .. }
        | WithdrawalStrategy::VariablePercent { rate } => unit_interval("strategy.rate", *rate),
        WithdrawalStrategy::FixedAmount { annual_amount, .. } => {
            non_negative("strategy.annualAmount", *annual_amount)
        }
        WithdrawalStrategy::DynamicGuardrails(guardrails) => {
            unit_interval("strategy.baseRate", guardrails.base_rate)?;
            non_negative("strategy.upperBand", guardrails.upper_band)?;
            unit_interval("strategy.lowerBand", guardrails.lower_band)?;
            non_negative("strategy.raise", guardrails.raise)?;
            unit_interval("strategy.cut", guardrails.cut)?;
            unit_interval("strategy.minRate", guardrails.min_rate)?;
            unit_interval("strategy.maxRate", guardrails.max_rate)?;
            if guardrails.min_rate > guardrails.max_rate {
                return Err(invalid("minRate is above maxRate".to_string()));
            }
            if guardrails.evaluation_interval_years == 0 {
                return Err(invalid("evaluation interval must be at least one year".to_string()));
            }
            Ok(())
        }
        WithdrawalStrategy::RequiredMinimumDistribution { person, .. } => {
            match household.and_then(|h| h.person(*person)) {
                Some(_) => Ok(()),
                None => Err(invalid(format!(
                    "required minimum distribution needs a household member for {person:?}"
                ))),
            }
        }
        WithdrawalStrategy::CapitalPreservation => Ok(()),
        WithdrawalStrategy::TaxOptimized(optimized) => {
            unit_interval("strategy.minRate", optimized.min_rate)?;
            unit_interval("strategy.maxRate", optimized.max_rate)?;
            unit_interval("strategy.targetEffectiveTaxRate", optimized.target_effective_tax_rate)?;
            unit_interval(
                "strategy.targetAllowanceUtilization",
                optimized.target_allowance_utilization,
            )?;
            if optimized.min_rate > optimized.max_rate {
                return Err(invalid("minRate is above maxRate".to_string()));
            }
            Ok(())
        }
    }
}

fn unit_interval(field: impl Into<String>, value: f64) -> Result<(), ConfigError> {
    if value.is_finite() && (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(ConfigError::rate(field, "within [0, 1]", value))
    }
}

fn non_negative(field: impl Into<String>, value: f64) -> Result<(), ConfigError> {
    if value.is_finite() && value >= 0.0 {
        Ok(())
    } else {
        Err(ConfigError::rate(field, ">= 0", value))
    }
}

fn finite_above(field: impl Into<String>, floor: f64, value: f64) -> Result<(), ConfigError> {
    if value.is_finite() && value > floor {
        Ok(())
    } else {
        Err(ConfigError::rate(field, "finite and above -100%", value))
    }
}
