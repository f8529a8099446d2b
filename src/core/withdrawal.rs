use std::collections::BTreeMap;

use serde::Serialize;
use tracing::debug;

use super::accumulation::Handoff;
use super::household::{Household, Person};
use super::returns::ReturnSeries;
use super::tax::{Holding, HouseholdLedger, TaxCalculator};
use super::types::{
    DivisorSource, GuardrailConfig, Owner, Summary, TaxOptimizedConfig, Timeline,
    WithdrawalConfig, WithdrawalSegment, WithdrawalStrategy, YearResult,
};

const DEPLETION_EPS: f64 = 1e-6;
const BISECTION_STEPS: usize = 40;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WithdrawalYear {
    #[serde(flatten)]
    pub result: YearResult,
    pub segment: usize,
    pub rente: f64,
    pub einkommensteuer: f64,
    pub krankenversicherung: f64,
    pub netto_einkommen: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SegmentSummary {
    pub name: String,
    pub start_year: i32,
    pub end_year: i32,
    pub years: usize,
    pub total_entnahme: f64,
    pub total_steuer: f64,
    pub endkapital: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WithdrawalOutput {
    pub years: Vec<WithdrawalYear>,
    pub segments: Vec<SegmentSummary>,
    pub summary: Summary,
    pub depletion_year: Option<i32>,
}

pub struct WithdrawalContext<'a> {
    pub timeline: &'a Timeline,
    pub config: &'a WithdrawalConfig,
    pub returns: &'a ReturnSeries,
    pub inflation: &'a BTreeMap<i32, f64>,
    pub calc: &'a TaxCalculator<'a>,
    pub household: Option<&'a Household>,
    pub realize_rebalancing_gains: bool,
}

impl WithdrawalContext<'_> {
    fn inflation(&self, year: i32) -> f64 {
        self.inflation.get(&year).copied().unwrap_or(0.0)
    }

    fn rebalancing_turnover(&self, year: i32) -> f64 {
        if self.realize_rebalancing_gains {
            self.returns.rebalancing_turnover(year).clamp(0.0, 1.0)
        } else {
            0.0
        }
    }
}

pub fn starting_position(
    config: &WithdrawalConfig,
    handoff: &Handoff,
    calc: &TaxCalculator<'_>,
) -> Handoff {
    let mut start = match config.starting_capital {
        Some(capital) => Handoff {
            holding: Holding {
                value: capital,
                cost_basis: config.cost_basis.unwrap_or(capital),
                taxed_vorabpauschale: 0.0,
            },
            ..handoff.clone()
        },
        None => handoff.clone(),
    };
    if let Some(fund_type) = config.fund_type {
        start.exemption_quota = calc.params().partial_exemption.quota(fund_type);
    }
    if let Some(ter) = config.ter {
        start.ter = ter;
    }
    start
}

struct StrategyState {
    entry_capital: f64,
    cumulative_inflation: f64,
    guardrail_rate: f64,
    guardrail_baseline: f64,
    years_in_segment: u32,
}

impl StrategyState {
    fn enter(strategy: &WithdrawalStrategy, capital: f64) -> Self {
        let guardrail_rate = match strategy {
            WithdrawalStrategy::DynamicGuardrails(guardrails) => guardrails.base_rate,
            _ => 0.0,
        };
        Self {
            entry_capital: capital,
            cumulative_inflation: 1.0,
            guardrail_rate,
            guardrail_baseline: capital,
            years_in_segment: 0,
        }
    }
}

struct YearTax<'a> {
    calc: &'a TaxCalculator<'a>,
    ledger: &'a HouseholdLedger,
    shares: &'a [(Owner, f64)],
    quota: f64,
    vorabpauschale: f64,
    rebalancing_gain: f64,
    holding: &'a Holding,
    use_grundfreibetrag: bool,
}

impl YearTax<'_> {
    fn tax_for(&self, withdrawal: f64) -> f64 {
        self.calc
            .preview(
                self.ledger,
                self.shares,
                self.quota,
                self.vorabpauschale,
                self.rebalancing_gain + self.holding.sale_gain(withdrawal),
                self.use_grundfreibetrag,
            )
            .steuer
    }

    fn marginal_rate(&self, withdrawal: f64) -> f64 {
        if withdrawal <= 0.0 {
            return 0.0;
        }
        (self.tax_for(withdrawal) - self.tax_for(0.0)) / withdrawal
    }

    /// Largest withdrawal up to `planned` whose tax still fits into `available`.
    fn affordable(&self, planned: f64, available: f64) -> f64 {
        if planned <= 0.0 || available <= 0.0 {
            return 0.0;
        }
        if planned + self.tax_for(planned) <= available {
            return planned;
        }

        let mut lo = 0.0;
        let mut hi = planned.min(available);
        if hi + self.tax_for(hi) <= available {
            return hi;
        }
        for _ in 0..BISECTION_STEPS {
            let mid = (lo + hi) * 0.5;
            if mid + self.tax_for(mid) <= available {
                lo = mid;
            } else {
                hi = mid;
            }
        }
        lo
    }
}

pub fn withdraw(
    start: &Handoff,
    ctx: &WithdrawalContext<'_>,
    ledger: &mut HouseholdLedger,
) -> WithdrawalOutput {
    let timeline = ctx.timeline;
    let first_year = timeline.transition_year + 1;
    let segments = ctx.config.plan.segments(first_year, timeline.end_year);
    let members: Vec<(Owner, &Person)> =
        ctx.household.map(Household::members).unwrap_or_default();

    let mut holding = start.holding;
    let mut depletion_year = None;
    let mut years = Vec::new();
    let mut summaries = Vec::with_capacity(segments.len());

    debug!(
        first_year,
        end_year = timeline.end_year,
        capital = holding.value,
        segments = segments.len(),
        "withdrawal phase started"
    );

    for (index, segment) in segments.iter().enumerate() {
        let mut state = StrategyState::enter(&segment.strategy, holding.value.max(0.0));
        debug!(segment = %segment.name, capital = state.entry_capital, "segment entered");

        for year in segment.start_year..=segment.end_year {
            ledger.begin_year(year);

            let mut rente = 0.0;
            let mut einkommensteuer = 0.0;
            let mut pensions = Vec::with_capacity(members.len());
            for (owner, person) in &members {
                let gross = person.pension_gross(year);
                einkommensteuer += ctx.calc.income_tax(
                    ledger,
                    *owner,
                    person.pension_taxable(year),
                    ctx.config.use_grundfreibetrag,
                );
                rente += gross;
                pensions.push(gross);
            }

            let startkapital = holding.value.max(0.0);
            let mut result = YearResult::empty(year);
            let mut entnahme = 0.0;

            if depletion_year.is_none() && startkapital <= DEPLETION_EPS {
                depletion_year = Some(year);
                debug!(year, "capital depleted");
            }

            if depletion_year.is_none() {
                let rate = ctx.returns.rate(year);
                let ter_cost = start.ter * startkapital * (1.0 + rate);
                let zinsen = startkapital * rate - ter_cost;
                let vorabpauschale = ctx.calc.vorabpauschale(year, startkapital, zinsen);

                holding.value = startkapital + zinsen;
                holding.taxed_vorabpauschale += vorabpauschale;

                let rebalanced = holding.value * ctx.rebalancing_turnover(year);
                let rebalancing_gain = holding.sale_gain(rebalanced);
                if rebalanced > 0.0 {
                    holding.restate(rebalanced);
                }

                let year_tax = YearTax {
                    calc: ctx.calc,
                    ledger: &*ledger,
                    shares: &start.owner_shares,
                    quota: start.exemption_quota,
                    vorabpauschale,
                    rebalancing_gain,
                    holding: &holding,
                    use_grundfreibetrag: ctx.config.use_grundfreibetrag,
                };
                let planned =
                    planned_withdrawal(segment, &mut state, startkapital, year, ctx, &year_tax);
                entnahme = year_tax.affordable(planned, holding.value);

                let realized_gain = rebalancing_gain + holding.sale_gain(entnahme);
                let outcome = ctx.calc.settle(
                    ledger,
                    &start.owner_shares,
                    start.exemption_quota,
                    vorabpauschale,
                    realized_gain,
                    ctx.config.use_grundfreibetrag,
                );
                holding.sell(entnahme);

                // A clamped withdrawal takes everything the capital can pay.
                let exhausted = entnahme < planned;
                let mut endkapital = startkapital + zinsen - entnahme - outcome.steuer;
                if exhausted || endkapital <= DEPLETION_EPS {
                    endkapital = 0.0;
                    holding = Holding::default();
                    depletion_year = Some(year);
                    debug!(year, "capital depleted");
                } else {
                    holding.value = endkapital;
                }

                result = YearResult {
                    year,
                    startkapital,
                    endkapital,
                    zinsen,
                    bezahlte_steuer: outcome.steuer,
                    vorabpauschale: outcome.vorabpauschale,
                    genutzter_freibetrag: outcome.genutzter_freibetrag,
                    einzahlung: 0.0,
                    entnahme,
                    kosten: ter_cost,
                };
            }

            let krankenversicherung = ctx.config.health_insurance.as_ref().map_or(0.0, |insurance| {
                let incomes: Vec<f64> = members
                    .iter()
                    .zip(&pensions)
                    .map(|((owner, _), pension)| {
                        pension + entnahme * share_of(&start.owner_shares, *owner)
                    })
                    .collect();
                if incomes.is_empty() {
                    insurance.contributions(&[entnahme])
                } else {
                    insurance.contributions(&incomes)
                }
            });

            years.push(WithdrawalYear {
                result,
                segment: index,
                rente,
                einkommensteuer,
                krankenversicherung,
                netto_einkommen: entnahme + rente - einkommensteuer - krankenversicherung,
            });

            state.years_in_segment += 1;
            state.cumulative_inflation *= 1.0 + ctx.inflation(year);
        }

        let segment_years = &years[years.len() - segment_len(segment)..];
        summaries.push(summarize_segment(segment, segment_years));
    }

    let rows: Vec<YearResult> = years.iter().map(|year| year.result).collect();
    let summary = Summary::from_years(&rows);

    debug!(
        end_capital = summary.endkapital,
        withdrawn = summary.entnahmen,
        depletion_year = ?depletion_year,
        "withdrawal phase finished"
    );

    WithdrawalOutput {
        years,
        segments: summaries,
        summary,
        depletion_year,
    }
}

fn segment_len(segment: &WithdrawalSegment) -> usize {
    (segment.end_year - segment.start_year + 1).max(0) as usize
}

fn share_of(shares: &[(Owner, f64)], owner: Owner) -> f64 {
    shares
        .iter()
        .filter(|(candidate, _)| *candidate == owner)
        .map(|(_, share)| share)
        .sum()
}

fn summarize_segment(segment: &WithdrawalSegment, years: &[WithdrawalYear]) -> SegmentSummary {
    SegmentSummary {
        name: segment.name.clone(),
        start_year: segment.start_year,
        end_year: segment.end_year,
        years: years.len(),
        total_entnahme: years.iter().map(|y| y.result.entnahme).sum(),
        total_steuer: years.iter().map(|y| y.result.bezahlte_steuer).sum(),
        endkapital: years.last().map_or(0.0, |y| y.result.endkapital),
    }
}

fn planned_withdrawal(
    segment: &WithdrawalSegment,
    state: &mut StrategyState,
    capital: f64,
    year: i32,
    ctx: &WithdrawalContext<'_>,
    year_tax: &YearTax<'_>,
) -> f64 {
    let amount = match &segment.strategy {
        WithdrawalStrategy::FixedPercent {
            rate,
            inflation_adjusted,
        } => {
            let base = rate * state.entry_capital;
            if *inflation_adjusted {
                base * state.cumulative_inflation
            } else {
                base
            }
        }
        WithdrawalStrategy::FixedAmount {
            annual_amount,
            inflation_adjusted,
        } => {
            if *inflation_adjusted {
                annual_amount * state.cumulative_inflation
            } else {
                *annual_amount
            }
        }
        WithdrawalStrategy::DynamicGuardrails(guardrails) => {
            apply_guardrails(guardrails, state, capital);
            state.guardrail_rate * capital
        }
        WithdrawalStrategy::VariablePercent { rate } => rate * capital,
        WithdrawalStrategy::RequiredMinimumDistribution {
            person,
            divisor_source,
        } => ctx
            .household
            .and_then(|household| household.person(*person))
            .map_or(0.0, |person| {
                let divisor = match divisor_source {
                    DivisorSource::UniformLifetime => uniform_lifetime_divisor(person.age_in(year)),
                    DivisorSource::LifeExpectancy => person.remaining_life_expectancy(year),
                };
                capital / divisor.max(1.0)
            }),
        WithdrawalStrategy::CapitalPreservation => {
            let real = real_return(ctx.returns.rate(year), ctx.inflation(year));
            if real > 1e-9 {
                capital * real
            } else {
                let remaining = (ctx.timeline.end_year - year + 1).max(1) as f64;
                capital / remaining
            }
        }
        WithdrawalStrategy::TaxOptimized(optimized) => {
            tax_optimized_amount(optimized, capital, year_tax)
        }
    };
    amount.max(0.0)
}

fn real_return(nominal: f64, inflation: f64) -> f64 {
    if inflation <= -1.0 {
        return 0.0;
    }
    (1.0 + nominal) / (1.0 + inflation) - 1.0
}

fn apply_guardrails(guardrails: &GuardrailConfig, state: &mut StrategyState, capital: f64) {
    let interval = guardrails.evaluation_interval_years.max(1);
    if state.years_in_segment == 0 || state.years_in_segment % interval != 0 {
        return;
    }

    let baseline = state.guardrail_baseline;
    let adjusted = if capital > baseline * (1.0 + guardrails.upper_band) {
        Some(state.guardrail_rate * (1.0 + guardrails.raise))
    } else if capital < baseline * (1.0 - guardrails.lower_band) {
        Some(state.guardrail_rate * (1.0 - guardrails.cut))
    } else {
        None
    };

    if let Some(rate) = adjusted {
        state.guardrail_rate = rate.clamp(guardrails.min_rate, guardrails.max_rate);
        state.guardrail_baseline = capital;
    }
}

/// Distribution period of the IRS Uniform Lifetime Table for ages 72..=120.
const UNIFORM_LIFETIME: [f64; 49] = [
    27.4, 26.5, 25.5, 24.6, 23.7, 22.9, 22.0, 21.1, 20.2, 19.4, 18.5, 17.7, 16.8, 16.0, 15.2,
    14.4, 13.7, 12.9, 12.2, 11.5, 10.8, 10.1, 9.5, 8.9, 8.4, 7.8, 7.3, 6.8, 6.4, 6.0, 5.6, 5.2,
    4.9, 4.6, 4.3, 4.1, 3.9, 3.7, 3.5, 3.4, 3.3, 3.1, 3.0, 2.9, 2.8, 2.7, 2.5, 2.3, 2.0,
];

pub fn uniform_lifetime_divisor(age: u32) -> f64 {
    let divisor = if age < 72 {
        UNIFORM_LIFETIME[0] + (72 - age) as f64
    } else {
        let index = ((age - 72) as usize).min(UNIFORM_LIFETIME.len() - 1);
        UNIFORM_LIFETIME[index]
    };
    divisor.max(1.0)
}

fn tax_optimized_amount(
    optimized: &TaxOptimizedConfig,
    capital: f64,
    year_tax: &YearTax<'_>,
) -> f64 {
    let lo_amount = optimized.min_rate * capital;
    let hi_amount = optimized.max_rate * capital;
    let target = optimized.target_effective_tax_rate;

    let chosen = if year_tax.marginal_rate(hi_amount) <= target {
        hi_amount
    } else if year_tax.marginal_rate(lo_amount) > target {
        lo_amount
    } else {
        let mut lo = lo_amount;
        let mut hi = hi_amount;
        for _ in 0..BISECTION_STEPS {
            let mid = (lo + hi) * 0.5;
            if year_tax.marginal_rate(mid) <= target {
                lo = mid;
            } else {
                hi = mid;
            }
        }
        lo
    };

    chosen.max(allowance_utilization_amount(optimized, year_tax)).min(hi_amount)
}

fn allowance_utilization_amount(optimized: &TaxOptimizedConfig, year_tax: &YearTax<'_>) -> f64 {
    let holding = year_tax.holding;
    if optimized.target_allowance_utilization <= 0.0 || holding.value <= 0.0 {
        return 0.0;
    }

    let after_vorab = year_tax.calc.preview(
        year_tax.ledger,
        year_tax.shares,
        year_tax.quota,
        year_tax.vorabpauschale,
        year_tax.rebalancing_gain,
        false,
    );
    let remaining = (year_tax.ledger.sparerpauschbetrag_remaining()
        - after_vorab.genutzter_freibetrag)
        .max(0.0);
    let taxable_per_euro =
        holding.sale_gain(holding.value) / holding.value * (1.0 - year_tax.quota);
    if taxable_per_euro <= 0.0 {
        return 0.0;
    }
    optimized.target_allowance_utilization * remaining / taxable_per_euro
}
