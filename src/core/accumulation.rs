use chrono::Datelike;
use serde::Serialize;

use super::returns::{ReturnSeries, monthly_from_annual};
use super::tax::{Holding, HouseholdLedger, TaxCalculator};
use super::types::{ContributionElement, Owner, Resolution, Summary, Timeline, YearResult};

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ElementResult {
    pub id: String,
    pub years: Vec<YearResult>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Handoff {
    pub holding: Holding,
    pub exemption_quota: f64,
    pub ter: f64,
    pub owner_shares: Vec<(Owner, f64)>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AccumulationOutput {
    pub elements: Vec<ElementResult>,
    pub totals: Vec<YearResult>,
    pub summary: Summary,
    #[serde(skip)]
    pub handoff: Handoff,
}

struct ElementState<'a> {
    element: &'a ContributionElement,
    holding: Holding,
    quota: f64,
    years: Vec<YearResult>,
}

struct Growth {
    zinsen: f64,
    ter_cost: f64,
}

pub fn accumulate(
    elements: &[ContributionElement],
    timeline: &Timeline,
    returns: &ReturnSeries,
    calc: &TaxCalculator<'_>,
    ledger: &mut HouseholdLedger,
    realize_rebalancing_gains: bool,
) -> AccumulationOutput {
    let exemption = &calc.params().partial_exemption;
    let mut states: Vec<ElementState<'_>> = elements
        .iter()
        .map(|element| ElementState {
            element,
            holding: Holding::default(),
            quota: exemption.quota(element.fund_type),
            years: Vec::new(),
        })
        .collect();

    let mut totals = Vec::new();
    for year in timeline.start_year..=timeline.transition_year {
        ledger.begin_year(year);
        let mut total = YearResult::empty(year);

        for state in &mut states {
            if year < state.element.start.year() {
                continue;
            }
            let turnover = if realize_rebalancing_gains {
                returns.rebalancing_turnover(year)
            } else {
                0.0
            };
            let row = step_element(
                state,
                year,
                timeline.resolution,
                returns,
                calc,
                ledger,
                turnover,
            );
            total.add(&row);
            state.years.push(row);
        }

        totals.push(total);
    }

    let handoff = handoff_from(&states);
    let summary = Summary::from_years(&totals);
    AccumulationOutput {
        elements: states
            .into_iter()
            .map(|state| ElementResult {
                id: state.element.id.clone(),
                years: state.years,
            })
            .collect(),
        totals,
        summary,
        handoff,
    }
}

fn step_element(
    state: &mut ElementState<'_>,
    year: i32,
    resolution: Resolution,
    returns: &ReturnSeries,
    calc: &TaxCalculator<'_>,
    ledger: &mut HouseholdLedger,
    turnover: f64,
) -> YearResult {
    let element = state.element;
    let months = element.payment_months(year);
    let payments = months.len() as f64;
    let net_payment = element.net_payment();
    let einzahlung = net_payment * payments;
    let transaction_costs = (element.amount - net_payment) * payments;

    let previous = state.holding.value;
    let startkapital = previous + einzahlung;
    let rate = returns.rate(year);

    let growth = match resolution {
        Resolution::Yearly => {
            let ter_cost = element.ter * startkapital * (1.0 + rate);
            Growth {
                zinsen: startkapital * rate - ter_cost,
                ter_cost,
            }
        }
        Resolution::Monthly => monthly_growth(previous, net_payment, &months, rate, element.ter),
    };

    // Purchases during the year count pro rata temporis towards the base.
    let base = previous
        + months
            .iter()
            .map(|month| net_payment * (13 - month) as f64 / 12.0)
            .sum::<f64>();
    let vorabpauschale = calc.vorabpauschale(year, base, growth.zinsen);

    state.holding.value = startkapital + growth.zinsen;
    state.holding.cost_basis += element.basis_per_payment() * payments;
    state.holding.taxed_vorabpauschale += vorabpauschale;

    let sale = state.holding.value * turnover.clamp(0.0, 1.0);
    let realized_gain = state.holding.sale_gain(sale);

    let outcome = calc.settle(
        ledger,
        &[(element.owner, 1.0)],
        state.quota,
        vorabpauschale,
        realized_gain,
        false,
    );
    if sale > 0.0 {
        state.holding.restate(sale);
    }

    let endkapital = startkapital + growth.zinsen - outcome.steuer;
    state.holding.value = endkapital;

    YearResult {
        year,
        startkapital,
        endkapital,
        zinsen: growth.zinsen,
        bezahlte_steuer: outcome.steuer,
        vorabpauschale: outcome.vorabpauschale,
        genutzter_freibetrag: outcome.genutzter_freibetrag,
        einzahlung,
        entnahme: 0.0,
        kosten: growth.ter_cost + transaction_costs,
    }
}

/// Month-by-month compounding; payments are credited at the end of their
/// month and earn from the following month on.
fn monthly_growth(
    previous: f64,
    payment: f64,
    months: &[u32],
    annual_rate: f64,
    ter: f64,
) -> Growth {
    let monthly_rate = monthly_from_annual(annual_rate);
    let monthly_ter = ter / 12.0;
    let mut value = previous;
    let mut zinsen = 0.0;
    let mut ter_cost = 0.0;

    for month in 1..=12u32 {
        let gross = value * monthly_rate;
        let cost = value * (1.0 + monthly_rate) * monthly_ter;
        value += gross - cost;
        zinsen += gross - cost;
        ter_cost += cost;
        if months.contains(&month) {
            value += payment;
        }
    }

    Growth { zinsen, ter_cost }
}

fn handoff_from(states: &[ElementState<'_>]) -> Handoff {
    let mut holding = Holding::default();
    for state in states {
        holding.merge(&state.holding);
    }

    let total = holding.value;
    if total <= 0.0 {
        return Handoff {
            holding,
            exemption_quota: states.first().map_or(0.0, |state| state.quota),
            ter: states.first().map_or(0.0, |state| state.element.ter),
            owner_shares: vec![(Owner::Primary, 1.0)],
        };
    }

    let spouse_share = weighted(states, total, |state| {
        if state.element.owner == Owner::Spouse {
            1.0
        } else {
            0.0
        }
    });

    let mut owner_shares = vec![(Owner::Primary, 1.0 - spouse_share)];
    if spouse_share > 0.0 {
        owner_shares.push((Owner::Spouse, spouse_share));
    }

    Handoff {
        holding,
        exemption_quota: weighted(states, total, |state| state.quota),
        ter: weighted(states, total, |state| state.element.ter),
        owner_shares,
    }
}

fn weighted(states: &[ElementState<'_>], total: f64, f: impl Fn(&ElementState<'_>) -> f64) -> f64 {
    states
        .iter()
        .map(|state| f(state) * state.holding.value.max(0.0))
        .sum::<f64>()
        / total
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::household::AllowanceCoordination;
    use crate::core::tax::TaxParameters;
    use crate::core::types::{ContributionSchedule, FundType};
    use chrono::NaiveDate;
    use proptest::prelude::{prop_assert, proptest};

    fn assert_approx(actual: f64, expected: f64) {
        assert_approx_tol(actual, expected, 1e-6);
    }

    fn assert_approx_tol(actual: f64, expected: f64, tol: f64) {
        assert!(
            (actual - expected).abs() <= tol,
            "expected {expected}, got {actual} (tol {tol})"
        );
    }

    fn element(
        id: &str,
        amount: f64,
        schedule: ContributionSchedule,
        start_year: i32,
    ) -> ContributionElement {
        ContributionElement {
            id: id.to_string(),
            start: NaiveDate::from_ymd_opt(start_year, 1, 1).expect("valid date"),
            end: None,
            amount,
            schedule,
            cost_basis: None,
            fund_type: FundType::Equity,
            ter: 0.0,
            transaction_cost_percent: 0.0,
            transaction_cost_absolute: 0.0,
            owner: Owner::Primary,
        }
    }

    fn timeline(start_year: i32, transition_year: i32, resolution: Resolution) -> Timeline {
        Timeline {
            start_year,
            transition_year,
            end_year: transition_year,
            resolution,
        }
    }

    fn ledger() -> HouseholdLedger {
        HouseholdLedger::new(1, AllowanceCoordination::Separate, 1_000.0, 0.0)
    }

    fn run(
        elements: &[ContributionElement],
        timeline: &Timeline,
        rate: f64,
        params: &TaxParameters,
    ) -> AccumulationOutput {
        let returns = ReturnSeries::constant(rate, timeline.start_year, timeline.end_year);
        let calc = TaxCalculator::new(params);
        accumulate(elements, timeline, &returns, &calc, &mut ledger(), false)
    }

    #[test]
    fn one_time_payment_compounds_at_fixed_rate() {
        let elements = [element("lump", 10_000.0, ContributionSchedule::OneTime, 2025)];
        let output = run(
            &elements,
            &timeline(2025, 2034, Resolution::Yearly),
            0.05,
            &TaxParameters::tax_free(),
        );
        assert_eq!(output.totals.len(), 10);
        assert_approx(output.summary.endkapital, 10_000.0 * 1.05f64.powi(10));
        assert_approx(output.summary.einzahlungen, 10_000.0);
    }

    #[test]
    fn monthly_savings_plan_is_an_ordinary_annuity() {
        let elements = [element("plan", 500.0, ContributionSchedule::Monthly, 2025)];
        let output = run(
            &elements,
            &timeline(2025, 2044, Resolution::Monthly),
            0.02,
            &TaxParameters::tax_free(),
        );
        let i = monthly_from_annual(0.02);
        let annuity = 500.0 * ((1.0 + i).powi(240) - 1.0) / i;
        let end = output.summary.endkapital;
        assert!((end - annuity).abs() < 1.0, "expected {annuity}, got {end}");
        assert!((end - 147_264.0).abs() < 300.0, "unexpected end capital {end}");
        assert_approx(output.summary.einzahlungen, 120_000.0);
    }

    #[test]
    fn vorabpauschale_is_taxed_after_exemption_and_allowance() {
        let elements = [element("lump", 100_000.0, ContributionSchedule::OneTime, 2024)];
        let output = run(
            &elements,
            &timeline(2024, 2024, Resolution::Yearly),
            0.05,
            &TaxParameters::default(),
        );
        let row = output.totals[0];
        // 100_000 * 2.29 % * 0.7 = 1_603, 30 % exempt, 1_000 allowance.
        assert_approx(row.vorabpauschale, 1_603.0);
        assert_approx(row.genutzter_freibetrag, 1_000.0);
        assert_approx(row.bezahlte_steuer, (1_603.0 * 0.7 - 1_000.0) * 0.26375);
        let expected = row.startkapital + row.zinsen - row.bezahlte_steuer;
        assert_approx(row.endkapital, expected);
    }

    #[test]
    fn loss_year_has_no_vorabpauschale() {
        let elements = [element("lump", 50_000.0, ContributionSchedule::OneTime, 2024)];
        let output = run(
            &elements,
            &timeline(2024, 2024, Resolution::Yearly),
            -0.10,
            &TaxParameters::default(),
        );
        assert_approx(output.totals[0].vorabpauschale, 0.0);
        assert_approx(output.totals[0].bezahlte_steuer, 0.0);
    }

    #[test]
    fn elements_share_one_allowance_in_configuration_order() {
        let elements = [
            element("first", 60_000.0, ContributionSchedule::OneTime, 2024),
            element("second", 60_000.0, ContributionSchedule::OneTime, 2024),
        ];
        let output = run(
            &elements,
            &timeline(2024, 2024, Resolution::Yearly),
            0.05,
            &TaxParameters::default(),
        );
        let first = output.elements[0].years[0];
        let second = output.elements[1].years[0];
        // Each taxable: 60_000 * 0.0229 * 0.7 * 0.7 = 673.26
        assert_approx(first.genutzter_freibetrag, 673.26);
        assert_approx(second.genutzter_freibetrag, 1_000.0 - 673.26);
        assert!(second.bezahlte_steuer > first.bezahlte_steuer);
        assert_approx(output.totals[0].genutzter_freibetrag, 1_000.0);
    }

    #[test]
    fn ter_reduces_growth() {
        let mut lump = element("lump", 10_000.0, ContributionSchedule::OneTime, 2025);
        lump.ter = 0.01;
        let output = run(
            &[lump],
            &timeline(2025, 2025, Resolution::Yearly),
            0.05,
            &TaxParameters::tax_free(),
        );
        let row = output.totals[0];
        assert_approx(row.zinsen, 10_000.0 * 0.05 - 0.01 * 10_000.0 * 1.05);
        assert_approx(row.kosten, 105.0);
    }

    #[test]
    fn transaction_costs_reduce_the_invested_amount() {
        let mut plan = element("plan", 1_000.0, ContributionSchedule::Yearly, 2025);
        plan.transaction_cost_percent = 0.01;
        plan.transaction_cost_absolute = 5.0;
        let output = run(
            &[plan],
            &timeline(2025, 2026, Resolution::Yearly),
            0.0,
            &TaxParameters::tax_free(),
        );
        assert_approx(output.totals[0].einzahlung, 985.0);
        assert_approx(output.totals[0].kosten, 15.0);
        assert_approx(output.summary.endkapital, 1_970.0);
    }

    #[test]
    fn element_ending_early_stops_paying_but_keeps_growing() {
        let mut plan = element("plan", 100.0, ContributionSchedule::Monthly, 2025);
        plan.end = NaiveDate::from_ymd_opt(2025, 6, 30);
        let output = run(
            &[plan],
            &timeline(2025, 2026, Resolution::Yearly),
            0.10,
            &TaxParameters::tax_free(),
        );
        assert_approx(output.totals[0].einzahlung, 600.0);
        assert_approx(output.totals[1].einzahlung, 0.0);
        assert_approx(output.summary.endkapital, 600.0 * 1.1 * 1.1);
    }

    #[test]
    fn handoff_carries_cost_basis_and_taxed_vorabpauschale() {
        let elements = [element("lump", 100_000.0, ContributionSchedule::OneTime, 2024)];
        let output = run(
            &elements,
            &timeline(2024, 2025, Resolution::Yearly),
            0.05,
            &TaxParameters::default(),
        );
        let handoff = &output.handoff;
        assert_approx(handoff.holding.value, output.summary.endkapital);
        assert_approx(handoff.holding.cost_basis, 100_000.0);
        let taxed: f64 = output.totals.iter().map(|row| row.vorabpauschale).sum();
        assert_approx(handoff.holding.taxed_vorabpauschale, taxed);
        assert_approx(handoff.exemption_quota, 0.30);
        assert_eq!(handoff.owner_shares, vec![(Owner::Primary, 1.0)]);
    }

    #[test]
    fn realizing_rebalancing_gains_adds_tax() {
        let elements = [element("lump", 200_000.0, ContributionSchedule::OneTime, 2024)];
        let tl = timeline(2024, 2026, Resolution::Yearly);
        let params = TaxParameters::default();
        let calc = TaxCalculator::new(&params);
        let mut returns = ReturnSeries::constant(0.08, 2024, 2026);
        returns.turnover.insert(2025, 0.2);
        returns.turnover.insert(2026, 0.2);

        let plain = accumulate(&elements, &tl, &returns, &calc, &mut ledger(), false);
        let realized = accumulate(&elements, &tl, &returns, &calc, &mut ledger(), true);
        assert!(realized.summary.bezahlte_steuer > plain.summary.bezahlte_steuer);
        let (plain, realized) = (plain.handoff.holding, realized.handoff.holding);
        assert!(realized.cost_basis > plain.cost_basis);
    }

    proptest! {
        #[test]
        fn prop_summary_reconciles_with_rows(
            amount in 0u32..2_000,
            rate_bp in -2_000i32..3_000,
            years in 1i32..25,
            monthly in proptest::bool::ANY
        ) {
            let elements = [element("plan", amount as f64, ContributionSchedule::Monthly, 2020)];
            let resolution = if monthly {
                Resolution::Monthly
            } else {
                Resolution::Yearly
            };
            let output = run(
                &elements,
                &timeline(2020, 2020 + years - 1, resolution),
                rate_bp as f64 / 10_000.0,
                &TaxParameters::default(),
            );
            let flow: f64 = output
                .totals
                .iter()
                .map(|row| row.zinsen - row.bezahlte_steuer)
                .sum();
            let summary = output.summary;
            let growth = summary.endkapital - summary.startkapital;
            prop_assert!((growth - flow).abs() < 1e-6);
            for row in &output.totals {
                prop_assert!(row.bezahlte_steuer >= 0.0);
                let expected = row.startkapital + row.zinsen - row.bezahlte_steuer;
                prop_assert!((row.endkapital - expected).abs() < 1e-6);
            }
        }
    }
}
