use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::household::AllowanceCoordination;
use super::types::{FundType, Owner};

/// Share of the Basiszins-derived yield that counts as Basisertrag.
pub const BASISERTRAG_FACTOR: f64 = 0.7;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PartialExemption {
    pub equity: f64,
    pub mixed: f64,
    pub real_estate: f64,
    pub foreign_real_estate: f64,
    pub other: f64,
}

impl Default for PartialExemption {
    fn default() -> Self {
        Self {
            equity: 0.30,
            mixed: 0.15,
            real_estate: 0.60,
            foreign_real_estate: 0.80,
            other: 0.0,
        }
    }
}

impl PartialExemption {
    pub fn quota(&self, fund_type: FundType) -> f64 {
        match fund_type {
            FundType::Equity => self.equity,
            FundType::Mixed => self.mixed,
            FundType::RealEstate => self.real_estate,
            FundType::ForeignRealEstate => self.foreign_real_estate,
            FundType::Other => self.other,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TaxParameters {
    pub capital_gains_rate: f64,
    pub solidarity_surcharge: f64,
    pub church_tax: f64,
    pub sparerpauschbetrag: f64,
    pub partial_exemption: PartialExemption,
    pub basiszins: BTreeMap<i32, f64>,
    pub default_basiszins: f64,
    pub grundfreibetrag: f64,
    pub income_tax_rate: f64,
}

impl Default for TaxParameters {
    fn default() -> Self {
        Self {
            capital_gains_rate: 0.25,
            solidarity_surcharge: 0.055,
            church_tax: 0.0,
            sparerpauschbetrag: 1_000.0,
            partial_exemption: PartialExemption::default(),
            basiszins: BTreeMap::from([
                (2018, 0.0087),
                (2019, 0.0052),
                (2020, 0.0007),
                (2021, -0.0045),
                (2022, -0.0005),
                (2023, 0.0255),
                (2024, 0.0229),
                (2025, 0.0253),
            ]),
            default_basiszins: 0.0253,
            grundfreibetrag: 11_604.0,
            income_tax_rate: 0.14,
        }
    }
}

impl TaxParameters {
    pub fn effective_rate(&self) -> f64 {
        self.capital_gains_rate * (1.0 + self.solidarity_surcharge + self.church_tax)
    }

    pub fn basiszins_for(&self, year: i32) -> f64 {
        self.basiszins
            .get(&year)
            .copied()
            .unwrap_or(self.default_basiszins)
    }

    #[cfg(test)]
    pub fn tax_free() -> Self {
        Self {
            capital_gains_rate: 0.0,
            solidarity_surcharge: 0.0,
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct AllowanceLedger {
    pub sparerpauschbetrag_cap: f64,
    pub sparerpauschbetrag_used: f64,
    pub grundfreibetrag_cap: f64,
    pub grundfreibetrag_used: f64,
}

impl AllowanceLedger {
    pub fn new(sparerpauschbetrag_cap: f64, grundfreibetrag_cap: f64) -> Self {
        Self {
            sparerpauschbetrag_cap: sparerpauschbetrag_cap.max(0.0),
            sparerpauschbetrag_used: 0.0,
            grundfreibetrag_cap: grundfreibetrag_cap.max(0.0),
            grundfreibetrag_used: 0.0,
        }
    }

    pub fn sparerpauschbetrag_remaining(&self) -> f64 {
        (self.sparerpauschbetrag_cap - self.sparerpauschbetrag_used).max(0.0)
    }

    pub fn grundfreibetrag_remaining(&self) -> f64 {
        (self.grundfreibetrag_cap - self.grundfreibetrag_used).max(0.0)
    }

    fn reset(&mut self) {
        self.sparerpauschbetrag_used = 0.0;
        self.grundfreibetrag_used = 0.0;
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum Pool {
    Sparerpauschbetrag,
    Grundfreibetrag,
}

#[derive(Debug, Clone, PartialEq)]
pub struct HouseholdLedger {
    year: Option<i32>,
    persons: Vec<AllowanceLedger>,
    coordination: AllowanceCoordination,
}

impl HouseholdLedger {
    pub fn new(
        person_count: usize,
        coordination: AllowanceCoordination,
        sparerpauschbetrag: f64,
        grundfreibetrag: f64,
    ) -> Self {
        Self {
            year: None,
            persons: vec![
                AllowanceLedger::new(sparerpauschbetrag, grundfreibetrag);
                person_count.max(1)
            ],
            coordination,
        }
    }

    pub fn begin_year(&mut self, year: i32) {
        if self.year != Some(year) {
            self.year = Some(year);
            self.persons.iter_mut().for_each(AllowanceLedger::reset);
        }
    }

    pub fn person(&self, owner: Owner) -> &AllowanceLedger {
        &self.persons[self.slot(owner)]
    }

    pub fn sparerpauschbetrag_remaining(&self) -> f64 {
        self.persons
            .iter()
            .map(AllowanceLedger::sparerpauschbetrag_remaining)
            .sum()
    }

    pub fn consume_sparerpauschbetrag(&mut self, parts: &[(Owner, f64)]) -> f64 {
        self.consume(Pool::Sparerpauschbetrag, parts)
    }

    pub fn consume_grundfreibetrag(&mut self, parts: &[(Owner, f64)]) -> f64 {
        self.consume(Pool::Grundfreibetrag, parts)
    }

    fn slot(&self, owner: Owner) -> usize {
        owner.index().min(self.persons.len() - 1)
    }

    fn consume(&mut self, pool: Pool, parts: &[(Owner, f64)]) -> f64 {
        let mut leftovers = Vec::with_capacity(parts.len());
        let mut covered = 0.0;

        for &(owner, amount) in parts {
            let slot = self.slot(owner);
            let used = take(&mut self.persons[slot], pool, amount.max(0.0));
            covered += used;
            leftovers.push(amount.max(0.0) - used);
        }

        // Zusammenveranlagung: unused allowance of one spouse covers the other.
        if self.coordination == AllowanceCoordination::Joint {
            for leftover in leftovers {
                let mut rest = leftover;
                for ledger in &mut self.persons {
                    if rest <= 0.0 {
                        break;
                    }
                    let used = take(ledger, pool, rest);
                    covered += used;
                    rest -= used;
                }
            }
        }

        covered
    }
}

fn take(ledger: &mut AllowanceLedger, pool: Pool, amount: f64) -> f64 {
    let (remaining, used) = match pool {
        Pool::Sparerpauschbetrag => (
            ledger.sparerpauschbetrag_remaining(),
            &mut ledger.sparerpauschbetrag_used,
        ),
        Pool::Grundfreibetrag => (
            ledger.grundfreibetrag_remaining(),
            &mut ledger.grundfreibetrag_used,
        ),
    };
    let taken = amount.min(remaining).max(0.0);
    *used += taken;
    taken
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Holding {
    pub value: f64,
    pub cost_basis: f64,
    pub taxed_vorabpauschale: f64,
}

impl Holding {
    pub fn merge(&mut self, other: &Holding) {
        self.value += other.value;
        self.cost_basis += other.cost_basis;
        self.taxed_vorabpauschale += other.taxed_vorabpauschale;
    }

    pub fn sale_gain(&self, amount: f64) -> f64 {
        if self.value <= 0.0 || amount <= 0.0 {
            return 0.0;
        }
        let fraction = (amount / self.value).min(1.0);
        ((self.value - self.cost_basis - self.taxed_vorabpauschale) * fraction).max(0.0)
    }

    pub fn sell(&mut self, amount: f64) {
        if self.value <= 0.0 {
            return;
        }
        let fraction = (amount / self.value).clamp(0.0, 1.0);
        self.value -= self.value * fraction;
        self.cost_basis *= 1.0 - fraction;
        self.taxed_vorabpauschale *= 1.0 - fraction;
    }

    pub fn restate(&mut self, amount: f64) {
        if self.value <= 0.0 {
            return;
        }
        let fraction = (amount / self.value).clamp(0.0, 1.0);
        self.cost_basis = self.cost_basis * (1.0 - fraction) + self.value * fraction;
        self.taxed_vorabpauschale *= 1.0 - fraction;
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct TaxOutcome {
    pub vorabpauschale: f64,
    pub taxable: f64,
    pub genutzter_freibetrag: f64,
    pub genutzter_grundfreibetrag: f64,
    pub steuer: f64,
}

pub struct TaxCalculator<'a> {
    params: &'a TaxParameters,
}

impl<'a> TaxCalculator<'a> {
    pub fn new(params: &'a TaxParameters) -> Self {
        Self { params }
    }

    pub fn params(&self) -> &TaxParameters {
        self.params
    }

    pub fn vorabpauschale(&self, year: i32, base_value: f64, gain: f64) -> f64 {
        let basiszins = self.params.basiszins_for(year).max(0.0);
        let basisertrag = base_value.max(0.0) * basiszins * BASISERTRAG_FACTOR;
        basisertrag.min(gain).max(0.0)
    }

    pub fn settle(
        &self,
        ledger: &mut HouseholdLedger,
        shares: &[(Owner, f64)],
        exemption_quota: f64,
        vorabpauschale: f64,
        realized_gain: f64,
        use_grundfreibetrag: bool,
    ) -> TaxOutcome {
        let vorabpauschale = vorabpauschale.max(0.0);
        let gross = vorabpauschale + realized_gain.max(0.0);
        let taxable = gross * (1.0 - exemption_quota.clamp(0.0, 1.0));

        let parts = split(shares, taxable);
        let genutzter_freibetrag = ledger.consume_sparerpauschbetrag(&parts);
        let mut remaining = (taxable - genutzter_freibetrag).max(0.0);

        let mut genutzter_grundfreibetrag = 0.0;
        if use_grundfreibetrag && remaining > 0.0 {
            genutzter_grundfreibetrag = ledger.consume_grundfreibetrag(&split(shares, remaining));
            remaining = (remaining - genutzter_grundfreibetrag).max(0.0);
        }

        TaxOutcome {
            vorabpauschale,
            taxable,
            genutzter_freibetrag,
            genutzter_grundfreibetrag,
            steuer: (remaining * self.params.effective_rate()).max(0.0),
        }
    }

    pub fn preview(
        &self,
        ledger: &HouseholdLedger,
        shares: &[(Owner, f64)],
        exemption_quota: f64,
        vorabpauschale: f64,
        realized_gain: f64,
        use_grundfreibetrag: bool,
    ) -> TaxOutcome {
        let mut scratch = ledger.clone();
        self.settle(
            &mut scratch,
            shares,
            exemption_quota,
            vorabpauschale,
            realized_gain,
            use_grundfreibetrag,
        )
    }

    /// Income tax on ordinary income (statutory pension) of one person. The
    /// Grundfreibetrag is consumed first so it is no longer available for
    /// capital income of the same year.
    pub fn income_tax(
        &self,
        ledger: &mut HouseholdLedger,
        owner: Owner,
        taxable_income: f64,
        use_grundfreibetrag: bool,
    ) -> f64 {
        let taxable_income = taxable_income.max(0.0);
        let covered = if use_grundfreibetrag {
            ledger.consume_grundfreibetrag(&[(owner, taxable_income)])
        } else {
            0.0
        };
        ((taxable_income - covered) * self.params.income_tax_rate).max(0.0)
    }
}

fn split(shares: &[(Owner, f64)], amount: f64) -> Vec<(Owner, f64)> {
    if shares.is_empty() {
        return vec![(Owner::Primary, amount)];
    }
    shares
        .iter()
        .map(|&(owner, share)| (owner, amount * share))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::{prop_assert, proptest};

    const EPS: f64 = 1e-9;

    fn assert_approx(actual: f64, expected: f64) {
        assert!(
            (actual - expected).abs() <= 1e-6,
            "expected {expected}, got {actual}"
        );
    }

    fn single_ledger(params: &TaxParameters) -> HouseholdLedger {
        let mut ledger = HouseholdLedger::new(
            1,
            AllowanceCoordination::Joint,
            params.sparerpauschbetrag,
            params.grundfreibetrag,
        );
        ledger.begin_year(2024);
        ledger
    }

    #[test]
    fn default_effective_rate_includes_solidarity_surcharge() {
        assert_approx(TaxParameters::default().effective_rate(), 0.26375);
    }

    #[test]
    fn vorabpauschale_is_capped_by_actual_gain() {
        let params = TaxParameters::default();
        let calc = TaxCalculator::new(&params);
        // Basisertrag 100_000 * 2.29% * 0.7 = 1_603
        assert_approx(calc.vorabpauschale(2024, 100_000.0, 5_000.0), 1_603.0);
        assert_approx(calc.vorabpauschale(2024, 100_000.0, 800.0), 800.0);
    }

    #[test]
    fn vorabpauschale_is_zero_for_losses_and_negative_basiszins() {
        let params = TaxParameters::default();
        let calc = TaxCalculator::new(&params);
        assert_approx(calc.vorabpauschale(2024, 100_000.0, -12_000.0), 0.0);
        assert_approx(calc.vorabpauschale(2021, 100_000.0, 12_000.0), 0.0);
    }

    #[test]
    fn settle_applies_partial_exemption_then_allowance_then_rate() {
        let params = TaxParameters::default();
        let calc = TaxCalculator::new(&params);
        let mut ledger = single_ledger(&params);

        // 3_000 gain, 30% exempt -> 2_100 taxable, 1_000 allowance -> 1_100 taxed.
        let outcome = calc.settle(
            &mut ledger,
            &[(Owner::Primary, 1.0)],
            0.30,
            3_000.0,
            0.0,
            false,
        );
        assert_approx(outcome.taxable, 2_100.0);
        assert_approx(outcome.genutzter_freibetrag, 1_000.0);
        assert_approx(outcome.steuer, 1_100.0 * 0.26375);
        assert_approx(ledger.sparerpauschbetrag_remaining(), 0.0);
    }

    #[test]
    fn allowance_is_shared_within_a_year_and_reset_for_the_next() {
        let params = TaxParameters::default();
        let calc = TaxCalculator::new(&params);
        let mut ledger = single_ledger(&params);

        let primary = [(Owner::Primary, 1.0)];
        let first = calc.settle(&mut ledger, &primary, 0.0, 600.0, 0.0, false);
        let second = calc.settle(&mut ledger, &primary, 0.0, 600.0, 0.0, false);
        assert_approx(first.genutzter_freibetrag, 600.0);
        assert_approx(second.genutzter_freibetrag, 400.0);
        assert_approx(second.steuer, 200.0 * 0.26375);

        ledger.begin_year(2025);
        assert_approx(ledger.sparerpauschbetrag_remaining(), 1_000.0);
    }

    #[test]
    fn joint_coordination_lets_spouse_allowance_cover_primary_income() {
        let params = TaxParameters::default();
        let calc = TaxCalculator::new(&params);

        let mut joint = HouseholdLedger::new(2, AllowanceCoordination::Joint, 1_000.0, 0.0);
        joint.begin_year(2030);
        let mut separate = HouseholdLedger::new(2, AllowanceCoordination::Separate, 1_000.0, 0.0);
        separate.begin_year(2030);

        let primary = [(Owner::Primary, 1.0)];
        let joint_outcome = calc.settle(&mut joint, &primary, 0.0, 2_500.0, 0.0, false);
        let separate_outcome = calc.settle(&mut separate, &primary, 0.0, 2_500.0, 0.0, false);

        assert_approx(joint_outcome.genutzter_freibetrag, 2_000.0);
        assert_approx(separate_outcome.genutzter_freibetrag, 1_000.0);
        assert!(separate_outcome.steuer > joint_outcome.steuer);
        assert_approx(separate.person(Owner::Spouse).sparerpauschbetrag_used, 0.0);
    }

    #[test]
    fn grundfreibetrag_is_a_separate_pool_after_pension_income() {
        let params = TaxParameters::default();
        let calc = TaxCalculator::new(&params);
        let mut ledger = single_ledger(&params);

        let income_tax = calc.income_tax(&mut ledger, Owner::Primary, 10_000.0, true);
        assert_approx(income_tax, 0.0);
        let primary = ledger.person(Owner::Primary);
        assert_approx(primary.grundfreibetrag_remaining(), 1_604.0);

        let shares = [(Owner::Primary, 1.0)];
        let outcome = calc.settle(&mut ledger, &shares, 0.0, 0.0, 4_000.0, true);
        assert_approx(outcome.genutzter_freibetrag, 1_000.0);
        assert_approx(outcome.genutzter_grundfreibetrag, 1_604.0);
        assert_approx(outcome.steuer, (4_000.0 - 1_000.0 - 1_604.0) * 0.26375);
    }

    #[test]
    fn preview_leaves_ledger_untouched() {
        let params = TaxParameters::default();
        let calc = TaxCalculator::new(&params);
        let ledger = single_ledger(&params);
        let outcome = calc.preview(&ledger, &[(Owner::Primary, 1.0)], 0.0, 500.0, 0.0, false);
        assert_approx(outcome.genutzter_freibetrag, 500.0);
        assert_approx(ledger.sparerpauschbetrag_remaining(), 1_000.0);
    }

    #[test]
    fn sale_gain_subtracts_taxed_vorabpauschale_share() {
        let holding = Holding {
            value: 200.0,
            cost_basis: 100.0,
            taxed_vorabpauschale: 20.0,
        };
        // Selling half realises half of (200 - 100 - 20).
        assert_approx(holding.sale_gain(100.0), 40.0);

        let mut sold = holding;
        sold.sell(100.0);
        assert_approx(sold.value, 100.0);
        assert_approx(sold.cost_basis, 50.0);
        assert_approx(sold.taxed_vorabpauschale, 10.0);
    }

    #[test]
    fn restate_steps_up_the_sold_lots() {
        let mut holding = Holding {
            value: 200.0,
            cost_basis: 100.0,
            taxed_vorabpauschale: 0.0,
        };
        holding.restate(100.0);
        assert_approx(holding.value, 200.0);
        assert_approx(holding.cost_basis, 150.0);
    }

    proptest! {
        #[test]
        fn prop_tax_is_non_negative_and_allowance_bounded(
            vorab in 0u32..50_000,
            gain in 0u32..200_000,
            quota_pct in 0u32..101,
            calls in 1usize..5
        ) {
            let params = TaxParameters::default();
            let calc = TaxCalculator::new(&params);
            let mut ledger = single_ledger(&params);
            for _ in 0..calls {
                let outcome = calc.settle(
                    &mut ledger,
                    &[(Owner::Primary, 1.0)],
                    quota_pct as f64 / 100.0,
                    vorab as f64,
                    gain as f64,
                    true,
                );
                prop_assert!(outcome.steuer >= 0.0);
                prop_assert!(outcome.genutzter_freibetrag <= outcome.taxable + EPS);
            }
            let person = ledger.person(Owner::Primary);
            prop_assert!(person.sparerpauschbetrag_used <= params.sparerpauschbetrag + EPS);
            prop_assert!(person.grundfreibetrag_used <= params.grundfreibetrag + EPS);
        }
    }
}
