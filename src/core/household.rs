use serde::{Deserialize, Serialize};

use super::types::Owner;

#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Gender {
    Male,
    Female,
}

#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum AllowanceCoordination {
    #[default]
    Joint,
    Separate,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatutoryPension {
    pub start_year: i32,
    pub annual_amount: f64,
    #[serde(default)]
    pub annual_increase: f64,
    #[serde(default = "default_taxable_share")]
    pub taxable_share: f64,
}

fn default_taxable_share() -> f64 {
    0.83
}

impl StatutoryPension {
    pub fn gross_for(&self, year: i32) -> f64 {
        if year < self.start_year {
            return 0.0;
        }
        (self.annual_amount * (1.0 + self.annual_increase).powi(year - self.start_year)).max(0.0)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Person {
    #[serde(default)]
    pub name: Option<String>,
    pub birth_year: i32,
    pub gender: Gender,
    #[serde(default)]
    pub statutory_pension: Option<StatutoryPension>,
}

impl Person {
    pub fn age_in(&self, year: i32) -> u32 {
        (year - self.birth_year).max(0) as u32
    }

    pub fn remaining_life_expectancy(&self, year: i32) -> f64 {
        life_expectancy(self.gender, self.age_in(year) as f64)
    }

    pub fn expected_end_year(&self, year: i32) -> i32 {
        year + self.remaining_life_expectancy(year).round() as i32
    }

    pub fn pension_gross(&self, year: i32) -> f64 {
        self.statutory_pension
            .as_ref()
            .map_or(0.0, |pension| pension.gross_for(year))
    }

    pub fn pension_taxable(&self, year: i32) -> f64 {
        self.statutory_pension
            .as_ref()
            .map_or(0.0, |pension| {
                pension.gross_for(year) * pension.taxable_share
            })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum Household {
    Single {
        person: Person,
    },
    Couple {
        primary: Person,
        spouse: Person,
        #[serde(default)]
        allowance_coordination: AllowanceCoordination,
    },
}

impl Household {
    pub fn person_count(&self) -> usize {
        match self {
            Household::Single { .. } => 1,
            Household::Couple { .. } => 2,
        }
    }

    pub fn person(&self, owner: Owner) -> Option<&Person> {
        match (self, owner) {
            (Household::Single { person }, Owner::Primary) => Some(person),
            (Household::Single { .. }, Owner::Spouse) => None,
            (Household::Couple { primary, .. }, Owner::Primary) => Some(primary),
            (Household::Couple { spouse, .. }, Owner::Spouse) => Some(spouse),
        }
    }

    pub fn members(&self) -> Vec<(Owner, &Person)> {
        match self {
            Household::Single { person } => vec![(Owner::Primary, person)],
            Household::Couple {
                primary, spouse, ..
            } => vec![(Owner::Primary, primary), (Owner::Spouse, spouse)],
        }
    }

    pub fn coordination(&self) -> AllowanceCoordination {
        match self {
            // A single person has nothing to pool.
            Household::Single { .. } => AllowanceCoordination::Separate,
            Household::Couple {
                allowance_coordination,
                ..
            } => *allowance_coordination,
        }
    }

    pub fn expected_end_year(&self, year: i32) -> i32 {
        self.members()
            .into_iter()
            .map(|(_, person)| person.expected_end_year(year))
            .max()
            .unwrap_or(year)
    }
}

/// Remaining life expectancy (years) at 5-year ages, German period life
/// table 2020/22, rounded.
const LIFE_TABLE_MALE: [(f64, f64); 15] = [
    (0.0, 78.3),
    (20.0, 58.8),
    (30.0, 49.1),
    (40.0, 39.4),
    (50.0, 30.0),
    (55.0, 25.6),
    (60.0, 21.3),
    (65.0, 17.6),
    (70.0, 14.2),
    (75.0, 11.0),
    (80.0, 8.2),
    (85.0, 5.8),
    (90.0, 4.0),
    (95.0, 2.8),
    (100.0, 2.0),
];

const LIFE_TABLE_FEMALE: [(f64, f64); 15] = [
    (0.0, 83.2),
    (20.0, 63.5),
    (30.0, 53.7),
    (40.0, 43.9),
    (50.0, 34.3),
    (55.0, 29.6),
    (60.0, 25.1),
    (65.0, 20.9),
    (70.0, 16.9),
    (75.0, 13.2),
    (80.0, 9.8),
    (85.0, 6.9),
    (90.0, 4.6),
    (95.0, 3.1),
    (100.0, 2.2),
];

pub fn life_expectancy(gender: Gender, age: f64) -> f64 {
    let table: &[(f64, f64)] = match gender {
        Gender::Male => &LIFE_TABLE_MALE,
        Gender::Female => &LIFE_TABLE_FEMALE,
    };

    let age = age.max(0.0);
    for window in table.windows(2) {
        let (lo_age, lo_years) = window[0];
        let (hi_age, hi_years) = window[1];
        if age <= hi_age {
            let w = (age - lo_age) / (hi_age - lo_age);
            return lo_years * (1.0 - w) + hi_years * w;
        }
    }

    // Beyond the table: shrink slowly, never below one year.
    let (last_age, last_years) = table[table.len() - 1];
    (last_years - (age - last_age) * 0.1).max(1.0)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthInsurance {
    pub contribution_rate: f64,
    #[serde(default = "default_family_limit")]
    pub family_insurance_income_limit: f64,
    #[serde(default = "default_contribution_ceiling")]
    pub contribution_ceiling: f64,
}

fn default_family_limit() -> f64 {
    6_420.0
}

fn default_contribution_ceiling() -> f64 {
    62_100.0
}

impl HealthInsurance {
    pub fn contributions(&self, incomes: &[f64]) -> f64 {
        let charge = |income: f64| {
            income.max(0.0).min(self.contribution_ceiling) * self.contribution_rate
        };

        match incomes {
            [] => 0.0,
            [single] => charge(*single),
            [first, second, ..] => {
                let (higher, lower) = if first >= second {
                    (*first, *second)
                } else {
                    (*second, *first)
                };
                let lower_charge = if lower <= self.family_insurance_income_limit {
                    0.0
                } else {
                    charge(lower)
                };
                charge(higher) + lower_charge
            }
        }
    }
}
