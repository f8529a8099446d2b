use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoricalIndex {
    pub id: String,
    pub name: String,
    pub returns: BTreeMap<i32, f64>,
}

impl HistoricalIndex {
    fn from_table(id: &str, name: &str, first_year: i32, returns: &[f64]) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            returns: returns
                .iter()
                .enumerate()
                .map(|(offset, rate)| (first_year + offset as i32, *rate))
                .collect(),
        }
    }

    pub fn first_year(&self) -> Option<i32> {
        self.returns.keys().next().copied()
    }

    pub fn last_year(&self) -> Option<i32> {
        self.returns.keys().next_back().copied()
    }

    pub fn average_return(&self) -> f64 {
        if self.returns.is_empty() {
            return 0.0;
        }
        self.returns.values().sum::<f64>() / self.returns.len() as f64
    }

    /// Recorded return, or the long-run average with `true` when the year
    /// had to be backfilled.
    pub fn rate_for(&self, year: i32) -> (f64, bool) {
        match self.returns.get(&year) {
            Some(rate) => (*rate, false),
            None => (self.average_return(), true),
        }
    }
}

const MSCI_WORLD: [f64; 24] = [
    -0.132, -0.168, -0.199, 0.331, 0.147, 0.095, 0.201, 0.090, -0.407, 0.300, 0.118, -0.055,
    0.158, 0.267, 0.049, -0.009, 0.075, 0.224, -0.087, 0.277, 0.159, 0.218, -0.181, 0.238,
];

const SP500: [f64; 24] = [
    -0.091, -0.119, -0.221, 0.287, 0.109, 0.049, 0.158, 0.055, -0.370, 0.265, 0.151, 0.021,
    0.160, 0.324, 0.137, 0.014, 0.120, 0.218, -0.044, 0.315, 0.184, 0.287, -0.181, 0.263,
];

const DAX: [f64; 24] = [
    -0.075, -0.198, -0.439, 0.371, 0.073, 0.271, 0.220, 0.223, -0.404, 0.238, 0.161, -0.147,
    0.291, 0.255, 0.027, 0.096, 0.069, 0.125, -0.183, 0.255, 0.035, 0.158, -0.123, 0.203,
];

#[derive(Debug, Clone, Default)]
pub struct IndexRegistry {
    indices: BTreeMap<String, HistoricalIndex>,
}

impl IndexRegistry {
    pub fn builtin() -> Self {
        let mut registry = Self::default();
        for index in [
            HistoricalIndex::from_table("msci-world", "MSCI World", 2000, &MSCI_WORLD),
            HistoricalIndex::from_table("sp500", "S&P 500", 2000, &SP500),
            HistoricalIndex::from_table("dax", "DAX", 2000, &DAX),
        ] {
            registry.register(index);
        }
        registry
    }

    pub fn with_custom(custom: &[HistoricalIndex]) -> Self {
        let mut registry = Self::builtin();
        for index in custom {
            registry.register(index.clone());
        }
        registry
    }

    pub fn register(&mut self, index: HistoricalIndex) {
        self.indices.insert(index.id.clone(), index);
    }

    pub fn get(&self, id: &str) -> Option<&HistoricalIndex> {
        self.indices.get(id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &HistoricalIndex> {
        self.indices.values()
    }
}
