use std::collections::HashMap;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Weight applied to any agent missing from the table.
pub const DEFAULT_UNKNOWN_WEIGHT: f64 = 0.1;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum WeightParseError {
    #[error("Malformed weight entry '{0}', expected name:weight")]
    Malformed(String),

    #[error("Invalid weight for '{name}': {value}")]
    InvalidWeight { name: String, value: String },
}

/// Static agent weight table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentWeights {
    weights: HashMap<String, f64>,
    default_weight: f64,
}

impl Default for AgentWeights {
    fn default() -> Self {
        Self {
            weights: HashMap::new(),
            default_weight: DEFAULT_UNKNOWN_WEIGHT,
        }
    }
}

impl AgentWeights {
    pub fn new(default_weight: f64) -> Self {
        Self {
            weights: HashMap::new(),
            default_weight: sanitize(default_weight),
        }
    }

    pub fn with_default_weight(mut self, default_weight: f64) -> Self {
        self.default_weight = sanitize(default_weight);
        self
    }

    pub fn with_weight(mut self, agent: impl Into<String>, weight: f64) -> Self {
        self.set(agent, weight);
        self
    }

    /// Negative or non-finite weights are stored as 0.
    pub fn set(&mut self, agent: impl Into<String>, weight: f64) {
        self.weights.insert(agent.into(), sanitize(weight));
    }

    pub fn weight_for(&self, agent: &str) -> f64 {
        self.weights
            .get(agent)
            .copied()
            .unwrap_or(self.default_weight)
    }

    pub fn default_weight(&self) -> f64 {
        self.default_weight
    }

    pub fn len(&self) -> usize {
        self.weights.len()
    }

    pub fn is_empty(&self) -> bool {
        self.weights.is_empty()
    }
}

/// Parses `"technical:0.35,sentiment:0.25"`. Blank input gives an empty table.
impl FromStr for AgentWeights {
    type Err = WeightParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut table = AgentWeights::default();
        for entry in s.split(',').map(str::trim).filter(|e| !e.is_empty()) {
            let (name, value) = entry
                .split_once(':')
                .ok_or_else(|| WeightParseError::Malformed(entry.to_string()))?;
            let name = name.trim();
            if name.is_empty() {
                return Err(WeightParseError::Malformed(entry.to_string()));
            }
            let weight: f64 = value
                .trim()
                .parse()
                .map_err(|_| WeightParseError::InvalidWeight {
                    name: name.to_string(),
                    value: value.trim().to_string(),
                })?;
            table.set(name, weight);
        }
        Ok(table)
    }
}

fn sanitize(weight: f64) -> f64 {
    if weight.is_finite() {
        weight.max(0.0)
    } else {
        0.0
    }
}
