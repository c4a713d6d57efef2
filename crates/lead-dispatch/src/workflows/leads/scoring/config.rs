use serde::{Deserialize, Serialize};

/// Weights of the suitability rubric and the top-K cut applied by the ranker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScoringConfig {
    pub max_assignments: usize,
    pub category_weight: u8,
    pub proximity_weight: u8,
    pub performance_weight: u8,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            max_assignments: 3,
            category_weight: 40,
            proximity_weight: 35,
            performance_weight: 25,
        }
    }
}
