mod config;
mod rules;

pub use config::ScoringConfig;
pub(crate) use rules::{serves_category, NEUTRAL_COMPANY_SCORE};

use super::domain::{Company, CompanyId, Lead};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Stateless evaluator applying the suitability rubric to (lead, company) pairs.
#[derive(Debug, Clone)]
pub struct ScoringEngine {
    config: ScoringConfig,
}

impl ScoringEngine {
    pub fn new(config: ScoringConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ScoringConfig {
        &self.config
    }

    /// Suitability on 0..=100. Hard-filtered companies score 0.
    pub fn score(&self, lead: &Lead, company: &Company) -> u8 {
        self.score_card(lead, company).score
    }

    pub fn score_card(&self, lead: &Lead, company: &Company) -> ScoreCard {
        match rules::score_company(lead, company, &self.config) {
            Ok(components) => {
                let total: u16 = components
                    .iter()
                    .map(|component| u16::from(component.points))
                    .sum();
                ScoreCard {
                    company_id: company.id.clone(),
                    score: total.min(100) as u8,
                    components,
                    exclusion: None,
                }
            }
            Err(exclusion) => ScoreCard {
                company_id: company.id.clone(),
                score: 0,
                components: Vec::new(),
                exclusion: Some(exclusion),
            },
        }
    }

    /// Scores every candidate and drops the hard-filtered ones.
    pub fn score_candidates(&self, lead: &Lead, companies: Vec<Company>) -> Vec<ScoredCandidate> {
        companies
            .into_iter()
            .filter_map(|company| {
                let card = self.score_card(lead, &company);
                match card.exclusion {
                    Some(reason) => {
                        debug!(
                            lead_id = %lead.id,
                            company_id = %company.id,
                            reason = reason.label(),
                            "candidate excluded"
                        );
                        None
                    }
                    None => Some(ScoredCandidate {
                        company,
                        score: card.score,
                    }),
                }
            })
            .collect()
    }
}

/// Candidate company paired with its suitability score.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredCandidate {
    pub company: Company,
    pub score: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScoreFactor {
    Category,
    Proximity,
    Performance,
}

/// Discrete contribution to a score, kept for audits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScoreComponent {
    pub factor: ScoreFactor,
    pub points: u8,
    pub notes: String,
}

/// Why a company never reaches the ranker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Exclusion {
    Inactive,
    OtherTenant,
    CategoryNotServed,
    OutsideServiceArea,
}

impl Exclusion {
    pub const fn label(self) -> &'static str {
        match self {
            Exclusion::Inactive => "inactive",
            Exclusion::OtherTenant => "other_tenant",
            Exclusion::CategoryNotServed => "category_not_served",
            Exclusion::OutsideServiceArea => "outside_service_area",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScoreCard {
    pub company_id: CompanyId,
    pub score: u8,
    pub components: Vec<ScoreComponent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exclusion: Option<Exclusion>,
}
