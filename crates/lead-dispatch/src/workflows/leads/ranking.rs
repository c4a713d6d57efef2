use std::cmp::Ordering;
use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::domain::{CompanyId, Lead};
use super::scoring::{ScoredCandidate, NEUTRAL_COMPANY_SCORE};

/// Candidate that survived ranking, carrying its dense 1-based rank.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RankedCandidate {
    pub company_id: CompanyId,
    pub score: u8,
    pub rank: u16,
}

/// Orders scored candidates and keeps the top `max_assignments`.
#[derive(Debug, Clone, Copy)]
pub struct AssignmentRanker {
    max_assignments: usize,
}

impl AssignmentRanker {
    pub fn new(max_assignments: usize) -> Self {
        Self {
            max_assignments: max_assignments.clamp(1, usize::from(u16::MAX)),
        }
    }

    pub fn max_assignments(&self) -> usize {
        self.max_assignments
    }

    /// Sorts by score desc, then company score desc, then company id asc, so equal scores still
    /// produce one reproducible order. Zero-score candidates never receive a rank.
    pub fn rank(&self, lead: &Lead, candidates: Vec<ScoredCandidate>) -> Vec<RankedCandidate> {
        let mut eligible: Vec<ScoredCandidate> = candidates
            .into_iter()
            .filter(|candidate| candidate.score > 0 && candidate.company.tenant_id == lead.tenant_id)
            .collect();

        eligible.sort_by(compare_candidates);
        let mut seen = HashSet::new();
        eligible.retain(|candidate| seen.insert(candidate.company.id.clone()));
        eligible.truncate(self.max_assignments);

        let ranked: Vec<RankedCandidate> = eligible
            .into_iter()
            .enumerate()
            .map(|(index, candidate)| RankedCandidate {
                company_id: candidate.company.id,
                score: candidate.score,
                rank: u16::try_from(index + 1).unwrap_or(u16::MAX),
            })
            .collect();

        debug!(lead_id = %lead.id, ranked = ranked.len(), "ranked candidates");
        ranked
    }
}

fn compare_candidates(left: &ScoredCandidate, right: &ScoredCandidate) -> Ordering {
    let performance = |candidate: &ScoredCandidate| {
        candidate
            .company
            .company_score
            .unwrap_or(NEUTRAL_COMPANY_SCORE)
    };

    right
        .score
        .cmp(&left.score)
        .then_with(|| performance(right).cmp(&performance(left)))
        .then_with(|| left.company.id.cmp(&right.company.id))
}
