use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::config::DispatchConfig;

use super::dispatch::{DispatchNotifier, DispatchSummary};
use super::domain::{Actor, Assignment, Lead, LeadId, LeadStatus, NewLead};
use super::ledger::{CommunicationLog, NewCommunication};
use super::ranking::AssignmentRanker;
use super::repository::{
    AssignmentStore, CommunicationLedger, CompanyDirectory, ConsentLedger, DirectoryError,
    LeadRepository, NotificationTransport, RepositoryError,
};
use super::scoring::{ScoringConfig, ScoringEngine};

/// Compare-and-swap attempts before a status change gives up with a conflict.
const MAX_STATUS_ATTEMPTS: usize = 3;

/// Storage collaborators the controller needs.
#[derive(Clone)]
pub struct LeadStores {
    pub leads: Arc<dyn LeadRepository>,
    pub assignments: Arc<dyn AssignmentStore>,
    pub ledger: Arc<dyn CommunicationLedger>,
    pub directory: Arc<dyn CompanyDirectory>,
    pub consent: Arc<dyn ConsentLedger>,
}

/// Admin request body for `PUT /leads/{id}`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateLeadStatus {
    #[serde(default)]
    pub status: Option<LeadStatus>,
    #[serde(default)]
    pub notes: Option<String>,
}

/// A lead together with its assignment set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LeadAssignments {
    pub lead: Lead,
    pub assignments: Vec<Assignment>,
}

/// Everything recorded about a lead.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LeadDetail {
    pub lead: Lead,
    pub assignments: Vec<Assignment>,
    pub communications: Vec<CommunicationLog>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DispatchReport {
    pub lead_id: LeadId,
    pub status: LeadStatus,
    pub assignments: Vec<Assignment>,
    pub notifications_sent: usize,
    pub message: String,
    pub summary: DispatchSummary,
}

/// Owns the lead state machine and drives qualification and dispatch.
pub struct LeadLifecycleController {
    leads: Arc<dyn LeadRepository>,
    assignments: Arc<dyn AssignmentStore>,
    ledger: Arc<dyn CommunicationLedger>,
    directory: Arc<dyn CompanyDirectory>,
    engine: ScoringEngine,
    ranker: AssignmentRanker,
    notifier: DispatchNotifier,
}

impl LeadLifecycleController {
    pub fn new(
        stores: LeadStores,
        transport: Arc<dyn NotificationTransport>,
        scoring: ScoringConfig,
        dispatch: DispatchConfig,
    ) -> Self {
        let notifier = DispatchNotifier::new(
            Arc::clone(&stores.leads),
            Arc::clone(&stores.assignments),
            Arc::clone(&stores.ledger),
            Arc::clone(&stores.directory),
            stores.consent,
            transport,
            dispatch,
        );

        Self {
            leads: stores.leads,
            assignments: stores.assignments,
            ledger: stores.ledger,
            directory: stores.directory,
            engine: ScoringEngine::new(scoring),
            ranker: AssignmentRanker::new(scoring.max_assignments),
            notifier,
        }
    }

    pub fn notifier(&self) -> &DispatchNotifier {
        &self.notifier
    }

    pub fn intake(&self, submission: NewLead) -> Result<Lead, LeadServiceError> {
        let category_id = submission.category_id.trim().to_string();
        let postal_code = submission.postal_code.trim().to_string();
        if submission.tenant_id.0.trim().is_empty() {
            return Err(LeadServiceError::InvalidLead("tenant id is required".into()));
        }
        if category_id.is_empty() {
            return Err(LeadServiceError::InvalidLead("category id is required".into()));
        }
        if postal_code.is_empty() {
            return Err(LeadServiceError::InvalidLead("postal code is required".into()));
        }

        let stored = self.leads.create(NewLead {
            category_id,
            postal_code,
            ..submission
        })?;
        info!(lead_id = %stored.id, category = %stored.category_id, "lead received");
        Ok(stored)
    }

    /// Moves a `new` lead to `qualified` and persists its ranked assignment set.
    ///
    /// Leads already `assigned` or `dispatched` get their existing assignments back. A lead with
    /// no eligible company stays `qualified` so it can be triaged by hand and qualified again.
    pub fn qualify(&self, lead_id: &LeadId) -> Result<LeadAssignments, LeadServiceError> {
        for _ in 0..MAX_STATUS_ATTEMPTS {
            let lead = self.load(lead_id)?;
            match lead.status {
                LeadStatus::New => {
                    if let Some(qualified) =
                        self.swap(&lead, LeadStatus::Qualified, &Actor::System, None)?
                    {
                        return self.assign(qualified);
                    }
                }
                LeadStatus::Qualified => return self.assign(lead),
                LeadStatus::Assigned | LeadStatus::Dispatched => {
                    let assignments = self.assignments.for_lead(&lead.id)?;
                    return Ok(LeadAssignments { lead, assignments });
                }
                current => {
                    return Err(LeadServiceError::InvalidTransition {
                        lead_id: lead.id,
                        current,
                        requested: LeadStatus::Qualified,
                    })
                }
            }
        }
        Err(LeadServiceError::Conflict {
            lead_id: lead_id.clone(),
        })
    }

    /// Notifies the assigned companies. Individual delivery failures land in the summary; the
    /// lead still advances to `dispatched`.
    pub async fn dispatch(&self, lead_id: &LeadId) -> Result<DispatchReport, LeadServiceError> {
        let lead = self.load(lead_id)?;
        if !matches!(lead.status, LeadStatus::Assigned | LeadStatus::Dispatched) {
            return Err(LeadServiceError::InvalidTransition {
                lead_id: lead.id,
                current: lead.status,
                requested: LeadStatus::Dispatched,
            });
        }

        let summary = self.notifier.dispatch(&lead).await?;
        let lead = self.mark_dispatched(lead)?;
        self.report(lead, summary)
    }

    /// Requeues failed assignments of a dispatched lead and notifies them again.
    pub async fn retry_failed(&self, lead_id: &LeadId) -> Result<DispatchReport, LeadServiceError> {
        let lead = self.load(lead_id)?;
        if lead.status != LeadStatus::Dispatched {
            return Err(LeadServiceError::InvalidTransition {
                lead_id: lead.id,
                current: lead.status,
                requested: LeadStatus::Dispatched,
            });
        }

        let requeued = self.notifier.requeue_failed(&lead)?;
        let summary = if requeued == 0 {
            DispatchSummary::default()
        } else {
            self.notifier.dispatch(&lead).await?
        };
        self.report(lead, summary)
    }

    /// Admin status change and/or notes update. Every accepted request writes a ledger row.
    pub fn update_status(
        &self,
        lead_id: &LeadId,
        update: UpdateLeadStatus,
        actor: &Actor,
    ) -> Result<Lead, LeadServiceError> {
        let notes = update
            .notes
            .map(|notes| notes.trim().to_string())
            .filter(|notes| !notes.is_empty());

        let lead = match update.status {
            Some(requested) => self.admin_transition(lead_id, requested, actor, notes.as_deref())?,
            None => {
                let Some(notes) = notes.as_deref() else {
                    return Err(LeadServiceError::InvalidLead(
                        "either status or notes must be provided".into(),
                    ));
                };
                let lead = self.load(lead_id)?;
                self.ledger.append(NewCommunication::lifecycle(
                    &lead.id,
                    lead.status,
                    lead.status,
                    actor,
                    Some(notes),
                ))?;
                lead
            }
        };

        match notes {
            Some(notes) => Ok(self.leads.set_admin_notes(&lead.id, notes)?),
            None => Ok(lead),
        }
    }

    /// Leads are never removed; deleting marks them `spam`.
    pub fn soft_delete(&self, lead_id: &LeadId, actor: &Actor) -> Result<Lead, LeadServiceError> {
        self.admin_transition(lead_id, LeadStatus::Spam, actor, None)
    }

    pub fn get(&self, lead_id: &LeadId) -> Result<LeadDetail, LeadServiceError> {
        let lead = self.load(lead_id)?;
        let assignments = self.assignments.for_lead(&lead.id)?;
        let communications = self.ledger.for_lead(&lead.id)?;
        Ok(LeadDetail {
            lead,
            assignments,
            communications,
        })
    }

    fn load(&self, lead_id: &LeadId) -> Result<Lead, LeadServiceError> {
        self.leads
            .fetch(lead_id)?
            .ok_or_else(|| LeadServiceError::NotFound(lead_id.clone()))
    }

    fn assign(&self, lead: Lead) -> Result<LeadAssignments, LeadServiceError> {
        let companies = self.directory.eligible_companies(&lead)?;
        let scored = self.engine.score_candidates(&lead, companies);
        let ranked = self.ranker.rank(&lead, scored);
        let assignments = self.assignments.create_assignments(&lead.id, &ranked)?;

        if assignments.is_empty() {
            warn!(lead_id = %lead.id, "no eligible companies, lead needs manual triage");
            return Err(LeadServiceError::NoEligibleCandidates { lead_id: lead.id });
        }

        let lead = match self.swap(&lead, LeadStatus::Assigned, &Actor::System, None)? {
            Some(updated) => updated,
            None => {
                let current = self.load(&lead.id)?;
                if !matches!(current.status, LeadStatus::Assigned | LeadStatus::Dispatched) {
                    return Err(LeadServiceError::InvalidTransition {
                        lead_id: current.id,
                        current: current.status,
                        requested: LeadStatus::Assigned,
                    });
                }
                current
            }
        };

        Ok(LeadAssignments { lead, assignments })
    }

    fn mark_dispatched(&self, lead: Lead) -> Result<Lead, LeadServiceError> {
        if lead.status == LeadStatus::Dispatched {
            return Ok(lead);
        }
        match self.swap(&lead, LeadStatus::Dispatched, &Actor::System, None)? {
            Some(updated) => Ok(updated),
            None => {
                let current = self.load(&lead.id)?;
                if current.status != LeadStatus::Dispatched {
                    warn!(
                        lead_id = %current.id,
                        status = current.status.label(),
                        "lead changed while dispatching"
                    );
                }
                Ok(current)
            }
        }
    }

    fn admin_transition(
        &self,
        lead_id: &LeadId,
        requested: LeadStatus,
        actor: &Actor,
        note: Option<&str>,
    ) -> Result<Lead, LeadServiceError> {
        for _ in 0..MAX_STATUS_ATTEMPTS {
            let lead = self.load(lead_id)?;
            if !lead.status.admin_may_set(requested) {
                return Err(LeadServiceError::InvalidTransition {
                    lead_id: lead.id,
                    current: lead.status,
                    requested,
                });
            }
            if let Some(updated) = self.swap(&lead, requested, actor, note)? {
                return Ok(updated);
            }
        }
        Err(LeadServiceError::Conflict {
            lead_id: lead_id.clone(),
        })
    }

    /// Compare-and-swap from the lead's observed status. `None` means another writer moved it.
    fn swap(
        &self,
        lead: &Lead,
        to: LeadStatus,
        actor: &Actor,
        note: Option<&str>,
    ) -> Result<Option<Lead>, LeadServiceError> {
        let Some(updated) = self
            .leads
            .compare_and_set_status(&lead.id, lead.status, to)?
        else {
            return Ok(None);
        };

        self.ledger.append(NewCommunication::lifecycle(
            &lead.id,
            lead.status,
            to,
            actor,
            note,
        ))?;
        info!(
            lead_id = %lead.id,
            from = lead.status.label(),
            to = to.label(),
            actor = %actor.label(),
            "lead status changed"
        );
        Ok(Some(updated))
    }

    fn report(
        &self,
        lead: Lead,
        summary: DispatchSummary,
    ) -> Result<DispatchReport, LeadServiceError> {
        let assignments = self.assignments.for_lead(&lead.id)?;
        let message = if summary.total == 0 {
            "no pending assignments to notify".to_string()
        } else {
            format!(
                "notified {} of {} companies",
                summary.notified, summary.total
            )
        };

        Ok(DispatchReport {
            lead_id: lead.id,
            status: lead.status,
            assignments,
            notifications_sent: summary.notified,
            message,
            summary,
        })
    }
}

/// Error raised by the lifecycle controller.
#[derive(Debug, thiserror::Error)]
pub enum LeadServiceError {
    #[error("lead {0} not found")]
    NotFound(LeadId),
    #[error("lead {lead_id} cannot move from {current} to {requested}")]
    InvalidTransition {
        lead_id: LeadId,
        current: LeadStatus,
        requested: LeadStatus,
    },
    #[error("no eligible companies for lead {lead_id}")]
    NoEligibleCandidates { lead_id: LeadId },
    #[error("invalid lead: {0}")]
    InvalidLead(String),
    #[error("lead {lead_id} was modified concurrently")]
    Conflict { lead_id: LeadId },
    #[error(transparent)]
    Repository(#[from] RepositoryError),
    #[error(transparent)]
    Directory(#[from] DirectoryError),
}
