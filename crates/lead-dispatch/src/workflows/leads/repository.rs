use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::domain::{
    Assignment, AssignmentId, AssignmentStatus, Company, CompanyContact, CompanyId, ContactChannel,
    Lead, LeadId, LeadStatus, NewLead,
};
use super::ledger::{CommunicationLog, NewCommunication};
use super::ranking::RankedCandidate;

/// Lead storage. Status only changes through [`LeadRepository::compare_and_set_status`].
pub trait LeadRepository: Send + Sync {
    /// Stores a `new` lead under an id the repository generates.
    fn create(&self, submission: NewLead) -> Result<Lead, RepositoryError>;
    /// Stores a lead that already carries its id, e.g. when replaying an export.
    fn insert(&self, lead: Lead) -> Result<Lead, RepositoryError>;
    fn fetch(&self, id: &LeadId) -> Result<Option<Lead>, RepositoryError>;
    /// Moves the lead to `to` only if it is currently `from`. `Ok(None)` means another writer
    /// got there first.
    fn compare_and_set_status(
        &self,
        id: &LeadId,
        from: LeadStatus,
        to: LeadStatus,
    ) -> Result<Option<Lead>, RepositoryError>;
    fn set_admin_notes(&self, id: &LeadId, notes: String) -> Result<Lead, RepositoryError>;
}

/// Assignment rows, unique on (lead, company).
pub trait AssignmentStore: Send + Sync {
    /// Persists the ranked set once per lead. Later calls return the rows already stored.
    fn create_assignments(
        &self,
        lead_id: &LeadId,
        ranked: &[RankedCandidate],
    ) -> Result<Vec<Assignment>, RepositoryError>;
    /// Assignments for a lead ordered by rank.
    fn for_lead(&self, lead_id: &LeadId) -> Result<Vec<Assignment>, RepositoryError>;
    fn fetch(&self, id: &AssignmentId) -> Result<Option<Assignment>, RepositoryError>;
    /// Atomic compare-and-swap of the status; the only way an assignment status changes.
    /// Returns `Ok(false)` when the current status is not `from`.
    fn try_claim(
        &self,
        id: &AssignmentId,
        from: AssignmentStatus,
        to: AssignmentStatus,
    ) -> Result<bool, RepositoryError>;
    /// Assignments still `dispatching` that were claimed before `claimed_before`.
    fn stale_claims(&self, claimed_before: DateTime<Utc>)
        -> Result<Vec<Assignment>, RepositoryError>;
}

/// Append-only audit log of notification attempts and lifecycle transitions.
pub trait CommunicationLedger: Send + Sync {
    fn append(&self, entry: NewCommunication) -> Result<CommunicationLog, RepositoryError>;
    fn for_lead(&self, lead_id: &LeadId) -> Result<Vec<CommunicationLog>, RepositoryError>;
}

/// Read side of the business directory: candidate selection and contact resolution.
pub trait CompanyDirectory: Send + Sync {
    /// Active companies of the lead's tenant that serve a related category.
    fn eligible_companies(&self, lead: &Lead) -> Result<Vec<Company>, DirectoryError>;
    fn contact_for(&self, company_id: &CompanyId) -> Result<Option<CompanyContact>, DirectoryError>;
}

/// Consent records deciding whether a company may be contacted about a lead.
pub trait ConsentLedger: Send + Sync {
    fn may_contact(&self, lead: &Lead, company_id: &CompanyId) -> Result<bool, DirectoryError>;
}

/// Outbound e-mail/SMS delivery.
#[async_trait]
pub trait NotificationTransport: Send + Sync {
    async fn send(&self, notification: &LeadNotification) -> Result<(), TransportError>;
}

/// Message handed to the transport for one assignment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeadNotification {
    pub lead_id: LeadId,
    pub assignment_id: AssignmentId,
    pub company_id: CompanyId,
    pub channel: ContactChannel,
    pub recipient: String,
    pub subject: String,
    pub body: String,
}

/// Error enumeration for storage failures.
#[derive(Debug, thiserror::Error)]
pub enum RepositoryError {
    #[error("record already exists")]
    Conflict,
    #[error("record not found")]
    NotFound,
    #[error("assignment cannot move from {from} to {to}")]
    InvalidTransition {
        from: AssignmentStatus,
        to: AssignmentStatus,
    },
    #[error("repository unavailable: {0}")]
    Unavailable(String),
}

#[derive(Debug, thiserror::Error)]
pub enum DirectoryError {
    #[error("directory unavailable: {0}")]
    Unavailable(String),
}

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("recipient rejected: {0}")]
    Rejected(String),
    #[error("notification transport unavailable: {0}")]
    Unavailable(String),
    #[error("notification timed out after {0} ms")]
    TimedOut(u128),
}
