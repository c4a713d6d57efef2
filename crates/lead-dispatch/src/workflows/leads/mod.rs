//! Lead scoring, assignment and dispatch.
//!
//! Leads arrive through [`LeadLifecycleController::intake`], are scored against the eligible
//! companies of their tenant, receive a ranked assignment set, and are fanned out to every
//! assigned company. Every status change and notification attempt lands in the communication
//! ledger.

pub mod directory_csv;
pub mod dispatch;
pub mod domain;
pub mod ledger;
pub mod lifecycle;
pub mod memory;
pub mod ranking;
pub mod reconciler;
pub mod repository;
pub mod router;
pub mod scoring;

#[cfg(test)]
mod tests;

pub use directory_csv::{load_directory, load_directory_file, DirectoryImportError};
pub use dispatch::{DispatchNotifier, DispatchSummary};
pub use domain::{
    Actor, Assignment, AssignmentId, AssignmentStatus, Company, CompanyContact, CompanyId,
    ContactChannel, GeoPoint, Lead, LeadId, LeadStatus, NewLead, ServiceArea, TenantId,
};
pub use ledger::{CommunicationChannel, CommunicationLog, DeliveryStatus, NewCommunication};
pub use lifecycle::{
    DispatchReport, LeadAssignments, LeadDetail, LeadLifecycleController, LeadServiceError,
    LeadStores, UpdateLeadStatus,
};
pub use memory::{
    InMemoryAssignmentStore, InMemoryCommunicationLedger, InMemoryCompanyDirectory,
    InMemoryConsentLedger, InMemoryLeadRepository,
};
pub use ranking::{AssignmentRanker, RankedCandidate};
pub use reconciler::run_claim_reconciler;
pub use repository::{
    AssignmentStore, CommunicationLedger, CompanyDirectory, ConsentLedger, DirectoryError,
    LeadNotification, LeadRepository, NotificationTransport, RepositoryError, TransportError,
};
pub use router::lead_router;
pub use scoring::{
    Exclusion, ScoreCard, ScoreComponent, ScoreFactor, ScoredCandidate, ScoringConfig,
    ScoringEngine,
};
