use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::response::Response;
use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::config::DispatchConfig;
use crate::workflows::leads::domain::{
    Assignment, AssignmentId, AssignmentStatus, Company, CompanyContact, CompanyId,
    ContactChannel, Lead, LeadId, LeadStatus, NewLead, ServiceArea, TenantId,
};
use crate::workflows::leads::lifecycle::{LeadLifecycleController, LeadStores};
use crate::workflows::leads::memory::{
    InMemoryAssignmentStore, InMemoryCommunicationLedger, InMemoryCompanyDirectory,
    InMemoryConsentLedger, InMemoryLeadRepository,
};
use crate::workflows::leads::ranking::RankedCandidate;
use crate::workflows::leads::repository::{
    AssignmentStore, LeadNotification, LeadRepository, NotificationTransport, RepositoryError,
    TransportError,
};
use crate::workflows::leads::scoring::ScoringConfig;

pub(super) fn tenant() -> TenantId {
    TenantId("t1".to_string())
}

/// Plumbing inquiry in 67500 without coordinates.
pub(super) fn lead_l1() -> Lead {
    let now = Utc::now();
    Lead {
        id: LeadId("lead-l1".to_string()),
        tenant_id: tenant(),
        category_id: "plumbing".to_string(),
        postal_code: "67500".to_string(),
        location: None,
        phone: Some("+33 3 88 00 00 00".to_string()),
        email: Some("customer@example.test".to_string()),
        note: Some("Leaking pipe under the sink".to_string()),
        admin_notes: None,
        status: LeadStatus::New,
        created_at: now,
        updated_at: now,
    }
}

pub(super) fn new_lead() -> NewLead {
    NewLead {
        tenant_id: tenant(),
        category_id: "plumbing".to_string(),
        postal_code: "67500".to_string(),
        location: None,
        phone: None,
        email: Some("customer@example.test".to_string()),
        note: Some("Leaking pipe under the sink".to_string()),
    }
}

pub(super) fn company(id: &str, categories: &[&str], codes: &[&str], score: Option<u8>) -> Company {
    Company {
        id: CompanyId(id.to_string()),
        tenant_id: tenant(),
        name: format!("{id} Services"),
        active: true,
        categories: categories.iter().map(|value| value.to_string()).collect(),
        service_area: ServiceArea::PostalCodes {
            codes: codes.iter().map(|value| value.to_string()).collect(),
        },
        company_score: score,
    }
}

/// C1 and C2 tie on 90 points (C2 wins on company score), C3 only overlaps via a child
/// category and C4 serves another postal code.
pub(super) fn scenario_companies() -> Vec<Company> {
    vec![
        company("C1", &["plumbing"], &["67500"], Some(60)),
        company("C2", &["plumbing"], &["67000", "67500"], Some(100)),
        company("C3", &["plumbing.heating"], &["67000", "67500"], Some(0)),
        company("C4", &["plumbing"], &["75001"], Some(90)),
    ]
}

pub(super) fn contact(company_id: &str) -> CompanyContact {
    CompanyContact {
        channel: ContactChannel::Email,
        recipient: recipient(company_id),
        display_name: format!("{company_id} Services"),
    }
}

pub(super) fn recipient(company_id: &str) -> String {
    format!("{}@example.test", company_id.to_ascii_lowercase())
}

pub(super) fn ranked(entries: &[(&str, u8, u16)]) -> Vec<RankedCandidate> {
    entries
        .iter()
        .map(|(id, score, rank)| RankedCandidate {
            company_id: CompanyId(id.to_string()),
            score: *score,
            rank: *rank,
        })
        .collect()
}

pub(super) fn dispatch_config() -> DispatchConfig {
    DispatchConfig {
        concurrency: 4,
        notification_timeout: Duration::from_millis(200),
        claim_ttl: Duration::from_secs(5),
        reconcile_interval: Duration::from_millis(50),
    }
}

pub(super) struct Harness {
    pub(super) controller: Arc<LeadLifecycleController>,
    pub(super) leads: InMemoryLeadRepository,
    pub(super) assignments: InMemoryAssignmentStore,
    pub(super) ledger: InMemoryCommunicationLedger,
    pub(super) directory: InMemoryCompanyDirectory,
    pub(super) consent: InMemoryConsentLedger,
}

impl Harness {
    pub(super) fn assignment_for(&self, lead_id: &LeadId, company_id: &str) -> Assignment {
        self.assignments
            .for_lead(lead_id)
            .expect("assignments readable")
            .into_iter()
            .find(|assignment| assignment.company_id.0 == company_id)
            .expect("assignment present")
    }
}

/// Controller over fresh in-memory stores seeded with the scenario directory.
pub(super) fn harness(transport: Arc<dyn NotificationTransport>) -> Harness {
    harness_with(transport, dispatch_config())
}

pub(super) fn harness_with(
    transport: Arc<dyn NotificationTransport>,
    dispatch: DispatchConfig,
) -> Harness {
    harness_over(InMemoryLeadRepository::default(), transport, dispatch)
}

/// Same as [`harness_with`] but over a lead store the caller already holds.
pub(super) fn harness_over(
    leads: InMemoryLeadRepository,
    transport: Arc<dyn NotificationTransport>,
    dispatch: DispatchConfig,
) -> Harness {
    let assignments = InMemoryAssignmentStore::default();
    let ledger = InMemoryCommunicationLedger::default();
    let directory = InMemoryCompanyDirectory::default();
    let consent = InMemoryConsentLedger::default();

    for company in scenario_companies() {
        let contact = contact(&company.id.0);
        directory
            .upsert(company, Some(contact))
            .expect("directory accepts listing");
    }

    let stores = LeadStores {
        leads: Arc::new(leads.clone()),
        assignments: Arc::new(assignments.clone()),
        ledger: Arc::new(ledger.clone()),
        directory: Arc::new(directory.clone()),
        consent: Arc::new(consent.clone()),
    };
    let controller = Arc::new(LeadLifecycleController::new(
        stores,
        transport,
        ScoringConfig::default(),
        dispatch,
    ));

    Harness {
        controller,
        leads,
        assignments,
        ledger,
        directory,
        consent,
    }
}

/// Transport that records every send and rejects a configured set of recipients.
#[derive(Default)]
pub(super) struct ScriptedTransport {
    failing: HashSet<String>,
    delay: Option<Duration>,
    sent: Mutex<Vec<LeadNotification>>,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
}

impl ScriptedTransport {
    pub(super) fn failing_for(company_ids: &[&str]) -> Self {
        Self {
            failing: company_ids.iter().map(|id| recipient(id)).collect(),
            ..Self::default()
        }
    }

    pub(super) fn slow(delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            ..Self::default()
        }
    }

    pub(super) fn sent(&self) -> Vec<LeadNotification> {
        self.sent.lock().expect("transport mutex poisoned").clone()
    }

    pub(super) fn sends_to(&self, assignment_id: &AssignmentId) -> usize {
        self.sent()
            .iter()
            .filter(|notification| &notification.assignment_id == assignment_id)
            .count()
    }

    pub(super) fn peak_in_flight(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl NotificationTransport for ScriptedTransport {
    async fn send(&self, notification: &LeadNotification) -> Result<(), TransportError> {
        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(current, Ordering::SeqCst);

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.sent
            .lock()
            .expect("transport mutex poisoned")
            .push(notification.clone());

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        if self.failing.contains(&notification.recipient) {
            return Err(TransportError::Rejected(notification.recipient.clone()));
        }
        Ok(())
    }
}

/// Transport that panics for one recipient and accepts the rest.
pub(super) struct PanickingTransport {
    pub(super) recipient: String,
}

#[async_trait]
impl NotificationTransport for PanickingTransport {
    async fn send(&self, notification: &LeadNotification) -> Result<(), TransportError> {
        if notification.recipient == self.recipient {
            panic!("transport crashed for {}", notification.recipient);
        }
        Ok(())
    }
}

/// Transport that accepts every send and flags the lead as spam on the first one, the way an
/// operator override racing a dispatch would.
pub(super) struct SpamFlaggingTransport {
    leads: InMemoryLeadRepository,
    sends: AtomicUsize,
}

impl SpamFlaggingTransport {
    pub(super) fn new(leads: InMemoryLeadRepository) -> Self {
        Self {
            leads,
            sends: AtomicUsize::new(0),
        }
    }

    pub(super) fn sends(&self) -> usize {
        self.sends.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl NotificationTransport for SpamFlaggingTransport {
    async fn send(&self, notification: &LeadNotification) -> Result<(), TransportError> {
        self.sends.fetch_add(1, Ordering::SeqCst);
        self.leads
            .compare_and_set_status(&notification.lead_id, LeadStatus::Assigned, LeadStatus::Spam)
            .map_err(|err| TransportError::Unavailable(err.to_string()))?;
        Ok(())
    }
}

pub(super) struct UnavailableAssignmentStore;

impl AssignmentStore for UnavailableAssignmentStore {
    fn create_assignments(
        &self,
        _lead_id: &LeadId,
        _ranked: &[RankedCandidate],
    ) -> Result<Vec<Assignment>, RepositoryError> {
        Err(RepositoryError::Unavailable("database offline".to_string()))
    }

    fn for_lead(&self, _lead_id: &LeadId) -> Result<Vec<Assignment>, RepositoryError> {
        Err(RepositoryError::Unavailable("database offline".to_string()))
    }

    fn fetch(&self, _id: &AssignmentId) -> Result<Option<Assignment>, RepositoryError> {
        Err(RepositoryError::Unavailable("database offline".to_string()))
    }

    fn try_claim(
        &self,
        _id: &AssignmentId,
        _from: AssignmentStatus,
        _to: AssignmentStatus,
    ) -> Result<bool, RepositoryError> {
        Err(RepositoryError::Unavailable("database offline".to_string()))
    }

    fn stale_claims(
        &self,
        _claimed_before: DateTime<Utc>,
    ) -> Result<Vec<Assignment>, RepositoryError> {
        Err(RepositoryError::Unavailable("database offline".to_string()))
    }
}

pub(super) async fn read_json_body(response: Response) -> Value {
    let body = axum::body::to_bytes(response.into_body(), 64 * 1024)
        .await
        .expect("read body");
    serde_json::from_slice(&body).expect("json payload")
}
