//! Mutex-backed stores used by the service binary, the CLI demo and the tests.
//!
//! Each store holds a single lock per table, which gives the same guarantees the relational
//! schema provides with its unique (lead, company) index and conditional `UPDATE … WHERE status`.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};

use super::domain::{
    Assignment, AssignmentId, AssignmentStatus, Company, CompanyContact, CompanyId, Lead, LeadId,
    LeadStatus, NewLead,
};
use super::ledger::{CommunicationLog, NewCommunication};
use super::ranking::RankedCandidate;
use super::repository::{
    AssignmentStore, CommunicationLedger, CompanyDirectory, ConsentLedger, DirectoryError,
    LeadRepository, RepositoryError,
};
use super::scoring::serves_category;

fn lock<'a, T>(mutex: &'a Mutex<T>, table: &str) -> Result<MutexGuard<'a, T>, RepositoryError> {
    mutex
        .lock()
        .map_err(|_| RepositoryError::Unavailable(format!("{table} lock poisoned")))
}

fn lock_directory<'a, T>(
    mutex: &'a Mutex<T>,
    table: &str,
) -> Result<MutexGuard<'a, T>, DirectoryError> {
    mutex
        .lock()
        .map_err(|_| DirectoryError::Unavailable(format!("{table} lock poisoned")))
}

#[derive(Debug, Default)]
struct LeadTable {
    sequence: u64,
    rows: HashMap<LeadId, Lead>,
}

#[derive(Debug, Default, Clone)]
pub struct InMemoryLeadRepository {
    table: Arc<Mutex<LeadTable>>,
}

impl LeadRepository for InMemoryLeadRepository {
    fn create(&self, submission: NewLead) -> Result<Lead, RepositoryError> {
        let mut table = lock(&self.table, "lead")?;
        let id = loop {
            table.sequence += 1;
            let candidate = LeadId(format!("lead-{:06}", table.sequence));
            if !table.rows.contains_key(&candidate) {
                break candidate;
            }
        };

        let now = Utc::now();
        let lead = Lead {
            id,
            tenant_id: submission.tenant_id,
            category_id: submission.category_id,
            postal_code: submission.postal_code,
            location: submission.location,
            phone: submission.phone,
            email: submission.email,
            note: submission.note,
            admin_notes: None,
            status: LeadStatus::New,
            created_at: now,
            updated_at: now,
        };
        table.rows.insert(lead.id.clone(), lead.clone());
        Ok(lead)
    }

    fn insert(&self, lead: Lead) -> Result<Lead, RepositoryError> {
        let mut table = lock(&self.table, "lead")?;
        if table.rows.contains_key(&lead.id) {
            return Err(RepositoryError::Conflict);
        }
        table.rows.insert(lead.id.clone(), lead.clone());
        Ok(lead)
    }

    fn fetch(&self, id: &LeadId) -> Result<Option<Lead>, RepositoryError> {
        let table = lock(&self.table, "lead")?;
        Ok(table.rows.get(id).cloned())
    }

    fn compare_and_set_status(
        &self,
        id: &LeadId,
        from: LeadStatus,
        to: LeadStatus,
    ) -> Result<Option<Lead>, RepositoryError> {
        let mut table = lock(&self.table, "lead")?;
        let lead = table.rows.get_mut(id).ok_or(RepositoryError::NotFound)?;
        if lead.status != from {
            return Ok(None);
        }
        lead.status = to;
        lead.updated_at = Utc::now();
        Ok(Some(lead.clone()))
    }

    fn set_admin_notes(&self, id: &LeadId, notes: String) -> Result<Lead, RepositoryError> {
        let mut table = lock(&self.table, "lead")?;
        let lead = table.rows.get_mut(id).ok_or(RepositoryError::NotFound)?;
        lead.admin_notes = Some(notes);
        lead.updated_at = Utc::now();
        Ok(lead.clone())
    }
}

#[derive(Debug, Default)]
struct AssignmentTable {
    sequence: u64,
    rows: HashMap<AssignmentId, Assignment>,
    by_lead: HashMap<LeadId, Vec<AssignmentId>>,
    pairs: HashSet<(LeadId, CompanyId)>,
}

impl AssignmentTable {
    fn lead_rows(&self, lead_id: &LeadId) -> Vec<Assignment> {
        let mut rows: Vec<Assignment> = self
            .by_lead
            .get(lead_id)
            .into_iter()
            .flatten()
            .filter_map(|id| self.rows.get(id).cloned())
            .collect();
        rows.sort_by_key(|assignment| assignment.rank);
        rows
    }
}

#[derive(Debug, Default, Clone)]
pub struct InMemoryAssignmentStore {
    table: Arc<Mutex<AssignmentTable>>,
}

impl AssignmentStore for InMemoryAssignmentStore {
    fn create_assignments(
        &self,
        lead_id: &LeadId,
        ranked: &[RankedCandidate],
    ) -> Result<Vec<Assignment>, RepositoryError> {
        let mut table = lock(&self.table, "assignment")?;

        let existing = table.lead_rows(lead_id);
        if !existing.is_empty() || ranked.is_empty() {
            return Ok(existing);
        }

        let now = Utc::now();
        let mut created = Vec::with_capacity(ranked.len());
        for candidate in ranked {
            let pair = (lead_id.clone(), candidate.company_id.clone());
            if !table.pairs.insert(pair) {
                continue;
            }
            table.sequence += 1;
            let assignment = Assignment {
                id: AssignmentId(format!("asg-{:06}", table.sequence)),
                lead_id: lead_id.clone(),
                company_id: candidate.company_id.clone(),
                score: candidate.score,
                rank: candidate.rank,
                status: AssignmentStatus::Sent,
                created_at: now,
                updated_at: now,
                claimed_at: None,
            };
            table
                .by_lead
                .entry(lead_id.clone())
                .or_default()
                .push(assignment.id.clone());
            table.rows.insert(assignment.id.clone(), assignment.clone());
            created.push(assignment);
        }

        Ok(created)
    }

    fn for_lead(&self, lead_id: &LeadId) -> Result<Vec<Assignment>, RepositoryError> {
        let table = lock(&self.table, "assignment")?;
        Ok(table.lead_rows(lead_id))
    }

    fn fetch(&self, id: &AssignmentId) -> Result<Option<Assignment>, RepositoryError> {
        let table = lock(&self.table, "assignment")?;
        Ok(table.rows.get(id).cloned())
    }

    fn try_claim(
        &self,
        id: &AssignmentId,
        from: AssignmentStatus,
        to: AssignmentStatus,
    ) -> Result<bool, RepositoryError> {
        if !from.allows(to) {
            return Err(RepositoryError::InvalidTransition { from, to });
        }

        let mut table = lock(&self.table, "assignment")?;
        let row = table.rows.get_mut(id).ok_or(RepositoryError::NotFound)?;
        if row.status != from {
            return Ok(false);
        }

        let now = Utc::now();
        row.status = to;
        row.updated_at = now;
        row.claimed_at = (to == AssignmentStatus::Dispatching).then_some(now);
        Ok(true)
    }

    fn stale_claims(
        &self,
        claimed_before: DateTime<Utc>,
    ) -> Result<Vec<Assignment>, RepositoryError> {
        let table = lock(&self.table, "assignment")?;
        let mut stale: Vec<Assignment> = table
            .rows
            .values()
            .filter(|row| {
                row.status == AssignmentStatus::Dispatching
                    && row.claimed_at.is_some_and(|at| at < claimed_before)
            })
            .cloned()
            .collect();
        stale.sort_by(|left, right| left.id.cmp(&right.id));
        Ok(stale)
    }
}

#[derive(Debug, Default, Clone)]
pub struct InMemoryCommunicationLedger {
    entries: Arc<Mutex<Vec<CommunicationLog>>>,
}

impl InMemoryCommunicationLedger {
    /// Snapshot of every row in append order.
    pub fn entries(&self) -> Vec<CommunicationLog> {
        match self.entries.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

impl CommunicationLedger for InMemoryCommunicationLedger {
    fn append(&self, entry: NewCommunication) -> Result<CommunicationLog, RepositoryError> {
        let mut guard = lock(&self.entries, "communication log")?;
        let log = entry.into_log(format!("comm-{:06}", guard.len() + 1));
        guard.push(log.clone());
        Ok(log)
    }

    fn for_lead(&self, lead_id: &LeadId) -> Result<Vec<CommunicationLog>, RepositoryError> {
        let guard = lock(&self.entries, "communication log")?;
        Ok(guard
            .iter()
            .filter(|entry| &entry.lead_id == lead_id)
            .cloned()
            .collect())
    }
}

#[derive(Debug, Default)]
struct DirectoryTable {
    companies: Vec<Company>,
    contacts: HashMap<CompanyId, CompanyContact>,
}

#[derive(Debug, Default, Clone)]
pub struct InMemoryCompanyDirectory {
    table: Arc<Mutex<DirectoryTable>>,
}

impl InMemoryCompanyDirectory {
    /// Inserts or replaces a listing and its contact.
    pub fn upsert(
        &self,
        company: Company,
        contact: Option<CompanyContact>,
    ) -> Result<(), DirectoryError> {
        let mut table = lock_directory(&self.table, "directory")?;
        match contact {
            Some(contact) => {
                table.contacts.insert(company.id.clone(), contact);
            }
            None => {
                table.contacts.remove(&company.id);
            }
        }
        match table
            .companies
            .iter_mut()
            .find(|existing| existing.id == company.id)
        {
            Some(existing) => *existing = company,
            None => table.companies.push(company),
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.table
            .lock()
            .map(|table| table.companies.len())
            .unwrap_or_default()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl CompanyDirectory for InMemoryCompanyDirectory {
    fn eligible_companies(&self, lead: &Lead) -> Result<Vec<Company>, DirectoryError> {
        let table = lock_directory(&self.table, "directory")?;
        Ok(table
            .companies
            .iter()
            .filter(|company| {
                company.active
                    && company.tenant_id == lead.tenant_id
                    && serves_category(company, &lead.category_id)
            })
            .cloned()
            .collect())
    }

    fn contact_for(&self, company_id: &CompanyId) -> Result<Option<CompanyContact>, DirectoryError> {
        let table = lock_directory(&self.table, "directory")?;
        Ok(table.contacts.get(company_id).cloned())
    }
}

/// Consent ledger where contact is allowed unless a company opted out.
#[derive(Debug, Default, Clone)]
pub struct InMemoryConsentLedger {
    opted_out: Arc<Mutex<HashSet<CompanyId>>>,
}

impl InMemoryConsentLedger {
    pub fn opt_out(&self, company_id: CompanyId) -> Result<(), DirectoryError> {
        lock_directory(&self.opted_out, "consent")?.insert(company_id);
        Ok(())
    }
}

impl ConsentLedger for InMemoryConsentLedger {
    fn may_contact(&self, _lead: &Lead, company_id: &CompanyId) -> Result<bool, DirectoryError> {
        let guard = lock_directory(&self.opted_out, "consent")?;
        Ok(!guard.contains(company_id))
    }
}
