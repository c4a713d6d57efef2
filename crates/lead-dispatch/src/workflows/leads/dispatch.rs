use std::collections::HashMap;
use std::fmt::Write as _;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::sync::Semaphore;
use tokio::task::{self, JoinSet};
use tracing::{debug, error, info, warn};

use crate::config::DispatchConfig;

use super::domain::{Assignment, AssignmentStatus, CompanyContact, Lead};
use super::ledger::NewCommunication;
use super::repository::{
    AssignmentStore, CommunicationLedger, CompanyDirectory, ConsentLedger, LeadNotification,
    LeadRepository, NotificationTransport, RepositoryError, TransportError,
};

/// Count-based result of one dispatch run. `total` covers the claims this run won;
/// `skipped` counts assignments another run was already handling and claims handed back because
/// the lead stopped being dispatchable.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchSummary {
    pub total: usize,
    pub notified: usize,
    pub failed: usize,
    pub skipped: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DeliveryOutcome {
    Notified,
    Failed,
    Skipped,
}

impl DispatchSummary {
    fn record(&mut self, outcome: DeliveryOutcome) {
        match outcome {
            DeliveryOutcome::Notified => {
                self.total += 1;
                self.notified += 1;
            }
            DeliveryOutcome::Failed => {
                self.total += 1;
                self.failed += 1;
            }
            DeliveryOutcome::Skipped => self.skipped += 1,
        }
    }
}

/// Fans a lead out to its assigned companies.
///
/// Every assignment is delivered in its own task. Tasks never cancel each other, and the number
/// of notifications in flight is capped by a semaphore shared by all dispatch runs.
#[derive(Clone)]
pub struct DispatchNotifier {
    inner: Arc<NotifierInner>,
}

struct NotifierInner {
    leads: Arc<dyn LeadRepository>,
    assignments: Arc<dyn AssignmentStore>,
    ledger: Arc<dyn CommunicationLedger>,
    directory: Arc<dyn CompanyDirectory>,
    consent: Arc<dyn ConsentLedger>,
    transport: Arc<dyn NotificationTransport>,
    permits: Arc<Semaphore>,
    config: DispatchConfig,
}

impl std::fmt::Debug for DispatchNotifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DispatchNotifier")
            .field("config", &self.inner.config)
            .field("available_permits", &self.inner.permits.available_permits())
            .finish()
    }
}

impl DispatchNotifier {
    pub fn new(
        leads: Arc<dyn LeadRepository>,
        assignments: Arc<dyn AssignmentStore>,
        ledger: Arc<dyn CommunicationLedger>,
        directory: Arc<dyn CompanyDirectory>,
        consent: Arc<dyn ConsentLedger>,
        transport: Arc<dyn NotificationTransport>,
        config: DispatchConfig,
    ) -> Self {
        let permits = Arc::new(Semaphore::new(config.concurrency.max(1)));
        Self {
            inner: Arc::new(NotifierInner {
                leads,
                assignments,
                ledger,
                directory,
                consent,
                transport,
                permits,
                config,
            }),
        }
    }

    pub fn config(&self) -> &DispatchConfig {
        &self.inner.config
    }

    /// Notifies every `sent` assignment of the lead. Per-assignment failures are recorded in the
    /// ledger and counted; only failing to load the assignment set is an error.
    pub async fn dispatch(&self, lead: &Lead) -> Result<DispatchSummary, RepositoryError> {
        let pending: Vec<Assignment> = self
            .inner
            .assignments
            .for_lead(&lead.id)?
            .into_iter()
            .filter(|assignment| assignment.status == AssignmentStatus::Sent)
            .collect();

        let mut summary = DispatchSummary::default();
        if pending.is_empty() {
            debug!(lead_id = %lead.id, "no sent assignments to dispatch");
            return Ok(summary);
        }

        let lead = Arc::new(lead.clone());
        let mut tasks = JoinSet::new();
        let mut attempts: HashMap<task::Id, Assignment> = HashMap::with_capacity(pending.len());
        for assignment in pending {
            let inner = Arc::clone(&self.inner);
            let lead = Arc::clone(&lead);
            let claimed = assignment.clone();
            let handle = tasks.spawn(async move {
                let _permit = match Arc::clone(&inner.permits).acquire_owned().await {
                    Ok(permit) => permit,
                    Err(_) => {
                        warn!(assignment_id = %claimed.id, "dispatch permits closed");
                        return DeliveryOutcome::Skipped;
                    }
                };
                inner.deliver(&lead, claimed).await
            });
            attempts.insert(handle.id(), assignment);
        }

        while let Some(joined) = tasks.join_next_with_id().await {
            match joined {
                Ok((id, outcome)) => {
                    attempts.remove(&id);
                    summary.record(outcome);
                }
                Err(err) => {
                    error!(lead_id = %lead.id, error = %err, "notification task aborted");
                    if let Some(assignment) = attempts.remove(&err.id()) {
                        self.inner.abandon(&lead, &assignment, &err);
                    }
                    summary.record(DeliveryOutcome::Failed);
                }
            }
        }

        info!(
            lead_id = %lead.id,
            total = summary.total,
            notified = summary.notified,
            failed = summary.failed,
            skipped = summary.skipped,
            "dispatch finished"
        );
        Ok(summary)
    }

    /// Puts `failed` assignments back to `sent` so the next dispatch retries them.
    pub fn requeue_failed(&self, lead: &Lead) -> Result<usize, RepositoryError> {
        let mut requeued = 0;
        for assignment in self.inner.assignments.for_lead(&lead.id)? {
            if assignment.status != AssignmentStatus::Failed {
                continue;
            }
            if self.inner.assignments.try_claim(
                &assignment.id,
                AssignmentStatus::Failed,
                AssignmentStatus::Sent,
            )? {
                requeued += 1;
            }
        }
        info!(lead_id = %lead.id, requeued, "failed assignments requeued");
        Ok(requeued)
    }

    /// Hands assignments stuck in `dispatching` longer than the claim TTL back to `sent`.
    pub fn reconcile_stale_claims(&self, now: DateTime<Utc>) -> Result<usize, RepositoryError> {
        let ttl = chrono::Duration::from_std(self.inner.config.claim_ttl)
            .unwrap_or_else(|_| chrono::Duration::days(365));
        let stale = self.inner.assignments.stale_claims(now - ttl)?;

        let mut reclaimed = 0;
        for assignment in stale {
            if self.inner.assignments.try_claim(
                &assignment.id,
                AssignmentStatus::Dispatching,
                AssignmentStatus::Sent,
            )? {
                warn!(
                    assignment_id = %assignment.id,
                    lead_id = %assignment.lead_id,
                    claimed_at = ?assignment.claimed_at,
                    "reclaimed stale dispatch claim"
                );
                reclaimed += 1;
            }
        }
        Ok(reclaimed)
    }
}

impl NotifierInner {
    async fn deliver(&self, lead: &Lead, assignment: Assignment) -> DeliveryOutcome {
        let subject = attempt_subject(lead);
        let metadata = attempt_metadata(lead, &assignment);

        match self.assignments.try_claim(
            &assignment.id,
            AssignmentStatus::Sent,
            AssignmentStatus::Dispatching,
        ) {
            Ok(true) => {}
            Ok(false) => {
                debug!(assignment_id = %assignment.id, "claim held by another dispatch");
                return DeliveryOutcome::Skipped;
            }
            Err(err) => {
                // Unclaimed: the row stays `sent` and the next dispatch picks it up.
                self.append(NewCommunication::undelivered(
                    &assignment,
                    None,
                    &subject,
                    metadata,
                    format!("claim failed: {err}"),
                ));
                return DeliveryOutcome::Failed;
            }
        }

        // An admin override may have landed after the controller checked the lead.
        match self.leads.fetch(&lead.id) {
            Ok(Some(current)) if current.status.is_terminal() => {
                info!(
                    assignment_id = %assignment.id,
                    lead_id = %lead.id,
                    status = current.status.label(),
                    "lead closed during dispatch, releasing claim"
                );
                self.finish(&assignment, AssignmentStatus::Sent);
                return DeliveryOutcome::Skipped;
            }
            Ok(Some(_)) => {}
            Ok(None) => {
                return self.fail(&assignment, None, &subject, metadata, "lead no longer exists");
            }
            Err(err) => {
                return self.fail(
                    &assignment,
                    None,
                    &subject,
                    metadata,
                    format!("lead lookup failed: {err}"),
                );
            }
        }

        let contact = match self.directory.contact_for(&assignment.company_id) {
            Ok(Some(contact)) => contact,
            Ok(None) => {
                return self.fail(&assignment, None, &subject, metadata, "no contact on file");
            }
            Err(err) => {
                return self.fail(
                    &assignment,
                    None,
                    &subject,
                    metadata,
                    format!("contact lookup failed: {err}"),
                );
            }
        };

        match self.consent.may_contact(lead, &assignment.company_id) {
            Ok(true) => {}
            Ok(false) => {
                return self.fail(
                    &assignment,
                    Some(&contact),
                    &subject,
                    metadata,
                    "contact consent not granted",
                );
            }
            Err(err) => {
                return self.fail(
                    &assignment,
                    Some(&contact),
                    &subject,
                    metadata,
                    format!("consent lookup failed: {err}"),
                );
            }
        }

        let notification = LeadNotification {
            lead_id: lead.id.clone(),
            assignment_id: assignment.id.clone(),
            company_id: assignment.company_id.clone(),
            channel: contact.channel,
            recipient: contact.recipient.clone(),
            subject: subject.clone(),
            body: render_body(lead, &assignment, &contact),
        };

        let timeout = self.config.notification_timeout;
        let sent = match tokio::time::timeout(timeout, self.transport.send(&notification)).await {
            Ok(result) => result,
            Err(_) => Err(TransportError::TimedOut(timeout.as_millis())),
        };

        match sent {
            Ok(()) => {
                self.append(NewCommunication::delivered(
                    &assignment,
                    &contact,
                    &subject,
                    metadata,
                ));
                self.finish(&assignment, AssignmentStatus::Notified);
                DeliveryOutcome::Notified
            }
            Err(err) => {
                warn!(
                    assignment_id = %assignment.id,
                    company_id = %assignment.company_id,
                    error = %err,
                    "notification failed"
                );
                self.fail(&assignment, Some(&contact), &subject, metadata, err.to_string())
            }
        }
    }

    fn fail(
        &self,
        assignment: &Assignment,
        contact: Option<&CompanyContact>,
        subject: &str,
        metadata: Value,
        error: impl Into<String>,
    ) -> DeliveryOutcome {
        self.append(NewCommunication::undelivered(
            assignment, contact, subject, metadata, error,
        ));
        self.finish(assignment, AssignmentStatus::Failed);
        DeliveryOutcome::Failed
    }

    /// Records a delivery task that died without reporting an outcome.
    fn abandon(&self, lead: &Lead, assignment: &Assignment, err: &task::JoinError) {
        let contact = self
            .directory
            .contact_for(&assignment.company_id)
            .ok()
            .flatten();
        let reason = if err.is_panic() {
            "notification task panicked"
        } else {
            "notification task cancelled"
        };
        self.append(NewCommunication::undelivered(
            assignment,
            contact.as_ref(),
            &attempt_subject(lead),
            attempt_metadata(lead, assignment),
            reason,
        ));
        self.finish(assignment, AssignmentStatus::Failed);
    }

    fn finish(&self, assignment: &Assignment, target: AssignmentStatus) {
        match self
            .assignments
            .try_claim(&assignment.id, AssignmentStatus::Dispatching, target)
        {
            Ok(true) => {}
            Ok(false) => warn!(
                assignment_id = %assignment.id,
                target = target.label(),
                "claim was reclaimed before the attempt finished"
            ),
            Err(err) => error!(
                assignment_id = %assignment.id,
                target = target.label(),
                error = %err,
                "could not record assignment outcome"
            ),
        }
    }

    fn append(&self, entry: NewCommunication) {
        let lead_id = entry.lead_id.clone();
        if let Err(err) = self.ledger.append(entry) {
            error!(lead_id = %lead_id, error = %err, "communication log write failed");
        }
    }
}

fn attempt_subject(lead: &Lead) -> String {
    format!("New {} request in {}", lead.category_id, lead.postal_code)
}

fn attempt_metadata(lead: &Lead, assignment: &Assignment) -> Value {
    json!({
        "lead_id": lead.id,
        "assignment_id": assignment.id,
        "rank": assignment.rank,
        "score": assignment.score,
        "category_id": lead.category_id,
        "postal_code": lead.postal_code,
    })
}

fn render_body(lead: &Lead, assignment: &Assignment, contact: &CompanyContact) -> String {
    let mut body = String::new();
    let _ = writeln!(body, "Hello {},", contact.display_name);
    let _ = writeln!(
        body,
        "a customer in {} is looking for {} (match #{} with score {}).",
        lead.postal_code, lead.category_id, assignment.rank, assignment.score
    );
    if let Some(note) = lead.note.as_deref().filter(|note| !note.trim().is_empty()) {
        let _ = writeln!(body, "Request: {}", note.trim());
    }
    if let Some(phone) = &lead.phone {
        let _ = writeln!(body, "Phone: {phone}");
    }
    if let Some(email) = &lead.email {
        let _ = writeln!(body, "Email: {email}");
    }
    let _ = write!(body, "Reference: {}", lead.id);
    body
}
