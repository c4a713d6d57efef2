use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio_util::sync::CancellationToken;

use super::common::*;
use crate::config::DispatchConfig;
use crate::workflows::leads::dispatch::{DispatchNotifier, DispatchSummary};
use crate::workflows::leads::domain::{AssignmentStatus, CompanyId, LeadStatus};
use crate::workflows::leads::ledger::{CommunicationChannel, DeliveryStatus};
use crate::workflows::leads::memory::{
    InMemoryCommunicationLedger, InMemoryCompanyDirectory, InMemoryConsentLedger,
    InMemoryLeadRepository,
};
use crate::workflows::leads::reconciler::run_claim_reconciler;
use crate::workflows::leads::repository::{AssignmentStore, RepositoryError};

fn qualified(harness: &Harness) -> crate::workflows::leads::domain::Lead {
    let lead = harness.controller.intake(new_lead()).expect("intake");
    harness
        .controller
        .qualify(&lead.id)
        .expect("qualify")
        .lead
}

#[tokio::test]
async fn partial_failure_is_isolated_per_assignment() {
    let transport = Arc::new(ScriptedTransport::failing_for(&["C1"]));
    let harness = harness(transport.clone());
    let lead = qualified(&harness);

    let summary = harness
        .controller
        .notifier()
        .dispatch(&lead)
        .await
        .expect("dispatch");

    assert_eq!(
        summary,
        DispatchSummary {
            total: 3,
            notified: 2,
            failed: 1,
            skipped: 0,
        }
    );
    assert_eq!(
        harness.assignment_for(&lead.id, "C1").status,
        AssignmentStatus::Failed
    );
    assert_eq!(
        harness.assignment_for(&lead.id, "C2").status,
        AssignmentStatus::Notified
    );
    assert_eq!(transport.sent().len(), 3);

    let attempts: Vec<_> = harness
        .ledger
        .entries()
        .into_iter()
        .filter(|entry| entry.assignment_id.is_some())
        .collect();
    assert_eq!(attempts.len(), 3);
    let failed = attempts
        .iter()
        .find(|entry| entry.status == DeliveryStatus::Failed)
        .expect("failed attempt logged");
    assert_eq!(failed.company_id, Some(CompanyId("C1".to_string())));
    assert_eq!(failed.channel, CommunicationChannel::Email);
    assert!(failed
        .error_message
        .as_deref()
        .is_some_and(|message| message.contains("c1@example.test")));
    assert!(failed.failed_at.is_some() && failed.sent_at.is_none());
}

#[tokio::test]
async fn second_dispatch_sends_nothing() {
    let transport = Arc::new(ScriptedTransport::default());
    let harness = harness(transport.clone());
    let lead = qualified(&harness);
    let notifier = harness.controller.notifier();

    let first = notifier.dispatch(&lead).await.expect("first");
    let second = notifier.dispatch(&lead).await.expect("second");

    assert_eq!(first.notified, 3);
    assert_eq!(second, DispatchSummary::default());
    assert_eq!(transport.sent().len(), 3);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_dispatch_notifies_each_assignment_once() {
    let transport = Arc::new(ScriptedTransport::slow(Duration::from_millis(20)));
    let harness = harness(transport.clone());
    let lead = qualified(&harness);

    let runs: Vec<_> = (0..4)
        .map(|_| {
            let notifier = harness.controller.notifier().clone();
            let lead = lead.clone();
            tokio::spawn(async move { notifier.dispatch(&lead).await })
        })
        .collect();

    let mut notified = 0;
    let mut skipped = 0;
    for run in runs {
        let summary = run.await.expect("join").expect("dispatch");
        assert_eq!(summary.total, summary.notified + summary.failed);
        notified += summary.notified;
        skipped += summary.skipped;
    }

    assert_eq!(notified, 3);
    assert!(skipped <= 9);
    for assignment in harness.assignments.for_lead(&lead.id).expect("read") {
        assert_eq!(assignment.status, AssignmentStatus::Notified);
        assert_eq!(transport.sends_to(&assignment.id), 1);
    }
    let attempts = harness
        .ledger
        .entries()
        .into_iter()
        .filter(|entry| entry.assignment_id.is_some())
        .count();
    assert_eq!(attempts, 3);
}

#[tokio::test]
async fn timeouts_are_recorded_as_failures() {
    let transport = Arc::new(ScriptedTransport::slow(Duration::from_millis(500)));
    let harness = harness_with(
        transport,
        DispatchConfig {
            notification_timeout: Duration::from_millis(20),
            ..dispatch_config()
        },
    );
    let lead = qualified(&harness);

    let summary = harness
        .controller
        .notifier()
        .dispatch(&lead)
        .await
        .expect("dispatch");

    assert_eq!(summary.failed, 3);
    assert!(harness.ledger.entries().iter().any(|entry| entry
        .error_message
        .as_deref()
        .is_some_and(|message| message.contains("timed out"))));
}

#[tokio::test]
async fn missing_contact_and_withheld_consent_fail_without_sending() {
    let transport = Arc::new(ScriptedTransport::default());
    let harness = harness(transport.clone());
    let lead = qualified(&harness);

    let c2 = scenario_companies().remove(1);
    harness
        .directory
        .upsert(c2, None)
        .expect("drop contact for C2");
    harness
        .consent
        .opt_out(CompanyId("C3".to_string()))
        .expect("opt out C3");

    let summary = harness
        .controller
        .notifier()
        .dispatch(&lead)
        .await
        .expect("dispatch");

    assert_eq!(summary.notified, 1);
    assert_eq!(summary.failed, 2);
    assert_eq!(transport.sent().len(), 1);
    assert_eq!(transport.sent()[0].company_id, CompanyId("C1".to_string()));
    assert_eq!(
        harness.assignment_for(&lead.id, "C3").status,
        AssignmentStatus::Failed
    );
}

#[tokio::test]
async fn fan_out_never_exceeds_the_concurrency_bound() {
    let transport = Arc::new(ScriptedTransport::slow(Duration::from_millis(30)));
    let harness = harness_with(
        transport.clone(),
        DispatchConfig {
            concurrency: 1,
            ..dispatch_config()
        },
    );
    let lead = qualified(&harness);

    let summary = harness
        .controller
        .notifier()
        .dispatch(&lead)
        .await
        .expect("dispatch");

    assert_eq!(summary.notified, 3);
    assert_eq!(transport.peak_in_flight(), 1);
}

#[tokio::test]
async fn panicked_task_is_recorded_as_a_failed_attempt() {
    let harness = harness(Arc::new(PanickingTransport {
        recipient: recipient("C2"),
    }));
    let lead = qualified(&harness);

    let summary = harness
        .controller
        .notifier()
        .dispatch(&lead)
        .await
        .expect("dispatch");

    assert_eq!(summary.notified, 2);
    assert_eq!(summary.failed, 1);
    let c2 = harness.assignment_for(&lead.id, "C2");
    assert_eq!(c2.status, AssignmentStatus::Failed);

    let rows: Vec<_> = harness
        .ledger
        .entries()
        .into_iter()
        .filter(|entry| entry.assignment_id.as_ref() == Some(&c2.id))
        .collect();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].status, DeliveryStatus::Failed);
    assert_eq!(rows[0].recipient, recipient("C2"));
    assert_eq!(
        rows[0].error_message.as_deref(),
        Some("notification task panicked")
    );

    let notifier = harness.controller.notifier();
    assert_eq!(notifier.requeue_failed(&lead).expect("requeue"), 1);
}

#[tokio::test]
async fn spam_override_mid_dispatch_stops_remaining_sends() {
    let leads = InMemoryLeadRepository::default();
    let transport = Arc::new(SpamFlaggingTransport::new(leads.clone()));
    let harness = harness_over(
        leads,
        transport.clone(),
        DispatchConfig {
            concurrency: 1,
            ..dispatch_config()
        },
    );
    let lead = qualified(&harness);

    let summary = harness
        .controller
        .notifier()
        .dispatch(&lead)
        .await
        .expect("dispatch");

    assert_eq!(transport.sends(), 1);
    assert_eq!(
        summary,
        DispatchSummary {
            total: 1,
            notified: 1,
            failed: 0,
            skipped: 2,
        }
    );
    let statuses: Vec<AssignmentStatus> = harness
        .assignments
        .for_lead(&lead.id)
        .expect("read")
        .into_iter()
        .map(|assignment| assignment.status)
        .collect();
    assert_eq!(
        statuses
            .iter()
            .filter(|status| **status == AssignmentStatus::Sent)
            .count(),
        2
    );
    let attempts = harness
        .ledger
        .entries()
        .into_iter()
        .filter(|entry| entry.assignment_id.is_some())
        .count();
    assert_eq!(attempts, 1);
}

#[tokio::test]
async fn stale_claims_are_returned_to_sent() {
    let harness = harness(Arc::new(ScriptedTransport::default()));
    let lead = qualified(&harness);
    let stuck = harness.assignment_for(&lead.id, "C1");
    harness
        .assignments
        .try_claim(&stuck.id, AssignmentStatus::Sent, AssignmentStatus::Dispatching)
        .expect("claim");

    let notifier = harness.controller.notifier();
    assert_eq!(notifier.reconcile_stale_claims(Utc::now()).expect("sweep"), 0);

    let later = Utc::now() + chrono::Duration::seconds(10);
    assert_eq!(notifier.reconcile_stale_claims(later).expect("sweep"), 1);
    assert_eq!(
        harness.assignment_for(&lead.id, "C1").status,
        AssignmentStatus::Sent
    );
}

#[tokio::test]
async fn reconciler_loop_sweeps_until_cancelled() {
    let harness = harness_with(
        Arc::new(ScriptedTransport::default()),
        DispatchConfig {
            notification_timeout: Duration::from_millis(1),
            claim_ttl: Duration::from_millis(2),
            reconcile_interval: Duration::from_millis(10),
            concurrency: 2,
        },
    );
    let lead = qualified(&harness);
    let stuck = harness.assignment_for(&lead.id, "C2");
    harness
        .assignments
        .try_claim(&stuck.id, AssignmentStatus::Sent, AssignmentStatus::Dispatching)
        .expect("claim");

    let cancel = CancellationToken::new();
    let sweep = tokio::spawn(run_claim_reconciler(
        harness.controller.notifier().clone(),
        Duration::from_millis(10),
        cancel.clone(),
    ));

    tokio::time::sleep(Duration::from_millis(80)).await;
    cancel.cancel();
    sweep.await.expect("reconciler stops");

    assert_eq!(
        harness.assignment_for(&lead.id, "C2").status,
        AssignmentStatus::Sent
    );
}

#[tokio::test]
async fn requeue_moves_only_failed_assignments() {
    let harness = harness(Arc::new(ScriptedTransport::failing_for(&["C1", "C3"])));
    let lead = qualified(&harness);
    let notifier = harness.controller.notifier();
    notifier.dispatch(&lead).await.expect("dispatch");

    assert_eq!(notifier.requeue_failed(&lead).expect("requeue"), 2);
    assert_eq!(
        harness.assignment_for(&lead.id, "C1").status,
        AssignmentStatus::Sent
    );
    assert_eq!(
        harness.assignment_for(&lead.id, "C2").status,
        AssignmentStatus::Notified
    );
    assert_eq!(lead.status, LeadStatus::Assigned);
}

#[tokio::test]
async fn unreadable_assignment_set_is_an_error() {
    let notifier = DispatchNotifier::new(
        Arc::new(InMemoryLeadRepository::default()),
        Arc::new(UnavailableAssignmentStore),
        Arc::new(InMemoryCommunicationLedger::default()),
        Arc::new(InMemoryCompanyDirectory::default()),
        Arc::new(InMemoryConsentLedger::default()),
        Arc::new(ScriptedTransport::default()),
        dispatch_config(),
    );

    let result = notifier.dispatch(&lead_l1()).await;

    assert!(matches!(result, Err(RepositoryError::Unavailable(_))));
}
