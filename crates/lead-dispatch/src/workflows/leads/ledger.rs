use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use super::domain::{
    Actor, Assignment, AssignmentId, CompanyContact, CompanyId, ContactChannel, LeadId, LeadStatus,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommunicationChannel {
    Email,
    Sms,
    Admin,
    System,
}

impl From<ContactChannel> for CommunicationChannel {
    fn from(value: ContactChannel) -> Self {
        match value {
            ContactChannel::Email => CommunicationChannel::Email,
            ContactChannel::Sms => CommunicationChannel::Sms,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryStatus {
    Sent,
    Failed,
}

/// Append-only audit row: one per notification attempt or lead status change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommunicationLog {
    pub id: String,
    pub lead_id: LeadId,
    pub company_id: Option<CompanyId>,
    pub assignment_id: Option<AssignmentId>,
    pub channel: CommunicationChannel,
    pub status: DeliveryStatus,
    pub recipient: String,
    pub subject: String,
    pub metadata: Value,
    pub sent_at: Option<DateTime<Utc>>,
    pub failed_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
}

impl CommunicationLog {
    /// `(previous, new)` for lifecycle rows.
    pub fn status_change(&self) -> Option<(LeadStatus, LeadStatus)> {
        if !matches!(
            self.channel,
            CommunicationChannel::Admin | CommunicationChannel::System
        ) {
            return None;
        }
        let previous =
            serde_json::from_value(self.metadata.get("previous_status")?.clone()).ok()?;
        let new = serde_json::from_value(self.metadata.get("new_status")?.clone()).ok()?;
        Some((previous, new))
    }
}

/// Entry handed to the ledger; the store assigns the id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewCommunication {
    pub lead_id: LeadId,
    pub company_id: Option<CompanyId>,
    pub assignment_id: Option<AssignmentId>,
    pub channel: CommunicationChannel,
    pub status: DeliveryStatus,
    pub recipient: String,
    pub subject: String,
    pub metadata: Value,
    pub sent_at: Option<DateTime<Utc>>,
    pub failed_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
}

impl NewCommunication {
    pub fn lifecycle(
        lead_id: &LeadId,
        previous: LeadStatus,
        new: LeadStatus,
        actor: &Actor,
        note: Option<&str>,
    ) -> Self {
        let channel = match actor {
            Actor::System => CommunicationChannel::System,
            Actor::Admin { .. } => CommunicationChannel::Admin,
        };
        let now = Utc::now();
        let subject = if previous == new {
            format!("lead {lead_id} notes updated")
        } else {
            format!("lead {lead_id} moved {previous} -> {new}")
        };

        Self {
            lead_id: lead_id.clone(),
            company_id: None,
            assignment_id: None,
            channel,
            status: DeliveryStatus::Sent,
            recipient: actor.label(),
            subject,
            metadata: json!({
                "previous_status": previous,
                "new_status": new,
                "actor": actor,
                "note": note,
                "changed_at": now,
            }),
            sent_at: Some(now),
            failed_at: None,
            error_message: None,
        }
    }

    pub fn delivered(
        assignment: &Assignment,
        contact: &CompanyContact,
        subject: &str,
        metadata: Value,
    ) -> Self {
        Self {
            lead_id: assignment.lead_id.clone(),
            company_id: Some(assignment.company_id.clone()),
            assignment_id: Some(assignment.id.clone()),
            channel: contact.channel.into(),
            status: DeliveryStatus::Sent,
            recipient: contact.recipient.clone(),
            subject: subject.to_string(),
            metadata,
            sent_at: Some(Utc::now()),
            failed_at: None,
            error_message: None,
        }
    }

    /// Failed attempt. `contact` is absent when the directory could not resolve one.
    pub fn undelivered(
        assignment: &Assignment,
        contact: Option<&CompanyContact>,
        subject: &str,
        metadata: Value,
        error: impl Into<String>,
    ) -> Self {
        let (channel, recipient) = match contact {
            Some(contact) => (contact.channel.into(), contact.recipient.clone()),
            None => (CommunicationChannel::Email, String::new()),
        };

        Self {
            lead_id: assignment.lead_id.clone(),
            company_id: Some(assignment.company_id.clone()),
            assignment_id: Some(assignment.id.clone()),
            channel,
            status: DeliveryStatus::Failed,
            recipient,
            subject: subject.to_string(),
            metadata,
            sent_at: None,
            failed_at: Some(Utc::now()),
            error_message: Some(error.into()),
        }
    }

    pub fn into_log(self, id: String) -> CommunicationLog {
        CommunicationLog {
            id,
            lead_id: self.lead_id,
            company_id: self.company_id,
            assignment_id: self.assignment_id,
            channel: self.channel,
            status: self.status,
            recipient: self.recipient,
            subject: self.subject,
            metadata: self.metadata,
            sent_at: self.sent_at,
            failed_at: self.failed_at,
            error_message: self.error_message,
        }
    }
}
