use crate::infra::{build_engine, seed_directory, LoggingTransport};
use chrono::Utc;
use clap::Args;
use lead_dispatch::config::DispatchConfig;
use lead_dispatch::error::AppError;
use lead_dispatch::workflows::leads::{
    Actor, CommunicationLog, LeadId, LeadLifecycleController, LeadStatus, NewLead, ScoringConfig,
    TenantId, UpdateLeadStatus,
};
use std::path::PathBuf;
use std::sync::Arc;

const DEMO_REJECTED_RECIPIENT: &str = "contact@cuvelier.example";

#[derive(Args, Debug)]
pub(crate) struct DemoArgs {
    /// Company directory CSV export. Defaults to the bundled sample directory.
    #[arg(long)]
    pub(crate) companies_csv: Option<PathBuf>,
    /// Tenant that receives the demo lead.
    #[arg(long, default_value = "t1")]
    pub(crate) tenant: String,
    /// Requested service category.
    #[arg(long, default_value = "plumbing")]
    pub(crate) category: String,
    /// Postal code of the job.
    #[arg(long, default_value = "67500")]
    pub(crate) postal_code: String,
    /// Recipients the demo transport refuses; repeat to reject several.
    #[arg(long = "reject", default_values_t = [DEMO_REJECTED_RECIPIENT.to_string()])]
    pub(crate) rejected: Vec<String>,
    /// Mark a second lead as spam after qualification to show the admin override.
    #[arg(long)]
    pub(crate) include_spam: bool,
    /// Print the communication ledger as JSON instead of a table.
    #[arg(long)]
    pub(crate) json: bool,
}

pub(crate) async fn run_demo(args: DemoArgs) -> Result<(), AppError> {
    let DemoArgs {
        companies_csv,
        tenant,
        category,
        postal_code,
        rejected,
        include_spam,
        json,
    } = args;

    let directory = seed_directory(companies_csv.as_deref())?;
    let companies = directory.len();
    let engine = build_engine(
        directory,
        Arc::new(LoggingTransport::rejecting(rejected.iter().cloned())),
        ScoringConfig::default(),
        DispatchConfig::default(),
    );
    let controller = engine.controller;

    println!("Lead dispatch demo ({})", Utc::now().format("%Y-%m-%d %H:%M UTC"));
    println!("- {} companies in the directory", companies);
    if !rejected.is_empty() {
        println!("- transport rejects: {}", rejected.join(", "));
    }

    let request = NewLead {
        tenant_id: TenantId(tenant),
        category_id: category,
        postal_code,
        location: None,
        phone: Some("+33 3 88 00 00 00".to_string()),
        email: Some("customer@example.test".to_string()),
        note: Some("Water heater leaking in the basement".to_string()),
    };

    let Some(lead_id) = run_lead(&controller, request.clone()).await else {
        return Ok(());
    };

    if include_spam {
        demonstrate_spam_override(&controller, request).await;
    }

    println!("\nCommunication ledger for {}", lead_id);
    let detail = match controller.get(&lead_id) {
        Ok(detail) => detail,
        Err(err) => {
            println!("  Ledger unavailable: {}", err);
            return Ok(());
        }
    };
    if json {
        match serde_json::to_string_pretty(&detail.communications) {
            Ok(rendered) => println!("{}", rendered),
            Err(err) => println!("  Could not render ledger: {}", err),
        }
    } else {
        for entry in &detail.communications {
            println!("  {}", describe_entry(entry));
        }
    }

    println!(
        "\nLedger holds {} rows across every lead in this run",
        engine.ledger.entries().len()
    );
    Ok(())
}

async fn run_lead(controller: &LeadLifecycleController, request: NewLead) -> Option<LeadId> {
    let lead = match controller.intake(request) {
        Ok(lead) => lead,
        Err(err) => {
            println!("  Intake rejected: {}", err);
            return None;
        }
    };
    println!(
        "\nReceived lead {} ({} in {}) -> status {}",
        lead.id, lead.category_id, lead.postal_code, lead.status
    );

    let qualified = match controller.qualify(&lead.id) {
        Ok(qualified) => qualified,
        Err(err) => {
            println!("  Qualification stopped: {}", err);
            return Some(lead.id);
        }
    };
    println!("Ranked companies:");
    for assignment in &qualified.assignments {
        println!(
            "  #{} {} (score {})",
            assignment.rank, assignment.company_id, assignment.score
        );
    }

    let report = match controller.dispatch(&lead.id).await {
        Ok(report) => report,
        Err(err) => {
            println!("  Dispatch unavailable: {}", err);
            return Some(lead.id);
        }
    };
    println!("Dispatch: {}", report.message);
    println!(
        "  total {} | notified {} | failed {} | skipped {}",
        report.summary.total,
        report.summary.notified,
        report.summary.failed,
        report.summary.skipped
    );
    for assignment in &report.assignments {
        println!("  - {}: {}", assignment.company_id, assignment.status);
    }

    Some(lead.id)
}

async fn demonstrate_spam_override(controller: &LeadLifecycleController, request: NewLead) {
    println!("\nAdmin override demo");
    let lead = match controller
        .intake(request)
        .and_then(|lead| controller.qualify(&lead.id))
    {
        Ok(qualified) => qualified.lead,
        Err(err) => {
            println!("  Second lead unavailable: {}", err);
            return;
        }
    };

    let update = UpdateLeadStatus {
        status: Some(LeadStatus::Spam),
        notes: Some("duplicate submission".to_string()),
    };
    match controller.update_status(&lead.id, update, &Actor::admin("demo-moderator")) {
        Ok(updated) => println!("- {} marked {} by demo-moderator", updated.id, updated.status),
        Err(err) => {
            println!("  Override rejected: {}", err);
            return;
        }
    }

    match controller.dispatch(&lead.id).await {
        Ok(report) => println!("  Unexpected dispatch: {}", report.message),
        Err(err) => println!("  Dispatch refused: {}", err),
    }
}

fn describe_entry(entry: &CommunicationLog) -> String {
    if let Some((previous, next)) = entry.status_change() {
        return format!("[lifecycle] {} -> {} by {}", previous, next, entry.recipient);
    }

    let company = entry
        .company_id
        .as_ref()
        .map(ToString::to_string)
        .unwrap_or_else(|| "-".to_string());
    match &entry.error_message {
        Some(reason) => format!(
            "[{:?}] {} {:?} to {} ({})",
            entry.channel, company, entry.status, entry.recipient, reason
        ),
        None => format!(
            "[{:?}] {} {:?} to {}",
            entry.channel, company, entry.status, entry.recipient
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lead_dispatch::workflows::leads::{CommunicationChannel, CompanyId, DeliveryStatus};
    use serde_json::json;

    fn entry(status: DeliveryStatus, error_message: Option<&str>) -> CommunicationLog {
        CommunicationLog {
            id: "comm-000001".to_string(),
            lead_id: LeadId("lead-000001".to_string()),
            company_id: Some(CompanyId("C1".to_string())),
            assignment_id: None,
            channel: CommunicationChannel::Email,
            status,
            recipient: DEMO_REJECTED_RECIPIENT.to_string(),
            subject: "New plumbing request in 67500".to_string(),
            metadata: json!({}),
            sent_at: None,
            failed_at: None,
            error_message: error_message.map(str::to_string),
        }
    }

    #[test]
    fn failed_rows_show_the_reason() {
        let line = describe_entry(&entry(DeliveryStatus::Failed, Some("recipient rejected")));
        assert!(line.contains("C1"));
        assert!(line.ends_with("(recipient rejected)"));
    }

    #[test]
    fn sent_rows_have_no_reason() {
        let line = describe_entry(&entry(DeliveryStatus::Sent, None));
        assert!(line.contains(DEMO_REJECTED_RECIPIENT));
        assert!(!line.contains('('));
    }
}
