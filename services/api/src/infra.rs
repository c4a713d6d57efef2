use std::collections::HashSet;
use std::path::Path;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use async_trait::async_trait;
use lead_dispatch::config::{AppConfig, DispatchConfig};
use lead_dispatch::error::AppError;
use lead_dispatch::workflows::leads::{
    load_directory, load_directory_file, InMemoryAssignmentStore, InMemoryCommunicationLedger,
    InMemoryCompanyDirectory, InMemoryConsentLedger, InMemoryLeadRepository,
    LeadLifecycleController, LeadNotification, LeadStores, NotificationTransport, ScoringConfig,
    TransportError,
};
use metrics_exporter_prometheus::PrometheusHandle;
use tracing::info;

/// Sample directory used by the demo and by `serve` when no export is given.
pub(crate) const SAMPLE_DIRECTORY_CSV: &str = "\
id,tenant_id,name,active,categories,postal_codes,latitude,longitude,radius_km,company_score,contact_channel,contact_recipient
C1,t1,Cuvelier Plomberie,true,plumbing,67500,,,,60,email,contact@cuvelier.example
C2,t1,Rhin Sanitaire,true,plumbing,67000;67500,,,,100,email,leads@rhin-sanitaire.example
C3,t1,Alsace Chauffage,true,plumbing.heating,67000;67500,,,,0,sms,+33388000003
C4,t1,Paris Depannage,true,plumbing,75001,,,,90,email,jobs@paris-depannage.example
";

#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) readiness: Arc<AtomicBool>,
    pub(crate) metrics: Arc<PrometheusHandle>,
}

/// Transport that writes notifications to the log instead of an SMTP/SMS gateway.
///
/// Recipients listed in `rejected` fail, which lets the demo show partial delivery.
#[derive(Debug, Default)]
pub(crate) struct LoggingTransport {
    rejected: HashSet<String>,
}

impl LoggingTransport {
    pub(crate) fn rejecting<I, S>(recipients: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            rejected: recipients.into_iter().map(Into::into).collect(),
        }
    }
}

#[async_trait]
impl NotificationTransport for LoggingTransport {
    async fn send(&self, notification: &LeadNotification) -> Result<(), TransportError> {
        if self.rejected.contains(&notification.recipient) {
            return Err(TransportError::Rejected(notification.recipient.clone()));
        }
        info!(
            lead_id = %notification.lead_id,
            company_id = %notification.company_id,
            channel = ?notification.channel,
            recipient = %notification.recipient,
            subject = %notification.subject,
            "notification delivered"
        );
        Ok(())
    }
}

/// Loads the company directory from `path`, or the bundled sample when none is given.
pub(crate) fn seed_directory(path: Option<&Path>) -> Result<InMemoryCompanyDirectory, AppError> {
    let directory = InMemoryCompanyDirectory::default();
    match path {
        Some(path) => {
            load_directory_file(path, &directory)?;
        }
        None => {
            let loaded = load_directory(SAMPLE_DIRECTORY_CSV.as_bytes(), &directory)?;
            info!(loaded, "sample company directory loaded");
        }
    }
    Ok(directory)
}

/// Stores backing one controller; kept so callers can inspect the ledger afterwards.
pub(crate) struct LeadEngine {
    pub(crate) controller: Arc<LeadLifecycleController>,
    pub(crate) ledger: InMemoryCommunicationLedger,
}

pub(crate) fn build_engine(
    directory: InMemoryCompanyDirectory,
    transport: Arc<dyn NotificationTransport>,
    scoring: ScoringConfig,
    dispatch: DispatchConfig,
) -> LeadEngine {
    let ledger = InMemoryCommunicationLedger::default();
    let stores = LeadStores {
        leads: Arc::new(InMemoryLeadRepository::default()),
        assignments: Arc::new(InMemoryAssignmentStore::default()),
        ledger: Arc::new(ledger.clone()),
        directory: Arc::new(directory),
        consent: Arc::new(InMemoryConsentLedger::default()),
    };
    let controller = Arc::new(LeadLifecycleController::new(
        stores, transport, scoring, dispatch,
    ));
    LeadEngine { controller, ledger }
}

pub(crate) fn engine_from_config(
    config: &AppConfig,
    directory: InMemoryCompanyDirectory,
) -> LeadEngine {
    build_engine(
        directory,
        Arc::new(LoggingTransport::default()),
        config.scoring,
        config.dispatch,
    )
}
