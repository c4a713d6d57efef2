use crate::cli::ServeArgs;
use crate::infra::{engine_from_config, seed_directory, AppState};
use crate::routes::with_lead_routes;
use axum::Extension;
use axum_prometheus::PrometheusMetricLayer;
use lead_dispatch::config::AppConfig;
use lead_dispatch::error::AppError;
use lead_dispatch::telemetry;
use lead_dispatch::workflows::leads::run_claim_reconciler;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

pub(crate) async fn run(mut args: ServeArgs) -> Result<(), AppError> {
    let mut config = AppConfig::load()?;

    if let Some(host) = args.host.take() {
        config.server.host = host;
    }
    if let Some(port) = args.port.take() {
        config.server.port = port;
    }

    telemetry::init(&config.telemetry)?;

    let (prometheus_layer, prometheus_handle) = PrometheusMetricLayer::pair();
    let readiness_flag = Arc::new(std::sync::atomic::AtomicBool::new(false));
    let app_state = AppState {
        readiness: readiness_flag.clone(),
        metrics: Arc::new(prometheus_handle),
    };

    let directory = seed_directory(args.companies_csv.as_deref())?;
    let engine = engine_from_config(&config, directory);

    let shutdown = CancellationToken::new();
    let reconciler = tokio::spawn(run_claim_reconciler(
        engine.controller.notifier().clone(),
        config.dispatch.reconcile_interval,
        shutdown.clone(),
    ));

    let app = with_lead_routes(engine.controller)
        .layer(Extension(app_state))
        .layer(prometheus_layer);

    let addr = config.server.socket_addr()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    readiness_flag.store(true, Ordering::Release);

    info!(
        ?config.environment,
        %addr,
        max_assignments = config.scoring.max_assignments,
        concurrency = config.dispatch.concurrency,
        "lead dispatch service ready"
    );

    let signal = shutdown.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            if let Err(err) = tokio::signal::ctrl_c().await {
                warn!(error = %err, "failed to listen for shutdown signal");
            }
            signal.cancel();
        })
        .await?;

    shutdown.cancel();
    if let Err(err) = reconciler.await {
        warn!(error = %err, "claim reconciler ended abnormally");
    }
    Ok(())
}
