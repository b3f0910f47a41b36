use crate::cli::ServeArgs;
use crate::infra::{
    seed_reference_data, AppState, FilesystemBlobStore, TracingAuditSink, TracingNotifier,
};
use crate::routes::with_verification_routes;
use axum::Extension;
use axum_prometheus::PrometheusMetricLayer;
use rideshare_kyc::config::AppConfig;
use rideshare_kyc::telemetry;
use rideshare_kyc::verification::{
    Collaborators, InMemoryVerificationStore, VerificationError, VerificationService,
};
use rideshare_kyc::AppError;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tracing::info;

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

    let store = Arc::new(InMemoryVerificationStore::default());
    seed_reference_data(&store, config.environment).map_err(VerificationError::from)?;
    let blobs = Arc::new(
        FilesystemBlobStore::new(&config.uploads.directory)
            .map_err(VerificationError::UploadFailed)?,
    );
    let service = Arc::new(VerificationService::new(
        store,
        blobs,
        config.uploads.max_upload_bytes,
        Collaborators::system(Arc::new(TracingNotifier), Arc::new(TracingAuditSink)),
    ));

    let app = with_verification_routes(service)
        .layer(Extension(app_state))
        .layer(prometheus_layer);

    let addr = config.server.socket_addr()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    readiness_flag.store(true, Ordering::Release);

    info!(
        ?config.environment,
        %addr,
        uploads = %config.uploads.directory.display(),
        "driver onboarding service ready"
    );

    axum::serve(listener, app).await?;
    Ok(())
}
