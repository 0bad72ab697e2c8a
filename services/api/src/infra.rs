use campus_portal::config::PortalConfig;
use campus_portal::error::AppError;
use campus_portal::workflows::admissions::{
    AdmissionsService, DiskFileStore, InMemoryPortalStore, WorkflowError,
};
use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use tracing::info;

pub(crate) type PortalService = AdmissionsService<InMemoryPortalStore, DiskFileStore>;

#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) readiness: Arc<AtomicBool>,
    pub(crate) metrics: Arc<PrometheusHandle>,
}

/// Opens storage, builds the service and makes sure the configured staff account exists.
pub(crate) fn build_portal(config: &PortalConfig) -> Result<Arc<PortalService>, AppError> {
    let store = match &config.data_file {
        Some(path) => {
            info!(path = %path.display(), "loading portal snapshot");
            InMemoryPortalStore::open(path)?
        }
        None => InMemoryPortalStore::new(),
    };
    let files = DiskFileStore::new(&config.upload_dir).map_err(WorkflowError::from)?;

    let service = AdmissionsService::new(Arc::new(store), Arc::new(files), config.policy());
    let admin = service.ensure_admin(&config.admin_email, "Admissions Office")?;
    info!(admin = %admin.id, email = %admin.email, "staff account available");

    Ok(Arc::new(service))
}
