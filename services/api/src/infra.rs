use chrono::{DateTime, NaiveDate, Utc};
use metrics_exporter_prometheus::PrometheusHandle;
use rideshare_kyc::config::AppEnvironment;
use rideshare_kyc::verification::{
    AuditRecord, AuditSink, BlobStore, Clock, InMemoryVerificationStore, Notifier, NotifyError,
    StorageError, StoreError, VerificationEvent,
};
use std::fs;
use std::path::{Component, Path, PathBuf};
use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Mutex};
use tracing::{info, warn};

/// Insurers offered on the insurance form until an admin surface manages them.
pub(crate) const DEFAULT_INSURERS: &[&str] = &[
    "Harbor Assurance",
    "Northwind Mutual",
    "Crescent Motor Insurance",
];

#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) readiness: Arc<AtomicBool>,
    pub(crate) metrics: Arc<PrometheusHandle>,
}

/// Writes evidence below a root directory, one file per object key.
#[derive(Debug, Clone)]
pub(crate) struct FilesystemBlobStore {
    root: PathBuf,
}

impl FilesystemBlobStore {
    pub(crate) fn new(root: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    fn resolve(&self, key: &str) -> Result<PathBuf, StorageError> {
        let relative = Path::new(key);
        let plain = relative
            .components()
            .all(|component| matches!(component, Component::Normal(_)));
        if key.is_empty() || !plain {
            return Err(StorageError::Backend(format!("refusing object key '{key}'")));
        }
        Ok(self.root.join(relative))
    }
}

impl BlobStore for FilesystemBlobStore {
    fn put(&self, bytes: &[u8], key: &str) -> Result<String, StorageError> {
        let path = self.resolve(key)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, bytes)?;
        Ok(key.to_string())
    }
}

/// Emits status changes as structured log lines for downstream shippers.
#[derive(Debug, Default, Clone, Copy)]
pub(crate) struct TracingNotifier;

impl Notifier for TracingNotifier {
    fn publish(&self, event: VerificationEvent) -> Result<(), NotifyError> {
        info!(
            template = event.template(),
            kind = event.document.kind.label(),
            document = event.document.id.0,
            owner = event.owner.0,
            status = ?event.status,
            reason = event.failure_reason.as_deref().unwrap_or(""),
            actor = %event.actor,
            "verification status changed"
        );
        Ok(())
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub(crate) struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    fn record(&self, entry: AuditRecord) {
        warn!(
            code = entry.code,
            origin = entry.origin,
            occurred_at = %entry.occurred_at,
            message = %entry.message,
            "audit"
        );
    }
}

#[derive(Default, Clone)]
pub(crate) struct InMemoryNotifier {
    events: Arc<Mutex<Vec<VerificationEvent>>>,
}

impl Notifier for InMemoryNotifier {
    fn publish(&self, event: VerificationEvent) -> Result<(), NotifyError> {
        let mut guard = self
            .events
            .lock()
            .map_err(|_| NotifyError::Transport("notifier mutex poisoned".to_string()))?;
        guard.push(event);
        Ok(())
    }
}

impl InMemoryNotifier {
    pub(crate) fn events(&self) -> Vec<VerificationEvent> {
        self.events
            .lock()
            .map(|events| events.clone())
            .unwrap_or_default()
    }
}

#[derive(Default, Clone)]
pub(crate) struct InMemoryAuditSink {
    records: Arc<Mutex<Vec<AuditRecord>>>,
}

impl AuditSink for InMemoryAuditSink {
    fn record(&self, entry: AuditRecord) {
        if let Ok(mut records) = self.records.lock() {
            records.push(entry);
        }
    }
}

impl InMemoryAuditSink {
    pub(crate) fn records(&self) -> Vec<AuditRecord> {
        self.records
            .lock()
            .map(|records| records.clone())
            .unwrap_or_default()
    }
}

/// Clock pinned to one instant so scripted runs are reproducible.
#[derive(Debug, Clone, Copy)]
pub(crate) struct PinnedClock(pub(crate) DateTime<Utc>);

impl Clock for PinnedClock {
    fn now(&self) -> DateTime<Utc> {
        self.0
    }
}

/// Populate reference rows, plus a demo account outside production.
pub(crate) fn seed_reference_data(
    store: &InMemoryVerificationStore,
    environment: AppEnvironment,
) -> Result<(), StoreError> {
    for name in DEFAULT_INSURERS {
        store.seed_insurer(name)?;
    }
    if environment.seeds_demo_accounts() {
        let user = store.seed_user("+15550100", "Demo", "Driver")?;
        info!(user = user.id.0, "seeded demo driver account");
    }
    Ok(())
}

pub(crate) fn parse_date(raw: &str) -> Result<NaiveDate, String> {
    NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d")
        .map_err(|err| format!("failed to parse '{raw}' as YYYY-MM-DD ({err})"))
}
