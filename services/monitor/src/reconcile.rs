//! Per-candidate reconciliation: registry lookup, display notification and
//! audit log append.

use crate::notifier::Notifier;
use crate::store::{AuditLog, NewLogEntry, PaymentRegistry, PaymentStatus};
use std::sync::Arc;
use tracing::{info, instrument, warn};

/// Where a resolved payment status came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusSource {
    /// The registry holds a row for the plate.
    Registry,
    /// The plate is not registered; treated as unpaid.
    NotRegistered,
    /// The lookup itself failed; treated as unpaid.
    LookupFailed,
}

impl StatusSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            StatusSource::Registry => "registry",
            StatusSource::NotRegistered => "not_registered",
            StatusSource::LookupFailed => "lookup_failed",
        }
    }
}

/// Result of reconciling one accepted candidate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconcileOutcome {
    pub plate: String,
    pub status: PaymentStatus,
    pub source: StatusSource,
    /// Whether the display acknowledged the notification
    pub notified: bool,
    /// Id of the appended log row, if the append succeeded
    pub log_id: Option<i64>,
}

/// Resolves a plate's payment status and records the detection.
pub struct Reconciler {
    registry: Arc<dyn PaymentRegistry>,
    audit_log: Arc<dyn AuditLog>,
    notifier: Arc<dyn Notifier>,
}

impl Reconciler {
    pub fn new(
        registry: Arc<dyn PaymentRegistry>,
        audit_log: Arc<dyn AuditLog>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            registry,
            audit_log,
            notifier,
        }
    }

    /// Reconcile one plate. Never fails: notification and append errors are
    /// reported and reflected in the outcome, and one does not undo the other.
    #[instrument(skip(self, snapshot_path))]
    pub async fn reconcile(
        &self,
        plate: &str,
        timestamp: i64,
        snapshot_path: &str,
    ) -> ReconcileOutcome {
        let (status, source) = match self.registry.lookup(plate).await {
            Ok(Some(status)) => (status, StatusSource::Registry),
            Ok(None) => (PaymentStatus::Unpaid, StatusSource::NotRegistered),
            Err(e) => {
                warn!(plate, error = %e, "Registry lookup failed, treating plate as unpaid");
                (PaymentStatus::Unpaid, StatusSource::LookupFailed)
            }
        };

        let notified = match self.notifier.notify(plate, status).await {
            Ok(()) => {
                metrics::counter!("parkwatch.notifications", "result" => "delivered")
                    .increment(1);
                true
            }
            Err(e) => {
                metrics::counter!("parkwatch.notifications", "result" => e.kind()).increment(1);
                warn!(plate, status = %status, kind = e.kind(), error = %e, "Display notification failed");
                false
            }
        };

        let entry = NewLogEntry {
            plate: plate.to_string(),
            timestamp,
            payment_status: status,
            snapshot_path: snapshot_path.to_string(),
        };
        let log_id = match self.audit_log.append(&entry).await {
            Ok(id) => Some(id),
            Err(e) => {
                warn!(plate, timestamp, error = %e, "Failed to append parking log entry");
                None
            }
        };

        info!(
            plate,
            status = %status,
            source = source.as_str(),
            notified,
            logged = log_id.is_some(),
            "Vehicle reconciled"
        );

        ReconcileOutcome {
            plate: plate.to_string(),
            status,
            source,
            notified,
            log_id,
        }
    }
}
