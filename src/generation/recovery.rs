//! Recovery of generations interrupted between storage and settlement
//!
//! A poster stays pending only between image upload and the settlement
//! transaction. Since the debit commits together with the status flip, a
//! pending poster older than the grace period was never charged: its
//! record and image are removed.

use chrono::Utc;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

use crate::object_store::ObjectStore;
use crate::store::{Database, StoreError};

/// Upper bound on the grace period, keeps the cutoff arithmetic in range
const MAX_GRACE: Duration = Duration::from_secs(10 * 365 * 24 * 3600);

/// Result of a reconciliation pass
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconcileReport {
    /// Pending posters older than the grace period
    pub examined: usize,
    /// Records removed
    pub removed: usize,
    /// Images deleted from the object store
    pub objects_deleted: usize,
    /// Per-poster failures; those posters are retried next pass
    pub errors: Vec<String>,
}

/// Remove pending posters created more than `grace` ago
pub async fn reconcile_pending(
    db: &Arc<Database>,
    objects: &dyn ObjectStore,
    grace: Duration,
) -> Result<ReconcileReport, StoreError> {
    let grace = chrono::Duration::from_std(grace.min(MAX_GRACE))
        .unwrap_or_else(|_| chrono::Duration::days(3650));
    let cutoff = Utc::now() - grace;
    let stale = db.call(move |db| db.stale_pending_posters(cutoff)).await?;

    let mut report = ReconcileReport {
        examined: stale.len(),
        ..Default::default()
    };

    for poster in stale {
        // Discard first: if the poster settled in the meantime it stays
        let poster_id = poster.id.clone();
        match db.call(move |db| db.discard_pending_poster(&poster_id)).await {
            Ok(true) => report.removed += 1,
            Ok(false) => continue,
            Err(e) => {
                error!(poster_id = %poster.id, error = %e, "Failed to discard stale poster");
                report.errors.push(format!("{}: {}", poster.id, e));
                continue;
            }
        }

        if let Some(key) = &poster.storage_path {
            match objects.delete(key).await {
                Ok(()) => report.objects_deleted += 1,
                Err(e) => {
                    warn!(poster_id = %poster.id, key = %key, error = %e, "Failed to delete stale image");
                    report.errors.push(format!("{}: {}", poster.id, e));
                }
            }
        }

        warn!(
            user_id = %poster.user_id,
            poster_id = %poster.id,
            created_at = %poster.created_at,
            "Reconciled unsettled poster"
        );
    }

    if report.examined > 0 {
        info!(
            examined = report.examined,
            removed = report.removed,
            objects_deleted = report.objects_deleted,
            "Pending reconciliation finished"
        );
    }
    Ok(report)
}
