//! Deletion tracking for records whose archives disappeared

use crate::state::{VerificationRecord, VerificationState, VerifyResult};
use std::collections::HashSet;
use tracing::debug;

/// Mark every record that is neither present on disk nor touched this run as
/// deleted. Returns the keys that changed.
///
/// Keys are kept so the history survives; records already marked deleted
/// are left alone.
pub fn mark_deleted(
    state: &mut VerificationState,
    present: &HashSet<String>,
    touched: &HashSet<String>,
    now: i64,
) -> Vec<String> {
    let mut changed = Vec::new();

    for (key, record) in state.files.iter_mut() {
        if present.contains(key) || touched.contains(key) {
            continue;
        }
        if record.result == VerifyResult::Deleted {
            continue;
        }

        debug!("Marking {} deleted (was {})", key, record.result);
        *record = VerificationRecord::new(VerifyResult::Deleted, now.max(record.timestamp));
        changed.push(key.clone());
    }

    changed
}
