//! Snapshot diffing
//!
//! Devices return their whole history on every poll. This is where a
//! snapshot becomes the list of punches nobody has reported yet.

use crate::key::LogKey;
use crate::model::AttendanceLog;
use crate::traits::LogStore;

/// Claim every punch in `logs` that no session has reported yet
///
/// Device order is preserved. Entries whose key is processed, claimed by
/// another session, or repeated earlier in the same snapshot are dropped.
/// Every returned key is claimed in `store` and must be committed with
/// [`LogStore::add_and_persist`] once the punch has been reported.
pub fn claim_unseen(logs: Vec<AttendanceLog>, store: &dyn LogStore) -> Vec<(LogKey, AttendanceLog)> {
    logs.into_iter()
        .filter_map(|log| {
            let key = LogKey::of(&log);
            store.claim(&key).then_some((key, log))
        })
        .collect()
}
