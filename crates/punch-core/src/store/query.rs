//! Read-only queries over processed keys
//!
//! The store only holds keys, but keys decode back to `(user_id, timestamp)`,
//! which is enough to answer "who punched between these two instants".

use chrono::NaiveDateTime;
use std::collections::HashSet;

use crate::traits::LogStore;

/// Processed punches within a closed time range
///
/// `users` restricts the result to the given user ids; `None` means every
/// user. Keys that do not decode are skipped. Results are ordered by time,
/// then user id.
pub fn punches_between(
    store: &dyn LogStore,
    users: Option<&HashSet<String>>,
    from: NaiveDateTime,
    to: NaiveDateTime,
) -> Vec<(String, NaiveDateTime)> {
    let mut hits: Vec<(String, NaiveDateTime)> = store
        .keys()
        .iter()
        .filter_map(|key| key.decode().ok())
        .filter(|(user_id, ts)| {
            *ts >= from && *ts <= to && users.is_none_or(|u| u.contains(user_id))
        })
        .collect();

    hits.sort_by(|a, b| a.1.cmp(&b.1).then_with(|| a.0.cmp(&b.0)));
    hits
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key::LogKey;
    use crate::store::MemoryLogStore;
    use chrono::NaiveDate;

    fn at(day: u32, h: u32, m: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 3, day)
            .unwrap()
            .and_hms_opt(h, m, 0)
            .unwrap()
    }

    fn store() -> MemoryLogStore {
        MemoryLogStore::with_keys([
            LogKey::encode("1", at(1, 8, 0)),
            LogKey::encode("2", at(1, 8, 0)),
            LogKey::encode("1", at(1, 17, 30)),
            LogKey::encode("3", at(2, 8, 15)),
            LogKey::from("legacy".to_string()),
        ])
    }

    #[test]
    fn range_is_inclusive_and_sorted() {
        let hits = punches_between(&store(), None, at(1, 8, 0), at(1, 17, 30));
        assert_eq!(
            hits,
            vec![
                ("1".to_string(), at(1, 8, 0)),
                ("2".to_string(), at(1, 8, 0)),
                ("1".to_string(), at(1, 17, 30)),
            ]
        );
    }

    #[test]
    fn user_filter_applies() {
        let users = HashSet::from(["1".to_string(), "3".to_string()]);
        let hits = punches_between(&store(), Some(&users), at(1, 0, 0), at(2, 23, 59));
        let ids: Vec<&str> = hits.iter().map(|(u, _)| u.as_str()).collect();
        assert_eq!(ids, vec!["1", "1", "3"]);
    }

    #[test]
    fn empty_user_filter_matches_nothing() {
        let users = HashSet::new();
        assert!(punches_between(&store(), Some(&users), at(1, 0, 0), at(2, 23, 59)).is_empty());
    }
}
