//! Append-only log of configuration snapshots. Snapshots are never mutated;
//! the most recent one is current.

use std::sync::Arc;

use chrono::Utc;
use parking_lot::RwLock;
use rewards_core::thresholds::{Draft, Snapshot};
use rewards_core::LoyaltyResult;
use tracing::info;

pub trait SnapshotStore<T>: Send + Sync {
    fn latest(&self) -> LoyaltyResult<Option<Arc<Snapshot<T>>>>;

    /// Current snapshot, creating the first one from `init` if the log is
    /// empty. Creation happens at most once.
    fn latest_or_init(&self, init: &dyn Fn() -> Draft<T>) -> LoyaltyResult<Arc<Snapshot<T>>>;

    fn append(&self, draft: Draft<T>) -> LoyaltyResult<Arc<Snapshot<T>>>;

    fn get(&self, version: u64) -> LoyaltyResult<Option<Arc<Snapshot<T>>>>;

    /// All snapshots, oldest first.
    fn history(&self) -> LoyaltyResult<Vec<Arc<Snapshot<T>>>>;
}

pub struct InMemorySnapshotStore<T> {
    name: &'static str,
    log: RwLock<Vec<Arc<Snapshot<T>>>>,
}

impl<T> InMemorySnapshotStore<T> {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            log: RwLock::new(Vec::new()),
        }
    }

    fn push(&self, log: &mut Vec<Arc<Snapshot<T>>>, draft: Draft<T>) -> Arc<Snapshot<T>> {
        let now = Utc::now();
        let (version, created_at) = match log.last() {
            // Keep timestamps non-decreasing so "most recent" agrees with version order.
            Some(last) => (last.version + 1, now.max(last.created_at)),
            None => (1, now),
        };
        let snapshot = Arc::new(Snapshot {
            version,
            settings: draft.settings,
            created_at,
            updated_by: draft.updated_by,
            notes: draft.notes,
        });
        log.push(snapshot.clone());
        info!(store = self.name, version, "Snapshot appended");
        snapshot
    }
}

impl<T: Send + Sync> SnapshotStore<T> for InMemorySnapshotStore<T> {
    fn latest(&self) -> LoyaltyResult<Option<Arc<Snapshot<T>>>> {
        Ok(self.log.read().last().cloned())
    }

    fn latest_or_init(&self, init: &dyn Fn() -> Draft<T>) -> LoyaltyResult<Arc<Snapshot<T>>> {
        if let Some(latest) = self.log.read().last() {
            return Ok(latest.clone());
        }
        let mut log = self.log.write();
        if let Some(latest) = log.last() {
            return Ok(latest.clone());
        }
        Ok(self.push(&mut log, init()))
    }

    fn append(&self, draft: Draft<T>) -> LoyaltyResult<Arc<Snapshot<T>>> {
        let mut log = self.log.write();
        Ok(self.push(&mut log, draft))
    }

    fn get(&self, version: u64) -> LoyaltyResult<Option<Arc<Snapshot<T>>>> {
        Ok(self
            .log
            .read()
            .iter()
            .find(|s| s.version == version)
            .cloned())
    }

    fn history(&self) -> LoyaltyResult<Vec<Arc<Snapshot<T>>>> {
        Ok(self.log.read().clone())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use rewards_core::thresholds::ThresholdSettings;

    fn store() -> InMemorySnapshotStore<ThresholdSettings> {
        InMemorySnapshotStore::new("thresholds")
    }

    #[test]
    fn test_empty_store_has_no_latest() {
        assert!(store().latest().unwrap().is_none());
    }

    #[test]
    fn test_latest_or_init_creates_once() {
        let store = store();
        let first = store
            .latest_or_init(&|| Draft::new(ThresholdSettings::default()))
            .unwrap();
        let second = store
            .latest_or_init(&|| Draft::new(ThresholdSettings::default()))
            .unwrap();
        assert_eq!(first.version, 1);
        assert_eq!(second.version, 1);
        assert_eq!(store.history().unwrap().len(), 1);
    }

    #[test]
    fn test_append_keeps_prior_snapshots_intact() {
        let store = store();
        store
            .append(Draft::new(ThresholdSettings::default()))
            .unwrap();
        let mut changed = ThresholdSettings::default();
        changed.early_access_enabled = true;
        let second = store.append(Draft::new(changed).by("admin-1")).unwrap();

        assert_eq!(second.version, 2);
        assert_eq!(second.updated_by.as_deref(), Some("admin-1"));
        assert!(!store.get(1).unwrap().unwrap().settings.early_access_enabled);
        assert!(store.latest().unwrap().unwrap().settings.early_access_enabled);

        let history = store.history().unwrap();
        assert_eq!(history.len(), 2);
        assert!(history[0].created_at <= history[1].created_at);
    }
}
