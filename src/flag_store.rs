//! A thread-safe in-memory holder for the currently active [`FlagSnapshot`]. Evaluations read
//! the snapshot, refreshes replace it.
use std::sync::{Arc, RwLock};

use crate::flags::FlagSnapshot;

/// `FlagStore` provides concurrent access for readers and writers of the flag snapshot.
///
/// The snapshot itself is immutable and can only be replaced completely. A store that holds `None`
/// has never completed a successful refresh, which is different from a snapshot with no flags.
#[derive(Default)]
pub(crate) struct FlagStore {
    snapshot: RwLock<Option<Arc<FlagSnapshot>>>,
}

impl FlagStore {
    pub fn new() -> Self {
        FlagStore::default()
    }

    /// Get the current snapshot. Returns `None` if flags haven't been loaded yet.
    pub fn get_snapshot(&self) -> Option<Arc<FlagSnapshot>> {
        let snapshot = self
            .snapshot
            .read()
            .expect("thread holding flag snapshot lock should not panic");

        snapshot.clone()
    }

    /// Replace the current snapshot.
    pub fn set_snapshot(&self, snapshot: Arc<FlagSnapshot>) {
        let mut slot = self
            .snapshot
            .write()
            .expect("thread holding flag snapshot lock should not panic");

        *slot = Some(snapshot);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::FlagStore;
    use crate::flags::FlagSnapshot;

    #[test]
    fn can_set_snapshot_from_another_thread() {
        let store = Arc::new(FlagStore::new());

        assert!(store.get_snapshot().is_none());

        {
            let store = store.clone();
            let _ = std::thread::spawn(move || {
                store.set_snapshot(Arc::new(FlagSnapshot::from_definitions(vec![])));
            })
            .join();
        }

        let snapshot = store.get_snapshot().expect("snapshot should be set");
        assert!(snapshot.is_empty());
    }

    #[test]
    fn readers_keep_their_snapshot_after_replacement() {
        let store = FlagStore::new();
        store.set_snapshot(Arc::new(FlagSnapshot::from_definitions(vec![])));
        let before = store.get_snapshot().unwrap();

        store.set_snapshot(Arc::new(FlagSnapshot::from_definitions(vec![])));
        let after = store.get_snapshot().unwrap();

        assert!(!Arc::ptr_eq(&before, &after));
    }
}
