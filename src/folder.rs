//! Folder: the per-folder coordinator spec.md §3/§5 describe — it owns a
//! [`FolderSummary`], a [`ChangeInfo`], a weak reference back to its
//! parent [`StoreDb`], and the lock set spec.md §5 assigns to a folder,
//! so callers stop wiring a summary, a change-info, and an adapter
//! together by hand at every call site.

use std::sync::{Arc, Mutex, Weak};

use parking_lot::ReentrantMutex;

use crate::error::{Result, StoreError};
use crate::folder_state::FolderState;
use crate::models::{ChangeInfo, ChangeInfoDiff, MessageInfo, MessageRecord};
use crate::store::StoreDb;
use crate::summary::FolderSummary;

/// Tracks whether a deferred "store changes" sync is already scheduled,
/// per spec.md §4.2's "a change-info whose `uid_changed` is non-empty
/// schedules a deferred store changes job... but never while frozen" note.
/// No timer lives here — this only records the coalesced pending flag an
/// application event loop would drain and act on.
#[derive(Debug, Default)]
struct StoreChangesSchedule {
    pending: bool,
}

/// One folder's coordination point: a recursive user lock serializing the
/// folder's own public operations, a change-info mutex, a property mutex
/// guarding the folder's [`FolderState`], and a store-changes mutex
/// guarding the deferred-sync flag above (spec.md §5).
pub struct Folder {
    name: String,
    store: Weak<StoreDb>,
    summary: FolderSummary,
    change_info: Mutex<ChangeInfo>,
    user_lock: ReentrantMutex<()>,
    property_lock: Mutex<FolderState>,
    store_changes: Mutex<StoreChangesSchedule>,
}

impl Folder {
    /// `store` is held weakly: a `Folder` never keeps its parent `StoreDb`
    /// alive on its own (spec.md §3 "Ownership").
    pub fn new(name: impl Into<String>, store: &Arc<StoreDb>) -> Self {
        let name = name.into();
        Self {
            summary: FolderSummary::new(name.clone()),
            name,
            store: Arc::downgrade(store),
            change_info: Mutex::new(ChangeInfo::new()),
            user_lock: ReentrantMutex::new(()),
            property_lock: Mutex::new(FolderState::default()),
            store_changes: Mutex::new(StoreChangesSchedule::default()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn summary(&self) -> &FolderSummary {
        &self.summary
    }

    fn store(&self) -> Result<Arc<StoreDb>> {
        self.store
            .upgrade()
            .ok_or_else(|| StoreError::Invalid(format!("store for folder {:?} has been dropped", self.name)))
    }

    /// Appends `message` via the summary and raises `uid_added`, reentering
    /// the user lock (spec.md §4.2 `add`, §5 locking). While frozen, the
    /// resulting change folds into the frozen diff instead of sitting in
    /// the live sets a reader might observe mid-batch.
    pub fn add(&self, message: MessageRecord) -> Result<MessageInfo> {
        let _user = self.user_lock.lock();
        let store = self.store()?;
        let mut change_info = self.change_info.lock().unwrap();
        let info = self.summary.add(&store, message, &mut change_info)?;
        self.fold_if_frozen(&mut change_info);
        Ok(info)
    }

    /// `flags = (flags & !mask) | set`, folding into the frozen diff
    /// instead of emitting while frozen (spec.md §4.2 `set_message_flags`).
    pub fn set_message_flags(&self, uid: &str, mask: u32, set: u32) -> Result<bool> {
        let _user = self.user_lock.lock();
        let mut change_info = self.change_info.lock().unwrap();
        let changed = self.summary.set_message_flags(uid, mask, set, &mut change_info);
        if changed {
            self.fold_if_frozen(&mut change_info);
            self.schedule_store_changes(&change_info);
        }
        Ok(changed)
    }

    fn fold_if_frozen(&self, change_info: &mut ChangeInfo) {
        if change_info.is_frozen() {
            change_info.fold_into_frozen();
        }
    }

    /// A non-empty `changed` set schedules the deferred sync, but never
    /// while frozen — thawing is what eventually lets it fire (spec.md
    /// §4.2).
    fn schedule_store_changes(&self, change_info: &ChangeInfo) {
        if change_info.is_frozen() {
            return;
        }
        self.store_changes.lock().unwrap().pending = true;
    }

    /// Whether a deferred store-changes sync is waiting to run. An
    /// application event loop calls this (and clears it via
    /// [`Folder::take_store_changes_pending`]) on its own schedule.
    pub fn store_changes_pending(&self) -> bool {
        self.store_changes.lock().unwrap().pending
    }

    pub fn take_store_changes_pending(&self) -> bool {
        std::mem::take(&mut self.store_changes.lock().unwrap().pending)
    }

    /// Raises the freeze counter; changes made through [`Folder::add`] /
    /// [`Folder::set_message_flags`] while frozen accumulate silently
    /// (spec.md §4.2 "Freeze / thaw").
    pub fn freeze(&self) {
        let _user = self.user_lock.lock();
        self.change_info.lock().unwrap().freeze();
    }

    /// Lowers the freeze counter. At zero, if anything accumulated while
    /// frozen, saves the summary and returns the consolidated diff to
    /// emit as the single "changed" notification spec.md §4.2 describes;
    /// otherwise returns `None`.
    pub fn thaw(&self) -> Result<Option<ChangeInfoDiff>> {
        let _user = self.user_lock.lock();
        let diff = self.change_info.lock().unwrap().thaw();
        let Some(diff) = diff else {
            return Ok(None);
        };
        let store = self.store()?;
        self.summary.save(&store)?;
        self.schedule_store_changes(&self.change_info.lock().unwrap());
        Ok(Some(diff))
    }

    /// Writes every dirty info via the store in one transaction (spec.md
    /// §4.2 `save`), outside of any freeze — callers inside a freeze/thaw
    /// batch get this for free from [`Folder::thaw`] instead.
    pub fn save(&self) -> Result<usize> {
        let _user = self.user_lock.lock();
        let store = self.store()?;
        self.summary.save(&store)
    }

    /// Current per-folder properties (spec.md §6.1), guarded by this
    /// folder's own property mutex rather than the user lock, since
    /// reading a property never needs to serialize against message ops.
    pub fn property(&self, name: &str) -> Option<crate::folder_state::PropertyValue> {
        self.property_lock.lock().unwrap().get(name)
    }

    pub fn set_property(&self, name: impl Into<String>, value: crate::folder_state::PropertyValue) {
        self.property_lock.lock().unwrap().set(name, value);
    }

    /// Replaces this folder's in-memory property set with whatever is on
    /// disk at `path`, tolerating legacy/corrupt files per
    /// [`FolderState::load`].
    pub fn load_properties(&self, path: &std::path::Path) {
        *self.property_lock.lock().unwrap() = FolderState::load(path);
    }

    pub fn save_properties(&self, path: &std::path::Path) -> std::io::Result<()> {
        self.property_lock.lock().unwrap().save(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::folder_state::PropertyValue;
    use crate::models::folder::FolderRecord;
    use tempfile::tempdir;

    fn open_folder(name: &str) -> (Folder, Arc<StoreDb>, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let db = Arc::new(StoreDb::open(dir.path().join("store.db")).unwrap());
        db.write_folder(name, &FolderRecord::zero(name)).unwrap();
        let folder = Folder::new(name, &db);
        (folder, db, dir)
    }

    #[test]
    fn add_raises_added_without_manual_change_info_wiring() {
        let (folder, _db, _dir) = open_folder("Inbox");
        let info = folder.add(MessageRecord::new("")).unwrap();
        assert_eq!(info.record.uid, "1");
    }

    #[test]
    fn dropped_store_surfaces_as_invalid_not_a_panic() {
        let dir = tempdir().unwrap();
        let db = Arc::new(StoreDb::open(dir.path().join("store.db")).unwrap());
        db.write_folder("Inbox", &FolderRecord::zero("Inbox")).unwrap();
        let folder = Folder::new("Inbox", &db);
        drop(db);
        let err = folder.add(MessageRecord::new("")).unwrap_err();
        assert!(matches!(err, StoreError::Invalid(_)));
    }

    #[test]
    fn freeze_thaw_saves_and_returns_consolidated_diff_once() {
        let (folder, _db, _dir) = open_folder("Inbox");
        folder.freeze();
        folder.add(MessageRecord::new("")).unwrap();
        folder.add(MessageRecord::new("")).unwrap();
        assert!(folder.thaw().unwrap().is_some());
    }

    #[test]
    fn nested_freeze_defers_store_changes_scheduling_until_fully_thawed() {
        let (folder, _db, _dir) = open_folder("Inbox");
        folder.freeze();
        folder.freeze();
        folder.add(MessageRecord::new("")).unwrap();
        let info = folder.add(MessageRecord::new("")).unwrap();
        folder.set_message_flags(&info.record.uid, 0, crate::models::message::flags::SEEN).unwrap();
        assert!(!folder.store_changes_pending());
        assert!(folder.thaw().unwrap().is_none());
        assert!(!folder.store_changes_pending());
        let diff = folder.thaw().unwrap();
        assert!(diff.is_some());
    }

    #[test]
    fn property_round_trips_through_the_property_lock() {
        let (folder, _db, _dir) = open_folder("Inbox");
        folder.set_property("auto_sync", PropertyValue::Bool(true));
        assert_eq!(folder.property("auto_sync"), Some(PropertyValue::Bool(true)));
    }
}
