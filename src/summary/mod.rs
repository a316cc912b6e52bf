//! FolderSummary: the in-memory cache of a folder's message metadata
//! (spec.md §4.2).

use std::collections::HashMap;
use std::sync::RwLock;

use log::debug;

use crate::error::Result;
use crate::models::{ChangeInfo, ChangeState, MessageInfo, MessageRecord};
use crate::store::db::StoreDb;

/// In-memory snapshot of one folder's message metadata, backed by
/// [`StoreDb`]. Mirrors the teacher's `storage::memory` pattern of a single
/// `RwLock` guarding a `HashMap`, rather than per-entry locks (spec.md §9's
/// "arena + dense index" guidance applied to the summary's own map).
pub struct FolderSummary {
    folder: String,
    infos: RwLock<HashMap<String, MessageInfo>>,
    dirty: RwLock<std::collections::HashSet<String>>,
}

impl FolderSummary {
    pub fn new(folder: impl Into<String>) -> Self {
        Self {
            folder: folder.into(),
            infos: RwLock::new(HashMap::new()),
            dirty: RwLock::new(std::collections::HashSet::new()),
        }
    }

    pub fn count(&self) -> usize {
        self.infos.read().unwrap().len()
    }

    pub fn get_info(&self, uid: &str) -> Option<MessageInfo> {
        self.infos.read().unwrap().get(uid).cloned()
    }

    pub fn dup_uids(&self) -> Vec<String> {
        self.infos.read().unwrap().keys().cloned().collect()
    }

    /// Default sort: decimal prefix of the uid, `tiebreak` breaking ties
    /// (maildir passes received-date ascending; other adapters pass a
    /// no-op that keeps uid order, which is already stable under
    /// `sort_by_key`).
    pub fn sort_uids(&self, uids: &mut [String], tiebreak: impl Fn(&str, &str) -> std::cmp::Ordering) {
        uids.sort_by(|a, b| {
            let na: u64 = decimal_prefix(a);
            let nb: u64 = decimal_prefix(b);
            na.cmp(&nb).then_with(|| tiebreak(a, b))
        });
    }

    /// Loads every row from [`StoreDb`] into memory, so an upcoming scan
    /// hits no per-row disk round-trip (spec.md §4.2 `prepare_fetch_all`).
    pub fn prepare_fetch_all(&self, db: &StoreDb) -> Result<()> {
        let mut loaded = HashMap::new();
        db.read_messages(&self.folder, |record| {
            loaded.insert(record.uid.clone(), MessageInfo::from_record(record));
            Ok(())
        })?;
        *self.infos.write().unwrap() = loaded;
        Ok(())
    }

    /// Allocates the next uid from the folder, materializes the info, and
    /// pushes `uid_added` into `change_info` (spec.md §4.2 `add`).
    pub fn add(
        &self,
        db: &StoreDb,
        mut message: MessageRecord,
        change_info: &mut ChangeInfo,
    ) -> Result<MessageInfo> {
        let folder_record = db.read_folder(&self.folder)?;
        let uid = folder_record.next_uid.to_string();
        message.uid = uid.clone();
        let mut updated_folder = folder_record.clone();
        updated_folder.next_uid += 1;
        updated_folder.saved_count += 1;
        db.write_folder(&self.folder, &updated_folder)?;

        let info = MessageInfo::from_record(message);
        self.infos
            .write()
            .unwrap()
            .insert(uid.clone(), info.clone());
        self.dirty.write().unwrap().insert(uid.clone());
        change_info.add_uid(&uid);
        Ok(info)
    }

    /// `flags = (flags & !mask) | set`; raises dirty and pushes
    /// `uid_changed` only if the value actually changed (spec.md §4.2).
    pub fn set_message_flags(
        &self,
        uid: &str,
        mask: u32,
        set: u32,
        change_info: &mut ChangeInfo,
    ) -> bool {
        let mut infos = self.infos.write().unwrap();
        let Some(info) = infos.get_mut(uid) else {
            return false;
        };
        let new_flags = (info.record.flags & !mask) | set;
        if new_flags == info.record.flags {
            return false;
        }
        info.record.flags = new_flags;
        info.changed = true;
        drop(infos);
        self.dirty.write().unwrap().insert(uid.to_string());
        change_info.change_uid(uid);
        true
    }

    /// Iterates dirty infos, writing them via `db` in one transaction,
    /// then clears the dirty set (spec.md §4.2 `save`).
    pub fn save(&self, db: &StoreDb) -> Result<usize> {
        let dirty_uids: Vec<String> = self.dirty.read().unwrap().iter().cloned().collect();
        if dirty_uids.is_empty() {
            return Ok(0);
        }
        let infos = self.infos.read().unwrap();
        for uid in &dirty_uids {
            if let Some(info) = infos.get(uid) {
                let mut info = info.clone();
                info.sync_record();
                db.write_message(&self.folder, &info.record)?;
            }
        }
        drop(infos);
        self.dirty.write().unwrap().clear();
        self.recompute_counts(db)?;
        debug!("saved {} dirty infos in folder {}", dirty_uids.len(), self.folder);
        Ok(dirty_uids.len())
    }

    /// Recomputes all six cached folder counters from the in-memory
    /// uid->flags map rather than patching them incrementally, following
    /// the original's whole-recompute strategy (SPEC_FULL.md SUPPLEMENTED
    /// FEATURES) to avoid counter drift.
    pub fn recompute_counts(&self, db: &StoreDb) -> Result<()> {
        use crate::models::message::flags;

        let infos = self.infos.read().unwrap();
        let mut folder = db.read_folder(&self.folder)?;
        let saved = infos.len() as u32;
        let unread = infos
            .values()
            .filter(|i| i.record.flags & flags::SEEN == 0)
            .count() as u32;
        let deleted = infos
            .values()
            .filter(|i| i.record.flags & flags::DELETED != 0)
            .count() as u32;
        let junk_not_deleted = infos
            .values()
            .filter(|i| i.record.flags & flags::JUNK != 0 && i.record.flags & flags::DELETED == 0)
            .count() as u32;
        let junk = infos
            .values()
            .filter(|i| i.record.flags & flags::JUNK != 0)
            .count() as u32;
        let visible = saved.saturating_sub(deleted).saturating_sub(junk_not_deleted);

        folder.saved_count = saved;
        folder.unread_count = unread;
        folder.deleted_count = deleted;
        folder.junk_count = junk;
        folder.junk_not_deleted_count = junk_not_deleted;
        folder.visible_count = visible;
        db.write_folder(&self.folder, &folder)?;
        Ok(())
    }

    pub fn state_of(&self, change_info: &ChangeInfo, uid: &str) -> ChangeState {
        change_info.state(uid)
    }
}

fn decimal_prefix(uid: &str) -> u64 {
    uid.chars()
        .take_while(|c| c.is_ascii_digit())
        .collect::<String>()
        .parse()
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::folder::FolderRecord;
    use tempfile::tempdir;

    fn open_test_store() -> (StoreDb, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let db = StoreDb::open(dir.path().join("folders.db")).unwrap();
        db.write_folder("Inbox", &FolderRecord::zero("Inbox")).unwrap();
        (db, dir)
    }

    #[test]
    fn add_allocates_uid_and_raises_added() {
        let (db, _dir) = open_test_store();
        let summary = FolderSummary::new("Inbox");
        let mut ci = ChangeInfo::new();
        let info = summary.add(&db, MessageRecord::new(""), &mut ci).unwrap();
        assert_eq!(info.record.uid, "1");
        assert_eq!(ci.state("1"), ChangeState::Added);
    }

    #[test]
    fn set_message_flags_is_noop_when_unchanged() {
        let (db, _dir) = open_test_store();
        let summary = FolderSummary::new("Inbox");
        let mut ci = ChangeInfo::new();
        summary.add(&db, MessageRecord::new(""), &mut ci).unwrap();
        ci = ChangeInfo::new();
        let changed = summary.set_message_flags("1", 0, 0, &mut ci);
        assert!(!changed);
        assert_eq!(ci.state("1"), ChangeState::None);
    }

    #[test]
    fn save_writes_dirty_infos_and_clears_dirty_set() {
        let (db, _dir) = open_test_store();
        let summary = FolderSummary::new("Inbox");
        let mut ci = ChangeInfo::new();
        summary.add(&db, MessageRecord::new(""), &mut ci).unwrap();
        let written = summary.save(&db).unwrap();
        assert_eq!(written, 1);
        let again = summary.save(&db).unwrap();
        assert_eq!(again, 0);
        let read = db.read_message("Inbox", "1").unwrap();
        assert!(read.is_some());
    }

    #[test]
    fn prepare_fetch_all_populates_from_db() {
        let (db, _dir) = open_test_store();
        let mut record = MessageRecord::new("1");
        record.subject = "hi".to_string();
        db.write_message("Inbox", &record).unwrap();
        let summary = FolderSummary::new("Inbox");
        summary.prepare_fetch_all(&db).unwrap();
        assert_eq!(summary.count(), 1);
        assert_eq!(summary.get_info("1").unwrap().record.subject, "hi");
    }
}
