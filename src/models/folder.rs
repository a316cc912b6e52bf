//! Folder record: the row stored in StoreDB's `folders` table.

use chrono::{DateTime, Utc};

/// Provider-level folder flags (spec.md §6.3).
pub mod provider_flags {
    pub const HAS_SUMMARY: u32 = 1 << 0;
    pub const HAS_SEARCH: u32 = 1 << 1;
    pub const FILTER_RECENT: u32 = 1 << 2;
    pub const HAS_BEEN_DELETED: u32 = 1 << 3;
    pub const IS_TRASH: u32 = 1 << 4;
    pub const IS_JUNK: u32 = 1 << 5;
    pub const FILTER_JUNK: u32 = 1 << 6;
}

/// Folder-info flags (spec.md §6.3). The 6-bit `TYPE` field starts at bit 10.
pub mod info_flags {
    pub const NOSELECT: u32 = 1 << 0;
    pub const NOINFERIORS: u32 = 1 << 1;
    pub const CHILDREN: u32 = 1 << 2;
    pub const NOCHILDREN: u32 = 1 << 3;
    pub const SUBSCRIBED: u32 = 1 << 4;
    pub const VIRTUAL: u32 = 1 << 5;
    pub const SYSTEM: u32 = 1 << 6;
    pub const VTRASH: u32 = 1 << 7;
    pub const SHARED_TO_ME: u32 = 1 << 8;
    pub const SHARED_BY_ME: u32 = 1 << 9;
    pub const TYPE_SHIFT: u32 = 10;
    pub const TYPE_MASK: u32 = 0b111111 << TYPE_SHIFT;
}

/// The `TYPE` sub-field of the folder-info flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FolderType {
    Normal,
    Inbox,
    Outbox,
    Trash,
    Junk,
    Sent,
}

impl FolderType {
    fn from_bits(bits: u32) -> Self {
        match bits {
            1 => FolderType::Inbox,
            2 => FolderType::Outbox,
            3 => FolderType::Trash,
            4 => FolderType::Junk,
            5 => FolderType::Sent,
            _ => FolderType::Normal,
        }
    }

    fn to_bits(self) -> u32 {
        match self {
            FolderType::Normal => 0,
            FolderType::Inbox => 1,
            FolderType::Outbox => 2,
            FolderType::Trash => 3,
            FolderType::Junk => 4,
            FolderType::Sent => 5,
        }
    }
}

/// Which cached counter `StoreDb::count_messages` should compute.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CountKind {
    Total,
    Unread,
    Junk,
    Deleted,
    NotJunkNotDeleted,
    NotJunkNotDeletedUnread,
    JunkNotDeleted,
}

/// A row of StoreDB's `folders` table (spec.md §3, §4.1).
#[derive(Debug, Clone, PartialEq)]
pub struct FolderRecord {
    /// Non-zero, dense, stable for the lifetime of the StoreDB file. Zero
    /// means "no such folder" (the sentinel `read_folder` returns for a
    /// missing name).
    pub folder_id: u32,
    pub name: String,
    pub version: u32,
    pub flags: u32,
    pub info_flags: u32,
    pub next_uid: u64,
    pub last_sync: Option<DateTime<Utc>>,
    pub saved_count: u32,
    pub unread_count: u32,
    pub deleted_count: u32,
    pub junk_count: u32,
    pub visible_count: u32,
    pub junk_not_deleted_count: u32,
    /// Free-form opaque state the adapter stashes (e.g. mbox byte offsets).
    pub backend_data: String,
}

impl FolderRecord {
    /// A folder record that does not exist yet; `folder_id == 0` is the
    /// sentinel `read_folder` returns for an unknown name.
    pub fn zero(name: impl Into<String>) -> Self {
        Self {
            folder_id: 0,
            name: name.into(),
            version: 1,
            flags: 0,
            info_flags: 0,
            next_uid: 1,
            last_sync: None,
            saved_count: 0,
            unread_count: 0,
            deleted_count: 0,
            junk_count: 0,
            visible_count: 0,
            junk_not_deleted_count: 0,
            backend_data: String::new(),
        }
    }

    pub fn exists(&self) -> bool {
        self.folder_id != 0
    }

    pub fn folder_type(&self) -> FolderType {
        FolderType::from_bits((self.info_flags & info_flags::TYPE_MASK) >> info_flags::TYPE_SHIFT)
    }

    pub fn set_folder_type(&mut self, ty: FolderType) {
        self.info_flags = (self.info_flags & !info_flags::TYPE_MASK)
            | (ty.to_bits() << info_flags::TYPE_SHIFT);
    }

    /// The invariant from spec.md §8: saved = unread + seen = visible +
    /// deleted + junk-not-deleted.
    pub fn counters_consistent(&self) -> bool {
        let seen_count = self.saved_count.saturating_sub(self.unread_count);
        self.saved_count == self.unread_count + seen_count
            && self.saved_count
                == self.visible_count + self.deleted_count + self.junk_not_deleted_count
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_record_does_not_exist() {
        let f = FolderRecord::zero("Inbox");
        assert!(!f.exists());
        assert_eq!(f.folder_id, 0);
    }

    #[test]
    fn folder_type_roundtrips_through_bits() {
        let mut f = FolderRecord::zero("Inbox");
        f.set_folder_type(FolderType::Trash);
        assert_eq!(f.folder_type(), FolderType::Trash);
        f.set_folder_type(FolderType::Normal);
        assert_eq!(f.folder_type(), FolderType::Normal);
    }

    #[test]
    fn counters_consistent_when_balanced() {
        let mut f = FolderRecord::zero("Inbox");
        f.saved_count = 10;
        f.unread_count = 3;
        f.visible_count = 7;
        f.deleted_count = 2;
        f.junk_not_deleted_count = 1;
        assert!(f.counters_consistent());
    }
}
