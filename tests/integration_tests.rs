//! Cross-module scenarios (spec.md §8): adapters, the summary, StoreDb,
//! and StoreSearch wired together the way a real store would use them,
//! rather than each module's own unit tests in isolation.

use camel_store::adapters::maildir::MaildirAdapter;
use camel_store::adapters::FolderAdapter;
use camel_store::models::message::flags;
use camel_store::{FolderRecord, MessageRecord, StoreDb};
use camel_store::{Cancellable, Folder};
use std::sync::Arc;
use tempfile::tempdir;

fn open_store() -> (Arc<StoreDb>, tempfile::TempDir) {
    let dir = tempdir().unwrap();
    let db = Arc::new(StoreDb::open(dir.path().join("store.db")).unwrap());
    (db, dir)
}

/// Scenario 1 + 2 end-to-end: messages land in the DB through
/// `Folder::add`, then `StoreSearch` evaluates flag and short-circuit
/// expressions against them.
#[test]
fn summary_add_then_search_excludes_seen_messages() {
    use camel_store::search::ast::Expr;

    let (db, _dir) = open_store();
    db.write_folder("Inbox", &FolderRecord::zero("Inbox")).unwrap();
    let inbox = Folder::new("Inbox", &db);

    let mut seen = MessageRecord::new("");
    seen.flags = flags::SEEN;
    let mut plain = MessageRecord::new("");
    let mut junk = MessageRecord::new("");
    junk.flags = flags::JUNK;

    inbox.add(seen).unwrap();
    inbox.add(plain).unwrap();
    inbox.add(junk).unwrap();
    inbox.save().unwrap();

    let mut search = camel_store::StoreSearch::new(db.clone(), "acct");
    search.set_folders(vec!["Inbox".to_string()]);
    search.set_expression(Expr::Not(Box::new(Expr::SystemFlag("seen".to_string()))));
    search.rebuild_sync(&Cancellable::new()).unwrap();

    let uids = search.get_uids_sync(&Cancellable::new()).unwrap();
    let mut inbox_uids = uids.get("Inbox").cloned().unwrap_or_default();
    inbox_uids.sort();
    assert_eq!(inbox_uids, vec!["2".to_string(), "3".to_string()]);
}

/// Scenario 4: cross-folder maildir->maildir transfer. This covers the
/// on-disk side (`MaildirAdapter::transfer_to`) and the summary/DB side
/// (source marked deleted+seen, destination counters incremented)
/// together, since the spec's expected post-state spans both.
#[test]
fn cross_folder_maildir_transfer_moves_files_and_updates_counters() {
    let (db, dir) = open_store();
    db.write_folder("Inbox", &FolderRecord::zero("Inbox")).unwrap();
    db.write_folder("Archive", &FolderRecord::zero("Archive")).unwrap();

    let mut inbox_adapter = MaildirAdapter::open(dir.path().join("Inbox")).unwrap();
    let mut archive_adapter = MaildirAdapter::open(dir.path().join("Archive")).unwrap();

    let inbox = Folder::new("Inbox", &db);
    let archive = Folder::new("Archive", &db);

    let mut m1 = MessageRecord::new("");
    let u1 = inbox_adapter.append(b"Subject: one\r\n\r\nbody one", &mut m1).unwrap();
    m1.uid = u1.clone();
    let info1 = inbox.add(m1).unwrap();

    let mut m2 = MessageRecord::new("");
    let u2 = inbox_adapter.append(b"Subject: two\r\n\r\nbody two", &mut m2).unwrap();
    m2.uid = u2.clone();
    let info2 = inbox.add(m2).unwrap();
    inbox.save().unwrap();

    // Adapter-level: move the on-disk files.
    inbox_adapter
        .transfer_to(&[u1.clone(), u2.clone()], &mut archive_adapter, true)
        .unwrap();

    // Metadata-level: source uids are marked deleted+seen rather than
    // erased outright (the expunge pass removes them later); destination
    // gets fresh rows under the adapter's own uid scheme.
    inbox.set_message_flags(&u1, 0, flags::DELETED | flags::SEEN).unwrap();
    inbox.set_message_flags(&u2, 0, flags::DELETED | flags::SEEN).unwrap();
    inbox.save().unwrap();

    let mut archived1 = info1.record;
    archived1.uid = u1.clone();
    archive.add(archived1).unwrap();
    let mut archived2 = info2.record;
    archived2.uid = u2.clone();
    archive.add(archived2).unwrap();
    archive.save().unwrap();

    let inbox_folder = db.read_folder("Inbox").unwrap();
    assert_eq!(inbox_folder.deleted_count, 2);

    let archive_folder = db.read_folder("Archive").unwrap();
    assert_eq!(archive_folder.saved_count, 2);

    assert!(inbox_adapter.get_message(&u1).is_err());
    let moved = archive_adapter.get_message(&u1).unwrap();
    assert!(String::from_utf8_lossy(&moved).contains("body one"));
}
