//! `StoreDb`: the single-file relational store of folders and per-folder
//! message tables (spec.md §4.1).

use std::cell::Cell;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use log::{debug, warn};
use parking_lot::ReentrantMutex;
use rusqlite::{Connection, OptionalExtension, params};

use crate::error::{Result, StoreError};
use crate::models::folder::{CountKind, FolderRecord};
use crate::models::message::MessageRecord;
use crate::search::context::{SearchContext, SearchRegistry};
use crate::store::migration;
use camel_store_config::{DebugTag, EngineEnv};

struct Inner {
    conn: Connection,
    /// Nesting depth of the current writer transaction; savepoint names
    /// encode it (`sp_1`, `sp_2`, ...), mirroring the recursive writer
    /// lock of spec.md §4.1's concurrency section. A plain `Cell` is
    /// enough since every `rusqlite::Connection` method used here takes
    /// `&self`, not `&mut self`.
    depth: Cell<u32>,
}

/// Durable, single-file store of `folders` and `messages_<folder_id>`
/// tables, plus a `keys` metadata table (spec.md §4.1).
///
/// `inner` is a [`ReentrantMutex`] rather than a plain `Mutex`: spec.md
/// §4.1 requires the writer lock to be recursive so a write path that
/// calls into another write path on the same thread (a savepoint nested
/// inside another) stacks a further savepoint instead of self-deadlocking.
pub struct StoreDb {
    inner: ReentrantMutex<Inner>,
    path: PathBuf,
    search_registry: SearchRegistry,
}

const USER_KEY_PREFIX: &str = "user::";

impl StoreDb {
    /// Opens or creates the file at `path`. A file that exists but is
    /// unreadable or corrupt (per the embedded engine's "can't open /
    /// corrupt / not a database" codes) is renamed to `<path>.corrupt` and
    /// replaced with a fresh database — this never surfaces as an error to
    /// the caller (spec.md §4.1, §8 scenario 6).
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Self::open_with_env(path, EngineEnv::from_env())
    }

    pub fn open_with_env(path: impl AsRef<Path>, env: EngineEnv) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let mut conn = Self::open_connection_rescuing_corruption(&path)?;
        Self::apply_pragmas(&conn, &env);

        if migration::has_legacy_schema(&conn)? {
            debug!("legacy folders schema detected at {:?}, migrating", path);
            migration::migrate_legacy_schema(&mut conn)?;
            if let Err(e) = conn.execute_batch("VACUUM;") {
                warn!("post-migration vacuum failed (best effort): {e}");
            }
        } else {
            migration::migrations()
                .to_latest(&mut conn)
                .map_err(StoreError::from)?;
        }

        let registry = SearchRegistry::new();
        crate::search::udf::register_all(&conn, registry.clone())
            .map_err(StoreError::from)?;

        if env.debug(DebugTag::Sqlite) {
            debug!("StoreDb opened at {:?}", path);
        }

        Ok(Self {
            inner: ReentrantMutex::new(Inner { conn, depth: Cell::new(0) }),
            path,
            search_registry: registry,
        })
    }

    fn open_connection_rescuing_corruption(path: &Path) -> Result<Connection> {
        match Connection::open(path) {
            Ok(conn) => Ok(conn),
            Err(err) => {
                let is_corrupt = matches!(
                    &err,
                    rusqlite::Error::SqliteFailure(e, _)
                        if matches!(
                            e.code,
                            rusqlite::ffi::ErrorCode::DatabaseCorrupt
                                | rusqlite::ffi::ErrorCode::NotADatabase
                                | rusqlite::ffi::ErrorCode::CannotOpen
                        )
                );
                if !is_corrupt || !path.exists() {
                    return Err(err.into());
                }
                let rescue_path = path.with_extension(
                    path.extension()
                        .map(|ext| format!("{}.corrupt", ext.to_string_lossy()))
                        .unwrap_or_else(|| "corrupt".to_string()),
                );
                warn!(
                    "StoreDb at {:?} is unreadable ({err}), rescuing to {:?}",
                    path, rescue_path
                );
                std::fs::rename(path, &rescue_path)?;
                Connection::open(path).map_err(StoreError::from)
            }
        }
    }

    fn apply_pragmas(conn: &Connection, env: &EngineEnv) {
        if let Some(cache_size) = env.default_cache_size {
            let _ = conn.pragma_update(None, "cache_size", cache_size);
        }
        if env.in_memory_temp_store {
            let _ = conn.pragma_update(None, "journal_mode", "MEMORY");
            let _ = conn.pragma_update(None, "temp_store", "MEMORY");
        }
        if env.shared_cache {
            let _ = conn.pragma_update(None, "cache", "shared");
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn search_registry(&self) -> SearchRegistry {
        self.search_registry.clone()
    }

    /// Run `f` inside a savepoint; commits (releases) on `Ok`, rolls back
    /// (and still releases) on `Err`. Reentrant: a nested call from inside
    /// `f`, on the same thread, re-enters the same `ReentrantMutex` lock
    /// instead of blocking, and stacks a further `sp_<depth>` savepoint
    /// rather than deadlocking. A call from a different thread still
    /// blocks until the lock is free, same as a plain mutex.
    fn with_transaction<F, R>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&Connection) -> Result<R>,
    {
        let guard = self.inner.lock();
        let depth = guard.depth.get() + 1;
        guard.depth.set(depth);
        let savepoint = format!("sp_{depth}");
        guard.conn.execute_batch(&format!("SAVEPOINT {savepoint}"))?;

        let result = f(&guard.conn);

        match &result {
            Ok(_) => {
                guard
                    .conn
                    .execute_batch(&format!("RELEASE {savepoint}"))?;
            }
            Err(_) => {
                guard
                    .conn
                    .execute_batch(&format!("ROLLBACK TO {savepoint}; RELEASE {savepoint}"))?;
            }
        }
        guard.depth.set(guard.depth.get() - 1);
        result
    }

    fn with_conn<F, R>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&Connection) -> Result<R>,
    {
        let guard = self.inner.lock();
        f(&guard.conn)
    }

    // ---- key/value metadata ------------------------------------------

    pub fn get_int_key(&self, key: &str) -> Result<Option<i64>> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT value FROM keys WHERE key = ?1",
                params![format!("{USER_KEY_PREFIX}{key}")],
                |row| row.get::<_, String>(0),
            )
            .optional()
            .map_err(StoreError::from)?
            .map(|v| v.parse::<i64>().map_err(|e| StoreError::Invalid(e.to_string())))
            .transpose()
        })
    }

    pub fn set_int_key(&self, key: &str, value: i64) -> Result<()> {
        self.set_string_key(key, &value.to_string())
    }

    pub fn dup_string_key(&self, key: &str) -> Result<Option<String>> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT value FROM keys WHERE key = ?1",
                params![format!("{USER_KEY_PREFIX}{key}")],
                |row| row.get(0),
            )
            .optional()
            .map_err(StoreError::from)
        })
    }

    pub fn set_string_key(&self, key: &str, value: &str) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO keys (key, value) VALUES (?1, ?2)
                 ON CONFLICT(key) DO UPDATE SET value = excluded.value",
                params![format!("{USER_KEY_PREFIX}{key}"), value],
            )?;
            Ok(())
        })
    }

    fn internal_key(&self, key: &str) -> Result<Option<String>> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT value FROM keys WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()
            .map_err(StoreError::from)
        })
    }

    pub fn folders_version(&self) -> Result<Option<i64>> {
        Ok(self
            .internal_key("csdb::folders_version")?
            .and_then(|v| v.parse().ok()))
    }

    pub fn messages_version(&self) -> Result<Option<i64>> {
        Ok(self
            .internal_key("csdb::messages_version")?
            .and_then(|v| v.parse().ok()))
    }

    // ---- folders -------------------------------------------------------

    /// Returns a zero record (`folder_id == 0`) if the folder does not
    /// exist; this is not an error (spec.md §4.1).
    pub fn read_folder(&self, name: &str) -> Result<FolderRecord> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT folder_id, name, version, flags, info_flags, next_uid, last_sync,
                        saved_count, unread_count, deleted_count, junk_count, visible_count,
                        junk_not_deleted_count, backend_data
                 FROM folders WHERE name = ?1",
                params![name],
                row_to_folder_record,
            )
            .optional()
            .map_err(StoreError::from)
            .map(|r| r.unwrap_or_else(|| FolderRecord::zero(name)))
        })
    }

    /// Upsert. A new folder is assigned `folder_id = max(folder_id)+1` and
    /// gets a fresh `messages_<folder_id>` table.
    pub fn write_folder(&self, name: &str, record: &FolderRecord) -> Result<FolderRecord> {
        self.with_transaction(|conn| {
            let existing_id: Option<i64> = conn
                .query_row(
                    "SELECT folder_id FROM folders WHERE name = ?1",
                    params![name],
                    |row| row.get(0),
                )
                .optional()?;

            let folder_id = match existing_id {
                Some(id) => id,
                None => {
                    let max_id: i64 = conn.query_row(
                        "SELECT COALESCE(MAX(folder_id), 0) FROM folders",
                        [],
                        |row| row.get(0),
                    )?;
                    let new_id = max_id + 1;
                    create_messages_table(conn, new_id)?;
                    new_id
                }
            };

            conn.execute(
                "INSERT INTO folders
                    (folder_id, name, version, flags, info_flags, next_uid, last_sync,
                     saved_count, unread_count, deleted_count, junk_count, visible_count,
                     junk_not_deleted_count, backend_data)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)
                 ON CONFLICT(folder_id) DO UPDATE SET
                    version = excluded.version,
                    flags = excluded.flags,
                    info_flags = excluded.info_flags,
                    next_uid = excluded.next_uid,
                    last_sync = excluded.last_sync,
                    saved_count = excluded.saved_count,
                    unread_count = excluded.unread_count,
                    deleted_count = excluded.deleted_count,
                    junk_count = excluded.junk_count,
                    visible_count = excluded.visible_count,
                    junk_not_deleted_count = excluded.junk_not_deleted_count,
                    backend_data = excluded.backend_data",
                params![
                    folder_id,
                    name,
                    record.version,
                    record.flags,
                    record.info_flags,
                    record.next_uid as i64,
                    record.last_sync.map(|t| t.timestamp()),
                    record.saved_count,
                    record.unread_count,
                    record.deleted_count,
                    record.junk_count,
                    record.visible_count,
                    record.junk_not_deleted_count,
                    record.backend_data,
                ],
            )?;

            conn.query_row(
                "SELECT folder_id, name, version, flags, info_flags, next_uid, last_sync,
                        saved_count, unread_count, deleted_count, junk_count, visible_count,
                        junk_not_deleted_count, backend_data
                 FROM folders WHERE folder_id = ?1",
                params![folder_id],
                row_to_folder_record,
            )
            .map_err(StoreError::from)
        })
    }

    pub fn rename_folder(&self, old: &str, new: &str) -> Result<()> {
        self.with_transaction(|conn| {
            let folder_id: Option<i64> = conn
                .query_row(
                    "SELECT folder_id FROM folders WHERE name = ?1",
                    params![old],
                    |row| row.get(0),
                )
                .optional()?;
            let Some(folder_id) = folder_id else {
                return Err(StoreError::NotFound(old.to_string()));
            };
            let exists: bool = conn.query_row(
                "SELECT count(*) FROM folders WHERE name = ?1",
                params![new],
                |row| row.get::<_, i64>(0).map(|c| c > 0),
            )?;
            if exists {
                return Err(StoreError::Exists(new.to_string()));
            }
            conn.execute(
                "UPDATE folders SET name = ?1 WHERE folder_id = ?2",
                params![new, folder_id],
            )?;
            Ok(())
        })
    }

    pub fn delete_folder(&self, name: &str) -> Result<()> {
        self.with_transaction(|conn| {
            let folder_id: Option<i64> = conn
                .query_row(
                    "SELECT folder_id FROM folders WHERE name = ?1",
                    params![name],
                    |row| row.get(0),
                )
                .optional()?;
            let Some(folder_id) = folder_id else {
                return Err(StoreError::NotFound(name.to_string()));
            };
            conn.execute(&format!("DROP TABLE IF EXISTS messages_{folder_id}"), [])?;
            conn.execute("DELETE FROM folders WHERE folder_id = ?1", params![folder_id])?;
            Ok(())
        })
    }

    pub fn clear_folder(&self, name: &str) -> Result<()> {
        self.with_transaction(|conn| {
            let folder_id = folder_id_or_not_found(conn, name)?;
            conn.execute(&format!("DELETE FROM messages_{folder_id}"), [])?;
            conn.execute(
                "UPDATE folders SET saved_count = 0, unread_count = 0, deleted_count = 0,
                    junk_count = 0, visible_count = 0, junk_not_deleted_count = 0
                 WHERE folder_id = ?1",
                params![folder_id],
            )?;
            Ok(())
        })
    }

    // ---- messages --------------------------------------------------------

    pub fn write_message(&self, folder: &str, message: &MessageRecord) -> Result<()> {
        self.with_transaction(|conn| {
            let folder_id = folder_id_or_not_found(conn, folder)?;
            conn.execute(
                &format!(
                    "INSERT INTO messages_{folder_id}
                        (uid, flags, msg_type, dirty, size, dsent, dreceived, subject,
                         mail_from, mail_to, mail_cc, mlist, part, labels, usertags, cinfo,
                         bdata, userheaders, preview)
                     VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13,?14,?15,?16,?17,?18,?19)
                     ON CONFLICT(uid) DO UPDATE SET
                        flags = excluded.flags, msg_type = excluded.msg_type,
                        dirty = excluded.dirty, size = excluded.size, dsent = excluded.dsent,
                        dreceived = excluded.dreceived, subject = excluded.subject,
                        mail_from = excluded.mail_from, mail_to = excluded.mail_to,
                        mail_cc = excluded.mail_cc, mlist = excluded.mlist, part = excluded.part,
                        labels = excluded.labels, usertags = excluded.usertags,
                        cinfo = excluded.cinfo, bdata = excluded.bdata,
                        userheaders = excluded.userheaders, preview = excluded.preview"
                ),
                params![
                    message.uid,
                    message.flags,
                    message.msg_type,
                    message.dirty as i64,
                    message.size as i64,
                    message.dsent,
                    message.dreceived,
                    message.subject,
                    message.mail_from,
                    message.mail_to,
                    message.mail_cc,
                    message.mlist,
                    message.part,
                    message.labels,
                    message.usertags,
                    message.cinfo,
                    message.bdata,
                    message.userheaders,
                    message.preview,
                ],
            )?;
            Ok(())
        })
    }

    pub fn read_message(&self, folder: &str, uid: &str) -> Result<Option<MessageRecord>> {
        self.with_conn(|conn| {
            let folder_id = folder_id_or_not_found(conn, folder)?;
            conn.query_row(
                &format!(
                    "SELECT uid, flags, msg_type, dirty, size, dsent, dreceived, subject,
                            mail_from, mail_to, mail_cc, mlist, part, labels, usertags, cinfo,
                            bdata, userheaders, preview
                     FROM messages_{folder_id} WHERE uid = ?1"
                ),
                params![uid],
                row_to_message_record,
            )
            .optional()
            .map_err(StoreError::from)
        })
    }

    /// Streams every row in the folder through `callback`, stopping (and
    /// propagating) on the first error.
    pub fn read_messages(
        &self,
        folder: &str,
        mut callback: impl FnMut(MessageRecord) -> Result<()>,
    ) -> Result<()> {
        self.with_conn(|conn| {
            let folder_id = folder_id_or_not_found(conn, folder)?;
            let mut stmt = conn.prepare(&format!(
                "SELECT uid, flags, msg_type, dirty, size, dsent, dreceived, subject,
                        mail_from, mail_to, mail_cc, mlist, part, labels, usertags, cinfo,
                        bdata, userheaders, preview
                 FROM messages_{folder_id}"
            ))?;
            let mut rows = stmt.query([])?;
            while let Some(row) = rows.next()? {
                let record = row_to_message_record(row)?;
                callback(record)?;
            }
            Ok(())
        })
    }

    pub fn delete_message(&self, folder: &str, uid: &str) -> Result<()> {
        self.with_transaction(|conn| {
            let folder_id = folder_id_or_not_found(conn, folder)?;
            conn.execute(
                &format!("DELETE FROM messages_{folder_id} WHERE uid = ?1"),
                params![uid],
            )?;
            Ok(())
        })
    }

    pub fn delete_messages(&self, folder: &str, uids: &[String]) -> Result<()> {
        self.with_transaction(|conn| {
            let folder_id = folder_id_or_not_found(conn, folder)?;
            for uid in uids {
                conn.execute(
                    &format!("DELETE FROM messages_{folder_id} WHERE uid = ?1"),
                    params![uid],
                )?;
            }
            Ok(())
        })
    }

    pub fn count_messages(&self, folder: &str, kind: CountKind) -> Result<u32> {
        self.with_conn(|conn| {
            let folder_id = folder_id_or_not_found(conn, folder)?;
            let where_clause = count_kind_where(kind);
            let count: i64 = conn.query_row(
                &format!("SELECT count(*) FROM messages_{folder_id} WHERE {where_clause}"),
                [],
                |row| row.get(0),
            )?;
            Ok(count as u32)
        })
    }

    pub fn dup_uids_with_flags(&self, folder: &str) -> Result<Vec<(String, u32)>> {
        self.with_conn(|conn| {
            let folder_id = folder_id_or_not_found(conn, folder)?;
            let mut stmt =
                conn.prepare(&format!("SELECT uid, flags FROM messages_{folder_id}"))?;
            let rows = stmt
                .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, u32>(1)?)))?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(rows)
        })
    }

    pub fn dup_junk_uids(&self, folder: &str) -> Result<Vec<String>> {
        self.uids_matching_mask(folder, crate::models::message::flags::JUNK)
    }

    pub fn dup_deleted_uids(&self, folder: &str) -> Result<Vec<String>> {
        self.uids_matching_mask(folder, crate::models::message::flags::DELETED)
    }

    fn uids_matching_mask(&self, folder: &str, mask: u32) -> Result<Vec<String>> {
        self.with_conn(|conn| {
            let folder_id = folder_id_or_not_found(conn, folder)?;
            let mut stmt = conn.prepare(&format!(
                "SELECT uid FROM messages_{folder_id} WHERE (flags & ?1) <> 0"
            ))?;
            let rows = stmt
                .query_map(params![mask], |row| row.get::<_, String>(0))?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(rows)
        })
    }

    // ---- search ----------------------------------------------------------

    /// Loads every row of `folder` into `ctx.loaded_infos`, so the UDFs a
    /// compiled expression calls (`check_flags`, `search_header`, ...) see
    /// in-memory edits rather than stale DB columns (spec.md §4.4).
    pub fn prepare_fetch_all_into(&self, folder: &str, ctx: &SearchContext) -> Result<()> {
        let mut loaded = std::collections::HashMap::new();
        self.read_messages(folder, |record| {
            loaded.insert(
                record.uid.clone(),
                crate::models::MessageInfo::from_record(record),
            );
            Ok(())
        })?;
        *ctx.loaded_infos.write().unwrap() = loaded;
        Ok(())
    }

    /// Runs `SELECT uid FROM messages_<folder_id> WHERE {where_sql}` and
    /// invokes `callback` with every matching uid (spec.md §4.4 execution).
    pub fn select_matching_uids(
        &self,
        folder: &str,
        where_sql: &str,
        mut callback: impl FnMut(String) -> Result<()>,
    ) -> Result<()> {
        self.with_conn(|conn| {
            let folder_id = folder_id_or_not_found(conn, folder)?;
            let mut stmt = conn.prepare(&format!(
                "SELECT uid FROM messages_{folder_id} WHERE {where_sql}"
            ))?;
            let mut rows = stmt.query([])?;
            while let Some(row) = rows.next()? {
                let uid: String = row.get(0)?;
                callback(uid)?;
            }
            Ok(())
        })
    }
}

fn folder_id_or_not_found(conn: &Connection, name: &str) -> Result<i64> {
    conn.query_row(
        "SELECT folder_id FROM folders WHERE name = ?1",
        params![name],
        |row| row.get(0),
    )
    .optional()?
    .ok_or_else(|| StoreError::NotFound(name.to_string()))
}

fn create_messages_table(conn: &Connection, folder_id: i64) -> rusqlite::Result<()> {
    conn.execute(
        &format!(
            "CREATE TABLE messages_{folder_id} (
                uid TEXT, flags INT, msg_type INT, dirty INT, size INT,
                dsent INT64, dreceived INT64, subject TEXT, mail_from TEXT,
                mail_to TEXT, mail_cc TEXT, mlist TEXT, part TEXT, labels TEXT,
                usertags TEXT, cinfo TEXT, bdata TEXT, userheaders TEXT,
                preview TEXT, PRIMARY KEY(uid)
            )"
        ),
        [],
    )?;
    conn.execute(
        &format!("CREATE INDEX idx_messages_{folder_id}_uid_flags ON messages_{folder_id}(uid, flags)"),
        [],
    )?;
    Ok(())
}

fn count_kind_where(kind: CountKind) -> String {
    use crate::models::message::flags::{DELETED, JUNK, SEEN};
    match kind {
        CountKind::Total => "1=1".to_string(),
        CountKind::Unread => format!("(flags & {SEEN}) = 0"),
        CountKind::Junk => format!("(flags & {JUNK}) <> 0"),
        CountKind::Deleted => format!("(flags & {DELETED}) <> 0"),
        CountKind::NotJunkNotDeleted => format!("(flags & {}) = 0", JUNK | DELETED),
        CountKind::NotJunkNotDeletedUnread => {
            format!("(flags & {}) = 0", JUNK | DELETED | SEEN)
        }
        CountKind::JunkNotDeleted => {
            format!("(flags & {JUNK}) <> 0 AND (flags & {DELETED}) = 0")
        }
    }
}

fn row_to_folder_record(row: &rusqlite::Row<'_>) -> rusqlite::Result<FolderRecord> {
    let last_sync: Option<i64> = row.get(6)?;
    Ok(FolderRecord {
        folder_id: row.get::<_, i64>(0)? as u32,
        name: row.get(1)?,
        version: row.get(2)?,
        flags: row.get(3)?,
        info_flags: row.get(4)?,
        next_uid: row.get::<_, i64>(5)? as u64,
        last_sync: last_sync.and_then(|t| DateTime::<Utc>::from_timestamp(t, 0)),
        saved_count: row.get(7)?,
        unread_count: row.get(8)?,
        deleted_count: row.get(9)?,
        junk_count: row.get(10)?,
        visible_count: row.get(11)?,
        junk_not_deleted_count: row.get(12)?,
        backend_data: row.get(13)?,
    })
}

fn row_to_message_record(row: &rusqlite::Row<'_>) -> rusqlite::Result<MessageRecord> {
    Ok(MessageRecord {
        uid: row.get(0)?,
        flags: row.get(1)?,
        msg_type: row.get(2)?,
        dirty: row.get::<_, i64>(3)? != 0,
        size: row.get::<_, i64>(4)? as u64,
        dsent: row.get(5)?,
        dreceived: row.get(6)?,
        subject: row.get(7)?,
        mail_from: row.get(8)?,
        mail_to: row.get(9)?,
        mail_cc: row.get(10)?,
        mlist: row.get(11)?,
        part: row.get(12)?,
        labels: row.get(13)?,
        usertags: row.get(14)?,
        cinfo: row.get(15)?,
        bdata: row.get(16)?,
        userheaders: row.get(17)?,
        preview: row.get(18)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn open_test_db() -> (StoreDb, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let db = StoreDb::open(dir.path().join("folders.db")).unwrap();
        (db, dir)
    }

    #[test]
    fn read_folder_on_unknown_name_is_zero_record() {
        let (db, _dir) = open_test_db();
        let f = db.read_folder("Inbox").unwrap();
        assert!(!f.exists());
    }

    #[test]
    fn write_then_read_folder_round_trips() {
        let (db, _dir) = open_test_db();
        let mut record = FolderRecord::zero("Inbox");
        record.saved_count = 3;
        let written = db.write_folder("Inbox", &record).unwrap();
        assert_eq!(written.folder_id, 1);
        let read = db.read_folder("Inbox").unwrap();
        assert_eq!(read.saved_count, 3);
        assert_eq!(read.folder_id, 1);
    }

    #[test]
    fn second_new_folder_gets_next_id() {
        let (db, _dir) = open_test_db();
        db.write_folder("Inbox", &FolderRecord::zero("Inbox")).unwrap();
        let second = db
            .write_folder("Archive", &FolderRecord::zero("Archive"))
            .unwrap();
        assert_eq!(second.folder_id, 2);
    }

    #[test]
    fn rename_folder_preserves_id() {
        let (db, _dir) = open_test_db();
        let written = db.write_folder("Inbox", &FolderRecord::zero("Inbox")).unwrap();
        db.rename_folder("Inbox", "Archive").unwrap();
        let renamed = db.read_folder("Archive").unwrap();
        assert_eq!(renamed.folder_id, written.folder_id);
        assert!(!db.read_folder("Inbox").unwrap().exists());
    }

    #[test]
    fn rename_missing_folder_is_not_found() {
        let (db, _dir) = open_test_db();
        let err = db.rename_folder("Ghost", "Other").unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
    }

    #[test]
    fn rename_onto_existing_name_is_exists_error() {
        let (db, _dir) = open_test_db();
        db.write_folder("Inbox", &FolderRecord::zero("Inbox")).unwrap();
        db.write_folder("Archive", &FolderRecord::zero("Archive")).unwrap();
        let err = db.rename_folder("Inbox", "Archive").unwrap_err();
        assert!(matches!(err, StoreError::Exists(_)));
    }

    #[test]
    fn delete_folder_zeroes_its_record() {
        let (db, _dir) = open_test_db();
        db.write_folder("Inbox", &FolderRecord::zero("Inbox")).unwrap();
        db.delete_folder("Inbox").unwrap();
        assert_eq!(db.read_folder("Inbox").unwrap().folder_id, 0);
    }

    #[test]
    fn write_read_message_round_trip() {
        let (db, _dir) = open_test_db();
        db.write_folder("Inbox", &FolderRecord::zero("Inbox")).unwrap();
        let mut msg = MessageRecord::new("uid-1");
        msg.subject = "Hello".to_string();
        db.write_message("Inbox", &msg).unwrap();
        let read = db.read_message("Inbox", "uid-1").unwrap().unwrap();
        assert_eq!(read.subject, "Hello");
    }

    #[test]
    fn count_messages_unread_matches_seen_bit() {
        let (db, _dir) = open_test_db();
        db.write_folder("Inbox", &FolderRecord::zero("Inbox")).unwrap();
        let mut seen = MessageRecord::new("u1");
        seen.flags = crate::models::message::flags::SEEN;
        db.write_message("Inbox", &seen).unwrap();
        db.write_message("Inbox", &MessageRecord::new("u2")).unwrap();
        let unread = db.count_messages("Inbox", CountKind::Unread).unwrap();
        assert_eq!(unread, 1);
    }

    #[test]
    fn legacy_schema_migrates_on_open() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("folders.db");
        {
            let conn = Connection::open(&path).unwrap();
            conn.execute_batch(
                "CREATE TABLE Inbox (uid TEXT PRIMARY KEY, flags INT, subject TEXT);
                 INSERT INTO Inbox (uid, flags, subject) VALUES ('1', 0, 'hi');",
            )
            .unwrap();
        }
        let db = StoreDb::open(&path).unwrap();
        let folder = db.read_folder("Inbox").unwrap();
        assert!(folder.folder_id >= 1);
        assert_eq!(db.messages_version().unwrap(), Some(1));
        let msg = db.read_message("Inbox", "1").unwrap().unwrap();
        assert_eq!(msg.subject, "hi");
    }

    #[test]
    fn corrupt_file_is_rescued_and_reopened_fresh() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("folders.db");
        std::fs::write(&path, b"not a database").unwrap();
        let db = StoreDb::open(&path).unwrap();
        assert!(!db.read_folder("Inbox").unwrap().exists());
        assert!(dir.path().join("folders.db.corrupt").exists());
    }
}
