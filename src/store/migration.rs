//! Schema bootstrap and legacy-layout migration (spec.md §4.1).
//!
//! Two distinct things happen under this name. `migrations()` is the normal
//! forward-only `rusqlite_migration` chain that creates the `folders` and
//! `keys` tables on a fresh or already-modern file. `migrate_legacy_schema`
//! is a one-shot, hand-written transaction that upgrades a pre-folder-id
//! file (one table per folder, named after the folder) into the modern
//! layout; it only ever runs once per file and is not expressed as a
//! `rusqlite_migration` step because it rewrites data, not just DDL.

use anyhow::Context;
use rusqlite::Connection;
use rusqlite_migration::{M, Migrations};

use crate::error::{Result, StoreError};

pub fn migrations() -> Migrations<'static> {
    Migrations::new(vec![M::up(
        r#"
        CREATE TABLE folders (
            folder_id INTEGER PRIMARY KEY,
            name TEXT NOT NULL UNIQUE,
            version INTEGER NOT NULL DEFAULT 1,
            flags INTEGER NOT NULL DEFAULT 0,
            info_flags INTEGER NOT NULL DEFAULT 0,
            next_uid INTEGER NOT NULL DEFAULT 1,
            last_sync INTEGER,
            saved_count INTEGER NOT NULL DEFAULT 0,
            unread_count INTEGER NOT NULL DEFAULT 0,
            deleted_count INTEGER NOT NULL DEFAULT 0,
            junk_count INTEGER NOT NULL DEFAULT 0,
            visible_count INTEGER NOT NULL DEFAULT 0,
            junk_not_deleted_count INTEGER NOT NULL DEFAULT 0,
            backend_data TEXT NOT NULL DEFAULT ''
        );

        CREATE TABLE keys (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL
        );
        "#,
    )])
}

/// `folders` exists but predates `folder_id` — the file uses the legacy
/// one-table-per-folder layout (spec.md §4.1 migration step 1).
pub fn has_legacy_schema(conn: &Connection) -> rusqlite::Result<bool> {
    let folders_exists: bool = conn.query_row(
        "SELECT count(*) FROM sqlite_master WHERE type = 'table' AND name = 'folders'",
        [],
        |row| row.get::<_, i64>(0).map(|c| c > 0),
    )?;
    if !folders_exists {
        return Ok(false);
    }
    let has_folder_id: bool = conn.query_row(
        "SELECT count(*) FROM pragma_table_info('folders') WHERE name = 'folder_id'",
        [],
        |row| row.get::<_, i64>(0).map(|c| c > 0),
    )?;
    Ok(!has_folder_id)
}

/// Every legacy per-folder table: each non-system table not named `folders`
/// or `keys` is assumed to be a folder, named after it.
fn legacy_folder_names(conn: &Connection) -> rusqlite::Result<Vec<String>> {
    let mut stmt = conn.prepare(
        "SELECT name FROM sqlite_master
         WHERE type = 'table' AND name NOT LIKE 'sqlite_%'
           AND name NOT IN ('folders', 'keys')",
    )?;
    let names = stmt
        .query_map([], |row| row.get::<_, String>(0))?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(names)
}

/// Steps 1-7 of spec.md §4.1's migration recipe, inside one transaction.
///
/// The chain of fallible steps below is threaded through `anyhow::Context`
/// the way the teacher's `storage.rs`/`config.rs` do for multi-step
/// operations, then converted to the final `StoreError` at this function's
/// boundary so callers keep seeing the typed error.
pub fn migrate_legacy_schema(conn: &mut Connection) -> Result<()> {
    migrate_legacy_schema_inner(conn).map_err(|e| StoreError::Io(format!("{e:#}")))
}

fn migrate_legacy_schema_inner(conn: &mut Connection) -> anyhow::Result<()> {
    let folder_names = legacy_folder_names(conn).context("listing legacy per-folder tables")?;
    let tx = conn.transaction().context("opening legacy migration transaction")?;

    // Step 2: allocate folder ids 1..N and carry over the old `folders` row
    // if one exists (it predates folder_id, so only `name` survives).
    let folders_had_table: bool = tx
        .query_row(
            "SELECT count(*) FROM sqlite_master WHERE type = 'table' AND name = 'folders'",
            [],
            |row| row.get::<_, i64>(0).map(|c| c > 0),
        )
        .context("checking for a pre-existing legacy folders table")?;
    if folders_had_table {
        tx.execute("ALTER TABLE folders RENAME TO folders_legacy", [])
            .context("renaming legacy folders table out of the way")?;
    }

    tx.execute_batch(
        r#"
        CREATE TABLE folders (
            folder_id INTEGER PRIMARY KEY,
            name TEXT NOT NULL UNIQUE,
            version INTEGER NOT NULL DEFAULT 1,
            flags INTEGER NOT NULL DEFAULT 0,
            info_flags INTEGER NOT NULL DEFAULT 0,
            next_uid INTEGER NOT NULL DEFAULT 1,
            last_sync INTEGER,
            saved_count INTEGER NOT NULL DEFAULT 0,
            unread_count INTEGER NOT NULL DEFAULT 0,
            deleted_count INTEGER NOT NULL DEFAULT 0,
            junk_count INTEGER NOT NULL DEFAULT 0,
            visible_count INTEGER NOT NULL DEFAULT 0,
            junk_not_deleted_count INTEGER NOT NULL DEFAULT 0,
            backend_data TEXT NOT NULL DEFAULT ''
        );

        -- Step 3: temporary unified table, new column set, with defaults
        -- for the two columns the legacy layout never had.
        CREATE TEMP TABLE messages_unified (
            folder_id INTEGER NOT NULL,
            uid TEXT NOT NULL,
            flags INTEGER NOT NULL DEFAULT 0,
            msg_type INTEGER NOT NULL DEFAULT 0,
            dirty INTEGER NOT NULL DEFAULT 1,
            size INTEGER NOT NULL DEFAULT 0,
            dsent INTEGER NOT NULL DEFAULT 0,
            dreceived INTEGER NOT NULL DEFAULT 0,
            subject TEXT NOT NULL DEFAULT '',
            mail_from TEXT NOT NULL DEFAULT '',
            mail_to TEXT NOT NULL DEFAULT '',
            mail_cc TEXT NOT NULL DEFAULT '',
            mlist TEXT NOT NULL DEFAULT '',
            part TEXT NOT NULL DEFAULT '',
            labels TEXT NOT NULL DEFAULT '',
            usertags TEXT NOT NULL DEFAULT '',
            cinfo TEXT NOT NULL DEFAULT '',
            bdata TEXT NOT NULL DEFAULT '',
            userheaders TEXT NOT NULL DEFAULT '',
            preview TEXT NOT NULL DEFAULT ''
        );
        "#,
    )
    .context("creating the modern folders table and the unified staging table")?;

    for (i, name) in folder_names.iter().enumerate() {
        let folder_id = (i + 1) as i64;
        tx.execute(
            "INSERT INTO folders (folder_id, name) VALUES (?1, ?2)",
            rusqlite::params![folder_id, name],
        )
        .with_context(|| format!("registering legacy folder {name:?} as folder_id {folder_id}"))?;

        let columns_present: Vec<String> = {
            let mut stmt = tx.prepare("SELECT name FROM pragma_table_info(?1)")?;
            stmt.query_map(rusqlite::params![name], |row| row.get::<_, String>(0))?
                .collect::<rusqlite::Result<Vec<_>>>()?
        };

        // Every column in `messages_unified` is NOT NULL, so a legacy table
        // missing one needs a typed default substituted in the SELECT list,
        // not a bare NULL.
        let known = [
            ("uid", "''"),
            ("flags", "0"),
            ("msg_type", "0"),
            ("dirty", "1"),
            ("size", "0"),
            ("dsent", "0"),
            ("dreceived", "0"),
            ("subject", "''"),
            ("mail_from", "''"),
            ("mail_to", "''"),
            ("mail_cc", "''"),
            ("mlist", "''"),
            ("part", "''"),
            ("labels", "''"),
            ("usertags", "''"),
            ("cinfo", "''"),
            ("bdata", "''"),
            ("userheaders", "''"),
            ("preview", "''"),
        ];
        let selected: Vec<String> = known
            .iter()
            .map(|(c, default)| {
                if columns_present.iter().any(|p| p == c) {
                    (*c).to_string()
                } else {
                    (*default).to_string()
                }
            })
            .collect();
        let known: Vec<&str> = known.iter().map(|(c, _)| *c).collect();

        tx.execute(
            &format!(
                "INSERT INTO messages_unified (folder_id, {cols}) SELECT {folder_id}, {sel} FROM \"{table}\"",
                cols = known.join(", "),
                sel = selected.join(", "),
                folder_id = folder_id,
                table = name,
            ),
            [],
        )?;

        // Step 4: drop the legacy table (and whatever indexes rode with it).
        tx.execute(&format!("DROP TABLE \"{}\"", name), [])?;
    }

    if folders_had_table {
        tx.execute("DROP TABLE folders_legacy", [])?;
    }

    // Step 5: keys table plus the two version markers.
    tx.execute_batch("CREATE TABLE keys (key TEXT PRIMARY KEY, value TEXT NOT NULL);")?;
    tx.execute(
        "INSERT INTO keys (key, value) VALUES ('csdb::folders_version', '1')",
        [],
    )?;
    tx.execute(
        "INSERT INTO keys (key, value) VALUES ('csdb::messages_version', '1')",
        [],
    )?;

    // Step 6: per-folder tables, populated from the unified temp table.
    for i in 0..folder_names.len() {
        let folder_id = (i + 1) as i64;
        tx.execute(
            &format!(
                "CREATE TABLE messages_{id} (
                    uid TEXT, flags INT, msg_type INT, dirty INT, size INT,
                    dsent INT64, dreceived INT64, subject TEXT, mail_from TEXT,
                    mail_to TEXT, mail_cc TEXT, mlist TEXT, part TEXT, labels TEXT,
                    usertags TEXT, cinfo TEXT, bdata TEXT, userheaders TEXT,
                    preview TEXT, PRIMARY KEY(uid)
                )",
                id = folder_id
            ),
            [],
        )?;
        tx.execute(
            &format!("CREATE INDEX idx_messages_{id}_uid_flags ON messages_{id}(uid, flags)", id = folder_id),
            [],
        )?;
        tx.execute(
            &format!(
                "INSERT INTO messages_{id} SELECT uid, flags, msg_type, dirty, size, dsent,
                    dreceived, subject, mail_from, mail_to, mail_cc, mlist, part, labels,
                    usertags, cinfo, bdata, userheaders, preview
                 FROM messages_unified WHERE folder_id = ?1",
                id = folder_id
            ),
            rusqlite::params![folder_id],
        )?;
    }

    tx.execute("DROP TABLE messages_unified", [])
        .context("dropping the unified staging table")?;

    // Step 7: commit, then best-effort vacuum outside the transaction.
    tx.commit().context("committing legacy schema migration")?;
    Ok(())
}
