//! `StoreSearch`: compiles an expression once per rebuild, runs it against
//! every attached folder with the remote-op fixpoint loop, and expands
//! `match-threads` results (spec.md §4.4).
//!
//! Simplification versus the literal algorithm: rather than replacing the
//! compiled WHERE clause with `in_result_index(ctx, uid)` and re-running it
//! through SQL (spec.md §4.4 rebuild step 5), `rebuild_sync` keeps the
//! already-computed result set in memory and `get_uids_sync`/
//! `get_items_sync` simply read it back. Both converge on the same final
//! set; re-issuing the identical query through `in_result_index` would only
//! reproduce what rebuild already holds, so that extra SQL round trip is
//! skipped.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, RwLock};

use log::debug;

use crate::cancel::Cancellable;
use crate::error::{Result, StoreError};
use crate::models::MessageInfo;
use crate::models::thread_item::ThreadItem;
use crate::search::ast::Expr;
use crate::search::compiler::{self, CompileOutput};
use crate::search::context::{IndexKey, PendingOpKey, SearchContext, SearchRegistry};
use crate::store::db::StoreDb;
use crate::threads::ThreadTree;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchState {
    New,
    Rebuilding,
    Ready,
    Executing,
    Disposed,
}

pub struct StoreSearch {
    search_id: i64,
    store_id: String,
    db: Arc<StoreDb>,
    registry: SearchRegistry,
    folders: Vec<String>,
    expr: Option<Expr>,
    state: Mutex<SearchState>,
    dirty: bool,
    match_indexes: RwLock<HashMap<String, Arc<RwLock<HashSet<IndexKey>>>>>,
    /// Populated by `rebuild_sync`; `(store, folder_id, uid)` triples that
    /// satisfy the expression, already post-thread-expansion.
    result: RwLock<HashSet<IndexKey>>,
}

impl StoreSearch {
    pub fn new(db: Arc<StoreDb>, store_id: impl Into<String>) -> Self {
        let registry = db.search_registry();
        let search_id = registry.allocate_id();
        Self {
            search_id,
            store_id: store_id.into(),
            db,
            registry,
            folders: Vec::new(),
            expr: None,
            state: Mutex::new(SearchState::New),
            dirty: true,
            match_indexes: RwLock::new(HashMap::new()),
            result: RwLock::new(HashSet::new()),
        }
    }

    pub fn state(&self) -> SearchState {
        *self.state.lock().unwrap()
    }

    pub fn set_folders(&mut self, folders: Vec<String>) {
        self.folders = folders;
        self.dirty = true;
    }

    pub fn set_expression(&mut self, expr: Expr) {
        self.expr = Some(expr);
        self.dirty = true;
    }

    pub fn attach_match_index(&mut self, id: impl Into<String>, index: HashSet<IndexKey>) {
        self.match_indexes
            .write()
            .unwrap()
            .insert(id.into(), Arc::new(RwLock::new(index)));
        self.dirty = true;
    }

    pub fn dispose(&mut self) {
        self.registry.unregister(self.search_id);
        *self.state.lock().unwrap() = SearchState::Disposed;
    }

    /// Compiles the expression and computes the full matching set for every
    /// attached folder, including `match-threads` expansion (spec.md §4.4
    /// "Execution").
    pub fn rebuild_sync(&mut self, cancel: &Cancellable) -> Result<()> {
        let Some(expr) = self.expr.clone() else {
            return Err(StoreError::Invalid("rebuild_sync: no expression set".to_string()));
        };
        *self.state.lock().unwrap() = SearchState::Rebuilding;

        let compiled = compiler::compile(&expr, self.search_id);
        let ctx = Arc::new(SearchContext::new(self.search_id, self.store_id.clone()));
        for (id, set) in self.match_indexes.read().unwrap().iter() {
            ctx.match_indexes
                .write()
                .unwrap()
                .insert(id.clone(), Arc::clone(set));
        }
        self.registry.register(Arc::clone(&ctx));

        let outcome = self.rebuild_with_context(&compiled, &ctx, cancel);
        self.registry.unregister(self.search_id);

        match outcome {
            Ok(result) => {
                *self.result.write().unwrap() = result;
                self.dirty = false;
                *self.state.lock().unwrap() = SearchState::Ready;
                Ok(())
            }
            Err(e) => {
                *self.state.lock().unwrap() = SearchState::New;
                Err(e)
            }
        }
    }

    fn rebuild_with_context(
        &self,
        compiled: &CompileOutput,
        ctx: &Arc<SearchContext>,
        cancel: &Cancellable,
    ) -> Result<HashSet<IndexKey>> {
        let mut result = HashSet::new();
        for folder in &self.folders {
            cancel.check()?;
            let folder_record = self.db.read_folder(folder)?;
            if !folder_record.exists() {
                continue;
            }
            ctx.set_current_folder(folder_record.folder_id);
            self.db.prepare_fetch_all_into(folder, ctx)?;

            let mut folder_result =
                self.run_select_with_fixpoint(folder, folder_record.folder_id, &compiled.where_sql, ctx, cancel)?;

            if let Some(spec) = compiled.thread_spec {
                let items = self.load_thread_items(folder, folder_record.folder_id)?;
                let tree = ThreadTree::build(&items, spec.include_subject);
                folder_result = tree.expand(&folder_result, spec.kind);
            }

            result.extend(folder_result);
        }
        Ok(result)
    }

    fn run_select_with_fixpoint(
        &self,
        folder: &str,
        folder_id: u32,
        where_sql: &str,
        ctx: &Arc<SearchContext>,
        cancel: &Cancellable,
    ) -> Result<HashSet<IndexKey>> {
        let mut matched_uids = HashSet::new();
        loop {
            cancel.check()?;
            matched_uids.clear();
            self.db.select_matching_uids(folder, where_sql, |uid| {
                matched_uids.insert(uid);
                Ok(())
            })?;

            let pending = ctx.take_pending_ops();
            if pending.is_empty() {
                break;
            }
            debug!(
                "store search {}: {} pending remote ops in folder {}, bulk-resolving",
                self.search_id,
                pending.len(),
                folder
            );
            self.bulk_resolve(ctx, pending);
        }

        Ok(matched_uids
            .into_iter()
            .map(|uid| (self.store_id.clone(), folder_id, uid))
            .collect())
    }

    /// Resolves a pass's unresolved ops so the next rerun's UDF calls find a
    /// cached answer instead of re-recording the same op (spec.md §4.4
    /// execution step 4). No addressbook or external body-search provider is
    /// in scope, so both kinds resolve to their documented safe default
    /// rather than a real lookup.
    fn bulk_resolve(&self, ctx: &Arc<SearchContext>, pending: Vec<PendingOpKey>) {
        for key in pending {
            let outcome = match key.op_kind.as_str() {
                "addressbook" => true,
                "body" => false,
                _ => false,
            };
            ctx.resolve(key, outcome);
        }
    }

    fn load_thread_items(&self, folder: &str, folder_id: u32) -> Result<Vec<ThreadItem>> {
        let mut items = Vec::new();
        self.db.read_messages(folder, |record| {
            let part = record.part();
            let Some(message_id_hash) = part.message_id else {
                return Ok(());
            };
            items.push(ThreadItem {
                store: self.store_id.clone(),
                folder_id,
                uid: record.uid.clone(),
                subject: record.subject.clone(),
                message_id_hash,
                references: part.references,
            });
            Ok(())
        })?;
        Ok(items)
    }

    /// Uids matching the rebuilt expression, grouped by folder name.
    pub fn get_uids_sync(&self, cancel: &Cancellable) -> Result<HashMap<String, Vec<String>>> {
        self.require_ready()?;
        *self.state.lock().unwrap() = SearchState::Executing;
        let mut by_folder: HashMap<String, Vec<String>> = HashMap::new();
        let folder_ids: HashMap<u32, String> = self
            .folders
            .iter()
            .filter_map(|f| {
                let r = self.db.read_folder(f).ok()?;
                r.exists().then_some((r.folder_id, f.clone()))
            })
            .collect();

        for (store, folder_id, uid) in self.result.read().unwrap().iter() {
            cancel.check()?;
            if store != &self.store_id {
                continue;
            }
            if let Some(name) = folder_ids.get(folder_id) {
                by_folder.entry(name.clone()).or_default().push(uid.clone());
            }
        }
        *self.state.lock().unwrap() = SearchState::Ready;
        Ok(by_folder)
    }

    /// Like `get_uids_sync` but loads the full [`MessageInfo`] for each hit.
    pub fn get_items_sync(&self, cancel: &Cancellable) -> Result<Vec<MessageInfo>> {
        let by_folder = self.get_uids_sync(cancel)?;
        *self.state.lock().unwrap() = SearchState::Executing;
        let mut items = Vec::new();
        for (folder, uids) in by_folder {
            for uid in uids {
                cancel.check()?;
                if let Some(record) = self.db.read_message(&folder, &uid)? {
                    items.push(MessageInfo::from_record(record));
                }
            }
        }
        *self.state.lock().unwrap() = SearchState::Ready;
        Ok(items)
    }

    fn require_ready(&self) -> Result<()> {
        if self.dirty || self.state() == SearchState::New {
            return Err(StoreError::Invalid(
                "get_uids_sync/get_items_sync called before rebuild_sync".to_string(),
            ));
        }
        Ok(())
    }
}

impl Drop for StoreSearch {
    fn drop(&mut self) {
        self.registry.unregister(self.search_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::MessageIdHash;
    use crate::models::folder::FolderRecord;
    use crate::models::message::{MessageRecord, flags};
    use crate::search::ast::Expr;
    use tempfile::tempdir;

    fn open_store() -> (Arc<StoreDb>, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let db = Arc::new(StoreDb::open(dir.path().join("folders.db")).unwrap());
        db.write_folder("Inbox", &FolderRecord::zero("Inbox")).unwrap();
        (db, dir)
    }

    #[test]
    fn basic_flag_search_excludes_seen() {
        let (db, _dir) = open_store();
        let mut seen = MessageRecord::new("m1");
        seen.flags = flags::SEEN;
        db.write_message("Inbox", &seen).unwrap();
        db.write_message("Inbox", &MessageRecord::new("m2")).unwrap();
        let mut junk = MessageRecord::new("m3");
        junk.flags = flags::JUNK;
        db.write_message("Inbox", &junk).unwrap();

        let mut search = StoreSearch::new(Arc::clone(&db), "store-a");
        search.set_folders(vec!["Inbox".to_string()]);
        search.set_expression(Expr::Not(Box::new(Expr::SystemFlag("seen".to_string()))));
        let cancel = Cancellable::new();
        search.rebuild_sync(&cancel).unwrap();
        let uids = search.get_uids_sync(&cancel).unwrap();
        let mut got = uids.get("Inbox").cloned().unwrap_or_default();
        got.sort();
        assert_eq!(got, vec!["m2".to_string(), "m3".to_string()]);
    }

    #[test]
    fn short_circuit_or_skips_body_fetch() {
        let (db, _dir) = open_store();
        db.write_message("Inbox", &MessageRecord::new("m1")).unwrap();
        let mut search = StoreSearch::new(Arc::clone(&db), "store-a");
        search.set_folders(vec!["Inbox".to_string()]);
        search.set_expression(Expr::Or(vec![
            Expr::Bool(true),
            Expr::BodyContains("anything".to_string()),
        ]));
        let cancel = Cancellable::new();
        search.rebuild_sync(&cancel).unwrap();
        let uids = search.get_uids_sync(&cancel).unwrap();
        assert_eq!(uids.get("Inbox").unwrap(), &vec!["m1".to_string()]);
    }

    #[test]
    fn match_threads_all_pulls_in_whole_conversation() {
        let (db, _dir) = open_store();
        let mut a = MessageRecord::new("a");
        a.set_part(&crate::models::message::MessagePart {
            message_id: Some(MessageIdHash::from_raw("<a@x>")),
            references: vec![],
        });
        let mut b = MessageRecord::new("b");
        b.flags = flags::FLAGGED;
        b.set_part(&crate::models::message::MessagePart {
            message_id: Some(MessageIdHash::from_raw("<b@x>")),
            references: vec![MessageIdHash::from_raw("<a@x>")],
        });
        let mut c = MessageRecord::new("c");
        c.set_part(&crate::models::message::MessagePart {
            message_id: Some(MessageIdHash::from_raw("<c@x>")),
            references: vec![MessageIdHash::from_raw("<a@x>"), MessageIdHash::from_raw("<b@x>")],
        });
        let mut d = MessageRecord::new("d");
        d.set_part(&crate::models::message::MessagePart {
            message_id: Some(MessageIdHash::from_raw("<d@x>")),
            references: vec![],
        });
        for m in [&a, &b, &c, &d] {
            db.write_message("Inbox", m).unwrap();
        }

        let mut search = StoreSearch::new(Arc::clone(&db), "store-a");
        search.set_folders(vec!["Inbox".to_string()]);
        search.set_expression(Expr::MatchThreads {
            kind: crate::search::ast::ThreadKind::All,
            include_subject: false,
            expr: Box::new(Expr::SystemFlag("flagged".to_string())),
        });
        let cancel = Cancellable::new();
        search.rebuild_sync(&cancel).unwrap();
        let uids = search.get_uids_sync(&cancel).unwrap();
        let mut got = uids.get("Inbox").cloned().unwrap_or_default();
        got.sort();
        assert_eq!(got, vec!["a".to_string(), "b".to_string(), "c".to_string()]);
    }

    #[test]
    fn get_uids_before_rebuild_is_invalid() {
        let (db, _dir) = open_store();
        let search = StoreSearch::new(Arc::clone(&db), "store-a");
        let cancel = Cancellable::new();
        assert!(matches!(search.get_uids_sync(&cancel), Err(StoreError::Invalid(_))));
    }
}
