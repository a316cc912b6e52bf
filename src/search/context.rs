//! The per-search state the UDF registry looks up by opaque identifier
//! (spec.md §4.1 UDFs, §4.4 UDF contracts).
//!
//! Every connection opened by [`crate::store::db::StoreDb`] registers the
//! thirteen scalar functions once; each call carries the issuing search's
//! opaque integer id as its first SQL argument, and the function looks the
//! live [`SearchContext`] up in this registry to do its work. A context is
//! inserted when a search starts executing and removed when it finishes —
//! "it holds a registration in the StoreDB only for the duration of a
//! query" (spec.md §3, Ownership).

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use crate::models::MessageInfo;

/// `(store, folder_id, uid)` — the SearchIndex element (spec.md §3).
pub type IndexKey = (String, u32, String);

/// A bulk-resolution outcome for one pending remote op, keyed the way
/// spec.md §4.4 step 3 describes: `(op_kind, needle, header_name)` crossed
/// with uid.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PendingOpKey {
    pub op_kind: String,
    pub needle: String,
    pub header_name: String,
    pub uid: String,
}

/// Shared state for one in-flight `StoreSearch` execution. Cheap to share
/// behind an `Arc` because the UDF closures only ever hold a registry
/// lookup's clone of it, never the registry itself.
pub struct SearchContext {
    pub search_id: i64,
    /// Identity token of the owning store; compared, never dereferenced
    /// (spec.md §3 SearchIndex: "the store pointer is compared by
    /// identity").
    pub store_id: String,
    /// The folder id the currently-running SELECT targets; updated by the
    /// engine before preparing each folder's statement, read by
    /// `is_folder_id`.
    pub current_folder_id: Mutex<u32>,
    /// The result set being computed this execution (spec.md §3
    /// SearchIndex, used both as the live WHERE-clause membership test
    /// after a match-threads rebuild and as the final output).
    pub result_index: RwLock<HashSet<IndexKey>>,
    /// Auxiliary named indexes attached via `in-match-index`.
    pub match_indexes: RwLock<HashMap<String, Arc<RwLock<HashSet<IndexKey>>>>>,
    /// Loaded (in-memory) infos a summary has handed this search, keyed by
    /// uid, so UDFs prefer in-memory edits over stale DB columns
    /// (`from_loaded_info_or_db`, `search_header`, `get_user_tag`).
    pub loaded_infos: RwLock<HashMap<String, MessageInfo>>,
    /// Ops a UDF could not resolve this pass; drained and bulk-resolved
    /// between SELECT reruns (spec.md §4.4 execution step 3-4).
    pub pending_ops: Mutex<Vec<PendingOpKey>>,
    /// Resolved outcomes from a previous bulk-resolution pass, consulted
    /// before recording a new pending op.
    pub resolved_ops: RwLock<HashMap<PendingOpKey, bool>>,
}

impl SearchContext {
    pub fn new(search_id: i64, store_id: impl Into<String>) -> Self {
        Self {
            search_id,
            store_id: store_id.into(),
            current_folder_id: Mutex::new(0),
            result_index: RwLock::new(HashSet::new()),
            match_indexes: RwLock::new(HashMap::new()),
            loaded_infos: RwLock::new(HashMap::new()),
            pending_ops: Mutex::new(Vec::new()),
            resolved_ops: RwLock::new(HashMap::new()),
        }
    }

    pub fn set_current_folder(&self, folder_id: u32) {
        *self.current_folder_id.lock().unwrap() = folder_id;
    }

    pub fn index_key(&self, uid: &str) -> IndexKey {
        (
            self.store_id.clone(),
            *self.current_folder_id.lock().unwrap(),
            uid.to_string(),
        )
    }

    pub fn record_pending_op(&self, key: PendingOpKey) {
        self.pending_ops.lock().unwrap().push(key);
    }

    /// Drain this pass's pending ops, leaving the set empty for the next
    /// SELECT rerun to repopulate.
    pub fn take_pending_ops(&self) -> Vec<PendingOpKey> {
        std::mem::take(&mut self.pending_ops.lock().unwrap())
    }

    pub fn resolve(&self, key: PendingOpKey, outcome: bool) {
        self.resolved_ops.write().unwrap().insert(key, outcome);
    }

    pub fn resolution(&self, key: &PendingOpKey) -> Option<bool> {
        self.resolved_ops.read().unwrap().get(key).copied()
    }
}

/// Issues unique search ids and holds the live contexts, shared between
/// `StoreDb` (which registers the UDFs that read it) and `StoreSearch`
/// (which inserts/removes its own context around each execution).
#[derive(Clone)]
pub struct SearchRegistry {
    next_id: Arc<AtomicI64>,
    contexts: Arc<RwLock<HashMap<i64, Arc<SearchContext>>>>,
}

impl SearchRegistry {
    pub fn new() -> Self {
        Self {
            next_id: Arc::new(AtomicI64::new(1)),
            contexts: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub fn allocate_id(&self) -> i64 {
        self.next_id.fetch_add(1, Ordering::SeqCst)
    }

    pub fn register(&self, ctx: Arc<SearchContext>) {
        self.contexts.write().unwrap().insert(ctx.search_id, ctx);
    }

    pub fn unregister(&self, search_id: i64) {
        self.contexts.write().unwrap().remove(&search_id);
    }

    pub fn get(&self, search_id: i64) -> Option<Arc<SearchContext>> {
        self.contexts.read().unwrap().get(&search_id).cloned()
    }
}

impl Default for SearchRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_lookup_unregister_roundtrip() {
        let registry = SearchRegistry::new();
        let id = registry.allocate_id();
        let ctx = Arc::new(SearchContext::new(id, "store-a"));
        registry.register(Arc::clone(&ctx));
        assert!(registry.get(id).is_some());
        registry.unregister(id);
        assert!(registry.get(id).is_none());
    }

    #[test]
    fn pending_ops_drain_between_passes() {
        let ctx = SearchContext::new(1, "store-a");
        ctx.record_pending_op(PendingOpKey {
            op_kind: "addressbook".into(),
            needle: "a@b.com".into(),
            header_name: "from".into(),
            uid: "u1".into(),
        });
        let drained = ctx.take_pending_ops();
        assert_eq!(drained.len(), 1);
        assert!(ctx.take_pending_ops().is_empty());
    }
}
