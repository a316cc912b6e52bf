//! `ThreadItem`: the flat input record MatchThreads builds trees from
//! (spec.md §3, §4.5).

use crate::models::message::MessageIdHash;

/// One message as seen by the thread builder: enough to bucket and link it,
/// nothing more. `store` is an opaque identity token (spec.md §3 compares
/// it by identity, not by value) — callers pass whatever distinguishes
/// their store instances, typically its StoreDB path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThreadItem {
    pub store: String,
    pub folder_id: u32,
    pub uid: String,
    pub subject: String,
    pub message_id_hash: MessageIdHash,
    pub references: Vec<MessageIdHash>,
}

impl ThreadItem {
    pub fn key(&self) -> (String, u32, String) {
        (self.store.clone(), self.folder_id, self.uid.clone())
    }
}
