//! MatchThreads / ResultIndex: conversation-tree construction and the
//! `match-threads` expansion policies (spec.md §4.5).
//!
//! Back-pointer graphs (child -> parent, in the original) become an arena +
//! dense index here, per spec.md §9's redesign guidance: nodes live in one
//! `Vec`, linked by index, no shared ownership or weak references needed.

use std::collections::{HashMap, HashSet};

use crate::models::message::MessageIdHash;
use crate::models::thread_item::ThreadItem;
use crate::search::context::IndexKey;
use crate::search::ast::ThreadKind;

pub type NodeId = usize;

#[derive(Debug, Clone)]
pub struct ThreadNode {
    pub hash: MessageIdHash,
    /// `None` for a stub node created only because something referenced it.
    pub item: Option<ThreadItem>,
    pub parent: Option<NodeId>,
    pub children: Vec<NodeId>,
}

/// The conversation forest built from a flat array of [`ThreadItem`]
/// (spec.md §4.5 "Tree construction").
pub struct ThreadTree {
    nodes: Vec<ThreadNode>,
    roots: Vec<NodeId>,
    by_key: HashMap<IndexKey, NodeId>,
}

const REPLY_PREFIXES: &[&str] = &["re:", "fwd:", "fw:", "aw:"];

fn strip_reply_prefix(s: &str) -> Option<&str> {
    let lower = s.to_ascii_lowercase();
    for prefix in REPLY_PREFIXES {
        if lower.starts_with(prefix) {
            return Some(s[prefix.len()..].trim_start());
        }
    }
    None
}

fn strip_list_tag(s: &str) -> Option<&str> {
    let rest = s.strip_prefix('[')?;
    let end = rest.find(']')?;
    Some(rest[end + 1..].trim_start())
}

/// Strip reply prefixes and `[list-tag]` markers from the front, repeating
/// until neither matches, per spec.md §4.5. The reply-prefix list itself is
/// a documented Open Question decision (see DESIGN.md) since the original
/// pulls it from locale data.
fn normalize_subject(subject: &str) -> String {
    let mut s = subject.trim();
    loop {
        if let Some(next) = strip_list_tag(s) {
            s = next;
            continue;
        }
        if let Some(next) = strip_reply_prefix(s) {
            s = next;
            continue;
        }
        break;
    }
    s.to_ascii_lowercase()
}

impl ThreadTree {
    /// Builds the tree; `include_subject` runs the subject-grouping pass
    /// over roots after reference-linking (spec.md §4.5 step 3). Sort is
    /// always off during match-threads (spec.md §4.5 Inputs), so item order
    /// within `items` is preserved verbatim in child lists.
    pub fn build(items: &[ThreadItem], include_subject: bool) -> Self {
        let mut nodes: Vec<ThreadNode> = Vec::new();
        let mut by_hash: HashMap<MessageIdHash, NodeId> = HashMap::new();

        fn ensure(
            nodes: &mut Vec<ThreadNode>,
            by_hash: &mut HashMap<MessageIdHash, NodeId>,
            hash: MessageIdHash,
        ) -> NodeId {
            if let Some(&id) = by_hash.get(&hash) {
                return id;
            }
            let id = nodes.len();
            nodes.push(ThreadNode {
                hash,
                item: None,
                parent: None,
                children: Vec::new(),
            });
            by_hash.insert(hash, id);
            id
        }

        fn attach(nodes: &mut [ThreadNode], parent: NodeId, child: NodeId) {
            if parent == child || nodes[child].parent.is_some() {
                return;
            }
            nodes[child].parent = Some(parent);
            nodes[parent].children.push(child);
        }

        for item in items {
            let own_id = ensure(&mut nodes, &mut by_hash, item.message_id_hash);
            nodes[own_id].item = Some(item.clone());

            let mut prev: Option<NodeId> = None;
            for &rhash in &item.references {
                let rid = ensure(&mut nodes, &mut by_hash, rhash);
                if let Some(p) = prev {
                    attach(&mut nodes, p, rid);
                }
                prev = Some(rid);
            }
            if let Some(p) = prev {
                attach(&mut nodes, p, own_id);
            }
        }

        let mut roots: Vec<NodeId> = (0..nodes.len()).filter(|&i| nodes[i].parent.is_none()).collect();

        if include_subject {
            group_by_subject(&mut nodes, &mut roots);
        }

        let by_key: HashMap<IndexKey, NodeId> = nodes
            .iter()
            .enumerate()
            .filter_map(|(id, n)| n.item.as_ref().map(|item| (item.key(), id)))
            .collect();

        Self { nodes, roots, by_key }
    }

    pub fn node(&self, id: NodeId) -> &ThreadNode {
        &self.nodes[id]
    }

    pub fn roots(&self) -> &[NodeId] {
        &self.roots
    }

    fn root_of(&self, mut id: NodeId) -> NodeId {
        while let Some(p) = self.nodes[id].parent {
            id = p;
        }
        id
    }

    fn ancestors_of(&self, id: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut cur = id;
        while let Some(p) = self.nodes[cur].parent {
            out.push(p);
            cur = p;
        }
        out
    }

    fn descendants_from(&self, id: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut stack = vec![id];
        while let Some(n) = stack.pop() {
            out.push(n);
            stack.extend(self.nodes[n].children.iter().copied());
        }
        out
    }

    fn keys_for(&self, ids: impl IntoIterator<Item = NodeId>) -> HashSet<IndexKey> {
        ids.into_iter()
            .filter_map(|id| self.nodes[id].item.as_ref().map(ThreadItem::key))
            .collect()
    }

    /// Expands `result` per `kind` (spec.md §4.5 "Expansion"). Items in
    /// `result` with no matching node (not present in this tree's items)
    /// pass through unchanged for `none`/`single`/`replies`/`replies_parents`
    /// and are simply absent from `all`'s reachability union.
    pub fn expand(&self, result: &HashSet<IndexKey>, kind: ThreadKind) -> HashSet<IndexKey> {
        match kind {
            ThreadKind::None => result.clone(),
            ThreadKind::Single => result
                .iter()
                .filter(|key| {
                    self.by_key.get(*key).is_some_and(|&id| {
                        self.nodes[id].parent.is_none() && self.nodes[id].children.is_empty()
                    })
                })
                .cloned()
                .collect(),
            ThreadKind::All => {
                let mut out = HashSet::new();
                for key in result {
                    if let Some(&id) = self.by_key.get(key) {
                        let root = self.root_of(id);
                        out.extend(self.keys_for(self.descendants_from(root)));
                    } else {
                        out.insert(key.clone());
                    }
                }
                out
            }
            ThreadKind::Replies => {
                let mut out = HashSet::new();
                for key in result {
                    if let Some(&id) = self.by_key.get(key) {
                        out.extend(self.keys_for(self.descendants_from(id)));
                    } else {
                        out.insert(key.clone());
                    }
                }
                out
            }
            ThreadKind::RepliesParents => {
                let mut out = HashSet::new();
                for key in result {
                    if let Some(&id) = self.by_key.get(key) {
                        out.extend(self.keys_for(self.ancestors_of(id)));
                        let root = self.root_of(id);
                        out.extend(self.keys_for(self.descendants_from(root)));
                    } else {
                        out.insert(key.clone());
                    }
                }
                out
            }
        }
    }
}

/// Group roots sharing a normalized, non-empty subject under a synthetic
/// (itemless) parent node, mutating `nodes`/`roots` in place.
fn group_by_subject(nodes: &mut Vec<ThreadNode>, roots: &mut Vec<NodeId>) {
    let mut groups: HashMap<String, Vec<NodeId>> = HashMap::new();
    for &root in roots.iter() {
        let Some(item) = &nodes[root].item else { continue };
        let normalized = normalize_subject(&item.subject);
        if normalized.is_empty() {
            continue;
        }
        groups.entry(normalized).or_default().push(root);
    }

    let mut new_roots = Vec::new();
    let mut grouped: HashSet<NodeId> = HashSet::new();

    for members in groups.into_values() {
        if members.len() < 2 {
            continue;
        }
        let synthetic_id = nodes.len();
        nodes.push(ThreadNode {
            hash: members[0].into_hash_placeholder(),
            item: None,
            parent: None,
            children: members.clone(),
        });
        for &m in &members {
            nodes[m].parent = Some(synthetic_id);
            grouped.insert(m);
        }
        new_roots.push(synthetic_id);
    }

    for &root in roots.iter() {
        if !grouped.contains(&root) {
            new_roots.push(root);
        }
    }
    *roots = new_roots;
}

/// Synthetic-parent nodes need *a* hash to satisfy `ThreadNode`'s field;
/// it is never looked up by value (no item references a synthetic node),
/// so any distinguishing value works.
trait IntoHashPlaceholder {
    fn into_hash_placeholder(self) -> MessageIdHash;
}
impl IntoHashPlaceholder for NodeId {
    fn into_hash_placeholder(self) -> MessageIdHash {
        MessageIdHash(self as u64 | (1u64 << 63))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(uid: &str, subject: &str, id: &str, refs: &[&str]) -> ThreadItem {
        ThreadItem {
            store: "s".to_string(),
            folder_id: 1,
            uid: uid.to_string(),
            subject: subject.to_string(),
            message_id_hash: MessageIdHash::from_raw(id),
            references: refs.iter().map(|r| MessageIdHash::from_raw(r)).collect(),
        }
    }

    fn key(uid: &str) -> IndexKey {
        ("s".to_string(), 1, uid.to_string())
    }

    #[test]
    fn match_threads_all_expands_full_conversation() {
        let items = vec![
            item("a", "hi", "a@x", &[]),
            item("b", "re: hi", "b@x", &["a@x"]),
            item("c", "re: hi", "c@x", &["a@x", "b@x"]),
            item("d", "unrelated", "d@x", &[]),
        ];
        let tree = ThreadTree::build(&items, false);
        let result: HashSet<IndexKey> = [key("b")].into_iter().collect();
        let expanded = tree.expand(&result, ThreadKind::All);
        let expected: HashSet<IndexKey> = [key("a"), key("b"), key("c")].into_iter().collect();
        assert_eq!(expanded, expected);
    }

    #[test]
    fn match_threads_none_is_identity() {
        let items = vec![item("a", "hi", "a@x", &[]), item("b", "re: hi", "b@x", &["a@x"])];
        let tree = ThreadTree::build(&items, false);
        let result: HashSet<IndexKey> = [key("b")].into_iter().collect();
        assert_eq!(tree.expand(&result, ThreadKind::None), result);
    }

    #[test]
    fn match_threads_single_keeps_only_standalone_items() {
        let items = vec![item("a", "hi", "a@x", &[]), item("b", "re: hi", "b@x", &["a@x"])];
        let tree = ThreadTree::build(&items, false);
        let result: HashSet<IndexKey> = [key("a"), key("b")].into_iter().collect();
        let expanded = tree.expand(&result, ThreadKind::Single);
        assert!(expanded.is_empty());
    }

    #[test]
    fn match_threads_replies_adds_descendants_only() {
        let items = vec![
            item("a", "hi", "a@x", &[]),
            item("b", "re: hi", "b@x", &["a@x"]),
            item("c", "re: hi", "c@x", &["a@x", "b@x"]),
        ];
        let tree = ThreadTree::build(&items, false);
        let result: HashSet<IndexKey> = [key("a")].into_iter().collect();
        let expanded = tree.expand(&result, ThreadKind::Replies);
        let expected: HashSet<IndexKey> = [key("a"), key("b"), key("c")].into_iter().collect();
        assert_eq!(expanded, expected);
    }

    #[test]
    fn match_threads_replies_parents_adds_ancestors_and_root_descendants() {
        let items = vec![
            item("a", "hi", "a@x", &[]),
            item("b", "re: hi", "b@x", &["a@x"]),
            item("c", "re: hi", "c@x", &["a@x", "b@x"]),
        ];
        let tree = ThreadTree::build(&items, false);
        let result: HashSet<IndexKey> = [key("b")].into_iter().collect();
        let expanded = tree.expand(&result, ThreadKind::RepliesParents);
        let expected: HashSet<IndexKey> = [key("a"), key("b"), key("c")].into_iter().collect();
        assert_eq!(expanded, expected);
    }

    #[test]
    fn subject_grouping_joins_unrelated_roots_sharing_subject() {
        let items = vec![
            item("a", "lunch?", "a@x", &[]),
            item("b", "Re: lunch?", "b@x", &[]),
        ];
        let tree = ThreadTree::build(&items, true);
        assert_eq!(tree.roots().len(), 1);
        let synthetic = tree.roots()[0];
        assert_eq!(tree.node(synthetic).children.len(), 2);
    }

    #[test]
    fn unknown_reference_creates_stub_node() {
        let items = vec![item("b", "re: hi", "b@x", &["missing@x"])];
        let tree = ThreadTree::build(&items, false);
        // one stub for missing@x, one real node for b@x
        assert_eq!(tree.roots().len(), 1);
    }

    #[test]
    fn normalize_subject_strips_prefixes_and_list_tag() {
        assert_eq!(normalize_subject("Re: [list] hello"), "hello");
        assert_eq!(normalize_subject("Fwd: Re: hello"), "hello");
    }
}
