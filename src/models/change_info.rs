//! The per-folder change-tracking state machine (spec.md §4.2).

use std::collections::HashSet;

/// Which of the three mutually-exclusive sets a uid currently belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeState {
    None,
    Added,
    Removed,
    Changed,
}

/// A snapshot of everything accumulated since the last notify, handed to
/// whatever consumes "folder changed" events.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChangeInfoDiff {
    pub added: Vec<String>,
    pub removed: Vec<String>,
    pub changed: Vec<String>,
    pub recent: Vec<String>,
}

impl ChangeInfoDiff {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty()
            && self.removed.is_empty()
            && self.changed.is_empty()
            && self.recent.is_empty()
    }

    /// Append `other`'s entries after this diff's, for coalescing a second
    /// pending emission into the first rather than scheduling a new one.
    pub fn extend(&mut self, other: ChangeInfoDiff) {
        self.added.extend(other.added);
        self.removed.extend(other.removed);
        self.changed.extend(other.changed);
        self.recent.extend(other.recent);
    }
}

/// Tracks `added`/`removed`/`changed`/`recent` uid sets for one folder, per
/// the state machine of spec.md §4.2. A uid is in at most one of the first
/// three sets at any time; `recent` and `filter` are additive and never
/// diffed against the other three.
#[derive(Debug, Clone, Default)]
pub struct ChangeInfo {
    added: HashSet<String>,
    removed: HashSet<String>,
    changed: HashSet<String>,
    recent: HashSet<String>,
    /// Recent uids the filter pipeline has not yet consumed.
    filter: HashSet<String>,
    freeze_depth: u32,
    changed_frozen: ChangeInfoDiff,
}

impl ChangeInfo {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self, uid: &str) -> ChangeState {
        if self.added.contains(uid) {
            ChangeState::Added
        } else if self.removed.contains(uid) {
            ChangeState::Removed
        } else if self.changed.contains(uid) {
            ChangeState::Changed
        } else {
            ChangeState::None
        }
    }

    fn move_to(&mut self, uid: &str, target: ChangeState) {
        self.added.remove(uid);
        self.removed.remove(uid);
        self.changed.remove(uid);
        match target {
            ChangeState::Added => {
                self.added.insert(uid.to_string());
            }
            ChangeState::Removed => {
                self.removed.insert(uid.to_string());
            }
            ChangeState::Changed => {
                self.changed.insert(uid.to_string());
            }
            ChangeState::None => {}
        }
    }

    /// ∅→A, A→A, R→C, C→A.
    pub fn add_uid(&mut self, uid: &str) {
        let next = match self.state(uid) {
            ChangeState::None | ChangeState::Added | ChangeState::Changed => ChangeState::Added,
            ChangeState::Removed => ChangeState::Changed,
        };
        self.move_to(uid, next);
    }

    /// Always → R, from any state.
    pub fn remove_uid(&mut self, uid: &str) {
        self.move_to(uid, ChangeState::Removed);
    }

    /// ∅→C, A→A, R→R, C→C.
    pub fn change_uid(&mut self, uid: &str) {
        let next = match self.state(uid) {
            ChangeState::None | ChangeState::Changed => ChangeState::Changed,
            ChangeState::Added => ChangeState::Added,
            ChangeState::Removed => ChangeState::Removed,
        };
        self.move_to(uid, next);
    }

    pub fn add_recent(&mut self, uid: &str) {
        self.recent.insert(uid.to_string());
        self.filter.insert(uid.to_string());
    }

    /// Uids the filter pipeline has consumed.
    pub fn clear_filter(&mut self, uid: &str) {
        self.filter.remove(uid);
    }

    pub fn pending_filter(&self) -> impl Iterator<Item = &str> {
        self.filter.iter().map(String::as_str)
    }

    /// Compare `source` (a previously prepared snapshot of uids known to
    /// exist) against everything accumulated since: any uid present in
    /// `source` but never touched by `add_uid`/`remove_uid`/`change_uid`
    /// since is considered gone and is folded into `removed`.
    pub fn build_diff(&mut self, source: &HashSet<String>) {
        let untouched: Vec<String> = source
            .iter()
            .filter(|uid| self.state(uid) == ChangeState::None)
            .cloned()
            .collect();
        for uid in untouched {
            self.remove_uid(&uid);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.added.is_empty()
            && self.removed.is_empty()
            && self.changed.is_empty()
            && self.recent.is_empty()
    }

    /// Snapshot the accumulated sets into a diff and clear them, as happens
    /// on every successful notify.
    pub fn take_diff(&mut self) -> ChangeInfoDiff {
        ChangeInfoDiff {
            added: self.added.drain().collect(),
            removed: self.removed.drain().collect(),
            changed: self.changed.drain().collect(),
            recent: self.recent.drain().collect(),
        }
    }

    /// Raise the freeze counter; while frozen, change events accumulate in
    /// `changed_frozen` instead of notifying.
    pub fn freeze(&mut self) {
        self.freeze_depth += 1;
    }

    /// Lower the freeze counter. Returns the consolidated diff to emit as a
    /// single notification once the counter reaches zero and there is
    /// something to report.
    pub fn thaw(&mut self) -> Option<ChangeInfoDiff> {
        if self.freeze_depth == 0 {
            return None;
        }
        self.freeze_depth -= 1;
        if self.freeze_depth > 0 {
            return None;
        }
        if self.changed_frozen.is_empty() {
            return None;
        }
        Some(std::mem::take(&mut self.changed_frozen))
    }

    pub fn is_frozen(&self) -> bool {
        self.freeze_depth > 0
    }

    /// Fold the current accumulated sets into the frozen diff instead of
    /// emitting, used while `is_frozen()` is true.
    pub fn fold_into_frozen(&mut self) {
        let diff = self.take_diff();
        self.changed_frozen.extend(diff);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn remove_always_wins() {
        let mut ci = ChangeInfo::new();
        ci.change_uid("1");
        ci.remove_uid("1");
        assert_eq!(ci.state("1"), ChangeState::Removed);
    }

    #[test]
    fn change_after_add_stays_added() {
        let mut ci = ChangeInfo::new();
        ci.add_uid("1");
        ci.change_uid("1");
        assert_eq!(ci.state("1"), ChangeState::Added);
    }

    #[test]
    fn add_after_removed_is_changed() {
        let mut ci = ChangeInfo::new();
        ci.remove_uid("1");
        ci.add_uid("1");
        assert_eq!(ci.state("1"), ChangeState::Changed);
    }

    #[test]
    fn build_diff_removes_untouched_uids() {
        let mut ci = ChangeInfo::new();
        ci.change_uid("seen");
        let mut source = HashSet::new();
        source.insert("seen".to_string());
        source.insert("gone".to_string());
        ci.build_diff(&source);
        assert_eq!(ci.state("gone"), ChangeState::Removed);
        assert_eq!(ci.state("seen"), ChangeState::Changed);
    }

    #[test]
    fn freeze_thaw_consolidates_single_notification() {
        let mut ci = ChangeInfo::new();
        ci.freeze();
        ci.add_uid("1");
        ci.fold_into_frozen();
        ci.change_uid("2");
        ci.fold_into_frozen();
        let diff = ci.thaw().expect("single freeze depth thaws immediately");
        assert_eq!(diff.added, vec!["1".to_string()]);
        assert_eq!(diff.changed, vec!["2".to_string()]);
    }

    #[test]
    fn nested_freeze_only_emits_at_zero() {
        let mut ci = ChangeInfo::new();
        ci.freeze();
        ci.freeze();
        ci.add_uid("1");
        ci.fold_into_frozen();
        assert!(ci.thaw().is_none());
        let diff = ci.thaw();
        assert!(diff.is_some());
    }

    #[test]
    fn take_diff_clears_sets() {
        let mut ci = ChangeInfo::new();
        ci.add_uid("1");
        let diff = ci.take_diff();
        assert_eq!(diff.added, vec!["1".to_string()]);
        assert!(ci.is_empty());
    }
}
