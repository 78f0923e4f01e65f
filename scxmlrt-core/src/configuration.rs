//! The active configuration and recorded history.

use scxmlrt_model::{Document, HistoryKind, StateId, StateKind, ROOT};
use std::collections::{BTreeSet, HashMap};

/// The set of active states, iterated in document order.
///
/// The root is a member while the machine runs but is never reported by name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Configuration {
    active: BTreeSet<StateId>,
    history: HashMap<StateId, Vec<StateId>>,
}

impl Configuration {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, state: StateId) -> bool {
        self.active.contains(&state)
    }

    pub(crate) fn insert(&mut self, state: StateId) -> bool {
        self.active.insert(state)
    }

    pub(crate) fn remove(&mut self, state: StateId) -> bool {
        self.active.remove(&state)
    }

    /// Active states in document order.
    pub fn iter(&self) -> impl DoubleEndedIterator<Item = StateId> + '_ {
        self.active.iter().copied()
    }

    pub fn len(&self) -> usize {
        self.active.len()
    }

    pub fn is_empty(&self) -> bool {
        self.active.is_empty()
    }

    /// Active atomic states in document order.
    pub fn atomic_states<'a>(&'a self, doc: &'a Document) -> impl Iterator<Item = StateId> + 'a {
        self.iter().filter(move |s| doc.is_atomic(*s))
    }

    /// Stores what each history child of the exiting states must restore.
    ///
    /// Must run before any of `exiting` is removed.
    pub(crate) fn record_history(&mut self, doc: &Document, exiting: &[StateId]) {
        for &state in exiting {
            for h in doc.history_children(state) {
                let recorded: Vec<StateId> = match doc.kind(h) {
                    StateKind::History(HistoryKind::Deep) => self
                        .iter()
                        .filter(|s| doc.is_atomic(*s) && doc.is_descendant(*s, state))
                        .collect(),
                    _ => self
                        .iter()
                        .filter(|s| doc.parent(*s) == Some(state))
                        .collect(),
                };
                self.history.insert(h, recorded);
            }
        }
    }

    /// Recorded configuration of a history pseudo-state.
    pub fn history(&self, history: StateId) -> Option<&[StateId]> {
        self.history.get(&history).map(Vec::as_slice)
    }

    /// Returns true if `state` has completed: an active final child for a
    /// compound state, every region completed for a parallel state.
    pub fn is_in_final_state(&self, doc: &Document, state: StateId) -> bool {
        if doc.is_compound(state) {
            doc.child_states(state)
                .any(|c| doc.kind(c) == StateKind::Final && self.contains(c))
        } else if doc.kind(state) == StateKind::Parallel {
            doc.child_states(state)
                .all(|c| self.is_in_final_state(doc, c))
        } else {
            false
        }
    }

    /// Active state names, sorted. With `compress`, states that have an
    /// active child are left out.
    pub fn names(&self, doc: &Document, compress: bool) -> Vec<String> {
        let mut names: Vec<String> = self
            .iter()
            .filter(|s| *s != ROOT)
            .filter(|s| {
                !compress
                    || !self
                        .iter()
                        .any(|other| doc.parent(other) == Some(*s))
            })
            .map(|s| doc.name_of(s).to_string())
            .collect();
        names.sort();
        names
    }

    /// Checks the structural rules of a legal configuration. Returns a
    /// description of the first violation.
    pub fn check_legal(&self, doc: &Document) -> Result<(), String> {
        if self.is_empty() {
            return Ok(());
        }
        for s in self.iter() {
            if doc.kind(s).is_pseudo() {
                return Err(format!("pseudo-state '{}' is active", doc.name_of(s)));
            }
            if let Some(p) = doc.parent(s) {
                if !self.contains(p) {
                    return Err(format!(
                        "'{}' is active but its parent '{}' is not",
                        doc.name_of(s),
                        doc.name_of(p)
                    ));
                }
            }
            let active_children = doc.child_states(s).filter(|c| self.contains(*c)).count();
            let total = doc.child_states(s).count();
            match doc.kind(s) {
                StateKind::Parallel if active_children != total => {
                    return Err(format!(
                        "parallel '{}' has {} of {} regions active",
                        doc.name_of(s),
                        active_children,
                        total
                    ));
                }
                StateKind::Compound if active_children != 1 => {
                    return Err(format!(
                        "compound '{}' has {} active children",
                        doc.name_of(s),
                        active_children
                    ));
                }
                _ => {}
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use scxmlrt_model::DocumentBuilder;

    fn doc() -> Document {
        let mut b = DocumentBuilder::new("m");
        let p = b.parallel("p");
        let a = b.state_in(p, "a");
        b.state_in(a, "a1");
        b.final_in(a, "a2");
        let r = b.state_in(p, "b");
        b.history_in(r, "bh", HistoryKind::Deep);
        let b1 = b.state_in(r, "b1");
        b.state_in(b1, "b1x");
        b.final_in(r, "b2");
        b.build().unwrap()
    }

    fn config_of(doc: &Document, names: &[&str]) -> Configuration {
        let mut c = Configuration::new();
        c.insert(ROOT);
        for n in names {
            c.insert(doc.state_by_name(n).unwrap());
        }
        c
    }

    #[test]
    fn test_names_compressed_and_sorted() {
        let doc = doc();
        let c = config_of(&doc, &["p", "a", "a1", "b", "b1", "b1x"]);
        assert_eq!(c.names(&doc, true), vec!["a1", "b1x"]);
        assert_eq!(
            c.names(&doc, false),
            vec!["a", "a1", "b", "b1", "b1x", "p"]
        );
    }

    #[test]
    fn test_legality() {
        let doc = doc();
        assert!(config_of(&doc, &["p", "a", "a1", "b", "b1", "b1x"])
            .check_legal(&doc)
            .is_ok());
        // Region b missing.
        assert!(config_of(&doc, &["p", "a", "a1"]).check_legal(&doc).is_err());
        // Two children of a.
        assert!(config_of(&doc, &["p", "a", "a1", "a2", "b", "b2"])
            .check_legal(&doc)
            .is_err());
        // Orphan.
        assert!(config_of(&doc, &["a1"]).check_legal(&doc).is_err());
    }

    #[test]
    fn test_final_detection() {
        let doc = doc();
        let p = doc.state_by_name("p").unwrap();
        let a = doc.state_by_name("a").unwrap();
        let c = config_of(&doc, &["p", "a", "a2", "b", "b1", "b1x"]);
        assert!(c.is_in_final_state(&doc, a));
        assert!(!c.is_in_final_state(&doc, p));
        let c = config_of(&doc, &["p", "a", "a2", "b", "b2"]);
        assert!(c.is_in_final_state(&doc, p));
    }

    #[test]
    fn test_deep_history_records_atomic_descendants() {
        let doc = doc();
        let r = doc.state_by_name("b").unwrap();
        let h = doc.state_by_name("bh").unwrap();
        let mut c = config_of(&doc, &["p", "a", "a1", "b", "b1", "b1x"]);
        c.record_history(&doc, &[r]);
        assert_eq!(c.history(h), Some(&[doc.state_by_name("b1x").unwrap()][..]));
    }
}
