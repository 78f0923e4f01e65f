//! Transition selection and exit/entry set computation.
//!
//! Everything here is a pure function of the document and the current
//! configuration. The interpreter applies the results.

use crate::configuration::Configuration;
use scxmlrt_model::{ContainerId, Document, Event, StateId, StateKind, TransitionId, TransitionKind, ROOT};
use std::collections::{BTreeSet, HashMap};
use std::iter;

/// States to enter in one microstep, plus the content that goes with
/// default entries.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct EntrySet {
    /// Entered states; iterate for parent-before-child order.
    pub states: BTreeSet<StateId>,
    /// Compound states entered through their default initial transition.
    pub default_entry: BTreeSet<StateId>,
    /// Default-history transition content, keyed by the history's parent.
    pub history_content: HashMap<StateId, ContainerId>,
}

/// Targets and content of a compound state's default entry.
///
/// Explicit `initial` transition first, then an `<initial>` child, then the
/// first child state in document order.
pub fn default_initial(doc: &Document, state: StateId) -> (Vec<StateId>, Option<ContainerId>) {
    let node = doc.state(state);
    if let Some(t) = node.initial {
        let t = doc.transition(t);
        return (t.targets.clone(), t.content);
    }
    let initial_child = node
        .children
        .iter()
        .copied()
        .find(|c| doc.kind(*c) == StateKind::Initial);
    if let Some(child) = initial_child {
        if let Some(&t) = doc.state(child).transitions.first() {
            let t = doc.transition(t);
            return (t.targets.clone(), t.content);
        }
    }
    (doc.child_states(state).take(1).collect(), None)
}

/// Finds the enabled, conflict-free transitions for `event` (or the
/// eventless ones when `event` is `None`).
///
/// For each active atomic state the innermost state on its ancestor chain
/// with a matching transition wins, and within that state the first matching
/// transition in document order. `guard` decides conditions.
pub fn select_transitions(
    doc: &Document,
    config: &Configuration,
    event: Option<&Event>,
    guard: &mut dyn FnMut(TransitionId) -> bool,
) -> Vec<TransitionId> {
    let mut enabled: Vec<TransitionId> = Vec::new();
    for atomic in config.atomic_states(doc) {
        'chain: for state in iter::once(atomic).chain(doc.proper_ancestors(atomic, None)) {
            for &t in &doc.state(state).transitions {
                let transition = doc.transition(t);
                let matches = match event {
                    None => transition.is_eventless(),
                    Some(e) => !transition.is_eventless() && transition.matches(&e.name),
                };
                if !matches {
                    continue;
                }
                let allowed = match transition.condition {
                    None => true,
                    Some(_) => guard(t),
                };
                if allowed {
                    if !enabled.contains(&t) {
                        enabled.push(t);
                    }
                    break 'chain;
                }
            }
        }
    }
    remove_conflicting(doc, config, enabled)
}

/// Keeps a set of transitions whose exit sets are pairwise disjoint.
///
/// Candidates are visited in document order of their source; a candidate
/// whose exit set meets one already kept is dropped. Sources that are
/// ancestors come first in document order, so a transition leaving a
/// parallel state preempts transitions inside its regions.
pub fn remove_conflicting(
    doc: &Document,
    config: &Configuration,
    mut enabled: Vec<TransitionId>,
) -> Vec<TransitionId> {
    // Stable: same-source transitions keep their relative order.
    enabled.sort_by_key(|t| doc.transition(*t).source);

    let mut kept: Vec<(TransitionId, BTreeSet<StateId>)> = Vec::with_capacity(enabled.len());
    for t in enabled {
        let exits = exit_set_of(doc, config, t);
        if kept.iter().any(|(_, other)| !other.is_disjoint(&exits)) {
            continue;
        }
        kept.push((t, exits));
    }
    kept.into_iter().map(|(t, _)| t).collect()
}

/// Targets after resolving history pseudo-states.
pub fn effective_targets(doc: &Document, config: &Configuration, t: TransitionId) -> Vec<StateId> {
    let mut out = Vec::new();
    collect_effective_targets(doc, config, &doc.transition(t).targets, &mut out);
    out
}

fn collect_effective_targets(
    doc: &Document,
    config: &Configuration,
    targets: &[StateId],
    out: &mut Vec<StateId>,
) {
    for &s in targets {
        if let StateKind::History(_) = doc.kind(s) {
            if let Some(recorded) = config.history(s) {
                for &r in recorded {
                    if !out.contains(&r) {
                        out.push(r);
                    }
                }
            } else {
                let defaults = history_default(doc, s).0;
                collect_effective_targets(doc, config, &defaults, out);
            }
        } else if !out.contains(&s) {
            out.push(s);
        }
    }
}

/// Default targets and content of a history pseudo-state. Without an
/// explicit default the parent's default entry is used.
fn history_default(doc: &Document, history: StateId) -> (Vec<StateId>, Option<ContainerId>) {
    match doc.state(history).initial {
        Some(t) => {
            let t = doc.transition(t);
            (t.targets.clone(), t.content)
        }
        None => {
            let parent = doc.parent(history).unwrap_or(ROOT);
            (default_initial(doc, parent).0, None)
        }
    }
}

/// Innermost compound state (or the root) that properly contains every
/// state in `states`.
pub fn find_lcca(doc: &Document, states: &[StateId]) -> StateId {
    let Some((&head, rest)) = states.split_first() else {
        return ROOT;
    };
    for anc in doc.proper_ancestors(head, None) {
        if doc.is_compound(anc) && rest.iter().all(|s| doc.is_descendant(*s, anc)) {
            return anc;
        }
    }
    ROOT
}

/// The state whose descendants a transition exits and enters; `None` for a
/// transition without targets.
pub fn transition_domain(doc: &Document, config: &Configuration, t: TransitionId) -> Option<StateId> {
    let targets = effective_targets(doc, config, t);
    if targets.is_empty() {
        return None;
    }
    let transition = doc.transition(t);
    let source = transition.source;
    if transition.kind == TransitionKind::Internal
        && doc.is_compound(source)
        && targets.iter().all(|s| doc.is_descendant(*s, source))
    {
        return Some(source);
    }
    let mut states = Vec::with_capacity(targets.len() + 1);
    states.push(source);
    states.extend(targets);
    Some(find_lcca(doc, &states))
}

fn exit_set_of(doc: &Document, config: &Configuration, t: TransitionId) -> BTreeSet<StateId> {
    if doc.transition(t).targets.is_empty() {
        return BTreeSet::new();
    }
    match transition_domain(doc, config, t) {
        Some(domain) => config
            .iter()
            .filter(|s| doc.is_descendant(*s, domain))
            .collect(),
        None => BTreeSet::new(),
    }
}

/// States exited by `transitions`, deepest first (reverse document order).
pub fn compute_exit_set(
    doc: &Document,
    config: &Configuration,
    transitions: &[TransitionId],
) -> Vec<StateId> {
    let mut exits = BTreeSet::new();
    for &t in transitions {
        exits.extend(exit_set_of(doc, config, t));
    }
    exits.into_iter().rev().collect()
}

/// States entered by `transitions`.
pub fn compute_entry_set(
    doc: &Document,
    config: &Configuration,
    transitions: &[TransitionId],
) -> EntrySet {
    let mut set = EntrySet::default();
    for &t in transitions {
        for &s in &doc.transition(t).targets {
            add_descendants(doc, config, s, &mut set);
        }
        let domain = transition_domain(doc, config, t);
        for s in effective_targets(doc, config, t) {
            add_ancestors(doc, config, s, domain, &mut set);
        }
    }
    set
}

/// Entry set of the initial configuration.
pub fn initial_entry_set(doc: &Document, config: &Configuration) -> EntrySet {
    let mut set = EntrySet::default();
    add_descendants(doc, config, ROOT, &mut set);
    set
}

fn add_descendants(doc: &Document, config: &Configuration, state: StateId, set: &mut EntrySet) {
    if let StateKind::History(_) = doc.kind(state) {
        let parent = doc.parent(state).unwrap_or(ROOT);
        let targets = match config.history(state) {
            Some(recorded) => recorded.to_vec(),
            None => {
                let (targets, content) = history_default(doc, state);
                if let Some(c) = content {
                    set.history_content.insert(parent, c);
                }
                targets
            }
        };
        for &s in &targets {
            add_descendants(doc, config, s, set);
        }
        for &s in &targets {
            add_ancestors(doc, config, s, Some(parent), set);
        }
        return;
    }

    set.states.insert(state);
    if doc.is_compound(state) {
        set.default_entry.insert(state);
        let (targets, _) = default_initial(doc, state);
        for &s in &targets {
            add_descendants(doc, config, s, set);
        }
        for &s in &targets {
            add_ancestors(doc, config, s, Some(state), set);
        }
    } else if doc.kind(state) == StateKind::Parallel {
        for child in doc.child_states(state) {
            if !set.states.iter().any(|s| doc.is_descendant(*s, child)) {
                add_descendants(doc, config, child, set);
            }
        }
    }
}

fn add_ancestors(
    doc: &Document,
    config: &Configuration,
    state: StateId,
    upto: Option<StateId>,
    set: &mut EntrySet,
) {
    for anc in doc.proper_ancestors(state, upto) {
        set.states.insert(anc);
        if doc.kind(anc) == StateKind::Parallel {
            for child in doc.child_states(anc) {
                if !set.states.iter().any(|s| doc.is_descendant(*s, child)) {
                    add_descendants(doc, config, child, set);
                }
            }
        }
    }
}
