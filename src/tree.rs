//! Ordered forest of exercises and the primitives that walk it.
//!
//! Top-level exercises of every loaded day live side by side in
//! [`ExerciseTree::roots`]; children are nested inside their parent.
//! Lookups that miss are not errors: callers get `None` or `false` and the
//! tree is left untouched.

use std::collections::{HashMap, HashSet};

use chrono::NaiveDate;

use crate::exercise::{Exercise, ExerciseId};

/// A forest of exercise trees.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExerciseTree {
    roots: Vec<Exercise>,
}

impl ExerciseTree {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_roots(roots: Vec<Exercise>) -> Self {
        Self { roots }
    }

    /// Assemble a forest from flat exercises linked by `parent_id`.
    ///
    /// Siblings are ordered by position. Exercises whose parent is not part
    /// of `flat` are dropped.
    pub fn from_flat(flat: Vec<Exercise>) -> Self {
        let known: HashSet<ExerciseId> = flat.iter().map(|e| e.id).collect();
        let mut by_parent: HashMap<Option<ExerciseId>, Vec<Exercise>> = HashMap::new();
        for mut ex in flat {
            if let Some(parent) = ex.parent_id {
                if !known.contains(&parent) {
                    tracing::warn!(id = %ex.id, parent = %parent, "dropping exercise with unknown parent");
                    continue;
                }
            }
            ex.children.clear();
            by_parent.entry(ex.parent_id).or_default().push(ex);
        }

        fn attach(
            parent: Option<ExerciseId>,
            by_parent: &mut HashMap<Option<ExerciseId>, Vec<Exercise>>,
        ) -> Vec<Exercise> {
            let mut nodes = by_parent.remove(&parent).unwrap_or_default();
            nodes.sort_by_key(|e| (e.date, e.position));
            for node in &mut nodes {
                node.children = attach(Some(node.id), by_parent);
            }
            nodes
        }

        let roots = attach(None, &mut by_parent);
        Self { roots }
    }

    pub fn roots(&self) -> &[Exercise] {
        &self.roots
    }

    pub fn is_empty(&self) -> bool {
        self.roots.is_empty()
    }

    /// Total number of exercises at every level.
    pub fn len(&self) -> usize {
        fn count(nodes: &[Exercise]) -> usize {
            nodes.iter().map(|n| 1 + count(&n.children)).sum()
        }
        count(&self.roots)
    }

    /// Top-level exercises scheduled on `date`, in position order.
    pub fn roots_on(&self, date: NaiveDate) -> impl Iterator<Item = &Exercise> {
        self.roots.iter().filter(move |e| e.date == date)
    }

    /// Replace all top-level exercises of `date` (and their subtrees).
    pub fn replace_day(&mut self, date: NaiveDate, roots: Vec<Exercise>) {
        self.roots.retain(|e| e.date != date);
        self.roots.extend(roots);
    }

    /// Depth-first search across the whole forest.
    pub fn find(&self, id: ExerciseId) -> Option<&Exercise> {
        fn walk(nodes: &[Exercise], id: ExerciseId) -> Option<&Exercise> {
            for node in nodes {
                if node.id == id {
                    return Some(node);
                }
                if let Some(found) = walk(&node.children, id) {
                    return Some(found);
                }
            }
            None
        }
        walk(&self.roots, id)
    }

    pub fn find_mut(&mut self, id: ExerciseId) -> Option<&mut Exercise> {
        fn walk(nodes: &mut [Exercise], id: ExerciseId) -> Option<&mut Exercise> {
            for node in nodes.iter_mut() {
                if node.id == id {
                    return Some(node);
                }
                if let Some(found) = walk(&mut node.children, id) {
                    return Some(found);
                }
            }
            None
        }
        walk(&mut self.roots, id)
    }

    pub fn contains(&self, id: ExerciseId) -> bool {
        self.find(id).is_some()
    }

    /// Append `node` to the children of `parent`, or to the roots when
    /// `parent` is `None`. Returns `false` (and drops nothing into the tree)
    /// when the parent does not exist.
    pub fn insert_child(&mut self, parent: Option<ExerciseId>, node: Exercise) -> bool {
        match parent {
            None => {
                self.roots.push(node);
                true
            }
            Some(parent_id) => match self.find_mut(parent_id) {
                Some(parent) => {
                    parent.children.push(node);
                    true
                }
                None => false,
            },
        }
    }

    /// Remove the exercise and its whole subtree, at whatever depth it lives.
    pub fn remove(&mut self, id: ExerciseId) -> Option<Exercise> {
        fn walk(nodes: &mut Vec<Exercise>, id: ExerciseId) -> Option<Exercise> {
            if let Some(idx) = nodes.iter().position(|n| n.id == id) {
                return Some(nodes.remove(idx));
            }
            nodes.iter_mut().find_map(|n| walk(&mut n.children, id))
        }
        walk(&mut self.roots, id)
    }

    /// The exercise `start` followed by each of its ancestors up to the
    /// root. Pass a node's `parent_id` to get that node's ancestor chain,
    /// immediate parent first.
    pub fn ancestor_chain(&self, start: Option<ExerciseId>) -> Vec<&Exercise> {
        let mut chain: Vec<&Exercise> = Vec::new();
        let mut cursor = start;
        while let Some(id) = cursor {
            let Some(node) = self.find(id) else {
                break;
            };
            if chain.iter().any(|seen| seen.id == node.id) {
                // A cycle would violate the tree invariant; stop rather than spin.
                break;
            }
            chain.push(node);
            cursor = node.parent_id;
        }
        chain
    }

    /// Position for a new exercise appended under `parent`.
    ///
    /// Top-level siblings are scoped by date. The result is one past the
    /// highest sibling position so that gaps left by deletions never lead
    /// to duplicates. `None` when that position does not fit in a `u32`.
    pub fn next_position(&self, parent: Option<ExerciseId>, date: NaiveDate) -> Option<u32> {
        let max = match parent {
            None => self.roots_on(date).map(|e| e.position).max(),
            Some(id) => self
                .find(id)
                .and_then(|p| p.children.iter().map(|c| c.position).max()),
        };
        max.unwrap_or(0).checked_add(1)
    }
}

/// Each given exercise followed by its descendants, depth-first.
///
/// Overlapping inputs (a node together with one of its ancestors) yield each
/// exercise only once, at its first occurrence.
pub fn flatten<'a>(nodes: &[&'a Exercise]) -> Vec<&'a Exercise> {
    fn walk<'a>(node: &'a Exercise, seen: &mut HashSet<ExerciseId>, out: &mut Vec<&'a Exercise>) {
        if !seen.insert(node.id) {
            return;
        }
        out.push(node);
        for child in &node.children {
            walk(child, seen, out);
        }
    }

    let mut seen = HashSet::new();
    let mut out = Vec::new();
    for node in nodes {
        walk(node, &mut seen, &mut out);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 6, 1).unwrap()
    }

    fn saved(id: u64) -> ExerciseId {
        ExerciseId::Saved(id)
    }

    fn node(id: u64, parent: Option<u64>, position: u32) -> Exercise {
        Exercise::new(saved(id), parent.map(saved), day(), &format!("ex-{id}")).with_position(position)
    }

    /// 1 ─┬─ 2 ── 4
    ///    └─ 3
    /// 5
    fn sample() -> ExerciseTree {
        ExerciseTree::from_roots(vec![
            node(1, None, 1)
                .with_child(node(2, Some(1), 1).with_child(node(4, Some(2), 1)))
                .with_child(node(3, Some(1), 2)),
            node(5, None, 2),
        ])
    }

    #[test]
    fn find_searches_every_level() {
        let tree = sample();
        assert_eq!(tree.find(saved(4)).unwrap().name, "ex-4");
        assert_eq!(tree.find(saved(5)).unwrap().name, "ex-5");
        assert!(tree.find(saved(9)).is_none());
        assert_eq!(tree.len(), 5);
    }

    #[test]
    fn insert_child_appends_or_noops() {
        let mut tree = sample();
        assert!(tree.insert_child(Some(saved(3)), node(6, Some(3), 1)));
        assert_eq!(tree.find(saved(3)).unwrap().children.len(), 1);

        assert!(tree.insert_child(None, node(7, None, 3)));
        assert_eq!(tree.roots().len(), 3);

        let before = tree.clone();
        assert!(!tree.insert_child(Some(saved(42)), node(8, Some(42), 1)));
        assert_eq!(tree, before);
    }

    #[test]
    fn remove_drops_whole_subtree() {
        let mut tree = sample();
        let removed = tree.remove(saved(2)).unwrap();
        assert_eq!(removed.children.len(), 1);
        assert!(tree.find(saved(2)).is_none());
        assert!(tree.find(saved(4)).is_none());
        assert!(tree.find(saved(3)).is_some());

        assert!(tree.remove(saved(2)).is_none());
    }

    #[test]
    fn removed_ids_are_never_found() {
        for id in 1..=5 {
            let mut tree = sample();
            tree.remove(saved(id));
            assert!(tree.find(saved(id)).is_none(), "id {id} still present");
        }
    }

    #[test]
    fn ancestor_chain_runs_parent_to_root() {
        let tree = sample();
        let ids: Vec<_> = tree
            .ancestor_chain(Some(saved(2)))
            .iter()
            .map(|e| e.id)
            .collect();
        assert_eq!(ids, vec![saved(2), saved(1)]);
        assert!(tree.ancestor_chain(None).is_empty());
        assert!(tree.ancestor_chain(Some(saved(42))).is_empty());
    }

    #[test]
    fn flatten_is_depth_first() {
        let a = node(1, None, 1)
            .with_child(node(2, Some(1), 1))
            .with_child(node(3, Some(1), 2));
        let ids: Vec<_> = flatten(&[&a]).iter().map(|e| e.id).collect();
        assert_eq!(ids, vec![saved(1), saved(2), saved(3)]);
    }

    #[test]
    fn flatten_skips_overlap() {
        let tree = sample();
        let leaf = tree.find(saved(4)).unwrap();
        let mut inputs = vec![leaf];
        inputs.extend(tree.ancestor_chain(leaf.parent_id));
        let ids: Vec<_> = flatten(&inputs).iter().map(|e| e.id).collect();
        assert_eq!(ids, vec![saved(4), saved(2), saved(1), saved(3)]);
    }

    #[test]
    fn next_position_skips_gaps() {
        let mut tree = sample();
        assert_eq!(tree.next_position(Some(saved(1)), day()), Some(3));
        tree.remove(saved(2));
        assert_eq!(tree.next_position(Some(saved(1)), day()), Some(3));
        assert_eq!(tree.next_position(Some(saved(4)), day()), Some(1));
        assert_eq!(tree.next_position(None, day()), Some(3));

        let other_day = NaiveDate::from_ymd_opt(2024, 6, 2).unwrap();
        assert_eq!(tree.next_position(None, other_day), Some(1));
    }

    #[test]
    fn next_position_after_max_sibling_is_none() {
        let mut tree = sample();
        tree.insert_child(None, node(9, None, u32::MAX));
        assert_eq!(tree.next_position(None, day()), None);
        assert_eq!(tree.next_position(Some(saved(9)), day()), Some(1));
    }

    #[test]
    fn from_flat_nests_and_orders() {
        let flat = vec![
            node(3, Some(1), 2),
            node(4, Some(2), 1),
            node(5, None, 2),
            node(2, Some(1), 1),
            node(1, None, 1),
            node(9, Some(77), 1),
        ];
        let tree = ExerciseTree::from_flat(flat);
        assert_eq!(tree, sample());
    }

    #[test]
    fn replace_day_keeps_other_days() {
        let mut tree = sample();
        let other_day = NaiveDate::from_ymd_opt(2024, 6, 2).unwrap();
        tree.insert_child(
            None,
            Exercise::new(saved(10), None, other_day, "Swim"),
        );
        tree.replace_day(day(), vec![node(20, None, 1)]);

        assert_eq!(tree.roots_on(day()).count(), 1);
        assert_eq!(tree.roots_on(other_day).count(), 1);
        assert!(tree.find(saved(4)).is_none());
    }
}
