//! Completion state: subtree toggling, bottom-up recalculation, and the
//! per-day completion ratios shown on the week header.
//!
//! A leaf's `completed` flag is only ever set by the user. A node with
//! children is completed exactly when all of its children are.

use chrono::{Days, NaiveDate};

use crate::exercise::{Exercise, ExerciseId};
use crate::tree::ExerciseTree;

/// Set `completed` on `node` and every descendant.
pub fn toggle_recursive(node: &mut Exercise, completed: bool) {
    node.completed = completed;
    for child in &mut node.children {
        toggle_recursive(child, completed);
    }
}

/// Completion derived from children, or `None` for a leaf.
pub fn derived_completion(node: &Exercise) -> Option<bool> {
    if node.children.is_empty() {
        None
    } else {
        Some(node.children.iter().all(|c| c.completed))
    }
}

/// Recompute `completed` on `start` and every ancestor above it.
///
/// Pass the `parent_id` of the node that changed. Childless nodes on the
/// way up keep their flag. Returns the ids whose flag actually flipped.
pub fn recalculate_ancestors(tree: &mut ExerciseTree, start: Option<ExerciseId>) -> Vec<ExerciseId> {
    let chain: Vec<ExerciseId> = tree.ancestor_chain(start).iter().map(|e| e.id).collect();
    let mut flipped = Vec::new();
    for id in chain {
        let Some(node) = tree.find_mut(id) else {
            break;
        };
        if let Some(completed) = derived_completion(node) {
            if node.completed != completed {
                node.completed = completed;
                flipped.push(id);
            }
        }
    }
    flipped
}

/// Share of the top-level exercises on `date` that are completed.
pub fn completion_ratio(tree: &ExerciseTree, date: NaiveDate) -> f64 {
    let (done, total) = tree
        .roots_on(date)
        .fold((0usize, 0usize), |(done, total), e| (done + usize::from(e.completed), total + 1));
    if total == 0 {
        0.0
    } else {
        done as f64 / total as f64
    }
}

/// Completion ratios for the seven days starting at `start`.
pub fn week_ratios(tree: &ExerciseTree, start: NaiveDate) -> [f64; 7] {
    let mut ratios = [0.0; 7];
    for (offset, ratio) in ratios.iter_mut().enumerate() {
        if let Some(date) = start.checked_add_days(Days::new(offset as u64)) {
            *ratio = completion_ratio(tree, date);
        }
    }
    ratios
}

/// Intensity bucket for a day's completion ratio.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompletionShade {
    Empty,
    Faint,
    Light,
    Medium,
    Strong,
    Full,
}

impl CompletionShade {
    pub fn from_ratio(ratio: f64) -> Self {
        if ratio <= 0.0 || ratio.is_nan() {
            Self::Empty
        } else if ratio <= 0.2 {
            Self::Faint
        } else if ratio <= 0.4 {
            Self::Light
        } else if ratio <= 0.6 {
            Self::Medium
        } else if ratio <= 0.8 {
            Self::Strong
        } else {
            Self::Full
        }
    }

    /// Single-character gauge for terminal output.
    pub fn glyph(self) -> char {
        match self {
            Self::Empty => '·',
            Self::Faint => '░',
            Self::Light => '▒',
            Self::Medium => '▓',
            Self::Strong => '▆',
            Self::Full => '█',
        }
    }
}

impl std::fmt::Display for CompletionShade {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            Self::Empty => "empty",
            Self::Faint => "faint",
            Self::Light => "light",
            Self::Medium => "medium",
            Self::Strong => "strong",
            Self::Full => "full",
        };
        f.write_str(label)
    }
}
