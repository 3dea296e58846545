//! Exercise nodes: one workout activity or sub-activity in the tree.

use std::collections::BTreeMap;
use std::fmt;

use chrono::NaiveDate;

/// Name given to exercises added without one.
pub const DEFAULT_EXERCISE_NAME: &str = "New Exercise";

/// Identity of an exercise.
///
/// `Saved` ids are issued by the store. `Temp` ids are synthetic and only
/// live until the create call for that node is reconciled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ExerciseId {
    Saved(u64),
    Temp(u64),
}

impl ExerciseId {
    pub fn is_temp(self) -> bool {
        matches!(self, Self::Temp(_))
    }

    /// The store id, if this exercise has been persisted.
    pub fn saved(self) -> Option<u64> {
        match self {
            Self::Saved(id) => Some(id),
            Self::Temp(_) => None,
        }
    }
}

impl fmt::Display for ExerciseId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Saved(id) => write!(f, "{id}"),
            Self::Temp(id) => write!(f, "tmp-{id}"),
        }
    }
}

/// A node of the exercise tree.
#[derive(Debug, Clone, PartialEq)]
pub struct Exercise {
    pub id: ExerciseId,
    /// Owning node, `None` for top-level exercises of a day.
    pub parent_id: Option<ExerciseId>,
    pub date: NaiveDate,
    pub name: String,
    pub description: String,
    pub notes: String,
    /// Metric name to value. Values are free text and may be empty.
    pub metrics: BTreeMap<String, String>,
    pub completed: bool,
    /// 1-based order among siblings.
    pub position: u32,
    pub children: Vec<Exercise>,
}

impl Exercise {
    pub fn new(id: ExerciseId, parent_id: Option<ExerciseId>, date: NaiveDate, name: &str) -> Self {
        Self {
            id,
            parent_id,
            date,
            name: name.to_string(),
            description: String::new(),
            notes: String::new(),
            metrics: BTreeMap::new(),
            completed: false,
            position: 1,
            children: Vec::new(),
        }
    }

    pub fn with_position(mut self, position: u32) -> Self {
        self.position = position;
        self
    }

    pub fn with_child(mut self, child: Exercise) -> Self {
        self.children.push(child);
        self
    }

    pub fn is_leaf(&self) -> bool {
        self.children.is_empty()
    }

    /// Add or overwrite a metric. Blank keys are ignored.
    pub fn set_metric(&mut self, key: &str, value: &str) {
        let key = key.trim();
        if key.is_empty() {
            return;
        }
        self.metrics.insert(key.to_string(), value.to_string());
    }

    /// Replace the metric stored under `old_key`.
    ///
    /// A blank `new_key` deletes the metric.
    pub fn rename_metric(&mut self, old_key: &str, new_key: &str, value: &str) {
        let new_key = new_key.trim();
        if new_key != old_key {
            self.metrics.remove(old_key);
        }
        if !new_key.is_empty() {
            self.metrics.insert(new_key.to_string(), value.to_string());
        }
    }

    pub fn remove_metric(&mut self, key: &str) -> Option<String> {
        self.metrics.remove(key)
    }

    /// Copy the user-editable fields of `other` onto this node.
    ///
    /// Identity, placement, completion and children are left alone.
    pub fn apply_edit(&mut self, other: &Exercise) {
        self.name.clone_from(&other.name);
        self.description.clone_from(&other.description);
        self.notes.clone_from(&other.notes);
        self.metrics.clone_from(&other.metrics);
    }
}

/// Content for an exercise that does not exist yet.
#[derive(Debug, Clone, PartialEq)]
pub struct ExerciseDraft {
    pub name: String,
    pub description: String,
    pub notes: String,
    pub metrics: BTreeMap<String, String>,
}

impl Default for ExerciseDraft {
    fn default() -> Self {
        Self {
            name: DEFAULT_EXERCISE_NAME.to_string(),
            description: String::new(),
            notes: String::new(),
            metrics: BTreeMap::new(),
        }
    }
}

impl ExerciseDraft {
    pub fn named(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..Default::default()
        }
    }

    pub(crate) fn into_exercise(
        self,
        id: ExerciseId,
        parent_id: Option<ExerciseId>,
        date: NaiveDate,
        position: u32,
    ) -> Exercise {
        Exercise {
            id,
            parent_id,
            date,
            name: self.name,
            description: self.description,
            notes: self.notes,
            metrics: self.metrics,
            completed: false,
            position,
            children: Vec::new(),
        }
    }
}
