//! Optimistic mutation of an exercise tree against an [`ExerciseStore`].
//!
//! Every mutation runs through the same three steps:
//!
//! 1. **stage**: capture a [`TreeSnapshot`], apply the change locally and
//!    build the store request (the changed node plus, for toggles and adds,
//!    its ancestor chain).
//! 2. **persist**: send the request.
//! 3. **settle**: on success swap a created node's temporary id for the
//!    store's; on any failure restore the snapshot and record a [`Notice`].
//!
//! [`Synchronizer::apply`] runs all three in one call. The phases are also
//! public so a caller can stage further mutations while a request is in
//! flight. Each pending mutation settles against its own snapshot and a late
//! success is accepted as-is; there is no generation check.

use std::time::Duration;

use chrono::NaiveDate;

use crate::client::{ActivityRecord, ExerciseStore};
use crate::completion::{recalculate_ancestors, toggle_recursive};
use crate::error::{StoreError, StoreResult, SyncError, SyncResult};
use crate::exercise::{Exercise, ExerciseDraft, ExerciseId};
use crate::tree::{ExerciseTree, flatten};

/// A change requested by the user.
#[derive(Debug, Clone, PartialEq)]
pub enum Mutation {
    /// Flip completion of a node and its whole subtree.
    Toggle { id: ExerciseId },
    /// Create a node under `parent` (or at the top level of `date`).
    /// Children take their parent's date.
    Add {
        parent: Option<ExerciseId>,
        date: NaiveDate,
        draft: ExerciseDraft,
    },
    Delete { id: ExerciseId },
    /// Replace the editable fields of `updated.id` with those of `updated`.
    Edit { updated: Exercise },
}

impl Mutation {
    fn verb(&self) -> &'static str {
        match self {
            Self::Toggle { .. } => "update",
            Self::Add { .. } => "add",
            Self::Delete { .. } => "delete",
            Self::Edit { .. } => "save",
        }
    }
}

/// Copy of the tree taken before an optimistic change.
#[derive(Debug, Clone)]
pub struct TreeSnapshot(ExerciseTree);

impl TreeSnapshot {
    pub fn capture(tree: &ExerciseTree) -> Self {
        Self(tree.clone())
    }

    pub fn restore(self, tree: &mut ExerciseTree) {
        *tree = self.0;
    }

    pub fn tree(&self) -> &ExerciseTree {
        &self.0
    }
}

/// The store call a staged mutation needs.
#[derive(Debug, Clone, PartialEq)]
pub enum StoreRequest {
    Upsert(Vec<ActivityRecord>),
    Delete(u64),
}

#[derive(Debug, Clone)]
enum Expectation {
    Update,
    Create {
        temp: ExerciseId,
        parent: Option<u64>,
        position: u32,
    },
}

/// A mutation that has been applied locally but not settled.
#[derive(Debug)]
pub struct PendingMutation {
    verb: &'static str,
    snapshot: TreeSnapshot,
    request: StoreRequest,
    expect: Expectation,
}

impl PendingMutation {
    pub fn request(&self) -> &StoreRequest {
        &self.request
    }

    pub fn snapshot(&self) -> &TreeSnapshot {
        &self.snapshot
    }

    /// Temporary id of the node this mutation creates, if any.
    pub fn created(&self) -> Option<ExerciseId> {
        match self.expect {
            Expectation::Create { temp, .. } => Some(temp),
            Expectation::Update => None,
        }
    }
}

/// Result of a settled mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// The target did not exist; nothing was applied or sent.
    Unchanged,
    /// The store accepted the change.
    Persisted,
    /// A new node was stored and its temporary id replaced.
    Created { temp: ExerciseId, id: ExerciseId },
}

/// User-facing failure message recorded on rollback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    pub message: String,
    pub retry_after: Option<Duration>,
}

/// Owns the local exercise tree and keeps it in step with a store.
#[derive(Debug)]
pub struct Synchronizer<S> {
    tree: ExerciseTree,
    store: S,
    notices: Vec<Notice>,
    last_temp: u64,
}

impl<S: ExerciseStore> Synchronizer<S> {
    pub fn new(store: S) -> Self {
        Self::with_tree(store, ExerciseTree::new())
    }

    pub fn with_tree(store: S, tree: ExerciseTree) -> Self {
        Self {
            tree,
            store,
            notices: Vec::new(),
            last_temp: 0,
        }
    }

    pub fn tree(&self) -> &ExerciseTree {
        &self.tree
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut S {
        &mut self.store
    }

    pub fn into_parts(self) -> (ExerciseTree, S) {
        (self.tree, self.store)
    }

    pub fn notices(&self) -> &[Notice] {
        &self.notices
    }

    pub fn take_notices(&mut self) -> Vec<Notice> {
        std::mem::take(&mut self.notices)
    }

    /// Replace the local copy of `date` with what the store holds.
    /// Returns the number of exercises loaded.
    pub fn load_day(&mut self, date: NaiveDate) -> SyncResult<usize> {
        let records = self.store.fetch_day(date)?;
        let flat = records
            .into_iter()
            .map(ActivityRecord::into_exercise)
            .collect::<StoreResult<Vec<_>>>()?;
        let day = ExerciseTree::from_flat(flat);
        let loaded = day.len();
        let roots = day.roots().to_vec();
        self.tree.replace_day(date, roots);
        tracing::debug!(%date, loaded, "loaded day");
        Ok(loaded)
    }

    // -----------------------------------------------------------------------
    // One-call mutations
    // -----------------------------------------------------------------------

    pub fn toggle(&mut self, id: ExerciseId) -> SyncResult<Outcome> {
        self.apply(Mutation::Toggle { id })
    }

    pub fn add(
        &mut self,
        parent: Option<ExerciseId>,
        date: NaiveDate,
        draft: ExerciseDraft,
    ) -> SyncResult<Outcome> {
        self.apply(Mutation::Add {
            parent,
            date,
            draft,
        })
    }

    pub fn delete(&mut self, id: ExerciseId) -> SyncResult<Outcome> {
        self.apply(Mutation::Delete { id })
    }

    pub fn edit(&mut self, updated: Exercise) -> SyncResult<Outcome> {
        self.apply(Mutation::Edit { updated })
    }

    /// Stage, persist and settle `mutation`.
    pub fn apply(&mut self, mutation: Mutation) -> SyncResult<Outcome> {
        let Some(pending) = self.stage(mutation)? else {
            return Ok(Outcome::Unchanged);
        };
        let result = self.persist(&pending);
        self.settle(pending, result)
    }

    // -----------------------------------------------------------------------
    // Phases
    // -----------------------------------------------------------------------

    /// Apply `mutation` to the local tree and prepare its store request.
    ///
    /// Returns `Ok(None)` when the target does not exist. Mutations that
    /// address a node still waiting for its store id are refused before
    /// anything is applied.
    pub fn stage(&mut self, mutation: Mutation) -> SyncResult<Option<PendingMutation>> {
        let verb = mutation.verb();
        match mutation {
            Mutation::Toggle { id } => {
                let Some(node) = self.tree.find(id) else {
                    tracing::debug!(%id, "toggle target not found");
                    return Ok(None);
                };
                let completed = !node.completed;
                let parent = node.parent_id;
                self.ensure_saved(verb, id)?;

                let snapshot = TreeSnapshot::capture(&self.tree);
                if let Some(node) = self.tree.find_mut(id) {
                    toggle_recursive(node, completed);
                }
                recalculate_ancestors(&mut self.tree, parent);
                tracing::debug!(%id, completed, "staged toggle");
                self.finish_stage(verb, snapshot, id, Expectation::Update)
            }

            Mutation::Add {
                parent,
                date,
                draft,
            } => {
                let date = match parent {
                    None => date,
                    Some(parent_id) => match self.tree.find(parent_id) {
                        Some(p) => p.date,
                        None => {
                            tracing::debug!(parent = %parent_id, "add target parent not found");
                            return Ok(None);
                        }
                    },
                };
                if let Some(parent) = parent {
                    self.ensure_saved(verb, parent)?;
                }
                let Some(position) = self.tree.next_position(parent, date) else {
                    let err = SyncError::PositionExhausted {
                        parent: parent.map_or_else(|| format!("none, {date}"), |p| p.to_string()),
                    };
                    self.record_notice(verb, &err);
                    return Err(err);
                };
                self.last_temp += 1;
                let temp = ExerciseId::Temp(self.last_temp);

                let snapshot = TreeSnapshot::capture(&self.tree);
                self.tree
                    .insert_child(parent, draft.into_exercise(temp, parent, date, position));
                recalculate_ancestors(&mut self.tree, parent);
                tracing::debug!(%temp, position, "staged add");
                let expect = Expectation::Create {
                    temp,
                    parent: parent.and_then(ExerciseId::saved),
                    position,
                };
                self.finish_stage(verb, snapshot, temp, expect)
            }

            Mutation::Delete { id } => {
                let Some(node) = self.tree.find(id) else {
                    tracing::debug!(%id, "delete target not found");
                    return Ok(None);
                };
                let parent = node.parent_id;
                let store_id = self.ensure_saved(verb, id)?;

                let snapshot = TreeSnapshot::capture(&self.tree);
                self.tree.remove(id);
                recalculate_ancestors(&mut self.tree, parent);
                tracing::debug!(%id, "staged delete");
                Ok(Some(PendingMutation {
                    verb,
                    snapshot,
                    request: StoreRequest::Delete(store_id),
                    expect: Expectation::Update,
                }))
            }

            Mutation::Edit { updated } => {
                let id = updated.id;
                if !self.tree.contains(id) {
                    tracing::debug!(%id, "edit target not found");
                    return Ok(None);
                }
                self.ensure_saved(verb, id)?;

                let snapshot = TreeSnapshot::capture(&self.tree);
                let record = match self.tree.find_mut(id) {
                    Some(node) => {
                        node.apply_edit(&updated);
                        ActivityRecord::from_exercise(node)
                    }
                    None => Err(StoreError::unexpected(format!("exercise {id} vanished while staging"))),
                };
                match record {
                    Ok(record) => {
                        tracing::debug!(%id, "staged edit");
                        Ok(Some(PendingMutation {
                            verb,
                            snapshot,
                            request: StoreRequest::Upsert(vec![record]),
                            expect: Expectation::Update,
                        }))
                    }
                    Err(err) => Err(self.roll_back(verb, snapshot, err.into())),
                }
            }
        }
    }

    /// Send the request of a staged mutation.
    pub fn persist(&mut self, pending: &PendingMutation) -> StoreResult<Vec<ActivityRecord>> {
        match &pending.request {
            StoreRequest::Upsert(batch) => self.store.upsert_batch(batch),
            StoreRequest::Delete(id) => self.store.delete_one(*id).map(|()| Vec::new()),
        }
    }

    /// Reconcile or roll back a staged mutation given its store result.
    pub fn settle(
        &mut self,
        pending: PendingMutation,
        result: StoreResult<Vec<ActivityRecord>>,
    ) -> SyncResult<Outcome> {
        let PendingMutation {
            verb,
            snapshot,
            expect,
            ..
        } = pending;

        let records = match result {
            Ok(records) => records,
            Err(err) => return Err(self.roll_back(verb, snapshot, err.into())),
        };

        let Expectation::Create {
            temp,
            parent,
            position,
        } = expect
        else {
            return Ok(Outcome::Persisted);
        };

        let Some(record) = records
            .into_iter()
            .find(|r| r.parent_id == parent && r.position == position)
        else {
            let err = SyncError::MissingCreated {
                parent: parent.map_or_else(|| "none".to_string(), |p| p.to_string()),
                position,
            };
            return Err(self.roll_back(verb, snapshot, err));
        };
        let canonical = match record.into_exercise() {
            Ok(ex) => ex,
            Err(err) => return Err(self.roll_back(verb, snapshot, err.into())),
        };
        let id = canonical.id;

        match self.tree.find_mut(temp) {
            Some(node) => {
                let children = std::mem::take(&mut node.children);
                *node = canonical;
                node.children = children;
                tracing::info!(%temp, %id, "reconciled created exercise");
            }
            None => {
                tracing::debug!(%temp, %id, "created exercise no longer in the local tree");
            }
        }
        Ok(Outcome::Created { temp, id })
    }

    // -----------------------------------------------------------------------
    // Helpers
    // -----------------------------------------------------------------------

    /// Build the upsert for `id` plus its ancestor chain, then wrap it up.
    fn finish_stage(
        &mut self,
        verb: &'static str,
        snapshot: TreeSnapshot,
        id: ExerciseId,
        expect: Expectation,
    ) -> SyncResult<Option<PendingMutation>> {
        match self.upsert_request(id) {
            Ok(request) => Ok(Some(PendingMutation {
                verb,
                snapshot,
                request,
                expect,
            })),
            Err(err) => Err(self.roll_back(verb, snapshot, err.into())),
        }
    }

    /// Records for the node, its subtree, and each ancestor's subtree.
    ///
    /// Other nodes that are still waiting for their own create call are left
    /// out so this batch does not create them a second time.
    fn upsert_request(&self, id: ExerciseId) -> StoreResult<StoreRequest> {
        let node = self
            .tree
            .find(id)
            .ok_or_else(|| StoreError::unexpected(format!("exercise {id} vanished while staging")))?;
        let mut affected = vec![node];
        affected.extend(self.tree.ancestor_chain(node.parent_id));

        let records = flatten(&affected)
            .into_iter()
            .filter(|e| !e.id.is_temp() || e.id == id)
            .map(ActivityRecord::from_exercise)
            .collect::<StoreResult<Vec<_>>>()?;
        Ok(StoreRequest::Upsert(records))
    }

    /// Store id of `id`, or a `Pending` error (with notice) for a temp id.
    fn ensure_saved(&mut self, verb: &'static str, id: ExerciseId) -> SyncResult<u64> {
        match id.saved() {
            Some(store_id) => Ok(store_id),
            None => {
                let err = SyncError::Pending { id: id.to_string() };
                self.record_notice(verb, &err);
                Err(err)
            }
        }
    }

    fn roll_back(&mut self, verb: &'static str, snapshot: TreeSnapshot, err: SyncError) -> SyncError {
        snapshot.restore(&mut self.tree);
        tracing::warn!(error = %err, verb, "rolled back optimistic change");
        self.record_notice(verb, &err);
        err
    }

    fn record_notice(&mut self, verb: &str, err: &SyncError) {
        self.notices.push(Notice {
            message: format!("Failed to {verb} exercise: {err}"),
            retry_after: err.retry_after(),
        });
    }
}
