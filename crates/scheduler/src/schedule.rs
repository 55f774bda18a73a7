//! # Schedule
//!
//! The static result of one scheduler build: the ordered independent list,
//! the control branch table and the subgraph of every tag. A schedule is
//! immutable and cheap to clone; every execution pass gets its own
//! [`FiringSequence`](crate::firing::FiringSequence).

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use im::Vector;

use tempo_core::{ActorId, Generation, TagId};

use crate::branch::ControlBranchTable;
use crate::firing::FiringSequence;
use crate::graph::DependencyGraph;
use crate::subgraph::Subgraph;

/// One actor firing handed to the caller.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FiringRecord {
    pub actor: ActorId,
    pub actor_name: String,
    /// Entry point to fire on a multi-entry actor.
    pub method: Option<String>,
    /// The tag being fired, `None` for an untagged upstream actor.
    pub tag: Option<TagId>,
    /// The pass ends after this firing.
    pub hard_stop: bool,
}

impl fmt::Display for FiringRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.method {
            Some(method) => write!(f, "{}:{method}", self.actor_name),
            None => f.write_str(&self.actor_name),
        }
    }
}

/// What the firing sequence needs to know about a tag without the model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TagInfo {
    pub tag: TagId,
    pub actor: ActorId,
    pub actor_name: String,
    pub priority: u32,
    pub process: Option<String>,
    /// Branch that reschedules this control tag, if it repeats.
    pub repeat_branch: Option<String>,
}

#[derive(Debug)]
pub(crate) struct ScheduleData {
    pub(crate) generation: Generation,
    pub(crate) built_at: u64,
    pub(crate) independent: Vector<TagId>,
    pub(crate) branches: ControlBranchTable,
    pub(crate) subgraphs: HashMap<TagId, Subgraph>,
    pub(crate) graph: Arc<DependencyGraph>,
    pub(crate) tags: HashMap<TagId, TagInfo>,
    pub(crate) validated: bool,
    pub(crate) max_loop_iterations: usize,
}

/// Static firing plan for one scope or lane.
#[derive(Debug, Clone)]
pub struct Schedule {
    inner: Arc<ScheduleData>,
}

impl Schedule {
    pub(crate) fn new(data: ScheduleData) -> Self {
        Self {
            inner: Arc::new(data),
        }
    }

    pub(crate) fn data(&self) -> Arc<ScheduleData> {
        Arc::clone(&self.inner)
    }

    /// Start a fresh pass. Cursors are copied from the static lists, so
    /// every sequence starts from the same state.
    #[must_use]
    pub fn new_firing_sequence(&self) -> FiringSequence {
        FiringSequence::new(self.data())
    }

    /// Tags that fire on their own, in firing order.
    #[must_use]
    pub fn independent(&self) -> Vec<TagId> {
        self.inner.independent.iter().copied().collect()
    }

    #[must_use]
    pub fn branch_table(&self) -> &ControlBranchTable {
        &self.inner.branches
    }

    #[must_use]
    pub fn subgraph(&self, tag: TagId) -> Option<&Subgraph> {
        self.inner.subgraphs.get(&tag)
    }

    #[must_use]
    pub fn graph(&self) -> &DependencyGraph {
        &self.inner.graph
    }

    #[must_use]
    pub fn tag_info(&self, tag: TagId) -> Option<&TagInfo> {
        self.inner.tags.get(&tag)
    }

    /// Every tag this schedule can fire, sorted by priority.
    #[must_use]
    pub fn tags(&self) -> Vec<TagId> {
        let mut tags: Vec<&TagInfo> = self.inner.tags.values().collect();
        tags.sort_by_key(|info| (info.priority, info.tag));
        tags.into_iter().map(|info| info.tag).collect()
    }

    /// Model generation this schedule was built from.
    #[must_use]
    pub fn built_at(&self) -> u64 {
        self.inner.built_at
    }

    /// False once the model has changed structurally.
    #[must_use]
    pub fn is_current(&self) -> bool {
        self.inner.generation.is_current(self.inner.built_at)
    }

    /// True unless built as a replay pass.
    #[must_use]
    pub fn is_validated(&self) -> bool {
        self.inner.validated
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.tags.is_empty()
    }
}
