//! # Firing sequence
//!
//! Per-pass state machine over a [`Schedule`](crate::schedule::Schedule).
//!
//! Each call to [`FiringSequence::next_firing`] evaluates, in order:
//!
//! 1. the previous firing was a hard stop: the pass ends;
//! 2. cached firings of the current subgraph are handed out;
//! 3. an open control actor has fired: its enabled branches are asked for,
//!    taken dependents are spliced in front of the cursor and dependents of
//!    the other branches are recorded as unexecuted;
//! 4. the next independent tag's subgraph is flattened into the cache;
//! 5. nothing is left: the pass is done.
//!
//! All per-pass state lives here. The schedule is shared read-only, so a
//! new sequence always starts from the static lists.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use im::Vector;
use tracing::{debug, warn};

use tempo_core::{ScheduleError, ScheduleResult, TagId};

use crate::schedule::{FiringRecord, ScheduleData};

/// Where a firing sequence is in its pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SequenceState {
    /// Taking the next entry from the independent list.
    Advancing,
    /// Handing out the firings of one subgraph.
    AtSubgraphFiring,
    /// Resolving the taken branches of a control actor.
    AtBranchExpansion,
    Done,
}

/// Tells the sequence which branches a control actor enabled when it fired.
pub trait BranchOracle {
    /// Names of the enabled output branches of `control`, which has just
    /// been fired by the caller.
    ///
    /// # Errors
    ///
    /// Any error aborts the current pass.
    fn enabled_branches(&self, control: &FiringRecord) -> ScheduleResult<Vec<String>>;
}

impl<F> BranchOracle for F
where
    F: Fn(&FiringRecord) -> ScheduleResult<Vec<String>>,
{
    fn enabled_branches(&self, control: &FiringRecord) -> ScheduleResult<Vec<String>> {
        self(control)
    }
}

/// One execution pass over a schedule.
#[derive(Debug)]
pub struct FiringSequence {
    data: Arc<ScheduleData>,
    cursor: Vector<TagId>,
    cached: VecDeque<FiringRecord>,
    /// Control tag whose firing is cached and whose branches are pending.
    open_control: Option<(TagId, FiringRecord)>,
    last_was_break: bool,
    skipped: HashSet<TagId>,
    fired: HashSet<TagId>,
    loop_counts: HashMap<TagId, usize>,
    stop: Option<Arc<AtomicBool>>,
    state: SequenceState,
}

impl FiringSequence {
    pub(crate) fn new(data: Arc<ScheduleData>) -> Self {
        let cursor = data.independent.clone();
        Self {
            data,
            cursor,
            cached: VecDeque::new(),
            open_control: None,
            last_was_break: false,
            skipped: HashSet::new(),
            fired: HashSet::new(),
            loop_counts: HashMap::new(),
            stop: None,
            state: SequenceState::Advancing,
        }
    }

    /// Stop the pass cleanly once `flag` is set. Checked before every firing.
    #[must_use]
    pub fn with_stop_flag(mut self, flag: Arc<AtomicBool>) -> Self {
        self.stop = Some(flag);
        self
    }

    #[must_use]
    pub const fn state(&self) -> SequenceState {
        self.state
    }

    #[must_use]
    pub fn is_done(&self) -> bool {
        self.state == SequenceState::Done
    }

    /// The next actor to fire, or `None` when the pass is over.
    ///
    /// The caller fires each record before asking for the next one; when a
    /// control actor was fired, `oracle` is asked which branches it enabled.
    ///
    /// # Errors
    ///
    /// * `ConcurrentStructuralChange` if the model changed since the
    ///   schedule was built.
    /// * `UnknownBranch` if the oracle names a branch the actor lacks.
    /// * `IterationLimitExceeded` if a repeating control loops too often.
    /// * Any error returned by the oracle.
    ///
    /// Every error ends the pass.
    pub fn next_firing<O>(&mut self, oracle: &O) -> ScheduleResult<Option<FiringRecord>>
    where
        O: BranchOracle + ?Sized,
    {
        if self.state == SequenceState::Done {
            return Ok(None);
        }
        if let Err(e) = self.check_generation() {
            self.finish();
            return Err(e);
        }
        if self.stop_requested() {
            warn!(
                pending = self.cursor.len(),
                cached = self.cached.len(),
                "firing pass stopped on request"
            );
            self.finish();
            return Ok(None);
        }

        match self.advance(oracle) {
            Ok(Some(record)) => Ok(Some(record)),
            Ok(None) => {
                self.finish();
                Ok(None)
            }
            Err(e) => {
                warn!(error = %e, "firing pass aborted");
                self.finish();
                Err(e)
            }
        }
    }

    fn advance<O>(&mut self, oracle: &O) -> ScheduleResult<Option<FiringRecord>>
    where
        O: BranchOracle + ?Sized,
    {
        loop {
            if self.last_was_break {
                return Ok(None);
            }

            if let Some(record) = self.cached.pop_front() {
                self.state = SequenceState::AtSubgraphFiring;
                self.last_was_break = record.hard_stop;
                if let Some(tag) = record.tag {
                    self.fired.insert(tag);
                }
                return Ok(Some(record));
            }

            if let Some((control, record)) = self.open_control.take() {
                self.state = SequenceState::AtBranchExpansion;
                self.expand(control, &record, oracle)?;
                continue;
            }

            match self.cursor.pop_front() {
                Some(tag) => {
                    self.state = SequenceState::Advancing;
                    self.open(tag)?;
                }
                None => return Ok(None),
            }
        }
    }

    /// Flatten `tag`'s subgraph into the cache.
    fn open(&mut self, tag: TagId) -> ScheduleResult<()> {
        let subgraph = self.data.subgraphs.get(&tag).ok_or_else(|| {
            ScheduleError::missing_tag(tag.to_string(), "tag has no subgraph in this schedule")
        })?;
        self.cached = subgraph.firings(&self.data.graph).into();

        if self.data.branches.is_control(tag) {
            self.open_control = self
                .cached
                .iter()
                .find(|r| r.tag == Some(tag))
                .map(|r| (tag, r.clone()));
        }
        Ok(())
    }

    fn expand<O>(&mut self, control: TagId, record: &FiringRecord, oracle: &O) -> ScheduleResult<()>
    where
        O: BranchOracle + ?Sized,
    {
        let data = Arc::clone(&self.data);
        let Some(entry) = data.branches.entry(control) else {
            return Ok(());
        };

        let enabled = oracle.enabled_branches(record)?;
        if let Some(unknown) = enabled.iter().find(|name| entry.branch(name).is_none()) {
            return Err(ScheduleError::unknown_branch(
                entry.actor_name.clone(),
                unknown.clone(),
            ));
        }
        let is_enabled = |name: &str| enabled.iter().any(|e| e == name);

        let mut taken: Vec<TagId> = entry
            .branches
            .iter()
            .filter(|b| is_enabled(b.name.as_str()))
            .flat_map(|b| b.dependents.iter().copied())
            .collect();
        taken.sort_by_key(|t| (data.tags.get(t).map(|i| i.priority), *t));
        taken.dedup();

        let repeats = data
            .tags
            .get(&control)
            .and_then(|info| info.repeat_branch.as_deref())
            .is_some_and(is_enabled);
        if repeats {
            let count = self.loop_counts.entry(control).or_insert(0);
            *count = count.saturating_add(1);
            if *count > data.max_loop_iterations {
                return Err(ScheduleError::IterationLimitExceeded {
                    actor: entry.actor_name.clone(),
                    limit: data.max_loop_iterations,
                });
            }
            self.cursor.push_front(control);
        }
        for tag in taken.iter().rev() {
            self.cursor.push_front(*tag);
        }

        let not_taken: Vec<TagId> = entry
            .branches
            .iter()
            .filter(|b| !is_enabled(b.name.as_str()))
            .flat_map(|b| b.dependents.iter().copied())
            .collect();
        self.skip_transitively(not_taken);

        debug!(
            control = %entry.actor_name,
            enabled = ?enabled,
            spliced = taken.len(),
            repeats,
            "branches expanded"
        );
        Ok(())
    }

    /// Record `tags`, and everything gated by control actors among them, as
    /// skipped in this pass.
    fn skip_transitively(&mut self, tags: Vec<TagId>) {
        let mut stack = tags;
        while let Some(tag) = stack.pop() {
            if !self.skipped.insert(tag) {
                continue;
            }
            if let Some(entry) = self.data.branches.entry(tag) {
                stack.extend(entry.all_dependents());
            }
        }
    }

    fn check_generation(&self) -> ScheduleResult<()> {
        let current = self.data.generation.current();
        if current == self.data.built_at {
            Ok(())
        } else {
            Err(ScheduleError::ConcurrentStructuralChange {
                built: self.data.built_at,
                current,
            })
        }
    }

    fn stop_requested(&self) -> bool {
        self.stop
            .as_ref()
            .is_some_and(|flag| flag.load(Ordering::Acquire))
    }

    fn finish(&mut self) {
        self.cached.clear();
        self.open_control = None;
        self.state = SequenceState::Done;
    }

    /// The caller could not fire `record`: end the pass and return the
    /// error to surface.
    pub fn report_not_ready(&mut self, record: &FiringRecord) -> ScheduleError {
        warn!(actor = %record, "actor not ready, firing pass aborted");
        self.finish();
        ScheduleError::not_ready(record.actor_name.clone())
    }

    /// Tags skipped because their branch was not taken and that did not
    /// fire later in the pass, sorted by priority.
    #[must_use]
    pub fn unexecuted(&self) -> Vec<TagId> {
        let mut tags: Vec<TagId> = self
            .skipped
            .iter()
            .filter(|t| !self.fired.contains(t))
            .copied()
            .collect();
        tags.sort_by_key(|t| (self.data.tags.get(t).map(|i| i.priority), *t));
        tags
    }

    /// Adapt to an iterator; it ends after the first error.
    pub fn iter_with<'a, O>(
        &'a mut self,
        oracle: &'a O,
    ) -> impl Iterator<Item = ScheduleResult<FiringRecord>> + 'a
    where
        O: BranchOracle + ?Sized,
    {
        std::iter::from_fn(move || self.next_firing(oracle).transpose())
    }

    /// Run the whole pass, collecting every firing.
    ///
    /// # Errors
    ///
    /// Returns the first error of [`FiringSequence::next_firing`].
    pub fn drain_with<O>(&mut self, oracle: &O) -> ScheduleResult<Vec<FiringRecord>>
    where
        O: BranchOracle + ?Sized,
    {
        self.iter_with(oracle).collect()
    }
}
