//! # Scheduler
//!
//! Orchestrates one schedule build:
//!
//! 1. build (or reuse) the dependency graph for the model's generation;
//! 2. build the branch table for every control tag in the list and merge in
//!    the dependents it discovers;
//! 3. resolve the subgraph of every tag, recording visited nodes;
//! 4. drop branch dependents from the independent list;
//! 5. when validating, reject duplicate priorities among what remains;
//! 6. wrap everything in a [`Schedule`].
//!
//! A failed build leaves the previous cache untouched, except that a graph
//! that built successfully is kept for the next attempt.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use im::Vector;
use itertools::Itertools;
use tracing::{debug, info};

use tempo_core::{Actor, Generation, Model, ScheduleError, ScheduleResult, TagId};

use crate::branch::{BranchTableBuilder, ControlBranchTable};
use crate::config::SchedulerConfig;
use crate::graph::DependencyGraph;
use crate::schedule::{Schedule, ScheduleData, TagInfo};
use crate::subgraph::{SubgraphResolver, VisitedSet};

/// Static structures derived from one model generation.
#[derive(Debug, Clone)]
struct GraphCache {
    /// Counter of the model the graph was built from.
    handle: Generation,
    generation: u64,
    graph: Arc<DependencyGraph>,
    visited: VisitedSet,
}

impl GraphCache {
    /// Built from this very model at its current generation.
    fn serves(&self, model: &Model) -> bool {
        self.handle.same_counter(&model.generation_handle())
            && self.generation == model.generation()
    }
}

/// Builds schedules and remembers which graph nodes they covered.
#[derive(Debug, Clone, Default)]
pub struct Scheduler {
    config: SchedulerConfig,
    cache: Option<GraphCache>,
}

impl Scheduler {
    /// Create a scheduler.
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfig` if `config` fails validation.
    pub fn new(config: SchedulerConfig) -> ScheduleResult<Self> {
        config.validate()?;
        Ok(Self {
            config,
            cache: None,
        })
    }

    #[must_use]
    pub const fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// Build a schedule for `tags`, validating priorities as configured.
    ///
    /// # Errors
    ///
    /// See [`Scheduler::compute_schedule`].
    pub fn build(&mut self, model: &Model, tags: &[TagId]) -> ScheduleResult<Schedule> {
        self.compute_schedule(model, tags, self.config.validate_priorities)
    }

    /// Build a schedule for a replay of unexecuted tags. Priorities are not
    /// checked for uniqueness.
    ///
    /// # Errors
    ///
    /// See [`Scheduler::compute_schedule`].
    pub fn build_replay(&mut self, model: &Model, tags: &[TagId]) -> ScheduleResult<Schedule> {
        self.compute_schedule(model, tags, false)
    }

    /// Build a schedule for `tags`.
    ///
    /// # Errors
    ///
    /// * `StructuralCycle` for any cycle in the graph, a subgraph or the
    ///   branch table.
    /// * `MissingTag` for actors with the wrong number of tags.
    /// * `DuplicatePriority` if `validate` and two independent tags (or two
    ///   dependents of one branch) share a priority.
    /// * `InvalidModel` if a tag is unknown or removed.
    pub fn compute_schedule(
        &mut self,
        model: &Model,
        tags: &[TagId],
        validate: bool,
    ) -> ScheduleResult<Schedule> {
        let (graph, mut visited) = self.graph_for(model)?;

        let mut independent: Vec<TagId> = Vec::with_capacity(tags.len());
        for tag in tags.iter().copied().unique() {
            model.require_tag(tag)?;
            independent.push(tag);
        }

        let mut builder = BranchTableBuilder::new(model, validate);
        for tag in &independent {
            if is_control_tag(model, *tag) {
                builder.add_control_outputs(*tag)?;
            }
        }
        let (branches, discovered) = builder.finish()?;

        let all: Vec<TagId> = independent
            .iter()
            .chain(discovered.iter())
            .copied()
            .unique()
            .collect();

        let resolver = SubgraphResolver::new(&graph);
        let mut subgraphs = HashMap::with_capacity(all.len());
        for tag in &all {
            subgraphs.insert(*tag, resolver.backward_reachable(*tag, &mut visited)?);
        }

        independent.retain(|t| !branches.is_dependent(*t));
        if validate {
            check_unique_priorities(model, &independent)?;
        }
        independent.sort_by_key(|t| (model.tag(*t).map(|r| r.priority()), *t));

        let infos = tag_infos(model, &all)?;

        self.commit_visited(model, visited);

        info!(
            model = %model.name(),
            generation = graph.generation(),
            independent = independent.len(),
            controls = branches.len(),
            dependents = discovered.len(),
            validated = validate,
            "schedule built"
        );

        Ok(Schedule::new(ScheduleData {
            generation: model.generation_handle(),
            built_at: graph.generation(),
            independent: independent.into_iter().collect::<Vector<TagId>>(),
            branches,
            subgraphs,
            graph,
            tags: infos,
            validated: validate,
            max_loop_iterations: self.config.max_loop_iterations,
        }))
    }

    /// Branch table over `tags` without resolving subgraphs. The lane
    /// planner uses it to find branch dependents before partitioning.
    ///
    /// # Errors
    ///
    /// Same as the branch table steps of [`Scheduler::compute_schedule`].
    pub fn branch_table(
        &self,
        model: &Model,
        tags: &[TagId],
        validate: bool,
    ) -> ScheduleResult<ControlBranchTable> {
        let mut builder = BranchTableBuilder::new(model, validate);
        for tag in tags {
            if is_control_tag(model, *tag) {
                builder.add_control_outputs(*tag)?;
            }
        }
        builder.finish().map(|(table, _)| table)
    }

    fn graph_for(&mut self, model: &Model) -> ScheduleResult<(Arc<DependencyGraph>, VisitedSet)> {
        if let Some(cache) = self.cache.as_ref().filter(|c| c.serves(model)) {
            debug!(generation = cache.generation, "reusing dependency graph");
            return Ok((Arc::clone(&cache.graph), cache.visited.clone()));
        }

        let graph = Arc::new(DependencyGraph::build(model)?);
        self.cache = Some(GraphCache {
            handle: model.generation_handle(),
            generation: graph.generation(),
            graph: Arc::clone(&graph),
            visited: VisitedSet::new(),
        });
        Ok((graph, VisitedSet::new()))
    }

    fn commit_visited(&mut self, model: &Model, visited: VisitedSet) {
        if let Some(cache) = self.cache.as_mut().filter(|c| c.serves(model)) {
            cache.visited = visited;
        }
    }

    /// Actors with graph nodes that no built subgraph subsumed, plus
    /// firing actors that never got a graph node at all.
    ///
    /// Meaningful once every schedule (or lane) of the current generation
    /// has been built.
    ///
    /// # Errors
    ///
    /// * `ConcurrentStructuralChange` if the model changed since the last
    ///   build.
    /// * `InvalidModel` if nothing has been built yet, or the last build
    ///   was for another model.
    pub fn unreachable_actors<'m>(&self, model: &'m Model) -> ScheduleResult<Vec<&'m Actor>> {
        let cache = self.cache.as_ref().ok_or_else(|| {
            ScheduleError::invalid_model(format!(
                "no schedule has been built for model '{}'",
                model.name()
            ))
        })?;
        if !cache.handle.same_counter(&model.generation_handle()) {
            return Err(ScheduleError::invalid_model(format!(
                "last schedule was not built for model '{}'",
                model.name()
            )));
        }
        let current = model.generation();
        if cache.generation != current {
            return Err(ScheduleError::ConcurrentStructuralChange {
                built: cache.generation,
                current,
            });
        }

        let graph = &cache.graph;
        let mut with_nodes = HashSet::new();
        let mut unreachable = HashSet::new();
        for node in graph.node_indices() {
            let Some(weight) = graph.node(node) else {
                continue;
            };
            with_nodes.insert(weight.actor);
            if !cache.visited.contains(node) {
                unreachable.insert(weight.actor);
            }
        }

        Ok(model
            .actors()
            .filter(|a| !a.capability.is_composite())
            .filter(|a| unreachable.contains(&a.id) || !with_nodes.contains(&a.id))
            .collect())
    }

    /// Fail with every unreachable actor named.
    ///
    /// # Errors
    ///
    /// Returns `UnreachableActors` when any exist, or the errors of
    /// [`Scheduler::unreachable_actors`].
    pub fn check_reachability(&self, model: &Model) -> ScheduleResult<()> {
        let unreachable = self.unreachable_actors(model)?;
        if unreachable.is_empty() {
            Ok(())
        } else {
            Err(ScheduleError::unreachable(
                unreachable.iter().map(|a| a.name.clone()).collect(),
            ))
        }
    }
}

fn is_control_tag(model: &Model, tag: TagId) -> bool {
    model
        .tag(tag)
        .and_then(|r| model.actor(r.owner))
        .is_some_and(|a| a.capability.is_control())
}

fn tag_infos(model: &Model, tags: &[TagId]) -> ScheduleResult<HashMap<TagId, TagInfo>> {
    tags.iter()
        .map(|tag| {
            let record = model.require_tag(*tag)?;
            let actor = model.require_actor(record.owner)?;
            Ok((
                *tag,
                TagInfo {
                    tag: *tag,
                    actor: actor.id,
                    actor_name: actor.name.clone(),
                    priority: record.priority(),
                    process: record.tag.process.clone(),
                    repeat_branch: actor
                        .capability
                        .control()
                        .and_then(|spec| spec.repeat_branch.clone()),
                },
            ))
        })
        .collect()
}

/// Reject the lowest priority shared by more than one of `tags`.
pub(crate) fn check_unique_priorities(model: &Model, tags: &[TagId]) -> ScheduleResult<()> {
    let groups = tags
        .iter()
        .filter_map(|t| model.tag(*t))
        .into_group_map_by(|record| record.priority());

    let duplicate = groups
        .into_iter()
        .filter(|(_, records)| records.len() > 1)
        .min_by_key(|(priority, _)| *priority);

    match duplicate {
        Some((priority, records)) => {
            let actors = records
                .iter()
                .map(|r| model.tag_label(r.id))
                .sorted()
                .collect();
            Err(ScheduleError::duplicate_priority(priority, actors))
        }
        None => Ok(()),
    }
}
