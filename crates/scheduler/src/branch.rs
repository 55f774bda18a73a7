//! # Control branch table
//!
//! For every control actor, maps each output branch to the sequenced actors
//! that fire only when that branch is taken. Entries live in an arena and
//! are addressed by [`BranchEntryId`].
//!
//! Nested control actors are discovered with an explicit work stack; a ring
//! of control actors gating each other is a structural cycle.

use std::collections::{HashMap, HashSet};

use petgraph::graph::{DiGraph, NodeIndex};
use tracing::debug;

use tempo_core::{Actor, ActorId, Capability, Model, PortId, ScheduleError, ScheduleResult, TagId};

use crate::graph::tarjan;
use crate::scheduler::check_unique_priorities;

/// Stable index of an entry in a [`ControlBranchTable`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BranchEntryId(usize);

impl BranchEntryId {
    #[must_use]
    pub const fn index(self) -> usize {
        self.0
    }
}

/// One output branch of a control actor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Branch {
    /// The output port name.
    pub name: String,
    pub port: PortId,
    /// Dependent tags, ordered by priority.
    pub dependents: Vec<TagId>,
}

/// Branches of one control tag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BranchTableEntry {
    pub control: TagId,
    pub actor: ActorId,
    pub actor_name: String,
    /// In output port declaration order.
    pub branches: Vec<Branch>,
}

impl BranchTableEntry {
    #[must_use]
    pub fn branch(&self, name: &str) -> Option<&Branch> {
        self.branches.iter().find(|b| b.name == name)
    }

    pub fn branch_names(&self) -> impl Iterator<Item = &str> {
        self.branches.iter().map(|b| b.name.as_str())
    }

    /// Dependents of every branch.
    pub fn all_dependents(&self) -> impl Iterator<Item = TagId> + '_ {
        self.branches.iter().flat_map(|b| b.dependents.iter().copied())
    }
}

/// Arena of branch table entries keyed by control tag. Immutable once built.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ControlBranchTable {
    entries: Vec<BranchTableEntry>,
    index: HashMap<TagId, BranchEntryId>,
    dependents: HashSet<TagId>,
}

impl ControlBranchTable {
    #[must_use]
    pub fn entry(&self, control: TagId) -> Option<&BranchTableEntry> {
        self.index.get(&control).and_then(|id| self.get(*id))
    }

    #[must_use]
    pub fn get(&self, id: BranchEntryId) -> Option<&BranchTableEntry> {
        self.entries.get(id.index())
    }

    /// Dependents of one branch of a control tag.
    #[must_use]
    pub fn dependents_of(&self, control: TagId, branch: &str) -> Option<&[TagId]> {
        self.entry(control)
            .and_then(|e| e.branch(branch))
            .map(|b| b.dependents.as_slice())
    }

    /// True if `tag` fires only through a control branch.
    #[must_use]
    pub fn is_dependent(&self, tag: TagId) -> bool {
        self.dependents.contains(&tag)
    }

    /// True if `tag` has an entry (is a control tag).
    #[must_use]
    pub fn is_control(&self, tag: TagId) -> bool {
        self.index.contains_key(&tag)
    }

    pub fn entries(&self) -> impl Iterator<Item = &BranchTableEntry> {
        self.entries.iter()
    }

    /// Every branch-dependent tag, sorted by id.
    #[must_use]
    pub fn dependent_tags(&self) -> Vec<TagId> {
        let mut tags: Vec<TagId> = self.dependents.iter().copied().collect();
        tags.sort();
        tags
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Builds a [`ControlBranchTable`] one control tag at a time.
#[derive(Debug)]
pub struct BranchTableBuilder<'m> {
    model: &'m Model,
    validate: bool,
    table: ControlBranchTable,
    /// Dependents in discovery order; each one still needs a subgraph.
    discovered: Vec<TagId>,
}

impl<'m> BranchTableBuilder<'m> {
    #[must_use]
    pub fn new(model: &'m Model, validate: bool) -> Self {
        Self {
            model,
            validate,
            table: ControlBranchTable::default(),
            discovered: Vec::new(),
        }
    }

    /// Add the entry for `control` and, transitively, for every control
    /// actor found among its dependents. Tags that already have an entry
    /// are skipped.
    ///
    /// # Errors
    ///
    /// * `MissingTag` if a branch sink's actor does not carry exactly one
    ///   matching tag, or that tag belongs to a process group.
    /// * `DuplicatePriority` if validating and two dependents of one branch
    ///   share a priority.
    pub fn add_control_outputs(&mut self, control: TagId) -> ScheduleResult<()> {
        let model = self.model;
        let mut stack = vec![control];

        while let Some(tag) = stack.pop() {
            if self.table.is_control(tag) {
                continue;
            }
            let record = model.require_tag(tag)?;
            let actor = model.require_actor(record.owner)?;
            if !actor.capability.is_control() {
                return Err(ScheduleError::invalid_model(format!(
                    "'{}' is not a control actor",
                    actor.name
                )));
            }

            let mut branches = Vec::new();
            for port in model.outputs_of(actor.id) {
                let dependents = self.branch_dependents(actor, port.id, &port.name)?;
                for dependent in &dependents {
                    if self.table.dependents.insert(*dependent) {
                        self.discovered.push(*dependent);
                    }
                    let owner = model.require_tag(*dependent)?.owner;
                    let nested = model
                        .actor(owner)
                        .is_some_and(|a| a.capability.is_control());
                    if nested && !self.table.is_control(*dependent) {
                        stack.push(*dependent);
                    }
                }
                debug!(
                    control = %actor.name,
                    branch = %port.name,
                    dependents = dependents.len(),
                    "branch resolved"
                );
                branches.push(Branch {
                    name: port.name.clone(),
                    port: port.id,
                    dependents,
                });
            }

            let id = BranchEntryId(self.table.entries.len());
            self.table.entries.push(BranchTableEntry {
                control: tag,
                actor: actor.id,
                actor_name: actor.name.clone(),
                branches,
            });
            self.table.index.insert(tag, id);
        }

        Ok(())
    }

    /// Tags fed directly (or through composite relays) by one branch port,
    /// sorted by priority.
    fn branch_dependents(
        &self,
        control: &Actor,
        port: PortId,
        branch: &str,
    ) -> ScheduleResult<Vec<TagId>> {
        let mut dependents = Vec::new();
        for sink in self.model.deep_sinks(port) {
            dependents.push(self.dependent_tag(control, branch, sink)?);
        }

        let model = self.model;
        dependents.sort_by_key(|t| (model.tag(*t).map(|r| r.priority()), *t));
        dependents.dedup();

        if self.validate {
            check_unique_priorities(model, &dependents)?;
        }
        Ok(dependents)
    }

    fn dependent_tag(&self, control: &Actor, branch: &str, sink: PortId) -> ScheduleResult<TagId> {
        let port = self.model.require_port(sink)?;
        let actor = self.model.require_actor(port.owner)?;
        let tags = self.model.tags_of(actor.id);

        let candidates: Vec<TagId> = match &actor.capability {
            Capability::MultiEntry(methods) => tags
                .into_iter()
                .filter(|t| {
                    self.model.tag(*t).is_some_and(|r| {
                        let method = methods.resolve(r.tag.method.as_deref());
                        methods.readers_of(&port.name).any(|m| m.name == method)
                    })
                })
                .collect(),
            _ => tags,
        };

        let tag = match candidates.as_slice() {
            [only] => *only,
            [] => {
                return Err(ScheduleError::missing_tag(
                    actor.name.clone(),
                    format!(
                        "depends on branch '{branch}' of '{}' but carries no sequence tag reading '{}'",
                        control.name, port.name
                    ),
                ));
            }
            many => {
                return Err(ScheduleError::missing_tag(
                    actor.name.clone(),
                    format!(
                        "depends on branch '{branch}' of '{}' through {} sequence tags",
                        control.name,
                        many.len()
                    ),
                ));
            }
        };

        let record = self.model.require_tag(tag)?;
        if let Some(process) = &record.tag.process {
            return Err(ScheduleError::missing_tag(
                actor.name.clone(),
                format!(
                    "depends on branch '{branch}' of '{}' but belongs to process '{process}'",
                    control.name
                ),
            ));
        }
        Ok(tag)
    }

    /// Finish the table, returning it with the discovered dependents.
    ///
    /// # Errors
    ///
    /// Returns `StructuralCycle` if control actors gate each other in a ring.
    pub fn finish(self) -> ScheduleResult<(ControlBranchTable, Vec<TagId>)> {
        let mut rings: DiGraph<TagId, ()> = DiGraph::new();
        let nodes: HashMap<TagId, NodeIndex> = self
            .table
            .entries
            .iter()
            .map(|e| (e.control, rings.add_node(e.control)))
            .collect();

        for entry in &self.table.entries {
            for dependent in entry.all_dependents() {
                if let (Some(from), Some(to)) = (nodes.get(&entry.control), nodes.get(&dependent)) {
                    rings.update_edge(*from, *to, ());
                }
            }
        }

        if let Some(cycle) = tarjan::find_cycles(&rings, |_| true).first() {
            let labels = cycle
                .iter()
                .filter_map(|n| rings.node_weight(*n))
                .map(|t| self.model.tag_label(*t))
                .collect();
            return Err(ScheduleError::cycle(labels));
        }

        Ok((self.table, self.discovered))
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    #![allow(clippy::expect_used)]

    use super::*;
    use tempo_core::{ControlSpec, EntryPoint, EntryPoints, ModelBuilder, SequenceTag};

    fn if_then_else() -> ScheduleResult<Model> {
        ModelBuilder::new("ite")
            .with_actor("c", Capability::Control(ControlSpec::branching()))
            .with_actor("t", Capability::Plain)
            .with_actor("t2", Capability::Plain)
            .with_actor("e", Capability::Plain)
            .with_output("c", "then")
            .with_output("c", "else")
            .with_input("t", "in")
            .with_input("t2", "in")
            .with_input("e", "in")
            .with_link("c.then", "t.in")
            .with_link("c.then", "t2.in")
            .with_link("c.else", "e.in")
            .with_tag("c", SequenceTag::new(1))
            .with_tag("t", SequenceTag::new(3))
            .with_tag("t2", SequenceTag::new(2))
            .with_tag("e", SequenceTag::new(2))
            .build()
    }

    #[test]
    fn test_branches_list_dependents_by_priority() -> ScheduleResult<()> {
        let model = if_then_else()?;
        let c = model.tag_named("c").unwrap();
        let mut builder = BranchTableBuilder::new(&model, true);
        builder.add_control_outputs(c)?;
        let (table, discovered) = builder.finish()?;

        let then: Vec<TagId> = table.dependents_of(c, "then").unwrap().to_vec();
        assert_eq!(
            then,
            vec![model.tag_named("t2").unwrap(), model.tag_named("t").unwrap()]
        );
        assert_eq!(
            table.dependents_of(c, "else"),
            Some([model.tag_named("e").unwrap()].as_slice())
        );
        assert_eq!(discovered.len(), 3);
        assert!(table.is_dependent(model.tag_named("e").unwrap()));
        assert!(!table.is_dependent(c));
        assert_eq!(table.len(), 1);
        Ok(())
    }

    #[test]
    fn test_grouped_dependent_rejected() -> ScheduleResult<()> {
        let model = ModelBuilder::new("m")
            .with_actor("c", Capability::Control(ControlSpec::branching()))
            .with_actor("t", Capability::Plain)
            .with_output("c", "then")
            .with_input("t", "in")
            .with_link("c.then", "t.in")
            .with_tag("c", SequenceTag::new(1))
            .with_tag("t", SequenceTag::new(2).with_process("io"))
            .build()?;
        let mut builder = BranchTableBuilder::new(&model, true);
        let err = builder
            .add_control_outputs(model.tag_named("c").unwrap())
            .unwrap_err();
        assert!(matches!(err, ScheduleError::MissingTag { ref actor, ref reason } if actor == "t" && reason.contains("io")));
        Ok(())
    }

    #[test]
    fn test_untagged_dependent_rejected() -> ScheduleResult<()> {
        let model = ModelBuilder::new("m")
            .with_actor("c", Capability::Control(ControlSpec::branching()))
            .with_actor("t", Capability::Plain)
            .with_output("c", "then")
            .with_input("t", "in")
            .with_link("c.then", "t.in")
            .with_tag("c", SequenceTag::new(1))
            .build()?;
        let mut builder = BranchTableBuilder::new(&model, true);
        let err = builder
            .add_control_outputs(model.tag_named("c").unwrap())
            .unwrap_err();
        assert!(matches!(err, ScheduleError::MissingTag { ref actor, .. } if actor == "t"));
        Ok(())
    }

    #[test]
    fn test_duplicate_priority_within_branch() -> ScheduleResult<()> {
        let model = ModelBuilder::new("m")
            .with_actor("c", Capability::Control(ControlSpec::branching()))
            .with_actor("a", Capability::Plain)
            .with_actor("b", Capability::Plain)
            .with_output("c", "then")
            .with_input("a", "in")
            .with_input("b", "in")
            .with_link("c.then", "a.in")
            .with_link("c.then", "b.in")
            .with_tag("c", SequenceTag::new(1))
            .with_tag("a", SequenceTag::new(5))
            .with_tag("b", SequenceTag::new(5))
            .build()?;
        let c = model.tag_named("c").unwrap();

        let err = BranchTableBuilder::new(&model, true)
            .add_control_outputs(c)
            .unwrap_err();
        assert!(matches!(err, ScheduleError::DuplicatePriority { priority: 5, .. }));

        let mut lenient = BranchTableBuilder::new(&model, false);
        lenient.add_control_outputs(c)?;
        assert!(lenient.finish().is_ok());
        Ok(())
    }

    #[test]
    fn test_nested_control_gets_its_own_entry() -> ScheduleResult<()> {
        let model = ModelBuilder::new("m")
            .with_actor("outer", Capability::Control(ControlSpec::branching()))
            .with_actor("inner", Capability::Control(ControlSpec::branching()))
            .with_actor("leaf", Capability::Plain)
            .with_output("outer", "yes")
            .with_input("inner", "in")
            .with_output("inner", "yes")
            .with_input("leaf", "in")
            .with_link("outer.yes", "inner.in")
            .with_link("inner.yes", "leaf.in")
            .with_tag("outer", SequenceTag::new(1))
            .with_tag("inner", SequenceTag::new(2))
            .with_tag("leaf", SequenceTag::new(3))
            .build()?;
        let outer = model.tag_named("outer").unwrap();
        let inner = model.tag_named("inner").unwrap();

        let mut builder = BranchTableBuilder::new(&model, true);
        builder.add_control_outputs(outer)?;
        let (table, discovered) = builder.finish()?;

        assert_eq!(table.len(), 2);
        assert!(table.is_control(inner));
        assert_eq!(
            table.dependents_of(inner, "yes"),
            Some([model.tag_named("leaf").unwrap()].as_slice())
        );
        assert_eq!(discovered, vec![inner, model.tag_named("leaf").unwrap()]);
        Ok(())
    }

    #[test]
    fn test_multi_entry_dependent_is_the_reading_method() -> ScheduleResult<()> {
        let methods = EntryPoints::new("read")
            .with(EntryPoint::new("read").reads("addr"))
            .with(EntryPoint::new("write").reads("value"));
        let model = ModelBuilder::new("m")
            .with_actor("c", Capability::Control(ControlSpec::branching()))
            .with_actor("mem", Capability::MultiEntry(methods))
            .with_output("c", "store")
            .with_input("mem", "addr")
            .with_input("mem", "value")
            .with_link("c.store", "mem.value")
            .with_tag("c", SequenceTag::new(1))
            .with_tag("mem", SequenceTag::new(2).with_method("write"))
            .with_tag("mem", SequenceTag::new(3).with_method("read"))
            .build()?;
        let control = model.tag_named("c").unwrap();

        let mut builder = BranchTableBuilder::new(&model, true);
        builder.add_control_outputs(control)?;
        let (table, _) = builder.finish()?;

        let write = model
            .tags_of(model.actor_by_name("mem").unwrap().id)
            .into_iter()
            .find(|t| model.tag(*t).is_some_and(|r| r.priority() == 2))
            .unwrap();
        assert_eq!(table.dependents_of(control, "store"), Some([write].as_slice()));
        Ok(())
    }

    #[test]
    fn test_controls_gating_each_other_is_a_cycle() -> ScheduleResult<()> {
        let model = ModelBuilder::new("m")
            .with_actor("p", Capability::Control(ControlSpec::branching()))
            .with_actor("q", Capability::Control(ControlSpec::branching()))
            .with_input("p", "in")
            .with_output("p", "go")
            .with_input("q", "in")
            .with_output("q", "go")
            .with_link("p.go", "q.in")
            .with_link("q.go", "p.in")
            .with_tag("p", SequenceTag::new(1))
            .with_tag("q", SequenceTag::new(2))
            .build()?;

        let mut builder = BranchTableBuilder::new(&model, true);
        builder.add_control_outputs(model.tag_named("p").unwrap())?;
        let err = builder.finish().unwrap_err();
        assert_eq!(
            err,
            ScheduleError::StructuralCycle(vec!["p".into(), "q".into()])
        );
        Ok(())
    }

    #[test]
    fn test_non_control_tag_rejected() -> ScheduleResult<()> {
        let model = if_then_else()?;
        let mut builder = BranchTableBuilder::new(&model, true);
        let err = builder
            .add_control_outputs(model.tag_named("t").unwrap())
            .unwrap_err();
        assert!(matches!(err, ScheduleError::InvalidModel(_)));
        Ok(())
    }
}
