//! The actor model the scheduler introspects.
//!
//! A [`Model`] is an arena of actors, ports, links and sequence tags. Every
//! structural mutation bumps the model's [`Generation`], which invalidates
//! schedules built from an earlier generation.

use std::collections::{HashMap, HashSet};

use tracing::trace;

use crate::actor::{Actor, Capability, Port, PortDirection};
use crate::error::{ScheduleError, ScheduleResult};
use crate::generation::Generation;
use crate::ids::{ActorId, PortId, TagId};
use crate::tag::{SequenceTag, normalize_process};

/// A sequence tag together with the actor that owns it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TagRecord {
    pub id: TagId,
    pub owner: ActorId,
    pub tag: SequenceTag,
    retired: bool,
}

impl TagRecord {
    #[must_use]
    pub const fn priority(&self) -> u32 {
        self.tag.priority
    }

    #[must_use]
    pub const fn is_live(&self) -> bool {
        !self.retired
    }
}

/// Arena of actors, ports, links and tags.
///
/// A clone owns a fresh generation counter, so mutating it never
/// invalidates schedules built from the original.
#[derive(Debug, Default)]
pub struct Model {
    name: String,
    actors: Vec<Actor>,
    ports: Vec<Port>,
    /// `to -> [from]`
    incoming: HashMap<PortId, Vec<PortId>>,
    /// `from -> [to]`
    outgoing: HashMap<PortId, Vec<PortId>>,
    tags: Vec<TagRecord>,
    generation: Generation,
}

impl Clone for Model {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            actors: self.actors.clone(),
            ports: self.ports.clone(),
            incoming: self.incoming.clone(),
            outgoing: self.outgoing.clone(),
            tags: self.tags.clone(),
            generation: self.generation.fork(),
        }
    }
}

impl Model {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Current structural generation.
    #[must_use]
    pub fn generation(&self) -> u64 {
        self.generation.current()
    }

    /// Shared handle to the generation counter, for consumers that must
    /// notice later mutations.
    #[must_use]
    pub fn generation_handle(&self) -> Generation {
        self.generation.clone()
    }

    fn touch(&self) {
        let generation = self.generation.bump();
        trace!(model = %self.name, generation, "model changed");
    }

    // ------------------------------------------------------------------
    // Mutation
    // ------------------------------------------------------------------

    /// Add a top-level actor.
    ///
    /// # Errors
    ///
    /// Returns `InvalidModel` if an actor with the same name exists.
    pub fn add_actor(
        &mut self,
        name: impl Into<String>,
        capability: Capability,
    ) -> ScheduleResult<ActorId> {
        self.insert_actor(name.into(), None, capability)
    }

    /// Add an actor inside a composite.
    ///
    /// # Errors
    ///
    /// Returns `InvalidModel` if `container` is unknown or not a composite,
    /// or if the name is taken.
    pub fn add_actor_in(
        &mut self,
        container: ActorId,
        name: impl Into<String>,
        capability: Capability,
    ) -> ScheduleResult<ActorId> {
        let parent = self.require_actor(container)?;
        if !parent.capability.is_composite() {
            return Err(ScheduleError::invalid_model(format!(
                "'{}' is not a composite and cannot contain actors",
                parent.name
            )));
        }
        self.insert_actor(name.into(), Some(container), capability)
    }

    fn insert_actor(
        &mut self,
        name: String,
        container: Option<ActorId>,
        capability: Capability,
    ) -> ScheduleResult<ActorId> {
        if self.actor_by_name(&name).is_some() {
            return Err(ScheduleError::invalid_model(format!(
                "actor '{name}' already exists"
            )));
        }
        let id = ActorId::new(self.actors.len());
        self.actors.push(Actor {
            id,
            name,
            container,
            capability,
            inputs: Vec::new(),
            outputs: Vec::new(),
        });
        self.touch();
        Ok(id)
    }

    /// Add an input port.
    ///
    /// # Errors
    ///
    /// Returns `InvalidModel` for an unknown actor or a duplicate port name.
    pub fn add_input(&mut self, actor: ActorId, name: impl Into<String>) -> ScheduleResult<PortId> {
        self.insert_port(actor, name.into(), PortDirection::Input)
    }

    /// Add an output port. On a control actor every output is a branch.
    ///
    /// # Errors
    ///
    /// Returns `InvalidModel` for an unknown actor or a duplicate port name.
    pub fn add_output(
        &mut self,
        actor: ActorId,
        name: impl Into<String>,
    ) -> ScheduleResult<PortId> {
        self.insert_port(actor, name.into(), PortDirection::Output)
    }

    fn insert_port(
        &mut self,
        actor: ActorId,
        name: String,
        direction: PortDirection,
    ) -> ScheduleResult<PortId> {
        let id = PortId::new(self.ports.len());
        let owner = self
            .actors
            .get_mut(actor.index())
            .ok_or_else(|| ScheduleError::invalid_model(format!("unknown actor {actor}")))?;
        let clash = owner
            .inputs
            .iter()
            .chain(owner.outputs.iter())
            .filter_map(|p| self.ports.get(p.index()))
            .any(|p| p.name == name);
        if clash {
            return Err(ScheduleError::invalid_model(format!(
                "actor '{}' already has a port named '{name}'",
                owner.name
            )));
        }
        match direction {
            PortDirection::Input => owner.inputs.push(id),
            PortDirection::Output => owner.outputs.push(id),
        }
        self.ports.push(Port {
            id,
            owner: actor,
            name,
            direction,
        });
        self.touch();
        Ok(id)
    }

    /// Connect `from` to `to`; data flows from `from` into `to`.
    ///
    /// # Errors
    ///
    /// Returns `InvalidModel` if the ports are not mutually visible, if
    /// the directions do not match, or if the link already exists.
    pub fn connect(&mut self, from: PortId, to: PortId) -> ScheduleResult<()> {
        self.check_link(from, to)?;
        if self.sources_of(to).contains(&from) {
            return Err(ScheduleError::invalid_model(format!(
                "{} is already connected to {}",
                self.port_label(from),
                self.port_label(to)
            )));
        }
        self.incoming.entry(to).or_default().push(from);
        self.outgoing.entry(from).or_default().push(to);
        trace!(from = %self.port_label(from), to = %self.port_label(to), "linked");
        self.touch();
        Ok(())
    }

    /// Remove the link from `from` to `to`.
    ///
    /// # Errors
    ///
    /// Returns `InvalidModel` if no such link exists.
    pub fn disconnect(&mut self, from: PortId, to: PortId) -> ScheduleResult<()> {
        let removed_in = self
            .incoming
            .get_mut(&to)
            .is_some_and(|sources| remove_item(sources, from));
        let removed_out = self
            .outgoing
            .get_mut(&from)
            .is_some_and(|sinks| remove_item(sinks, to));
        if !(removed_in && removed_out) {
            return Err(ScheduleError::invalid_model(format!(
                "{} is not connected to {}",
                self.port_label(from),
                self.port_label(to)
            )));
        }
        self.touch();
        Ok(())
    }

    fn check_link(&self, from: PortId, to: PortId) -> ScheduleResult<()> {
        let source = self.require_port(from)?;
        let sink = self.require_port(to)?;
        let source_actor = self.require_actor(source.owner)?;
        let sink_actor = self.require_actor(sink.owner)?;

        let visible = match (source.direction, sink.direction) {
            // sibling to sibling
            (PortDirection::Output, PortDirection::Input) => {
                source_actor.container == sink_actor.container
            }
            // composite input into a contained actor
            (PortDirection::Input, PortDirection::Input) => {
                source_actor.capability.is_composite()
                    && sink_actor.container == Some(source_actor.id)
            }
            // contained actor out through its composite
            (PortDirection::Output, PortDirection::Output) => {
                sink_actor.capability.is_composite()
                    && source_actor.container == Some(sink_actor.id)
            }
            // straight through a composite
            (PortDirection::Input, PortDirection::Output) => {
                source_actor.capability.is_composite() && source_actor.id == sink_actor.id
            }
        };

        if visible {
            Ok(())
        } else {
            Err(ScheduleError::invalid_model(format!(
                "{} cannot be linked to {}: ports are not in the same scope",
                self.port_label(from),
                self.port_label(to)
            )))
        }
    }

    /// Attach a sequence tag to an actor.
    ///
    /// # Errors
    ///
    /// Returns `InvalidModel` for an unknown actor or a composite wrapper.
    pub fn add_tag(&mut self, actor: ActorId, tag: SequenceTag) -> ScheduleResult<TagId> {
        let owner = self.require_actor(actor)?;
        if owner.capability.is_composite() {
            return Err(ScheduleError::invalid_model(format!(
                "composite '{}' never fires and cannot carry a sequence tag",
                owner.name
            )));
        }
        let id = TagId::new(self.tags.len());
        self.tags.push(TagRecord {
            id,
            owner: actor,
            tag,
            retired: false,
        });
        self.touch();
        Ok(id)
    }

    /// Change a tag's priority.
    ///
    /// # Errors
    ///
    /// Returns `InvalidModel` for an unknown or removed tag.
    pub fn renumber(&mut self, tag: TagId, priority: u32) -> ScheduleResult<()> {
        self.live_tag_mut(tag)?.tag.priority = priority;
        self.touch();
        Ok(())
    }

    /// Move a tag into a process group; `""`/`"none"` clears it.
    ///
    /// # Errors
    ///
    /// Returns `InvalidModel` for an unknown or removed tag.
    pub fn set_process(&mut self, tag: TagId, process: &str) -> ScheduleResult<()> {
        self.live_tag_mut(tag)?.tag.process = normalize_process(process);
        self.touch();
        Ok(())
    }

    /// Remove a tag. Its id is never reused.
    ///
    /// # Errors
    ///
    /// Returns `InvalidModel` for an unknown or already removed tag.
    pub fn remove_tag(&mut self, tag: TagId) -> ScheduleResult<()> {
        self.live_tag_mut(tag)?.retired = true;
        self.touch();
        Ok(())
    }

    fn live_tag_mut(&mut self, tag: TagId) -> ScheduleResult<&mut TagRecord> {
        self.tags
            .get_mut(tag.index())
            .filter(|record| record.is_live())
            .ok_or_else(|| ScheduleError::invalid_model(format!("unknown tag {tag}")))
    }

    // ------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------

    pub fn actors(&self) -> impl Iterator<Item = &Actor> {
        self.actors.iter()
    }

    #[must_use]
    pub fn actor(&self, id: ActorId) -> Option<&Actor> {
        self.actors.get(id.index())
    }

    #[must_use]
    pub fn actor_by_name(&self, name: &str) -> Option<&Actor> {
        self.actors.iter().find(|a| a.name == name)
    }

    /// Look up an actor, failing with `InvalidModel`.
    ///
    /// # Errors
    ///
    /// Returns `InvalidModel` if `id` is not in this model.
    pub fn require_actor(&self, id: ActorId) -> ScheduleResult<&Actor> {
        self.actor(id)
            .ok_or_else(|| ScheduleError::invalid_model(format!("unknown actor {id}")))
    }

    /// Name of an actor, or its id when unknown.
    #[must_use]
    pub fn actor_name(&self, id: ActorId) -> String {
        self.actor(id)
            .map_or_else(|| id.to_string(), |a| a.name.clone())
    }

    #[must_use]
    pub fn port(&self, id: PortId) -> Option<&Port> {
        self.ports.get(id.index())
    }

    /// Look up a port, failing with `InvalidModel`.
    ///
    /// # Errors
    ///
    /// Returns `InvalidModel` if `id` is not in this model.
    pub fn require_port(&self, id: PortId) -> ScheduleResult<&Port> {
        self.port(id)
            .ok_or_else(|| ScheduleError::invalid_model(format!("unknown port {id}")))
    }

    #[must_use]
    pub fn port_by_name(&self, actor: ActorId, name: &str) -> Option<&Port> {
        let owner = self.actor(actor)?;
        owner
            .inputs
            .iter()
            .chain(owner.outputs.iter())
            .filter_map(|p| self.port(*p))
            .find(|p| p.name == name)
    }

    /// `actor.port`, used in diagnostics and graph labels.
    #[must_use]
    pub fn port_label(&self, id: PortId) -> String {
        self.port(id).map_or_else(
            || id.to_string(),
            |p| format!("{}.{}", self.actor_name(p.owner), p.name),
        )
    }

    /// Output ports of an actor, in declaration order.
    pub fn outputs_of(&self, actor: ActorId) -> impl Iterator<Item = &Port> {
        self.actor(actor)
            .into_iter()
            .flat_map(|a| a.outputs.iter())
            .filter_map(|p| self.port(*p))
    }

    /// Input ports of an actor, in declaration order.
    pub fn inputs_of(&self, actor: ActorId) -> impl Iterator<Item = &Port> {
        self.actor(actor)
            .into_iter()
            .flat_map(|a| a.inputs.iter())
            .filter_map(|p| self.port(*p))
    }

    /// Ports linked directly into `port`.
    #[must_use]
    pub fn sources_of(&self, port: PortId) -> &[PortId] {
        self.incoming.get(&port).map_or(&[], Vec::as_slice)
    }

    /// Ports `port` links directly into.
    #[must_use]
    pub fn sinks_of(&self, port: PortId) -> &[PortId] {
        self.outgoing.get(&port).map_or(&[], Vec::as_slice)
    }

    /// Output ports of firing actors that feed `input`, looking through
    /// composite relay ports.
    #[must_use]
    pub fn deep_sources(&self, input: PortId) -> Vec<PortId> {
        self.deep_walk(input, |p| self.sources_of(p))
    }

    /// Input ports of firing actors fed by `output`, looking through
    /// composite relay ports.
    #[must_use]
    pub fn deep_sinks(&self, output: PortId) -> Vec<PortId> {
        self.deep_walk(output, |p| self.sinks_of(p))
    }

    fn deep_walk<'a, F>(&'a self, start: PortId, step: F) -> Vec<PortId>
    where
        F: Fn(PortId) -> &'a [PortId],
    {
        let mut found = Vec::new();
        let mut seen: HashSet<PortId> = HashSet::from([start]);
        let mut stack = vec![start];

        while let Some(port) = stack.pop() {
            for &next in step(port) {
                if !seen.insert(next) {
                    continue;
                }
                let relays = self
                    .port(next)
                    .and_then(|p| self.actor(p.owner))
                    .is_some_and(|a| a.capability.is_composite());
                if relays {
                    stack.push(next);
                } else {
                    found.push(next);
                }
            }
        }

        found.sort();
        found
    }

    /// True if `output` reaches at least one firing actor.
    #[must_use]
    pub fn has_downstream(&self, output: PortId) -> bool {
        !self.deep_sinks(output).is_empty()
    }

    /// Live tags, in creation order.
    pub fn tags(&self) -> impl Iterator<Item = &TagRecord> {
        self.tags.iter().filter(|t| t.is_live())
    }

    /// A live tag.
    #[must_use]
    pub fn tag(&self, id: TagId) -> Option<&TagRecord> {
        self.tags.get(id.index()).filter(|t| t.is_live())
    }

    /// Look up a live tag, failing with `InvalidModel`.
    ///
    /// # Errors
    ///
    /// Returns `InvalidModel` if `id` is unknown or removed.
    pub fn require_tag(&self, id: TagId) -> ScheduleResult<&TagRecord> {
        self.tag(id)
            .ok_or_else(|| ScheduleError::invalid_model(format!("unknown tag {id}")))
    }

    /// Live tags owned by `actor`.
    #[must_use]
    pub fn tags_of(&self, actor: ActorId) -> Vec<TagId> {
        self.tags()
            .filter(|t| t.owner == actor)
            .map(|t| t.id)
            .collect()
    }

    /// Ids of every live tag.
    #[must_use]
    pub fn tag_ids(&self) -> Vec<TagId> {
        self.tags().map(|t| t.id).collect()
    }

    /// The single live tag of the actor called `name`, if it has exactly one.
    #[must_use]
    pub fn tag_named(&self, name: &str) -> Option<TagId> {
        let actor = self.actor_by_name(name)?;
        match self.tags_of(actor.id).as_slice() {
            [only] => Some(*only),
            _ => None,
        }
    }

    /// `actor` or `actor:method`, used in diagnostics and graph labels.
    #[must_use]
    pub fn tag_label(&self, id: TagId) -> String {
        self.tag(id).map_or_else(
            || id.to_string(),
            |record| {
                let name = self.actor_name(record.owner);
                match &record.tag.method {
                    Some(method) => format!("{name}:{method}"),
                    None => name,
                }
            },
        )
    }
}

fn remove_item(items: &mut Vec<PortId>, item: PortId) -> bool {
    let before = items.len();
    items.retain(|p| *p != item);
    items.len() != before
}
