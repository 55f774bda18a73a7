//! # Dependency graph
//!
//! Directed graph over sequence tags and pass-through output ports, built
//! once per structural generation using petgraph.
//!
//! An edge `p -> s` means `p` must fire (or have already fired) before `s`
//! may read its inputs. Tag nodes are dependency boundaries; port nodes
//! stand in for outputs of actors that carry no usable tag.

pub mod tarjan;

use std::collections::HashMap;
use std::fmt;

use petgraph::Direction;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::EdgeRef;
use tracing::debug;

use tempo_core::{
    Actor, ActorId, Capability, Model, Port, PortId, ScheduleError, ScheduleResult, TagId,
};

use crate::schedule::FiringRecord;

/// What a graph node stands for. Nodes are unique per weight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum NodeWeight {
    /// A sequenced actor (or one entry point of it).
    Tag(TagId),
    /// An output port of an actor with no tag compatible with that port.
    Port(PortId),
}

/// A node of the dependency graph together with what firing it means.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GraphNode {
    pub weight: NodeWeight,
    pub actor: ActorId,
    pub actor_name: String,
    /// Entry point fired for this node on a multi-entry actor.
    pub method: Option<String>,
    /// `actor`, `actor:method` for tags, `actor.port` for ports.
    pub label: String,
    /// The actor ends the firing pass.
    pub hard_stop: bool,
}

impl GraphNode {
    #[must_use]
    pub const fn is_boundary(&self) -> bool {
        matches!(self.weight, NodeWeight::Tag(_))
    }

    /// The firing this node stands for.
    #[must_use]
    pub fn firing(&self) -> FiringRecord {
        FiringRecord {
            actor: self.actor,
            actor_name: self.actor_name.clone(),
            method: self.method.clone(),
            tag: match self.weight {
                NodeWeight::Tag(tag) => Some(tag),
                NodeWeight::Port(_) => None,
            },
            hard_stop: self.hard_stop,
        }
    }
}

impl fmt::Display for GraphNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.label)
    }
}

/// Dependency graph wrapping petgraph's `DiGraph`
#[derive(Debug, Clone)]
pub struct DependencyGraph {
    /// The underlying directed graph
    graph: DiGraph<GraphNode, ()>,
    /// Map from weight to node for O(1) lookups
    node_map: HashMap<NodeWeight, NodeIndex>,
    /// Model generation this graph was built from
    generation: u64,
}

impl DependencyGraph {
    /// Build the graph for every firing actor in `model`.
    ///
    /// # Errors
    ///
    /// * `MissingTag` if a non-multi-entry actor owns several tags, a
    ///   control actor owns none, or a tag selects an unknown entry point.
    /// * `InvalidModel` if an entry point names a port the actor lacks.
    /// * `StructuralCycle` if any nodes, sequenced or pass-through, depend
    ///   on each other in a ring.
    pub fn build(model: &Model) -> ScheduleResult<Self> {
        let graph = Self::assemble(model)?;
        graph.check_cycles()?;

        debug!(
            model = %model.name(),
            generation = graph.generation,
            nodes = graph.node_count(),
            edges = graph.edge_count(),
            "dependency graph built"
        );
        Ok(graph)
    }

    /// Nodes and edges only, without the whole-graph cycle check.
    pub(crate) fn assemble(model: &Model) -> ScheduleResult<Self> {
        let mut graph = Self {
            graph: DiGraph::new(),
            node_map: HashMap::new(),
            generation: model.generation(),
        };

        let firing_actors: Vec<&Actor> = model
            .actors()
            .filter(|a| !a.capability.is_composite())
            .collect();

        for actor in &firing_actors {
            graph.add_actor_nodes(model, actor)?;
        }

        let nodes: Vec<NodeIndex> = graph.graph.node_indices().collect();
        for node in nodes {
            graph.add_predecessor_edges(model, node)?;
        }

        Ok(graph)
    }

    fn add_node(&mut self, node: GraphNode) -> NodeIndex {
        if let Some(existing) = self.node_map.get(&node.weight) {
            return *existing;
        }
        let weight = node.weight;
        let index = self.graph.add_node(node);
        self.node_map.insert(weight, index);
        index
    }

    fn add_actor_nodes(&mut self, model: &Model, actor: &Actor) -> ScheduleResult<()> {
        let tags = model.tags_of(actor.id);
        let hard_stop = actor.capability.is_break();

        match &actor.capability {
            Capability::MultiEntry(methods) => {
                for tag in &tags {
                    let record = model.require_tag(*tag)?;
                    let method = methods.resolve(record.tag.method.as_deref());
                    if methods.method(method).is_none() {
                        return Err(ScheduleError::missing_tag(
                            actor.name.clone(),
                            format!("tag {} selects unknown entry point '{method}'", record.tag),
                        ));
                    }
                    self.add_node(GraphNode {
                        weight: NodeWeight::Tag(*tag),
                        actor: actor.id,
                        actor_name: actor.name.clone(),
                        method: Some(method.to_string()),
                        label: format!("{}:{method}", actor.name),
                        hard_stop,
                    });
                }
            }
            _ => match tags.as_slice() {
                [] if actor.capability.is_control() => {
                    return Err(ScheduleError::missing_tag(
                        actor.name.clone(),
                        "control actor carries no sequence tag",
                    ));
                }
                [] => {}
                [tag] => {
                    self.add_node(GraphNode {
                        weight: NodeWeight::Tag(*tag),
                        actor: actor.id,
                        actor_name: actor.name.clone(),
                        method: None,
                        label: actor.name.clone(),
                        hard_stop,
                    });
                }
                many => {
                    return Err(ScheduleError::missing_tag(
                        actor.name.clone(),
                        format!(
                            "carries {} sequence tags but exposes a single entry point",
                            many.len()
                        ),
                    ));
                }
            },
        }

        for port in model.outputs_of(actor.id) {
            if !model.has_downstream(port.id) || compatible_tag(model, actor, port)?.is_some() {
                continue;
            }
            let method = actor.capability.entry_points().map(|methods| {
                let mut writers = methods.writers_of(&port.name);
                match (writers.next(), writers.next()) {
                    (Some(only), None) => only.name.clone(),
                    _ => methods.default_method.clone(),
                }
            });
            self.add_node(GraphNode {
                weight: NodeWeight::Port(port.id),
                actor: actor.id,
                actor_name: actor.name.clone(),
                method,
                label: model.port_label(port.id),
                hard_stop,
            });
        }

        Ok(())
    }

    fn add_predecessor_edges(&mut self, model: &Model, node: NodeIndex) -> ScheduleResult<()> {
        let Some(target) = self.graph.node_weight(node) else {
            return Ok(());
        };
        let weight = target.weight;
        let actor = model.require_actor(target.actor)?;

        for input in relevant_inputs(model, actor, weight)? {
            for source in model.deep_sources(input) {
                let predecessor = self.resolve_source(model, source)?;
                self.graph.update_edge(predecessor, node, ());
            }
        }
        Ok(())
    }

    /// The node that stands for output port `source`: its actor's
    /// compatible tag, or the port itself.
    fn resolve_source(&self, model: &Model, source: PortId) -> ScheduleResult<NodeIndex> {
        let port = model.require_port(source)?;
        let owner = model.require_actor(port.owner)?;
        let weight = match compatible_tag(model, owner, port)? {
            Some(tag) => NodeWeight::Tag(tag),
            None => NodeWeight::Port(source),
        };
        self.node_map.get(&weight).copied().ok_or_else(|| {
            ScheduleError::invalid_model(format!(
                "no dependency node for {}",
                model.port_label(source)
            ))
        })
    }

    /// Every ring in the graph, including rings through sequenced nodes.
    fn check_cycles(&self) -> ScheduleResult<()> {
        let cycles = tarjan::find_cycles(&self.graph, |_| true);
        match cycles.first() {
            Some(cycle) => Err(ScheduleError::cycle(self.labels(cycle))),
            None => Ok(()),
        }
    }

    // ------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------

    /// Generation of the model this graph was built from.
    #[must_use]
    pub const fn generation(&self) -> u64 {
        self.generation
    }

    #[must_use]
    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    #[must_use]
    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    #[must_use]
    pub fn node(&self, index: NodeIndex) -> Option<&GraphNode> {
        self.graph.node_weight(index)
    }

    #[must_use]
    pub fn index_of(&self, weight: NodeWeight) -> Option<NodeIndex> {
        self.node_map.get(&weight).copied()
    }

    #[must_use]
    pub fn tag_node(&self, tag: TagId) -> Option<NodeIndex> {
        self.index_of(NodeWeight::Tag(tag))
    }

    pub fn node_indices(&self) -> impl Iterator<Item = NodeIndex> {
        self.graph.node_indices()
    }

    /// Nodes with an edge into `node`.
    pub fn predecessors(&self, node: NodeIndex) -> impl Iterator<Item = NodeIndex> + '_ {
        self.graph
            .edges_directed(node, Direction::Incoming)
            .map(|e| e.source())
    }

    /// True if `node` is a sequenced (boundary) node.
    #[must_use]
    pub fn is_boundary(&self, node: NodeIndex) -> bool {
        self.node(node).is_some_and(GraphNode::is_boundary)
    }

    /// Iterator over all edges as `(from_label, to_label)`.
    pub fn edges(&self) -> impl Iterator<Item = (&str, &str)> {
        self.graph.edge_references().filter_map(move |edge| {
            let from = self.graph.node_weight(edge.source())?;
            let to = self.graph.node_weight(edge.target())?;
            Some((from.label.as_str(), to.label.as_str()))
        })
    }

    /// Labels of `nodes`, for diagnostics.
    #[must_use]
    pub fn labels(&self, nodes: &[NodeIndex]) -> Vec<String> {
        nodes
            .iter()
            .filter_map(|n| self.node(*n))
            .map(|n| n.label.clone())
            .collect()
    }

    pub(crate) const fn petgraph(&self) -> &DiGraph<GraphNode, ()> {
        &self.graph
    }
}

/// The tag of `actor` that fires when `port` is written, if exactly one does.
///
/// # Errors
///
/// Returns `InvalidModel` if one of the actor's tags has been removed
/// concurrently.
pub fn compatible_tag(model: &Model, actor: &Actor, port: &Port) -> ScheduleResult<Option<TagId>> {
    let tags = model.tags_of(actor.id);
    match &actor.capability {
        Capability::MultiEntry(methods) => {
            let mut writers = Vec::new();
            for tag in tags {
                let record = model.require_tag(tag)?;
                let method = methods.resolve(record.tag.method.as_deref());
                if methods
                    .method(method)
                    .is_some_and(|m| m.declares_output(&port.name))
                {
                    writers.push(tag);
                }
            }
            Ok(match writers.as_slice() {
                [only] => Some(*only),
                _ => None,
            })
        }
        _ => Ok(match tags.as_slice() {
            [only] => Some(*only),
            _ => None,
        }),
    }
}

/// Input ports whose sources must fire before the node `weight` of `actor`.
fn relevant_inputs(model: &Model, actor: &Actor, weight: NodeWeight) -> ScheduleResult<Vec<PortId>> {
    let Some(methods) = actor.capability.entry_points() else {
        return Ok(actor.inputs.clone());
    };

    let names: Vec<&str> = match weight {
        NodeWeight::Tag(tag) => {
            let record = model.require_tag(tag)?;
            let method = methods.resolve(record.tag.method.as_deref());
            methods
                .method(method)
                .map(|m| m.inputs.iter().map(String::as_str).collect())
                .unwrap_or_default()
        }
        NodeWeight::Port(port) => {
            let port = model.require_port(port)?;
            let writers: Vec<&str> = methods
                .writers_of(&port.name)
                .flat_map(|m| m.inputs.iter().map(String::as_str))
                .collect();
            if methods.writers_of(&port.name).next().is_none() {
                return Ok(actor.inputs.clone());
            }
            writers
        }
    };

    let mut inputs = Vec::with_capacity(names.len());
    for name in names {
        let port = model.port_by_name(actor.id, name).ok_or_else(|| {
            ScheduleError::invalid_model(format!(
                "entry point of '{}' reads unknown port '{name}'",
                actor.name
            ))
        })?;
        inputs.push(port.id);
    }
    inputs.sort();
    inputs.dedup();
    Ok(inputs)
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    #![allow(clippy::expect_used)]

    use super::*;
    use tempo_core::{ControlSpec, EntryPoint, EntryPoints, ModelBuilder, SequenceTag};

    fn edge_set(graph: &DependencyGraph) -> Vec<(String, String)> {
        let mut edges: Vec<(String, String)> = graph
            .edges()
            .map(|(a, b)| (a.to_string(), b.to_string()))
            .collect();
        edges.sort();
        edges
    }

    #[test]
    fn test_tagged_chain_links_tags_directly() -> ScheduleResult<()> {
        let model = ModelBuilder::new("chain")
            .with_actor("p", Capability::Plain)
            .with_actor("q", Capability::Plain)
            .with_output("p", "out")
            .with_input("q", "in")
            .with_link("p.out", "q.in")
            .with_tag("p", SequenceTag::new(1))
            .with_tag("q", SequenceTag::new(2))
            .build()?;

        let graph = DependencyGraph::build(&model)?;
        assert_eq!(graph.node_count(), 2);
        assert_eq!(edge_set(&graph), vec![("p".into(), "q".into())]);
        Ok(())
    }

    #[test]
    fn test_untagged_actor_contributes_port_nodes() -> ScheduleResult<()> {
        let model = ModelBuilder::new("m")
            .with_actor("src", Capability::Plain)
            .with_actor("scale", Capability::Plain)
            .with_actor("sink", Capability::Plain)
            .with_output("src", "out")
            .with_input("scale", "in")
            .with_output("scale", "out")
            .with_output("scale", "unused")
            .with_input("sink", "in")
            .with_link("src.out", "scale.in")
            .with_link("scale.out", "sink.in")
            .with_tag("src", SequenceTag::new(1))
            .with_tag("sink", SequenceTag::new(2))
            .build()?;

        let graph = DependencyGraph::build(&model)?;
        // unconnected output gets no node
        assert_eq!(graph.node_count(), 3);
        assert_eq!(
            edge_set(&graph),
            vec![
                ("scale.out".into(), "sink".into()),
                ("src".into(), "scale.out".into()),
            ]
        );
        Ok(())
    }

    #[test]
    fn test_multiple_tags_on_plain_actor_rejected() -> ScheduleResult<()> {
        let model = ModelBuilder::new("m")
            .with_actor("a", Capability::Plain)
            .with_tag("a", SequenceTag::new(1))
            .with_tag("a", SequenceTag::new(2))
            .build()?;

        let err = DependencyGraph::build(&model).unwrap_err();
        assert!(matches!(err, ScheduleError::MissingTag { ref actor, .. } if actor == "a"));
        Ok(())
    }

    #[test]
    fn test_untagged_control_actor_rejected() -> ScheduleResult<()> {
        let model = ModelBuilder::new("m")
            .with_actor("if", Capability::Control(ControlSpec::branching()))
            .build()?;
        let err = DependencyGraph::build(&model).unwrap_err();
        assert!(err.to_string().contains("control actor"));
        Ok(())
    }

    fn memory_model() -> ScheduleResult<Model> {
        let methods = EntryPoints::new("read")
            .with(EntryPoint::new("read").reads("addr").writes("data"))
            .with(EntryPoint::new("write").reads("value"))
            .with(EntryPoint::new("reset"));
        ModelBuilder::new("mem")
            .with_actor("addr_gen", Capability::Plain)
            .with_actor("value_gen", Capability::Plain)
            .with_actor("mem", Capability::MultiEntry(methods))
            .with_actor("consumer", Capability::Plain)
            .with_output("addr_gen", "out")
            .with_output("value_gen", "out")
            .with_input("mem", "addr")
            .with_input("mem", "value")
            .with_output("mem", "data")
            .with_input("consumer", "in")
            .with_link("addr_gen.out", "mem.addr")
            .with_link("value_gen.out", "mem.value")
            .with_link("mem.data", "consumer.in")
            .with_tag("addr_gen", SequenceTag::new(1))
            .with_tag("value_gen", SequenceTag::new(2))
            .with_tag("mem", SequenceTag::new(3).with_method("write"))
            .with_tag("mem", SequenceTag::new(4).with_method("read"))
            .with_tag("mem", SequenceTag::new(5).with_method("reset"))
            .with_tag("consumer", SequenceTag::new(6))
            .build()
    }

    #[test]
    fn test_multi_entry_restricts_inputs_per_method() -> ScheduleResult<()> {
        let model = memory_model()?;
        let graph = DependencyGraph::build(&model)?;
        assert_eq!(
            edge_set(&graph),
            vec![
                ("addr_gen".into(), "mem:read".into()),
                ("mem:read".into(), "consumer".into()),
                ("value_gen".into(), "mem:write".into()),
            ]
        );
        // reset has no declared ports and therefore no predecessors
        let reset = graph
            .node_indices()
            .find(|n| graph.node(*n).is_some_and(|g| g.label == "mem:reset"))
            .unwrap();
        assert_eq!(graph.predecessors(reset).count(), 0);
        Ok(())
    }

    #[test]
    fn test_unknown_entry_point_rejected() -> ScheduleResult<()> {
        let methods = EntryPoints::new("read").with(EntryPoint::new("read"));
        let model = ModelBuilder::new("m")
            .with_actor("mem", Capability::MultiEntry(methods))
            .with_tag("mem", SequenceTag::new(1).with_method("erase"))
            .build()?;
        let err = DependencyGraph::build(&model).unwrap_err();
        assert!(err.to_string().contains("erase"));
        Ok(())
    }

    #[test]
    fn test_placeholder_ring_is_a_cycle() -> ScheduleResult<()> {
        let model = ModelBuilder::new("m")
            .with_actor("u", Capability::Plain)
            .with_actor("v", Capability::Plain)
            .with_input("u", "in")
            .with_output("u", "out")
            .with_input("v", "in")
            .with_output("v", "out")
            .with_link("u.out", "v.in")
            .with_link("v.out", "u.in")
            .build()?;
        let err = DependencyGraph::build(&model).unwrap_err();
        assert_eq!(
            err,
            ScheduleError::StructuralCycle(vec!["u.out".into(), "v.out".into()])
        );
        Ok(())
    }

    #[test]
    fn test_ring_between_sequenced_actors_is_a_cycle() -> ScheduleResult<()> {
        let model = ModelBuilder::new("m")
            .with_actor("u", Capability::Plain)
            .with_actor("v", Capability::Plain)
            .with_input("u", "in")
            .with_output("u", "out")
            .with_input("v", "in")
            .with_output("v", "out")
            .with_link("u.out", "v.in")
            .with_link("v.out", "u.in")
            .with_tag("u", SequenceTag::new(1))
            .with_tag("v", SequenceTag::new(2))
            .build()?;
        let err = DependencyGraph::build(&model).unwrap_err();
        assert_eq!(
            err,
            ScheduleError::StructuralCycle(vec!["u".into(), "v".into()])
        );

        let assembled = DependencyGraph::assemble(&model)?;
        assert_eq!(assembled.edge_count(), 2);
        Ok(())
    }

    #[test]
    fn test_composite_wrapper_is_transparent() -> ScheduleResult<()> {
        let model = ModelBuilder::new("m")
            .with_actor("src", Capability::Plain)
            .with_actor("box", Capability::Composite)
            .with_actor_in("box", "inner", Capability::Plain)
            .with_output("src", "out")
            .with_input("box", "in")
            .with_input("inner", "in")
            .with_link("src.out", "box.in")
            .with_link("box.in", "inner.in")
            .with_tag("src", SequenceTag::new(1))
            .with_tag("inner", SequenceTag::new(2))
            .build()?;
        let graph = DependencyGraph::build(&model)?;
        assert_eq!(edge_set(&graph), vec![("src".into(), "inner".into())]);
        Ok(())
    }
}
