//! Upstream closures of sequenced nodes.
//!
//! The subgraph of a tag is everything backward-reachable from its node,
//! stopping at other tag nodes. Each subgraph is topologically sorted on its
//! own so a cycle is reported with the exact nodes that form it.

use std::collections::{BTreeSet, HashMap, HashSet};

use im::HashSet as PersistentSet;
use petgraph::graph::NodeIndex;
use tracing::debug;

use tempo_core::{ScheduleError, ScheduleResult, TagId};

use crate::graph::{DependencyGraph, tarjan};
use crate::schedule::FiringRecord;

/// Graph nodes subsumed into at least one subgraph.
///
/// Persistent so the scheduler can extend a copy while building and only
/// keep it when the whole build succeeds.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VisitedSet {
    nodes: PersistentSet<NodeIndex>,
}

impl VisitedSet {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mark(&mut self, node: NodeIndex) {
        self.nodes.insert(node);
    }

    #[must_use]
    pub fn contains(&self, node: NodeIndex) -> bool {
        self.nodes.contains(&node)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

/// The acyclic upstream closure of one sequenced node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subgraph {
    root: TagId,
    root_node: NodeIndex,
    edges: Vec<(NodeIndex, NodeIndex)>,
    /// Every member, topologically sorted; the root comes last.
    order: Vec<NodeIndex>,
}

impl Subgraph {
    #[must_use]
    pub const fn root(&self) -> TagId {
        self.root
    }

    #[must_use]
    pub const fn root_node(&self) -> NodeIndex {
        self.root_node
    }

    #[must_use]
    pub fn topological_order(&self) -> &[NodeIndex] {
        &self.order
    }

    #[must_use]
    pub fn edges(&self) -> &[(NodeIndex, NodeIndex)] {
        &self.edges
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.order.len()
    }

    /// Always false: a subgraph contains at least its root.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    #[must_use]
    pub fn contains(&self, node: NodeIndex) -> bool {
        self.order.contains(&node)
    }

    /// Firings for one pass through this subgraph, in topological order.
    /// An actor that contributes several placeholder ports fires once per
    /// entry point.
    #[must_use]
    pub fn firings(&self, graph: &DependencyGraph) -> Vec<FiringRecord> {
        let mut seen = HashSet::new();
        self.order
            .iter()
            .filter_map(|n| graph.node(*n))
            .filter(|node| seen.insert((node.actor, node.method.clone())))
            .map(|node| node.firing())
            .collect()
    }
}

/// Computes subgraphs against one dependency graph.
#[derive(Debug, Clone, Copy)]
pub struct SubgraphResolver<'g> {
    graph: &'g DependencyGraph,
}

impl<'g> SubgraphResolver<'g> {
    #[must_use]
    pub const fn new(graph: &'g DependencyGraph) -> Self {
        Self { graph }
    }

    /// Backward closure of `tag`, marking every member in `visited`.
    ///
    /// # Errors
    ///
    /// * `MissingTag` if `tag` has no node in the graph.
    /// * `StructuralCycle` naming the nodes of every cycle in the closure.
    pub fn backward_reachable(
        &self,
        tag: TagId,
        visited: &mut VisitedSet,
    ) -> ScheduleResult<Subgraph> {
        let root = self.graph.tag_node(tag).ok_or_else(|| {
            ScheduleError::missing_tag(tag.to_string(), "tag has no node in the dependency graph")
        })?;

        let mut members: BTreeSet<NodeIndex> = BTreeSet::from([root]);
        let mut edges = Vec::new();
        let mut stack = vec![root];

        while let Some(node) = stack.pop() {
            for pred in self.graph.predecessors(node) {
                if self.graph.is_boundary(pred) {
                    // other tags own their own closure
                    if pred == root {
                        edges.push((pred, node));
                    }
                    continue;
                }
                edges.push((pred, node));
                if members.insert(pred) {
                    stack.push(pred);
                }
            }
        }
        edges.sort();
        edges.dedup();

        let order = self.topological_sort(&members, &edges)?;
        for node in &order {
            visited.mark(*node);
        }

        debug!(
            tag = %tag,
            root = self.graph.node(root).map_or("", |n| n.label.as_str()),
            nodes = order.len(),
            edges = edges.len(),
            "subgraph resolved"
        );

        Ok(Subgraph {
            root: tag,
            root_node: root,
            edges,
            order,
        })
    }

    /// Kahn's algorithm; ties break on node index so the order is stable.
    fn topological_sort(
        &self,
        members: &BTreeSet<NodeIndex>,
        edges: &[(NodeIndex, NodeIndex)],
    ) -> ScheduleResult<Vec<NodeIndex>> {
        let mut in_degree: HashMap<NodeIndex, usize> = members.iter().map(|n| (*n, 0)).collect();
        let mut successors: HashMap<NodeIndex, Vec<NodeIndex>> = HashMap::new();
        for (from, to) in edges {
            successors.entry(*from).or_default().push(*to);
            if let Some(degree) = in_degree.get_mut(to) {
                *degree = degree.saturating_add(1);
            }
        }

        let mut ready: BTreeSet<NodeIndex> = in_degree
            .iter()
            .filter(|(_, degree)| **degree == 0)
            .map(|(n, _)| *n)
            .collect();
        let mut order = Vec::with_capacity(members.len());

        while let Some(node) = ready.pop_first() {
            order.push(node);
            for next in successors.get(&node).into_iter().flatten() {
                if let Some(degree) = in_degree.get_mut(next) {
                    *degree = degree.saturating_sub(1);
                    if *degree == 0 {
                        ready.insert(*next);
                    }
                }
            }
        }

        if order.len() == members.len() {
            return Ok(order);
        }

        let residual: BTreeSet<NodeIndex> = members
            .iter()
            .filter(|n| !order.contains(n))
            .copied()
            .collect();
        Err(self.cycle_error(&residual))
    }

    /// Names the members of every cycle among `residual`, falling back to
    /// the whole residual set.
    fn cycle_error(&self, residual: &BTreeSet<NodeIndex>) -> ScheduleError {
        let cycles = tarjan::find_cycles(self.graph.petgraph(), |n| residual.contains(&n));
        let nodes: Vec<NodeIndex> = if cycles.is_empty() {
            residual.iter().copied().collect()
        } else {
            cycles.into_iter().flatten().collect()
        };
        ScheduleError::cycle(self.graph.labels(&nodes))
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    #![allow(clippy::expect_used)]

    use super::*;
    use tempo_core::{Capability, Model, ModelBuilder, SequenceTag};

    fn labels_in_order(graph: &DependencyGraph, subgraph: &Subgraph) -> Vec<String> {
        graph.labels(subgraph.topological_order())
    }

    /// `a:1 -> f -> g -> b:2`, with `f` and `g` untagged.
    fn relay_model() -> ScheduleResult<Model> {
        ModelBuilder::new("relay")
            .with_actor("a", Capability::Plain)
            .with_actor("f", Capability::Plain)
            .with_actor("g", Capability::Plain)
            .with_actor("b", Capability::Plain)
            .with_output("a", "out")
            .with_input("f", "in")
            .with_output("f", "out")
            .with_input("g", "in")
            .with_output("g", "out")
            .with_input("b", "in")
            .with_link("a.out", "f.in")
            .with_link("f.out", "g.in")
            .with_link("g.out", "b.in")
            .with_tag("a", SequenceTag::new(1))
            .with_tag("b", SequenceTag::new(2))
            .build()
    }

    #[test]
    fn test_closure_stops_at_other_tags() -> ScheduleResult<()> {
        let model = relay_model()?;
        let graph = DependencyGraph::build(&model)?;
        let resolver = SubgraphResolver::new(&graph);
        let mut visited = VisitedSet::new();

        let b = model.tag_named("b").unwrap();
        let subgraph = resolver.backward_reachable(b, &mut visited)?;

        assert_eq!(labels_in_order(&graph, &subgraph), vec!["f.out", "g.out", "b"]);
        assert_eq!(subgraph.root(), b);
        assert_eq!(visited.len(), 3);
        Ok(())
    }

    #[test]
    fn test_source_tag_has_singleton_closure() -> ScheduleResult<()> {
        let model = relay_model()?;
        let graph = DependencyGraph::build(&model)?;
        let mut visited = VisitedSet::new();

        let a = model.tag_named("a").unwrap();
        let subgraph = SubgraphResolver::new(&graph).backward_reachable(a, &mut visited)?;
        assert_eq!(subgraph.len(), 1);
        assert!(subgraph.edges().is_empty());
        Ok(())
    }

    #[test]
    fn test_firings_follow_topological_order() -> ScheduleResult<()> {
        let model = relay_model()?;
        let graph = DependencyGraph::build(&model)?;
        let b = model.tag_named("b").unwrap();
        let subgraph =
            SubgraphResolver::new(&graph).backward_reachable(b, &mut VisitedSet::new())?;

        let names: Vec<String> = subgraph
            .firings(&graph)
            .into_iter()
            .map(|f| f.actor_name)
            .collect();
        assert_eq!(names, vec!["f", "g", "b"]);
        Ok(())
    }

    #[test]
    fn test_cycle_through_own_tag_is_reported() -> ScheduleResult<()> {
        let model = ModelBuilder::new("loop")
            .with_actor("x", Capability::Plain)
            .with_actor("y", Capability::Plain)
            .with_input("x", "in")
            .with_output("x", "out")
            .with_input("y", "in")
            .with_output("y", "out")
            .with_link("x.out", "y.in")
            .with_link("y.out", "x.in")
            .with_tag("x", SequenceTag::new(1))
            .build()?;
        let graph = DependencyGraph::assemble(&model)?;
        let x = model.tag_named("x").unwrap();

        let err = SubgraphResolver::new(&graph)
            .backward_reachable(x, &mut VisitedSet::new())
            .unwrap_err();
        assert_eq!(
            err,
            ScheduleError::StructuralCycle(vec!["x".into(), "y.out".into()])
        );
        Ok(())
    }

    #[test]
    fn test_self_feeding_tag_is_a_cycle() -> ScheduleResult<()> {
        let model = ModelBuilder::new("self")
            .with_actor("x", Capability::Plain)
            .with_input("x", "in")
            .with_output("x", "out")
            .with_link("x.out", "x.in")
            .with_tag("x", SequenceTag::new(1))
            .build()?;
        let graph = DependencyGraph::assemble(&model)?;
        let x = model.tag_named("x").unwrap();
        let mut visited = VisitedSet::new();

        let err = SubgraphResolver::new(&graph)
            .backward_reachable(x, &mut visited)
            .unwrap_err();
        assert_eq!(err, ScheduleError::StructuralCycle(vec!["x".into()]));
        assert!(visited.is_empty());
        Ok(())
    }

    #[test]
    fn test_unknown_tag_is_missing() -> ScheduleResult<()> {
        let model = relay_model()?;
        let graph = DependencyGraph::build(&model)?;
        let err = SubgraphResolver::new(&graph)
            .backward_reachable(TagId::new(99), &mut VisitedSet::new())
            .unwrap_err();
        assert!(matches!(err, ScheduleError::MissingTag { .. }));
        Ok(())
    }
}
