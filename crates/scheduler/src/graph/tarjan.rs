//! Tarjan's Strongly Connected Components (SCC) algorithm
//!
//! Used to name the exact members of a cycle once a topological sort has
//! failed. The walk is restricted to the nodes accepted by an `include`
//! predicate, so the same code serves whole-graph, placeholder-only and
//! per-subgraph checks.
//!
//! # Algorithm Overview
//!
//! Tarjan's algorithm uses DFS with two key values per node:
//! - `index`: Discovery order (0, 1, 2, ...)
//! - `low_link`: Smallest index reachable from this node
//!
//! A node is a root of an SCC when its `low_link` equals its `index`.
//! The DFS runs on an explicit frame stack instead of recursion.
//!
//! # Complexity
//!
//! - Time: O(V + E) where V = vertices, E = edges
//! - Space: O(V) for the stack and index maps

use im::{HashMap, HashSet};
use petgraph::Direction;
use petgraph::graph::{DiGraph, NodeIndex};

/// Index assigned to a node during DFS
type DiscoveryIndex = usize;

/// Low-link value for a node
type LowLink = usize;

/// One suspended DFS call: the node and the neighbours still to explore.
#[derive(Debug)]
struct Frame {
    node: NodeIndex,
    neighbors: Vec<NodeIndex>,
    position: usize,
}

impl Frame {
    fn next_neighbor(&mut self) -> Option<NodeIndex> {
        let next = self.neighbors.get(self.position).copied();
        if next.is_some() {
            self.position = self.position.saturating_add(1);
        }
        next
    }
}

/// Tarjan SCC algorithm state
#[derive(Debug, Default)]
struct TarjanState {
    /// Next discovery index to assign
    next_index: DiscoveryIndex,
    /// Map from node index to discovery index
    indices: HashMap<NodeIndex, DiscoveryIndex>,
    /// Map from node index to low-link value
    low_links: HashMap<NodeIndex, LowLink>,
    /// Stack of nodes currently being explored
    stack: Vec<NodeIndex>,
    /// Track which nodes are on the stack
    on_stack: HashSet<NodeIndex>,
}

impl TarjanState {
    fn is_visited(&self, node: NodeIndex) -> bool {
        self.indices.contains_key(&node)
    }

    fn is_on_stack(&self, node: NodeIndex) -> bool {
        self.on_stack.contains(&node)
    }

    fn low_link(&self, node: NodeIndex) -> LowLink {
        self.low_links.get(&node).copied().unwrap_or(usize::MAX)
    }

    fn lower_link(&mut self, node: NodeIndex, candidate: LowLink) {
        if candidate < self.low_link(node) {
            self.low_links.insert(node, candidate);
        }
    }

    /// Assign discovery index and low-link, then push onto the SCC stack
    fn enter<N, E, F>(&mut self, graph: &DiGraph<N, E>, node: NodeIndex, include: &F) -> Frame
    where
        F: Fn(NodeIndex) -> bool,
    {
        let index = self.next_index;
        self.next_index = self.next_index.saturating_add(1);
        self.indices.insert(node, index);
        self.low_links.insert(node, index);
        self.stack.push(node);
        self.on_stack.insert(node);

        let mut neighbors: Vec<NodeIndex> = graph
            .neighbors_directed(node, Direction::Outgoing)
            .filter(|n| include(*n))
            .collect();
        neighbors.sort();
        neighbors.dedup();

        Frame {
            node,
            neighbors,
            position: 0,
        }
    }

    /// Pop nodes from stack until we reach the given node
    fn pop_stack_to(&mut self, node: NodeIndex) -> Vec<NodeIndex> {
        let mut scc = Vec::new();

        while let Some(top) = self.stack.pop() {
            self.on_stack.remove(&top);
            scc.push(top);

            if top == node {
                break;
            }
        }

        scc.sort();
        scc
    }

    fn visit<N, E, F>(
        &mut self,
        graph: &DiGraph<N, E>,
        start: NodeIndex,
        include: &F,
    ) -> Vec<Vec<NodeIndex>>
    where
        F: Fn(NodeIndex) -> bool,
    {
        let mut sccs = Vec::new();
        let mut frames = vec![self.enter(graph, start, include)];

        loop {
            let Some(frame) = frames.last_mut() else {
                break;
            };
            let node = frame.node;

            match frame.next_neighbor() {
                Some(neighbor) if !self.is_visited(neighbor) => {
                    frames.push(self.enter(graph, neighbor, include));
                }
                Some(neighbor) => {
                    // Back edge to node on stack - update low-link
                    if self.is_on_stack(neighbor) {
                        let neighbor_index = self.indices.get(&neighbor).copied();
                        if let Some(idx) = neighbor_index {
                            self.lower_link(node, idx);
                        }
                    }
                    // Cross edges to already processed nodes are ignored
                }
                None => {
                    frames.pop();
                    let index = self.indices.get(&node).copied();
                    if index == Some(self.low_link(node)) {
                        sccs.push(self.pop_stack_to(node));
                    }
                    if let Some(parent) = frames.last() {
                        let low = self.low_link(node);
                        self.lower_link(parent.node, low);
                    }
                }
            }
        }

        sccs
    }
}

/// Strongly connected components of the part of `graph` accepted by
/// `include`. Each component is sorted by node index.
pub fn strongly_connected<N, E, F>(graph: &DiGraph<N, E>, include: F) -> Vec<Vec<NodeIndex>>
where
    F: Fn(NodeIndex) -> bool,
{
    let mut state = TarjanState::default();
    let mut all_sccs = Vec::new();

    let roots: Vec<NodeIndex> = graph.node_indices().filter(|n| include(*n)).collect();
    for node in roots {
        if !state.is_visited(node) {
            all_sccs.extend(state.visit(graph, node, &include));
        }
    }

    all_sccs
}

/// Components that form a cycle: more than one node, or one node with a
/// self-loop.
pub fn find_cycles<N, E, F>(graph: &DiGraph<N, E>, include: F) -> Vec<Vec<NodeIndex>>
where
    F: Fn(NodeIndex) -> bool,
{
    strongly_connected(graph, include)
        .into_iter()
        .filter(|scc| match scc.as_slice() {
            [single] => graph.contains_edge(*single, *single),
            members => members.len() > 1,
        })
        .collect()
}
