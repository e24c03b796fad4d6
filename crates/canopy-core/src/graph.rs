#![forbid(unsafe_code)]

//! Dependency graph between observable values and observers.
//!
//! An edge `from -> to` means "`to` reads `from`". Roots of value trees,
//! boxed computations and the trees produced by observable computations are
//! sources; observers are targets (and sources again when something reads
//! them).
//!
//! # Design
//!
//! Nodes live in an [`IndexSet`] so every traversal is deterministic and
//! ties in the topological order resolve by insertion order. Adjacency is
//! stored in both directions, which keeps node removal and the backward
//! walks of [`all_paths_to`](DependencyGraph::all_paths_to) linear in the
//! number of touched edges.
//!
//! # Invariants
//!
//! 1. Every edge endpoint is a node. Inserting an edge with a missing
//!    endpoint fails with [`GraphError::DanglingEdge`].
//! 2. An edge is stored at most once.
//! 3. Removing a node removes every edge touching it.
//! 4. The graph is acyclic while observers obey the single-pass run
//!    discipline; a cycle found by a sort is reported, never ignored.

use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};

use indexmap::IndexSet;
use thiserror::Error;

use crate::id::Uid;

/// Structural errors in the dependency graph.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GraphError {
    #[error("graph node {0} does not exist")]
    MissingNode(Uid),

    #[error("edge {from} -> {to} has an endpoint outside the graph")]
    DanglingEdge { from: Uid, to: Uid },

    #[error("dependency cycle through {nodes:?}")]
    Cycle { nodes: Vec<Uid> },
}

/// Directed graph of value and observer ids.
#[derive(Debug, Clone, Default)]
pub struct DependencyGraph {
    nodes: IndexSet<Uid>,
    outgoing: HashMap<Uid, IndexSet<Uid>>,
    incoming: HashMap<Uid, IndexSet<Uid>>,
}

impl DependencyGraph {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a node. Returns `false` if it already existed.
    pub fn insert_node(&mut self, node: Uid) -> bool {
        if !self.nodes.insert(node) {
            return false;
        }
        self.outgoing.insert(node, IndexSet::new());
        self.incoming.insert(node, IndexSet::new());
        true
    }

    #[must_use]
    pub fn contains_node(&self, node: Uid) -> bool {
        self.nodes.contains(&node)
    }

    /// Insert the edge `from -> to`. Returns `false` if it already existed.
    ///
    /// # Errors
    ///
    /// [`GraphError::DanglingEdge`] if either endpoint is not a node.
    pub fn insert_edge(&mut self, from: Uid, to: Uid) -> Result<bool, GraphError> {
        if !self.contains_node(from) || !self.contains_node(to) {
            return Err(GraphError::DanglingEdge { from, to });
        }
        let inserted = self.outgoing.entry(from).or_default().insert(to);
        if inserted {
            self.incoming.entry(to).or_default().insert(from);
        }
        Ok(inserted)
    }

    /// Remove the edge `from -> to`. Returns `false` if it did not exist.
    pub fn remove_edge(&mut self, from: Uid, to: Uid) -> bool {
        let removed = self
            .outgoing
            .get_mut(&from)
            .is_some_and(|targets| targets.shift_remove(&to));
        if removed && let Some(sources) = self.incoming.get_mut(&to) {
            sources.shift_remove(&from);
        }
        removed
    }

    /// Remove a node and every edge touching it.
    pub fn remove_node(&mut self, node: Uid) -> bool {
        if !self.nodes.shift_remove(&node) {
            return false;
        }
        for target in self.outgoing.remove(&node).unwrap_or_default() {
            if let Some(sources) = self.incoming.get_mut(&target) {
                sources.shift_remove(&node);
            }
        }
        for source in self.incoming.remove(&node).unwrap_or_default() {
            if let Some(targets) = self.outgoing.get_mut(&source) {
                targets.shift_remove(&node);
            }
        }
        true
    }

    /// Remove every edge ending at `node`, returning the former sources.
    pub fn remove_edges_to(&mut self, node: Uid) -> Vec<Uid> {
        let sources: Vec<Uid> = self
            .incoming
            .get_mut(&node)
            .map(|sources| sources.drain(..).collect())
            .unwrap_or_default();
        for source in &sources {
            if let Some(targets) = self.outgoing.get_mut(source) {
                targets.shift_remove(&node);
            }
        }
        sources
    }

    /// Direct dependents of `node`, in edge insertion order.
    pub fn successors(&self, node: Uid) -> impl Iterator<Item = Uid> + '_ {
        self.outgoing.get(&node).into_iter().flatten().copied()
    }

    /// Direct dependencies of `node`, in edge insertion order.
    pub fn predecessors(&self, node: Uid) -> impl Iterator<Item = Uid> + '_ {
        self.incoming.get(&node).into_iter().flatten().copied()
    }

    /// Every edge reachable from `node` by following `from -> to` chains,
    /// breadth first.
    #[must_use]
    pub fn edges_from(&self, node: Uid) -> Vec<(Uid, Uid)> {
        let mut edges = Vec::new();
        let mut seen = HashSet::from([node]);
        let mut queue = VecDeque::from([node]);
        while let Some(current) = queue.pop_front() {
            for next in self.successors(current) {
                edges.push((current, next));
                if seen.insert(next) {
                    queue.push_back(next);
                }
            }
        }
        edges
    }

    /// Every node reachable from `starts`, starts included, in discovery
    /// order. Starts that are not nodes are skipped.
    #[must_use]
    pub fn reachable_from(&self, starts: impl IntoIterator<Item = Uid>) -> IndexSet<Uid> {
        let mut seen = IndexSet::new();
        let mut queue = VecDeque::new();
        for start in starts {
            if self.contains_node(start) && seen.insert(start) {
                queue.push_back(start);
            }
        }
        while let Some(current) = queue.pop_front() {
            for next in self.successors(current) {
                if seen.insert(next) {
                    queue.push_back(next);
                }
            }
        }
        seen
    }

    /// Every simple directed walk from `from` to `to`.
    #[must_use]
    pub fn all_paths_between(&self, from: Uid, to: Uid) -> Vec<Vec<Uid>> {
        let mut paths = Vec::new();
        if !self.contains_node(from) || !self.contains_node(to) {
            return paths;
        }
        let mut walk = vec![from];
        self.walk_forward(&mut walk, &mut |walk| {
            if walk.last() == Some(&to) && walk.len() > 1 {
                paths.push(walk.to_vec());
                return false;
            }
            true
        });
        paths
    }

    /// Every maximal simple walk starting at `source`.
    #[must_use]
    pub fn all_paths_from(&self, source: Uid) -> Vec<Vec<Uid>> {
        let mut paths = Vec::new();
        if !self.contains_node(source) {
            return paths;
        }
        let mut walk = vec![source];
        self.collect_maximal(&mut walk, &mut paths, Direction::Forward);
        paths
    }

    /// Every maximal simple walk ending at `target`, listed source first.
    #[must_use]
    pub fn all_paths_to(&self, target: Uid) -> Vec<Vec<Uid>> {
        let mut paths = Vec::new();
        if !self.contains_node(target) {
            return paths;
        }
        let mut walk = vec![target];
        self.collect_maximal(&mut walk, &mut paths, Direction::Backward);
        for path in &mut paths {
            path.reverse();
        }
        paths
    }

    /// Whether `to` can be reached from `from` through at least one
    /// intermediate node.
    #[must_use]
    pub fn is_indirect_dependency(&self, from: Uid, to: Uid) -> bool {
        self.all_paths_between(from, to)
            .iter()
            .any(|path| path.len() > 2)
    }

    // Depth-first over simple walks; `visit` returns whether to extend the
    // current walk further.
    fn walk_forward(&self, walk: &mut Vec<Uid>, visit: &mut impl FnMut(&[Uid]) -> bool) {
        if !visit(walk) {
            return;
        }
        let Some(&current) = walk.last() else {
            return;
        };
        let next: Vec<Uid> = self.successors(current).collect();
        for node in next {
            if walk.contains(&node) {
                continue;
            }
            walk.push(node);
            self.walk_forward(walk, visit);
            walk.pop();
        }
    }

    fn collect_maximal(&self, walk: &mut Vec<Uid>, paths: &mut Vec<Vec<Uid>>, dir: Direction) {
        let Some(&current) = walk.last() else {
            return;
        };
        let next: Vec<Uid> = match dir {
            Direction::Forward => self.successors(current).collect(),
            Direction::Backward => self.predecessors(current).collect(),
        };
        let mut extended = false;
        for node in next {
            if walk.contains(&node) {
                continue;
            }
            extended = true;
            walk.push(node);
            self.collect_maximal(walk, paths, dir);
            walk.pop();
        }
        if !extended && walk.len() > 1 {
            paths.push(walk.clone());
        }
    }

    /// Topological order of the whole graph.
    ///
    /// # Errors
    ///
    /// [`GraphError::Cycle`] listing the nodes left unresolved.
    pub fn topological_sort(&self) -> Result<Vec<Uid>, GraphError> {
        self.topological_sort_of(&self.nodes)
    }

    /// Topological order of `subset`, considering only edges inside it.
    ///
    /// Kahn's algorithm; among nodes whose dependencies are all emitted, the
    /// one inserted into the graph first goes next.
    ///
    /// # Errors
    ///
    /// [`GraphError::MissingNode`] if `subset` names an unknown node,
    /// [`GraphError::Cycle`] if the subset is not acyclic.
    pub fn topological_sort_of(&self, subset: &IndexSet<Uid>) -> Result<Vec<Uid>, GraphError> {
        let mut indegree: HashMap<Uid, usize> = HashMap::with_capacity(subset.len());
        let mut ready = BTreeSet::new();
        for &node in subset {
            let position = self
                .nodes
                .get_index_of(&node)
                .ok_or(GraphError::MissingNode(node))?;
            let count = self
                .predecessors(node)
                .filter(|source| subset.contains(source))
                .count();
            if count == 0 {
                ready.insert(position);
            }
            indegree.insert(node, count);
        }

        let mut order = Vec::with_capacity(subset.len());
        while let Some(position) = ready.pop_first() {
            let Some(&node) = self.nodes.get_index(position) else {
                continue;
            };
            order.push(node);
            for next in self.successors(node) {
                let Some(count) = indegree.get_mut(&next) else {
                    continue;
                };
                *count -= 1;
                if *count == 0
                    && let Some(next_position) = self.nodes.get_index_of(&next)
                {
                    ready.insert(next_position);
                }
            }
        }

        if order.len() < subset.len() {
            let nodes = subset
                .iter()
                .copied()
                .filter(|node| indegree.get(node).is_some_and(|count| *count > 0))
                .collect();
            return Err(GraphError::Cycle { nodes });
        }
        Ok(order)
    }

    /// Check invariant 1 over every stored edge.
    ///
    /// # Errors
    ///
    /// The first dangling edge found.
    pub fn check_consistency(&self) -> Result<(), GraphError> {
        for (&from, targets) in &self.outgoing {
            for &to in targets {
                if !self.contains_node(from) || !self.contains_node(to) {
                    return Err(GraphError::DanglingEdge { from, to });
                }
            }
        }
        Ok(())
    }

    /// Nodes in insertion order.
    pub fn nodes(&self) -> impl Iterator<Item = Uid> + '_ {
        self.nodes.iter().copied()
    }

    #[must_use]
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    #[must_use]
    pub fn edge_count(&self) -> usize {
        self.outgoing.values().map(IndexSet::len).sum()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn clear(&mut self) {
        self.nodes.clear();
        self.outgoing.clear();
        self.incoming.clear();
    }
}

#[derive(Debug, Clone, Copy)]
enum Direction {
    Forward,
    Backward,
}
