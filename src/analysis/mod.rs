// src/analysis/mod.rs

//! Dependency-graph snapshot of one evaluation.
//!
//! Every evaluation pass builds an [`Analysis`]: one node per term
//! component, edges from derived components to their dependencies. Bind
//! nodes distinguish the static edge (structure known before the bound
//! value resolves) from dynamic edges (children discovered afterwards).
//!
//! Node ids are allocated in traversal order during evaluation, which is
//! deterministic, so the same term structure evaluated twice yields
//! structurally equal analyses.

pub mod dot;

use std::fmt;

use petgraph::algo::is_cyclic_directed;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::EdgeRef;
use petgraph::Direction;

use crate::errors::{EngineError, Result};
use crate::input::JobId;
use crate::output::ActiveReason;

/// Identifier of a node within one analysis.
pub type NodeId = NodeIndex;

/// What kind of term component a node stands for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeKind {
    Constant,
    Primitive,
    Bind,
    Pair,
    Map,
    Gate,
    State,
    Catch,
    All,
    ListMap,
    Failed,
    Active,
}

impl NodeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeKind::Constant => "constant",
            NodeKind::Primitive => "primitive",
            NodeKind::Bind => "bind",
            NodeKind::Pair => "pair",
            NodeKind::Map => "map",
            NodeKind::Gate => "gate",
            NodeKind::State => "state",
            NodeKind::Catch => "catch",
            NodeKind::All => "all",
            NodeKind::ListMap => "list-map",
            NodeKind::Failed => "failed",
            NodeKind::Active => "active",
        }
    }
}

/// Settled verdict of a node that is neither in flight nor blocked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RunResult {
    Ok,
    Err,
}

/// Evaluation state shown on a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeState {
    Ready(RunResult),
    Active(ActiveReason),
    /// Waiting on an upstream dependency that is not `Ok` yet.
    Blocked,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnalysisNode {
    pub kind: NodeKind,
    pub label: String,
    pub state: NodeState,
    pub job_id: Option<JobId>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AnalysisEdge {
    /// True for the statically-known half of a bind (and for gate control
    /// edges); false for dependencies discovered during evaluation.
    pub static_dep: bool,
}

/// Per-state node counts, logged by the engine at each publish.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AnalysisStats {
    pub ok: usize,
    pub err: usize,
    pub active: usize,
    pub blocked: usize,
}

impl fmt::Display for AnalysisStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "ok={} err={} active={} blocked={}",
            self.ok, self.err, self.active, self.blocked
        )
    }
}

/// A labeled DAG describing one evaluation pass.
#[derive(Debug, Clone)]
pub struct Analysis {
    graph: DiGraph<AnalysisNode, AnalysisEdge>,
    root: Option<NodeIndex>,
}

impl Analysis {
    /// Sentinel analysis published before the first evaluation completes.
    pub fn booting() -> Self {
        let mut graph = DiGraph::new();
        let root = graph.add_node(AnalysisNode {
            kind: NodeKind::Active,
            label: "booting".to_string(),
            state: NodeState::Active(ActiveReason::Running),
            job_id: None,
        });
        Analysis {
            graph,
            root: Some(root),
        }
    }

    pub(crate) fn from_graph(
        graph: DiGraph<AnalysisNode, AnalysisEdge>,
        root: Option<NodeIndex>,
    ) -> Self {
        Analysis { graph, root }
    }

    pub fn root(&self) -> Option<NodeId> {
        self.root
    }

    pub fn node(&self, id: NodeId) -> Option<&AnalysisNode> {
        self.graph.node_weight(id)
    }

    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    pub fn nodes(&self) -> impl Iterator<Item = (NodeId, &AnalysisNode)> {
        self.graph
            .node_indices()
            .filter_map(|ix| self.graph.node_weight(ix).map(|n| (ix, n)))
    }

    /// All edges as `(from, to, static)` triples.
    pub fn edges(&self) -> impl Iterator<Item = (NodeId, NodeId, bool)> + '_ {
        self.graph
            .edge_references()
            .map(|e| (e.source(), e.target(), e.weight().static_dep))
    }

    /// Dependencies of a node, in insertion order.
    pub fn deps_of(&self, id: NodeId) -> Vec<NodeId> {
        let mut deps: Vec<_> = self
            .graph
            .edges_directed(id, Direction::Outgoing)
            .map(|e| (e.id(), e.target()))
            .collect();
        deps.sort_by_key(|(edge, _)| *edge);
        deps.into_iter().map(|(_, target)| target).collect()
    }

    /// The job attributed to this analysis, if any: the root's own job, or
    /// the first job found walking dependencies from the root.
    pub fn job_id(&self) -> Option<JobId> {
        let root = self.root?;
        let mut stack = vec![root];
        let mut seen = std::collections::HashSet::new();
        while let Some(ix) = stack.pop() {
            if !seen.insert(ix) {
                continue;
            }
            if let Some(node) = self.graph.node_weight(ix) {
                if let Some(job) = &node.job_id {
                    return Some(job.clone());
                }
            }
            stack.extend(self.graph.neighbors_directed(ix, Direction::Outgoing));
        }
        None
    }

    pub fn stats(&self) -> AnalysisStats {
        let mut stats = AnalysisStats::default();
        for ix in self.graph.node_indices() {
            if let Some(node) = self.graph.node_weight(ix) {
                match node.state {
                    NodeState::Ready(RunResult::Ok) => stats.ok += 1,
                    NodeState::Ready(RunResult::Err) => stats.err += 1,
                    NodeState::Active(_) => stats.active += 1,
                    NodeState::Blocked => stats.blocked += 1,
                }
            }
        }
        stats
    }

    /// Structural assertion: the graph must be acyclic. A violation means
    /// evaluation itself went wrong, and the engine loop treats it as
    /// fatal.
    pub fn assert_acyclic(&self) -> Result<()> {
        if is_cyclic_directed(&self.graph) {
            return Err(EngineError::Analysis(
                "cycle detected in analysis graph".to_string(),
            ));
        }
        Ok(())
    }

    /// Structural comparison: same nodes in the same id order, same edges.
    ///
    /// This is what "deterministic re-evaluation" means for analyses, so
    /// it is exposed as `PartialEq`.
    fn structurally_equal(&self, other: &Self) -> bool {
        if self.root.map(NodeIndex::index) != other.root.map(NodeIndex::index) {
            return false;
        }
        let nodes_a: Vec<_> = self.nodes().map(|(ix, n)| (ix.index(), n.clone())).collect();
        let nodes_b: Vec<_> = other.nodes().map(|(ix, n)| (ix.index(), n.clone())).collect();
        if nodes_a != nodes_b {
            return false;
        }
        let mut edges_a: Vec<_> = self
            .edges()
            .map(|(f, t, s)| (f.index(), t.index(), s))
            .collect();
        let mut edges_b: Vec<_> = other
            .edges()
            .map(|(f, t, s)| (f.index(), t.index(), s))
            .collect();
        edges_a.sort_unstable();
        edges_b.sort_unstable();
        edges_a == edges_b
    }
}

impl PartialEq for Analysis {
    fn eq(&self, other: &Self) -> bool {
        self.structurally_equal(other)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn booting_is_a_single_active_node() {
        let a = Analysis::booting();
        assert_eq!(a.node_count(), 1);
        let root = a.root().unwrap();
        let node = a.node(root).unwrap();
        assert_eq!(node.kind, NodeKind::Active);
        assert_eq!(node.state, NodeState::Active(ActiveReason::Running));
    }

    #[test]
    fn stats_counts_states() {
        let mut graph = DiGraph::new();
        let a = graph.add_node(AnalysisNode {
            kind: NodeKind::Constant,
            label: "a".into(),
            state: NodeState::Ready(RunResult::Ok),
            job_id: None,
        });
        let b = graph.add_node(AnalysisNode {
            kind: NodeKind::Failed,
            label: "b".into(),
            state: NodeState::Ready(RunResult::Err),
            job_id: None,
        });
        graph.add_edge(a, b, AnalysisEdge { static_dep: false });
        let analysis = Analysis::from_graph(graph, Some(a));
        let stats = analysis.stats();
        assert_eq!(stats.ok, 1);
        assert_eq!(stats.err, 1);
        assert_eq!(stats.active, 0);
    }
}
