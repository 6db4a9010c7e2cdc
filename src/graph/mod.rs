//! Flow graph builder
//!
//! One weighted directed graph per diagnosis category plus the aggregate
//! graph over all edges. Periods are collapsed; self-loops are kept.

use std::collections::BTreeMap;
use std::fmt;

use log::debug;
use petgraph::graph::{DiGraph, NodeIndex};
use serde::{Deserialize, Serialize};

use crate::resolve::MunicipalityKey;
use crate::spatial::FlowEdge;

/// Label of the aggregate scope in reports and artifacts
pub const ALL_CATEGORIES: &str = "All";

/// Which edges a graph covers
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum GraphScope {
    /// Every edge, including unmapped diagnoses
    All,
    Category(String),
}

impl GraphScope {
    #[must_use]
    pub fn label(&self) -> &str {
        match self {
            Self::All => ALL_CATEGORIES,
            Self::Category(name) => name,
        }
    }
}

impl fmt::Display for GraphScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Weighted directed municipality graph
#[derive(Debug, Clone, Default)]
pub struct FlowGraph {
    graph: DiGraph<MunicipalityKey, u64>,
    index: BTreeMap<MunicipalityKey, NodeIndex>,
}

impl FlowGraph {
    /// Build from `(origin, destination, count)` triples
    ///
    /// Nodes are numbered in order of first appearance; parallel triples are summed.
    pub fn from_weighted_edges<'a, I>(edges: I) -> Self
    where
        I: IntoIterator<Item = (&'a MunicipalityKey, &'a MunicipalityKey, u64)>,
    {
        let mut graph = Self::default();
        let mut weights: BTreeMap<(NodeIndex, NodeIndex), u64> = BTreeMap::new();
        for (origin, destination, count) in edges {
            let a = graph.node(origin);
            let b = graph.node(destination);
            *weights.entry((a, b)).or_insert(0) += count;
        }
        for ((a, b), weight) in weights {
            graph.graph.add_edge(a, b, weight);
        }
        graph
    }

    fn node(&mut self, key: &MunicipalityKey) -> NodeIndex {
        if let Some(&index) = self.index.get(key) {
            return index;
        }
        let index = self.graph.add_node(key.clone());
        self.index.insert(key.clone(), index);
        index
    }

    #[must_use]
    pub fn graph(&self) -> &DiGraph<MunicipalityKey, u64> {
        &self.graph
    }

    #[must_use]
    pub fn node_index(&self, key: &MunicipalityKey) -> Option<NodeIndex> {
        self.index.get(key).copied()
    }

    /// Nodes in index order
    pub fn nodes(&self) -> impl Iterator<Item = &MunicipalityKey> {
        self.graph.node_weights()
    }

    /// Weight of the edge between two municipalities, 0 when absent
    #[must_use]
    pub fn weight(&self, origin: &MunicipalityKey, destination: &MunicipalityKey) -> u64 {
        let (Some(a), Some(b)) = (self.node_index(origin), self.node_index(destination)) else {
            return 0;
        };
        self.graph
            .edges_connecting(a, b)
            .map(|e| *e.weight())
            .sum()
    }

    #[must_use]
    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    #[must_use]
    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    /// Sum of all edge weights
    #[must_use]
    pub fn total_weight(&self) -> u64 {
        self.graph.edge_references().map(|e| *e.weight()).sum()
    }
}

/// Build the aggregate graph and one graph per category
///
/// The aggregate graph is always present, possibly empty.
#[must_use]
pub fn build_graphs(edges: &[FlowEdge]) -> BTreeMap<GraphScope, FlowGraph> {
    let mut scoped: BTreeMap<GraphScope, Vec<(&MunicipalityKey, &MunicipalityKey, u64)>> =
        BTreeMap::new();
    scoped.insert(GraphScope::All, Vec::new());
    for edge in edges {
        let triple = (&edge.origin, &edge.destination, edge.count);
        scoped.entry(GraphScope::All).or_default().push(triple);
        if let Some(category) = &edge.category {
            scoped
                .entry(GraphScope::Category(category.clone()))
                .or_default()
                .push(triple);
        }
    }

    scoped
        .into_iter()
        .map(|(scope, triples)| {
            let graph = FlowGraph::from_weighted_edges(triples);
            debug!(
                "Graph '{scope}': {} nodes, {} edges, weight {}",
                graph.node_count(),
                graph.edge_count(),
                graph.total_weight()
            );
            (scope, graph)
        })
        .collect()
}
