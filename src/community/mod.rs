//! Community detection per graph scope.

pub mod infomap;

use std::collections::{BTreeMap, BTreeSet};

use log::{info, warn};
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::graph::{FlowGraph, GraphScope};
use crate::resolve::MunicipalityKey;

pub use infomap::Infomap;

/// Whether within-municipality flows take part in partitioning
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SelfLoopPolicy {
    #[default]
    Keep,
    Drop,
}

/// Assignment of every graph node to a community
///
/// Ids carry no meaning beyond grouping identity.
#[derive(Debug, Clone, PartialEq)]
pub struct Partition {
    assignments: Vec<(MunicipalityKey, usize)>,
    codelength: Option<f64>,
}

impl Partition {
    #[must_use]
    pub fn new(assignments: Vec<(MunicipalityKey, usize)>, codelength: Option<f64>) -> Self {
        Self {
            assignments,
            codelength,
        }
    }

    /// `(municipality, community)` in graph node order
    #[must_use]
    pub fn assignments(&self) -> &[(MunicipalityKey, usize)] {
        &self.assignments
    }

    #[must_use]
    pub fn community(&self, key: &MunicipalityKey) -> Option<usize> {
        self.assignments.iter().find(|(k, _)| k == key).map(|(_, c)| *c)
    }

    #[must_use]
    pub fn num_communities(&self) -> usize {
        self.assignments.iter().map(|(_, c)| *c).collect::<BTreeSet<_>>().len()
    }

    /// Code length in bits, when the detector reports one
    #[must_use]
    pub fn codelength(&self) -> Option<f64> {
        self.codelength
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.assignments.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.assignments.is_empty()
    }
}

/// Graph in, partition out
pub trait CommunityDetector {
    /// Short name used in logs and the run summary
    fn name(&self) -> &'static str;

    /// Partition the nodes of a graph with at least one edge
    fn detect(&self, graph: &FlowGraph) -> Result<Partition>;
}

/// Result of detection for one scope
#[derive(Debug, Clone, PartialEq)]
pub enum CommunityOutcome {
    Detected(Partition),
    /// The graph had no edges
    Skipped,
}

impl CommunityOutcome {
    #[must_use]
    pub fn partition(&self) -> Option<&Partition> {
        match self {
            Self::Detected(partition) => Some(partition),
            Self::Skipped => None,
        }
    }
}

/// Run a detector over every scope
///
/// Graphs without edges are skipped rather than partitioned.
pub fn detect_all<D: CommunityDetector + ?Sized>(
    graphs: &BTreeMap<GraphScope, FlowGraph>,
    detector: &D,
) -> Result<BTreeMap<GraphScope, CommunityOutcome>> {
    let mut outcomes = BTreeMap::new();
    for (scope, graph) in graphs {
        if graph.edge_count() == 0 {
            warn!("Skipping community detection for '{scope}': graph has no edges");
            outcomes.insert(scope.clone(), CommunityOutcome::Skipped);
            continue;
        }

        let partition = detector.detect(graph)?;
        info!(
            "'{scope}': {} communities over {} municipalities ({})",
            partition.num_communities(),
            partition.len(),
            detector.name()
        );
        outcomes.insert(scope.clone(), CommunityOutcome::Detected(partition));
    }
    Ok(outcomes)
}
