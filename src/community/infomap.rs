//! Two-level Infomap on a directed weighted network.
//!
//! Visit rates come from PageRank with unrecorded teleportation. The map
//! equation is minimised by deterministic local moving in node order,
//! followed by aggregation of modules into super-nodes, repeated until no
//! move improves the code length.

use log::trace;
use petgraph::visit::EdgeRef;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::graph::FlowGraph;

use super::{CommunityDetector, Partition, SelfLoopPolicy};

/// Moves must improve the code length by more than this
const MIN_IMPROVEMENT: f64 = 1e-10;

fn plogp(p: f64) -> f64 {
    if p > 0.0 { p * p.log2() } else { 0.0 }
}

/// Infomap settings
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Infomap {
    /// Teleportation probability of the random walker
    pub teleportation: f64,
    /// Power-iteration cap for visit rates
    pub max_iterations: usize,
    /// L1 convergence threshold for visit rates
    pub tolerance: f64,
    /// Cap on local-moving sweeps per level
    pub max_sweeps: usize,
    pub self_loops: SelfLoopPolicy,
}

impl Default for Infomap {
    fn default() -> Self {
        Self {
            teleportation: 0.15,
            max_iterations: 200,
            tolerance: 1e-15,
            max_sweeps: 100,
            self_loops: SelfLoopPolicy::Keep,
        }
    }
}

impl Infomap {
    #[must_use]
    pub fn with_self_loops(mut self, policy: SelfLoopPolicy) -> Self {
        self.self_loops = policy;
        self
    }

    #[must_use]
    pub fn with_teleportation(mut self, teleportation: f64) -> Self {
        self.teleportation = teleportation;
        self
    }
}

/// Flow network: node visit rates and link flows
#[derive(Debug, Clone)]
pub(crate) struct FlowNetwork {
    pub node_flow: Vec<f64>,
    /// `(source, target, flow)`, source-major and deduplicated
    pub links: Vec<(usize, usize, f64)>,
}

impl FlowNetwork {
    /// Stationary flow of a directed weighted graph
    pub fn from_graph(graph: &FlowGraph, config: &Infomap) -> Self {
        let g = graph.graph();
        let n = g.node_count();
        let mut weights: Vec<(usize, usize, f64)> = g
            .edge_references()
            .filter(|e| config.self_loops == SelfLoopPolicy::Keep || e.source() != e.target())
            .map(|e| (e.source().index(), e.target().index(), *e.weight() as f64))
            .filter(|(_, _, w)| *w > 0.0)
            .collect();
        weights.sort_by(|a, b| (a.0, a.1).cmp(&(b.0, b.1)));

        let mut out_weight = vec![0.0; n];
        for &(s, _, w) in &weights {
            out_weight[s] += w;
        }

        let tau = config.teleportation;
        let uniform = 1.0 / n.max(1) as f64;
        let mut rank = vec![uniform; n];
        for iteration in 0..config.max_iterations {
            let dangling: f64 = (0..n).filter(|&i| out_weight[i] == 0.0).map(|i| rank[i]).sum();
            let base = (tau + (1.0 - tau) * dangling) * uniform;
            let mut next = vec![base; n];
            for &(s, t, w) in &weights {
                next[t] += (1.0 - tau) * rank[s] * w / out_weight[s];
            }
            let total: f64 = next.iter().sum();
            next.iter_mut().for_each(|p| *p /= total);

            let delta: f64 = next.iter().zip(&rank).map(|(a, b)| (a - b).abs()).sum();
            rank = next;
            if delta < config.tolerance {
                trace!("Visit rates converged after {} iterations", iteration + 1);
                break;
            }
        }

        // Unrecorded teleportation: only link steps carry flow
        let links: Vec<(usize, usize, f64)> = weights
            .iter()
            .map(|&(s, t, w)| (s, t, rank[s] * w / out_weight[s]))
            .collect();
        let mut node_flow = vec![0.0; n];
        for &(_, t, f) in &links {
            node_flow[t] += f;
        }
        let total: f64 = node_flow.iter().sum();
        if total > 0.0 {
            node_flow.iter_mut().for_each(|p| *p /= total);
        }
        let scale = if total > 0.0 { 1.0 / total } else { 0.0 };
        let links = links.into_iter().map(|(s, t, f)| (s, t, f * scale)).collect();

        Self { node_flow, links }
    }
}

/// One level of the hierarchical search
struct Level {
    /// Flow of each (super-)node
    node_flow: Vec<f64>,
    /// Exit and entry flow of each node, self flows excluded
    out_flow: Vec<f64>,
    in_flow: Vec<f64>,
    out_links: Vec<Vec<(usize, f64)>>,
    in_links: Vec<Vec<(usize, f64)>>,
}

impl Level {
    fn new(node_flow: Vec<f64>, links: &[(usize, usize, f64)]) -> Self {
        let n = node_flow.len();
        let mut level = Self {
            node_flow,
            out_flow: vec![0.0; n],
            in_flow: vec![0.0; n],
            out_links: vec![Vec::new(); n],
            in_links: vec![Vec::new(); n],
        };
        for &(s, t, f) in links {
            if s == t {
                continue;
            }
            level.out_flow[s] += f;
            level.in_flow[t] += f;
            level.out_links[s].push((t, f));
            level.in_links[t].push((s, f));
        }
        level
    }

    fn len(&self) -> usize {
        self.node_flow.len()
    }
}

/// Module flow bookkeeping and the map equation
struct Modules {
    assignment: Vec<usize>,
    flow: Vec<f64>,
    exit: Vec<f64>,
    enter: Vec<f64>,
    /// Sum of plogp over all leaf node flows; constant for a network
    node_entropy: f64,
}

impl Modules {
    fn singletons(level: &Level, node_entropy: f64) -> Self {
        Self {
            assignment: (0..level.len()).collect(),
            flow: level.node_flow.clone(),
            exit: level.out_flow.clone(),
            enter: level.in_flow.clone(),
            node_entropy,
        }
    }

    /// Two-level map equation of the current assignment
    fn codelength(&self) -> f64 {
        let enter_sum: f64 = self.enter.iter().sum();
        let enter_log: f64 = self.enter.iter().map(|&q| plogp(q)).sum();
        let exit_log: f64 = self.exit.iter().map(|&q| plogp(q)).sum();
        let total_log: f64 = self.exit.iter().zip(&self.flow).map(|(&q, &p)| plogp(q + p)).sum();
        plogp(enter_sum) - enter_log - exit_log - self.node_entropy + total_log
    }

    /// Local moving over the nodes of one level; returns whether anything moved
    fn local_moving(&mut self, level: &Level, max_sweeps: usize) -> bool {
        let mut moved_any = false;
        let mut enter_sum: f64 = self.enter.iter().sum();

        for _ in 0..max_sweeps {
            let mut moved = false;
            for node in 0..level.len() {
                let current = self.assignment[node];

                let mut to_module: FxHashMap<usize, f64> = FxHashMap::default();
                let mut from_module: FxHashMap<usize, f64> = FxHashMap::default();
                for &(t, f) in &level.out_links[node] {
                    *to_module.entry(self.assignment[t]).or_insert(0.0) += f;
                }
                for &(s, f) in &level.in_links[node] {
                    *from_module.entry(self.assignment[s]).or_insert(0.0) += f;
                }
                let link = |m: usize| {
                    to_module.get(&m).copied().unwrap_or(0.0)
                        + from_module.get(&m).copied().unwrap_or(0.0)
                };

                let p = level.node_flow[node];
                let (out_f, in_f) = (level.out_flow[node], level.in_flow[node]);

                let old_exit = self.exit[current] - out_f + link(current);
                let old_enter = self.enter[current] - in_f + link(current);
                let old_flow = self.flow[current] - p;

                let delta_old_enter_sum = old_enter - self.enter[current];
                let delta_old_enter_log = plogp(old_enter) - plogp(self.enter[current]);
                let delta_old_exit_log = plogp(old_exit) - plogp(self.exit[current]);
                let delta_old_total_log =
                    plogp(old_exit + old_flow) - plogp(self.exit[current] + self.flow[current]);

                let mut candidates: Vec<usize> = to_module
                    .keys()
                    .chain(from_module.keys())
                    .copied()
                    .filter(|&m| m != current)
                    .collect();
                candidates.sort_unstable();
                candidates.dedup();

                let mut best: Option<(usize, f64, f64, f64)> = None;
                let mut best_delta = -MIN_IMPROVEMENT;
                for m in candidates {
                    let new_exit = self.exit[m] + out_f - link(m);
                    let new_enter = self.enter[m] + in_f - link(m);
                    let new_flow = self.flow[m] + p;

                    let d_enter_sum = delta_old_enter_sum + new_enter - self.enter[m];
                    let d_enter_log = delta_old_enter_log + plogp(new_enter) - plogp(self.enter[m]);
                    let d_exit_log = delta_old_exit_log + plogp(new_exit) - plogp(self.exit[m]);
                    let d_total_log = delta_old_total_log + plogp(new_exit + new_flow)
                        - plogp(self.exit[m] + self.flow[m]);

                    let delta = plogp(enter_sum + d_enter_sum) - plogp(enter_sum) - d_enter_log
                        - d_exit_log
                        + d_total_log;
                    if delta < best_delta {
                        best_delta = delta;
                        best = Some((m, new_exit, new_enter, new_flow));
                    }
                }

                if let Some((m, new_exit, new_enter, new_flow)) = best {
                    enter_sum += (old_enter - self.enter[current]) + (new_enter - self.enter[m]);
                    self.exit[current] = old_exit;
                    self.enter[current] = old_enter;
                    self.flow[current] = old_flow;
                    self.exit[m] = new_exit;
                    self.enter[m] = new_enter;
                    self.flow[m] = new_flow;
                    self.assignment[node] = m;
                    moved = true;
                }
            }
            if !moved {
                break;
            }
            moved_any = true;
        }
        moved_any
    }
}

/// Renumber labels densely in order of first appearance
fn dense_labels(labels: &[usize]) -> (Vec<usize>, usize) {
    let mut ids: FxHashMap<usize, usize> = FxHashMap::default();
    let dense = labels
        .iter()
        .map(|&l| {
            let next = ids.len();
            *ids.entry(l).or_insert(next)
        })
        .collect();
    (dense, ids.len())
}

impl Infomap {
    /// Module of every node of a flow network and the resulting code length
    pub(crate) fn partition_network(&self, network: &FlowNetwork) -> (Vec<usize>, f64) {
        let node_entropy: f64 = network.node_flow.iter().map(|&p| plogp(p)).sum();
        let mut membership: Vec<usize> = (0..network.node_flow.len()).collect();
        let mut level = Level::new(network.node_flow.clone(), &network.links);
        let mut links = network.links.clone();

        let codelength = loop {
            let mut modules = Modules::singletons(&level, node_entropy);
            let moved = modules.local_moving(&level, self.max_sweeps);
            let (dense, count) = dense_labels(&modules.assignment);
            if !moved || count == level.len() {
                break modules.codelength();
            }

            for m in &mut membership {
                *m = dense[*m];
            }

            let mut flow = vec![0.0; count];
            for (node, &module) in dense.iter().enumerate() {
                flow[module] += level.node_flow[node];
            }
            let mut merged: FxHashMap<(usize, usize), f64> = FxHashMap::default();
            for &(s, t, f) in &links {
                *merged.entry((dense[s], dense[t])).or_insert(0.0) += f;
            }
            let mut next: Vec<_> = merged.into_iter().map(|((s, t), f)| (s, t, f)).collect();
            next.sort_by(|a, b| (a.0, a.1).cmp(&(b.0, b.1)));

            trace!("Aggregated {} nodes into {count} modules", level.len());
            level = Level::new(flow, &next);
            links = next;
        };

        let (membership, _) = dense_labels(&membership);
        (membership, codelength)
    }
}

impl CommunityDetector for Infomap {
    fn name(&self) -> &'static str {
        "infomap"
    }

    fn detect(&self, graph: &FlowGraph) -> Result<Partition> {
        let network = FlowNetwork::from_graph(graph, self);
        let (membership, codelength) = self.partition_network(&network);
        let assignments = graph.nodes().cloned().zip(membership).collect();
        Ok(Partition::new(assignments, Some(codelength)))
    }
}
