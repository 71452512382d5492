// STROBOSCOPE: Scheduling and Correlation of Fine-Grained Traffic Mirroring Queries
// Copyright (C) 2024-2025 The Stroboscope Developers
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program.  If not, see <http://www.gnu.org/licenses/>.
//! Network graph model with link weights, shortest-path trees and egress bookkeeping.
use std::cmp::Reverse;
use std::collections::{HashMap, HashSet, VecDeque};

use itertools::Itertools;
use ordered_float::NotNan;
use petgraph::algo::kosaraju_scc;
use petgraph::graph::DiGraph;
use petgraph::visit::EdgeRef;
use priority_queue::PriorityQueue;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{NodeId, NodePath};

#[derive(Debug, Error)]
pub enum TopologyError {
    #[error("The router {0} does not exist!")]
    UnknownRouter(String),
    #[error("Negative weight {1} on link {0}")]
    NegativeLinkWeight(String, f64),
    #[error("Weight on link {0} is not a number")]
    NanLinkWeight(String),
}

/// A directed network graph annotated with IGP link weights.
///
/// The graph is built once from a topology source, sanitized with
/// [`NetGraph::sanitize`], and then queried read-only by the placement
/// algorithms. Shortest paths between all router pairs are precomputed by
/// [`NetGraph::build_spt`].
#[derive(Debug, Clone, Default)]
pub struct NetGraph {
    name: String,
    graph: DiGraph<String, f64>,
    routers: HashMap<String, NodeId>,
    egresses: HashSet<NodeId>,
    spt: HashMap<(NodeId, NodeId), NodePath>,
    diameter: usize,
}

impl NetGraph {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Get the router with the given name, creating it if necessary.
    pub fn register_router(&mut self, name: impl AsRef<str>) -> NodeId {
        let name = name.as_ref();
        match self.routers.get(name) {
            Some(router) => *router,
            None => {
                let router = self.graph.add_node(name.to_string());
                self.routers.insert(name.to_string(), router);
                router
            }
        }
    }

    /// Register the link between `u` and `v` in both directions, creating the
    /// routers if necessary. Re-registering a link overwrites its weight.
    pub fn register_link(
        &mut self,
        u: impl AsRef<str>,
        v: impl AsRef<str>,
        weight: f64,
    ) -> Result<(NodeId, NodeId), TopologyError> {
        if weight.is_nan() {
            return Err(TopologyError::NanLinkWeight(format!(
                "{} -> {}",
                u.as_ref(),
                v.as_ref()
            )));
        }
        if weight < 0.0 {
            return Err(TopologyError::NegativeLinkWeight(
                format!("{} -> {}", u.as_ref(), v.as_ref()),
                weight,
            ));
        }
        let a = self.register_router(u);
        let b = self.register_router(v);
        self.graph.update_edge(a, b, weight);
        self.graph.update_edge(b, a, weight);
        Ok((a, b))
    }

    /// Resolve a router name registered on this graph.
    pub fn router_id(&self, name: impl AsRef<str>) -> Result<NodeId, TopologyError> {
        self.routers
            .get(name.as_ref())
            .copied()
            .ok_or_else(|| TopologyError::UnknownRouter(name.as_ref().to_string()))
    }

    pub fn router_name(&self, router: NodeId) -> &str {
        &self.graph[router]
    }

    pub fn nodes(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.graph.node_indices()
    }

    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    pub fn neighbors(&self, router: NodeId) -> impl Iterator<Item = NodeId> + '_ {
        self.graph.neighbors(router)
    }

    pub fn out_degree(&self, router: NodeId) -> usize {
        self.graph.edges(router).count()
    }

    pub fn contains_edge(&self, a: NodeId, b: NodeId) -> bool {
        self.graph.contains_edge(a, b)
    }

    /// Mark `router` as a traffic egress.
    pub fn register_egress(&mut self, router: NodeId) {
        self.egresses.insert(router);
    }

    pub fn is_egress(&self, router: NodeId) -> bool {
        self.egresses.contains(&router)
    }

    /// All registered egresses, sorted by node index.
    pub fn egresses(&self) -> Vec<NodeId> {
        self.egresses.iter().copied().sorted().collect_vec()
    }

    /// Strip self-loops and restrict the graph to its largest strongly
    /// connected component.
    ///
    /// Node indices are reassigned in the process, so any previously obtained
    /// `NodeId` is invalidated. Registered egresses and shortest-path trees
    /// are cleared as well.
    pub fn sanitize(&mut self) {
        log::debug!("Removing self loops");
        let mut self_loops = 0;
        self.graph.retain_edges(|g, e| match g.edge_endpoints(e) {
            Some((a, b)) if a == b => {
                self_loops += 1;
                false
            }
            _ => true,
        });

        log::debug!("Extracting the largest strongly connected component");
        let before = self.graph.node_count();
        let mut components = kosaraju_scc(&self.graph);
        components.sort_by_key(Vec::len);
        if let Some(largest) = components.pop() {
            let keep: HashSet<NodeId> = largest.into_iter().collect();
            self.graph.retain_nodes(|_, n| keep.contains(&n));
        }

        self.routers = self
            .graph
            .node_indices()
            .map(|n| (self.graph[n].clone(), n))
            .collect();
        self.egresses.clear();
        self.spt.clear();
        self.diameter = 0;
        log::debug!(
            "Sanitized {}: removed {} self loops, kept {} of {} routers",
            self.name,
            self_loops,
            self.graph.node_count(),
            before
        );
    }

    /// Compute the shortest path between every pair of routers, along with
    /// the hop diameter of the graph.
    ///
    /// Ties between equal-cost paths are broken towards the first discovered
    /// predecessor, which makes the trees deterministic for a fixed
    /// construction order.
    pub fn build_spt(&mut self) {
        self.spt.clear();
        let nodes = self.graph.node_indices().collect_vec();
        for src in nodes.iter().copied() {
            let (dist, prev) = self.shortest_distances(src);
            for dst in nodes.iter().copied() {
                if src == dst {
                    self.spt.insert((src, src), vec![src]);
                    continue;
                }
                if !dist.contains_key(&dst) {
                    continue;
                }
                let mut path = vec![dst];
                let mut cur = dst;
                while cur != src {
                    cur = prev[&cur];
                    path.push(cur);
                }
                path.reverse();
                self.spt.insert((src, dst), path);
            }
        }
        self.diameter = self.spt.values().map(Vec::len).max().unwrap_or(0);
        log::info!(
            "Built graph for {} ({} nodes, {} edges, diameter: {})",
            self.name,
            self.graph.node_count(),
            self.graph.edge_count(),
            self.diameter
        );
    }

    fn shortest_distances(
        &self,
        src: NodeId,
    ) -> (HashMap<NodeId, NotNan<f64>>, HashMap<NodeId, NodeId>) {
        let mut dist: HashMap<NodeId, NotNan<f64>> = HashMap::new();
        let mut prev: HashMap<NodeId, NodeId> = HashMap::new();
        let mut queue: PriorityQueue<NodeId, Reverse<NotNan<f64>>> = PriorityQueue::new();
        dist.insert(src, NotNan::default());
        queue.push(src, Reverse(NotNan::default()));

        while let Some((u, Reverse(d))) = queue.pop() {
            for edge in self.graph.edges(u) {
                let v = edge.target();
                let Ok(weight) = NotNan::new(*edge.weight()) else {
                    continue;
                };
                let candidate = d + weight;
                let improved = match dist.get(&v) {
                    Some(best) => candidate < *best,
                    None => true,
                };
                if improved {
                    dist.insert(v, candidate);
                    prev.insert(v, u);
                    queue.push(v, Reverse(candidate));
                }
            }
        }
        (dist, prev)
    }

    /// The precomputed shortest path from `src` to `dst`, if it exists and
    /// the trees have been built.
    pub fn spt_path(&self, src: NodeId, dst: NodeId) -> Option<&NodePath> {
        self.spt.get(&(src, dst))
    }

    /// Number of hops on the shortest path from `src` to `dst`.
    pub fn hop_distance(&self, src: NodeId, dst: NodeId) -> Option<usize> {
        self.spt_path(src, dst).map(|p| p.len() - 1)
    }

    /// Hop diameter of the graph, i.e. the node count of the longest shortest
    /// path. Zero until [`NetGraph::build_spt`] ran.
    pub fn diameter(&self) -> usize {
        self.diameter
    }

    /// Hop-minimal path from `src` to `dst`, ignoring link weights.
    pub fn fewest_hop_path(&self, src: NodeId, dst: NodeId) -> Option<NodePath> {
        if src == dst {
            return Some(vec![src]);
        }
        let mut prev: HashMap<NodeId, NodeId> = HashMap::new();
        let mut queue = VecDeque::from([src]);
        'search: while let Some(u) = queue.pop_front() {
            for v in self.graph.neighbors(u) {
                if v != src && !prev.contains_key(&v) {
                    prev.insert(v, u);
                    if v == dst {
                        break 'search;
                    }
                    queue.push_back(v);
                }
            }
        }
        let mut path = vec![dst];
        let mut cur = dst;
        while cur != src {
            cur = *prev.get(&cur)?;
            path.push(cur);
        }
        path.reverse();
        Some(path)
    }

    /// All simple paths from `src` to `dst` with at most `max_nodes` nodes.
    pub fn simple_paths(
        &self,
        src: NodeId,
        dst: NodeId,
        max_nodes: usize,
    ) -> impl Iterator<Item = NodePath> + '_ {
        let max_intermediate = max_nodes.saturating_sub(2);
        petgraph::algo::all_simple_paths::<NodePath, _>(
            &self.graph,
            src,
            dst,
            0,
            Some(max_intermediate),
        )
    }
}

/// Synthetic reference topologies used by the tests and benchmarks.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Topology {
    Path(usize),
    Star(usize),
    Grid(usize, usize),
}

impl Topology {
    /// print readable (and filename-compatible) string representation of the topology
    pub fn fmt(&self) -> String {
        match self {
            Self::Path(i) => format!("Path_{i}"),
            Self::Star(i) => format!("Star_{i}"),
            Self::Grid(rows, cols) => format!("Grid_{rows}_{cols}"),
        }
    }

    /// Build, sanitize and precompute the graph for this topology.
    pub fn build_graph(&self) -> Result<NetGraph, TopologyError> {
        let mut g = NetGraph::new(self.fmt());
        match self {
            Self::Path(k) => {
                let mut last = None;
                for i in 0..*k {
                    let name = format!("r{i}");
                    g.register_router(&name);

                    // connect to the last node
                    if let Some(neighbor) = last {
                        g.register_link(&name, neighbor, 1.0)?;
                    }
                    last = Some(name);
                }
            }
            Self::Star(k) => {
                g.register_router("center");
                for i in 0..k.saturating_sub(1) {
                    // connect to the center node
                    g.register_link(format!("r{i}"), "center", 1.0)?;
                }
            }
            Self::Grid(rows, cols) => {
                let mut last_row = vec![None; *cols];
                for i in 0..*rows {
                    let mut last = None;
                    for j in 0..*cols {
                        let name = format!("r_{i}_{j}");
                        g.register_router(&name);

                        // connect in the row
                        if let Some(neighbor) = last {
                            g.register_link(&name, neighbor, 1.0)?;
                        }
                        last = Some(name.clone());

                        // connect to the last row
                        if let Some(neighbor) = &last_row[j] {
                            g.register_link(&name, neighbor, 1.0)?;
                        }
                        last_row[j] = Some(name);
                    }
                }
            }
        }
        g.sanitize();
        g.build_spt();
        Ok(g)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn spt_on_a_path() {
        let g = Topology::Path(5).build_graph().unwrap();
        let a = g.router_id("r0").unwrap();
        let e = g.router_id("r4").unwrap();
        let p = g.spt_path(a, e).unwrap();
        assert_eq!(p.len(), 5);
        assert_eq!(p[0], a);
        assert_eq!(p[4], e);
        assert_eq!(g.hop_distance(a, e), Some(4));
        assert_eq!(g.diameter(), 5);
    }

    #[test]
    fn sanitize_keeps_the_largest_component() {
        let mut g = NetGraph::new("two_islands");
        g.register_link("A", "B", 1.0).unwrap();
        g.register_link("B", "C", 1.0).unwrap();
        g.register_link("C", "A", 1.0).unwrap();
        g.register_link("X", "Y", 1.0).unwrap();
        g.register_link("A", "A", 1.0).unwrap();
        g.sanitize();

        assert_eq!(g.node_count(), 3);
        assert!(g.router_id("X").is_err());
        let a = g.router_id("A").unwrap();
        assert!(!g.contains_edge(a, a));
    }

    #[test]
    fn weighted_shortest_path_takes_the_detour() {
        let mut g = NetGraph::new("detour");
        g.register_link("A", "B", 10.0).unwrap();
        g.register_link("A", "C", 1.0).unwrap();
        g.register_link("C", "B", 1.0).unwrap();
        g.build_spt();

        let (a, b, c) = (
            g.router_id("A").unwrap(),
            g.router_id("B").unwrap(),
            g.router_id("C").unwrap(),
        );
        assert_eq!(g.spt_path(a, b), Some(&vec![a, c, b]));
        assert_eq!(g.fewest_hop_path(a, b), Some(vec![a, b]));
    }

    #[test]
    fn grid_has_manhattan_distances() {
        let g = Topology::Grid(3, 3).build_graph().unwrap();
        let a = g.router_id("r_0_0").unwrap();
        let b = g.router_id("r_2_2").unwrap();
        assert_eq!(g.hop_distance(a, b), Some(4));
        assert_eq!(g.diameter(), 5);
    }

    #[test]
    fn simple_paths_respect_the_node_bound() {
        let g = Topology::Grid(3, 3).build_graph().unwrap();
        let a = g.router_id("r_0_0").unwrap();
        let b = g.router_id("r_2_2").unwrap();
        let paths = g.simple_paths(a, b, 5).collect_vec();
        assert_eq!(paths.len(), 6);
        for p in &paths {
            assert_eq!(p.len(), 5);
            assert_eq!(p[0], a);
            assert_eq!(p[4], b);
        }
    }

    #[test]
    fn star_links_every_leaf_to_the_center() {
        let g = Topology::Star(7).build_graph().unwrap();
        let center = g.router_id("center").unwrap();
        assert_eq!(g.node_count(), 7);
        assert_eq!(g.out_degree(center), 6);
        assert_eq!(g.diameter(), 3);
    }

    #[test]
    fn negative_weights_are_rejected() {
        let mut g = NetGraph::new("bad");
        let err = g.register_link("A", "B", -1.0).unwrap_err();
        assert!(matches!(err, TopologyError::NegativeLinkWeight(_, _)), "{err}");
    }

    #[test]
    fn nan_weights_are_rejected() {
        let mut g = NetGraph::new("bad");
        let err = g.register_link("A", "B", f64::NAN).unwrap_err();
        assert!(matches!(err, TopologyError::NanLinkWeight(_)), "{err}");
        assert_eq!(err.to_string(), "Weight on link A -> B is not a number");
    }
}
