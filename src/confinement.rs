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
//! Computation of the rule locations that confine traffic to a monitored path.
use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::topology::NetGraph;
use crate::NodeId;

/// A single installation point for a confinement rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum RuleLocation {
    /// Rule matching all traffic crossing a router.
    Node(NodeId),
    /// Rule matching all traffic on a directed link.
    Edge(NodeId, NodeId),
}

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Deserialize,
    Serialize,
    strum::Display,
    strum::EnumIter,
    strum_macros::EnumString,
)]
/// Confinement algorithms, keyed by their stable record names.
pub enum ConfinementStrategy {
    #[serde(rename = "edge-exact")]
    #[strum(serialize = "edge-exact")]
    EdgeExact,
    #[serde(rename = "region-exact")]
    #[strum(serialize = "region-exact")]
    RegionExact,
    #[serde(rename = "relaxed")]
    #[strum(serialize = "relaxed")]
    Relaxed,
}

impl ConfinementStrategy {
    /// Compute the rule locations confining `path` on `g` with this strategy.
    pub fn confine(&self, g: &NetGraph, path: &[NodeId]) -> Vec<RuleLocation> {
        match self {
            ConfinementStrategy::EdgeExact => find_confinement_edges(g, path),
            ConfinementStrategy::RegionExact => find_confinement_region(g, path),
            ConfinementStrategy::Relaxed => find_confinement_relaxed(g, path),
        }
    }
}

/// Select a minimal set of path links such that every link of `path` shares
/// an endpoint with a selected link.
///
/// A selected link also covers its two neighbors on the path, so the greedy
/// sweep picks every third link and meets the `ceil(k / 3)` lower bound for
/// a path of `k` links. The earliest cover is chosen, which makes the result
/// deterministic.
pub fn find_confinement_edges(g: &NetGraph, path: &[NodeId]) -> Vec<RuleLocation> {
    debug_assert!(path.windows(2).all(|w| g.contains_edge(w[0], w[1])));
    if path.len() < 2 {
        return Vec::new();
    }
    let k = path.len() - 1;
    let mut rules = Vec::new();
    let mut uncovered = 0;
    while uncovered < k {
        let pick = if uncovered + 1 < k { uncovered + 1 } else { uncovered };
        rules.push(RuleLocation::Edge(path[pick], path[pick + 1]));
        uncovered = pick + 2;
    }
    rules
}

/// Smallest connected node region containing the whole of `path`.
///
/// Consecutive waypoints are stitched together along hop-minimal
/// connections, which keeps the region node count at its minimum. Nodes are
/// reported in first-visit order and both endpoints are always part of the
/// region. A single-node path yields that node, an empty path nothing.
pub fn find_confinement_region(g: &NetGraph, path: &[NodeId]) -> Vec<RuleLocation> {
    stitch_region(g, path, |a, b| g.fewest_hop_path(a, b))
}

/// Like [`find_confinement_region`], but stitches the waypoints along the
/// precomputed shortest-path trees instead of searching for hop-minimal
/// connections.
///
/// The lookup is constant-time per waypoint pair. IGP weights may route a
/// segment over additional nodes, so the region can only grow compared to
/// the exact one.
pub fn find_confinement_relaxed(g: &NetGraph, path: &[NodeId]) -> Vec<RuleLocation> {
    stitch_region(g, path, |a, b| g.spt_path(a, b).cloned())
}

fn stitch_region<F>(g: &NetGraph, path: &[NodeId], mut connect: F) -> Vec<RuleLocation>
where
    F: FnMut(NodeId, NodeId) -> Option<Vec<NodeId>>,
{
    let mut seen: HashSet<NodeId> = HashSet::new();
    let mut region: Vec<RuleLocation> = Vec::new();
    if let Some(first) = path.first() {
        seen.insert(*first);
        region.push(RuleLocation::Node(*first));
    }
    for w in path.windows(2) {
        let (a, b) = (w[0], w[1]);
        let segment = match connect(a, b) {
            Some(segment) => segment,
            None => {
                log::warn!(
                    "No connection from {} to {} on {}; the region stays disconnected",
                    g.router_name(a),
                    g.router_name(b),
                    g.name()
                );
                vec![a, b]
            }
        };
        for n in segment.into_iter().skip(1) {
            if seen.insert(n) {
                region.push(RuleLocation::Node(n));
            }
        }
    }
    region
}
