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
//! Heuristics to pick egresses, monitored paths and synthetic workloads.
use std::collections::{HashSet, VecDeque};

use itertools::Itertools;
use rand::seq::{IteratorRandom, SliceRandom};
use rand::Rng;
use rand_distr::{Distribution, Normal};
use serde::{Deserialize, Serialize};

use crate::requirements::Query;
use crate::topology::NetGraph;
use crate::{NodeId, NodePath};

/// Parameters for the egress selection heuristics.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct EgressParams {
    /// Out-degree up to which a router counts as a stub.
    pub degree: usize,
    /// Fraction of the routers to select as egresses.
    pub fraction: f64,
}

impl Default for EgressParams {
    fn default() -> Self {
        Self {
            degree: 2,
            fraction: 0.25,
        }
    }
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
/// Heuristics to pick the egress routers of a graph.
pub enum EgressSelection {
    /// Prefer stub routers with an out-degree of at most `params.degree`.
    #[serde(rename = "low-degree")]
    #[strum(serialize = "low-degree")]
    LowDegree,
    /// Sample a uniform fraction of all routers.
    #[serde(rename = "random")]
    #[strum(serialize = "random")]
    Random,
}

impl EgressSelection {
    /// Select and register the egresses of `g`.
    pub fn register(&self, g: &mut NetGraph, params: &EgressParams, rng: &mut impl Rng) {
        let selected = self.select(g, params, rng);
        log::info!(
            "Registering egresses: {:?}",
            selected.iter().map(|n| g.router_name(*n)).collect_vec()
        );
        for router in selected {
            g.register_egress(router);
        }
    }

    /// Select the egress routers of `g` without registering them.
    ///
    /// Aims for `params.fraction` of the routers, with a floor of two so
    /// that path selection gets at least one egress pair. Graphs with
    /// fewer than two routers yield every router.
    pub fn select(&self, g: &NetGraph, params: &EgressParams, rng: &mut impl Rng) -> Vec<NodeId> {
        let wanted = ((g.node_count() as f64) * params.fraction).round() as usize;
        let wanted = wanted.max(2).min(g.node_count());
        match self {
            Self::LowDegree => {
                let candidates = g
                    .nodes()
                    .filter(|n| g.out_degree(*n) <= params.degree)
                    .collect_vec();
                if candidates.len() > wanted {
                    candidates.choose_multiple(rng, wanted).copied().collect()
                } else {
                    candidates
                }
            }
            Self::Random => g.nodes().choose_multiple(rng, wanted),
        }
    }
}

/// Parameters for the path selection heuristics.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct PathParams {
    /// Upper bound on the number of nodes per path or region.
    pub max_len: usize,
    /// Slack over the shortest-path length for perturbed paths.
    pub perturb: f64,
    /// Number of regions or islands to grow.
    pub region_count: usize,
    /// Upper bound on the number of paths per egress pair.
    pub max_paths: usize,
}

impl Default for PathParams {
    fn default() -> Self {
        Self {
            max_len: 20,
            perturb: 0.2,
            region_count: 10,
            max_paths: 50,
        }
    }
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
/// Heuristics to pick the paths (or regions) to monitor.
pub enum PathSelection {
    /// The forwarding path between every egress pair.
    #[serde(rename = "spt")]
    #[strum(serialize = "spt")]
    Spt,
    /// Simple paths slightly longer than the forwarding path.
    #[serde(rename = "perturb")]
    #[strum(serialize = "perturb")]
    Perturb,
    /// Arbitrary simple paths between every egress pair.
    #[serde(rename = "random")]
    #[strum(serialize = "random")]
    Random,
    /// Forwarding paths grown into surrounding regions.
    #[serde(rename = "region")]
    #[strum(serialize = "region")]
    Region,
    /// Connected node sets grown from random seeds, ignoring egresses.
    #[serde(rename = "island")]
    #[strum(serialize = "island")]
    Island,
}

impl PathSelection {
    /// Select the node sequences to monitor on `g`.
    ///
    /// All variants except [`PathSelection::Island`] connect pairs of
    /// registered egresses and return nothing if fewer than two egresses
    /// are known. Sequences with fewer than three nodes or more than
    /// `params.max_len` nodes are dropped.
    pub fn paths(&self, g: &NetGraph, params: &PathParams, rng: &mut impl Rng) -> Vec<NodePath> {
        let mut paths = if matches!(self, Self::Island) {
            (0..params.region_count)
                .map(|_| grow_island(g, params, rng))
                .collect_vec()
        } else {
            let egresses = g.egresses();
            if egresses.len() < 2 {
                log::warn!(
                    "Found {} egresses on {}, but path selection needs at least two",
                    egresses.len(),
                    g.name()
                );
                return Vec::new();
            }
            egresses
                .iter()
                .combinations(2)
                .flat_map(|pair| self.between(g, *pair[0], *pair[1], params, rng))
                .collect_vec()
        };
        paths.retain(|p| p.len() > 2 && p.len() <= params.max_len);
        log::debug!("Selected {} paths on {} with {}", paths.len(), g.name(), self);
        paths
    }

    fn between(
        &self,
        g: &NetGraph,
        a: NodeId,
        b: NodeId,
        params: &PathParams,
        rng: &mut impl Rng,
    ) -> Vec<NodePath> {
        match self {
            Self::Spt => g.spt_path(a, b).cloned().into_iter().collect(),
            Self::Perturb => {
                let Some(spt) = g.spt_path(a, b) else {
                    return Vec::new();
                };
                let target = ((spt.len() as f64) * (1.0 + params.perturb)).round() as usize;
                if target > params.max_len {
                    return Vec::new();
                }
                g.simple_paths(a, b, target).take(params.max_paths).collect()
            }
            Self::Random => g
                .simple_paths(a, b, params.max_len)
                .take(params.max_paths)
                .collect(),
            Self::Region => (0..params.region_count)
                .map(|_| grow_region(g, a, b, params, rng))
                .collect(),
            Self::Island => unreachable!("islands are grown without egress pairs"),
        }
    }
}

/// Grow the forwarding path between `a` and `b` into a surrounding region
/// by repeatedly absorbing a random frontier node.
fn grow_region(
    g: &NetGraph,
    a: NodeId,
    b: NodeId,
    params: &PathParams,
    rng: &mut impl Rng,
) -> NodePath {
    let mut region = g.spt_path(a, b).cloned().unwrap_or_else(|| vec![a, b]);
    let mut seen: HashSet<NodeId> = region.iter().copied().collect();
    while region.len() < params.max_len {
        let frontier = region
            .iter()
            .flat_map(|n| g.neighbors(*n))
            .filter(|n| !seen.contains(n))
            .collect_vec();
        let Some(next) = frontier.choose(rng) else {
            break;
        };
        seen.insert(*next);
        region.push(*next);
    }
    region
}

/// Grow a connected island from a random seed router, breadth first.
fn grow_island(g: &NetGraph, params: &PathParams, rng: &mut impl Rng) -> NodePath {
    let Some(seed) = g.nodes().choose(rng) else {
        return Vec::new();
    };
    let mut island = vec![seed];
    let mut seen: HashSet<NodeId> = island.iter().copied().collect();
    let mut queue = VecDeque::from([seed]);
    while let Some(cur) = queue.pop_front() {
        let mut next = g.neighbors(cur).filter(|n| !seen.contains(n)).collect_vec();
        next.shuffle(rng);
        for n in next {
            if island.len() >= params.max_len {
                return island;
            }
            seen.insert(n);
            island.push(n);
            queue.push_back(n);
        }
    }
    island
}

/// Generate a synthetic workload of `active` demands with normally
/// distributed costs, followed by `passive` zero-cost demands.
pub fn generate_queries(
    active: usize,
    passive: usize,
    avg_cost: f64,
    stdev_cost: f64,
    rng: &mut impl Rng,
) -> Vec<Query> {
    let normal = Normal::new(avg_cost, stdev_cost.max(0.0))
        .expect("standard deviation is non-negative");
    let mut queries = Vec::with_capacity(active + passive);
    for i in 0..active {
        queries.push(Query::demand(i, normal.sample(rng).max(0.001)));
    }
    for i in active..active + passive {
        queries.push(Query::demand(i, 0.0));
    }
    log::debug!(
        "Built {} queries ({} active, {} passive)",
        queries.len(),
        active,
        passive
    );
    queries
}
