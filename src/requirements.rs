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
//! Monitoring queries, their measurement demands and the budget they share.
use std::fmt;
use std::hash::{Hash, Hasher};
use std::time::Duration;

use itertools::Itertools;
use serde::{Deserialize, Serialize};

use crate::key_points::find_key_points;
use crate::topology::NetGraph;
use crate::{NodeId, NodePath, Prefix};

/// What a path-bound query asks the network to do with matching traffic.
#[derive(Debug, Clone, PartialEq)]
pub enum Intent {
    /// Mirror matching packets at every vantage point along the path.
    Mirror {
        /// Destination prefix selecting the monitored flows.
        prefix: Prefix,
        /// Vantage points with their hop distance from the path source.
        locations: Vec<(NodeId, usize)>,
    },
    /// Confine matching traffic to a region of the network.
    Confine {
        /// Destination prefix selecting the monitored flows.
        prefix: Prefix,
        /// Region the traffic must not leave.
        region: NodePath,
    },
}

/// A single monitoring query with its per-slot measurement cost.
#[derive(Debug, Clone)]
pub struct Query {
    /// Unique index, also the identity for equality and hashing.
    pub index: usize,
    /// Measurement cost in budget units; passive queries cost nothing.
    pub cost: f64,
    /// Relative importance when spare budget is balanced between queries.
    pub weight: u32,
    /// Path-bound intent, if any.
    pub intent: Option<Intent>,
}

impl Query {
    /// New demand-only query without a path intent.
    pub fn demand(index: usize, cost: f64) -> Self {
        Self {
            index,
            cost,
            weight: 1,
            intent: None,
        }
    }

    /// Mirror query with explicit vantage locations.
    pub fn mirror(index: usize, cost: f64, prefix: Prefix, locations: Vec<(NodeId, usize)>) -> Self {
        Self {
            index,
            cost,
            weight: 1,
            intent: Some(Intent::Mirror { prefix, locations }),
        }
    }

    /// Mirror query monitored at the key points of `path`.
    ///
    /// The hop distances are the node positions along `path`, so the
    /// analyzer can compare TTL decreases against the expected distance
    /// between two vantage points.
    pub fn mirror_on_path(
        index: usize,
        cost: f64,
        prefix: Prefix,
        g: &NetGraph,
        path: &[NodeId],
    ) -> Self {
        let locations = find_key_points(g, path)
            .into_iter()
            .filter_map(|p| path.iter().position(|n| *n == p).map(|d| (p, d)))
            .collect();
        Self::mirror(index, cost, prefix, locations)
    }

    /// Confinement query over `region`.
    pub fn confine(index: usize, cost: f64, prefix: Prefix, region: NodePath) -> Self {
        Self {
            index,
            cost,
            weight: 1,
            intent: Some(Intent::Confine { prefix, region }),
        }
    }

    /// Source and sink of the monitored path, absent for confinement and
    /// demand-only queries.
    pub fn path_endpoints(&self) -> Option<(NodeId, NodeId)> {
        match &self.intent {
            Some(Intent::Mirror { locations, .. }) if locations.len() >= 2 => {
                Some((locations[0].0, locations[locations.len() - 1].0))
            }
            _ => None,
        }
    }

    /// Vantage points with hop distances, for mirror queries.
    pub fn locations(&self) -> Option<&[(NodeId, usize)]> {
        match &self.intent {
            Some(Intent::Mirror { locations, .. }) => Some(locations),
            _ => None,
        }
    }

    /// Destination prefix matched by the query, if path-bound.
    pub fn prefix(&self) -> Option<Prefix> {
        match &self.intent {
            Some(Intent::Mirror { prefix, .. }) | Some(Intent::Confine { prefix, .. }) => {
                Some(*prefix)
            }
            None => None,
        }
    }

    /// The nodes the query observes: mirror vantages or the confined region.
    pub fn subregions(&self) -> Vec<NodeId> {
        match &self.intent {
            Some(Intent::Mirror { locations, .. }) => {
                locations.iter().map(|(n, _)| *n).collect_vec()
            }
            Some(Intent::Confine { region, .. }) => region.clone(),
            None => Vec::new(),
        }
    }

    /// Requirement line in the surface syntax, rendered with router names.
    pub fn requirement(&self, g: &NetGraph) -> Option<String> {
        let (verb, prefix, nodes) = match &self.intent {
            Some(Intent::Mirror { prefix, locations }) => (
                "MIRROR",
                prefix,
                locations.iter().map(|(n, _)| *n).collect_vec(),
            ),
            Some(Intent::Confine { prefix, region }) => ("CONFINE", prefix, region.clone()),
            None => return None,
        };
        let names = nodes.iter().map(|n| g.router_name(*n)).join(" ");
        Some(format!("{verb} {prefix} ON [{names}]"))
    }
}

impl PartialEq for Query {
    fn eq(&self, other: &Self) -> bool {
        self.index == other.index
    }
}

impl Eq for Query {}

impl Hash for Query {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.index.hash(state);
    }
}

impl fmt::Display for Query {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Q{}", self.index)
    }
}

/// Render the full requirement block handed to the deployment: one line per
/// path-bound query followed by the budget clause.
pub fn render_requirements(
    queries: &[Query],
    g: &NetGraph,
    using: u64,
    duration_ms: u64,
) -> String {
    let mut lines = queries.iter().filter_map(|q| q.requirement(g)).collect_vec();
    lines.push(format!("USING {using} M DURING {duration_ms}ms"));
    lines.join("\n")
}

/// Measurement budget constraining a schedule.
///
/// `using` is the per-slot mirroring capacity and `max_slots` the number of
/// slots a schedule may cycle through. The exact solver stops once it is
/// within `mip_gap` of the packing lower bound, or after `max_solve_time`.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct Budget {
    pub mip_gap: f64,
    pub max_slots: usize,
    pub using: f64,
    pub max_solve_time: Duration,
}

impl Budget {
    pub fn new(mip_gap: f64, max_solve_time: Duration) -> Self {
        Self {
            mip_gap,
            max_slots: 150,
            using: 0.0,
            max_solve_time,
        }
    }

    /// Sets the number of slots the schedule cycles through.
    pub fn max_slots(mut self, max_slots: usize) -> Self {
        self.max_slots = max_slots;
        self
    }

    /// Sets the per-slot budget in measurement units.
    pub fn using(mut self, using: f64) -> Self {
        self.using = using;
        self
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::topology::Topology;
    use std::collections::HashSet;

    #[test]
    fn query_identity_ignores_the_cost() {
        let a = Query::demand(3, 10.0);
        let b = Query::demand(3, 99.0);
        assert_eq!(a, b);
        let mut set = HashSet::new();
        set.insert(a);
        set.insert(b);
        assert_eq!(set.len(), 1);
        assert_eq!(Query::demand(3, 1.0).to_string(), "Q3");
    }

    #[test]
    fn endpoints_of_a_mirror_query() {
        let g = Topology::Path(5).build_graph().unwrap();
        let src = g.router_id("r0").unwrap();
        let dst = g.router_id("r4").unwrap();
        let path = g.spt_path(src, dst).unwrap().clone();
        let prefix: Prefix = "10.0.3.0/24".parse().unwrap();

        let q = Query::mirror_on_path(0, 100.0, prefix, &g, &path);
        assert_eq!(q.path_endpoints(), Some((src, dst)));
        assert!(Query::demand(1, 50.0).path_endpoints().is_none());
        assert!(Query::confine(2, 50.0, prefix, path).path_endpoints().is_none());
    }

    #[test]
    fn key_point_locations_carry_path_distances() {
        let g = Topology::Path(6).build_graph().unwrap();
        let src = g.router_id("r0").unwrap();
        let dst = g.router_id("r5").unwrap();
        let path = g.spt_path(src, dst).unwrap().clone();
        let prefix: Prefix = "10.0.3.0/24".parse().unwrap();

        let q = Query::mirror_on_path(0, 100.0, prefix, &g, &path);
        let locations = q.locations().unwrap();
        assert_eq!(
            locations,
            &[(path[0], 0), (path[2], 2), (path[4], 4), (path[5], 5)]
        );
    }

    #[test]
    fn requirement_rendering() {
        let g = Topology::Path(4).build_graph().unwrap();
        let src = g.router_id("r0").unwrap();
        let dst = g.router_id("r3").unwrap();
        let path = g.spt_path(src, dst).unwrap().clone();
        let prefix: Prefix = "10.0.3.0/24".parse().unwrap();

        let mirror = Query::mirror_on_path(0, 100.0, prefix, &g, &path);
        assert_eq!(
            mirror.requirement(&g).unwrap(),
            "MIRROR 10.0.3.0/24 ON [r0 r2 r3]"
        );
        let confine = Query::confine(1, 0.0, prefix, path);
        assert_eq!(
            confine.requirement(&g).unwrap(),
            "CONFINE 10.0.3.0/24 ON [r0 r1 r2 r3]"
        );
        assert!(Query::demand(2, 10.0).requirement(&g).is_none());

        let block = render_requirements(&[mirror, confine], &g, 10, 500);
        assert_eq!(
            block,
            "MIRROR 10.0.3.0/24 ON [r0 r2 r3]\n\
             CONFINE 10.0.3.0/24 ON [r0 r1 r2 r3]\n\
             USING 10 M DURING 500ms"
        );
    }

    #[test]
    fn budget_round_trips_through_json() {
        let budget = Budget::new(0.05, Duration::from_secs(30))
            .max_slots(150)
            .using(200.0);
        let json = serde_json::to_string(&budget).unwrap();
        let back: Budget = serde_json::from_str(&json).unwrap();
        assert_eq!(budget, back);
    }
}
