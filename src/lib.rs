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
//! Library for placing, scheduling and correlating traffic mirroring queries under a measurement budget.

/// Selected IPv4 prefix type for this crate
pub type Prefix = ipnet::Ipv4Net;

/// Handle of a router inside a [`topology::NetGraph`]
pub type NodeId = petgraph::graph::NodeIndex;

/// A forwarding path, given as the ordered list of traversed routers
pub type NodePath = Vec<NodeId>;

pub mod analyzer;
pub mod confinement;
pub mod heuristics;
pub mod key_points;
pub mod records;
pub mod requirements;
pub mod schedule;
pub mod topology;
pub mod util;

pub mod prelude {
    pub use super::{
        analyzer::{Analyzer, CaptureSet, PacketKey, PacketRecord, QueryStatistics, TrafficSlice},
        confinement::{ConfinementStrategy, RuleLocation},
        heuristics::{EgressSelection, PathSelection},
        key_points::find_key_points,
        requirements::{Budget, Intent, Query},
        schedule::{balance_and_schedule, schedule, Schedule, ScheduleError, ScheduleStrategy},
        topology::{NetGraph, Topology},
        NodeId, NodePath, Prefix,
    };
}
