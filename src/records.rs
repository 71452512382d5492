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
//! Module defining record data types to (de-)serialize benchmark results to CSV.
use std::fs::OpenOptions;
use std::path::Path;

use serde::{de::DeserializeOwned, Deserialize, Serialize};

use crate::confinement::{ConfinementStrategy, RuleLocation};
use crate::requirements::{Budget, Query};
use crate::schedule::{Schedule, ScheduleError, ScheduleStrategy};
use crate::topology::NetGraph;
use crate::util::mean_stdev;
use crate::NodeId;

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
/// One confinement run: how many mirroring rules replaced the naive
/// rule-per-link deployment.
pub struct ConfinementRecord {
    pub topology: String,
    pub strategy: ConfinementStrategy,
    pub path_len: usize,
    pub edge_count: usize,
    pub rules: usize,
    pub reduction_pc: f64,
    /// Wall time of the confinement call, in seconds.
    pub run_time: f64,
}

impl ConfinementRecord {
    pub fn collect(
        g: &NetGraph,
        strategy: ConfinementStrategy,
        path: &[NodeId],
        rules: &[RuleLocation],
        run_time: f64,
    ) -> Self {
        let edge_count = path.len().saturating_sub(1);
        Self {
            topology: g.name().to_string(),
            strategy,
            path_len: path.len(),
            edge_count,
            rules: rules.len(),
            reduction_pc: reduction_pc(rules.len(), edge_count),
            run_time,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
/// One key-point selection run: how many mirroring locations replaced the
/// naive location-per-node deployment.
pub struct KeyPointRecord {
    pub topology: String,
    pub path_len: usize,
    pub key_points: usize,
    pub reduction_pc: f64,
    /// Wall time of the selection call, in seconds.
    pub run_time: f64,
}

impl KeyPointRecord {
    pub fn collect(g: &NetGraph, path: &[NodeId], key_points: &[NodeId], run_time: f64) -> Self {
        Self {
            topology: g.name().to_string(),
            path_len: path.len(),
            key_points: key_points.len(),
            reduction_pc: reduction_pc(key_points.len(), path.len()),
            run_time,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
/// One scheduling run, including the allocation balance across queries.
pub struct ScheduleRecord {
    pub topology: String,
    pub strategy: ScheduleStrategy,
    pub num_queries: usize,
    pub total_cost: f64,
    pub using: f64,
    pub max_slots: usize,
    pub slots: usize,
    pub min_alloc_count: usize,
    pub slots_avg: f64,
    pub slots_stdev: f64,
    pub total_alloc: usize,
    /// Wall time of the scheduling call, in seconds.
    pub run_time: f64,
    /// `solved`, `infeasible`, `timeout` or `invalid`.
    pub outcome: String,
}

impl ScheduleRecord {
    pub fn collect(
        topology: impl Into<String>,
        schedule: &Schedule,
        queries: &[Query],
        budget: &Budget,
        strategy: ScheduleStrategy,
        run_time: f64,
    ) -> Self {
        let counts = schedule
            .allocation_counts()
            .into_values()
            .map(|c| c as f64)
            .collect::<Vec<_>>();
        let (slots_avg, slots_stdev) = mean_stdev(&counts).unwrap_or((0.0, 0.0));
        Self {
            topology: topology.into(),
            strategy,
            num_queries: queries.len(),
            total_cost: queries.iter().map(|q| q.cost).sum(),
            using: budget.using,
            max_slots: budget.max_slots,
            slots: schedule.len(),
            min_alloc_count: schedule.min_allocation_count(),
            slots_avg,
            slots_stdev,
            total_alloc: schedule.total_allocations(),
            run_time,
            outcome: "solved".to_string(),
        }
    }

    /// Record a scheduling attempt that produced no schedule.
    pub fn failed(
        topology: impl Into<String>,
        queries: &[Query],
        budget: &Budget,
        strategy: ScheduleStrategy,
        run_time: f64,
        error: &ScheduleError,
    ) -> Self {
        let outcome = match error {
            ScheduleError::Infeasible { .. } => "infeasible",
            ScheduleError::Timeout(_) => "timeout",
            ScheduleError::InvalidBudget(_) => "invalid",
        };
        Self {
            topology: topology.into(),
            strategy,
            num_queries: queries.len(),
            total_cost: queries.iter().map(|q| q.cost).sum(),
            using: budget.using,
            max_slots: budget.max_slots,
            slots: 0,
            min_alloc_count: 0,
            slots_avg: 0.0,
            slots_stdev: 0.0,
            total_alloc: 0,
            run_time,
            outcome: outcome.to_string(),
        }
    }
}

/// Reduction over the naive baseline, in percent. 0 when the baseline is
/// empty.
pub fn reduction_pc(output: usize, baseline: usize) -> f64 {
    if baseline == 0 {
        0.0
    } else {
        100.0 * (1.0 - output as f64 / baseline as f64)
    }
}

/// Append `records` to the CSV file at `path`, writing the header only
/// when the file is created.
pub fn write_records<T: Serialize>(
    path: impl AsRef<Path>,
    records: &[T],
) -> Result<(), csv::Error> {
    let new = !path.as_ref().exists();
    let file = OpenOptions::new().create(true).append(true).open(path)?;
    let mut writer = csv::WriterBuilder::new()
        .has_headers(new)
        .from_writer(file);
    for record in records {
        writer.serialize(record)?;
    }
    writer.flush()?;
    Ok(())
}

/// Read all records of a CSV file written by [`write_records`].
pub fn read_records<T: DeserializeOwned>(path: impl AsRef<Path>) -> Result<Vec<T>, csv::Error> {
    let mut reader = csv::Reader::from_path(path)?;
    reader.deserialize().collect()
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::key_points::find_key_points;
    use crate::schedule::balance_and_schedule;
    use crate::topology::Topology;
    use std::time::Duration;

    #[test]
    fn serialize_confinement_record() {
        let x = ConfinementRecord {
            topology: "Path_5".to_string(),
            strategy: ConfinementStrategy::EdgeExact,
            path_len: 5,
            edge_count: 4,
            rules: 2,
            reduction_pc: 50.0,
            run_time: 0.5,
        };

        let mut csv = csv::WriterBuilder::new().has_headers(true).from_writer(vec![]);
        csv.serialize(&x).unwrap();
        csv.flush().unwrap();
        let ser = String::from_utf8(csv.into_inner().unwrap()).unwrap();
        assert_eq!(
            ser,
            "topology,strategy,path_len,edge_count,rules,reduction_pc,run_time\nPath_5,edge-exact,5,4,2,50.0,0.5\n"
                .to_string()
        );

        let mut csv = csv::ReaderBuilder::new().from_reader(ser.as_bytes());
        let de: ConfinementRecord = csv.deserialize().next().unwrap().unwrap();
        assert_eq!(de, x);
    }

    #[test]
    fn schedule_record_from_a_schedule() {
        let queries = vec![Query::demand(0, 60.0), Query::demand(1, 60.0)];
        let budget = Budget::new(0.0, Duration::from_secs(5))
            .max_slots(3)
            .using(200.0);
        let schedule =
            balance_and_schedule(&queries, &budget, ScheduleStrategy::ApproxGreedy).unwrap();

        let record =
            ScheduleRecord::collect("Path_5", &schedule, &queries, &budget, ScheduleStrategy::ApproxGreedy, 0.1);
        assert_eq!(record.num_queries, 2);
        assert_eq!(record.total_cost, 120.0);
        assert_eq!(record.slots, 3);
        assert_eq!(record.min_alloc_count, 3);
        assert_eq!(record.total_alloc, 6);
        assert_eq!(record.slots_avg, 3.0);
        assert_eq!(record.slots_stdev, 0.0);
        assert_eq!(record.outcome, "solved");
    }

    #[test]
    fn failed_records_carry_the_outcome() {
        let queries = vec![Query::demand(0, 500.0)];
        let budget = Budget::new(0.0, Duration::from_secs(5)).using(200.0);
        let error = ScheduleError::Infeasible {
            queries: 1,
            total_cost: 500.0,
            max_slots: 150,
            using: 200.0,
        };
        let record = ScheduleRecord::failed(
            "Path_5",
            &queries,
            &budget,
            ScheduleStrategy::Exact,
            0.1,
            &error,
        );
        assert_eq!(record.outcome, "infeasible");
        assert_eq!(record.slots, 0);
        assert_eq!(record.total_alloc, 0);
    }

    #[test]
    fn confinement_record_from_a_run() {
        let g = Topology::Path(5).build_graph().unwrap();
        let r0 = g.router_id("r0").unwrap();
        let r4 = g.router_id("r4").unwrap();
        let path = g.spt_path(r0, r4).unwrap().clone();
        let rules = ConfinementStrategy::EdgeExact.confine(&g, &path);
        let record =
            ConfinementRecord::collect(&g, ConfinementStrategy::EdgeExact, &path, &rules, 0.2);
        assert_eq!(record.topology, "Path_5");
        assert_eq!(record.edge_count, 4);
        assert_eq!(record.rules, 2);
        assert_eq!(record.reduction_pc, 50.0);
    }

    #[test]
    fn keypoint_record_from_a_selection() {
        let g = Topology::Path(4).build_graph().unwrap();
        let r0 = g.router_id("r0").unwrap();
        let r3 = g.router_id("r3").unwrap();
        let path = g.spt_path(r0, r3).unwrap();
        let kp = find_key_points(&g, path);
        let record = KeyPointRecord::collect(&g, path, &kp, 0.1);
        assert_eq!(record.topology, "Path_4");
        assert_eq!(record.path_len, 4);
        assert_eq!(record.key_points, 3);
        assert_eq!(record.reduction_pc, 25.0);
    }

    #[test]
    fn reduction_percentage() {
        assert_eq!(reduction_pc(1, 4), 75.0);
        assert_eq!(reduction_pc(3, 3), 0.0);
        assert_eq!(reduction_pc(0, 5), 100.0);
        assert_eq!(reduction_pc(2, 0), 0.0);
    }

    #[test]
    fn records_append_to_csv_files() {
        let dir = std::env::temp_dir().join(format!("stroboscope-records-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("keypoints.csv");

        let record = |key_points: usize| KeyPointRecord {
            topology: "Path_5".to_string(),
            path_len: 5,
            key_points,
            reduction_pc: reduction_pc(key_points, 5),
            run_time: 0.1,
        };
        write_records(&path, &[record(2), record(3)]).unwrap();
        write_records(&path, &[record(4)]).unwrap();

        let read: Vec<KeyPointRecord> = read_records(&path).unwrap();
        let _ = std::fs::remove_dir_all(&dir);

        assert_eq!(read.len(), 3);
        assert_eq!(read[0], record(2));
        assert_eq!(read[2], record(4));
    }
}
