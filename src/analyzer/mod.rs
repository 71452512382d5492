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
//! Module that correlates mirrored traffic captures across key points.
use std::collections::HashSet;
use std::path::Path;

use rayon::prelude::*;

use crate::requirements::{Intent, Query};
use crate::topology::NetGraph;

pub mod capture;
mod result;

pub use capture::{load_capture_dir, CaptureError, CaptureSet, PacketKey, PacketRecord, TrafficSlice};
pub use result::QueryStatistics;

/// Correlates the capture slices of one measurement with the mirroring
/// queries that produced them.
///
/// Every packet mirrored at the first key point of a query's path counts
/// as entered. Its copies at the later key points decide its fate: a
/// packet never seen at the last key point was lost, one seen there after
/// skipping an intermediate key point was load-balanced around it, and
/// one seen at every key point exited cleanly. TTL decreases are checked
/// against the hop distance between consecutive matches.
///
/// The load-balance count is a heuristic: a capture dropped at one key
/// point looks the same as a true detour around it.
pub struct Analyzer<'a> {
    graph: &'a NetGraph,
    slices: CaptureSet,
}

impl<'a> Analyzer<'a> {
    pub fn new(graph: &'a NetGraph, slices: CaptureSet) -> Self {
        Self { graph, slices }
    }

    /// Load all capture files in `dir` and build an analyzer over them.
    pub fn from_dir(graph: &'a NetGraph, dir: impl AsRef<Path>) -> Result<Self, CaptureError> {
        Ok(Self {
            graph,
            slices: load_capture_dir(graph, dir)?,
        })
    }

    /// Correlate all mirroring queries, in parallel.
    ///
    /// Queries without mirror locations (confinement and plain demands)
    /// yield no statistics.
    pub fn analyze(&self, queries: &[Query]) -> Vec<QueryStatistics> {
        let mut stats: Vec<_> = queries
            .par_iter()
            .filter_map(|q| self.process_query(q))
            .collect();
        stats.sort_by_key(|s| s.query);
        stats
    }

    /// Correlate the captures of a single mirroring query.
    pub fn process_query(&self, query: &Query) -> Option<QueryStatistics> {
        let Some(Intent::Mirror { prefix, locations }) = &query.intent else {
            return None;
        };
        if locations.len() < 2 {
            log::debug!("Skipping {query}: correlation needs at least two key points");
            return None;
        }
        let (entry, entry_dist) = locations[0];
        let Some(entry_slice) = self.slices.get(&entry) else {
            log::warn!(
                "No capture slice for {} (entry key point of {})",
                self.graph.router_name(entry),
                query
            );
            return None;
        };

        let mut stats = QueryStatistics::new(query.index);
        let mut seen = HashSet::new();
        for record in entry_slice.packets() {
            if !prefix.contains(&record.key.dst) || !seen.insert(record.key) {
                continue;
            }
            stats.entered += 1;

            // follow the packet along the remaining key points
            let mut prev = (record.ttl, entry_dist, entry);
            let mut matched = 0;
            let mut at_exit = false;
            let mut mismatch = false;
            for (i, (node, dist)) in locations.iter().enumerate().skip(1) {
                let Some(copy) = self.slices.get(node).and_then(|s| s.get(&record.key)) else {
                    continue;
                };
                let expected = *dist as i64 - prev.1 as i64;
                let actual = i64::from(prev.0) - i64::from(copy.ttl);
                if expected != actual {
                    log::warn!(
                        "TTL mismatch for {}: dropped by {} between {} and {} ({} hops apart)",
                        query,
                        actual,
                        self.graph.router_name(prev.2),
                        self.graph.router_name(*node),
                        expected,
                    );
                    mismatch = true;
                }
                prev = (copy.ttl, *dist, *node);
                matched += 1;
                if i + 1 == locations.len() {
                    at_exit = true;
                }
            }

            if !at_exit {
                stats.lost += 1;
            } else if matched + 1 < locations.len() {
                stats.load_balanced += 1;
            } else {
                stats.exited += 1;
            }
            if mismatch {
                stats.ttl_mismatches += 1;
            }
        }

        log::info!(
            "Statistics for {} on {:?}: entered={}, exited={}, lost={}, load-balanced={}",
            query,
            prefix,
            stats.entered,
            stats.exited,
            stats.lost,
            stats.load_balanced
        );
        Some(stats)
    }
}
