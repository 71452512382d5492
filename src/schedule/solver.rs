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
//! Branch and bound packing backend behind the exact scheduling strategy.
use std::time::Instant;

use itertools::Itertools;

/// Tolerance when comparing summed costs against the slot capacity.
pub(crate) const EPS: f64 = 1e-9;

/// Outcome of one solver invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SolveOutcome {
    /// Slot assignment, given as indices into the cost slice.
    Solved(Vec<Vec<usize>>),
    /// Proof that no assignment fits within the slot limit.
    Infeasible,
    /// The deadline expired before any feasible assignment was found.
    Timeout,
}

/// Packing backend of the scheduler.
pub trait Solver {
    /// Pack `costs` into at most `max_slots` slots of `capacity` each.
    ///
    /// A solution within `gap` of the volume lower bound is accepted early.
    /// When the `deadline` expires, the best assignment found so far is
    /// returned; [`SolveOutcome::Timeout`] is reported only if there is none.
    fn solve(
        &self,
        costs: &[f64],
        capacity: f64,
        max_slots: usize,
        gap: f64,
        deadline: Instant,
    ) -> SolveOutcome;
}

/// First fit decreasing onto slots of `capacity`, without a slot limit.
///
/// Items are placed in order of descending cost, ties broken by the lower
/// index. An item larger than `capacity` fits nowhere and ends up alone in
/// a slot that exceeds the capacity; callers needing a feasibility
/// guarantee screen such items out beforehand, as [`super::schedule`] does.
pub fn first_fit_decreasing(costs: &[f64], capacity: f64) -> Vec<Vec<usize>> {
    let order = (0..costs.len())
        .sorted_by(|a, b| costs[*b].total_cmp(&costs[*a]).then(a.cmp(b)))
        .collect_vec();
    let mut slots: Vec<Vec<usize>> = Vec::new();
    let mut loads: Vec<f64> = Vec::new();
    for i in order {
        match loads.iter().position(|l| l + costs[i] <= capacity + EPS) {
            Some(s) => {
                loads[s] += costs[i];
                slots[s].push(i);
            }
            None => {
                loads.push(costs[i]);
                slots.push(vec![i]);
            }
        }
    }
    slots
}

/// Depth-first branch and bound over slot assignments, seeded with the first
/// fit decreasing incumbent.
#[derive(Debug, Default, Clone, Copy)]
pub struct BranchAndBound;

impl Solver for BranchAndBound {
    fn solve(
        &self,
        costs: &[f64],
        capacity: f64,
        max_slots: usize,
        gap: f64,
        deadline: Instant,
    ) -> SolveOutcome {
        if costs.is_empty() {
            return SolveOutcome::Solved(Vec::new());
        }
        if costs.iter().any(|c| *c > capacity + EPS) {
            return SolveOutcome::Infeasible;
        }
        let total: f64 = costs.iter().sum();
        let lower_bound = ((total / capacity) - EPS).ceil().max(1.0) as usize;
        if lower_bound > max_slots {
            return SolveOutcome::Infeasible;
        }
        // any incumbent at most `gap` above the volume bound is good enough
        let accept_at = ((lower_bound as f64) * (1.0 + gap) + EPS).floor() as usize;

        let seed = first_fit_decreasing(costs, capacity);
        let best = (seed.len() <= max_slots).then_some(seed);
        if let Some(best) = &best {
            if best.len() <= accept_at {
                return SolveOutcome::Solved(best.clone());
            }
        }

        let mut search = Search {
            costs,
            order: (0..costs.len())
                .sorted_by(|a, b| costs[*b].total_cmp(&costs[*a]).then(a.cmp(b)))
                .collect_vec(),
            capacity,
            max_slots,
            accept_at,
            deadline,
            loads: Vec::new(),
            slots: Vec::new(),
            best,
            nodes: 0,
            expired: false,
            done: false,
        };
        search.run(0);

        match (search.best, search.expired) {
            (Some(best), expired) => {
                if expired {
                    log::debug!(
                        "Returning the incumbent of {} slots after {} search nodes; the deadline expired",
                        best.len(),
                        search.nodes
                    );
                }
                SolveOutcome::Solved(best)
            }
            (None, true) => SolveOutcome::Timeout,
            (None, false) => SolveOutcome::Infeasible,
        }
    }
}

struct Search<'a> {
    costs: &'a [f64],
    order: Vec<usize>,
    capacity: f64,
    max_slots: usize,
    accept_at: usize,
    deadline: Instant,
    loads: Vec<f64>,
    slots: Vec<Vec<usize>>,
    best: Option<Vec<Vec<usize>>>,
    nodes: u64,
    expired: bool,
    done: bool,
}

impl Search<'_> {
    fn run(&mut self, depth: usize) {
        self.nodes += 1;
        if Instant::now() >= self.deadline {
            self.expired = true;
            return;
        }
        if depth == self.order.len() {
            let improved = match &self.best {
                Some(best) => self.slots.len() < best.len(),
                None => true,
            };
            if improved {
                self.best = Some(self.slots.clone());
                if self.slots.len() <= self.accept_at {
                    self.done = true;
                }
            }
            return;
        }
        let best_len = self.best.as_ref().map_or(usize::MAX, Vec::len);
        if self.slots.len() >= best_len {
            return;
        }

        let item = self.order[depth];
        let cost = self.costs[item];

        // place into an existing slot; slots with equal load are symmetric
        let mut tried: Vec<f64> = Vec::new();
        for s in 0..self.slots.len() {
            if self.loads[s] + cost <= self.capacity + EPS
                && !tried.iter().any(|l| (l - self.loads[s]).abs() < EPS)
            {
                tried.push(self.loads[s]);
                self.loads[s] += cost;
                self.slots[s].push(item);
                self.run(depth + 1);
                self.slots[s].pop();
                self.loads[s] -= cost;
                if self.expired || self.done {
                    return;
                }
            }
        }

        // open a new slot
        if self.slots.len() < self.max_slots && self.slots.len() + 1 < best_len {
            self.loads.push(cost);
            self.slots.push(vec![item]);
            self.run(depth + 1);
            self.slots.pop();
            self.loads.pop();
        }
    }
}
