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
//! Allocation of monitoring queries into budgeted measurement slots.
mod solver;

use std::collections::HashMap;
use std::time::{Duration, Instant};

use itertools::Itertools;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::requirements::{Budget, Query};
pub use solver::{first_fit_decreasing, BranchAndBound, SolveOutcome, Solver};

#[derive(Debug, Error)]
pub enum ScheduleError {
    /// No slot assignment exists for the given queries and budget.
    #[error("No feasible schedule: {queries} queries with a total cost of {total_cost} do not fit into {max_slots} slots of {using} budget units")]
    Infeasible {
        queries: usize,
        total_cost: f64,
        max_slots: usize,
        using: f64,
    },
    /// The exact solver ran out of time before finding any schedule.
    #[error("No schedule found within the solve time limit of {0:?}")]
    Timeout(Duration),
    /// The budget violates the scheduler preconditions.
    #[error("Invalid budget: {0}")]
    InvalidBudget(String),
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
/// Scheduling strategies, keyed by their stable record names.
pub enum ScheduleStrategy {
    /// Branch and bound packing, optimal up to the budget's mip gap.
    #[serde(rename = "exact")]
    #[strum(serialize = "exact")]
    Exact,
    /// First fit over the costs in descending order.
    #[serde(rename = "approx-greedy")]
    #[strum(serialize = "approx-greedy")]
    ApproxGreedy,
}

/// A cyclic measurement schedule: one list of queries per time slot.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Schedule {
    pub slots: Vec<Vec<Query>>,
}

impl Schedule {
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Budget units consumed by one slot.
    pub fn slot_cost(&self, slot: usize) -> f64 {
        self.slots[slot].iter().map(|q| q.cost).sum()
    }

    /// Consumed budget of every slot, in slot order.
    pub fn slot_costs(&self) -> Vec<f64> {
        (0..self.slots.len()).map(|s| self.slot_cost(s)).collect()
    }

    /// How many slots each query is allocated in, keyed by query index.
    pub fn allocation_counts(&self) -> HashMap<usize, usize> {
        let mut counts = HashMap::new();
        for q in self.slots.iter().flatten() {
            *counts.entry(q.index).or_default() += 1;
        }
        counts
    }

    /// Total number of (query, slot) allocations.
    pub fn total_allocations(&self) -> usize {
        self.slots.iter().map(Vec::len).sum()
    }

    /// Allocation count of the least allocated query, 0 when empty.
    pub fn min_allocation_count(&self) -> usize {
        self.allocation_counts().values().copied().min().unwrap_or(0)
    }
}

/// Schedule `queries` into the fewest slots satisfying `budget`.
///
/// Passive queries cost nothing and ride along in the first slot. Failures
/// are explicit: an unsatisfiable instance reports
/// [`ScheduleError::Infeasible`], and the exact strategy reports
/// [`ScheduleError::Timeout`] when the solve time expires before any
/// schedule is known.
pub fn schedule(
    queries: &[Query],
    budget: &Budget,
    strategy: ScheduleStrategy,
) -> Result<Schedule, ScheduleError> {
    if queries.is_empty() {
        return Ok(Schedule::default());
    }
    validate(budget)?;

    let (active, passive): (Vec<&Query>, Vec<&Query>) = queries.iter().partition(|q| q.cost > 0.0);
    let costs = active.iter().map(|q| q.cost).collect_vec();
    let total_cost: f64 = costs.iter().sum();
    let infeasible = || ScheduleError::Infeasible {
        queries: queries.len(),
        total_cost,
        max_slots: budget.max_slots,
        using: budget.using,
    };
    if costs.iter().any(|c| *c > budget.using + solver::EPS) {
        return Err(infeasible());
    }

    let outcome = match strategy {
        ScheduleStrategy::ApproxGreedy => {
            let slots = first_fit_decreasing(&costs, budget.using);
            if slots.len() > budget.max_slots {
                SolveOutcome::Infeasible
            } else {
                SolveOutcome::Solved(slots)
            }
        }
        ScheduleStrategy::Exact => BranchAndBound.solve(
            &costs,
            budget.using,
            budget.max_slots,
            budget.mip_gap,
            Instant::now() + budget.max_solve_time,
        ),
    };

    let slots = match outcome {
        SolveOutcome::Solved(slots) => slots,
        SolveOutcome::Infeasible => return Err(infeasible()),
        SolveOutcome::Timeout => return Err(ScheduleError::Timeout(budget.max_solve_time)),
    };

    let mut schedule = Schedule {
        slots: slots
            .into_iter()
            .map(|slot| slot.into_iter().map(|i| active[i].clone()).collect())
            .collect(),
    };
    if let Some(first) = schedule.slots.first_mut() {
        first.extend(passive.iter().map(|q| (*q).clone()));
    } else if !passive.is_empty() {
        schedule.slots.push(passive.iter().map(|q| (*q).clone()).collect());
    }

    if schedule.is_empty() {
        log::error!("Empty schedule and no exception thrown?");
        return Err(infeasible());
    }
    debug_assert_eq!(schedule.allocation_counts().len(), queries.len());
    log::debug!(
        "Scheduled {} queries into {} slots with {}",
        queries.len(),
        schedule.len(),
        strategy
    );
    Ok(schedule)
}

/// Schedule, then spread the queries over all `budget.max_slots` slots so
/// that every query is measured as often as the leftover capacity allows.
///
/// The minimal schedule measures each query once per cycle. Balancing
/// extends the cycle to the full slot count and assigns additional
/// (query, slot) pairs round-robin, always favoring the query with the
/// lowest allocation count relative to its weight. Slot capacities are never
/// exceeded and no slot carries the same query twice.
pub fn balance_and_schedule(
    queries: &[Query],
    budget: &Budget,
    strategy: ScheduleStrategy,
) -> Result<Schedule, ScheduleError> {
    let mut schedule = schedule(queries, budget, strategy)?;
    if schedule.len() < budget.max_slots {
        schedule.slots.resize(budget.max_slots, Vec::new());
    }
    let mut loads = schedule.slot_costs();
    let mut counts = schedule.allocation_counts();

    loop {
        let order = queries
            .iter()
            .sorted_by(|a, b| {
                let ra = counts[&a.index] as f64 / f64::from(a.weight.max(1));
                let rb = counts[&b.index] as f64 / f64::from(b.weight.max(1));
                ra.total_cmp(&rb).then(a.index.cmp(&b.index))
            })
            .collect_vec();
        let mut assigned = false;
        for q in order {
            let candidate = (0..schedule.slots.len())
                .filter(|s| !schedule.slots[*s].iter().any(|p| p.index == q.index))
                .filter(|s| loads[*s] + q.cost <= budget.using + solver::EPS)
                .min_by(|a, b| loads[*a].total_cmp(&loads[*b]).then(a.cmp(b)));
            if let Some(s) = candidate {
                loads[s] += q.cost;
                *counts.entry(q.index).or_default() += 1;
                schedule.slots[s].push(q.clone());
                assigned = true;
                break;
            }
        }
        if !assigned {
            break;
        }
    }

    log::info!(
        "Balanced {} queries across {} slots (smallest allocation count: {})",
        queries.len(),
        schedule.len(),
        schedule.min_allocation_count()
    );
    Ok(schedule)
}

fn validate(budget: &Budget) -> Result<(), ScheduleError> {
    if budget.max_slots == 0 {
        Err(ScheduleError::InvalidBudget(
            "the budget allows no slots".to_string(),
        ))
    } else if budget.using <= 0.0 || !budget.using.is_finite() {
        Err(ScheduleError::InvalidBudget(format!(
            "per-slot budget of {} units",
            budget.using
        )))
    } else if budget.mip_gap < 0.0 {
        Err(ScheduleError::InvalidBudget(format!(
            "negative mip gap {}",
            budget.mip_gap
        )))
    } else {
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn queries(costs: &[f64]) -> Vec<Query> {
        costs
            .iter()
            .enumerate()
            .map(|(i, c)| Query::demand(i, *c))
            .collect()
    }

    fn budget(using: f64, max_slots: usize) -> Budget {
        Budget::new(0.0, Duration::from_secs(5))
            .max_slots(max_slots)
            .using(using)
    }

    #[test]
    fn greedy_packs_the_reference_workload() {
        let qs = queries(&[100.0, 110.0, 95.0, 120.0, 90.0, 130.0, 85.0, 80.0, 75.0, 60.0]);
        let s = schedule(&qs, &budget(200.0, 10), ScheduleStrategy::ApproxGreedy).unwrap();
        assert_eq!(s.len(), 5);
        for slot in 0..s.len() {
            assert!(s.slot_cost(slot) <= 200.0);
        }
        let counts = s.allocation_counts();
        assert_eq!(counts.len(), 10);
        assert!(counts.values().all(|c| *c == 1));
    }

    #[test]
    fn exact_matches_the_volume_bound() {
        let qs = queries(&[100.0, 110.0, 95.0, 120.0, 90.0, 130.0, 85.0, 80.0, 75.0, 60.0]);
        let s = schedule(&qs, &budget(200.0, 10), ScheduleStrategy::Exact).unwrap();
        // total cost 945 needs at least 5 slots of 200
        assert_eq!(s.len(), 5);
    }

    #[test]
    fn too_few_slots_are_infeasible() {
        let qs = queries(&[100.0, 110.0, 95.0, 120.0, 90.0, 130.0, 85.0, 80.0, 75.0, 60.0]);
        for strategy in [ScheduleStrategy::Exact, ScheduleStrategy::ApproxGreedy] {
            let err = schedule(&qs, &budget(200.0, 4), strategy).unwrap_err();
            assert!(matches!(err, ScheduleError::Infeasible { .. }), "{err}");
        }
    }

    #[test]
    fn oversized_query_is_infeasible_not_empty() {
        let qs = queries(&[100.0]);
        for strategy in [ScheduleStrategy::Exact, ScheduleStrategy::ApproxGreedy] {
            let err = schedule(&qs, &budget(50.0, 10), strategy).unwrap_err();
            assert!(matches!(err, ScheduleError::Infeasible { .. }), "{err}");
        }
    }

    #[test]
    fn degenerate_budgets_are_rejected() {
        let qs = queries(&[10.0]);
        for bad in [budget(0.0, 5), budget(100.0, 0), budget(-1.0, 5)] {
            let err = schedule(&qs, &bad, ScheduleStrategy::ApproxGreedy).unwrap_err();
            assert!(matches!(err, ScheduleError::InvalidBudget(_)), "{err}");
        }
    }

    #[test]
    fn empty_queries_give_an_empty_schedule() {
        let s = schedule(&[], &budget(200.0, 10), ScheduleStrategy::Exact).unwrap();
        assert!(s.is_empty());
    }

    #[test]
    fn passive_queries_ride_along() {
        let qs = queries(&[0.0, 0.0, 50.0]);
        let s = schedule(&qs, &budget(200.0, 10), ScheduleStrategy::ApproxGreedy).unwrap();
        assert_eq!(s.len(), 1);
        assert_eq!(s.slots[0].len(), 3);
        assert_eq!(s.slot_cost(0), 50.0);

        let all_passive = queries(&[0.0, 0.0]);
        let s = schedule(&all_passive, &budget(200.0, 10), ScheduleStrategy::Exact).unwrap();
        assert_eq!(s.len(), 1);
        assert_eq!(s.slots[0].len(), 2);
    }

    #[test]
    fn exact_beats_greedy_when_first_fit_fragments() {
        let qs = queries(&[5.0, 4.0, 3.0, 3.0, 3.0, 2.0]);
        let b = budget(10.0, 2);
        assert!(schedule(&qs, &b, ScheduleStrategy::ApproxGreedy).is_err());
        let s = schedule(&qs, &b, ScheduleStrategy::Exact).unwrap();
        assert_eq!(s.len(), 2);
    }

    #[test]
    fn balancing_fills_the_cycle() {
        let qs = queries(&[60.0, 60.0]);
        let s = balance_and_schedule(&qs, &budget(200.0, 3), ScheduleStrategy::ApproxGreedy).unwrap();
        assert_eq!(s.len(), 3);
        assert_eq!(s.min_allocation_count(), 3);
        assert_eq!(s.total_allocations(), 6);
        for slot in 0..s.len() {
            assert_eq!(s.slots[slot].len(), 2);
            assert_eq!(s.slot_cost(slot), 120.0);
        }
    }

    #[test]
    fn balancing_respects_the_capacity() {
        let qs = queries(&[150.0, 60.0]);
        let s = balance_and_schedule(&qs, &budget(200.0, 3), ScheduleStrategy::ApproxGreedy).unwrap();
        assert_eq!(s.len(), 3);
        for slot in 0..s.len() {
            assert!(s.slot_cost(slot) <= 200.0);
            let indices = s.slots[slot].iter().map(|q| q.index).collect_vec();
            let unique = indices.iter().unique().count();
            assert_eq!(indices.len(), unique);
        }
        assert!(s.min_allocation_count() >= 1);
        assert!(s.total_allocations() > 2);
    }

    #[test]
    fn strategy_keys_round_trip() {
        assert_eq!(
            "approx-greedy".parse::<ScheduleStrategy>().unwrap(),
            ScheduleStrategy::ApproxGreedy
        );
        assert_eq!(ScheduleStrategy::Exact.to_string(), "exact");
    }
}
