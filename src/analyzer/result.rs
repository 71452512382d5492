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
//! Describes the correlation result of a single mirroring query.

use serde::{Deserialize, Serialize};

/// Fate of all packets that entered the monitored path of one query.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct QueryStatistics {
    /// Index of the query these counts belong to.
    pub query: usize,
    /// Packets mirrored at the first key point of the path.
    pub entered: usize,
    /// Packets seen at every key point through to the last one.
    pub exited: usize,
    /// Packets that never made it to the last key point.
    pub lost: usize,
    /// Packets that reached the last key point but skipped one in between.
    pub load_balanced: usize,
    /// Packets whose TTL decrease did not match the hop distance between
    /// the key points where they were mirrored.
    pub ttl_mismatches: usize,
}

impl QueryStatistics {
    pub fn new(query: usize) -> Self {
        Self {
            query,
            ..Default::default()
        }
    }

    /// Fraction of the entering packets that were lost on the path.
    pub fn loss_rate(&self) -> f64 {
        if self.entered == 0 {
            0.0
        } else {
            self.lost as f64 / self.entered as f64
        }
    }

    /// Fraction of the entering packets that bypassed a key point.
    pub fn load_balance_rate(&self) -> f64 {
        if self.entered == 0 {
            0.0
        } else {
            self.load_balanced as f64 / self.entered as f64
        }
    }
}

impl std::fmt::Display for QueryStatistics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Q{}: {:>6} entered, {:>6} exited, lost: {:>5.1}%, load-balanced: {:>5.1}%, TTL mismatches: {}",
            self.query,
            self.entered,
            self.exited,
            self.loss_rate() * 100.0,
            self.load_balance_rate() * 100.0,
            self.ttl_mismatches,
        )
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn rates_are_guarded_against_empty_queries() {
        let stats = QueryStatistics::new(3);
        assert_eq!(stats.loss_rate(), 0.0);
        assert_eq!(stats.load_balance_rate(), 0.0);
    }

    #[test]
    fn rates_and_rendering() {
        let stats = QueryStatistics {
            query: 1,
            entered: 200,
            exited: 150,
            lost: 30,
            load_balanced: 20,
            ttl_mismatches: 4,
        };
        assert_eq!(stats.loss_rate(), 0.15);
        assert_eq!(stats.load_balance_rate(), 0.1);
        let line = stats.to_string();
        assert!(line.starts_with("Q1:"), "{line}");
        assert!(line.contains("15.0%"), "{line}");
        assert!(line.contains("10.0%"), "{line}");
    }
}
