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
//! Utility module collection of functions

use statrs::statistics::Statistics;

pub fn init_logging() {
    let _ = pretty_env_logger::try_init();
}

/// Mean and sample standard deviation of `data`.
///
/// Returns `None` for empty input and a standard deviation of 0 for a
/// single observation.
pub fn mean_stdev(data: &[f64]) -> Option<(f64, f64)> {
    match data {
        [] => None,
        [only] => Some((*only, 0.0)),
        _ => Some((data.mean(), data.std_dev())),
    }
}
