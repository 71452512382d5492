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
//! Selection of the vantage points to monitor along a path.
use crate::topology::NetGraph;
use crate::{NodeId, NodePath};

/// Default spacing, in hops, between two consecutive vantage points.
pub const DEFAULT_STRIDE: usize = 2;

/// Key points of `path` with the default stride of [`DEFAULT_STRIDE`].
pub fn find_key_points(g: &NetGraph, path: &[NodeId]) -> NodePath {
    find_key_points_with_stride(g, path, DEFAULT_STRIDE)
}

/// Reduce `path` to its endpoints plus one vantage point every `stride` hops.
///
/// Both endpoints are always selected and the reported order follows the
/// path. The selection only depends on the node positions, so a path never
/// yields fewer key points than any of its prefixes.
pub fn find_key_points_with_stride(g: &NetGraph, path: &[NodeId], stride: usize) -> NodePath {
    let stride = stride.max(1);
    let mut points = NodePath::new();
    match path {
        [] => {}
        [only] => points.push(*only),
        [first, .., last] => {
            points.push(*first);
            for i in (stride..path.len() - 1).step_by(stride) {
                points.push(path[i]);
            }
            points.push(*last);
        }
    }
    log::trace!(
        "Selected {} of {} path nodes on {} as key points",
        points.len(),
        path.len(),
        g.name()
    );
    points
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::topology::Topology;

    fn chain(n: usize) -> (NetGraph, NodePath) {
        let g = Topology::Path(n).build_graph().unwrap();
        let src = g.router_id("r0").unwrap();
        let dst = g.router_id(format!("r{}", n - 1)).unwrap();
        let path = g.spt_path(src, dst).unwrap().clone();
        (g, path)
    }

    #[test]
    fn endpoints_are_always_selected() {
        let (g, path) = chain(8);
        for stride in 1..=10 {
            let points = find_key_points_with_stride(&g, &path, stride);
            assert_eq!(points.first(), path.first());
            assert_eq!(points.last(), path.last());
        }
    }

    #[test]
    fn stride_one_keeps_the_whole_path() {
        let (g, path) = chain(6);
        assert_eq!(find_key_points_with_stride(&g, &path, 1), path);
    }

    #[test]
    fn default_stride_samples_every_other_node() {
        let (g, path) = chain(6);
        let points = find_key_points(&g, &path);
        assert_eq!(points, vec![path[0], path[2], path[4], path[5]]);
    }

    #[test]
    fn selection_grows_with_the_path() {
        let (g, path) = chain(10);
        let mut previous = 0;
        for m in 2..=path.len() {
            let count = find_key_points(&g, &path[..m]).len();
            assert!(count >= previous);
            assert!(count <= m);
            previous = count;
        }
    }

    #[test]
    fn degenerate_paths() {
        let (g, path) = chain(4);
        assert!(find_key_points(&g, &[]).is_empty());
        assert_eq!(find_key_points(&g, &path[..1]), vec![path[0]]);
        assert_eq!(find_key_points(&g, &path[..2]), vec![path[0], path[1]]);
    }
}
