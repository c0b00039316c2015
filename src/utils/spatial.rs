//! 2D k-d tree for nearest-neighbour queries on fiducial centroids.

use nalgebra::Point2;

/// Median-split k-d tree over 2D points.
///
/// Built once per reference point set and queried once per fit point.
#[derive(Debug)]
pub struct KdTree {
    nodes: Vec<KdNode>,
    points: Vec<Point2<f64>>,
}

#[derive(Debug, Clone)]
struct KdNode {
    point_idx: usize,
    left: Option<usize>,
    right: Option<usize>,
    /// 0 = x, 1 = y
    split_dim: usize,
}

impl KdTree {
    /// Builds the tree, or `None` if `points` is empty.
    pub fn build(points: &[Point2<f64>]) -> Option<Self> {
        if points.is_empty() {
            return None;
        }

        let mut indices: Vec<usize> = (0..points.len()).collect();
        let mut nodes = Vec::with_capacity(points.len());
        Self::build_recursive(points, &mut indices, 0, &mut nodes);

        Some(Self {
            nodes,
            points: points.to_vec(),
        })
    }

    fn build_recursive(
        points: &[Point2<f64>],
        indices: &mut [usize],
        depth: usize,
        nodes: &mut Vec<KdNode>,
    ) -> Option<usize> {
        if indices.is_empty() {
            return None;
        }

        let split_dim = depth % 2;
        indices.sort_by(|&a, &b| points[a][split_dim].total_cmp(&points[b][split_dim]));

        let median = indices.len() / 2;
        let node_idx = nodes.len();
        nodes.push(KdNode {
            point_idx: indices[median],
            left: None,
            right: None,
            split_dim,
        });

        let (left_indices, right_part) = indices.split_at_mut(median);
        let right_indices = &mut right_part[1..];

        let left = Self::build_recursive(points, left_indices, depth + 1, nodes);
        let right = Self::build_recursive(points, right_indices, depth + 1, nodes);
        nodes[node_idx].left = left;
        nodes[node_idx].right = right;

        Some(node_idx)
    }

    /// Index of the closest point and its Euclidean distance.
    ///
    /// Ties resolve to the point visited first.
    pub fn nearest(&self, query: &Point2<f64>) -> (usize, f64) {
        let mut best = (self.nodes[0].point_idx, f64::INFINITY);
        self.nearest_recursive(0, query, &mut best);
        (best.0, best.1.sqrt())
    }

    fn nearest_recursive(&self, node_idx: usize, query: &Point2<f64>, best: &mut (usize, f64)) {
        let node = &self.nodes[node_idx];
        let point = &self.points[node.point_idx];

        let dist_sq = (point - query).norm_squared();
        if dist_sq < best.1 {
            *best = (node.point_idx, dist_sq);
        }

        let diff = query[node.split_dim] - point[node.split_dim];
        let (first, second) = if diff < 0.0 {
            (node.left, node.right)
        } else {
            (node.right, node.left)
        };

        if let Some(first_idx) = first {
            self.nearest_recursive(first_idx, query, best);
        }

        // The far side can only hold a closer point if the splitting plane is
        // nearer than the current best.
        if let Some(second_idx) = second {
            if diff * diff < best.1 {
                self.nearest_recursive(second_idx, query, best);
            }
        }
    }
}
