//! Quadtree spatial index over the entries of one zoom level
//!
//! Each zoom level owns an immutable quadtree in world space. The tree stores indices
//! into the level's position slice and answers rectangle and radius queries, which
//! drive both viewport queries and neighbor search during cluster construction.

use crate::projection::{WORLD_HEIGHT, WORLD_WIDTH};
use geo::{Coord, Rect};

/// Maximum depth of the quadtree to prevent infinite recursion on coincident points
const MAX_DEPTH: u32 = 24;

/// Static quadtree for one zoom level
#[derive(Debug, Clone)]
pub(crate) struct Quadtree {
    /// Root node covering the whole world
    root: QuadtreeNode,
    /// Number of indexed entries
    len: usize,
}

/// A single node in the quadtree
#[derive(Debug, Clone)]
struct QuadtreeNode {
    /// Bounding box in world units
    bounding_box: Rect<f64>,
    /// Depth level in the tree (0 = root)
    level: u32,
    /// Entry indices stored at this node (only leaves hold entries)
    items: Vec<u32>,
    /// Child nodes (NW, NE, SW, SE) if subdivided
    children: Option<Box<[QuadtreeNode; 4]>>,
}

impl Quadtree {
    /// Build a quadtree over `positions`
    ///
    /// Nodes holding more than `max_items_per_node` entries are subdivided until
    /// [`MAX_DEPTH`] is reached.
    pub fn build(positions: &[Coord<f64>], max_items_per_node: usize) -> Self {
        profiling::scope!("build_quadtree");
        let mut root = QuadtreeNode::new_root();
        root.items = (0..positions.len() as u32).collect();
        root.split(positions, max_items_per_node.max(1));
        Self {
            root,
            len: positions.len(),
        }
    }

    /// Number of indexed entries
    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Append indices of all entries inside `rect` (inclusive edges) to `results`
    ///
    /// Results are in tree order; callers sort when they need input order.
    pub fn range(&self, rect: Rect<f64>, positions: &[Coord<f64>], results: &mut Vec<u32>) {
        self.root.query_range(rect, positions, results);
    }

    /// Append indices of all entries within `radius` of `center` to `results`
    pub fn within(
        &self,
        center: Coord<f64>,
        radius: f64,
        positions: &[Coord<f64>],
        results: &mut Vec<u32>,
    ) {
        let rect = Rect::new(
            Coord {
                x: center.x - radius,
                y: center.y - radius,
            },
            Coord {
                x: center.x + radius,
                y: center.y + radius,
            },
        );
        let radius_sq = radius * radius;
        let start = results.len();
        self.root.query_range(rect, positions, results);

        let mut keep = start;
        for i in start..results.len() {
            let p = positions[results[i] as usize];
            let dx = p.x - center.x;
            let dy = p.y - center.y;
            if dx * dx + dy * dy <= radius_sq {
                results[keep] = results[i];
                keep += 1;
            }
        }
        results.truncate(keep);
    }
}

impl QuadtreeNode {
    /// Create a root node covering the whole world
    fn new_root() -> Self {
        let bounding_box = Rect::new(
            Coord { x: 0.0, y: 0.0 },
            Coord {
                x: WORLD_WIDTH,
                y: WORLD_HEIGHT,
            },
        );

        Self::new_child(bounding_box, 0)
    }

    /// Create a child node with the given bounding box and level
    fn new_child(bounding_box: Rect<f64>, level: u32) -> Self {
        Self {
            bounding_box,
            level,
            items: Vec::new(),
            children: None,
        }
    }

    /// Distribute this node's items into 4 children, recursively
    fn split(&mut self, positions: &[Coord<f64>], max_items_per_node: usize) {
        if self.items.len() <= max_items_per_node || self.level >= MAX_DEPTH {
            return;
        }

        let min = self.bounding_box.min();
        let max = self.bounding_box.max();
        let mid_x = (min.x + max.x) / 2.0;
        let mid_y = (min.y + max.y) / 2.0;

        let child_level = self.level + 1;

        // World y grows southwards: the north half has the smaller y values
        let mut children = Box::new([
            QuadtreeNode::new_child(
                Rect::new(Coord { x: min.x, y: min.y }, Coord { x: mid_x, y: mid_y }),
                child_level,
            ),
            QuadtreeNode::new_child(
                Rect::new(Coord { x: mid_x, y: min.y }, Coord { x: max.x, y: mid_y }),
                child_level,
            ),
            QuadtreeNode::new_child(
                Rect::new(Coord { x: min.x, y: mid_y }, Coord { x: mid_x, y: max.y }),
                child_level,
            ),
            QuadtreeNode::new_child(
                Rect::new(Coord { x: mid_x, y: mid_y }, Coord { x: max.x, y: max.y }),
                child_level,
            ),
        ]);

        for index in std::mem::take(&mut self.items) {
            let p = positions[index as usize];
            let is_east = p.x >= mid_x;
            let is_south = p.y >= mid_y;

            let quadrant = match (is_east, is_south) {
                (false, false) => 0, // NW
                (true, false) => 1,  // NE
                (false, true) => 2,  // SW
                (true, true) => 3,   // SE
            };
            children[quadrant].items.push(index);
        }

        for child in children.iter_mut() {
            child.split(positions, max_items_per_node);
        }

        self.children = Some(children);
    }

    /// Query this node and its children for entries inside the viewport
    fn query_range(&self, viewport: Rect<f64>, positions: &[Coord<f64>], results: &mut Vec<u32>) {
        if !self.intersects_viewport(viewport) {
            return;
        }

        let min = viewport.min();
        let max = viewport.max();
        for &index in &self.items {
            let p = positions[index as usize];
            if p.x >= min.x && p.x <= max.x && p.y >= min.y && p.y <= max.y {
                results.push(index);
            }
        }

        if let Some(children) = &self.children {
            for child in children.iter() {
                child.query_range(viewport, positions, results);
            }
        }
    }

    /// Check if this node intersects the viewport
    fn intersects_viewport(&self, viewport: Rect<f64>) -> bool {
        let min = self.bounding_box.min();
        let max = self.bounding_box.max();
        let v_min = viewport.min();
        let v_max = viewport.max();

        !(max.x < v_min.x || min.x > v_max.x || max.y < v_min.y || min.y > v_max.y)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn grid(n: usize) -> Vec<Coord<f64>> {
        // n x n points spread over the world
        let mut positions = Vec::with_capacity(n * n);
        for i in 0..n {
            for j in 0..n {
                positions.push(Coord {
                    x: (i as f64 + 0.5) / n as f64 * WORLD_WIDTH,
                    y: (j as f64 + 0.5) / n as f64 * WORLD_HEIGHT,
                });
            }
        }
        positions
    }

    fn brute_range(positions: &[Coord<f64>], rect: Rect<f64>) -> Vec<u32> {
        positions
            .iter()
            .enumerate()
            .filter(|(_, p)| {
                p.x >= rect.min().x && p.x <= rect.max().x && p.y >= rect.min().y && p.y <= rect.max().y
            })
            .map(|(i, _)| i as u32)
            .collect()
    }

    #[test]
    fn test_quadtree_creation() {
        let tree = Quadtree::build(&[], 8);
        assert_eq!(tree.len(), 0);
        assert!(tree.root.items.is_empty());
        assert!(tree.root.children.is_none());
    }

    #[test]
    fn test_node_subdivide() {
        let positions = grid(10);
        let tree = Quadtree::build(&positions, 8);
        assert!(tree.root.children.is_some());
        assert!(tree.root.items.is_empty());

        let children = tree.root.children.as_ref().unwrap();
        let nw = &children[0];
        assert_eq!(nw.level, 1);
        assert_eq!(nw.bounding_box.max().x, WORLD_WIDTH / 2.0);
        assert_eq!(nw.bounding_box.max().y, WORLD_HEIGHT / 2.0);
    }

    #[test]
    fn test_range_matches_brute_force() {
        let positions = grid(20);
        let tree = Quadtree::build(&positions, 4);
        let rect = Rect::new(Coord { x: 0.1, y: 0.05 }, Coord { x: 0.63, y: 0.31 });

        let mut results = Vec::new();
        tree.range(rect, &positions, &mut results);
        results.sort_unstable();
        assert_eq!(results, brute_range(&positions, rect));
    }

    #[test]
    fn test_within_radius() {
        let positions = vec![
            Coord { x: 0.5, y: 0.25 },
            Coord { x: 0.51, y: 0.25 },
            Coord { x: 0.5, y: 0.27 },
            Coord { x: 0.9, y: 0.1 },
        ];
        let tree = Quadtree::build(&positions, 1);

        let mut results = Vec::new();
        tree.within(Coord { x: 0.5, y: 0.25 }, 0.015, &positions, &mut results);
        results.sort_unstable();
        assert_eq!(results, vec![0, 1]);

        results.clear();
        tree.within(Coord { x: 0.5, y: 0.25 }, 0.03, &positions, &mut results);
        results.sort_unstable();
        assert_eq!(results, vec![0, 1, 2]);
    }

    #[test]
    fn test_coincident_points_depth_limited() {
        let positions = vec![Coord { x: 0.3, y: 0.2 }; 100];
        let tree = Quadtree::build(&positions, 2);

        let mut results = Vec::new();
        tree.within(Coord { x: 0.3, y: 0.2 }, 0.0, &positions, &mut results);
        assert_eq!(results.len(), 100);
    }

    #[test]
    fn test_intersects_viewport() {
        let node = QuadtreeNode::new_root();
        let inside = Rect::new(Coord { x: 0.1, y: 0.1 }, Coord { x: 0.2, y: 0.2 });
        let outside = Rect::new(Coord { x: 1.5, y: 0.1 }, Coord { x: 2.0, y: 0.2 });
        assert!(node.intersects_viewport(inside));
        assert!(!node.intersects_viewport(outside));
    }
}
