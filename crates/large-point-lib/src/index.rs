//! Multi-resolution cluster index
//!
//! The index holds one level per integer zoom between `min_zoom` and `max_zoom`.
//! The finest level holds every point as a leaf. Each coarser level is produced from the
//! level above by a single greedy pass: nodes are visited in input order, and every node
//! that is not yet taken absorbs its untaken neighbors within the merge radius.
//!
//! Cluster identities encode the seed position and the zoom their children live at:
//! `id = point_count + (seed_index << 5) + children_zoom`. Leaf identities are point
//! indices, so every identity is unique within one build.

use crate::projection::{pixel_radius_to_world, project};
use crate::quadtree::Quadtree;
use crate::{DataError, PointStore, Result, ViewportBox};
use geo::Coord;
use std::collections::HashMap;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Highest supported zoom, bounded by the 5 bits reserved for it in cluster identities
pub const MAX_SUPPORTED_ZOOM: u8 = 30;

const ZOOM_BITS: u64 = 5;
const ZOOM_MASK: u64 = (1 << ZOOM_BITS) - 1;

/// Configuration for cluster index construction
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ClusterConfig {
    /// Merge radius in screen pixels, identical at every zoom
    /// Default: 60.0
    pub radius: f64,
    /// Tile size in pixels; the world is `extent * 2^zoom` pixels wide
    /// Default: 512.0
    pub extent: f64,
    /// Coarsest zoom level built
    /// Default: 0
    pub min_zoom: u8,
    /// Finest zoom level built, where every point is its own leaf
    /// Default: 19
    pub max_zoom: u8,
    /// Minimum merged count for a group of nodes to become a cluster
    /// Default: 2
    pub min_points: usize,
    /// Maximum entries per quadtree node before subdivision
    /// Default: 64
    pub max_points_per_node: usize,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            radius: 60.0,
            extent: 512.0,
            min_zoom: 0,
            max_zoom: 19,
            min_points: 2,
            max_points_per_node: 64,
        }
    }
}

impl ClusterConfig {
    /// Check the configuration for values the index cannot be built with
    pub fn validate(&self) -> Result<()> {
        if self.max_zoom > MAX_SUPPORTED_ZOOM {
            return Err(DataError::InvalidConfig(format!(
                "max_zoom {} exceeds {}",
                self.max_zoom, MAX_SUPPORTED_ZOOM
            )));
        }
        if self.min_zoom > self.max_zoom {
            return Err(DataError::InvalidConfig(format!(
                "min_zoom {} is greater than max_zoom {}",
                self.min_zoom, self.max_zoom
            )));
        }
        if !(self.radius.is_finite() && self.radius > 0.0) {
            return Err(DataError::InvalidConfig(format!(
                "radius must be positive, got {}",
                self.radius
            )));
        }
        if !(self.extent.is_finite() && self.extent > 0.0) {
            return Err(DataError::InvalidConfig(format!(
                "extent must be positive, got {}",
                self.extent
            )));
        }
        if self.min_points < 2 {
            return Err(DataError::InvalidConfig(format!(
                "min_points must be at least 2, got {}",
                self.min_points
            )));
        }
        if self.max_points_per_node == 0 {
            return Err(DataError::InvalidConfig(
                "max_points_per_node must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Stable identity of a cluster node within one build of the index
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(transparent))]
pub struct ClusterId(pub u64);

impl std::fmt::Display for ClusterId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Whether a node is a single point or a merged group
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum NodeKind {
    /// A single point, by index into the point store
    Leaf { point: usize },
    /// A merged group whose children first appear at `children_zoom`
    Cluster { children_zoom: u8 },
}

/// One node of a zoom level as returned to callers
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ClusterNode {
    pub id: ClusterId,
    /// Centroid latitude (exact point latitude for leaves)
    pub lat: f64,
    /// Centroid longitude (exact point longitude for leaves)
    pub lng: f64,
    /// Number of points represented
    pub count: usize,
    pub kind: NodeKind,
}

impl ClusterNode {
    #[inline]
    pub fn is_cluster(&self) -> bool {
        matches!(self.kind, NodeKind::Cluster { .. })
    }

    /// Point index for leaves
    #[inline]
    pub fn point_index(&self) -> Option<usize> {
        match self.kind {
            NodeKind::Leaf { point } => Some(point),
            NodeKind::Cluster { .. } => None,
        }
    }
}

/// A node inside a level
#[derive(Debug, Clone, Copy)]
struct LevelEntry {
    id: u64,
    lat: f64,
    lng: f64,
    count: usize,
}

/// All nodes at one zoom, with their world positions and a spatial index over them
#[derive(Debug, Clone)]
struct ZoomLevel {
    zoom: u8,
    entries: Vec<LevelEntry>,
    positions: Vec<Coord<f64>>,
    tree: Quadtree,
}

impl ZoomLevel {
    fn new(
        zoom: u8,
        entries: Vec<LevelEntry>,
        positions: Vec<Coord<f64>>,
        max_items: usize,
    ) -> Self {
        let tree = Quadtree::build(&positions, max_items);
        Self {
            zoom,
            entries,
            positions,
            tree,
        }
    }
}

/// A merged group, recorded once when it is formed
#[derive(Debug, Clone)]
struct ClusterRecord {
    lat: f64,
    lng: f64,
    count: usize,
    /// Indices of the merged nodes in the children level, seed first
    children: Vec<u32>,
}

/// The built per-zoom cluster hierarchy
///
/// Immutable after construction; every query is a pure function of the index and its
/// arguments.
#[derive(Debug, Clone)]
pub struct ClusterIndex {
    config: ClusterConfig,
    point_count: usize,
    /// Levels ordered from `min_zoom` to `max_zoom`
    levels: Vec<ZoomLevel>,
    clusters: HashMap<u64, ClusterRecord>,
}

/// Incremental construction, one zoom level per step
struct IndexBuilder {
    config: ClusterConfig,
    point_count: usize,
    /// Levels built so far, finest first
    levels: Vec<ZoomLevel>,
    clusters: HashMap<u64, ClusterRecord>,
}

impl IndexBuilder {
    fn new(store: &PointStore, config: ClusterConfig) -> Result<Self> {
        config.validate()?;

        let mut entries = Vec::with_capacity(store.len());
        let mut positions = Vec::with_capacity(store.len());
        for (index, point) in store.iter().enumerate() {
            entries.push(LevelEntry {
                id: index as u64,
                lat: point.lat(),
                lng: point.lng(),
                count: 1,
            });
            positions.push(project(point.lat(), point.lng()));
        }

        let finest = ZoomLevel::new(
            config.max_zoom,
            entries,
            positions,
            config.max_points_per_node,
        );
        tracing::debug!(
            "Built zoom level {} with {} nodes",
            config.max_zoom,
            finest.entries.len()
        );

        let levels_total = usize::from(config.max_zoom - config.min_zoom) + 1;
        let mut levels = Vec::with_capacity(levels_total);
        levels.push(finest);

        Ok(Self {
            config,
            point_count: store.len(),
            levels,
            clusters: HashMap::new(),
        })
    }

    /// Zoom of the next level to build, `None` when complete
    fn next_zoom(&self) -> Option<u8> {
        let last = self.levels.last()?.zoom;
        (last > self.config.min_zoom).then(|| last - 1)
    }

    /// Build the next coarser level; returns `false` once every level exists
    fn step(&mut self) -> bool {
        let Some(zoom) = self.next_zoom() else {
            return false;
        };
        let Some(finer) = self.levels.last() else {
            return false;
        };
        profiling::scope!("build_zoom_level");

        let radius = pixel_radius_to_world(self.config.radius, self.config.extent, zoom);
        let children_zoom = u64::from(finer.zoom);

        let len = finer.entries.len();
        let mut taken = vec![false; len];
        let mut entries = Vec::with_capacity(len);
        let mut positions = Vec::with_capacity(len);
        let mut neighbors = Vec::new();

        for i in 0..len {
            if taken[i] {
                continue;
            }
            taken[i] = true;

            let seed = finer.entries[i];
            let seed_position = finer.positions[i];

            neighbors.clear();
            finer
                .tree
                .within(seed_position, radius, &finer.positions, &mut neighbors);
            // Input order decides which node absorbs which
            neighbors.sort_unstable();
            neighbors.retain(|&j| !taken[j as usize]);

            let count: usize = seed.count
                + neighbors
                    .iter()
                    .map(|&j| finer.entries[j as usize].count)
                    .sum::<usize>();

            if !neighbors.is_empty() && count >= self.config.min_points {
                let weight = seed.count as f64;
                let mut lat = seed.lat * weight;
                let mut lng = seed.lng * weight;
                let mut x = seed_position.x * weight;
                let mut y = seed_position.y * weight;

                for &j in &neighbors {
                    let j = j as usize;
                    taken[j] = true;
                    let neighbor = finer.entries[j];
                    let weight = neighbor.count as f64;
                    lat += neighbor.lat * weight;
                    lng += neighbor.lng * weight;
                    x += finer.positions[j].x * weight;
                    y += finer.positions[j].y * weight;
                }

                let total = count as f64;
                let id = self.point_count as u64 + ((i as u64) << ZOOM_BITS) + children_zoom;
                let lat = lat / total;
                let lng = lng / total;

                let mut children = Vec::with_capacity(neighbors.len() + 1);
                children.push(i as u32);
                children.extend_from_slice(&neighbors);

                self.clusters.insert(
                    id,
                    ClusterRecord {
                        lat,
                        lng,
                        count,
                        children,
                    },
                );
                entries.push(LevelEntry { id, lat, lng, count });
                positions.push(Coord {
                    x: x / total,
                    y: y / total,
                });
            } else {
                entries.push(seed);
                positions.push(seed_position);

                // Too few points for a cluster: neighbors pass through unchanged
                for &j in &neighbors {
                    let j = j as usize;
                    taken[j] = true;
                    entries.push(finer.entries[j]);
                    positions.push(finer.positions[j]);
                }
            }
        }

        let level = ZoomLevel::new(zoom, entries, positions, self.config.max_points_per_node);
        tracing::debug!("Built zoom level {} with {} nodes", zoom, level.entries.len());
        self.levels.push(level);
        true
    }

    fn finish(mut self) -> ClusterIndex {
        self.levels.reverse();
        ClusterIndex {
            config: self.config,
            point_count: self.point_count,
            levels: self.levels,
            clusters: self.clusters,
        }
    }
}

impl ClusterIndex {
    /// Build the complete index from a point store
    ///
    /// Deterministic: identical stores and configurations produce identical node
    /// identities and ordering.
    pub fn build(store: &PointStore, config: ClusterConfig) -> Result<Self> {
        profiling::scope!("build_cluster_index");
        let mut builder = IndexBuilder::new(store, config)?;
        while builder.step() {}
        Ok(builder.finish())
    }

    /// Build the index, yielding to the runtime between zoom levels
    ///
    /// Returns `Ok(None)` as soon as `is_current` reports that the build is no longer
    /// wanted. The partially built index is dropped.
    pub async fn build_cooperative<C>(
        store: &PointStore,
        config: ClusterConfig,
        is_current: C,
    ) -> Result<Option<Self>>
    where
        C: Fn() -> bool,
    {
        let mut builder = IndexBuilder::new(store, config)?;
        loop {
            tokio::task::yield_now().await;
            if !is_current() {
                return Ok(None);
            }
            if !builder.step() {
                break;
            }
        }
        Ok(Some(builder.finish()))
    }

    /// Get the configuration the index was built with
    #[inline]
    pub fn config(&self) -> &ClusterConfig {
        &self.config
    }

    /// Number of points indexed
    #[inline]
    pub fn point_count(&self) -> usize {
        self.point_count
    }

    #[inline]
    pub fn min_zoom(&self) -> u8 {
        self.config.min_zoom
    }

    #[inline]
    pub fn max_zoom(&self) -> u8 {
        self.config.max_zoom
    }

    /// Number of nodes at a zoom (clamped)
    pub fn level_len(&self, zoom: f64) -> usize {
        self.level(self.clamp_zoom(zoom))
            .map_or(0, |level| level.tree.len())
    }

    /// Map a requested zoom onto a built level
    ///
    /// Fractional zooms are floored, out-of-range zooms are clamped, and NaN selects the
    /// coarsest level.
    pub fn clamp_zoom(&self, zoom: f64) -> u8 {
        if zoom.is_nan() {
            return self.config.min_zoom;
        }
        zoom.floor()
            .clamp(f64::from(self.config.min_zoom), f64::from(self.config.max_zoom)) as u8
    }

    fn level(&self, zoom: u8) -> Option<&ZoomLevel> {
        let offset = zoom.checked_sub(self.config.min_zoom)?;
        self.levels.get(usize::from(offset))
    }

    /// Nodes whose position at `zoom` lies inside the viewport
    ///
    /// Results follow the level's construction order, and no point is represented twice.
    pub fn query(&self, viewport: &ViewportBox, zoom: f64) -> Vec<ClusterNode> {
        profiling::scope!("query_viewport");
        let Some(level) = self.level(self.clamp_zoom(zoom)) else {
            return Vec::new();
        };

        let mut hits = Vec::new();
        for rect in viewport.to_world_rects() {
            level.tree.range(rect, &level.positions, &mut hits);
        }
        hits.sort_unstable();
        hits.dedup();

        hits.into_iter()
            .map(|i| self.entry_node(level.entries[i as usize]))
            .collect()
    }

    fn entry_node(&self, entry: LevelEntry) -> ClusterNode {
        ClusterNode {
            id: ClusterId(entry.id),
            lat: entry.lat,
            lng: entry.lng,
            count: entry.count,
            kind: self.kind_of(entry.id),
        }
    }

    fn kind_of(&self, id: u64) -> NodeKind {
        match self.children_zoom(id) {
            Some(children_zoom) => NodeKind::Cluster { children_zoom },
            None => NodeKind::Leaf { point: id as usize },
        }
    }

    /// Zoom encoded in a cluster identity, `None` for leaves
    fn children_zoom(&self, id: u64) -> Option<u8> {
        let offset = id.checked_sub(self.point_count as u64)?;
        Some((offset & ZOOM_MASK) as u8)
    }

    /// Resolve any node identity of this build
    pub fn node(&self, id: ClusterId) -> Option<ClusterNode> {
        if (id.0 as usize) < self.point_count {
            let leaves = self.level(self.config.max_zoom)?;
            return Some(self.entry_node(*leaves.entries.get(id.0 as usize)?));
        }
        let record = self.clusters.get(&id.0)?;
        Some(ClusterNode {
            id,
            lat: record.lat,
            lng: record.lng,
            count: record.count,
            kind: self.kind_of(id.0),
        })
    }

    /// Zoom at which a node's members first appear as separate nodes
    ///
    /// A cluster always merges at least two nodes, so its members are already apart at
    /// the level its children live at. Leaves cannot expand further and report
    /// `max_zoom`. Unknown identities yield `None`.
    pub fn expansion_zoom(&self, id: ClusterId) -> Option<u8> {
        if (id.0 as usize) < self.point_count {
            return Some(self.config.max_zoom);
        }

        let record = self.clusters.get(&id.0)?;
        debug_assert!(record.children.len() >= 2, "cluster {id} has a lone child");
        let zoom = self.children_zoom(id.0)?;
        Some(zoom.min(self.config.max_zoom))
    }

    /// Nodes merged into a cluster, one level finer than where it was formed
    ///
    /// Leaves have no children. Unknown identities yield `None`.
    pub fn children(&self, id: ClusterId) -> Option<Vec<ClusterNode>> {
        if (id.0 as usize) < self.point_count {
            return Some(Vec::new());
        }
        let record = self.clusters.get(&id.0)?;
        let level = self.level(self.children_zoom(id.0)?)?;
        record
            .children
            .iter()
            .map(|&i| level.entries.get(i as usize).map(|&e| self.entry_node(e)))
            .collect()
    }

    /// Point indices under a node, paginated
    ///
    /// Points are listed depth-first in merge order. Skips `offset` points and returns
    /// at most `limit`. Unknown identities yield `None`.
    pub fn leaves(&self, id: ClusterId, limit: usize, offset: usize) -> Option<Vec<usize>> {
        if (id.0 as usize) < self.point_count {
            let single = (offset == 0 && limit > 0).then_some(id.0 as usize);
            return Some(single.into_iter().collect());
        }
        if !self.clusters.contains_key(&id.0) {
            return None;
        }

        let mut result = Vec::new();
        let mut skipped = 0;
        let mut stack = vec![id.0];

        while let Some(current) = stack.pop() {
            if result.len() >= limit {
                break;
            }

            let Some(record) = self.clusters.get(&current) else {
                // Leaf
                if skipped < offset {
                    skipped += 1;
                } else {
                    result.push(current as usize);
                }
                continue;
            };

            // Whole subtree lies before the requested page
            if skipped + record.count <= offset {
                skipped += record.count;
                continue;
            }

            let level = self.level(self.children_zoom(current)?)?;
            for &child in record.children.iter().rev() {
                stack.push(level.entries.get(child as usize)?.id);
            }
        }

        Some(result)
    }
}
