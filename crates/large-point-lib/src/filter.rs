//! Status filtering of query results
//!
//! Filtering is layered strictly after [`ClusterIndex::query`](crate::ClusterIndex::query)
//! and applies to individual points only. Merged clusters always pass, so a cluster's
//! count may include points that would be hidden individually.

use crate::{ClusterNode, NodeKind, Point, PointStore};
use std::convert::Infallible;
use std::str::FromStr;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Value of the status filter
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum StatusFilter {
    /// Every point passes
    #[default]
    All,
    /// Only points whose status equals the value pass
    Only(String),
}

impl StatusFilter {
    /// Check a point status against the filter
    ///
    /// A missing status compares as the empty string.
    #[inline]
    pub fn matches(&self, status: Option<&str>) -> bool {
        match self {
            StatusFilter::All => true,
            StatusFilter::Only(value) => status.unwrap_or("") == value,
        }
    }
}

impl FromStr for StatusFilter {
    type Err = Infallible;

    /// `"all"` selects [`StatusFilter::All`], any other value is matched exactly
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(if s == "all" {
            StatusFilter::All
        } else {
            StatusFilter::Only(s.to_string())
        })
    }
}

impl std::fmt::Display for StatusFilter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StatusFilter::All => write!(f, "all"),
            StatusFilter::Only(value) => write!(f, "{value}"),
        }
    }
}

/// A node that survived filtering, ready for rendering
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Visible<'a> {
    Cluster(&'a ClusterNode),
    Point {
        node: &'a ClusterNode,
        point: &'a Point,
    },
}

impl<'a> Visible<'a> {
    /// The underlying query node
    #[inline]
    pub fn node(&self) -> &'a ClusterNode {
        match self {
            Visible::Cluster(node) | Visible::Point { node, .. } => node,
        }
    }
}

/// Drop leaves whose status does not pass the filter
///
/// Clusters are kept unconditionally. Leaves that do not resolve to a point of
/// `store` are dropped.
pub fn apply_status_filter<'a>(
    nodes: &'a [ClusterNode],
    store: &'a PointStore,
    filter: &StatusFilter,
) -> Vec<Visible<'a>> {
    nodes
        .iter()
        .filter_map(|node| match node.kind {
            NodeKind::Cluster { .. } => Some(Visible::Cluster(node)),
            NodeKind::Leaf { point } => {
                let point = store.get(point)?;
                filter
                    .matches(point.status())
                    .then_some(Visible::Point { node, point })
            }
        })
        .collect()
}

/// Counts shown next to the map after a render
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ViewportSummary {
    /// Clusters rendered
    pub clusters: usize,
    /// Individual points rendered
    pub points: usize,
    /// Points in the whole dataset
    pub total_points: usize,
}

impl ViewportSummary {
    pub fn new(visible: &[Visible<'_>], total_points: usize) -> Self {
        let clusters = visible
            .iter()
            .filter(|v| matches!(v, Visible::Cluster(_)))
            .count();
        Self {
            clusters,
            points: visible.len() - clusters,
            total_points,
        }
    }
}
