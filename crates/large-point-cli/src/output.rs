//! JSON report written to stdout

use crate::settings::Settings;
use large_point_lib::{
    ClusterId, ClusterNode, MapSession, Navigation, Point, SessionInfo, ViewportBox,
    ViewportSummary, Visible, ZoomTarget,
};
use serde::Serialize;

/// One rendered node
#[derive(Debug, Serialize)]
pub struct NodeReport<'a> {
    #[serde(flatten)]
    pub node: &'a ClusterNode,
    /// Zoom a click on the cluster jumps to
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expansion_zoom: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub point: Option<&'a Point>,
}

#[derive(Debug, Serialize)]
pub struct ViewportReport<'a> {
    pub bbox: ViewportBox,
    pub zoom: u8,
    pub status: String,
    pub summary: ViewportSummary,
    pub nodes: Vec<NodeReport<'a>>,
}

#[derive(Debug, Serialize)]
pub struct LeavesReport<'a> {
    pub id: ClusterId,
    pub limit: usize,
    pub offset: usize,
    pub points: Option<Vec<&'a Point>>,
}

/// Everything the host was asked for
#[derive(Debug, Serialize)]
pub struct Report<'a> {
    pub session: SessionInfo,
    pub viewport: ViewportReport<'a>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lookup: Option<Option<Navigation>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expand: Option<Option<ZoomTarget>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub leaves: Option<LeavesReport<'a>>,
}

impl<'a> Report<'a> {
    /// Answer the requests in `settings` against a session
    ///
    /// `nodes` must be the result of querying `session` with the settings' viewport.
    pub fn new(session: &'a MapSession, nodes: &'a [ClusterNode], settings: &Settings) -> Self {
        profiling::scope!("build_report");
        let visible = session.visible(nodes, &settings.status);
        let summary = session.summary(&visible);

        let nodes = visible
            .iter()
            .map(|v| match *v {
                Visible::Cluster(node) => NodeReport {
                    node,
                    expansion_zoom: session.expansion_zoom(node.id),
                    point: None,
                },
                Visible::Point { node, point } => NodeReport {
                    node,
                    expansion_zoom: None,
                    point: Some(point),
                },
            })
            .collect();

        let lookup = settings.lookup.as_deref().map(|identifier| {
            let navigation = session.navigate_to(identifier, settings.zoom);
            if navigation.is_none() {
                tracing::warn!("No record with identifier {:?}", identifier);
            }
            navigation
        });

        let expand = settings.expand.map(|id| {
            let target = session.zoom_into(ClusterId(id));
            if target.is_none() {
                tracing::warn!("Unknown cluster id {}", id);
            }
            target
        });

        let leaves = settings.leaves.map(|id| LeavesReport {
            id: ClusterId(id),
            limit: settings.limit,
            offset: settings.offset,
            points: session.leaves(ClusterId(id), settings.limit, settings.offset),
        });

        Self {
            session: session.info(),
            viewport: ViewportReport {
                bbox: settings.viewport(),
                zoom: session.index().clamp_zoom(settings.zoom),
                status: settings.status.to_string(),
                summary,
                nodes,
            },
            lookup,
            expand,
            leaves,
        }
    }
}
