//! Load sessions and their lifecycle
//!
//! A [`MapSession`] bundles one point store with the cluster index built from it. The
//! [`SessionManager`] runs loads, discards the results of superseded loads, and publishes
//! a session only once its index is completely built.

use crate::{
    ClusterConfig, ClusterId, ClusterIndex, ClusterNode, DataError, GeoBounds, IngestConfig,
    IngestStats, Ingested, Point, PointStore, Result, RowSource, StatusFilter, ViewportBox,
    ViewportSummary, Visible, apply_status_filter, ingest,
};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tokio::sync::watch;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Configuration for a full load: ingestion, clustering and navigation
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Config {
    pub cluster: ClusterConfig,
    pub ingest: IngestConfig,
    /// Minimum zoom used when navigating to a looked-up record
    /// Default: 16
    pub focus_zoom: u8,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            cluster: ClusterConfig::default(),
            ingest: IngestConfig::default(),
            focus_zoom: 16,
        }
    }
}

impl Config {
    pub fn validate(&self) -> Result<()> {
        self.cluster.validate()?;
        if self.ingest.progress_interval == 0 {
            return Err(DataError::InvalidConfig(
                "progress_interval must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Where the map should move after a cluster is activated
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ZoomTarget {
    pub lat: f64,
    pub lng: f64,
    pub zoom: u8,
}

/// Where the map should move to show a looked-up record
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Navigation {
    pub point: Point,
    pub zoom: u8,
}

/// Summary of a published session
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct SessionInfo {
    pub generation: u64,
    pub total_points: usize,
    pub processed_rows: usize,
    pub skipped_rows: usize,
    pub identifiers: usize,
    pub bounds: Option<GeoBounds>,
    pub min_zoom: u8,
    pub max_zoom: u8,
}

/// One loaded dataset: a point store and the index built from it
///
/// Immutable; a reload produces a new session instead of patching this one.
#[derive(Debug)]
pub struct MapSession {
    generation: u64,
    store: PointStore,
    index: ClusterIndex,
    stats: IngestStats,
    focus_zoom: u8,
}

impl MapSession {
    /// Assemble a session from an ingested store and its index
    pub fn new(generation: u64, ingested: Ingested, index: ClusterIndex, focus_zoom: u8) -> Self {
        Self {
            generation,
            store: ingested.store,
            index,
            stats: ingested.stats,
            focus_zoom,
        }
    }

    /// Build the index for an ingested store without yielding
    pub fn build(ingested: Ingested, config: &Config) -> Result<Self> {
        config.validate()?;
        let index = ClusterIndex::build(&ingested.store, config.cluster)?;
        Ok(Self::new(0, ingested, index, config.focus_zoom))
    }

    #[inline]
    pub fn generation(&self) -> u64 {
        self.generation
    }

    #[inline]
    pub fn store(&self) -> &PointStore {
        &self.store
    }

    #[inline]
    pub fn index(&self) -> &ClusterIndex {
        &self.index
    }

    #[inline]
    pub fn stats(&self) -> IngestStats {
        self.stats
    }

    pub fn bounds(&self) -> Option<GeoBounds> {
        self.store.bounds()
    }

    /// Nodes visible in a viewport at a zoom
    pub fn query(&self, viewport: &ViewportBox, zoom: f64) -> Vec<ClusterNode> {
        self.index.query(viewport, zoom)
    }

    /// Apply the status filter to query results
    pub fn visible<'a>(
        &'a self,
        nodes: &'a [ClusterNode],
        filter: &StatusFilter,
    ) -> Vec<Visible<'a>> {
        apply_status_filter(nodes, &self.store, filter)
    }

    /// Counts for a rendered viewport
    pub fn summary(&self, visible: &[Visible<'_>]) -> ViewportSummary {
        ViewportSummary::new(visible, self.store.len())
    }

    pub fn expansion_zoom(&self, id: ClusterId) -> Option<u8> {
        self.index.expansion_zoom(id)
    }

    /// Centroid and expansion zoom of a node, for "zoom into cluster"
    pub fn zoom_into(&self, id: ClusterId) -> Option<ZoomTarget> {
        let node = self.index.node(id)?;
        let zoom = self.index.expansion_zoom(id)?;
        Some(ZoomTarget {
            lat: node.lat,
            lng: node.lng,
            zoom: zoom.min(self.index.max_zoom()),
        })
    }

    pub fn lookup(&self, identifier: &str) -> Option<&Point> {
        self.store.lookup(identifier)
    }

    /// Target for "go to record": the point and a zoom close enough to single it out
    ///
    /// The zoom is never lowered below `current_zoom` and never exceeds `max_zoom`.
    pub fn navigate_to(&self, identifier: &str, current_zoom: f64) -> Option<Navigation> {
        let point = self.store.lookup(identifier)?;
        let zoom = self
            .index
            .clamp_zoom(current_zoom)
            .max(self.focus_zoom)
            .min(self.index.max_zoom());
        Some(Navigation {
            point: point.clone(),
            zoom,
        })
    }

    /// The point behind a leaf node
    pub fn point(&self, node: &ClusterNode) -> Option<&Point> {
        self.store.get(node.point_index()?)
    }

    pub fn children(&self, id: ClusterId) -> Option<Vec<ClusterNode>> {
        self.index.children(id)
    }

    /// Points merged into a node, paginated
    pub fn leaves(&self, id: ClusterId, limit: usize, offset: usize) -> Option<Vec<&Point>> {
        let indices = self.index.leaves(id, limit, offset)?;
        indices.into_iter().map(|i| self.store.get(i)).collect()
    }

    pub fn info(&self) -> SessionInfo {
        SessionInfo {
            generation: self.generation,
            total_points: self.store.len(),
            processed_rows: self.stats.processed_rows,
            skipped_rows: self.stats.skipped_rows,
            identifiers: self.store.identifier_count(),
            bounds: self.store.bounds(),
            min_zoom: self.index.min_zoom(),
            max_zoom: self.index.max_zoom(),
        }
    }
}

/// Lifecycle signal of one load
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum LoadEvent {
    Started,
    /// Rows processed so far, monotonically increasing
    Progress(usize),
    /// Points accepted into the published session
    Completed(usize),
    /// Pipeline-level failure; the previous session stays visible
    Failed(String),
}

/// Result of a load that did not fail
#[derive(Debug, Clone)]
pub enum LoadOutcome {
    Published(Arc<MapSession>),
    /// A newer load began first; nothing was published
    Superseded,
}

/// Claim on the right to publish, invalidated by any later load
#[derive(Debug, Clone)]
pub struct LoadTicket {
    generation: u64,
    latest: Arc<AtomicU64>,
}

impl LoadTicket {
    #[inline]
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Check that no newer load has begun
    #[inline]
    pub fn is_current(&self) -> bool {
        self.latest.load(Ordering::Acquire) == self.generation
    }
}

/// Owner of the current session
///
/// Every load takes a new generation. A load whose generation is no longer the latest
/// stops at its next suspension point and never publishes.
#[derive(Debug)]
pub struct SessionManager {
    config: Config,
    latest: Arc<AtomicU64>,
    current: watch::Sender<Option<Arc<MapSession>>>,
}

impl SessionManager {
    pub fn new(config: Config) -> Result<Self> {
        config.validate()?;
        if config.focus_zoom > config.cluster.max_zoom {
            tracing::warn!(
                "Focus zoom {} exceeds max zoom {}, navigation will be clamped",
                config.focus_zoom,
                config.cluster.max_zoom
            );
        }

        let (current, _) = watch::channel(None);
        Ok(Self {
            config,
            latest: Arc::new(AtomicU64::new(0)),
            current,
        })
    }

    #[inline]
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// The published session, if any load has completed
    pub fn current(&self) -> Option<Arc<MapSession>> {
        self.current.borrow().clone()
    }

    /// Observe session replacement
    pub fn subscribe(&self) -> watch::Receiver<Option<Arc<MapSession>>> {
        self.current.subscribe()
    }

    /// Latest generation handed out
    pub fn generation(&self) -> u64 {
        self.latest.load(Ordering::Acquire)
    }

    /// Start a new load, superseding every earlier one
    pub fn begin_load(&self) -> LoadTicket {
        let generation = self.latest.fetch_add(1, Ordering::AcqRel) + 1;
        LoadTicket {
            generation,
            latest: Arc::clone(&self.latest),
        }
    }

    /// Load a row source and publish the resulting session
    pub async fn load<S, F>(&self, source: S, on_event: F) -> Result<LoadOutcome>
    where
        S: RowSource,
        F: FnMut(LoadEvent),
    {
        let ticket = self.begin_load();
        self.run_load(ticket, source, on_event).await
    }

    /// Run a load that was started with [`SessionManager::begin_load`]
    ///
    /// Emits `Started`, `Progress` and then `Completed` or `Failed`. Once the ticket is
    /// superseded no further events are emitted and [`LoadOutcome::Superseded`] is
    /// returned, even if the source later fails.
    pub async fn run_load<S, F>(
        &self,
        ticket: LoadTicket,
        source: S,
        mut on_event: F,
    ) -> Result<LoadOutcome>
    where
        S: RowSource,
        F: FnMut(LoadEvent),
    {
        let generation = ticket.generation();
        if !ticket.is_current() {
            tracing::warn!("Load {} superseded before it started", generation);
            return Ok(LoadOutcome::Superseded);
        }

        tracing::info!("Load {} started", generation);
        on_event(LoadEvent::Started);
        let start = Instant::now();

        let ingested = ingest(
            source,
            &self.config.ingest,
            |processed| on_event(LoadEvent::Progress(processed)),
            || ticket.is_current(),
        )
        .await;

        let ingested = match ingested {
            Ok(Some(ingested)) if ticket.is_current() => ingested,
            Ok(_) => return Ok(self.superseded(generation)),
            Err(_) if !ticket.is_current() => return Ok(self.superseded(generation)),
            Err(err) => {
                tracing::error!("Load {} failed: {}", generation, err);
                on_event(LoadEvent::Failed(err.to_string()));
                return Err(err);
            }
        };

        tracing::info!(
            "Load {} ingested {} points ({} rows skipped) in {:?}",
            generation,
            ingested.stats.accepted_points,
            ingested.stats.skipped_rows,
            start.elapsed()
        );

        let index = ClusterIndex::build_cooperative(&ingested.store, self.config.cluster, || {
            ticket.is_current()
        })
        .await;

        let index = match index {
            Ok(Some(index)) if ticket.is_current() => index,
            Ok(_) => return Ok(self.superseded(generation)),
            Err(_) if !ticket.is_current() => return Ok(self.superseded(generation)),
            Err(err) => {
                tracing::error!("Load {} failed: {}", generation, err);
                on_event(LoadEvent::Failed(err.to_string()));
                return Err(err);
            }
        };

        let total = ingested.store.len();
        let session = Arc::new(MapSession::new(
            generation,
            ingested,
            index,
            self.config.focus_zoom,
        ));
        self.current.send_replace(Some(Arc::clone(&session)));

        tracing::info!(
            "Load {} published {} points in {:?}",
            generation,
            total,
            start.elapsed()
        );
        on_event(LoadEvent::Completed(total));
        Ok(LoadOutcome::Published(session))
    }

    fn superseded(&self, generation: u64) -> LoadOutcome {
        tracing::warn!(
            "Load {} superseded by load {}, discarding its results",
            generation,
            self.generation()
        );
        LoadOutcome::Superseded
    }
}
