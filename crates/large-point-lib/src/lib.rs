//! Large Point Library - Clustered Viewport Index for Geolocated Records
//!
//! This library ingests large, possibly malformed tabular datasets of geolocated records
//! and serves them to an interactive map viewport as a hierarchy of pre-aggregated clusters.
//! The core data structure is a per-zoom-level quadtree of cluster nodes, built once per
//! dataset load and queried on every pan/zoom.
//!
//! # Architecture
//!
//! - **[`PointStore`]**: Append-only, identifier-indexed collection of normalized points
//! - **[`ingest`]**: Cooperative row ingestion with alias-based column resolution
//! - **[`ClusterIndex`]**: One greedily merged level per integer zoom, coarsest to finest
//! - **[`MapSession`]**: Immutable handle holding one store + one index for queries
//! - **[`SessionManager`]**: Load lifecycle, supersession of stale loads, publication
//!
//! # Performance Characteristics
//!
//! - **Build Time**: O(N × L × log N) for N points over L zoom levels
//! - **Query Time**: O(log N + K) per viewport where K = returned nodes
//! - **Memory**: O(N × L) cluster entries in the worst case

mod columns;
mod filter;
mod index;
mod ingest;
mod point;
mod quadtree;
mod session;
mod source;
pub mod projection;

// Public API exports
pub use columns::{ColumnAliases, Field, ResolvedColumns};
pub use filter::{StatusFilter, ViewportSummary, Visible, apply_status_filter};
pub use index::{ClusterConfig, ClusterId, ClusterIndex, ClusterNode, NodeKind};
pub use ingest::{
    IngestConfig, IngestStats, Ingested, Ingestor, coerce_coordinate, coerce_text, ingest,
    ingest_blocking, normalize_row,
};
pub use point::{GeoBounds, Point, PointAttributes, PointStore, PointStoreBuilder};
pub use projection::ViewportBox;
pub use session::{
    Config, LoadEvent, LoadOutcome, LoadTicket, MapSession, Navigation, SessionInfo,
    SessionManager, ZoomTarget,
};
pub use source::{CsvRowSource, IterRowSource, RawRow, RowSource};

/// Error types for pipeline-level failures
///
/// Row-level defects never surface here; they are counted in [`IngestStats`].
#[derive(Debug, thiserror::Error)]
pub enum DataError {
    #[error("CSV parsing error: {0}")]
    Csv(#[from] csv::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Row source error: {0}")]
    Source(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

pub type Result<T> = std::result::Result<T, DataError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_public_exports() {
        // Verify that all public types are accessible
        let _: fn() -> Config = Config::default;
        let _: fn(Config) -> Result<SessionManager> = SessionManager::new;
        let _: fn() -> PointStoreBuilder = PointStoreBuilder::new;
    }

    #[test]
    fn test_error_display() {
        let err = DataError::InvalidConfig("max_zoom too large".to_string());
        assert_eq!(
            err.to_string(),
            "Invalid configuration: max_zoom too large"
        );
    }
}
