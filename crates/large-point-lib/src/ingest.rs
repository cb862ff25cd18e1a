//! Ingestion pipeline: raw rows -> normalized points
//!
//! Rows are resolved against the load's [`ResolvedColumns`], coordinates are coerced to
//! numbers, and a [`Point`] is emitted only when both coordinates are finite. Malformed
//! rows are counted and dropped; only failures of the row source abort a load.

use crate::{
    ColumnAliases, Field, Point, PointAttributes, PointStore, PointStoreBuilder, RawRow,
    ResolvedColumns, Result, RowSource,
};
use serde_json::Value;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Configuration for the ingestion pipeline
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct IngestConfig {
    /// Column aliases per logical field
    pub aliases: ColumnAliases,
    /// Rows processed between progress reports (and cooperative yields)
    /// Default: 5000
    pub progress_interval: usize,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            aliases: ColumnAliases::default(),
            progress_interval: 5000,
        }
    }
}

/// Row counters for one load
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct IngestStats {
    /// Rows read from the source
    pub processed_rows: usize,
    /// Rows that produced a point
    pub accepted_points: usize,
    /// Rows dropped for missing or non-finite coordinates
    pub skipped_rows: usize,
}

/// Result of a completed ingestion
#[derive(Debug)]
pub struct Ingested {
    pub store: PointStore,
    pub stats: IngestStats,
}

/// Coerce a raw value into a coordinate
///
/// Numbers are taken as-is, strings are trimmed and parsed. Missing, empty, null,
/// boolean and structured values yield `None`, as does anything non-finite.
pub fn coerce_coordinate(value: Option<&Value>) -> Option<f64> {
    let number = match value? {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => {
            let s = s.trim();
            if s.is_empty() {
                return None;
            }
            s.parse::<f64>().ok()?
        }
        Value::Null | Value::Bool(_) | Value::Array(_) | Value::Object(_) => return None,
    };
    number.is_finite().then_some(number)
}

/// Coerce a raw value into an optional text attribute
///
/// Strings are trimmed, numbers and booleans are stringified, and empty results are
/// treated as absent.
pub fn coerce_text(value: Option<&Value>) -> Option<String> {
    let text = match value? {
        Value::String(s) => s.trim().to_string(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Null | Value::Array(_) | Value::Object(_) => return None,
    };
    (!text.is_empty()).then_some(text)
}

/// Normalize a single row into a point
///
/// Returns `None` for rows without two finite coordinates.
pub fn normalize_row(row: &RawRow, columns: &ResolvedColumns) -> Option<Point> {
    let lat = coerce_coordinate(columns.get(row, Field::Latitude))?;
    let lng = coerce_coordinate(columns.get(row, Field::Longitude))?;

    let attributes = PointAttributes {
        address: coerce_text(columns.get(row, Field::Address)),
        status: coerce_text(columns.get(row, Field::Status)),
        external_link: coerce_text(columns.get(row, Field::ExternalLink)),
    };

    Point::new(
        coerce_text(columns.get(row, Field::Identifier)),
        lat,
        lng,
        attributes,
    )
}

/// How the columns of a load are resolved
enum Columns {
    /// The source declared a header: resolved once up front
    Declared(ResolvedColumns),
    /// No header: resolved per row, cached for the last key set seen
    PerRow {
        keys: Vec<String>,
        resolved: ResolvedColumns,
    },
}

/// Incremental row-to-store state for one load
pub struct Ingestor<'c> {
    config: &'c IngestConfig,
    columns: Columns,
    builder: PointStoreBuilder,
    stats: IngestStats,
}

impl<'c> Ingestor<'c> {
    /// Create an ingestor, resolving columns up front when the source declares them
    ///
    /// Without declared columns every row is resolved against its own keys, so a sparse
    /// or malformed row never decides the schema of the rows after it.
    pub fn new(config: &'c IngestConfig, columns: Option<&[String]>) -> Self {
        let columns = match columns {
            Some(cols) => Columns::Declared(Self::resolve_header(config, cols)),
            None => Columns::PerRow {
                keys: Vec::new(),
                resolved: ResolvedColumns::default(),
            },
        };
        Self {
            config,
            columns,
            builder: PointStoreBuilder::new(),
            stats: IngestStats::default(),
        }
    }

    fn resolve_header(config: &IngestConfig, header: &[String]) -> ResolvedColumns {
        let resolved = config.aliases.resolve(header.iter().map(String::as_str));
        if !resolved.has_coordinates() {
            tracing::warn!(
                "No coordinate columns found (latitude: {:?}, longitude: {:?}); every row will be skipped",
                resolved.column(Field::Latitude),
                resolved.column(Field::Longitude)
            );
        }
        resolved
    }

    /// Columns for one row
    fn columns_for(&mut self, row: &RawRow) -> &ResolvedColumns {
        match &mut self.columns {
            Columns::Declared(resolved) => resolved,
            Columns::PerRow { keys, resolved } => {
                if !keys.iter().map(String::as_str).eq(row.keys().map(String::as_str)) {
                    *resolved = self.config.aliases.resolve(row.keys().map(String::as_str));
                    *keys = row.keys().cloned().collect();
                }
                resolved
            }
        }
    }

    /// Process one row
    pub fn push_row(&mut self, row: &RawRow) {
        let point = normalize_row(row, self.columns_for(row));

        self.stats.processed_rows += 1;
        match point {
            Some(point) => {
                self.builder.push(point);
                self.stats.accepted_points += 1;
            }
            None => self.stats.skipped_rows += 1,
        }
    }

    /// Check whether a progress report is due after the last row
    #[inline]
    pub fn progress_due(&self) -> bool {
        self.stats.processed_rows % self.config.progress_interval.max(1) == 0
    }

    #[inline]
    pub fn stats(&self) -> IngestStats {
        self.stats
    }

    /// Finish and return the store
    pub fn finish(self) -> Ingested {
        Ingested {
            store: self.builder.finish(),
            stats: self.stats,
        }
    }
}

/// Ingest a row source cooperatively
///
/// Every `progress_interval` rows, `on_progress` receives the processed-row count, control
/// is yielded to the runtime, and `is_current` is consulted. When it returns `false` the
/// load has been superseded and `Ok(None)` is returned without a store. A final progress
/// report carries the total processed count unless the last batch already reported it.
pub async fn ingest<S, P, C>(
    mut source: S,
    config: &IngestConfig,
    mut on_progress: P,
    is_current: C,
) -> Result<Option<Ingested>>
where
    S: RowSource,
    P: FnMut(usize),
    C: Fn() -> bool,
{
    let mut ingestor = Ingestor::new(config, source.columns());

    while let Some(row) = source.next_row() {
        let row = row?;
        ingestor.push_row(&row);

        if ingestor.progress_due() {
            let processed = ingestor.stats().processed_rows;
            tracing::trace!("Ingested {} rows", processed);
            on_progress(processed);

            tokio::task::yield_now().await;
            if !is_current() {
                return Ok(None);
            }
        }
    }

    // The last batch boundary may already have reported the total
    let processed = ingestor.stats().processed_rows;
    if processed == 0 || !ingestor.progress_due() {
        on_progress(processed);
    }
    Ok(Some(ingestor.finish()))
}

/// Ingest a row source to completion without yielding
pub fn ingest_blocking<S: RowSource>(mut source: S, config: &IngestConfig) -> Result<Ingested> {
    profiling::scope!("ingest_blocking");
    let mut ingestor = Ingestor::new(config, source.columns());
    while let Some(row) = source.next_row() {
        ingestor.push_row(&row?);
    }
    Ok(ingestor.finish())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{CsvRowSource, DataError, IterRowSource, StatusFilter};
    use serde_json::json;
    use std::cell::RefCell;

    fn row(value: Value) -> RawRow {
        value.as_object().unwrap().clone()
    }

    fn default_columns() -> ResolvedColumns {
        ColumnAliases::default().resolve([
            "id",
            "lat",
            "lng",
            "address",
            "status",
            "sf_url",
        ])
    }

    #[test]
    fn test_coerce_coordinate() {
        assert_eq!(coerce_coordinate(Some(&json!(37.5))), Some(37.5));
        assert_eq!(coerce_coordinate(Some(&json!(" 127.01 "))), Some(127.01));
        assert_eq!(coerce_coordinate(Some(&json!("1e2"))), Some(100.0));
        assert_eq!(coerce_coordinate(Some(&json!("N/A"))), None);
        assert_eq!(coerce_coordinate(Some(&json!(""))), None);
        assert_eq!(coerce_coordinate(Some(&json!("NaN"))), None);
        assert_eq!(coerce_coordinate(Some(&json!("inf"))), None);
        assert_eq!(coerce_coordinate(Some(&json!(null))), None);
        assert_eq!(coerce_coordinate(Some(&json!(true))), None);
        assert_eq!(coerce_coordinate(None), None);
    }

    #[test]
    fn test_coerce_text() {
        assert_eq!(coerce_text(Some(&json!("  Seoul  "))), Some("Seoul".to_string()));
        assert_eq!(coerce_text(Some(&json!(12345))), Some("12345".to_string()));
        assert_eq!(coerce_text(Some(&json!(false))), Some("false".to_string()));
        assert_eq!(coerce_text(Some(&json!("   "))), None);
        assert_eq!(coerce_text(Some(&json!(null))), None);
        assert_eq!(coerce_text(None), None);
    }

    #[test]
    fn test_normalize_full_row() {
        let columns = default_columns();
        let point = normalize_row(
            &row(json!({
                "id": " R-1 ",
                "lat": "37.50",
                "lng": "127.00",
                "address": "Jung-gu, Seoul",
                "status": 1,
                "sf_url": "https://example.com/r1"
            })),
            &columns,
        )
        .unwrap();

        assert_eq!(point.identifier(), Some("R-1"));
        assert_eq!(point.lat(), 37.5);
        assert_eq!(point.lng(), 127.0);
        assert_eq!(point.attributes().address.as_deref(), Some("Jung-gu, Seoul"));
        assert_eq!(point.status(), Some("1"));
        assert_eq!(
            point.attributes().external_link.as_deref(),
            Some("https://example.com/r1")
        );
    }

    #[test]
    fn test_padded_status_matches_filter() {
        let point = normalize_row(
            &row(json!({"lat": "1", "lng": "2", "status": "  approved "})),
            &default_columns(),
        )
        .unwrap();
        assert_eq!(point.status(), Some("approved"));
        assert!(StatusFilter::Only("approved".to_string()).matches(point.status()));

        let blank = normalize_row(
            &row(json!({"lat": "1", "lng": "2", "status": "   "})),
            &default_columns(),
        )
        .unwrap();
        assert_eq!(blank.status(), None);
    }

    #[test]
    fn test_normalize_drops_bad_coordinates() {
        let columns = default_columns();
        assert!(normalize_row(&row(json!({"lat": "N/A", "lng": "127"})), &columns).is_none());
        assert!(normalize_row(&row(json!({"lat": "37"})), &columns).is_none());
        assert!(normalize_row(&row(json!({"lat": null, "lng": 1})), &columns).is_none());
        assert!(normalize_row(&row(json!({})), &columns).is_none());
    }

    #[test]
    fn test_ingestor_counts() {
        let config = IngestConfig::default();
        let mut ingestor = Ingestor::new(&config, None);
        ingestor.push_row(&row(json!({"lat": 1.0, "lng": 2.0})));
        ingestor.push_row(&row(json!({"lat": "N/A", "lng": 2.0})));
        ingestor.push_row(&row(json!({"lat": 3.0, "lng": 4.0})));

        let ingested = ingestor.finish();
        assert_eq!(
            ingested.stats,
            IngestStats {
                processed_rows: 3,
                accepted_points: 2,
                skipped_rows: 1
            }
        );
        assert_eq!(ingested.store.len(), 2);
    }

    #[test]
    fn test_sparse_first_row_does_not_decide_columns() {
        let config = IngestConfig::default();
        let mut ingestor = Ingestor::new(&config, None);
        ingestor.push_row(&row(json!({"id": "bad"})));
        ingestor.push_row(&row(json!({"id": "a", "lat": 1, "lng": 2})));
        ingestor.push_row(&row(json!({"id": "b", "lat": 3, "lng": 4, "status": "approved"})));

        let ingested = ingestor.finish();
        assert_eq!(
            ingested.stats,
            IngestStats {
                processed_rows: 3,
                accepted_points: 2,
                skipped_rows: 1
            }
        );
        assert_eq!(ingested.store.lookup("a").unwrap().status(), None);
        assert_eq!(ingested.store.lookup("b").unwrap().status(), Some("approved"));
    }

    #[test]
    fn test_columns_resolved_per_row_without_header() {
        let config = IngestConfig::default();
        let mut ingestor = Ingestor::new(&config, None);
        ingestor.push_row(&row(json!({"lat": 1.0, "lng": 2.0})));
        ingestor.push_row(&row(json!({"latitude": 3.0, "longitude": 4.0})));
        ingestor.push_row(&row(json!({"lat": 5.0, "lng": 6.0})));
        let ingested = ingestor.finish();
        assert_eq!(ingested.stats.accepted_points, 3);
        assert_eq!(ingested.store.get(1).unwrap().lat(), 3.0);
    }

    #[test]
    fn test_declared_columns_resolved_once() {
        let config = IngestConfig::default();
        let header = vec!["lat".to_string(), "lng".to_string()];
        let mut ingestor = Ingestor::new(&config, Some(&header));
        ingestor.push_row(&row(json!({"lat": 1.0, "lng": 2.0})));
        // Keys outside the declared header are not consulted
        ingestor.push_row(&row(json!({"latitude": 3.0, "longitude": 4.0})));
        let ingested = ingestor.finish();
        assert_eq!(ingested.stats.accepted_points, 1);
        assert_eq!(ingested.stats.skipped_rows, 1);
    }

    #[test]
    fn test_ingest_csv_with_invalid_utf8_cell() {
        let mut data = b"id,lat,lng,address\nA,37.5,127.0,ok\nB,37.6,127.1,".to_vec();
        data.extend_from_slice(&[0xc0, b'x', b'\n']);
        data.extend_from_slice(b"C,10.0,10.0,fine\n");

        let source = CsvRowSource::from_reader(data.as_slice()).unwrap();
        let ingested = ingest_blocking(source, &IngestConfig::default()).unwrap();
        assert_eq!(ingested.stats.accepted_points, 3);
        let b = ingested.store.lookup("B").unwrap();
        assert_eq!(b.attributes().address.as_deref(), Some("\u{fffd}x"));
    }

    #[test]
    fn test_ingest_blocking_csv() {
        let data = "레코드Id,위도,경도,status\nA,37.50,127.00,approved\nB,N/A,127.01,pending\nC,10.0,10.0,\n";
        let source = CsvRowSource::from_reader(data.as_bytes()).unwrap();
        let ingested = ingest_blocking(source, &IngestConfig::default()).unwrap();

        assert_eq!(ingested.stats.processed_rows, 3);
        assert_eq!(ingested.stats.accepted_points, 2);
        assert_eq!(ingested.stats.skipped_rows, 1);
        assert!(ingested.store.lookup("B").is_none());
        assert_eq!(ingested.store.lookup("C").unwrap().status(), None);
        assert_eq!(ingested.store.lookup("A").unwrap().status(), Some("approved"));
    }

    #[test]
    fn test_duplicate_identifier_later_row_wins() {
        let data = "id,lat,lng\nX,1.0,1.0\nX,2.0,2.5\n";
        let source = CsvRowSource::from_reader(data.as_bytes()).unwrap();
        let ingested = ingest_blocking(source, &IngestConfig::default()).unwrap();
        let hit = ingested.store.lookup("X").unwrap();
        assert_eq!((hit.lat(), hit.lng()), (2.0, 2.5));
    }

    #[test]
    fn test_source_failure_is_fatal() {
        let rows: Vec<Result<RawRow>> = vec![
            Ok(row(json!({"lat": 1.0, "lng": 1.0}))),
            Err(DataError::Source("connection reset".to_string())),
        ];
        let result = ingest_blocking(IterRowSource::new(rows.into_iter()), &IngestConfig::default());
        assert!(matches!(result, Err(DataError::Source(_))));
    }

    #[tokio::test]
    async fn test_ingest_reports_monotonic_progress() {
        let rows: Vec<RawRow> = (0..25)
            .map(|i| row(json!({"lat": i as f64 * 0.1, "lng": 1.0})))
            .collect();
        let config = IngestConfig {
            progress_interval: 10,
            ..IngestConfig::default()
        };

        let progress = RefCell::new(Vec::new());
        let ingested = ingest(
            IterRowSource::from_rows(rows),
            &config,
            |n| progress.borrow_mut().push(n),
            || true,
        )
        .await
        .unwrap()
        .unwrap();

        assert_eq!(ingested.stats.accepted_points, 25);
        assert_eq!(*progress.borrow(), vec![10, 20, 25]);
    }

    #[tokio::test]
    async fn test_ingest_total_reported_once() {
        let rows: Vec<RawRow> = (0..20)
            .map(|i| row(json!({"lat": i as f64 * 0.1, "lng": 1.0})))
            .collect();
        let config = IngestConfig {
            progress_interval: 10,
            ..IngestConfig::default()
        };

        let progress = RefCell::new(Vec::new());
        ingest(
            IterRowSource::from_rows(rows),
            &config,
            |n| progress.borrow_mut().push(n),
            || true,
        )
        .await
        .unwrap()
        .unwrap();
        assert_eq!(*progress.borrow(), vec![10, 20]);

        progress.borrow_mut().clear();
        let empty = ingest(
            IterRowSource::from_rows(Vec::new()),
            &config,
            |n| progress.borrow_mut().push(n),
            || true,
        )
        .await
        .unwrap()
        .unwrap();
        assert_eq!(empty.stats, IngestStats::default());
        assert_eq!(*progress.borrow(), vec![0]);
    }

    #[tokio::test]
    async fn test_ingest_stops_when_superseded() {
        let rows: Vec<RawRow> = (0..100)
            .map(|i| row(json!({"lat": i as f64 * 0.1, "lng": 1.0})))
            .collect();
        let config = IngestConfig {
            progress_interval: 10,
            ..IngestConfig::default()
        };

        let result = ingest(IterRowSource::from_rows(rows), &config, |_| {}, || false)
            .await
            .unwrap();
        assert!(result.is_none());
    }
}
