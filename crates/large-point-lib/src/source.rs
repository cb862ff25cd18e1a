//! Row sources for ingestion
//!
//! A [`RowSource`] yields untyped rows (column name -> value). Read failures of the
//! source itself are pipeline-level errors; malformed values inside a row are not.

use crate::{DataError, Result};
use serde_json::{Map, Value};
use std::io::Read;
use std::path::Path;

/// One untyped input row: column name -> value
pub type RawRow = Map<String, Value>;

/// A lazy sequence of raw rows
pub trait RowSource {
    /// Column names known before the first row (e.g. a CSV header)
    ///
    /// When `None`, columns are resolved from the keys of the first row.
    fn columns(&self) -> Option<&[String]> {
        None
    }

    /// Read the next row, `None` at the end of the source
    fn next_row(&mut self) -> Option<Result<RawRow>>;
}

/// CSV file with a header line
///
/// Every cell is exposed as a JSON string; numeric coercion happens during
/// normalization. Rows with fewer or more cells than the header are tolerated, and
/// bytes that are not valid UTF-8 are replaced rather than failing the load.
pub struct CsvRowSource<R: Read> {
    reader: csv::Reader<R>,
    headers: Vec<String>,
    record: csv::ByteRecord,
}

impl<R: Read> CsvRowSource<R> {
    /// Create a source reading CSV from any reader
    ///
    /// Fails if the header line cannot be read.
    pub fn from_reader(reader: R) -> Result<Self> {
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .from_reader(reader);

        let headers = reader
            .byte_headers()?
            .iter()
            .enumerate()
            .map(|(i, h)| {
                let h = String::from_utf8_lossy(h);
                let h = if i == 0 { h.trim_start_matches('\u{feff}') } else { &*h };
                h.trim().to_string()
            })
            .collect();

        Ok(Self {
            reader,
            headers,
            record: csv::ByteRecord::new(),
        })
    }
}

impl CsvRowSource<std::fs::File> {
    /// Open a CSV file from disk
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = std::fs::File::open(path.as_ref())?;
        Self::from_reader(file)
    }
}

impl<R: Read> RowSource for CsvRowSource<R> {
    fn columns(&self) -> Option<&[String]> {
        Some(&self.headers)
    }

    fn next_row(&mut self) -> Option<Result<RawRow>> {
        match self.reader.read_byte_record(&mut self.record) {
            Ok(true) => {
                let row = self
                    .headers
                    .iter()
                    .zip(self.record.iter())
                    .map(|(column, cell)| {
                        let cell = String::from_utf8_lossy(cell).into_owned();
                        (column.clone(), Value::String(cell))
                    })
                    .collect();
                Some(Ok(row))
            }
            Ok(false) => None,
            Err(e) => Some(Err(DataError::Csv(e))),
        }
    }
}

/// Adapter over any iterator of rows
pub struct IterRowSource<I> {
    rows: I,
    columns: Option<Vec<String>>,
}

impl<I> IterRowSource<I>
where
    I: Iterator<Item = Result<RawRow>>,
{
    pub fn new(rows: I) -> Self {
        Self {
            rows,
            columns: None,
        }
    }

    /// Declare the columns up front instead of taking them from the first row
    pub fn with_columns(mut self, columns: Vec<String>) -> Self {
        self.columns = Some(columns);
        self
    }
}

impl IterRowSource<std::iter::Map<std::vec::IntoIter<RawRow>, fn(RawRow) -> Result<RawRow>>> {
    /// Source over an in-memory list of rows that never fails
    pub fn from_rows(rows: Vec<RawRow>) -> Self {
        let ok: fn(RawRow) -> Result<RawRow> = Ok;
        Self::new(rows.into_iter().map(ok))
    }
}

impl<I> RowSource for IterRowSource<I>
where
    I: Iterator<Item = Result<RawRow>>,
{
    fn columns(&self) -> Option<&[String]> {
        self.columns.as_deref()
    }

    fn next_row(&mut self) -> Option<Result<RawRow>> {
        self.rows.next()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn collect<S: RowSource>(mut source: S) -> Vec<Result<RawRow>> {
        std::iter::from_fn(|| source.next_row()).collect()
    }

    #[test]
    fn test_csv_headers_and_rows() {
        let data = "id,lat,lng\nA,37.5,127.0\nB,N/A,127.1\n";
        let source = CsvRowSource::from_reader(data.as_bytes()).unwrap();
        assert_eq!(source.columns().unwrap(), &["id", "lat", "lng"]);

        let rows = collect(source);
        assert_eq!(rows.len(), 2);
        let first = rows[0].as_ref().unwrap();
        assert_eq!(first.get("id"), Some(&json!("A")));
        assert_eq!(first.get("lat"), Some(&json!("37.5")));
        let second = rows[1].as_ref().unwrap();
        assert_eq!(second.get("lat"), Some(&json!("N/A")));
    }

    #[test]
    fn test_csv_strips_bom_and_whitespace() {
        let data = "\u{feff}id , lat,lng\nA,1,2\n";
        let source = CsvRowSource::from_reader(data.as_bytes()).unwrap();
        assert_eq!(source.columns().unwrap(), &["id", "lat", "lng"]);
    }

    #[test]
    fn test_csv_short_rows_tolerated() {
        let data = "id,lat,lng\nA,1\n";
        let rows = collect(CsvRowSource::from_reader(data.as_bytes()).unwrap());
        let row = rows[0].as_ref().unwrap();
        assert_eq!(row.get("lat"), Some(&json!("1")));
        assert!(row.get("lng").is_none());
    }

    #[test]
    fn test_csv_invalid_utf8_is_replaced() {
        let mut data = b"id,lat,lng,address\nA,1,2,ok\nB,3,4,".to_vec();
        data.extend_from_slice(&[0xc0, b'x', b'\n']);
        data.extend_from_slice(b"C,5,6,fine\n");

        let rows = collect(CsvRowSource::from_reader(data.as_slice()).unwrap());
        assert_eq!(rows.len(), 3);
        let second = rows[1].as_ref().unwrap();
        assert_eq!(second.get("address"), Some(&json!("\u{fffd}x")));
        assert_eq!(second.get("lat"), Some(&json!("3")));
        assert!(rows.iter().all(|r| r.is_ok()));
    }

    #[test]
    fn test_csv_invalid_utf8_header_is_replaced() {
        let mut data = b"id,lat,lng,".to_vec();
        data.extend_from_slice(&[0xff, b'\n']);
        data.extend_from_slice(b"A,1,2,x\n");
        let source = CsvRowSource::from_reader(data.as_slice()).unwrap();
        assert_eq!(source.columns().unwrap()[3], "\u{fffd}");
        assert_eq!(collect(source).len(), 1);
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let result = CsvRowSource::from_path("/definitely/not/here.csv");
        assert!(matches!(result, Err(DataError::Io(_))));
    }

    #[test]
    fn test_iter_source() {
        let rows = vec![json!({"lat": 1.0}).as_object().unwrap().clone()];
        let source = IterRowSource::from_rows(rows);
        assert!(source.columns().is_none());
        assert_eq!(collect(source).len(), 1);

        let source = IterRowSource::from_rows(Vec::new()).with_columns(vec!["lat".into()]);
        assert_eq!(source.columns().unwrap(), &["lat"]);
    }
}
