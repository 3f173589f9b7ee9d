//! Raw product record sources.

use crate::pipeline::RawRecord;
use async_trait::async_trait;
use std::{
    cmp::Reverse,
    path::{Path, PathBuf},
};
use thiserror::Error;
use time::{Date, macros::format_description};

const DEFAULT_PLATFORM: &str = "Website";
const DEFAULT_STORE: &str = "unknown";

/// Errors raised while loading raw records.
#[derive(Debug, Error)]
pub enum SourceError {
    /// The source file could not be read.
    #[error("failed to read {path}: {source}")]
    Io {
        /// File that failed to load.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
    /// The source contents were not valid record JSON.
    #[error("invalid record JSON at line {line}: {source}")]
    Parse {
        /// One-based line number of the offending entry.
        line: usize,
        /// Underlying decode error.
        #[source]
        source: serde_json::Error,
    },
    /// A date filter was not in `YYYY-MM-DD` form.
    #[error("invalid date `{0}`, expected YYYY-MM-DD")]
    InvalidDate(String),
}

/// Filters applied when pulling records from a source.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SourceQuery {
    /// Inclusive lower bound on the publication date.
    pub start_date: Option<Date>,
    /// Inclusive upper bound on the publication date.
    pub end_date: Option<Date>,
    /// Maximum number of records returned.
    pub limit: Option<usize>,
}

impl SourceQuery {
    /// Parse a `YYYY-MM-DD` date argument.
    pub fn parse_date(value: &str) -> Result<Date, SourceError> {
        Date::parse(value.trim(), format_description!("[year]-[month]-[day]"))
            .map_err(|_| SourceError::InvalidDate(value.to_string()))
    }

    fn admits(&self, record: &RawRecord) -> bool {
        if self.start_date.is_none() && self.end_date.is_none() {
            return true;
        }
        let Some(date) = record_date(record) else {
            return false;
        };
        self.start_date.is_none_or(|start| date >= start)
            && self.end_date.is_none_or(|end| date <= end)
    }
}

/// Supplies the finite list of raw records for a run.
#[async_trait]
pub trait RecordSource: Send + Sync {
    /// Return records with an image, matching `query`, newest first.
    async fn fetch(&self, query: &SourceQuery) -> Result<Vec<RawRecord>, SourceError>;
}

/// Reads records from a JSON array or JSON-lines export.
#[derive(Debug, Clone)]
pub struct JsonFileSource {
    path: PathBuf,
}

impl JsonFileSource {
    /// Read from the file at `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Location of the export.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load every record in the file, unfiltered, with identifiers and defaults filled in.
    pub async fn load_all(&self) -> Result<Vec<RawRecord>, SourceError> {
        let contents =
            tokio::fs::read_to_string(&self.path)
                .await
                .map_err(|source| SourceError::Io {
                    path: self.path.clone(),
                    source,
                })?;
        let mut records = parse_records(&contents)?;
        for record in &mut records {
            normalize(record);
        }
        Ok(records)
    }

    /// Find a single record by identifier.
    pub async fn find(&self, id: &str) -> Result<Option<RawRecord>, SourceError> {
        Ok(self
            .load_all()
            .await?
            .into_iter()
            .find(|record| record.id == id))
    }
}

#[async_trait]
impl RecordSource for JsonFileSource {
    async fn fetch(&self, query: &SourceQuery) -> Result<Vec<RawRecord>, SourceError> {
        let mut records: Vec<RawRecord> = self
            .load_all()
            .await?
            .into_iter()
            .filter(|record| record.has_image() && query.admits(record))
            .collect();

        records.sort_by_key(|record| Reverse(record.date.clone()));
        if let Some(limit) = query.limit {
            records.truncate(limit);
        }

        tracing::info!(
            path = %self.path.display(),
            records = records.len(),
            start = ?query.start_date,
            end = ?query.end_date,
            "Loaded raw records"
        );
        Ok(records)
    }
}

fn parse_records(contents: &str) -> Result<Vec<RawRecord>, SourceError> {
    let trimmed = contents.trim_start();
    if trimmed.starts_with('[') {
        return serde_json::from_str(trimmed).map_err(|source| SourceError::Parse {
            line: source.line(),
            source,
        });
    }

    contents
        .lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(idx, line)| {
            serde_json::from_str(line).map_err(|source| SourceError::Parse {
                line: idx + 1,
                source,
            })
        })
        .collect()
}

fn normalize(record: &mut RawRecord) {
    record.ensure_identifier();
    if record.platform.trim().is_empty() {
        record.platform = DEFAULT_PLATFORM.to_string();
    }
    if record.store_name.trim().is_empty() {
        record.store_name = DEFAULT_STORE.to_string();
    }
}

fn record_date(record: &RawRecord) -> Option<Date> {
    let prefix = record.date.get(..10)?;
    SourceQuery::parse_date(prefix).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_temp(contents: &str) -> PathBuf {
        let path = std::env::temp_dir().join(format!("records-{}.json", uuid::Uuid::new_v4()));
        let mut file = std::fs::File::create(&path).expect("create");
        file.write_all(contents.as_bytes()).expect("write");
        path
    }

    #[tokio::test]
    async fn json_array_applies_filters_and_ordering() {
        let path = write_temp(
            r#"[
                {"id_sanpham": "a", "image": "https://x/a.jpg", "date": "2024-01-05 10:00:00", "like": "12"},
                {"id_sanpham": "b", "image": "", "date": "2024-01-06"},
                {"id_sanpham": "c", "image": "https://x/c.jpg", "date": "2024-01-09T08:00:00"},
                {"id_sanpham": "d", "image": "https://x/d.jpg", "date": "2024-02-01"},
                {"id_sanpham": "e", "image": "https://x/e.jpg", "date": "2024-01-01"}
            ]"#,
        );
        let source = JsonFileSource::new(&path);
        let query = SourceQuery {
            start_date: Some(SourceQuery::parse_date("2024-01-01").expect("date")),
            end_date: Some(SourceQuery::parse_date("2024-01-31").expect("date")),
            limit: Some(2),
        };

        let records = source.fetch(&query).await.expect("fetch");
        let ids: Vec<&str> = records.iter().map(|record| record.id.as_str()).collect();
        assert_eq!(ids, vec!["c", "a"]);
        assert_eq!(records[1].likes, 12);
        assert_eq!(records[1].platform, "Website");
        assert_eq!(records[1].store_name, "unknown");

        let _ = std::fs::remove_file(path);
    }

    #[tokio::test]
    async fn json_lines_get_generated_identifiers() {
        let path = write_temp(
            "{\"image\": \"https://x/1.jpg\", \"date\": \"2024-01-01\"}\n\n{\"product_id\": \"p-2\", \"image\": \"https://x/2.jpg\"}\n",
        );
        let source = JsonFileSource::new(&path);
        let records = source.fetch(&SourceQuery::default()).await.expect("fetch");

        assert_eq!(records.len(), 2);
        let generated = records
            .iter()
            .find(|record| record.id != "p-2")
            .expect("generated id");
        assert!(generated.id.starts_with("SP_"));
        assert_eq!(generated.id.len(), 11);

        let _ = std::fs::remove_file(path);
    }

    #[tokio::test]
    async fn reports_line_of_bad_entry() {
        let path = write_temp("{\"id\": \"a\"}\nnot json\n");
        let err = JsonFileSource::new(&path)
            .load_all()
            .await
            .expect_err("parse error");
        assert!(matches!(err, SourceError::Parse { line: 2, .. }));
        let _ = std::fs::remove_file(path);
    }

    #[tokio::test]
    async fn missing_file_is_io_error() {
        let err = JsonFileSource::new("/definitely/not/here.json")
            .load_all()
            .await
            .expect_err("io error");
        assert!(matches!(err, SourceError::Io { .. }));
    }

    #[test]
    fn rejects_malformed_date() {
        assert!(matches!(
            SourceQuery::parse_date("01/02/2024"),
            Err(SourceError::InvalidDate(_))
        ));
    }
}
