//! Sorted series enumeration
//!
//! A [`SeriesCursor`] walks metrics in order and, for each metric, resolves
//! the series matching a tag predicate, looks their keys up in the series
//! file and emits them sorted by (name, tags).

use crate::fileset::{FileSet, RetainedFileSet};
use crate::predicate::{validate_tag_predicate, Expr};
use crate::series::parse_series_key;
use crate::types::compare_tags;
use crate::{Result, Tags};
use bytes::Bytes;
use std::cmp::Ordering;
use std::sync::Arc;
use tracing::trace;

/// Source of metric names, in ascending order
pub type MetricNameIterator = Box<dyn Iterator<Item = Result<Bytes>> + Send>;

/// Parameters of a series cursor
#[derive(Default)]
pub struct SeriesCursorRequest {
    /// Metrics to scan. Every live metric of the file set when `None`.
    pub metrics: Option<MetricNameIterator>,
}

/// One resolved series
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeriesCursorRow {
    pub name: Bytes,
    pub tags: Tags,
}

impl SeriesCursorRow {
    pub fn compare(&self, other: &SeriesCursorRow) -> Ordering {
        self.name
            .cmp(&other.name)
            .then_with(|| compare_tags(&self.tags, &other.tags))
    }
}

impl PartialOrd for SeriesCursorRow {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for SeriesCursorRow {
    fn cmp(&self, other: &Self) -> Ordering {
        self.compare(other)
    }
}

/// Pull-based cursor over the series of a file set
pub struct SeriesCursor {
    fs: RetainedFileSet,
    metrics: Option<MetricNameIterator>,
    cond: Option<Expr>,
    rows: std::vec::IntoIter<SeriesCursorRow>,
}

impl SeriesCursor {
    /// Validate `cond` and retain `fs` for the lifetime of the cursor.
    ///
    /// Fails before touching any file if `cond` contains an operator other
    /// than `=`, `!=`, `=~`, `!~`, `AND` or `OR`.
    pub fn new(req: SeriesCursorRequest, fs: Arc<FileSet>, cond: Option<Expr>) -> Result<Self> {
        if let Some(cond) = &cond {
            validate_tag_predicate(cond)?;
        }

        let metrics: MetricNameIterator = match req.metrics {
            Some(metrics) => metrics,
            None => Box::new(fs.metric_iterator()?.live_keys()),
        };

        Ok(Self {
            fs: RetainedFileSet::new(fs),
            metrics: Some(metrics),
            cond,
            rows: Vec::new().into_iter(),
        })
    }

    /// Next row, or `None` once every metric has been scanned
    pub fn next(&mut self) -> Result<Option<SeriesCursorRow>> {
        loop {
            if let Some(row) = self.rows.next() {
                return Ok(Some(row));
            }

            let Some(metrics) = self.metrics.as_mut() else {
                return Ok(None);
            };
            match metrics.next() {
                Some(name) => self.read_series(&name?)?,
                None => return Ok(None),
            }
        }
    }

    /// Release the metric source and the file set. Later calls do nothing.
    pub fn close(&mut self) {
        if self.metrics.take().is_some() {
            self.rows = Vec::new().into_iter();
        }
        self.fs.close();
    }

    fn read_series(&mut self, name: &[u8]) -> Result<()> {
        let ids = self.fs.metric_series_by_expr(name, self.cond.as_ref())?;
        let series_file = self.fs.series_file();

        let mut rows = Vec::with_capacity(ids.cardinality() as usize);
        for id in ids.iter() {
            // Deleted from the series file
            let Some(key) = series_file.series_key(id) else {
                continue;
            };
            let (name, tags) = parse_series_key(&key)?;
            rows.push(SeriesCursorRow { name, tags });
        }
        rows.sort();

        trace!(
            metric = %String::from_utf8_lossy(name),
            rows = rows.len(),
            "Read series for metric"
        );
        self.rows = rows.into_iter();
        Ok(())
    }
}

impl Drop for SeriesCursor {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CompactionLevel;
    use crate::file::{File, LogFile, SegmentFile};
    use crate::predicate::Op;
    use crate::series::SeriesFile;
    use std::path::PathBuf;

    struct Fixture {
        file: Arc<LogFile>,
        fs: Arc<FileSet>,
    }

    fn fixture(series: &[(&'static str, &[(&'static str, &'static str)])]) -> Fixture {
        let sfile = Arc::new(SeriesFile::new());
        let file = Arc::new(LogFile::new(1, PathBuf::from("L0-00000001.tsl")));
        for &(name, pairs) in series {
            let tags = Tags::from_pairs(pairs.iter().copied());
            let id = sfile.create_series_if_not_exists(name.as_bytes(), &tags).unwrap();
            file.add_series(id, name.as_bytes(), &tags);
        }
        let fs = FileSet::new(
            vec![CompactionLevel::default(); 2],
            sfile,
            vec![SegmentFile::Log(file.clone())],
        );
        Fixture {
            file,
            fs: Arc::new(fs),
        }
    }

    fn drain(cur: &mut SeriesCursor) -> Vec<String> {
        let mut out = Vec::new();
        while let Some(row) = cur.next().unwrap() {
            out.push(format!("{},{}", String::from_utf8_lossy(&row.name), row.tags));
        }
        out
    }

    #[test]
    fn test_rows_sorted_by_name_then_tags() {
        let fx = fixture(&[
            ("mem", &[("host", "b")]),
            ("cpu", &[("host", "b")]),
            ("cpu", &[("host", "a"), ("region", "us")]),
            ("cpu", &[("host", "a")]),
        ]);
        let mut cur = SeriesCursor::new(SeriesCursorRequest::default(), fx.fs.clone(), None).unwrap();

        assert_eq!(
            drain(&mut cur),
            vec![
                "cpu,host=a",
                "cpu,host=a,region=us",
                "cpu,host=b",
                "mem,host=b",
            ]
        );
        assert!(cur.next().unwrap().is_none());
    }

    #[test]
    fn test_condition_filters_series() {
        let fx = fixture(&[
            ("cpu", &[("host", "a")]),
            ("cpu", &[("host", "b")]),
            ("mem", &[("host", "a")]),
        ]);
        let cond = Expr::eq("host", "a");
        let mut cur =
            SeriesCursor::new(SeriesCursorRequest::default(), fx.fs.clone(), Some(cond)).unwrap();
        assert_eq!(drain(&mut cur), vec!["cpu,host=a", "mem,host=a"]);
    }

    #[test]
    fn test_invalid_operator_rejected_before_io() {
        let fx = fixture(&[("cpu", &[("host", "a")])]);
        let cond = Expr::and(
            Expr::eq("host", "a"),
            Expr::binary(Op::Lt, Expr::var("value"), Expr::NumberLiteral(1.0)),
        );
        let err = SeriesCursor::new(SeriesCursorRequest::default(), fx.fs.clone(), Some(cond))
            .err()
            .unwrap();
        assert!(err.is_invalid_predicate());
        assert_eq!(fx.file.ref_count(), 0);
    }

    #[test]
    fn test_supplied_metric_source() {
        let fx = fixture(&[("cpu", &[("host", "a")]), ("mem", &[("host", "a")])]);
        let names: Vec<Result<Bytes>> = vec![Ok(Bytes::from("mem"))];
        let req = SeriesCursorRequest {
            metrics: Some(Box::new(names.into_iter())),
        };
        let mut cur = SeriesCursor::new(req, fx.fs.clone(), None).unwrap();
        assert_eq!(drain(&mut cur), vec!["mem,host=a"]);
    }

    #[test]
    fn test_skips_series_deleted_from_series_file() {
        let fx = fixture(&[("cpu", &[("host", "a")]), ("cpu", &[("host", "b")])]);
        let sfile = fx.fs.series_file();
        let id = sfile
            .series_id(b"cpu", &Tags::from_pairs([("host", "a")]))
            .unwrap();
        sfile.delete_series_id(id);

        let mut cur = SeriesCursor::new(SeriesCursorRequest::default(), fx.fs.clone(), None).unwrap();
        assert_eq!(drain(&mut cur), vec!["cpu,host=b"]);
    }

    #[test]
    fn test_close_is_idempotent_and_releases() {
        let fx = fixture(&[("cpu", &[("host", "a")])]);
        let mut cur = SeriesCursor::new(SeriesCursorRequest::default(), fx.fs.clone(), None).unwrap();
        assert_eq!(fx.file.ref_count(), 1);

        cur.close();
        cur.close();
        assert_eq!(fx.file.ref_count(), 0);
        assert!(cur.next().unwrap().is_none());

        drop(cur);
        assert_eq!(fx.file.ref_count(), 0);
    }

    #[test]
    fn test_row_ordering() {
        let a = SeriesCursorRow {
            name: Bytes::from("cpu"),
            tags: Tags::from_pairs([("host", "a")]),
        };
        let b = SeriesCursorRow {
            name: Bytes::from("cpu"),
            tags: Tags::from_pairs([("host", "b")]),
        };
        let c = SeriesCursorRow {
            name: Bytes::from("mem"),
            tags: Tags::new(),
        };
        assert_eq!(a.compare(&b), Ordering::Less);
        assert_eq!(c.compare(&a), Ordering::Greater);
        assert_eq!(a.compare(&a.clone()), Ordering::Equal);
    }
}
