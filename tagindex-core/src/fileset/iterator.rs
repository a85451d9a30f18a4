//! Iterators that keep a file set alive
//!
//! Each iterator retains its snapshot when created and releases it exactly
//! once: on the first `close()` or, failing that, on drop.

use super::FileSet;
use crate::file::{MetricElem, TagKeyElem, TagValueElem};
use crate::merge::LiveKeys;
use crate::series::{BoxSeriesIdIterator, SeriesIdIterator, SeriesIdSet};
use crate::{Result, SeriesId};
use std::ops::Deref;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CloseState {
    Open,
    Closed,
}

/// Retained handle on a file set
pub struct RetainedFileSet {
    fs: Arc<FileSet>,
    state: CloseState,
}

impl RetainedFileSet {
    /// Retain `fs` until this handle is closed or dropped
    pub fn new(fs: Arc<FileSet>) -> Self {
        fs.retain();
        Self {
            fs,
            state: CloseState::Open,
        }
    }

    pub fn file_set(&self) -> &Arc<FileSet> {
        &self.fs
    }

    pub fn is_closed(&self) -> bool {
        self.state == CloseState::Closed
    }

    /// Release the snapshot. Later calls do nothing.
    pub fn close(&mut self) {
        if self.state == CloseState::Open {
            self.state = CloseState::Closed;
            self.fs.release();
        }
    }
}

impl Deref for RetainedFileSet {
    type Target = FileSet;

    fn deref(&self) -> &FileSet {
        &self.fs
    }
}

impl Drop for RetainedFileSet {
    fn drop(&mut self) {
        self.close();
    }
}

/// Iterator bound to a retained file set. Yields nothing once closed.
pub struct FileSetIterator<I> {
    fs: RetainedFileSet,
    itr: I,
}

/// Live metric names
pub type FileSetMetricIterator = FileSetIterator<LiveKeys<MetricElem>>;
/// Live tag keys of one metric
pub type FileSetTagKeyIterator = FileSetIterator<LiveKeys<TagKeyElem>>;
/// Live values of one tag key
pub type FileSetTagValueIterator = FileSetIterator<LiveKeys<TagValueElem>>;

impl<I> FileSetIterator<I> {
    pub fn new(fs: Arc<FileSet>, itr: I) -> Self {
        Self {
            fs: RetainedFileSet::new(fs),
            itr,
        }
    }

    pub fn close(&mut self) {
        self.fs.close();
    }
}

impl<I: Iterator> Iterator for FileSetIterator<I> {
    type Item = I::Item;

    fn next(&mut self) -> Option<I::Item> {
        if self.fs.is_closed() {
            return None;
        }
        self.itr.next()
    }
}

/// Series ID iterator bound to a retained file set
pub struct FileSetSeriesIdIterator {
    fs: RetainedFileSet,
    itr: BoxSeriesIdIterator,
}

impl FileSetSeriesIdIterator {
    pub fn new(fs: Arc<FileSet>, itr: BoxSeriesIdIterator) -> Self {
        Self {
            fs: RetainedFileSet::new(fs),
            itr,
        }
    }
}

impl SeriesIdIterator for FileSetSeriesIdIterator {
    fn next_id(&mut self) -> Result<Option<SeriesId>> {
        if self.fs.is_closed() {
            return Ok(None);
        }
        self.itr.next_id()
    }

    fn close(&mut self) -> Result<()> {
        if self.fs.is_closed() {
            return Ok(());
        }
        let result = self.itr.close();
        self.fs.close();
        result
    }

    fn series_id_set(&self) -> Option<&SeriesIdSet> {
        self.itr.series_id_set()
    }
}

impl Drop for FileSetSeriesIdIterator {
    fn drop(&mut self) {
        let _ = SeriesIdIterator::close(self);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CompactionLevel;
    use crate::file::{File, LogFile, SegmentFile};
    use crate::series::{SeriesFile, SeriesIdSetIterator};
    use crate::Tags;
    use bytes::Bytes;
    use std::path::PathBuf;

    fn fixture() -> (Arc<LogFile>, Arc<FileSet>) {
        let f = Arc::new(LogFile::new(1, PathBuf::from("L0-00000001.tsl")));
        f.add_series(1, b"cpu", &Tags::new());
        f.add_series(2, b"mem", &Tags::new());
        let fs = FileSet::new(
            vec![CompactionLevel::default(); 2],
            Arc::new(SeriesFile::new()),
            vec![SegmentFile::Log(f.clone())],
        );
        (f, Arc::new(fs))
    }

    #[test]
    fn test_close_releases_once() {
        let (f, fs) = fixture();
        let mut itr = FileSetIterator::new(fs.clone(), fs.metric_iterator().unwrap().live_keys());
        assert_eq!(f.ref_count(), 1);

        assert_eq!(itr.next().unwrap().unwrap(), Bytes::from("cpu"));
        itr.close();
        itr.close();
        assert_eq!(f.ref_count(), 0);
        assert!(itr.next().is_none());

        drop(itr);
        assert_eq!(f.ref_count(), 0);
    }

    #[test]
    fn test_drop_releases() {
        let (f, fs) = fixture();
        {
            let _a = RetainedFileSet::new(fs.clone());
            let _b = RetainedFileSet::new(fs.clone());
            assert_eq!(f.ref_count(), 2);
        }
        assert_eq!(f.ref_count(), 0);
    }

    #[test]
    fn test_series_iterator_close_is_idempotent() {
        let (f, fs) = fixture();
        let set = fs.series_id_set().unwrap();
        let mut itr =
            FileSetSeriesIdIterator::new(fs.clone(), Box::new(SeriesIdSetIterator::new(set)));
        assert_eq!(f.ref_count(), 1);
        assert!(itr.series_id_set().is_some());

        assert_eq!(itr.next_id().unwrap(), Some(1));
        itr.close().unwrap();
        itr.close().unwrap();
        assert_eq!(f.ref_count(), 0);
        assert_eq!(itr.next_id().unwrap(), None);
    }

    #[test]
    fn test_retained_file_set_derefs() {
        let (_, fs) = fixture();
        let mut retained = RetainedFileSet::new(fs);
        assert_eq!(retained.file_ids(), vec![1]);
        retained.close();
        assert!(retained.is_closed());
    }
}
