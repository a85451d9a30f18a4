//! Immutable snapshots of the segment list
//!
//! A [`FileSet`] composes log and index files, newest first, into one
//! logical index. It is never modified in place: structural changes build a
//! new set that shares the untouched files with the old one. Readers keep a
//! snapshot alive by retaining it; files superseded by compaction are removed
//! once the last snapshot referencing them is released.

mod expr;
mod iterator;

pub use iterator::{
    FileSetIterator, FileSetMetricIterator, FileSetSeriesIdIterator, FileSetTagKeyIterator,
    FileSetTagValueIterator, RetainedFileSet,
};

use crate::config::CompactionLevel;
use crate::file::{File, IndexFile, LogFile, MetricElem, SegmentFile};
use crate::merge::{
    metric_postings, resolve_series_ids, tag_value_postings, visible_files, MergeIterator,
    Merged, MetricMergeIterator, Postings, TagKeyMergeIterator, TagValueMergeIterator,
};
use crate::series::{
    merge_series_id_iterators, BoxSeriesIdIterator, SeriesFile, SeriesIdSet, SeriesIdSetIterator,
};
use crate::sketch::{HyperLogLog, Sketch};
use crate::Result;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info};

/// Ordered, immutable composition of segments
pub struct FileSet {
    levels: Vec<CompactionLevel>,
    series_file: Arc<SeriesFile>,
    files: Vec<SegmentFile>,
    manifest_size: u64,
}

impl FileSet {
    /// Compose `files`, which must be ordered newest first
    pub fn new(
        levels: Vec<CompactionLevel>,
        series_file: Arc<SeriesFile>,
        files: Vec<SegmentFile>,
    ) -> Self {
        Self {
            levels,
            series_file,
            files,
            manifest_size: 0,
        }
    }

    /// Record the size of the manifest describing this set
    pub fn with_manifest_size(mut self, manifest_size: u64) -> Self {
        self.manifest_size = manifest_size;
        self
    }

    /// Retain every file in the set
    pub fn retain(&self) {
        for f in &self.files {
            f.retain();
        }
    }

    /// Release every file in the set
    pub fn release(&self) {
        for f in &self.files {
            f.release();
        }
    }

    /// Close every file, returning the first failure
    pub fn close(&self) -> Result<()> {
        let mut first_err = None;
        for f in &self.files {
            if let Err(e) = f.close() {
                first_err.get_or_insert(e);
            }
        }
        first_err.map_or(Ok(()), Err)
    }

    pub fn series_file(&self) -> &Arc<SeriesFile> {
        &self.series_file
    }

    pub fn levels(&self) -> &[CompactionLevel] {
        &self.levels
    }

    /// New set with `f` as the newest file
    pub fn prepend_log_file(&self, f: Arc<LogFile>) -> FileSet {
        debug!("Prepending log file {}", f.id());

        let mut files = Vec::with_capacity(self.files.len() + 1);
        files.push(SegmentFile::Log(f));
        files.extend(self.files.iter().cloned());

        FileSet {
            levels: self.levels.clone(),
            series_file: self.series_file.clone(),
            files,
            manifest_size: self.manifest_size,
        }
    }

    /// New set with the contiguous run `old_files` replaced by `new_file`.
    ///
    /// # Panics
    ///
    /// Panics if `old_files` is empty, missing from the set or not
    /// contiguous in it. Compaction must only ever hand over runs taken
    /// from this very set.
    pub fn must_replace(&self, old_files: &[SegmentFile], new_file: SegmentFile) -> FileSet {
        assert!(!old_files.is_empty(), "cannot replace empty files");

        let Some(i) = self.files.iter().position(|f| f.ptr_eq(&old_files[0])) else {
            panic!("first replacement file not found");
        };

        let run = self.files.get(i..i + old_files.len());
        let contiguous = run.is_some_and(|run| {
            run.iter()
                .zip(old_files)
                .all(|(f, old)| f.ptr_eq(old))
        });
        if !contiguous {
            panic!(
                "cannot replace non-contiguous files: subset={:?}, fileset={:?}",
                file_ids(old_files),
                self.file_ids()
            );
        }

        info!(
            "Replacing files {:?} with file {} at level {}",
            file_ids(old_files),
            new_file.id(),
            new_file.level()
        );

        let mut files = Vec::with_capacity(self.files.len() - old_files.len() + 1);
        files.extend(self.files[..i].iter().cloned());
        files.push(new_file);
        files.extend(self.files[i + old_files.len()..].iter().cloned());

        FileSet {
            levels: self.levels.clone(),
            series_file: self.series_file.clone(),
            files,
            manifest_size: self.manifest_size,
        }
    }

    /// Highest file ID in the set, 0 if empty
    pub fn max_id(&self) -> u64 {
        self.files.iter().map(|f| f.id()).max().unwrap_or(0)
    }

    pub fn files(&self) -> &[SegmentFile] {
        &self.files
    }

    pub fn file_ids(&self) -> Vec<u64> {
        file_ids(&self.files)
    }

    pub fn log_files(&self) -> Vec<Arc<LogFile>> {
        self.files.iter().filter_map(|f| f.as_log().cloned()).collect()
    }

    pub fn index_files(&self) -> Vec<Arc<IndexFile>> {
        self.files
            .iter()
            .filter_map(|f| f.as_index().cloned())
            .collect()
    }

    /// Trailing contiguous run of index files at `level`, oldest last.
    ///
    /// Files above `level` are skipped and the scan stops at the first file
    /// below it. Level 0 never yields anything.
    pub fn last_contiguous_index_files_by_level(&self, level: u32) -> Vec<Arc<IndexFile>> {
        if level == 0 {
            return Vec::new();
        }

        let mut run = Vec::new();
        for f in self.files.iter().rev() {
            if f.level() > level {
                continue;
            } else if f.level() < level {
                break;
            }
            if let Some(index) = f.as_index() {
                run.push(index.clone());
            }
        }
        run.reverse();
        run
    }

    /// On-disk size of every file plus the manifest
    pub fn size(&self) -> u64 {
        self.files.iter().map(|f| f.size()).sum::<u64>() + self.manifest_size
    }

    /// Estimated resident memory
    pub fn memory_bytes(&self) -> usize {
        std::mem::size_of::<Self>()
            + self.files.len() * std::mem::size_of::<SegmentFile>()
            + self.files.iter().map(|f| f.memory_bytes()).sum::<usize>()
    }

    /// The metric as seen by the newest file that knows it. A tombstone
    /// there makes the metric absent.
    pub fn metric(&self, name: &[u8]) -> Result<Option<MetricElem>> {
        for f in &self.files {
            if let Some(e) = f.metric(name)? {
                return Ok((!e.deleted()).then_some(e));
            }
        }
        Ok(None)
    }

    /// Merged metrics of every file, tombstones included
    pub fn metric_iterator(&self) -> Result<MetricMergeIterator> {
        let itrs = self
            .files
            .iter()
            .map(|f| f.metric_iterator())
            .collect::<Result<Vec<_>>>()?;
        Ok(MergeIterator::new(itrs))
    }

    /// Merged tag keys of a metric. Files older than a tombstone on the
    /// metric are not consulted. `None` if no file knows the metric.
    pub fn tag_key_iterator(&self, name: &[u8]) -> Result<Option<TagKeyMergeIterator>> {
        let files = visible_files(&self.files, name)?;
        let mut itrs = Vec::with_capacity(files.len());
        for f in files {
            if let Some(itr) = f.tag_key_iterator(name)? {
                itrs.push(itr);
            }
        }
        Ok((!itrs.is_empty()).then(|| MergeIterator::new(itrs)))
    }

    /// Merged values of a tag key. Files older than a tombstone or a
    /// re-creation of the key are not consulted. `None` if no file knows the key.
    pub fn tag_value_iterator(
        &self,
        name: &[u8],
        key: &[u8],
    ) -> Result<Option<TagValueMergeIterator>> {
        let mut elems = Vec::new();
        for f in visible_files(&self.files, name)? {
            if let Some(e) = f.tag_key(name, key)? {
                elems.push(e);
            }
        }
        Ok(Merged::from_elems(elems).map(|group| group.tag_value_iterator()))
    }

    pub fn has_tag_key(&self, name: &[u8], key: &[u8]) -> Result<bool> {
        for f in visible_files(&self.files, name)? {
            if let Some(e) = f.tag_key(name, key)? {
                return Ok(!e.deleted());
            }
        }
        Ok(false)
    }

    pub fn has_tag_value(&self, name: &[u8], key: &[u8], value: &[u8]) -> Result<bool> {
        for f in visible_files(&self.files, name)? {
            let tag_key = f.tag_key(name, key)?;
            if tag_key.as_ref().is_some_and(|e| e.deleted()) {
                return Ok(false);
            }
            if let Some(e) = f.tag_value(name, key, value)? {
                return Ok(!e.deleted());
            }
            // Older values of a recreated key are hidden
            if tag_key.is_some_and(|e| e.recreated()) {
                return Ok(false);
            }
        }
        Ok(false)
    }

    /// Union of every file's series for a metric, without applying tombstones
    pub fn metric_series_id_iterator(&self, name: &[u8]) -> Result<Option<BoxSeriesIdIterator>> {
        let mut itrs = Vec::with_capacity(self.files.len());
        for f in &self.files {
            if let Some(itr) = f.metric_series_id_iterator(name)? {
                itrs.push(itr);
            }
        }
        merge_series_id_iterators(itrs)
    }

    /// Union of every file's series for a tag key, without applying tombstones
    pub fn tag_key_series_id_iterator(
        &self,
        name: &[u8],
        key: &[u8],
    ) -> Result<Option<BoxSeriesIdIterator>> {
        let mut itrs = Vec::with_capacity(self.files.len());
        for f in &self.files {
            if let Some(itr) = f.tag_key_series_id_iterator(name, key)? {
                itrs.push(itr);
            }
        }
        merge_series_id_iterators(itrs)
    }

    /// Live series of a metric with metric and series tombstones applied
    pub fn metric_series_id_set(&self, name: &[u8]) -> Result<SeriesIdSet> {
        resolve_series_ids(&self.files, |f| metric_postings(&**f, name))
    }

    /// Live series of a tag value with tombstones applied
    pub fn tag_value_series_id_set(
        &self,
        name: &[u8],
        key: &[u8],
        value: &[u8],
    ) -> Result<SeriesIdSet> {
        resolve_series_ids(&self.files, |f| tag_value_postings(&**f, name, key, value))
    }

    /// Set-backed iterator over the live series of a tag value
    pub fn tag_value_series_id_iterator(
        &self,
        name: &[u8],
        key: &[u8],
        value: &[u8],
    ) -> Result<BoxSeriesIdIterator> {
        let set = self.tag_value_series_id_set(name, key, value)?;
        Ok(Box::new(SeriesIdSetIterator::new(set)))
    }

    /// Every live series in the set with series tombstones applied
    pub fn series_id_set(&self) -> Result<SeriesIdSet> {
        resolve_series_ids(&self.files, |f| Ok(Postings::Series(f.series_id_set()?)))
    }

    /// Merged (additions, tombstones) metric name sketches
    pub fn metrics_sketches(&self) -> Result<(HyperLogLog, HyperLogLog)> {
        self.merge_sketches(|f| f.metrics_sketches())
    }

    /// Merged (additions, tombstones) series sketches
    pub fn series_sketches(&self) -> Result<(HyperLogLog, HyperLogLog)> {
        self.merge_sketches(|f| f.series_sketches())
    }

    /// Estimated number of live metrics
    pub fn metric_cardinality(&self) -> Result<u64> {
        let (added, deleted) = self.metrics_sketches()?;
        Ok(added.count().saturating_sub(deleted.count()))
    }

    /// Estimated number of live series
    pub fn series_cardinality(&self) -> Result<u64> {
        let (added, deleted) = self.series_sketches()?;
        Ok(added.count().saturating_sub(deleted.count()))
    }

    fn merge_sketches<F>(&self, sketches: F) -> Result<(HyperLogLog, HyperLogLog)>
    where
        F: Fn(&SegmentFile) -> Result<(HyperLogLog, HyperLogLog)>,
    {
        let mut added = HyperLogLog::default();
        let mut deleted = HyperLogLog::default();
        for f in &self.files {
            let (a, d) = sketches(f)?;
            added.merge(&a)?;
            deleted.merge(&d)?;
        }
        Ok((added, deleted))
    }
}

impl fmt::Debug for FileSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FileSet")
            .field("files", &self.files)
            .field("levels", &self.levels.len())
            .field("manifest_size", &self.manifest_size)
            .finish()
    }
}

fn file_ids(files: &[SegmentFile]) -> Vec<u64> {
    files.iter().map(|f| f.id()).collect()
}
