//! Mutable level-0 segment
//!
//! The log file receives new series and tombstones. Readers get point-in-time
//! snapshots: iterators copy the sorted keys out under a read lock, so a
//! concurrent writer never disturbs an iteration in progress.

use super::data::SegmentData;
use super::{
    ElemSliceIter, File, FileRefs, MetricElem, MetricIterator, TagKeyElem, TagKeyIterator,
    TagValueElem, TagValueIterator,
};
use crate::series::{
    BoxSeriesIdIterator, SeriesIdSet, SeriesIdSetIterator,
};
use crate::sketch::HyperLogLog;
use crate::{Result, SeriesId, Tags};
use parking_lot::RwLock;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tracing::trace;

/// Mutable in-memory segment
pub struct LogFile {
    id: u64,
    path: PathBuf,
    refs: FileRefs,
    closed: AtomicBool,
    data: RwLock<SegmentData>,
    size: AtomicU64,
}

impl LogFile {
    /// Create an empty log file
    pub fn new(id: u64, path: PathBuf) -> Self {
        Self {
            id,
            path,
            refs: FileRefs::new(),
            closed: AtomicBool::new(false),
            data: RwLock::new(SegmentData::default()),
            size: AtomicU64::new(0),
        }
    }

    /// Record a series under its metric and tags
    pub fn add_series(&self, id: SeriesId, name: &[u8], tags: &Tags) {
        let n = self.data.write().add_series(id, name, tags);
        self.size.fetch_add(n as u64, Ordering::Relaxed);
        trace!(file = self.id, series = id, "Added series to log file");
    }

    /// Tombstone a metric
    pub fn delete_metric(&self, name: &[u8]) {
        let n = self.data.write().delete_metric(name);
        self.size.fetch_add(n as u64, Ordering::Relaxed);
    }

    /// Tombstone a tag key of a metric
    pub fn delete_tag_key(&self, name: &[u8], key: &[u8]) {
        let n = self.data.write().delete_tag_key(name, key);
        self.size.fetch_add(n as u64, Ordering::Relaxed);
    }

    /// Tombstone a tag value of a metric
    pub fn delete_tag_value(&self, name: &[u8], key: &[u8], value: &[u8]) {
        let n = self.data.write().delete_tag_value(name, key, value);
        self.size.fetch_add(n as u64, Ordering::Relaxed);
    }

    /// Tombstone a series
    pub fn delete_series_id(&self, id: SeriesId) {
        let n = self.data.write().delete_series_id(id);
        self.size.fetch_add(n as u64, Ordering::Relaxed);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

impl File for LogFile {
    fn id(&self) -> u64 {
        self.id
    }

    fn level(&self) -> u32 {
        0
    }

    fn path(&self) -> &Path {
        &self.path
    }

    fn size(&self) -> u64 {
        self.size.load(Ordering::Relaxed)
    }

    fn memory_bytes(&self) -> usize {
        std::mem::size_of::<Self>() + self.data.read().memory_bytes()
    }

    fn metric(&self, name: &[u8]) -> Result<Option<MetricElem>> {
        Ok(self.data.read().metric_elem(name))
    }

    fn metric_iterator(&self) -> Result<MetricIterator> {
        let elems = self.data.read().metric_elems();
        Ok(Box::new(ElemSliceIter::new(elems.into())))
    }

    fn tag_key(&self, name: &[u8], key: &[u8]) -> Result<Option<TagKeyElem>> {
        Ok(self.data.read().tag_key_elem(name, key))
    }

    fn tag_key_iterator(&self, name: &[u8]) -> Result<Option<TagKeyIterator>> {
        let elems = self.data.read().tag_key_elems(name);
        Ok(elems.map(|e| Box::new(ElemSliceIter::new(e.into())) as TagKeyIterator))
    }

    fn tag_value(&self, name: &[u8], key: &[u8], value: &[u8]) -> Result<Option<TagValueElem>> {
        Ok(self.data.read().tag_value_elem(name, key, value))
    }

    fn tag_value_iterator(&self, name: &[u8], key: &[u8]) -> Result<Option<TagValueIterator>> {
        let elems = self.data.read().tag_value_elems(name, key);
        Ok(elems.map(|e| Box::new(ElemSliceIter::new(e.into())) as TagValueIterator))
    }

    fn metric_series_id_iterator(&self, name: &[u8]) -> Result<Option<BoxSeriesIdIterator>> {
        let data = self.data.read();
        Ok(data.metrics.get(name).map(|m| {
            Box::new(SeriesIdSetIterator::new(m.series.clone())) as BoxSeriesIdIterator
        }))
    }

    fn tag_key_series_id_iterator(
        &self,
        name: &[u8],
        key: &[u8],
    ) -> Result<Option<BoxSeriesIdIterator>> {
        let set = self.data.read().tag_key_series(name, key);
        Ok(set.map(|s| Box::new(SeriesIdSetIterator::new(s)) as BoxSeriesIdIterator))
    }

    fn tag_value_series_id_set(
        &self,
        name: &[u8],
        key: &[u8],
        value: &[u8],
    ) -> Result<Option<SeriesIdSet>> {
        Ok(self.data.read().tag_value_series(name, key, value).cloned())
    }

    fn series_id_set(&self) -> Result<SeriesIdSet> {
        Ok(self.data.read().series.clone())
    }

    fn tombstone_series_id_set(&self) -> Result<SeriesIdSet> {
        Ok(self.data.read().tombstones.clone())
    }

    fn metrics_sketches(&self) -> Result<(HyperLogLog, HyperLogLog)> {
        let data = self.data.read();
        Ok((
            data.metric_sketch.clone(),
            data.metric_tombstone_sketch.clone(),
        ))
    }

    fn series_sketches(&self) -> Result<(HyperLogLog, HyperLogLog)> {
        let data = self.data.read();
        Ok((
            data.series_sketch.clone(),
            data.series_tombstone_sketch.clone(),
        ))
    }

    fn refs(&self) -> &FileRefs {
        &self.refs
    }

    fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}
