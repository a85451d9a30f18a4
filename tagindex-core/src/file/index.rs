//! Immutable compacted segment
//!
//! An index file is written once by [`IndexFileBuilder`] and never changes.
//! Its metric names are covered by a bloom filter so that point lookups for
//! metrics the file has never seen skip the search entirely.

use super::data::SegmentData;
use super::{
    BloomFilter, ElemSliceIter, File, FileRefs, MetricElem, MetricIterator, SegmentFile,
    TagKeyElem, TagKeyIterator, TagValueElem, TagValueIterator,
};
use crate::merge::{
    metric_postings, resolve_series_ids, tag_value_postings, visible_files, MergeIterator,
    Postings,
};
use crate::series::{BoxSeriesIdIterator, SeriesIdSet, SeriesIdSetIterator};
use crate::sketch::{HyperLogLog, Sketch};
use crate::{Result, SeriesId, Tags};
use bytes::Bytes;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::debug;

struct IndexMetric {
    name: Bytes,
    deleted: bool,
    recreated: bool,
    series: SeriesIdSet,
    tag_keys: Vec<IndexTagKey>,
    key_elems: Arc<[TagKeyElem]>,
}

struct IndexTagKey {
    key: Bytes,
    values: Vec<IndexTagValue>,
}

struct IndexTagValue {
    value: Bytes,
    deleted: bool,
    recreated: bool,
    series: SeriesIdSet,
}

/// Immutable segment at level 1 or above
pub struct IndexFile {
    id: u64,
    level: u32,
    path: PathBuf,
    refs: FileRefs,
    closed: AtomicBool,
    metrics: Vec<IndexMetric>,
    metric_elems: Arc<[MetricElem]>,
    bloom: BloomFilter,
    series: SeriesIdSet,
    tombstones: SeriesIdSet,
    metric_sketch: HyperLogLog,
    metric_tombstone_sketch: HyperLogLog,
    series_sketch: HyperLogLog,
    series_tombstone_sketch: HyperLogLog,
    size: u64,
    memory: usize,
}

impl IndexFile {
    fn find_metric(&self, name: &[u8]) -> Option<&IndexMetric> {
        if !self.bloom.may_contain(name) {
            return None;
        }
        self.metrics
            .binary_search_by(|m| m.name.as_ref().cmp(name))
            .ok()
            .map(|i| &self.metrics[i])
    }

    fn find_tag_key(&self, name: &[u8], key: &[u8]) -> Option<(&IndexMetric, usize)> {
        let metric = self.find_metric(name)?;
        let i = metric
            .tag_keys
            .binary_search_by(|k| k.key.as_ref().cmp(key))
            .ok()?;
        Some((metric, i))
    }

    fn find_tag_value(&self, name: &[u8], key: &[u8], value: &[u8]) -> Option<&IndexTagValue> {
        let (metric, i) = self.find_tag_key(name, key)?;
        let values = &metric.tag_keys[i].values;
        values
            .binary_search_by(|v| v.value.as_ref().cmp(value))
            .ok()
            .map(|j| &values[j])
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

impl File for IndexFile {
    fn id(&self) -> u64 {
        self.id
    }

    fn level(&self) -> u32 {
        self.level
    }

    fn path(&self) -> &Path {
        &self.path
    }

    fn size(&self) -> u64 {
        self.size
    }

    fn memory_bytes(&self) -> usize {
        self.memory
    }

    fn metric(&self, name: &[u8]) -> Result<Option<MetricElem>> {
        Ok(self
            .find_metric(name)
            .map(|m| {
                MetricElem::new(m.name.clone(), m.deleted).with_recreated(m.recreated)
            }))
    }

    fn metric_iterator(&self) -> Result<MetricIterator> {
        Ok(Box::new(ElemSliceIter::new(self.metric_elems.clone())))
    }

    fn tag_key(&self, name: &[u8], key: &[u8]) -> Result<Option<TagKeyElem>> {
        Ok(self
            .find_tag_key(name, key)
            .map(|(metric, i)| metric.key_elems[i].clone()))
    }

    fn tag_key_iterator(&self, name: &[u8]) -> Result<Option<TagKeyIterator>> {
        Ok(self.find_metric(name).map(|m| {
            Box::new(ElemSliceIter::new(m.key_elems.clone())) as TagKeyIterator
        }))
    }

    fn tag_value(&self, name: &[u8], key: &[u8], value: &[u8]) -> Result<Option<TagValueElem>> {
        Ok(self
            .find_tag_value(name, key, value)
            .map(|v| {
                TagValueElem::new(v.value.clone(), v.deleted).with_recreated(v.recreated)
            }))
    }

    fn tag_value_iterator(&self, name: &[u8], key: &[u8]) -> Result<Option<TagValueIterator>> {
        Ok(self
            .find_tag_key(name, key)
            .map(|(metric, i)| metric.key_elems[i].tag_value_iterator()))
    }

    fn metric_series_id_iterator(&self, name: &[u8]) -> Result<Option<BoxSeriesIdIterator>> {
        Ok(self.find_metric(name).map(|m| {
            Box::new(SeriesIdSetIterator::new(m.series.clone())) as BoxSeriesIdIterator
        }))
    }

    fn tag_key_series_id_iterator(
        &self,
        name: &[u8],
        key: &[u8],
    ) -> Result<Option<BoxSeriesIdIterator>> {
        Ok(self.find_tag_key(name, key).map(|(metric, i)| {
            let mut set = SeriesIdSet::new();
            for value in &metric.tag_keys[i].values {
                set.merge(&value.series);
            }
            Box::new(SeriesIdSetIterator::new(set)) as BoxSeriesIdIterator
        }))
    }

    fn tag_value_series_id_set(
        &self,
        name: &[u8],
        key: &[u8],
        value: &[u8],
    ) -> Result<Option<SeriesIdSet>> {
        Ok(self
            .find_tag_value(name, key, value)
            .map(|v| v.series.clone()))
    }

    fn series_id_set(&self) -> Result<SeriesIdSet> {
        Ok(self.series.clone())
    }

    fn tombstone_series_id_set(&self) -> Result<SeriesIdSet> {
        Ok(self.tombstones.clone())
    }

    fn metrics_sketches(&self) -> Result<(HyperLogLog, HyperLogLog)> {
        Ok((
            self.metric_sketch.clone(),
            self.metric_tombstone_sketch.clone(),
        ))
    }

    fn series_sketches(&self) -> Result<(HyperLogLog, HyperLogLog)> {
        Ok((
            self.series_sketch.clone(),
            self.series_tombstone_sketch.clone(),
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

/// Accumulates contents for a new index file
#[derive(Default)]
pub struct IndexFileBuilder {
    data: SegmentData,
}

impl IndexFileBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_series(&mut self, id: SeriesId, name: &[u8], tags: &Tags) {
        self.data.add_series(id, name, tags);
    }

    pub fn delete_metric(&mut self, name: &[u8]) {
        self.data.delete_metric(name);
    }

    pub fn delete_tag_key(&mut self, name: &[u8], key: &[u8]) {
        self.data.delete_tag_key(name, key);
    }

    pub fn delete_tag_value(&mut self, name: &[u8], key: &[u8], value: &[u8]) {
        self.data.delete_tag_value(name, key, value);
    }

    pub fn delete_series_id(&mut self, id: SeriesId) {
        self.data.delete_series_id(id);
    }

    /// Merge a contiguous run of files, ordered newest first.
    ///
    /// Metric, tag key and tag value tombstones of the newest file holding a
    /// key are kept; data below a tombstone is dropped. A live key that some
    /// input tombstoned or recreated comes out recreated, so files older than
    /// the run stay hidden. Series memberships are tombstone-resolved and the
    /// output keeps the union of the inputs' series tombstones so that it
    /// still hides series in older files.
    pub fn from_files(files: &[SegmentFile]) -> Result<Self> {
        let mut data = SegmentData::default();

        let itrs = files
            .iter()
            .map(|f| f.metric_iterator())
            .collect::<Result<Vec<_>>>()?;
        for group in MergeIterator::new(itrs) {
            let group = group?;
            let name = group.key().clone();
            if group.deleted() {
                data.delete_metric(&name);
                continue;
            }

            let series = resolve_series_ids(files, |f| metric_postings(&**f, &name))?;
            data.put_metric_series(&name, series, group.hides_older());

            let visible = visible_files(files, &name)?;
            let mut key_itrs = Vec::with_capacity(visible.len());
            for f in visible {
                if let Some(itr) = f.tag_key_iterator(&name)? {
                    key_itrs.push(itr);
                }
            }

            for key_group in MergeIterator::new(key_itrs) {
                let key_group = key_group?;
                let key = key_group.key().clone();
                if key_group.deleted() {
                    data.delete_tag_key(&name, &key);
                    continue;
                }
                data.tag_key_mut(&name, &key).recreated = key_group.hides_older();

                for value_group in key_group.tag_value_iterator() {
                    let value_group = value_group?;
                    let value = value_group.key();
                    if value_group.deleted() {
                        data.delete_tag_value(&name, &key, value);
                        continue;
                    }
                    let series = resolve_series_ids(files, |f| {
                        tag_value_postings(&**f, &name, &key, value)
                    })?;
                    data.put_tag_value_series(
                        &name,
                        &key,
                        value,
                        series,
                        value_group.hides_older(),
                    );
                }
            }
        }

        data.series = resolve_series_ids(files, |f| Ok(Postings::Series(f.series_id_set()?)))?;
        data.tombstones = SeriesIdSet::new();
        data.metric_sketch = HyperLogLog::default();
        data.metric_tombstone_sketch = HyperLogLog::default();
        data.series_sketch = HyperLogLog::default();
        data.series_tombstone_sketch = HyperLogLog::default();
        for f in files {
            data.tombstones.merge(&f.tombstone_series_id_set()?);

            let (metrics, metric_tombstones) = f.metrics_sketches()?;
            data.metric_sketch.merge(&metrics)?;
            data.metric_tombstone_sketch.merge(&metric_tombstones)?;

            let (series, series_tombstones) = f.series_sketches()?;
            data.series_sketch.merge(&series)?;
            data.series_tombstone_sketch.merge(&series_tombstones)?;
        }

        debug!(
            "Merged {} files into {} metrics, {} series",
            files.len(),
            data.metrics.len(),
            data.series.cardinality()
        );
        Ok(Self { data })
    }

    /// Freeze the contents into an index file
    pub fn build(self, id: u64, level: u32, path: PathBuf, bloom_bits_per_key: usize) -> IndexFile {
        assert!(level > 0, "index files live at level 1 or above");

        let data = self.data;
        let size = data.encoded_size() as u64;
        let memory = data.memory_bytes();

        let mut bloom = BloomFilter::new(data.metrics.len(), bloom_bits_per_key);
        let mut metrics = Vec::with_capacity(data.metrics.len());
        for (name, metric) in data.metrics {
            bloom.add(&name);

            let mut tag_keys = Vec::with_capacity(metric.tag_keys.len());
            let mut key_elems = Vec::with_capacity(metric.tag_keys.len());
            for (key, tag_key) in metric.tag_keys {
                key_elems.push(tag_key.elem(&key));
                let values = tag_key
                    .values
                    .into_iter()
                    .map(|(value, v)| IndexTagValue {
                        value,
                        deleted: v.deleted,
                        recreated: v.recreated,
                        series: v.series,
                    })
                    .collect();
                tag_keys.push(IndexTagKey { key, values });
            }

            metrics.push(IndexMetric {
                name,
                deleted: metric.deleted,
                recreated: metric.recreated,
                series: metric.series,
                tag_keys,
                key_elems: key_elems.into(),
            });
        }

        let metric_elems = metrics
            .iter()
            .map(|m| MetricElem::new(m.name.clone(), m.deleted).with_recreated(m.recreated))
            .collect();

        IndexFile {
            id,
            level,
            path,
            refs: FileRefs::new(),
            closed: AtomicBool::new(false),
            metrics,
            metric_elems,
            memory: memory + bloom.bytes(),
            bloom,
            series: data.series,
            tombstones: data.tombstones,
            metric_sketch: data.metric_sketch,
            metric_tombstone_sketch: data.metric_tombstone_sketch,
            series_sketch: data.series_sketch,
            series_tombstone_sketch: data.series_tombstone_sketch,
            size,
        }
    }
}
