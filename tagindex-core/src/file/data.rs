//! Sorted in-memory segment contents
//!
//! Shared by the mutable log file and the index file builder.

use super::{MetricElem, TagKeyElem, TagValueElem};
use crate::series::SeriesIdSet;
use crate::sketch::{HyperLogLog, Sketch};
use crate::{SeriesId, Tags};
use bytes::Bytes;
use std::collections::BTreeMap;

/// Fixed per-entry overhead used in size estimates (flag + length prefixes)
const ENTRY_OVERHEAD: usize = 8;

#[derive(Default)]
pub(crate) struct SegmentData {
    pub metrics: BTreeMap<Bytes, MetricData>,
    pub series: SeriesIdSet,
    pub tombstones: SeriesIdSet,
    pub metric_sketch: HyperLogLog,
    pub metric_tombstone_sketch: HyperLogLog,
    pub series_sketch: HyperLogLog,
    pub series_tombstone_sketch: HyperLogLog,
}

/// `recreated` marks a record revived after this segment tombstoned it.
/// Like a tombstone, it hides what older segments hold under the key.
#[derive(Default)]
pub(crate) struct MetricData {
    pub deleted: bool,
    pub recreated: bool,
    pub series: SeriesIdSet,
    pub tag_keys: BTreeMap<Bytes, TagKeyData>,
}

#[derive(Default)]
pub(crate) struct TagKeyData {
    pub deleted: bool,
    pub recreated: bool,
    pub values: BTreeMap<Bytes, TagValueData>,
}

#[derive(Default)]
pub(crate) struct TagValueData {
    pub deleted: bool,
    pub recreated: bool,
    pub series: SeriesIdSet,
}

impl MetricData {
    fn reset(&mut self, deleted: bool) {
        self.recreated = !deleted;
        self.deleted = deleted;
        self.series = SeriesIdSet::new();
        self.tag_keys.clear();
    }
}

impl SegmentData {
    /// Record a series under its metric and tags. Returns the bytes added.
    pub fn add_series(&mut self, id: SeriesId, name: &[u8], tags: &Tags) -> usize {
        let mut added = ENTRY_OVERHEAD + name.len();

        if self.metrics.get(name).map_or(true, |m| m.deleted) {
            self.metric_sketch.add(name);
        }
        let metric = self.metric_mut(name);
        if metric.deleted {
            metric.reset(false);
        }
        metric.series.add(id);

        for tag in tags {
            let key = metric.tag_keys.entry(tag.key.clone()).or_default();
            if key.deleted {
                key.deleted = false;
                key.recreated = true;
                key.values.clear();
            }
            let value = key.values.entry(tag.value.clone()).or_default();
            if value.deleted {
                value.deleted = false;
                value.recreated = true;
                value.series = SeriesIdSet::new();
            }
            value.series.add(id);
            added += ENTRY_OVERHEAD + tag.size();
        }

        if self.series.add(id) {
            self.series_sketch.add(&id.to_be_bytes());
        }
        self.tombstones.remove(id);
        added
    }

    /// Tombstone a metric, dropping everything this segment holds under it
    pub fn delete_metric(&mut self, name: &[u8]) -> usize {
        self.metric_mut(name).reset(true);
        self.metric_tombstone_sketch.add(name);
        ENTRY_OVERHEAD + name.len()
    }

    /// Tombstone a tag key, dropping this segment's values under it
    pub fn delete_tag_key(&mut self, name: &[u8], key: &[u8]) -> usize {
        let tag_key = self.tag_key_mut(name, key);
        tag_key.deleted = true;
        tag_key.recreated = false;
        tag_key.values.clear();
        ENTRY_OVERHEAD + name.len() + key.len()
    }

    /// Tombstone a tag value, dropping this segment's series under it
    pub fn delete_tag_value(&mut self, name: &[u8], key: &[u8], value: &[u8]) -> usize {
        let tag_value = self
            .tag_key_mut(name, key)
            .values
            .entry(Bytes::copy_from_slice(value))
            .or_default();
        tag_value.deleted = true;
        tag_value.recreated = false;
        tag_value.series = SeriesIdSet::new();
        ENTRY_OVERHEAD + name.len() + key.len() + value.len()
    }

    /// Tombstone a series and remove it from this segment's memberships
    pub fn delete_series_id(&mut self, id: SeriesId) -> usize {
        if self.tombstones.add(id) {
            self.series_tombstone_sketch.add(&id.to_be_bytes());
        }
        if self.series.remove(id) {
            for metric in self.metrics.values_mut() {
                if !metric.series.remove(id) {
                    continue;
                }
                for key in metric.tag_keys.values_mut() {
                    for value in key.values.values_mut() {
                        value.series.remove(id);
                    }
                }
            }
        }
        ENTRY_OVERHEAD + 8
    }

    /// Install the resolved series of a live metric
    pub fn put_metric_series(&mut self, name: &[u8], series: SeriesIdSet, recreated: bool) {
        let metric = self.metric_mut(name);
        metric.deleted = false;
        metric.recreated = recreated;
        metric.series = series;
    }

    /// Install the resolved series of a live tag value
    pub fn put_tag_value_series(
        &mut self,
        name: &[u8],
        key: &[u8],
        value: &[u8],
        series: SeriesIdSet,
        recreated: bool,
    ) {
        let tag_value = self
            .tag_key_mut(name, key)
            .values
            .entry(Bytes::copy_from_slice(value))
            .or_default();
        tag_value.deleted = false;
        tag_value.recreated = recreated;
        tag_value.series = series;
    }

    pub fn metric_mut(&mut self, name: &[u8]) -> &mut MetricData {
        self.metrics
            .entry(Bytes::copy_from_slice(name))
            .or_default()
    }

    pub fn tag_key_mut(&mut self, name: &[u8], key: &[u8]) -> &mut TagKeyData {
        self.metric_mut(name)
            .tag_keys
            .entry(Bytes::copy_from_slice(key))
            .or_default()
    }

    pub fn metric_elem(&self, name: &[u8]) -> Option<MetricElem> {
        self.metrics
            .get_key_value(name)
            .map(|(k, m)| MetricElem::new(k.clone(), m.deleted).with_recreated(m.recreated))
    }

    pub fn metric_elems(&self) -> Vec<MetricElem> {
        self.metrics
            .iter()
            .map(|(k, m)| MetricElem::new(k.clone(), m.deleted).with_recreated(m.recreated))
            .collect()
    }

    pub fn tag_key_elem(&self, name: &[u8], key: &[u8]) -> Option<TagKeyElem> {
        let (k, data) = self.metrics.get(name)?.tag_keys.get_key_value(key)?;
        Some(data.elem(k))
    }

    pub fn tag_key_elems(&self, name: &[u8]) -> Option<Vec<TagKeyElem>> {
        let metric = self.metrics.get(name)?;
        Some(metric.tag_keys.iter().map(|(k, d)| d.elem(k)).collect())
    }

    pub fn tag_value_elem(&self, name: &[u8], key: &[u8], value: &[u8]) -> Option<TagValueElem> {
        let (v, data) = self
            .metrics
            .get(name)?
            .tag_keys
            .get(key)?
            .values
            .get_key_value(value)?;
        Some(TagValueElem::new(v.clone(), data.deleted).with_recreated(data.recreated))
    }

    pub fn tag_value_elems(&self, name: &[u8], key: &[u8]) -> Option<Vec<TagValueElem>> {
        let key = self.metrics.get(name)?.tag_keys.get(key)?;
        Some(key.value_elems())
    }

    /// Union of series under every value of a tag key
    pub fn tag_key_series(&self, name: &[u8], key: &[u8]) -> Option<SeriesIdSet> {
        let key = self.metrics.get(name)?.tag_keys.get(key)?;
        let mut set = SeriesIdSet::new();
        for value in key.values.values() {
            set.merge(&value.series);
        }
        Some(set)
    }

    pub fn tag_value_series(&self, name: &[u8], key: &[u8], value: &[u8]) -> Option<&SeriesIdSet> {
        self.metrics
            .get(name)?
            .tag_keys
            .get(key)?
            .values
            .get(value)
            .map(|v| &v.series)
    }

    /// Estimated encoded size of the contents
    pub fn encoded_size(&self) -> usize {
        let mut size = self.series.bytes() + self.tombstones.bytes();
        for (name, metric) in &self.metrics {
            size += ENTRY_OVERHEAD + name.len() + metric.series.bytes();
            for (key, tag_key) in &metric.tag_keys {
                size += ENTRY_OVERHEAD + key.len();
                for (value, tag_value) in &tag_key.values {
                    size += ENTRY_OVERHEAD + value.len() + tag_value.series.bytes();
                }
            }
        }
        size
    }

    /// Estimated resident memory
    pub fn memory_bytes(&self) -> usize {
        self.encoded_size()
            + self.metric_sketch.bytes()
            + self.metric_tombstone_sketch.bytes()
            + self.series_sketch.bytes()
            + self.series_tombstone_sketch.bytes()
    }
}

impl TagKeyData {
    pub fn elem(&self, key: &Bytes) -> TagKeyElem {
        TagKeyElem::new(key.clone(), self.deleted, self.value_elems().into())
            .with_recreated(self.recreated)
    }

    pub fn value_elems(&self) -> Vec<TagValueElem> {
        self.values
            .iter()
            .map(|(v, d)| {
                TagValueElem::new(v.clone(), d.deleted).with_recreated(d.recreated)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tags(pairs: &[(&'static str, &'static str)]) -> Tags {
        Tags::from_pairs(pairs.iter().copied())
    }

    #[test]
    fn test_add_series_builds_postings() {
        let mut data = SegmentData::default();
        data.add_series(1, b"cpu", &tags(&[("host", "a"), ("region", "us")]));
        data.add_series(2, b"cpu", &tags(&[("host", "b")]));

        let metric = &data.metrics[&Bytes::from("cpu")];
        assert_eq!(metric.series.cardinality(), 2);
        assert_eq!(
            data.tag_value_series(b"cpu", b"host", b"a")
                .unwrap()
                .iter()
                .collect::<Vec<_>>(),
            vec![1]
        );
        assert_eq!(
            data.tag_key_series(b"cpu", b"host").unwrap().cardinality(),
            2
        );
        assert_eq!(data.series.cardinality(), 2);
    }

    #[test]
    fn test_delete_metric_clears_and_readd_revives() {
        let mut data = SegmentData::default();
        data.add_series(1, b"cpu", &tags(&[("host", "a")]));
        data.delete_metric(b"cpu");

        assert_eq!(data.metric_elem(b"cpu"), Some(MetricElem::new("cpu".into(), true)));
        assert!(data.tag_key_elems(b"cpu").unwrap().is_empty());

        data.add_series(2, b"cpu", &tags(&[("host", "b")]));
        let revived = data.metric_elem(b"cpu").unwrap();
        assert!(!revived.deleted());
        assert!(revived.recreated());
        assert!(data.tag_value_elem(b"cpu", b"host", b"a").is_none());

        data.delete_metric(b"cpu");
        assert!(!data.metric_elem(b"cpu").unwrap().recreated());
    }

    #[test]
    fn test_fresh_records_are_not_recreated() {
        let mut data = SegmentData::default();
        data.add_series(1, b"cpu", &tags(&[("host", "a")]));
        data.add_series(2, b"cpu", &tags(&[("host", "b")]));

        assert!(!data.metric_elem(b"cpu").unwrap().recreated());
        assert!(!data.tag_key_elem(b"cpu", b"host").unwrap().recreated());
        assert!(!data.tag_value_elem(b"cpu", b"host", b"a").unwrap().recreated());
    }

    #[test]
    fn test_readd_after_tag_tombstones_marks_recreated() {
        let mut data = SegmentData::default();
        data.add_series(1, b"cpu", &tags(&[("host", "a"), ("region", "us")]));
        data.delete_tag_key(b"cpu", b"region");
        data.delete_tag_value(b"cpu", b"host", b"a");

        data.add_series(2, b"cpu", &tags(&[("host", "a"), ("region", "eu")]));
        let region = data.tag_key_elem(b"cpu", b"region").unwrap();
        assert!(!region.deleted());
        assert!(region.recreated());
        assert!(data.tag_value_elem(b"cpu", b"region", b"us").is_none());

        let host_a = data.tag_value_elem(b"cpu", b"host", b"a").unwrap();
        assert!(!host_a.deleted());
        assert!(host_a.recreated());
        assert_eq!(
            data.tag_value_series(b"cpu", b"host", b"a")
                .unwrap()
                .iter()
                .collect::<Vec<_>>(),
            vec![2]
        );
        assert!(!data.metric_elem(b"cpu").unwrap().recreated());
    }

    #[test]
    fn test_delete_series_removes_memberships() {
        let mut data = SegmentData::default();
        data.add_series(1, b"cpu", &tags(&[("host", "a")]));
        data.add_series(2, b"cpu", &tags(&[("host", "a")]));
        data.delete_series_id(1);

        assert!(data.tombstones.contains(1));
        assert!(!data.series.contains(1));
        assert_eq!(
            data.tag_value_series(b"cpu", b"host", b"a")
                .unwrap()
                .iter()
                .collect::<Vec<_>>(),
            vec![2]
        );

        data.add_series(1, b"cpu", &tags(&[("host", "a")]));
        assert!(!data.tombstones.contains(1));
    }

    #[test]
    fn test_tag_tombstones() {
        let mut data = SegmentData::default();
        data.add_series(1, b"cpu", &tags(&[("host", "a"), ("region", "us")]));
        data.delete_tag_value(b"cpu", b"host", b"a");
        data.delete_tag_key(b"cpu", b"region");

        assert!(data.tag_value_elem(b"cpu", b"host", b"a").unwrap().deleted());
        assert!(data.tag_value_series(b"cpu", b"host", b"a").unwrap().is_empty());
        let region = data.tag_key_elem(b"cpu", b"region").unwrap();
        assert!(region.deleted());
        assert_eq!(region.tag_value_iterator().count(), 0);
    }
}
