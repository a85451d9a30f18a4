//! K-way merge across segments
//!
//! Every segment iterator yields elements sorted by key. A [`MergeIterator`]
//! buffers one element per source, picks the smallest key and groups every
//! buffered element with that key into a [`Merged`] value. Sources are given
//! newest first, so a group lists its constituents in precedence order and
//! only the first one decides whether the key is deleted. A constituent that
//! is deleted or recreated hides every older one.
//!
//! Series membership is resolved separately by [`resolve_series_ids`], which
//! replays the segments from oldest to newest applying tombstones.

use crate::file::{
    File, MetricElem, SegmentFile, TagKeyElem, TagValueElem, TagValueIterator,
};
use crate::series::{collect_series_id_set, SeriesIdSet};
use crate::Result;
use bytes::Bytes;
use std::iter::Fuse;

/// Element that can take part in a merge
pub trait MergeElem: Clone + Send {
    fn key(&self) -> &Bytes;
    fn deleted(&self) -> bool;
    fn recreated(&self) -> bool;

    /// Whether older segments' records of the key are hidden
    fn hides_older(&self) -> bool {
        self.deleted() || self.recreated()
    }
}

impl MergeElem for MetricElem {
    fn key(&self) -> &Bytes {
        self.name()
    }

    fn deleted(&self) -> bool {
        MetricElem::deleted(self)
    }

    fn recreated(&self) -> bool {
        MetricElem::recreated(self)
    }
}

impl MergeElem for TagKeyElem {
    fn key(&self) -> &Bytes {
        TagKeyElem::key(self)
    }

    fn deleted(&self) -> bool {
        TagKeyElem::deleted(self)
    }

    fn recreated(&self) -> bool {
        TagKeyElem::recreated(self)
    }
}

impl MergeElem for TagValueElem {
    fn key(&self) -> &Bytes {
        self.value()
    }

    fn deleted(&self) -> bool {
        TagValueElem::deleted(self)
    }

    fn recreated(&self) -> bool {
        TagValueElem::recreated(self)
    }
}

/// Boxed per-segment source of sorted elements
pub type ElemIterator<E> = Box<dyn Iterator<Item = Result<E>> + Send>;

/// All elements sharing one key, newest first. Never empty.
#[derive(Debug, Clone)]
pub struct Merged<E> {
    elems: Vec<E>,
}

impl<E: MergeElem> Merged<E> {
    /// Group pre-collected elements of one key, newest first
    pub fn from_elems(elems: Vec<E>) -> Option<Self> {
        (!elems.is_empty()).then_some(Self { elems })
    }

    pub fn key(&self) -> &Bytes {
        self.newest().key()
    }

    /// Deleted if the newest constituent is a tombstone
    pub fn deleted(&self) -> bool {
        self.newest().deleted()
    }

    /// Whether some constituent hides segments older than the group
    pub fn hides_older(&self) -> bool {
        self.elems.iter().any(|e| e.hides_older())
    }

    pub fn newest(&self) -> &E {
        &self.elems[0]
    }

    pub fn elems(&self) -> &[E] {
        &self.elems
    }
}

impl Merged<TagKeyElem> {
    /// Merged values of the key. Segments older than the first one that
    /// tombstones or recreates the key are not consulted.
    pub fn tag_value_iterator(&self) -> TagValueMergeIterator {
        let mut itrs: Vec<TagValueIterator> = Vec::with_capacity(self.elems.len());
        for elem in &self.elems {
            itrs.push(elem.tag_value_iterator());
            if elem.hides_older() {
                break;
            }
        }
        MergeIterator::new(itrs)
    }
}

/// Merge iterator over sorted per-segment sources
pub struct MergeIterator<E> {
    buf: Vec<Option<E>>,
    itrs: Vec<Fuse<ElemIterator<E>>>,
}

pub type MetricMergeIterator = MergeIterator<MetricElem>;
pub type TagKeyMergeIterator = MergeIterator<TagKeyElem>;
pub type TagValueMergeIterator = MergeIterator<TagValueElem>;

impl<E: MergeElem> MergeIterator<E> {
    /// Sources must be ordered newest first
    pub fn new(itrs: Vec<ElemIterator<E>>) -> Self {
        Self {
            buf: itrs.iter().map(|_| None).collect(),
            itrs: itrs.into_iter().map(Iterator::fuse).collect(),
        }
    }

    /// Keys of groups whose newest constituent is live
    pub fn live_keys(self) -> LiveKeys<E> {
        LiveKeys { inner: self }
    }
}

impl<E: MergeElem> Iterator for MergeIterator<E> {
    type Item = Result<Merged<E>>;

    fn next(&mut self) -> Option<Self::Item> {
        // Refill empty buffers
        for (slot, itr) in self.buf.iter_mut().zip(self.itrs.iter_mut()) {
            if slot.is_some() {
                continue;
            }
            match itr.next() {
                Some(Ok(elem)) => *slot = Some(elem),
                Some(Err(e)) => return Some(Err(e)),
                None => {}
            }
        }

        let key = self.buf.iter().flatten().map(MergeElem::key).min()?.clone();

        // Take every buffered element with the smallest key, in source order
        let mut elems = Vec::new();
        for slot in &mut self.buf {
            if slot.as_ref().is_some_and(|e| e.key() == &key) {
                elems.extend(slot.take());
            }
        }
        Some(Ok(Merged { elems }))
    }
}

/// Adapter for consumers without a notion of tombstones
pub struct LiveKeys<E> {
    inner: MergeIterator<E>,
}

impl<E: MergeElem> Iterator for LiveKeys<E> {
    type Item = Result<Bytes>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            match self.inner.next()? {
                Ok(group) if group.deleted() => continue,
                Ok(group) => return Some(Ok(group.key().clone())),
                Err(e) => return Some(Err(e)),
            }
        }
    }
}

/// What one segment says about the series of a key
pub enum Postings {
    /// The segment knows nothing about the key
    Absent,
    /// The segment tombstones the key, hiding older membership
    Tombstoned,
    /// The segment recreated the key: its series replace older membership
    Replaced(SeriesIdSet),
    Series(SeriesIdSet),
}

/// Resolve the live series of a key across segments ordered newest first.
///
/// Segments are replayed from oldest to newest. Each segment first removes
/// the series it tombstones from the running set, then contributes its own
/// postings, so a deletion in a newer segment hides older membership while
/// a series re-added by a newer segment survives.
pub fn resolve_series_ids<F>(files: &[SegmentFile], mut postings: F) -> Result<SeriesIdSet>
where
    F: FnMut(&SegmentFile) -> Result<Postings>,
{
    let mut ss = SeriesIdSet::new();
    for f in files.iter().rev() {
        let tombstones = f.tombstone_series_id_set()?;
        if !tombstones.is_empty() {
            ss = ss.and_not(&tombstones);
        }
        match postings(f)? {
            Postings::Absent => {}
            Postings::Tombstoned => ss = SeriesIdSet::new(),
            Postings::Replaced(set) => ss = set,
            Postings::Series(set) => ss.merge(&set),
        }
    }
    Ok(ss)
}

/// Newest-first prefix of `files` whose tag data is visible for a metric.
/// Stops before the first file tombstoning the metric, or just after the
/// first file recreating it.
pub fn visible_files<'a>(files: &'a [SegmentFile], name: &[u8]) -> Result<&'a [SegmentFile]> {
    for (i, f) in files.iter().enumerate() {
        match f.metric(name)? {
            Some(e) if e.deleted() => return Ok(&files[..i]),
            Some(e) if e.recreated() => return Ok(&files[..=i]),
            _ => {}
        }
    }
    Ok(files)
}

/// Postings of a metric in one segment
pub fn metric_postings(f: &dyn File, name: &[u8]) -> Result<Postings> {
    let Some(e) = f.metric(name)? else {
        return Ok(Postings::Absent);
    };
    if e.deleted() {
        return Ok(Postings::Tombstoned);
    }
    let set = match f.metric_series_id_iterator(name)? {
        Some(itr) => collect_series_id_set(itr)?,
        None => SeriesIdSet::new(),
    };
    Ok(if e.recreated() {
        Postings::Replaced(set)
    } else {
        Postings::Series(set)
    })
}

/// Postings of a tag value in one segment. A tombstone on the metric or the
/// tag key hides the value as well, and a recreated metric or tag key
/// replaces older membership even where this segment lacks the value.
pub fn tag_value_postings(f: &dyn File, name: &[u8], key: &[u8], value: &[u8]) -> Result<Postings> {
    let mut recreated = false;
    if let Some(e) = f.metric(name)? {
        if e.deleted() {
            return Ok(Postings::Tombstoned);
        }
        recreated = e.recreated();
    }
    if let Some(e) = f.tag_key(name, key)? {
        if e.deleted() {
            return Ok(Postings::Tombstoned);
        }
        recreated |= e.recreated();
    }
    let set = match f.tag_value(name, key, value)? {
        Some(e) if e.deleted() => return Ok(Postings::Tombstoned),
        Some(e) => {
            recreated |= e.recreated();
            f.tag_value_series_id_set(name, key, value)?
        }
        None => None,
    };
    Ok(match (set, recreated) {
        (set, true) => Postings::Replaced(set.unwrap_or_default()),
        (Some(set), false) => Postings::Series(set),
        (None, false) => Postings::Absent,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::IndexError;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};
    use std::collections::BTreeMap;
    use std::sync::Arc;

    fn metrics(elems: &[(&'static str, bool)]) -> ElemIterator<MetricElem> {
        let elems: Vec<Result<MetricElem>> = elems
            .iter()
            .map(|&(name, deleted)| Ok(MetricElem::new(Bytes::from_static(name.as_bytes()), deleted)))
            .collect();
        Box::new(elems.into_iter())
    }

    fn drain<E: MergeElem>(itr: MergeIterator<E>) -> Vec<(Bytes, bool, usize)> {
        itr.map(|g| {
            let g = g.unwrap();
            (g.key().clone(), g.deleted(), g.elems().len())
        })
        .collect()
    }

    #[test]
    fn test_newer_tombstone_wins() {
        let newer = metrics(&[("cpu", true)]);
        let older = metrics(&[("cpu", false), ("mem", false)]);
        let out = drain(MergeIterator::new(vec![newer, older]));

        assert_eq!(
            out,
            vec![
                (Bytes::from("cpu"), true, 2),
                (Bytes::from("mem"), false, 1)
            ]
        );
    }

    #[test]
    fn test_newer_live_shadows_older_tombstone() {
        let newer = metrics(&[("cpu", false)]);
        let older = metrics(&[("cpu", true)]);
        let out = drain(MergeIterator::new(vec![newer, older]));
        assert_eq!(out, vec![(Bytes::from("cpu"), false, 2)]);
    }

    #[test]
    fn test_interleaved_sources_sorted() {
        let a = metrics(&[("a", false), ("d", false), ("f", false)]);
        let b = metrics(&[("b", false), ("d", false)]);
        let c = metrics(&[]);
        let d = metrics(&[("c", false), ("f", true), ("g", false)]);
        let keys: Vec<_> = drain(MergeIterator::new(vec![a, b, c, d]))
            .into_iter()
            .map(|(k, _, _)| k)
            .collect();
        assert_eq!(keys, vec!["a", "b", "c", "d", "f", "g"]);
    }

    #[test]
    fn test_live_keys_skips_tombstones() {
        let newer = metrics(&[("cpu", true), ("disk", false)]);
        let older = metrics(&[("cpu", false), ("mem", false)]);
        let keys: Vec<Bytes> = MergeIterator::new(vec![newer, older])
            .live_keys()
            .map(|k| k.unwrap())
            .collect();
        assert_eq!(keys, vec![Bytes::from("disk"), Bytes::from("mem")]);
    }

    #[test]
    fn test_empty_merge() {
        let mut itr: MetricMergeIterator = MergeIterator::new(Vec::new());
        assert!(itr.next().is_none());
        assert!(itr.next().is_none());
    }

    #[test]
    fn test_source_error_propagates() {
        let failing: ElemIterator<MetricElem> = Box::new(
            vec![Err(IndexError::Corruption("bad block".into()))].into_iter(),
        );
        let mut itr = MergeIterator::new(vec![metrics(&[("cpu", false)]), failing]);
        let err = itr.next().unwrap().unwrap_err();
        assert!(err.is_corruption());
    }

    #[test]
    fn test_tag_value_iterator_stops_at_deleted_key() {
        let values = |vs: &[&'static str]| -> Arc<[TagValueElem]> {
            vs.iter()
                .map(|&v| TagValueElem::new(Bytes::from_static(v.as_bytes()), false))
                .collect::<Vec<_>>()
                .into()
        };
        let newest = TagKeyElem::new("host".into(), false, values(&["a"]));
        let middle = TagKeyElem::new("host".into(), true, values(&["b"]));
        let oldest = TagKeyElem::new("host".into(), false, values(&["c"]));

        let group = Merged {
            elems: vec![newest, middle, oldest],
        };
        let got: Vec<Bytes> = group
            .tag_value_iterator()
            .map(|g| g.unwrap().key().clone())
            .collect();
        assert_eq!(got, vec![Bytes::from("a"), Bytes::from("b")]);
    }

    #[test]
    fn test_tag_value_iterator_stops_at_recreated_key() {
        let values = |vs: &[&'static str]| -> Arc<[TagValueElem]> {
            vs.iter()
                .map(|&v| TagValueElem::new(Bytes::from_static(v.as_bytes()), false))
                .collect::<Vec<_>>()
                .into()
        };
        let newer = TagKeyElem::new("host".into(), false, values(&["b"])).with_recreated(true);
        let older = TagKeyElem::new("host".into(), false, values(&["a"]));

        let group = Merged {
            elems: vec![newer, older],
        };
        assert!(!group.deleted());
        assert!(group.hides_older());
        let got: Vec<Bytes> = group
            .tag_value_iterator()
            .map(|g| g.unwrap().key().clone())
            .collect();
        assert_eq!(got, vec![Bytes::from("b")]);
    }

    #[test]
    fn test_group_hides_older_only_with_barrier() {
        let plain = Merged::from_elems(vec![
            MetricElem::new("cpu".into(), false),
            MetricElem::new("cpu".into(), false),
        ])
        .unwrap();
        assert!(!plain.hides_older());

        let tombstoned = Merged::from_elems(vec![
            MetricElem::new("cpu".into(), false),
            MetricElem::new("cpu".into(), true),
        ])
        .unwrap();
        assert!(!tombstoned.deleted());
        assert!(tombstoned.hides_older());
    }

    #[test]
    fn test_randomized_merge_matches_model() {
        let mut rng = StdRng::seed_from_u64(42);

        for _ in 0..50 {
            let n = rng.gen_range(1..6);
            let mut sources = Vec::with_capacity(n);
            for _ in 0..n {
                let mut src = BTreeMap::new();
                for _ in 0..rng.gen_range(0..20) {
                    let key = format!("m{:02}", rng.gen_range(0..30));
                    src.insert(key, rng.gen_bool(0.2));
                }
                sources.push(src);
            }

            // First source holding a key decides its state
            let mut model: BTreeMap<String, bool> = BTreeMap::new();
            for src in sources.iter().rev() {
                for (k, d) in src {
                    model.insert(k.clone(), *d);
                }
            }

            let itrs: Vec<ElemIterator<MetricElem>> = sources
                .iter()
                .map(|src| {
                    let elems: Vec<Result<MetricElem>> = src
                        .iter()
                        .map(|(k, d)| Ok(MetricElem::new(Bytes::from(k.clone()), *d)))
                        .collect();
                    Box::new(elems.into_iter()) as ElemIterator<MetricElem>
                })
                .collect();

            let got: Vec<(String, bool)> = MergeIterator::new(itrs)
                .map(|g| {
                    let g = g.unwrap();
                    (String::from_utf8(g.key().to_vec()).unwrap(), g.deleted())
                })
                .collect();
            let want: Vec<(String, bool)> = model.into_iter().collect();
            assert_eq!(got, want);
        }
    }
}
