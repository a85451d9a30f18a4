//! Index segments
//!
//! Every segment satisfies the [`File`] contract:
//!
//! - **LogFile**: mutable level-0 segment receiving new series and tombstones
//! - **IndexFile**: immutable segment produced by compaction (level > 0),
//!   with a bloom filter over metric names
//!
//! Lookups distinguish "absent" (`None`) from "present but deleted"
//! (an element whose `deleted()` is true). A live element whose
//! `recreated()` is true was revived after a tombstone in the same segment:
//! it carries only what the segment added since, and hides older segments
//! just as the tombstone did. Elements are facts about one segment only;
//! merging across segments happens in the file set.

mod bloom;
mod data;
mod index;
mod log;

pub use bloom::BloomFilter;
pub use index::{IndexFile, IndexFileBuilder};
pub use log::LogFile;

use crate::series::{BoxSeriesIdIterator, SeriesIdSet};
use crate::sketch::HyperLogLog;
use crate::Result;
use bytes::Bytes;
use std::fmt;
use std::ops::Deref;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

/// Metric record within one segment
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetricElem {
    name: Bytes,
    deleted: bool,
    recreated: bool,
}

impl MetricElem {
    pub fn new(name: Bytes, deleted: bool) -> Self {
        Self {
            name,
            deleted,
            recreated: false,
        }
    }

    pub fn with_recreated(mut self, recreated: bool) -> Self {
        self.recreated = recreated;
        self
    }

    pub fn name(&self) -> &Bytes {
        &self.name
    }

    pub fn deleted(&self) -> bool {
        self.deleted
    }

    pub fn recreated(&self) -> bool {
        self.recreated
    }
}

/// Tag key record within one segment, carrying that segment's values
#[derive(Debug, Clone)]
pub struct TagKeyElem {
    key: Bytes,
    deleted: bool,
    recreated: bool,
    values: Arc<[TagValueElem]>,
}

impl TagKeyElem {
    pub fn new(key: Bytes, deleted: bool, values: Arc<[TagValueElem]>) -> Self {
        Self {
            key,
            deleted,
            recreated: false,
            values,
        }
    }

    pub fn with_recreated(mut self, recreated: bool) -> Self {
        self.recreated = recreated;
        self
    }

    pub fn key(&self) -> &Bytes {
        &self.key
    }

    pub fn deleted(&self) -> bool {
        self.deleted
    }

    pub fn recreated(&self) -> bool {
        self.recreated
    }

    /// Values of this key in the owning segment, in byte order
    pub fn tag_value_iterator(&self) -> TagValueIterator {
        Box::new(ElemSliceIter::new(self.values.clone()))
    }
}

/// Tag value record within one segment
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TagValueElem {
    value: Bytes,
    deleted: bool,
    recreated: bool,
}

impl TagValueElem {
    pub fn new(value: Bytes, deleted: bool) -> Self {
        Self {
            value,
            deleted,
            recreated: false,
        }
    }

    pub fn with_recreated(mut self, recreated: bool) -> Self {
        self.recreated = recreated;
        self
    }

    pub fn value(&self) -> &Bytes {
        &self.value
    }

    pub fn deleted(&self) -> bool {
        self.deleted
    }

    pub fn recreated(&self) -> bool {
        self.recreated
    }
}

pub type MetricIterator = Box<dyn Iterator<Item = Result<MetricElem>> + Send>;
pub type TagKeyIterator = Box<dyn Iterator<Item = Result<TagKeyElem>> + Send>;
pub type TagValueIterator = Box<dyn Iterator<Item = Result<TagValueElem>> + Send>;

/// Iterator over a shared, pre-sorted slice of elements
pub(crate) struct ElemSliceIter<E> {
    items: Arc<[E]>,
    pos: usize,
}

impl<E> ElemSliceIter<E> {
    pub(crate) fn new(items: Arc<[E]>) -> Self {
        Self { items, pos: 0 }
    }
}

impl<E: Clone> Iterator for ElemSliceIter<E> {
    type Item = Result<E>;

    fn next(&mut self) -> Option<Self::Item> {
        let item = self.items.get(self.pos)?.clone();
        self.pos += 1;
        Some(Ok(item))
    }
}

/// Reference count and removal state shared by every segment.
///
/// A segment is removed once it is both obsolete (no longer part of the
/// active file set) and unreferenced. Exactly one caller wins the removal.
#[derive(Debug, Default)]
pub struct FileRefs {
    refs: AtomicUsize,
    obsolete: AtomicBool,
    removed: AtomicBool,
}

impl FileRefs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn count(&self) -> usize {
        self.refs.load(Ordering::SeqCst)
    }

    pub fn is_obsolete(&self) -> bool {
        self.obsolete.load(Ordering::SeqCst)
    }

    fn retain(&self) {
        self.refs.fetch_add(1, Ordering::SeqCst);
    }

    /// Returns true if the caller must remove the segment
    fn release(&self) -> bool {
        if self
            .refs
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_err()
        {
            panic!("release of unretained file");
        }
        self.claim_removal()
    }

    /// Returns true if the caller must remove the segment
    fn mark_obsolete(&self) -> bool {
        self.obsolete.store(true, Ordering::SeqCst);
        self.claim_removal()
    }

    fn claim_removal(&self) -> bool {
        self.obsolete.load(Ordering::SeqCst)
            && self.refs.load(Ordering::SeqCst) == 0
            && !self.removed.swap(true, Ordering::SeqCst)
    }
}

/// Capability contract of a log or index segment
pub trait File: Send + Sync {
    /// Identifier, unique within a file set
    fn id(&self) -> u64;
    /// Compaction level. 0 for log files.
    fn level(&self) -> u32;
    fn path(&self) -> &Path;
    /// On-disk size in bytes
    fn size(&self) -> u64;
    /// Estimated resident memory in bytes
    fn memory_bytes(&self) -> usize;

    fn metric(&self, name: &[u8]) -> Result<Option<MetricElem>>;
    fn metric_iterator(&self) -> Result<MetricIterator>;

    fn tag_key(&self, name: &[u8], key: &[u8]) -> Result<Option<TagKeyElem>>;
    /// `None` if the segment knows nothing about the metric
    fn tag_key_iterator(&self, name: &[u8]) -> Result<Option<TagKeyIterator>>;

    fn tag_value(&self, name: &[u8], key: &[u8], value: &[u8]) -> Result<Option<TagValueElem>>;
    fn tag_value_iterator(&self, name: &[u8], key: &[u8]) -> Result<Option<TagValueIterator>>;

    fn metric_series_id_iterator(&self, name: &[u8]) -> Result<Option<BoxSeriesIdIterator>>;
    fn tag_key_series_id_iterator(
        &self,
        name: &[u8],
        key: &[u8],
    ) -> Result<Option<BoxSeriesIdIterator>>;
    fn tag_value_series_id_set(
        &self,
        name: &[u8],
        key: &[u8],
        value: &[u8],
    ) -> Result<Option<SeriesIdSet>>;

    /// Every series this segment adds
    fn series_id_set(&self) -> Result<SeriesIdSet>;
    /// Every series this segment deletes
    fn tombstone_series_id_set(&self) -> Result<SeriesIdSet>;

    /// (additions, tombstones) sketches over metric names
    fn metrics_sketches(&self) -> Result<(HyperLogLog, HyperLogLog)>;
    /// (additions, tombstones) sketches over series IDs
    fn series_sketches(&self) -> Result<(HyperLogLog, HyperLogLog)>;

    fn refs(&self) -> &FileRefs;

    /// Close the segment. Idempotent.
    fn close(&self) -> Result<()>;

    fn retain(&self) {
        self.refs().retain();
    }

    /// Drop one reference. Panics if the file was not retained.
    fn release(&self) {
        if self.refs().release() {
            remove_file(self);
        }
    }

    /// Flag the file as superseded; it is removed once unreferenced
    fn mark_obsolete(&self) {
        if self.refs().mark_obsolete() {
            remove_file(self);
        }
    }

    fn ref_count(&self) -> usize {
        self.refs().count()
    }
}

fn remove_file<F: File + ?Sized>(file: &F) {
    if let Err(e) = file.close() {
        warn!("Failed to close index file {}: {}", file.id(), e);
    }

    let path = file.path();
    if !path.exists() {
        return;
    }
    match std::fs::remove_file(path) {
        Ok(()) => debug!("Removed index file {} at {:?}", file.id(), path),
        Err(e) => warn!("Failed to remove index file {:?}: {}", path, e),
    }
}

/// A segment in a file set: the closed set of segment kinds
#[derive(Clone)]
pub enum SegmentFile {
    Log(Arc<LogFile>),
    Index(Arc<IndexFile>),
}

impl SegmentFile {
    /// Identity comparison: both handles refer to the same segment object
    pub fn ptr_eq(&self, other: &SegmentFile) -> bool {
        match (self, other) {
            (SegmentFile::Log(a), SegmentFile::Log(b)) => Arc::ptr_eq(a, b),
            (SegmentFile::Index(a), SegmentFile::Index(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }

    pub fn as_log(&self) -> Option<&Arc<LogFile>> {
        match self {
            SegmentFile::Log(f) => Some(f),
            SegmentFile::Index(_) => None,
        }
    }

    pub fn as_index(&self) -> Option<&Arc<IndexFile>> {
        match self {
            SegmentFile::Index(f) => Some(f),
            SegmentFile::Log(_) => None,
        }
    }
}

impl Deref for SegmentFile {
    type Target = dyn File;

    fn deref(&self) -> &Self::Target {
        match self {
            SegmentFile::Log(f) => f.as_ref(),
            SegmentFile::Index(f) => f.as_ref(),
        }
    }
}

impl From<Arc<LogFile>> for SegmentFile {
    fn from(f: Arc<LogFile>) -> Self {
        SegmentFile::Log(f)
    }
}

impl From<Arc<IndexFile>> for SegmentFile {
    fn from(f: Arc<IndexFile>) -> Self {
        SegmentFile::Index(f)
    }
}

impl fmt::Debug for SegmentFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self {
            SegmentFile::Log(_) => "Log",
            SegmentFile::Index(_) => "Index",
        };
        write!(f, "{}(id={}, level={})", kind, self.id(), self.level())
    }
}
