//! Series ID iterators

use super::SeriesIdSet;
use crate::{Result, SeriesId};

/// Pull-based iterator over ascending series IDs.
///
/// `Ok(None)` marks the end of iteration.
pub trait SeriesIdIterator: Send {
    /// Next series ID, or `None` once exhausted
    fn next_id(&mut self) -> Result<Option<SeriesId>>;

    /// Release resources held by the iterator
    fn close(&mut self) -> Result<()> {
        Ok(())
    }

    /// Materialized set, if the iterator is backed by one
    fn series_id_set(&self) -> Option<&SeriesIdSet> {
        None
    }
}

/// Boxed series ID iterator
pub type BoxSeriesIdIterator = Box<dyn SeriesIdIterator>;

/// Iterator over the members of a `SeriesIdSet`
pub struct SeriesIdSetIterator {
    set: SeriesIdSet,
    ids: roaring::treemap::IntoIter,
}

impl SeriesIdSetIterator {
    pub fn new(set: SeriesIdSet) -> Self {
        let ids = set.clone().into_bitmap_iter();
        Self { set, ids }
    }
}

impl SeriesIdIterator for SeriesIdSetIterator {
    fn next_id(&mut self) -> Result<Option<SeriesId>> {
        Ok(self.ids.next())
    }

    fn series_id_set(&self) -> Option<&SeriesIdSet> {
        Some(&self.set)
    }
}

/// Iterator over a pre-sorted list of IDs
pub struct SeriesIdSliceIterator {
    ids: std::vec::IntoIter<SeriesId>,
}

impl SeriesIdSliceIterator {
    pub fn new(ids: Vec<SeriesId>) -> Self {
        Self {
            ids: ids.into_iter(),
        }
    }
}

impl SeriesIdIterator for SeriesIdSliceIterator {
    fn next_id(&mut self) -> Result<Option<SeriesId>> {
        Ok(self.ids.next())
    }
}

/// Merge a list of iterators into one ascending, de-duplicated iterator.
///
/// Returns `None` for an empty list. When every input is set-backed the
/// sets are unioned directly instead of merging element by element; the
/// inputs are closed then, and the first close error is returned.
pub fn merge_series_id_iterators(
    mut itrs: Vec<BoxSeriesIdIterator>,
) -> Result<Option<BoxSeriesIdIterator>> {
    match itrs.len() {
        0 => return Ok(None),
        1 => return Ok(itrs.pop()),
        _ => {}
    }

    if itrs.iter().all(|itr| itr.series_id_set().is_some()) {
        let mut set = SeriesIdSet::new();
        let mut first_err = None;
        for itr in &mut itrs {
            if let Some(other) = itr.series_id_set() {
                set.merge(other);
            }
            if let Err(e) = itr.close() {
                first_err.get_or_insert(e);
            }
        }
        if let Some(e) = first_err {
            return Err(e);
        }
        return Ok(Some(Box::new(SeriesIdSetIterator::new(set))));
    }

    Ok(Some(Box::new(SeriesIdMergeIterator {
        buf: vec![None; itrs.len()],
        done: vec![false; itrs.len()],
        itrs,
    })))
}

/// K-way merge over ascending series ID iterators
struct SeriesIdMergeIterator {
    buf: Vec<Option<SeriesId>>,
    done: Vec<bool>,
    itrs: Vec<BoxSeriesIdIterator>,
}

impl SeriesIdIterator for SeriesIdMergeIterator {
    fn next_id(&mut self) -> Result<Option<SeriesId>> {
        // Refill buffers and find the lowest ID
        let mut min: Option<SeriesId> = None;
        for i in 0..self.itrs.len() {
            if self.buf[i].is_none() && !self.done[i] {
                match self.itrs[i].next_id()? {
                    Some(id) => self.buf[i] = Some(id),
                    None => self.done[i] = true,
                }
            }
            if let Some(id) = self.buf[i] {
                if min.map_or(true, |m| id < m) {
                    min = Some(id);
                }
            }
        }

        // Consume every buffer holding the lowest ID
        if let Some(id) = min {
            for slot in &mut self.buf {
                if *slot == Some(id) {
                    *slot = None;
                }
            }
        }
        Ok(min)
    }

    fn close(&mut self) -> Result<()> {
        let mut first_err = None;
        for itr in &mut self.itrs {
            if let Err(e) = itr.close() {
                first_err.get_or_insert(e);
            }
        }
        first_err.map_or(Ok(()), Err)
    }
}

/// Drain an iterator into a set, closing it afterwards
pub fn collect_series_id_set(mut itr: BoxSeriesIdIterator) -> Result<SeriesIdSet> {
    if let Some(set) = itr.series_id_set() {
        let set = set.clone();
        itr.close()?;
        return Ok(set);
    }

    let mut set = SeriesIdSet::new();
    while let Some(id) = itr.next_id()? {
        set.add(id);
    }
    itr.close()?;
    Ok(set)
}
