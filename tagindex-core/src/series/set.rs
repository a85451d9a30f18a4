//! Compressed series ID sets

use crate::SeriesId;
use roaring::RoaringTreemap;
use std::fmt;

/// Set of series IDs backed by a roaring bitmap.
#[derive(Clone, Default, PartialEq)]
pub struct SeriesIdSet {
    bitmap: RoaringTreemap,
}

impl SeriesIdSet {
    /// Create an empty set
    pub fn new() -> Self {
        Self {
            bitmap: RoaringTreemap::new(),
        }
    }

    /// Add an ID. Returns false if it was already present.
    pub fn add(&mut self, id: SeriesId) -> bool {
        self.bitmap.insert(id)
    }

    /// Remove an ID. Returns false if it was not present.
    pub fn remove(&mut self, id: SeriesId) -> bool {
        self.bitmap.remove(id)
    }

    pub fn contains(&self, id: SeriesId) -> bool {
        self.bitmap.contains(id)
    }

    /// Number of IDs in the set
    pub fn cardinality(&self) -> u64 {
        self.bitmap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bitmap.is_empty()
    }

    /// In-place union with `other`
    pub fn merge(&mut self, other: &SeriesIdSet) {
        self.bitmap |= &other.bitmap;
    }

    /// Members of `self` that are not in `other`
    pub fn and_not(&self, other: &SeriesIdSet) -> SeriesIdSet {
        Self {
            bitmap: &self.bitmap - &other.bitmap,
        }
    }

    /// Members present in both sets
    pub fn and(&self, other: &SeriesIdSet) -> SeriesIdSet {
        Self {
            bitmap: &self.bitmap & &other.bitmap,
        }
    }

    /// Ascending iterator over the IDs
    pub fn iter(&self) -> impl Iterator<Item = SeriesId> + '_ {
        self.bitmap.iter()
    }

    /// Estimated memory footprint in bytes
    pub fn bytes(&self) -> usize {
        self.bitmap.serialized_size()
    }

    pub(crate) fn into_bitmap_iter(self) -> roaring::treemap::IntoIter {
        self.bitmap.into_iter()
    }
}

impl FromIterator<SeriesId> for SeriesIdSet {
    fn from_iter<T: IntoIterator<Item = SeriesId>>(iter: T) -> Self {
        Self {
            bitmap: iter.into_iter().collect(),
        }
    }
}

impl Extend<SeriesId> for SeriesIdSet {
    fn extend<T: IntoIterator<Item = SeriesId>>(&mut self, iter: T) {
        self.bitmap.extend(iter)
    }
}

impl fmt::Debug for SeriesIdSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.bitmap.iter()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_merge_and_not() {
        let mut a: SeriesIdSet = [1, 2, 3].into_iter().collect();
        let b: SeriesIdSet = [3, 4].into_iter().collect();

        a.merge(&b);
        assert_eq!(a.cardinality(), 4);
        assert_eq!(a.iter().collect::<Vec<_>>(), vec![1, 2, 3, 4]);

        let c = a.and_not(&b);
        assert_eq!(c.iter().collect::<Vec<_>>(), vec![1, 2]);
        // and_not leaves the receiver untouched
        assert_eq!(a.cardinality(), 4);

        let d = a.and(&b);
        assert_eq!(d.iter().collect::<Vec<_>>(), vec![3, 4]);
    }

    #[test]
    fn test_empty_set() {
        let empty = SeriesIdSet::new();
        assert!(empty.is_empty());
        assert_eq!(empty.cardinality(), 0);

        let a: SeriesIdSet = [7].into_iter().collect();
        assert_eq!(a.and_not(&empty), a);
        assert!(empty.and_not(&a).is_empty());
    }

    #[test]
    fn test_large_ids() {
        let mut set = SeriesIdSet::new();
        assert!(set.add(u64::MAX - 1));
        assert!(set.add(1 << 40));
        assert!(!set.add(1 << 40));
        assert!(set.contains(u64::MAX - 1));
        assert!(set.remove(1 << 40));
        assert_eq!(set.cardinality(), 1);
    }
}
