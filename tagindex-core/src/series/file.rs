//! In-memory series key store

use super::{encode_series_key, SeriesIdSet};
use crate::{Result, SeriesId, Tags};
use bytes::Bytes;
use parking_lot::RwLock;
use std::collections::HashMap;

/// Maps series IDs to encoded series keys and back.
///
/// Safe for concurrent lookups from many cursors.
pub struct SeriesFile {
    inner: RwLock<SeriesFileInner>,
}

struct SeriesFileInner {
    keys: HashMap<SeriesId, Bytes>,
    ids: HashMap<Bytes, SeriesId>,
    deleted: SeriesIdSet,
    next_id: SeriesId,
}

impl SeriesFile {
    /// Create an empty series file
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(SeriesFileInner {
                keys: HashMap::new(),
                ids: HashMap::new(),
                deleted: SeriesIdSet::new(),
                next_id: 1,
            }),
        }
    }

    /// Return the ID for a series, allocating one if needed.
    ///
    /// A deleted series that is created again is revived under its old ID.
    /// Fails if the key cannot be encoded.
    pub fn create_series_if_not_exists(&self, name: &[u8], tags: &Tags) -> Result<SeriesId> {
        let key = encode_series_key(name, tags)?;

        {
            let inner = self.inner.read();
            if let Some(&id) = inner.ids.get(&key) {
                if !inner.deleted.contains(id) {
                    return Ok(id);
                }
            }
        }

        let mut inner = self.inner.write();
        if let Some(&id) = inner.ids.get(&key) {
            inner.deleted.remove(id);
            return Ok(id);
        }

        let id = inner.next_id;
        inner.next_id += 1;
        inner.keys.insert(id, key.clone());
        inner.ids.insert(key, id);
        Ok(id)
    }

    /// Encoded key for a live series
    pub fn series_key(&self, id: SeriesId) -> Option<Bytes> {
        let inner = self.inner.read();
        if inner.deleted.contains(id) {
            return None;
        }
        inner.keys.get(&id).cloned()
    }

    /// Reverse lookup of a live series
    pub fn series_id(&self, name: &[u8], tags: &Tags) -> Option<SeriesId> {
        // A key that cannot be encoded was never stored
        let key = encode_series_key(name, tags).ok()?;
        let inner = self.inner.read();
        inner
            .ids
            .get(&key)
            .copied()
            .filter(|id| !inner.deleted.contains(*id))
    }

    /// Mark a series as deleted. Its key is kept so the ID can be revived.
    pub fn delete_series_id(&self, id: SeriesId) {
        let mut inner = self.inner.write();
        if inner.keys.contains_key(&id) {
            inner.deleted.add(id);
        }
    }

    pub fn is_deleted(&self, id: SeriesId) -> bool {
        self.inner.read().deleted.contains(id)
    }

    /// Number of live series
    pub fn series_count(&self) -> u64 {
        let inner = self.inner.read();
        inner.keys.len() as u64 - inner.deleted.cardinality()
    }
}

impl Default for SeriesFile {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::series::parse_series_key;

    #[test]
    fn test_create_and_lookup() {
        let sfile = SeriesFile::new();
        let tags = Tags::from_pairs([("host", "a")]);

        let id = sfile.create_series_if_not_exists(b"cpu", &tags).unwrap();
        assert_eq!(id, 1);
        assert_eq!(sfile.create_series_if_not_exists(b"cpu", &tags).unwrap(), id);
        assert_eq!(sfile.series_id(b"cpu", &tags), Some(id));

        let other = sfile.create_series_if_not_exists(b"mem", &tags).unwrap();
        assert_eq!(other, 2);
        assert_eq!(sfile.series_count(), 2);

        let key = sfile.series_key(id).unwrap();
        let (name, parsed) = parse_series_key(&key).unwrap();
        assert_eq!(name.as_ref(), b"cpu");
        assert_eq!(parsed, tags);
    }

    #[test]
    fn test_delete_and_revive() {
        let sfile = SeriesFile::new();
        let tags = Tags::from_pairs([("host", "a")]);
        let id = sfile.create_series_if_not_exists(b"cpu", &tags).unwrap();

        sfile.delete_series_id(id);
        assert!(sfile.is_deleted(id));
        assert!(sfile.series_key(id).is_none());
        assert!(sfile.series_id(b"cpu", &tags).is_none());
        assert_eq!(sfile.series_count(), 0);

        assert_eq!(sfile.create_series_if_not_exists(b"cpu", &tags).unwrap(), id);
        assert!(!sfile.is_deleted(id));
        assert!(sfile.series_key(id).is_some());
    }

    #[test]
    fn test_oversized_key_not_registered() {
        let sfile = SeriesFile::new();
        let name = vec![b'm'; 70_000];

        let err = sfile.create_series_if_not_exists(&name, &Tags::new()).unwrap_err();
        assert!(matches!(err, crate::IndexError::SeriesKey(_)));
        assert_eq!(sfile.series_count(), 0);
        assert!(sfile.series_id(&name, &Tags::new()).is_none());
        assert_eq!(sfile.create_series_if_not_exists(b"cpu", &Tags::new()).unwrap(), 1);
    }

    #[test]
    fn test_unknown_id() {
        let sfile = SeriesFile::new();
        assert!(sfile.series_key(0).is_none());
        sfile.delete_series_id(42);
        assert!(!sfile.is_deleted(42));
    }
}
