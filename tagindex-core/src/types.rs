//! Core types for TagIndex

use bytes::Bytes;
use std::cmp::Ordering;
use std::fmt;

/// Series identifier. Zero is reserved and never allocated.
pub type SeriesId = u64;

/// A single tag key/value pair
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Tag {
    pub key: Bytes,
    pub value: Bytes,
}

impl Tag {
    /// Create a new tag
    pub fn new(key: impl Into<Bytes>, value: impl Into<Bytes>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }

    /// Get the size in bytes (approximate)
    pub fn size(&self) -> usize {
        self.key.len() + self.value.len()
    }
}

/// Tag set sorted by key, one value per key
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Tags(Vec<Tag>);

impl Tags {
    /// Create an empty tag set
    pub fn new() -> Self {
        Self(Vec::new())
    }

    /// Build a tag set from pairs. Later duplicates of a key win.
    pub fn from_pairs<K, V, I>(pairs: I) -> Self
    where
        K: Into<Bytes>,
        V: Into<Bytes>,
        I: IntoIterator<Item = (K, V)>,
    {
        let mut tags = Self::new();
        for (k, v) in pairs {
            tags.set(k, v);
        }
        tags
    }

    /// Insert or overwrite a tag, keeping the set sorted
    pub fn set(&mut self, key: impl Into<Bytes>, value: impl Into<Bytes>) {
        let tag = Tag::new(key, value);
        match self.0.binary_search_by(|t| t.key.cmp(&tag.key)) {
            Ok(i) => self.0[i] = tag,
            Err(i) => self.0.insert(i, tag),
        }
    }

    /// Look up the value for a key
    pub fn get(&self, key: &[u8]) -> Option<&Bytes> {
        self.0
            .binary_search_by(|t| t.key.as_ref().cmp(key))
            .ok()
            .map(|i| &self.0[i].value)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Tag> {
        self.0.iter()
    }

    /// Get the size in bytes (approximate)
    pub fn size(&self) -> usize {
        self.0.iter().map(Tag::size).sum()
    }
}

impl<'a> IntoIterator for &'a Tags {
    type Item = &'a Tag;
    type IntoIter = std::slice::Iter<'a, Tag>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

impl fmt::Display for Tags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, tag) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            write!(
                f,
                "{}={}",
                String::from_utf8_lossy(&tag.key),
                String::from_utf8_lossy(&tag.value)
            )?;
        }
        Ok(())
    }
}

/// Compare two tag sets tag by tag (key, then value), shorter set first on a tie.
pub fn compare_tags(a: &Tags, b: &Tags) -> Ordering {
    a.cmp(b)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tags_sorted() {
        let tags = Tags::from_pairs([("region", "us"), ("host", "a"), ("region", "eu")]);
        let keys: Vec<_> = tags.iter().map(|t| t.key.clone()).collect();
        assert_eq!(keys, vec![Bytes::from("host"), Bytes::from("region")]);
        assert_eq!(tags.get(b"region"), Some(&Bytes::from("eu")));
        assert_eq!(tags.get(b"zone"), None);
        assert_eq!(tags.to_string(), "host=a,region=eu");
    }

    #[test]
    fn test_compare_tags() {
        let a = Tags::from_pairs([("host", "a")]);
        let b = Tags::from_pairs([("host", "b")]);
        let c = Tags::from_pairs([("host", "a"), ("region", "us")]);

        assert_eq!(compare_tags(&a, &b), Ordering::Less);
        assert_eq!(compare_tags(&a, &c), Ordering::Less);
        assert_eq!(compare_tags(&c, &b), Ordering::Less);
        assert_eq!(compare_tags(&a, &a.clone()), Ordering::Equal);
    }
}
