//! Predicate evaluation against a file set

use super::FileSet;
use crate::predicate::{Expr, Op};
use crate::series::SeriesIdSet;
use crate::{IndexError, Result};
use bytes::Bytes;
use regex::Regex;
use std::collections::BTreeSet;

/// Pseudo tag that compares against tag keys instead of tag values
pub const TAG_KEY_REF: &str = "_tagKey";

impl FileSet {
    /// Live tag keys of a metric
    pub fn metric_tag_keys(&self, name: &[u8]) -> Result<BTreeSet<Bytes>> {
        match self.tag_key_iterator(name)? {
            Some(itr) => itr.live_keys().collect(),
            None => Ok(BTreeSet::new()),
        }
    }

    /// Tag keys of a metric selected by a `_tagKey` predicate.
    ///
    /// `None` selects every key. Leaves compare `_tagKey` with a string or a
    /// regex; `AND` intersects and `OR` unions.
    pub fn metric_tag_keys_by_expr(
        &self,
        name: &[u8],
        expr: Option<&Expr>,
    ) -> Result<BTreeSet<Bytes>> {
        match expr {
            None => self.metric_tag_keys(name),
            Some(expr) => self.tag_keys_by_expr(name, expr),
        }
    }

    fn tag_keys_by_expr(&self, name: &[u8], expr: &Expr) -> Result<BTreeSet<Bytes>> {
        match expr {
            Expr::Binary { op, lhs, rhs } => match op {
                Op::Eq | Op::Neq | Op::EqRegex | Op::NeqRegex => {
                    let tag = tag_ref(*op, lhs)?;
                    if tag != TAG_KEY_REF {
                        return Err(IndexError::InvalidPredicate(format!(
                            "left side of '{}' must be {}, got {}",
                            op, TAG_KEY_REF, tag
                        )));
                    }

                    let filter = Filter::new(*op, rhs)?;
                    let negated = matches!(op, Op::Neq | Op::NeqRegex);
                    let keys = self.metric_tag_keys(name)?;
                    Ok(keys
                        .into_iter()
                        .filter(|k| filter.matches(k) != negated)
                        .collect())
                }
                Op::And | Op::Or => {
                    let l = self.tag_keys_by_expr(name, lhs)?;
                    let r = self.tag_keys_by_expr(name, rhs)?;
                    Ok(if *op == Op::And {
                        l.intersection(&r).cloned().collect()
                    } else {
                        l.union(&r).cloned().collect()
                    })
                }
                _ => Err(invalid_operator(*op)),
            },
            Expr::Paren(inner) => self.tag_keys_by_expr(name, inner),
            other => Err(IndexError::InvalidPredicate(format!(
                "unsupported expression: {}",
                other
            ))),
        }
    }

    /// Live series of a metric selected by a tag predicate. `None` selects
    /// every series of the metric.
    pub fn metric_series_by_expr(&self, name: &[u8], expr: Option<&Expr>) -> Result<SeriesIdSet> {
        match expr {
            None => self.metric_series_id_set(name),
            Some(expr) => self.series_by_expr(name, expr),
        }
    }

    /// Union of the live series of every live value of a tag key
    pub fn tag_key_series_id_set(&self, name: &[u8], key: &[u8]) -> Result<SeriesIdSet> {
        self.tag_values_series_id_set(name, key, |_| true)
    }

    fn series_by_expr(&self, name: &[u8], expr: &Expr) -> Result<SeriesIdSet> {
        match expr {
            Expr::Binary { op, lhs, rhs } => match op {
                Op::Eq | Op::Neq | Op::EqRegex | Op::NeqRegex => {
                    self.series_by_comparison(name, *op, lhs, rhs)
                }
                Op::And => {
                    let l = self.series_by_expr(name, lhs)?;
                    let r = self.series_by_expr(name, rhs)?;
                    Ok(l.and(&r))
                }
                Op::Or => {
                    let mut l = self.series_by_expr(name, lhs)?;
                    l.merge(&self.series_by_expr(name, rhs)?);
                    Ok(l)
                }
                _ => Err(invalid_operator(*op)),
            },
            Expr::Paren(inner) => self.series_by_expr(name, inner),
            other => Err(IndexError::InvalidPredicate(format!(
                "unsupported expression: {}",
                other
            ))),
        }
    }

    fn series_by_comparison(
        &self,
        name: &[u8],
        op: Op,
        lhs: &Expr,
        rhs: &Expr,
    ) -> Result<SeriesIdSet> {
        let key = tag_ref(op, lhs)?.as_bytes();

        let matched = match Filter::new(op, rhs)? {
            // An empty value selects series that lack the tag
            Filter::Equal(value) if value.is_empty() => {
                let with_tag = self.tag_key_series_id_set(name, key)?;
                return Ok(match op {
                    Op::Eq => self.metric_series_id_set(name)?.and_not(&with_tag),
                    _ => with_tag,
                });
            }
            Filter::Equal(value) => self.tag_value_series_id_set(name, key, value.as_bytes())?,
            filter => self.tag_values_series_id_set(name, key, |v| filter.matches(v))?,
        };

        match op {
            Op::Eq | Op::EqRegex => Ok(matched),
            _ => Ok(self.metric_series_id_set(name)?.and_not(&matched)),
        }
    }

    fn tag_values_series_id_set<F>(&self, name: &[u8], key: &[u8], filter: F) -> Result<SeriesIdSet>
    where
        F: Fn(&[u8]) -> bool,
    {
        let mut set = SeriesIdSet::new();
        let Some(values) = self.tag_value_iterator(name, key)? else {
            return Ok(set);
        };
        for value in values.live_keys() {
            let value = value?;
            if filter(value.as_ref()) {
                set.merge(&self.tag_value_series_id_set(name, key, &value)?);
            }
        }
        Ok(set)
    }
}

/// Right-hand side of a leaf comparison
enum Filter<'a> {
    Equal(&'a str),
    Regex(&'a Regex),
}

impl<'a> Filter<'a> {
    fn new(op: Op, rhs: &'a Expr) -> Result<Self> {
        match (op, rhs) {
            (op, Expr::RegexLiteral(re)) if op.is_regex() => Ok(Filter::Regex(re)),
            (op, _) if op.is_regex() => Err(IndexError::InvalidPredicate(format!(
                "right side of '{}' must be a regular expression",
                op
            ))),
            (_, Expr::StringLiteral(s)) => Ok(Filter::Equal(s)),
            _ => Err(IndexError::InvalidPredicate(format!(
                "right side of '{}' must be a tag value string",
                op
            ))),
        }
    }

    /// Whether `v` satisfies the un-negated comparison
    fn matches(&self, v: &[u8]) -> bool {
        match self {
            Filter::Equal(s) => v == s.as_bytes(),
            Filter::Regex(re) => re.is_match(&String::from_utf8_lossy(v)),
        }
    }
}

fn tag_ref(op: Op, lhs: &Expr) -> Result<&str> {
    match lhs {
        Expr::VarRef(tag) => Ok(tag),
        _ => Err(IndexError::InvalidPredicate(format!(
            "left side of '{}' must be a tag key",
            op
        ))),
    }
}

fn invalid_operator(op: Op) -> IndexError {
    IndexError::InvalidPredicate(format!("invalid tag comparison operator: {}", op))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CompactionLevel;
    use crate::file::{LogFile, SegmentFile};
    use crate::series::SeriesFile;
    use crate::{SeriesId, Tags};
    use std::path::PathBuf;
    use std::sync::Arc;

    // 1: host=a region=us, 2: host=b region=us, 3: host=c, 4: no tags
    fn fixture() -> FileSet {
        let older = Arc::new(LogFile::new(1, PathBuf::from("L0-00000001.tsl")));
        older.add_series(1, b"cpu", &Tags::from_pairs([("host", "a"), ("region", "us")]));
        older.add_series(2, b"cpu", &Tags::from_pairs([("host", "b"), ("region", "us")]));
        older.add_series(9, b"mem", &Tags::from_pairs([("host", "a")]));
        let newer = Arc::new(LogFile::new(2, PathBuf::from("L0-00000002.tsl")));
        newer.add_series(3, b"cpu", &Tags::from_pairs([("host", "c")]));
        newer.add_series(4, b"cpu", &Tags::new());

        FileSet::new(
            vec![CompactionLevel::default(); 2],
            Arc::new(SeriesFile::new()),
            vec![SegmentFile::Log(newer), SegmentFile::Log(older)],
        )
    }

    fn series(fs: &FileSet, expr: Option<&Expr>) -> Vec<SeriesId> {
        fs.metric_series_by_expr(b"cpu", expr)
            .unwrap()
            .iter()
            .collect()
    }

    fn keys(set: BTreeSet<Bytes>) -> Vec<String> {
        set.into_iter()
            .map(|k| String::from_utf8(k.to_vec()).unwrap())
            .collect()
    }

    fn re(s: &str) -> Regex {
        Regex::new(s).unwrap()
    }

    #[test]
    fn test_series_without_condition() {
        assert_eq!(series(&fixture(), None), vec![1, 2, 3, 4]);
    }

    #[test]
    fn test_series_equality() {
        let fs = fixture();
        assert_eq!(series(&fs, Some(&Expr::eq("host", "a"))), vec![1]);
        assert_eq!(series(&fs, Some(&Expr::neq("host", "a"))), vec![2, 3, 4]);
        assert!(series(&fs, Some(&Expr::eq("host", "zz"))).is_empty());
    }

    #[test]
    fn test_series_empty_value_means_missing_tag() {
        let fs = fixture();
        assert_eq!(series(&fs, Some(&Expr::eq("region", ""))), vec![3, 4]);
        assert_eq!(series(&fs, Some(&Expr::neq("region", ""))), vec![1, 2]);
    }

    #[test]
    fn test_series_regex() {
        let fs = fixture();
        assert_eq!(
            series(&fs, Some(&Expr::regex_match("host", re("^[ab]$")))),
            vec![1, 2]
        );
        assert_eq!(
            series(&fs, Some(&Expr::regex_not_match("host", re("^[ab]$")))),
            vec![3, 4]
        );
    }

    #[test]
    fn test_series_and_or_paren() {
        let fs = fixture();
        let expr = Expr::and(
            Expr::eq("region", "us"),
            Expr::paren(Expr::or(Expr::eq("host", "b"), Expr::eq("host", "c"))),
        );
        assert_eq!(series(&fs, Some(&expr)), vec![2]);

        let expr = Expr::or(Expr::eq("host", "a"), Expr::eq("host", "c"));
        assert_eq!(series(&fs, Some(&expr)), vec![1, 3]);
    }

    #[test]
    fn test_series_rejects_bad_operands() {
        let fs = fixture();
        let lhs_literal = Expr::binary(Op::Eq, Expr::string("host"), Expr::string("a"));
        let err = fs.metric_series_by_expr(b"cpu", Some(&lhs_literal)).unwrap_err();
        assert!(err.is_invalid_predicate());

        let regex_with_string = Expr::binary(Op::EqRegex, Expr::var("host"), Expr::string("a"));
        assert!(fs.metric_series_by_expr(b"cpu", Some(&regex_with_string)).is_err());

        let gt = Expr::binary(Op::Gt, Expr::var("host"), Expr::string("a"));
        assert!(fs.metric_series_by_expr(b"cpu", Some(&gt)).is_err());
    }

    #[test]
    fn test_tag_keys_all() {
        let fs = fixture();
        assert_eq!(keys(fs.metric_tag_keys_by_expr(b"cpu", None).unwrap()), vec!["host", "region"]);
        assert!(fs.metric_tag_keys_by_expr(b"disk", None).unwrap().is_empty());
    }

    #[test]
    fn test_tag_keys_by_expr() {
        let fs = fixture();
        let eq = Expr::eq(TAG_KEY_REF, "host");
        assert_eq!(keys(fs.metric_tag_keys_by_expr(b"cpu", Some(&eq)).unwrap()), vec!["host"]);

        let neq = Expr::neq(TAG_KEY_REF, "host");
        assert_eq!(keys(fs.metric_tag_keys_by_expr(b"cpu", Some(&neq)).unwrap()), vec!["region"]);

        let regex = Expr::regex_match(TAG_KEY_REF, re("o"));
        let and = Expr::and(regex.clone(), Expr::paren(Expr::neq(TAG_KEY_REF, "region")));
        assert_eq!(keys(fs.metric_tag_keys_by_expr(b"cpu", Some(&and)).unwrap()), vec!["host"]);

        let or = Expr::or(Expr::eq(TAG_KEY_REF, "host"), Expr::eq(TAG_KEY_REF, "region"));
        assert_eq!(
            keys(fs.metric_tag_keys_by_expr(b"cpu", Some(&or)).unwrap()),
            vec!["host", "region"]
        );
    }

    #[test]
    fn test_tag_keys_rejects_other_tags() {
        let fs = fixture();
        let err = fs
            .metric_tag_keys_by_expr(b"cpu", Some(&Expr::eq("host", "a")))
            .unwrap_err();
        assert!(err.is_invalid_predicate());

        let err = fs
            .metric_tag_keys_by_expr(b"cpu", Some(&Expr::var(TAG_KEY_REF)))
            .unwrap_err();
        assert!(err.is_invalid_predicate());
    }
}
