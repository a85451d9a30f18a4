//! Series identity and membership
//!
//! - **SeriesIdSet**: roaring-backed set of series IDs
//! - **SeriesIdIterator**: ascending ID iteration and k-way merging
//! - **Series keys**: encoding of (metric name, tags)
//! - **SeriesFile**: the shared ID <-> key store

mod file;
mod iterator;
mod key;
mod set;

pub use file::SeriesFile;
pub use iterator::{
    collect_series_id_set, merge_series_id_iterators, BoxSeriesIdIterator, SeriesIdIterator,
    SeriesIdSetIterator, SeriesIdSliceIterator,
};
pub use key::{encode_series_key, parse_series_key};
pub use set::SeriesIdSet;
