//! TagIndex Core - tiered inverted index over metrics, tags and series
//!
//! Maps metric names, tag keys and tag values to the series that carry them.
//!
//! # Architecture
//!
//! The index is a stack of immutable snapshots over two kinds of segment:
//!
//! - **Log files**: mutable level-0 segments receiving new series and tombstones
//! - **Index files**: immutable segments at level 1 and above, built by compaction
//! - **File sets**: newest-first compositions of segments that merge keys and
//!   resolve tombstones at read time
//! - **Series cursor**: sorted enumeration of the series matching a tag predicate

pub mod config;
pub mod cursor;
pub mod file;
pub mod fileset;
pub mod index;
pub mod merge;
pub mod predicate;
pub mod series;
pub mod sketch;

mod error;
mod types;

pub use cursor::{SeriesCursor, SeriesCursorRequest, SeriesCursorRow};
pub use error::{IndexError, Result};
pub use fileset::{FileSet, RetainedFileSet};
pub use index::Index;
pub use predicate::{Expr, Op};
pub use series::{SeriesFile, SeriesIdSet};
pub use types::*;

/// TagIndex version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
