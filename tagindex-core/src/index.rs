//! Index - owner of the active file set
//!
//! The index routes writes to the active log file, rotates log files once
//! they grow past the configured size and compacts runs of segments into
//! index files one level up. Every structural change publishes a new
//! [`FileSet`] snapshot; readers retain the snapshot they started with.

use crate::config::IndexConfig;
use crate::cursor::{SeriesCursor, SeriesCursorRequest};
use crate::file::{File, IndexFile, IndexFileBuilder, LogFile, SegmentFile};
use crate::fileset::{
    FileSet, FileSetIterator, FileSetMetricIterator, FileSetSeriesIdIterator,
    FileSetTagKeyIterator, FileSetTagValueIterator, RetainedFileSet,
};
use crate::predicate::Expr;
use crate::series::SeriesFile;
use crate::{IndexError, Result, SeriesId, Tags};
use parking_lot::{Mutex, RwLock};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info};

/// Extension of log files
pub const LOG_FILE_EXT: &str = "tsl";
/// Extension of index files
pub const INDEX_FILE_EXT: &str = "tsi";

/// Tag index over a series file
pub struct Index {
    config: IndexConfig,
    series_file: Arc<SeriesFile>,

    // Lock order: file_set, then active.
    file_set: RwLock<Arc<FileSet>>,
    active: RwLock<Arc<LogFile>>,

    compaction_lock: Mutex<()>,
    next_file_id: AtomicU64,
    closed: AtomicBool,
}

impl Index {
    /// Open an index with a single empty log file
    pub fn open(config: IndexConfig, series_file: Arc<SeriesFile>) -> Result<Self> {
        config.validate()?;
        std::fs::create_dir_all(&config.path)?;

        let active = Arc::new(LogFile::new(1, file_path(&config, 0, 1)));
        let fs = FileSet::new(
            config.levels.clone(),
            series_file.clone(),
            vec![SegmentFile::Log(active.clone())],
        );
        fs.retain();

        info!("Opened index at {:?}", config.path);

        Ok(Self {
            config,
            series_file,
            file_set: RwLock::new(Arc::new(fs)),
            active: RwLock::new(active),
            compaction_lock: Mutex::new(()),
            next_file_id: AtomicU64::new(2),
            closed: AtomicBool::new(false),
        })
    }

    pub fn config(&self) -> &IndexConfig {
        &self.config
    }

    pub fn series_file(&self) -> &Arc<SeriesFile> {
        &self.series_file
    }

    /// Current snapshot, not retained
    pub fn file_set(&self) -> Arc<FileSet> {
        self.file_set.read().clone()
    }

    /// Current snapshot, retained until the guard is closed or dropped
    pub fn retain_file_set(&self) -> RetainedFileSet {
        let fs = self.file_set.read();
        RetainedFileSet::new(fs.clone())
    }

    fn check_open(&self) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(IndexError::Closed);
        }
        Ok(())
    }

    /// Register a series and index it in the active log file
    pub fn create_series(&self, name: &[u8], tags: &Tags) -> Result<SeriesId> {
        self.check_open()?;
        let id = self.series_file.create_series_if_not_exists(name, tags)?;
        self.active.read().add_series(id, name, tags);
        self.maybe_rotate()?;
        Ok(id)
    }

    pub fn delete_metric(&self, name: &[u8]) -> Result<()> {
        self.check_open()?;
        self.active.read().delete_metric(name);
        self.maybe_rotate()
    }

    pub fn delete_tag_key(&self, name: &[u8], key: &[u8]) -> Result<()> {
        self.check_open()?;
        self.active.read().delete_tag_key(name, key);
        self.maybe_rotate()
    }

    pub fn delete_tag_value(&self, name: &[u8], key: &[u8], value: &[u8]) -> Result<()> {
        self.check_open()?;
        self.active.read().delete_tag_value(name, key, value);
        self.maybe_rotate()
    }

    /// Tombstone a series in the index. The series file keeps its key.
    pub fn delete_series(&self, id: SeriesId) -> Result<()> {
        self.check_open()?;
        self.active.read().delete_series_id(id);
        self.maybe_rotate()
    }

    fn maybe_rotate(&self) -> Result<()> {
        if self.active.read().size() >= self.config.max_log_file_size {
            self.rotate_log_file(false)?;
        }
        Ok(())
    }

    /// Start a new active log file.
    ///
    /// Without `force` nothing happens until the active file reaches
    /// `max_log_file_size`. Returns whether a file was started.
    pub fn rotate_log_file(&self, force: bool) -> Result<bool> {
        let mut fs = self.file_set.write();
        self.check_open()?;
        let mut active = self.active.write();
        if !force && active.size() < self.config.max_log_file_size {
            return Ok(false);
        }

        let id = self.next_file_id.fetch_add(1, Ordering::SeqCst);
        let log = Arc::new(LogFile::new(id, file_path(&self.config, 0, id)));
        debug!(
            "Rotating log file {} ({} bytes) to {}",
            active.id(),
            active.size(),
            id
        );

        let next = Arc::new(fs.prepend_log_file(log.clone()));
        publish(&mut fs, next);
        *active = log;
        Ok(true)
    }

    /// Merge the files at `level` into a single index file at `level + 1`.
    ///
    /// Level 0 takes every log file except the active one. Higher levels take
    /// the oldest contiguous run of index files at that level and need at
    /// least two of them. Nothing is compacted into the last configured
    /// level's successor. Returns the new file, if any.
    pub fn compact(&self, level: u32) -> Result<Option<Arc<IndexFile>>> {
        let _guard = self.compaction_lock.lock();
        self.check_open()?;
        if level as usize + 1 >= self.config.levels.len() {
            return Ok(None);
        }

        let (snapshot, inputs) = {
            let fs = self.file_set.read();
            let inputs: Vec<SegmentFile> = if level == 0 {
                let active = self.active.read().clone();
                fs.files()
                    .iter()
                    .filter(|f| f.as_log().is_some_and(|log| !Arc::ptr_eq(log, &active)))
                    .cloned()
                    .collect()
            } else {
                let run = fs.last_contiguous_index_files_by_level(level);
                if run.len() < 2 {
                    return Ok(None);
                }
                run.into_iter().map(SegmentFile::Index).collect()
            };
            (RetainedFileSet::new(fs.clone()), inputs)
        };
        if inputs.is_empty() {
            return Ok(None);
        }

        let id = self.next_file_id.fetch_add(1, Ordering::SeqCst);
        let bloom_bits = self.config.level(level + 1).bloom_bits_per_key;
        let file = IndexFileBuilder::from_files(&inputs)?.build(
            id,
            level + 1,
            file_path(&self.config, level + 1, id),
            bloom_bits,
        );
        let file = Arc::new(file);

        {
            let mut fs = self.file_set.write();
            // Closed while building; the new file is discarded
            self.check_open()?;
            let next = Arc::new(fs.must_replace(&inputs, SegmentFile::Index(file.clone())));
            publish(&mut fs, next);
        }
        drop(snapshot);

        for f in &inputs {
            f.mark_obsolete();
        }

        info!(
            "Compacted {} files at level {} into file {} ({} bytes)",
            inputs.len(),
            level,
            id,
            file.size()
        );
        Ok(Some(file))
    }

    /// Live metric names
    pub fn metric_iterator(&self) -> Result<FileSetMetricIterator> {
        let fs = self.file_set.read();
        let itr = fs.metric_iterator()?.live_keys();
        Ok(FileSetIterator::new(fs.clone(), itr))
    }

    /// Live tag keys of a metric
    pub fn tag_key_iterator(&self, name: &[u8]) -> Result<Option<FileSetTagKeyIterator>> {
        let fs = self.file_set.read();
        let Some(itr) = fs.tag_key_iterator(name)? else {
            return Ok(None);
        };
        Ok(Some(FileSetIterator::new(fs.clone(), itr.live_keys())))
    }

    /// Live values of a tag key
    pub fn tag_value_iterator(
        &self,
        name: &[u8],
        key: &[u8],
    ) -> Result<Option<FileSetTagValueIterator>> {
        let fs = self.file_set.read();
        let Some(itr) = fs.tag_value_iterator(name, key)? else {
            return Ok(None);
        };
        Ok(Some(FileSetIterator::new(fs.clone(), itr.live_keys())))
    }

    /// Union of every file's series for a metric, without tombstones applied
    pub fn metric_series_id_iterator(
        &self,
        name: &[u8],
    ) -> Result<Option<FileSetSeriesIdIterator>> {
        let fs = self.file_set.read();
        let Some(itr) = fs.metric_series_id_iterator(name)? else {
            return Ok(None);
        };
        Ok(Some(FileSetSeriesIdIterator::new(fs.clone(), itr)))
    }

    /// Live series of a tag value
    pub fn tag_value_series_id_iterator(
        &self,
        name: &[u8],
        key: &[u8],
        value: &[u8],
    ) -> Result<FileSetSeriesIdIterator> {
        let fs = self.file_set.read();
        let itr = fs.tag_value_series_id_iterator(name, key, value)?;
        Ok(FileSetSeriesIdIterator::new(fs.clone(), itr))
    }

    /// Sorted series of the current snapshot matching `cond`
    pub fn series_cursor(
        &self,
        req: SeriesCursorRequest,
        cond: Option<Expr>,
    ) -> Result<SeriesCursor> {
        let fs = self.file_set.read();
        SeriesCursor::new(req, fs.clone(), cond)
    }

    /// Release the index's own hold on the current snapshot. Idempotent.
    /// Later writes, rotations and compactions fail with
    /// [`IndexError::Closed`].
    pub fn close(&self) {
        let fs = self.file_set.write();
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        fs.release();
        info!("Closed index at {:?}", self.config.path);
    }
}

impl Drop for Index {
    fn drop(&mut self) {
        self.close();
    }
}

/// Swap in `next`, moving the index's hold from the old snapshot
fn publish(current: &mut Arc<FileSet>, next: Arc<FileSet>) {
    next.retain();
    current.release();
    *current = next;
}

fn file_path(config: &IndexConfig, level: u32, id: u64) -> PathBuf {
    let ext = if level == 0 { LOG_FILE_EXT } else { INDEX_FILE_EXT };
    config.path.join(format!("L{}-{:08}.{}", level, id, ext))
}
