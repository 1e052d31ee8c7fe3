//! Durable run identifier allocation.
//!
//! The last issued id lives in a small cache file holding a decimal integer.
//! When the cache is missing (first start, or deleted after an unclean
//! shutdown) the last id is recovered from the results tree:
//!
//! ```text
//! <results_dir>/<YYYY-MM-DD>/<HH-MM>/<9-digit rid>-<name>.<ext>
//! ```
//!
//! Every cache update goes through a temporary file in the cache's directory
//! followed by an atomic rename, so readers never observe a partial value.

use crate::config::RunIdConfig;
use crate::error::{AppResult, DaqError};
use regex::Regex;
use std::fmt;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Identifier of one experiment run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RunId(pub u64);

impl RunId {
    /// Raw numeric value.
    pub fn value(self) -> u64 {
        self.0
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Hands out strictly increasing [`RunId`]s, persisting the last one.
#[derive(Debug)]
pub struct RunIdAllocator {
    cache_file: PathBuf,
    results_dir: PathBuf,
    /// Last issued id; -1 before the first run ever.
    last: i64,
}

impl RunIdAllocator {
    /// Create an allocator, recovering the last issued id.
    ///
    /// Result files are expected to carry the `h5` extension.
    pub fn new(cache_file: impl Into<PathBuf>, results_dir: impl Into<PathBuf>) -> AppResult<Self> {
        Self::with_extension(cache_file, results_dir, "h5")
    }

    /// Create an allocator from the `[run_ids]` configuration section.
    pub fn from_config(config: &RunIdConfig) -> AppResult<Self> {
        Self::with_extension(
            &config.cache_file,
            &config.results_dir,
            &config.result_extension,
        )
    }

    /// Create an allocator whose results-tree scan matches `extension`.
    pub fn with_extension(
        cache_file: impl Into<PathBuf>,
        results_dir: impl Into<PathBuf>,
        extension: &str,
    ) -> AppResult<Self> {
        let cache_file = cache_file.into();
        let results_dir = results_dir.into();

        let last = match read_cache(&cache_file)? {
            Some(rid) => {
                debug!(cache = %cache_file.display(), "Using last RID from cache");
                rid
            }
            None => {
                debug!(
                    results = %results_dir.display(),
                    "Last RID cache not found, scanning results"
                );
                let rid = scan_results(&results_dir, extension);
                write_cache(&cache_file, rid)?;
                rid
            }
        };

        let allocator = Self {
            cache_file,
            results_dir,
            last,
        };
        info!(next_rid = allocator.last + 1, "Run ID allocator ready");
        Ok(allocator)
    }

    /// Allocate the next run id.
    ///
    /// The cache is updated before the id is handed out; if that fails the
    /// error is returned and the counter does not move.
    pub fn next(&mut self) -> AppResult<RunId> {
        let rid = self.last + 1;
        write_cache(&self.cache_file, rid)?;
        self.last = rid;
        // `last` starts at -1 and only grows, so `rid` is never negative.
        Ok(RunId(rid as u64))
    }

    /// The id the next call to [`next`](Self::next) would return.
    pub fn peek_next(&self) -> RunId {
        RunId((self.last + 1) as u64)
    }

    /// Path of the cache file.
    pub fn cache_file(&self) -> &Path {
        &self.cache_file
    }

    /// Root of the results tree used for recovery.
    pub fn results_dir(&self) -> &Path {
        &self.results_dir
    }
}

/// `Ok(None)` when the cache file does not exist.
fn read_cache(path: &Path) -> AppResult<Option<i64>> {
    let contents = match fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(e) => {
            return Err(DaqError::RunIdCache {
                path: path.to_path_buf(),
                reason: e.to_string(),
            })
        }
    };

    match contents.trim().parse::<i64>() {
        Ok(rid) if rid >= -1 => Ok(Some(rid)),
        _ => Err(DaqError::RunIdCache {
            path: path.to_path_buf(),
            reason: format!("expected a run id, found {:?}", contents),
        }),
    }
}

fn write_cache(path: &Path, rid: i64) -> AppResult<()> {
    let cache_error = |e: io::Error| DaqError::RunIdCache {
        path: path.to_path_buf(),
        reason: e.to_string(),
    };

    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };

    let mut tmp = tempfile::NamedTempFile::new_in(&dir).map_err(cache_error)?;
    writeln!(tmp, "{}", rid).map_err(cache_error)?;
    tmp.as_file().sync_all().map_err(cache_error)?;
    tmp.persist(path).map_err(|e| cache_error(e.error))?;
    sync_dir(&dir).map_err(cache_error)
}

/// Flush the directory entry created by the rename.
#[cfg(unix)]
fn sync_dir(dir: &Path) -> io::Result<()> {
    fs::File::open(dir)?.sync_all()
}

#[cfg(not(unix))]
fn sync_dir(_dir: &Path) -> io::Result<()> {
    Ok(())
}

/// Highest run id found in the results tree, or -1.
///
/// Directories that cannot be listed and entries that do not follow the
/// layout are skipped.
fn scan_results(results_dir: &Path, extension: &str) -> i64 {
    let day_re = Regex::new(r"^[0-9]{4}-[0-9]{2}-[0-9]{2}$").ok();
    let minute_re = Regex::new(r"^[0-9]{2}-[0-9]{2}$").ok();
    let file_re = Regex::new(&format!(
        r"^([0-9]{{9}})-.*\.{}$",
        regex::escape(extension)
    ))
    .ok();
    let (Some(day_re), Some(minute_re), Some(file_re)) = (day_re, minute_re, file_re) else {
        return -1;
    };

    let mut last = -1;
    for day in matching_entries(results_dir, &day_re) {
        for minute in matching_entries(&day, &minute_re) {
            let Ok(files) = fs::read_dir(&minute) else {
                continue;
            };
            for entry in files.flatten() {
                let name = entry.file_name();
                let Some(caps) = name.to_str().and_then(|n| file_re.captures(n)) else {
                    continue;
                };
                if let Ok(rid) = caps[1].parse::<i64>() {
                    last = last.max(rid);
                }
            }
        }
    }
    last
}

fn matching_entries(dir: &Path, pattern: &Regex) -> Vec<PathBuf> {
    let Ok(entries) = fs::read_dir(dir) else {
        return Vec::new();
    };
    entries
        .flatten()
        .filter(|entry| {
            entry
                .file_name()
                .to_str()
                .is_some_and(|name| pattern.is_match(name))
        })
        .map(|entry| entry.path())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn touch(root: &Path, rel: &str) {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, b"").unwrap();
    }

    #[test]
    fn test_scan_takes_maximum_matching_rid() {
        let dir = TempDir::new().unwrap();
        touch(dir.path(), "2024-03-01/10-15/000000003-scan.h5");
        touch(dir.path(), "2024-03-02/09-00/000000012-scan.h5");
        touch(dir.path(), "2024-03-02/09-00/000000099-scan.txt");
        touch(dir.path(), "2024-03-02/09-00/00000100-short.h5");
        touch(dir.path(), "notes/10-15/000000500-scan.h5");
        touch(dir.path(), "2024-03-02/late/000000400-scan.h5");

        assert_eq!(scan_results(dir.path(), "h5"), 12);
    }

    #[test]
    fn test_scan_missing_root_is_empty() {
        let dir = TempDir::new().unwrap();
        assert_eq!(scan_results(&dir.path().join("nope"), "h5"), -1);
    }

    #[test]
    fn test_scan_honours_extension() {
        let dir = TempDir::new().unwrap();
        touch(dir.path(), "2024-03-01/10-15/000000004-scan.h5");
        touch(dir.path(), "2024-03-01/10-15/000000006-scan.nc");
        assert_eq!(scan_results(dir.path(), "nc"), 6);
    }

    #[test]
    fn test_cache_accepts_trailing_newline() {
        let dir = TempDir::new().unwrap();
        let cache = dir.path().join("last_rid");
        fs::write(&cache, "41\n").unwrap();
        assert_eq!(read_cache(&cache).unwrap(), Some(41));
    }

    #[test]
    fn test_garbage_cache_is_fatal() {
        let dir = TempDir::new().unwrap();
        let cache = dir.path().join("last_rid");
        fs::write(&cache, "forty-two").unwrap();
        let err = RunIdAllocator::new(&cache, dir.path().join("results")).unwrap_err();
        assert!(matches!(err, DaqError::RunIdCache { .. }));
    }

    #[test]
    fn test_cache_write_syncs_parent_directory() {
        let dir = TempDir::new().unwrap();
        let nested = dir.path().join("state");
        fs::create_dir_all(&nested).unwrap();
        let cache = nested.join("last_rid");

        write_cache(&cache, 7).unwrap();
        assert_eq!(read_cache(&cache).unwrap(), Some(7));
        sync_dir(&nested).unwrap();
    }

    #[test]
    fn test_failed_cache_write_does_not_advance() {
        let dir = TempDir::new().unwrap();
        let cache = dir.path().join("sub").join("last_rid");
        fs::create_dir_all(cache.parent().unwrap()).unwrap();
        let mut allocator = RunIdAllocator::new(&cache, dir.path().join("results")).unwrap();
        assert_eq!(allocator.next().unwrap(), RunId(0));

        fs::remove_dir_all(cache.parent().unwrap()).unwrap();
        assert!(allocator.next().is_err());
        assert_eq!(allocator.peek_next(), RunId(1));
    }
}
