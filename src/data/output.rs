//! Result file locations.

use crate::error::AppResult;
use crate::run_id::RunId;
use chrono::{DateTime, TimeZone};
use std::fmt::Display;
use std::path::{Path, PathBuf};

/// Path of a run's result file, creating its directories.
///
/// Layout: `<root>/<YYYY-MM-DD>/<HH-MM>/<rid:09>-<name>.<extension>`, the same
/// layout [`RunIdAllocator`](crate::run_id::RunIdAllocator) scans on
/// recovery.
pub fn result_file_path<Tz>(
    root: &Path,
    start_time: &DateTime<Tz>,
    rid: RunId,
    name: &str,
    extension: &str,
) -> AppResult<PathBuf>
where
    Tz: TimeZone,
    Tz::Offset: Display,
{
    let dir = root
        .join(start_time.format("%Y-%m-%d").to_string())
        .join(start_time.format("%H-%M").to_string());
    std::fs::create_dir_all(&dir)?;
    Ok(dir.join(format!("{:09}-{}.{}", rid.value(), name, extension)))
}
