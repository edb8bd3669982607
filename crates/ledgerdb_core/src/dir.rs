//! Segment directory management.
//!
//! ```text
//! <segment_dir>/
//! ├─ LOCK      # Advisory lock, one writer process per directory
//! ├─ data1     # Segment files, ids counting up from 1
//! ├─ data2
//! └─ ...
//! ```

use crate::error::{CoreError, CoreResult};
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};

const FILENAME_PREFIX: &str = "data";
const LOCK_FILE: &str = "LOCK";

/// An opened segment directory, holding its lock if one was requested.
#[derive(Debug)]
pub(crate) struct SegmentDir {
    path: PathBuf,
    _lock_file: Option<File>,
}

impl SegmentDir {
    /// Opens `path`, creating it if missing.
    ///
    /// Concurrent creation by another process is not an error.
    pub(crate) fn open(path: &Path, lock: bool) -> CoreResult<Self> {
        if let Err(err) = fs::create_dir_all(path) {
            if err.kind() != std::io::ErrorKind::AlreadyExists {
                return Err(CoreError::io(format!("creating {}", path.display()), err));
            }
        }

        if !path.is_dir() {
            return Err(CoreError::invalid_operation(format!(
                "segment path is not a directory: {}",
                path.display()
            )));
        }

        let lock_file = if lock {
            Some(acquire_lock(path)?)
        } else {
            None
        };

        Ok(Self {
            path: path.to_path_buf(),
            _lock_file: lock_file,
        })
    }

    pub(crate) fn path(&self) -> &Path {
        &self.path
    }

    /// Path of segment `file_id`.
    pub(crate) fn file_path(&self, file_id: u64) -> PathBuf {
        self.path.join(format!("{FILENAME_PREFIX}{file_id}"))
    }

    /// Highest segment id present, or 0 for an empty directory.
    pub(crate) fn latest_file_id(&self) -> CoreResult<u64> {
        let entries = fs::read_dir(&self.path)
            .map_err(|e| CoreError::io(format!("listing {}", self.path.display()), e))?;

        let mut latest = 0;
        for entry in entries {
            let entry =
                entry.map_err(|e| CoreError::io(format!("listing {}", self.path.display()), e))?;
            let name = entry.file_name();
            let Some(name) = name.to_str() else {
                continue;
            };
            if let Some(file_id) = parse_file_id(name)? {
                latest = latest.max(file_id);
            }
        }
        Ok(latest)
    }

    /// Makes file creations and removals in the directory durable.
    #[cfg(unix)]
    pub(crate) fn sync(&self) -> CoreResult<()> {
        File::open(&self.path)
            .and_then(|dir| dir.sync_all())
            .map_err(|e| CoreError::io(format!("syncing {}", self.path.display()), e))
    }

    #[cfg(not(unix))]
    pub(crate) fn sync(&self) -> CoreResult<()> {
        Ok(())
    }
}

/// Extracts the id from a `data<N>` name. Names without the prefix are not
/// segments; a prefixed name with a bad number is corruption.
fn parse_file_id(name: &str) -> CoreResult<Option<u64>> {
    let Some(digits) = name.strip_prefix(FILENAME_PREFIX) else {
        return Ok(None);
    };
    digits.parse::<u64>().map(Some).map_err(|e| {
        CoreError::record_corruption(format!("unexpected segment file name {name}: {e}"))
    })
}

#[cfg(feature = "std")]
fn acquire_lock(dir: &Path) -> CoreResult<File> {
    use fs2::FileExt;

    let lock_path = dir.join(LOCK_FILE);
    let lock_file = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .open(&lock_path)
        .map_err(|e| CoreError::io(format!("opening {}", lock_path.display()), e))?;

    if lock_file.try_lock_exclusive().is_err() {
        return Err(CoreError::DirectoryLocked {
            path: dir.to_path_buf(),
        });
    }
    Ok(lock_file)
}

#[cfg(not(feature = "std"))]
fn acquire_lock(dir: &Path) -> CoreResult<File> {
    let lock_path = dir.join(LOCK_FILE);
    OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .open(&lock_path)
        .map_err(|e| CoreError::io(format!("opening {}", lock_path.display()), e))
}
