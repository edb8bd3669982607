//! The segmented block store.

use super::pool::{HandlePool, SegmentHandle};
use super::sink::SegmentSink;
use crate::config::Config;
use crate::dir::SegmentDir;
use crate::error::{CoreError, CoreResult};
use crate::location::Location;
use parking_lot::Mutex;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::Path;

const LENGTH_PREFIX_SIZE: u64 = 4;

/// The segment currently receiving appends.
struct ActiveSegment {
    file_id: u64,
    file: File,
    size: u64,
}

/// Append-only store of length-prefixed records spread over `data<N>` files.
///
/// Appends go through an internal mutex, so `write` and `delete_to` are
/// serialized against each other. Reads use pooled handles and may run
/// concurrently with appends to other positions.
pub struct SegmentStore {
    dir: SegmentDir,
    max_segment_size: u64,
    sync_on_write: bool,
    active: Mutex<ActiveSegment>,
    handles: HandlePool,
}

impl SegmentStore {
    /// Opens the store in `dir`, resuming at the highest existing segment.
    ///
    /// # Errors
    ///
    /// Fails if the directory cannot be created or locked, if a segment
    /// name is malformed, or if `max_segment_size` cannot be addressed by a
    /// 4-byte offset.
    pub fn open(dir: impl AsRef<Path>, config: &Config) -> CoreResult<Self> {
        if config.max_segment_size <= LENGTH_PREFIX_SIZE
            || config.max_segment_size > u64::from(u32::MAX)
        {
            return Err(CoreError::invalid_operation(format!(
                "max_segment_size must be in {}..={}, got {}",
                LENGTH_PREFIX_SIZE + 1,
                u32::MAX,
                config.max_segment_size
            )));
        }

        let dir = SegmentDir::open(dir.as_ref(), config.lock_directory)?;
        let latest = dir.latest_file_id()?;

        let active = if latest == 0 {
            let file = create_segment(&dir, 1)?;
            dir.sync()?;
            ActiveSegment {
                file_id: 1,
                file,
                size: 0,
            }
        } else {
            let path = dir.file_path(latest);
            let file = OpenOptions::new()
                .write(true)
                .open(&path)
                .map_err(|e| CoreError::io(format!("opening {}", path.display()), e))?;
            let size = file
                .metadata()
                .map_err(|e| CoreError::io(format!("reading size of {}", path.display()), e))?
                .len();
            ActiveSegment {
                file_id: latest,
                file,
                size,
            }
        };

        tracing::info!(
            dir = %dir.path().display(),
            file_id = active.file_id,
            size = active.size,
            "segment store opened"
        );

        Ok(Self {
            dir,
            max_segment_size: config.max_segment_size,
            sync_on_write: config.sync_on_write,
            active: Mutex::new(active),
            handles: HandlePool::new(config.handle_cache_size),
        })
    }

    /// Directory holding the segments.
    #[must_use]
    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Appends `data` as one record and returns where it starts.
    ///
    /// Rotates to a fresh segment first when the record would push a
    /// non-empty active segment past `max_segment_size`.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::RecordTooLarge`] if `data` does not fit a 4-byte
    /// length, or an I/O error naming the file and offset.
    pub fn write(&self, data: &[u8]) -> CoreResult<Location> {
        let len = u32::try_from(data.len())
            .map_err(|_| CoreError::RecordTooLarge { len: data.len() })?;
        let record_size = LENGTH_PREFIX_SIZE + u64::from(len);

        let mut active = self.active.lock();
        if active.size > 0 && active.size + record_size > self.max_segment_size {
            self.rotate(&mut active)?;
        }

        let position = active.size;
        let offset = u32::try_from(position + 1).map_err(|_| {
            CoreError::invalid_operation(format!(
                "data{} is full at {position} bytes",
                active.file_id
            ))
        })?;

        let mut record = Vec::with_capacity(data.len() + 4);
        record.extend_from_slice(&len.to_be_bytes());
        record.extend_from_slice(data);

        let file_id = active.file_id;
        if let Err(err) = append_at(&mut active.file, position, &record, self.sync_on_write) {
            // Drop whatever part of the record made it to disk.
            if let Err(trunc_err) = active.file.set_len(position) {
                tracing::warn!(
                    %trunc_err,
                    file_id,
                    position,
                    "failed to discard partial segment record"
                );
            }
            return Err(CoreError::io(
                format!("writing data{file_id} at byte {position}"),
                err,
            ));
        }
        active.size += record_size;

        Ok(Location::new(file_id, offset))
    }

    /// Reads the record starting at `location`.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::SegmentNotFound`] for a missing segment and
    /// [`CoreError::InvalidLocation`] when the location does not address a
    /// record inside the file.
    pub fn read(&self, location: Location) -> CoreResult<Vec<u8>> {
        if location.offset() == 0 {
            return Err(CoreError::invalid_location(location, "offset 0 is unset"));
        }

        let handle = self.handle(location.file_id())?;
        let mut file = handle.lock();
        let size = file_len(&file, location.file_id())?;
        let end = record_end(&mut file, location, size)?;

        let start = location.byte_position() + LENGTH_PREFIX_SIZE;
        read_span(&mut file, start, end).map_err(|e| {
            CoreError::io(
                format!("reading data{} at byte {start}", location.file_id()),
                e,
            )
        })
    }

    /// Streams raw bytes from `start` through the record at `end` into
    /// `sink`, one chunk per file.
    ///
    /// The chunk of the first file begins at `start`; the chunk of the last
    /// file ends after the record `end` addresses, or at the end of the file
    /// when `end` has offset 0. Files in between are sent whole. Empty
    /// chunks are skipped.
    ///
    /// # Errors
    ///
    /// Fails if `start > end`, if a segment in the range is missing, if a
    /// location falls outside its file, or if the sink rejects a chunk.
    pub fn read_range<S>(&self, start: Location, end: Location, sink: &mut S) -> CoreResult<()>
    where
        S: SegmentSink + ?Sized,
    {
        if start > end {
            return Err(CoreError::invalid_operation(format!(
                "range start {start} is after end {end}"
            )));
        }

        for file_id in start.file_id()..=end.file_id() {
            let chunk_start = if file_id == start.file_id() {
                start.byte_position()
            } else {
                0
            };

            let bytes = {
                let handle = self.handle(file_id)?;
                let mut file = handle.lock();
                let size = file_len(&file, file_id)?;

                let chunk_end = if file_id == end.file_id() && end.offset() != 0 {
                    record_end(&mut file, end, size)?
                } else {
                    size
                };
                if chunk_start > size {
                    return Err(CoreError::invalid_location(
                        start,
                        format!("past the end of data{file_id} ({size} bytes)"),
                    ));
                }
                if chunk_start >= chunk_end {
                    continue;
                }

                read_span(&mut file, chunk_start, chunk_end).map_err(|e| {
                    CoreError::io(format!("reading data{file_id} at byte {chunk_start}"), e)
                })?
            };

            sink.write_chunk(file_id, chunk_start, &bytes)?;
        }
        Ok(())
    }

    /// Discards everything at or after `location`.
    ///
    /// Every byte about to go is first pushed to `sink`, in ascending order.
    /// Only once the sink has accepted all of it are later segments removed
    /// and the segment at `location` truncated (or removed and recreated
    /// empty when `location` is its start). Appends then resume at
    /// `location`. Calling it again with the same location is a no-op.
    ///
    /// # Errors
    ///
    /// Fails if the segment at `location` is missing, if `location` lies
    /// past its end, or if the sink rejects a chunk (nothing is deleted in
    /// that case).
    pub fn delete_to<S>(&self, location: Location, sink: &mut S) -> CoreResult<()>
    where
        S: SegmentSink + ?Sized,
    {
        let mut active = self.active.lock();
        let latest = active.file_id;
        if location.file_id() > latest {
            return Ok(());
        }
        if location.file_id() == 0 {
            return Err(CoreError::invalid_location(location, "file id 0 is unset"));
        }

        let cut = location.byte_position();
        let first_path = self.dir.file_path(location.file_id());
        let first_size = match fs::metadata(&first_path) {
            Ok(meta) => meta.len(),
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                return Err(CoreError::segment_not_found(location.file_id()));
            }
            Err(err) => {
                return Err(CoreError::io(
                    format!("reading size of {}", first_path.display()),
                    err,
                ));
            }
        };
        if cut > first_size {
            return Err(CoreError::invalid_location(
                location,
                format!("past the end of data{} ({first_size} bytes)", location.file_id()),
            ));
        }

        for file_id in location.file_id()..=latest {
            let from = if file_id == location.file_id() { cut } else { 0 };
            let path = self.dir.file_path(file_id);
            let bytes = read_tail(&path, from).map_err(|e| {
                if e.kind() == io::ErrorKind::NotFound {
                    CoreError::segment_not_found(file_id)
                } else {
                    CoreError::io(format!("reading data{file_id} from byte {from}"), e)
                }
            })?;
            if !bytes.is_empty() {
                sink.write_chunk(file_id, from, &bytes)?;
            }
        }

        self.handles.invalidate_from(location.file_id());

        for file_id in (location.file_id() + 1..=latest).rev() {
            let path = self.dir.file_path(file_id);
            if let Err(err) = fs::remove_file(&path) {
                if err.kind() != io::ErrorKind::NotFound {
                    return Err(CoreError::io(format!("removing {}", path.display()), err));
                }
            }
        }

        let file = if cut == 0 {
            fs::remove_file(&first_path)
                .map_err(|e| CoreError::io(format!("removing {}", first_path.display()), e))?;
            create_segment(&self.dir, location.file_id())?
        } else {
            let file = OpenOptions::new()
                .write(true)
                .open(&first_path)
                .map_err(|e| CoreError::io(format!("opening {}", first_path.display()), e))?;
            file.set_len(cut)
                .and_then(|()| file.sync_all())
                .map_err(|e| {
                    CoreError::io(format!("truncating {} to {cut} bytes", first_path.display()), e)
                })?;
            file
        };
        self.dir.sync()?;

        tracing::debug!(
            file_id = location.file_id(),
            offset = location.offset(),
            removed_files = latest - location.file_id(),
            "segments truncated"
        );

        *active = ActiveSegment {
            file_id: location.file_id(),
            file,
            size: cut,
        };
        Ok(())
    }

    /// Where the next record would land if no rotation is needed.
    #[must_use]
    pub fn latest_location(&self) -> Location {
        let active = self.active.lock();
        // Open guarantees the size fits a 4-byte offset minus one record.
        let offset = u32::try_from(active.size + 1).unwrap_or(u32::MAX);
        Location::new(active.file_id, offset)
    }

    /// Id of the segment receiving appends.
    #[must_use]
    pub fn latest_file_id(&self) -> u64 {
        self.active.lock().file_id
    }

    /// Current size of segment `file_id` in bytes.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::SegmentNotFound`] if the segment does not exist.
    pub fn file_size(&self, file_id: u64) -> CoreResult<u64> {
        {
            let active = self.active.lock();
            if active.file_id == file_id {
                return Ok(active.size);
            }
        }
        match fs::metadata(self.dir.file_path(file_id)) {
            Ok(meta) => Ok(meta.len()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                Err(CoreError::segment_not_found(file_id))
            }
            Err(err) => Err(CoreError::io(format!("reading size of data{file_id}"), err)),
        }
    }

    /// Flushes the active segment to stable storage.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the sync fails.
    pub fn sync(&self) -> CoreResult<()> {
        let active = self.active.lock();
        active
            .file
            .sync_data()
            .map_err(|e| CoreError::io(format!("syncing data{}", active.file_id), e))
    }

    /// Syncs the active segment and releases the directory lock.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the final sync fails.
    pub fn close(self) -> CoreResult<()> {
        self.sync()?;
        self.handles.clear();
        tracing::info!(dir = %self.dir.path().display(), "segment store closed");
        Ok(())
    }

    /// Deletes the segment directory and everything in it.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the directory cannot be removed.
    pub fn remove_all(self) -> CoreResult<()> {
        self.handles.clear();
        let path = self.dir.path().to_path_buf();
        drop(self);
        fs::remove_dir_all(&path)
            .map_err(|e| CoreError::io(format!("removing {}", path.display()), e))?;
        tracing::info!(dir = %path.display(), "segment store removed");
        Ok(())
    }

    fn rotate(&self, active: &mut ActiveSegment) -> CoreResult<()> {
        active
            .file
            .sync_data()
            .map_err(|e| CoreError::io(format!("syncing data{}", active.file_id), e))?;

        let next = active.file_id + 1;
        let file = create_segment(&self.dir, next)?;
        self.dir.sync()?;

        tracing::debug!(
            from = active.file_id,
            to = next,
            sealed_size = active.size,
            "rotated segment"
        );

        *active = ActiveSegment {
            file_id: next,
            file,
            size: 0,
        };
        Ok(())
    }

    fn handle(&self, file_id: u64) -> CoreResult<SegmentHandle> {
        let path = self.dir.file_path(file_id);
        self.handles.get(file_id, &path).map_err(|e| {
            if e.kind() == io::ErrorKind::NotFound {
                CoreError::segment_not_found(file_id)
            } else {
                CoreError::io(format!("opening {}", path.display()), e)
            }
        })
    }
}

impl std::fmt::Debug for SegmentStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let active = self.active.lock();
        f.debug_struct("SegmentStore")
            .field("path", &self.dir.path())
            .field("max_segment_size", &self.max_segment_size)
            .field("active_file_id", &active.file_id)
            .field("active_size", &active.size)
            .finish()
    }
}

fn create_segment(dir: &SegmentDir, file_id: u64) -> CoreResult<File> {
    let path = dir.file_path(file_id);
    OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(&path)
        .map_err(|e| CoreError::io(format!("creating {}", path.display()), e))
}

fn append_at(file: &mut File, position: u64, record: &[u8], sync: bool) -> io::Result<()> {
    file.seek(SeekFrom::Start(position))?;
    file.write_all(record)?;
    if sync {
        file.sync_data()?;
    }
    Ok(())
}

fn file_len(file: &File, file_id: u64) -> CoreResult<u64> {
    file.metadata()
        .map(|meta| meta.len())
        .map_err(|e| CoreError::io(format!("reading size of data{file_id}"), e))
}

/// Returns the end position of the record at `location`, checking that its
/// prefix and payload both lie inside a file of `size` bytes.
fn record_end(file: &mut File, location: Location, size: u64) -> CoreResult<u64> {
    let position = location.byte_position();
    if position + LENGTH_PREFIX_SIZE > size {
        return Err(CoreError::invalid_location(
            location,
            format!("past the end of data{} ({size} bytes)", location.file_id()),
        ));
    }

    let mut prefix = [0u8; 4];
    file.seek(SeekFrom::Start(position))
        .and_then(|_| file.read_exact(&mut prefix))
        .map_err(|e| {
            CoreError::io(
                format!("reading data{} at byte {position}", location.file_id()),
                e,
            )
        })?;

    let end = position + LENGTH_PREFIX_SIZE + u64::from(u32::from_be_bytes(prefix));
    if end > size {
        return Err(CoreError::invalid_location(
            location,
            format!("record of {} bytes overruns data{}", end - position, location.file_id()),
        ));
    }
    Ok(end)
}

fn read_span(file: &mut File, start: u64, end: u64) -> io::Result<Vec<u8>> {
    let len = usize::try_from(end - start)
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "span too large"))?;
    let mut buf = vec![0u8; len];
    file.seek(SeekFrom::Start(start))?;
    file.read_exact(&mut buf)?;
    Ok(buf)
}

fn read_tail(path: &Path, from: u64) -> io::Result<Vec<u8>> {
    let mut file = File::open(path)?;
    file.seek(SeekFrom::Start(from))?;
    let mut buf = Vec::new();
    file.read_to_end(&mut buf)?;
    Ok(buf)
}
