//! Configuration for the segment store and redo log.

/// Configuration for opening a [`crate::SegmentStore`] and building a
/// [`crate::RedoLog`].
#[derive(Debug, Clone)]
pub struct Config {
    /// Maximum size of a segment file before rotating to the next one.
    pub max_segment_size: u64,

    /// Number of most recent snapshot-height buckets the redo log keeps.
    pub retain_height: u64,

    /// Number of read handles kept open across segment reads.
    pub handle_cache_size: usize,

    /// Whether to fsync the active segment after every append.
    pub sync_on_write: bool,

    /// Whether to take an advisory lock on the segment directory.
    pub lock_directory: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_segment_size: 10 * 1024 * 1024, // 10 MB
            retain_height: 100,
            handle_cache_size: 16,
            sync_on_write: false,
            lock_directory: true,
        }
    }
}

impl Config {
    /// Creates a configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the maximum segment size.
    #[must_use]
    pub const fn max_segment_size(mut self, size: u64) -> Self {
        self.max_segment_size = size;
        self
    }

    /// Sets the retention window in snapshot heights.
    #[must_use]
    pub const fn retain_height(mut self, heights: u64) -> Self {
        self.retain_height = heights;
        self
    }

    /// Sets the read handle cache capacity.
    #[must_use]
    pub const fn handle_cache_size(mut self, handles: usize) -> Self {
        self.handle_cache_size = handles;
        self
    }

    /// Sets whether to fsync after every append.
    #[must_use]
    pub const fn sync_on_write(mut self, value: bool) -> Self {
        self.sync_on_write = value;
        self
    }

    /// Sets whether to lock the segment directory.
    #[must_use]
    pub const fn lock_directory(mut self, value: bool) -> Self {
        self.lock_directory = value;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let config = Config::default();
        assert_eq!(config.max_segment_size, 10 * 1024 * 1024);
        assert_eq!(config.retain_height, 100);
        assert!(!config.sync_on_write);
        assert!(config.lock_directory);
    }

    #[test]
    fn builder_pattern() {
        let config = Config::new()
            .max_segment_size(4096)
            .retain_height(2)
            .handle_cache_size(1)
            .lock_directory(false);

        assert_eq!(config.max_segment_size, 4096);
        assert_eq!(config.retain_height, 2);
        assert_eq!(config.handle_cache_size, 1);
        assert!(!config.lock_directory);
    }
}
