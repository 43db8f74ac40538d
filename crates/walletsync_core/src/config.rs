//! Record store configuration.

/// Configuration for opening a [`crate::RecordStore`].
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Whether to create the store directory if it doesn't exist.
    pub create_if_missing: bool,

    /// Whether to fsync the record log after every write (safer but slower).
    pub sync_on_write: bool,

    /// Fraction of dead bytes in the log above which
    /// [`crate::RecordStore::needs_compaction`] reports true.
    pub compact_threshold: f64,

    /// Logs smaller than this are never considered for compaction.
    pub compact_min_bytes: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            create_if_missing: true,
            sync_on_write: true,
            compact_threshold: 0.5,
            compact_min_bytes: 64 * 1024, // 64 KB
        }
    }
}

impl StoreConfig {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets whether to create the store directory if missing.
    #[must_use]
    pub const fn create_if_missing(mut self, value: bool) -> Self {
        self.create_if_missing = value;
        self
    }

    /// Sets whether to fsync after every write.
    #[must_use]
    pub const fn sync_on_write(mut self, value: bool) -> Self {
        self.sync_on_write = value;
        self
    }

    /// Sets the dead-byte fraction that triggers compaction.
    ///
    /// Values are clamped to `0.0..=1.0`.
    #[must_use]
    pub fn compact_threshold(mut self, fraction: f64) -> Self {
        self.compact_threshold = fraction.clamp(0.0, 1.0);
        self
    }

    /// Sets the minimum log size considered for compaction.
    #[must_use]
    pub const fn compact_min_bytes(mut self, bytes: u64) -> Self {
        self.compact_min_bytes = bytes;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let config = StoreConfig::default();
        assert!(config.create_if_missing);
        assert!(config.sync_on_write);
        assert!((config.compact_threshold - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn builder_pattern() {
        let config = StoreConfig::new()
            .create_if_missing(false)
            .sync_on_write(false)
            .compact_threshold(1.7)
            .compact_min_bytes(0);

        assert!(!config.create_if_missing);
        assert!(!config.sync_on_write);
        assert!((config.compact_threshold - 1.0).abs() < f64::EPSILON);
        assert_eq!(config.compact_min_bytes, 0);
    }
}
