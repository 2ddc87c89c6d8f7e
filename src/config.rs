use getset::CopyGetters;

/// 32 MiB: big enough that window fetches are rare, small enough to not matter next to the JVM
/// that produced the dump.
pub const DEFAULT_CHUNK_SIZE: usize = 32 * 1024 * 1024;

/// Real labels look like "JAVA PROFILE 1.0.2"
pub const DEFAULT_MAX_HEADER_LEN: usize = 1024;

/// Tunables for a [crate::Decoder].
#[derive(Debug, Clone, Copy, PartialEq, Eq, CopyGetters)]
pub struct DecoderConfig {
    /// Minimum size of each window fetched from the source, and so roughly the peak memory used
    /// for buffering.
    #[get_copy = "pub"]
    chunk_size: usize,
    /// How far to look for the NUL ending the header label before giving up on the file
    #[get_copy = "pub"]
    max_header_len: usize,
}

impl DecoderConfig {
    pub fn new() -> DecoderConfig {
        DecoderConfig {
            chunk_size: DEFAULT_CHUNK_SIZE,
            max_header_len: DEFAULT_MAX_HEADER_LEN,
        }
    }

    /// Zero is treated as one.
    pub fn with_chunk_size(mut self, chunk_size: usize) -> DecoderConfig {
        self.chunk_size = chunk_size.max(1);
        self
    }

    pub fn with_max_header_len(mut self, max_header_len: usize) -> DecoderConfig {
        self.max_header_len = max_header_len;
        self
    }
}

impl Default for DecoderConfig {
    fn default() -> Self {
        DecoderConfig::new()
    }
}
