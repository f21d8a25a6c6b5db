
//! Hard caps that protect the reader against pathological or hostile files.
//! All caps can be adjusted by the application before opening a file.

/// Default maximum number of channels in a single header.
pub const DEFAULT_MAX_CHANNEL_COUNT: usize = 1024;

/// Caps applied while parsing and validating a file.
/// A file that exceeds any of these values is rejected as corrupt,
/// even if it could technically be decoded.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct SanityLimits {

    /// Maximum width and height of the data window, in pixels.
    pub max_image_dimension: usize,

    /// Maximum width and height of a single tile, in pixels.
    /// Tiles also must not be larger than the data window.
    pub max_tile_dimension: usize,

    /// Maximum number of channels in a single header.
    pub max_channel_count: usize,

    /// Maximum accumulated length of all attribute names in one header, in bytes.
    pub max_attribute_name_bytes: usize,

    /// Maximum size of a single chunk after decompression, in bytes.
    pub max_chunk_raw_bytes: usize,

    /// Maximum sum of all deep sample counts in a single chunk.
    pub max_deep_samples_per_chunk: usize,
}

impl Default for SanityLimits {
    fn default() -> Self {
        SanityLimits {
            max_image_dimension: 1 << 20,
            max_tile_dimension: 1 << 20,
            max_channel_count: DEFAULT_MAX_CHANNEL_COUNT,
            max_attribute_name_bytes: 1 << 16,
            max_chunk_raw_bytes: 1 << 31,
            max_deep_samples_per_chunk: 1 << 28,
        }
    }
}

impl SanityLimits {

    /// Limits for untrusted input: much smaller single allocations.
    /// Used by the validator in reduced-memory mode.
    pub fn reduced_memory() -> Self {
        SanityLimits {
            max_chunk_raw_bytes: 1 << 26,
            max_deep_samples_per_chunk: 1 << 22,
            .. Self::default()
        }
    }
}
