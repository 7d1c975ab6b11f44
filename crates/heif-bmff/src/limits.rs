/// Security limits checked during parsing and decoding.
///
/// Every limit guards an allocation or a dereference. Exceeding one fails the current
/// operation with a `SecurityLimitExceeded` error; partial buffers are dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SecurityLimits {
    /// Maximum image width in pixels.
    pub max_image_width: u32,
    /// Maximum image height in pixels.
    pub max_image_height: u32,
    /// Maximum total number of pixels across all decoded images of one file.
    pub max_total_pixels: u64,
    /// Maximum box nesting depth.
    pub max_box_depth: u32,
    /// Maximum number of items in an `iloc` box.
    pub max_iloc_items: u32,
    /// Maximum number of extents per `iloc` item.
    pub max_iloc_extents_per_item: u32,
    /// Maximum number of child boxes per container.
    pub max_children_per_box: u32,
    /// Maximum size of a single contiguous memory block read from the file.
    pub max_memory_block_size: u64,
}

impl Default for SecurityLimits {
    fn default() -> Self {
        Self {
            max_image_width: 32768,
            max_image_height: 32768,
            max_total_pixels: 1 << 32,
            max_box_depth: 20,
            max_iloc_items: 32768,
            max_iloc_extents_per_item: 32,
            max_children_per_box: 65536,
            max_memory_block_size: 512 << 20,
        }
    }
}

impl SecurityLimits {
    /// Limits suitable for fuzzing and tests: small enough to trip quickly.
    pub fn strict() -> Self {
        Self {
            max_image_width: 4096,
            max_image_height: 4096,
            max_total_pixels: 1 << 26,
            max_box_depth: 16,
            max_iloc_items: 1024,
            max_iloc_extents_per_item: 8,
            max_children_per_box: 1024,
            max_memory_block_size: 16 << 20,
        }
    }
}
