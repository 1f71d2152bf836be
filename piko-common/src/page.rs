//! Page geometry.

/// Size of a translation granule / allocator page in bytes.
pub const SIZE: usize = 4096;

/// log2 of the page size.
pub const SHIFT: usize = 12;

/// Round a byte count up to whole pages.
#[inline]
#[must_use]
pub const fn count_for(bytes: usize) -> usize {
    bytes.div_ceil(SIZE)
}

/// Check whether an address is page-aligned.
#[inline]
#[must_use]
pub const fn is_aligned(addr: usize) -> bool {
    addr & (SIZE - 1) == 0
}
