//! Region and host layout types.
//!
//! - [`Roi`] - width/height of the region to move, in pixels and rows
//! - [`HostLayout`] - stride and chroma row offset of a host buffer
//!
//! Alignment and hardware limit constants live here too, so that both the
//! planner and the external routing checks agree on them.

use crate::format::{Format, bytes_per_pixel, is_semi_planar_like};

/// Required alignment of host pointers and strides, in bytes.
pub const ALIGN: usize = 16;

/// Page size used to derive aligned buffer bases.
pub const PAGE_SIZE: usize = 4096;

/// Low bits of an address inside its page.
pub const PAGE_MASK: usize = PAGE_SIZE - 1;

/// Widest region (in ROI units) a surface copy accepts.
pub const MAX_SURFACE_WIDTH: u32 = 65408;

/// Tallest region a surface copy accepts.
pub const MAX_SURFACE_HEIGHT: u32 = 4088;

/// Edge limit for 8-bit RGB host copies.
pub const MAX_RGB8_DIM: u32 = 4088;

/// Edge limit for 16-bit RGB host copies.
pub const MAX_RGB16_DIM: u32 = 10240;

/// Largest chroma row offset for plain semi-planar host copies.
pub const MAX_VERTICAL_PITCH: usize = 16384;

/// Largest chroma row offset when a P010 bit shift is applied.
pub const MAX_VERTICAL_PITCH_SHIFT: usize = 4096;

/// `true` when `value` is a multiple of [`ALIGN`].
#[inline]
pub const fn is_aligned(value: usize) -> bool {
    value % ALIGN == 0
}

/// Region of interest: pixels per row and number of rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Roi {
    /// Width in pixels.
    pub width: u32,
    /// Height in rows (luma rows for semi-planar formats).
    pub height: u32,
}

impl Roi {
    /// Creates a region.
    #[inline]
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// `true` when either edge is zero.
    #[inline]
    pub const fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    /// Common region of two frames.
    #[inline]
    pub fn min(self, other: Roi) -> Roi {
        Roi::new(self.width.min(other.width), self.height.min(other.height))
    }

    /// Generic surface copy limit.
    #[inline]
    pub const fn fits_surface(&self) -> bool {
        self.width <= MAX_SURFACE_WIDTH && self.height <= MAX_SURFACE_HEIGHT
    }

    /// `true` when both edges are at most `limit`.
    #[inline]
    pub const fn fits_square(&self, limit: u32) -> bool {
        self.width <= limit && self.height <= limit
    }

    /// `true` when `inner` lies within this region anchored at the origin.
    #[inline]
    pub const fn contains(&self, inner: Roi) -> bool {
        inner.width <= self.width && inner.height <= self.height
    }

    /// Row width in bytes for `format`.
    #[inline]
    pub const fn row_bytes(&self, format: Format) -> usize {
        self.width as usize * bytes_per_pixel(format)
    }
}

/// Host buffer layout.
///
/// A zero field means "derive from the region": `stride` becomes
/// `width * bpp` and `height_stride` becomes `height`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct HostLayout {
    /// Bytes between starts of consecutive rows.
    pub stride: usize,
    /// Rows between the start of the first plane and the chroma plane.
    /// For single-plane formats this is simply the allocated row count.
    pub height_stride: usize,
}

impl HostLayout {
    /// Layout with an explicit stride and derived row count.
    pub const fn with_stride(stride: usize) -> Self {
        Self {
            stride,
            height_stride: 0,
        }
    }

    /// Layout with explicit stride and chroma row offset.
    pub const fn new(stride: usize, height_stride: usize) -> Self {
        Self {
            stride,
            height_stride,
        }
    }

    /// Replaces zero fields with values derived from `roi` and `format`.
    pub fn resolve(self, format: Format, roi: Roi) -> HostLayout {
        HostLayout {
            stride: if self.stride == 0 {
                roi.row_bytes(format)
            } else {
                self.stride
            },
            height_stride: if self.height_stride == 0 {
                roi.height as usize
            } else {
                self.height_stride
            },
        }
    }

    /// Rows spanned by the buffer: first plane plus any chroma plane.
    pub fn span_rows(&self, format: Format, roi: Roi) -> usize {
        let chroma = if is_semi_planar_like(format) {
            roi.height as usize / 2
        } else {
            0
        };
        self.height_stride + chroma
    }

    /// Total host bytes covered by a copy of `roi`.
    pub fn total_bytes(&self, format: Format, roi: Roi) -> usize {
        self.stride * self.span_rows(format, roi)
    }
}
