//! Copy planner: splits a host transfer into hardware-legal slices.
//!
//! A device buffer must start on a page boundary and may not exceed the
//! device's linear size limit. The planner walks the host range from its
//! first byte, rounds each slice start down to a page, and carries the
//! sub-page remainder as the slice's left shift:
//!
//! ```text
//!  page      ptr                                   ptr + size - left
//!  |<-left->|<----------- rows * stride ----------->|
//!  [========|=======================================]   slice 0
//!                                        page  ptr'
//!                                        |<-l'->|<-------- ...   slice 1
//! ```
//!
//! Slices that do not hold the whole remainder are cut at a multiple of
//! `BLOCK_HEIGHT * INNER_LOOP` rows so every slice but the last fills
//! whole thread blocks.
//!
//! Row counts are in *span rows*: for semi-planar formats the first
//! `height_stride` rows are luma and the following `height / 2` rows chroma.

use gpucopy_core::{
    ALIGN, CopyError, CopyResult, Format, HostLayout, PAGE_MASK, Roi, bytes_per_pixel, is_aligned,
};

use crate::kernel::{BLOCK_HEIGHT, INNER_LOOP};

/// Row granule of a non-final slice.
pub const SLICE_ROW_GRANULE: usize = BLOCK_HEIGHT * INNER_LOOP;

/// One dispatch-sized piece of a host transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Slice {
    /// Page-aligned start of the device buffer.
    pub aligned_base: usize,
    /// Offset of the first copied byte from `aligned_base`.
    pub left_shift: usize,
    /// Span rows covered.
    pub rows: usize,
    /// Device buffer length: `rows * stride + left_shift`.
    pub size: usize,
    /// First span row of this slice.
    pub start_y: usize,
}

impl Slice {
    /// Address of the first copied byte.
    #[inline]
    pub fn start(&self) -> usize {
        self.aligned_base + self.left_shift
    }

    /// One past the last copied byte.
    #[inline]
    pub fn end(&self) -> usize {
        self.aligned_base + self.size
    }
}

/// Full plan of one host transfer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlicePlan {
    pub slices: Vec<Slice>,
    /// Resolved host layout.
    pub layout: HostLayout,
    /// Bytes copied per row: `min(stride, width * bpp)`.
    pub copy_width_bytes: usize,
    /// First-plane rows copied: `min(height_stride, height)`.
    pub copy_height_rows: usize,
    /// Total span rows.
    pub span_rows: usize,
    pub bytes_per_pixel: usize,
}

impl SlicePlan {
    /// Host bytes covered by the plan.
    pub fn total_bytes(&self) -> usize {
        self.layout.stride * self.span_rows
    }

    /// Rows of the first plane actually copied by `slice`.
    pub fn copy_rows(&self, slice: &Slice) -> usize {
        self.copy_height_rows
            .saturating_sub(slice.start_y)
            .min(slice.rows)
    }
}

/// Validates a host transfer and cuts it into slices.
///
/// # Errors
///
/// - [`CopyError::InvalidArgument`] for an empty region or zero size limit
/// - [`CopyError::UnsupportedFormat`] when `format` has no pixel size
/// - [`CopyError::InvalidAlignment`] for a null or misaligned `ptr` or stride
/// - [`CopyError::ResourceCreationFailed`] when one row block exceeds the limit
pub fn plan_slices(
    ptr: usize,
    format: Format,
    roi: Roi,
    layout: HostLayout,
    max_linear_size: usize,
) -> CopyResult<SlicePlan> {
    if roi.is_empty() {
        return Err(CopyError::InvalidArgument(format!(
            "empty region {}x{}",
            roi.width, roi.height
        )));
    }
    if max_linear_size == 0 {
        return Err(CopyError::InvalidArgument("zero linear size limit".into()));
    }
    let bpp = bytes_per_pixel(format);
    if bpp == 0 {
        return Err(CopyError::UnsupportedFormat(format!("{format} has no pixel size")));
    }
    if ptr == 0 || !is_aligned(ptr) {
        return Err(CopyError::InvalidAlignment {
            what: "host pointer",
            value: ptr,
            align: ALIGN,
        });
    }

    let layout = layout.resolve(format, roi);
    let stride = layout.stride;
    if !is_aligned(stride) {
        return Err(CopyError::InvalidAlignment {
            what: "stride",
            value: stride,
            align: ALIGN,
        });
    }

    let span_rows = layout.span_rows(format, roi);
    let mut slices = Vec::new();
    let mut cursor = ptr;
    let mut remaining = stride * span_rows;
    let mut start_y = 0;

    while remaining > 0 {
        let aligned_base = cursor & !PAGE_MASK;
        let left_shift = cursor - aligned_base;
        remaining += left_shift;

        let (rows, size) = if remaining > max_linear_size {
            let rows = (max_linear_size.saturating_sub(left_shift) / (stride * SLICE_ROW_GRANULE))
                * SLICE_ROW_GRANULE;
            if rows == 0 {
                return Err(CopyError::ResourceCreationFailed(format!(
                    "{SLICE_ROW_GRANULE} rows of {stride} bytes exceed the {max_linear_size} byte buffer limit"
                )));
            }
            (rows, rows * stride + left_shift)
        } else {
            (span_rows - start_y, remaining)
        };

        slices.push(Slice {
            aligned_base,
            left_shift,
            rows,
            size,
            start_y,
        });

        cursor += size - left_shift;
        remaining -= size;
        start_y += rows;
    }

    Ok(SlicePlan {
        slices,
        layout,
        copy_width_bytes: stride.min(roi.row_bytes(format)),
        copy_height_rows: layout.height_stride.min(roi.height as usize),
        span_rows,
        bytes_per_pixel: bpp,
    })
}
