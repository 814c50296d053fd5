//! Aligned host frame storage.
//!
//! [`HostFrame`] owns a host buffer laid out the way the engine expects
//! (stride, chroma row offset) and hands out raw pointers and
//! [`HostPlanes`] for copy calls. Storage is a `Vec<u128>` viewed as bytes
//! through `bytemuck`, which keeps the start 16-byte aligned.

use gpucopy_core::{
    CopyError, CopyResult, Format, FrameDescriptor, HostLayout, HostPlanes, PAGE_SIZE, Roi, is_semi_planar_like,
};

/// Owned host frame.
#[derive(Debug, Clone)]
pub struct HostFrame {
    storage: Vec<u128>,
    offset: usize,
    len: usize,
    format: Format,
    roi: Roi,
    layout: HostLayout,
}

impl HostFrame {
    /// Zeroed frame with `layout` (zero fields derived from `roi`).
    pub fn new(format: Format, roi: Roi, layout: HostLayout) -> CopyResult<Self> {
        Self::allocate(format, roi, layout, None)
    }

    /// Zeroed frame whose first byte sits `page_offset` bytes into a page.
    ///
    /// Offsets that are not a multiple of 16 produce a misaligned frame,
    /// which the engine rejects.
    pub fn at_page_offset(format: Format, roi: Roi, layout: HostLayout, page_offset: usize) -> CopyResult<Self> {
        Self::allocate(format, roi, layout, Some(page_offset % PAGE_SIZE))
    }

    fn allocate(format: Format, roi: Roi, layout: HostLayout, page_offset: Option<usize>) -> CopyResult<Self> {
        let layout = layout.resolve(format, roi);
        let len = layout.total_bytes(format, roi);
        if len == 0 {
            return Err(CopyError::InvalidArgument(format!(
                "{format} frame of {}x{} has no bytes",
                roi.width, roi.height
            )));
        }
        let slack = if page_offset.is_some() { PAGE_SIZE } else { 0 };
        let storage = vec![0u128; (len + slack).div_ceil(16)];
        let offset = match page_offset {
            Some(want) => {
                let base = storage.as_ptr() as usize % PAGE_SIZE;
                (want + PAGE_SIZE - base) % PAGE_SIZE
            }
            None => 0,
        };
        Ok(Self {
            storage,
            offset,
            len,
            format,
            roi,
            layout,
        })
    }

    pub fn format(&self) -> Format {
        self.format
    }

    pub fn roi(&self) -> Roi {
        self.roi
    }

    /// Resolved layout.
    pub fn layout(&self) -> HostLayout {
        self.layout
    }

    /// Frame bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &bytemuck::cast_slice::<u128, u8>(&self.storage)[self.offset..self.offset + self.len]
    }

    pub fn as_bytes_mut(&mut self) -> &mut [u8] {
        let (start, end) = (self.offset, self.offset + self.len);
        &mut bytemuck::cast_slice_mut::<u128, u8>(&mut self.storage)[start..end]
    }

    pub fn as_ptr(&self) -> *const u8 {
        self.as_bytes().as_ptr()
    }

    pub fn as_mut_ptr(&mut self) -> *mut u8 {
        self.as_bytes_mut().as_mut_ptr()
    }

    /// Copied bytes of first-plane row `y`.
    pub fn row(&self, y: usize) -> &[u8] {
        let start = y * self.layout.stride;
        &self.as_bytes()[start..start + self.roi.row_bytes(self.format)]
    }

    pub fn row_mut(&mut self, y: usize) -> &mut [u8] {
        let start = y * self.layout.stride;
        let width = self.roi.row_bytes(self.format);
        &mut self.as_bytes_mut()[start..start + width]
    }

    /// Copied bytes of chroma row `c` (semi-planar formats only).
    pub fn chroma_row(&self, c: usize) -> &[u8] {
        let start = (self.layout.height_stride + c) * self.layout.stride;
        &self.as_bytes()[start..start + self.roi.row_bytes(self.format)]
    }

    pub fn chroma_row_mut(&mut self, c: usize) -> &mut [u8] {
        let start = (self.layout.height_stride + c) * self.layout.stride;
        let width = self.roi.row_bytes(self.format);
        &mut self.as_bytes_mut()[start..start + width]
    }

    /// Fills every byte with `f(index)`.
    pub fn fill_with<F: Fn(usize) -> u8>(&mut self, f: F) {
        self.as_bytes_mut()
            .iter_mut()
            .enumerate()
            .for_each(|(i, b)| *b = f(i));
    }

    fn planes_at(&self, y: usize) -> HostPlanes {
        if is_semi_planar_like(self.format) {
            HostPlanes::semi_planar(y, y + self.layout.stride * self.layout.height_stride, self.layout.stride)
        } else {
            HostPlanes::packed(y, self.layout.stride)
        }
    }

    /// Plane addresses for a read-only [`FrameDescriptor`].
    pub fn planes(&self) -> HostPlanes {
        self.planes_at(self.as_ptr() as usize)
    }

    /// Host descriptor of this frame as a copy source.
    pub fn descriptor(&self) -> FrameDescriptor {
        FrameDescriptor::host(self.format, self.roi.width, self.roi.height, self.planes())
    }

    /// Host descriptor of this frame as a copy destination.
    pub fn descriptor_mut(&mut self) -> FrameDescriptor {
        let ptr = self.as_mut_ptr() as usize;
        let planes = self.planes_at(ptr);
        FrameDescriptor::host(self.format, self.roi.width, self.roi.height, planes)
    }
}
