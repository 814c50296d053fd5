//! Frame descriptors.
//!
//! A [`FrameDescriptor`] tells the routing layer where a frame lives: on the
//! device behind an opaque [`SurfaceHandle`], or in host memory described by
//! [`HostPlanes`]. Host addresses are stored as plain integers; nothing in this
//! crate dereferences them.

use crate::format::Format;
use crate::geometry::Roi;

/// Opaque external handle pair identifying a device surface.
///
/// The pair is the cache key: two descriptors with equal handles refer to the
/// same surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct SurfaceHandle {
    /// Primary handle (allocation id, resource pointer).
    pub first: u64,
    /// Secondary handle (subresource, plane or array index).
    pub second: u64,
}

impl SurfaceHandle {
    /// Creates a handle pair.
    pub const fn new(first: u64, second: u64) -> Self {
        Self { first, second }
    }

    /// A zero primary handle is never a valid surface.
    pub const fn is_null(&self) -> bool {
        self.first == 0
    }
}

/// Host plane addresses of a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct HostPlanes {
    /// Address of the first plane (luma, or the packed pixels).
    pub y: usize,
    /// Address of the chroma plane, `0` for single-plane formats.
    pub uv: usize,
    /// Row pitch in bytes.
    pub pitch: usize,
}

impl HostPlanes {
    /// Single-plane host frame.
    pub const fn packed(ptr: usize, pitch: usize) -> Self {
        Self { y: ptr, uv: 0, pitch }
    }

    /// Two-plane host frame.
    pub const fn semi_planar(y: usize, uv: usize, pitch: usize) -> Self {
        Self { y, uv, pitch }
    }

    /// Chroma plane offset in whole rows, `0` when it is not a whole number of rows.
    pub fn vertical_pitch(&self) -> usize {
        if self.pitch == 0 || self.uv < self.y {
            return 0;
        }
        let delta = self.uv - self.y;
        if delta % self.pitch != 0 {
            0
        } else {
            delta / self.pitch
        }
    }
}

/// Where a frame's pixels live.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameMemory {
    /// Device-resident surface.
    Device(SurfaceHandle),
    /// Host memory.
    Host(HostPlanes),
}

/// Format, size and location of one frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameDescriptor {
    /// Pixel format.
    pub format: Format,
    /// Allocated width in pixels.
    pub width: u32,
    /// Allocated height in rows.
    pub height: u32,
    /// Non-zero when samples are MSB-justified (P010 only).
    pub shift: u16,
    /// Significant bits of a luma sample.
    pub bit_depth_luma: u16,
    /// Storage location.
    pub memory: FrameMemory,
}

impl FrameDescriptor {
    /// Device frame.
    pub fn device(format: Format, width: u32, height: u32, surface: SurfaceHandle) -> Self {
        Self {
            format,
            width,
            height,
            shift: 0,
            bit_depth_luma: 8,
            memory: FrameMemory::Device(surface),
        }
    }

    /// Host frame.
    pub fn host(format: Format, width: u32, height: u32, planes: HostPlanes) -> Self {
        Self {
            format,
            width,
            height,
            shift: 0,
            bit_depth_luma: 8,
            memory: FrameMemory::Host(planes),
        }
    }

    /// Sets the shift flag.
    pub fn with_shift(mut self, shift: u16) -> Self {
        self.shift = shift;
        self
    }

    /// Sets the luma bit depth.
    pub fn with_bit_depth(mut self, bit_depth_luma: u16) -> Self {
        self.bit_depth_luma = bit_depth_luma;
        self
    }

    /// Full frame region.
    pub fn roi(&self) -> Roi {
        Roi::new(self.width, self.height)
    }

    /// Device surface handle, if device-resident.
    pub fn surface(&self) -> Option<SurfaceHandle> {
        match self.memory {
            FrameMemory::Device(handle) => Some(handle),
            FrameMemory::Host(_) => None,
        }
    }

    /// Host planes, if host-resident with a non-null base.
    pub fn host_planes(&self) -> Option<HostPlanes> {
        match self.memory {
            FrameMemory::Host(planes) if planes.y != 0 => Some(planes),
            _ => None,
        }
    }
}
