//! Kernel selection, argument schemas and execution grids.
//!
//! Every kernel has a fixed, ordered argument schema made of named
//! [`ArgSlot`]s. Binding walks the schema and produces `(slot, value)` pairs,
//! so argument positions are never spelled as bare numbers at call sites.
//!
//! ```text
//! (Direction, Format, Transform) --select_kernel--> KernelId
//! (KernelId, LaunchParams)       --bind_arguments--> [(0, surface), (1, buffer), ...]
//! (KernelId, width, rows, bpp)   --ExecutionGrid::compute--> w x h threads
//! ```

use gpucopy_core::{CopyError, CopyResult, Format, bytes_per_pixel, is_semi_planar_like, is_single_plane};

use crate::device::{ArgIndex, ArgValue};

/// Pixel width of one thread block (in 4-byte cells for linear kernels).
pub const BLOCK_WIDTH: usize = 32;

/// Rows handled by one thread block per iteration.
pub const BLOCK_HEIGHT: usize = 8;

/// Iterations each packed-kernel thread runs down the image.
pub const INNER_LOOP: usize = 4;

/// Cell size of linear (buffer) kernels.
pub const LINEAR_CELL_BYTES: usize = 4;

// ============================================================================
// Request classification
// ============================================================================

/// Direction of a copy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    HostToDevice,
    DeviceToHost,
    DeviceToDevice,
}

/// Per-pixel transform applied while copying.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Transform {
    /// Plain copy.
    #[default]
    None,
    /// Exchange R and B channels.
    Swap,
    /// Reflect each row about the vertical axis.
    Mirror,
    /// Re-justify 16-bit samples: left on upload, right on download.
    Shift,
}

/// Kernel functions in the copy program.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KernelId {
    LinearRead,
    LinearWrite,
    SwapRead,
    SwapWrite,
    SemiPlanarRead,
    SemiPlanarWrite,
    MirrorRead,
    MirrorWrite,
    ShiftRead,
    ShiftWrite,
    SurfaceCopy,
    SurfaceSwap,
    SurfaceMirror,
}

impl KernelId {
    pub const ALL: [KernelId; 13] = [
        KernelId::LinearRead,
        KernelId::LinearWrite,
        KernelId::SwapRead,
        KernelId::SwapWrite,
        KernelId::SemiPlanarRead,
        KernelId::SemiPlanarWrite,
        KernelId::MirrorRead,
        KernelId::MirrorWrite,
        KernelId::ShiftRead,
        KernelId::ShiftWrite,
        KernelId::SurfaceCopy,
        KernelId::SurfaceSwap,
        KernelId::SurfaceMirror,
    ];

    /// Function name inside the kernel program.
    pub const fn name(self) -> &'static str {
        match self {
            KernelId::LinearRead => "surfaceCopy_read_32x32",
            KernelId::LinearWrite => "surfaceCopy_write_32x32",
            KernelId::SwapRead => "surfaceCopy_readswap_32x32",
            KernelId::SwapWrite => "surfaceCopy_writeswap_32x32",
            KernelId::SemiPlanarRead => "surfaceCopy_read_NV12",
            KernelId::SemiPlanarWrite => "surfaceCopy_write_NV12",
            KernelId::MirrorRead => "surfaceMirror_read_NV12",
            KernelId::MirrorWrite => "surfaceMirror_write_NV12",
            KernelId::ShiftRead => "surfaceCopy_read_P010_shift",
            KernelId::ShiftWrite => "surfaceCopy_write_P010_shift",
            KernelId::SurfaceCopy => "SurfaceCopy_2DTo2D_32x32",
            KernelId::SurfaceSwap => "SurfaceCopySwap_2DTo2D_32x32",
            KernelId::SurfaceMirror => "SurfaceMirror_2DTo2D_NV12",
        }
    }

    pub fn from_name(name: &str) -> Option<KernelId> {
        KernelId::ALL.into_iter().find(|k| k.name() == name)
    }

    /// Kernels that move data from a device surface into host memory.
    pub const fn reads_to_host(self) -> bool {
        matches!(
            self,
            KernelId::LinearRead
                | KernelId::SwapRead
                | KernelId::SemiPlanarRead
                | KernelId::MirrorRead
                | KernelId::ShiftRead
        )
    }

    /// Kernels that move data from host memory into a device surface.
    pub const fn writes_from_host(self) -> bool {
        matches!(
            self,
            KernelId::LinearWrite
                | KernelId::SwapWrite
                | KernelId::SemiPlanarWrite
                | KernelId::MirrorWrite
                | KernelId::ShiftWrite
        )
    }

    /// Kernels walking luma rows then chroma rows at the chroma row offset.
    pub const fn is_semi_planar(self) -> bool {
        matches!(
            self,
            KernelId::SemiPlanarRead
                | KernelId::SemiPlanarWrite
                | KernelId::MirrorRead
                | KernelId::MirrorWrite
                | KernelId::ShiftRead
                | KernelId::ShiftWrite
                | KernelId::SurfaceMirror
        )
    }

    /// Rows iterated per thread: packed kernels loop, semi-planar ones do not.
    pub const fn inner_loop(self) -> usize {
        if self.is_semi_planar() { 1 } else { INNER_LOOP }
    }

    /// Per-pixel transform this kernel applies.
    pub const fn transform(self) -> Transform {
        match self {
            KernelId::SwapRead | KernelId::SwapWrite | KernelId::SurfaceSwap => Transform::Swap,
            KernelId::MirrorRead | KernelId::MirrorWrite | KernelId::SurfaceMirror => Transform::Mirror,
            KernelId::ShiftRead | KernelId::ShiftWrite => Transform::Shift,
            _ => Transform::None,
        }
    }
}

// ============================================================================
// Selection table
// ============================================================================

#[derive(Debug, Clone, Copy)]
enum FormatClass {
    /// Single plane with a linear kernel.
    Packed,
    /// NV12 and P010.
    SemiPlanar,
    /// Formats with an R/B counterpart.
    SwapPair,
    Nv12,
    P010,
    /// Anything with a pixel size.
    AnySized,
}

impl FormatClass {
    fn matches(self, format: Format) -> bool {
        match self {
            FormatClass::Packed => is_single_plane(format),
            FormatClass::SemiPlanar => is_semi_planar_like(format),
            FormatClass::SwapPair => matches!(
                format,
                Format::Rgb4 | Format::Bgr4 | Format::Argb16 | Format::Abgr16
            ),
            FormatClass::Nv12 => format == Format::Nv12,
            FormatClass::P010 => format == Format::P010,
            FormatClass::AnySized => bytes_per_pixel(format) > 0,
        }
    }
}

struct KernelEntry {
    direction: Direction,
    transform: Transform,
    class: FormatClass,
    kernel: KernelId,
}

const fn entry(direction: Direction, transform: Transform, class: FormatClass, kernel: KernelId) -> KernelEntry {
    KernelEntry {
        direction,
        transform,
        class,
        kernel,
    }
}

const KERNEL_TABLE: [KernelEntry; 13] = {
    use Direction::*;
    use FormatClass::*;
    [
        entry(HostToDevice, Transform::None, Packed, KernelId::LinearWrite),
        entry(HostToDevice, Transform::None, SemiPlanar, KernelId::SemiPlanarWrite),
        entry(HostToDevice, Transform::Swap, SwapPair, KernelId::SwapWrite),
        entry(HostToDevice, Transform::Mirror, Nv12, KernelId::MirrorWrite),
        entry(HostToDevice, Transform::Shift, P010, KernelId::ShiftWrite),
        entry(DeviceToHost, Transform::None, Packed, KernelId::LinearRead),
        entry(DeviceToHost, Transform::None, SemiPlanar, KernelId::SemiPlanarRead),
        entry(DeviceToHost, Transform::Swap, SwapPair, KernelId::SwapRead),
        entry(DeviceToHost, Transform::Mirror, Nv12, KernelId::MirrorRead),
        entry(DeviceToHost, Transform::Shift, P010, KernelId::ShiftRead),
        entry(DeviceToDevice, Transform::None, AnySized, KernelId::SurfaceCopy),
        entry(DeviceToDevice, Transform::Swap, SwapPair, KernelId::SurfaceSwap),
        entry(DeviceToDevice, Transform::Mirror, Nv12, KernelId::SurfaceMirror),
    ]
};

/// Picks the kernel for a request. Exactly one table entry must match.
pub fn select_kernel(direction: Direction, format: Format, transform: Transform) -> CopyResult<KernelId> {
    let mut found = KERNEL_TABLE
        .iter()
        .filter(|e| e.direction == direction && e.transform == transform && e.class.matches(format));

    match (found.next(), found.next()) {
        (Some(e), None) => Ok(e.kernel),
        (None, _) => Err(CopyError::UnsupportedFormat(format!(
            "no {transform:?} kernel for {format} ({direction:?})"
        ))),
        (Some(a), Some(b)) => Err(CopyError::UnsupportedFormat(format!(
            "ambiguous kernels {} / {} for {format}",
            a.kernel.name(),
            b.kernel.name()
        ))),
    }
}

// ============================================================================
// Argument schemas
// ============================================================================

/// Named kernel argument positions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArgSlot {
    /// Device surface of a host transfer.
    Surface,
    /// Host buffer of a host transfer.
    Buffer,
    /// Source surface of a surface-to-surface kernel.
    SurfaceIn,
    /// Destination surface of a surface-to-surface kernel.
    SurfaceOut,
    /// Host row stride in 4-byte words.
    StrideDwords,
    /// Host row stride in bytes.
    StrideBytes,
    /// Chroma row offset (rows allocated for the first plane).
    HeightStrideRows,
    /// Rows this dispatch covers.
    SliceRows,
    /// Byte offset of the slice start within its page-aligned buffer.
    LeftShift,
    /// Grid height, for kernels that stride by thread count.
    GridHeight,
    /// Copied row width in 4-byte words.
    WidthDwords,
    /// Region width in pixels.
    RoiWidth,
    /// Region height in luma rows.
    RoiHeight,
    BytesPerPixel,
    /// Sample shift amount.
    BitShift,
    StartX,
    /// First row of this dispatch in buffer row space.
    StartY,
}

/// Ordered argument schema of `kernel`. Slot position == argument index.
///
/// The leading positions follow the copy program's kernel signatures. Rows
/// and offsets the in-process device needs to place a slice come after them.
pub const fn schema(kernel: KernelId) -> &'static [ArgSlot] {
    use ArgSlot::*;
    match kernel {
        KernelId::LinearRead => &[
            Surface, Buffer, StrideDwords, HeightStrideRows, LeftShift, GridHeight, WidthDwords, SliceRows,
            StartX, StartY,
        ],
        KernelId::LinearWrite => &[
            Buffer, Surface, StrideDwords, SliceRows, LeftShift, GridHeight, StartX, StartY, WidthDwords,
        ],
        KernelId::SwapRead => &[
            Surface, Buffer, StrideDwords, HeightStrideRows, LeftShift, GridHeight, WidthDwords, SliceRows,
            BytesPerPixel, StartX, StartY,
        ],
        KernelId::SwapWrite => &[
            Buffer, Surface, StrideDwords, SliceRows, LeftShift, GridHeight, BytesPerPixel, StartX, StartY,
            WidthDwords,
        ],
        KernelId::SemiPlanarRead => &[
            Surface, Buffer, WidthDwords, RoiHeight, LeftShift, HeightStrideRows, StrideBytes, SliceRows, StartY,
        ],
        KernelId::SemiPlanarWrite => &[
            Buffer, Surface, WidthDwords, RoiHeight, LeftShift, StrideBytes, HeightStrideRows, SliceRows, StartY,
        ],
        KernelId::MirrorRead => &[
            Surface, Buffer, StrideDwords, RoiHeight, LeftShift, WidthDwords, HeightStrideRows, SliceRows, StartY,
            RoiWidth,
        ],
        KernelId::MirrorWrite => &[
            Buffer, Surface, StrideDwords, HeightStrideRows, LeftShift, WidthDwords, RoiHeight, SliceRows, StartY,
            RoiWidth,
        ],
        KernelId::ShiftRead => &[
            Surface, Buffer, WidthDwords, RoiHeight, LeftShift, BitShift, StrideDwords, HeightStrideRows, SliceRows,
            StartY,
        ],
        KernelId::ShiftWrite => &[
            Buffer, Surface, StrideDwords, HeightStrideRows, LeftShift, BitShift, WidthDwords, RoiHeight, SliceRows,
            StartY,
        ],
        KernelId::SurfaceCopy => &[SurfaceIn, SurfaceOut, RoiWidth, RoiHeight, GridHeight, BytesPerPixel],
        KernelId::SurfaceSwap => &[SurfaceIn, SurfaceOut, GridHeight, BytesPerPixel, RoiWidth, RoiHeight],
        KernelId::SurfaceMirror => &[SurfaceIn, SurfaceOut, RoiWidth, RoiHeight],
    }
}

/// Values available for binding. Resources a kernel does not use stay `None`.
#[derive(Debug, Clone, Copy, Default)]
pub struct LaunchParams {
    pub surface: Option<ArgIndex>,
    pub buffer: Option<ArgIndex>,
    pub surface_in: Option<ArgIndex>,
    pub surface_out: Option<ArgIndex>,
    /// Host stride in bytes.
    pub stride: usize,
    pub height_stride: usize,
    pub slice_rows: usize,
    pub left_shift: usize,
    pub grid_height: u32,
    /// Copied row width in bytes.
    pub width_bytes: usize,
    pub roi_width: u32,
    pub roi_height: u32,
    pub bytes_per_pixel: usize,
    pub bit_shift: u32,
    pub start_x: usize,
    pub start_y: usize,
}

fn scalar(name: &str, value: usize) -> CopyResult<ArgValue> {
    u32::try_from(value)
        .map(ArgValue::U32)
        .map_err(|_| CopyError::InvalidArgument(format!("{name} {value} does not fit a kernel argument")))
}

fn resource(slot: ArgSlot, index: Option<ArgIndex>) -> CopyResult<ArgValue> {
    index
        .map(ArgValue::Index)
        .ok_or_else(|| CopyError::DeviceOperationFailed(format!("missing resource for {slot:?}")))
}

/// Produces the ordered `(index, value)` argument list of `kernel`.
pub fn bind_arguments(kernel: KernelId, p: &LaunchParams) -> CopyResult<Vec<(u32, ArgValue)>> {
    schema(kernel)
        .iter()
        .enumerate()
        .map(|(i, &slot)| {
            let value = match slot {
                ArgSlot::Surface => resource(slot, p.surface)?,
                ArgSlot::Buffer => resource(slot, p.buffer)?,
                ArgSlot::SurfaceIn => resource(slot, p.surface_in)?,
                ArgSlot::SurfaceOut => resource(slot, p.surface_out)?,
                ArgSlot::StrideDwords => scalar("stride", p.stride.div_ceil(4))?,
                ArgSlot::StrideBytes => scalar("stride", p.stride)?,
                ArgSlot::HeightStrideRows => scalar("height stride", p.height_stride)?,
                ArgSlot::SliceRows => scalar("slice rows", p.slice_rows)?,
                ArgSlot::LeftShift => scalar("left shift", p.left_shift)?,
                ArgSlot::GridHeight => ArgValue::U32(p.grid_height),
                ArgSlot::WidthDwords => scalar("width", p.width_bytes.div_ceil(4))?,
                ArgSlot::RoiWidth => ArgValue::U32(p.roi_width),
                ArgSlot::RoiHeight => ArgValue::U32(p.roi_height),
                ArgSlot::BytesPerPixel => scalar("bytes per pixel", p.bytes_per_pixel)?,
                ArgSlot::BitShift => ArgValue::U32(p.bit_shift),
                ArgSlot::StartX => scalar("start x", p.start_x)?,
                ArgSlot::StartY => scalar("start y", p.start_y)?,
            };
            Ok((i as u32, value))
        })
        .collect()
}

// ============================================================================
// Execution grid
// ============================================================================

/// Thread grid of one dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ExecutionGrid {
    pub width: u32,
    pub height: u32,
}

impl ExecutionGrid {
    /// Grid covering `width_bytes` x `rows` for `kernel`.
    ///
    /// Linear kernels move 4-byte cells, surface kernels move whole pixels
    /// of `bpp` bytes.
    pub fn compute(kernel: KernelId, width_bytes: usize, rows: usize, bpp: usize) -> ExecutionGrid {
        let cell = match kernel {
            KernelId::SurfaceCopy | KernelId::SurfaceSwap | KernelId::SurfaceMirror => bpp.max(1),
            _ => LINEAR_CELL_BYTES,
        };
        let width = width_bytes.div_ceil(BLOCK_WIDTH * cell);
        let height = rows.div_ceil(BLOCK_HEIGHT * kernel.inner_loop());
        ExecutionGrid {
            width: width.max(1) as u32,
            height: height.max(1) as u32,
        }
    }

    /// Total thread count.
    pub fn threads(&self) -> u64 {
        self.width as u64 * self.height as u64
    }

    /// `true` when this grid is at least as large as `other` on both axes.
    pub fn covers(&self, other: &ExecutionGrid) -> bool {
        self.width >= other.width && self.height >= other.height
    }
}
