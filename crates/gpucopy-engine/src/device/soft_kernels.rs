//! Kernel bodies of the software device.
//!
//! Arguments are read back through the same schemas the engine binds with,
//! so a schema mismatch shows up as a failed dispatch.

use gpucopy_core::is_semi_planar_like;
use rayon::prelude::*;

use super::soft::{HostRange, SoftState};
use super::{ArgIndex, ArgValue};
use crate::kernel::{ArgSlot, ExecutionGrid, KernelId, schema};

/// Positional arguments viewed by slot name.
struct Args<'a> {
    kernel: KernelId,
    values: &'a [Option<ArgValue>],
}

impl Args<'_> {
    fn get(&self, slot: ArgSlot) -> Result<ArgValue, String> {
        let pos = schema(self.kernel)
            .iter()
            .position(|&s| s == slot)
            .ok_or_else(|| format!("{} has no {slot:?} argument", self.kernel.name()))?;
        self.values
            .get(pos)
            .copied()
            .flatten()
            .ok_or_else(|| format!("{slot:?} unbound"))
    }

    fn index(&self, slot: ArgSlot) -> Result<ArgIndex, String> {
        self.get(slot)?
            .as_index()
            .ok_or_else(|| format!("{slot:?} is not a resource"))
    }

    fn scalar(&self, slot: ArgSlot) -> Result<usize, String> {
        self.get(slot)?
            .as_u32()
            .map(|v| v as usize)
            .ok_or_else(|| format!("{slot:?} is not a scalar"))
    }
}

/// Per-row pixel operation.
#[derive(Debug, Clone, Copy)]
enum RowOp {
    Copy,
    Swap { bpp: usize },
    Mirror,
    ShiftLeft(u32),
    ShiftRight(u32),
}

impl RowOp {
    fn for_kernel(kernel: KernelId, args: &Args<'_>) -> Result<RowOp, String> {
        Ok(match kernel {
            KernelId::SwapRead | KernelId::SwapWrite | KernelId::SurfaceSwap => RowOp::Swap {
                bpp: args.scalar(ArgSlot::BytesPerPixel)?,
            },
            KernelId::MirrorRead | KernelId::MirrorWrite | KernelId::SurfaceMirror => RowOp::Mirror,
            KernelId::ShiftWrite => RowOp::ShiftLeft(args.scalar(ArgSlot::BitShift)? as u32),
            KernelId::ShiftRead => RowOp::ShiftRight(args.scalar(ArgSlot::BitShift)? as u32),
            _ => RowOp::Copy,
        })
    }

    /// Writes `src` into `dst` (equal lengths). `chroma` rows hold UV pairs.
    fn apply(self, src: &[u8], dst: &mut [u8], chroma: bool) {
        match self {
            RowOp::Copy => dst.copy_from_slice(src),
            RowOp::Swap { bpp } => {
                dst.copy_from_slice(src);
                let lane = bpp / 4;
                for px in dst.chunks_exact_mut(bpp) {
                    // R and B sit in lanes 0 and 2
                    for i in 0..lane {
                        px.swap(i, 2 * lane + i);
                    }
                }
            }
            RowOp::Mirror => {
                let unit = if chroma { 2 } else { 1 };
                let n = src.len() / unit;
                for i in 0..n {
                    let from = (n - 1 - i) * unit;
                    dst[i * unit..(i + 1) * unit].copy_from_slice(&src[from..from + unit]);
                }
                let tail = n * unit;
                dst[tail..].copy_from_slice(&src[tail..]);
            }
            RowOp::ShiftLeft(s) | RowOp::ShiftRight(s) => {
                let left = matches!(self, RowOp::ShiftLeft(_));
                for (d, sv) in dst.chunks_exact_mut(2).zip(src.chunks_exact(2)) {
                    let v = u16::from_le_bytes([sv[0], sv[1]]);
                    let v = if left { v << s } else { v >> s };
                    d.copy_from_slice(&v.to_le_bytes());
                }
                if src.len() % 2 == 1 {
                    let last = src.len() - 1;
                    dst[last] = src[last];
                }
            }
        }
    }
}

/// Executes one dispatch against `state`.
pub(super) fn run(
    kernel: KernelId,
    values: &[Option<ArgValue>],
    grid: ExecutionGrid,
    state: &mut SoftState,
) -> Result<(), String> {
    let args = Args { kernel, values };
    if kernel.reads_to_host() || kernel.writes_from_host() {
        host_transfer(kernel, &args, grid, state)
    } else {
        surface_transfer(kernel, &args, grid, state)
    }
}

fn host_transfer(kernel: KernelId, args: &Args<'_>, grid: ExecutionGrid, state: &mut SoftState) -> Result<(), String> {
    let surface_idx = args.index(ArgSlot::Surface)?;
    let buffer_idx = args.index(ArgSlot::Buffer)?;
    let handle = *state
        .bound_surfaces
        .get(&surface_idx)
        .ok_or("surface argument is not an open surface")?;
    let HostRange { base, len } = *state
        .bound_buffers
        .get(&buffer_idx)
        .ok_or("buffer argument is not a live buffer")?;

    let stride = if schema(kernel).contains(&ArgSlot::StrideBytes) {
        args.scalar(ArgSlot::StrideBytes)?
    } else {
        args.scalar(ArgSlot::StrideDwords)? * 4
    };
    let left = args.scalar(ArgSlot::LeftShift)?;
    let rows = args.scalar(ArgSlot::SliceRows)?;
    let start_y = args.scalar(ArgSlot::StartY)?;
    let semi = kernel.is_semi_planar();
    let (roi_height, height_stride) = if semi {
        (args.scalar(ArgSlot::RoiHeight)?, args.scalar(ArgSlot::HeightStrideRows)?)
    } else {
        (0, 0)
    };
    let op = RowOp::for_kernel(kernel, args)?;

    let surface = state.surfaces.get_mut(&handle).ok_or("surface storage vanished")?;
    let width = match op {
        RowOp::Mirror => args.scalar(ArgSlot::RoiWidth)?,
        _ => args.scalar(ArgSlot::WidthDwords)? * 4,
    };
    // only the dword padding of the last cell may hang past the pitch
    if width > stride || width > surface.pitch.next_multiple_of(4) {
        return Err(format!(
            "row of {width} bytes exceeds stride {stride} or surface pitch {}",
            surface.pitch
        ));
    }
    if semi && roi_height > surface.height {
        return Err(format!("{roi_height} rows exceed surface height {}", surface.height));
    }
    let width = width.min(surface.pitch);

    let needed = ExecutionGrid::compute(kernel, width, rows, 1);
    if !grid.covers(&needed) {
        return Err(format!("grid {grid:?} does not cover {needed:?}"));
    }

    // storage row -> (buffer offset, is chroma)
    let mut map: Vec<Option<(usize, bool)>> = vec![None; surface.rows()];
    for r in 0..rows {
        let y = start_y + r;
        let target = if semi {
            if y < height_stride {
                (y < roi_height).then_some((y, false))
            } else {
                let c = y - height_stride;
                (c < roi_height / 2).then_some((surface.height + c, true))
            }
        } else if y < surface.height {
            Some((y, false))
        } else {
            return Err(format!("row {y} lands outside the surface"));
        };
        let Some((row, chroma)) = target else { continue };
        let offset = left + r * stride;
        if offset + width > len {
            return Err(format!("row {y} overruns the {len} byte buffer"));
        }
        if row >= map.len() {
            return Err(format!("row {y} lands outside the surface"));
        }
        map[row] = Some((offset, chroma));
    }

    let pitch = surface.pitch;
    if kernel.writes_from_host() {
        surface
            .data
            .par_chunks_mut(pitch)
            .zip(map.par_iter())
            .for_each(|(row, slot)| {
                if let Some((offset, chroma)) = *slot {
                    // SAFETY: `offset + width <= len` was checked above and the
                    // engine keeps `[base, base + len)` alive until completion.
                    let src = unsafe { std::slice::from_raw_parts((base + offset) as *const u8, width) };
                    op.apply(src, &mut row[..width], chroma);
                }
            });
    } else {
        surface
            .data
            .par_chunks(pitch)
            .zip(map.par_iter())
            .for_each(|(row, slot)| {
                if let Some((offset, chroma)) = *slot {
                    // SAFETY: as above; distinct storage rows map to distinct,
                    // non-overlapping host rows because `width <= stride`.
                    let dst = unsafe { std::slice::from_raw_parts_mut((base + offset) as *mut u8, width) };
                    op.apply(&row[..width], dst, chroma);
                }
            });
    }
    Ok(())
}

fn surface_transfer(
    kernel: KernelId,
    args: &Args<'_>,
    grid: ExecutionGrid,
    state: &mut SoftState,
) -> Result<(), String> {
    let src_handle = *state
        .bound_surfaces
        .get(&args.index(ArgSlot::SurfaceIn)?)
        .ok_or("input is not an open surface")?;
    let dst_handle = *state
        .bound_surfaces
        .get(&args.index(ArgSlot::SurfaceOut)?)
        .ok_or("output is not an open surface")?;
    let roi_width = args.scalar(ArgSlot::RoiWidth)?;
    let roi_height = args.scalar(ArgSlot::RoiHeight)?;
    let bpp = match kernel {
        KernelId::SurfaceMirror => 1,
        _ => args.scalar(ArgSlot::BytesPerPixel)?,
    };
    let op = RowOp::for_kernel(kernel, args)?;
    let width = roi_width * bpp;

    let needed = ExecutionGrid::compute(kernel, width, roi_height, bpp);
    if !grid.covers(&needed) {
        return Err(format!("grid {grid:?} does not cover {needed:?}"));
    }

    let src = state.surfaces.get(&src_handle).ok_or("input storage vanished")?;
    if width > src.pitch || roi_height > src.height {
        return Err("region exceeds input surface".into());
    }
    let chroma_rows = if is_semi_planar_like(src.format) { roi_height / 2 } else { 0 };

    // stage source rows first: input and output may be the same surface
    let mut staged: Vec<(usize, bool, Vec<u8>)> = Vec::with_capacity(roi_height + chroma_rows);
    for y in 0..roi_height {
        staged.push((y, false, src.data[y * src.pitch..y * src.pitch + width].to_vec()));
    }
    for c in 0..chroma_rows {
        let row = src.height + c;
        staged.push((c, true, src.data[row * src.pitch..row * src.pitch + width].to_vec()));
    }

    let dst = state.surfaces.get_mut(&dst_handle).ok_or("output storage vanished")?;
    if width > dst.pitch || roi_height > dst.height {
        return Err("region exceeds output surface".into());
    }
    if chroma_rows > 0 && !is_semi_planar_like(dst.format) {
        return Err("plane layout mismatch".into());
    }

    let mut map: Vec<Option<usize>> = vec![None; dst.rows()];
    for (i, (y, chroma, _)) in staged.iter().enumerate() {
        let row = if *chroma { dst.height + y } else { *y };
        map[row] = Some(i);
    }
    let pitch = dst.pitch;
    dst.data
        .par_chunks_mut(pitch)
        .zip(map.par_iter())
        .for_each(|(row, slot)| {
            if let Some(i) = *slot {
                let (_, chroma, ref bytes) = staged[i];
                op.apply(bytes, &mut row[..width], chroma);
            }
        });
    Ok(())
}
