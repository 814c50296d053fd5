//! Frame-level routing.
//!
//! Turns a pair of [`FrameDescriptor`]s into a [`CopyRequest`], or explains
//! why the pair cannot be copied on the device. Routing never touches the
//! device; the engine uses it both to answer `can_accelerate` and to drive
//! `copy_frame`.
//!
//! ```text
//!  dst \ src  | device                 | host
//! ------------+------------------------+---------------------------
//!  device     | surface kernel         | upload (linear / NV12 / shift)
//!  host       | download               | unsupported
//! ```

use gpucopy_core::{
    ALIGN, CopyError, CopyResult, Format, FrameDescriptor, FrameMemory, HostLayout, HostPlanes, MAX_RGB8_DIM,
    MAX_RGB16_DIM, MAX_VERTICAL_PITCH, MAX_VERTICAL_PITCH_SHIFT, Roi, SurfaceHandle, is_aligned, is_rgb8,
    is_rgb16, is_single_plane, needs_bit_shift, needs_channel_swap, shift_for_bit_depth,
};

use crate::kernel::{Direction, Transform};

// ============================================================================
// Requests
// ============================================================================

/// Source and destination of a copy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endpoints {
    /// Host memory at `host` into `surface`.
    HostToDevice { surface: SurfaceHandle, host: usize },
    /// `surface` into host memory at `host`.
    DeviceToHost { host: usize, surface: SurfaceHandle },
    /// Surface to surface.
    DeviceToDevice { dst: SurfaceHandle, src: SurfaceHandle },
}

/// A fully resolved copy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CopyRequest {
    pub endpoints: Endpoints,
    pub format: Format,
    pub roi: Roi,
    /// Host layout; ignored for surface-to-surface copies.
    pub layout: HostLayout,
    pub transform: Transform,
    /// Sample shift of [`Transform::Shift`].
    pub shift: u32,
}

impl CopyRequest {
    /// Upload of `roi` from `host` into `surface`.
    pub fn host_to_device(surface: SurfaceHandle, host: *const u8, layout: HostLayout, roi: Roi, format: Format) -> Self {
        Self::new(
            Endpoints::HostToDevice {
                surface,
                host: host as usize,
            },
            format,
            roi,
            layout,
        )
    }

    /// Download of `roi` from `surface` into `host`.
    pub fn device_to_host(host: *mut u8, layout: HostLayout, surface: SurfaceHandle, roi: Roi, format: Format) -> Self {
        Self::new(
            Endpoints::DeviceToHost {
                host: host as usize,
                surface,
            },
            format,
            roi,
            layout,
        )
    }

    /// Copy of `roi` between two surfaces.
    pub fn device_to_device(dst: SurfaceHandle, src: SurfaceHandle, roi: Roi, format: Format) -> Self {
        Self::new(Endpoints::DeviceToDevice { dst, src }, format, roi, HostLayout::default())
    }

    fn new(endpoints: Endpoints, format: Format, roi: Roi, layout: HostLayout) -> Self {
        Self {
            endpoints,
            format,
            roi,
            layout,
            transform: Transform::None,
            shift: 0,
        }
    }

    /// Sets the per-pixel transform.
    pub fn with_transform(mut self, transform: Transform) -> Self {
        self.transform = transform;
        self
    }

    /// Selects [`Transform::Shift`] by `amount` bits.
    pub fn with_shift(mut self, amount: u32) -> Self {
        self.transform = Transform::Shift;
        self.shift = amount;
        self
    }

    pub fn direction(&self) -> Direction {
        match self.endpoints {
            Endpoints::HostToDevice { .. } => Direction::HostToDevice,
            Endpoints::DeviceToHost { .. } => Direction::DeviceToHost,
            Endpoints::DeviceToDevice { .. } => Direction::DeviceToDevice,
        }
    }
}

// ============================================================================
// Routing
// ============================================================================

/// Builds the request copying `src` into `dst` over their common region.
///
/// # Errors
///
/// - [`CopyError::InvalidArgument`] for an empty region or null handles
/// - [`CopyError::InvalidAlignment`] for misaligned host planes
/// - [`CopyError::UnsupportedFormat`] for any combination without a device path
pub fn route(dst: &FrameDescriptor, src: &FrameDescriptor) -> CopyResult<CopyRequest> {
    let roi = dst.roi().min(src.roi());
    if roi.is_empty() {
        return Err(CopyError::InvalidArgument(format!(
            "empty copy region {}x{}",
            roi.width, roi.height
        )));
    }
    if dst.format != src.format && !needs_channel_swap(dst.format, src.format) {
        return Err(CopyError::UnsupportedFormat(format!(
            "cannot convert {} to {}",
            src.format, dst.format
        )));
    }

    match (dst.memory, src.memory) {
        (FrameMemory::Device(d), FrameMemory::Device(s)) => route_surfaces(dst, src, d, s, roi),
        (FrameMemory::Device(surface), FrameMemory::Host(_)) => {
            let planes = host_planes(src)?;
            let (layout, transform, shift) = host_path(dst, src, planes, roi)?;
            let request = CopyRequest::host_to_device(surface, planes.y as *const u8, layout, roi, dst.format);
            Ok(finish(request, transform, shift))
        }
        (FrameMemory::Host(_), FrameMemory::Device(surface)) => {
            let planes = host_planes(dst)?;
            let (layout, transform, shift) = host_path(src, dst, planes, roi)?;
            let request = CopyRequest::device_to_host(planes.y as *mut u8, layout, surface, roi, src.format);
            Ok(finish(request, transform, shift))
        }
        (FrameMemory::Host(_), FrameMemory::Host(_)) => Err(CopyError::UnsupportedFormat(
            "host to host copies are not accelerated".into(),
        )),
    }
}

fn finish(request: CopyRequest, transform: Transform, shift: u32) -> CopyRequest {
    match transform {
        Transform::Shift => request.with_shift(shift),
        other => request.with_transform(other),
    }
}

fn host_planes(frame: &FrameDescriptor) -> CopyResult<HostPlanes> {
    frame
        .host_planes()
        .ok_or_else(|| CopyError::InvalidArgument("null host frame".into()))
}

fn unsupported(format: Format, why: &str) -> CopyError {
    CopyError::UnsupportedFormat(format!("{format}: {why}"))
}

fn check_aligned(what: &'static str, value: usize) -> CopyResult<()> {
    if is_aligned(value) {
        Ok(())
    } else {
        Err(CopyError::InvalidAlignment {
            what,
            value,
            align: ALIGN,
        })
    }
}

fn route_surfaces(
    dst: &FrameDescriptor,
    src: &FrameDescriptor,
    dst_surface: SurfaceHandle,
    src_surface: SurfaceHandle,
    roi: Roi,
) -> CopyResult<CopyRequest> {
    if dst_surface.is_null() || src_surface.is_null() {
        return Err(CopyError::InvalidArgument("null surface handle".into()));
    }
    if dst.format == Format::Yv12 {
        return Err(unsupported(dst.format, "planar destination surfaces are not supported"));
    }
    if !roi.fits_surface() {
        return Err(unsupported(dst.format, "region exceeds the surface limit"));
    }
    if needs_bit_shift(dst.shift, src.shift, src.format) {
        return Err(unsupported(src.format, "no surface-to-surface shift kernel"));
    }
    let transform = if needs_channel_swap(dst.format, src.format) {
        Transform::Swap
    } else {
        Transform::None
    };
    Ok(CopyRequest::device_to_device(dst_surface, src_surface, roi, src.format).with_transform(transform))
}

/// Layout and transform of a host transfer between `device` and `host`.
fn host_path(
    device: &FrameDescriptor,
    host: &FrameDescriptor,
    planes: HostPlanes,
    roi: Roi,
) -> CopyResult<(HostLayout, Transform, u32)> {
    if device.surface().is_none_or(|s| s.is_null()) {
        return Err(CopyError::InvalidArgument("null surface handle".into()));
    }
    check_aligned("host pitch", planes.pitch)?;
    let format = device.format;

    match format {
        Format::Nv12 | Format::P010 => {
            check_aligned("luma plane", planes.y)?;
            check_aligned("chroma plane", planes.uv)?;
            if !roi.fits_surface() {
                return Err(unsupported(format, "region exceeds the surface limit"));
            }
            let vp = planes.vertical_pitch();
            // the chroma plane must clear the whole host frame, not only the region
            if vp < host.height as usize {
                return Err(unsupported(format, "chroma plane is not a whole row offset below luma"));
            }
            if needs_bit_shift(device.shift, host.shift, format) {
                if vp > MAX_VERTICAL_PITCH_SHIFT {
                    return Err(unsupported(format, "chroma offset too large for the shift kernel"));
                }
                // devices store MSB-justified samples, hosts LSB
                if device.shift == 0 || host.shift != 0 {
                    return Err(unsupported(format, "only MSB device with LSB host is shifted"));
                }
                let amount = shift_for_bit_depth(host.bit_depth_luma)
                    .filter(|&s| s > 0)
                    .ok_or_else(|| unsupported(format, "luma bit depth has no shift"))?;
                Ok((HostLayout::new(planes.pitch, vp), Transform::Shift, amount))
            } else {
                if vp > MAX_VERTICAL_PITCH {
                    return Err(unsupported(format, "chroma offset too large"));
                }
                Ok((HostLayout::new(planes.pitch, vp), Transform::None, 0))
            }
        }
        f if is_rgb8(f) || is_rgb16(f) => {
            let limit = if is_rgb8(f) { MAX_RGB8_DIM } else { MAX_RGB16_DIM };
            if !roi.fits_square(limit) {
                return Err(unsupported(f, "region exceeds the RGB size limit"));
            }
            check_aligned("host pointer", planes.y)?;
            let transform = if needs_channel_swap(device.format, host.format) {
                Transform::Swap
            } else {
                Transform::None
            };
            Ok((HostLayout::new(planes.pitch, roi.height as usize), transform, 0))
        }
        f if is_single_plane(f) => {
            check_aligned("host pointer", planes.y)?;
            if !roi.fits_surface() {
                return Err(unsupported(f, "region exceeds the surface limit"));
            }
            Ok((HostLayout::with_stride(planes.pitch), Transform::None, 0))
        }
        f => Err(unsupported(f, "no host transfer kernel")),
    }
}

/// Strict layout check for NV12 frames: width a multiple of 16, height a
/// multiple of 8, and on the host the chroma plane directly after luma.
pub fn is_copy_supported(frame: &FrameDescriptor, roi: Roi) -> bool {
    if frame.format != Format::Nv12 || roi.is_empty() || roi.width % 16 != 0 || roi.height % 8 != 0 {
        return false;
    }
    match frame.memory {
        FrameMemory::Device(surface) => !surface.is_null(),
        FrameMemory::Host(planes) => {
            planes.y != 0 && planes.uv >= planes.y && planes.uv - planes.y == planes.pitch * frame.height as usize
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SURF: SurfaceHandle = SurfaceHandle::new(7, 0);
    const SURF2: SurfaceHandle = SurfaceHandle::new(8, 0);
    const HOST: usize = 0x10_0000;

    fn dev(format: Format, w: u32, h: u32) -> FrameDescriptor {
        FrameDescriptor::device(format, w, h, SURF)
    }

    fn nv12_host(w: u32, h: u32, pitch: usize, vp: usize) -> FrameDescriptor {
        FrameDescriptor::host(Format::Nv12, w, h, HostPlanes::semi_planar(HOST, HOST + pitch * vp, pitch))
    }

    #[test]
    fn test_upload_nv12() {
        let req = route(&dev(Format::Nv12, 1920, 1080), &nv12_host(1920, 1080, 2048, 1088)).unwrap();
        assert_eq!(req.direction(), Direction::HostToDevice);
        assert_eq!(req.layout, HostLayout::new(2048, 1088));
        assert_eq!(req.transform, Transform::None);
        assert_eq!(req.roi, Roi::new(1920, 1080));
    }

    #[test]
    fn test_region_is_common_part() {
        let req = route(&nv12_host(1280, 720, 1280, 720), &dev(Format::Nv12, 1920, 1080)).unwrap();
        assert_eq!(req.direction(), Direction::DeviceToHost);
        assert_eq!(req.roi, Roi::new(1280, 720));
    }

    #[test]
    fn test_nv12_rejections() {
        let d = dev(Format::Nv12, 1920, 1080);
        // chroma above the last luma row
        assert!(matches!(
            route(&d, &nv12_host(1920, 1080, 1920, 1000)),
            Err(CopyError::UnsupportedFormat(_))
        ));
        // misaligned pitch
        assert!(matches!(
            route(&d, &nv12_host(1920, 1080, 1928, 1080)),
            Err(CopyError::InvalidAlignment { what: "host pitch", .. })
        ));
        // chroma offset past the limit
        assert!(route(&d, &nv12_host(1920, 1080, 1920, MAX_VERTICAL_PITCH + 1)).is_err());
    }

    #[test]
    fn test_chroma_offset_checked_against_host_height() {
        // region is 720 rows, but the host frame allocates 1080 luma rows
        let d = dev(Format::Nv12, 1280, 720);
        assert!(matches!(
            route(&d, &nv12_host(1280, 1080, 1280, 720)),
            Err(CopyError::UnsupportedFormat(_))
        ));
        let req = route(&d, &nv12_host(1280, 1080, 1280, 1080)).unwrap();
        assert_eq!(req.roi, Roi::new(1280, 720));
        assert_eq!(req.layout, HostLayout::new(1280, 1080));
    }

    #[test]
    fn test_p010_shift() {
        let host = FrameDescriptor::host(
            Format::P010,
            64,
            32,
            HostPlanes::semi_planar(HOST, HOST + 128 * 32, 128),
        )
        .with_bit_depth(10);
        let device = dev(Format::P010, 64, 32).with_shift(1);

        let up = route(&device, &host).unwrap();
        assert_eq!(up.transform, Transform::Shift);
        assert_eq!(up.shift, 6);
        let down = route(&host, &device).unwrap();
        assert_eq!(down.direction(), Direction::DeviceToHost);
        assert_eq!(down.shift, 6);

        // MSB host, LSB device has no kernel
        assert!(route(&dev(Format::P010, 64, 32), &host.with_shift(1)).is_err());
        // same justification is a plain copy
        let plain = route(&device, &host.with_shift(1)).unwrap();
        assert_eq!(plain.transform, Transform::None);
    }

    #[test]
    fn test_rgb_swap_and_limits() {
        let host = FrameDescriptor::host(Format::Bgr4, 256, 64, HostPlanes::packed(HOST, 1024));
        let req = route(&dev(Format::Rgb4, 256, 64), &host).unwrap();
        assert_eq!(req.transform, Transform::Swap);
        assert_eq!(req.format, Format::Rgb4);
        assert_eq!(req.layout, HostLayout::new(1024, 64));

        let big = FrameDescriptor::host(Format::Rgb4, 4096, 64, HostPlanes::packed(HOST, 16384));
        assert!(route(&dev(Format::Rgb4, 4096, 64), &big).is_err());
        let big16 = FrameDescriptor::host(Format::Argb16, 4096, 64, HostPlanes::packed(HOST, 32768));
        assert!(route(&dev(Format::Argb16, 4096, 64), &big16).is_ok());
    }

    #[test]
    fn test_unsupported_pairs() {
        let host = FrameDescriptor::host(Format::Yv12, 64, 64, HostPlanes::packed(HOST, 64));
        assert!(matches!(
            route(&dev(Format::Yv12, 64, 64), &host),
            Err(CopyError::UnsupportedFormat(_))
        ));
        let a = FrameDescriptor::host(Format::Rgb4, 64, 64, HostPlanes::packed(HOST, 256));
        assert!(route(&a, &a).is_err());
        assert!(route(&dev(Format::Nv12, 64, 64), &a).is_err());
        let null = FrameDescriptor::host(Format::Rgb4, 64, 64, HostPlanes::packed(0, 256));
        assert!(matches!(
            route(&dev(Format::Rgb4, 64, 64), &null),
            Err(CopyError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_surface_routes() {
        let src = FrameDescriptor::device(Format::Abgr16, 640, 480, SURF2);
        let req = route(&dev(Format::Argb16, 640, 480), &src).unwrap();
        assert_eq!(req.endpoints, Endpoints::DeviceToDevice { dst: SURF, src: SURF2 });
        assert_eq!(req.transform, Transform::Swap);
        assert_eq!(req.format, Format::Abgr16);

        let yv12 = FrameDescriptor::device(Format::Yv12, 64, 64, SURF2);
        assert!(route(&dev(Format::Yv12, 64, 64), &yv12).is_err());
    }

    #[test]
    fn test_is_copy_supported() {
        let roi = Roi::new(1920, 1080);
        assert!(is_copy_supported(&nv12_host(1920, 1080, 1920, 1080), roi));
        assert!(!is_copy_supported(&nv12_host(1920, 1080, 1920, 1088), roi));
        assert!(!is_copy_supported(&nv12_host(1920, 1080, 1920, 1080), Roi::new(1918, 1080)));
        assert!(!is_copy_supported(&nv12_host(1920, 1080, 1920, 1080), Roi::new(1920, 1082)));
        assert!(is_copy_supported(&dev(Format::Nv12, 1920, 1080), roi));
        assert!(!is_copy_supported(&dev(Format::P010, 1920, 1080), roi));
    }
}
