//! The copy engine facade.
//!
//! [`CopyEngine`] owns a device, its loaded kernel program and the resource
//! cache. Each request runs the same pipeline:
//!
//! ```text
//! validate -> select_kernel -> plan_slices -> open surface (cached)
//!     -> per slice: buffer (cached) -> bind -> submit
//!     -> wait on the last token
//! ```
//!
//! The device queue is in-order, so only the final dispatch of a request is
//! waited on. Any failure aborts the remaining slices.

use gpucopy_core::{
    CopyError, CopyResult, Format, FrameDescriptor, HostLayout, Roi, SurfaceHandle, bytes_per_pixel,
};
use tracing::{debug, info, trace, warn};

use crate::cache::{BufferKey, CacheStats, ResourceCache};
use crate::config::EngineConfig;
use crate::device::{ArgIndex, CopyDevice};
use crate::executor::{CompletionToken, device_error, submit};
use crate::kernel::{Direction, ExecutionGrid, KernelId, LaunchParams, Transform, bind_arguments, select_kernel};
use crate::planner::{Slice, plan_slices};
use crate::routing::{CopyRequest, Endpoints, is_copy_supported, route};

/// Device-assisted frame copier.
///
/// `Send + Sync` whenever the device is, so one engine can serve many
/// threads. Dropping the engine releases every device object it created.
pub struct CopyEngine<D: CopyDevice> {
    device: D,
    config: EngineConfig,
    program: Option<D::Program>,
    cache: ResourceCache<D::Buffer, D::Surface>,
}

impl<D: CopyDevice> CopyEngine<D> {
    /// Loads the kernel program on `device`.
    pub fn initialize(device: D, config: EngineConfig) -> CopyResult<Self> {
        let program = device.load_program().map_err(device_error)?;
        info!(
            device = device.name(),
            timeout_ms = config.timeout.as_millis() as u64,
            max_linear_size = config.effective_linear_size(device.limits().max_linear_size),
            "copy engine initialized"
        );
        Ok(Self {
            device,
            config,
            program: Some(program),
            cache: ResourceCache::new(),
        })
    }

    /// Destroys cached buffers and surfaces, then the program.
    ///
    /// Idempotent. Copies issued after release fail.
    pub fn release(&mut self) {
        let device = &self.device;
        self.cache.teardown_all(
            |buffer| {
                if let Err(e) = device.destroy_buffer(buffer) {
                    warn!("buffer teardown failed: {e}");
                }
            },
            |surface| {
                if let Err(e) = device.destroy_surface(surface) {
                    warn!("surface teardown failed: {e}");
                }
            },
        );
        if let Some(program) = self.program.take() {
            if let Err(e) = device.destroy_program(program) {
                warn!("program teardown failed: {e}");
            }
            info!(device = device.name(), "copy engine released");
        }
    }

    pub fn device(&self) -> &D {
        &self.device
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    fn program(&self) -> CopyResult<&D::Program> {
        self.program
            .as_ref()
            .ok_or_else(|| CopyError::DeviceOperationFailed("engine has been released".into()))
    }

    // ========================================================================
    // Public copies
    // ========================================================================

    /// Copies `roi` of host memory at `src` into surface `dst`.
    ///
    /// # Safety
    ///
    /// `src` must be readable for `layout.total_bytes(format, roi)` bytes
    /// (after resolving zero layout fields) until this call returns. If it
    /// fails with [`CopyError::OperationTimedOut`] the device may still read
    /// the memory, which must then stay alive until the engine is released.
    pub unsafe fn copy_host_to_device(
        &self,
        dst: SurfaceHandle,
        src: *const u8,
        layout: HostLayout,
        roi: Roi,
        format: Format,
    ) -> CopyResult<()> {
        // SAFETY: forwarded caller contract.
        unsafe { self.execute(&CopyRequest::host_to_device(dst, src, layout, roi, format)) }
    }

    /// Copies `roi` of surface `src` into host memory at `dst`.
    ///
    /// # Safety
    ///
    /// `dst` must be writable for `layout.total_bytes(format, roi)` bytes and
    /// not otherwise accessed until this call returns. The timeout caveat of
    /// [`copy_host_to_device`](Self::copy_host_to_device) applies.
    pub unsafe fn copy_device_to_host(
        &self,
        dst: *mut u8,
        layout: HostLayout,
        src: SurfaceHandle,
        roi: Roi,
        format: Format,
    ) -> CopyResult<()> {
        // SAFETY: forwarded caller contract.
        unsafe { self.execute(&CopyRequest::device_to_host(dst, layout, src, roi, format)) }
    }

    /// Copies `roi` of surface `src` into surface `dst`.
    pub fn copy_device_to_device(
        &self,
        dst: SurfaceHandle,
        src: SurfaceHandle,
        roi: Roi,
        format: Format,
    ) -> CopyResult<()> {
        self.surface_transfer(dst, src, roi, format, Transform::None)
    }

    /// Runs an explicit request, including swap, mirror and shift transforms.
    ///
    /// # Safety
    ///
    /// For host endpoints, the contract of
    /// [`copy_host_to_device`](Self::copy_host_to_device) or
    /// [`copy_device_to_host`](Self::copy_device_to_host) applies.
    pub unsafe fn execute(&self, request: &CopyRequest) -> CopyResult<()> {
        if request.transform == Transform::Shift && !(1..16).contains(&request.shift) {
            return Err(CopyError::InvalidArgument(format!(
                "shift of {} bits is outside 1..16",
                request.shift
            )));
        }
        match request.endpoints {
            Endpoints::HostToDevice { surface, host } | Endpoints::DeviceToHost { host, surface } => {
                // SAFETY: forwarded caller contract.
                unsafe { self.host_transfer(request, surface, host) }
            }
            Endpoints::DeviceToDevice { dst, src } => {
                self.surface_transfer(dst, src, request.roi, request.format, request.transform)
            }
        }
    }

    /// Routes and runs a frame-to-frame copy.
    ///
    /// # Safety
    ///
    /// Host frames must describe memory valid for the routed layout, under
    /// the same contract as the explicit copies.
    pub unsafe fn copy_frame(&self, dst: &FrameDescriptor, src: &FrameDescriptor) -> CopyResult<()> {
        let request = route(dst, src)?;
        // SAFETY: forwarded caller contract.
        unsafe { self.execute(&request) }
    }

    /// Whether copying `src` into `dst` can run on the device.
    ///
    /// Never touches the device or the cache.
    pub fn can_accelerate(&self, dst: &FrameDescriptor, src: &FrameDescriptor) -> bool {
        if !self.config.enabled || self.program.is_none() {
            return false;
        }
        match route(dst, src).and_then(|r| select_kernel(r.direction(), r.format, r.transform)) {
            Ok(_) => true,
            Err(e) => {
                debug!(dst = %dst.format, src = %src.format, "not accelerated: {e}");
                false
            }
        }
    }

    /// Strict NV12 layout check of `frame` over `roi`.
    pub fn is_copy_supported(&self, frame: &FrameDescriptor, roi: Roi) -> bool {
        is_copy_supported(frame, roi)
    }

    // ========================================================================
    // Pipeline
    // ========================================================================

    /// # Safety
    ///
    /// See [`execute`](Self::execute).
    unsafe fn host_transfer(&self, request: &CopyRequest, surface: SurfaceHandle, host: usize) -> CopyResult<()> {
        let program = self.program()?;
        let (roi, format) = (request.roi, request.format);
        if roi.is_empty() {
            return Err(CopyError::InvalidArgument(format!(
                "empty copy region {}x{}",
                roi.width, roi.height
            )));
        }
        if surface.is_null() {
            return Err(CopyError::InvalidArgument("null surface handle".into()));
        }
        if host == 0 {
            return Err(CopyError::InvalidArgument("null host pointer".into()));
        }

        let kernel = select_kernel(request.direction(), format, request.transform)?;
        let limit = self.config.effective_linear_size(self.device.limits().max_linear_size);
        let plan = plan_slices(host, format, roi, request.layout, limit)?;
        debug!(
            kernel = kernel.name(),
            %format,
            width = roi.width,
            height = roi.height,
            slices = plan.slices.len(),
            bytes = plan.total_bytes(),
            "host transfer planned"
        );

        let surface_idx = self.open_surface(surface, roi)?;
        let mut last: Option<CompletionToken<'_, D>> = None;
        for slice in &plan.slices {
            let rows = if kernel.is_semi_planar() {
                slice.rows
            } else {
                plan.copy_rows(slice)
            };
            if rows == 0 {
                continue;
            }
            let step = self.open_buffer(slice).and_then(|buffer_idx| {
                let grid = ExecutionGrid::compute(kernel, plan.copy_width_bytes, rows, plan.bytes_per_pixel);
                let params = LaunchParams {
                    surface: Some(surface_idx),
                    buffer: Some(buffer_idx),
                    stride: plan.layout.stride,
                    height_stride: plan.layout.height_stride,
                    slice_rows: rows,
                    left_shift: slice.left_shift,
                    grid_height: grid.height,
                    width_bytes: plan.copy_width_bytes,
                    roi_width: roi.width,
                    roi_height: roi.height,
                    bytes_per_pixel: plan.bytes_per_pixel,
                    bit_shift: request.shift,
                    start_x: 0,
                    start_y: slice.start_y,
                    ..Default::default()
                };
                self.dispatch(program, kernel, &params, grid)
            });
            match step {
                // earlier tokens are released unwaited: the queue is in-order
                Ok(token) => last = Some(token),
                Err(e) => return Err(self.drain(last, e)),
            }
        }

        match last {
            Some(token) => token.wait_result(self.config.timeout),
            None => Ok(()),
        }
    }

    /// Waits for slices already queued before a failed step, so no dispatch
    /// touches host memory once `err` is returned.
    ///
    /// A timeout while draining replaces `err`.
    fn drain(&self, queued: Option<CompletionToken<'_, D>>, err: CopyError) -> CopyError {
        let Some(token) = queued else { return err };
        debug!("draining queued slices after: {err}");
        match token.wait_result(self.config.timeout) {
            Err(hang @ CopyError::OperationTimedOut { .. }) => hang,
            _ => err,
        }
    }

    fn surface_transfer(
        &self,
        dst: SurfaceHandle,
        src: SurfaceHandle,
        roi: Roi,
        format: Format,
        transform: Transform,
    ) -> CopyResult<()> {
        let program = self.program()?;
        if roi.is_empty() {
            return Err(CopyError::InvalidArgument(format!(
                "empty copy region {}x{}",
                roi.width, roi.height
            )));
        }
        if dst.is_null() || src.is_null() {
            return Err(CopyError::InvalidArgument("null surface handle".into()));
        }
        let kernel = select_kernel(Direction::DeviceToDevice, format, transform)?;
        let bpp = bytes_per_pixel(format);

        let src_idx = self.open_surface(src, roi)?;
        let dst_idx = self.open_surface(dst, roi)?;
        let grid = ExecutionGrid::compute(kernel, roi.width as usize * bpp, roi.height as usize, bpp);
        debug!(kernel = kernel.name(), %format, width = roi.width, height = roi.height, "surface copy");

        let params = LaunchParams {
            surface_in: Some(src_idx),
            surface_out: Some(dst_idx),
            roi_width: roi.width,
            roi_height: roi.height,
            grid_height: grid.height,
            bytes_per_pixel: bpp,
            ..Default::default()
        };
        self.dispatch(program, kernel, &params, grid)?
            .wait_result(self.config.timeout)
    }

    /// Binds `params` to a fresh instance of `kernel` and submits it.
    fn dispatch(
        &self,
        program: &D::Program,
        kernel: KernelId,
        params: &LaunchParams,
        grid: ExecutionGrid,
    ) -> CopyResult<CompletionToken<'_, D>> {
        let args = bind_arguments(kernel, params)?;
        let mut instance = self
            .device
            .create_kernel(program, kernel.name())
            .map_err(device_error)?;
        for (slot, value) in args {
            if let Err(e) = self.device.set_arg(&mut instance, slot, value) {
                self.device.destroy_kernel(instance);
                return Err(device_error(e));
            }
        }
        trace!(
            kernel = kernel.name(),
            start_y = params.start_y,
            rows = params.slice_rows,
            threads = grid.threads(),
            "submitting"
        );
        submit(&self.device, instance, grid)
    }

    /// Opens (or reuses) the surface behind `handle` for a copy of `roi`.
    ///
    /// The region is checked against the surface extent on every call, not
    /// only when the surface is first opened.
    fn open_surface(&self, handle: SurfaceHandle, roi: Roi) -> CopyResult<ArgIndex> {
        let fits = |surface: &D::Surface| {
            let extent = self.device.surface_extent(surface);
            if extent.contains(roi) {
                Ok(())
            } else {
                Err(CopyError::ResourceCreationFailed(format!(
                    "region {}x{} exceeds surface {}x{}",
                    roi.width, roi.height, extent.width, extent.height
                )))
            }
        };
        self.cache.get_or_create_surface(handle, fits, || {
            let surface = self.device.open_surface(handle, roi).map_err(device_error)?;
            match self.device.surface_index(&surface) {
                Ok(index) => Ok((surface, index)),
                Err(e) => {
                    if let Err(d) = self.device.destroy_surface(surface) {
                        warn!("surface cleanup failed: {d}");
                    }
                    Err(device_error(e))
                }
            }
        })
    }

    fn open_buffer(&self, slice: &Slice) -> CopyResult<ArgIndex> {
        let key = BufferKey::new(slice.aligned_base, slice.size);
        self.cache.get_or_create_buffer(key, || {
            let buffer = self
                .device
                .create_buffer(slice.aligned_base, slice.size)
                .map_err(device_error)?;
            match self.device.buffer_index(&buffer) {
                Ok(index) => Ok((buffer, index)),
                Err(e) => {
                    if let Err(d) = self.device.destroy_buffer(buffer) {
                        warn!("buffer cleanup failed: {d}");
                    }
                    Err(device_error(e))
                }
            }
        })
    }
}

impl<D: CopyDevice> Drop for CopyEngine<D> {
    fn drop(&mut self) {
        self.release();
    }
}
