//! Software reference device.
//!
//! Implements [`CopyDevice`] entirely in process:
//!
//! - surfaces are host-side byte arrays registered under a [`SurfaceHandle`]
//! - a dedicated worker thread drains an in-order job channel
//! - each dispatch runs its rows in parallel with rayon
//! - events are condition variables signalled by the worker
//!
//! It also carries fault injection switches and object accounting, which is
//! what the engine's tests drive.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU32, AtomicU64, AtomicUsize, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::JoinHandle;
use std::time::Duration;

use gpucopy_core::{Format, PAGE_MASK, Roi, SurfaceHandle, bytes_per_pixel, is_semi_planar_like};
use tracing::{debug, warn};

use super::soft_kernels;
use super::{ArgIndex, ArgValue, CopyDevice, DeviceError, DeviceLimits, DeviceOp, DeviceResult, WaitStatus};
use crate::kernel::{ExecutionGrid, KernelId, schema};

// ============================================================================
// Shared state
// ============================================================================

/// Pixel storage of one registered surface.
pub(super) struct SurfaceStore {
    pub format: Format,
    pub width: usize,
    pub height: usize,
    /// Bytes per row.
    pub pitch: usize,
    pub data: Vec<u8>,
}

impl SurfaceStore {
    /// Storage rows: luma rows plus chroma rows for semi-planar formats.
    pub fn rows(&self) -> usize {
        self.data.len() / self.pitch
    }
}

/// Host memory range wrapped by a buffer.
#[derive(Debug, Clone, Copy)]
pub(super) struct HostRange {
    pub base: usize,
    pub len: usize,
}

pub(super) struct SoftState {
    pub surfaces: HashMap<SurfaceHandle, SurfaceStore>,
    pub bound_surfaces: HashMap<ArgIndex, SurfaceHandle>,
    pub bound_buffers: HashMap<ArgIndex, HostRange>,
}

/// Fault injection switches.
#[derive(Debug)]
pub struct SoftFaults {
    fail_program: AtomicBool,
    fail_buffers: AtomicBool,
    fail_surfaces: AtomicBool,
    fail_kernels: AtomicBool,
    hang: AtomicBool,
    fail_enqueue_after: AtomicUsize,
    paused: Mutex<bool>,
    resume: Condvar,
}

impl Default for SoftFaults {
    fn default() -> Self {
        Self {
            fail_program: AtomicBool::new(false),
            fail_buffers: AtomicBool::new(false),
            fail_surfaces: AtomicBool::new(false),
            fail_kernels: AtomicBool::new(false),
            hang: AtomicBool::new(false),
            fail_enqueue_after: AtomicUsize::new(usize::MAX),
            paused: Mutex::new(false),
            resume: Condvar::new(),
        }
    }
}

impl SoftFaults {
    /// Program loading fails.
    pub fn fail_program_load(&self, on: bool) {
        self.fail_program.store(on, Ordering::SeqCst);
    }

    /// Buffer creation fails.
    pub fn fail_buffer_creation(&self, on: bool) {
        self.fail_buffers.store(on, Ordering::SeqCst);
    }

    /// Surface opening fails.
    pub fn fail_surface_open(&self, on: bool) {
        self.fail_surfaces.store(on, Ordering::SeqCst);
    }

    /// Every dispatch reports an execution failure.
    pub fn fail_kernels(&self, on: bool) {
        self.fail_kernels.store(on, Ordering::SeqCst);
    }

    /// Dispatches are accepted but never complete.
    pub fn hang(&self, on: bool) {
        self.hang.store(on, Ordering::SeqCst);
    }

    /// Enqueue fails once `n` dispatches have been accepted. `None` clears it.
    pub fn fail_enqueue_after(&self, n: Option<usize>) {
        self.fail_enqueue_after.store(n.unwrap_or(usize::MAX), Ordering::SeqCst);
    }

    /// Holds queued dispatches back until the queue is resumed.
    pub fn pause_queue(&self, on: bool) {
        *self.paused.lock().unwrap_or_else(PoisonError::into_inner) = on;
        self.resume.notify_all();
    }

    fn wait_while_paused(&self) {
        let paused = self.paused.lock().unwrap_or_else(PoisonError::into_inner);
        let _resumed = self
            .resume
            .wait_while(paused, |p| *p)
            .unwrap_or_else(PoisonError::into_inner);
    }
}

/// A destroyed object, in the order destroy calls arrived.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Destroyed {
    Program,
    Buffer { base: usize, len: usize },
    Surface(SurfaceHandle),
}

/// Counters snapshot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SoftStats {
    pub programs_loaded: u64,
    pub buffers_created: u64,
    pub surfaces_opened: u64,
    pub kernels_created: u64,
    pub dispatches: u64,
    /// Kernels, tasks, grids and events not yet destroyed.
    pub live_objects: i64,
}

struct Shared {
    state: Mutex<SoftState>,
    faults: SoftFaults,
}

impl Shared {
    fn lock_state(&self) -> MutexGuard<'_, SoftState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

// ============================================================================
// Events and jobs
// ============================================================================

struct EventState {
    /// `None` while pending, then success flag.
    done: Mutex<Option<bool>>,
    cond: Condvar,
}

impl EventState {
    fn signal(&self, ok: bool) {
        let mut done = self.done.lock().unwrap_or_else(PoisonError::into_inner);
        *done = Some(ok);
        self.cond.notify_all();
    }

    fn wait(&self, timeout: Duration) -> WaitStatus {
        let done = self.done.lock().unwrap_or_else(PoisonError::into_inner);
        let (done, _) = self
            .cond
            .wait_timeout_while(done, timeout, |d| d.is_none())
            .unwrap_or_else(PoisonError::into_inner);
        match *done {
            Some(true) => WaitStatus::Ok,
            Some(false) => WaitStatus::Failed,
            None => WaitStatus::TimedOut,
        }
    }
}

struct Job {
    kernel: KernelId,
    args: Vec<Option<ArgValue>>,
    grid: ExecutionGrid,
    event: Arc<EventState>,
}

fn run_queue(shared: Arc<Shared>, jobs: Receiver<Job>) {
    for job in jobs {
        shared.faults.wait_while_paused();
        if shared.faults.hang.load(Ordering::SeqCst) {
            // never signalled: waiters time out
            debug!(kernel = job.kernel.name(), "soft device hang, dropping dispatch");
            continue;
        }
        let ok = if shared.faults.fail_kernels.load(Ordering::SeqCst) {
            false
        } else {
            let mut state = shared.lock_state();
            match soft_kernels::run(job.kernel, &job.args, job.grid, &mut state) {
                Ok(()) => true,
                Err(msg) => {
                    warn!(kernel = job.kernel.name(), "soft dispatch failed: {msg}");
                    false
                }
            }
        };
        job.event.signal(ok);
    }
}

// ============================================================================
// Device objects
// ============================================================================

pub struct SoftProgram {
    _private: (),
}

pub struct SoftBuffer {
    index: ArgIndex,
    range: HostRange,
}

pub struct SoftSurface {
    index: ArgIndex,
    handle: SurfaceHandle,
    extent: Roi,
}

pub struct SoftKernel {
    id: KernelId,
    args: Vec<Option<ArgValue>>,
}

pub struct SoftTask {
    id: KernelId,
    args: Vec<Option<ArgValue>>,
}

pub struct SoftGrid(ExecutionGrid);

pub struct SoftEvent(Arc<EventState>);

// ============================================================================
// Device
// ============================================================================

/// In-process [`CopyDevice`].
pub struct SoftDevice {
    shared: Arc<Shared>,
    queue: Mutex<Option<Sender<Job>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
    limits: DeviceLimits,
    next_index: AtomicU32,
    programs_loaded: AtomicU64,
    buffers_created: AtomicU64,
    surfaces_opened: AtomicU64,
    kernels_created: AtomicU64,
    dispatches: AtomicU64,
    live: AtomicI64,
    destroyed: Mutex<Vec<Destroyed>>,
}

impl SoftDevice {
    /// Device with default limits.
    pub fn new() -> DeviceResult<Self> {
        Self::with_limits(DeviceLimits::default())
    }

    /// Device with custom limits.
    pub fn with_limits(limits: DeviceLimits) -> DeviceResult<Self> {
        let shared = Arc::new(Shared {
            state: Mutex::new(SoftState {
                surfaces: HashMap::new(),
                bound_surfaces: HashMap::new(),
                bound_buffers: HashMap::new(),
            }),
            faults: SoftFaults::default(),
        });
        let (tx, rx) = mpsc::channel();
        let worker_shared = Arc::clone(&shared);
        let worker = std::thread::Builder::new()
            .name("gpucopy-soft-queue".into())
            .spawn(move || run_queue(worker_shared, rx))
            .map_err(|e| DeviceError::new(DeviceOp::LoadProgram, -1, format!("queue thread: {e}")))?;

        Ok(Self {
            shared,
            queue: Mutex::new(Some(tx)),
            worker: Mutex::new(Some(worker)),
            limits,
            next_index: AtomicU32::new(1),
            programs_loaded: AtomicU64::new(0),
            buffers_created: AtomicU64::new(0),
            surfaces_opened: AtomicU64::new(0),
            kernels_created: AtomicU64::new(0),
            dispatches: AtomicU64::new(0),
            live: AtomicI64::new(0),
            destroyed: Mutex::new(Vec::new()),
        })
    }

    /// Fault injection switches.
    pub fn faults(&self) -> &SoftFaults {
        &self.shared.faults
    }

    /// Registers a zero-filled surface, as an external allocator would.
    pub fn allocate_surface(&self, handle: SurfaceHandle, format: Format, width: u32, height: u32) -> DeviceResult<()> {
        let bpp = bytes_per_pixel(format);
        if bpp == 0 || width == 0 || height == 0 {
            return Err(DeviceError::new(
                DeviceOp::OpenSurface,
                -2,
                format!("cannot allocate {width}x{height} {format}"),
            ));
        }
        let (width, height) = (width as usize, height as usize);
        let pitch = width * bpp;
        let rows = if is_semi_planar_like(format) { height + height / 2 } else { height };
        let store = SurfaceStore {
            format,
            width,
            height,
            pitch,
            data: vec![0; pitch * rows],
        };
        self.shared.lock_state().surfaces.insert(handle, store);
        Ok(())
    }

    /// Overwrites a surface with tightly packed rows.
    pub fn load_surface(&self, handle: SurfaceHandle, bytes: &[u8]) -> DeviceResult<()> {
        let mut state = self.shared.lock_state();
        let store = state
            .surfaces
            .get_mut(&handle)
            .ok_or_else(|| DeviceError::new(DeviceOp::OpenSurface, -3, "unknown surface"))?;
        if store.data.len() != bytes.len() {
            return Err(DeviceError::new(
                DeviceOp::OpenSurface,
                -3,
                format!("expected {} bytes, got {}", store.data.len(), bytes.len()),
            ));
        }
        store.data.copy_from_slice(bytes);
        Ok(())
    }

    /// Copy of a surface's tightly packed rows.
    pub fn surface_bytes(&self, handle: SurfaceHandle) -> Option<Vec<u8>> {
        self.shared.lock_state().surfaces.get(&handle).map(|s| s.data.clone())
    }

    /// Bytes per row of a registered surface.
    pub fn surface_pitch(&self, handle: SurfaceHandle) -> Option<usize> {
        self.shared.lock_state().surfaces.get(&handle).map(|s| s.pitch)
    }

    /// Counters snapshot.
    pub fn stats(&self) -> SoftStats {
        SoftStats {
            programs_loaded: self.programs_loaded.load(Ordering::SeqCst),
            buffers_created: self.buffers_created.load(Ordering::SeqCst),
            surfaces_opened: self.surfaces_opened.load(Ordering::SeqCst),
            kernels_created: self.kernels_created.load(Ordering::SeqCst),
            dispatches: self.dispatches.load(Ordering::SeqCst),
            live_objects: self.live.load(Ordering::SeqCst),
        }
    }

    /// Destroy calls received so far, oldest first.
    pub fn destroyed(&self) -> Vec<Destroyed> {
        self.destroyed.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    fn record(&self, what: Destroyed) {
        self.destroyed.lock().unwrap_or_else(PoisonError::into_inner).push(what);
    }

    fn alloc_index(&self) -> ArgIndex {
        ArgIndex(self.next_index.fetch_add(1, Ordering::SeqCst))
    }
}

impl Drop for SoftDevice {
    fn drop(&mut self) {
        // closing the channel ends the worker loop
        self.shared.faults.pause_queue(false);
        self.queue.lock().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(worker) = self.worker.lock().unwrap_or_else(PoisonError::into_inner).take() {
            if worker.join().is_err() {
                warn!("soft queue worker panicked");
            }
        }
    }
}

impl CopyDevice for SoftDevice {
    type Program = SoftProgram;
    type Buffer = SoftBuffer;
    type Surface = SoftSurface;
    type Kernel = SoftKernel;
    type Task = SoftTask;
    type Grid = SoftGrid;
    type Event = SoftEvent;

    fn name(&self) -> &str {
        "soft"
    }

    fn limits(&self) -> DeviceLimits {
        self.limits
    }

    fn load_program(&self) -> DeviceResult<SoftProgram> {
        if self.shared.faults.fail_program.load(Ordering::SeqCst) {
            return Err(DeviceError::new(DeviceOp::LoadProgram, -10, "injected program failure"));
        }
        self.programs_loaded.fetch_add(1, Ordering::SeqCst);
        Ok(SoftProgram { _private: () })
    }

    fn destroy_program(&self, _program: SoftProgram) -> DeviceResult<()> {
        self.record(Destroyed::Program);
        Ok(())
    }

    fn create_buffer(&self, base: usize, len: usize) -> DeviceResult<SoftBuffer> {
        if self.shared.faults.fail_buffers.load(Ordering::SeqCst) {
            return Err(DeviceError::new(DeviceOp::CreateBuffer, -4, "injected buffer failure"));
        }
        if base == 0 || base & PAGE_MASK != 0 {
            return Err(DeviceError::new(
                DeviceOp::CreateBuffer,
                -4,
                format!("base {base:#x} is not page aligned"),
            ));
        }
        if len == 0 || len > self.limits.max_linear_size {
            return Err(DeviceError::new(
                DeviceOp::CreateBuffer,
                -4,
                format!("length {len} outside 1..={}", self.limits.max_linear_size),
            ));
        }
        let index = self.alloc_index();
        let range = HostRange { base, len };
        self.shared.lock_state().bound_buffers.insert(index, range);
        self.buffers_created.fetch_add(1, Ordering::SeqCst);
        Ok(SoftBuffer { index, range })
    }

    fn buffer_index(&self, buffer: &SoftBuffer) -> DeviceResult<ArgIndex> {
        Ok(buffer.index)
    }

    fn destroy_buffer(&self, buffer: SoftBuffer) -> DeviceResult<()> {
        self.shared.lock_state().bound_buffers.remove(&buffer.index);
        self.record(Destroyed::Buffer {
            base: buffer.range.base,
            len: buffer.range.len,
        });
        Ok(())
    }

    fn open_surface(&self, handle: SurfaceHandle, roi: Roi) -> DeviceResult<SoftSurface> {
        if self.shared.faults.fail_surfaces.load(Ordering::SeqCst) {
            return Err(DeviceError::new(DeviceOp::OpenSurface, -5, "injected surface failure"));
        }
        let index = self.alloc_index();
        let mut state = self.shared.lock_state();
        let store = state.surfaces.get(&handle).ok_or_else(|| {
            DeviceError::new(DeviceOp::OpenSurface, -5, format!("no surface behind {handle:?}"))
        })?;
        if roi.width as usize > store.width || roi.height as usize > store.height {
            return Err(DeviceError::new(
                DeviceOp::OpenSurface,
                -5,
                format!(
                    "region {}x{} exceeds surface {}x{}",
                    roi.width, roi.height, store.width, store.height
                ),
            ));
        }
        let extent = Roi::new(store.width as u32, store.height as u32);
        state.bound_surfaces.insert(index, handle);
        self.surfaces_opened.fetch_add(1, Ordering::SeqCst);
        Ok(SoftSurface { index, handle, extent })
    }

    fn surface_index(&self, surface: &SoftSurface) -> DeviceResult<ArgIndex> {
        Ok(surface.index)
    }

    fn surface_extent(&self, surface: &SoftSurface) -> Roi {
        surface.extent
    }

    fn destroy_surface(&self, surface: SoftSurface) -> DeviceResult<()> {
        self.shared.lock_state().bound_surfaces.remove(&surface.index);
        self.record(Destroyed::Surface(surface.handle));
        Ok(())
    }

    fn create_kernel(&self, _program: &SoftProgram, name: &str) -> DeviceResult<SoftKernel> {
        let id = KernelId::from_name(name)
            .ok_or_else(|| DeviceError::new(DeviceOp::CreateKernel, -6, format!("no kernel named {name}")))?;
        self.kernels_created.fetch_add(1, Ordering::SeqCst);
        self.live.fetch_add(1, Ordering::SeqCst);
        Ok(SoftKernel {
            id,
            args: vec![None; schema(id).len()],
        })
    }

    fn set_arg(&self, kernel: &mut SoftKernel, slot: u32, value: ArgValue) -> DeviceResult<()> {
        let arg = kernel.args.get_mut(slot as usize).ok_or_else(|| {
            DeviceError::new(
                DeviceOp::SetArg,
                -7,
                format!("{} has no argument {slot}", kernel.id.name()),
            )
        })?;
        *arg = Some(value);
        Ok(())
    }

    fn destroy_kernel(&self, _kernel: SoftKernel) {
        self.live.fetch_sub(1, Ordering::SeqCst);
    }

    fn create_grid(&self, grid: ExecutionGrid) -> DeviceResult<SoftGrid> {
        if grid.width == 0 || grid.height == 0 {
            return Err(DeviceError::new(DeviceOp::CreateGrid, -8, "empty thread grid"));
        }
        self.live.fetch_add(1, Ordering::SeqCst);
        Ok(SoftGrid(grid))
    }

    fn destroy_grid(&self, _grid: SoftGrid) {
        self.live.fetch_sub(1, Ordering::SeqCst);
    }

    fn create_task(&self, kernel: &SoftKernel) -> DeviceResult<SoftTask> {
        self.live.fetch_add(1, Ordering::SeqCst);
        Ok(SoftTask {
            id: kernel.id,
            args: kernel.args.clone(),
        })
    }

    fn destroy_task(&self, _task: SoftTask) {
        self.live.fetch_sub(1, Ordering::SeqCst);
    }

    fn enqueue(&self, task: &SoftTask, grid: &SoftGrid) -> DeviceResult<SoftEvent> {
        let accepted = self.dispatches.load(Ordering::SeqCst) as usize;
        if accepted >= self.shared.faults.fail_enqueue_after.load(Ordering::SeqCst) {
            return Err(DeviceError::new(DeviceOp::Enqueue, -9, "injected enqueue failure"));
        }
        let event = Arc::new(EventState {
            done: Mutex::new(None),
            cond: Condvar::new(),
        });
        let job = Job {
            kernel: task.id,
            args: task.args.clone(),
            grid: grid.0,
            event: Arc::clone(&event),
        };
        let queue = self.queue.lock().unwrap_or_else(PoisonError::into_inner);
        queue
            .as_ref()
            .ok_or_else(|| DeviceError::new(DeviceOp::Enqueue, -9, "queue closed"))?
            .send(job)
            .map_err(|_| DeviceError::new(DeviceOp::Enqueue, -9, "queue worker gone"))?;
        self.dispatches.fetch_add(1, Ordering::SeqCst);
        self.live.fetch_add(1, Ordering::SeqCst);
        Ok(SoftEvent(event))
    }

    fn wait(&self, event: &SoftEvent, timeout: Duration) -> WaitStatus {
        event.0.wait(timeout)
    }

    fn destroy_event(&self, _event: SoftEvent) {
        self.live.fetch_sub(1, Ordering::SeqCst);
    }
}
