//! Device abstraction for copy kernels.
//!
//! # Architecture
//!
//! ```text
//! CopyEngine<D: CopyDevice>
//!     +-- SoftDevice   (in-process reference queue, rayon rows)
//!     +-- <vendor>     (any runtime exposing buffers, 2D surfaces,
//!                       kernels, tasks, thread grids and events)
//! ```
//!
//! The trait mirrors the object model of compute-kernel runtimes: every
//! device object is created and destroyed explicitly, and kernels receive
//! resources through lightweight [`ArgIndex`] tokens rather than the objects
//! themselves.

pub mod soft;
mod soft_kernels;

use std::fmt;
use std::time::Duration;

use gpucopy_core::{Roi, SurfaceHandle};
use thiserror::Error;

use crate::kernel::ExecutionGrid;

pub use soft::{Destroyed, SoftDevice, SoftFaults, SoftStats};

/// Largest byte range a single device buffer may cover (128 MiB).
pub const MAX_LINEAR_SIZE: usize = 1 << 27;

/// Result alias for raw device calls.
pub type DeviceResult<T> = Result<T, DeviceError>;

/// Device call that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeviceOp {
    LoadProgram,
    CreateBuffer,
    OpenSurface,
    QueryIndex,
    CreateKernel,
    SetArg,
    CreateTask,
    CreateGrid,
    Enqueue,
    Destroy,
}

impl DeviceOp {
    /// Creation calls map to `ResourceCreationFailed` at the engine boundary.
    pub const fn is_creation(self) -> bool {
        matches!(
            self,
            DeviceOp::LoadProgram
                | DeviceOp::CreateBuffer
                | DeviceOp::OpenSurface
                | DeviceOp::QueryIndex
                | DeviceOp::CreateKernel
                | DeviceOp::CreateTask
                | DeviceOp::CreateGrid
        )
    }
}

impl fmt::Display for DeviceOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DeviceOp::LoadProgram => "load program",
            DeviceOp::CreateBuffer => "create buffer",
            DeviceOp::OpenSurface => "open surface",
            DeviceOp::QueryIndex => "query index",
            DeviceOp::CreateKernel => "create kernel",
            DeviceOp::SetArg => "set argument",
            DeviceOp::CreateTask => "create task",
            DeviceOp::CreateGrid => "create thread grid",
            DeviceOp::Enqueue => "enqueue",
            DeviceOp::Destroy => "destroy",
        };
        f.write_str(s)
    }
}

/// Raw failure reported by a device runtime.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{op} failed (status {status}): {detail}")]
pub struct DeviceError {
    /// Failed call.
    pub op: DeviceOp,
    /// Runtime status code, negative by convention.
    pub status: i32,
    /// Human readable context.
    pub detail: String,
}

impl DeviceError {
    pub fn new(op: DeviceOp, status: i32, detail: impl Into<String>) -> Self {
        Self {
            op,
            status,
            detail: detail.into(),
        }
    }
}

/// Non-owning token referencing a buffer or surface for kernel binding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ArgIndex(pub u32);

/// A single kernel argument value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArgValue {
    /// Resource binding.
    Index(ArgIndex),
    /// Scalar parameter.
    U32(u32),
}

impl ArgValue {
    pub fn as_index(self) -> Option<ArgIndex> {
        match self {
            ArgValue::Index(i) => Some(i),
            ArgValue::U32(_) => None,
        }
    }

    pub fn as_u32(self) -> Option<u32> {
        match self {
            ArgValue::U32(v) => Some(v),
            ArgValue::Index(_) => None,
        }
    }
}

/// Outcome of waiting on a completion event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitStatus {
    /// The work finished successfully.
    Ok,
    /// The timeout elapsed first. The work may still be running.
    TimedOut,
    /// The device reported an execution failure.
    Failed,
}

/// Device capability limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceLimits {
    /// Largest byte range one buffer may cover.
    pub max_linear_size: usize,
}

impl Default for DeviceLimits {
    fn default() -> Self {
        Self {
            max_linear_size: MAX_LINEAR_SIZE,
        }
    }
}

/// Compute-kernel runtime operations used by the copy engine.
///
/// Implementations must execute enqueued tasks in submission order on a
/// single queue. All destroy calls take ownership, so a destroyed object can
/// not be reused.
pub trait CopyDevice: Send + Sync {
    /// Loaded kernel program.
    type Program: Send + Sync;
    /// 1D view over host memory.
    type Buffer: Send;
    /// 2D device surface.
    type Surface: Send;
    /// Kernel instance with bound arguments.
    type Kernel;
    /// Enqueueable task wrapping one kernel.
    type Task;
    /// Thread grid descriptor.
    type Grid;
    /// Completion event of one enqueued task.
    type Event;

    /// Runtime name for logging.
    fn name(&self) -> &str;

    /// Capability limits.
    fn limits(&self) -> DeviceLimits;

    fn load_program(&self) -> DeviceResult<Self::Program>;
    fn destroy_program(&self, program: Self::Program) -> DeviceResult<()>;

    /// Wraps `[base, base + len)` of host memory. `base` is page aligned.
    fn create_buffer(&self, base: usize, len: usize) -> DeviceResult<Self::Buffer>;
    fn buffer_index(&self, buffer: &Self::Buffer) -> DeviceResult<ArgIndex>;
    fn destroy_buffer(&self, buffer: Self::Buffer) -> DeviceResult<()>;

    /// Wraps an externally allocated surface identified by `handle`.
    fn open_surface(&self, handle: SurfaceHandle, roi: Roi) -> DeviceResult<Self::Surface>;
    fn surface_index(&self, surface: &Self::Surface) -> DeviceResult<ArgIndex>;
    /// Full extent of an opened surface, in pixels and luma rows.
    fn surface_extent(&self, surface: &Self::Surface) -> Roi;
    fn destroy_surface(&self, surface: Self::Surface) -> DeviceResult<()>;

    /// Instantiates kernel function `name` from `program`.
    fn create_kernel(&self, program: &Self::Program, name: &str) -> DeviceResult<Self::Kernel>;
    fn set_arg(&self, kernel: &mut Self::Kernel, slot: u32, value: ArgValue) -> DeviceResult<()>;
    fn destroy_kernel(&self, kernel: Self::Kernel);

    fn create_grid(&self, grid: ExecutionGrid) -> DeviceResult<Self::Grid>;
    fn destroy_grid(&self, grid: Self::Grid);

    fn create_task(&self, kernel: &Self::Kernel) -> DeviceResult<Self::Task>;
    fn destroy_task(&self, task: Self::Task);

    /// Submits `task` over `grid`. Returns immediately.
    fn enqueue(&self, task: &Self::Task, grid: &Self::Grid) -> DeviceResult<Self::Event>;

    /// Blocks until `event` completes or `timeout` elapses.
    fn wait(&self, event: &Self::Event, timeout: Duration) -> WaitStatus;

    /// Releases an event. Pending work is not cancelled.
    fn destroy_event(&self, event: Self::Event);
}
