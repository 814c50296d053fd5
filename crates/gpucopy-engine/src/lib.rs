//! Device-assisted strided frame copies.
//!
//! Moves rectangular regions of video frames between host memory and 2D
//! device surfaces, and between two surfaces, by dispatching copy kernels.
//! Large host ranges are cut into page-aligned slices that respect the
//! device's buffer size limit; device objects are cached per surface handle
//! and host address and released when the engine is.
//!
//! # Architecture
//!
//! ```text
//! CopyEngine (facade, lifecycle)
//!     ├── routing     FrameDescriptor pair -> CopyRequest
//!     ├── planner     host range -> page-aligned slices
//!     ├── kernel      kernel table, argument schemas, grids
//!     ├── cache       buffers and surfaces, reverse teardown
//!     ├── executor    submit + CompletionToken
//!     └── device      CopyDevice trait
//!             └── SoftDevice (in-process queue, rayon rows)
//! ```
//!
//! # Example
//!
//! ```ignore
//! use gpucopy_engine::{CopyEngine, EngineConfig, HostFrame, SoftDevice};
//! use gpucopy_core::{Format, HostLayout, Roi, SurfaceHandle};
//!
//! let device = SoftDevice::new()?;
//! let surface = SurfaceHandle::new(1, 0);
//! device.allocate_surface(surface, Format::Nv12, 1920, 1080)?;
//!
//! let engine = CopyEngine::initialize(device, EngineConfig::from_env())?;
//! let frame = HostFrame::new(Format::Nv12, Roi::new(1920, 1080), HostLayout::default())?;
//! unsafe {
//!     engine.copy_host_to_device(surface, frame.as_ptr(), frame.layout(), frame.roi(), Format::Nv12)?;
//! }
//! ```

pub mod cache;
pub mod config;
pub mod device;
pub mod engine;
pub mod executor;
pub mod host;
pub mod kernel;
pub mod planner;
pub mod routing;

pub use cache::{BufferKey, CacheStats, ResourceCache};
pub use config::EngineConfig;
pub use device::{ArgIndex, ArgValue, CopyDevice, DeviceError, DeviceLimits, DeviceOp, SoftDevice, WaitStatus};
pub use engine::CopyEngine;
pub use executor::CompletionToken;
pub use host::HostFrame;
pub use kernel::{Direction, ExecutionGrid, KernelId, Transform, select_kernel};
pub use planner::{Slice, SlicePlan, plan_slices};
pub use routing::{CopyRequest, Endpoints, route};
