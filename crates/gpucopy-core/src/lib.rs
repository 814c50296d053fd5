//! # gpucopy-core
//!
//! Core types for device-assisted frame copies.
//!
//! - [`Format`] and the classifier functions - pixel sizes, plane layouts,
//!   swap and shift predicates
//! - [`Roi`], [`HostLayout`] - region and host buffer geometry
//! - [`FrameDescriptor`] - where a frame lives and how it is laid out
//! - [`CopyError`] - the error taxonomy shared by every copy path
//!
//! ## Crate Structure
//!
//! ```text
//! gpucopy-core (this crate)
//!    ^
//!    |
//!    +-- gpucopy-engine (planner, cache, kernels, executor)
//!    +-- gpucopy-bench
//! ```

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

pub mod error;
pub mod format;
pub mod frame;
pub mod geometry;

pub use error::*;
pub use format::*;
pub use frame::*;
pub use geometry::*;

/// Prelude module for convenient imports.
///
/// ```
/// use gpucopy_core::prelude::*;
/// ```
pub mod prelude {
    pub use crate::error::{CopyError, CopyResult};
    pub use crate::format::{Format, bytes_per_pixel, is_semi_planar_like, is_single_plane};
    pub use crate::frame::{FrameDescriptor, FrameMemory, HostPlanes, SurfaceHandle};
    pub use crate::geometry::{ALIGN, HostLayout, PAGE_SIZE, Roi};
}
