//! Error types for device-assisted copies.
//!
//! Every request to the copy engine ends in exactly one aggregate result.
//! The [`CopyError`] enum is that result's failure side; there is no
//! partial-success variant.
//!
//! # Usage
//!
//! ```rust
//! use gpucopy_core::{CopyError, CopyResult};
//!
//! fn check_stride(stride: usize) -> CopyResult<()> {
//!     if stride % 16 != 0 {
//!         return Err(CopyError::InvalidAlignment {
//!             what: "stride",
//!             value: stride,
//!             align: 16,
//!         });
//!     }
//!     Ok(())
//! }
//!
//! assert!(check_stride(1920).is_ok());
//! assert!(check_stride(1921).is_err());
//! ```
//!
//! # Dependencies
//!
//! - [`thiserror`] - For derive macro error implementation
//!
//! # Used By
//!
//! - `gpucopy-engine` - planner, resource cache, executor and engine facade

use thiserror::Error;

/// Result type alias using [`CopyError`] as the error type.
pub type CopyResult<T> = std::result::Result<T, CopyError>;

/// Errors that can occur while planning or executing a device-assisted copy.
///
/// # Categories
///
/// - **Caller errors**: [`InvalidArgument`](CopyError::InvalidArgument),
///   [`InvalidAlignment`](CopyError::InvalidAlignment)
/// - **Capability errors**: [`UnsupportedFormat`](CopyError::UnsupportedFormat)
/// - **Device errors**: [`ResourceCreationFailed`](CopyError::ResourceCreationFailed),
///   [`DeviceOperationFailed`](CopyError::DeviceOperationFailed),
///   [`OperationTimedOut`](CopyError::OperationTimedOut)
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CopyError {
    /// A required input is missing or out of range (null handle, empty region).
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// A host pointer or stride violates the 16-byte alignment contract.
    ///
    /// A null host pointer is reported here as well, with `value == 0`.
    #[error("Invalid alignment: {what} {value:#x} is not a non-zero multiple of {align}")]
    InvalidAlignment {
        /// Which input failed ("host pointer", "stride").
        what: &'static str,
        /// Offending value.
        value: usize,
        /// Required alignment in bytes.
        align: usize,
    },

    /// The format (or format/transform pair) has no kernel.
    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    /// A device buffer, surface or kernel could not be created.
    #[error("Resource creation failed: {0}")]
    ResourceCreationFailed(String),

    /// A device call (argument binding, enqueue, completion) reported failure.
    #[error("Device operation failed: {0}")]
    DeviceOperationFailed(String),

    /// The final completion wait exceeded its timeout. Treat as a device hang.
    #[error("Operation timed out after {timeout_ms} ms")]
    OperationTimedOut {
        /// Timeout that elapsed.
        timeout_ms: u64,
    },
}

impl CopyError {
    /// Returns `true` when the device is presumed hung.
    ///
    /// Callers usually stop routing work to this engine after a hang.
    #[inline]
    pub fn is_device_hang(&self) -> bool {
        matches!(self, CopyError::OperationTimedOut { .. })
    }

    /// Returns `true` when a plain host copy can still satisfy the request.
    ///
    /// Alignment, format and resource failures leave the data untouched, so
    /// the orchestrator may fall back to a CPU copy. A hang never qualifies.
    pub fn is_retryable_elsewhere(&self) -> bool {
        matches!(
            self,
            CopyError::InvalidAlignment { .. }
                | CopyError::UnsupportedFormat(_)
                | CopyError::ResourceCreationFailed(_)
                | CopyError::DeviceOperationFailed(_)
        )
    }
}
