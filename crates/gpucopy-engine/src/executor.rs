//! Kernel submission and completion tokens.
//!
//! [`submit`] wraps a bound kernel into a task, enqueues it over its grid and
//! releases every intermediate device object before returning. The only
//! thing that outlives the call is the [`CompletionToken`].

use std::time::Duration;

use gpucopy_core::{CopyError, CopyResult};
use tracing::{trace, warn};

use crate::device::{CopyDevice, DeviceError, WaitStatus};
use crate::kernel::ExecutionGrid;

/// Handle for one enqueued dispatch.
///
/// Dropping the token releases the event without waiting. The device queue
/// is in-order, so waiting on the last token of a sequence covers all
/// earlier ones.
pub struct CompletionToken<'d, D: CopyDevice> {
    device: &'d D,
    event: Option<D::Event>,
}

impl<'d, D: CopyDevice> CompletionToken<'d, D> {
    /// Blocks until completion or `timeout`.
    pub fn wait(&self, timeout: Duration) -> WaitStatus {
        match &self.event {
            Some(event) => self.device.wait(event, timeout),
            None => WaitStatus::Failed,
        }
    }

    /// Waits and maps the status into the error taxonomy.
    pub fn wait_result(&self, timeout: Duration) -> CopyResult<()> {
        match self.wait(timeout) {
            WaitStatus::Ok => Ok(()),
            WaitStatus::TimedOut => {
                warn!(timeout_ms = timeout.as_millis() as u64, "device wait timed out, presumed hang");
                Err(CopyError::OperationTimedOut {
                    timeout_ms: timeout.as_millis() as u64,
                })
            }
            WaitStatus::Failed => Err(CopyError::DeviceOperationFailed(
                "device reported execution failure".into(),
            )),
        }
    }
}

impl<D: CopyDevice> Drop for CompletionToken<'_, D> {
    fn drop(&mut self) {
        if let Some(event) = self.event.take() {
            self.device.destroy_event(event);
        }
    }
}

/// Maps a raw device failure into the error taxonomy.
pub fn device_error(err: DeviceError) -> CopyError {
    if err.op.is_creation() {
        CopyError::ResourceCreationFailed(err.to_string())
    } else {
        CopyError::DeviceOperationFailed(err.to_string())
    }
}

/// Enqueues `kernel` over `grid` on the device queue.
///
/// `kernel`, its task and the grid object are destroyed on every path,
/// including failures.
pub fn submit<D: CopyDevice>(
    device: &D,
    kernel: D::Kernel,
    grid: ExecutionGrid,
) -> CopyResult<CompletionToken<'_, D>> {
    let task = match device.create_task(&kernel) {
        Ok(task) => task,
        Err(e) => {
            device.destroy_kernel(kernel);
            return Err(device_error(e));
        }
    };
    let grid_obj = match device.create_grid(grid) {
        Ok(g) => g,
        Err(e) => {
            device.destroy_task(task);
            device.destroy_kernel(kernel);
            return Err(device_error(e));
        }
    };

    let enqueued = device.enqueue(&task, &grid_obj);

    device.destroy_task(task);
    device.destroy_grid(grid_obj);
    device.destroy_kernel(kernel);

    let event = enqueued.map_err(device_error)?;
    trace!(width = grid.width, height = grid.height, "dispatch enqueued");
    Ok(CompletionToken {
        device,
        event: Some(event),
    })
}
