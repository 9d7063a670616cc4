// Error types for the frame pipeline
//
// Startup failures are fatal; recording-discipline errors mean the frame
// loop caught a violation before it reached the GPU; device-lost errors
// (hung or removed) are kept distinct so callers can report them as such.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::backend::{BackendError, ResourceId, ResourceState, ShaderStage};
use crate::sync::FrameState;

#[derive(Debug, Error)]
pub enum RenderError {
    // ========================================================================
    // Startup
    // ========================================================================
    #[error("no hardware adapter found ({inspected} adapter(s) inspected)")]
    NoSuitableAdapter { inspected: u32 },

    #[error("device creation rejected at every feature level ({attempted})")]
    DeviceCreation { attempted: String },

    #[error("startup failed while creating {stage}: {source}")]
    Startup {
        stage: &'static str,
        #[source]
        source: BackendError,
    },

    #[error("failed to read {stage} shader {path}: {source}")]
    ShaderLoad {
        stage: ShaderStage,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{stage} shader bytecode is invalid: {reason}")]
    InvalidShader { stage: ShaderStage, reason: String },

    // ========================================================================
    // Recording discipline
    // ========================================================================
    #[error("resource {resource} is in {actual:?}, transition declared {expected:?}")]
    InvalidTransition {
        resource: ResourceId,
        expected: ResourceState,
        actual: ResourceState,
    },

    #[error("resource {0} is not tracked")]
    UntrackedResource(ResourceId),

    #[error("cannot {op} while the frame is {actual:?} (requires {expected})")]
    Recording {
        op: &'static str,
        expected: &'static str,
        actual: FrameState,
    },

    #[error("fence value {value} does not advance past {last}")]
    NonMonotonicFence { value: u64, last: u64 },

    #[error("reset requested before the GPU reached {target} (completed {completed})")]
    PrematureReset { target: u64, completed: u64 },

    #[error("back buffer index {index} out of range for {count} buffers")]
    BackBufferIndexOutOfRange { index: u32, count: u32 },

    #[error("frame rendered to back buffer {rendered} but swap chain now reports {current}")]
    BackBufferMismatch { rendered: u32, current: u32 },

    // ========================================================================
    // Per-frame upload memory
    // ========================================================================
    #[error("upload slot {slot} exhausted: {requested} bytes requested, {available} left")]
    UploadExhausted { slot: usize, requested: u64, available: u64 },

    #[error("upload slot {slot} still in use by GPU (needs {retire}, completed {completed})")]
    UploadSlotBusy { slot: usize, retire: u64, completed: u64 },

    // ========================================================================
    // Device lost
    // ========================================================================
    #[error("GPU did not reach fence value {target} within {waited:?} (completed {completed}); device possibly hung")]
    DeviceHung { target: u64, completed: u64, waited: Duration },

    #[error("device removed: {0}")]
    DeviceRemoved(String),

    #[error(transparent)]
    Backend(#[from] BackendError),
}

impl RenderError {
    pub fn startup(stage: &'static str) -> impl FnOnce(BackendError) -> RenderError {
        move |source| RenderError::Startup { stage, source }
    }

    /// Hung or removed device; the process cannot continue rendering
    pub fn is_device_lost(&self) -> bool {
        matches!(
            self,
            Self::DeviceHung { .. }
                | Self::DeviceRemoved(_)
                | Self::Backend(BackendError::DeviceRemoved(_))
                | Self::Startup { source: BackendError::DeviceRemoved(_), .. }
        )
    }
}

pub type RenderResult<T> = Result<T, RenderError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn device_lost_classification() {
        let hung = RenderError::DeviceHung {
            target: 3,
            completed: 2,
            waited: Duration::from_millis(5),
        };
        assert!(hung.is_device_lost());
        assert!(RenderError::DeviceRemoved("reset".into()).is_device_lost());
        assert!(RenderError::from(BackendError::DeviceRemoved("x".into())).is_device_lost());
        assert!(!RenderError::PrematureReset { target: 2, completed: 1 }.is_device_lost());
    }

    #[test]
    fn startup_error_names_stage() {
        let err = RenderError::startup("command queue")(BackendError::creation("command queue", "E_OUTOFMEMORY"));
        assert!(err.to_string().contains("command queue"));
    }
}
