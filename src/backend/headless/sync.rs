// Headless fence

use std::sync::Arc;
use std::time::Duration;

use super::gpu::Gpu;
use crate::backend::{BackendError, Fence, WaitStatus};

pub struct HeadlessFence {
    pub(crate) id: u64,
    gpu: Arc<Gpu>,
}

impl HeadlessFence {
    pub(crate) fn new(gpu: Arc<Gpu>, initial_value: u64) -> Self {
        let id = gpu.lock().register_fence(initial_value);
        Self { id, gpu }
    }
}

impl Fence for HeadlessFence {
    fn completed_value(&self) -> u64 {
        self.gpu.lock().fence_value(self.id)
    }

    fn wait_for_value(&self, value: u64, timeout: Option<Duration>) -> Result<WaitStatus, BackendError> {
        self.gpu.wait(self.id, value, timeout)
    }
}
