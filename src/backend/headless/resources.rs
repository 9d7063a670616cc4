// Headless resources, descriptors and pipeline objects

use std::sync::Arc;

use parking_lot::Mutex;

use super::gpu::Gpu;
use crate::backend::{
    BackendError, GpuResource, ResourceId, RootSignatureDesc, TextureFormat, UploadBuffer,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeadlessResource {
    pub id: ResourceId,
}

impl GpuResource for HeadlessResource {
    fn id(&self) -> ResourceId {
        self.id
    }
}

pub struct HeadlessDescriptorHeap {
    pub(crate) id: u64,
    pub(crate) capacity: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeadlessRenderTargetView {
    pub heap: u64,
    pub slot: u32,
    pub resource: ResourceId,
    pub format: TextureFormat,
}

#[derive(Debug)]
pub struct HeadlessRootSignature {
    pub desc: RootSignatureDesc,
}

pub struct HeadlessPipelineState {
    pub render_target_format: TextureFormat,
    pub input_elements: usize,
}

/// Upload heap buffer backed by host memory
pub struct HeadlessUploadBuffer {
    id: u64,
    gpu: Arc<Gpu>,
    address: u64,
    data: Mutex<Vec<u8>>,
}

impl HeadlessUploadBuffer {
    pub(crate) fn new(gpu: Arc<Gpu>, size: u64) -> Self {
        let (id, address) = gpu.lock().register_upload_range(size);
        Self { id, gpu, address, data: Mutex::new(vec![0; size as usize]) }
    }
}

impl UploadBuffer for HeadlessUploadBuffer {
    fn size(&self) -> u64 {
        self.data.lock().len() as u64
    }

    fn gpu_address(&self) -> u64 {
        self.address
    }

    fn write(&self, offset: u64, bytes: &[u8]) -> Result<(), BackendError> {
        let mut data = self.data.lock();
        let end = offset as usize + bytes.len();
        if end > data.len() {
            return Err(BackendError::api(
                "Map",
                format!("write of {} bytes at {} exceeds buffer of {}", bytes.len(), offset, data.len()),
            ));
        }

        let start = self.address + offset;
        let mut state = self.gpu.lock();
        if state.pending_reference(start, start + bytes.len() as u64) {
            state.report(format!(
                "upload memory at {:#x} overwritten while pending GPU work still reads it",
                start
            ));
        }
        drop(state);

        data[offset as usize..end].copy_from_slice(bytes);
        Ok(())
    }
}

impl Drop for HeadlessUploadBuffer {
    fn drop(&mut self) {
        self.gpu.lock().release_upload_range(self.id);
    }
}
