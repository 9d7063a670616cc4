// Headless swap chain
//
// Back-buffer rotation follows a script when one is configured, which lets
// tests report indices a real flip-model chain would never produce in order.

use std::sync::Arc;

use parking_lot::Mutex;

use super::gpu::{Gpu, QueueOp};
use super::{HeadlessBackend, HeadlessCommandQueue, HeadlessResource, INITIAL_BACK_BUFFER_STATE};
use crate::backend::{BackendError, ResourceId, SwapChain, SwapChainDesc};

pub struct HeadlessSwapChain {
    gpu: Arc<Gpu>,
    buffers: Vec<ResourceId>,
    script: Vec<u32>,
    presents: Mutex<usize>,
}

impl HeadlessSwapChain {
    pub(crate) fn new(
        queue: &HeadlessCommandQueue,
        desc: &SwapChainDesc,
        script: Vec<u32>,
    ) -> Result<Self, BackendError> {
        if !(2..=16).contains(&desc.buffer_count) {
            return Err(BackendError::creation(
                "swap chain",
                format!("{} buffers requested, expected 2 to 16", desc.buffer_count),
            ));
        }
        if desc.width == 0 || desc.height == 0 {
            return Err(BackendError::creation("swap chain", "zero-sized surface"));
        }
        if let Some(bad) = script.iter().find(|&&index| index >= desc.buffer_count) {
            return Err(BackendError::creation(
                "swap chain",
                format!("scripted back buffer {} out of range", bad),
            ));
        }

        let gpu = queue.gpu.clone();
        let buffers = {
            let mut state = gpu.lock();
            state.stats.swap_chains += 1;
            (0..desc.buffer_count)
                .map(|_| state.register_resource(INITIAL_BACK_BUFFER_STATE))
                .collect()
        };

        Ok(Self { gpu, buffers, script, presents: Mutex::new(0) })
    }

    fn index_after(&self, presents: usize) -> u32 {
        if self.script.is_empty() {
            (presents % self.buffers.len()) as u32
        } else {
            self.script[presents % self.script.len()]
        }
    }
}

impl SwapChain<HeadlessBackend> for HeadlessSwapChain {
    fn current_back_buffer_index(&self) -> u32 {
        self.index_after(*self.presents.lock())
    }

    fn buffer(&self, index: u32) -> Result<HeadlessResource, BackendError> {
        self.buffers
            .get(index as usize)
            .map(|&id| HeadlessResource { id })
            .ok_or_else(|| BackendError::api("GetBuffer", format!("no back buffer {}", index)))
    }

    fn present(&self, _sync_interval: u32) -> Result<(), BackendError> {
        if self.gpu.lock().is_removed() {
            return Err(BackendError::DeviceRemoved("Present on a removed device".into()));
        }

        let mut presents = self.presents.lock();
        let back_buffer = self.index_after(*presents);
        self.gpu.submit(QueueOp::Present {
            resource: self.buffers[back_buffer as usize],
            back_buffer,
        });
        self.gpu.lock().stats.presents += 1;
        *presents += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::headless::{HeadlessConfig, HeadlessFactory};
    use crate::backend::{Adapter, Device, Factory, FeatureLevel, Surface, TextureFormat};

    fn desc() -> SwapChainDesc {
        SwapChainDesc {
            width: 64,
            height: 64,
            format: TextureFormat::Rgba8Unorm,
            buffer_count: 2,
            sample_count: 1,
        }
    }

    fn swap_chain(script: Vec<u32>) -> HeadlessSwapChain {
        let factory = HeadlessFactory::new(HeadlessConfig {
            back_buffer_script: script,
            ..HeadlessConfig::default()
        });
        let adapter = factory.enum_adapter_by_preference(0).unwrap().unwrap();
        let device = adapter.create_device(FeatureLevel::Level12_0).unwrap();
        let queue = device.create_command_queue().unwrap();
        factory.create_swap_chain(&queue, &Surface::Offscreen, &desc()).unwrap()
    }

    #[test]
    fn alternates_without_script() {
        let chain = swap_chain(Vec::new());
        let mut seen = Vec::new();
        for _ in 0..4 {
            seen.push(chain.current_back_buffer_index());
            chain.present(1).unwrap();
        }
        assert_eq!(seen, vec![0, 1, 0, 1]);
    }

    #[test]
    fn follows_script() {
        let chain = swap_chain(vec![0, 0, 1, 0]);
        let mut seen = Vec::new();
        for _ in 0..5 {
            seen.push(chain.current_back_buffer_index());
            chain.present(1).unwrap();
        }
        assert_eq!(seen, vec![0, 0, 1, 0, 0]);
    }

    #[test]
    fn buffers_are_stable() {
        let chain = swap_chain(Vec::new());
        assert_eq!(chain.buffer(1).unwrap().id, chain.buffer(1).unwrap().id);
        assert_ne!(chain.buffer(0).unwrap().id, chain.buffer(1).unwrap().id);
        assert!(chain.buffer(2).is_err());
    }
}
