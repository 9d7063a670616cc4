// Headless backend - simulated GPU for running the frame pipeline without hardware
//
// Every object shares one `Gpu` timeline owned by the factory. Nothing is
// drawn; the timeline only tracks fences, resource states and what executed,
// which is enough to check the pipeline's ordering and lifetime rules.

mod command;
mod gpu;
mod resources;
mod swapchain;
mod sync;

pub use command::{HeadlessCommandAllocator, HeadlessCommandList, HeadlessCommandQueue};
pub use gpu::{GpuHandle, GpuTiming, HeadlessStats, RecordedCommand, TimelineEvent};
pub use resources::{
    HeadlessDescriptorHeap, HeadlessPipelineState, HeadlessRenderTargetView, HeadlessResource,
    HeadlessRootSignature, HeadlessUploadBuffer,
};
pub use swapchain::HeadlessSwapChain;
pub use sync::HeadlessFence;

use std::sync::Arc;

use gpu::Gpu;

use super::{
    Adapter, AdapterInfo, Backend, BackendError, Device, Factory, FeatureLevel,
    PipelineStateDesc, ResourceState, RootSignatureDesc, ShaderVisibility, Surface,
    SwapChainDesc, TextureFormat,
};

/// DXBC container magic; DXIL blobs from dxc use the same container
const SHADER_CONTAINER_MAGIC: &[u8; 4] = b"DXBC";

pub struct HeadlessBackend;

impl Backend for HeadlessBackend {
    const NAME: &'static str = "headless";

    type Factory = HeadlessFactory;
    type Adapter = HeadlessAdapter;
    type Device = HeadlessDevice;
    type CommandQueue = HeadlessCommandQueue;
    type CommandAllocator = HeadlessCommandAllocator;
    type CommandList = HeadlessCommandList;
    type Fence = HeadlessFence;
    type SwapChain = HeadlessSwapChain;
    type Resource = HeadlessResource;
    type DescriptorHeap = HeadlessDescriptorHeap;
    type RenderTargetView = HeadlessRenderTargetView;
    type RootSignature = HeadlessRootSignature;
    type PipelineState = HeadlessPipelineState;
    type UploadBuffer = HeadlessUploadBuffer;
}

/// One simulated adapter
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdapterSpec {
    pub description: String,
    pub software: bool,
    /// Highest feature level device creation accepts
    pub max_feature_level: FeatureLevel,
    pub dedicated_video_memory: u64,
}

impl AdapterSpec {
    pub fn hardware(description: &str, max_feature_level: FeatureLevel) -> Self {
        Self {
            description: description.to_string(),
            software: false,
            max_feature_level,
            dedicated_video_memory: 8 << 30,
        }
    }

    pub fn software(description: &str) -> Self {
        Self {
            description: description.to_string(),
            software: true,
            max_feature_level: FeatureLevel::Level12_1,
            dedicated_video_memory: 0,
        }
    }
}

#[derive(Debug, Clone)]
pub struct HeadlessConfig {
    /// Adapters in descending performance preference
    pub adapters: Vec<AdapterSpec>,
    pub timing: GpuTiming,
    /// Back-buffer indices reported by the swap chain, cycled; empty alternates 0,1
    pub back_buffer_script: Vec<u32>,
    /// Keep every executed command for inspection
    pub record_timeline: bool,
}

impl Default for HeadlessConfig {
    fn default() -> Self {
        Self {
            adapters: vec![AdapterSpec::hardware("Headless Reference GPU", FeatureLevel::Level12_2)],
            timing: GpuTiming::Immediate,
            back_buffer_script: Vec::new(),
            record_timeline: true,
        }
    }
}

pub struct HeadlessFactory {
    gpu: Arc<Gpu>,
    adapters: Vec<AdapterSpec>,
    back_buffer_script: Vec<u32>,
}

impl HeadlessFactory {
    pub fn new(config: HeadlessConfig) -> Self {
        log::info!(
            "Creating headless factory ({} adapter(s), {:?} GPU timing)",
            config.adapters.len(),
            config.timing
        );

        Self {
            gpu: Gpu::new(config.timing, config.record_timeline),
            adapters: config.adapters,
            back_buffer_script: config.back_buffer_script,
        }
    }

    /// Diagnostics handle onto the simulated GPU
    pub fn gpu_handle(&self) -> GpuHandle {
        GpuHandle(self.gpu.clone())
    }
}

impl Factory<HeadlessBackend> for HeadlessFactory {
    fn enum_adapter_by_preference(&self, index: u32) -> Result<Option<HeadlessAdapter>, BackendError> {
        Ok(self.adapters.get(index as usize).map(|spec| HeadlessAdapter {
            spec: spec.clone(),
            gpu: self.gpu.clone(),
        }))
    }

    fn create_swap_chain(
        &self,
        queue: &HeadlessCommandQueue,
        _surface: &Surface,
        desc: &SwapChainDesc,
    ) -> Result<HeadlessSwapChain, BackendError> {
        HeadlessSwapChain::new(queue, desc, self.back_buffer_script.clone())
    }
}

pub struct HeadlessAdapter {
    spec: AdapterSpec,
    gpu: Arc<Gpu>,
}

impl Adapter<HeadlessBackend> for HeadlessAdapter {
    fn info(&self) -> Result<AdapterInfo, BackendError> {
        Ok(AdapterInfo {
            description: self.spec.description.clone(),
            software: self.spec.software,
            dedicated_video_memory: self.spec.dedicated_video_memory,
        })
    }

    fn create_device(&self, level: FeatureLevel) -> Result<HeadlessDevice, BackendError> {
        if level > self.spec.max_feature_level {
            return Err(BackendError::FeatureLevelUnsupported(level));
        }

        self.gpu.lock().stats.devices += 1;
        Ok(HeadlessDevice { gpu: self.gpu.clone(), feature_level: level })
    }
}

pub struct HeadlessDevice {
    gpu: Arc<Gpu>,
    feature_level: FeatureLevel,
}

impl HeadlessDevice {
    pub fn feature_level(&self) -> FeatureLevel {
        self.feature_level
    }
}

impl Device<HeadlessBackend> for HeadlessDevice {
    fn create_command_queue(&self) -> Result<HeadlessCommandQueue, BackendError> {
        Ok(HeadlessCommandQueue::new(self.gpu.clone()))
    }

    fn create_command_allocator(&self) -> Result<HeadlessCommandAllocator, BackendError> {
        Ok(HeadlessCommandAllocator::new(self.gpu.clone()))
    }

    fn create_command_list(
        &self,
        allocator: &HeadlessCommandAllocator,
    ) -> Result<HeadlessCommandList, BackendError> {
        Ok(HeadlessCommandList::new(self.gpu.clone(), allocator))
    }

    fn create_fence(&self, initial_value: u64) -> Result<HeadlessFence, BackendError> {
        Ok(HeadlessFence::new(self.gpu.clone(), initial_value))
    }

    fn create_rtv_heap(&self, capacity: u32) -> Result<HeadlessDescriptorHeap, BackendError> {
        if capacity == 0 {
            return Err(BackendError::creation("RTV descriptor heap", "zero descriptors"));
        }
        let id = self.gpu.lock().next_id();
        Ok(HeadlessDescriptorHeap { id, capacity })
    }

    fn create_render_target_view(
        &self,
        heap: &HeadlessDescriptorHeap,
        slot: u32,
        resource: &HeadlessResource,
        format: TextureFormat,
    ) -> Result<HeadlessRenderTargetView, BackendError> {
        if slot >= heap.capacity {
            return Err(BackendError::creation(
                "render target view",
                format!("slot {} outside heap of {} descriptors", slot, heap.capacity),
            ));
        }

        self.gpu.lock().stats.render_target_views += 1;
        Ok(HeadlessRenderTargetView { heap: heap.id, slot, resource: resource.id, format })
    }

    fn create_root_signature(
        &self,
        desc: &RootSignatureDesc,
    ) -> Result<HeadlessRootSignature, BackendError> {
        // Same register in the same space must not be visible to one stage twice
        for (i, a) in desc.parameters.iter().enumerate() {
            for b in &desc.parameters[i + 1..] {
                let overlapping = a.visibility == b.visibility
                    || a.visibility == ShaderVisibility::All
                    || b.visibility == ShaderVisibility::All;
                if overlapping
                    && a.shader_register == b.shader_register
                    && a.register_space == b.register_space
                {
                    return Err(BackendError::creation(
                        "root signature",
                        format!(
                            "shader register b{} space {} is bound twice",
                            a.shader_register, a.register_space
                        ),
                    ));
                }
            }
        }

        self.gpu.lock().stats.root_signatures += 1;
        Ok(HeadlessRootSignature { desc: desc.clone() })
    }

    fn create_pipeline_state(
        &self,
        desc: &PipelineStateDesc<'_, HeadlessBackend>,
    ) -> Result<HeadlessPipelineState, BackendError> {
        for (stage, code) in [("vertex", desc.vertex_shader), ("pixel", desc.pixel_shader)] {
            if !code.starts_with(SHADER_CONTAINER_MAGIC) {
                return Err(BackendError::creation(
                    "pipeline state",
                    format!("{} shader bytecode is not a shader container", stage),
                ));
            }
        }
        if desc.root_signature.desc.allow_input_assembler_layout && desc.input_layout.is_empty() {
            return Err(BackendError::creation("pipeline state", "empty input layout"));
        }
        if desc.sample_count != 1 {
            return Err(BackendError::creation(
                "pipeline state",
                format!("unsupported sample count {}", desc.sample_count),
            ));
        }

        self.gpu.lock().stats.pipeline_states += 1;
        Ok(HeadlessPipelineState {
            render_target_format: desc.render_target_format,
            input_elements: desc.input_layout.len(),
        })
    }

    fn create_upload_buffer(&self, size: u64) -> Result<HeadlessUploadBuffer, BackendError> {
        if size == 0 {
            return Err(BackendError::creation("upload buffer", "zero size"));
        }
        Ok(HeadlessUploadBuffer::new(self.gpu.clone(), size))
    }

    fn removed_reason(&self) -> Option<String> {
        self.gpu
            .lock()
            .is_removed()
            .then(|| "DXGI_ERROR_DEVICE_RESET (simulated driver reset)".to_string())
    }
}

/// Back buffers start out owned by the presentation engine
pub(crate) const INITIAL_BACK_BUFFER_STATE: ResourceState = ResourceState::Present;
