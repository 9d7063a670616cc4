// =============================================================================
// FRAME LOOP - Composes device, commands, surface, barriers and the fence
// =============================================================================
//
// FRAME FLOW:
// 1. Read the fence, claim this frame's upload slot, write scene data
// 2. Ask the swap chain which back buffer is current
// 3. Render pass: Present -> RenderTarget, clear, draw, RenderTarget -> Present
// 4. Close, execute, present
// 5. Signal the next fence value, wait for it, reset allocator and list
//
// The CPU never records frame N+1 before the GPU finished frame N.
// =============================================================================

use crate::backend::{
    AdapterInfo, Backend, BackendError, Device, FeatureLevel, PrimitiveTopology, ScissorRect, Surface, VertexBufferView,
    Viewport,
};
use crate::barrier::{RenderPass, ResourceStateTracker};
use crate::command::CommandContext;
use crate::device::{GpuContext, FEATURE_LEVEL_LADDER};
use crate::error::{RenderError, RenderResult};
use crate::pipeline::{PipelineAssembly, ShaderSet, MATERIAL_ROOT_PARAMETER, TRANSFORM_ROOT_PARAMETER};
use crate::scene::{SceneState, Vertex};
use crate::swapchain::{PresentationSurface, RENDER_TARGET_VIEW_FORMAT};
use crate::sync::{FrameSynchronizer, ResetRecord, WaitPolicy};
use crate::upload::{UploadRing, DEFAULT_SLOT_COUNT, DEFAULT_SLOT_SIZE};

/// Everything `Renderer::new` needs besides the factory and shaders
#[derive(Debug, Clone)]
pub struct RendererDesc {
    pub width: u32,
    pub height: u32,
    pub clear_color: [f32; 4],
    pub sync_interval: u32,
    pub wait_policy: WaitPolicy,
    pub upload_slots: usize,
    pub upload_slot_size: u64,
    /// Reset records kept for inspection
    pub reset_history: usize,
    pub feature_levels: Vec<FeatureLevel>,
}

impl Default for RendererDesc {
    fn default() -> Self {
        Self {
            width: 1280,
            height: 720,
            clear_color: [0.1, 0.25, 0.5, 1.0],
            sync_interval: 1,
            wait_policy: WaitPolicy::default(),
            upload_slots: DEFAULT_SLOT_COUNT,
            upload_slot_size: DEFAULT_SLOT_SIZE,
            reset_history: 64,
            feature_levels: FEATURE_LEVEL_LADDER.to_vec(),
        }
    }
}

/// What one call to `render_frame` did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameReport {
    /// 1-based frame number
    pub frame: u64,
    pub back_buffer: u32,
    pub fence_target: u64,
    pub completed: u64,
    pub reset: ResetRecord,
}

pub struct Renderer<B: Backend> {
    // Drop order: per-frame memory, pipeline, fence, surface, commands, device
    upload: UploadRing<B>,
    pipeline: PipelineAssembly<B>,
    sync: FrameSynchronizer<B>,
    surface: PresentationSurface<B>,
    tracker: ResourceStateTracker,
    commands: CommandContext<B>,
    gpu: GpuContext<B>,

    clear_color: [f32; 4],
    sync_interval: u32,
    frame_count: u64,
}

impl<B: Backend> Renderer<B> {
    pub fn new(
        factory: &B::Factory,
        surface: &Surface,
        desc: &RendererDesc,
        shaders: &ShaderSet,
    ) -> RenderResult<Self> {
        log::info!("Initializing {} renderer...", B::NAME);

        let gpu = GpuContext::<B>::with_ladder(factory, &desc.feature_levels)?;
        let commands = CommandContext::<B>::new(&gpu.device)?;

        let mut tracker = ResourceStateTracker::new();
        let surface = PresentationSurface::<B>::new(
            factory,
            &gpu.device,
            commands.queue(),
            surface,
            desc.width,
            desc.height,
            &mut tracker,
        )?;

        let sync = FrameSynchronizer::<B>::new(&gpu.device, desc.wait_policy, desc.reset_history)?;
        let pipeline = PipelineAssembly::<B>::build(&gpu.device, shaders, RENDER_TARGET_VIEW_FORMAT)?;
        let upload = UploadRing::<B>::new(&gpu.device, desc.upload_slots, desc.upload_slot_size)?;

        log::info!("Renderer initialized successfully!");

        Ok(Self {
            upload,
            pipeline,
            sync,
            surface,
            tracker,
            commands,
            gpu,
            clear_color: desc.clear_color,
            sync_interval: desc.sync_interval,
            frame_count: 0,
        })
    }

    /// Record, submit and present one frame, then wait for the GPU to finish it
    pub fn render_frame(&mut self, scene: &SceneState) -> RenderResult<FrameReport> {
        let result = self.run_frame(scene).map_err(|e| self.with_removed_reason(e));
        if matches!(&result, Err(e) if e.is_device_lost()) {
            self.sync.mark_device_lost();
        }
        result
    }

    fn run_frame(&mut self, scene: &SceneState) -> RenderResult<FrameReport> {
        // ---------------------------------------------------------------------
        // Upload this frame's data
        // ---------------------------------------------------------------------
        let completed = self.sync.completed_value()?;
        self.upload.begin_frame(completed)?;

        let vertices = self.upload.push_slice(&scene.vertices)?;
        let material = self.upload.push_constants(&scene.material)?;
        let transform = self.upload.push_constants(&scene.wvp(self.surface.aspect_ratio()))?;

        // ---------------------------------------------------------------------
        // Record
        // ---------------------------------------------------------------------
        let back_buffer = self.surface.acquire()?;
        self.commands.begin_recording()?;

        let ready = {
            let recorder = self.commands.recorder()?;
            let pass = RenderPass::begin(recorder, &mut self.tracker, &back_buffer)?;
            pass.clear(self.clear_color);

            let (width, height) = (self.surface.width(), self.surface.height());
            let state = pass.recorder();
            state.set_viewport(&Viewport::full(width, height));
            state.set_scissor_rect(&ScissorRect::full(width, height));
            state.set_root_signature(&self.pipeline.root_signature);
            state.set_pipeline_state(&self.pipeline.pipeline_state);
            state.set_vertex_buffer(
                0,
                &VertexBufferView {
                    gpu_address: vertices.gpu_address,
                    size_in_bytes: vertices.size as u32,
                    stride_in_bytes: std::mem::size_of::<Vertex>() as u32,
                },
            );
            state.set_primitive_topology(PrimitiveTopology::TriangleList);
            state.set_constant_buffer(MATERIAL_ROOT_PARAMETER, material.gpu_address);
            state.set_constant_buffer(TRANSFORM_ROOT_PARAMETER, transform.gpu_address);
            pass.draw(scene.vertices.len() as u32, 1);

            pass.finish()?
        };

        // ---------------------------------------------------------------------
        // Submit and present
        // ---------------------------------------------------------------------
        self.commands.close()?;
        self.commands.execute()?;
        self.surface.present(ready, &self.tracker, self.sync_interval)?;

        // ---------------------------------------------------------------------
        // Fence handshake
        // ---------------------------------------------------------------------
        let fence_target = self.commands.signal(&mut self.sync)?;
        self.upload.end_frame(fence_target);
        let completion = self.commands.wait(&mut self.sync)?;
        let reset = self.commands.reset(&mut self.sync)?;

        self.frame_count += 1;
        log::trace!(
            "Frame {} on back buffer {} retired at fence {} (waited {:?})",
            self.frame_count,
            back_buffer.index,
            fence_target,
            completion.waited
        );

        Ok(FrameReport {
            frame: self.frame_count,
            back_buffer: back_buffer.index,
            fence_target,
            completed: completion.completed,
            reset,
        })
    }

    /// Name the driver's removal reason in device-removed errors
    fn with_removed_reason(&self, error: RenderError) -> RenderError {
        let Some(reason) = self.gpu.device.removed_reason() else {
            return error;
        };
        match error {
            RenderError::DeviceRemoved(detail) | RenderError::Backend(BackendError::DeviceRemoved(detail)) => {
                RenderError::DeviceRemoved(format!("{} (reason: {})", detail, reason))
            }
            other => other,
        }
    }

    /// Drain the queue: everything submitted so far has completed on return
    pub fn flush(&mut self) -> RenderResult<()> {
        let completion = self.sync.flush(self.commands.queue())?;
        log::debug!("Queue flushed at fence value {}", completion.target);
        Ok(())
    }

    pub fn frame_count(&self) -> u64 {
        self.frame_count
    }

    pub fn adapter_info(&self) -> &AdapterInfo {
        &self.gpu.adapter_info
    }

    pub fn feature_level(&self) -> FeatureLevel {
        self.gpu.feature_level
    }

    pub fn render_target_view_count(&self) -> usize {
        self.surface.render_target_view_count()
    }

    pub fn last_signaled(&self) -> u64 {
        self.sync.last_signaled()
    }

    /// A frame already reported the GPU hung or removed
    pub fn is_device_lost(&self) -> bool {
        self.sync.is_device_lost()
    }

    pub fn reset_history(&self) -> impl Iterator<Item = &ResetRecord> {
        self.sync.reset_history()
    }

    pub fn tracker(&self) -> &ResourceStateTracker {
        &self.tracker
    }

    pub fn surface(&self) -> &PresentationSurface<B> {
        &self.surface
    }
}

impl<B: Backend> Drop for Renderer<B> {
    fn drop(&mut self) {
        log::info!("Cleaning up renderer...");

        // GPU objects go only after the queue has drained. A lost device
        // will never drain, so release straight away.
        if self.sync.is_device_lost() {
            log::warn!("Device lost, skipping queue flush on shutdown");
        } else if let Err(e) = self.flush() {
            log::error!("Failed to flush queue on shutdown: {}", e);
        }

        log::info!("Cleanup complete");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::headless::{HeadlessBackend, HeadlessConfig, HeadlessFactory};
    use crate::backend::ShaderStage;
    use crate::pipeline::placeholder_bytecode;

    fn renderer(factory: &HeadlessFactory) -> Renderer<HeadlessBackend> {
        let shaders = ShaderSet {
            vertex: placeholder_bytecode(ShaderStage::Vertex),
            pixel: placeholder_bytecode(ShaderStage::Pixel),
        };
        Renderer::new(factory, &Surface::Offscreen, &RendererDesc::default(), &shaders).unwrap()
    }

    #[test]
    fn first_frame_signals_one() {
        let factory = HeadlessFactory::new(HeadlessConfig::default());
        let mut renderer = renderer(&factory);

        let report = renderer.render_frame(&SceneState::default()).unwrap();

        assert_eq!(report.frame, 1);
        assert_eq!(report.back_buffer, 0);
        assert_eq!(report.fence_target, 1);
        assert!(report.completed >= 1);
        assert_eq!(report.reset.completed_at_reset, 1);
    }

    #[test]
    fn drop_flushes_queue() {
        let factory = HeadlessFactory::new(HeadlessConfig::default());
        let gpu = factory.gpu_handle();
        {
            let mut renderer = renderer(&factory);
            renderer.render_frame(&SceneState::default()).unwrap();
        }

        assert_eq!(gpu.pending_operations(), 0);
        assert!(gpu.validation_messages().is_empty());
    }

    #[test]
    fn removed_device_error_names_reason() {
        let factory = HeadlessFactory::new(HeadlessConfig::default());
        let mut renderer = renderer(&factory);
        renderer.render_frame(&SceneState::default()).unwrap();

        factory.gpu_handle().remove_device();
        let err = renderer.render_frame(&SceneState::default()).unwrap_err();

        assert!(matches!(err, RenderError::DeviceRemoved(_)), "{err}");
        assert!(err.to_string().contains("reason: DXGI_ERROR_DEVICE_RESET"), "{err}");
        assert!(renderer.is_device_lost());
    }
}
