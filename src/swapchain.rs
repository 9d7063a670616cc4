// Presentation surface - double-buffered swap chain plus one RTV per buffer
//
// Render-target views are created once, up front, indexed like the back
// buffers. The current index is queried from the swap chain every frame;
// nothing here assumes a strict 0,1,0,1 rotation.

use crate::backend::{
    Backend, Device, Factory, GpuResource, ResourceState, Surface, SwapChain, SwapChainDesc,
    TextureFormat,
};
use crate::barrier::{PresentReady, ResourceStateTracker};
use crate::error::{RenderError, RenderResult};

pub const BACK_BUFFER_COUNT: u32 = 2;

/// Back-buffer format owned by the swap chain
pub const SWAP_CHAIN_FORMAT: TextureFormat = TextureFormat::Rgba8Unorm;

/// Views write sRGB-encoded values into the UNORM buffers
pub const RENDER_TARGET_VIEW_FORMAT: TextureFormat = TextureFormat::Rgba8UnormSrgb;

/// One back buffer and its view, as selected for a frame
pub struct BackBuffer<B: Backend> {
    pub index: u32,
    pub resource: B::Resource,
    pub rtv: B::RenderTargetView,
}

pub struct PresentationSurface<B: Backend> {
    // Views and buffer references go before the swap chain
    buffers: Vec<(B::Resource, B::RenderTargetView)>,
    // Owns the descriptors the views point into
    _rtv_heap: B::DescriptorHeap,
    swap_chain: B::SwapChain,
    width: u32,
    height: u32,
}

impl<B: Backend> PresentationSurface<B> {
    /// Create the swap chain on `queue`, then a view for each buffer.
    /// Every buffer is registered with `tracker` in the `Present` state.
    pub fn new(
        factory: &B::Factory,
        device: &B::Device,
        queue: &B::CommandQueue,
        surface: &Surface,
        width: u32,
        height: u32,
        tracker: &mut ResourceStateTracker,
    ) -> RenderResult<Self> {
        let desc = SwapChainDesc {
            width,
            height,
            format: SWAP_CHAIN_FORMAT,
            buffer_count: BACK_BUFFER_COUNT,
            sample_count: 1,
        };

        let swap_chain = factory
            .create_swap_chain(queue, surface, &desc)
            .map_err(RenderError::startup("swap chain"))?;
        let rtv_heap = device
            .create_rtv_heap(BACK_BUFFER_COUNT)
            .map_err(RenderError::startup("RTV descriptor heap"))?;

        let mut buffers = Vec::with_capacity(BACK_BUFFER_COUNT as usize);
        for index in 0..BACK_BUFFER_COUNT {
            let resource = swap_chain
                .buffer(index)
                .map_err(RenderError::startup("back buffer"))?;
            let rtv = device
                .create_render_target_view(&rtv_heap, index, &resource, RENDER_TARGET_VIEW_FORMAT)
                .map_err(RenderError::startup("render target view"))?;

            tracker.register(resource.id(), ResourceState::Present);
            buffers.push((resource, rtv));
        }

        log::info!(
            "Presentation surface ready: {}x{}, {} back buffers",
            width,
            height,
            BACK_BUFFER_COUNT
        );

        Ok(Self { buffers, _rtv_heap: rtv_heap, swap_chain, width, height })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn aspect_ratio(&self) -> f32 {
        self.width as f32 / self.height.max(1) as f32
    }

    pub fn render_target_view_count(&self) -> usize {
        self.buffers.len()
    }

    pub fn swap_chain(&self) -> &B::SwapChain {
        &self.swap_chain
    }

    /// Select this frame's back buffer by asking the swap chain
    pub fn acquire(&self) -> RenderResult<BackBuffer<B>> {
        let index = self.swap_chain.current_back_buffer_index();
        let (resource, rtv) = self.buffers.get(index as usize).ok_or(
            RenderError::BackBufferIndexOutOfRange { index, count: self.buffers.len() as u32 },
        )?;

        Ok(BackBuffer { index, resource: resource.clone(), rtv: rtv.clone() })
    }

    /// Present the buffer `ready` vouches for
    pub fn present(
        &self,
        ready: PresentReady,
        tracker: &ResourceStateTracker,
        sync_interval: u32,
    ) -> RenderResult<()> {
        let state = tracker.state(ready.resource).ok_or(RenderError::UntrackedResource(ready.resource))?;
        if state != ResourceState::Present {
            return Err(RenderError::InvalidTransition {
                resource: ready.resource,
                expected: ResourceState::Present,
                actual: state,
            });
        }

        let current = self.swap_chain.current_back_buffer_index();
        if current != ready.back_buffer {
            return Err(RenderError::BackBufferMismatch { rendered: ready.back_buffer, current });
        }

        self.swap_chain.present(sync_interval)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::headless::{HeadlessBackend, HeadlessConfig, HeadlessFactory};
    use crate::backend::{Adapter, FeatureLevel};
    use crate::barrier::RenderPass;
    use crate::command::CommandContext;

    #[test]
    fn creates_one_view_per_buffer() {
        let factory = HeadlessFactory::new(HeadlessConfig::default());
        let adapter = factory.enum_adapter_by_preference(0).unwrap().unwrap();
        let device = adapter.create_device(FeatureLevel::Level12_0).unwrap();
        let queue = device.create_command_queue().unwrap();
        let mut tracker = ResourceStateTracker::new();

        let surface = PresentationSurface::<HeadlessBackend>::new(
            &factory,
            &device,
            &queue,
            &Surface::Offscreen,
            1280,
            720,
            &mut tracker,
        )
        .unwrap();

        assert_eq!(surface.render_target_view_count(), 2);
        assert_eq!(factory.gpu_handle().stats().render_target_views, 2);
        for index in 0..BACK_BUFFER_COUNT {
            let id = surface.swap_chain().buffer(index).unwrap().id();
            assert_eq!(tracker.state(id), Some(ResourceState::Present));
        }
        assert!((surface.aspect_ratio() - 16.0 / 9.0).abs() < 1e-6);
    }

    #[test]
    fn present_after_render_pass_is_accepted() {
        let factory = HeadlessFactory::new(HeadlessConfig::default());
        let adapter = factory.enum_adapter_by_preference(0).unwrap().unwrap();
        let device = adapter.create_device(FeatureLevel::Level12_0).unwrap();
        let mut commands = CommandContext::<HeadlessBackend>::new(&device).unwrap();
        let mut tracker = ResourceStateTracker::new();
        let surface = PresentationSurface::<HeadlessBackend>::new(
            &factory,
            &device,
            commands.queue(),
            &Surface::Offscreen,
            64,
            64,
            &mut tracker,
        )
        .unwrap();

        let back_buffer = surface.acquire().unwrap();
        let ready = {
            let pass = RenderPass::begin(commands.recorder().unwrap(), &mut tracker, &back_buffer).unwrap();
            pass.clear([0.1, 0.25, 0.5, 1.0]);
            pass.finish().unwrap()
        };
        commands.close().unwrap();
        commands.execute().unwrap();
        surface.present(ready, &tracker, 1).unwrap();

        let gpu = factory.gpu_handle();
        assert!(gpu.validation_messages().is_empty());
        assert_eq!(gpu.stats().presents, 1);
    }

    #[test]
    fn abandoned_pass_still_returns_buffer_to_present() {
        let factory = HeadlessFactory::new(HeadlessConfig::default());
        let adapter = factory.enum_adapter_by_preference(0).unwrap().unwrap();
        let device = adapter.create_device(FeatureLevel::Level12_0).unwrap();
        let commands = CommandContext::<HeadlessBackend>::new(&device).unwrap();
        let mut tracker = ResourceStateTracker::new();
        let surface = PresentationSurface::<HeadlessBackend>::new(
            &factory,
            &device,
            commands.queue(),
            &Surface::Offscreen,
            64,
            64,
            &mut tracker,
        )
        .unwrap();

        let back_buffer = surface.acquire().unwrap();
        {
            let _pass = RenderPass::begin(commands.recorder().unwrap(), &mut tracker, &back_buffer).unwrap();
        }

        assert_eq!(tracker.state(back_buffer.resource.id()), Some(ResourceState::Present));
        assert_eq!(tracker.barriers_emitted(), 2);
    }
}
