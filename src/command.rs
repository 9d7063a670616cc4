// Command submission unit
//
// One queue, one allocator, one graphics list. The list moves through
// `FrameState` strictly in order; every step checks the current state, so
// closing twice, executing an open list or resetting before the fence wait
// fails here instead of at the API.

use crate::backend::{
    Backend, CommandAllocator, CommandList, CommandQueue, Device, PrimitiveTopology, ScissorRect,
    VertexBufferView, Viewport,
};
use crate::error::{RenderError, RenderResult};
use crate::sync::{FrameCompletion, FrameState, FrameSynchronizer, ResetRecord};

pub struct CommandContext<B: Backend> {
    // Field order is drop order: list before the allocator backing it
    list: B::CommandList,
    allocator: B::CommandAllocator,
    queue: B::CommandQueue,
    state: FrameState,
}

impl<B: Backend> CommandContext<B> {
    /// Create the queue, allocator and an open list bound to it
    pub fn new(device: &B::Device) -> RenderResult<Self> {
        let queue = device
            .create_command_queue()
            .map_err(RenderError::startup("command queue"))?;
        let allocator = device
            .create_command_allocator()
            .map_err(RenderError::startup("command allocator"))?;
        let list = device
            .create_command_list(&allocator)
            .map_err(RenderError::startup("command list"))?;

        Ok(Self { list, allocator, queue, state: FrameState::Recording })
    }

    pub fn queue(&self) -> &B::CommandQueue {
        &self.queue
    }

    pub fn state(&self) -> FrameState {
        self.state
    }

    fn unexpected(&self, op: &'static str, expected: &'static str) -> RenderError {
        RenderError::Recording { op, expected, actual: self.state }
    }

    /// Enter `Recording` from a freshly reset list
    pub fn begin_recording(&mut self) -> RenderResult<()> {
        match self.state {
            FrameState::Recording => Ok(()),
            FrameState::ReadyForReuse { .. } => {
                self.state = FrameState::Recording;
                Ok(())
            }
            _ => Err(self.unexpected("begin recording", "ready for reuse")),
        }
    }

    /// Handle for appending commands to the open list
    pub fn recorder(&self) -> RenderResult<Recorder<'_, B>> {
        match self.state {
            FrameState::Recording => Ok(Recorder { list: &self.list }),
            _ => Err(self.unexpected("record", "recording")),
        }
    }

    pub fn close(&mut self) -> RenderResult<()> {
        if self.state != FrameState::Recording {
            return Err(self.unexpected("close", "recording"));
        }
        self.list.close()?;
        self.state = FrameState::Closed;
        Ok(())
    }

    /// Enqueue the closed list on the GPU timeline
    pub fn execute(&mut self) -> RenderResult<()> {
        if self.state != FrameState::Closed {
            return Err(self.unexpected("execute", "closed"));
        }
        self.queue.execute_command_lists(&[&self.list]);
        self.state = FrameState::Submitted;
        Ok(())
    }

    /// Signal the next fence value behind the submitted work
    pub fn signal(&mut self, sync: &mut FrameSynchronizer<B>) -> RenderResult<u64> {
        if self.state != FrameState::Submitted {
            return Err(self.unexpected("signal", "submitted"));
        }
        let target = sync.signal(&self.queue)?;
        self.state = FrameState::Signaled { target };
        Ok(target)
    }

    pub fn wait(&mut self, sync: &mut FrameSynchronizer<B>) -> RenderResult<FrameCompletion> {
        let FrameState::Signaled { target } = self.state else {
            return Err(self.unexpected("wait", "signaled"));
        };
        let completion = sync.wait(target)?;
        self.state = FrameState::Waited { target };
        Ok(completion)
    }

    /// Reset allocator then list, only once the GPU is past this frame
    pub fn reset(&mut self, sync: &mut FrameSynchronizer<B>) -> RenderResult<ResetRecord> {
        let FrameState::Waited { target } = self.state else {
            return Err(self.unexpected("reset", "waited"));
        };

        // Re-checks the fence: the record is taken at the moment of reset
        let record = sync.record_reset()?;

        self.allocator.reset()?;
        self.list.reset(&self.allocator)?;
        self.state = FrameState::ReadyForReuse { target };

        log::trace!("Command list reset after fence value {}", target);
        Ok(record)
    }
}

/// Borrowed view of the open command list
///
/// Render-target binding and clears are deliberately missing: those go
/// through `RenderPass`, which owns the back-buffer transitions.
pub struct Recorder<'a, B: Backend> {
    list: &'a B::CommandList,
}

impl<'a, B: Backend> Clone for Recorder<'a, B> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<'a, B: Backend> Copy for Recorder<'a, B> {}

impl<'a, B: Backend> Recorder<'a, B> {
    pub(crate) fn list(&self) -> &'a B::CommandList {
        self.list
    }

    pub fn set_viewport(&self, viewport: &Viewport) {
        self.list.set_viewport(viewport);
    }

    pub fn set_scissor_rect(&self, rect: &ScissorRect) {
        self.list.set_scissor_rect(rect);
    }

    pub fn set_root_signature(&self, root_signature: &B::RootSignature) {
        self.list.set_graphics_root_signature(root_signature);
    }

    pub fn set_pipeline_state(&self, pipeline: &B::PipelineState) {
        self.list.set_pipeline_state(pipeline);
    }

    pub fn set_vertex_buffer(&self, slot: u32, view: &VertexBufferView) {
        self.list.set_vertex_buffer(slot, view);
    }

    pub fn set_primitive_topology(&self, topology: PrimitiveTopology) {
        self.list.set_primitive_topology(topology);
    }

    pub fn set_constant_buffer(&self, parameter: u32, gpu_address: u64) {
        self.list.set_graphics_root_constant_buffer(parameter, gpu_address);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::headless::{GpuTiming, HeadlessBackend, HeadlessConfig, HeadlessFactory};
    use crate::backend::{Adapter, Factory, FeatureLevel};
    use crate::sync::WaitPolicy;

    struct Fixture {
        factory: HeadlessFactory,
        commands: CommandContext<HeadlessBackend>,
        sync: FrameSynchronizer<HeadlessBackend>,
    }

    fn fixture(timing: GpuTiming) -> Fixture {
        let factory = HeadlessFactory::new(HeadlessConfig { timing, ..HeadlessConfig::default() });
        let adapter = factory.enum_adapter_by_preference(0).unwrap().unwrap();
        let device = adapter.create_device(FeatureLevel::Level12_0).unwrap();
        let commands = CommandContext::new(&device).unwrap();
        let sync = FrameSynchronizer::new(&device, WaitPolicy::Unbounded, 16).unwrap();
        Fixture { factory, commands, sync }
    }

    #[test]
    fn full_cycle_walks_every_state() {
        let Fixture { factory, mut commands, mut sync } = fixture(GpuTiming::OnWait);

        assert_eq!(commands.state(), FrameState::Recording);
        commands.close().unwrap();
        assert_eq!(commands.state(), FrameState::Closed);
        commands.execute().unwrap();
        assert_eq!(commands.state(), FrameState::Submitted);
        assert_eq!(commands.signal(&mut sync).unwrap(), 1);
        assert_eq!(commands.state(), FrameState::Signaled { target: 1 });
        commands.wait(&mut sync).unwrap();
        assert_eq!(commands.state(), FrameState::Waited { target: 1 });
        let record = commands.reset(&mut sync).unwrap();
        assert_eq!(commands.state(), FrameState::ReadyForReuse { target: 1 });
        commands.begin_recording().unwrap();
        assert_eq!(commands.state(), FrameState::Recording);

        assert_eq!(record.completed_at_reset, 1);
        assert!(factory.gpu_handle().validation_messages().is_empty());
    }

    #[test]
    fn reset_without_wait_is_rejected() {
        let Fixture { mut commands, mut sync, .. } = fixture(GpuTiming::OnWait);
        commands.close().unwrap();
        commands.execute().unwrap();
        commands.signal(&mut sync).unwrap();

        let err = commands.reset(&mut sync).unwrap_err();
        assert!(matches!(err, RenderError::Recording { op: "reset", .. }));
        assert_eq!(sync.reset_count(), 0);
    }

    #[test]
    fn recording_after_close_is_rejected() {
        let Fixture { mut commands, .. } = fixture(GpuTiming::Immediate);
        commands.close().unwrap();

        assert!(commands.recorder().is_err());
        assert!(commands.close().is_err());
    }

    #[test]
    fn execute_requires_closed_list() {
        let Fixture { mut commands, .. } = fixture(GpuTiming::Immediate);

        assert!(matches!(
            commands.execute(),
            Err(RenderError::Recording { op: "execute", .. })
        ));
    }
}
