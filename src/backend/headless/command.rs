// Headless command queue, allocator and list
//
// Lists buffer `RecordedCommand`s on the CPU; `execute_command_lists` copies
// them onto the simulated timeline as one batch per list.

use std::sync::Arc;

use parking_lot::Mutex;

use super::gpu::{Batch, Gpu, QueueOp, RecordedCommand};
use super::{HeadlessBackend, HeadlessFence, HeadlessPipelineState, HeadlessRenderTargetView};
use super::{HeadlessResource, HeadlessRootSignature};
use crate::backend::{
    BackendError, CommandAllocator, CommandList, CommandQueue, PrimitiveTopology, ResourceState,
    ScissorRect, VertexBufferView, Viewport,
};

pub struct HeadlessCommandQueue {
    pub(crate) gpu: Arc<Gpu>,
}

impl HeadlessCommandQueue {
    pub(crate) fn new(gpu: Arc<Gpu>) -> Self {
        gpu.lock().stats.command_queues += 1;
        Self { gpu }
    }
}

impl CommandQueue<HeadlessBackend> for HeadlessCommandQueue {
    fn execute_command_lists(&self, lists: &[&HeadlessCommandList]) {
        for list in lists {
            let recording = list.recording.lock();
            if recording.open {
                self.gpu
                    .lock()
                    .report(format!("command list {} executed while still open", list.id));
                continue;
            }

            self.gpu.submit(QueueOp::Execute(Batch {
                list: list.id,
                allocator: recording.allocator,
                commands: recording.commands.clone(),
            }));
        }
    }

    fn signal(&self, fence: &HeadlessFence, value: u64) -> Result<(), BackendError> {
        if self.gpu.lock().is_removed() {
            return Err(BackendError::DeviceRemoved("Signal on a removed device".into()));
        }
        self.gpu.submit(QueueOp::Signal { fence: fence.id, value });
        Ok(())
    }
}

pub struct HeadlessCommandAllocator {
    id: u64,
    gpu: Arc<Gpu>,
}

impl HeadlessCommandAllocator {
    pub(crate) fn new(gpu: Arc<Gpu>) -> Self {
        let id = {
            let mut state = gpu.lock();
            state.stats.command_allocators += 1;
            state.next_id()
        };
        Self { id, gpu }
    }

    pub fn id(&self) -> u64 {
        self.id
    }
}

impl CommandAllocator for HeadlessCommandAllocator {
    fn reset(&self) -> Result<(), BackendError> {
        let mut state = self.gpu.lock();
        if state.allocator_in_flight(self.id) {
            state.report(format!(
                "command allocator {} reset while the GPU is still executing its commands",
                self.id
            ));
        }
        state.stats.allocator_resets += 1;
        Ok(())
    }
}

struct Recording {
    open: bool,
    allocator: u64,
    commands: Vec<RecordedCommand>,
}

pub struct HeadlessCommandList {
    id: u64,
    gpu: Arc<Gpu>,
    recording: Mutex<Recording>,
}

impl HeadlessCommandList {
    pub(crate) fn new(gpu: Arc<Gpu>, allocator: &HeadlessCommandAllocator) -> Self {
        let id = {
            let mut state = gpu.lock();
            state.stats.command_lists += 1;
            state.next_id()
        };

        Self {
            id,
            gpu,
            recording: Mutex::new(Recording {
                open: true,
                allocator: allocator.id,
                commands: Vec::new(),
            }),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    /// Commands recorded since the last reset
    pub fn commands(&self) -> Vec<RecordedCommand> {
        self.recording.lock().commands.clone()
    }

    fn push(&self, command: RecordedCommand) {
        let mut recording = self.recording.lock();
        if !recording.open {
            self.gpu
                .lock()
                .report(format!("{:?} recorded into closed command list {}", command, self.id));
            return;
        }
        recording.commands.push(command);
    }
}

impl CommandList<HeadlessBackend> for HeadlessCommandList {
    fn close(&self) -> Result<(), BackendError> {
        let mut recording = self.recording.lock();
        if !recording.open {
            return Err(BackendError::api("Close", "command list is already closed"));
        }
        recording.open = false;
        Ok(())
    }

    fn reset(&self, allocator: &HeadlessCommandAllocator) -> Result<(), BackendError> {
        let mut recording = self.recording.lock();
        if recording.open {
            return Err(BackendError::api("Reset", "command list is still open"));
        }
        recording.open = true;
        recording.allocator = allocator.id;
        recording.commands.clear();
        self.gpu.lock().stats.list_resets += 1;
        Ok(())
    }

    fn resource_barrier(&self, resource: &HeadlessResource, before: ResourceState, after: ResourceState) {
        self.push(RecordedCommand::Barrier { resource: resource.id, before, after });
    }

    fn set_render_target(&self, rtv: &HeadlessRenderTargetView) {
        self.push(RecordedCommand::SetRenderTarget { resource: rtv.resource, slot: rtv.slot });
    }

    fn clear_render_target(&self, rtv: &HeadlessRenderTargetView, color: [f32; 4]) {
        self.push(RecordedCommand::ClearRenderTarget { resource: rtv.resource, color });
    }

    fn set_viewport(&self, viewport: &Viewport) {
        self.push(RecordedCommand::SetViewport(*viewport));
    }

    fn set_scissor_rect(&self, rect: &ScissorRect) {
        self.push(RecordedCommand::SetScissorRect(*rect));
    }

    fn set_graphics_root_signature(&self, _root_signature: &HeadlessRootSignature) {
        self.push(RecordedCommand::SetRootSignature);
    }

    fn set_pipeline_state(&self, _pipeline: &HeadlessPipelineState) {
        self.push(RecordedCommand::SetPipelineState);
    }

    fn set_vertex_buffer(&self, slot: u32, view: &VertexBufferView) {
        self.push(RecordedCommand::SetVertexBuffer { slot, view: *view });
    }

    fn set_primitive_topology(&self, topology: PrimitiveTopology) {
        self.push(RecordedCommand::SetPrimitiveTopology(topology));
    }

    fn set_graphics_root_constant_buffer(&self, parameter: u32, gpu_address: u64) {
        self.push(RecordedCommand::SetRootConstantBuffer { parameter, gpu_address });
    }

    fn draw_instanced(&self, vertex_count: u32, instance_count: u32, _start_vertex: u32, _start_instance: u32) {
        self.push(RecordedCommand::Draw { vertex_count, instance_count });
    }
}
