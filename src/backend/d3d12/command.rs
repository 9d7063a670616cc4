// Command queue, allocator and graphics command list

use std::mem::ManuallyDrop;

use windows::core::Interface;
use windows::Win32::Foundation::RECT;
use windows::Win32::Graphics::Direct3D::D3D_PRIMITIVE_TOPOLOGY_TRIANGLELIST;
use windows::Win32::Graphics::Direct3D12::*;

use super::buffer::{D3d12RenderTargetView, D3d12Resource};
use super::pipeline::{D3d12PipelineState, D3d12RootSignature};
use super::sync::D3d12Fence;
use super::{api_error, resource_states, D3d12Backend};
use crate::backend::{
    BackendError, CommandAllocator, CommandList, CommandQueue, PrimitiveTopology, ResourceState,
    ScissorRect, VertexBufferView, Viewport,
};

pub struct D3d12CommandQueue {
    pub(crate) queue: ID3D12CommandQueue,
}

impl CommandQueue<D3d12Backend> for D3d12CommandQueue {
    fn execute_command_lists(&self, lists: &[&D3d12CommandList]) {
        let lists: Vec<Option<ID3D12CommandList>> =
            lists.iter().map(|list| Some(list.submit_handle.clone())).collect();
        unsafe { self.queue.ExecuteCommandLists(&lists) };
    }

    fn signal(&self, fence: &D3d12Fence, value: u64) -> Result<(), BackendError> {
        unsafe { self.queue.Signal(&fence.fence, value) }.map_err(api_error("Signal"))
    }
}

pub struct D3d12CommandAllocator {
    pub(crate) allocator: ID3D12CommandAllocator,
}

impl CommandAllocator for D3d12CommandAllocator {
    fn reset(&self) -> Result<(), BackendError> {
        unsafe { self.allocator.Reset() }.map_err(api_error("ID3D12CommandAllocator::Reset"))
    }
}

pub struct D3d12CommandList {
    list: ID3D12GraphicsCommandList,
    // Base interface handed to ExecuteCommandLists, cast once up front
    submit_handle: ID3D12CommandList,
}

impl D3d12CommandList {
    pub(crate) fn new(list: ID3D12GraphicsCommandList) -> Result<Self, BackendError> {
        let submit_handle = list
            .cast::<ID3D12CommandList>()
            .map_err(|e| BackendError::creation("command list", e))?;
        Ok(Self { list, submit_handle })
    }
}

impl CommandList<D3d12Backend> for D3d12CommandList {
    fn close(&self) -> Result<(), BackendError> {
        unsafe { self.list.Close() }.map_err(api_error("Close"))
    }

    fn reset(&self, allocator: &D3d12CommandAllocator) -> Result<(), BackendError> {
        unsafe { self.list.Reset(&allocator.allocator, None) }
            .map_err(api_error("ID3D12GraphicsCommandList::Reset"))
    }

    fn resource_barrier(&self, resource: &D3d12Resource, before: ResourceState, after: ResourceState) {
        let barrier = D3D12_RESOURCE_BARRIER {
            Type: D3D12_RESOURCE_BARRIER_TYPE_TRANSITION,
            Flags: D3D12_RESOURCE_BARRIER_FLAG_NONE,
            Anonymous: D3D12_RESOURCE_BARRIER_0 {
                Transition: ManuallyDrop::new(D3D12_RESOURCE_TRANSITION_BARRIER {
                    // Borrowed pointer: no AddRef here, and ManuallyDrop skips the Release
                    pResource: unsafe { std::mem::transmute_copy(&resource.resource) },
                    Subresource: D3D12_RESOURCE_BARRIER_ALL_SUBRESOURCES,
                    StateBefore: resource_states(before),
                    StateAfter: resource_states(after),
                }),
            },
        };
        unsafe { self.list.ResourceBarrier(&[barrier]) };
    }

    fn set_render_target(&self, rtv: &D3d12RenderTargetView) {
        unsafe { self.list.OMSetRenderTargets(1, Some(&rtv.handle), false, None) };
    }

    fn clear_render_target(&self, rtv: &D3d12RenderTargetView, color: [f32; 4]) {
        unsafe { self.list.ClearRenderTargetView(rtv.handle, &color, None) };
    }

    fn set_viewport(&self, viewport: &Viewport) {
        let viewport = D3D12_VIEWPORT {
            TopLeftX: viewport.x,
            TopLeftY: viewport.y,
            Width: viewport.width,
            Height: viewport.height,
            MinDepth: viewport.min_depth,
            MaxDepth: viewport.max_depth,
        };
        unsafe { self.list.RSSetViewports(&[viewport]) };
    }

    fn set_scissor_rect(&self, rect: &ScissorRect) {
        let rect = RECT { left: rect.left, top: rect.top, right: rect.right, bottom: rect.bottom };
        unsafe { self.list.RSSetScissorRects(&[rect]) };
    }

    fn set_graphics_root_signature(&self, root_signature: &D3d12RootSignature) {
        unsafe { self.list.SetGraphicsRootSignature(&root_signature.root_signature) };
    }

    fn set_pipeline_state(&self, pipeline: &D3d12PipelineState) {
        unsafe { self.list.SetPipelineState(&pipeline.pipeline) };
    }

    fn set_vertex_buffer(&self, slot: u32, view: &VertexBufferView) {
        let view = D3D12_VERTEX_BUFFER_VIEW {
            BufferLocation: view.gpu_address,
            SizeInBytes: view.size_in_bytes,
            StrideInBytes: view.stride_in_bytes,
        };
        unsafe { self.list.IASetVertexBuffers(slot, Some(&[view])) };
    }

    fn set_primitive_topology(&self, topology: PrimitiveTopology) {
        let topology = match topology {
            PrimitiveTopology::TriangleList => D3D_PRIMITIVE_TOPOLOGY_TRIANGLELIST,
        };
        unsafe { self.list.IASetPrimitiveTopology(topology) };
    }

    fn set_graphics_root_constant_buffer(&self, parameter: u32, gpu_address: u64) {
        unsafe { self.list.SetGraphicsRootConstantBufferView(parameter, gpu_address) };
    }

    fn draw_instanced(&self, vertex_count: u32, instance_count: u32, start_vertex: u32, start_instance: u32) {
        unsafe {
            self.list
                .DrawInstanced(vertex_count, instance_count, start_vertex, start_instance)
        };
    }
}
